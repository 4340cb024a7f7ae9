use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use crate::container::MergeMod;
use crate::manifest::{MergeChange, MergeOperation, PropertyType};
use crate::{MergeError, Result};

/// Turns a merge mod back into an editable manifest and loose files, written
/// flat into `output_dir`. Returns the path of the written manifest.
///
/// Sub-directories used in references are lost: every reference is rewritten
/// to its file name, so the output can be compiled again as is. Fails without
/// writing anything if two different references share a file name or if an
/// asset update points to an asset the container does not carry.
pub fn extract<R: Read + Seek>(merge_mod: MergeMod<R>, output_dir: &Path) -> Result<PathBuf> {
    let (name, mut manifest, mut assets) = merge_mod.into_parts();
    log::info!("Extracting '{}' to '{}'", name, output_dir.display());

    let mut flat_names = FlatNames::default();
    for change in manifest.changes() {
        for reference in references(change) {
            flat_names.claim(reference)?;
        }
        if let MergeOperation::AssetUpdate(update) = &change.operation {
            if !assets.contains(&update.asset_name) {
                return Err(MergeError::AssetNotFound(update.asset_name.clone()));
            }
        }
    }

    fs::create_dir_all(output_dir)?;
    let mut extracted_assets = HashSet::new();
    for change in manifest.changes_mut() {
        match &mut change.operation {
            MergeOperation::PropertyUpdates(updates) => {
                for update in updates
                    .iter_mut()
                    .filter(|u| u.property_type == PropertyType::ArrayProperty)
                {
                    if let Some(asset) = update.property_asset.take() {
                        let file_name = flat_name(&asset).to_string();
                        if let Some(value) = update.property_value.take() {
                            write_loose_file(output_dir, &file_name, value.as_bytes())?;
                        }
                        update.property_asset = Some(file_name);
                    }
                }
            }
            MergeOperation::ScriptUpdate(update) => {
                let file_name = flat_name(&update.script_file_name).to_string();
                if let Some(text) = update.script_text.take() {
                    write_loose_file(output_dir, &file_name, text.as_bytes())?;
                }
                update.script_file_name = file_name;
            }
            MergeOperation::AssetUpdate(update) => {
                let file_name = flat_name(&update.asset_name).to_string();
                // Assets can be shared between changes
                if extracted_assets.insert(file_name.to_lowercase()) {
                    let data = assets.take(&update.asset_name)?;
                    write_loose_file(output_dir, &file_name, &data)?;
                }
                update.asset_name = file_name;
            }
            MergeOperation::AddToClassOrReplace(update) => {
                let file_names: Vec<String> = update
                    .script_file_names
                    .iter()
                    .map(|f| flat_name(f).to_string())
                    .collect();
                if let Some(scripts) = update.scripts.take() {
                    for (file_name, script) in file_names.iter().zip(scripts.iter()) {
                        write_loose_file(output_dir, file_name, script.as_bytes())?;
                    }
                }
                update.script_file_names = file_names;
            }
        }
    }
    if !assets.is_empty() {
        log::debug!("{} unreferenced asset(s) not extracted", assets.len());
    }

    let stem = Path::new(&name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or(name);
    let manifest_path = output_dir.join(format!("{}.json", stem));
    fs::write(&manifest_path, manifest.to_json_pretty()?)?;
    log::info!("Wrote '{}'", manifest_path.display());
    Ok(manifest_path)
}

/// Every loose file reference of a change.
fn references(change: &MergeChange) -> Vec<&str> {
    match &change.operation {
        MergeOperation::PropertyUpdates(updates) => updates
            .iter()
            .filter(|u| u.property_type == PropertyType::ArrayProperty)
            .filter_map(|u| u.property_asset.as_deref())
            .collect(),
        MergeOperation::ScriptUpdate(update) => vec![update.script_file_name.as_str()],
        MergeOperation::AssetUpdate(update) => vec![update.asset_name.as_str()],
        MergeOperation::AddToClassOrReplace(update) => {
            update.script_file_names.iter().map(String::as_str).collect()
        }
    }
}

/// "scripts/Tick.uc" -> "Tick.uc"
fn flat_name(reference: &str) -> &str {
    reference
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(reference)
}

/// Flat file name -> first reference that claimed it.
#[derive(Default)]
struct FlatNames {
    claimed: HashMap<String, String>,
}

impl FlatNames {
    fn claim(&mut self, reference: &str) -> Result<()> {
        let file_name = flat_name(reference);
        let key = file_name.to_lowercase();
        match self.claimed.get(&key) {
            Some(first) if normalize_reference(first) != normalize_reference(reference) => {
                Err(MergeError::FlattenCollision {
                    file_name: file_name.to_string(),
                    first: first.clone(),
                    second: reference.to_string(),
                })
            }
            Some(_) => Ok(()),
            None => {
                self.claimed.insert(key, reference.to_string());
                Ok(())
            }
        }
    }
}

fn normalize_reference(reference: &str) -> String {
    reference.replace('\\', "/").to_lowercase()
}

fn write_loose_file(output_dir: &Path, file_name: &str, content: &[u8]) -> Result<()> {
    log::trace!("Writing '{}' ({} bytes)", file_name, content.len());
    fs::write(output_dir.join(file_name), content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetTable;
    use crate::compiler::compile_merge_mod;
    use crate::loader::read_merge_mod;
    use crate::manifest::MergeModManifest;
    use std::hash::Hasher;
    use std::io::Cursor;
    use tempfile::tempdir;
    use twox_hash::XxHash64;
    use walkdir::WalkDir;

    fn count_files(dir_path: &Path) -> usize {
        WalkDir::new(dir_path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter_map(|entry| entry.metadata().ok())
            .filter(|metadata| metadata.is_file())
            .count()
    }

    fn xxhash(content: &[u8]) -> u64 {
        let mut hasher = XxHash64::default();
        hasher.write(content);
        hasher.finish()
    }

    #[test]
    fn test_extract_then_compile() {
        let source_dir = tempdir().unwrap();
        let root = source_dir.path();
        let big_asset: Vec<u8> = (0..100_000_u32).map(|i| (i * 7 % 256) as u8).collect();
        fs::create_dir_all(root.join("scripts")).unwrap();
        fs::create_dir_all(root.join("assets")).unwrap();
        fs::write(root.join("scripts/Tick.uc"), "function Tick();").unwrap();
        fs::write(root.join("tags.txt"), "(\"A\")").unwrap();
        fs::write(root.join("scripts/a.uc"), "var int A;").unwrap();
        fs::write(root.join("assets/Big.pcc"), &big_asset).unwrap();
        fs::write(
            root.join("mymod.json"),
            r#"{"game": "LE3", "files": [{"filename": "SFXGame.pcc", "changes": [
                {"entryname": "Pawn.Tick", "scriptupdate": {"scriptfilename": "scripts/Tick.uc"}},
                {"entryname": "Pawn", "propertyupdates": [
                    {"propertyname": "Tags", "propertytype": "ArrayProperty", "propertyasset": "tags.txt"}
                ]},
                {"entryname": "Camera", "addtoclassorreplace": {"scriptfilenames": ["scripts/a.uc"]}},
                {"entryname": "Big1", "assetupdate": {"assetname": "assets/Big.pcc", "entryname": "Big"}},
                {"entryname": "Big2", "assetupdate": {"assetname": "assets/Big.pcc", "entryname": "Big"}}
            ]}]}"#,
        )
        .unwrap();
        let compiled = compile_merge_mod(&root.join("mymod.json")).unwrap();
        let merge_mod = read_merge_mod(Cursor::new(compiled), "mymod.m3m", false).unwrap();

        let output_dir = tempdir().unwrap();
        let manifest_path = extract(merge_mod, output_dir.path()).unwrap();
        assert_eq!(manifest_path, output_dir.path().join("mymod.json"));
        // Tick.uc, tags.txt, a.uc, Big.pcc and the manifest
        assert_eq!(count_files(output_dir.path()), 5);
        let extracted_asset = fs::read(output_dir.path().join("Big.pcc")).unwrap();
        assert_eq!(xxhash(&extracted_asset), xxhash(&big_asset));
        assert_eq!(
            fs::read_to_string(output_dir.path().join("Tick.uc")).unwrap(),
            "function Tick();"
        );

        let manifest_text = fs::read_to_string(&manifest_path).unwrap();
        assert!(manifest_text.contains('\n'));
        assert!(!manifest_text.contains("scripttext"));
        assert!(!manifest_text.contains("propertyvalue"));
        assert!(!manifest_text.contains("\"scripts\""));
        let manifest = MergeModManifest::from_json(&manifest_text).unwrap();
        let asset_names: Vec<&str> = manifest
            .changes()
            .filter_map(|c| match &c.operation {
                MergeOperation::AssetUpdate(update) => Some(update.asset_name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(asset_names, vec!["Big.pcc", "Big.pcc"]);

        // Flat output compiles back to the same content
        let recompiled = compile_merge_mod(&manifest_path).unwrap();
        let mut recompiled = read_merge_mod(Cursor::new(recompiled), "mymod.m3m", true).unwrap();
        assert_eq!(recompiled.merge_count(), 5);
        let big = recompiled.resolve_asset("big.pcc").unwrap();
        assert_eq!(xxhash(big), xxhash(&big_asset));
    }

    #[test]
    fn test_flatten_collision() {
        let manifest = MergeModManifest::from_json(
            r#"{"game": "LE1", "files": [{"filename": "SFXGame.pcc", "changes": [
                {"entryname": "A", "scriptupdate": {"scriptfilename": "a/Tick.uc", "scripttext": "a"}},
                {"entryname": "A2", "scriptupdate": {"scriptfilename": "A\\tick.uc", "scripttext": "a"}},
                {"entryname": "B", "scriptupdate": {"scriptfilename": "b/Tick.uc", "scripttext": "b"}}
            ]}]}"#,
        )
        .unwrap();
        let merge_mod: MergeMod<Cursor<Vec<u8>>> =
            MergeMod::new("collide.m3m", manifest, AssetTable::new());
        let output_dir = tempdir().unwrap();
        match extract(merge_mod, output_dir.path()) {
            Err(MergeError::FlattenCollision {
                file_name,
                first,
                second,
            }) => {
                assert_eq!(file_name, "Tick.uc");
                assert_eq!(first, "a/Tick.uc");
                assert_eq!(second, "b/Tick.uc");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(count_files(output_dir.path()), 0);
    }

    #[test]
    fn test_missing_asset() {
        let manifest = MergeModManifest::from_json(
            r#"{"game": "LE1", "files": [{"filename": "BioUI.pcc", "changes": [
                {"entryname": "Tick", "scriptupdate": {"scriptfilename": "Tick.uc", "scripttext": "a"}},
                {"entryname": "Icon", "assetupdate": {"assetname": "icon.pcc", "entryname": "Icon"}}
            ]}]}"#,
        )
        .unwrap();
        let merge_mod: MergeMod<Cursor<Vec<u8>>> =
            MergeMod::new("broken.m3m", manifest, AssetTable::new());
        let temp_dir = tempdir().unwrap();
        let output_dir = temp_dir.path().join("broken");
        assert!(matches!(
            extract(merge_mod, &output_dir),
            Err(MergeError::AssetNotFound(name)) if name == "icon.pcc"
        ));
        // Nothing is written, not even the script that comes first
        assert!(!output_dir.exists());
        assert_eq!(count_files(temp_dir.path()), 0);
    }

    #[test]
    fn test_flat_name() {
        assert_eq!(flat_name("scripts/sub\\Tick.uc"), "Tick.uc");
        assert_eq!(flat_name("Tick.uc"), "Tick.uc");
    }
}
