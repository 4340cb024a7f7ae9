use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::assets::AssetTable;
use crate::container::MergeMod;
use crate::loader::{read_merge_mod, write_merge_mod, MERGE_MOD_EXTENSION};
use crate::manifest::{MergeModManifest, MergeOperation, PropertyType};
use crate::strings::string_from_utf16le;
use crate::{MergeError, Result};

/// Gives the compiler access to the loose files a manifest references.
pub trait SourceProvider {
    /// Reads a file given its path relative to the source root. Fails with
    /// `MissingSourceAsset` if it doesn't exist.
    fn read(&self, relative_path: &str) -> Result<Vec<u8>>;

    fn read_text(&self, relative_path: &str) -> Result<String> {
        let content = self.read(relative_path)?;
        text_from_bytes(&content)
            .map_err(|e| MergeError::malformed_string(format!("'{}': {}", relative_path, e)))
    }
}

/// Loose files stored in a directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SourceProvider for DirectorySource {
    fn read(&self, relative_path: &str) -> Result<Vec<u8>> {
        let native_path = join_relative_path(&self.root, relative_path);
        if !native_path.is_file() {
            return Err(MergeError::MissingSourceAsset(relative_path.to_string()));
        }
        Ok(fs::read(native_path)?)
    }
}

/// Compiles the manifest at `manifest_path`, reading loose files from the
/// directory that contains it. Returns the content of the `.m3m` file.
pub fn compile_merge_mod(manifest_path: &Path) -> Result<Vec<u8>> {
    let source_dir = manifest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    compile(manifest_path, &DirectorySource::new(source_dir))
}

/// Compiles the manifest at `manifest_path` with loose files read from
/// `source`. Manifests ending in `.yml` or `.yaml` are parsed as YAML, any
/// other as JSON.
pub fn compile<S: SourceProvider + ?Sized>(manifest_path: &Path, source: &S) -> Result<Vec<u8>> {
    log::info!("Compiling '{}'", manifest_path.display());
    let manifest_text = fs::read_to_string(manifest_path)?;
    log::trace!("Source manifest: {}", manifest_text);
    let is_yaml = manifest_path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("yml") || e.eq_ignore_ascii_case("yaml"))
        .unwrap_or(false);
    let manifest = if is_yaml {
        MergeModManifest::from_yaml(&manifest_text)?
    } else {
        MergeModManifest::from_json(&manifest_text)?
    };
    let name = manifest_path
        .with_extension(MERGE_MOD_EXTENSION)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    compile_manifest(manifest, &name, source)
}

/// Validates `manifest`, inlines the loose files it references and serializes
/// it along with its assets.
pub fn compile_manifest<S: SourceProvider + ?Sized>(
    mut manifest: MergeModManifest,
    name: &str,
    source: &S,
) -> Result<Vec<u8>> {
    manifest.validate_source()?;
    log::debug!("Manifest is valid");

    let mut assets: AssetTable<Cursor<Vec<u8>>> = AssetTable::new();
    for change in manifest.changes_mut() {
        match &mut change.operation {
            MergeOperation::PropertyUpdates(updates) => {
                for update in updates
                    .iter_mut()
                    .filter(|u| u.property_type == PropertyType::ArrayProperty)
                {
                    if let Some(asset) = &update.property_asset {
                        log::debug!("Inlining array property file '{}'", asset);
                        update.property_value = Some(source.read_text(asset)?);
                    }
                }
            }
            MergeOperation::ScriptUpdate(update) => {
                log::debug!("Inlining script file '{}'", update.script_file_name);
                update.script_text = Some(source.read_text(&update.script_file_name)?);
            }
            MergeOperation::AssetUpdate(update) => {
                // Referenced several times, embedded once
                if !assets.contains(&update.asset_name) {
                    log::debug!("Adding asset file '{}'", update.asset_name);
                    let data = source.read(&update.asset_name)?;
                    assets.insert(update.asset_name.clone(), data);
                }
            }
            MergeOperation::AddToClassOrReplace(update) => {
                let mut scripts = Vec::with_capacity(update.script_file_names.len());
                for file_name in &update.script_file_names {
                    log::debug!("Inlining class script file '{}'", file_name);
                    scripts.push(source.read_text(file_name)?);
                }
                update.scripts = Some(scripts);
            }
        }
    }

    log::info!("Serializing {} referenced asset(s)", assets.len());
    let asset_count = assets.len();
    let mut merge_mod = MergeMod::new(name, manifest, assets);
    let mut output = Cursor::new(Vec::new());
    write_merge_mod(&mut merge_mod, &mut output)?;
    let output = output.into_inner();

    // Make sure what we wrote reads back
    let verified = read_merge_mod(Cursor::new(output.as_slice()), name, true)?;
    debug_assert_eq!(verified.assets().len(), asset_count);
    log::info!(
        "Serialization complete: {} change(s), {} bytes",
        verified.merge_count(),
        output.len()
    );
    Ok(output)
}

/// Decodes the content of a text file, honouring UTF-8 and UTF-16LE BOMs.
fn text_from_bytes(content: &[u8]) -> Result<String> {
    const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
    const UTF16LE_BOM: &[u8] = &[0xFF, 0xFE];
    if content.starts_with(UTF8_BOM) {
        Ok(String::from_utf8(content[UTF8_BOM.len()..].to_vec())
            .map_err(|e| MergeError::malformed_string(e.to_string()))?)
    } else if content.starts_with(UTF16LE_BOM) {
        string_from_utf16le(&content[UTF16LE_BOM.len()..])
    } else {
        String::from_utf8(content.to_vec()).map_err(|e| MergeError::malformed_string(e.to_string()))
    }
}

/// Joins a manifest reference to the source root, accepting both '/' and
/// '\' as separators.
fn join_relative_path(root: &Path, relative_path: &str) -> PathBuf {
    let mut result = PathBuf::from(root);
    for component in relative_path.split(|c| c == '/' || c == '\\') {
        if !component.is_empty() {
            result.push(component);
        }
    }
    result
}
