use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek};
use std::iter::FromIterator;
use std::path::{Path, PathBuf};

use crate::assets::AssetTable;
use crate::container::MergeMod;
use crate::error::ChangeFailure;
use crate::game::{DefaultLocalizations, Game, LocalizationProvider};
use crate::manifest::{AssetUpdate, MergeChange, MergeFile, MergeOperation, PropertyUpdate};
use crate::{MergeError, Result};
use crc::crc32::{self, Hasher32};

/// CRC32 of a target file's content before any merge mod touched it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash(pub u32);

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Original content hashes, keyed by physical path. Shared across installs so
/// that a file touched by several mods keeps its pristine hash.
pub type HashCache = HashMap<PathBuf, ContentHash>;

/// Computes the CRC32 of a file's content.
pub fn hash_file(path: &Path) -> Result<ContentHash> {
    let mut file = File::open(path)?;
    // Use an 8KiB buffer
    let mut buf = [0_u8; 8 * 1024];
    let mut digest = crc32::Digest::new(crc32::IEEE);
    loop {
        let len = match file.read(&mut buf) {
            Ok(0) => return Ok(ContentHash(digest.sum32())),
            Ok(len) => len,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        digest.write(&buf[..len]);
    }
}

/// Files loaded by the game, as logical name -> physical path. Lookups are
/// case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct LoadedFileIndex {
    files: HashMap<String, PathBuf>,
}

impl LoadedFileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, file_name: &str, path: impl Into<PathBuf>) -> Option<PathBuf> {
        self.files.insert(file_name.to_lowercase(), path.into())
    }

    pub fn get(&self, file_name: &str) -> Option<&Path> {
        self.files.get(&file_name.to_lowercase()).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl<S: AsRef<str>, P: Into<PathBuf>> FromIterator<(S, P)> for LoadedFileIndex {
    fn from_iter<I: IntoIterator<Item = (S, P)>>(iter: I) -> Self {
        let mut index = LoadedFileIndex::new();
        for (file_name, path) in iter {
            index.insert(file_name.as_ref(), path);
        }
        index
    }
}

/// Game installation merge mods are applied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTarget {
    pub game: Game,
    pub root: PathBuf,
}

impl InstallTarget {
    pub fn new(game: Game, root: impl Into<PathBuf>) -> Self {
        Self {
            game,
            root: root.into(),
        }
    }

    /// Directory holding the base game's packages.
    pub fn cooked_path(&self) -> PathBuf {
        let mut path = self.root.clone();
        for component in self.game.cooked_directory().split('/') {
            path.push(component);
        }
        path
    }
}

/// Adjusts the loaded file index before a merge mod is applied.
pub trait LoadOrderPolicy {
    fn name(&self) -> &str;
    fn apply(&self, target: &InstallTarget, loaded_files: &mut LoadedFileIndex);
}

/// LE2 loads the base game EntryMenu.pcc before its DLC copy, so the base
/// game file is the one to patch.
#[derive(Debug, Clone, Copy, Default)]
pub struct Le2EntryMenuOverride;

impl LoadOrderPolicy for Le2EntryMenuOverride {
    fn name(&self) -> &str {
        "LE2 EntryMenu override"
    }

    fn apply(&self, target: &InstallTarget, loaded_files: &mut LoadedFileIndex) {
        const ENTRY_MENU: &str = "EntryMenu.pcc";
        if target.game == Game::LE2 {
            loaded_files.insert(ENTRY_MENU, target.cooked_path().join(ENTRY_MENU));
        }
    }
}

pub fn default_policies() -> Vec<Box<dyn LoadOrderPolicy>> {
    vec![Box::new(Le2EntryMenuOverride)]
}

/// What a package edit applies to.
#[derive(Debug, Clone, Copy)]
pub struct EditContext<'a> {
    pub game: Game,
    pub package: &'a Path,
    pub entry_name: &'a str,
    pub disable_config_update: bool,
}

/// Primitives that modify game packages. Merge mods only decide which ones
/// run, in which order and on which file.
pub trait PackageEditor {
    fn apply_property_updates(
        &mut self,
        context: &EditContext<'_>,
        updates: &[PropertyUpdate],
    ) -> Result<()>;

    fn apply_script_update(&mut self, context: &EditContext<'_>, script_text: &str) -> Result<()>;

    fn apply_asset_update(
        &mut self,
        context: &EditContext<'_>,
        update: &AssetUpdate,
        asset: &[u8],
    ) -> Result<()>;

    fn apply_add_to_class_or_replace(
        &mut self,
        context: &EditContext<'_>,
        scripts: &[String],
    ) -> Result<()>;
}

/// Applies merge mods to a game installation.
pub struct Installer<'a> {
    target: &'a InstallTarget,
    loaded_files: &'a LoadedFileIndex,
    policies: Vec<Box<dyn LoadOrderPolicy>>,
    localizations: &'a dyn LocalizationProvider,
}

impl<'a> Installer<'a> {
    pub fn new(target: &'a InstallTarget, loaded_files: &'a LoadedFileIndex) -> Self {
        Self {
            target,
            loaded_files,
            policies: default_policies(),
            localizations: &DefaultLocalizations,
        }
    }

    pub fn with_policies(mut self, policies: Vec<Box<dyn LoadOrderPolicy>>) -> Self {
        self.policies = policies;
        self
    }

    pub fn with_localizations(mut self, localizations: &'a dyn LocalizationProvider) -> Self {
        self.localizations = localizations;
        self
    }

    /// The loaded file index once every policy has been applied.
    pub fn effective_load_order(&self) -> LoadedFileIndex {
        let mut loaded_files = self.loaded_files.clone();
        for policy in &self.policies {
            log::trace!("Applying load order policy '{}'", policy.name());
            policy.apply(self.target, &mut loaded_files);
        }
        loaded_files
    }

    /// Applies every change of `merge_mod`, file patch by file patch.
    ///
    /// `on_weight` receives the weight of each change right before it is
    /// applied. `on_tracked_file` receives each physical file the first time
    /// it gets modified, along with the hash of its original content.
    ///
    /// A failing change stops its file patch but not the others. Applied
    /// changes are not rolled back.
    pub fn install<R, E, W, T>(
        &self,
        merge_mod: &mut MergeMod<R>,
        editor: &mut E,
        hashes: &mut HashCache,
        mut on_weight: W,
        mut on_tracked_file: T,
    ) -> Result<()>
    where
        R: Read + Seek,
        E: PackageEditor + ?Sized,
        W: FnMut(u32),
        T: FnMut(&Path, ContentHash),
    {
        let mod_name = merge_mod.name().to_string();
        log::info!("Applying {}", mod_name);
        log::debug!("Expected weight: {}", merge_mod.merge_weight());
        if merge_mod.game() != self.target.game {
            log::warn!(
                "'{}' targets {} but is being applied to {}",
                mod_name,
                merge_mod.game(),
                self.target.game
            );
        }

        let loaded_files = self.effective_load_order();
        let languages = self.localizations.languages(merge_mod.game());
        let (manifest, assets) = merge_mod.parts_mut();
        let mut tracked_files = HashSet::new();
        let mut failures = Vec::new();
        for file in &manifest.files {
            let targets = match resolve_targets(file, &loaded_files, &languages) {
                Ok(v) => v,
                Err(e) => {
                    log::error!("Cannot merge into '{}': {}", file.file_name, e);
                    failures.push(ChangeFailure {
                        file_name: file.file_name.clone(),
                        change_index: None,
                        error: Box::new(e),
                    });
                    continue;
                }
            };
            for (change_index, change) in file.changes.iter().enumerate() {
                on_weight(change.weight());
                let mut state = ApplyState {
                    game: self.target.game,
                    editor: &mut *editor,
                    assets: &mut *assets,
                    hashes: &mut *hashes,
                    tracked_files: &mut tracked_files,
                    on_tracked_file: &mut on_tracked_file,
                };
                if let Err(e) = state.apply_change(change, &targets) {
                    log::error!(
                        "Failed to apply change #{} to '{}': {}",
                        change_index,
                        file.file_name,
                        e
                    );
                    failures.push(ChangeFailure {
                        file_name: file.file_name.clone(),
                        change_index: Some(change_index),
                        error: Box::new(e),
                    });
                    // Skip the rest of this file patch
                    break;
                }
            }
        }

        if failures.is_empty() {
            log::info!("Applied {}", mod_name);
            Ok(())
        } else {
            Err(MergeError::PartialFailure { mod_name, failures })
        }
    }
}

/// Physical files a file patch applies to: the base file, then its localized
/// copies that the game loads.
fn resolve_targets(
    file: &MergeFile,
    loaded_files: &LoadedFileIndex,
    languages: &[String],
) -> Result<Vec<PathBuf>> {
    let base_path = loaded_files
        .get(&file.file_name)
        .ok_or_else(|| MergeError::TargetNotFound(file.file_name.clone()))?;
    let mut targets = vec![base_path.to_path_buf()];
    if file.apply_to_all_localizations {
        for localized_name in file.target_files(languages).into_iter().skip(1) {
            match loaded_files.get(&localized_name) {
                Some(path) => {
                    if !targets.iter().any(|p| p == path) {
                        targets.push(path.to_path_buf());
                    }
                }
                None => log::warn!("'{}' is not loaded, skipping", localized_name),
            }
        }
    }
    Ok(targets)
}

struct ApplyState<'s, R, E: ?Sized, T> {
    game: Game,
    editor: &'s mut E,
    assets: &'s mut AssetTable<R>,
    hashes: &'s mut HashCache,
    tracked_files: &'s mut HashSet<PathBuf>,
    on_tracked_file: &'s mut T,
}

impl<'s, R, E, T> ApplyState<'s, R, E, T>
where
    R: Read + Seek,
    E: PackageEditor + ?Sized,
    T: FnMut(&Path, ContentHash),
{
    fn apply_change(&mut self, change: &MergeChange, targets: &[PathBuf]) -> Result<()> {
        for package in targets {
            let original_hash = match self.hashes.get(package) {
                Some(hash) => *hash,
                None => {
                    let hash = hash_file(package)?;
                    self.hashes.insert(package.clone(), hash);
                    hash
                }
            };
            log::debug!(
                "Merging into '{}' > '{}'",
                package.display(),
                change.entry_name
            );
            let context = EditContext {
                game: self.game,
                package,
                entry_name: &change.entry_name,
                disable_config_update: change.disable_config_update,
            };
            self.apply_operation(&context, &change.operation)?;
            if self.tracked_files.insert(package.clone()) {
                (self.on_tracked_file)(package, original_hash);
            }
        }
        Ok(())
    }

    fn apply_operation(&mut self, context: &EditContext<'_>, operation: &MergeOperation) -> Result<()> {
        match operation {
            MergeOperation::PropertyUpdates(updates) => {
                self.editor.apply_property_updates(context, updates)
            }
            MergeOperation::ScriptUpdate(update) => {
                let script_text = update
                    .script_text
                    .as_deref()
                    .ok_or_else(|| MergeError::AssetNotFound(update.script_file_name.clone()))?;
                self.editor.apply_script_update(context, script_text)
            }
            MergeOperation::AssetUpdate(update) => {
                let asset = self.assets.resolve(&update.asset_name)?;
                self.editor.apply_asset_update(context, update, asset)
            }
            MergeOperation::AddToClassOrReplace(update) => {
                let scripts = update.scripts.as_deref().ok_or_else(|| {
                    MergeError::AssetNotFound(update.script_file_names.join(", "))
                })?;
                self.editor.apply_add_to_class_or_replace(context, scripts)
            }
        }
    }
}
