use std::convert::TryFrom;

use crate::error::SchemaViolation;
use crate::game::{Game, LocalizationProvider};
use crate::{MergeError, Result};
use serde::{Deserialize, Serialize};

// Progress weights. Script compilation dominates install time, asset porting
// comes second and property writes are cheap.
const PROPERTY_UPDATE_WEIGHT: u32 = 20;
const ASSET_UPDATE_WEIGHT: u32 = 500;
const SCRIPT_UPDATE_WEIGHT: u32 = 1500;

/// Description of everything a merge mod does: which files it edits and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeModManifest {
    pub game: Game, // Only used as a sanity check
    #[serde(rename = "files")]
    pub files: Vec<MergeFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeFile {
    #[serde(rename = "filename", default)]
    pub file_name: String,
    #[serde(
        rename = "applytoalllocalizations",
        default,
        skip_serializing_if = "is_false"
    )]
    pub apply_to_all_localizations: bool,
    #[serde(rename = "changes", default)]
    pub changes: Vec<MergeChange>,
}

/// A single edit applied to one entry of a target file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMergeChange", into = "RawMergeChange")]
pub struct MergeChange {
    pub entry_name: String,
    pub disable_config_update: bool,
    pub operation: MergeOperation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOperation {
    PropertyUpdates(Vec<PropertyUpdate>),
    ScriptUpdate(ScriptUpdate),
    AssetUpdate(AssetUpdate),
    AddToClassOrReplace(AddToClassOrReplace),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyType {
    BoolProperty,
    ByteProperty,
    IntProperty,
    FloatProperty,
    NameProperty,
    StrProperty,
    StringRefProperty,
    EnumProperty,
    ObjectProperty,
    StructProperty,
    ArrayProperty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyUpdate {
    #[serde(rename = "propertyname", default)]
    pub property_name: String,
    #[serde(rename = "propertytype")]
    pub property_type: PropertyType,
    #[serde(rename = "propertyvalue", default, skip_serializing_if = "Option::is_none")]
    pub property_value: Option<String>,
    /// Loose text file holding the value. Only `ArrayProperty` updates use it.
    #[serde(rename = "propertyasset", default, skip_serializing_if = "Option::is_none")]
    pub property_asset: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptUpdate {
    #[serde(rename = "scriptfilename", default)]
    pub script_file_name: String,
    #[serde(rename = "scripttext", default, skip_serializing_if = "Option::is_none")]
    pub script_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetUpdate {
    #[serde(rename = "assetname", default)]
    pub asset_name: String,
    #[serde(rename = "entryname", default)]
    pub entry_name: String,
    #[serde(rename = "canmergeasnew", default, skip_serializing_if = "is_false")]
    pub can_merge_as_new: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddToClassOrReplace {
    #[serde(rename = "scriptfilenames", default)]
    pub script_file_names: Vec<String>,
    #[serde(rename = "scripts", default, skip_serializing_if = "Option::is_none")]
    pub scripts: Option<Vec<String>>,
}

/// Wire shape of a change: every operation is an optional field.
#[derive(Serialize, Deserialize)]
struct RawMergeChange {
    #[serde(rename = "entryname", default)]
    entry_name: String,
    #[serde(rename = "propertyupdates", default, skip_serializing_if = "Option::is_none")]
    property_updates: Option<Vec<PropertyUpdate>>,
    #[serde(rename = "scriptupdate", default, skip_serializing_if = "Option::is_none")]
    script_update: Option<ScriptUpdate>,
    #[serde(rename = "assetupdate", default, skip_serializing_if = "Option::is_none")]
    asset_update: Option<AssetUpdate>,
    #[serde(
        rename = "addtoclassorreplace",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    add_to_class_or_replace: Option<AddToClassOrReplace>,
    #[serde(rename = "disableconfigupdate", default, skip_serializing_if = "is_false")]
    disable_config_update: bool,
}

impl TryFrom<RawMergeChange> for MergeChange {
    type Error = String;

    fn try_from(raw: RawMergeChange) -> std::result::Result<Self, Self::Error> {
        let entry_name = raw.entry_name;
        let mut operations = Vec::with_capacity(1);
        if let Some(v) = raw.property_updates {
            operations.push(MergeOperation::PropertyUpdates(v));
        }
        if let Some(v) = raw.script_update {
            operations.push(MergeOperation::ScriptUpdate(v));
        }
        if let Some(v) = raw.asset_update {
            operations.push(MergeOperation::AssetUpdate(v));
        }
        if let Some(v) = raw.add_to_class_or_replace {
            operations.push(MergeOperation::AddToClassOrReplace(v));
        }
        if operations.len() > 1 {
            return Err(format!(
                "change to '{}' sets {} operations, only one is allowed",
                entry_name,
                operations.len()
            ));
        }
        let operation = match operations.pop() {
            Some(v) => v,
            None => return Err(format!("change to '{}' has no operation", entry_name)),
        };
        Ok(MergeChange {
            entry_name,
            disable_config_update: raw.disable_config_update,
            operation,
        })
    }
}

impl From<MergeChange> for RawMergeChange {
    fn from(change: MergeChange) -> Self {
        let mut raw = RawMergeChange {
            entry_name: change.entry_name,
            property_updates: None,
            script_update: None,
            asset_update: None,
            add_to_class_or_replace: None,
            disable_config_update: change.disable_config_update,
        };
        match change.operation {
            MergeOperation::PropertyUpdates(v) => raw.property_updates = Some(v),
            MergeOperation::ScriptUpdate(v) => raw.script_update = Some(v),
            MergeOperation::AssetUpdate(v) => raw.asset_update = Some(v),
            MergeOperation::AddToClassOrReplace(v) => raw.add_to_class_or_replace = Some(v),
        }
        raw
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl MergeModManifest {
    /// Parses a manifest from its JSON representation.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| MergeError::schema("$", e.to_string()))
    }

    /// Parses a manifest from YAML, accepted for hand-written manifests.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| MergeError::schema("$", e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks the manifest's structure, reporting every offending field.
    pub fn validate(&self) -> Result<()> {
        let violations = self.violations();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(MergeError::SchemaViolation(violations))
        }
    }

    /// Checks a manifest before compilation. On top of `validate`, array
    /// property values must be given as a file, never inline.
    pub fn validate_source(&self) -> Result<()> {
        let mut violations = self.violations();
        for (i, file) in self.files.iter().enumerate() {
            for (j, change) in file.changes.iter().enumerate() {
                if let MergeOperation::PropertyUpdates(updates) = &change.operation {
                    for (k, update) in updates.iter().enumerate() {
                        // No value at all is already reported by `violations`
                        if update.property_type == PropertyType::ArrayProperty
                            && update.property_asset.is_none()
                            && update.property_value.is_some()
                        {
                            violations.push(SchemaViolation::new(
                                format!(
                                    "files[{}].changes[{}].propertyupdates[{}].propertyasset",
                                    i, j, k
                                ),
                                "array property values must be read from a file",
                            ));
                        }
                    }
                }
            }
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(MergeError::SchemaViolation(violations))
        }
    }

    pub fn violations(&self) -> Vec<SchemaViolation> {
        let mut violations = Vec::new();
        if self.files.is_empty() {
            violations.push(SchemaViolation::new("files", "no file to merge into"));
        }
        for (i, file) in self.files.iter().enumerate() {
            file.collect_violations(&format!("files[{}]", i), &mut violations);
        }
        violations
    }

    /// Number of changes, for display purposes.
    pub fn merge_count(&self) -> usize {
        self.files.iter().map(|f| f.changes.len()).sum()
    }

    /// Total weight of the changes, used to report install progress.
    pub fn merge_weight(&self) -> u32 {
        self.files.iter().map(MergeFile::merge_weight).sum()
    }

    /// Every file name the merge mod touches, localized copies included.
    pub fn target_files(&self, localizations: &dyn LocalizationProvider) -> Vec<String> {
        let languages = localizations.languages(self.game);
        self.files
            .iter()
            .flat_map(|f| f.target_files(&languages))
            .collect()
    }

    pub fn changes(&self) -> impl Iterator<Item = &'_ MergeChange> {
        self.files.iter().flat_map(|f| f.changes.iter())
    }

    pub fn changes_mut(&mut self) -> impl Iterator<Item = &'_ mut MergeChange> {
        self.files.iter_mut().flat_map(|f| f.changes.iter_mut())
    }
}

impl MergeFile {
    pub fn merge_weight(&self) -> u32 {
        self.changes.iter().map(MergeChange::weight).sum()
    }

    /// The target file name followed, if requested, by one name per language.
    pub fn target_files(&self, languages: &[String]) -> Vec<String> {
        let mut targets = vec![self.file_name.clone()];
        if self.apply_to_all_localizations {
            let (stem, extension) = split_extension(&self.file_name);
            let stem = strip_language_suffix(stem, languages);
            targets.extend(
                languages
                    .iter()
                    .map(|code| format!("{}_{}{}", stem, code, extension)),
            );
        }
        targets
    }

    fn collect_violations(&self, path: &str, violations: &mut Vec<SchemaViolation>) {
        let field = format!("{}.filename", path);
        if self.file_name.is_empty() {
            violations.push(SchemaViolation::new(field, "must be set"));
        } else if !is_bare_file_name(&self.file_name) {
            violations.push(SchemaViolation::new(field, "must be a file name, not a path"));
        }
        if self.changes.is_empty() {
            violations.push(SchemaViolation::new(
                format!("{}.changes", path),
                "no change to apply",
            ));
        }
        for (i, change) in self.changes.iter().enumerate() {
            change.collect_violations(&format!("{}.changes[{}]", path, i), violations);
        }
    }
}

impl MergeChange {
    pub fn weight(&self) -> u32 {
        self.operation.weight()
    }

    fn collect_violations(&self, path: &str, violations: &mut Vec<SchemaViolation>) {
        if self.entry_name.is_empty() {
            violations.push(SchemaViolation::new(
                format!("{}.entryname", path),
                "must be set",
            ));
        }
        match &self.operation {
            MergeOperation::PropertyUpdates(updates) => {
                if updates.is_empty() {
                    violations.push(SchemaViolation::new(
                        format!("{}.propertyupdates", path),
                        "must contain at least one update",
                    ));
                }
                for (i, update) in updates.iter().enumerate() {
                    let path = format!("{}.propertyupdates[{}]", path, i);
                    if update.property_name.is_empty() {
                        violations.push(SchemaViolation::new(
                            format!("{}.propertyname", path),
                            "must be set",
                        ));
                    }
                    if update.property_type == PropertyType::ArrayProperty {
                        if update.property_asset.is_none() && update.property_value.is_none() {
                            violations.push(SchemaViolation::new(
                                format!("{}.propertyasset", path),
                                "array properties need an asset file",
                            ));
                        }
                    } else if update.property_value.is_none() {
                        violations.push(SchemaViolation::new(
                            format!("{}.propertyvalue", path),
                            "must be set",
                        ));
                    }
                }
            }
            MergeOperation::ScriptUpdate(update) => {
                if update.script_file_name.is_empty() {
                    violations.push(SchemaViolation::new(
                        format!("{}.scriptupdate.scriptfilename", path),
                        "must be set",
                    ));
                }
            }
            MergeOperation::AssetUpdate(update) => {
                if update.asset_name.is_empty() {
                    violations.push(SchemaViolation::new(
                        format!("{}.assetupdate.assetname", path),
                        "must be set",
                    ));
                }
                if update.entry_name.is_empty() {
                    violations.push(SchemaViolation::new(
                        format!("{}.assetupdate.entryname", path),
                        "must be set",
                    ));
                }
            }
            MergeOperation::AddToClassOrReplace(update) => {
                let path = format!("{}.addtoclassorreplace", path);
                if update.script_file_names.is_empty() {
                    violations.push(SchemaViolation::new(
                        format!("{}.scriptfilenames", path),
                        "must contain at least one script",
                    ));
                }
                if let Some(scripts) = &update.scripts {
                    if scripts.len() != update.script_file_names.len() {
                        violations.push(SchemaViolation::new(
                            format!("{}.scripts", path),
                            format!(
                                "{} scripts for {} script file names",
                                scripts.len(),
                                update.script_file_names.len()
                            ),
                        ));
                    }
                }
            }
        }
    }
}

impl MergeOperation {
    pub fn weight(&self) -> u32 {
        match self {
            MergeOperation::PropertyUpdates(updates) => {
                PROPERTY_UPDATE_WEIGHT * updates.len() as u32
            }
            MergeOperation::ScriptUpdate(_) => SCRIPT_UPDATE_WEIGHT,
            MergeOperation::AssetUpdate(_) => ASSET_UPDATE_WEIGHT,
            MergeOperation::AddToClassOrReplace(update) => {
                SCRIPT_UPDATE_WEIGHT * update.script_file_names.len() as u32
            }
        }
    }
}

/// Splits "BioUI.pcc" into ("BioUI", ".pcc").
fn split_extension(file_name: &str) -> (&str, &str) {
    match file_name.rfind('.') {
        Some(i) if i > 0 => file_name.split_at(i),
        _ => (file_name, ""),
    }
}

/// Removes a trailing "_INT"-like suffix so localized names aren't doubled.
fn strip_language_suffix<'a>(stem: &'a str, languages: &[String]) -> &'a str {
    for code in languages {
        let suffix = format!("_{}", code);
        if stem.len() <= suffix.len() {
            continue;
        }
        let cut = stem.len() - suffix.len();
        if stem.is_char_boundary(cut) && stem[cut..].eq_ignore_ascii_case(&suffix) {
            return &stem[..cut];
        }
    }
    stem
}

pub(crate) fn is_bare_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(&['/', '\\'][..])
}
