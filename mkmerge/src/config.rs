use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mergemod::game::{Game, LocalizationTable};
use serde::Deserialize;

const DEFAULT_CONFIGURATION_FILE_NAME: &str = "mkmerge.yml";

#[derive(Deserialize, Clone, Debug, Default)]
pub struct MkMergeConfiguration {
    #[serde(default)]
    pub localizations: HashMap<Game, Vec<String>>, // Language codes overriding the built-in ones
    pub output_directory: Option<PathBuf>, // Where outputs go by default
}

impl MkMergeConfiguration {
    pub fn localization_table(&self) -> LocalizationTable {
        LocalizationTable::new(self.localizations.clone())
    }
}

/// Loads the configuration file given on the command line or, if there's none,
/// `mkmerge.yml` from the current working directory when it exists.
pub fn retrieve_configuration(config_file_path: Option<&Path>) -> Result<MkMergeConfiguration> {
    match config_file_path {
        Some(path) => parse_configuration(path),
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIGURATION_FILE_NAME);
            if default_path.is_file() {
                parse_configuration(default_path)
            } else {
                Ok(MkMergeConfiguration::default())
            }
        }
    }
}

fn parse_configuration<P: AsRef<Path>>(config_file_path: P) -> Result<MkMergeConfiguration> {
    let config_file = File::open(config_file_path)?;
    let config_reader = BufReader::new(config_file);
    Ok(serde_yaml::from_reader(config_reader).context("Invalid configuration")?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mergemod::game::LocalizationProvider;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_parse_configuration() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("mkmerge.yml");
        fs::write(
            &config_path,
            "localizations:\n  LE1: [INT, FRA]\noutput_directory: out\n",
        )
        .unwrap();
        let config = retrieve_configuration(Some(config_path.as_path())).unwrap();
        assert_eq!(config.output_directory, Some(PathBuf::from("out")));
        let table = config.localization_table();
        assert_eq!(table.languages(Game::LE1), vec!["INT", "FRA"]);
        assert_eq!(table.languages(Game::LE2).len(), 8);
    }

    #[test]
    fn test_invalid_configuration() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("broken.yml");
        fs::write(&config_path, "localizations:\n  ME4: [INT]\n").unwrap();
        assert!(retrieve_configuration(Some(config_path.as_path())).is_err());
        let missing_path = temp_dir.path().join("missing.yml");
        assert!(retrieve_configuration(Some(missing_path.as_path())).is_err());
    }
}
