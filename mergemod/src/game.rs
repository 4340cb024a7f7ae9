use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Game a merge mod has been authored for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Game {
    ME1,
    ME2,
    ME3,
    LE1,
    LE2,
    LE3,
}

impl Game {
    pub fn is_legendary_edition(self) -> bool {
        matches!(self, Game::LE1 | Game::LE2 | Game::LE3)
    }

    /// Base game package directory, relative to the game's root.
    pub fn cooked_directory(self) -> &'static str {
        match self {
            Game::ME1 | Game::ME2 => "BioGame/CookedPC",
            Game::ME3 | Game::LE1 | Game::LE2 | Game::LE3 => "BioGame/CookedPCConsole",
        }
    }
}

impl fmt::Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Game::ME1 => "ME1",
            Game::ME2 => "ME2",
            Game::ME3 => "ME3",
            Game::LE1 => "LE1",
            Game::LE2 => "LE2",
            Game::LE3 => "LE3",
        };
        f.write_str(name)
    }
}

/// Provides the ordered list of language file codes shipped with a game.
///
/// Used to fan a file patch out to every localized copy of its target.
pub trait LocalizationProvider {
    fn languages(&self, game: Game) -> Vec<String>;
}

impl<F> LocalizationProvider for F
where
    F: Fn(Game) -> Vec<String>,
{
    fn languages(&self, game: Game) -> Vec<String> {
        self(game)
    }
}

/// Language codes known for each game.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultLocalizations;

impl LocalizationProvider for DefaultLocalizations {
    fn languages(&self, game: Game) -> Vec<String> {
        let codes: &[&str] = match game {
            Game::ME1 => &["DE", "ES", "FR", "IT", "JA", "PLPC", "RU"],
            Game::ME2 => &["INT", "DEU", "ESN", "FRA", "ITA", "POL", "RUS", "HUN", "CZE"],
            Game::ME3 => &["INT", "DEU", "ESN", "FRA", "ITA", "POL", "RUS", "JPN"],
            Game::LE1 | Game::LE2 | Game::LE3 => {
                &["INT", "DEU", "ESN", "FRA", "ITA", "POL", "RUS", "JPN"]
            }
        };
        codes.iter().map(|c| (*c).to_string()).collect()
    }
}

/// Localization table with per-game overrides, falling back to
/// `DefaultLocalizations` for games that have none.
#[derive(Debug, Clone, Default)]
pub struct LocalizationTable {
    overrides: HashMap<Game, Vec<String>>,
}

impl LocalizationTable {
    pub fn new(overrides: HashMap<Game, Vec<String>>) -> Self {
        Self { overrides }
    }
}

impl LocalizationProvider for LocalizationTable {
    fn languages(&self, game: Game) -> Vec<String> {
        match self.overrides.get(&game) {
            Some(codes) => codes.clone(),
            None => DefaultLocalizations.languages(game),
        }
    }
}
