//! Game → fetch-method → plugin-source mapping.
//!
//! Each game owns a directory under the plugins root containing a fetch
//! script. The script is told which deck format to parse via a source id,
//! selected here from the human-facing method label. The table is plain
//! data: [`PluginRegistry::builtin`] ships the known plugins and
//! [`PluginRegistry::from_json`] loads additional ones without code changes.

use crate::error::WorkflowError;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

/// One fetch method of a game: a label users pick and the id passed to the
/// fetch script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMethod {
    pub label: String,
    pub source: String,
}

/// A game and the plugin directory that serves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GamePlugins {
    pub name: String,
    /// Directory name under the plugins root.
    pub dir: String,
    pub methods: Vec<PluginMethod>,
}

/// What the user picked: a game and one of its method labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRef {
    pub game: String,
    pub method: String,
}

impl PluginRef {
    pub fn new(game: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            game: game.into(),
            method: method.into(),
        }
    }
}

/// A [`PluginRef`] resolved against the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSource {
    pub game: String,
    pub method: String,
    pub dir: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRegistry {
    games: Vec<GamePlugins>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn game(name: &str, dir: &str, methods: &[(&str, &str)]) -> GamePlugins {
    GamePlugins {
        name: name.to_string(),
        dir: dir.to_string(),
        methods: methods
            .iter()
            .map(|(label, source)| PluginMethod {
                label: label.to_string(),
                source: source.to_string(),
            })
            .collect(),
    }
}

impl PluginRegistry {
    /// The plugins shipped with the card-maker project.
    pub fn builtin() -> Self {
        Self {
            games: vec![
                game(
                    "Magic: The Gathering",
                    "mtg",
                    &[
                        ("Moxfield", "moxfield"),
                        ("MTGA", "mtga"),
                        ("MTGO", "mtgo"),
                        ("Archidekt", "archidekt"),
                        ("Deckstats", "deckstats"),
                        ("Scryfall", "scryfall"),
                    ],
                ),
                game(
                    "Riftbound",
                    "riftbound",
                    &[
                        ("Pixelborn", "pixelborn"),
                        ("TTS", "tts"),
                        ("Piltover", "piltover_archive"),
                    ],
                ),
                game("Yu-Gi-Oh!", "yugioh", &[("YDK", "ydk"), ("YDKE", "ydke")]),
                game("Lorcana", "lorcana", &[("Dreamborn", "dreamborn")]),
                game("Altered", "altered", &[("Ajordat", "ajordat")]),
            ],
        }
    }

    /// Build a registry from explicit entries, validating them.
    pub fn new(games: Vec<GamePlugins>) -> Result<Self, WorkflowError> {
        let registry = Self { games };
        registry.validate()?;
        Ok(registry)
    }

    /// Parse `{"games": [{"name", "dir", "methods": [{"label", "source"}]}]}`.
    pub fn from_json(json: &str) -> Result<Self, WorkflowError> {
        let registry: Self =
            serde_json::from_str(json).map_err(|e| WorkflowError::Registry(e.to_string()))?;
        registry.validate()?;
        Ok(registry)
    }

    pub fn load(path: &Path) -> Result<Self, WorkflowError> {
        let text = std::fs::read_to_string(path).map_err(|e| WorkflowError::io(path, e))?;
        Self::from_json(&text)
    }

    /// Add the games of `other`, replacing any with the same name.
    pub fn merge(&mut self, other: PluginRegistry) {
        for incoming in other.games {
            match self
                .games
                .iter_mut()
                .find(|g| g.name.eq_ignore_ascii_case(&incoming.name))
            {
                Some(existing) => *existing = incoming,
                None => self.games.push(incoming),
            }
        }
    }

    pub fn games(&self) -> &[GamePlugins] {
        &self.games
    }

    /// Look up a game by display name or plugin directory, ignoring case.
    pub fn game(&self, name: &str) -> Option<&GamePlugins> {
        let name = name.trim();
        self.games
            .iter()
            .find(|g| g.name.eq_ignore_ascii_case(name) || g.dir.eq_ignore_ascii_case(name))
    }

    /// Resolve a user selection to its directory and source id.
    pub fn resolve(&self, selection: &PluginRef) -> Result<PluginSource, WorkflowError> {
        let unsupported = || {
            WorkflowError::input(format!(
                "unsupported plugin: {} / {}",
                selection.game, selection.method
            ))
        };
        let game = self.game(&selection.game).ok_or_else(unsupported)?;
        let method = selection.method.trim();
        let m = game
            .methods
            .iter()
            .find(|m| m.label.eq_ignore_ascii_case(method) || m.source.eq_ignore_ascii_case(method))
            .ok_or_else(unsupported)?;
        Ok(PluginSource {
            game: game.name.clone(),
            method: m.label.clone(),
            dir: game.dir.clone(),
            source: m.source.clone(),
        })
    }

    fn validate(&self) -> Result<(), WorkflowError> {
        if self.games.is_empty() {
            return Err(WorkflowError::Registry("no games defined".into()));
        }
        for (i, g) in self.games.iter().enumerate() {
            if g.name.trim().is_empty() {
                return Err(WorkflowError::Registry(format!("game #{i} has no name")));
            }
            if self.games[..i]
                .iter()
                .any(|o| o.name.eq_ignore_ascii_case(&g.name))
            {
                return Err(WorkflowError::Registry(format!(
                    "game '{}' defined twice",
                    g.name
                )));
            }
            let mut comps = Path::new(&g.dir).components();
            let single_normal =
                matches!(comps.next(), Some(Component::Normal(_))) && comps.next().is_none();
            if !single_normal {
                return Err(WorkflowError::Registry(format!(
                    "game '{}': plugin dir '{}' must be a single directory name",
                    g.name, g.dir
                )));
            }
            if g.methods.is_empty() {
                return Err(WorkflowError::Registry(format!(
                    "game '{}' has no methods",
                    g.name
                )));
            }
            if let Some(m) = g
                .methods
                .iter()
                .find(|m| m.label.trim().is_empty() || m.source.trim().is_empty())
            {
                return Err(WorkflowError::Registry(format!(
                    "game '{}': method '{}' needs both a label and a source",
                    g.name, m.label
                )));
            }
        }
        Ok(())
    }
}
