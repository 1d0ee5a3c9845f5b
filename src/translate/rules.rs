//! Administrator override rules (`pattern → replacement`).
//! Sources are read on every façade call so edits apply immediately; the JSON
//! file source re-parses only when the file's mtime changes, or when the file
//! appears or disappears.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

/// Ordered rule list; first matching pattern wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<(String, String)>,
}

impl RuleSet {
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            rules: pairs.into_iter().collect(),
        }
    }

    /// Fallback used when no rules file can be read.
    pub fn defaults() -> Self {
        Self::from_pairs([
            ("Quote".to_string(), "Orçamento".to_string()),
            ("Quotes".to_string(), "Orçamentos".to_string()),
        ])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.rules.iter().map(|(p, r)| (p.as_str(), r.as_str()))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("rules file IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rules file parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Where override rules come from.
pub trait RuleSource: Send + Sync {
    fn load(&self) -> RuleSet;
}

/// Rules held in memory and replaceable at runtime.
#[derive(Default)]
pub struct StaticRules {
    rules: RwLock<RuleSet>,
}

impl StaticRules {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules: RwLock::new(rules),
        }
    }

    pub fn set(&self, rules: RuleSet) {
        *self.rules.write() = rules;
    }
}

impl RuleSource for StaticRules {
    fn load(&self) -> RuleSet {
        self.rules.read().clone()
    }
}

/// Relevant slice of `translation-rules.json`. JSON object order is kept.
#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(rename = "postTranslationRules", default)]
    post_translation_rules: serde_json::Map<String, serde_json::Value>,
}

struct LoadedRules {
    modified: Option<SystemTime>,
    rules: RuleSet,
}

/// `postTranslationRules` from a JSON file, reloaded when the file changes.
pub struct JsonFileRules {
    path: PathBuf,
    loaded: Mutex<Option<LoadedRules>>,
}

impl JsonFileRules {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            loaded: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(path: &Path) -> Result<RuleSet, RulesError> {
        let content = std::fs::read_to_string(path)?;
        let file: RulesFile = serde_json::from_str(&content)?;
        Ok(RuleSet::from_pairs(
            file.post_translation_rules
                .into_iter()
                .filter_map(|(pattern, value)| match value {
                    serde_json::Value::String(replacement) => Some((pattern, replacement)),
                    other => {
                        warn!(%pattern, value = %other, "ignoring non-string override rule");
                        None
                    }
                }),
        ))
    }
}

impl RuleSource for JsonFileRules {
    fn load(&self) -> RuleSet {
        let modified = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok();

        let mut loaded = self.loaded.lock();
        // An absent file stays on the defaults until it appears.
        if let Some(current) = loaded.as_ref() {
            if current.modified == modified {
                return current.rules.clone();
            }
        }

        let rules = match Self::read_file(&self.path) {
            Ok(rules) => {
                info!(path = %self.path.display(), count = rules.len(), "override rules loaded");
                rules
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "override rules unavailable, using defaults");
                RuleSet::defaults()
            }
        };
        *loaded = Some(LoadedRules {
            modified,
            rules: rules.clone(),
        });
        rules
    }
}
