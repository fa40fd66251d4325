//! Expression catalog: maps requested expression names onto the model's own.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How many names an "expression not found" error lists.
const LISTED_IN_ERROR: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpressionConfig {
    pub names: Vec<String>,
    /// Request name → model expression name.
    pub aliases: HashMap<String, String>,
}

impl Default for ExpressionConfig {
    fn default() -> Self {
        let names = [
            "normal", "happy", "angry", "blush", "daze", "star_eye", "cat_paw", "heart", "love",
            "cat_mouth", "q_style", "sad", "sleepy", "surprised",
        ];
        let aliases = [
            ("smile", "happy"),
            ("shy", "blush"),
            ("mad", "angry"),
            ("tired", "sleepy"),
            ("lonely", "sad"),
            ("excited", "love"),
            ("neutral", "normal"),
        ];
        Self {
            names: names.iter().map(|s| s.to_string()).collect(),
            aliases: aliases
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Expression '{requested}' not found. Available: {}", .available.join(", "))]
pub struct UnknownExpression {
    pub requested: String,
    pub available: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ExpressionCatalog {
    names: Vec<String>,
    aliases: HashMap<String, String>,
}

impl ExpressionCatalog {
    pub fn new(config: &ExpressionConfig) -> Self {
        Self {
            names: config.names.clone(),
            aliases: config
                .aliases
                .iter()
                .map(|(k, v)| (k.trim().to_lowercase(), v.clone()))
                .collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Resolve a request to the model's expression name, case-insensitively,
    /// after alias substitution. With no known names every request passes through.
    pub fn resolve(&self, requested: &str) -> Result<String, UnknownExpression> {
        let key = requested.trim().to_lowercase();
        let mapped = self
            .aliases
            .get(&key)
            .map(|s| s.to_lowercase())
            .unwrap_or(key);

        if self.names.is_empty() {
            return Ok(mapped);
        }
        self.names
            .iter()
            .find(|name| name.to_lowercase() == mapped)
            .cloned()
            .ok_or_else(|| UnknownExpression {
                requested: requested.to_string(),
                available: self.names.iter().take(LISTED_IN_ERROR).cloned().collect(),
            })
    }
}
