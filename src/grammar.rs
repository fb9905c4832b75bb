//! JSON grammar files.
//!
//! ```json
//! {
//!   "axiom": "Seed",
//!   "rules": { "Seed": "1 L u S3", "L": "0.1 L u; 1 L" },
//!   "presample": true,
//!   "seed": 7
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::engine::{EngineConfig, LSystem};
use crate::error::GrammarError;
use crate::parse::{parse_rules, parse_state};
use crate::token::Token;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Grammar {
    pub axiom: String,
    #[serde(default)]
    pub rules: BTreeMap<String, String>,
    #[serde(default)]
    pub presample: Option<bool>,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Grammar {
    pub fn from_json(text: &str) -> Result<Self, GrammarError> {
        let grammar: Grammar = serde_json::from_str(text)?;
        grammar.axiom_token()?;
        Ok(grammar)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, GrammarError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        debug!(path = %path.display(), bytes = text.len(), "read grammar");
        Self::from_json(&text)
    }

    /// The axiom as a single token. Only the first whitespace-separated
    /// field counts.
    fn axiom_token(&self) -> Result<Token, GrammarError> {
        parse_state(&self.axiom)
            .into_iter()
            .next()
            .ok_or(GrammarError::EmptyAxiom)
    }

    /// Fills in `presample` and `seed` from the file where `config` leaves
    /// them at their defaults.
    pub fn apply_to(&self, mut config: EngineConfig) -> EngineConfig {
        if !config.presample {
            config.presample = self.presample.unwrap_or(false);
        }
        if config.seed.is_none() {
            config.seed = self.seed;
        }
        config
    }

    /// Parses every rule and compiles the engine.
    pub fn build(&self, config: EngineConfig) -> Result<LSystem, GrammarError> {
        let axiom = self.axiom_token()?;
        let parsed = parse_rules(&self.rules);
        let config = self.apply_to(config);
        let engine = LSystem::new(axiom, parsed.rules, &parsed.variables, &parsed.constants, config)?;
        Ok(engine)
    }
}
