//! Substitute Configuration
//!
//! Creation-time settings shared by a repository or a test suite. Values come
//! from code, from a JSON file, or from the environment (`.env` honored).

use std::env;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::defaults::DefaultValueKind;
use crate::substitute::Behavior;

pub const ENV_BEHAVIOR: &str = "SURROGATE_BEHAVIOR";
pub const ENV_CALL_BASE: &str = "SURROGATE_CALL_BASE";
pub const ENV_DEFAULT_VALUE: &str = "SURROGATE_DEFAULT_VALUE";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubstituteConfig {
    pub behavior: Behavior,
    pub call_base: bool,
    pub default_value: DefaultValueKind,
    /// Replaces the contract name in substitute names and reports
    pub name_prefix: Option<String>,
}

impl SubstituteConfig {
    /// Defaults overridden by `SURROGATE_*` variables
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let mut config = Self::default();

        if let Ok(raw) = env::var(ENV_BEHAVIOR) {
            config.behavior = match raw.trim().to_ascii_lowercase().as_str() {
                "strict" => Behavior::Strict,
                "loose" | "default" => Behavior::Loose,
                other => bail!("{} must be 'strict' or 'loose', got '{}'", ENV_BEHAVIOR, other),
            };
        }
        if let Ok(raw) = env::var(ENV_CALL_BASE) {
            config.call_base = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be 'true' or 'false'", ENV_CALL_BASE))?;
        }
        if let Ok(raw) = env::var(ENV_DEFAULT_VALUE) {
            config.default_value = match raw.trim().to_ascii_lowercase().as_str() {
                "empty" => DefaultValueKind::Empty,
                "mock" => DefaultValueKind::Mock,
                other => bail!("{} must be 'empty' or 'mock', got '{}'", ENV_DEFAULT_VALUE, other),
            };
        }

        debug!("Substitute config from environment: {:?}", config);
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read substitute config {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid substitute config {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write substitute config {}", path.display()))?;
        Ok(())
    }
}
