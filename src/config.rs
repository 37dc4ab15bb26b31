//! Compilation configuration
//!
//! `CheckConfig` is the immutable settings object the compiler consumes
//! read-only. Instances are deduplicated by value: interning two configs with
//! identical fields yields the same shared instance system-wide, so reference
//! identity is usable as half of a cache key. `ConformFileConfig` is the CLI
//! front end's file/environment layer and is never read by the compiler core.
//!
//! ## Example config file (conform.toml):
//! ```toml
//! [check]
//! strategy = "linear"
//! numeric_tower = true
//! severity = "warn"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// How a generated validator samples container elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CheckStrategy {
    /// Check one fixed representative element, O(1) in container size
    #[default]
    FirstItem,
    /// Check every element up to a time deadline, bounded O(n)
    Linear,
}

/// What a validator does when a value does not conform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SeverityPolicy {
    /// Surface the violation as an error
    #[default]
    Raise,
    /// Log the violation as a warning and accept the value
    Warn,
}

/// Whether violation renderings may be colorized by downstream formatters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ColorPolicy {
    /// Color only when attached to a terminal
    #[default]
    Auto,
    Always,
    Never,
}

/// Immutable compilation configuration.
///
/// Construct with struct syntax over `CheckConfig::default()` and call
/// [`CheckConfig::intern`] to obtain the canonical shared instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CheckConfig {
    /// Container-element checking strategy
    pub strategy: CheckStrategy,
    /// Widen `float` leaves into the implicit `float | int` union
    pub numeric_tower: bool,
    /// Log the rendered check program after compilation
    pub debug: bool,
    /// Raise-or-warn policy for the generated validator
    pub severity: SeverityPolicy,
    /// Color policy handed through to external formatters
    pub color: ColorPolicy,
}

/// Intern table guaranteeing one shared instance per distinct value, even
/// under concurrent first-use.
static CONFIG_INTERN: Lazy<Mutex<HashMap<CheckConfig, Arc<CheckConfig>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

impl CheckConfig {
    /// Return the canonical shared instance for these settings.
    pub fn intern(self) -> Arc<CheckConfig> {
        let mut table = CONFIG_INTERN
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        table
            .entry(self.clone())
            .or_insert_with(|| Arc::new(self))
            .clone()
    }

    /// The interned default configuration
    pub fn default_shared() -> Arc<CheckConfig> {
        CheckConfig::default().intern()
    }
}

/// Identity of an interned configuration, usable as a cache key.
pub(crate) fn config_identity(config: &Arc<CheckConfig>) -> usize {
    Arc::as_ptr(config) as usize
}

// =============================================================================
// File configuration (CLI layer)
// =============================================================================

/// Checking defaults loaded from `conform.toml` / `CONFORM_*` environment
/// variables. Only the CLI reads this; the compiler takes an interned
/// [`CheckConfig`] directly.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConformFileConfig {
    #[serde(default)]
    pub check: CheckConfig,
}

impl ConformFileConfig {
    /// Load configuration from, in increasing precedence:
    /// - `conform.toml` in the user config directory
    /// - `conform.toml` in the current directory
    /// - `CONFORM_*` environment variables (e.g. `CONFORM_CHECK__STRATEGY`)
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(dirs) = directories::ProjectDirs::from("", "", "conform") {
            let user_config = dirs.config_dir().join("conform.toml");
            builder = builder.add_source(File::from(user_config).required(false));
        }

        builder = builder
            .add_source(File::with_name("conform").required(false))
            .add_source(Environment::with_prefix("CONFORM").separator("__"));

        builder.build()?.try_deserialize()
    }

    /// The check configuration described by this file
    pub fn check_config(&self) -> CheckConfig {
        self.check.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CheckConfig::default();
        assert_eq!(config.strategy, CheckStrategy::FirstItem);
        assert!(!config.numeric_tower);
        assert_eq!(config.severity, SeverityPolicy::Raise);
    }

    #[test]
    fn test_intern_deduplicates() {
        let a = CheckConfig {
            numeric_tower: true,
            ..CheckConfig::default()
        }
        .intern();
        let b = CheckConfig {
            numeric_tower: true,
            ..CheckConfig::default()
        }
        .intern();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(config_identity(&a), config_identity(&b));
    }

    #[test]
    fn test_intern_distinguishes_values() {
        let a = CheckConfig::default_shared();
        let b = CheckConfig {
            strategy: CheckStrategy::Linear,
            ..CheckConfig::default()
        }
        .intern();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_file_config_toml_round_trip() {
        let file = ConformFileConfig::default();
        let toml_str = toml::to_string_pretty(&file).unwrap();
        assert!(toml_str.contains("[check]"));
        let back: ConformFileConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.check, file.check);
    }

    #[test]
    fn test_file_config_parses_strategy() {
        let file: ConformFileConfig =
            toml::from_str("[check]\nstrategy = \"linear\"\nseverity = \"warn\"\n").unwrap();
        assert_eq!(file.check.strategy, CheckStrategy::Linear);
        assert_eq!(file.check.severity, SeverityPolicy::Warn);
    }
}
