//! Ledger configuration.
//!
//! Values are layered: built-in defaults, then an optional `ledger.toml` in the
//! config directory, then `BONUS_LEDGER_` environment variables
//! (`BONUS_LEDGER_ALLOW_OVERDRAFT=true`, `BONUS_LEDGER_REWARDS__BOOKING=500`).

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::Points;

const ENV_PREFIX: &str = "BONUS_LEDGER";
const CONFIG_DIR_VAR: &str = "BONUS_LEDGER_CONFIG_DIR";
const CONFIG_FILE: &str = "ledger.toml";

/// Reward amounts written into the settings row when it is first initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RewardDefaults {
    pub booking: Points,
    pub referrer: Points,
    pub referral: Points,
}

impl Default for RewardDefaults {
    fn default() -> Self {
        Self {
            booking: Points::new(300),
            referrer: Points::new(2000),
            referral: Points::new(2000),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// SQLite connection string. The in-memory store is used when unset.
    pub database_url: Option<String>,
    /// Let spends drive a balance below zero.
    pub allow_overdraft: bool,
    pub rewards: RewardDefaults,
}

impl LedgerConfig {
    /// Load from `$BONUS_LEDGER_CONFIG_DIR/ledger.toml` (default dir `config`) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let dir = std::env::var(CONFIG_DIR_VAR).unwrap_or_else(|_| "config".to_string());
        Self::load_from(dir)
    }

    pub fn load_from(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(dir.as_ref().join(CONFIG_FILE)).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
