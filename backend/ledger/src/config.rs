//! Application configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use earmark_protocol::FeeRate;

use crate::errors::{LedgerError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database URL or file path
    pub database_url: String,
    /// Directory holding content-addressed proof files
    pub blob_dir: PathBuf,
    /// Port for the REST API server
    pub api_port: u16,
    /// Service fee charged once at release
    pub admin_fee_rate: FeeRate,
    /// Automatically verify submitted proofs after this delay
    pub review_delay: Option<Duration>,
    /// Create demo beneficiaries when the registry is empty
    pub seed_demo: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Config {
            database_url: var("DATABASE_URL", "sqlite:./earmark.db"),
            blob_dir: PathBuf::from(var("BLOB_DIR", "./proof_blobs")),
            api_port: var("API_PORT", "3001")
                .parse()
                .map_err(|_| LedgerError::Config("Invalid API_PORT".to_string()))?,
            admin_fee_rate: var("ADMIN_FEE_RATE", "0.05")
                .parse()
                .map_err(|e| LedgerError::Config(format!("Invalid ADMIN_FEE_RATE: {e}")))?,
            review_delay: lookup("REVIEW_DELAY_SECS")
                .map(|raw| {
                    raw.trim()
                        .parse::<u64>()
                        .map(Duration::from_secs)
                        .map_err(|_| LedgerError::Config("Invalid REVIEW_DELAY_SECS".to_string()))
                })
                .transpose()?,
            seed_demo: parse_bool(&var("SEED_DEMO", "false"))
                .ok_or_else(|| LedgerError::Config("Invalid SEED_DEMO".to_string()))?,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
