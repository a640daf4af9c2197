use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::PrincipalId;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub persist_interval: Duration,
    /// Accepted clock drift for signed request timestamps, in seconds.
    pub max_clock_skew: u64,
    /// How long used nonces are remembered, in seconds.
    pub nonce_expiry: u64,
    /// Principals granted succession authority in addition to the deployer.
    pub editors: Vec<PrincipalId>,
    pub version: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            persist_interval: Duration::from_secs(
                env::var("PERSIST_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            max_clock_skew: env::var("MAX_CLOCK_SKEW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            nonce_expiry: env::var("NONCE_EXPIRY_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(600),
            editors: env::var("REGISTRY_EDITORS")
                .map(|s| {
                    s.split(',')
                        .map(|w| w.trim().to_string())
                        .filter(|w| !w.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn state_file_path(&self) -> PathBuf {
        self.data_dir.join("registry.json")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
