use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use directories::ProjectDirs;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::errors::{BrokerError, Result};

/// Idle time after which a cached service is reclaimed (10 minutes).
pub const DEFAULT_IDLE_TTL_MS: u64 = 10 * 60 * 1000;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60 * 1000;
pub const DEFAULT_SSH_CONNECT_TIMEOUT_MS: u64 = 10 * 1000;

/// Broker-wide tunables.
///
/// Stored as JSON, e.g. `{ "idleTtlMs": 600000, "sweepIntervalMs": 60000 }`.
/// Missing keys fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrokerSettings {
    pub idle_ttl_ms: u64,
    pub sweep_interval_ms: u64,
    /// Upper bound for the TCP connect to an SSH host. Must stay finite: a
    /// hanging connect would hold that key's construction forever.
    pub ssh_connect_timeout_ms: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            idle_ttl_ms: DEFAULT_IDLE_TTL_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            ssh_connect_timeout_ms: DEFAULT_SSH_CONNECT_TIMEOUT_MS,
        }
    }
}

impl BrokerSettings {
    /// `~/.config/dbbroker/broker.json` on Linux, `%APPDATA%\dbbroker\broker.json` on Windows, etc.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "dbbroker").map(|proj| proj.config_dir().join("broker.json"))
    }

    /// Loads the settings from the default location, or defaults if there is none.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("No config directory available, using default broker settings");
                Ok(Self::default())
            }
        }
    }

    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(raw) => {
                let settings: BrokerSettings = serde_json::from_str(&raw).map_err(|e| {
                    BrokerError::Settings(format!("could not parse {:?}: {e}", path))
                })?;
                settings.validate()?;
                info!("Loaded broker settings from {:?}", path);
                Ok(settings)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(BrokerError::Settings(format!(
                "could not read {:?}: {e}",
                path
            ))),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.idle_ttl_ms == 0 {
            return Err(BrokerError::Settings("idleTtlMs must be positive".into()));
        }
        if self.sweep_interval_ms == 0 {
            return Err(BrokerError::Settings(
                "sweepIntervalMs must be positive".into(),
            ));
        }
        if self.ssh_connect_timeout_ms == 0 {
            return Err(BrokerError::Settings(
                "sshConnectTimeoutMs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_millis(self.idle_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn ssh_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.ssh_connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = BrokerSettings::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings, BrokerSettings::default());
        assert_eq!(settings.idle_ttl(), Duration::from_secs(600));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.json");
        fs::write(&path, r#"{ "idleTtlMs": 1500 }"#).unwrap();

        let settings = BrokerSettings::load_from(&path).unwrap();
        assert_eq!(settings.idle_ttl_ms, 1500);
        assert_eq!(settings.sweep_interval_ms, DEFAULT_SWEEP_INTERVAL_MS);
    }

    #[test]
    fn malformed_or_zero_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.json");

        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            BrokerSettings::load_from(&path),
            Err(BrokerError::Settings(_))
        ));

        fs::write(&path, r#"{ "sshConnectTimeoutMs": 0 }"#).unwrap();
        assert!(BrokerSettings::load_from(&path).is_err());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("broker.json");
        let settings = BrokerSettings {
            idle_ttl_ms: 42_000,
            ..BrokerSettings::default()
        };
        settings.save_to(&path).unwrap();
        assert_eq!(BrokerSettings::load_from(&path).unwrap(), settings);
    }
}
