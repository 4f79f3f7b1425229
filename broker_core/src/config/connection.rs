use serde::{Deserialize, Serialize};

use crate::errors::{BrokerError, Result};

/// Everything a request says about the database it wants to reach.
///
/// Treated as immutable once built. The broker never rewrites the instance a
/// caller hands in; tunnel endpoints are applied to a copy via
/// [`ConnectionConfig::with_endpoint`].
///
/// Empty strings mean "unset", matching the JSON the UI sends:
/// `{ "engine":"pg", "host":"db.internal", "port":5432, "database":"app" }`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionConfig {
    #[serde(alias = "type")]
    pub engine: String,
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub database: String,
    pub db_name: String,
    pub odbc_dsn: String,
    pub odbc_dialect_name: String,
    pub username: String,
    pub password: String,
    pub tls_config: String,
    pub tls_root_cert: String,
    pub tls_client_cert: String,
    pub tls_client_key: String,
    /// Extra driver parameters appended to the DSN.
    pub dsn_append: String,
}

impl ConnectionConfig {
    pub fn new(engine: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            engine: engine.into(),
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Lower-cased engine identifier used for table lookups.
    pub fn engine_key(&self) -> String {
        self.engine.trim().to_ascii_lowercase()
    }

    /// Rejects configs that cannot identify a database.
    ///
    /// File based engines are identified by path and ODBC by DSN; every other
    /// engine needs a host and a non-zero port.
    pub fn validate(&self) -> Result<()> {
        let engine = self.engine_key();
        if engine.is_empty() {
            return Err(BrokerError::ConfigInvalid("engine type is required".into()));
        }
        match engine.as_str() {
            "sqlite" => {
                if self.database_path.is_empty() {
                    return Err(BrokerError::ConfigInvalid(
                        "sqlite requires a database path".into(),
                    ));
                }
            }
            "odbc" => {
                if self.odbc_dsn.is_empty() {
                    return Err(BrokerError::ConfigInvalid("odbc requires a DSN".into()));
                }
            }
            _ => {
                if self.host.trim().is_empty() {
                    return Err(BrokerError::ConfigInvalid(format!(
                        "{engine} requires a host"
                    )));
                }
                if self.port == 0 {
                    return Err(BrokerError::ConfigInvalid(format!(
                        "{engine} requires a non-zero port"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Returns a copy pointing at another endpoint, e.g. a tunnel's local port.
    pub fn with_endpoint(&self, host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..self.clone()
        }
    }

    /// Applies per-engine driver defaults. Only ever called on the copy handed
    /// to the service factory.
    pub fn with_engine_defaults(mut self) -> Self {
        if self.engine_key() == "mysql" && self.dsn_append.is_empty() {
            self.dsn_append = "&charset=utf8mb4".to_string();
        }
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// How the broker authenticates against the SSH jump host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SshAuth {
    Password {
        password: String,
    },
    #[serde(rename_all = "camelCase")]
    PublicKey {
        private_key_path: String,
        passphrase: Option<String>,
    },
    /// Whatever identities the local ssh-agent offers.
    Agent,
}

impl Default for SshAuth {
    fn default() -> Self {
        SshAuth::Agent
    }
}

impl SshAuth {
    /// The material that distinguishes two logins by the same user.
    pub(crate) fn secret(&self) -> String {
        match self {
            SshAuth::Password { password } => format!("password:{}", password),
            SshAuth::PublicKey {
                private_key_path,
                passphrase,
            } => format!(
                "key:{}:{}:{}",
                private_key_path.len(),
                private_key_path,
                passphrase.as_deref().unwrap_or_default()
            ),
            SshAuth::Agent => String::new(),
        }
    }
}

/// The SSH host a connection is tunnelled through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshTarget {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub auth: SshAuth,
}

fn default_ssh_port() -> u16 {
    22
}

impl SshTarget {
    pub fn with_password(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            auth: SshAuth::Password {
                password: password.into(),
            },
        }
    }

    pub fn with_public_key(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        private_key_path: impl Into<String>,
        passphrase: Option<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            auth: SshAuth::PublicKey {
                private_key_path: private_key_path.into(),
                passphrase,
            },
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_engine_and_endpoint() {
        assert!(matches!(
            ConnectionConfig::default().validate(),
            Err(BrokerError::ConfigInvalid(_))
        ));
        assert!(ConnectionConfig::new("pg", "", 5432).validate().is_err());
        assert!(ConnectionConfig::new("pg", "db", 0).validate().is_err());
        assert!(ConnectionConfig::new("pg", "db", 5432).validate().is_ok());
    }

    #[test]
    fn sqlite_is_identified_by_path() {
        let mut config = ConnectionConfig::new("sqlite", "", 0);
        assert!(config.validate().is_err());
        config.database_path = "/tmp/app.db".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn with_endpoint_leaves_caller_config_untouched() {
        let caller = ConnectionConfig::new("oracle", "10.0.0.5", 1521);
        let rewritten = caller.with_endpoint("127.0.0.1", 40000);
        assert_eq!(caller.address(), "10.0.0.5:1521");
        assert_eq!(rewritten.address(), "127.0.0.1:40000");
        assert_eq!(rewritten.engine, "oracle");
    }

    #[test]
    fn mysql_gets_charset_default() {
        let config = ConnectionConfig::new("MySQL", "db", 3306).with_engine_defaults();
        assert_eq!(config.dsn_append, "&charset=utf8mb4");

        let mut custom = ConnectionConfig::new("mysql", "db", 3306);
        custom.dsn_append = "&parseTime=true".into();
        assert_eq!(custom.with_engine_defaults().dsn_append, "&parseTime=true");
    }

    #[test]
    fn deserializes_ui_payload() {
        let json = r#"{"type":"pg","host":"h","port":5432,"dbName":"d","username":"u"}"#;
        let config: ConnectionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.engine, "pg");
        assert_eq!(config.db_name, "d");
        assert!(config.password.is_empty());
    }
}
