use std::fmt::{self, Display};

use sha2::{Digest, Sha256};

use crate::config::{ConnectionConfig, SshTarget};

/// Identity key of a logical connection request.
///
/// Equal for requests that would reach the same database as the same user
/// over the same SSH hop. Credentials only enter the key through a digest of
/// the key accumulated so far, so the key never holds a raw secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(config: &ConnectionConfig, ssh: Option<&SshTarget>) -> Self {
        let mut key = String::from("database");
        push_part(&mut key, "engine", &config.engine_key());
        push_part(&mut key, "host", &config.host);
        push_part(&mut key, "port", &config.port.to_string());

        for (tag, value) in [
            ("path", &config.database_path),
            ("db", &config.database),
            ("dbname", &config.db_name),
            ("dsn", &config.odbc_dsn),
            ("dialect", &config.odbc_dialect_name),
        ] {
            if !value.is_empty() {
                push_part(&mut key, tag, value);
            }
        }

        for (tag, secret) in [("user", &config.username), ("pass", &config.password)] {
            if !secret.is_empty() {
                let folded = fold(&key, secret);
                push_part(&mut key, tag, &folded);
            }
        }

        for (tag, value) in [
            ("tls", &config.tls_config),
            ("tlsca", &config.tls_root_cert),
            ("tlscert", &config.tls_client_cert),
            ("tlskey", &config.tls_client_key),
        ] {
            if !value.is_empty() {
                push_part(&mut key, tag, value);
            }
        }

        if let Some(ssh) = ssh {
            push_part(&mut key, "ssh", &ssh.address());
            push_part(&mut key, "sshuser", &ssh.username);
            let secret = ssh.auth.secret();
            if !secret.is_empty() {
                let folded = fold(&key, &secret);
                push_part(&mut key, "sshauth", &folded);
            }
        }

        Fingerprint(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(48)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(key: &str) -> Self {
        Fingerprint(key.to_string())
    }
}

/// Appends `-tag:len:value`. The byte length keeps values that contain the
/// separator from running into the next part.
fn push_part(key: &mut String, tag: &str, value: &str) {
    key.push('-');
    key.push_str(tag);
    key.push(':');
    key.push_str(&value.len().to_string());
    key.push(':');
    key.push_str(value);
}

fn fold(key: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}
