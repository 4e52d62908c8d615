//! Configured user table.
//!
//! Passwords are compared as SHA-256 digests in constant time. The config may
//! carry either a plaintext password (hashed at load) or a pre-hashed
//! `sha256:<hex>` value.

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::config::UserConfig;

struct UserEntry {
    digest: [u8; 32],
    display_name: String,
}

/// In-memory user table resolved from configuration.
pub struct UserTable {
    users: HashMap<String, UserEntry>,
}

impl UserTable {
    /// Build the table from configuration.
    ///
    /// When the configured table is empty the development defaults are
    /// seeded (`admin`/`admin123`, `user`/`user123`, `readonly`/`readonly123`)
    /// and a warning is logged. Production deployments must configure
    /// `auth.users` to disable the defaults.
    #[must_use]
    pub fn from_config(configured: &HashMap<String, UserConfig>) -> Self {
        let mut users = HashMap::new();

        if configured.is_empty() {
            warn!(
                "auth.users is empty - seeding DEFAULT DEVELOPMENT CREDENTIALS \
                 (admin/admin123, user/user123, readonly/readonly123); \
                 configure auth.users before exposing this server"
            );
            for (name, password, display) in [
                ("admin", "admin123", "Administrator"),
                ("user", "user123", "Standard User"),
                ("readonly", "readonly123", "Read Only"),
            ] {
                users.insert(
                    name.to_string(),
                    UserEntry {
                        digest: sha256(password.as_bytes()),
                        display_name: display.to_string(),
                    },
                );
            }
            return Self { users };
        }

        for (name, user) in configured {
            let digest = match parse_digest(&user.password) {
                Some(d) => d,
                None => sha256(user.password.as_bytes()),
            };
            let display_name = if user.display_name.is_empty() {
                name.clone()
            } else {
                user.display_name.clone()
            };
            users.insert(
                name.clone(),
                UserEntry {
                    digest,
                    display_name,
                },
            );
        }

        Self { users }
    }

    /// Validate credentials. Returns the display name on success.
    ///
    /// Comparison is constant-time over the SHA-256 digests; an unknown
    /// username still burns a hash to keep timing uniform.
    #[must_use]
    pub fn verify(&self, username: &str, password: &str) -> Option<String> {
        let candidate = sha256(password.as_bytes());
        match self.users.get(username) {
            Some(entry) => {
                if entry.digest.ct_eq(&candidate).into() {
                    Some(entry.display_name.clone())
                } else {
                    None
                }
            }
            None => {
                let _ = candidate.ct_eq(&[0u8; 32]);
                None
            }
        }
    }

    /// Number of configured users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// True if the table has no users.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Parse a `sha256:<hex>` password spec into a digest.
fn parse_digest(spec: &str) -> Option<[u8; 32]> {
    let hex_digest = spec.strip_prefix("sha256:")?;
    let bytes = hex::decode(hex_digest).ok()?;
    bytes.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_seed_verifies_known_credentials() {
        // GIVEN: an empty configured table
        let table = UserTable::from_config(&HashMap::new());

        // THEN: the development defaults work
        assert_eq!(table.verify("admin", "admin123").as_deref(), Some("Administrator"));
        assert_eq!(table.verify("user", "user123").as_deref(), Some("Standard User"));
        assert!(table.verify("admin", "wrong").is_none());
        assert!(table.verify("nobody", "admin123").is_none());
    }

    #[test]
    fn configured_plaintext_password() {
        let mut configured = HashMap::new();
        configured.insert(
            "alice".to_string(),
            UserConfig {
                password: "s3cret".to_string(),
                display_name: "Alice".to_string(),
            },
        );
        let table = UserTable::from_config(&configured);
        assert_eq!(table.verify("alice", "s3cret").as_deref(), Some("Alice"));
        assert!(table.verify("alice", "S3cret").is_none());
        // Defaults are NOT seeded when any user is configured
        assert!(table.verify("admin", "admin123").is_none());
    }

    #[test]
    fn configured_prehashed_password() {
        // sha256("hunter2")
        let digest = {
            let mut h = Sha256::new();
            h.update(b"hunter2");
            hex::encode(h.finalize())
        };
        let mut configured = HashMap::new();
        configured.insert(
            "bob".to_string(),
            UserConfig {
                password: format!("sha256:{digest}"),
                display_name: String::new(),
            },
        );
        let table = UserTable::from_config(&configured);
        // Display name falls back to the username
        assert_eq!(table.verify("bob", "hunter2").as_deref(), Some("bob"));
        assert!(table.verify("bob", "hunter3").is_none());
    }

    #[test]
    fn malformed_hash_spec_is_treated_as_plaintext() {
        let mut configured = HashMap::new();
        configured.insert(
            "carol".to_string(),
            UserConfig {
                password: "sha256:nothex".to_string(),
                display_name: String::new(),
            },
        );
        let table = UserTable::from_config(&configured);
        assert!(table.verify("carol", "sha256:nothex").is_some());
    }
}
