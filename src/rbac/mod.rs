//! Policy store — persistent (subject, object, action) rules and role grants.
//!
//! The store is the only durable state in the server. It lives behind a
//! single object with internal synchronization; every mutation is written
//! back to disk (temp file + rename) before the call returns, so grants and
//! rules survive process restart.
//!
//! Subjects are either literal user ids or `role:<name>`. A decision is
//! "allow" iff a matching rule exists, either directly for the subject or
//! through one of the subject's granted roles.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{Error, Result};

/// Reserved subject prefix marking a role rule.
pub const ROLE_PREFIX: &str = "role:";

/// A single permission rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rule {
    /// Literal user id or `role:<name>`
    pub subject: String,
    /// Object being accessed (e.g. `filesystem`)
    pub object: String,
    /// Action on the object (e.g. `read`)
    pub action: String,
}

impl Rule {
    /// Construct a rule.
    pub fn new(
        subject: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            object: object.into(),
            action: action.into(),
        }
    }
}

/// Store counters exposed by the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    /// Number of permission rules
    pub rules: usize,
    /// Number of (user, role) grants
    pub grants: usize,
    /// Number of distinct users with at least one grant
    pub users: usize,
    /// Number of distinct role names referenced by grants or rules
    pub roles: usize,
}

#[derive(Debug, Default)]
struct StoreData {
    rules: HashSet<Rule>,
    grants: BTreeMap<String, BTreeSet<String>>,
}

/// On-disk document shape (kept sorted for stable diffs).
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedStore {
    rules: Vec<Rule>,
    grants: BTreeMap<String, Vec<String>>,
}

/// Persistent policy store.
pub struct PolicyStore {
    path: PathBuf,
    inner: RwLock<StoreData>,
}

impl PolicyStore {
    /// Open the store at `path`, loading any existing document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let persisted: PersistedStore = serde_json::from_str(&raw)?;
            let rules: HashSet<Rule> = persisted.rules.into_iter().collect();
            let grants = persisted
                .grants
                .into_iter()
                .map(|(user, roles)| (user, roles.into_iter().collect()))
                .collect();
            debug!(path = %path.display(), "Loaded policy store");
            StoreData { rules, grants }
        } else {
            StoreData::default()
        };

        Ok(Self {
            path,
            inner: RwLock::new(data),
        })
    }

    /// True iff a matching rule exists for the subject, either directly or
    /// through one of the subject's granted roles.
    #[must_use]
    pub fn enforce(&self, subject: &str, object: &str, action: &str) -> bool {
        let data = self.inner.read();
        let direct = Rule::new(subject, object, action);
        if data.rules.contains(&direct) {
            return true;
        }
        if subject.starts_with(ROLE_PREFIX) {
            return false;
        }
        data.grants.get(subject).is_some_and(|roles| {
            roles.iter().any(|role| {
                data.rules
                    .contains(&Rule::new(format!("{ROLE_PREFIX}{role}"), object, action))
            })
        })
    }

    /// Add a rule.
    ///
    /// # Errors
    ///
    /// `Error::RuleExists` if the exact tuple is already present.
    pub fn add_rule(&self, subject: &str, object: &str, action: &str) -> Result<()> {
        if subject.is_empty() || object.is_empty() || action.is_empty() {
            return Err(Error::Validation(
                "rule subject, object and action must be non-empty".to_string(),
            ));
        }
        {
            let mut data = self.inner.write();
            if !data.rules.insert(Rule::new(subject, object, action)) {
                return Err(Error::RuleExists(
                    subject.to_string(),
                    object.to_string(),
                    action.to_string(),
                ));
            }
        }
        self.persist()
    }

    /// Remove a rule.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` if the tuple is not present.
    pub fn remove_rule(&self, subject: &str, object: &str, action: &str) -> Result<()> {
        {
            let mut data = self.inner.write();
            if !data.rules.remove(&Rule::new(subject, object, action)) {
                return Err(Error::NotFound(format!(
                    "rule ({subject}, {object}, {action})"
                )));
            }
        }
        self.persist()
    }

    /// Grant a role to a user.
    ///
    /// # Errors
    ///
    /// `Error::Validation` when the user id uses the reserved `role:` prefix,
    /// `Error::RuleExists` when the grant is already present.
    pub fn grant(&self, user: &str, role: &str) -> Result<()> {
        if user.starts_with(ROLE_PREFIX) {
            return Err(Error::Validation(format!(
                "user id may not use the reserved '{ROLE_PREFIX}' prefix"
            )));
        }
        if user.is_empty() || role.is_empty() {
            return Err(Error::Validation(
                "user and role must be non-empty".to_string(),
            ));
        }
        {
            let mut data = self.inner.write();
            if !data.grants.entry(user.to_string()).or_default().insert(role.to_string()) {
                return Err(Error::RuleExists(
                    user.to_string(),
                    "grant".to_string(),
                    role.to_string(),
                ));
            }
        }
        self.persist()
    }

    /// Revoke a role from a user.
    ///
    /// Rules granting permissions *to* the role are left in place; callers
    /// wanting those gone must remove them explicitly.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` if the grant is not present.
    pub fn revoke(&self, user: &str, role: &str) -> Result<()> {
        {
            let mut data = self.inner.write();
            let removed = match data.grants.get_mut(user) {
                Some(roles) => roles.remove(role),
                None => false,
            };
            if !removed {
                return Err(Error::NotFound(format!("grant ({user}, {role})")));
            }
            if data.grants.get(user).is_some_and(BTreeSet::is_empty) {
                data.grants.remove(user);
            }
        }
        self.persist()
    }

    /// Roles granted to a user, sorted.
    #[must_use]
    pub fn roles_of(&self, user: &str) -> Vec<String> {
        self.inner
            .read()
            .grants
            .get(user)
            .map(|roles| roles.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Rules granting permissions to a role, sorted.
    #[must_use]
    pub fn rules_of(&self, role: &str) -> Vec<Rule> {
        let subject = format!("{ROLE_PREFIX}{role}");
        let mut rules: Vec<Rule> = self
            .inner
            .read()
            .rules
            .iter()
            .filter(|r| r.subject == subject)
            .cloned()
            .collect();
        rules.sort();
        rules
    }

    /// Every permission a subject holds: direct rules plus rules of every
    /// granted role, sorted and deduplicated.
    #[must_use]
    pub fn permissions_of(&self, user: &str) -> Vec<Rule> {
        let data = self.inner.read();
        let mut out: BTreeSet<Rule> = data
            .rules
            .iter()
            .filter(|r| r.subject == user)
            .cloned()
            .collect();
        if let Some(roles) = data.grants.get(user) {
            for role in roles {
                let subject = format!("{ROLE_PREFIX}{role}");
                out.extend(data.rules.iter().filter(|r| r.subject == subject).cloned());
            }
        }
        out.into_iter().collect()
    }

    /// All users with at least one grant, sorted.
    #[must_use]
    pub fn all_users(&self) -> Vec<String> {
        self.inner.read().grants.keys().cloned().collect()
    }

    /// All role names referenced by grants or role rules, sorted.
    #[must_use]
    pub fn all_roles(&self) -> Vec<String> {
        let data = self.inner.read();
        let mut roles: BTreeSet<String> = data
            .grants
            .values()
            .flat_map(|roles| roles.iter().cloned())
            .collect();
        roles.extend(
            data.rules
                .iter()
                .filter_map(|r| r.subject.strip_prefix(ROLE_PREFIX).map(String::from)),
        );
        roles.into_iter().collect()
    }

    /// Store counters.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let data = self.inner.read();
        let grant_count = data.grants.values().map(BTreeSet::len).sum();
        let mut roles: BTreeSet<&str> = data
            .grants
            .values()
            .flat_map(|roles| roles.iter().map(String::as_str))
            .collect();
        roles.extend(
            data.rules
                .iter()
                .filter_map(|r| r.subject.strip_prefix(ROLE_PREFIX)),
        );
        StoreStats {
            rules: data.rules.len(),
            grants: grant_count,
            users: data.grants.len(),
            roles: roles.len(),
        }
    }

    /// Seed the default role roster. Runs exactly when no rules exist;
    /// applying it twice has the same effect as applying it once.
    ///
    /// # Errors
    ///
    /// Returns an error if persisting the seeded store fails.
    pub fn seed_defaults(&self) -> Result<()> {
        {
            let mut data = self.inner.write();
            if !data.rules.is_empty() {
                debug!("Policy store already populated - skipping seed");
                return Ok(());
            }

            let role = |name: &str| format!("{ROLE_PREFIX}{name}");

            let base: &[(&str, &str)] = &[
                ("filesystem", "read"),
                ("filesystem", "write"),
                ("ai", "access"),
                ("gadgets", "execute"),
            ];
            let admin_only: &[(&str, &str)] = &[
                ("users", "manage"),
                ("roles", "manage"),
                ("system", "manage"),
                ("system", "config"),
                ("ai", "models"),
                ("gadgets", "manage"),
            ];
            for (object, action) in base.iter().chain(admin_only) {
                data.rules.insert(Rule::new(role("admin"), *object, *action));
            }
            for (object, action) in [
                ("filesystem", "read"),
                ("ai", "access"),
                ("gadgets", "execute"),
            ] {
                data.rules.insert(Rule::new(role("user"), object, action));
            }
            data.rules
                .insert(Rule::new(role("readonly"), "filesystem", "read"));
            for (object, action) in [
                ("filesystem", "read"),
                ("filesystem", "write"),
                ("ai", "access"),
                ("gadgets", "execute"),
            ] {
                data.rules
                    .insert(Rule::new(role("ai_user"), object, action));
            }

            for (user, granted) in [("admin", "admin"), ("user", "user"), ("readonly", "readonly")]
            {
                data.grants
                    .entry(user.to_string())
                    .or_default()
                    .insert(granted.to_string());
            }

            info!(
                rules = data.rules.len(),
                "Seeded default roles and permissions"
            );
        }
        self.persist()
    }

    /// Write the store back to disk: serialize to a temp file in the same
    /// directory, then rename over the target so a crash cannot truncate it.
    fn persist(&self) -> Result<()> {
        let persisted = {
            let data = self.inner.read();
            let mut rules: Vec<Rule> = data.rules.iter().cloned().collect();
            rules.sort();
            PersistedStore {
                rules,
                grants: data
                    .grants
                    .iter()
                    .map(|(user, roles)| (user.clone(), roles.iter().cloned().collect()))
                    .collect(),
            }
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&persisted)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Path of the backing document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
