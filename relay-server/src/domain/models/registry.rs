// Location: relay-server/src/domain/models/registry.rs
// Purpose: Persisted per-API-key account registry document

use chrono::{DateTime, Utc};
use copier_status_file::{Platform, Role};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::AccountKey;

/// Idempotency key for the one-time slave auto-link pass
pub const AUTO_LINK_KEY: &str = "auto-link";

/// An account the registry has seen at least once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredAccount {
    pub account_id: String,
    pub platform: Platform,
    #[serde(default)]
    pub display_name: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    /// Last time discovery changed this entry (role move or rename)
    pub last_changed_at: DateTime<Utc>,
}

/// Copy-enable overrides set by the user
///
/// A `false` entry always wins over file-derived state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopierStatus {
    #[serde(default = "default_global_status")]
    pub global_status: bool,
    #[serde(default)]
    pub master_accounts: BTreeMap<String, bool>,
    #[serde(default)]
    pub slave_accounts: BTreeMap<String, bool>,
}

fn default_global_status() -> bool {
    true
}

impl Default for CopierStatus {
    fn default() -> Self {
        Self {
            global_status: default_global_status(),
            master_accounts: BTreeMap::new(),
            slave_accounts: BTreeMap::new(),
        }
    }
}

impl CopierStatus {
    /// True when the user explicitly disabled copying for this account
    pub fn is_disabled(&self, role: Role, account_id: &str) -> bool {
        let overrides = match role {
            Role::Master => &self.master_accounts,
            Role::Slave => &self.slave_accounts,
            Role::Pending => return false,
        };
        overrides.get(account_id) == Some(&false)
    }
}

/// Marker recording that a one-time operation already ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecord {
    pub first_run_at: DateTime<Utc>,
}

/// Registry document of one API key
///
/// Role maps are keyed by `"PLATFORM:id"`; copier overrides by account id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    #[serde(default)]
    pub master_accounts: BTreeMap<String, RegisteredAccount>,
    #[serde(default)]
    pub slave_accounts: BTreeMap<String, RegisteredAccount>,
    #[serde(default)]
    pub pending_accounts: BTreeMap<String, RegisteredAccount>,
    #[serde(default)]
    pub copier_status: CopierStatus,
    /// "PLATFORM:id" of a slave -> master account id
    #[serde(default)]
    pub slave_links: BTreeMap<String, String>,
    #[serde(default)]
    pub idempotency: BTreeMap<String, IdempotencyRecord>,
    /// "PLATFORM:id" -> key the account was merged into
    #[serde(default)]
    pub aliases: BTreeMap<String, AccountKey>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RegistryEntry {
    pub fn accounts_for(&self, role: Role) -> &BTreeMap<String, RegisteredAccount> {
        match role {
            Role::Master => &self.master_accounts,
            Role::Slave => &self.slave_accounts,
            Role::Pending => &self.pending_accounts,
        }
    }

    pub fn accounts_for_mut(&mut self, role: Role) -> &mut BTreeMap<String, RegisteredAccount> {
        match role {
            Role::Master => &mut self.master_accounts,
            Role::Slave => &mut self.slave_accounts,
            Role::Pending => &mut self.pending_accounts,
        }
    }

    /// Role under which the registry knows this key, if any
    pub fn role_of(&self, key: &AccountKey) -> Option<Role> {
        let id = key.to_string();
        [Role::Master, Role::Slave, Role::Pending]
            .into_iter()
            .find(|role| self.accounts_for(*role).contains_key(&id))
    }

    pub fn get(&self, key: &AccountKey) -> Option<&RegisteredAccount> {
        let id = key.to_string();
        [Role::Master, Role::Slave, Role::Pending]
            .into_iter()
            .find_map(|role| self.accounts_for(role).get(&id))
    }

    pub fn has_run(&self, idempotency_key: &str) -> bool {
        self.idempotency.contains_key(idempotency_key)
    }

    /// Record the first run of a one-time operation.
    /// Returns false when it already ran.
    pub fn mark_first_run(&mut self, idempotency_key: &str, now: DateTime<Utc>) -> bool {
        if self.has_run(idempotency_key) {
            return false;
        }
        self.idempotency.insert(
            idempotency_key.to_string(),
            IdempotencyRecord { first_run_at: now },
        );
        true
    }

    /// Follow a merge alias; unaliased keys map to themselves
    pub fn resolve_alias(&self, key: &AccountKey) -> AccountKey {
        self.aliases
            .get(&key.to_string())
            .cloned()
            .unwrap_or_else(|| key.clone())
    }

    /// Drop an account from every role map, link and override
    pub fn forget(&mut self, key: &AccountKey) -> bool {
        let id = key.to_string();
        let mut removed = false;
        for role in [Role::Master, Role::Slave, Role::Pending] {
            removed |= self.accounts_for_mut(role).remove(&id).is_some();
        }
        if !removed {
            return false;
        }

        self.slave_links.remove(&id);
        let id_still_used = [Role::Master, Role::Slave, Role::Pending]
            .into_iter()
            .any(|role| {
                self.accounts_for(role)
                    .values()
                    .any(|a| a.account_id == key.account_id)
            });
        if !id_still_used {
            self.copier_status.master_accounts.remove(&key.account_id);
            self.copier_status.slave_accounts.remove(&key.account_id);
        }
        true
    }
}
