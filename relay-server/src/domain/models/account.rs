use copier_status_file::{Platform, Role};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Snapshot identity: the same account id on two platforms is two accounts
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountKey {
    pub platform: Platform,
    pub account_id: String,
}

impl AccountKey {
    pub fn new(platform: Platform, account_id: impl Into<String>) -> Self {
        Self {
            platform,
            account_id: account_id.into(),
        }
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.account_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("account key must look like PLATFORM:accountId, got {0:?}")]
pub struct InvalidAccountKey(pub String);

impl FromStr for AccountKey {
    type Err = InvalidAccountKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((platform, id)) if !platform.trim().is_empty() && !id.trim().is_empty() => {
                Ok(AccountKey::new(Platform::from_token(platform), id.trim()))
            }
            _ => Err(InvalidAccountKey(s.to_string())),
        }
    }
}

/// Computed connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionStatus {
    Online,
    Offline,
}

/// Account state derived from one status file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account_id: String,
    pub platform: Platform,
    /// Always the TYPE line role
    pub role: Role,
    /// Role token of the CONFIG line, kept for diagnostics only
    pub config_role: Option<Role>,
    pub status: ConnectionStatus,
    /// Timestamp of the STATUS line (unix seconds)
    pub last_seen_at: Option<i64>,
    pub enabled: bool,
    pub linked_master_id: Option<String>,
    pub display_name: String,
    pub source_file_path: PathBuf,
}

impl AccountSnapshot {
    pub fn key(&self) -> AccountKey {
        AccountKey::new(self.platform.clone(), self.account_id.clone())
    }

    pub fn is_online(&self) -> bool {
        self.status == ConnectionStatus::Online
    }
}

/// Externally visible account: snapshot merged with the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountView {
    pub account_id: String,
    pub platform: Platform,
    pub role: Role,
    pub status: ConnectionStatus,
    pub enabled: bool,
    /// Whether the account should be copy-trading right now
    pub effective_status: bool,
    pub last_seen_at: Option<i64>,
    pub linked_master_id: Option<String>,
    pub display_name: String,
    /// None for registry-only accounts that have no live status file
    pub source_file_path: Option<PathBuf>,
    pub config_role: Option<Role>,
}

impl AccountView {
    pub fn key(&self) -> AccountKey {
        AccountKey::new(self.platform.clone(), self.account_id.clone())
    }
}

/// Accounts of one API key grouped the way clients display them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountsView {
    pub pending: Vec<AccountView>,
    pub masters: Vec<AccountView>,
    pub slaves: Vec<AccountView>,
    /// Slaves without a link to a known master
    pub unconnected_slaves: Vec<AccountView>,
}

impl AccountsView {
    pub fn iter(&self) -> impl Iterator<Item = &AccountView> {
        self.pending
            .iter()
            .chain(self.masters.iter())
            .chain(self.slaves.iter())
            .chain(self.unconnected_slaves.iter())
    }

    pub fn len(&self) -> usize {
        self.pending.len() + self.masters.len() + self.slaves.len() + self.unconnected_slaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn find(&self, key: &AccountKey) -> Option<&AccountView> {
        self.iter().find(|v| v.platform == key.platform && v.account_id == key.account_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_key_round_trip_through_display() {
        let key = AccountKey::new(Platform::MT5, "52381082");
        assert_eq!(key.to_string(), "MT5:52381082");
        assert_eq!("MT5:52381082".parse::<AccountKey>().unwrap(), key);
        assert_eq!(
            "mt4:1".parse::<AccountKey>().unwrap(),
            AccountKey::new(Platform::MT4, "1")
        );
    }

    #[test]
    fn test_account_key_rejects_missing_parts() {
        assert!("52381082".parse::<AccountKey>().is_err());
        assert!("MT5:".parse::<AccountKey>().is_err());
        assert!(":1".parse::<AccountKey>().is_err());
    }

    #[test]
    fn test_same_id_on_two_platforms_is_two_keys() {
        let a = AccountKey::new(Platform::MT4, "52381082");
        let b = AccountKey::new(Platform::MT5, "52381082");
        assert_ne!(a, b);
    }
}
