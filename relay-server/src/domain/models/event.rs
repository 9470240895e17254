use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountKey, AccountsView};

/// What changed between two consecutive views of one API key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    pub added: Vec<AccountKey>,
    pub removed: Vec<AccountKey>,
    pub status_changed: Vec<AccountKey>,
    /// `enabled` or `effective_status` flipped
    pub enablement_changed: Vec<AccountKey>,
    /// Role, link or display name changed
    pub updated: Vec<AccountKey>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.status_changed.is_empty()
            && self.enablement_changed.is_empty()
            && self.updated.is_empty()
    }
}

/// Update pushed to subscribers.
///
/// Always carries the full view so a redelivered event is harmless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: Uuid,
    pub api_key: String,
    /// Per-API-key counter, starting at 1
    pub sequence: u64,
    pub emitted_at: DateTime<Utc>,
    pub diff: SnapshotDiff,
    pub view: AccountsView,
}

impl ChangeEvent {
    pub fn new(api_key: &str, sequence: u64, diff: SnapshotDiff, view: AccountsView) -> Self {
        Self {
            id: Uuid::new_v4(),
            api_key: api_key.to_string(),
            sequence,
            emitted_at: Utc::now(),
            diff,
            view,
        }
    }
}
