//! Change detection between two views of the same API key.
//!
//! `last_seen_at` moves on every terminal write and is deliberately not a
//! change on its own; status flips caused by it are.

use std::collections::BTreeMap;

use crate::domain::models::{AccountKey, AccountView, AccountsView, SnapshotDiff};

pub fn diff_views(previous: &AccountsView, current: &AccountsView) -> SnapshotDiff {
    let prev: BTreeMap<AccountKey, &AccountView> = previous.iter().map(|v| (v.key(), v)).collect();
    let curr: BTreeMap<AccountKey, &AccountView> = current.iter().map(|v| (v.key(), v)).collect();

    let mut diff = SnapshotDiff::default();

    for (key, before) in &prev {
        if !curr.contains_key(key) {
            diff.removed.push(key.clone());
            continue;
        }
        let after = curr[key];
        if before.status != after.status {
            diff.status_changed.push(key.clone());
        }
        if before.enabled != after.enabled || before.effective_status != after.effective_status {
            diff.enablement_changed.push(key.clone());
        }
        if before.role != after.role
            || before.linked_master_id != after.linked_master_id
            || before.display_name != after.display_name
            || before.source_file_path != after.source_file_path
        {
            diff.updated.push(key.clone());
        }
    }

    diff.added = curr
        .keys()
        .filter(|key| !prev.contains_key(*key))
        .cloned()
        .collect();

    diff
}
