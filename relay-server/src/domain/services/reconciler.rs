// relay-server/src/domain/services/reconciler.rs
//
// Pure reconciliation rules: status file records -> AccountSnapshot,
// AccountSnapshot + registry -> AccountsView. No I/O, no clock access.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::domain::models::{
    AccountKey, AccountSnapshot, AccountView, AccountsView, ConfigRecord, ConnectionStatus,
    CopierStatus, ParsedStatusFile, RegisteredAccount, RegistryEntry, Role, StatusRecord,
    AUTO_LINK_KEY,
};

pub const ENABLED_TOKEN: &str = "ENABLED";
pub const NULL_TOKEN: &str = "NULL";

/// Index of the ENABLED/DISABLED token in `ConfigRecord::details`
const ENABLE_FIELD: usize = 0;
/// Index of the master display name (MASTER) or linked master id (SLAVE)
const SECOND_FIELD: usize = 1;

/// `NULL` and empty detail tokens mean "no value"
pub fn present(token: Option<&str>) -> Option<&str> {
    token
        .map(str::trim)
        .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case(NULL_TOKEN))
}

/// ONLINE iff a status record exists and it is strictly younger than the timeout
pub fn compute_status(
    status: Option<&StatusRecord>,
    now: i64,
    timeout_secs: i64,
) -> ConnectionStatus {
    match status {
        Some(record) if now.saturating_sub(record.timestamp) < timeout_secs => {
            ConnectionStatus::Online
        }
        _ => ConnectionStatus::Offline,
    }
}

/// Status from a last-seen timestamp (same rule as `compute_status`)
pub fn status_from_last_seen(
    last_seen_at: Option<i64>,
    now: i64,
    timeout_secs: i64,
) -> ConnectionStatus {
    match last_seen_at {
        Some(ts) if now.saturating_sub(ts) < timeout_secs => ConnectionStatus::Online,
        _ => ConnectionStatus::Offline,
    }
}

/// A missing CONFIG line or a missing enable token means not yet configured,
/// which does not block copying. Any present token other than ENABLED does.
pub fn resolve_enabled(role: Role, config: Option<&ConfigRecord>) -> bool {
    let Some(config) = config else {
        return true;
    };
    match role {
        Role::Master | Role::Slave => match present(config.detail(ENABLE_FIELD)) {
            Some(token) => token.eq_ignore_ascii_case(ENABLED_TOKEN),
            None => true,
        },
        Role::Pending => true,
    }
}

pub fn resolve_linked_master(role: Role, config: Option<&ConfigRecord>) -> Option<String> {
    if role != Role::Slave {
        return None;
    }
    config
        .and_then(|c| present(c.detail(SECOND_FIELD)))
        .map(str::to_string)
}

pub fn resolve_display_name(role: Role, account_id: &str, config: Option<&ConfigRecord>) -> String {
    let name = match role {
        Role::Master => config.and_then(|c| present(c.detail(SECOND_FIELD))),
        Role::Slave | Role::Pending => None,
    };
    name.unwrap_or(account_id).to_string()
}

/// Build a snapshot from one parsed file.
///
/// Returns None when the file has no TYPE record: such a file is not an
/// account and is left out of the snapshot set.
pub fn build_snapshot(
    parsed: &ParsedStatusFile,
    source_file_path: &Path,
    now: i64,
    timeout_secs: i64,
) -> Option<AccountSnapshot> {
    let type_record = parsed.type_record.as_ref()?;
    let config = parsed.config.as_ref();
    let role = type_record.role;

    Some(AccountSnapshot {
        account_id: type_record.account_id.clone(),
        platform: type_record.platform.clone(),
        role,
        config_role: config.and_then(|c| c.config_role),
        status: compute_status(parsed.status.as_ref(), now, timeout_secs),
        last_seen_at: parsed.status.map(|s| s.timestamp),
        enabled: resolve_enabled(role, config),
        linked_master_id: resolve_linked_master(role, config),
        display_name: resolve_display_name(role, &type_record.account_id, config),
        source_file_path: source_file_path.to_path_buf(),
    })
}

/// Recompute status of a retained snapshot. Returns true if it changed.
pub fn refresh_status(snapshot: &mut AccountSnapshot, now: i64, timeout_secs: i64) -> bool {
    let status = status_from_last_seen(snapshot.last_seen_at, now, timeout_secs);
    let changed = snapshot.status != status;
    snapshot.status = status;
    changed
}

/// Should this account be copy-trading right now
pub fn effective_status(
    role: Role,
    account_id: &str,
    status: ConnectionStatus,
    enabled: bool,
    copier_status: &CopierStatus,
) -> bool {
    role != Role::Pending
        && status == ConnectionStatus::Online
        && enabled
        && copier_status.global_status
        && !copier_status.is_disabled(role, account_id)
}

/// Merge live snapshots with the registry into the grouped client view.
///
/// Registry-known accounts without a live snapshot are listed OFFLINE.
pub fn build_view(
    snapshots: &[AccountSnapshot],
    registry: &RegistryEntry,
) -> AccountsView {
    let copier = &registry.copier_status;
    let mut views: BTreeMap<AccountKey, AccountView> = BTreeMap::new();

    for snapshot in snapshots {
        let key = snapshot.key();
        let linked_master_id = registry
            .slave_links
            .get(&key.to_string())
            .cloned()
            .or_else(|| snapshot.linked_master_id.clone());
        let linked_master_id = if snapshot.role == Role::Slave {
            linked_master_id
        } else {
            None
        };

        views.insert(
            key,
            AccountView {
                account_id: snapshot.account_id.clone(),
                platform: snapshot.platform.clone(),
                role: snapshot.role,
                status: snapshot.status,
                enabled: snapshot.enabled,
                effective_status: effective_status(
                    snapshot.role,
                    &snapshot.account_id,
                    snapshot.status,
                    snapshot.enabled,
                    copier,
                ),
                last_seen_at: snapshot.last_seen_at,
                linked_master_id,
                display_name: snapshot.display_name.clone(),
                source_file_path: Some(snapshot.source_file_path.clone()),
                config_role: snapshot.config_role,
            },
        );
    }

    for role in [Role::Master, Role::Slave, Role::Pending] {
        for (id, account) in registry.accounts_for(role) {
            let key = AccountKey::new(account.platform.clone(), account.account_id.clone());
            if views.contains_key(&key) {
                continue;
            }
            views.insert(key, registry_only_view(role, id, account, registry));
        }
    }

    let master_ids: HashSet<String> = views
        .values()
        .filter(|v| v.role == Role::Master)
        .map(|v| v.account_id.clone())
        .collect();

    let mut grouped = AccountsView::default();
    for view in views.into_values() {
        match view.role {
            Role::Pending => grouped.pending.push(view),
            Role::Master => grouped.masters.push(view),
            Role::Slave => {
                let connected = view
                    .linked_master_id
                    .as_ref()
                    .is_some_and(|m| master_ids.contains(m));
                if connected {
                    grouped.slaves.push(view);
                } else {
                    grouped.unconnected_slaves.push(view);
                }
            }
        }
    }
    grouped
}

fn registry_only_view(
    role: Role,
    registry_id: &str,
    account: &RegisteredAccount,
    registry: &RegistryEntry,
) -> AccountView {
    let linked_master_id = match role {
        Role::Slave => registry.slave_links.get(registry_id).cloned(),
        _ => None,
    };
    AccountView {
        account_id: account.account_id.clone(),
        platform: account.platform.clone(),
        role,
        status: ConnectionStatus::Offline,
        enabled: true,
        effective_status: false,
        last_seen_at: None,
        linked_master_id,
        display_name: account
            .display_name
            .clone()
            .unwrap_or_else(|| account.account_id.clone()),
        source_file_path: None,
        config_role: None,
    }
}

/// Record newly discovered accounts (and role moves) in the registry.
/// Returns true if the document changed.
pub fn register_snapshots(
    registry: &mut RegistryEntry,
    snapshots: &[AccountSnapshot],
    now: DateTime<Utc>,
) -> bool {
    let mut changed = false;

    for snapshot in snapshots {
        let key = snapshot.key();
        let id = key.to_string();
        let display_name = Some(snapshot.display_name.clone()).filter(|n| *n != snapshot.account_id);

        match registry.role_of(&key) {
            Some(role) if role == snapshot.role => {
                if let Some(account) = registry.accounts_for_mut(role).get_mut(&id) {
                    if account.display_name != display_name {
                        account.display_name = display_name;
                        account.last_changed_at = now;
                        changed = true;
                    }
                }
            }
            Some(old_role) => {
                let previous = registry.accounts_for_mut(old_role).remove(&id);
                let first_seen_at = previous.map(|a| a.first_seen_at).unwrap_or(now);
                tracing::info!(
                    account = %key,
                    from = %old_role,
                    to = %snapshot.role,
                    "Account role changed, moving registry entry"
                );
                registry.accounts_for_mut(snapshot.role).insert(
                    id,
                    RegisteredAccount {
                        account_id: snapshot.account_id.clone(),
                        platform: snapshot.platform.clone(),
                        display_name,
                        first_seen_at,
                        last_changed_at: now,
                    },
                );
                changed = true;
            }
            None => {
                tracing::info!(account = %key, role = %snapshot.role, "Registering new account");
                registry.accounts_for_mut(snapshot.role).insert(
                    id,
                    RegisteredAccount {
                        account_id: snapshot.account_id.clone(),
                        platform: snapshot.platform.clone(),
                        display_name,
                        first_seen_at: now,
                        last_changed_at: now,
                    },
                );
                changed = true;
            }
        }
    }

    changed
}

/// One-time import of CONFIG-declared slave links.
///
/// Runs only once per registry (guarded by the `auto-link` idempotency
/// record) and only once there is something to link.
pub fn apply_auto_link(
    registry: &mut RegistryEntry,
    snapshots: &[AccountSnapshot],
    now: DateTime<Utc>,
) -> bool {
    if registry.has_run(AUTO_LINK_KEY) {
        return false;
    }

    let candidates: Vec<(String, String)> = snapshots
        .iter()
        .filter(|s| s.role == Role::Slave)
        .filter_map(|s| {
            s.linked_master_id
                .as_ref()
                .map(|master| (s.key().to_string(), master.clone()))
        })
        .collect();
    if candidates.is_empty() {
        return false;
    }

    for (slave, master) in candidates {
        tracing::info!(slave = %slave, master = %master, "Auto-linking slave to master");
        registry.slave_links.entry(slave).or_insert(master);
    }
    registry.mark_first_run(AUTO_LINK_KEY, now);
    true
}
