// relay-server/src/application/account_monitor.rs
//
// Owns the per-API-key snapshot sets and drives the poll cycle:
// read files -> parse -> reconcile -> merge registry -> diff -> publish.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::MissedTickBehavior;

use copier_status_file::parse_document;

use crate::config::{MonitorConfig, SourceConfig};
use crate::domain::models::{
    AccountKey, AccountSnapshot, AccountsView, ChangeEvent, Platform, RegistryEntry, Role,
};
use crate::domain::services::diff::diff_views;
use crate::domain::services::reconciler::{
    apply_auto_link, build_snapshot, build_view, refresh_status, register_snapshots,
};
use crate::errors::{MonitorError, ReadError, RegistryError};
use crate::ports::{ChangePublisher, RegistryRepository, StatusFileSource};

/// Running state for one API key
#[derive(Debug, Default)]
struct ApiKeyState {
    snapshots: BTreeMap<AccountKey, AccountSnapshot>,
    /// View last published (empty before the first event)
    last_view: AccountsView,
    sequence: u64,
    registry_corrupt: bool,
    /// Merge aliases from the last registry document that loaded
    aliases: Option<BTreeMap<String, AccountKey>>,
    /// Files that failed to decode or parse, with the last reported reason
    failing: HashMap<PathBuf, String>,
}

/// Outcome of one poll cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub api_keys: usize,
    pub files_read: usize,
    pub snapshots: usize,
    pub failures: usize,
    pub events_published: usize,
}

pub struct AccountMonitor {
    sources: Vec<SourceConfig>,
    files: Arc<dyn StatusFileSource>,
    registry: Arc<dyn RegistryRepository>,
    publisher: Arc<dyn ChangePublisher>,
    settings: MonitorConfig,
    state: RwLock<HashMap<String, ApiKeyState>>,
    /// Serializes poll cycles and operator mutations
    cycle_lock: Mutex<()>,
}

impl AccountMonitor {
    pub fn new(
        sources: Vec<SourceConfig>,
        files: Arc<dyn StatusFileSource>,
        registry: Arc<dyn RegistryRepository>,
        publisher: Arc<dyn ChangePublisher>,
        settings: MonitorConfig,
    ) -> Self {
        let state = sources
            .iter()
            .map(|s| (s.api_key.clone(), ApiKeyState::default()))
            .collect();

        Self {
            sources,
            files,
            registry,
            publisher,
            settings,
            state: RwLock::new(state),
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn api_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.sources.iter().map(|s| s.api_key.clone()).collect();
        keys.sort();
        keys.dedup();
        keys
    }

    pub async fn poll_once(&self) -> CycleReport {
        self.poll_once_at(Utc::now()).await
    }

    /// One full cycle evaluated at `now`. Cycles never overlap.
    pub async fn poll_once_at(&self, now: DateTime<Utc>) -> CycleReport {
        let _cycle = self.cycle_lock.lock().await;
        let mut report = CycleReport::default();

        for (api_key, targets) in self.collect_targets().await {
            report.api_keys += 1;

            // All reads of the cycle complete before anything is reconciled
            let reads = join_all(targets.into_iter().map(|(path, hint)| async move {
                let result = self.files.read(&path, hint).await;
                (path, result)
            }))
            .await;
            report.files_read += reads.len();

            let registry = match self.registry.load(&api_key).await {
                Ok(entry) => Some(entry),
                Err(RegistryError::NotFound) => Some(RegistryEntry::default()),
                Err(e) => {
                    self.note_registry_failure(&api_key, &e).await;
                    None
                }
            };
            // Merge aliases outlive a registry outage
            let aliases = match &registry {
                Some(entry) => {
                    self.remember_aliases(&api_key, &entry.aliases).await;
                    entry.aliases.clone()
                }
                None => self.cached_aliases(&api_key).await.unwrap_or_default(),
            };

            let (fresh, failures) = self.reconcile_reads(&api_key, reads, &aliases, now);
            report.failures += failures.len();

            let snapshots = {
                let mut state = self.state.write().await;
                let entry = state.entry(api_key.clone()).or_default();
                Self::track_failures(&api_key, entry, failures);

                // A merged-away key never survives once its alias is known
                entry
                    .snapshots
                    .retain(|key, _| !aliases.contains_key(&key.to_string()));

                let timeout = self.settings.activity_timeout_secs;
                for (key, snapshot) in entry.snapshots.iter_mut() {
                    if !fresh.contains_key(key) {
                        refresh_status(snapshot, now.timestamp(), timeout);
                    }
                }
                entry.snapshots.extend(fresh);
                entry.snapshots.values().cloned().collect::<Vec<_>>()
            };
            report.snapshots += snapshots.len();

            if registry.is_none() {
                continue;
            }

            let to_register = snapshots.clone();
            let merged = self
                .registry
                .update(
                    &api_key,
                    Box::new(move |entry: &mut RegistryEntry| {
                        let registered = register_snapshots(entry, &to_register, now);
                        let linked = apply_auto_link(entry, &to_register, now);
                        registered || linked
                    }),
                )
                .await;

            let registry = match merged {
                Ok(entry) => {
                    self.note_registry_ok(&api_key).await;
                    entry
                }
                Err(e) => {
                    self.note_registry_failure(&api_key, &e).await;
                    continue;
                }
            };

            let view = build_view(&snapshots, &registry);
            if self.publish_if_changed(&api_key, view).await {
                report.events_published += 1;
            }
        }

        report
    }

    /// Status files to read this cycle, grouped by API key, sorted by path
    async fn collect_targets(&self) -> BTreeMap<String, BTreeMap<PathBuf, Option<Platform>>> {
        let mut targets: BTreeMap<String, BTreeMap<PathBuf, Option<Platform>>> = BTreeMap::new();

        for source in &self.sources {
            let hint = source.platform_hint();
            let paths = targets.entry(source.api_key.clone()).or_default();

            for path in &source.paths {
                paths.insert(path.clone(), hint.clone());
            }
            for directory in &source.directories {
                for path in self.files.list(directory, &source.extensions).await {
                    paths.insert(path, hint.clone());
                }
            }
        }

        targets
    }

    fn reconcile_reads(
        &self,
        api_key: &str,
        reads: Vec<(PathBuf, Result<String, ReadError>)>,
        aliases: &BTreeMap<String, AccountKey>,
        now: DateTime<Utc>,
    ) -> (BTreeMap<AccountKey, AccountSnapshot>, HashMap<PathBuf, String>) {
        let mut fresh: BTreeMap<AccountKey, AccountSnapshot> = BTreeMap::new();
        let mut failures = HashMap::new();

        for (path, result) in reads {
            let text = match result {
                Ok(text) => text,
                Err(ReadError::FileUnavailable { reason, .. }) => {
                    tracing::debug!(
                        api_key = %api_key,
                        path = %path.display(),
                        reason = %reason,
                        "Status file unavailable"
                    );
                    continue;
                }
                Err(e @ ReadError::Decode { .. }) => {
                    failures.insert(path, e.to_string());
                    continue;
                }
            };

            let parsed = match parse_document(&text) {
                Ok(parsed) => parsed,
                Err(e) => {
                    failures.insert(path, e.to_string());
                    continue;
                }
            };

            let Some(mut snapshot) = build_snapshot(
                &parsed,
                &path,
                now.timestamp(),
                self.settings.activity_timeout_secs,
            ) else {
                tracing::trace!(path = %path.display(), "File has no TYPE record, skipping");
                continue;
            };

            let key = snapshot.key();
            let key = aliases.get(&key.to_string()).cloned().unwrap_or(key);
            snapshot.platform = key.platform.clone();
            snapshot.account_id = key.account_id.clone();

            if let Some(previous) = fresh.insert(key.clone(), snapshot) {
                tracing::warn!(
                    api_key = %api_key,
                    account = %key,
                    kept = %path.display(),
                    dropped = %previous.source_file_path.display(),
                    "Two status files claim the same account, using the later path"
                );
            }
        }

        (fresh, failures)
    }

    /// Warn once per distinct failure; stay quiet while a file keeps failing the same way
    fn track_failures(api_key: &str, state: &mut ApiKeyState, failures: HashMap<PathBuf, String>) {
        for (path, reason) in &failures {
            if state.failing.get(path) != Some(reason) {
                tracing::warn!(
                    api_key = %api_key,
                    path = %path.display(),
                    reason = %reason,
                    "Status file skipped this cycle, keeping previous snapshot"
                );
            }
        }
        for path in state.failing.keys() {
            if !failures.contains_key(path) {
                tracing::info!(api_key = %api_key, path = %path.display(), "Status file readable again");
            }
        }
        state.failing = failures;
    }

    async fn remember_aliases(&self, api_key: &str, aliases: &BTreeMap<String, AccountKey>) {
        let mut state = self.state.write().await;
        state.entry(api_key.to_string()).or_default().aliases = Some(aliases.clone());
    }

    async fn cached_aliases(&self, api_key: &str) -> Option<BTreeMap<String, AccountKey>> {
        let state = self.state.read().await;
        state.get(api_key).and_then(|entry| entry.aliases.clone())
    }

    async fn note_registry_failure(&self, api_key: &str, error: &RegistryError) {
        let mut state = self.state.write().await;
        let entry = state.entry(api_key.to_string()).or_default();

        if error.is_corrupt() {
            if !entry.registry_corrupt {
                tracing::error!(
                    api_key = %api_key,
                    error = %error,
                    "Registry document is corrupt, registry merge and notifications suspended until it is repaired"
                );
            }
            entry.registry_corrupt = true;
        } else {
            tracing::warn!(api_key = %api_key, error = %error, "Registry unavailable this cycle");
        }
    }

    async fn note_registry_ok(&self, api_key: &str) {
        let mut state = self.state.write().await;
        if let Some(entry) = state.get_mut(api_key) {
            if entry.registry_corrupt {
                tracing::info!(api_key = %api_key, "Registry document readable again");
                entry.registry_corrupt = false;
            }
        }
    }

    /// Diff against the last published view; publish one event if anything changed
    async fn publish_if_changed(&self, api_key: &str, view: AccountsView) -> bool {
        let event = {
            let mut state = self.state.write().await;
            let entry = state.entry(api_key.to_string()).or_default();
            let diff = diff_views(&entry.last_view, &view);
            if diff.is_empty() {
                return false;
            }
            entry.last_view = view.clone();
            entry.sequence += 1;
            ChangeEvent::new(api_key, entry.sequence, diff, view)
        };

        tracing::info!(
            api_key = %api_key,
            sequence = event.sequence,
            added = event.diff.added.len(),
            removed = event.diff.removed.len(),
            status_changed = event.diff.status_changed.len(),
            enablement_changed = event.diff.enablement_changed.len(),
            "Accounts changed"
        );
        self.publisher.publish(event).await;
        true
    }

    async fn ensure_known(&self, api_key: &str) -> Result<(), MonitorError> {
        if self.state.read().await.contains_key(api_key) {
            Ok(())
        } else {
            Err(MonitorError::UnknownApiKey)
        }
    }

    async fn load_registry(&self, api_key: &str) -> Result<RegistryEntry, MonitorError> {
        match self.registry.load(api_key).await {
            Ok(entry) => Ok(entry),
            Err(RegistryError::NotFound) => Ok(RegistryEntry::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Current snapshot set for an API key, ordered by account key
    pub async fn snapshots(&self, api_key: &str) -> Result<Vec<AccountSnapshot>, MonitorError> {
        let state = self.state.read().await;
        state
            .get(api_key)
            .map(|entry| entry.snapshots.values().cloned().collect())
            .ok_or(MonitorError::UnknownApiKey)
    }

    pub async fn view(&self, api_key: &str) -> Result<AccountsView, MonitorError> {
        let snapshots = self.snapshots(api_key).await?;
        let registry = self.load_registry(api_key).await?;
        Ok(build_view(&snapshots, &registry))
    }

    /// Rebuild the view after an operator change and notify subscribers
    async fn republish(&self, api_key: &str) -> Result<AccountsView, MonitorError> {
        let view = self.view(api_key).await?;
        self.publish_if_changed(api_key, view.clone()).await;
        Ok(view)
    }

    /// Persist a per-account copy override for a MASTER or SLAVE account
    pub async fn set_enabled(
        &self,
        api_key: &str,
        account_id: &str,
        role: Role,
        enabled: bool,
    ) -> Result<AccountsView, MonitorError> {
        if role == Role::Pending {
            return Err(MonitorError::InvalidRole(role));
        }
        self.ensure_known(api_key).await?;
        let _cycle = self.cycle_lock.lock().await;

        let registry = self.load_registry(api_key).await?;
        let live = self
            .snapshots(api_key)
            .await?
            .iter()
            .any(|s| s.role == role && s.account_id == account_id);
        let registered = registry
            .accounts_for(role)
            .values()
            .any(|a| a.account_id == account_id);
        if !live && !registered {
            return Err(MonitorError::AccountNotFound(account_id.to_string()));
        }

        match role {
            Role::Master => {
                self.registry
                    .set_master_enabled(api_key, account_id, enabled)
                    .await?
            }
            Role::Slave => {
                self.registry
                    .set_slave_enabled(api_key, account_id, enabled)
                    .await?
            }
            Role::Pending => return Err(MonitorError::InvalidRole(role)),
        }
        tracing::info!(
            api_key = %api_key,
            account_id = %account_id,
            role = %role,
            enabled,
            "Copy enablement override set"
        );

        self.republish(api_key).await
    }

    /// Drop an account from the snapshot set and the registry.
    ///
    /// A status file that still exists brings the account back on the next
    /// cycle.
    pub async fn remove_account(
        &self,
        api_key: &str,
        key: &AccountKey,
    ) -> Result<AccountsView, MonitorError> {
        self.ensure_known(api_key).await?;
        let _cycle = self.cycle_lock.lock().await;

        let registered = self.load_registry(api_key).await?.get(key).is_some();
        let live = self
            .state
            .read()
            .await
            .get(api_key)
            .is_some_and(|entry| entry.snapshots.contains_key(key));
        if !live && !registered {
            return Err(MonitorError::AccountNotFound(key.to_string()));
        }

        let target = key.clone();
        self.registry
            .update(
                api_key,
                Box::new(move |entry: &mut RegistryEntry| entry.forget(&target)),
            )
            .await?;

        if let Some(entry) = self.state.write().await.get_mut(api_key) {
            entry.snapshots.remove(key);
        }
        tracing::info!(api_key = %api_key, account = %key, "Account removed");

        self.republish(api_key).await
    }

    /// Fold `from` into `into`: later reads of `from` are reported as `into`
    pub async fn merge_accounts(
        &self,
        api_key: &str,
        from: &AccountKey,
        into: &AccountKey,
    ) -> Result<AccountsView, MonitorError> {
        if from == into {
            return Err(MonitorError::SelfMerge(from.clone()));
        }
        self.ensure_known(api_key).await?;
        let _cycle = self.cycle_lock.lock().await;

        let registry = self.load_registry(api_key).await?;
        let live = self
            .state
            .read()
            .await
            .get(api_key)
            .is_some_and(|entry| entry.snapshots.contains_key(from));
        if !live && registry.get(from).is_none() {
            return Err(MonitorError::AccountNotFound(from.to_string()));
        }

        let (source, target) = (from.clone(), into.clone());
        let merged = self
            .registry
            .update(
                api_key,
                Box::new(move |entry: &mut RegistryEntry| {
                    entry.aliases.remove(&target.to_string());
                    entry.forget(&source);
                    for alias in entry.aliases.values_mut() {
                        if *alias == source {
                            *alias = target.clone();
                        }
                    }
                    entry.aliases.insert(source.to_string(), target);
                    true
                }),
            )
            .await?;

        if let Some(entry) = self.state.write().await.get_mut(api_key) {
            entry.aliases = Some(merged.aliases);
            if let Some(mut snapshot) = entry.snapshots.remove(from) {
                if !entry.snapshots.contains_key(into) {
                    snapshot.platform = into.platform.clone();
                    snapshot.account_id = into.account_id.clone();
                    entry.snapshots.insert(into.clone(), snapshot);
                }
            }
        }
        tracing::info!(api_key = %api_key, from = %from, into = %into, "Accounts merged");

        self.republish(api_key).await
    }

    /// Poll until `shutdown` flips to true. The in-flight cycle always
    /// completes before the loop exits.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            poll_interval_ms = self.settings.poll_interval_ms,
            activity_timeout_secs = self.settings.activity_timeout_secs,
            api_keys = self.api_keys().len(),
            "Account monitor started"
        );

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            let report = self.poll_once().await;
            tracing::debug!(
                api_keys = report.api_keys,
                files = report.files_read,
                snapshots = report.snapshots,
                failures = report.failures,
                events = report.events_published,
                "Poll cycle finished"
            );
        }

        tracing::info!("Account monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::outbound::persistence::JsonRegistryStore;
    use crate::domain::models::ConnectionStatus;
    use crate::ports::{MockChangePublisher, MockStatusFileSource};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    const API_KEY: &str = "key-1";
    const T0: i64 = 1_756_317_800;

    fn at(ts: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(ts, 0).unwrap()
    }

    fn settings() -> MonitorConfig {
        MonitorConfig {
            poll_interval_ms: 10,
            activity_timeout_secs: 30,
            read_timeout_ms: 100,
        }
    }

    fn source(paths: &[&str]) -> SourceConfig {
        SourceConfig {
            api_key: API_KEY.to_string(),
            platform: None,
            paths: paths.iter().map(PathBuf::from).collect(),
            directories: Vec::new(),
            extensions: vec!["csv".to_string()],
        }
    }

    /// File source serving whatever the shared map holds; absent paths are unavailable
    fn files_from(contents: Arc<StdMutex<HashMap<PathBuf, String>>>) -> MockStatusFileSource {
        let mut files = MockStatusFileSource::new();
        files.expect_read().returning(move |path: &Path, _| {
            contents
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| ReadError::FileUnavailable {
                    path: path.to_path_buf(),
                    reason: "not found".to_string(),
                })
        });
        files
    }

    fn counting_publisher(count: Arc<AtomicUsize>) -> MockChangePublisher {
        let mut publisher = MockChangePublisher::new();
        publisher.expect_publish().returning(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });
        publisher
    }

    struct Fixture {
        monitor: AccountMonitor,
        contents: Arc<StdMutex<HashMap<PathBuf, String>>>,
        events: Arc<AtomicUsize>,
        registry: Arc<JsonRegistryStore>,
        _dir: TempDir,
    }

    fn fixture(paths: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let contents = Arc::new(StdMutex::new(HashMap::new()));
        let events = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(JsonRegistryStore::new(dir.path()));

        let monitor = AccountMonitor::new(
            vec![source(paths)],
            Arc::new(files_from(contents.clone())),
            registry.clone(),
            Arc::new(counting_publisher(events.clone())),
            settings(),
        );

        Fixture {
            monitor,
            contents,
            events,
            registry,
            _dir: dir,
        }
    }

    impl Fixture {
        fn write(&self, path: &str, text: &str) {
            self.contents
                .lock()
                .unwrap()
                .insert(PathBuf::from(path), text.to_string());
        }

        fn delete(&self, path: &str) {
            self.contents.lock().unwrap().remove(Path::new(path));
        }

        fn events(&self) -> usize {
            self.events.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_unchanged_file_is_stable_across_polls() {
        let f = fixture(&["a.csv"]);
        f.write(
            "a.csv",
            "[TYPE] [PENDING] [MT4] [250062001]\n[STATUS] [ONLINE] [1756317783]\n[CONFIG] [PENDING] []\n",
        );

        for _ in 0..5 {
            f.monitor.poll_once_at(at(T0)).await;
        }

        let snapshots = f.monitor.snapshots(API_KEY).await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].role, Role::Pending);
        assert_eq!(snapshots[0].account_id, "250062001");
        assert!(snapshots[0].enabled);
        assert_eq!(snapshots[0].status, ConnectionStatus::Online);
        assert_eq!(f.events(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_keeps_snapshot_until_stale() {
        let f = fixture(&["a.csv"]);
        f.write(
            "a.csv",
            "[TYPE] [MASTER] [MT5] [1]\n[STATUS] [ONLINE] [1756317800]\n",
        );
        f.monitor.poll_once_at(at(T0)).await;
        f.delete("a.csv");

        let report = f.monitor.poll_once_at(at(T0 + 10)).await;
        assert_eq!(report.snapshots, 1);
        let snapshots = f.monitor.snapshots(API_KEY).await.unwrap();
        assert_eq!(snapshots[0].status, ConnectionStatus::Online);
        assert_eq!(f.events(), 1);

        f.monitor.poll_once_at(at(T0 + 30)).await;
        let snapshots = f.monitor.snapshots(API_KEY).await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].status, ConnectionStatus::Offline);
        assert_eq!(f.events(), 2);
    }

    #[tokio::test]
    async fn test_same_id_on_two_platforms_gives_two_snapshots() {
        let f = fixture(&["mt4.csv", "mt5.csv"]);
        f.write("mt4.csv", "[TYPE] [MASTER] [MT4] [52381082]\n");
        f.write("mt5.csv", "[TYPE] [MASTER] [MT5] [52381082]\n");

        f.monitor.poll_once_at(at(T0)).await;

        let snapshots = f.monitor.snapshots(API_KEY).await.unwrap();
        assert_eq!(snapshots.len(), 2);
        let view = f.monitor.view(API_KEY).await.unwrap();
        assert_eq!(view.masters.len(), 2);
    }

    #[tokio::test]
    async fn test_later_path_wins_on_key_conflict() {
        let f = fixture(&["a.csv", "b.csv"]);
        f.write("a.csv", "[TYPE] [MASTER] [MT4] [1]\n");
        f.write("b.csv", "[TYPE] [MASTER] [MT4] [1]\n");

        f.monitor.poll_once_at(at(T0)).await;

        let snapshots = f.monitor.snapshots(API_KEY).await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].source_file_path, PathBuf::from("b.csv"));
    }

    #[tokio::test]
    async fn test_master_override_forces_effective_false() {
        let f = fixture(&["m.csv"]);
        f.write(
            "m.csv",
            "[TYPE] [MASTER] [MT5] [1]\n[STATUS] [ONLINE] [1756317795]\n[CONFIG] [MASTER] [ENABLED] [Main]\n",
        );
        f.monitor.poll_once_at(at(T0)).await;
        assert!(f.monitor.view(API_KEY).await.unwrap().masters[0].effective_status);

        let view = f
            .monitor
            .set_enabled(API_KEY, "1", Role::Master, false)
            .await
            .unwrap();
        assert!(!view.masters[0].effective_status);
        assert!(view.masters[0].enabled);
        assert_eq!(f.events(), 2);

        let stored = f.registry.load(API_KEY).await.unwrap();
        assert_eq!(stored.copier_status.master_accounts.get("1"), Some(&false));
    }

    #[tokio::test]
    async fn test_set_enabled_rejects_pending_and_unknown() {
        let f = fixture(&["p.csv"]);
        f.write("p.csv", "[TYPE] [PENDING] [MT4] [9]\n");
        f.monitor.poll_once_at(at(T0)).await;

        assert!(matches!(
            f.monitor.set_enabled(API_KEY, "9", Role::Pending, true).await,
            Err(MonitorError::InvalidRole(Role::Pending))
        ));
        assert!(matches!(
            f.monitor.set_enabled(API_KEY, "404", Role::Slave, true).await,
            Err(MonitorError::AccountNotFound(_))
        ));
        assert!(matches!(
            f.monitor.set_enabled("other", "9", Role::Slave, true).await,
            Err(MonitorError::UnknownApiKey)
        ));
    }

    #[tokio::test]
    async fn test_config_role_mismatch_keeps_type_role() {
        let f = fixture(&["a.csv"]);
        f.write("a.csv", "[TYPE] [MASTER] [MT5] [1]\n[CONFIG] [SLAVE] [ENABLED] [7]\n");

        f.monitor.poll_once_at(at(T0)).await;

        let snapshots = f.monitor.snapshots(API_KEY).await.unwrap();
        assert_eq!(snapshots[0].role, Role::Master);
        assert_eq!(snapshots[0].config_role, Some(Role::Slave));
    }

    #[tokio::test]
    async fn test_malformed_file_keeps_previous_snapshot() {
        let f = fixture(&["a.csv", "b.csv"]);
        f.write("a.csv", "[TYPE] [MASTER] [MT5] [1]\n[STATUS] [ONLINE] [1756317800]\n");
        f.write("b.csv", "[TYPE] [SLAVE] [MT4] [2]\n");
        f.monitor.poll_once_at(at(T0)).await;

        f.write("a.csv", "[TYPE] [MASTER] [MT5] [1]\n[STATUS] [ONLINE] [soon]\n");
        f.write("b.csv", "[TYPE] [SLAVE] [MT4] [2]\n[CONFIG] [SLAVE] [DISABLED] [1]\n");
        let report = f.monitor.poll_once_at(at(T0 + 5)).await;
        assert_eq!(report.failures, 1);

        let snapshots = f.monitor.snapshots(API_KEY).await.unwrap();
        assert_eq!(snapshots.len(), 2);
        let master = snapshots.iter().find(|s| s.account_id == "1").unwrap();
        assert_eq!(master.last_seen_at, Some(1756317800));
        let slave = snapshots.iter().find(|s| s.account_id == "2").unwrap();
        assert!(!slave.enabled);
    }

    #[tokio::test]
    async fn test_new_accounts_are_registered_and_auto_linked() {
        let f = fixture(&["m.csv", "s.csv"]);
        f.write("m.csv", "[TYPE] [MASTER] [MT5] [1]\n");
        f.write("s.csv", "[TYPE] [SLAVE] [MT4] [2]\n[CONFIG] [SLAVE] [ENABLED] [1]\n");

        f.monitor.poll_once_at(at(T0)).await;

        let stored = f.registry.load(API_KEY).await.unwrap();
        assert!(stored.master_accounts.contains_key("MT5:1"));
        assert!(stored.slave_accounts.contains_key("MT4:2"));
        assert_eq!(stored.slave_links.get("MT4:2").map(String::as_str), Some("1"));
        assert!(stored.has_run(crate::domain::models::AUTO_LINK_KEY));

        let view = f.monitor.view(API_KEY).await.unwrap();
        assert_eq!(view.slaves.len(), 1);
        assert!(view.unconnected_slaves.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_registry_does_not_stop_the_cycle() {
        let f = fixture(&["a.csv"]);
        f.write("a.csv", "[TYPE] [MASTER] [MT5] [1]\n");
        std::fs::write(f.registry.path_for(API_KEY), "{ broken").unwrap();

        let report = f.monitor.poll_once_at(at(T0)).await;
        assert_eq!(report.snapshots, 1);
        assert_eq!(report.events_published, 0);
        assert!(matches!(
            f.monitor.view(API_KEY).await,
            Err(MonitorError::Registry(RegistryError::Corrupt { .. }))
        ));
        assert_eq!(
            std::fs::read_to_string(f.registry.path_for(API_KEY)).unwrap(),
            "{ broken"
        );

        std::fs::remove_file(f.registry.path_for(API_KEY)).unwrap();
        let report = f.monitor.poll_once_at(at(T0 + 1)).await;
        assert_eq!(report.events_published, 1);
    }

    #[tokio::test]
    async fn test_remove_account() {
        let f = fixture(&["a.csv"]);
        f.write("a.csv", "[TYPE] [MASTER] [MT5] [1]\n");
        f.monitor.poll_once_at(at(T0)).await;
        f.delete("a.csv");

        let key = AccountKey::new(Platform::MT5, "1");
        let view = f.monitor.remove_account(API_KEY, &key).await.unwrap();
        assert!(view.is_empty());
        assert!(f.monitor.snapshots(API_KEY).await.unwrap().is_empty());
        assert!(f.registry.load(API_KEY).await.unwrap().get(&key).is_none());

        assert!(matches!(
            f.monitor.remove_account(API_KEY, &key).await,
            Err(MonitorError::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_merge_folds_later_reads() {
        let f = fixture(&["shared.csv"]);
        f.write("shared.csv", "[TYPE] [MASTER] [MT4] [52381082]\n");
        f.monitor.poll_once_at(at(T0)).await;

        let from = AccountKey::new(Platform::MT4, "52381082");
        let into = AccountKey::new(Platform::MT5, "52381082");
        assert!(matches!(
            f.monitor.merge_accounts(API_KEY, &from, &from).await,
            Err(MonitorError::SelfMerge(_))
        ));

        f.monitor.merge_accounts(API_KEY, &from, &into).await.unwrap();
        f.monitor.poll_once_at(at(T0 + 1)).await;

        let snapshots = f.monitor.snapshots(API_KEY).await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].key(), into);

        let stored = f.registry.load(API_KEY).await.unwrap();
        assert_eq!(stored.resolve_alias(&from), into);
        assert!(stored.get(&from).is_none());
        assert!(stored.get(&into).is_some());
    }

    #[tokio::test]
    async fn test_merge_survives_registry_outage() {
        let f = fixture(&["shared.csv"]);
        f.write("shared.csv", "[TYPE] [MASTER] [MT4] [52381082]\n");
        f.monitor.poll_once_at(at(T0)).await;

        let from = AccountKey::new(Platform::MT4, "52381082");
        let into = AccountKey::new(Platform::MT5, "52381082");
        f.monitor.merge_accounts(API_KEY, &from, &into).await.unwrap();

        let path = f.registry.path_for(API_KEY);
        let good = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, "{ broken").unwrap();
        f.monitor.poll_once_at(at(T0 + 1)).await;

        std::fs::write(&path, good).unwrap();
        f.monitor.poll_once_at(at(T0 + 2)).await;

        let keys: Vec<_> = f
            .monitor
            .snapshots(API_KEY)
            .await
            .unwrap()
            .iter()
            .map(|s| s.key())
            .collect();
        assert_eq!(keys, vec![into.clone()]);

        let stored = f.registry.load(API_KEY).await.unwrap();
        assert!(stored.get(&from).is_none());
        assert!(stored.get(&into).is_some());
    }

    #[tokio::test]
    async fn test_alias_learned_late_drops_merged_away_snapshot() {
        let f = fixture(&["shared.csv"]);
        f.write("shared.csv", "[TYPE] [MASTER] [MT4] [7]\n");
        let path = f.registry.path_for(API_KEY);
        std::fs::write(&path, "{ broken").unwrap();
        f.monitor.poll_once_at(at(T0)).await;

        let from = AccountKey::new(Platform::MT4, "7");
        let into = AccountKey::new(Platform::MT5, "7");
        assert_eq!(f.monitor.snapshots(API_KEY).await.unwrap()[0].key(), from);

        let mut repaired = RegistryEntry::default();
        repaired.aliases.insert(from.to_string(), into.clone());
        f.registry.save(API_KEY, &repaired).await.unwrap();
        f.monitor.poll_once_at(at(T0 + 1)).await;

        let snapshots = f.monitor.snapshots(API_KEY).await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].key(), into);
        assert!(f.registry.load(API_KEY).await.unwrap().get(&from).is_none());
    }

    #[tokio::test]
    async fn test_directory_sources_are_listed_each_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = MockStatusFileSource::new();
        files
            .expect_list()
            .times(2)
            .returning(|dir: &Path, _| vec![dir.join("a.csv")]);
        files
            .expect_read()
            .returning(|_, _| Ok("[TYPE] [SLAVE] [MT4] [5]\n".to_string()));

        let mut config = source(&[]);
        config.directories = vec![PathBuf::from("/terminals")];
        let monitor = AccountMonitor::new(
            vec![config],
            Arc::new(files),
            Arc::new(JsonRegistryStore::new(dir.path())),
            Arc::new(counting_publisher(Arc::new(AtomicUsize::new(0)))),
            settings(),
        );

        monitor.poll_once_at(at(T0)).await;
        let report = monitor.poll_once_at(at(T0)).await;
        assert_eq!(report.files_read, 1);
        assert_eq!(monitor.snapshots(API_KEY).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture(&["a.csv"]);
        f.write("a.csv", "[TYPE] [MASTER] [MT5] [1]\n");
        let monitor = Arc::new(f.monitor);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(monitor.clone().run(rx));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(monitor.snapshots(API_KEY).await.unwrap().len(), 1);
    }
}
