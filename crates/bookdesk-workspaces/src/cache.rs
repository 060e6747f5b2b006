//! Owner-scoped workspace cache.
//!
//! Holds one [`CacheEntry`] for whichever identity the host bound last. Fetch
//! results are committed only if the `(owner_key, epoch)` captured when the
//! fetch started still match at commit time; every rebind bumps the epoch, so
//! results fetched for an earlier binding are dropped even if the same owner
//! was bound again in between.
//!
//! Every change is written through to the record store and published on a
//! [`watch`] channel.

use std::sync::Arc;
use std::time::Duration;

use bookdesk_core::{RecordStore, load_record, save_record};
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::CacheError;
use crate::source::MembershipSource;
use crate::types::{
    CacheEntry, DiscardReason, RefreshOutcome, SkipReason, WorkspaceRecord, WorkspaceSummary,
};

/// Workspace membership cache scoped to the bound identity.
pub struct WorkspaceCache {
    source: Arc<dyn MembershipSource>,
    store: Arc<dyn RecordStore>,
    state: Mutex<CacheState>,
    published: watch::Sender<CacheEntry>,
}

struct CacheState {
    entry: CacheEntry,
    epoch: u64,
}

impl WorkspaceCache {
    /// Create a cache, restoring the entry persisted in `store`.
    pub fn new(source: Arc<dyn MembershipSource>, store: Arc<dyn RecordStore>) -> Self {
        let entry = load_record::<WorkspaceRecord>(store.as_ref())
            .map(|r| r.entry)
            .unwrap_or_default();
        debug!(
            owner = entry.owner_key.as_deref().unwrap_or("-"),
            count = entry.list.len(),
            "workspace cache restored"
        );
        let (published, _) = watch::channel(entry.clone());
        Self {
            source,
            store,
            state: Mutex::new(CacheState { entry, epoch: 0 }),
            published,
        }
    }

    /// Bind the cache to `owner_key` (`None` for signed out).
    ///
    /// Binding the current owner again keeps the entry. Any other key wipes
    /// the list, selection and fetch time. Returns whether the entry was
    /// replaced.
    pub fn bind_to_user(&self, owner_key: Option<&str>) -> bool {
        let mut state = self.state.lock();
        if state.entry.owner_key.as_deref() == owner_key {
            return false;
        }
        state.entry = CacheEntry::bound_to(owner_key);
        state.epoch += 1;
        info!(
            owner = owner_key.unwrap_or("-"),
            epoch = state.epoch,
            "workspace cache rebound"
        );
        self.commit(&state.entry);
        true
    }

    /// Fetch unless the last fetch is younger than `stale_time`.
    ///
    /// An unbound cache never fetches.
    pub async fn refresh_if_stale(
        &self,
        stale_time: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<RefreshOutcome, CacheError> {
        {
            let state = self.state.lock();
            if state.entry.owner_key.is_none() {
                return Ok(RefreshOutcome::Skipped(SkipReason::Unbound));
            }
            if state.entry.is_fresh(stale_time, Utc::now()) {
                debug!("workspace cache fresh, skipping fetch");
                return Ok(RefreshOutcome::Skipped(SkipReason::Fresh));
            }
        }
        self.fetch_and_commit(cancel).await
    }

    /// Fetch regardless of staleness.
    ///
    /// Used after a mutation known to change the membership list.
    pub async fn hard_refresh(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<RefreshOutcome, CacheError> {
        self.fetch_and_commit(cancel).await
    }

    /// Select a workspace without checking it is in the list.
    ///
    /// The next successful fetch repairs a selection that does not resolve.
    pub fn set_current(&self, id: Option<&str>) {
        let mut state = self.state.lock();
        if state.entry.current_id.as_deref() == id {
            return;
        }
        state.entry.current_id = id.map(str::to_string);
        debug!(current = id.unwrap_or("-"), "workspace selected");
        self.commit(&state.entry);
    }

    /// Copy of the current entry.
    pub fn snapshot(&self) -> CacheEntry {
        self.state.lock().entry.clone()
    }

    /// The selected workspace, if it resolves against the list.
    pub fn current(&self) -> Option<WorkspaceSummary> {
        self.state.lock().entry.current().cloned()
    }

    /// Bound owner.
    pub fn owner_key(&self) -> Option<String> {
        self.state.lock().entry.owner_key.clone()
    }

    /// Receive every committed entry.
    pub fn subscribe(&self) -> watch::Receiver<CacheEntry> {
        self.published.subscribe()
    }

    #[tracing::instrument(skip_all)]
    async fn fetch_and_commit(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<RefreshOutcome, CacheError> {
        let (owner, epoch) = {
            let state = self.state.lock();
            let Some(owner) = state.entry.owner_key.clone() else {
                return Ok(RefreshOutcome::Skipped(SkipReason::Unbound));
            };
            (owner, state.epoch)
        };

        let fetched = match cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => {
                    debug!(owner = %owner, "workspace fetch cancelled");
                    return Ok(RefreshOutcome::Discarded(DiscardReason::Cancelled));
                }
                result = self.source.fetch_memberships(&owner) => result,
            },
            None => self.source.fetch_memberships(&owner).await,
        };

        let mut state = self.state.lock();
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            debug!(owner = %owner, "workspace fetch cancelled, discarding result");
            return Ok(RefreshOutcome::Discarded(DiscardReason::Cancelled));
        }
        if state.epoch != epoch || state.entry.owner_key.as_deref() != Some(owner.as_str()) {
            debug!(
                owner = %owner,
                epoch,
                current_epoch = state.epoch,
                "cache rebound during fetch, discarding result"
            );
            return Ok(RefreshOutcome::Discarded(DiscardReason::Rebound));
        }

        let list = fetched?;
        state.entry.list = list;
        state.entry.last_fetched_at = Some(Utc::now());
        state.entry.repair_selection();
        debug!(
            owner = %owner,
            count = state.entry.list.len(),
            current = state.entry.current_id.as_deref().unwrap_or("-"),
            "workspace list committed"
        );
        self.commit(&state.entry);
        Ok(RefreshOutcome::Fetched)
    }

    /// Persist and publish. Called with the state lock held.
    fn commit(&self, entry: &CacheEntry) {
        if let Err(e) = save_record(self.store.as_ref(), &WorkspaceRecord::from(entry)) {
            warn!("failed to persist workspace cache: {e}");
        }
        let _ = self.published.send_replace(entry.clone());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use bookdesk_auth::AuthError;
    use bookdesk_core::MemoryRecordStore;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// Per-owner lists, optionally held until released.
    #[derive(Default)]
    struct ScriptedSource {
        lists: Mutex<HashMap<String, Vec<WorkspaceSummary>>>,
        fail: Mutex<bool>,
        gate: Option<Semaphore>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn with(owner: &str, ids: &[&str]) -> Self {
            let source = Self::default();
            source.set(owner, ids);
            source
        }

        fn gated(mut self) -> Self {
            self.gate = Some(Semaphore::new(0));
            self
        }

        fn set(&self, owner: &str, ids: &[&str]) {
            let list = ids
                .iter()
                .map(|id| WorkspaceSummary::new(*id, id.to_uppercase()))
                .collect();
            let _ = self.lists.lock().insert(owner.to_string(), list);
        }

        fn release(&self) {
            if let Some(gate) = &self.gate {
                gate.add_permits(1);
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MembershipSource for ScriptedSource {
        async fn fetch_memberships(
            &self,
            owner_key: &str,
        ) -> Result<Vec<WorkspaceSummary>, CacheError> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if *self.fail.lock() {
                return Err(AuthError::AuthFailed("refresh rejected".into()).into());
            }
            Ok(self.lists.lock().get(owner_key).cloned().unwrap_or_default())
        }
    }

    fn cache_with(source: &Arc<ScriptedSource>) -> (WorkspaceCache, Arc<MemoryRecordStore>) {
        let store = Arc::new(MemoryRecordStore::new());
        (WorkspaceCache::new(source.clone(), store.clone()), store)
    }

    fn seeded(
        source: &Arc<ScriptedSource>,
        entry: &CacheEntry,
    ) -> (WorkspaceCache, Arc<MemoryRecordStore>) {
        let store = Arc::new(MemoryRecordStore::new());
        save_record(store.as_ref(), &WorkspaceRecord::from(entry)).unwrap();
        (WorkspaceCache::new(source.clone(), store.clone()), store)
    }

    fn ids(entry: &CacheEntry) -> Vec<&str> {
        entry.list.iter().map(|w| w.id.as_str()).collect()
    }

    const STALE: Duration = Duration::from_secs(60);

    // ── bind_to_user ─────────────────────────────────────────────────

    #[tokio::test]
    async fn rebind_same_owner_keeps_entry() {
        let source = Arc::new(ScriptedSource::with("a", &["x", "y"]));
        let (cache, _) = cache_with(&source);
        assert!(cache.bind_to_user(Some("a")));
        let _ = cache.hard_refresh(None).await.unwrap();

        assert!(!cache.bind_to_user(Some("a")));
        assert_eq!(ids(&cache.snapshot()), vec!["x", "y"]);
        assert!(cache.snapshot().last_fetched_at.is_some());
    }

    #[tokio::test]
    async fn rebind_other_owner_wipes_entry() {
        let source = Arc::new(ScriptedSource::with("a", &["x", "y"]));
        let (cache, store) = cache_with(&source);
        let _ = cache.bind_to_user(Some("a"));
        let _ = cache.hard_refresh(None).await.unwrap();

        assert!(cache.bind_to_user(Some("b")));
        assert_eq!(cache.snapshot(), CacheEntry::bound_to(Some("b")));

        let persisted = load_record::<WorkspaceRecord>(store.as_ref()).unwrap();
        assert_eq!(persisted.entry, CacheEntry::bound_to(Some("b")));

        assert!(cache.bind_to_user(None));
        assert_eq!(cache.snapshot(), CacheEntry::default());
    }

    // ── refresh_if_stale ─────────────────────────────────────────────

    #[tokio::test]
    async fn unbound_cache_never_fetches() {
        let source = Arc::new(ScriptedSource::default());
        let (cache, store) = cache_with(&source);

        let outcome = cache.refresh_if_stale(STALE, None).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Skipped(SkipReason::Unbound));
        let outcome = cache.hard_refresh(None).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Skipped(SkipReason::Unbound));
        assert_eq!(source.calls(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn fresh_entry_skips_fetch() {
        let source = Arc::new(ScriptedSource::with("a", &["x"]));
        let entry = CacheEntry {
            last_fetched_at: Some(Utc::now() - chrono::Duration::seconds(1)),
            ..CacheEntry::bound_to(Some("a"))
        };
        let (cache, _) = seeded(&source, &entry);

        let outcome = cache.refresh_if_stale(STALE, None).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Skipped(SkipReason::Fresh));
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn stale_entry_fetches_once() {
        let source = Arc::new(ScriptedSource::with("a", &["x"]));
        let before = Utc::now() - chrono::Duration::seconds(120);
        let entry = CacheEntry {
            last_fetched_at: Some(before),
            ..CacheEntry::bound_to(Some("a"))
        };
        let (cache, _) = seeded(&source, &entry);

        let outcome = cache.refresh_if_stale(STALE, None).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Fetched);
        assert_eq!(source.calls(), 1);
        let snapshot = cache.snapshot();
        assert!(snapshot.last_fetched_at.unwrap() > before);

        // Now fresh
        let outcome = cache.refresh_if_stale(STALE, None).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Skipped(SkipReason::Fresh));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn future_fetch_time_is_refetched() {
        let source = Arc::new(ScriptedSource::with("a", &["x"]));
        let skewed = Utc::now() + chrono::Duration::days(365);
        let entry = CacheEntry {
            last_fetched_at: Some(skewed),
            ..CacheEntry::bound_to(Some("a"))
        };
        let (cache, _) = seeded(&source, &entry);

        let outcome = cache.refresh_if_stale(STALE, None).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Fetched);
        assert_eq!(source.calls(), 1);
        assert!(cache.snapshot().last_fetched_at.unwrap() < skewed);
    }

    #[tokio::test]
    async fn never_fetched_entry_is_stale() {
        let source = Arc::new(ScriptedSource::with("a", &["x"]));
        let (cache, _) = cache_with(&source);
        let _ = cache.bind_to_user(Some("a"));

        let outcome = cache.refresh_if_stale(STALE, None).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Fetched);
        assert_eq!(cache.current(), Some(WorkspaceSummary::new("x", "X")));
    }

    // ── selection repair ─────────────────────────────────────────────

    #[tokio::test]
    async fn unknown_selection_repaired_to_first() {
        let source = Arc::new(ScriptedSource::with("a", &["x", "y"]));
        let entry = CacheEntry {
            current_id: Some("z".into()),
            list: vec![WorkspaceSummary::new("x", "X"), WorkspaceSummary::new("y", "Y")],
            ..CacheEntry::bound_to(Some("a"))
        };
        let (cache, _) = seeded(&source, &entry);

        let _ = cache.hard_refresh(None).await.unwrap();
        assert_eq!(cache.snapshot().current_id.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn set_current_defers_validation() {
        let source = Arc::new(ScriptedSource::with("a", &["x"]));
        let (cache, _) = cache_with(&source);
        let _ = cache.bind_to_user(Some("a"));
        let _ = cache.hard_refresh(None).await.unwrap();

        cache.set_current(Some("new"));
        assert_eq!(cache.snapshot().current_id.as_deref(), Some("new"));
        assert_eq!(cache.current(), None);

        // The selected workspace now exists server-side
        source.set("a", &["x", "new"]);
        let _ = cache.hard_refresh(None).await.unwrap();
        assert_eq!(cache.current(), Some(WorkspaceSummary::new("new", "NEW")));
    }

    #[tokio::test]
    async fn empty_fetch_clears_selection() {
        let source = Arc::new(ScriptedSource::with("a", &[]));
        let (cache, _) = cache_with(&source);
        let _ = cache.bind_to_user(Some("a"));
        cache.set_current(Some("x"));

        let _ = cache.hard_refresh(None).await.unwrap();
        let snapshot = cache.snapshot();
        assert!(snapshot.list.is_empty());
        assert_eq!(snapshot.current_id, None);
        assert!(snapshot.last_fetched_at.is_some());
    }

    // ── races ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn fetch_in_flight_across_rebind_is_discarded() {
        let source = Arc::new(ScriptedSource::with("a", &["x", "y"]).gated());
        let cache = Arc::new(cache_with(&source).0);
        let _ = cache.bind_to_user(Some("a"));

        let fetch = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.hard_refresh(None).await })
        };
        while source.calls() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(cache.bind_to_user(Some("b")));
        let snapshot = cache.snapshot();
        assert!(snapshot.list.is_empty());
        assert_eq!(snapshot.current_id, None);

        source.release();
        let outcome = fetch.await.unwrap().unwrap();
        assert_eq!(outcome, RefreshOutcome::Discarded(DiscardReason::Rebound));
        assert_eq!(cache.snapshot(), CacheEntry::bound_to(Some("b")));
    }

    #[tokio::test]
    async fn fetch_across_rebind_to_same_owner_is_discarded() {
        let source = Arc::new(ScriptedSource::with("a", &["x"]).gated());
        let cache = Arc::new(cache_with(&source).0);
        let _ = cache.bind_to_user(Some("a"));

        let fetch = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.hard_refresh(None).await })
        };
        while source.calls() == 0 {
            tokio::task::yield_now().await;
        }

        // a -> signed out -> a again while the first fetch is still running
        let _ = cache.bind_to_user(None);
        let _ = cache.bind_to_user(Some("a"));

        source.release();
        let outcome = fetch.await.unwrap().unwrap();
        assert_eq!(outcome, RefreshOutcome::Discarded(DiscardReason::Rebound));
        assert!(cache.snapshot().list.is_empty());
    }

    #[tokio::test]
    async fn cancelled_fetch_leaves_entry_untouched() {
        let source = Arc::new(ScriptedSource::with("a", &["x"]).gated());
        let (cache, store) = cache_with(&source);
        let _ = cache.bind_to_user(Some("a"));
        let before = cache.snapshot();

        let token = CancellationToken::new();
        let child = token.clone();
        let cancel = async move {
            while source.calls() == 0 {
                tokio::task::yield_now().await;
            }
            child.cancel();
        };
        let (outcome, ()) = tokio::join!(cache.hard_refresh(Some(&token)), cancel);

        assert_eq!(
            outcome.unwrap(),
            RefreshOutcome::Discarded(DiscardReason::Cancelled)
        );
        assert_eq!(cache.snapshot(), before);
        let persisted = load_record::<WorkspaceRecord>(store.as_ref()).unwrap();
        assert_eq!(persisted.entry, before);
    }

    #[tokio::test]
    async fn already_cancelled_token_never_commits() {
        let source = Arc::new(ScriptedSource::with("a", &["x"]));
        let (cache, _) = cache_with(&source);
        let _ = cache.bind_to_user(Some("a"));

        let token = CancellationToken::new();
        token.cancel();
        let outcome = cache.refresh_if_stale(STALE, Some(&token)).await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Discarded(DiscardReason::Cancelled));
        assert!(cache.snapshot().last_fetched_at.is_none());
    }

    // ── errors / persistence / subscription ─────────────────────────

    #[tokio::test]
    async fn fetch_error_leaves_entry_untouched() {
        let source = Arc::new(ScriptedSource::with("a", &["x"]));
        let (cache, _) = cache_with(&source);
        let _ = cache.bind_to_user(Some("a"));
        *source.fail.lock() = true;

        let err = cache.hard_refresh(None).await.unwrap_err();
        assert_matches!(err, CacheError::Fetch(AuthError::AuthFailed(_)));
        assert_eq!(cache.snapshot(), CacheEntry::bound_to(Some("a")));
    }

    #[tokio::test]
    async fn entry_survives_restart() {
        let source = Arc::new(ScriptedSource::with("a", &["x", "y"]));
        let (cache, store) = cache_with(&source);
        let _ = cache.bind_to_user(Some("a"));
        let _ = cache.hard_refresh(None).await.unwrap();
        cache.set_current(Some("y"));
        let expected = cache.snapshot();
        drop(cache);

        let restored = WorkspaceCache::new(source.clone(), store);
        assert_eq!(restored.snapshot(), expected);
        assert_eq!(restored.owner_key().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn subscribers_see_commits() {
        let source = Arc::new(ScriptedSource::with("a", &["x"]));
        let (cache, _) = cache_with(&source);
        let mut rx = cache.subscribe();

        let _ = cache.bind_to_user(Some("a"));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().owner_key.as_deref(), Some("a"));

        let _ = cache.hard_refresh(None).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().current_id.as_deref(), Some("x"));
    }
}
