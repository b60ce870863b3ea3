// src/feed.rs
//! Notification feed controller: an incrementally-loaded local cache of
//! the user's notifications with optimistic read-state mutations.
//!
//! Read mutations are eventually consistent by contract: local state is
//! flipped immediately, the backend call is spawned, and a failure is
//! logged but never rolled back.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::core::TaskGuard;
use crate::session::SessionManager;
use crate::types::{Notification, NotificationPage};

/// Backend notification endpoints, behind a trait so the feed can be
/// driven by a scripted fake in tests.
#[async_trait]
pub trait NotificationsApi: Send + Sync {
    async fn list(&self, page: u32, limit: u32) -> Result<NotificationPage>;
    async fn unread_count(&self) -> Result<u64>;
    async fn mark_read(&self, id: u64) -> Result<()>;
    async fn mark_all_read(&self) -> Result<()>;
}

struct FeedState {
    notifications: Vec<Notification>,
    unread_count: u64,
    page: u32,
    has_more: bool,
}

impl Default for FeedState {
    fn default() -> Self {
        Self {
            notifications: Vec::new(),
            unread_count: 0,
            page: 1,
            has_more: true,
        }
    }
}

pub struct NotificationFeed {
    api: Arc<dyn NotificationsApi>,
    page_limit: u32,
    state: Mutex<FeedState>,
    loading: AtomicBool,
    started: AtomicBool,
    /// Bumped by `clear()`; a fetch response whose generation no longer
    /// matches is discarded instead of resurrecting a torn-down feed.
    generation: AtomicU64,
}

impl NotificationFeed {
    pub fn new(api: Arc<dyn NotificationsApi>, page_limit: u32) -> Self {
        Self {
            api,
            page_limit,
            state: Mutex::new(FeedState::default()),
            loading: AtomicBool::new(false),
            started: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.state).notifications.clone()
    }

    pub fn unread_count(&self) -> u64 {
        lock(&self.state).unread_count
    }

    pub fn has_more(&self) -> bool {
        lock(&self.state).has_more
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    /// Fetch the next page (page 1 when `reset`). Returns `Ok(false)`
    /// when another fetch is already in flight; the in-flight flag is
    /// the sole serialization mechanism, overlapping calls are dropped,
    /// never queued. A failed fetch leaves prior state untouched and
    /// clears the flag so a later retry works.
    pub async fn fetch_page(&self, reset: bool) -> Result<bool> {
        if self.loading.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }

        let generation = self.generation.load(Ordering::Acquire);
        let page = if reset { 1 } else { lock(&self.state).page };

        let result = self.api.list(page, self.page_limit).await;
        let outcome = match result {
            Ok(response) => {
                let mut state = lock(&self.state);
                if self.generation.load(Ordering::Acquire) == generation {
                    if page == 1 {
                        state.notifications = response.results;
                    } else {
                        state.notifications.extend(response.results);
                    }
                    state.has_more = response.next;
                    state.page = page + 1;
                    state.unread_count =
                        state.notifications.iter().filter(|n| !n.is_read).count() as u64;
                    debug!(
                        "Fetched notifications page {}, {} total, {} unread",
                        page,
                        state.notifications.len(),
                        state.unread_count
                    );
                    Ok(true)
                } else {
                    debug!("Discarding stale notifications response for page {}", page);
                    Ok(false)
                }
            }
            Err(e) => {
                error!("Failed to fetch notifications page {}: {:#}", page, e);
                Err(e)
            }
        };

        self.loading.store(false, Ordering::Release);
        outcome
    }

    /// Continuation contract for infinite-scroll consumers. Safe to call
    /// repeatedly: a call while a fetch is outstanding, or once the feed
    /// is exhausted, is a no-op.
    pub async fn load_more(&self) -> Result<bool> {
        if self.is_loading() || !self.has_more() {
            return Ok(false);
        }
        self.fetch_page(false).await
    }

    /// First fetch of an authenticated session; subsequent calls are
    /// no-ops until `clear()`. A failed first fetch re-arms the guard so
    /// the load can be retried.
    pub async fn initial_load(&self) -> Result<bool> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        match self.fetch_page(true).await {
            Ok(fetched) => Ok(fetched),
            Err(e) => {
                self.started.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    /// Drop all local feed state, e.g. on logout. In-flight responses
    /// for the old generation are discarded when they arrive.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        *lock(&self.state) = FeedState::default();
        self.started.store(false, Ordering::Release);
    }

    /// Optimistically mark one notification read and decrement the
    /// unread count (floored at zero). The backend call is spawned and
    /// never rolled back. Must run inside a tokio runtime.
    pub fn mark_as_read(&self, id: u64) {
        let mut state = lock(&self.state);
        if let Some(n) = state.notifications.iter_mut().find(|n| n.id == id) {
            if !n.is_read {
                n.is_read = true;
                state.unread_count = state.unread_count.saturating_sub(1);
            }
        }
        drop(state);

        let api = Arc::clone(&self.api);
        tokio::spawn(async move {
            if let Err(e) = api.mark_read(id).await {
                error!("Failed to mark notification {} as read: {:#}", id, e);
            }
        });
    }

    /// Optimistically mark everything read. The backend call is issued
    /// even when the unread count is already zero.
    pub fn mark_all_as_read(&self) {
        let mut state = lock(&self.state);
        for n in state.notifications.iter_mut() {
            n.is_read = true;
        }
        state.unread_count = 0;
        drop(state);

        let api = Arc::clone(&self.api);
        tokio::spawn(async move {
            if let Err(e) = api.mark_all_read().await {
                error!("Failed to mark all notifications as read: {:#}", e);
            }
        });
    }

    /// Long-interval refresh of the unread count from the lightweight
    /// count endpoint. Runs only while the session is authenticated and
    /// exits for good once it no longer is.
    pub fn spawn_unread_resync(
        self: &Arc<Self>,
        session: &Arc<SessionManager>,
        every: Duration,
    ) -> TaskGuard {
        let weak_feed = Arc::downgrade(self);
        let weak_session = Arc::downgrade(session);
        TaskGuard::new(tokio::spawn(async move {
            let mut tick = interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tick.tick().await;
            loop {
                tick.tick().await;
                let (Some(feed), Some(session)) = (weak_feed.upgrade(), weak_session.upgrade())
                else {
                    break;
                };
                if !session.is_authenticated() {
                    break;
                }
                match feed.api.unread_count().await {
                    Ok(count) => {
                        lock(&feed.state).unread_count = count;
                        debug!("Unread count resynced to {}", count);
                    }
                    Err(e) => warn!("Unread count resync failed: {:#}", e),
                }
            }
        }))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{AuthApi, SessionManager};
    use crate::storage::MemoryStore;
    use crate::types::{LoginResponse, NotificationType, Tokens};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn notification(id: u64, is_read: bool) -> Notification {
        Notification {
            id,
            notification_type: NotificationType::JobMatch,
            title: format!("Match {}", id),
            message: "A new job matches your profile".to_string(),
            created_at: "2026-08-01T12:00:00Z".to_string(),
            is_read,
        }
    }

    fn page_of(ids: std::ops::RangeInclusive<u64>, next: bool) -> NotificationPage {
        NotificationPage {
            results: ids.map(|id| notification(id, false)).collect(),
            next,
        }
    }

    #[derive(Default)]
    struct FakeNotificationsApi {
        pages: Vec<NotificationPage>,
        fail_first_list: AtomicBool,
        list_calls: AtomicUsize,
        mark_read_calls: AtomicUsize,
        mark_all_calls: AtomicUsize,
        unread: AtomicU64,
        entered: Option<Arc<Notify>>,
        release: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl NotificationsApi for FakeNotificationsApi {
        async fn list(&self, page: u32, _limit: u32) -> Result<NotificationPage> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(entered) = &self.entered {
                entered.notify_one();
            }
            if let Some(release) = &self.release {
                release.notified().await;
            }
            if self.fail_first_list.swap(false, Ordering::SeqCst) {
                anyhow::bail!("connection refused");
            }
            self.pages
                .get((page - 1) as usize)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no such page: {}", page))
        }

        async fn unread_count(&self) -> Result<u64> {
            Ok(self.unread.load(Ordering::SeqCst))
        }

        async fn mark_read(&self, _id: u64) -> Result<()> {
            self.mark_read_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn mark_all_read(&self) -> Result<()> {
            self.mark_all_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn three_pages() -> Vec<NotificationPage> {
        vec![
            page_of(1..=20, true),
            page_of(21..=40, true),
            page_of(41..=60, false),
        ]
    }

    #[tokio::test]
    async fn test_pagination_accumulates_in_arrival_order() {
        let api = Arc::new(FakeNotificationsApi {
            pages: three_pages(),
            ..Default::default()
        });
        let feed = NotificationFeed::new(api, 20);

        assert!(feed.initial_load().await.unwrap());
        assert!(feed.load_more().await.unwrap());
        assert!(feed.load_more().await.unwrap());

        let notifications = feed.notifications();
        assert_eq!(notifications.len(), 60);
        let ids: Vec<u64> = notifications.iter().map(|n| n.id).collect();
        assert_eq!(ids, (1..=60).collect::<Vec<u64>>());
        assert!(!feed.has_more());
        assert_eq!(feed.unread_count(), 60);

        // Exhausted feed: further calls are no-ops.
        assert!(!feed.load_more().await.unwrap());
    }

    #[tokio::test]
    async fn test_load_more_is_reentrant_safe() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let api = Arc::new(FakeNotificationsApi {
            pages: three_pages(),
            entered: Some(Arc::clone(&entered)),
            release: Some(Arc::clone(&release)),
            ..Default::default()
        });
        let feed = Arc::new(NotificationFeed::new(Arc::clone(&api) as Arc<dyn NotificationsApi>, 20));

        let first = {
            let feed = Arc::clone(&feed);
            tokio::spawn(async move { feed.load_more().await })
        };
        entered.notified().await;

        // Second call while the first is still in flight is dropped.
        assert!(!feed.load_more().await.unwrap());

        release.notify_one();
        assert!(first.await.unwrap().unwrap());
        assert_eq!(api.list_calls.load(Ordering::SeqCst), 1);
        assert_eq!(feed.notifications().len(), 20);
    }

    #[tokio::test]
    async fn test_mark_as_read_is_optimistic() {
        let api = Arc::new(FakeNotificationsApi {
            pages: vec![NotificationPage {
                results: (1..=5).map(|id| notification(id, false)).collect(),
                next: false,
            }],
            ..Default::default()
        });
        let feed = NotificationFeed::new(Arc::clone(&api) as Arc<dyn NotificationsApi>, 20);
        feed.initial_load().await.unwrap();
        assert_eq!(feed.unread_count(), 5);

        // State flips synchronously, before any backend response.
        feed.mark_as_read(3);
        assert_eq!(feed.unread_count(), 4);
        assert!(feed.notifications().iter().find(|n| n.id == 3).unwrap().is_read);

        // Marking an already-read notification does not double-decrement.
        feed.mark_as_read(3);
        assert_eq!(feed.unread_count(), 4);
    }

    #[tokio::test]
    async fn test_mark_all_as_read_always_calls_backend() {
        let api = Arc::new(FakeNotificationsApi {
            pages: vec![NotificationPage {
                results: (1..=3).map(|id| notification(id, true)).collect(),
                next: false,
            }],
            ..Default::default()
        });
        let feed = NotificationFeed::new(Arc::clone(&api) as Arc<dyn NotificationsApi>, 20);
        feed.initial_load().await.unwrap();
        assert_eq!(feed.unread_count(), 0);

        feed.mark_all_as_read();
        assert_eq!(feed.unread_count(), 0);
        assert!(feed.notifications().iter().all(|n| n.is_read));

        // Spawned backend call still goes out despite the zero count.
        tokio::task::yield_now().await;
        assert_eq!(api.mark_all_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_state_and_allows_retry() {
        let api = Arc::new(FakeNotificationsApi {
            pages: three_pages(),
            fail_first_list: AtomicBool::new(true),
            ..Default::default()
        });
        let feed = NotificationFeed::new(Arc::clone(&api) as Arc<dyn NotificationsApi>, 20);

        assert!(feed.initial_load().await.is_err());
        assert!(feed.notifications().is_empty());
        assert!(!feed.is_loading());

        // Retry succeeds once the backend recovers.
        assert!(feed.initial_load().await.unwrap());
        assert_eq!(feed.notifications().len(), 20);
    }

    #[tokio::test]
    async fn test_clear_discards_in_flight_response() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let api = Arc::new(FakeNotificationsApi {
            pages: three_pages(),
            entered: Some(Arc::clone(&entered)),
            release: Some(Arc::clone(&release)),
            ..Default::default()
        });
        let feed = Arc::new(NotificationFeed::new(Arc::clone(&api) as Arc<dyn NotificationsApi>, 20));

        let fetch = {
            let feed = Arc::clone(&feed);
            tokio::spawn(async move { feed.fetch_page(true).await })
        };
        entered.notified().await;
        feed.clear();
        release.notify_one();

        // The response arrived after teardown and must not be applied.
        assert!(!fetch.await.unwrap().unwrap());
        assert!(feed.notifications().is_empty());
        assert_eq!(feed.unread_count(), 0);
    }

    struct StubAuthApi;

    #[async_trait]
    impl AuthApi for StubAuthApi {
        async fn login(&self, _e: &str, _p: &str) -> Result<LoginResponse> {
            anyhow::bail!("not used")
        }
        async fn google_login(&self, _t: &str) -> Result<LoginResponse> {
            anyhow::bail!("not used")
        }
        async fn register(&self, _e: &str, _p: &str) -> Result<LoginResponse> {
            anyhow::bail!("not used")
        }
        async fn logout(&self, _r: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unread_resync_runs_only_while_authenticated() {
        let store = Arc::new(MemoryStore::new());
        let session = Arc::new(SessionManager::new(
            Arc::new(StubAuthApi),
            store,
            Duration::from_secs(3600),
        ));
        session.restore().await;
        session
            .login(
                serde_json::json!({"id": 1}),
                Tokens {
                    access: "a".to_string(),
                    refresh: "r".to_string(),
                },
                None,
            )
            .await
            .unwrap();

        let api = Arc::new(FakeNotificationsApi {
            unread: AtomicU64::new(7),
            ..Default::default()
        });
        let feed = Arc::new(NotificationFeed::new(Arc::clone(&api) as Arc<dyn NotificationsApi>, 20));

        let guard = feed.spawn_unread_resync(&session, Duration::from_secs(1800));
        tokio::time::advance(Duration::from_secs(1801)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(feed.unread_count(), 7);

        session.logout(crate::session::LogoutReason::Manual).await;
        tokio::time::advance(Duration::from_secs(1801)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(guard.is_finished());
    }
}
