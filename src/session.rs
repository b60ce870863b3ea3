// src/session.rs
//! Session lifecycle: who is logged in, with what bearer credential,
//! persisted across restarts and self-invalidating on expiry or
//! prolonged inactivity.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::core::TaskGuard;
use crate::storage::{
    SessionStore, KEY_AUTH_DATA, KEY_REFRESH_TOKEN, KEY_TOKEN, KEY_USER, SESSION_KEYS,
};
use crate::types::{AuthData, LoginResponse, Tokens, UserProfile};

/// Backend authentication endpoints, opaque behind this trait so the
/// session manager can be driven by a fake in tests.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse>;
    async fn google_login(&self, provider_token: &str) -> Result<LoginResponse>;
    async fn register(&self, email: &str, password: &str) -> Result<LoginResponse>;
    async fn logout(&self, refresh_token: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    Manual,
    Expired,
    Inactive,
}

/// Session transitions, broadcast so views can redirect on logout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    LoggedOut(LogoutReason),
}

/// User input events that qualify as activity for the inactivity watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    PointerMove,
    KeyPress,
    Scroll,
    Click,
}

#[derive(Default)]
struct SessionState {
    user: Option<UserProfile>,
    tokens: Option<Tokens>,
    expires_at: Option<i64>,
}

impl SessionState {
    fn is_authenticated(&self, now_ms: i64) -> bool {
        self.user.is_some()
            && self.tokens.is_some()
            && self.expires_at.map_or(false, |ms| ms > now_ms)
    }

    fn clear(&mut self) -> Option<Tokens> {
        self.user = None;
        self.expires_at = None;
        self.tokens.take()
    }
}

pub struct SessionManager {
    api: Arc<dyn AuthApi>,
    store: Arc<dyn SessionStore>,
    session_ttl: Duration,
    state: RwLock<SessionState>,
    is_loading: AtomicBool,
    last_activity: Mutex<Instant>,
    events: broadcast::Sender<SessionEvent>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl SessionManager {
    pub fn new(api: Arc<dyn AuthApi>, store: Arc<dyn SessionStore>, session_ttl: Duration) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            api,
            store,
            session_ttl,
            state: RwLock::new(SessionState::default()),
            is_loading: AtomicBool::new(true),
            last_activity: Mutex::new(Instant::now()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// True only until `restore()` has completed. Views must not render
    /// authenticated-only UI while this is set.
    pub fn is_loading(&self) -> bool {
        self.is_loading.load(Ordering::Acquire)
    }

    pub fn is_authenticated(&self) -> bool {
        read_lock(&self.state).is_authenticated(now_ms())
    }

    /// Whether any session fields are held in memory, expired or not.
    fn has_session(&self) -> bool {
        read_lock(&self.state).tokens.is_some()
    }

    pub fn user(&self) -> Option<UserProfile> {
        read_lock(&self.state).user.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        read_lock(&self.state).tokens.as_ref().map(|t| t.access.clone())
    }

    pub fn expires_at(&self) -> Option<i64> {
        read_lock(&self.state).expires_at
    }

    /// Restore a persisted session at process start. Missing keys,
    /// malformed JSON, or a past expiry all fall back to logged-out and
    /// wipe storage; none of them is an error. Clears `is_loading` on
    /// completion either way.
    pub async fn restore(&self) {
        let restored = self.try_restore().await;
        if !restored {
            write_lock(&self.state).clear();
            self.clear_persisted().await;
        }
        self.is_loading.store(false, Ordering::Release);
    }

    async fn try_restore(&self) -> bool {
        let token = self.read_key(KEY_TOKEN).await;
        let refresh = self.read_key(KEY_REFRESH_TOKEN).await;
        let user_raw = self.read_key(KEY_USER).await;
        let auth_raw = self.read_key(KEY_AUTH_DATA).await;

        let (Some(token), Some(refresh), Some(user_raw), Some(auth_raw)) =
            (token, refresh, user_raw, auth_raw)
        else {
            return false;
        };

        let Ok(user) = serde_json::from_str::<UserProfile>(&user_raw) else {
            warn!("Persisted user profile is unparsable, treating as no session");
            return false;
        };
        let Ok(auth_data) = serde_json::from_str::<AuthData>(&auth_raw) else {
            warn!("Persisted auth data is unparsable, treating as no session");
            return false;
        };

        if auth_data.expires_at <= now_ms() {
            info!("Persisted session has expired");
            return false;
        }

        let mut state = write_lock(&self.state);
        state.user = Some(user);
        state.tokens = Some(Tokens {
            access: token,
            refresh,
        });
        state.expires_at = Some(auth_data.expires_at);
        drop(state);

        self.touch();
        true
    }

    async fn read_key(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to read persisted key {}: {:#}", key, e);
                None
            }
        }
    }

    /// Establish a session from a completed authentication exchange.
    /// Without an explicit expiry the session lasts one TTL from now.
    pub async fn login(
        &self,
        user: UserProfile,
        tokens: Tokens,
        expires_at: Option<i64>,
    ) -> Result<()> {
        let expires_at =
            expires_at.unwrap_or_else(|| now_ms() + self.session_ttl.as_millis() as i64);

        let user_raw = serde_json::to_string(&user).context("Failed to encode user profile")?;
        let auth_raw = serde_json::to_string(&AuthData { expires_at })
            .context("Failed to encode auth data")?;

        self.store.set(KEY_TOKEN, &tokens.access).await?;
        self.store.set(KEY_REFRESH_TOKEN, &tokens.refresh).await?;
        self.store.set(KEY_USER, &user_raw).await?;
        self.store.set(KEY_AUTH_DATA, &auth_raw).await?;

        let mut state = write_lock(&self.state);
        state.user = Some(user);
        state.tokens = Some(tokens);
        state.expires_at = Some(expires_at);
        drop(state);

        self.touch();
        let _ = self.events.send(SessionEvent::LoggedIn);
        Ok(())
    }

    /// Email/password login against the backend, then `login`.
    pub async fn login_with_credentials(&self, email: &str, password: &str) -> Result<()> {
        let response = self
            .api
            .login(email, password)
            .await
            .context("Login failed")?;
        let (user, tokens) = response.into_parts();
        self.login(user, tokens, None).await
    }

    /// Exchange a third-party identity token for a session. On failure
    /// the existing session state, if any, is left untouched.
    pub async fn federated_login(&self, provider_token: &str) -> Result<()> {
        let response = self
            .api
            .google_login(provider_token)
            .await
            .context("Federated login failed")?;
        let (user, tokens) = response.into_parts();
        self.login(user, tokens, None).await
    }

    /// Create an account, then behave as login.
    pub async fn register(&self, email: &str, password: &str) -> Result<()> {
        let response = self
            .api
            .register(email, password)
            .await
            .context("Registration failed")?;
        let (user, tokens) = response.into_parts();
        self.login(user, tokens, None).await
    }

    /// Invalidate the session. Local state and persisted storage are
    /// cleared unconditionally; the backend notification is best-effort
    /// and its failure is only logged. Idempotent: calling this when
    /// already logged out does nothing.
    pub async fn logout(&self, reason: LogoutReason) {
        let tokens = write_lock(&self.state).clear();
        self.clear_persisted().await;

        let Some(tokens) = tokens else {
            return;
        };

        info!("Session ended: {:?}", reason);
        let _ = self.events.send(SessionEvent::LoggedOut(reason));

        if let Err(e) = self.api.logout(&tokens.refresh).await {
            warn!("Backend logout notification failed: {:#}", e);
        }
    }

    async fn clear_persisted(&self) {
        for key in SESSION_KEYS {
            if let Err(e) = self.store.remove(key).await {
                warn!("Failed to clear persisted key {}: {:#}", key, e);
            }
        }
    }

    /// Record a qualifying user input event, resetting the inactivity
    /// window.
    pub fn record_activity(&self, _event: InputEvent) {
        self.touch();
    }

    fn touch(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    fn last_activity_elapsed(&self) -> Duration {
        lock(&self.last_activity).elapsed()
    }

    async fn persisted_expires_at(&self) -> Option<i64> {
        let raw = self.read_key(KEY_AUTH_DATA).await?;
        serde_json::from_str::<AuthData>(&raw)
            .ok()
            .map(|d| d.expires_at)
    }

    /// Periodic check of the persisted expiry against the clock. Fires
    /// `logout(Expired)` once the deadline passes, then exits. The task
    /// holds only a weak reference and dies with the manager.
    pub fn spawn_expiry_check(self: &Arc<Self>, every: Duration) -> TaskGuard {
        let weak = Arc::downgrade(self);
        TaskGuard::new(tokio::spawn(async move {
            let mut tick = interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tick.tick().await;
            loop {
                tick.tick().await;
                let Some(session) = weak.upgrade() else {
                    break;
                };
                if !session.has_session() {
                    break;
                }
                let expired = match session.persisted_expires_at().await {
                    Some(ms) => ms <= now_ms(),
                    // Storage vanished from under us; fall back to memory.
                    None => session.expires_at().map_or(true, |ms| ms <= now_ms()),
                };
                if expired {
                    session.logout(LogoutReason::Expired).await;
                    break;
                }
            }
        }))
    }

    /// Resettable inactivity timer. Every `record_activity` pushes the
    /// deadline out; once it passes with no input, fires
    /// `logout(Inactive)` and exits.
    pub fn spawn_inactivity_watchdog(self: &Arc<Self>, timeout: Duration) -> TaskGuard {
        let weak = Arc::downgrade(self);
        TaskGuard::new(tokio::spawn(async move {
            loop {
                let Some(session) = weak.upgrade() else {
                    break;
                };
                if !session.has_session() {
                    break;
                }
                let elapsed = session.last_activity_elapsed();
                if elapsed >= timeout {
                    session.logout(LogoutReason::Inactive).await;
                    break;
                }
                let remaining = timeout - elapsed;
                drop(session);
                tokio::time::sleep(remaining).await;
            }
        }))
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
