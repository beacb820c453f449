//! In-memory identity provider
//!
//! Keeps accounts and the current session in process memory and pushes
//! session changes to registered listeners. Intended for tests and
//! single-process use; it also exposes knobs to script delivery order
//! (held queries and calls, muted or deferred notifications, injected failures).

use super::{IdentityProvider, SessionHandler, SubscriptionHandle};
use crate::error::{Result, SessionError};
use crate::types::{AuthChangeEvent, Session, SessionChange, User};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// Configuration for `MemoryIdentityProvider`
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Sign-ups are confirmed (and signed in) immediately
    pub auto_confirm: bool,

    /// Deliver notifications from a spawned task after the call settles,
    /// instead of before it returns
    pub deferred_notifications: bool,

    /// Lifetime of issued sessions
    pub session_ttl_secs: i64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            auto_confirm: false,
            deferred_notifications: false,
            session_ttl_secs: 3600,
        }
    }
}

/// Provider operation, used to inject failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderOp {
    GetSession,
    SignUp,
    SignIn,
    SignOut,
    Subscribe,
}

struct Account {
    user: User,
    password: String,
    confirmed: bool,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<String, Account>,
    session: Option<Session>,
    listeners: Vec<(String, SessionHandler)>,
    registrations: usize,
    releases: usize,
    muted: bool,
    failures: HashMap<ProviderOp, String>,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

fn deliver(inner: &Mutex<Inner>, change: SessionChange) {
    let handlers: Vec<SessionHandler> = lock(inner)
        .listeners
        .iter()
        .map(|(_, h)| h.clone())
        .collect();

    tracing::debug!(
        event = ?change.event,
        listeners = handlers.len(),
        "Delivering session change"
    );

    for handler in handlers {
        handler(change.clone());
    }
}

/// In-memory identity provider
pub struct MemoryIdentityProvider {
    inner: Arc<Mutex<Inner>>,
    config: MemoryConfig,
    /// `true` while `get_session` calls are held
    query_gate: watch::Sender<bool>,
    /// `true` while sign-up/sign-in/sign-out calls are held
    call_gate: watch::Sender<bool>,
}

impl Default for MemoryIdentityProvider {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

impl MemoryIdentityProvider {
    /// Create an empty provider
    pub fn new(config: MemoryConfig) -> Self {
        let (query_gate, _) = watch::channel(false);
        let (call_gate, _) = watch::channel(false);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            config,
            query_gate,
            call_gate,
        }
    }

    /// Builder form of `add_account`
    pub fn with_account(self, email: &str, password: &str) -> Self {
        self.add_account(email, password);
        self
    }

    /// Register a confirmed account and return its user
    pub fn add_account(&self, email: &str, password: &str) -> User {
        let user = User::new(format!("usr-{}", uuid::Uuid::new_v4()), email);
        lock(&self.inner).accounts.insert(
            email.to_string(),
            Account {
                user: user.clone(),
                password: password.to_string(),
                confirmed: true,
            },
        );
        user
    }

    /// Mark a pending sign-up as confirmed. Returns false for unknown emails.
    pub fn confirm(&self, email: &str) -> bool {
        match lock(&self.inner).accounts.get_mut(email) {
            Some(account) => {
                account.confirmed = true;
                true
            }
            None => false,
        }
    }

    /// Replace the stored session without notifying listeners
    pub fn set_session(&self, session: Option<Session>) {
        lock(&self.inner).session = session;
    }

    /// The stored session, expired or not
    pub fn current_session(&self) -> Option<Session> {
        lock(&self.inner).session.clone()
    }

    /// Push a change to every listener right now, regardless of `set_muted`
    pub fn emit(&self, change: SessionChange) {
        deliver(&self.inner, change);
    }

    /// Suppress notifications produced by sign-in/sign-up/sign-out
    pub fn set_muted(&self, muted: bool) {
        lock(&self.inner).muted = muted;
    }

    /// Make `get_session` wait until `release_session_queries` is called.
    ///
    /// A held query returns the session stored when it was issued.
    pub fn hold_session_queries(&self) {
        self.query_gate.send_replace(true);
    }

    /// Let held `get_session` calls resolve
    pub fn release_session_queries(&self) {
        self.query_gate.send_replace(false);
    }

    /// Make sign-up, sign-in and sign-out wait until `release_calls` is called
    pub fn hold_calls(&self) {
        self.call_gate.send_replace(true);
    }

    /// Let held sign-up/sign-in/sign-out calls proceed
    pub fn release_calls(&self) {
        self.call_gate.send_replace(false);
    }

    /// Make the next call of `op` fail with `message`
    pub fn fail_next(&self, op: ProviderOp, message: impl Into<String>) {
        lock(&self.inner).failures.insert(op, message.into());
    }

    /// Currently registered listeners
    pub fn listener_count(&self) -> usize {
        lock(&self.inner).listeners.len()
    }

    /// Total successful `on_session_change` registrations
    pub fn registration_count(&self) -> usize {
        lock(&self.inner).registrations
    }

    /// Total releases of known handles
    pub fn release_count(&self) -> usize {
        lock(&self.inner).releases
    }

    async fn wait_released(gate: &watch::Sender<bool>) -> Result<()> {
        let mut rx = gate.subscribe();
        rx.wait_for(|held| !*held)
            .await
            .map(|_| ())
            .map_err(|_| SessionError::Provider("provider gate closed".to_string()))
    }

    fn take_failure(&self, op: ProviderOp) -> Option<String> {
        lock(&self.inner).failures.remove(&op)
    }

    fn issue_session(&self, user: &User) -> Session {
        let mut raw = Vec::with_capacity(32);
        raw.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
        raw.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
        Session::new(URL_SAFE_NO_PAD.encode(raw), user.clone())
            .with_expiry(Utc::now() + Duration::seconds(self.config.session_ttl_secs))
    }

    fn notify(&self, change: SessionChange) {
        if lock(&self.inner).muted {
            tracing::debug!(event = ?change.event, "Session change muted");
            return;
        }

        if self.config.deferred_notifications {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                deliver(&inner, change);
            });
        } else {
            deliver(&self.inner, change);
        }
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn get_session(&self) -> Result<Option<Session>> {
        if let Some(message) = self.take_failure(ProviderOp::GetSession) {
            return Err(SessionError::Provider(message));
        }

        let snapshot = lock(&self.inner)
            .session
            .clone()
            .filter(|s| !s.is_expired_at(Utc::now()));

        Self::wait_released(&self.query_gate).await?;
        Ok(snapshot)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<()> {
        Self::wait_released(&self.call_gate).await?;
        if let Some(message) = self.take_failure(ProviderOp::SignUp) {
            return Err(SessionError::auth(message));
        }

        let session = {
            let mut inner = lock(&self.inner);
            if inner.accounts.contains_key(email) {
                return Err(SessionError::auth("User already registered"));
            }

            let user = User::new(format!("usr-{}", uuid::Uuid::new_v4()), email);
            inner.accounts.insert(
                email.to_string(),
                Account {
                    user: user.clone(),
                    password: password.to_string(),
                    confirmed: self.config.auto_confirm,
                },
            );

            if self.config.auto_confirm {
                let session = self.issue_session(&user);
                inner.session = Some(session.clone());
                Some(session)
            } else {
                None
            }
        };

        tracing::info!(email, confirmed = session.is_some(), "Account registered");

        if let Some(session) = session {
            self.notify(SessionChange::new(AuthChangeEvent::SignedIn, Some(session)));
        }
        Ok(())
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<()> {
        Self::wait_released(&self.call_gate).await?;
        if let Some(message) = self.take_failure(ProviderOp::SignIn) {
            return Err(SessionError::auth(message));
        }

        let session = {
            let mut inner = lock(&self.inner);
            let user = match inner.accounts.get(email) {
                Some(account) if account.password == password => {
                    if !account.confirmed {
                        return Err(SessionError::auth("Email not confirmed"));
                    }
                    account.user.clone()
                }
                _ => return Err(SessionError::auth("Invalid login credentials")),
            };

            let session = self.issue_session(&user);
            inner.session = Some(session.clone());
            session
        };

        self.notify(SessionChange::new(AuthChangeEvent::SignedIn, Some(session)));
        Ok(())
    }

    async fn sign_out(&self) -> Result<()> {
        Self::wait_released(&self.call_gate).await?;
        if let Some(message) = self.take_failure(ProviderOp::SignOut) {
            return Err(SessionError::Provider(message));
        }

        lock(&self.inner).session = None;
        self.notify(SessionChange::new(AuthChangeEvent::SignedOut, None));
        Ok(())
    }

    fn on_session_change(&self, handler: SessionHandler) -> Result<SubscriptionHandle> {
        if let Some(reason) = self.take_failure(ProviderOp::Subscribe) {
            return Err(SessionError::Subscribe {
                provider: self.name().to_string(),
                reason,
            });
        }

        let id = format!("sub-{}", uuid::Uuid::new_v4());
        let mut inner = lock(&self.inner);
        inner.listeners.push((id.clone(), handler));
        inner.registrations += 1;
        Ok(SubscriptionHandle::new(id))
    }

    fn release_subscription(&self, handle: SubscriptionHandle) {
        let mut inner = lock(&self.inner);
        let before = inner.listeners.len();
        inner.listeners.retain(|(id, _)| id != handle.id());
        if inner.listeners.len() < before {
            inner.releases += 1;
        } else {
            tracing::warn!(subscription = %handle, "Released unknown subscription");
        }
    }

    fn name(&self) -> &str {
        "memory"
    }
}
