//! Identity provider trait: the core abstraction for auth backends
//!
//! Any identity service (hosted auth, OIDC client, in-memory, etc.) implements
//! `IdentityProvider` to give the synchronizer a uniform API for the session
//! bootstrap, password auth, and session-change notifications.

use crate::error::Result;
use crate::types::SessionChange;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

pub mod memory;

/// Callback invoked by the provider for every session change
///
/// Providers may call it from any thread, and may call it while one of their
/// own async methods is still pending.
pub type SessionHandler = Arc<dyn Fn(SessionChange) + Send + Sync>;

/// Core trait for identity backends
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Fetch the current session, `None` when signed out
    async fn get_session(&self) -> Result<Option<crate::types::Session>>;

    /// Register a new account. The provider sends the confirmation email.
    async fn sign_up(&self, email: &str, password: &str) -> Result<()>;

    /// Password sign-in. The new session is announced through the change
    /// notification, not through the return value.
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<()>;

    /// Sign out. Succeeds when already signed out.
    async fn sign_out(&self) -> Result<()>;

    /// Register a listener for session changes
    ///
    /// Returns a handle that must be passed back to `release_subscription`.
    fn on_session_change(&self, handler: SessionHandler) -> Result<SubscriptionHandle>;

    /// Unregister a listener. Consumes the handle, so a handle is released at
    /// most once.
    fn release_subscription(&self, handle: SubscriptionHandle);

    /// Provider name (e.g., "memory", "supabase")
    fn name(&self) -> &str;
}

/// Registration token returned by `on_session_change`
///
/// Deliberately not `Clone`: ownership of the handle is ownership of the
/// registration.
#[derive(PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: String,
}

impl SubscriptionHandle {
    /// Wrap a provider-assigned registration id
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Provider-assigned registration id
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SubscriptionHandle").field(&self.id).finish()
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
