//! # a3s-session
//!
//! Session-state synchronization between a view and a pluggable identity provider.
//!
//! ## Overview
//!
//! `a3s-session` keeps a view's "who is signed in" projection consistent with
//! an external identity provider. It bootstraps the current session once,
//! follows the provider's session-change notifications, and opens the default
//! view when a session appears. Swap identity backends without changing the
//! view code.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use a3s_session::{MemoryIdentityProvider, RecordingNavigator, SessionSynchronizer};
//!
//! # async fn example() -> a3s_session::Result<()> {
//! let provider = Arc::new(MemoryIdentityProvider::default().with_account("a@b.com", "secret"));
//! let navigator = Arc::new(RecordingNavigator::new());
//!
//! let sync = SessionSynchronizer::new(provider, navigator.clone());
//! sync.activate()?;
//!
//! sync.sign_in("a@b.com", "secret").await?;
//! assert_eq!(sync.current_user_label().as_deref(), Some("a@b.com"));
//! assert_eq!(navigator.visits(), vec!["/"]);
//!
//! sync.sign_out().await;
//! sync.deactivate();
//! # Ok(())
//! # }
//! ```
//!
//! ## Providers
//!
//! - **memory**: In-memory provider for testing and single-process use
//!
//! ## Architecture
//!
//! - **IdentityProvider** trait: core abstraction all identity backends implement
//! - **SessionSynchronizer**: lifecycle, epoch guard, commands
//! - **Navigator** trait: injected routing capability
//! - **SyncState**: the projection the view renders

pub mod config;
pub mod error;
pub mod navigation;
pub mod provider;
pub mod synchronizer;
pub mod types;

// Re-export core types
pub use config::SyncConfig;
pub use error::{Result, SessionError};
pub use navigation::{Navigator, RecordingNavigator};
pub use provider::{IdentityProvider, SessionHandler, SubscriptionHandle};
pub use synchronizer::SessionSynchronizer;
pub use types::{
    AuthChangeEvent, Credentials, Session, SessionChange, SignUpOutcome, SyncState, User,
};

// Re-export providers for convenience
pub use provider::memory::{MemoryConfig, MemoryIdentityProvider, ProviderOp};
