//! Session synchronizer: keeps a view's auth state in step with the provider
//!
//! `SessionSynchronizer` owns a single `SyncState` cell and feeds it from two
//! sources: a one-shot bootstrap query issued on `activate`, and the
//! provider's session-change notifications. Commands (`sign_in`, `sign_up`,
//! `sign_out`) update the same cell.
//!
//! Every asynchronous continuation is tagged with the epoch current when it
//! was issued. `activate` and `deactivate` both advance the epoch, so results
//! that land after a teardown are dropped. The bootstrap result is further
//! tagged with the observation sequence at issue time and is dropped if any
//! notification (or local sign-out) was applied in the meantime.

use crate::config::SyncConfig;
use crate::error::{Result, SessionError};
use crate::navigation::Navigator;
use crate::provider::{IdentityProvider, SessionHandler, SubscriptionHandle};
use crate::types::{Credentials, Session, SessionChange, SignUpOutcome, SyncState};
use futures::future::{self, BoxFuture, FutureExt};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;

/// Where an observation came from
#[derive(Debug, Clone, Copy)]
enum Origin {
    /// Bootstrap query, issued when the observation sequence was `since`
    Bootstrap { since: u64 },
    /// Provider-pushed notification
    Notification,
    /// Settled local sign-out
    SignOut,
}

/// Releases the provider registration when dropped
struct SubscriptionGuard {
    provider: Arc<dyn IdentityProvider>,
    handle: Option<SubscriptionHandle>,
}

impl SubscriptionGuard {
    fn new(provider: Arc<dyn IdentityProvider>, handle: SubscriptionHandle) -> Self {
        Self {
            provider,
            handle: Some(handle),
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::debug!(
                provider = %self.provider.name(),
                subscription = %handle,
                "Releasing session subscription"
            );
            self.provider.release_subscription(handle);
        }
    }
}

/// Resources held between `activate` and `deactivate`
struct Activation {
    epoch: u64,
    subscription: Option<SubscriptionGuard>,
    bootstrap: Option<JoinHandle<()>>,
}

impl Activation {
    fn teardown(mut self) {
        if let Some(task) = self.bootstrap.take() {
            task.abort();
        }
        // Dropping the guard releases the registration.
        self.subscription.take();
    }
}

struct Cell {
    state: SyncState,
    epoch: u64,
    /// Bumped by every applied notification and local sign-out
    observed: u64,
    activation: Option<Activation>,
}

struct Shared {
    provider: Arc<dyn IdentityProvider>,
    navigator: Arc<dyn Navigator>,
    config: SyncConfig,
    cell: Mutex<Cell>,
    tx: watch::Sender<SyncState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Cell> {
        self.cell.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &SyncState) {
        self.tx.send_if_modified(|current| {
            if current == state {
                false
            } else {
                *current = state.clone();
                true
            }
        });
    }

    /// Apply a session observation. Returns true when it was applied.
    fn observe(&self, epoch: u64, origin: Origin, session: Option<&Session>) -> bool {
        let navigate = {
            let mut cell = self.lock();
            if cell.epoch != epoch {
                tracing::debug!(
                    origin = ?origin,
                    issued = epoch,
                    current = cell.epoch,
                    "Discarding session observation from a previous epoch"
                );
                return false;
            }

            match origin {
                Origin::Bootstrap { since } if cell.observed != since => {
                    tracing::debug!(
                        since,
                        observed = cell.observed,
                        "Discarding bootstrap result superseded by a newer observation"
                    );
                    return false;
                }
                Origin::Bootstrap { .. } => {}
                Origin::Notification | Origin::SignOut => cell.observed += 1,
            }

            let was_signed_in = cell.state.current_user_label.is_some();
            cell.state.current_user_label = session.map(|s| s.label().to_string());
            cell.state.session_known = true;
            self.publish(&cell.state);

            tracing::debug!(
                origin = ?origin,
                epoch,
                label = ?cell.state.current_user_label,
                "Session observation applied"
            );

            session.is_some() && !was_signed_in
        };

        if navigate {
            tracing::info!(
                route = %self.config.default_route,
                "Session present, opening default view"
            );
            self.navigator.navigate(&self.config.default_route);
        }
        true
    }

    fn complete_bootstrap(&self, epoch: u64, since: u64, result: Result<Option<Session>>) {
        let session = match result {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(
                    provider = %self.provider.name(),
                    error = %e,
                    "Session bootstrap failed, treating as signed out"
                );
                None
            }
        };
        self.observe(epoch, Origin::Bootstrap { since }, session.as_ref());
    }

    /// Mark a command in flight. Returns the epoch to tag its completion with.
    fn begin_busy(&self) -> Result<u64> {
        let mut cell = self.lock();
        if cell.state.is_busy {
            return Err(SessionError::Busy);
        }
        cell.state.is_busy = true;
        cell.state.last_error = None;
        cell.state.notice = None;
        self.publish(&cell.state);
        Ok(cell.epoch)
    }

    fn finish_busy(&self, epoch: u64, error: Option<String>, notice: Option<String>) {
        let mut cell = self.lock();
        if cell.epoch != epoch {
            tracing::debug!(
                issued = epoch,
                current = cell.epoch,
                "Discarding stale command result"
            );
            return;
        }
        cell.state.is_busy = false;
        cell.state.last_error = error;
        if notice.is_some() {
            cell.state.notice = notice;
        }
        self.publish(&cell.state);
    }
}

/// Holds the busy flag for one command
///
/// Dropping it unsettled (the command future was cancelled) clears the flag.
struct BusyGuard {
    shared: Arc<Shared>,
    epoch: u64,
    settled: bool,
}

impl BusyGuard {
    fn acquire(shared: &Arc<Shared>) -> Result<Self> {
        let epoch = shared.begin_busy()?;
        Ok(Self {
            shared: shared.clone(),
            epoch,
            settled: false,
        })
    }

    fn finish(mut self, error: Option<String>, notice: Option<String>) {
        self.settled = true;
        self.shared.finish_busy(self.epoch, error, notice);
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!(epoch = self.epoch, "Command dropped before settling, clearing busy");
            self.shared.finish_busy(self.epoch, None, None);
        }
    }
}

fn failure_message(err: &SessionError, fallback: &str) -> String {
    let message = err.user_message();
    if message.trim().is_empty() {
        fallback.to_string()
    } else {
        message
    }
}

fn session_handler(shared: Weak<Shared>, epoch: u64) -> SessionHandler {
    Arc::new(move |change: SessionChange| {
        if let Some(shared) = shared.upgrade() {
            tracing::debug!(event = ?change.event, epoch, "Session change received");
            shared.observe(epoch, Origin::Notification, change.session.as_ref());
        }
    })
}

/// Keeps a view's signed-in state in step with an identity provider
///
/// Lifecycle is `activate` → commands/notifications → `deactivate`.
/// Dropping the synchronizer deactivates it.
pub struct SessionSynchronizer {
    shared: Arc<Shared>,
}

impl SessionSynchronizer {
    /// Create a synchronizer with the default config
    pub fn new(provider: Arc<dyn IdentityProvider>, navigator: Arc<dyn Navigator>) -> Self {
        Self::build(provider, navigator, SyncConfig::default())
    }

    /// Create a synchronizer with a validated config
    pub fn with_config(
        provider: Arc<dyn IdentityProvider>,
        navigator: Arc<dyn Navigator>,
        config: SyncConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(provider, navigator, config))
    }

    fn build(
        provider: Arc<dyn IdentityProvider>,
        navigator: Arc<dyn Navigator>,
        config: SyncConfig,
    ) -> Self {
        let (tx, _) = watch::channel(SyncState::default());
        Self {
            shared: Arc::new(Shared {
                provider,
                navigator,
                config,
                cell: Mutex::new(Cell {
                    state: SyncState::default(),
                    epoch: 0,
                    observed: 0,
                    activation: None,
                }),
                tx,
            }),
        }
    }

    /// Start following the provider: issue the bootstrap query and register
    /// for session changes.
    ///
    /// Must be called from within a tokio runtime. If `deactivate` runs while
    /// the registration is in progress, the new registration is released and
    /// this still returns `Ok(())` with the synchronizer inactive; check
    /// `is_active()` when that race matters.
    pub fn activate(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SessionError::Runtime(e.to_string()))?;
        let shared = &self.shared;

        let (epoch, since) = {
            let mut cell = shared.lock();
            if cell.activation.is_some() {
                return Err(SessionError::AlreadyActive);
            }
            cell.epoch += 1;
            let epoch = cell.epoch;
            cell.activation = Some(Activation {
                epoch,
                subscription: None,
                bootstrap: None,
            });
            (epoch, cell.observed)
        };

        let bootstrap = {
            let provider = shared.provider.clone();
            let weak = Arc::downgrade(shared);
            runtime.spawn(async move {
                let result = provider.get_session().await;
                if let Some(shared) = weak.upgrade() {
                    shared.complete_bootstrap(epoch, since, result);
                }
            })
        };

        let handle = match shared
            .provider
            .on_session_change(session_handler(Arc::downgrade(shared), epoch))
        {
            Ok(handle) => handle,
            Err(e) => {
                bootstrap.abort();
                let mut cell = shared.lock();
                if cell.activation.as_ref().is_some_and(|a| a.epoch == epoch) {
                    cell.activation = None;
                    cell.epoch += 1;
                }
                tracing::error!(
                    provider = %shared.provider.name(),
                    error = %e,
                    "Failed to register for session changes"
                );
                return Err(e);
            }
        };

        let guard = SubscriptionGuard::new(shared.provider.clone(), handle);
        let orphaned = {
            let mut cell = shared.lock();
            match cell.activation.as_mut() {
                Some(activation) if activation.epoch == epoch => {
                    activation.subscription = Some(guard);
                    activation.bootstrap = Some(bootstrap);
                    None
                }
                // Deactivated while registering
                _ => Some(Activation {
                    epoch,
                    subscription: Some(guard),
                    bootstrap: Some(bootstrap),
                }),
            }
        };
        if let Some(activation) = orphaned {
            tracing::debug!(epoch, "Deactivated during registration, releasing subscription");
            activation.teardown();
            return Ok(());
        }

        tracing::info!(provider = %shared.provider.name(), epoch, "Session synchronizer activated");
        Ok(())
    }

    /// Stop following the provider
    ///
    /// Releases the subscription (if one was obtained), aborts the bootstrap
    /// query and resets the state. Safe to call repeatedly or without a prior
    /// `activate`.
    pub fn deactivate(&self) {
        let activation = {
            let mut cell = self.shared.lock();
            cell.epoch += 1;
            cell.state = SyncState::default();
            self.shared.publish(&cell.state);
            cell.activation.take()
        };

        if let Some(activation) = activation {
            let epoch = activation.epoch;
            activation.teardown();
            tracing::info!(
                provider = %self.shared.provider.name(),
                epoch,
                "Session synchronizer deactivated"
            );
        }
    }

    /// Sign in with email and password
    ///
    /// The state is marked busy before this returns. The signed-in label and
    /// navigation come from the provider's change notification, not from
    /// this call.
    pub fn sign_in(&self, email: &str, password: &str) -> BoxFuture<'static, Result<()>> {
        let (credentials, busy) = match self.prepare(email, password) {
            Ok(prepared) => prepared,
            Err(e) => return future::ready(Err(e)).boxed(),
        };
        let shared = self.shared.clone();

        async move {
            let result = shared
                .provider
                .sign_in_with_password(credentials.email(), credentials.password())
                .await;

            match &result {
                Ok(()) => {
                    tracing::info!(email = %credentials.email(), "Sign-in accepted");
                    busy.finish(None, None);
                }
                Err(e) => {
                    tracing::warn!(email = %credentials.email(), error = %e, "Sign-in rejected");
                    let message = failure_message(e, &shared.config.sign_in_failed_message);
                    busy.finish(Some(message), None);
                }
            }
            result
        }
        .boxed()
    }

    /// Register a new account
    ///
    /// Success means a confirmation email is on its way; no session is
    /// expected. Busy/error handling matches `sign_in`.
    pub fn sign_up(
        &self,
        email: &str,
        password: &str,
    ) -> BoxFuture<'static, Result<SignUpOutcome>> {
        let (credentials, busy) = match self.prepare(email, password) {
            Ok(prepared) => prepared,
            Err(e) => return future::ready(Err(e)).boxed(),
        };
        let shared = self.shared.clone();

        async move {
            let result = shared
                .provider
                .sign_up(credentials.email(), credentials.password())
                .await;

            match result {
                Ok(()) => {
                    tracing::info!(
                        email = %credentials.email(),
                        "Sign-up accepted, confirmation pending"
                    );
                    let notice = shared.config.confirmation_notice.clone();
                    busy.finish(None, Some(notice));
                    Ok(SignUpOutcome::ConfirmationPending {
                        email: credentials.email().to_string(),
                    })
                }
                Err(e) => {
                    tracing::warn!(email = %credentials.email(), error = %e, "Sign-up rejected");
                    let message = failure_message(&e, &shared.config.sign_up_failed_message);
                    busy.finish(Some(message), None);
                    Err(e)
                }
            }
        }
        .boxed()
    }

    /// Sign out
    ///
    /// Once the provider call settles the state is signed out, whether the
    /// call succeeded or not and whether or not a notification follows.
    pub fn sign_out(&self) -> BoxFuture<'static, ()> {
        let epoch = self.shared.lock().epoch;
        let shared = self.shared.clone();

        async move {
            if let Err(e) = shared.provider.sign_out().await {
                tracing::warn!(
                    provider = %shared.provider.name(),
                    error = %e,
                    "Sign-out failed, clearing local session anyway"
                );
            }
            shared.observe(epoch, Origin::SignOut, None);
        }
        .boxed()
    }

    /// Open the default view if a user is signed in. Returns whether it did.
    pub fn open_default_view(&self) -> bool {
        if !self.shared.lock().state.is_signed_in() {
            return false;
        }
        self.shared.navigator.navigate(&self.shared.config.default_route);
        true
    }

    fn prepare(&self, email: &str, password: &str) -> Result<(Credentials, BusyGuard)> {
        let credentials = Credentials::new(email, password)?;
        let busy = BusyGuard::acquire(&self.shared)?;
        Ok((credentials, busy))
    }

    /// Snapshot of the current state
    pub fn state(&self) -> SyncState {
        self.shared.lock().state.clone()
    }

    /// Label of the signed-in user
    pub fn current_user_label(&self) -> Option<String> {
        self.shared.lock().state.current_user_label.clone()
    }

    /// Whether a sign-in or sign-up is in flight
    pub fn is_busy(&self) -> bool {
        self.shared.lock().state.is_busy
    }

    /// Message from the last failed sign-in or sign-up
    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().state.last_error.clone()
    }

    /// Whether `activate` succeeded and `deactivate` has not run since
    pub fn is_active(&self) -> bool {
        self.shared.lock().activation.is_some()
    }

    /// Current epoch
    pub fn epoch(&self) -> u64 {
        self.shared.lock().epoch
    }

    /// The config in use
    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    /// Receiver that sees every state change
    pub fn watch(&self) -> watch::Receiver<SyncState> {
        self.shared.tx.subscribe()
    }

    /// State changes as a stream, starting with the current state
    pub fn changes(&self) -> WatchStream<SyncState> {
        WatchStream::new(self.watch())
    }
}

impl Drop for SessionSynchronizer {
    fn drop(&mut self) {
        self.deactivate();
    }
}
