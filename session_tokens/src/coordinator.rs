use std::{
    error, fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use aliri_clock::{Clock, System, UnixTime};
use tokio::sync::watch;

use crate::{
    exchange::RefreshExchange, persist::SessionStore, AuthFailure, CoordinatorConfig,
    CredentialStore, SubjectClaims, TokenPair,
};

/// The outcome of a single refresh attempt, shared with every waiter
type Outcome = Result<Arc<TokenPair>, AuthFailure>;

/// The authentication state of the session, as published to observers
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// No session has been established
    Unauthenticated,
    /// A valid session is held
    Active {
        /// The subject claims of the current access token
        claims: SubjectClaims,
    },
    /// A refresh failed terminally and the user must sign in again
    Invalidated {
        /// Why the session was invalidated
        reason: AuthFailure,
    },
    /// The session was ended by signing out
    SignedOut,
}

pub(crate) enum RefreshState {
    Idle,
    Refreshing(watch::Receiver<Option<Outcome>>),
    Failed(AuthFailure),
}

pub(crate) struct Shared {
    pub(crate) state: RefreshState,
    /// Incremented whenever the session is replaced from outside
    pub(crate) epoch: u64,
    /// Set by signing out; the session store is not consulted until a new sign in
    pub(crate) signed_out: bool,
}

pub(crate) struct Inner<X, C> {
    pub(crate) store: CredentialStore,
    shared: Mutex<Shared>,
    exchange: X,
    pub(crate) session_store: Option<Box<dyn SessionStore>>,
    persist_lock: tokio::sync::Mutex<()>,
    pub(crate) config: CoordinatorConfig<C>,
    pub(crate) status: watch::Sender<SessionStatus>,
}

/// The single authority for obtaining a currently valid access token
///
/// Every consumer shares one coordinator (it is cheap to clone) and calls
/// [`valid_token()`][Self::valid_token()] before making an authorized
/// request. A token which is comfortably within its lifetime is returned
/// immediately. Otherwise exactly one refresh is performed against the
/// identity provider, no matter how many callers are waiting for it, and
/// each of them receives that refresh's outcome.
pub struct RefreshCoordinator<X, C = System> {
    pub(crate) inner: Arc<Inner<X, C>>,
}

impl<X, C> Clone for RefreshCoordinator<X, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<X: fmt::Debug, C: fmt::Debug> fmt::Debug for RefreshCoordinator<X, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("current", &self.inner.store.read())
            .field("exchange", &self.inner.exchange)
            .field("has_session_store", &self.inner.session_store.is_some())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Builds a [`RefreshCoordinator`]
pub struct RefreshCoordinatorBuilder<X, C = System> {
    exchange: X,
    config: CoordinatorConfig<C>,
    session_store: Option<Box<dyn SessionStore>>,
    session: Option<TokenPair>,
}

impl<X: fmt::Debug, C: fmt::Debug> fmt::Debug for RefreshCoordinatorBuilder<X, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RefreshCoordinatorBuilder")
            .field("exchange", &self.exchange)
            .field("config", &self.config)
            .field("has_session_store", &self.session_store.is_some())
            .field("session", &self.session)
            .finish()
    }
}

impl<X> RefreshCoordinator<X, System> {
    /// Starts building a coordinator which refreshes tokens through `exchange`
    pub fn builder(exchange: X) -> RefreshCoordinatorBuilder<X, System> {
        RefreshCoordinatorBuilder {
            exchange,
            config: CoordinatorConfig::default(),
            session_store: None,
            session: None,
        }
    }
}

impl<X, C> RefreshCoordinatorBuilder<X, C> {
    /// Replaces the default configuration
    pub fn with_config<D>(self, config: CoordinatorConfig<D>) -> RefreshCoordinatorBuilder<X, D> {
        RefreshCoordinatorBuilder {
            exchange: self.exchange,
            config,
            session_store: self.session_store,
            session: self.session,
        }
    }

    /// Adds a store used to restore the session and to persist refreshed tokens
    pub fn with_session_store(mut self, store: impl SessionStore + 'static) -> Self {
        self.session_store = Some(Box::new(store));
        self
    }

    /// Starts the coordinator with an already established session
    pub fn with_session(mut self, pair: TokenPair) -> Self {
        self.session = Some(pair);
        self
    }

    /// Builds the coordinator
    pub fn build(self) -> RefreshCoordinator<X, C> {
        let (store, status) = match self.session {
            Some(pair) => {
                let status = SessionStatus::Active {
                    claims: pair.claims().clone(),
                };
                (CredentialStore::with_pair(pair), status)
            }
            None => (CredentialStore::new(), SessionStatus::Unauthenticated),
        };

        let (status, _) = watch::channel(status);

        RefreshCoordinator {
            inner: Arc::new(Inner {
                store,
                shared: Mutex::new(Shared {
                    state: RefreshState::Idle,
                    epoch: 0,
                    signed_out: false,
                }),
                exchange: self.exchange,
                session_store: self.session_store,
                persist_lock: tokio::sync::Mutex::new(()),
                config: self.config,
                status,
            }),
        }
    }
}

enum Attempt {
    Ready(Arc<TokenPair>),
    Pending(watch::Receiver<Option<Outcome>>),
}

impl<X, C> RefreshCoordinator<X, C> {
    /// Gets the currently held pair without checking its validity
    pub fn current(&self) -> Option<Arc<TokenPair>> {
        self.inner.store.read()
    }

    /// Subscribes to changes in the session's authentication state
    ///
    /// Observers receive the subject claims after each successful load or
    /// refresh, and are told when the session has been invalidated and the
    /// user must sign in again.
    pub fn session_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    /// The coordinator's configuration
    pub fn config(&self) -> &CoordinatorConfig<C> {
        &self.inner.config
    }
}

impl<X, C> RefreshCoordinator<X, C>
where
    X: RefreshExchange + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Gets a currently valid token pair, refreshing it first if required
    ///
    /// If a refresh is already in flight, this call waits for it rather than
    /// starting another. Dropping the returned future does not cancel a
    /// refresh that other callers may be waiting on.
    ///
    /// # Errors
    ///
    /// Returns the failure of the refresh attempt this call waited on. Once a
    /// refresh has failed terminally, every call fails with that same error
    /// until [`sign_in()`][Self::sign_in()] installs a new session.
    pub async fn valid_token(&self) -> Result<Arc<TokenPair>, AuthFailure> {
        if let Some(pair) = self.inner.store.read() {
            if pair.is_fresh_at(self.inner.config.now(), self.inner.config.safety_margin()) {
                return Ok(pair);
            }
        }

        match self.begin_or_attach()? {
            Attempt::Ready(pair) => Ok(pair),
            Attempt::Pending(outcome) => await_outcome(outcome).await,
        }
    }

    fn begin_or_attach(&self) -> Result<Attempt, AuthFailure> {
        let mut shared = self.inner.lock();

        match &shared.state {
            RefreshState::Failed(reason) => return Err(reason.clone()),
            RefreshState::Refreshing(outcome) => {
                tracing::trace!("attaching to in-flight token refresh");
                return Ok(Attempt::Pending(outcome.clone()));
            }
            RefreshState::Idle => {}
        }

        let current = self.inner.store.read();
        match &current {
            Some(pair)
                if pair.is_fresh_at(self.inner.config.now(), self.inner.config.safety_margin()) =>
            {
                tracing::trace!("token already refreshed by a concurrent attempt");
                return Ok(Attempt::Ready(Arc::clone(pair)));
            }
            None if shared.signed_out || self.inner.session_store.is_none() => {
                return Err(AuthFailure::NotAuthenticated);
            }
            _ => {}
        }

        let (tx, rx) = watch::channel(None);
        shared.state = RefreshState::Refreshing(rx.clone());
        let in_flight = InFlight {
            inner: Arc::clone(&self.inner),
            epoch: shared.epoch,
            tx: Some(tx),
        };
        drop(shared);

        tracing::debug!(
            expires_at = current.as_ref().map(|p| p.expires_at().0),
            "starting token refresh"
        );
        tokio::spawn(run_attempt(Arc::clone(&self.inner), current, in_flight));

        Ok(Attempt::Pending(rx))
    }

    /// Installs a newly established session
    ///
    /// Any previous session is replaced, including one which had failed
    /// terminally. A refresh still in flight for the previous session
    /// completes without affecting the new one.
    pub async fn sign_in(&self, pair: TokenPair) -> Arc<TokenPair> {
        let pair = Arc::new(pair);
        let epoch = {
            let mut shared = self.inner.lock();
            shared.epoch = shared.epoch.wrapping_add(1);
            shared.state = RefreshState::Idle;
            shared.signed_out = false;
            self.inner.store.write(Arc::clone(&pair));
            self.inner.status.send_replace(SessionStatus::Active {
                claims: pair.claims().clone(),
            });
            shared.epoch
        };

        tracing::info!(
            subject = pair.claims().subject(),
            expires_at = pair.expires_at().0,
            "session established"
        );

        self.inner.persist(&pair, epoch).await;
        pair
    }

    /// Ends the session, removing it from memory and from the session store
    ///
    /// Until [`sign_in()`][Self::sign_in()] is called, the coordinator will not
    /// restore a session from the session store, even if clearing it failed.
    pub async fn sign_out(&self) {
        {
            let mut shared = self.inner.lock();
            shared.epoch = shared.epoch.wrapping_add(1);
            shared.state = RefreshState::Idle;
            shared.signed_out = true;
            self.inner.store.clear();
            self.inner.status.send_replace(SessionStatus::SignedOut);
        }

        tracing::info!("session ended");

        if let Some(session_store) = &self.inner.session_store {
            let _serialized = self.inner.persist_lock.lock().await;
            if let Err(error) = session_store.clear().await {
                tracing::warn!(
                    error = (&*error as &dyn error::Error),
                    "unable to clear persisted session"
                );
            }
        }
    }
}

async fn await_outcome(mut outcome: watch::Receiver<Option<Outcome>>) -> Outcome {
    match outcome.wait_for(Option::is_some).await {
        Ok(published) => published.clone().unwrap_or(Err(AuthFailure::Abandoned)),
        Err(_) => Err(AuthFailure::Abandoned),
    }
}

async fn run_attempt<X, C>(
    inner: Arc<Inner<X, C>>,
    current: Option<Arc<TokenPair>>,
    in_flight: InFlight<X, C>,
) where
    X: RefreshExchange,
    C: Clock,
{
    let epoch = in_flight.epoch;
    let (outcome, obtained) = match inner.attempt(current).await {
        Ok(Obtained::Refreshed(pair)) => (Ok(Arc::clone(&pair)), Some(pair)),
        Ok(Obtained::Restored(pair)) => (Ok(pair), None),
        Err(reason) => (Err(reason), None),
    };

    let published = in_flight.complete(outcome);

    if let (Ok(_), Some(pair)) = (published, obtained) {
        inner.persist(&pair, epoch).await;
    }
}

enum Obtained {
    Refreshed(Arc<TokenPair>),
    Restored(Arc<TokenPair>),
}

impl<X, C> Inner<X, C> {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Persists `pair` if it is still the held pair of session `epoch`
    pub(crate) async fn persist(&self, pair: &Arc<TokenPair>, epoch: u64) {
        let Some(session_store) = &self.session_store else {
            return;
        };

        let _serialized = self.persist_lock.lock().await;
        let replaced = self.lock().epoch != epoch;
        if replaced {
            tracing::debug!("session replaced before it could be persisted");
            return;
        }

        let held = self.store.read();
        if !held.is_some_and(|held| Arc::ptr_eq(&held, pair)) {
            tracing::debug!("newer tokens obtained before these could be persisted");
            return;
        }

        match session_store.persist(pair).await {
            Ok(()) => tracing::trace!("persisted session"),
            Err(error) => tracing::warn!(
                error = (&*error as &dyn error::Error),
                "unable to persist session"
            ),
        }
    }
}

impl<X, C> Inner<X, C>
where
    X: RefreshExchange,
    C: Clock,
{
    async fn attempt(&self, current: Option<Arc<TokenPair>>) -> Result<Obtained, AuthFailure> {
        let prior = match current {
            Some(pair) => pair,
            None => match self.load_persisted().await? {
                Some(pair) => {
                    if pair.is_fresh_at(self.config.now(), self.config.safety_margin()) {
                        tracing::info!(
                            expires_at = pair.expires_at().0,
                            "restored session from session store"
                        );
                        return Ok(Obtained::Restored(pair));
                    }
                    pair
                }
                None => return Err(AuthFailure::NotAuthenticated),
            },
        };

        self.refresh(&prior).await.map(Obtained::Refreshed)
    }

    async fn load_persisted(&self) -> Result<Option<Arc<TokenPair>>, AuthFailure> {
        let Some(session_store) = &self.session_store else {
            return Ok(None);
        };

        let timeout = self.config.refresh_timeout();
        match tokio::time::timeout(timeout, session_store.load()).await {
            Ok(Ok(pair)) => Ok(pair.map(Arc::new)),
            Ok(Err(error)) => {
                tracing::warn!(
                    error = (&*error as &dyn error::Error),
                    "unable to load persisted session"
                );
                Ok(None)
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "loading persisted session timed out"
                );
                Err(AuthFailure::Timeout { timeout })
            }
        }
    }

    async fn refresh(&self, prior: &TokenPair) -> Result<Arc<TokenPair>, AuthFailure> {
        let timeout = self.config.refresh_timeout();
        let exchange = self.exchange.exchange(prior.refresh_token());

        let grant = match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(grant)) => grant,
            Ok(Err(error)) => {
                tracing::debug!(
                    error = (&error as &dyn error::Error),
                    "refresh exchange with identity provider failed"
                );
                return Err(error.into());
            }
            Err(_) => return Err(AuthFailure::Timeout { timeout }),
        };

        let now = self.config.now();
        let granted = UnixTime(now.0.saturating_add(grant.expires_in.0));
        let expires_at = granted.max(prior.expires_at());
        if expires_at == prior.expires_at() {
            tracing::warn!(
                lifetime = grant.expires_in.0,
                expires_at = expires_at.0,
                "refreshed token does not extend the session's expiry"
            );
        }

        let rotated = grant.refresh_token.is_some();
        let refresh_token = grant
            .refresh_token
            .unwrap_or_else(|| prior.refresh_token().to_owned());
        let pair = TokenPair::new(grant.access_token, refresh_token, expires_at);

        tracing::info!(
            lifetime = grant.expires_in.0,
            expires_at = expires_at.0,
            rotated_refresh_token = rotated,
            "access token refreshed"
        );

        Ok(Arc::new(pair))
    }
}

/// Ownership of the right to publish the outcome of a refresh attempt
///
/// If dropped without publishing, the coordinator returns to idle and
/// waiters are released with [`AuthFailure::Abandoned`].
struct InFlight<X, C> {
    inner: Arc<Inner<X, C>>,
    epoch: u64,
    tx: Option<watch::Sender<Option<Outcome>>>,
}

impl<X, C> InFlight<X, C> {
    /// Records the outcome and releases every waiter with it
    fn complete(mut self, outcome: Outcome) -> Outcome {
        let published = {
            let mut shared = self.inner.lock();
            if shared.epoch != self.epoch {
                tracing::debug!("session replaced during token refresh, discarding outcome");
                Err(AuthFailure::Superseded)
            } else {
                match &outcome {
                    Ok(pair) => {
                        self.inner.store.write(Arc::clone(pair));
                        shared.state = RefreshState::Idle;
                        self.inner.status.send_replace(SessionStatus::Active {
                            claims: pair.claims().clone(),
                        });
                    }
                    Err(AuthFailure::NotAuthenticated) => {
                        tracing::debug!("no persisted session available");
                        shared.state = RefreshState::Idle;
                    }
                    Err(reason) if reason.is_terminal() => {
                        tracing::error!(
                            error = (reason as &dyn error::Error),
                            "token refresh failed, session invalidated"
                        );
                        shared.state = RefreshState::Failed(reason.clone());
                        self.inner.status.send_replace(SessionStatus::Invalidated {
                            reason: reason.clone(),
                        });
                    }
                    Err(reason) => {
                        tracing::warn!(
                            error = (reason as &dyn error::Error),
                            "token refresh failed, next request may retry"
                        );
                        shared.state = RefreshState::Idle;
                    }
                }
                outcome
            }
        };

        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(published.clone()));
        }

        published
    }
}

impl<X, C> Drop for InFlight<X, C> {
    fn drop(&mut self) {
        let Some(tx) = self.tx.take() else {
            return;
        };

        {
            let mut shared = self.inner.lock();
            if shared.epoch == self.epoch && matches!(shared.state, RefreshState::Refreshing(_)) {
                shared.state = RefreshState::Idle;
            }
        }

        tracing::error!("token refresh attempt ended without an outcome");
        drop(tx);
    }
}
