use std::{error, sync::Arc};

use aliri_clock::Clock;

use crate::{
    coordinator::{RefreshState, SessionStatus},
    RefreshCoordinator, TokenPair,
};

/// The result of warming a coordinator from its session store
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WarmOutcome {
    /// The persisted session was loaded into the credential store
    ///
    /// The pair may already be stale; if so, the first request refreshes it.
    Restored(Arc<TokenPair>),

    /// No session was persisted
    Missing,

    /// The coordinator already held a session, one was established while
    /// loading, or the session was signed out, so the persisted session was
    /// not used
    Skipped,

    /// The session store could not be read in time
    ///
    /// The coordinator will try the session store again on first use.
    Failed,
}

impl<X, C> RefreshCoordinator<X, C>
where
    C: Clock,
{
    /// Populates the credential store from the session store
    ///
    /// This is intended to be called once at startup, so that the first
    /// request does not pay for loading the persisted session. No refresh is
    /// performed, even if the persisted pair has expired. Failures are logged
    /// and never fatal.
    pub async fn warm(&self) -> WarmOutcome {
        let Some(session_store) = &self.inner.session_store else {
            return WarmOutcome::Missing;
        };

        let epoch = {
            let shared = self.inner.lock();
            if shared.signed_out || self.inner.store.read().is_some() {
                tracing::debug!("session already held or signed out, skipping warm");
                return WarmOutcome::Skipped;
            }
            shared.epoch
        };

        let timeout = self.inner.config.refresh_timeout();
        let pair = match tokio::time::timeout(timeout, session_store.load()).await {
            Ok(Ok(Some(pair))) => Arc::new(pair),
            Ok(Ok(None)) => {
                tracing::debug!("no persisted session to warm from");
                return WarmOutcome::Missing;
            }
            Ok(Err(error)) => {
                tracing::warn!(
                    error = (&*error as &dyn error::Error),
                    "unable to warm from persisted session, will retry on first use"
                );
                return WarmOutcome::Failed;
            }
            Err(_) => {
                tracing::warn!("timed out warming from persisted session, will retry on first use");
                return WarmOutcome::Failed;
            }
        };

        {
            let shared = self.inner.lock();
            let idle = matches!(shared.state, RefreshState::Idle);
            if shared.epoch != epoch
                || shared.signed_out
                || !idle
                || self.inner.store.read().is_some()
            {
                tracing::debug!("session established while warming, discarding persisted session");
                return WarmOutcome::Skipped;
            }

            self.inner.store.write(Arc::clone(&pair));
            self.inner.status.send_replace(SessionStatus::Active {
                claims: pair.claims().clone(),
            });
        }

        let now = self.inner.config.now();
        tracing::info!(
            expires_at = pair.expires_at().0,
            fresh = pair.is_fresh_at(now, self.inner.config.safety_margin()),
            "warmed credential store from persisted session"
        );

        WarmOutcome::Restored(pair)
    }
}
