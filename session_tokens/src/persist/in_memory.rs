//! An in-memory session store

use std::sync::Mutex;

use async_trait::async_trait;

use super::{BoxError, SessionStore};
use crate::TokenPair;

/// An in-memory session store
///
/// Mostly useful for tests, or for handing a session between components
/// within a single process.
#[derive(Default, Debug)]
pub struct InMemorySessionStore {
    pair: Mutex<Option<TokenPair>>,
}

impl InMemorySessionStore {
    /// Constructs a new, empty store
    pub const fn new() -> Self {
        Self {
            pair: Mutex::new(None),
        }
    }

    /// Constructs a store already holding `pair`
    pub fn with_pair(pair: TokenPair) -> Self {
        Self {
            pair: Mutex::new(Some(pair)),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<TokenPair>> {
        self.pair.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self) -> Result<Option<TokenPair>, BoxError> {
        Ok(self.slot().clone())
    }

    async fn persist(&self, pair: &TokenPair) -> Result<(), BoxError> {
        *self.slot() = Some(pair.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), BoxError> {
        *self.slot() = None;
        Ok(())
    }
}
