//! Persisted session stores

use std::error;

use async_trait::async_trait;

use crate::TokenPair;

#[cfg(feature = "file")]
pub mod file;
pub mod in_memory;

#[cfg(feature = "file")]
pub use file::FileSessionStore;
pub use in_memory::InMemorySessionStore;

/// A boxed error returned by a session store
pub type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// A durable home for a session's token pair
///
/// The coordinator reads the store when warming its cache, and writes back
/// each pair it obtains so that a later process can resume the session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads the persisted pair, if there is one
    async fn load(&self) -> Result<Option<TokenPair>, BoxError>;

    /// Persists a pair, replacing any previously persisted pair
    async fn persist(&self, pair: &TokenPair) -> Result<(), BoxError>;

    /// Removes any persisted pair
    async fn clear(&self) -> Result<(), BoxError>;
}
