use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::TokenPair;

/// The shared cell holding the current token pair
///
/// Reads never block and always observe a complete pair. A write is visible to
/// every subsequent read, on any thread, once it returns. The store enforces
/// no policy of its own; the [`RefreshCoordinator`][crate::RefreshCoordinator]
/// decides when it is written.
#[derive(Debug, Default)]
pub struct CredentialStore {
    current: ArcSwapOption<TokenPair>,
}

impl CredentialStore {
    /// Constructs an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a store already holding `pair`
    pub fn with_pair(pair: TokenPair) -> Self {
        Self {
            current: ArcSwapOption::from_pointee(pair),
        }
    }

    /// Gets the current pair, if any
    #[inline]
    pub fn read(&self) -> Option<Arc<TokenPair>> {
        self.current.load_full()
    }

    /// Replaces the current pair
    #[inline]
    pub fn write(&self, pair: Arc<TokenPair>) {
        self.current.store(Some(pair));
    }

    /// Removes the current pair
    #[inline]
    pub fn clear(&self) {
        self.current.store(None);
    }
}

#[cfg(test)]
mod tests {
    use aliri_clock::UnixTime;

    use super::*;
    use crate::{AccessToken, RefreshToken};

    fn pair(access: &'static str, refresh: &'static str) -> Arc<TokenPair> {
        Arc::new(TokenPair::new(
            AccessToken::from_static(access),
            RefreshToken::from_static(refresh),
            UnixTime(100),
        ))
    }

    #[test]
    fn starts_empty() {
        assert!(CredentialStore::new().read().is_none());
    }

    #[test]
    fn write_replaces_whole_pair() {
        let store = CredentialStore::new();
        store.write(pair("A1", "R1"));
        let before = store.read().unwrap();

        store.write(pair("A2", "R2"));
        let after = store.read().unwrap();

        assert_eq!(before.access_token().as_str(), "A1");
        assert_eq!(before.refresh_token().as_str(), "R1");
        assert_eq!(after.access_token().as_str(), "A2");
        assert_eq!(after.refresh_token().as_str(), "R2");
    }

    #[test]
    fn writes_are_visible_across_threads() {
        let store = Arc::new(CredentialStore::with_pair((*pair("A1", "R1")).clone()));

        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || store.write(pair("A2", "R2")))
        };
        writer.join().unwrap();

        let seen = store.read().unwrap();
        assert_eq!(seen.access_token().as_str(), "A2");
        assert_eq!(seen.refresh_token().as_str(), "R2");
    }

    #[test]
    fn clear_removes_pair() {
        let store = CredentialStore::with_pair((*pair("A1", "R1")).clone());
        store.clear();
        assert!(store.read().is_none());
    }
}
