//! Round-robin rotation over the identity provider's API keys.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::ConfigError;

/// Cycles through a fixed pool of API keys.
///
/// Keys are handed out in order starting from the first, wrapping after the
/// last. The cursor is atomic, so a single rotator can be shared across
/// concurrently running pipelines via `Arc`.
///
/// Callers must not assume two calls return the same key.
///
/// # Example
///
/// ```
/// use oobforge_core::KeyRotator;
///
/// let keys = KeyRotator::new(["key-a", "key-b"]).unwrap();
/// assert_eq!(keys.next_key(), "key-a");
/// assert_eq!(keys.next_key(), "key-b");
/// assert_eq!(keys.next_key(), "key-a");
/// ```
pub struct KeyRotator {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl KeyRotator {
    /// Build a rotator from a list of keys.
    ///
    /// Blank entries are dropped. Returns [`ConfigError::EmptyKeyPool`] if no
    /// key remains.
    pub fn new<I, K>(keys: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let keys: Vec<String> = keys
            .into_iter()
            .map(|k| k.into().trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();

        if keys.is_empty() {
            return Err(ConfigError::EmptyKeyPool);
        }

        Ok(Self {
            keys,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Return the next key in round-robin order.
    pub fn next_key(&self) -> &str {
        let len = self.keys.len();
        let index = self
            .cursor
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| Some((c + 1) % len))
            .unwrap_or(0);
        &self.keys[index % len]
    }

    /// Number of keys in the pool.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Always `false`; an empty pool cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl std::fmt::Debug for KeyRotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRotator")
            .field("keys_count", &self.keys.len())
            .field("cursor", &self.cursor.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_empty_pool_rejected() {
        let result = KeyRotator::new(Vec::<String>::new());
        assert!(matches!(result, Err(ConfigError::EmptyKeyPool)));

        let result = KeyRotator::new(["", "   "]);
        assert!(matches!(result, Err(ConfigError::EmptyKeyPool)));
    }

    #[test]
    fn test_each_key_once_then_wraps() {
        for size in 1..=5 {
            let keys: Vec<String> = (0..size).map(|i| format!("key-{}", i)).collect();
            let rotator = KeyRotator::new(keys.clone()).unwrap();

            let seen: Vec<String> = (0..size).map(|_| rotator.next_key().to_string()).collect();
            assert_eq!(seen, keys);

            assert_eq!(rotator.next_key(), keys[0]);
        }
    }

    #[test]
    fn test_blank_keys_dropped() {
        let rotator = KeyRotator::new(["a", " ", "b "]).unwrap();
        assert_eq!(rotator.len(), 2);
        assert_eq!(rotator.next_key(), "a");
        assert_eq!(rotator.next_key(), "b");
    }

    #[test]
    fn test_debug_hides_keys() {
        let rotator = KeyRotator::new(["very-secret-key"]).unwrap();
        let debug = format!("{:?}", rotator);
        assert!(!debug.contains("very-secret-key"));
    }

    #[test]
    fn test_shared_rotator_hands_out_every_key() {
        let rotator = Arc::new(KeyRotator::new(["a", "b", "c", "d"]).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let rotator = Arc::clone(&rotator);
                std::thread::spawn(move || rotator.next_key().to_string())
            })
            .collect();

        let seen: HashSet<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(seen.len(), 4);
    }
}
