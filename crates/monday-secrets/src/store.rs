//! Opaque key-value secret storage.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

/// Errors raised by a [`SecretStore`].
#[derive(Debug, Error)]
pub enum SecretStoreError {
    /// The backing store could not be reached.
    #[error("secret store unavailable: {0}")]
    Unavailable(String),

    /// Key contains characters the store cannot represent.
    #[error("invalid secret key: {0}")]
    InvalidKey(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable, confidential storage for small secrets.
///
/// A successful `put` must survive process death.
pub trait SecretStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    fn put(&self, key: &str, value: &[u8]) -> Result<(), SecretStoreError>;

    /// Read the value under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SecretStoreError>;

    /// Remove `key`. Removing a missing key succeeds.
    fn delete(&self, key: &str) -> Result<(), SecretStoreError>;
}

/// Process-local secret store, for tests and throwaway nodes.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemorySecretStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `get` fail.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `put` and `delete` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    /// Whether the store holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>, SecretStoreError> {
        self.entries
            .lock()
            .map_err(|_| SecretStoreError::Unavailable("memory store poisoned".into()))
    }

    fn check_writable(&self) -> Result<(), SecretStoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SecretStoreError::Io(std::io::Error::other(
                "simulated write failure",
            )));
        }
        Ok(())
    }
}

impl SecretStore for MemorySecretStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), SecretStoreError> {
        self.check_writable()?;
        self.entries()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SecretStoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(SecretStoreError::Unavailable("simulated read failure".into()));
        }
        Ok(self.entries()?.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<(), SecretStoreError> {
        self.check_writable()?;
        self.entries()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_put_get_delete() {
        let store = MemorySecretStore::new();
        assert!(store.get("seed").unwrap().is_none());

        store.put("seed", b"one").unwrap();
        store.put("seed", b"two").unwrap();
        assert_eq!(store.get("seed").unwrap().as_deref(), Some(&b"two"[..]));
        assert_eq!(store.len(), 1);

        store.delete("seed").unwrap();
        store.delete("seed").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_memory_failure_modes() {
        let store = MemorySecretStore::new();
        store.fail_writes(true);
        assert!(store.put("seed", b"x").is_err());
        assert!(store.delete("seed").is_err());

        store.fail_writes(false);
        store.put("seed", b"x").unwrap();
        store.fail_reads(true);
        assert!(matches!(
            store.get("seed"),
            Err(SecretStoreError::Unavailable(_))
        ));
    }
}
