// ── Credential persistence ──
//
// The session keeps three strings across restarts: the device identifier,
// the pairing token, and the latest bearer token. Storage is best-effort;
// callers log write failures and carry on with the in-memory value.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use strum::{Display, IntoStaticStr};
use thiserror::Error;

/// Which persisted credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum CredentialKey {
    DeviceId,
    PairingToken,
    BearerToken,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {key}: {source}")]
    Io {
        key: CredentialKey,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt {key} record: {message}")]
    Corrupt { key: CredentialKey, message: String },

    #[error("Credential backend error: {0}")]
    Backend(String),
}

/// Durable key-value storage for session credentials.
///
/// `write(key, None)` removes the record.
pub trait CredentialStore: Send + Sync {
    fn read(&self, key: CredentialKey) -> Result<Option<String>, StoreError>;

    fn write(&self, key: CredentialKey, value: Option<&str>) -> Result<(), StoreError>;

    fn exists(&self, key: CredentialKey) -> Result<bool, StoreError> {
        Ok(self.read(key)?.is_some())
    }
}

/// A store that forgets everything when dropped.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    values: Mutex<HashMap<CredentialKey, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a value, for tests and one-shot tools.
    pub fn with(self, key: CredentialKey, value: impl Into<String>) -> Self {
        self.lock().insert(key, value.into());
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CredentialKey, String>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn read(&self, key: CredentialKey) -> Result<Option<String>, StoreError> {
        Ok(self.lock().get(&key).cloned())
    }

    fn write(&self, key: CredentialKey, value: Option<&str>) -> Result<(), StoreError> {
        let mut values = self.lock();
        match value {
            Some(value) => values.insert(key, value.to_owned()),
            None => values.remove(&key),
        };
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn write_none_removes() {
        let store = MemoryCredentialStore::new().with(CredentialKey::PairingToken, "p");
        assert!(store.exists(CredentialKey::PairingToken).unwrap());

        store.write(CredentialKey::PairingToken, None).unwrap();
        assert!(!store.exists(CredentialKey::PairingToken).unwrap());
        assert_eq!(store.read(CredentialKey::DeviceId).unwrap(), None);
    }

    #[test]
    fn keys_render_snake_case() {
        assert_eq!(CredentialKey::BearerToken.to_string(), "bearer_token");
    }
}
