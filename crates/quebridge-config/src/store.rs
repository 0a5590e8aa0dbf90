// ── File-backed credential store ──
//
// One small JSON file per credential under a profile's data directory.
// Writes go to a temporary file first and are renamed into place.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use quebridge_core::{CredentialKey, CredentialStore, StoreError};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Serialize, Deserialize)]
struct Record {
    value: String,
}

#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The store for a named profile under the platform data directory.
    pub fn for_profile(profile_name: &str) -> Self {
        Self::new(crate::data_dir().join(profile_name))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: CredentialKey) -> PathBuf {
        let name: &'static str = key.into();
        self.dir.join(format!("{name}.json"))
    }
}

impl CredentialStore for FileCredentialStore {
    fn read(&self, key: CredentialKey) -> Result<Option<String>, StoreError> {
        let raw = match std::fs::read_to_string(self.path(key)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { key, source }),
        };
        serde_json::from_str::<Record>(&raw)
            .map(|record| Some(record.value))
            .map_err(|e| StoreError::Corrupt {
                key,
                message: e.to_string(),
            })
    }

    fn write(&self, key: CredentialKey, value: Option<&str>) -> Result<(), StoreError> {
        let path = self.path(key);
        let io = |source| StoreError::Io { key, source };

        let Some(value) = value else {
            return match std::fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(source) => Err(io(source)),
            };
        };

        std::fs::create_dir_all(&self.dir).map_err(io)?;
        let body = serde_json::to_string(&Record {
            value: value.to_owned(),
        })
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, body).map_err(io)?;
        std::fs::rename(&tmp, &path).map_err(io)?;
        debug!(%key, path = %path.display(), "credential saved");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn stores_reads_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("home"));

        assert_eq!(store.read(CredentialKey::PairingToken).unwrap(), None);

        store
            .write(CredentialKey::PairingToken, Some("pair-1"))
            .unwrap();
        assert_eq!(
            store.read(CredentialKey::PairingToken).unwrap().as_deref(),
            Some("pair-1")
        );
        assert!(dir.path().join("home/pairing_token.json").exists());
        assert!(!store.exists(CredentialKey::DeviceId).unwrap());

        store.write(CredentialKey::PairingToken, None).unwrap();
        assert_eq!(store.read(CredentialKey::PairingToken).unwrap(), None);
        store.write(CredentialKey::PairingToken, None).unwrap();
    }

    #[test]
    fn reports_corrupt_records() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bearer_token.json"), "not json").unwrap();
        let store = FileCredentialStore::new(dir.path());

        assert!(matches!(
            store.read(CredentialKey::BearerToken),
            Err(StoreError::Corrupt {
                key: CredentialKey::BearerToken,
                ..
            })
        ));
    }
}
