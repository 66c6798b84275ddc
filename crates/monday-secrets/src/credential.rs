//! Wallet credential persistence.

use std::sync::Arc;

use bip39::Mnemonic;
use monday_core::{Credential, Error, Result};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::store::SecretStore;

/// Key the credential is stored under.
pub const BACKUP_INFO_KEY: &str = "backup_info";

/// Serialized form of a [`Credential`].
#[derive(Serialize, Deserialize)]
struct BackupInfo {
    mnemonic: String,
    passphrase: Option<String>,
}

/// Generates, persists, reads and deletes the wallet credential.
#[derive(Clone)]
pub struct CredentialStore {
    store: Arc<dyn SecretStore>,
}

impl CredentialStore {
    /// Wrap a secret store.
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// Read the persisted credential.
    ///
    /// # Errors
    ///
    /// [`Error::StorageUnavailable`] when the store cannot be read or holds
    /// something that is not a credential.
    pub fn get_credential(&self) -> Result<Option<Credential>> {
        let Some(bytes) = self
            .store
            .get(BACKUP_INFO_KEY)
            .map_err(|e| Error::StorageUnavailable(e.to_string()))?
        else {
            return Ok(None);
        };

        let info: BackupInfo = serde_json::from_slice(&bytes)
            .map_err(|e| Error::StorageUnavailable(format!("corrupt backup info: {e}")))?;
        let credential = Credential::parse(&info.mnemonic, info.passphrase)
            .map_err(|e| Error::StorageUnavailable(format!("corrupt backup info: {e}")))?;
        Ok(Some(credential))
    }

    /// Generate a fresh 24-word credential. Nothing is persisted.
    pub fn generate_credential(&self) -> Result<Credential> {
        let mut entropy = [0u8; 32];
        OsRng.fill_bytes(&mut entropy);
        let mnemonic = Mnemonic::from_entropy(&entropy)
            .map_err(|e| Error::Unclassified(format!("mnemonic generation failed: {e}")))?;
        Ok(Credential::new(mnemonic, None))
    }

    /// Durably persist `credential`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// [`Error::PersistenceFailed`] when the write cannot be guaranteed.
    pub fn save_credential(&self, credential: &Credential) -> Result<()> {
        let info = BackupInfo {
            mnemonic: credential.phrase(),
            passphrase: credential.passphrase().map(str::to_string),
        };
        let bytes =
            serde_json::to_vec(&info).map_err(|e| Error::PersistenceFailed(e.to_string()))?;

        self.store
            .put(BACKUP_INFO_KEY, &bytes)
            .map_err(|e| Error::PersistenceFailed(e.to_string()))?;

        tracing::info!("Wallet credential saved to secure storage");
        Ok(())
    }

    /// Remove the persisted credential.
    ///
    /// # Errors
    ///
    /// [`Error::PersistenceFailed`] on IO error.
    pub fn delete_credential(&self) -> Result<()> {
        self.store
            .delete(BACKUP_INFO_KEY)
            .map_err(|e| Error::PersistenceFailed(e.to_string()))?;

        tracing::info!("Wallet credential deleted from secure storage");
        Ok(())
    }

    /// Return the persisted credential, generating and saving one if absent.
    ///
    /// A generated credential is only returned after it was saved.
    pub fn get_or_create_credential(&self) -> Result<Credential> {
        if let Some(credential) = self.get_credential()? {
            tracing::debug!("Loaded wallet credential from secure storage");
            return Ok(credential);
        }

        let credential = self.generate_credential()?;
        self.save_credential(&credential)?;
        tracing::info!(
            words = credential.word_count(),
            "Generated new wallet credential"
        );
        Ok(credential)
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemorySecretStore;

    fn store() -> (Arc<MemorySecretStore>, CredentialStore) {
        let secrets = Arc::new(MemorySecretStore::new());
        let credentials = CredentialStore::new(secrets.clone());
        (secrets, credentials)
    }

    #[test]
    fn test_generate_is_24_words_and_random() {
        let (_, credentials) = store();
        let a = credentials.generate_credential().unwrap();
        let b = credentials.generate_credential().unwrap();
        assert_eq!(a.word_count(), 24);
        assert_ne!(a, b);
    }

    #[test]
    fn test_generate_does_not_persist() {
        let (secrets, credentials) = store();
        credentials.generate_credential().unwrap();
        assert!(secrets.is_empty());
        assert!(credentials.get_credential().unwrap().is_none());
    }

    #[test]
    fn test_save_then_get_round_trips() {
        let (_, credentials) = store();
        for passphrase in [None, Some("correct horse".to_string())] {
            let generated = credentials.generate_credential().unwrap();
            let credential = Credential::new(generated.mnemonic().clone(), passphrase);
            credentials.save_credential(&credential).unwrap();
            assert_eq!(credentials.get_credential().unwrap(), Some(credential));
        }
    }

    #[test]
    fn test_get_or_create_reuses_existing() {
        let (_, credentials) = store();
        let first = credentials.get_or_create_credential().unwrap();
        let second = credentials.get_or_create_credential().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_get_or_create_fails_when_save_fails() {
        let (secrets, credentials) = store();
        secrets.fail_writes(true);

        let err = credentials.get_or_create_credential().unwrap_err();
        assert!(matches!(err, Error::PersistenceFailed(_)));
        assert!(secrets.is_empty());
    }

    #[test]
    fn test_unreadable_store_is_not_absence() {
        let (secrets, credentials) = store();
        secrets.fail_reads(true);

        let err = credentials.get_credential().unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
        // Must not fall through to generating a second secret.
        assert!(credentials.get_or_create_credential().is_err());
    }

    #[test]
    fn test_corrupt_value_is_storage_unavailable() {
        let (secrets, credentials) = store();
        secrets.put(BACKUP_INFO_KEY, b"{not json").unwrap();
        assert!(matches!(
            credentials.get_credential(),
            Err(Error::StorageUnavailable(_))
        ));
    }

    #[test]
    fn test_delete() {
        let (secrets, credentials) = store();
        credentials.get_or_create_credential().unwrap();
        credentials.delete_credential().unwrap();
        assert!(credentials.get_credential().unwrap().is_none());

        secrets.fail_writes(true);
        assert!(matches!(
            credentials.delete_credential(),
            Err(Error::PersistenceFailed(_))
        ));
    }
}
