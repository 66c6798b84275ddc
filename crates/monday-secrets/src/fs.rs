//! File system secret store.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::store::{SecretStore, SecretStoreError};

/// Stores each secret in `<dir>/<key>.secret`.
///
/// Writes land in a temporary file in the same directory, are synced, and
/// are then renamed over the target, so a reader sees either the old value
/// or the new one.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// The root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for_key(&self, key: &str) -> Result<PathBuf, SecretStoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(SecretStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.secret")))
    }

    /// Create the directory private to the owner. An existing directory is
    /// left as the caller set it up.
    fn ensure_dir(&self) -> Result<(), SecretStoreError> {
        if self.dir.is_dir() {
            return Ok(());
        }
        fs::create_dir_all(&self.dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.dir, fs::Permissions::from_mode(0o700))?;
        }
        Ok(())
    }

    fn sync_dir(&self) -> Result<(), SecretStoreError> {
        // Directory handles cannot be synced on Windows; the rename is the commit point there.
        #[cfg(unix)]
        fs::File::open(&self.dir)?.sync_all()?;
        Ok(())
    }
}

impl SecretStore for FileSecretStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), SecretStoreError> {
        let path = self.path_for_key(key)?;
        self.ensure_dir()?;

        // NamedTempFile is created 0600 on unix.
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(value)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| SecretStoreError::Io(e.error))?;

        self.sync_dir()
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SecretStoreError> {
        let path = self.path_for_key(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SecretStoreError::Unavailable(format!(
                "{}: {e}",
                path.display()
            ))),
        }
    }

    fn delete(&self, key: &str) -> Result<(), SecretStoreError> {
        let path = self.path_for_key(key)?;
        match fs::remove_file(&path) {
            Ok(()) => self.sync_dir(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(dir.path().join("secrets"));

        assert!(store.get("backup_info").unwrap().is_none());
        store.put("backup_info", b"first").unwrap();
        store.put("backup_info", b"second").unwrap();
        assert_eq!(
            store.get("backup_info").unwrap().as_deref(),
            Some(&b"second"[..])
        );

        // No temporary files left behind.
        let entries: Vec<_> = fs::read_dir(store.dir()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(dir.path());

        store.delete("backup_info").unwrap();
        store.put("backup_info", b"x").unwrap();
        store.delete("backup_info").unwrap();
        assert!(store.get("backup_info").unwrap().is_none());
    }

    #[test]
    fn test_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(dir.path());

        assert!(matches!(
            store.put("../escape", b"x"),
            Err(SecretStoreError::InvalidKey(_))
        ));
        assert!(matches!(store.get(""), Err(SecretStoreError::InvalidKey(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_secret_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(dir.path().join("secrets"));
        store.put("backup_info", b"x").unwrap();

        let path = store.dir().join("backup_info.secret");
        let mode = fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let dir_mode = fs::metadata(store.dir()).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }

    #[cfg(unix)]
    #[test]
    fn test_existing_dir_keeps_its_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o750)).unwrap();
        let store = FileSecretStore::new(dir.path());

        store.put("backup_info", b"x").unwrap();
        store.put("backup_info", b"y").unwrap();
        let mode = fs::metadata(dir.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o750);
    }
}
