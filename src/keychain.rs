//! Credential storage.
//!
//! The account record is stored as JSON under a single key. [`FileKeychain`]
//! keeps one owner-only file per key inside the configuration directory;
//! [`MemoryKeychain`] is used by tests and ephemeral sessions.

use crate::error::{Result, StoreError};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

pub trait Keychain: Send + Sync {
    /// Fails with [`StoreError::CredentialsNotFound`] when the key is absent.
    fn get(&self, key: &str) -> Result<Vec<u8>>;
    fn set(&self, key: &str, data: &[u8]) -> Result<()>;
    /// Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

pub struct FileKeychain {
    dir: PathBuf,
}

impl FileKeychain {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl Keychain for FileKeychain {
    fn get(&self, key: &str) -> Result<Vec<u8>> {
        match fs::read(self.path(key)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::CredentialsNotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, data: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path(key);

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

            let mut file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&path)?;
            // The mode only applies to new files
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
            file.write_all(data)?;
        }

        #[cfg(not(unix))]
        fs::write(&path, data)?;

        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Default)]
pub struct MemoryKeychain {
    items: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKeychain {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Keychain for MemoryKeychain {
    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.get(key).cloned().ok_or(StoreError::CredentialsNotFound)
    }

    fn set(&self, key: &str, data: &[u8]) -> Result<()> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.remove(key);
        Ok(())
    }
}
