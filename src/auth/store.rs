//! Persistence of the session token and device key.
//!
//! Both artifacts are opaque byte blobs to the rest of the crate.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::Result;

/// Storage for the resumable session token and the app device key.
pub trait TokenStore: Send + Sync {
    /// Load the stored session token, if any.
    fn load_session_token(&self) -> Result<Option<Vec<u8>>>;
    /// Replace the stored session token.
    fn save_session_token(&self, token: &[u8]) -> Result<()>;
    /// Load the stored device key, if any.
    fn load_device_key(&self) -> Result<Option<Vec<u8>>>;
    /// Replace the stored device key.
    fn save_device_key(&self, key: &[u8]) -> Result<()>;
}

/// File-backed store: one file per blob.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    session_path: PathBuf,
    device_key_path: PathBuf,
}

impl FileTokenStore {
    /// Store both blobs in `dir` as `cookies.txt` and `device_key.bin`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            session_path: dir.join("cookies.txt"),
            device_key_path: dir.join("device_key.bin"),
        }
    }

    /// Use explicit file paths.
    pub fn new(session_path: impl Into<PathBuf>, device_key_path: impl Into<PathBuf>) -> Self {
        Self {
            session_path: session_path.into(),
            device_key_path: device_key_path.into(),
        }
    }

    fn read(path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn load_session_token(&self) -> Result<Option<Vec<u8>>> {
        Self::read(&self.session_path)
    }

    fn save_session_token(&self, token: &[u8]) -> Result<()> {
        Self::write(&self.session_path, token)
    }

    fn load_device_key(&self) -> Result<Option<Vec<u8>>> {
        Self::read(&self.device_key_path)
    }

    fn save_device_key(&self, key: &[u8]) -> Result<()> {
        Self::write(&self.device_key_path, key)
    }
}

/// In-memory store, for tests and callers with their own persistence.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    session_token: Mutex<Option<Vec<u8>>>,
    device_key: Mutex<Option<Vec<u8>>>,
}

impl MemoryTokenStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with a session token.
    pub fn with_session_token(token: impl Into<Vec<u8>>) -> Self {
        let store = Self::default();
        *lock(&store.session_token) = Some(token.into());
        store
    }

    /// Create a store pre-seeded with a device key.
    pub fn with_device_key(key: impl Into<Vec<u8>>) -> Self {
        let store = Self::default();
        *lock(&store.device_key) = Some(key.into());
        store
    }
}

fn lock(slot: &Mutex<Option<Vec<u8>>>) -> std::sync::MutexGuard<'_, Option<Vec<u8>>> {
    // A poisoned slot still holds a complete blob; writes are single assignments.
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TokenStore for MemoryTokenStore {
    fn load_session_token(&self) -> Result<Option<Vec<u8>>> {
        Ok(lock(&self.session_token).clone())
    }

    fn save_session_token(&self, token: &[u8]) -> Result<()> {
        *lock(&self.session_token) = Some(token.to_vec());
        Ok(())
    }

    fn load_device_key(&self) -> Result<Option<Vec<u8>>> {
        Ok(lock(&self.device_key).clone())
    }

    fn save_device_key(&self, key: &[u8]) -> Result<()> {
        *lock(&self.device_key) = Some(key.to_vec());
        Ok(())
    }
}
