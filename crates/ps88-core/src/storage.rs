//! Durable key/value storage for the control side.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Key for the last submitted source text.
pub const CODE_KEY: &str = "code";

/// Key for the serialized save blob.
pub const SAVE_KEY: &str = "processor";

pub trait Storage: Send {
    fn load(&self, key: &str) -> Result<Option<String>>;
    fn store(&mut self, key: &str, value: &str) -> Result<()>;
}

/// One file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(Error::Storage(format!("invalid key '{}'", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl Storage for FileStorage {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let path = self.path(key)?;
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }

    fn store(&mut self, key: &str, value: &str) -> Result<()> {
        let path = self.path(key)?;
        fs::create_dir_all(&self.dir)?;
        // Write then rename so a crash never leaves a half-written value.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        log::debug!("[STORAGE] wrote {} ({} bytes)", path.display(), value.len());
        Ok(())
    }
}

/// In-memory storage for tests and throwaway sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    values: HashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn store(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_storage_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path().join("data"));
        assert_eq!(storage.load(CODE_KEY).unwrap(), None);

        storage.store(CODE_KEY, "ps88.audio(|ctx| {});").unwrap();
        storage.store(CODE_KEY, "// replaced").unwrap();
        assert_eq!(storage.load(CODE_KEY).unwrap().as_deref(), Some("// replaced"));
        assert!(storage.dir().join("code.json").exists());
    }

    #[test]
    fn test_file_storage_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path());
        assert!(matches!(storage.store("../x", "1"), Err(Error::Storage(_))));
    }

    #[test]
    fn test_memory_storage() {
        let mut storage = MemoryStorage::new();
        storage.store(SAVE_KEY, "null").unwrap();
        assert_eq!(storage.load(SAVE_KEY).unwrap().as_deref(), Some("null"));
        assert_eq!(storage.load(CODE_KEY).unwrap(), None);
    }
}
