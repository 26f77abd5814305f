//! In-memory block storage for ephemeral engines
//!
//! Files live in a map keyed by normalized relative path. Nothing survives the process.

use super::*;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub struct MemoryBlockStorage {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
    root: PathBuf,
}

impl MemoryBlockStorage {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(BTreeMap::new()),
            root: PathBuf::from(":memory:"),
        }
    }

    fn key(path: &str) -> String {
        path.trim_matches('/').to_string()
    }

    fn not_found(path: &str) -> StorageError {
        StorageError::NotFound {
            key: path.to_string(),
        }
    }
}

impl Default for MemoryBlockStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockStorage for MemoryBlockStorage {
    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        self.files.write().insert(Self::key(path), data.to_vec());
        Ok(())
    }

    async fn truncate(&self, path: &str, len: u64) -> StorageResult<()> {
        let mut files = self.files.write();
        let file = files
            .get_mut(&Self::key(path))
            .ok_or_else(|| Self::not_found(path))?;
        file.truncate(len as usize);
        Ok(())
    }

    async fn append(&self, path: &str, data: &[u8]) -> StorageResult<u64> {
        let mut files = self.files.write();
        let file = files.entry(Self::key(path)).or_default();
        let offset = file.len() as u64;
        file.extend_from_slice(data);
        Ok(offset)
    }

    async fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        self.files
            .read()
            .get(&Self::key(path))
            .cloned()
            .ok_or_else(|| Self::not_found(path))
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let key = Self::key(path);
        let files = self.files.read();
        if files.contains_key(&key) {
            return Ok(true);
        }
        let dir = format!("{}/", key);
        Ok(files.keys().any(|k| k.starts_with(&dir)))
    }

    async fn size(&self, path: &str) -> StorageResult<u64> {
        self.files
            .read()
            .get(&Self::key(path))
            .map(|f| f.len() as u64)
            .ok_or_else(|| Self::not_found(path))
    }

    async fn sync(&self, _path: &str) -> StorageResult<()> {
        Ok(())
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        self.files.write().remove(&Self::key(path));
        Ok(())
    }

    async fn delete_dir(&self, path: &str) -> StorageResult<()> {
        let dir = format!("{}/", Self::key(path));
        self.files.write().retain(|k, _| !k.starts_with(&dir));
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let base = Self::key(prefix);
        let dir = format!("{}/", base);
        let mut results: Vec<String> = self
            .files
            .read()
            .keys()
            .filter_map(|k| k.strip_prefix(&dir))
            .filter_map(|rest| rest.split('/').next())
            .map(|child| format!("{}/{}", base, child))
            .collect();
        results.dedup();
        Ok(results)
    }

    async fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        let mut files = self.files.write();
        let data = files
            .remove(&Self::key(from))
            .ok_or_else(|| Self::not_found(from))?;
        files.insert(Self::key(to), data);
        Ok(())
    }

    async fn create_dir(&self, _path: &str) -> StorageResult<()> {
        Ok(())
    }

    fn root_path(&self) -> &Path {
        &self.root
    }
}
