//! Hierarchical JSON document store
//!
//! Documents are addressed by a key path such as
//! `["sessions", project_id, session_id]`. [`FileStorage`] maps a key to
//! `<root>/sessions/<project_id>/<session_id>.json`; [`MemoryStorage`] keeps
//! everything in a map and is used by tests and ephemeral runs.

use async_trait::async_trait;
use sdk::errors::EngineError;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Key → JSON document store
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write (create or replace) the document at `key`
    async fn write(&self, key: &[String], value: &Value) -> Result<()>;

    /// Read the document at `key`, `None` if absent
    async fn read(&self, key: &[String]) -> Result<Option<Value>>;

    /// Names of the documents stored directly under `prefix`, sorted
    async fn list_keys(&self, prefix: &[String]) -> Result<Vec<String>>;

    /// Names of the nested groups directly under `prefix`, sorted
    async fn list_groups(&self, prefix: &[String]) -> Result<Vec<String>>;

    /// Delete the document at `key`; deleting a missing key is not an error
    async fn delete(&self, key: &[String]) -> Result<()>;

    async fn exists(&self, key: &[String]) -> Result<bool> {
        Ok(self.read(key).await?.is_some())
    }
}

/// Build a key from string-like segments
pub fn key<I, S>(segments: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    segments.into_iter().map(|s| s.as_ref().to_string()).collect()
}

fn validate_key(key: &[String], allow_empty: bool) -> Result<()> {
    if key.is_empty() && !allow_empty {
        return Err(EngineError::Storage("empty storage key".to_string()));
    }
    for segment in key {
        if segment.is_empty()
            || segment == "."
            || segment == ".."
            || segment.contains('/')
            || segment.contains('\\')
        {
            return Err(EngineError::Storage(format!(
                "invalid key segment: {:?}",
                segment
            )));
        }
    }
    Ok(())
}

/// File-backed store rooted at a directory
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, key: &[String]) -> PathBuf {
        let mut path = self.root.clone();
        let (last, dirs) = match key.split_last() {
            Some(split) => split,
            None => return path,
        };
        for segment in dirs {
            path.push(segment);
        }
        path.push(format!("{}.json", last));
        path
    }

    fn group_path(&self, prefix: &[String]) -> PathBuf {
        let mut path = self.root.clone();
        for segment in prefix {
            path.push(segment);
        }
        path
    }

    async fn read_dir_names(&self, prefix: &[String], want_dirs: bool) -> Result<Vec<String>> {
        let dir = self.group_path(prefix);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(EngineError::Io(e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let name = entry.file_name().to_string_lossy().to_string();
            if want_dirs && file_type.is_dir() {
                names.push(name);
            } else if !want_dirs && file_type.is_file() {
                if let Some(stem) = name.strip_suffix(".json") {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn write(&self, key: &[String], value: &Value) -> Result<()> {
        validate_key(key, false)?;
        let path = self.document_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                EngineError::Storage(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        let body = serde_json::to_string_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await.map_err(|e| {
            EngineError::Storage(format!("failed to write {}: {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            EngineError::Storage(format!("failed to replace {}: {}", path.display(), e))
        })?;

        debug!("Stored document {}", path.display());
        Ok(())
    }

    async fn read(&self, key: &[String]) -> Result<Option<Value>> {
        validate_key(key, false)?;
        let path = self.document_path(key);
        let body = match tokio::fs::read_to_string(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(EngineError::Storage(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        Ok(Some(serde_json::from_str(&body)?))
    }

    async fn list_keys(&self, prefix: &[String]) -> Result<Vec<String>> {
        validate_key(prefix, true)?;
        self.read_dir_names(prefix, false).await
    }

    async fn list_groups(&self, prefix: &[String]) -> Result<Vec<String>> {
        validate_key(prefix, true)?;
        self.read_dir_names(prefix, true).await
    }

    async fn delete(&self, key: &[String]) -> Result<()> {
        validate_key(key, false)?;
        let path = self.document_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EngineError::Storage(format!(
                "failed to delete {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// In-memory store
#[derive(Default)]
pub struct MemoryStorage {
    documents: RwLock<BTreeMap<Vec<String>, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn write(&self, key: &[String], value: &Value) -> Result<()> {
        validate_key(key, false)?;
        self.documents
            .write()
            .await
            .insert(key.to_vec(), value.clone());
        Ok(())
    }

    async fn read(&self, key: &[String]) -> Result<Option<Value>> {
        validate_key(key, false)?;
        Ok(self.documents.read().await.get(key).cloned())
    }

    async fn list_keys(&self, prefix: &[String]) -> Result<Vec<String>> {
        validate_key(prefix, true)?;
        let documents = self.documents.read().await;
        Ok(documents
            .keys()
            .filter(|k| k.len() == prefix.len() + 1 && k.starts_with(prefix))
            .filter_map(|k| k.last().cloned())
            .collect())
    }

    async fn list_groups(&self, prefix: &[String]) -> Result<Vec<String>> {
        validate_key(prefix, true)?;
        let documents = self.documents.read().await;
        let groups: BTreeSet<String> = documents
            .keys()
            .filter(|k| k.len() > prefix.len() + 1 && k.starts_with(prefix))
            .map(|k| k[prefix.len()].clone())
            .collect();
        Ok(groups.into_iter().collect())
    }

    async fn delete(&self, key: &[String]) -> Result<()> {
        validate_key(key, false)?;
        self.documents.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn exercise(storage: &dyn Storage) {
        let doc = key(["sessions", "proj", "session_1"]);
        let msg_a = key(["sessions", "proj", "session_1", "messages", "message_a"]);
        let msg_b = key(["sessions", "proj", "session_1", "messages", "message_b"]);

        assert_eq!(storage.read(&doc).await.unwrap(), None);
        storage.write(&doc, &json!({"title": "t"})).await.unwrap();
        storage.write(&msg_b, &json!({"n": 2})).await.unwrap();
        storage.write(&msg_a, &json!({"n": 1})).await.unwrap();

        assert_eq!(storage.read(&doc).await.unwrap(), Some(json!({"title": "t"})));
        assert!(storage.exists(&msg_a).await.unwrap());

        let messages = storage
            .list_keys(&key(["sessions", "proj", "session_1", "messages"]))
            .await
            .unwrap();
        assert_eq!(messages, vec!["message_a", "message_b"]);

        // Documents and groups at the same level are listed separately.
        let sessions = storage.list_keys(&key(["sessions", "proj"])).await.unwrap();
        assert_eq!(sessions, vec!["session_1"]);
        let projects = storage.list_groups(&key(["sessions"])).await.unwrap();
        assert_eq!(projects, vec!["proj"]);

        storage.delete(&msg_a).await.unwrap();
        storage.delete(&msg_a).await.unwrap();
        assert_eq!(storage.read(&msg_a).await.unwrap(), None);

        assert!(storage.list_keys(&key(["nothing", "here"])).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_storage_operations() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path());
        exercise(&storage).await;

        let on_disk = dir.path().join("sessions/proj/session_1.json");
        assert!(on_disk.exists());
        assert!(!dir.path().join("sessions/proj/session_1.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_memory_storage_operations() {
        let storage = MemoryStorage::new();
        exercise(&storage).await;
        assert_eq!(storage.len().await, 2);
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let storage = MemoryStorage::new();
        let err = storage
            .write(&key(["sessions", ".."]), &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)));
        assert!(storage.read(&[]).await.is_err());
    }

    #[tokio::test]
    async fn test_file_storage_reports_corrupt_documents() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        let storage = FileStorage::new(dir.path());
        let err = storage.read(&key(["broken"])).await.unwrap_err();
        assert!(matches!(err, EngineError::Serialization(_)));
    }
}
