//! 上下文持久化
//!
//! 以开放的 JSON 映射保存完整上下文；加载端容忍缺失与未知字段。
//! JsonFilePersistence 先写临时文件再 rename，避免半写入的快照。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::core::AgentError;

/// 持久化层：persist(blob) / restore() -> blob
#[async_trait]
pub trait ContextPersistence: Send + Sync {
    async fn save(&self, blob: &Value) -> Result<(), AgentError>;

    /// 尚无任何快照时返回 Ok(None)
    async fn load(&self) -> Result<Option<Value>, AgentError>;
}

/// 单文件 JSON 持久化
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ContextPersistence for JsonFilePersistence {
    async fn save(&self, blob: &Value) -> Result<(), AgentError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let data = serde_json::to_string_pretty(blob)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn load(&self) -> Result<Option<Value>, AgentError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// 内存持久化（测试与无盘部署）
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    blob: Mutex<Option<Value>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(blob: Value) -> Self {
        Self {
            blob: Mutex::new(Some(blob)),
        }
    }

    pub async fn blob(&self) -> Option<Value> {
        self.blob.lock().await.clone()
    }
}

#[async_trait]
impl ContextPersistence for MemoryPersistence {
    async fn save(&self, blob: &Value) -> Result<(), AgentError> {
        *self.blob.lock().await = Some(blob.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<Value>, AgentError> {
        Ok(self.blob.lock().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_file_roundtrip_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePersistence::new(dir.path().join("data/context.json"));
        store.save(&json!({"phase": "ready"})).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, Some(json!({"phase": "ready"})));
        assert!(!dir.path().join("data/context.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePersistence::new(dir.path().join("absent.json"));
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_corrupt_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("context.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = JsonFilePersistence::new(&path).load().await.unwrap_err();
        assert!(matches!(err, AgentError::Persistence(_)));
    }
}
