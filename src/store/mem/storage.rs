use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use tracing::trace;

use crate::{
    PlugflowError, Result, ShareLock,
    store::{ObjectStorage, UploadBody, map_storage_err},
};

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub metadata: HashMap<String, String>,
}

/// Object storage kept in a map keyed by `(bucket, key)`.
#[derive(Debug, Clone, Default)]
pub struct MemObjectStorage {
    objects: ShareLock<HashMap<(String, String), StoredObject>>,
}

impl MemObjectStorage {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Keys stored in `bucket`, sorted.
    pub fn keys(
        &self,
        bucket: &str,
    ) -> Vec<String> {
        let objects = self.objects.read().unwrap();
        let mut keys: Vec<String> = objects.keys().filter(|(b, _)| b == bucket).map(|(_, k)| k.clone()).collect();
        keys.sort();
        keys
    }

    pub fn object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Option<StoredObject> {
        self.objects.read().unwrap().get(&(bucket.to_string(), key.to_string())).cloned()
    }
}

#[async_trait]
impl ObjectStorage for MemObjectStorage {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        body: UploadBody,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        let body = match body {
            UploadBody::Bytes(bytes) => bytes,
            UploadBody::Path(path) => tokio::fs::read(&path).await.map_err(map_storage_err)?,
        };
        trace!("upload {}/{} ({} bytes)", bucket, key, body.len());

        self.objects.write().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                body,
                metadata,
            },
        );
        Ok(())
    }

    async fn get(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Vec<u8>> {
        self.object(bucket, key).map(|o| o.body).ok_or(PlugflowError::Storage(format!("object {}/{} not found", bucket, key)))
    }

    async fn exists(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<bool> {
        Ok(self.objects.read().unwrap().contains_key(&(bucket.to_string(), key.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_and_get() {
        let storage = MemObjectStorage::new();
        storage.upload("plugins", "a/b.json", UploadBody::Bytes(b"{}".to_vec()), HashMap::new()).await.unwrap();

        assert!(storage.exists("plugins", "a/b.json").await.unwrap());
        assert!(!storage.exists("other", "a/b.json").await.unwrap());
        assert_eq!(storage.get("plugins", "a/b.json").await.unwrap(), b"{}".to_vec());
        assert!(matches!(storage.get("plugins", "missing").await, Err(PlugflowError::Storage(_))));
        assert_eq!(storage.keys("plugins"), vec!["a/b.json".to_string()]);
    }

    #[tokio::test]
    async fn test_upload_missing_path() {
        let storage = MemObjectStorage::new();
        let result = storage.upload("plugins", "k", UploadBody::Path("/nonexistent/plugflow/file".into()), HashMap::new()).await;
        assert!(matches!(result, Err(PlugflowError::Storage(_))));
    }
}
