//! In-process bucket
//!
//! Backs `backend = "memory"` for local runs without credentials, and the
//! test suites. Same no-overwrite rule as the remote bucket.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use reqwest::Url;

use super::{public_object_url, ObjectStore, StorageError, UploadReceipt};

/// Base used for public URLs of in-memory objects
pub const MEMORY_BASE_URL: &str = "http://localhost/";

/// A stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

pub struct MemoryStore {
    bucket: String,
    objects: RwLock<BTreeMap<String, StoredObject>>,
    calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: RwLock::new(BTreeMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `upload` and `public_url` calls made so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Keys currently stored, sorted
    pub fn keys(&self) -> Vec<String> {
        match self.objects.read() {
            Ok(objects) => objects.keys().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().keys().cloned().collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        match self.objects.read() {
            Ok(objects) => objects.get(key).cloned(),
            Err(poisoned) => poisoned.into_inner().get(key).cloned(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<UploadReceipt, StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut objects = self
            .objects
            .write()
            .map_err(|_| StorageError::Api {
                status: 500,
                message: "memory store lock poisoned".to_string(),
            })?;

        if objects.contains_key(key) {
            return Err(StorageError::Duplicate(key.to_string()));
        }

        let size = bytes.len();
        objects.insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );

        Ok(UploadReceipt {
            key: key.to_string(),
            full_path: format!("{}/{}", self.bucket, key),
            size,
        })
    }

    fn public_url(&self, key: &str) -> Result<Url, StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let base = Url::parse(MEMORY_BASE_URL)
            .map_err(|e| StorageError::MalformedUrl(e.to_string()))?;
        public_object_url(&base, &self.bucket, key)
    }
}
