//! Object storage clients
//!
//! One [`ObjectStore`] handle is built at startup by [`connect`] and shared as
//! `Arc<dyn ObjectStore>`. Keys are `<prefix>/<name>` paths inside a single
//! bucket; uploads never overwrite an existing key.

pub mod memory;
pub mod supabase;

pub use memory::MemoryStore;
pub use supabase::SupabaseStore;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use wavdrop_common::config::{StorageBackend, StorageConfig};

/// Object storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// The key already exists in the bucket
    #[error("Object already exists: {0}")]
    Duplicate(String),

    /// Credentials rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Any other non-success response
    #[error("Storage API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Request never produced a response
    #[error("Network error: {0}")]
    Network(String),

    /// Public URL could not be formed
    #[error("Malformed URL: {0}")]
    MalformedUrl(String),

    /// Client could not be constructed from configuration
    #[error("Storage configuration error: {0}")]
    Config(String),
}

/// Successful upload acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReceipt {
    /// Key inside the bucket
    pub key: String,
    /// Bucket-qualified path reported by the backend (`<bucket>/<key>`)
    pub full_path: String,
    pub size: usize,
}

/// A bucket that accepts uploads and resolves public URLs
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Backend name for logs and `/health`
    fn backend(&self) -> &'static str;

    /// Target bucket
    fn bucket(&self) -> &str;

    /// Store `bytes` under `key`; an existing key is rejected with
    /// [`StorageError::Duplicate`]
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<UploadReceipt, StorageError>;

    /// Public URL of `key`; no request is made
    fn public_url(&self, key: &str) -> Result<Url, StorageError>;
}

/// Build the storage handle described by `config`
pub fn connect(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>, StorageError> {
    let store: Arc<dyn ObjectStore> = match config.backend {
        StorageBackend::Supabase => Arc::new(SupabaseStore::from_config(config)?),
        StorageBackend::Memory => Arc::new(MemoryStore::new(config.bucket.clone())),
    };

    info!(
        backend = store.backend(),
        bucket = store.bucket(),
        "Object storage client ready"
    );
    Ok(store)
}

/// `<base>/storage/v1/object/public/<bucket>/<key>`
pub(crate) fn public_object_url(base: &Url, bucket: &str, key: &str) -> Result<Url, StorageError> {
    storage_url(base, &["object", "public", bucket], key)
}

/// `<base>/storage/v1/<segments..>/<key>` with every path segment
/// percent-encoded; `/` inside `key` keeps separating segments
pub(crate) fn storage_url(base: &Url, segments: &[&str], key: &str) -> Result<Url, StorageError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| StorageError::MalformedUrl(format!("{} cannot be a base URL", base)))?
        .pop_if_empty()
        .extend(["storage", "v1"])
        .extend(segments)
        .extend(key.split('/'));
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_memory_backend() {
        let config = StorageConfig {
            backend: StorageBackend::Memory,
            bucket: "demo".to_string(),
            ..Default::default()
        };
        let store = connect(&config).unwrap();
        assert_eq!(store.backend(), "memory");
        assert_eq!(store.bucket(), "demo");
    }

    #[test]
    fn test_connect_supabase_requires_credentials() {
        let config = StorageConfig {
            backend: StorageBackend::Supabase,
            url: None,
            api_key: Some("key".to_string()),
            ..Default::default()
        };
        assert!(matches!(connect(&config), Err(StorageError::Config(_))));

        let config = StorageConfig {
            backend: StorageBackend::Supabase,
            url: Some("https://project.supabase.co".to_string()),
            api_key: None,
            ..Default::default()
        };
        assert!(matches!(connect(&config), Err(StorageError::Config(_))));
    }

    #[test]
    fn test_connect_supabase_rejects_bad_url() {
        let config = StorageConfig {
            backend: StorageBackend::Supabase,
            url: Some("not a url".to_string()),
            api_key: Some("key".to_string()),
            ..Default::default()
        };
        assert!(matches!(connect(&config), Err(StorageError::Config(_))));
    }

    #[test]
    fn test_public_object_url_layout() {
        let base = Url::parse("https://project.supabase.co/").unwrap();
        let url = public_object_url(&base, "my-audio-bucket", "audio/processed_a.wav").unwrap();
        assert_eq!(
            url.as_str(),
            "https://project.supabase.co/storage/v1/object/public/my-audio-bucket/audio/processed_a.wav"
        );
    }

    #[test]
    fn test_public_object_url_encodes_unsafe_characters() {
        let base = Url::parse("https://project.supabase.co").unwrap();
        let url = public_object_url(&base, "b", "audio/processed_a#1.wav").unwrap();
        assert_eq!(
            url.path(),
            "/storage/v1/object/public/b/audio/processed_a%231.wav"
        );
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn test_public_object_url_keeps_base_path() {
        let base = Url::parse("http://127.0.0.1:9000/proxy/").unwrap();
        let url = public_object_url(&base, "b", "spectrograms/x.png").unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:9000/proxy/storage/v1/object/public/b/spectrograms/x.png"
        );
    }

    #[test]
    fn test_public_object_url_rejects_opaque_base() {
        let base = Url::parse("mailto:someone@example.com").unwrap();
        assert!(matches!(
            public_object_url(&base, "b", "audio/x.wav"),
            Err(StorageError::MalformedUrl(_))
        ));
    }
}
