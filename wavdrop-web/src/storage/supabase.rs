//! Supabase Storage REST client
//!
//! Upload: `POST {base}/storage/v1/object/{bucket}/{key}` with the raw file as
//! body. Public objects are served from
//! `{base}/storage/v1/object/public/{bucket}/{key}`, so public URLs are built
//! locally without a request.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, warn};
use wavdrop_common::config::{is_valid_key, StorageConfig};

use super::{public_object_url, storage_url, ObjectStore, StorageError, UploadReceipt};

const USER_AGENT: &str = concat!("wavdrop/", env!("CARGO_PKG_VERSION"));
const CACHE_CONTROL_VALUE: &str = "max-age=3600";

/// Successful upload body, e.g. `{"Key":"my-audio-bucket/audio/x.wav","Id":"..."}`
#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(rename = "Key")]
    key: Option<String>,
}

/// Error body, e.g. `{"statusCode":"409","error":"Duplicate","message":"..."}`
#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(rename = "statusCode")]
    status_code: Option<serde_json::Value>,
    error: Option<String>,
    message: Option<String>,
}

impl ErrorResponse {
    fn is_duplicate(&self) -> bool {
        let code_409 = match &self.status_code {
            Some(serde_json::Value::String(code)) => code == "409",
            Some(serde_json::Value::Number(code)) => code.as_u64() == Some(409),
            _ => false,
        };
        code_409 || self.error.as_deref() == Some("Duplicate")
    }

    fn describe(&self, fallback: &str) -> String {
        match (&self.error, &self.message) {
            (Some(error), Some(message)) => format!("{}: {}", error, message),
            (None, Some(message)) => message.clone(),
            (Some(error), None) => error.clone(),
            (None, None) => fallback.to_string(),
        }
    }
}

/// Supabase Storage bucket client
pub struct SupabaseStore {
    http_client: reqwest::Client,
    base_url: Url,
    bucket: String,
}

impl SupabaseStore {
    /// Build a client for `base_url` authenticated with `api_key`
    pub fn new(
        base_url: &str,
        api_key: &str,
        bucket: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, StorageError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| StorageError::Config(format!("Invalid storage URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(StorageError::Config(format!(
                "Storage URL '{}' cannot hold a path",
                base_url
            )));
        }

        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| StorageError::Config(format!("Invalid API key: {}", e)))?;
        let apikey = HeaderValue::from_str(api_key)
            .map_err(|e| StorageError::Config(format!("Invalid API key: {}", e)))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert("apikey", apikey);

        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder
            .build()
            .map_err(|e| StorageError::Config(format!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
            bucket: bucket.into(),
        })
    }

    /// Build from the `[storage]` section; URL and key are required
    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        let url = config
            .url
            .as_deref()
            .filter(|u| is_valid_key(u))
            .ok_or_else(|| StorageError::Config("storage URL is not set".to_string()))?;
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| is_valid_key(k))
            .ok_or_else(|| StorageError::Config("storage API key is not set".to_string()))?;

        Self::new(
            url,
            api_key,
            config.bucket.clone(),
            config.request_timeout_secs.map(Duration::from_secs),
        )
    }

    fn object_url(&self, key: &str) -> Result<Url, StorageError> {
        storage_url(&self.base_url, &["object", &self.bucket], key)
    }
}

#[async_trait]
impl ObjectStore for SupabaseStore {
    fn backend(&self) -> &'static str {
        "supabase"
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
        let url = self.object_url(key)?;
        let size = bytes.len();

        debug!(key = %key, size, url = %url, "Uploading object");

        let response = self
            .http_client
            .post(url)
            .header(CONTENT_TYPE, content_type)
            .header(CACHE_CONTROL, CACHE_CONTROL_VALUE)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?;

        if status.is_success() {
            let full_path = serde_json::from_str::<UploadResponse>(&body)
                .ok()
                .and_then(|r| r.key)
                .unwrap_or_else(|| format!("{}/{}", self.bucket, key));
            debug!(key = %key, full_path = %full_path, "Upload accepted");
            return Ok(UploadReceipt {
                key: key.to_string(),
                full_path,
                size,
            });
        }

        let error_body: ErrorResponse = serde_json::from_str(&body).unwrap_or_default();
        let fallback = status
            .canonical_reason()
            .unwrap_or("unknown status")
            .to_string();

        let err = if status == StatusCode::CONFLICT || error_body.is_duplicate() {
            StorageError::Duplicate(key.to_string())
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            StorageError::Unauthorized(error_body.describe(&fallback))
        } else {
            StorageError::Api {
                status: status.as_u16(),
                message: error_body.describe(&fallback),
            }
        };

        warn!(key = %key, status = status.as_u16(), error = %err, "Upload rejected");
        Err(err)
    }

    fn public_url(&self, key: &str) -> Result<Url, StorageError> {
        public_object_url(&self.base_url, &self.bucket, key)
    }
}
