//! Evidence Store: content-addressed, immutable blob persistence.
//! `LocalDiskEvidenceStore` stands in behind the same `tokio::fs` write
//! pattern the source crate's `file_store.rs` uses for uploaded artifacts,
//! generalized to a trait so a real S3/GCS-backed store can be dropped in
//! later without touching callers.

use async_trait::async_trait;
use bytes::Bytes;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::config::EVIDENCE_STORE_ROOT;

#[derive(Debug, Error)]
pub enum EvidenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait EvidenceStore: Send + Sync {
    /// Writes an immutable blob under `key`, content-type `content_type`.
    /// Returns the key unchanged — callers persist it (`Finding.evidenceKey`
    /// / the report's object key).
    async fn put(&self, key: &str, content_type: &str, bytes: &[u8]) -> Result<String, EvidenceError>;

    async fn get(&self, key: &str) -> Result<Bytes, EvidenceError>;

    /// Mints a time-limited read URL, valid for 1 hour.
    fn signed_url(&self, key: &str) -> String;
}

pub struct LocalDiskEvidenceStore {
    root: String,
    url_signing_key: String,
}

impl LocalDiskEvidenceStore {
    pub fn new(url_signing_key: String) -> Self {
        LocalDiskEvidenceStore {
            root: EVIDENCE_STORE_ROOT.clone(),
            url_signing_key,
        }
    }

    fn path_for(&self, key: &str) -> std::path::PathBuf {
        std::path::Path::new(&self.root).join(key)
    }

    fn token_for(&self, key: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.url_signing_key.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(key.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

#[async_trait]
impl EvidenceStore for LocalDiskEvidenceStore {
    async fn put(&self, key: &str, _content_type: &str, bytes: &[u8]) -> Result<String, EvidenceError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(&path).await?;
        file.write_all(bytes).await?;
        Ok(key.to_string())
    }

    async fn get(&self, key: &str) -> Result<Bytes, EvidenceError> {
        Ok(Bytes::from(fs::read(self.path_for(key)).await?))
    }

    fn signed_url(&self, key: &str) -> String {
        let mut url = Url::parse("file:///").expect("static scheme parses");
        url.set_path(key);
        url.query_pairs_mut()
            .append_pair("token", &self.token_for(key))
            .append_pair("expires_in", "3600");
        url.to_string()
    }
}

pub fn evidence_key(finding_id: uuid::Uuid, timestamp: chrono::DateTime<chrono::Utc>) -> String {
    format!("evidence/{}/{}.json", finding_id, timestamp.to_rfc3339())
}

pub fn report_key(organization_id: uuid::Uuid, timestamp: chrono::DateTime<chrono::Utc>, ext: &str) -> String {
    format!("audit-reports/{}/{}.{}", organization_id, timestamp.to_rfc3339(), ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("EVIDENCE_STORE_ROOT", dir.path().to_str().unwrap());
        let store = LocalDiskEvidenceStore::new("test-key".to_string());
        let key = "evidence/test/2026-01-01T00:00:00Z.json";
        store.put(key, "application/json", b"{\"a\":1}").await.unwrap();
        let bytes = store.get(key).await.unwrap();
        assert_eq!(bytes.as_ref(), b"{\"a\":1}".as_ref());
    }

    #[test]
    fn signed_url_is_deterministic_for_same_key() {
        let store = LocalDiskEvidenceStore::new("test-key".to_string());
        assert_eq!(store.signed_url("a/b.json"), store.signed_url("a/b.json"));
    }
}
