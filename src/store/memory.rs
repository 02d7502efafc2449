//! In-memory [`ObjectStore`] for tests and local demos.
//!
//! Objects are kept in insertion order behind a `std::sync::RwLock`, so
//! listings come back in the order objects were put. Signed URLs use a
//! `memory://` scheme and carry the TTL as a query parameter.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ObjectStore, ObjectSummary};
use crate::error::{Result, ServiceError};

struct StoredObject {
    key: String,
    body: Vec<u8>,
    last_modified: DateTime<Utc>,
}

/// Process-local object store.
pub struct InMemoryStore {
    bucket: String,
    objects: RwLock<Vec<StoredObject>>,
    signing_enabled: AtomicBool,
    available: AtomicBool,
    get_calls: AtomicUsize,
}

impl InMemoryStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: RwLock::new(Vec::new()),
            signing_enabled: AtomicBool::new(true),
            available: AtomicBool::new(true),
            get_calls: AtomicUsize::new(0),
        }
    }

    /// Insert or replace an object. A replaced object keeps its listing position.
    pub fn put(&self, key: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.put_at(key, body, Utc::now());
    }

    pub fn put_at(&self, key: impl Into<String>, body: impl Into<Vec<u8>>, at: DateTime<Utc>) {
        let key = key.into();
        let body = body.into();
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        match objects.iter_mut().find(|o| o.key == key) {
            Some(existing) => {
                existing.body = body;
                existing.last_modified = at;
            }
            None => objects.push(StoredObject {
                key,
                body,
                last_modified: at,
            }),
        }
    }

    pub fn remove(&self, key: &str) {
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        objects.retain(|o| o.key != key);
    }

    /// Make [`signed_url`](ObjectStore::signed_url) fail, as when signing credentials are rejected.
    pub fn set_signing_enabled(&self, enabled: bool) {
        self.signing_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Make every call fail with a transport error.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of [`get_object`](ObjectStore::get_object) calls served so far.
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ServiceError::transport(format!(
                "memory://{} is unavailable",
                self.bucket
            )))
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new("memory")
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn list(&self, prefix: &str, max_keys: usize) -> Result<Vec<ObjectSummary>> {
        self.check_available()?;
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        Ok(objects
            .iter()
            .filter(|o| o.key.starts_with(prefix) && !o.key.ends_with('/'))
            .take(max_keys)
            .map(|o| ObjectSummary {
                key: o.key.clone(),
                size: o.body.len() as u64,
                last_modified: o.last_modified,
            })
            .collect())
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String> {
        self.check_available()?;
        if !self.signing_enabled.load(Ordering::SeqCst) {
            return Err(ServiceError::transport("signing is disabled"));
        }
        Ok(format!("{}?expires={}", self.public_url(key), ttl.as_secs()))
    }

    fn public_url(&self, key: &str) -> String {
        format!("memory://{}/{}", self.bucket, key)
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        self.check_available()?;
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects
            .iter()
            .find(|o| o.key == key)
            .map(|o| o.body.clone())
            .ok_or_else(|| ServiceError::not_found(self.public_url(key)))
    }

    async fn head_object(&self, key: &str) -> Result<bool> {
        self.check_available()?;
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        Ok(objects.iter().any(|o| o.key == key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_by_prefix_in_insertion_order() {
        let store = InMemoryStore::default();
        store.put("u1/b.docx", b"b".to_vec());
        store.put("u2/x.docx", b"x".to_vec());
        store.put("u1/a.docx", b"aa".to_vec());

        let listed = store.list("u1/", 1000).await.unwrap();
        let keys: Vec<_> = listed.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["u1/b.docx", "u1/a.docx"]);
        assert_eq!(listed[1].size, 2);
    }

    #[tokio::test]
    async fn list_respects_max_keys() {
        let store = InMemoryStore::default();
        for i in 0..5 {
            store.put(format!("u1/{}.docx", i), b"x".to_vec());
        }
        assert_eq!(store.list("u1/", 3).await.unwrap().len(), 3);
        assert!(store.list("nobody/", 1000).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let store = InMemoryStore::default();
        let err = store.get_object("nope.docx").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert!(!store.head_object("nope.docx").await.unwrap());
    }

    #[tokio::test]
    async fn signing_can_be_disabled() {
        let store = InMemoryStore::new("docs");
        store.put("a.docx", b"a".to_vec());
        assert_eq!(
            store
                .signed_url("a.docx", Duration::from_secs(60))
                .await
                .unwrap(),
            "memory://docs/a.docx?expires=60"
        );
        store.set_signing_enabled(false);
        assert!(store
            .signed_url("a.docx", Duration::from_secs(60))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn unavailable_store_reports_transport_errors() {
        let store = InMemoryStore::default();
        store.set_available(false);
        let err = store.list("", 10).await.unwrap_err();
        assert!(matches!(err, ServiceError::Transport(_)));
    }
}
