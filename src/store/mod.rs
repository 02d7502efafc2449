//! Object storage abstraction.
//!
//! The [`ObjectStore`] trait covers the four calls the core makes against
//! a blob store: list by prefix, sign a time-limited read URL, fetch bytes,
//! and probe existence. Implementations:
//!
//! - [`s3::S3Store`]: any S3-compatible service (Tencent COS, AWS S3,
//!   MinIO) via the REST API with SigV4 signing.
//! - [`memory::InMemoryStore`]: process-local store for tests and demos.
//!
//! Stores are constructed once at startup and shared behind an `Arc`.

pub mod memory;
pub mod s3;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// Listing entry for one stored object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSummary {
    /// Full object key.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Read access to a key/value blob namespace.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`list`](ObjectStore::list) | Objects under a prefix, in store order |
/// | [`signed_url`](ObjectStore::signed_url) | Time-limited read URL |
/// | [`public_url`](ObjectStore::public_url) | Unsigned URL for public-read objects |
/// | [`get_object`](ObjectStore::get_object) | Object content |
/// | [`head_object`](ObjectStore::head_object) | Existence probe |
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List up to `max_keys` objects whose key starts with `prefix`.
    ///
    /// An empty result is not an error.
    async fn list(&self, prefix: &str, max_keys: usize) -> Result<Vec<ObjectSummary>>;

    /// Produce a URL that grants read access to `key` for `ttl`.
    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String>;

    /// Unsigned URL for `key`. Only readable when the object is public.
    fn public_url(&self, key: &str) -> String;

    /// Fetch the object content. A missing key is [`ServiceError::NotFound`](crate::error::ServiceError::NotFound).
    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;

    /// Whether `key` exists.
    async fn head_object(&self, key: &str) -> Result<bool>;
}
