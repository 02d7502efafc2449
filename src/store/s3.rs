//! S3-compatible object store.
//!
//! Talks to the S3 REST API directly with
//! [AWS Signature Version 4](https://docs.aws.amazon.com/AmazonS3/latest/API/sigv4-auth-using-authorization-header.html),
//! which Tencent COS, AWS S3, and MinIO all accept. Signing uses only the
//! pure-Rust `hmac` and `sha2` crates.
//!
//! # Configuration
//!
//! ```toml
//! [storage]
//! bucket = "essays-1250000000"
//! region = "ap-guangzhou"
//! # Virtual-host style, `{bucket}` is substituted:
//! endpoint_url = "https://{bucket}.cos.ap-guangzhou.myqcloud.com"
//! # Path style (MinIO, LocalStack):
//! # endpoint_url = "http://localhost:9000"
//! ```
//!
//! Without `endpoint_url` the AWS host `<bucket>.s3.<region>.amazonaws.com`
//! is used.
//!
//! # Environment Variables
//!
//! - `STORAGE_ACCESS_KEY_ID` (or `AWS_ACCESS_KEY_ID`): required
//! - `STORAGE_SECRET_ACCESS_KEY` (or `AWS_SECRET_ACCESS_KEY`): required
//! - `STORAGE_SESSION_TOKEN` (or `AWS_SESSION_TOKEN`): optional
//!
//! # Requests
//!
//! | Operation | S3 call | Auth |
//! |-----------|---------|------|
//! | list | `ListObjectsV2` (single page, `max-keys` ≤ 1000) | header |
//! | get | `GetObject` | header |
//! | head | `HeadObject` | header |
//! | signed URL | presigned `GET` | query string |

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{ObjectStore, ObjectSummary};
use crate::config::StorageConfig;
use crate::error::{Result, ServiceError};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
/// Presigned URLs may not outlive seven days.
const MAX_PRESIGN_SECS: u64 = 7 * 24 * 3600;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============ Credentials ============

/// Access credentials for the storage service.
#[derive(Clone)]
pub struct Credentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl Credentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }

    /// Read credentials from `STORAGE_*`, falling back to `AWS_*`.
    pub fn from_env() -> Result<Self> {
        let access_key_id = env_either("STORAGE_ACCESS_KEY_ID", "AWS_ACCESS_KEY_ID")
            .ok_or_else(|| ServiceError::configuration("STORAGE_ACCESS_KEY_ID not set"))?;
        let secret_access_key = env_either("STORAGE_SECRET_ACCESS_KEY", "AWS_SECRET_ACCESS_KEY")
            .ok_or_else(|| ServiceError::configuration("STORAGE_SECRET_ACCESS_KEY not set"))?;
        let session_token = env_either("STORAGE_SESSION_TOKEN", "AWS_SESSION_TOKEN");

        Ok(Self::new(access_key_id, secret_access_key, session_token))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn env_either(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|v| !v.is_empty()))
}

// ============ Endpoint ============

/// Where requests go and how keys map onto URL paths.
#[derive(Debug, Clone)]
struct Endpoint {
    scheme: String,
    host: String,
    /// Path style puts the bucket in the path (`/<bucket>/<key>`).
    path_style: bool,
}

impl Endpoint {
    fn from_config(cfg: &StorageConfig) -> Self {
        match cfg.endpoint_url.as_deref() {
            Some(url) => {
                let (scheme, rest) = match url.split_once("://") {
                    Some((scheme, rest)) => (scheme.to_string(), rest),
                    None => ("https".to_string(), url),
                };
                let rest = rest.trim_end_matches('/');
                if rest.contains("{bucket}") {
                    Endpoint {
                        scheme,
                        host: rest.replace("{bucket}", &cfg.bucket),
                        path_style: false,
                    }
                } else {
                    Endpoint {
                        scheme,
                        host: rest.to_string(),
                        path_style: true,
                    }
                }
            }
            None => Endpoint {
                scheme: "https".to_string(),
                host: format!("{}.s3.{}.amazonaws.com", cfg.bucket, cfg.region),
                path_style: false,
            },
        }
    }

    fn base_url(&self) -> String {
        format!("{}://{}", self.scheme, self.host)
    }
}

// ============ Store ============

/// [`ObjectStore`] backed by an S3-compatible REST endpoint.
pub struct S3Store {
    bucket: String,
    region: String,
    endpoint: Endpoint,
    creds: Credentials,
    client: reqwest::Client,
}

impl S3Store {
    /// Build a store using credentials from the environment.
    pub fn from_config(cfg: &StorageConfig) -> Result<Self> {
        Self::with_credentials(cfg, Credentials::from_env()?)
    }

    pub fn with_credentials(cfg: &StorageConfig, creds: Credentials) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ServiceError::configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            bucket: cfg.bucket.clone(),
            region: cfg.region.clone(),
            endpoint: Endpoint::from_config(cfg),
            creds,
            client,
        })
    }

    /// Canonical (already encoded) URI path for an object key.
    fn object_path(&self, key: &str) -> String {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        if self.endpoint.path_style {
            format!("/{}/{}", uri_encode(&self.bucket), encoded_key)
        } else {
            format!("/{}", encoded_key)
        }
    }

    fn bucket_path(&self) -> String {
        if self.endpoint.path_style {
            format!("/{}", uri_encode(&self.bucket))
        } else {
            "/".to_string()
        }
    }

    /// Headers for a header-authenticated request with an empty body.
    fn signed_headers(
        &self,
        method: &str,
        canonical_uri: &str,
        query: &[(String, String)],
        now: DateTime<Utc>,
    ) -> Vec<(String, String)> {
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(b"");

        let mut headers = vec![
            ("host".to_string(), self.endpoint.host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method,
            canonical_uri,
            canonical_query(query),
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = self.credential_scope(&date_stamp);
        let signature = self.sign(&date_stamp, &amz_date, &credential_scope, &canonical_request);

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut out = vec![
            ("Authorization".to_string(), authorization),
            ("x-amz-content-sha256".to_string(), payload_hash),
            ("x-amz-date".to_string(), amz_date),
        ];
        if let Some(ref token) = self.creds.session_token {
            out.push(("x-amz-security-token".to_string(), token.clone()));
        }
        out
    }

    /// Query-string presigned `GET` URL for `key`, valid from `now` for `ttl`.
    fn presign_at(&self, key: &str, ttl: Duration, now: DateTime<Utc>) -> Result<String> {
        let expires = ttl.as_secs();
        if expires == 0 || expires > MAX_PRESIGN_SECS {
            return Err(ServiceError::bad_request(format!(
                "signed URL lifetime must be in 1..={} seconds, got {}",
                MAX_PRESIGN_SECS, expires
            )));
        }

        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let credential_scope = self.credential_scope(&date_stamp);
        let canonical_uri = self.object_path(key);

        let mut query = vec![
            ("X-Amz-Algorithm".to_string(), ALGORITHM.to_string()),
            (
                "X-Amz-Credential".to_string(),
                format!("{}/{}", self.creds.access_key_id, credential_scope),
            ),
            ("X-Amz-Date".to_string(), amz_date.clone()),
            ("X-Amz-Expires".to_string(), expires.to_string()),
            ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
        ];
        if let Some(ref token) = self.creds.session_token {
            query.push(("X-Amz-Security-Token".to_string(), token.clone()));
        }

        let canonical_querystring = canonical_query(&query);
        let canonical_request = format!(
            "GET\n{}\n{}\nhost:{}\n\nhost\n{}",
            canonical_uri, canonical_querystring, self.endpoint.host, UNSIGNED_PAYLOAD
        );
        let signature = self.sign(&date_stamp, &amz_date, &credential_scope, &canonical_request);

        Ok(format!(
            "{}{}?{}&X-Amz-Signature={}",
            self.endpoint.base_url(),
            canonical_uri,
            canonical_querystring,
            signature
        ))
    }

    fn credential_scope(&self, date_stamp: &str) -> String {
        format!("{}/{}/s3/aws4_request", date_stamp, self.region)
    }

    fn sign(
        &self,
        date_stamp: &str,
        amz_date: &str,
        credential_scope: &str,
        canonical_request: &str,
    ) -> String {
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );
        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            date_stamp,
            &self.region,
            "s3",
        );
        hex_hmac_sha256(&signing_key, string_to_sign.as_bytes())
    }

    async fn send(
        &self,
        method: reqwest::Method,
        canonical_uri: &str,
        query: &[(String, String)],
    ) -> Result<reqwest::Response> {
        let headers = self.signed_headers(method.as_str(), canonical_uri, query, Utc::now());
        let mut url = format!("{}{}", self.endpoint.base_url(), canonical_uri);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&canonical_query(query));
        }

        let mut req = self.client.request(method, &url);
        for (name, value) in &headers {
            req = req.header(name.as_str(), value.as_str());
        }
        Ok(req.send().await?)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list(&self, prefix: &str, max_keys: usize) -> Result<Vec<ObjectSummary>> {
        let mut query = vec![
            ("list-type".to_string(), "2".to_string()),
            ("max-keys".to_string(), max_keys.clamp(1, 1000).to_string()),
        ];
        if !prefix.is_empty() {
            query.push(("prefix".to_string(), prefix.to_string()));
        }

        let resp = self
            .send(reqwest::Method::GET, &self.bucket_path(), &query)
            .await
            .map_err(|e| {
                ServiceError::transport(format!(
                    "listing s3://{}/{} failed: {}",
                    self.bucket, prefix, e
                ))
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::transport(format!(
                "ListObjectsV2 failed (HTTP {}): {}",
                status,
                body.chars().take(500).collect::<String>()
            )));
        }

        let xml_body = resp.text().await?;
        let objects = parse_list_objects_response(&xml_body);
        debug!(prefix, count = objects.len(), "listed objects");
        Ok(objects)
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> Result<String> {
        self.presign_at(key, ttl, Utc::now())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}{}", self.endpoint.base_url(), self.object_path(key))
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let resp = self
            .send(reqwest::Method::GET, &self.object_path(key), &[])
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ServiceError::not_found(format!(
                "s3://{}/{}",
                self.bucket, key
            )));
        }
        if !status.is_success() {
            return Err(ServiceError::transport(format!(
                "GetObject failed (HTTP {}) for key '{}'",
                status, key
            )));
        }

        Ok(resp.bytes().await?.to_vec())
    }

    async fn head_object(&self, key: &str) -> Result<bool> {
        let resp = self
            .send(reqwest::Method::HEAD, &self.object_path(key), &[])
            .await?;

        let status = resp.status();
        if status.is_success() {
            Ok(true)
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Ok(false)
        } else {
            Err(ServiceError::transport(format!(
                "HeadObject failed (HTTP {}) for key '{}'",
                status, key
            )))
        }
    }
}

// ============ SigV4 Helpers ============

/// Sorted, RFC 3986-encoded query string.
fn canonical_query(params: &[(String, String)]) -> String {
    let mut sorted: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();
    sorted.sort();
    sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the SigV4 signing key.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// Encode everything except `A-Z a-z 0-9 - _ . ~` (RFC 3986).
fn uri_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

// ============ XML Parsing ============

/// Parse the `<Contents>` entries of a `ListObjectsV2` response.
///
/// Directory placeholder keys (ending in `/`) are skipped.
fn parse_list_objects_response(xml: &str) -> Vec<ObjectSummary> {
    let mut objects = Vec::new();
    let mut remaining = xml;

    while let Some(start) = remaining.find("<Contents>") {
        let block_start = start + "<Contents>".len();
        let Some(end) = remaining[block_start..].find("</Contents>") else {
            break;
        };
        let block = &remaining[block_start..block_start + end];
        remaining = &remaining[block_start + end + "</Contents>".len()..];

        let key = extract_xml_value(block, "Key").unwrap_or_default();
        if key.is_empty() || key.ends_with('/') {
            continue;
        }

        let last_modified = extract_xml_value(block, "LastModified")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_default();

        let size = extract_xml_value(block, "Size")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        objects.push(ObjectSummary {
            key,
            size,
            last_modified,
        });
    }

    objects
}

/// Text content of a simple (non-nested) XML element, entity-unescaped.
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    let raw = &xml[start..start + end];
    Some(
        quick_xml::escape::unescape(raw)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| raw.to_string()),
    )
}
