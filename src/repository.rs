//! Document repository on top of an [`ObjectStore`].
//!
//! Turns raw listings into [`DocumentRecord`]s (title, type, and grade are
//! derived from the key) and resolves identifiers to something a caller can
//! read. Every identifier passes through
//! [`correct_identifier`](crate::identifier::correct_identifier) before it
//! reaches the store.
//!
//! # Access resolution
//!
//! ```text
//! signed URL ──(signing failed)──▶ exists? ──yes──▶ public URL
//!                                      │
//!                                      └─no / error──▶ corrected key
//! ```
//!
//! The corrected key is used unless only the uncorrected one exists in the
//! store, which covers objects uploaded before keys were normalized.
//!
//! A [`AccessLocation::Key`] result tells the caller to fetch by key with
//! [`DocumentRepository::fetch_bytes`] instead of over HTTP.

use std::borrow::Cow;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::StorageConfig;
use crate::error::{Result, ServiceError};
use crate::identifier::correct_identifier;
use crate::models::{DocumentRecord, DocumentType};
use crate::store::{ObjectStore, ObjectSummary};

/// Suffix tokens that mark a document's role, checked against the end of the file stem.
const TYPE_SUFFIXES: &[(&str, DocumentType)] = &[
    ("老师修改终稿", DocumentType::TeacherFinal),
    ("teacher-final", DocumentType::TeacherFinal),
    ("teacher_final", DocumentType::TeacherFinal),
    ("AI批改", DocumentType::AiReview),
    ("ai-review", DocumentType::AiReview),
    ("ai_review", DocumentType::AiReview),
    ("AI优化", DocumentType::AiImproved),
    ("ai-improved", DocumentType::AiImproved),
    ("ai_improved", DocumentType::AiImproved),
    ("初稿", DocumentType::Draft),
    ("draft", DocumentType::Draft),
    ("提纲", DocumentType::Outline),
    ("outline", DocumentType::Outline),
];

static GRADE_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:grade[-_ ]?\d{1,2}|.*年级.*)$").expect("grade pattern is a valid regex")
});

fn is_separator(c: char) -> bool {
    matches!(c, '-' | '_' | ' ' | '.' | '—' | '（' | '）' | '(' | ')')
}

/// Where a document can be read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "url", rename_all = "lowercase")]
pub enum AccessLocation {
    /// Time-limited signed URL.
    Signed(String),
    /// Unsigned URL; readable only for public objects.
    Public(String),
    /// No URL could be produced; fetch by this (corrected) key instead.
    Key(String),
}

impl AccessLocation {
    pub fn as_str(&self) -> &str {
        match self {
            AccessLocation::Signed(s) | AccessLocation::Public(s) | AccessLocation::Key(s) => s,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AccessLocation::Signed(_) => "signed",
            AccessLocation::Public(_) => "public",
            AccessLocation::Key(_) => "key",
        }
    }

    /// The URL, if this location is one.
    pub fn url(&self) -> Option<&str> {
        match self {
            AccessLocation::Signed(s) | AccessLocation::Public(s) => Some(s),
            AccessLocation::Key(_) => None,
        }
    }
}

/// Read-only view of stored essay documents.
#[derive(Clone)]
pub struct DocumentRepository {
    store: Arc<dyn ObjectStore>,
    public_base_url: Option<String>,
    page_size: usize,
    default_ttl: Duration,
    suffix_tokens: Vec<String>,
}

impl DocumentRepository {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        storage: &StorageConfig,
        suffix_tokens: Vec<String>,
    ) -> Self {
        let mut suffix_tokens = suffix_tokens;
        // Longest first so "ai-improved" is not cut as "…-improved".
        suffix_tokens.sort_by_key(|t| std::cmp::Reverse(t.chars().count()));

        Self {
            store,
            public_base_url: storage
                .public_base_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
            page_size: storage.page_size.clamp(1, 1000),
            default_ttl: Duration::from_secs(storage.url_ttl_secs),
            suffix_tokens,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Documents under `prefix`, in store order, without access URLs.
    pub async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<DocumentRecord>> {
        let objects = self.store.list(prefix, self.page_size).await?;
        debug!(prefix, count = objects.len(), "listed documents");
        Ok(objects.iter().map(|o| self.describe(o)).collect())
    }

    /// Build the record for one listing entry.
    pub fn describe(&self, object: &ObjectSummary) -> DocumentRecord {
        DocumentRecord {
            identifier: object.key.clone(),
            title: derive_title(&object.key, &self.suffix_tokens),
            doc_type: infer_type(&object.key),
            grade: infer_grade(&object.key),
            size_bytes: object.size,
            last_modified: object.last_modified,
            access_url: None,
        }
    }

    /// Resolve `identifier` to a readable location. Never fails; see the module docs.
    pub async fn resolve_access_url(&self, identifier: &str, ttl: Duration) -> AccessLocation {
        let key = self.storage_key(identifier).await;

        match self.store.signed_url(&key, ttl).await {
            Ok(url) => return AccessLocation::Signed(url),
            Err(e) => warn!(key = %key, error = %e, "signing failed, trying public URL"),
        }

        match self.exists(&key).await {
            Ok(true) => AccessLocation::Public(self.public_url(&key)),
            Ok(false) => {
                debug!(key = %key, "object not found, returning key");
                AccessLocation::Key(key)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "existence probe failed, returning key");
                AccessLocation::Key(key)
            }
        }
    }

    /// Key the object actually lives under.
    ///
    /// The corrected key wins unless only the original is present in the
    /// store. Signing is local, so a URL for a key that was never written
    /// would look valid and 404 on use.
    async fn storage_key(&self, identifier: &str) -> String {
        let key = correct_identifier(identifier);
        let Cow::Owned(corrected) = key else {
            return identifier.to_string();
        };
        match self.store.head_object(&corrected).await {
            Ok(true) => return corrected,
            Ok(false) => {}
            Err(e) => {
                warn!(key = %corrected, error = %e, "existence probe failed, using corrected key");
                return corrected;
            }
        }
        match self.store.head_object(identifier).await {
            Ok(true) => {
                debug!(key = identifier, "only the uncorrected key exists");
                identifier.to_string()
            }
            _ => corrected,
        }
    }

    /// Fetch content by storage key, bypassing URL signing.
    ///
    /// Tries the corrected key first, then the identifier as given.
    pub async fn fetch_bytes(&self, identifier: &str) -> Result<Vec<u8>> {
        let key = correct_identifier(identifier);
        match self.store.get_object(&key).await {
            Err(ServiceError::NotFound(msg)) if matches!(key, Cow::Owned(_)) => {
                debug!(key = %key, "corrected key not found, trying original");
                self.store
                    .get_object(identifier)
                    .await
                    .map_err(|e| match e {
                        ServiceError::NotFound(_) => ServiceError::NotFound(msg),
                        other => other,
                    })
            }
            other => other,
        }
    }

    /// Whether the document exists under its corrected or original key.
    pub async fn exists(&self, identifier: &str) -> Result<bool> {
        let key = correct_identifier(identifier);
        if self.store.head_object(&key).await? {
            return Ok(true);
        }
        if matches!(key, Cow::Owned(_)) {
            return self.store.head_object(identifier).await;
        }
        Ok(false)
    }

    /// Unsigned URL for `key`, from `storage.public_base_url` when set.
    pub fn public_url(&self, key: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/{}", base, key.trim_start_matches('/')),
            None => self.store.public_url(key),
        }
    }
}

fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

fn file_stem(key: &str) -> &str {
    let name = file_name(key);
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

/// Strip `token` from the end of `s`, ASCII case-insensitively.
fn strip_suffix_ci<'a>(s: &'a str, token: &str) -> Option<&'a str> {
    if token.is_empty() || s.len() < token.len() {
        return None;
    }
    let cut = s.len() - token.len();
    if !s.is_char_boundary(cut) {
        return None;
    }
    if !s[cut..].eq_ignore_ascii_case(token) {
        return None;
    }
    let rest = &s[..cut];
    // ASCII tokens only match whole words: "Overdraft" keeps its "draft".
    let glued = token.starts_with(|c: char| c.is_ascii_alphanumeric())
        && rest.ends_with(|c: char| c.is_ascii_alphanumeric());
    (!glued).then_some(rest)
}

/// Comparable title: the file stem without extension or generated-suffix tokens.
///
/// `u1/我的暑假生活-初稿.docx` → `我的暑假生活`. A stem made only of suffix
/// tokens is returned as-is.
pub fn derive_title(key: &str, suffix_tokens: &[String]) -> String {
    let stem = file_stem(key);
    let mut title = stem.trim_end_matches(is_separator);

    loop {
        let stripped = suffix_tokens
            .iter()
            .find_map(|t| strip_suffix_ci(title, t))
            .map(|rest| rest.trim_end_matches(is_separator));
        match stripped {
            Some(rest) => title = rest,
            None => break,
        }
    }

    let title = title.trim_matches(is_separator);
    if title.is_empty() {
        stem.trim().to_string()
    } else {
        title.to_string()
    }
}

/// Document role from the filename suffix, then from directory names.
pub fn infer_type(key: &str) -> DocumentType {
    let stem = file_stem(key).trim_end_matches(is_separator);
    let by_suffix = TYPE_SUFFIXES
        .iter()
        .filter_map(|(token, t)| strip_suffix_ci(stem, token).map(|rest| (rest.len(), *t)))
        // the token that ends furthest left is the longest match
        .min_by_key(|(rest_len, _)| *rest_len)
        .map(|(_, t)| t);
    if let Some(t) = by_suffix {
        return t;
    }

    let mut segments: Vec<&str> = key.split('/').collect();
    segments.pop();
    segments
        .iter()
        .rev()
        .find_map(|seg| seg.parse::<DocumentType>().ok())
        .filter(|t| *t != DocumentType::Unknown)
        .unwrap_or(DocumentType::Unknown)
}

/// First directory name that names a grade (`三年级`, `grade3`), else empty.
pub fn infer_grade(key: &str) -> String {
    let mut segments: Vec<&str> = key.split('/').collect();
    segments.pop();
    segments
        .into_iter()
        .find(|seg| GRADE_SEGMENT.is_match(seg))
        .map(str::to_string)
        .unwrap_or_default()
}
