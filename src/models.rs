//! Core data models shared by the search, repository, and comparison layers.
//!
//! [`DocumentRecord`]s are read-only views over objects in the store;
//! [`RankedMatch`] and [`ComparisonResult`] are computed per request and
//! never persisted here.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// Role of a stored document in the essay workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Outline,
    Draft,
    AiReview,
    AiImproved,
    TeacherFinal,
    Unknown,
}

impl DocumentType {
    pub const ALL: [DocumentType; 6] = [
        DocumentType::Outline,
        DocumentType::Draft,
        DocumentType::AiReview,
        DocumentType::AiImproved,
        DocumentType::TeacherFinal,
        DocumentType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Outline => "outline",
            DocumentType::Draft => "draft",
            DocumentType::AiReview => "ai_review",
            DocumentType::AiImproved => "ai_improved",
            DocumentType::TeacherFinal => "teacher_final",
            DocumentType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = ServiceError;

    /// Accepts both `snake_case` and `kebab-case` spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        DocumentType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| ServiceError::bad_request(format!("unknown document type: '{}'", s)))
    }
}

/// Type filter used by search: `all` or one concrete [`DocumentType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeFilter {
    #[default]
    All,
    Only(DocumentType),
}

impl TypeFilter {
    pub fn matches(&self, doc_type: DocumentType) -> bool {
        match self {
            TypeFilter::All => true,
            TypeFilter::Only(t) => *t == doc_type,
        }
    }
}

impl FromStr for TypeFilter {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
            Ok(TypeFilter::All)
        } else {
            trimmed.parse().map(TypeFilter::Only)
        }
    }
}

/// A document stored under some scope prefix in the object store.
///
/// `identifier` is the storage key and the only handle used for later
/// fetch/resolve calls.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub identifier: String,
    pub title: String,
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
    pub grade: String,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_url: Option<String>,
}

/// A search candidate with its similarity to the keyword.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedMatch {
    #[serde(flatten)]
    pub document: DocumentRecord,
    /// Similarity in `[0, 100]`.
    pub score: f64,
}

/// Severity of a single revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Major,
    Minor,
}

/// One revision the teacher made relative to the draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub original: String,
    pub revised: String,
    pub category: String,
    pub analysis: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonSummary {
    pub total_changes: u64,
    pub major_changes: u64,
    pub minor_changes: u64,
    pub improvement_areas: Vec<String>,
}

/// Structured draft vs. teacher-revision comparison.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub summary: ComparisonSummary,
    pub changes: Vec<Change>,
    pub recommendations: Vec<String>,
}

/// Where a returned [`ComparisonResult`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonSource {
    /// Produced by the language model.
    Ai,
    /// Canned or degraded fallback data.
    Mock,
}
