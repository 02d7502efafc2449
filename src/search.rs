//! Title search over a storage scope.
//!
//! Candidates come from [`DocumentRepository::list_by_prefix`] in listing
//! order. Each is filtered by type, scored against the keyword with
//! [`similarity::score`], and dropped below the threshold. Survivors are
//! sorted by score descending with a stable sort, so ties keep listing
//! order, and then get an access URL.

use tracing::{debug, info};

use crate::config::SearchConfig;
use crate::error::{Result, ServiceError};
use crate::models::{DocumentRecord, DocumentType, RankedMatch, TypeFilter};
use crate::repository::DocumentRepository;
use crate::similarity;

pub struct SearchService {
    repository: DocumentRepository,
    default_scope: String,
    min_similarity: f64,
    auto_match_min_similarity: f64,
}

impl SearchService {
    pub fn new(repository: DocumentRepository, default_scope: &str, config: &SearchConfig) -> Self {
        Self {
            repository,
            default_scope: default_scope.to_string(),
            min_similarity: config.min_similarity,
            auto_match_min_similarity: config.auto_match_min_similarity,
        }
    }

    pub fn repository(&self) -> &DocumentRepository {
        &self.repository
    }

    /// The configured manual-search threshold.
    pub fn min_similarity(&self) -> f64 {
        self.min_similarity
    }

    /// `scope` if given and non-empty, else the configured default scope.
    pub fn scope_or_default<'a>(&'a self, scope: Option<&'a str>) -> &'a str {
        scope
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.default_scope)
    }

    /// Ranked matches for `keyword` under `scope`.
    ///
    /// # Errors
    ///
    /// [`ServiceError::BadRequest`] for an empty keyword or a threshold
    /// outside `[0, 100]`; listing failures propagate.
    pub async fn search(
        &self,
        scope: &str,
        keyword: &str,
        type_filter: TypeFilter,
        min_similarity: f64,
    ) -> Result<Vec<RankedMatch>> {
        if keyword.trim().is_empty() {
            return Err(ServiceError::bad_request("keyword must not be empty"));
        }
        if !(0.0..=100.0).contains(&min_similarity) {
            return Err(ServiceError::bad_request(format!(
                "minSimilarity must be in [0, 100], got {}",
                min_similarity
            )));
        }

        let candidates = self.repository.list_by_prefix(scope).await?;
        let listed = candidates.len();

        let mut matches: Vec<RankedMatch> = candidates
            .into_iter()
            .filter(|doc| type_filter.matches(doc.doc_type))
            .map(|doc| {
                let score = similarity::score(keyword, &doc.title);
                RankedMatch {
                    document: doc,
                    score,
                }
            })
            .filter(|m| m.score >= min_similarity)
            .collect();

        // Vec::sort_by is stable
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));

        for m in &mut matches {
            m.document.access_url = Some(self.access_url(&m.document.identifier).await);
        }

        info!(
            scope,
            keyword,
            listed,
            matched = matches.len(),
            "search finished"
        );
        Ok(matches)
    }

    /// Search with the configured manual-search threshold.
    pub async fn search_default(
        &self,
        scope: &str,
        keyword: &str,
        type_filter: TypeFilter,
    ) -> Result<Vec<RankedMatch>> {
        self.search(scope, keyword, type_filter, self.min_similarity)
            .await
    }

    /// Best teacher-final revision for a draft title, if any clears the auto-match threshold.
    pub async fn auto_match(&self, scope: &str, draft_title: &str) -> Result<Option<RankedMatch>> {
        let matches = self
            .search(
                scope,
                draft_title,
                TypeFilter::Only(DocumentType::TeacherFinal),
                self.auto_match_min_similarity,
            )
            .await?;
        debug!(draft_title, candidates = matches.len(), "auto-match");
        Ok(matches.into_iter().next())
    }

    /// All documents under `scope` matching `type_filter`, in listing order.
    pub async fn documents(
        &self,
        scope: &str,
        type_filter: TypeFilter,
    ) -> Result<Vec<DocumentRecord>> {
        Ok(self
            .repository
            .list_by_prefix(scope)
            .await?
            .into_iter()
            .filter(|doc| type_filter.matches(doc.doc_type))
            .collect())
    }

    /// Signed or public URL for one match; falls back to the unsigned base URL.
    async fn access_url(&self, identifier: &str) -> String {
        let location = self
            .repository
            .resolve_access_url(identifier, self.repository.default_ttl())
            .await;
        match location.url() {
            Some(url) => url.to_string(),
            None => {
                debug!(identifier, "no resolvable URL, using unsigned base URL");
                self.repository.public_url(location.as_str())
            }
        }
    }
}
