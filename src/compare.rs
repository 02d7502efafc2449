//! Draft vs. teacher-revision comparison.
//!
//! A [`Comparator`] takes one request through these stages:
//!
//! ```text
//! Init ─▶ Resolving (original ∥ teacher) ─▶ Extracting ─▶ CallingModel ─▶ Parsing ─▶ Done
//!              │                                │              │              │
//!              └────────────────────────────────┴──────────────┴──────────────┴──▶ Fallback
//! ```
//!
//! Both documents are resolved concurrently and joined before extraction.
//! Each gets at most two attempts: the caller's URL (or a resolved
//! signed/public URL) first, then a direct fetch by storage key. Any failure
//! after request validation lands in `Fallback`, which returns the canned
//! [`fallback_result`] tagged [`ComparisonSource::Mock`]. When the model
//! answered but its reply could not be parsed, the canned result carries
//! recommendations salvaged from the reply text instead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, ServiceError};
use crate::extract::{self, ExtractedContent};
use crate::llm::{ChatMessage, ChatModel};
use crate::models::{Change, ChangeKind, ComparisonResult, ComparisonSource, ComparisonSummary};
use crate::parse;
use crate::repository::{AccessLocation, DocumentRepository};

/// Timeout for fetching a document over HTTP.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const SYSTEM_PROMPT: &str = "你是一位经验丰富的小学语文老师，擅长点评学生作文。\
请对比学生的作文初稿和老师修改后的终稿，找出老师做出的每一处修改，\
判断修改的重要程度（major 表示内容、结构或立意上的修改，minor 表示字词、标点或语句上的润色），\
说明修改的类别和原因，并给出后续写作建议。\
只输出 JSON，不要输出任何其他文字，格式如下：\
{\"summary\":{\"totalChanges\":0,\"majorChanges\":0,\"minorChanges\":0,\"improvementAreas\":[\"\"]},\
\"changes\":[{\"type\":\"major\",\"original\":\"\",\"revised\":\"\",\"category\":\"\",\"analysis\":\"\"}],\
\"recommendations\":[\"\"]}";

/// Inbound comparison request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompareRequest {
    pub original_doc_id: Option<String>,
    pub teacher_doc_id: Option<String>,
    pub original_url: Option<String>,
    pub teacher_url: Option<String>,
    pub use_simulated_data: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompareOutcome {
    pub result: ComparisonResult,
    pub source: ComparisonSource,
}

impl CompareOutcome {
    fn mock(result: ComparisonResult) -> Self {
        Self {
            result,
            source: ComparisonSource::Mock,
        }
    }

    /// The canned outcome served for `useSimulatedData` requests.
    pub fn simulated() -> Self {
        Self::mock(fallback_result())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    ResolvingOriginal,
    ResolvingTeacher,
    Extracting,
    CallingModel,
    Parsing,
    Done,
    Fallback,
}

/// Which side of the comparison a document is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Original,
    Teacher,
}

impl Side {
    fn stage(self) -> Stage {
        match self {
            Side::Original => Stage::ResolvingOriginal,
            Side::Teacher => Stage::ResolvingTeacher,
        }
    }
}

/// Bytes fetched from a URL, with the server's content type if it sent one.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Fetches document bytes from a URL.
#[async_trait]
pub trait UrlFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedBody>;
}

/// [`UrlFetcher`] over plain HTTP(S).
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| ServiceError::configuration(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UrlFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedBody> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ServiceError::not_found(url.to_string()));
        }
        if !status.is_success() {
            return Err(ServiceError::transport(format!(
                "GET {} returned {}",
                redact_query(url),
                status
            )));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?.to_vec();
        Ok(FetchedBody {
            bytes,
            content_type,
        })
    }
}

/// Drop the query string so signatures never reach the logs.
fn redact_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// One way of getting a document's bytes.
#[derive(Debug, Clone, Copy)]
enum Attempt<'a> {
    CallerUrl(&'a str),
    ResolvedUrl(&'a str),
    DirectKey(&'a str),
}

impl Attempt<'_> {
    fn name(&self) -> &'static str {
        match self {
            Attempt::CallerUrl(_) => "caller-url",
            Attempt::ResolvedUrl(_) => "resolved-url",
            Attempt::DirectKey(_) => "direct-key",
        }
    }
}

/// Runs comparisons against one repository and model.
pub struct Comparator {
    repository: DocumentRepository,
    fetcher: Arc<dyn UrlFetcher>,
    model: Option<Arc<dyn ChatModel>>,
    max_input_chars: usize,
}

impl Comparator {
    /// `model` is `None` when no language model is configured; real comparisons then fail
    /// with [`ServiceError::Configuration`].
    pub fn new(
        repository: DocumentRepository,
        fetcher: Arc<dyn UrlFetcher>,
        model: Option<Arc<dyn ChatModel>>,
        max_input_chars: usize,
    ) -> Self {
        Self {
            repository,
            fetcher,
            model,
            max_input_chars: max_input_chars.max(1),
        }
    }

    /// Compare a draft with its teacher revision.
    ///
    /// # Errors
    ///
    /// Only request-level problems surface: [`ServiceError::BadRequest`] for
    /// missing document ids and [`ServiceError::Configuration`] when no model
    /// is configured. Everything else resolves to a fallback outcome.
    pub async fn compare(&self, request: &CompareRequest) -> Result<CompareOutcome> {
        if request.use_simulated_data {
            info!("returning simulated comparison");
            return Ok(CompareOutcome::simulated());
        }

        let original_id = required_id(request.original_doc_id.as_deref(), "originalDocId")?;
        let teacher_id = required_id(request.teacher_doc_id.as_deref(), "teacherDocId")?;
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| ServiceError::configuration("language model is not configured"))?;

        transition(Stage::Init, Stage::ResolvingOriginal);
        let (original, teacher) = tokio::join!(
            self.load(Side::Original, original_id, request.original_url.as_deref()),
            self.load(Side::Teacher, teacher_id, request.teacher_url.as_deref()),
        );
        let (original, teacher) = match (original, teacher) {
            (Ok(o), Ok(t)) => (o, t),
            (Err(e), _) => return Ok(self.fall_back(Stage::ResolvingOriginal, &e.to_string())),
            (_, Err(e)) => return Ok(self.fall_back(Stage::ResolvingTeacher, &e.to_string())),
        };

        transition(Stage::ResolvingTeacher, Stage::Extracting);
        if original.extracted_text.trim().is_empty() || teacher.extracted_text.trim().is_empty() {
            return Ok(self.fall_back(Stage::Extracting, "extracted text is empty"));
        }

        transition(Stage::Extracting, Stage::CallingModel);
        let messages = self.build_prompt(&original.extracted_text, &teacher.extracted_text);
        let reply = match model.complete(&messages).await {
            Ok(reply) => reply,
            Err(e) => return Ok(self.fall_back(Stage::CallingModel, &e.to_string())),
        };

        transition(Stage::CallingModel, Stage::Parsing);
        match parse::parse_comparison(&reply) {
            Ok((result, strategy)) => {
                transition(Stage::Parsing, Stage::Done);
                info!(
                    model = model.model_name(),
                    strategy = strategy.as_str(),
                    changes = result.changes.len(),
                    "comparison finished"
                );
                Ok(CompareOutcome {
                    result,
                    source: ComparisonSource::Ai,
                })
            }
            Err(e) => {
                let mut outcome = self.fall_back(Stage::Parsing, &e.to_string());
                let salvaged = parse::degraded_recommendations(&reply);
                if !salvaged.is_empty() {
                    outcome.result.recommendations = salvaged;
                }
                Ok(outcome)
            }
        }
    }

    fn fall_back(&self, from: Stage, reason: &str) -> CompareOutcome {
        warn!(stage = ?from, reason, "comparison falling back to canned result");
        transition(from, Stage::Fallback);
        CompareOutcome::mock(fallback_result())
    }

    /// Fetch and extract one document, with at most one alternate attempt.
    async fn load(
        &self,
        side: Side,
        id: &str,
        caller_url: Option<&str>,
    ) -> Result<ExtractedContent> {
        let primary = match caller_url.filter(|u| !u.trim().is_empty()) {
            Some(url) => Attempt::CallerUrl(url),
            None => Attempt::ResolvedUrl(id),
        };

        let mut last_err = None;
        for attempt in [primary, Attempt::DirectKey(id)] {
            match self.run_attempt(attempt).await {
                Ok(body) => {
                    debug!(stage = ?side.stage(), attempt = attempt.name(), bytes = body.bytes.len(), "document fetched");
                    let declared = body
                        .content_type
                        .as_deref()
                        .or_else(|| extract::mime_from_key(id));
                    return Ok(extract::extract(&body.bytes, declared));
                }
                Err(e) => {
                    debug!(stage = ?side.stage(), attempt = attempt.name(), error = %e, "fetch attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ServiceError::not_found(id.to_string())))
    }

    async fn run_attempt(&self, attempt: Attempt<'_>) -> Result<FetchedBody> {
        match attempt {
            Attempt::CallerUrl(url) => self.fetcher.fetch(url).await,
            Attempt::ResolvedUrl(id) => {
                let location = self
                    .repository
                    .resolve_access_url(id, self.repository.default_ttl())
                    .await;
                match location {
                    AccessLocation::Signed(url) | AccessLocation::Public(url) => {
                        self.fetcher.fetch(&url).await
                    }
                    AccessLocation::Key(key) => self.fetch_key(&key).await,
                }
            }
            Attempt::DirectKey(id) => self.fetch_key(id).await,
        }
    }

    async fn fetch_key(&self, key: &str) -> Result<FetchedBody> {
        Ok(FetchedBody {
            bytes: self.repository.fetch_bytes(key).await?,
            content_type: None,
        })
    }

    fn build_prompt(&self, original: &str, teacher: &str) -> Vec<ChatMessage> {
        let user = format!(
            "【学生初稿】\n{}\n\n【老师修改终稿】\n{}",
            truncate_chars(original, self.max_input_chars),
            truncate_chars(teacher, self.max_input_chars)
        );
        vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)]
    }
}

fn transition(from: Stage, to: Stage) {
    debug!(from = ?from, to = ?to, "comparison stage");
}

fn required_id<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ServiceError::bad_request(format!("{} is required", name)))
}

/// First `max` characters of `s`.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn change(kind: ChangeKind, original: &str, revised: &str, category: &str, analysis: &str) -> Change {
    Change {
        kind,
        original: original.to_string(),
        revised: revised.to_string(),
        category: category.to_string(),
        analysis: analysis.to_string(),
    }
}

/// The canned result returned whenever a real comparison cannot be produced.
pub fn fallback_result() -> ComparisonResult {
    ComparisonResult {
        summary: ComparisonSummary {
            total_changes: 5,
            major_changes: 2,
            minor_changes: 3,
            improvement_areas: vec![
                "文章结构".to_string(),
                "细节描写".to_string(),
                "语言表达".to_string(),
            ],
        },
        changes: vec![
            change(
                ChangeKind::Major,
                "暑假里我去了很多地方，玩得很开心。",
                "这个暑假，我跟着爸爸妈妈走进了大海，也第一次登上了高山。",
                "开头",
                "开头直接点明主要经历，更能吸引读者。",
            ),
            change(
                ChangeKind::Major,
                "我们去了海边，然后回家了。",
                "海浪一层层扑上沙滩，我光着脚追着浪花跑，直到夕阳把海面染成了金色。",
                "细节描写",
                "加入景物和动作描写，让经历更具体生动。",
            ),
            change(
                ChangeKind::Minor,
                "我非常非常高兴。",
                "我高兴得一蹦三尺高。",
                "用词",
                "避免重复用词，用具体动作表现心情。",
            ),
            change(
                ChangeKind::Minor,
                "天气很热很热",
                "天气闷热",
                "语句",
                "语句更简洁。",
            ),
            change(
                ChangeKind::Minor,
                "我们玩的很开心",
                "我们玩得很开心",
                "错别字",
                "动词后补语应使用“得”。",
            ),
        ],
        recommendations: vec![
            "写作前先列提纲，理清文章的开头、经过和结尾。".to_string(),
            "多用动作、语言和景物描写来表现真实感受。".to_string(),
            "写完后大声朗读一遍，检查重复用词和错别字。".to_string(),
        ],
    }
}
