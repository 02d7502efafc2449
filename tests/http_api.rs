//! Router-level tests for the HTTP API.
//!
//! The router is wired to an in-memory object store, a canned chat model,
//! and a URL fetcher that always misses, so every document is read through
//! the direct-key path.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use essay_review::compare::{Comparator, FetchedBody, UrlFetcher};
use essay_review::config::{SearchConfig, StorageConfig};
use essay_review::error::{Result, ServiceError};
use essay_review::llm::{ChatMessage, ChatModel};
use essay_review::repository::DocumentRepository;
use essay_review::search::SearchService;
use essay_review::server::{build_router, AppState};
use essay_review::store::memory::InMemoryStore;

const MODEL_REPLY: &str = r#"好的，以下是结果：
```json
{"summary":{"totalChanges":1,"majorChanges":1,"minorChanges":0,"improvementAreas":["细节描写"]},
 "changes":[{"type":"major","original":"我们去了海边。","revised":"我们去了金色的海边。","category":"细节描写","analysis":"增加修饰"}],
 "recommendations":["多观察景物"]}
```"#;

struct CannedModel {
    calls: AtomicUsize,
}

#[async_trait]
impl ChatModel for CannedModel {
    fn model_name(&self) -> &str {
        "canned"
    }

    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(MODEL_REPLY.to_string())
    }
}

struct MissingFetcher;

#[async_trait]
impl UrlFetcher for MissingFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedBody> {
        Err(ServiceError::not_found(url.to_string()))
    }
}

fn docx(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let xml = format!(
        "<w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
        body
    );
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut cursor);
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    cursor.into_inner()
}

struct TestApp {
    router: Router,
    store: Arc<InMemoryStore>,
    model: Arc<CannedModel>,
}

fn test_app(with_model: bool) -> TestApp {
    let store = Arc::new(InMemoryStore::new("essays"));
    store.put("u1/三年级/我的暑假生活-初稿.docx", docx(&["我们去了海边。"]));
    store.put(
        "u1/三年级/我的暑假生活-老师修改终稿.docx",
        docx(&["我们去了金色的海边。"]),
    );
    store.put("u1/三年级/难忘的一天-初稿.docx", docx(&["那天下雨了。"]));

    let storage = StorageConfig {
        bucket: "essays".to_string(),
        region: "ap-guangzhou".to_string(),
        endpoint_url: None,
        public_base_url: None,
        default_scope: "u1/".to_string(),
        url_ttl_secs: 600,
        page_size: 1000,
    };
    let search_config = SearchConfig::default();
    let repository =
        DocumentRepository::new(store.clone(), &storage, search_config.suffix_tokens.clone());

    let model = Arc::new(CannedModel {
        calls: AtomicUsize::new(0),
    });
    let comparator = Comparator::new(
        repository.clone(),
        Arc::new(MissingFetcher),
        with_model.then(|| model.clone() as Arc<dyn ChatModel>),
        5000,
    );
    let search = SearchService::new(repository, &storage.default_scope, &search_config);

    TestApp {
        router: build_router(AppState::new(search, comparator)),
        store,
        model,
    }
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

async fn get(router: Router, uri: &str) -> (StatusCode, Value) {
    send(router, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn post_json(router: Router, uri: &str, body: &str) -> (StatusCode, Value) {
    send(
        router,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

/// Percent-encode a query value.
fn enc(s: &str) -> String {
    s.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect()
}

#[tokio::test]
async fn health_reports_version() {
    let app = test_app(true);
    let (status, json) = get(app.router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn search_finds_draft_by_partial_title() {
    let app = test_app(true);
    let uri = format!(
        "/search?keyword={}&type=draft&minSimilarity=50",
        enc("我的暑假")
    );
    let (status, json) = get(app.router, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["total"], 1);

    let m = &json["matches"][0];
    assert_eq!(m["title"], "我的暑假生活");
    assert_eq!(m["type"], "draft");
    assert_eq!(m["grade"], "三年级");
    assert!(m["score"].as_f64().unwrap() >= 50.0);
    assert_eq!(
        m["accessUrl"],
        "memory://essays/u1/三年级/我的暑假生活-初稿.docx?expires=600"
    );
}

#[tokio::test]
async fn search_rejects_unknown_type_and_empty_keyword() {
    let app = test_app(true);
    let (status, json) = get(app.router.clone(), "/search?keyword=x&type=poem").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "bad_request");

    let (status, _) = get(app.router.clone(), "/search?keyword=").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(app.router, "/search?keyword=x&minSimilarity=abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn store_outage_is_upstream_error() {
    let app = test_app(true);
    app.store.set_available(false);
    let uri = format!("/search?keyword={}", enc("我的暑假"));
    let (status, json) = get(app.router, &uri).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["error"]["code"], "upstream");
}

#[tokio::test]
async fn simulated_compare_skips_model() {
    let app = test_app(true);
    let (status, json) = post_json(app.router, "/compare", r#"{"useSimulatedData": true}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["source"], "mock");
    assert_eq!(json["result"]["summary"]["totalChanges"], 5);
    assert_eq!(app.model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn compare_uses_model_reply() {
    let app = test_app(true);
    let body = serde_json::json!({
        "originalDocId": "u1/三年级/我的暑假生活-初稿.docx",
        "teacherDocId": "u1/三年级/我的暑假生活老师修改终稿老师修改终稿.docx",
    })
    .to_string();
    let (status, json) = post_json(app.router, "/compare", &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["source"], "ai");
    assert_eq!(json["result"]["changes"][0]["type"], "major");
    assert_eq!(json["result"]["changes"][0]["revised"], "我们去了金色的海边。");
    assert_eq!(app.model.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn compare_with_missing_original_falls_back() {
    let app = test_app(true);
    let body = serde_json::json!({
        "originalDocId": "u1/三年级/不存在-初稿.docx",
        "teacherDocId": "u1/三年级/我的暑假生活-老师修改终稿.docx",
    })
    .to_string();
    let (status, json) = post_json(app.router, "/compare", &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["source"], "mock");
    assert_eq!(json["result"]["summary"]["totalChanges"], 5);
    assert_eq!(json["result"]["summary"]["minorChanges"], 3);
    assert_eq!(app.model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn compare_with_missing_teacher_revision_falls_back() {
    let app = test_app(true);
    let body = serde_json::json!({
        "originalDocId": "u1/三年级/难忘的一天-初稿.docx",
        "teacherDocId": "u1/三年级/难忘的一天-老师修改终稿.docx",
    })
    .to_string();
    let (status, json) = post_json(app.router, "/compare", &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["source"], "mock");
    assert_eq!(json["result"]["summary"]["totalChanges"], 5);
    assert_eq!(json["result"]["summary"]["majorChanges"], 2);
    assert_eq!(app.model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn compare_rejects_malformed_body() {
    let app = test_app(true);
    let (status, json) = post_json(app.router, "/compare", "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "bad_request");
}

#[tokio::test]
async fn compare_requires_document_ids() {
    let app = test_app(true);
    let (status, json) =
        post_json(app.router, "/compare", r#"{"originalDocId": "u1/a.docx"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"]["message"]
        .as_str()
        .unwrap()
        .contains("teacherDocId"));
}

#[tokio::test]
async fn compare_without_model_is_configuration_error() {
    let app = test_app(false);
    let body = serde_json::json!({
        "originalDocId": "u1/三年级/我的暑假生活-初稿.docx",
        "teacherDocId": "u1/三年级/我的暑假生活-老师修改终稿.docx",
    })
    .to_string();
    let (status, json) = post_json(app.router, "/compare", &body).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"]["code"], "configuration");
}

#[tokio::test]
async fn match_returns_teacher_final() {
    let app = test_app(true);
    let uri = format!("/match?title={}", enc("我的暑假生活"));
    let (status, json) = get(app.router, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["match"]["type"], "teacher_final");
    assert_eq!(
        json["match"]["identifier"],
        "u1/三年级/我的暑假生活-老师修改终稿.docx"
    );
}

#[tokio::test]
async fn documents_list_by_type() {
    let app = test_app(true);
    let (status, json) = get(app.router, "/documents?scope=u1/&type=draft").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 2);
    assert_eq!(json["documents"][0]["title"], "我的暑假生活");
    assert_eq!(json["documents"][1]["title"], "难忘的一天");
    assert!(json["documents"][0].get("accessUrl").is_none());
}

#[tokio::test]
async fn document_url_applies_correction() {
    let app = test_app(true);
    let uri = format!(
        "/documents/url?id={}&ttl=120",
        enc("u1/三年级/我的暑假生活老师修改终稿-老师修改终稿.docx")
    );
    let (status, json) = get(app.router, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["correctedId"], "u1/三年级/我的暑假生活-老师修改终稿.docx");
    assert_eq!(json["kind"], "signed");
    assert_eq!(
        json["url"],
        "memory://essays/u1/三年级/我的暑假生活-老师修改终稿.docx?expires=120"
    );
}

#[tokio::test]
async fn document_url_falls_back_to_public() {
    let app = test_app(true);
    app.store.set_signing_enabled(false);
    let uri = format!(
        "/documents/url?id={}",
        enc("u1/三年级/难忘的一天-初稿.docx")
    );
    let (status, json) = get(app.router, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["kind"], "public");
    assert_eq!(json["url"], "memory://essays/u1/三年级/难忘的一天-初稿.docx");
}

#[tokio::test]
async fn document_url_missing_is_not_found() {
    let app = test_app(true);
    let (status, json) = get(app.router.clone(), "/documents/url?id=u1/none.docx").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "not_found");

    let (status, _) = get(app.router, "/documents/url?id=u1/none.docx&ttl=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn document_url_signs_legacy_key_that_exists() {
    let app = test_app(true);
    app.store
        .put("u1/旧作文老师修改终稿老师修改终稿.docx", docx(&["旧稿"]));
    let uri = format!(
        "/documents/url?id={}&ttl=120",
        enc("u1/旧作文老师修改终稿老师修改终稿.docx")
    );
    let (status, json) = get(app.router, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["correctedId"], "u1/旧作文-老师修改终稿.docx");
    assert_eq!(json["kind"], "signed");
    assert_eq!(
        json["url"],
        "memory://essays/u1/旧作文老师修改终稿老师修改终稿.docx?expires=120"
    );
}
