//! # Essay Review
//!
//! Document matching and draft/teacher-revision comparison for an essay
//! writing assistant.
//!
//! Students' drafts and their teachers' revisions live in S3-compatible
//! object storage (Tencent COS, AWS S3, MinIO). This crate finds documents
//! by fuzzy title search, resolves them to readable URLs, and asks a
//! language model to explain what the teacher changed, falling back to a
//! canned result whenever a real comparison cannot be produced.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌────────────┐   ┌───────────┐
//! │  HTTP /  │──▶│   Search   │──▶│ Repository │──▶│  Object   │
//! │   CLI    │   │  Compare   │   │ (id fixes) │   │  store    │
//! └──────────┘   └─────┬──────┘   └────────────┘   └───────────┘
//!                      │
//!                      ├──▶ Extract (DOCX → text)
//!                      └──▶ Chat model ──▶ Parse (4 strategies)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! essay-review serve
//! essay-review search "我的暑假" --type draft
//! essay-review compare u1/我的暑假-初稿.docx u1/我的暑假-老师修改终稿.docx
//! essay-review correct "X老师修改终稿-老师修改终稿.docx"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`similarity`] | Levenshtein title similarity |
//! | [`identifier`] | Storage-key correction |
//! | [`store`] | Object store abstraction, S3 and in-memory backends |
//! | [`repository`] | Listing, URL resolution, fetch by key |
//! | [`extract`] | Text extraction |
//! | [`llm`] | Chat-completion client |
//! | [`parse`] | Model reply parsing |
//! | [`compare`] | Comparison orchestrator |
//! | [`search`] | Title search and auto-match |
//! | [`server`] | HTTP server |

pub mod compare;
pub mod config;
pub mod error;
pub mod extract;
pub mod identifier;
pub mod llm;
pub mod models;
pub mod parse;
pub mod repository;
pub mod search;
pub mod server;
pub mod similarity;
pub mod store;
