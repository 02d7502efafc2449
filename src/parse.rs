//! Shaping free-form model replies into a [`ComparisonResult`].
//!
//! Models return the JSON either bare or wrapped in prose and code fences.
//! [`parse_comparison`] tries each [`Strategy`] in order and the first one
//! that yields a JSON object with at least one expected field wins:
//!
//! 1. [`Strategy::Strict`]: the whole reply is JSON.
//! 2. [`Strategy::JsonFence`]: the first ```` ```json ```` block.
//! 3. [`Strategy::GenericFence`]: the first fenced block of any language.
//! 4. [`Strategy::BraceScan`]: first `{` through last `}`.
//!
//! Fields the model left out get empty/zero defaults.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, ServiceError};
use crate::models::{Change, ChangeKind, ComparisonResult, ComparisonSummary};

/// Upper bound on recommendations salvaged from an unparseable reply.
const MAX_DEGRADED_RECOMMENDATIONS: usize = 5;

static JSON_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```[ \t]*json[^\n]*\n(.*?)```").expect("json fence pattern is a valid regex")
});

static GENERIC_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[^\n]*\n(.*?)```").expect("generic fence pattern is a valid regex")
});

static LIST_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[-*•·]+|\d+[.、)）]|[（(]\d+[)）])\s*").expect("list marker pattern is a valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Strict,
    JsonFence,
    GenericFence,
    BraceScan,
}

impl Strategy {
    pub const ORDER: [Strategy; 4] = [
        Strategy::Strict,
        Strategy::JsonFence,
        Strategy::GenericFence,
        Strategy::BraceScan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Strict => "strict",
            Strategy::JsonFence => "json-fence",
            Strategy::GenericFence => "generic-fence",
            Strategy::BraceScan => "brace-scan",
        }
    }

    /// The slice of `raw` this strategy would hand to the JSON parser.
    fn candidate<'a>(&self, raw: &'a str) -> Option<&'a str> {
        match self {
            Strategy::Strict => Some(raw.trim()),
            Strategy::JsonFence => JSON_FENCE
                .captures(raw)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim()),
            Strategy::GenericFence => GENERIC_FENCE
                .captures(raw)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim()),
            Strategy::BraceScan => {
                let start = raw.find('{')?;
                let end = raw.rfind('}')?;
                (end > start).then(|| &raw[start..=end])
            }
        }
    }
}

/// Parse a model reply. Returns which strategy succeeded alongside the result.
///
/// # Errors
///
/// [`ServiceError::Parse`] when no strategy yields a usable object.
pub fn parse_comparison(raw: &str) -> Result<(ComparisonResult, Strategy)> {
    for strategy in Strategy::ORDER {
        let Some(candidate) = strategy.candidate(raw) else {
            debug!(strategy = strategy.as_str(), "no candidate");
            continue;
        };
        match serde_json::from_str::<Value>(candidate) {
            Ok(value) if has_expected_shape(&value) => {
                debug!(strategy = strategy.as_str(), "parsed model reply");
                return Ok((shape_result(&value), strategy));
            }
            Ok(_) => debug!(strategy = strategy.as_str(), "JSON lacks comparison fields"),
            Err(e) => debug!(strategy = strategy.as_str(), error = %e, "not JSON"),
        }
    }
    Err(ServiceError::parse(format!(
        "model reply did not match any of {} parse strategies",
        Strategy::ORDER.len()
    )))
}

fn has_expected_shape(value: &Value) -> bool {
    value.as_object().is_some_and(|obj| {
        ["summary", "changes", "recommendations"]
            .iter()
            .any(|k| obj.contains_key(*k))
    })
}

/// Look up the first present key among camelCase/snake_case spellings.
fn field<'a>(value: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| value.get(*n)).filter(|v| !v.is_null())
}

fn as_count(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn as_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn as_text_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .map(|item| as_text(Some(item)))
                .filter(|s| !s.trim().is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn as_kind(value: Option<&Value>) -> ChangeKind {
    let text = as_text(value).trim().to_lowercase();
    match text.as_str() {
        "major" | "重大" | "主要" | "重要" => ChangeKind::Major,
        _ => ChangeKind::Minor,
    }
}

fn shape_change(value: &Value) -> Option<Change> {
    value.as_object()?;
    Some(Change {
        kind: as_kind(field(value, &["type", "kind"])),
        original: as_text(field(value, &["original"])),
        revised: as_text(field(value, &["revised", "modified"])),
        category: as_text(field(value, &["category"])),
        analysis: as_text(field(value, &["analysis", "reason"])),
    })
}

/// Map a parsed reply onto [`ComparisonResult`], defaulting anything absent.
pub fn shape_result(value: &Value) -> ComparisonResult {
    let summary = field(value, &["summary"]);
    let summary = ComparisonSummary {
        total_changes: as_count(summary.and_then(|s| field(s, &["totalChanges", "total_changes"]))),
        major_changes: as_count(summary.and_then(|s| field(s, &["majorChanges", "major_changes"]))),
        minor_changes: as_count(summary.and_then(|s| field(s, &["minorChanges", "minor_changes"]))),
        improvement_areas: as_text_list(
            summary.and_then(|s| field(s, &["improvementAreas", "improvement_areas"])),
        ),
    };

    let changes = field(value, &["changes"])
        .and_then(|c| c.as_array())
        .map(|items| items.iter().filter_map(shape_change).collect())
        .unwrap_or_default();

    ComparisonResult {
        summary,
        changes,
        recommendations: as_text_list(field(value, &["recommendations"])),
    }
}

/// Salvage readable lines from a reply that could not be parsed.
///
/// List markers are stripped; fences and bare JSON punctuation are skipped.
pub fn degraded_recommendations(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("```"))
        .filter(|line| !line.chars().all(|c| "{}[],:\"".contains(c)))
        .map(|line| LIST_MARKER.replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .take(MAX_DEGRADED_RECOMMENDATIONS)
        .collect()
}
