use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

/// S3-compatible object storage (Tencent COS, AWS S3, MinIO).
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint, e.g. `https://cos.ap-guangzhou.myqcloud.com`.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Base for unsigned URLs. Defaults to the bucket's virtual-host URL.
    #[serde(default)]
    pub public_base_url: Option<String>,
    /// Prefix used when a request names no scope.
    #[serde(default)]
    pub default_scope: String,
    #[serde(default = "default_url_ttl_secs")]
    pub url_ttl_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_url_ttl_secs() -> u64 {
    3600
}
fn default_page_size() -> usize {
    1000
}

/// OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_enabled")]
    pub enabled: bool,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Per-document truncation applied before prompting.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: default_llm_enabled(),
            base_url: default_base_url(),
            model: None,
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

fn default_llm_enabled() -> bool {
    true
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "LLM_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    4000
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_max_input_chars() -> usize {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// Threshold for manual keyword search.
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
    /// Threshold when pairing a draft with its teacher revision automatically.
    #[serde(default = "default_auto_match_min_similarity")]
    pub auto_match_min_similarity: f64,
    /// Generated-suffix tokens stripped from filenames before scoring.
    #[serde(default = "default_suffix_tokens")]
    pub suffix_tokens: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_similarity: default_min_similarity(),
            auto_match_min_similarity: default_auto_match_min_similarity(),
            suffix_tokens: default_suffix_tokens(),
        }
    }
}

fn default_min_similarity() -> f64 {
    50.0
}
fn default_auto_match_min_similarity() -> f64 {
    30.0
}
fn default_suffix_tokens() -> Vec<String> {
    [
        "老师修改终稿",
        "AI批改",
        "AI优化",
        "初稿",
        "提纲",
        "teacher-final",
        "ai-improved",
        "ai-review",
        "draft",
        "outline",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate storage
    if config.storage.bucket.trim().is_empty() {
        anyhow::bail!("storage.bucket must not be empty");
    }
    if config.storage.region.trim().is_empty() {
        anyhow::bail!("storage.region must not be empty");
    }
    if config.storage.url_ttl_secs == 0 {
        anyhow::bail!("storage.url_ttl_secs must be > 0");
    }
    if !(1..=1000).contains(&config.storage.page_size) {
        anyhow::bail!("storage.page_size must be in [1, 1000]");
    }

    // Validate search thresholds
    if !(0.0..=100.0).contains(&config.search.min_similarity) {
        anyhow::bail!("search.min_similarity must be in [0, 100]");
    }
    if !(0.0..=100.0).contains(&config.search.auto_match_min_similarity) {
        anyhow::bail!("search.auto_match_min_similarity must be in [0, 100]");
    }

    // Validate model settings
    if config.llm.timeout_secs == 0 {
        anyhow::bail!("llm.timeout_secs must be > 0");
    }
    if config.llm.max_input_chars == 0 {
        anyhow::bail!("llm.max_input_chars must be > 0");
    }
    if config.llm.enabled && config.llm.model.as_deref().unwrap_or("").is_empty() {
        anyhow::bail!("llm.model must be specified when llm.enabled = true");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn minimal_file_gets_defaults() {
        let file = write_config(
            r#"
[storage]
bucket = "essays-1250000000"
region = "ap-guangzhou"

[llm]
model = "gpt-4o-mini"
"#,
        );
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:8080");
        assert_eq!(cfg.storage.url_ttl_secs, 3600);
        assert_eq!(cfg.storage.page_size, 1000);
        assert_eq!(cfg.llm.timeout_secs, 120);
        assert_eq!(cfg.llm.max_input_chars, 5000);
        assert_eq!(cfg.search.min_similarity, 50.0);
        assert_eq!(cfg.search.auto_match_min_similarity, 30.0);
        assert!(cfg.search.suffix_tokens.iter().any(|t| t == "初稿"));
    }

    #[test]
    fn enabled_llm_requires_model() {
        let file = write_config(
            r#"
[storage]
bucket = "b"
region = "r"
"#,
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("llm.model"));
    }

    #[test]
    fn disabled_llm_needs_no_model() {
        let file = write_config(
            r#"
[storage]
bucket = "b"
region = "r"

[llm]
enabled = false
"#,
        );
        assert!(load_config(file.path()).is_ok());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let file = write_config(
            r#"
[storage]
bucket = "b"
region = "r"

[llm]
enabled = false

[search]
min_similarity = 120.0
"#,
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("min_similarity"));
    }

    #[test]
    fn rejects_oversized_page() {
        let file = write_config(
            r#"
[storage]
bucket = "b"
region = "r"
page_size = 5000

[llm]
enabled = false
"#,
        );
        assert!(load_config(file.path()).is_err());
    }
}
