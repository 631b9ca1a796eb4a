use anyhow::{Context, Result};
use dataset_search_core::query::{QueryDefaults, QueryMode};
use dataset_search_core::store::Retention;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub data: DataConfig,
    #[serde(default)]
    pub catalogue: CatalogueConfig,
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    pub dir: PathBuf,
}

impl DataConfig {
    pub fn cache_dir(&self) -> PathBuf {
        self.dir.join("cache")
    }

    pub fn sessions_db(&self) -> PathBuf {
        self.dir.join("sessions.sqlite")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogueConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_login_url")]
    pub login_url: String,
    #[serde(default = "default_catalogue_timeout")]
    pub timeout_secs: u64,
}

impl Default for CatalogueConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            login_url: default_login_url(),
            timeout_secs: default_catalogue_timeout(),
        }
    }
}

fn default_api_url() -> String {
    "https://data.cdrc.ac.uk/api/3/action/current_package_list_with_resources".to_string()
}
fn default_login_url() -> String {
    "https://data.cdrc.ac.uk/user/login".to_string()
}
fn default_catalogue_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    pub endpoint: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_retrieval_timeout")]
    pub timeout_secs: u64,
}

fn default_top_k() -> usize {
    10
}
fn default_max_top_k() -> usize {
    50
}
fn default_alpha() -> f64 {
    0.5
}
fn default_mode() -> String {
    "hybrid".to_string()
}
fn default_retrieval_timeout() -> u64 {
    30
}

impl RetrievalConfig {
    /// Query defaults derived from this section. Call after `load_config`
    /// has validated the mode.
    pub fn query_defaults(&self) -> Result<QueryDefaults> {
        let mode: QueryMode = self
            .mode
            .parse()
            .map_err(|e| anyhow::anyhow!("retrieval.mode: {}", e))?;
        Ok(QueryDefaults {
            top_k: self.top_k,
            max_top_k: self.max_top_k,
            mode,
            alpha: self.alpha,
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generator_timeout")]
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            base_url: default_base_url(),
            max_retries: 3,
            timeout_secs: 60,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_generator_timeout() -> u64 {
    60
}

impl GeneratorConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionsConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Seconds; 0 disables expiry.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            max_sessions: default_max_sessions(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_backend() -> String {
    "memory".to_string()
}
fn default_max_sessions() -> usize {
    1000
}
fn default_ttl_secs() -> u64 {
    86_400
}

impl SessionsConfig {
    pub fn retention(&self) -> Retention {
        Retention::new(self.max_sessions, self.ttl_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.max_top_k < config.retrieval.top_k {
        anyhow::bail!("retrieval.max_top_k must be >= retrieval.top_k");
    }
    if !(0.0..=1.0).contains(&config.retrieval.alpha) {
        anyhow::bail!("retrieval.alpha must be in [0.0, 1.0]");
    }
    if config.retrieval.mode.parse::<QueryMode>().is_err() {
        anyhow::bail!(
            "Unknown retrieval mode: '{}'. Must be default, sparse, or hybrid.",
            config.retrieval.mode
        );
    }

    // Validate generator
    match config.generator.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown generator provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.generator.is_enabled() && config.generator.model.is_none() {
        anyhow::bail!(
            "generator.model must be specified when provider is '{}'",
            config.generator.provider
        );
    }

    // Validate sessions
    match config.sessions.backend.as_str() {
        "memory" | "sqlite" => {}
        other => anyhow::bail!(
            "Unknown sessions backend: '{}'. Must be memory or sqlite.",
            other
        ),
    }
    if config.sessions.max_sessions < 1 {
        anyhow::bail!("sessions.max_sessions must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[data]
dir = "./data"

[retrieval]
endpoint = "http://127.0.0.1:8100/query"

[server]
bind = "127.0.0.1:8000"
"#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.retrieval.top_k, 10);
        assert_eq!(config.retrieval.max_top_k, 50);
        assert_eq!(config.retrieval.alpha, 0.5);
        assert_eq!(config.sessions.backend, "memory");
        assert!(!config.generator.is_enabled());
        assert!(config.catalogue.api_url.contains("current_package_list"));
        assert_eq!(config.data.cache_dir(), PathBuf::from("./data/cache"));

        let defaults = config.retrieval.query_defaults().unwrap();
        assert_eq!(defaults.mode, QueryMode::Hybrid);
    }

    #[test]
    fn test_rejects_alpha_out_of_range() {
        let toml = MINIMAL.replace(
            "endpoint = \"http://127.0.0.1:8100/query\"",
            "endpoint = \"http://127.0.0.1:8100/query\"\nalpha = 1.5",
        );
        let err = parse_config(&toml).unwrap_err();
        assert!(err.to_string().contains("alpha"));
    }

    #[test]
    fn test_rejects_unknown_mode() {
        let toml = MINIMAL.replace(
            "endpoint = \"http://127.0.0.1:8100/query\"",
            "endpoint = \"http://127.0.0.1:8100/query\"\nmode = \"dense\"",
        );
        assert!(parse_config(&toml).is_err());
    }

    #[test]
    fn test_enabled_generator_requires_model() {
        let toml = format!("{}\n[generator]\nprovider = \"openai\"\n", MINIMAL);
        let err = parse_config(&toml).unwrap_err();
        assert!(err.to_string().contains("generator.model"));

        let toml = format!(
            "{}\n[generator]\nprovider = \"openai\"\nmodel = \"gpt-4o-mini\"\n",
            MINIMAL
        );
        assert!(parse_config(&toml).is_ok());
    }

    #[test]
    fn test_rejects_unknown_backend() {
        let toml = format!("{}\n[sessions]\nbackend = \"redis\"\n", MINIMAL);
        assert!(parse_config(&toml).is_err());
    }

    #[test]
    fn test_ttl_zero_disables_expiry() {
        let toml = format!("{}\n[sessions]\nttl_secs = 0\nmax_sessions = 5\n", MINIMAL);
        let retention = parse_config(&toml).unwrap().sessions.retention();
        assert!(retention.ttl.is_none());
        assert_eq!(retention.max_sessions, 5);
    }
}
