//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/warden/config.toml`. Secrets may
//! instead come from the environment (`WARDEN_LLM_API_KEY`, `GITHUB_TOKEN`,
//! `RESEND_API_KEY`).
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/warden/` (~/.config/warden/)
//! - Data: `$XDG_DATA_HOME/warden/` (~/.local/share/warden/)
//! - State/Logs: `$XDG_STATE_HOME/warden/` (~/.local/state/warden/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Main configuration struct
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Deployment environment; used in branch names and email senders
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Log store
    #[serde(default)]
    pub logs: LogStoreConfig,

    /// Language-model service
    #[serde(default)]
    pub llm: LlmConfig,

    /// Source-control host
    #[serde(default)]
    pub github: GitHubConfig,

    /// Local source checkout used as fix context
    #[serde(default)]
    pub checkout: CheckoutConfig,

    /// Benign-path email notifications
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Per-run limits and thresholds
    #[serde(default)]
    pub run: RunConfig,

    /// Fix planner heuristics
    #[serde(default)]
    pub planner: PlannerConfig,

    /// Module → source directory lookup table
    #[serde(default)]
    pub module_hints: ModuleHintsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            logs: LogStoreConfig::default(),
            llm: LlmConfig::default(),
            github: GitHubConfig::default(),
            checkout: CheckoutConfig::default(),
            notify: NotifyConfig::default(),
            run: RunConfig::default(),
            planner: PlannerConfig::default(),
            module_hints: ModuleHintsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_environment() -> String {
    "testnet".to_string()
}

/// Log store (Loki) configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LogStoreConfig {
    /// Base URL, e.g. `http://loki:3100`
    pub url: Option<String>,

    /// Trailing window queried each run
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u32,

    /// Maximum entries fetched per run
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// HTTP request timeout in seconds
    #[serde(default = "default_logs_timeout")]
    pub timeout_secs: u64,

    /// Node classes to query
    #[serde(default = "default_service_types")]
    pub service_types: Vec<String>,

    /// Levels to query
    #[serde(default = "default_levels")]
    pub levels: Vec<String>,
}

impl Default for LogStoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            window_minutes: default_window_minutes(),
            max_entries: default_max_entries(),
            timeout_secs: default_logs_timeout(),
            service_types: default_service_types(),
            levels: default_levels(),
        }
    }
}

fn default_window_minutes() -> u32 {
    30
}

fn default_max_entries() -> usize {
    5000
}

fn default_logs_timeout() -> u64 {
    30
}

fn default_service_types() -> Vec<String> {
    ["validator", "rpc", "archive"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_levels() -> Vec<String> {
    ["warning", "error", "fatal"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// LLM provider configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Provider type
    #[serde(default = "default_provider")]
    pub provider: LlmProvider,
    /// Model to use
    #[serde(default)]
    pub model: String,
    /// API endpoint (optional, uses default for provider)
    pub endpoint: Option<String>,
    /// API key (can also use env var)
    pub api_key: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    /// Backoff schedule for transient failures
    #[serde(default = "default_retry_delays")]
    pub retry_delays_secs: Vec<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: String::new(),
            endpoint: None,
            api_key: None,
            timeout_secs: default_llm_timeout(),
            retry_delays_secs: default_retry_delays(),
        }
    }
}

impl LlmConfig {
    /// API key from config, `WARDEN_LLM_API_KEY`, or the provider's usual env var.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| env_nonempty("WARDEN_LLM_API_KEY"))
            .or_else(|| match self.provider {
                LlmProvider::Ollama => None,
                LlmProvider::Claude => env_nonempty("ANTHROPIC_API_KEY"),
                LlmProvider::OpenAI => env_nonempty("OPENAI_API_KEY"),
            })
    }
}

fn default_provider() -> LlmProvider {
    LlmProvider::OpenAI
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_retry_delays() -> Vec<u64> {
    vec![2, 5, 15]
}

/// Supported LLM providers
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Ollama,
    Claude,
    OpenAI,
}

impl LlmProvider {
    /// Returns the default endpoint for this provider
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            LlmProvider::Ollama => "http://localhost:11434",
            LlmProvider::Claude => "https://api.anthropic.com",
            LlmProvider::OpenAI => "https://api.openai.com",
        }
    }

    /// Whether the provider needs an API key
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, LlmProvider::Ollama)
    }
}

/// GitHub configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GitHubConfig {
    /// Target repository, `owner/name`
    #[serde(default = "default_repo")]
    pub repo: String,
    /// Protected branch pull requests target
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    /// Reviewer requested on every pull request
    pub reviewer: Option<String>,
    /// API token (can also use GITHUB_TOKEN)
    pub token: Option<String>,
    /// REST API root
    #[serde(default = "default_github_api")]
    pub api_url: String,
    /// HTTP request timeout in seconds
    #[serde(default = "default_github_timeout")]
    pub timeout_secs: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            repo: default_repo(),
            base_branch: default_base_branch(),
            reviewer: None,
            token: None,
            api_url: default_github_api(),
            timeout_secs: default_github_timeout(),
        }
    }
}

impl GitHubConfig {
    pub fn resolved_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| env_nonempty("GITHUB_TOKEN"))
    }

    /// Repository owner (the part before `/`)
    pub fn owner(&self) -> &str {
        self.repo.split('/').next().unwrap_or_default()
    }
}

fn default_repo() -> String {
    "postfiatorg/postfiatd".to_string()
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

fn default_github_timeout() -> u64 {
    30
}

/// Local checkout of the daemon's source tree
#[derive(Debug, Deserialize, Clone)]
pub struct CheckoutConfig {
    /// Checkout root
    #[serde(default = "default_checkout_path")]
    pub path: PathBuf,
    /// Fetch and hard-reset to the base branch before each run
    #[serde(default = "default_true")]
    pub sync_before_run: bool,
    /// Architecture overview included in fix prompts, relative to the root
    #[serde(default = "default_architecture_doc")]
    pub architecture_doc: String,
    /// Extensions considered source files
    #[serde(default = "default_source_extensions")]
    pub source_extensions: Vec<String>,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            path: default_checkout_path(),
            sync_before_run: true,
            architecture_doc: default_architecture_doc(),
            source_extensions: default_source_extensions(),
        }
    }
}

fn default_checkout_path() -> PathBuf {
    PathBuf::from("/data/postfiatd")
}

fn default_true() -> bool {
    true
}

fn default_architecture_doc() -> String {
    "docs/Architecture.md".to_string()
}

fn default_source_extensions() -> Vec<String> {
    ["cpp", "h", "ipp"].iter().map(|s| s.to_string()).collect()
}

/// Email notification configuration (Resend)
#[derive(Debug, Deserialize, Clone)]
pub struct NotifyConfig {
    /// Enable/disable benign-path emails
    #[serde(default)]
    pub enabled: bool,
    /// API key (can also use RESEND_API_KEY)
    pub api_key: Option<String>,
    /// Recipient
    pub to: Option<String>,
    /// Sender; defaults to `agent-{environment}@postfiat.org`
    pub from: Option<String>,
    /// Send endpoint
    #[serde(default = "default_notify_endpoint")]
    pub endpoint: String,
    /// HTTP request timeout in seconds
    #[serde(default = "default_notify_timeout")]
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            to: None,
            from: None,
            endpoint: default_notify_endpoint(),
            timeout_secs: default_notify_timeout(),
        }
    }
}

impl NotifyConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| env_nonempty("RESEND_API_KEY"))
    }

    pub fn sender(&self, environment: &str) -> String {
        self.from
            .clone()
            .unwrap_or_else(|| format!("agent-{}@postfiat.org", environment))
    }
}

fn default_notify_endpoint() -> String {
    "https://api.resend.com/emails".to_string()
}

fn default_notify_timeout() -> u64 {
    15
}

/// Per-run limits and thresholds
#[derive(Debug, Deserialize, Clone)]
pub struct RunConfig {
    /// Cap on pull requests opened in one run
    #[serde(default = "default_max_prs")]
    pub max_prs_per_run: usize,
    /// Cap on clusters examined in one run
    #[serde(default = "default_max_clusters")]
    pub max_clusters: usize,
    /// Soft deadline; the current cluster finishes, the rest wait for next run
    #[serde(default = "default_deadline")]
    pub deadline_secs: u64,
    /// Similarity at or above which a cluster is a duplicate
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Scores within this margin below the threshold are logged for review
    #[serde(default = "default_borderline_margin")]
    pub borderline_margin: f64,
    /// Stored patterns compared by the model per cluster, after lexical ranking
    #[serde(default = "default_max_semantic_candidates")]
    pub max_semantic_candidates: usize,
    /// Generated fixes below this confidence are treated as not fixable
    #[serde(default = "default_min_fix_confidence")]
    pub min_fix_confidence: f64,
    /// Source files handed to the fix generator
    #[serde(default = "default_max_context_files")]
    pub max_context_files: usize,
    /// Per-file character cap for fix context
    #[serde(default = "default_max_file_chars")]
    pub max_file_chars: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_prs_per_run: default_max_prs(),
            max_clusters: default_max_clusters(),
            deadline_secs: default_deadline(),
            similarity_threshold: default_similarity_threshold(),
            borderline_margin: default_borderline_margin(),
            max_semantic_candidates: default_max_semantic_candidates(),
            min_fix_confidence: default_min_fix_confidence(),
            max_context_files: default_max_context_files(),
            max_file_chars: default_max_file_chars(),
        }
    }
}

fn default_max_prs() -> usize {
    3
}

fn default_max_clusters() -> usize {
    3
}

fn default_deadline() -> u64 {
    25 * 60
}

fn default_similarity_threshold() -> f64 {
    0.85
}

fn default_borderline_margin() -> f64 {
    0.10
}

fn default_max_semantic_candidates() -> usize {
    5
}

fn default_min_fix_confidence() -> f64 {
    0.5
}

fn default_max_context_files() -> usize {
    5
}

fn default_max_file_chars() -> usize {
    60_000
}

/// Fix planner heuristics
#[derive(Debug, Deserialize, Clone)]
pub struct PlannerConfig {
    /// Case-insensitive substrings marking transient/environmental problems
    #[serde(default = "default_transient_markers")]
    pub transient_markers: Vec<String>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            transient_markers: default_transient_markers(),
        }
    }
}

fn default_transient_markers() -> Vec<String> {
    [
        "timeout",
        "timed out",
        "disconnect",
        "connection reset",
        "connection refused",
        "peer churn",
        "too many peers",
        "insufficient peers",
        "no route to host",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Versioned module → candidate source directory table
#[derive(Debug, Deserialize, Clone)]
pub struct ModuleHintsConfig {
    /// Bump when the table changes meaningfully
    #[serde(default = "default_hints_version")]
    pub version: u32,
    /// Module name → directories relative to the checkout root
    #[serde(default = "default_module_paths")]
    pub paths: BTreeMap<String, Vec<String>>,
}

impl Default for ModuleHintsConfig {
    fn default() -> Self {
        Self {
            version: default_hints_version(),
            paths: default_module_paths(),
        }
    }
}

fn default_hints_version() -> u32 {
    1
}

fn default_module_paths() -> BTreeMap<String, Vec<String>> {
    const TABLE: &[(&str, &[&str])] = &[
        (
            "LedgerConsensus",
            &["src/xrpld/consensus/", "src/xrpld/app/consensus/"],
        ),
        (
            "ConsensusTransacting",
            &["src/xrpld/consensus/", "src/xrpld/app/consensus/"],
        ),
        ("NetworkOPs", &["src/xrpld/app/misc/"]),
        ("Application", &["src/xrpld/app/main/"]),
        ("Overlay", &["src/xrpld/overlay/"]),
        ("Peer", &["src/xrpld/overlay/"]),
        ("NodeStore", &["src/xrpld/nodestore/"]),
        ("SHAMap", &["src/xrpld/shamap/"]),
        ("SHAMapStore", &["src/xrpld/shamap/"]),
        ("Amendments", &["src/xrpld/app/misc/"]),
        ("Transactor", &["src/xrpld/app/tx/"]),
        ("ValidatorList", &["src/xrpld/app/misc/"]),
        ("ValidatorSite", &["src/xrpld/app/misc/"]),
        ("LedgerMaster", &["src/xrpld/app/ledger/"]),
        ("LedgerCleaner", &["src/xrpld/app/ledger/"]),
        ("InboundLedger", &["src/xrpld/app/ledger/"]),
        ("OrderBookDB", &["src/xrpld/app/misc/"]),
        ("LoadManager", &["src/xrpld/app/misc/"]),
        ("Resource", &["src/libxrpl/resource/"]),
        ("Server", &["src/libxrpl/server/"]),
        ("PeerFinder", &["src/xrpld/peerfinder/"]),
        ("TaggedCache", &["include/xrpl/basics/"]),
        ("JobQueue", &["src/xrpld/core/"]),
        ("RPCHandler", &["src/xrpld/rpc/"]),
        ("Exclusions", &["src/xrpld/app/misc/"]),
        ("Loans", &["src/xrpld/app/tx/"]),
        ("Vaults", &["src/xrpld/app/tx/"]),
        ("PermissionedDEX", &["src/xrpld/app/tx/"]),
    ];

    TABLE
        .iter()
        .map(|(module, dirs)| {
            (
                module.to_string(),
                dirs.iter().map(|d| d.to_string()).collect(),
            )
        })
        .collect()
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            let mut config = Config::default();
            config.apply_env_overrides();
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let mut config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;
        config.apply_env_overrides();

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(environment) = env_nonempty("WARDEN_ENVIRONMENT") {
            self.environment = environment;
        }
        if let Some(url) = env_nonempty("LOKI_URL") {
            self.logs.url = Some(url);
        }
    }

    /// Check everything a full run needs, before any network call.
    pub fn validate_for_run(&self) -> Result<()> {
        let mut missing = Vec::new();

        if self.environment.trim().is_empty() {
            missing.push("environment");
        }
        if self.logs.url.as_deref().map_or(true, str::is_empty) {
            missing.push("logs.url");
        }
        if self.llm.model.trim().is_empty() {
            missing.push("llm.model");
        }
        if self.llm.provider.requires_api_key() && self.llm.resolved_api_key().is_none() {
            missing.push("llm.api_key");
        }
        if !self.github.repo.contains('/') {
            missing.push("github.repo (owner/name)");
        }
        if self.github.resolved_token().is_none() {
            missing.push("github.token");
        }
        if self.notify.enabled {
            if self.notify.resolved_api_key().is_none() {
                missing.push("notify.api_key");
            }
            if self.notify.to.is_none() {
                missing.push("notify.to");
            }
        }

        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }

        if !(0.0..=1.0).contains(&self.run.similarity_threshold) {
            return Err(Error::Config(
                "run.similarity_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.run.max_clusters == 0 {
            return Err(Error::Config(
                "run.max_clusters must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/warden/config.toml` (~/.config/warden/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("warden").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/warden/` (~/.local/share/warden/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("warden")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/warden/` (~/.local/state/warden/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("warden")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/warden/state.db` (~/.local/share/warden/state.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("state.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/warden/warden.log` (~/.local/state/warden/warden.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("warden.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
