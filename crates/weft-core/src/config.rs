use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeftError};

/// Top-level Weft configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub inbox: InboxConfig,
    #[serde(default)]
    pub council: Option<CouncilConfig>,
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Agent timeout used when a node does not set `timeout_ms`.
    #[serde(default = "default_agent_timeout_ms")]
    pub default_agent_timeout_ms: u64,
    /// Interval between inbox status polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// `from` address on dispatched agent tasks.
    #[serde(default = "default_sender")]
    pub sender: String,
    /// Timeout for tools registered as plain closures.
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_agent_timeout_ms: default_agent_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            sender: default_sender(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_agent_timeout_ms() -> u64 { 300_000 }
fn default_poll_interval_ms() -> u64 { 2_000 }
fn default_sender() -> String { "weft".to_string() }
fn default_tool_timeout_secs() -> u64 { 30 }

/// External inbox (message system) endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxConfig {
    #[serde(default = "default_inbox_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_inbox_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            base_url: default_inbox_url(),
            api_key: None,
            request_timeout_secs: default_inbox_timeout(),
        }
    }
}

fn default_inbox_url() -> String { "http://127.0.0.1:3000/api".to_string() }
fn default_inbox_timeout() -> u64 { 30 }

/// Multi-model council service endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouncilConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_council_timeout")]
    pub request_timeout_secs: u64,
}

fn default_council_timeout() -> u64 { 120 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub api_keys: Vec<ApiKeyConfig>,
    /// Externally reachable base URL, used to build inbox callback addresses.
    #[serde(default)]
    pub public_url: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            token: None,
            api_keys: vec![],
            public_url: None,
        }
    }
}

impl GatewayConfig {
    /// Callback address handed to agents, if the gateway is reachable.
    pub fn callback_url(&self) -> Option<String> {
        self.public_url
            .as_deref()
            .map(|base| format!("{}/api/inbox/callback", base.trim_end_matches('/')))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    pub name: String,
    pub key: String,
    #[serde(default)]
    pub role: ApiKeyRole,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyRole {
    /// Read workflows and executions only
    Viewer,
    /// Read + execute, resume, cancel, deliver callbacks
    #[default]
    Operator,
    /// Full access, including saving and deleting workflows
    Admin,
}

fn default_bind() -> String { "127.0.0.1:18790".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String { "~/.weft/weft.db".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WeftError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| WeftError::Config(e.to_string()))
    }

    /// Minimal config from `WEFT_INBOX_URL` / `WEFT_INBOX_API_KEY`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("WEFT_INBOX_URL") {
            config.inbox.base_url = url;
        }
        config.inbox.api_key = std::env::var("WEFT_INBOX_API_KEY").ok();
        config
    }

    /// Resolve the store path (expand ~).
    pub fn store_path(&self) -> PathBuf {
        expand_home(&self.store.path)
    }

    /// Callback URL to embed in dispatched tasks.
    pub fn callback_url(&self) -> Option<String> {
        self.gateway.as_ref().and_then(|g| g.callback_url())
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Keep original if env var not set
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
