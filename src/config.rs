use std::time::Duration;

use thiserror::Error;

use crate::trust::AdminToken;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub auth: AuthConfig,
    pub cache: CacheConfig,
    pub cluster: ClusterConfig,
    pub integrations: IntegrationConfig,
    /// Only serve keys that carry a signature
    pub force_signed_key: bool,
    pub node: NodeConfig,
    /// Enables verbose error logging on the key lookup path. Never set in production.
    pub test_mode: bool,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_address: String,
    pub data_dir: String,
    pub id: String,
}

/// Token tables loaded at boot
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub admin_token: Option<String>,
    pub admin_tokens: Vec<AdminToken>,
    pub client_tokens: Vec<String>,
    pub core_token: Option<String>,
    /// Leave the Authorization header unredacted for downstream layers
    pub debug_auth: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheBackendKind {
    #[default]
    Disabled,
    Memory,
    Redis,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    pub max_entries: u64,
    pub ttl_seconds: u64,
    pub uri: Option<String>,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Disabled,
            max_entries: 10_000,
            ttl_seconds: 3600,
            uri: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClusterMode {
    /// Single instance, no token distribution
    #[default]
    Standalone,
    /// Holds the authoritative token table and pushes it to replicas
    Core,
    /// Receives token tables from core
    Replica,
}

impl ClusterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterMode::Standalone => "standalone",
            ClusterMode::Core => "core",
            ClusterMode::Replica => "replica",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub mode: ClusterMode,
    pub push_timeout_ms: u64,
    /// Base URLs of replica instances, e.g. `http://10.0.0.2:9100`
    pub replicas: Vec<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            mode: ClusterMode::Standalone,
            push_timeout_ms: 5000,
            replicas: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IntegrationConfig {
    pub audit_url: Option<String>,
    pub authorizer_timeout_ms: u64,
    pub authorizer_url: Option<String>,
    pub key_import_github_url: String,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            audit_url: None,
            authorizer_timeout_ms: 2000,
            authorizer_url: None,
            key_import_github_url: "https://github.com".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let flag = |name: &str| {
            var(name)
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false)
        };

        let node_id = var("NODE_ID").unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let bind_address = match (var("BIND_ADDRESS"), var("HTTP_PORT")) {
            (Some(addr), _) => addr,
            (None, Some(port)) => format!("0.0.0.0:{port}"),
            (None, None) => "0.0.0.0:9100".to_string(),
        };

        let data_dir = var("DATA_DIR").unwrap_or_else(|| "./data".to_string());

        let admin_tokens = match var("ADMIN_TOKENS") {
            Some(raw) => parse_admin_tokens(&raw)?,
            None => Vec::new(),
        };

        let cache_backend = match var("CACHE_ENABLED").map(|v| v.to_lowercase()).as_deref() {
            None | Some("false") | Some("0") => CacheBackendKind::Disabled,
            Some("memory") => CacheBackendKind::Memory,
            Some("redis") => CacheBackendKind::Redis,
            Some(other) => {
                return Err(ConfigError::ValidationError(format!(
                    "Unknown CACHE_ENABLED value: {other}"
                )))
            }
        };

        let cluster_mode = match var("CLUSTER_MODE").map(|v| v.to_lowercase()).as_deref() {
            None | Some("standalone") => ClusterMode::Standalone,
            Some("core") => ClusterMode::Core,
            Some("replica") => ClusterMode::Replica,
            Some(other) => {
                return Err(ConfigError::ValidationError(format!(
                    "Unknown CLUSTER_MODE value: {other}"
                )))
            }
        };

        let cache_defaults = CacheConfig::default();
        let cluster_defaults = ClusterConfig::default();
        let integration_defaults = IntegrationConfig::default();

        let config = Config {
            auth: AuthConfig {
                admin_token: var("ADMIN_TOKEN"),
                admin_tokens,
                client_tokens: var("CLIENT_TOKENS").map(|v| split_list(&v)).unwrap_or_default(),
                core_token: var("CORE_TOKEN"),
                debug_auth: flag("DEBUG_AUTH"),
            },
            cache: CacheConfig {
                backend: cache_backend,
                max_entries: parse_number(&var, "CACHE_MAX_ENTRIES", cache_defaults.max_entries)?,
                ttl_seconds: parse_number(&var, "CACHE_TTL_SECONDS", cache_defaults.ttl_seconds)?,
                uri: var("CACHE_URI"),
            },
            cluster: ClusterConfig {
                mode: cluster_mode,
                push_timeout_ms: parse_number(
                    &var,
                    "CLUSTER_PUSH_TIMEOUT_MS",
                    cluster_defaults.push_timeout_ms,
                )?,
                replicas: var("CLUSTER_REPLICAS")
                    .map(|v| {
                        split_list(&v)
                            .into_iter()
                            .map(|r| r.trim_end_matches('/').to_string())
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            integrations: IntegrationConfig {
                audit_url: var("AUDIT_URL"),
                authorizer_timeout_ms: parse_number(
                    &var,
                    "AUTHORIZER_TIMEOUT_MS",
                    integration_defaults.authorizer_timeout_ms,
                )?,
                authorizer_url: var("AUTHORIZER_URL"),
                key_import_github_url: var("KEY_IMPORT_GITHUB_URL")
                    .map(|u| u.trim_end_matches('/').to_string())
                    .unwrap_or(integration_defaults.key_import_github_url),
            },
            force_signed_key: flag("FORCE_SIGNED_KEY"),
            node: NodeConfig {
                bind_address,
                data_dir,
                id: node_id,
            },
            test_mode: flag("TEST_MODE"),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.id.is_empty() {
            return Err(ConfigError::ValidationError(
                "NODE_ID cannot be empty".to_string(),
            ));
        }

        match self.cluster.mode {
            ClusterMode::Core | ClusterMode::Replica if self.auth.core_token.is_none() => {
                return Err(ConfigError::ValidationError(format!(
                    "CLUSTER_MODE={} requires CORE_TOKEN",
                    self.cluster.mode.as_str()
                )));
            }
            ClusterMode::Core if self.cluster.replicas.is_empty() => {
                tracing::warn!("Running as core with no CLUSTER_REPLICAS configured");
            }
            _ => {}
        }

        if self.cache.backend == CacheBackendKind::Redis && self.cache.uri.is_none() {
            return Err(ConfigError::ValidationError(
                "CACHE_ENABLED=redis requires CACHE_URI".to_string(),
            ));
        }

        if self.cache.backend != CacheBackendKind::Disabled && self.cache.ttl_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "CACHE_TTL_SECONDS must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// `token:assignee,token:assignee`
fn parse_admin_tokens(raw: &str) -> Result<Vec<AdminToken>, ConfigError> {
    split_list(raw)
        .into_iter()
        .map(|entry| match entry.split_once(':') {
            Some((token, assignee)) if !token.is_empty() && !assignee.is_empty() => {
                Ok(AdminToken {
                    assignee: assignee.to_string(),
                    token: token.to_string(),
                })
            }
            _ => Err(ConfigError::ValidationError(format!(
                "ADMIN_TOKENS entry must be token:assignee, got {entry}"
            ))),
        })
        .collect()
}

fn parse_number<F>(var: &F, name: &str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(v) => v
            .parse()
            .map_err(|_| ConfigError::ValidationError(format!("{name} must be a number"))),
        None => Ok(default),
    }
}
