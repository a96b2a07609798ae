//! Configuration management.
//!
//! Layered the same way throughout: YAML file, then environment variables
//! with the `GRAPH_SCOPE_PROXY_` prefix (`__` as section separator). Secret
//! values support `env:VAR_NAME` indirection so the YAML file never has to
//! carry them.

use std::{collections::HashMap, env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::scope::{ResourceKind, ScopePolicy};
use crate::{Error, Result};

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before secret resolution. Paths support `~`
    /// expansion; missing files are skipped.
    pub env_files: Vec<String>,
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Upstream Graph configuration
    pub graph: GraphConfig,
    /// Token signing configuration
    pub jwt: JwtConfig,
    /// Scope materialization policy and cache settings
    pub scope: ScopeConfig,
    /// API-key bindings and admin key
    pub auth: AuthConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Inbound request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8780,
            request_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Upstream Graph API and app-credential configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Directory tenant id
    pub tenant_id: String,
    /// App registration client id
    pub client_id: String,
    /// App registration client secret (supports `env:VAR_NAME`)
    pub client_secret: String,
    /// Graph base URL
    pub base_url: String,
    /// Token endpoint base URL
    pub login_base_url: String,
    /// Per-call upstream deadline
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            base_url: "https://graph.microsoft.com".to_string(),
            login_base_url: "https://login.microsoftonline.com".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl GraphConfig {
    /// Resolve the client secret (expand `env:VAR_NAME`).
    #[must_use]
    pub fn resolve_client_secret(&self) -> String {
        resolve_secret(&self.client_secret)
    }
}

/// Token signing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    /// HMAC signing key, at least 32 bytes (supports `env:VAR_NAME`)
    pub signing_key: String,
    /// `iss` claim
    pub issuer: String,
    /// `aud` claim
    pub audience: String,
    /// Token lifetime in seconds
    pub expiration_seconds: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            signing_key: String::new(),
            issuer: "graph-scope-proxy".to_string(),
            audience: "graph-scope-proxy-clients".to_string(),
            expiration_seconds: 900,
        }
    }
}

impl JwtConfig {
    /// Resolve the signing key (expand `env:VAR_NAME`).
    #[must_use]
    pub fn resolve_signing_key(&self) -> String {
        resolve_secret(&self.signing_key)
    }
}

/// Scope cache backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// In-process DashMap store
    #[default]
    Memory,
    /// External cache; recognized but not shipped
    Distributed,
}

/// Scope materialization policy and cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Resource kinds admitted into scopes
    pub allowed_place_types: Vec<ResourceKind>,
    /// Keep Generic classifications instead of the Room fallback
    pub allow_generic_resources: bool,
    /// Hard cap on scope size
    pub max_scope_size: usize,
    /// Enrich resources from the Places catalogue
    pub use_places_api: bool,
    /// Scope cache TTL in seconds
    pub cache_ttl_seconds: u64,
    /// Cache backend
    pub cache_backend: CacheBackend,
    /// Connection string for a distributed backend
    pub cache_connection_string: Option<String>,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            allowed_place_types: vec![ResourceKind::Room, ResourceKind::Workspace],
            allow_generic_resources: false,
            max_scope_size: 500,
            use_places_api: true,
            cache_ttl_seconds: 900,
            cache_backend: CacheBackend::Memory,
            cache_connection_string: None,
        }
    }
}

impl ScopeConfig {
    /// Admission policy handed to the classifier and builder.
    #[must_use]
    pub fn policy(&self) -> ScopePolicy {
        ScopePolicy {
            allowed_place_types: self.allowed_place_types.clone(),
            allow_generic_resources: self.allow_generic_resources,
            max_scope_size: self.max_scope_size,
            use_places_api: self.use_places_api,
        }
    }

    /// Cache TTL as a duration.
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

/// API-key bindings and admin key.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// `apiKey → [groupId…]` bindings; key values support `env:VAR_NAME`
    pub api_keys: HashMap<String, Vec<String>>,
    /// Admin key guarding `/admin/refresh` (supports `env:VAR_NAME`)
    pub admin_key: Option<String>,
}

impl Config {
    /// Load configuration from an optional YAML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("GRAPH_SCOPE_PROXY_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports `~` expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Reject configurations the runtime cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.jwt.resolve_signing_key().len() < 32 {
            return Err(Error::Config(
                "jwt.signing_key must be at least 32 bytes".to_string(),
            ));
        }
        if self.jwt.expiration_seconds == 0 {
            return Err(Error::Config(
                "jwt.expiration_seconds must be positive".to_string(),
            ));
        }
        if self.scope.cache_ttl_seconds == 0 {
            return Err(Error::Config(
                "scope.cache_ttl_seconds must be positive".to_string(),
            ));
        }
        if self.scope.max_scope_size == 0 {
            return Err(Error::Config(
                "scope.max_scope_size must be positive".to_string(),
            ));
        }
        if self.scope.cache_backend == CacheBackend::Distributed {
            return Err(Error::Config(
                "scope.cache_backend 'distributed' is not available in this build; use 'memory'"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Expand `env:VAR_NAME` indirection; other values pass through.
fn resolve_secret(value: &str) -> String {
    if let Some(var_name) = value.strip_prefix("env:") {
        env::var(var_name).unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    }
}
