//! API-key and admin-key resolution.
//!
//! API keys are configuration-owned and read-only at runtime. Lookups use
//! constant-time comparison; the caller identity carried into tokens is a
//! derived handle, never the secret itself.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::AuthConfig;

/// One resolved API key with its group bindings.
#[derive(Debug, Clone)]
pub struct ResolvedApiKey {
    /// The secret key value
    pub key: String,
    /// Non-secret handle used as the token subject
    pub handle: String,
    /// Groups this key may log into
    pub groups: Vec<String>,
}

impl ResolvedApiKey {
    /// Whether this key is bound to `group_id`.
    #[must_use]
    pub fn is_bound_to(&self, group_id: &str) -> bool {
        self.groups.iter().any(|g| g == group_id)
    }
}

/// Resolved authentication configuration.
#[derive(Debug, Clone)]
pub struct ResolvedAuth {
    keys: Vec<ResolvedApiKey>,
    admin_key: Option<String>,
}

impl ResolvedAuth {
    /// Resolve key bindings from configuration, expanding `env:` indirection.
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        let keys = config
            .api_keys
            .iter()
            .map(|(key, groups)| {
                let resolved = resolve_value(key);
                ResolvedApiKey {
                    handle: key_handle(&resolved),
                    key: resolved,
                    groups: groups.clone(),
                }
            })
            .collect();

        Self {
            keys,
            admin_key: config.admin_key.as_deref().map(resolve_value),
        }
    }

    /// Find the binding for an API key. Every configured key is compared in
    /// constant time regardless of where a match occurs.
    #[must_use]
    pub fn find_binding(&self, api_key: &str) -> Option<&ResolvedApiKey> {
        let mut found: Option<&ResolvedApiKey> = None;
        for entry in &self.keys {
            if entry.key.as_bytes().ct_eq(api_key.as_bytes()).into() {
                found = Some(entry);
            }
        }
        found
    }

    /// Check a provided admin key. Fails closed when none is configured.
    #[must_use]
    pub fn check_admin(&self, provided: Option<&str>) -> bool {
        let Some(ref admin) = self.admin_key else {
            return false;
        };
        provided.is_some_and(|p| p.as_bytes().ct_eq(admin.as_bytes()).into())
    }
}

/// Derive the non-secret handle for a key: a short digest prefix.
fn key_handle(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    let hex: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();
    format!("key-{hex}")
}

fn resolve_value(value: &str) -> String {
    if let Some(var_name) = value.strip_prefix("env:") {
        std::env::var(var_name).unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    }
}
