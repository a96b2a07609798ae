//! Graph Scope Proxy
//!
//! A reverse proxy in front of Microsoft Graph that mirrors the upstream URL
//! surface 1:1 but constrains each authenticated caller to a *resource
//! scope* — a set of mailboxes/rooms derived from an organizational group.
//!
//! # Flow
//!
//! - **Login**: group membership is enumerated upstream, classified into
//!   typed resources, materialized as an immutable scope, and bound to a
//!   short-lived HMAC-signed bearer token.
//! - **Protected call**: token validation → path authorization → upstream
//!   forwarding with app credentials → collection filtering.
//!
//! Scopes are carried by reference: the token's `jti` keys the scope cache,
//! so revocation and group-wide invalidation take effect on the next request.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod authz;
pub mod cli;
pub mod config;
pub mod error;
pub mod filter;
pub mod scope;
pub mod server;
pub mod token;
pub mod upstream;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
