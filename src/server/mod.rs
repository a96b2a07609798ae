//! Proxy server — wiring and lifecycle.
//!
//! All services are constructed here at startup and threaded into the router
//! as explicit dependencies; the only mutable state is the scope cache and
//! the revocation set, each owned by its service. Shutdown is signal-driven
//! and broadcast to the background reapers.

pub mod auth;
pub mod handlers;
pub mod router;

pub use auth::ResolvedAuth;
pub use router::{AppState, create_router};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, info};

use crate::config::Config;
use crate::scope::cache::spawn_reaper;
use crate::scope::{InMemoryScopeStore, ScopeBuilder, ScopeStore};
use crate::token::{TokenService, spawn_revocation_reaper};
use crate::upstream::{AppCredentials, Directory, Forwarder, GraphDirectory};
use crate::{Error, Result};

/// Interval between reaper sweeps.
const REAP_INTERVAL: Duration = Duration::from_secs(60);

/// The scope proxy server.
pub struct ProxyServer {
    config: Config,
}

impl ProxyServer {
    /// Create a server from validated configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Run until interrupted.
    pub async fn run(self) -> Result<()> {
        let config = self.config;
        let addr = SocketAddr::new(
            config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            config.server.port,
        );

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        let credentials = Arc::new(AppCredentials::new(&config.graph)?);
        let directory: Arc<dyn Directory> =
            Arc::new(GraphDirectory::new(&config.graph, Arc::clone(&credentials))?);
        let forwarder = Arc::new(Forwarder::new(&config.graph, Arc::clone(&credentials))?);
        let tokens = Arc::new(TokenService::new(&config.jwt)?);
        let scopes: Arc<dyn ScopeStore> = Arc::new(InMemoryScopeStore::new());

        spawn_reaper(Arc::clone(&scopes), REAP_INTERVAL, shutdown_tx.subscribe());
        spawn_revocation_reaper(Arc::clone(&tokens), REAP_INTERVAL, shutdown_tx.subscribe());

        let builder = ScopeBuilder::new(
            Arc::clone(&directory),
            config.scope.policy(),
            config.scope.cache_ttl(),
        );

        let state = Arc::new(AppState {
            auth: ResolvedAuth::from_config(&config.auth),
            tokens,
            scopes,
            builder,
            directory,
            forwarder,
            scope_ttl: config.scope.cache_ttl(),
        });

        let router = create_router(state, config.server.max_body_size);

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("Failed to bind {addr}: {e}")))?;

        info!(addr = %addr, "Scope proxy listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .await
            .map_err(|e| Error::Internal(format!("server error: {e}")))?;

        info!("Server shutdown complete");
        Ok(())
    }
}

/// Resolve on SIGINT or SIGTERM, then notify background tasks.
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    debug!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
