//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// Scoped reverse proxy for Microsoft Graph
#[derive(Parser, Debug)]
#[command(name = "graph-scope-proxy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "GRAPH_SCOPE_PROXY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "GRAPH_SCOPE_PROXY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "GRAPH_SCOPE_PROXY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "GRAPH_SCOPE_PROXY_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "GRAPH_SCOPE_PROXY_LOG_FORMAT")]
    pub log_format: Option<String>,
}
