//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// Multi-user gadget server with RBAC, sandboxed filesystem and MCP peers
#[derive(Parser, Debug)]
#[command(name = "gadgetd")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "GADGETD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "GADGETD_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "GADGETD_HOST")]
    pub host: Option<String>,

    /// Path to the gadget launcher binary
    #[arg(long, env = "GADGETD_GADGET_BINARY")]
    pub gadget_binary: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "GADGETD_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "GADGETD_LOG_FORMAT")]
    pub log_format: Option<String>,
}
