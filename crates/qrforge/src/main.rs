//! QRForge MCP server binary.
//!
//! Bootstrap only: parses flags, reads the QR_DIRECTORY environment variable
//! once, initializes logging, and hands off to the blocking server loop.
//! stdout belongs to the MCP transport; all logs go to file and stderr.

use anyhow::Result;
use clap::Parser;
use qrforge_logging::LogConfig;
use qrforge_mcp::{McpServer, McpServerConfig, PolicyUpdate, SecurityPolicy};
use std::path::PathBuf;
use tracing::info;

/// Environment variable supplying the ENVIRONMENT configuration source
const QR_DIRECTORY_ENV: &str = "QR_DIRECTORY";

#[derive(Parser, Debug)]
#[command(name = "qrforge", version, about = "MCP server generating QR images")]
struct Cli {
    /// Output directory for generated QR images (COMMAND_LINE source)
    #[arg(long = "qr-dir", value_name = "PATH")]
    qr_dir: Option<PathBuf>,

    /// Whitelist a directory the peer may select via roots announcements
    /// (repeatable; no flag means no containment restriction)
    #[arg(long = "allow", value_name = "PATH")]
    allow: Vec<PathBuf>,

    /// Probe candidate directories for write permission before accepting them
    #[arg(long)]
    probe_writes: bool,

    /// Disable the security audit trail
    #[arg(long)]
    no_audit: bool,

    /// Also mirror info-level logs to stderr
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    qrforge_logging::init_logging(LogConfig {
        app_name: "qrforge",
        verbose: cli.verbose,
    })?;

    // ENVIRONMENT source, read once at startup
    let environment_directory = std::env::var_os(QR_DIRECTORY_ENV).map(PathBuf::from);

    let policy = SecurityPolicy::default().merged(PolicyUpdate {
        whitelisted_directories: Some(cli.allow),
        require_write_permission: Some(cli.probe_writes),
        audit_logging_enabled: Some(!cli.no_audit),
        ..Default::default()
    });

    let config = McpServerConfig {
        environment_directory,
        command_line_directory: cli.qr_dir,
        policy,
        ..McpServerConfig::default()
    };

    info!(
        default = %config.default_directory.display(),
        "starting qrforge MCP server"
    );

    let mut server = McpServer::new(config)?;
    server.run()
}
