//! Command-line front end for `ptcp-gateway`.
//!
//! Parses the vendor serial and optional camera credentials, then hands
//! off to [`ptcp_gateway::session::run`], which rendezvouses with the
//! vendor directory, hole-punches the device, and serves the loopback
//! RTSP listener until the process is killed.

use anyhow::{bail, Result};
use clap::Parser;

use ptcp_gateway::session::GatewayConfig;

/// Tunnel a P2P-overlay-only IP camera's RTSP stream onto loopback.
#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Local RTSP gateway for a vendor-directory P2P camera", long_about = None)]
struct Cli {
    /// The device's vendor-assigned serial number.
    serial: String,

    /// Camera login username (required when --type > 0).
    #[arg(short, long)]
    username: Option<String>,

    /// Camera login password (required when --type > 0).
    #[arg(short, long)]
    password: Option<String>,

    /// Device variant: 0 for anonymous/plain, 1 for authenticated.
    #[arg(short = 't', long = "type", default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
    dtype: u8,

    /// Trace directory requests and PTCP frames to stderr.
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.dtype > 0 && (cli.username.is_none() || cli.password.is_none()) {
        bail!("--username and --password are required when --type > 0");
    }

    let config = GatewayConfig {
        serial: cli.serial,
        dtype: cli.dtype,
        username: cli.username,
        password: cli.password,
        debug: cli.debug,
        listen_addr: "0.0.0.0:554".parse().unwrap(),
    };

    ptcp_gateway::session::run(config).await?;
    Ok(())
}
