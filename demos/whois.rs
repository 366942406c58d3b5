//! WHOIS lookup over a modem socket.
//!
//! Demonstrates:
//! - Opening a modem session on a serial device
//! - Setting the APN and activating the PDP context
//! - Connecting a TCP socket, writing a query, reading until EOF
//! - Freeing the socket and shutting down
//!
//! Usage:
//!   cargo run --example whois -- --device /dev/ttyUSB2 --apn internet example.com
//!   cargo run --example whois -- --config modem.json example.com
//!   cargo run --example whois -- --debug example.com

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use anyhow::{Context, bail};
use telit_modem::{ConnectOptions, ContextId, Modem, ModemConfig, PdpType};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_DEVICE: &str = "/dev/ttyUSB2";
const DEFAULT_APN: &str = "internet";
const WHOIS_SERVER: &str = "whois.iana.org";
const WHOIS_PORT: u16 = 43;

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Clone)]
struct Args {
    device: String,
    apn: String,
    config: Option<String>,
    debug: bool,
    query: String,
}

impl Args {
    /// Parse command-line arguments.
    fn parse() -> anyhow::Result<Self> {
        let mut args = Self {
            device: DEFAULT_DEVICE.to_string(),
            apn: DEFAULT_APN.to_string(),
            config: None,
            debug: false,
            query: String::new(),
        };

        let mut iter = std::env::args().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--device" => args.device = iter.next().context("--device needs a path")?,
                "--apn" => args.apn = iter.next().context("--apn needs a name")?,
                "--config" => args.config = Some(iter.next().context("--config needs a path")?),
                "--debug" => args.debug = true,
                other if other.starts_with("--") => bail!("unknown flag {other}"),
                other => args.query = other.to_string(),
            }
        }

        if args.query.is_empty() {
            bail!("missing query, e.g. `whois example.com`");
        }

        Ok(args)
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = match Args::parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("[ERROR] {e}");
            std::process::exit(2);
        }
    };
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    println!("=== WHOIS over Telit socket ===\n");

    // ========================================================================
    // Open Session
    // ========================================================================

    println!("[1] Opening {}...", args.device);

    let config = match &args.config {
        Some(path) => ModemConfig::load(path)
            .await
            .with_context(|| format!("loading {path}"))?,
        None => ModemConfig::default().with_command_timeout(Duration::from_secs(3)),
    };

    let serial = tokio::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&args.device)
        .await
        .with_context(|| format!("opening {}", args.device))?;

    let modem = Modem::builder().config(config).open(serial).await?;
    println!("    ✓ Model: {}\n", modem.model().await?);

    // ========================================================================
    // Packet Data
    // ========================================================================

    println!("[2] Activating PDP context (APN {})...", args.apn);

    let registration = modem.network_registration().await?;
    println!("    Network: {}", registration.state);
    if !registration.state.is_registered() {
        bail!("modem is not registered ({})", registration.state);
    }

    modem.set_apn(&args.apn, PdpType::Ip).await?;
    let ip = modem.enable_pdp(ContextId::default()).await?;
    println!("    ✓ IP address: {ip}\n");

    // ========================================================================
    // Query
    // ========================================================================

    println!("[3] Querying {WHOIS_SERVER} for {}...", args.query);

    let socket = modem.socket(None).await?;
    socket
        .connect(ConnectOptions::tcp(WHOIS_SERVER, WHOIS_PORT))
        .await?;
    println!("    ✓ Connected on socket {}", socket.conn_id());

    socket.write(format!("{}\r\n", args.query).as_bytes()).await?;

    let mut total = 0;
    while let Some(chunk) = socket.read().await? {
        total += chunk.len();
        print!("{}", String::from_utf8_lossy(&chunk));
    }
    println!("\n    ✓ Received {total} bytes\n");

    // ========================================================================
    // Cleanup
    // ========================================================================

    println!("[4] Cleaning up...");

    modem.free(&socket).await?;
    modem.disable_pdp(ContextId::default()).await?;
    modem.shutdown().await?;

    println!("    ✓ Done");
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Initialize tracing/logging.
fn init_logging(debug: bool) {
    let filter = if debug {
        "telit_modem=debug"
    } else {
        "telit_modem=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}
