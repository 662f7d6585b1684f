//! cp-sim-node - CLI for the charge point simulator
//!
//! # Usage
//!
//! ```bash
//! # Persistent WebSocket transport
//! cp-sim-node --url ws://localhost:8180/steve/websocket/CentralSystemService \
//!     --identity CP-SIM-001 --connector 1 --id-tag CAFE01
//!
//! # Request/response transport (binds a local listener)
//! cp-sim-node --url http://localhost:8080/ocpp \
//!     --identity CP-SIM-001 --connector 1 --id-tag CAFE01 --bind-port 12801
//! ```
//!
//! Once connected, single-word commands on stdin drive the simulator;
//! type `help` for the list.

use std::time::Duration;

use clap::Parser;
use cp_sim::{ChargePointStatus, Simulator, SimulatorConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// OCPP 1.6 charge point simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Central system endpoint URL
    #[arg(long)]
    url: String,

    /// Charge point identity
    #[arg(long)]
    identity: String,

    /// Connector id
    #[arg(long)]
    connector: i32,

    /// Authorization tag for operator-triggered transactions
    #[arg(long, default_value = "DEADBEEF")]
    id_tag: String,

    /// Bind a local listener port and use the request/response transport
    #[arg(long)]
    bind_port: Option<u16>,

    /// Host the central system should use to reach the bound listener
    #[arg(long, default_value = "localhost")]
    callback_host: String,

    /// Vendor name
    #[arg(long, default_value = "cp-sim")]
    vendor: String,

    /// Model name
    #[arg(long, default_value = "CP-SIM")]
    model: String,

    /// Heartbeat period in seconds (0 disables)
    #[arg(long, default_value = "30")]
    heartbeat_interval: u64,

    /// Telemetry period in seconds
    #[arg(long, default_value = "20")]
    telemetry_interval: u64,

    /// Delay in seconds before a server-triggered StartTransaction
    #[arg(long, default_value = "5")]
    start_delay: u64,

    /// Delay in seconds before a server-triggered StopTransaction
    #[arg(long, default_value = "5")]
    stop_delay: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Operator console commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsoleCommand {
    Boot,
    BootFull,
    Authorize,
    DataTransfer,
    Status(ChargePointStatus),
    Start,
    Stop,
    Config,
    Disconnect,
    Help,
    Quit,
}

/// Parse one console line into a command
fn parse_command(line: &str) -> Option<ConsoleCommand> {
    match line.trim().to_lowercase().as_str() {
        "boot" => Some(ConsoleCommand::Boot),
        "boot-full" => Some(ConsoleCommand::BootFull),
        "auth" | "authorize" => Some(ConsoleCommand::Authorize),
        "dt" | "datatransfer" => Some(ConsoleCommand::DataTransfer),
        "available" => Some(ConsoleCommand::Status(ChargePointStatus::Available)),
        "unavailable" => Some(ConsoleCommand::Status(ChargePointStatus::Unavailable)),
        "preparing" => Some(ConsoleCommand::Status(ChargePointStatus::Preparing)),
        "charging" => Some(ConsoleCommand::Status(ChargePointStatus::Charging)),
        "suspendedev" => Some(ConsoleCommand::Status(ChargePointStatus::SuspendedEV)),
        "finishing" => Some(ConsoleCommand::Status(ChargePointStatus::Finishing)),
        "start" => Some(ConsoleCommand::Start),
        "stop" => Some(ConsoleCommand::Stop),
        "config" => Some(ConsoleCommand::Config),
        "disconnect" => Some(ConsoleCommand::Disconnect),
        "help" | "?" => Some(ConsoleCommand::Help),
        "quit" | "q" => Some(ConsoleCommand::Quit),
        _ => None,
    }
}

const HELP: &str = "\
Commands:
  boot          BootNotification (identity only)
  boot-full     BootNotification with serial/firmware details
  auth          Authorize the configured id tag
  dt            DataTransfer
  available | unavailable | preparing | charging | suspendedev | finishing
                StatusNotification for the connector
  start         Start a transaction
  stop          Stop the running transaction
  config        Print the configuration store
  disconnect    Close the persistent connection
  help          This text
  quit          Exit immediately";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║              cp-sim - OCPP 1.6 Charge Point Simulator        ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Identity:  {:<49} ║", args.identity);
    println!("║  Endpoint:  {:<49} ║", truncate(&args.url, 49));
    println!("║  Connector: {:<49} ║", args.connector);
    println!(
        "║  Transport: {:<49} ║",
        match args.bind_port {
            Some(port) => format!("request/response (listener on :{})", port),
            None => "persistent WebSocket".to_string(),
        }
    );
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    let mut config = SimulatorConfig::new(&args.url, &args.identity)
        .with_vendor(&args.vendor, &args.model)
        .with_connector(args.connector)
        .with_id_tag(&args.id_tag)
        .with_heartbeat_interval(Duration::from_secs(args.heartbeat_interval))
        .with_telemetry_interval(Duration::from_secs(args.telemetry_interval))
        .with_delays(
            Duration::from_secs(args.start_delay),
            Duration::from_secs(args.stop_delay),
        );

    if let Some(port) = args.bind_port {
        config = config
            .with_bind_port(port)
            .with_callback_host(&args.callback_host);
    }

    info!("Starting simulator...");
    let sim = Simulator::connect(config).await?;

    println!("{}", HELP);
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }

        let Some(command) = parse_command(&line) else {
            println!("unknown command: {} (try 'help')", line.trim());
            continue;
        };

        match command {
            ConsoleCommand::Boot => match sim.boot_notification(false).await {
                Ok(resp) => println!("boot: {:?}, interval {}s", resp.status, resp.interval),
                Err(e) => println!("boot failed: {}", e),
            },
            ConsoleCommand::BootFull => match sim.boot_notification(true).await {
                Ok(resp) => println!("boot: {:?}, interval {}s", resp.status, resp.interval),
                Err(e) => println!("boot failed: {}", e),
            },
            ConsoleCommand::Authorize => match sim.authorize().await {
                Ok(resp) => println!("authorize: {:?}", resp.id_tag_info.status),
                Err(e) => println!("authorize failed: {}", e),
            },
            ConsoleCommand::DataTransfer => {
                match sim.data_transfer("cp-sim", Some("ping"), Some("hello")).await {
                    Ok(resp) => println!("data transfer: {:?}", resp.status),
                    Err(e) => println!("data transfer failed: {}", e),
                }
            }
            ConsoleCommand::Status(status) => match sim.status_notification(status).await {
                Ok(()) => println!("status sent: {:?}", status),
                Err(e) => println!("status failed: {}", e),
            },
            ConsoleCommand::Start => {
                if sim.start_transaction() {
                    println!("start scheduled");
                } else {
                    println!("start rejected: transaction already running");
                }
            }
            ConsoleCommand::Stop => {
                if sim.stop_transaction() {
                    println!("stop scheduled");
                } else {
                    println!("stop rejected: no transaction running");
                }
            }
            ConsoleCommand::Config => {
                for entry in sim.configuration().await {
                    println!(
                        "  {:<28} {} {}",
                        entry.key,
                        if entry.readonly { "[ro]" } else { "    " },
                        entry.value
                    );
                }
            }
            ConsoleCommand::Disconnect => {
                sim.disconnect();
                println!("disconnected");
            }
            ConsoleCommand::Help => println!("{}", HELP),
            ConsoleCommand::Quit => break,
        }
    }

    Ok(())
}

/// Truncate string with ellipsis
fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len - 3])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("start"), Some(ConsoleCommand::Start));
        assert_eq!(parse_command("  STOP "), Some(ConsoleCommand::Stop));
        assert_eq!(
            parse_command("suspendedev"),
            Some(ConsoleCommand::Status(ChargePointStatus::SuspendedEV))
        );
        assert_eq!(parse_command("q"), Some(ConsoleCommand::Quit));
        assert_eq!(parse_command("frobnicate"), None);
    }
}
