//! Flotilla CLI - Command-line interface
//!
//! Watches a dock's module traffic and drives output modules from scripts.

use clap::{Parser, Subcommand};
use flotilla_core::cli::{describe_port, format_event, print_exit_codes, CliResult, ExitCodes, OutputFormat};
use flotilla_core::config::DockSettings;
use flotilla_core::core::module::SLOT_COUNT;
use flotilla_core::core::registry::{DockRegistry, EventFilter};
use flotilla_core::core::session::{DockEvent, SessionHandle};
use flotilla_core::core::transport::{is_flotilla_dock, list_ports, ProcessConnector, SharedConnector};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tracing_subscriber::EnvFilter;

/// How long to wait for a session to wind down on exit
const SHUTDOWN_WAIT: Duration = Duration::from_secs(2);

/// Flotilla CLI
#[derive(Parser, Debug)]
#[command(
    name = "flotilla-cli",
    version,
    about = "Talk to a Flotilla dock over serial or a helper process",
    long_about = None
)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Settings file (defaults to the platform config directory)
    #[arg(short, long, env = "FLOTILLA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Where the dock is reached
#[derive(clap::Args, Debug, Clone)]
struct TargetArgs {
    /// Serial port (defaults to the configured port, then auto-detection)
    #[arg(short, long)]
    port: Option<String>,

    /// Talk to a helper program over stdin/stdout instead of a serial port
    #[arg(long, conflicts_with = "port")]
    helper: Option<String>,

    /// Arguments passed to the helper program
    #[arg(long = "helper-arg", requires = "helper")]
    helper_args: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts {
        /// Include ports that are not Flotilla docks
        #[arg(short, long)]
        all: bool,
    },

    /// Print dock events until interrupted
    Monitor {
        #[command(flatten)]
        target: TargetArgs,

        /// Only show module events for this channel
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=8))]
        channel: Option<u8>,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// Send raw values to an output module
    Update {
        #[command(flatten)]
        target: TargetArgs,

        /// Channel (1-8)
        channel: u8,

        /// Values, sent comma separated
        #[arg(required = true, allow_negative_numbers = true)]
        values: Vec<i32>,
    },

    /// Show a number on a seven-segment display
    Number {
        #[command(flatten)]
        target: TargetArgs,

        /// Channel (1-8)
        channel: u8,

        /// Value to show
        #[arg(allow_negative_numbers = true)]
        value: f64,

        /// Digits after the decimal point
        #[arg(short, long, default_value_t = 0)]
        decimals: u8,

        /// Pad with leading zeros instead of blanks
        #[arg(long)]
        zeros: bool,
    },

    /// Set a motor speed (-63 to 63)
    Motor {
        #[command(flatten)]
        target: TargetArgs,

        /// Channel (1-8)
        channel: u8,

        /// Speed
        #[arg(allow_negative_numbers = true)]
        speed: i32,
    },

    /// Show exit codes
    ExitCodes,
}

struct Target {
    key: String,
    connector: SharedConnector,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let result = match run(&cli).await {
        Ok(result) => result,
        Err(e) => CliResult::from(&e),
    };

    match result.message() {
        Some(msg) if !result.is_success() => eprintln!("Error: {msg}"),
        Some(msg) => println!("{msg}"),
        None => {}
    }
    result.to_exit_code()
}

fn init_logging(verbose: bool, json: bool) {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let filter = EnvFilter::from_default_env().add_directive(level.into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: &Cli) -> anyhow::Result<CliResult> {
    let settings = match &cli.config {
        Some(path) => DockSettings::load_from(path)?,
        None => DockSettings::load()?,
    };
    tracing::debug!(?settings, "settings loaded");

    match &cli.command {
        Commands::ListPorts { all } => list(cli.format, *all),
        Commands::Monitor { target, channel, duration } => {
            let Some(target) = resolve_target(target, &settings)? else {
                return Ok(no_dock());
            };
            monitor(cli.format, &settings, target, *channel, *duration).await
        }
        Commands::Update { target, channel, values } => {
            let Some(target) = resolve_target(target, &settings)? else {
                return Ok(no_dock());
            };
            with_dock(&settings, target, |dock| dock.update_module(*channel, values)).await
        }
        Commands::Number { target, channel, value, decimals, zeros } => {
            let Some(target) = resolve_target(target, &settings)? else {
                return Ok(no_dock());
            };
            let pad = if *zeros { '0' } else { ' ' };
            with_dock(&settings, target, |dock| {
                let mut display = dock.number(*channel);
                display.set_number(*value, *decimals, pad);
                display.show()
            })
            .await
        }
        Commands::Motor { target, channel, speed } => {
            let Some(target) = resolve_target(target, &settings)? else {
                return Ok(no_dock());
            };
            with_dock(&settings, target, |dock| dock.motor(*channel).set_speed(*speed).map(|_| ())).await
        }
        Commands::ExitCodes => {
            print_exit_codes();
            Ok(CliResult::success())
        }
    }
}

fn no_dock() -> CliResult {
    CliResult::error(ExitCodes::DEVICE_NOT_FOUND, "No Flotilla dock found")
}

fn list(format: OutputFormat, all: bool) -> anyhow::Result<CliResult> {
    let ports: Vec<_> = list_ports()?
        .into_iter()
        .filter(|p| all || is_flotilla_dock(p))
        .collect();

    match format {
        OutputFormat::Json => {
            let entries: Vec<_> = ports.iter().map(describe_port).collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        OutputFormat::Text => {
            if ports.is_empty() {
                println!("No ports found");
            }
            for port in &ports {
                let marker = if is_flotilla_dock(port) { " (flotilla)" } else { "" };
                println!("{}{}", port.port_name, marker);
            }
        }
    }
    Ok(CliResult::success())
}

fn resolve_target(args: &TargetArgs, settings: &DockSettings) -> anyhow::Result<Option<Target>> {
    if let Some(program) = &args.helper {
        return Ok(Some(Target {
            key: program.clone(),
            connector: Arc::new(ProcessConnector::new(args.helper_args.clone())),
        }));
    }

    let port = match args.port.clone().or_else(|| settings.port.clone()) {
        Some(port) => Some(port),
        None => list_ports()?
            .into_iter()
            .find(is_flotilla_dock)
            .map(|p| p.port_name),
    };

    Ok(port.map(|key| {
        tracing::info!(port = %key, "using dock");
        Target {
            key,
            connector: Arc::new(settings.serial_connector()),
        }
    }))
}

async fn monitor(
    format: OutputFormat,
    settings: &DockSettings,
    target: Target,
    channel: Option<u8>,
    duration: Option<u64>,
) -> anyhow::Result<CliResult> {
    let registry = DockRegistry::new(target.connector, settings.session_config());
    let (tx, mut rx) = mpsc::unbounded_channel::<DockEvent>();

    let channels: Vec<u8> = match channel {
        Some(channel) => vec![channel],
        None => (1..=SLOT_COUNT as u8).collect(),
    };
    let mut subscriptions = Vec::with_capacity(channels.len());
    for (i, channel) in channels.into_iter().enumerate() {
        // Session-wide events reach every subscription, so only one takes them
        let filter = if i == 0 { EventFilter::all() } else { EventFilter::modules() };
        let tx = tx.clone();
        let id = registry.subscribe(
            &target.key,
            channel,
            filter,
            Arc::new(move |event: &DockEvent| {
                let _ = tx.send(event.clone());
            }),
        )?;
        subscriptions.push(id);
    }
    drop(tx);

    let deadline = duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut last_error = None;
    let mut session_ended = false;

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                println!("{}", format_event(&event, format));
                match event {
                    DockEvent::Error(err) => last_error = Some(err),
                    DockEvent::Closed => {
                        session_ended = true;
                        break;
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => break,
            _ = expire(deadline) => break,
        }
    }

    let handle = registry.handle(&target.key);
    for id in subscriptions {
        registry.unsubscribe(id);
    }
    registry.shutdown();
    if let Some(handle) = handle {
        let _ = timeout(SHUTDOWN_WAIT, handle.closed()).await;
    }

    match (session_ended, last_error) {
        (true, Some(err)) => Ok(CliResult::from(&err)),
        _ => Ok(CliResult::success()),
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Acquire the dock, run `action` once it is identified, then close the link
/// after the queued writes have gone out.
async fn with_dock<F>(settings: &DockSettings, target: Target, action: F) -> anyhow::Result<CliResult>
where
    F: FnOnce(&SessionHandle) -> Result<(), flotilla_core::DockError>,
{
    let registry = DockRegistry::new(target.connector, settings.session_config());
    let handle = registry.acquire(&target.key).await?;
    tracing::info!(dock = %handle.identity(), "dock ready");

    let outcome = action(&handle);
    handle.shutdown();
    let _ = timeout(SHUTDOWN_WAIT, handle.closed()).await;

    outcome?;
    Ok(CliResult::success())
}
