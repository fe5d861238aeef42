use clap::{Parser, Subcommand, ValueEnum};
use serial_transport::activity::{ActivityEvent, ActivityKind, ActivityLog, Fanout, TracingSink};
use serial_transport::config::{Config, ConfigLoader};
use serial_transport::payload::{encode_line, format_hex, parse_hex, render_text};
use serial_transport::{
    logging, ActivitySink, ConnectionError, ControlSequencer, ReadLoop, SystemBackend,
    TransportSession,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "USB-serial transport for microcontroller boards: discover, monitor, send, reset.",
    long_about = None
)]
struct Args {
    /// Configuration file (defaults to the standard resolution order).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached USB serial devices.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Print everything the device sends until Ctrl+C.
    Monitor {
        device: String,
        #[arg(short, long)]
        baud: Option<u32>,
        /// Stop after this many seconds.
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// Send one text line (or raw hex bytes) to the device.
    Send {
        device: String,
        text: String,
        /// Interpret TEXT as space-separated hex bytes, e.g. "01 02 FF".
        #[arg(long)]
        hex: bool,
        #[arg(short, long)]
        baud: Option<u32>,
    },
    /// Drive DTR and/or RTS to a fixed level.
    Lines {
        device: String,
        #[arg(long)]
        dtr: Option<LineLevel>,
        #[arg(long)]
        rts: Option<LineLevel>,
    },
    /// Reset the board.
    Reset { device: String },
    /// Reset the board into its bootloader.
    Bootloader { device: String },
    /// Connect and switch to another baud rate.
    Baud { device: String, rate: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LineLevel {
    On,
    Off,
}

impl LineLevel {
    fn is_high(self) -> bool {
        self == LineLevel::On
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    }
    .into_config();
    logging::init_tracing(&config.logging)?;

    match args.command {
        Command::List { json } => list_devices(&config, json),
        Command::Monitor {
            device,
            baud,
            duration_secs,
        } => monitor(&config, &device, baud, duration_secs.map(Duration::from_secs)).await,
        Command::Send {
            device,
            text,
            hex,
            baud,
        } => send(&config, &device, &text, hex, baud).await,
        Command::Lines { device, dtr, rts } => lines(&config, &device, dtr, rts).await,
        Command::Reset { device } => run_sequence(&config, &device, false).await,
        Command::Bootloader { device } => run_sequence(&config, &device, true).await,
        Command::Baud { device, rate } => change_baud(&config, &device, rate).await,
    }
}

type CliResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

fn new_session(config: &Config, sink: Arc<dyn ActivitySink>) -> Arc<TransportSession> {
    Arc::new(TransportSession::with_options(
        Arc::new(SystemBackend::new()),
        sink,
        config.session_options(),
    ))
}

/// Resolve aliases, look the handle up and connect to exactly the hardware
/// that was found, at `baud` or the configured default.
async fn open(
    config: &Config,
    sink: Arc<dyn ActivitySink>,
    device: &str,
    baud: Option<u32>,
) -> Result<Arc<TransportSession>, Box<dyn std::error::Error + Send + Sync>> {
    let session = new_session(config, sink);
    let handle = config.serial.resolve_port(device);
    let descriptor = session
        .list_devices()?
        .into_iter()
        .find(|d| d.name == handle)
        .ok_or_else(|| ConnectionError::DeviceNotFound(handle.clone()))?;
    info!(device = %descriptor, "opening");
    session
        .connect_descriptor(&descriptor, baud.unwrap_or(config.serial.default_baud))
        .await?;
    Ok(session)
}

fn list_devices(config: &Config, json: bool) -> CliResult {
    let session = new_session(config, Arc::new(TracingSink));
    let devices = session.list_devices()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }
    if devices.is_empty() {
        println!("No USB serial devices found");
        return Ok(());
    }
    for device in &devices {
        let ports = if device.port_count > 1 {
            format!(" ({} ports)", device.port_count)
        } else {
            String::new()
        };
        println!("{device}{ports}");
    }
    Ok(())
}

async fn monitor(
    config: &Config,
    device: &str,
    baud: Option<u32>,
    duration: Option<Duration>,
) -> CliResult {
    let (tx, mut rx) = mpsc::unbounded_channel::<ActivityEvent>();
    let received = Arc::new(ActivityLog::with_capacity(config.activity.received_capacity));
    let sink = Fanout::new()
        .with(Arc::new(TracingSink))
        .with(Arc::new(tx));

    let session = open(config, Arc::new(sink), device, baud).await?;
    let read_loop = ReadLoop::new(session.clone()).with_read_timeout(config.read_loop.read_timeout());
    read_loop.start().await?;
    info!(device, "monitoring; press Ctrl+C to stop");

    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = &mut deadline => break,
            event = rx.recv() => {
                let Some(event) = event else { break };
                if event.kind == ActivityKind::Receive {
                    if let Some(bytes) = &event.payload {
                        write!(stdout, "{}", render_text(bytes))?;
                        stdout.flush()?;
                    }
                    received.record(event);
                }
            }
        }
    }

    read_loop.stop().await;
    session.disconnect().await;

    info!(chunks_retained = received.len(), "monitor stopped");
    eprintln!("Disconnected from {device}");
    Ok(())
}

async fn send(config: &Config, device: &str, text: &str, hex: bool, baud: Option<u32>) -> CliResult {
    let bytes = if hex { parse_hex(text)? } else { encode_line(text) };
    let session = open(config, Arc::new(TracingSink), device, baud).await?;

    let result = session.write(&bytes).await;
    session.disconnect().await;
    result?;

    println!("Sent {} byte(s): {}", bytes.len(), format_hex(&bytes));
    Ok(())
}

async fn lines(
    config: &Config,
    device: &str,
    dtr: Option<LineLevel>,
    rts: Option<LineLevel>,
) -> CliResult {
    let session = open(config, Arc::new(TracingSink), device, None).await?;

    let result = async {
        if let Some(level) = dtr {
            session.set_dtr(level.is_high()).await?;
        }
        if let Some(level) = rts {
            session.set_rts(level.is_high()).await?;
        }
        Ok::<_, serial_transport::TransportError>(session.status())
    }
    .await;
    session.disconnect().await;

    let status = result?;
    println!(
        "DTR={} RTS={}",
        if status.dtr { "on" } else { "off" },
        if status.rts { "on" } else { "off" }
    );
    Ok(())
}

async fn run_sequence(config: &Config, device: &str, bootloader: bool) -> CliResult {
    let session = open(config, Arc::new(TracingSink), device, None).await?;
    let sequencer = ControlSequencer::new(session.clone());

    let result = if bootloader {
        sequencer.enter_bootloader().await
    } else {
        sequencer.reset().await
    };
    session.disconnect().await;

    if let Err(e) = result {
        error!(error = %e, "control sequence failed");
        return Err(e.into());
    }
    println!(
        "{}",
        if bootloader {
            "Board reset into bootloader"
        } else {
            "Board reset"
        }
    );
    Ok(())
}

async fn change_baud(config: &Config, device: &str, rate: u32) -> CliResult {
    let session = open(config, Arc::new(TracingSink), device, None).await?;
    let result = session.set_baud_rate(rate).await;
    let status = session.status();
    session.disconnect().await;
    result?;

    println!("Baud rate set to {}", status.baud_rate.unwrap_or(rate));
    Ok(())
}

// --- Graceful Shutdown Handler ---
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("signal received, shutting down");
}
