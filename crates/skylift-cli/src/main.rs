use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::bounded;
use tracing::{error, info, warn};

use skylift_radio::{Radio, RadioConfig};
use skylift_transfer::{FileReceiver, FileSender, TransferEvent};

/// Default operating channel both sides tune before anything else.
const RENDEZVOUS_CHANNEL: u8 = 42;

/// Module address used when transmitting. Receivers listen on the monitor
/// address instead.
const TRANSMIT_ADDRESS: u16 = 0x0001;

/// Main-thread poll interval for the termination flag.
const MAIN_POLL: Duration = Duration::from_millis(10);

#[derive(Parser)]
#[command(name = "skylift", version, about = "Broadcast file transfer over a LoRa HAT")]
struct Cli {
    /// Serial device the HAT is attached to
    #[arg(long, default_value = "/dev/ttyS0")]
    device: String,

    /// Operating channel (0-83)
    #[arg(long, default_value_t = RENDEZVOUS_CHANNEL)]
    channel: u8,

    /// Enable listen-before-transmit
    #[arg(long)]
    lbt: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Broadcast a file until stopped
    Send { path: String },
    /// Listen for a broadcast and write the file to the current directory
    Receive,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "skylift=info,skylift_radio=info,skylift_transfer=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    let terminated = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&terminated);
        if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::Release)) {
            error!("failed to install signal handler: {e}");
            process::exit(-1);
        }
    }

    let code = match run(cli, terminated) {
        Ok(()) => 0,
        Err(e) => {
            error!("{e:#}");
            -1
        }
    };
    process::exit(code);
}

fn run(cli: Cli, terminated: Arc<AtomicBool>) -> Result<()> {
    let radio = Radio::initialize(RadioConfig {
        device: cli.device,
        channel: cli.channel,
        transmit_address: TRANSMIT_ADDRESS,
        lbt: cli.lbt,
    })
    .context("radio initialization failed")?;

    match cli.command {
        Command::Send { path } => run_send(radio, &path, terminated),
        Command::Receive => run_receive(radio, terminated),
    }
}

fn run_send(radio: Radio, path: &str, terminated: Arc<AtomicBool>) -> Result<()> {
    let file_bytes =
        std::fs::read(path).with_context(|| format!("failed to read file: {path}"))?;

    let mut sender = FileSender::start(radio, path, &file_bytes, Arc::clone(&terminated))
        .context("sender initialization failed")?;
    let stats = sender.stats();
    info!("broadcasting '{path}'; stop with Ctrl-C");

    let mut last_report = Instant::now();
    while !terminated.load(Ordering::Acquire) {
        if last_report.elapsed() > Duration::from_secs(10) {
            info!(
                "emitted {} blocks",
                stats.emitted_blocks.load(Ordering::Relaxed)
            );
            last_report = Instant::now();
        }
        thread::sleep(MAIN_POLL);
    }

    sender.shutdown();
    info!(
        "sender stopped after {} blocks",
        stats.emitted_blocks.load(Ordering::Relaxed)
    );
    Ok(())
}

fn run_receive(radio: Radio, terminated: Arc<AtomicBool>) -> Result<()> {
    let (event_tx, event_rx) = bounded::<TransferEvent>(256);
    let callback = Box::new(move |event: TransferEvent| {
        // The receiver thread must never block on a slow consumer.
        if event_tx.try_send(event).is_err() {
            warn!("event channel full; dropping progress event");
        }
    });

    let mut receiver = FileReceiver::start(radio, Arc::clone(&terminated), callback)
        .context("receiver initialization failed")?;
    info!("listening; stop with Ctrl-C");

    let mut delivered = false;
    while !terminated.load(Ordering::Acquire) && !delivered {
        while let Ok(event) = event_rx.try_recv() {
            match event {
                TransferEvent::Progress {
                    received,
                    total,
                    progress,
                } => {
                    info!("received {received}/{total} blocks ({:.0}%)", progress * 100.0);
                }
                TransferEvent::Complete { name, data } => {
                    write_received_file(&name, &data)?;
                    delivered = true;
                }
            }
        }
        thread::sleep(MAIN_POLL);
    }

    receiver.shutdown();
    Ok(())
}

/// Write the delivered file into the current working directory. Only the
/// final path component of the announced name is honored.
fn write_received_file(name: &str, data: &[u8]) -> Result<()> {
    let file_name = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "received.bin".into());

    std::fs::write(&file_name, data)
        .with_context(|| format!("failed to write received file: {file_name}"))?;
    info!("wrote {} bytes to '{file_name}'", data.len());
    Ok(())
}
