use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use nfc_core::tag::{NdefDetection, NdefStatus};
use nfc_core::{
    DispatchObserver, MockReader, NdefMessage, NusbReader, SessionConfig,
    SessionController, SessionObserver, SessionRequest, TagCapacity, TagEvent, TagReader,
};
use tracing::{error, info};

/// Identifier of the simulated NTAG213.
const SIM_UID: [u8; 7] = [0x04, 0x5A, 0x3C, 0x12, 0x9B, 0x61, 0x80];

#[derive(Parser, Debug)]
#[command(author, version, about = "NFC tag session tool", long_about = None)]
struct Args {
    /// Session configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use a simulated reader holding one NTAG213 instead of USB hardware
    #[arg(long, global = true)]
    simulate: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check whether a supported reader is connected
    Probe,
    /// Report the identity of the tag in the field
    Read,
    /// Write up to four ASCII characters unless the tag already holds them
    Write { text: String },
    /// Zero every user page of a memory tag
    Clear {
        /// Tag type whose user pages are cleared (ntag213, ntag215, ntag216)
        #[arg(long)]
        capacity: Option<TagCapacity>,
    },
    /// Read or write NDEF text through the message-based path (simulation only)
    Legacy {
        /// Text to store in an NDEF text record
        #[arg(long)]
        write: Option<String>,
    },
    /// Write a default configuration file
    InitConfig { path: PathBuf },
}

/// Prints each session event as one line.
struct ConsoleObserver;

impl SessionObserver for ConsoleObserver {
    fn on_event(&self, event: &TagEvent) {
        println!("{}", event);
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::WARN.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args).await {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            SessionConfig::load_from_file(path)?
        }
        None => SessionConfig::default(),
    };

    match args.command {
        Command::Probe => probe(args.simulate),
        Command::InitConfig { path } => {
            config.save_to_file(&path)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
        Command::Read => run_tag_session(args.simulate, config, SessionRequest::read()).await,
        Command::Write { text } => {
            run_tag_session(args.simulate, config, SessionRequest::write(text)).await
        }
        Command::Clear { capacity } => {
            let config = match capacity {
                Some(capacity) => config.with_capacity(capacity),
                None => config,
            };
            config.validate()?;
            run_tag_session(args.simulate, config, SessionRequest::clear()).await
        }
        Command::Legacy { write } => {
            if !args.simulate {
                bail!("The message-based path is only available with --simulate");
            }
            let request = match write {
                Some(text) => SessionRequest::write(text),
                None => SessionRequest::read(),
            };
            run_legacy_session(config, request).await
        }
    }
}

fn probe(simulate: bool) -> Result<()> {
    if simulate {
        println!("Simulated reader available");
        return Ok(());
    }
    if !NusbReader::is_supported() {
        bail!("No supported reader found");
    }
    let reader = NusbReader::open()?;
    println!(
        "Reader {:04X}:{:04X} ready",
        reader.vendor_id(),
        reader.product_id()
    );
    Ok(())
}

fn simulated_reader() -> MockReader {
    let reader = MockReader::new();
    let tag = reader.add_memory_tag(1, &SIM_UID);
    reader.load_pages(1, 4, b"demo");
    reader.queue_detection(vec![tag]);
    reader
}

fn simulated_ndef_reader() -> MockReader {
    let reader = MockReader::new();
    let message = NdefMessage::text("hello from the simulator").ok();
    let tag = reader.add_ndef_tag(1, NdefStatus::ReadWrite, 137, message);
    reader.queue_ndef_detection(NdefDetection::Tags(vec![tag]));
    reader
}

async fn run_tag_session(
    simulate: bool,
    config: SessionConfig,
    request: SessionRequest,
) -> Result<()> {
    if simulate {
        drive(simulated_reader(), config, request).await
    } else {
        drive(NusbReader::open()?, config, request).await
    }
}

async fn drive<R: TagReader>(reader: R, config: SessionConfig, request: SessionRequest) -> Result<()> {
    let (observer, dispatcher) = DispatchObserver::spawn(ConsoleObserver);
    let controller = SessionController::with_observer(reader, config, Arc::new(observer));

    if !controller.is_scanning_supported() {
        bail!("Tag scanning is not supported by this reader");
    }

    let result = controller.start_session(request).await;

    // Flush every queued event before returning
    drop(controller);
    dispatcher.await?;

    let outcome = result?;
    if let Some(text) = outcome.decoded_text {
        info!(text = %text, "Text found on tag");
    }
    Ok(())
}

async fn run_legacy_session(config: SessionConfig, request: SessionRequest) -> Result<()> {
    let (observer, dispatcher) = DispatchObserver::spawn(ConsoleObserver);
    let controller =
        SessionController::with_observer(simulated_ndef_reader(), config, Arc::new(observer));

    let result = controller.start_legacy_session(request).await;

    drop(controller);
    dispatcher.await?;

    result?;
    Ok(())
}
