//! Binary entrypoint for the meshnode CLI.
//!
//! Commands:
//! - `run [--port <path>] [--ticks <n>]` - run the node, optionally bridged to a serial port
//! - `init` - write a starter `meshnode.toml`
//! - `plan [--ticks <n>]` - print which jobs fire on which ticks
//!
//! See the library crate docs for module-level details: `meshnode::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};

use meshnode::config::Config;
use meshnode::mesh::{LoopbackRadio, NodeId};
use meshnode::node::{schedule_plan, NodeRuntime};
use meshnode::scheduler::NoPower;
use meshnode::serial::{SerialLink, StdoutLink};

#[derive(Parser)]
#[command(name = "meshnode")]
#[command(about = "Sensor node core for low-power radio meshes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "meshnode.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node
    Run {
        /// Serial host port (e.g., /dev/ttyACM0); stdout when absent
        #[arg(short, long)]
        port: Option<String>,

        /// Stop after this many scheduler ticks
        #[arg(short, long)]
        ticks: Option<u32>,
    },
    /// Write a default configuration file
    Init,
    /// Show the job schedule for the configured jobs
    Plan {
        #[arg(short, long, default_value_t = 60)]
        ticks: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { port, ticks } => {
            let config = Config::load(&cli.config).await?;
            init_logging(&Some(config.clone()), cli.verbose);
            info!("Starting meshnode v{}", env!("CARGO_PKG_VERSION"));

            // CLI overrides config; empty config port means stdout
            let chosen_port = port.or_else(|| {
                (!config.serial.port.is_empty()).then(|| config.serial.port.clone())
            });

            let radio = LoopbackRadio::new(NodeId(config.node.node_id));
            let (link, reader) = open_link(chosen_port.as_deref(), config.serial.baud_rate);
            let (mut node, handles) =
                NodeRuntime::new(&config, Box::new(radio), link, Box::new(NoPower))?;
            if let Some(limit) = ticks {
                node = node.with_tick_limit(limit);
            }
            if let Some(start_reader) = reader {
                start_reader(handles.host_bytes.clone());
            }
            node.run().await;
        }
        Commands::Init => {
            init_logging(&None, cli.verbose);
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Plan { ticks } => {
            let config = Config::load(&cli.config).await?;
            for (tick, jobs) in schedule_plan(&config.jobs, ticks) {
                println!("{:>6}  {}", tick, jobs.join(" "));
            }
        }
    }

    Ok(())
}

type ReaderStarter = Box<dyn FnOnce(tokio::sync::mpsc::UnboundedSender<u8>)>;

/// Pick the host link. Falls back to stdout when the port cannot be opened
/// so the node keeps reporting.
fn open_link(port: Option<&str>, baud: u32) -> (Box<dyn SerialLink>, Option<ReaderStarter>) {
    match port {
        #[cfg(feature = "serial")]
        Some(path) => match meshnode::serial::port::open(path, baud) {
            Ok((link, reader)) => {
                info!("Serial host on {} @ {} baud", path, baud);
                let start: ReaderStarter = Box::new(move |tx| {
                    let _ = meshnode::serial::port::spawn_reader(reader, tx);
                });
                (Box::new(link), Some(start))
            }
            Err(e) => {
                warn!("{} (continuing on stdout)", e);
                (Box::new(StdoutLink::new()), None)
            }
        },
        #[cfg(not(feature = "serial"))]
        Some(path) => {
            let _ = baud;
            warn!("Serial support not compiled in; ignoring port {}", path);
            (Box::new(StdoutLink::new()), None)
        }
        None => {
            info!("No serial port configured; host lines go to stdout");
            (Box::new(StdoutLink::new()), None)
        }
    }
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    let log_file = config.as_ref().and_then(|c| c.logging.file.clone());
    let opened = log_file.and_then(|file| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
            .ok()
    });
    if let Some(f) = opened {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Foreground: file and console. Redirected: file only.
        let is_tty = atty::is(atty::Stream::Stderr);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
