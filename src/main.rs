//! Passive Modbus RTU sniffer - main entry point
//!
//! Opens one serial line (half-duplex: requests and replies share the wire)
//! or two (full-duplex: tx line on `--port1`, rx line on `--port2`), pairs
//! the traffic into transactions and prints them every few seconds. With
//! `--scan` it instead probes baud/frame combinations until one of them
//! produces a valid transaction.
//!
//! ```bash
//! # sniff a half-duplex RS-485 tap
//! sniffsrv --port1 /dev/ttyUSB0 --baud 9600 --frame 8N1
//!
//! # find the line settings of an unknown bus
//! sniffsrv --port1 /dev/ttyUSB0 --scan
//! ```
//!
//! Exit code 0 on success; 1 when a scan found no valid configuration.

use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sniffsrv::core::config::{FrameFormat, PortConfig, SnifferConfig};
use sniffsrv::core::scan::{self, ScanOptions, DEFAULT_SCAN_WINDOW_SECS};
use sniffsrv::core::sniffer::Sniffer;
use sniffsrv::utils::error::Result;
use sniffsrv::wait_for_shutdown;

const RESULT_PRINT_INTERVAL: Duration = Duration::from_secs(5);
const COUNT_PRINT_INTERVAL: Duration = Duration::from_secs(1);

/// Command line arguments
#[derive(Parser)]
#[command(
    name = "sniffsrv",
    version,
    about = "Passive Modbus RTU bus sniffer",
    long_about = "Read-only Modbus RTU sniffer: dissects the raw byte stream of one or \
                  two serial taps, pairs requests with responses/exceptions and prints \
                  the matched transactions"
)]
struct Args {
    /// First port: tx and rx in half-duplex mode, tx line in duplex mode
    #[arg(long, default_value = "/dev/ttyUSB0")]
    port1: String,

    /// Second port: rx line, duplex mode only
    #[arg(long, default_value = "/dev/ttyUSB1")]
    port2: String,

    /// Capture tx and rx on separate ports
    #[arg(long)]
    duplex: bool,

    /// Baud rate [default: 9600]; in scan mode setting this pins the baud axis
    #[arg(short, long)]
    baud: Option<u32>,

    /// Frame token [default: 8N1]; in scan mode setting this pins the frame axis
    #[arg(short, long)]
    frame: Option<FrameFormat>,

    /// Log every received chunk
    #[arg(long)]
    debug: bool,

    /// Exit after this many seconds (0 = run until interrupted)
    #[arg(long = "run-for", default_value_t = 0)]
    run_for: u64,

    /// Probe baud/frame combinations instead of sniffing; exits 0 when a
    /// combination yields at least one matched transaction
    #[arg(long)]
    scan: bool,

    /// Seconds to watch each scan candidate
    #[arg(long = "scan-seconds", default_value_t = DEFAULT_SCAN_WINDOW_SECS)]
    scan_seconds: u64,

    /// Byte-buffer eviction window in seconds (0 disables)
    #[arg(long = "flush-after", default_value_t = sniffsrv::core::config::DEFAULT_FLUSH_AFTER_SECS)]
    flush_after: u64,
}

impl Args {
    fn sniffer_config(&self) -> SnifferConfig {
        let baud = self.baud.unwrap_or(9600);
        let frame = self.frame.unwrap_or_default();

        let mut port1 = PortConfig::new(&self.port1, baud, frame);
        port1.flush_after_secs = self.flush_after;
        port1.debug = self.debug;

        if self.duplex {
            let mut port2 = PortConfig::new(&self.port2, baud, frame);
            port2.flush_after_secs = self.flush_after;
            port2.debug = self.debug;
            SnifferConfig::full_duplex(port1, port2)
        } else {
            SnifferConfig::half_duplex(port1)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = args.sniffer_config();
    config.validate()?;

    if args.scan {
        let options = ScanOptions {
            baud: args.baud,
            frame: args.frame,
            window: Duration::from_secs(args.scan_seconds),
        };
        match scan::scan(&config, &options).await? {
            Some(found) => {
                println!("Found! Received valid data with: {}", found.describe());
                return Ok(());
            }
            None => {
                println!("No valid config found");
                std::process::exit(1);
            }
        }
    }

    info!(
        "Starting {} Modbus RTU sniffer on {}",
        if args.duplex { "duplex" } else { "half-duplex" },
        config.describe()
    );

    let mut sniffer = Sniffer::open(&config)?;

    // Print matched transactions every few seconds
    let store = sniffer.store();
    let printer = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RESULT_PRINT_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            for transaction in store.drain() {
                println!("{transaction}");
            }
        }
    });

    // Result counter under --debug
    let counter = args.debug.then(|| {
        let store = sniffer.store();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(COUNT_PRINT_INTERVAL);
            loop {
                ticker.tick().await;
                println!("Results count: {}", store.count());
            }
        })
    });

    if args.run_for > 0 {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(args.run_for)) => {
                info!("Run window of {} s elapsed", args.run_for);
            }
            _ = wait_for_shutdown() => {}
        }
    } else {
        wait_for_shutdown().await;
    }

    printer.abort();
    if let Some(counter) = counter {
        counter.abort();
    }
    sniffer.close().await;

    Ok(())
}
