//! Passive Modbus RTU sniffer
//!
//! Watches one or two serial lines, reconstructs well-formed application
//! data units out of the raw byte stream and pairs every request with its
//! response or exception. A scan mode probes baud/frame combinations until
//! valid traffic is recognized. The tap never transmits on the bus.

pub mod core;
pub mod utils;

pub use core::adu::{Adu, ExceptionAdu, Reply, RequestAdu, ResponseAdu, Transaction};
pub use core::config::{FrameFormat, PortConfig, SnifferConfig, SCAN_BAUD_RATES};
pub use core::dissector::{AduFilter, Dissector};
pub use core::scan::{scan, scan_with_factory, ScanOptions};
pub use core::sniffer::Sniffer;
pub use core::transport::{BoxedByteSource, ByteSource, Chunk, SerialByteSource};
pub use utils::error::{Result, SnifferError};

use tracing::error;

/// Wait for shutdown signal (Ctrl+C or SIGTERM on Unix)
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let term_signal = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                error!(
                    "Failed to install SIGTERM handler: {}. Only Ctrl+C will be handled",
                    e
                );
                None
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(mut sig) = term_signal {
                    sig.recv().await;
                } else {
                    std::future::pending::<()>().await
                }
            } => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
