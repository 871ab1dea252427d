//! Baud/frame scan driver
//!
//! Probes every candidate (baud, frame) combination with a short-lived
//! sniffer until one of them yields at least one matched transaction.
//! Connect the tap to a line with live traffic before scanning. The
//! enumeration order is fixed so "first match" results are reproducible.

use std::time::Duration;

use tracing::{debug, info};

use super::config::{FrameFormat, PortConfig, SnifferConfig, SCAN_BAUD_RATES};
use super::sniffer::Sniffer;
use super::transport::{BoxedByteSource, SerialByteSource};
use crate::utils::error::Result;

/// Default time spent watching each candidate configuration
pub const DEFAULT_SCAN_WINDOW_SECS: u64 = 5;

/// Scan parameters; `baud`/`frame` pin the respective axis when set
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub baud: Option<u32>,
    pub frame: Option<FrameFormat>,
    pub window: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            baud: None,
            frame: None,
            window: Duration::from_secs(DEFAULT_SCAN_WINDOW_SECS),
        }
    }
}

/// Builds a byte source for one candidate port; swapped out by tests
pub type SourceFactory = dyn Fn(&PortConfig) -> Result<BoxedByteSource> + Send + Sync;

/// All candidate configurations derived from `base`, in probe order:
/// baud rates as listed in `SCAN_BAUD_RATES`, frames per
/// `FrameFormat::scan_order`. Pins restrict the respective axis. In duplex
/// mode both lines share the candidate baud and frame.
pub fn candidate_configs(
    base: &SnifferConfig,
    baud_pin: Option<u32>,
    frame_pin: Option<FrameFormat>,
) -> Vec<SnifferConfig> {
    let mut candidates = Vec::new();
    for baud in SCAN_BAUD_RATES {
        if baud_pin.is_some_and(|pin| pin != baud) {
            continue;
        }
        for frame in FrameFormat::scan_order() {
            if frame_pin.is_some_and(|pin| pin != frame) {
                continue;
            }
            let mut candidate = base.clone();
            for port in &mut candidate.ports {
                port.baud = baud;
                port.frame = frame;
            }
            candidates.push(candidate);
        }
    }
    candidates
}

/// Scan over real serial ports
pub async fn scan(base: &SnifferConfig, options: &ScanOptions) -> Result<Option<SnifferConfig>> {
    scan_with_factory(base, options, &|port| {
        SerialByteSource::open(port).map(|source| Box::new(source) as BoxedByteSource)
    })
    .await
}

/// Scan with a caller-supplied byte-source factory. Returns the first
/// candidate that produced a matched transaction within its window, or
/// `None` when every candidate failed. Candidates whose ports cannot be
/// opened fail immediately without waiting out the window.
pub async fn scan_with_factory(
    base: &SnifferConfig,
    options: &ScanOptions,
    factory: &SourceFactory,
) -> Result<Option<SnifferConfig>> {
    base.validate()?;

    for candidate in candidate_configs(base, options.baud, options.frame) {
        info!("Trying {}...", candidate.describe());

        let sources: Result<Vec<BoxedByteSource>> =
            candidate.ports.iter().map(|port| factory(port)).collect();
        let sources = match sources {
            Ok(sources) => sources,
            Err(e) => {
                debug!("Skipping {}: {e}", candidate.describe());
                continue;
            }
        };

        let mut sniffer = Sniffer::spawn(&candidate, sources)?;
        tokio::time::sleep(options.window).await;
        let hits = sniffer.drain_results();
        sniffer.close().await;

        if !hits.is_empty() {
            info!(
                "Received {} valid transaction(s) with {}",
                hits.len(),
                candidate.describe()
            );
            return Ok(Some(candidate));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> SnifferConfig {
        let frame = FrameFormat::parse("8N1").expect("valid frame token");
        SnifferConfig::half_duplex(PortConfig::new("/dev/ttyUSB0", 9600, frame))
    }

    #[test]
    fn test_candidate_enumeration_order() {
        let candidates = candidate_configs(&base_config(), None, None);
        assert_eq!(candidates.len(), 8 * 18);

        let first = &candidates[0].ports[0];
        assert_eq!((first.baud, first.frame.to_string().as_str()), (9600, "7N1"));
        // 8N1 at 9600 is the tenth frame of the first baud block
        let tenth = &candidates[9].ports[0];
        assert_eq!((tenth.baud, tenth.frame.to_string().as_str()), (9600, "8N1"));
        // Second baud block starts after all 18 frames
        let next_block = &candidates[18].ports[0];
        assert_eq!(next_block.baud, 19200);
        let last = &candidates[8 * 18 - 1].ports[0];
        assert_eq!((last.baud, last.frame.to_string().as_str()), (1200, "8O15"));
    }

    #[test]
    fn test_candidate_pins_restrict_axes() {
        let frame = FrameFormat::parse("8N1").expect("valid frame token");
        let candidates = candidate_configs(&base_config(), Some(9600), Some(frame));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].ports[0].baud, 9600);
        assert_eq!(candidates[0].ports[0].frame, frame);

        let candidates = candidate_configs(&base_config(), Some(115200), None);
        assert_eq!(candidates.len(), 18);
        assert!(candidates.iter().all(|c| c.ports[0].baud == 115200));
    }
}
