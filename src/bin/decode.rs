//! Decode transaction dumps from stdin
//!
//! Reads lines of space-separated decimal bytes, the form in which the
//! sniffer's `encode_and_drain` output is typically logged, e.g.
//! `91 123 34 114 101 113 ...`, decodes each line back into the
//! transaction list and pretty-prints it. Exits on EOF.

use std::io::BufRead;

use tracing::warn;
use tracing_subscriber::EnvFilter;

use sniffsrv::core::adu::Transaction;
use sniffsrv::utils::error::Result;

fn parse_byte_line(line: &str) -> Option<Vec<u8>> {
    line.split_whitespace()
        .map(|token| token.parse::<u8>().ok())
        .collect()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let Some(bytes) = parse_byte_line(&line) else {
            warn!("Skipping line with non-numeric tokens");
            continue;
        };

        match serde_json::from_slice::<Vec<Transaction>>(&bytes) {
            Ok(transactions) => {
                for transaction in transactions {
                    println!("{transaction}");
                }
            }
            Err(e) => warn!("Skipping undecodable line: {e}"),
        }
    }

    Ok(())
}
