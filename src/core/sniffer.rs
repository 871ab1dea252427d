//! Sniffer: owns the dissectors and pairs requests with replies
//!
//! Half-duplex capture runs one dissector over the shared wire and routes
//! each ADU by its kind. Full-duplex capture runs one dissector per wire:
//! the tx line only yields requests, the rx line only replies, and routing
//! follows the originating line. Either way the pairing rules are the same:
//! a reply answers the earliest pending request not captured after it,
//! addressed to the same station and echoing its function code.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::adu::{Adu, Reply, RequestAdu, Transaction};
use super::config::SnifferConfig;
use super::dissector::{AduFilter, Dissector};
use super::results::TransactionStore;
use super::transport::{BoxedByteSource, SerialByteSource};
use crate::utils::error::{Result, SnifferError};

/// Pending requests and replies older than this are orphans and dropped
pub const PENDING_EVICT_SECS: i64 = 5;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Requests awaiting a reply and replies awaiting a request, both in
/// insertion order
#[derive(Debug, Default)]
struct PendingQueues {
    tx: Vec<RequestAdu>,
    rx: Vec<Reply>,
}

impl PendingQueues {
    fn push_request(&mut self, request: RequestAdu) {
        self.tx.push(request);
    }

    fn push_reply(&mut self, reply: Reply) {
        self.rx.push(reply);
    }

    /// Drop entries whose ADU timestamp is too old to still be matched
    fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::seconds(PENDING_EVICT_SECS);
        self.tx.retain(|req| req.time > cutoff);
        self.rx.retain(|rep| rep.time() > cutoff);
    }

    /// Match until fixpoint. Each pass takes the first pending request (in
    /// insertion order) and the first reply that answers it: reply no
    /// earlier in time (a request and its reply captured in one chunk share
    /// a timestamp), same address, function code echoed (modulo the error
    /// bit for exceptions).
    fn pair(&mut self) -> Vec<Transaction> {
        let mut matched = Vec::new();
        while let Some((ti, ri)) = self.find_match() {
            let request = self.tx.remove(ti);
            let reply = self.rx.remove(ri);
            matched.push(Transaction { request, reply });
        }
        matched
    }

    fn find_match(&self) -> Option<(usize, usize)> {
        for (ti, request) in self.tx.iter().enumerate() {
            for (ri, reply) in self.rx.iter().enumerate() {
                if request.time <= reply.time()
                    && request.address == reply.address()
                    && reply.answers(request.function_code)
                {
                    return Some((ti, ri));
                }
            }
        }
        None
    }
}

/// Handle to a running sniffer
pub struct Sniffer {
    dissectors: Vec<Dissector>,
    store: TransactionStore,
    token: CancellationToken,
    pairing_task: Option<JoinHandle<()>>,
}

impl Sniffer {
    /// Open the configured serial ports and start sniffing
    pub fn open(config: &SnifferConfig) -> Result<Self> {
        config.validate()?;
        let sources = config
            .ports
            .iter()
            .map(|port| {
                SerialByteSource::open(port).map(|source| Box::new(source) as BoxedByteSource)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::spawn(config, sources)
    }

    /// Start sniffing over externally supplied byte sources, one per
    /// configured port
    pub fn spawn(config: &SnifferConfig, sources: Vec<BoxedByteSource>) -> Result<Self> {
        config.validate()?;
        if sources.len() != config.ports.len() {
            return Err(SnifferError::config(format!(
                "expected {} byte sources, got {}",
                config.ports.len(),
                sources.len()
            )));
        }

        let duplex = config.is_duplex();
        let filters: &[AduFilter] = if duplex {
            &[AduFilter::OnlyRequest, AduFilter::OnlyReply]
        } else {
            &[AduFilter::Any]
        };

        let token = CancellationToken::new();
        let store = TransactionStore::new();
        let mut dissectors = Vec::with_capacity(sources.len());
        let mut adu_rxs = Vec::with_capacity(sources.len());

        for ((port, source), filter) in config.ports.iter().zip(sources).zip(filters) {
            let (mut dissector, adu_rx) = Dissector::spawn(*filter, port.flush_after_secs);
            dissector.attach_source(source, port.debug);
            dissectors.push(dissector);
            adu_rxs.push(adu_rx);
        }

        let rx_line = if duplex { adu_rxs.pop() } else { None };
        let tx_line = adu_rxs.pop().ok_or_else(|| {
            SnifferError::ChannelError("dissector output channel missing".to_string())
        })?;

        let pairing_task = tokio::spawn(pairing_loop(
            tx_line,
            rx_line,
            store.clone(),
            token.clone(),
        ));

        info!(
            "Sniffing {} ({})",
            config.describe(),
            if duplex { "full-duplex" } else { "half-duplex" }
        );

        Ok(Self {
            dissectors,
            store,
            token,
            pairing_task: Some(pairing_task),
        })
    }

    /// Matched transactions so far; empties the store
    pub fn drain_results(&self) -> Vec<Transaction> {
        self.store.drain()
    }

    /// Number of matched transactions currently held
    pub fn result_count(&self) -> usize {
        self.store.count()
    }

    /// Serialize the matched transactions and empty the store. The encoding
    /// is a JSON array and decodes back into the identical list.
    pub fn encode_and_drain(&self) -> Result<Vec<u8>> {
        let transactions = self.store.drain();
        Ok(serde_json::to_vec(&transactions)?)
    }

    /// Cloneable handle to the underlying store, for periodic consumers
    pub fn store(&self) -> TransactionStore {
        self.store.clone()
    }

    /// Stop the pairing task, then the dissectors (which release their
    /// byte sources). Idempotent.
    pub async fn close(&mut self) {
        self.token.cancel();
        if let Some(task) = self.pairing_task.take() {
            match tokio::time::timeout(CLOSE_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Pairing task error: {e}"),
                Err(_) => warn!("Pairing task did not stop in time"),
            }
        }
        for dissector in &mut self.dissectors {
            dissector.close().await;
        }
        info!("Sniffer closed");
    }
}

/// Select over the dissector outputs and the stop signal. `rx_line` is only
/// present in full-duplex mode; with a single line every ADU arrives on
/// `tx_line` and is routed by kind.
async fn pairing_loop(
    mut tx_line: mpsc::Receiver<Adu>,
    mut rx_line: Option<mpsc::Receiver<Adu>>,
    store: TransactionStore,
    token: CancellationToken,
) {
    let mut pending = PendingQueues::default();
    loop {
        let adu = tokio::select! {
            _ = token.cancelled() => break,
            adu = tx_line.recv() => match adu {
                Some(adu) => adu,
                None => break,
            },
            adu = recv_or_pending(&mut rx_line) => match adu {
                Some(adu) => adu,
                None => break,
            },
        };

        match adu {
            Adu::Request(request) => pending.push_request(request),
            Adu::Response(response) => pending.push_reply(Reply::Response(response)),
            Adu::Exception(exception) => pending.push_reply(Reply::Exception(exception)),
        }

        pending.evict(Utc::now());
        for transaction in pending.pair() {
            debug!("Matched {transaction}");
            store.append(transaction);
        }
    }
}

async fn recv_or_pending(rx: &mut Option<mpsc::Receiver<Adu>>) -> Option<Adu> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
