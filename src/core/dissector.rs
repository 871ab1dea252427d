//! Dissector actor
//!
//! Owns a timed-byte buffer, consumes chunks from its input channel and
//! emits filter-accepted ADUs on its output channel. A companion reader
//! task pumps a byte source into the input channel so the dissect loop
//! never blocks on I/O.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::adu::Adu;
use super::buffer::DissectorBuffer;
use super::transport::{BoxedByteSource, Chunk};

/// Diagnostic threshold: a healthy line never accumulates this much
pub const MAX_BUFFERED_BYTES: usize = 4096;

const INPUT_CHANNEL_CAPACITY: usize = 64;
const OUTPUT_CHANNEL_CAPACITY: usize = 64;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Which dissected ADUs reach the output channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AduFilter {
    /// Everything (half-duplex capture)
    Any,
    /// Requests only (the tx line of a duplex capture)
    OnlyRequest,
    /// Responses and exceptions only (the rx line of a duplex capture)
    OnlyReply,
}

impl AduFilter {
    pub fn accepts(&self, adu: &Adu) -> bool {
        match self {
            AduFilter::Any => true,
            AduFilter::OnlyRequest => adu.is_request(),
            AduFilter::OnlyReply => adu.is_reply(),
        }
    }
}

/// Handle to a running dissector and its tasks
pub struct Dissector {
    input_tx: mpsc::Sender<Chunk>,
    token: CancellationToken,
    dissect_task: Option<JoinHandle<()>>,
    reader_task: Option<JoinHandle<()>>,
}

impl Dissector {
    /// Start the dissect task. Returns the handle and the ADU output
    /// channel. `flush_after_secs == 0` disables byte eviction.
    pub fn spawn(filter: AduFilter, flush_after_secs: u64) -> (Self, mpsc::Receiver<Adu>) {
        let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        let (adu_tx, adu_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let token = CancellationToken::new();

        let dissect_task = tokio::spawn(dissect_loop(
            input_rx,
            adu_tx,
            filter,
            flush_after_secs,
            token.clone(),
        ));

        (
            Self {
                input_tx,
                token,
                dissect_task: Some(dissect_task),
                reader_task: None,
            },
            adu_rx,
        )
    }

    /// Attach a byte source; its read loop feeds the input channel until
    /// the dissector is closed.
    pub fn attach_source(&mut self, source: BoxedByteSource, debug_chunks: bool) {
        let input_tx = self.input_tx.clone();
        let token = self.token.clone();
        self.reader_task = Some(tokio::spawn(read_loop(
            source,
            input_tx,
            debug_chunks,
            token,
        )));
    }

    /// Input channel for callers that feed chunks directly
    pub fn input(&self) -> mpsc::Sender<Chunk> {
        self.input_tx.clone()
    }

    /// Stop both tasks and wait for them. Idempotent; dropping the reader
    /// task releases the byte source.
    pub async fn close(&mut self) {
        self.token.cancel();
        for task in [self.reader_task.take(), self.dissect_task.take()]
            .into_iter()
            .flatten()
        {
            match tokio::time::timeout(CLOSE_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Dissector task error: {e}"),
                Err(_) => warn!("Dissector task did not stop in time"),
            }
        }
        info!("Dissector closed");
    }
}

/// Scan the buffer from index 0 for the first filter-accepted ADU.
/// Returns the ADU and its starting index; the buffer is not modified.
fn find_adu(buffer: &DissectorBuffer, filter: AduFilter) -> Option<(usize, Adu)> {
    for index in 0..buffer.len() {
        if let Some(adu) = Adu::try_parse(buffer, index) {
            if filter.accepts(&adu) {
                return Some((index, adu));
            }
        }
    }
    None
}

async fn read_loop(
    mut source: BoxedByteSource,
    input_tx: mpsc::Sender<Chunk>,
    debug_chunks: bool,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            result = source.read_chunk() => match result {
                Ok(chunk) => {
                    if debug_chunks {
                        debug!(
                            source = %source.describe(),
                            "Data received: [{}]{}[{:03}]",
                            chunk.time.timestamp_nanos_opt().unwrap_or_default(),
                            hex::encode_upper(&chunk.bytes),
                            chunk.bytes.len()
                        );
                    }
                    if input_tx.send(chunk).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(source = %source.describe(), "Byte source read failed: {e}");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }
}

async fn dissect_loop(
    mut input_rx: mpsc::Receiver<Chunk>,
    adu_tx: mpsc::Sender<Adu>,
    filter: AduFilter,
    flush_after_secs: u64,
    token: CancellationToken,
) {
    let mut buffer = DissectorBuffer::new();
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            chunk = input_rx.recv() => match chunk {
                Some(chunk) => {
                    buffer.extend(chunk.time, &chunk.bytes);
                    if !step(&mut buffer, &adu_tx, filter, flush_after_secs).await {
                        // output side is gone, nothing left to do
                        break;
                    }
                }
                None => break,
            }
        }
    }
}

/// Run dissect rounds until the buffer yields nothing more. After every
/// successful round stale bytes are evicted and an oversized buffer is
/// reported (never silently dropped). Returns false when the output
/// channel has been closed.
async fn step(
    buffer: &mut DissectorBuffer,
    adu_tx: &mpsc::Sender<Adu>,
    filter: AduFilter,
    flush_after_secs: u64,
) -> bool {
    while let Some((index, adu)) = find_adu(buffer, filter) {
        let size = adu.size();
        // The bounded channel paces this loop when the consumer lags
        if adu_tx.send(adu).await.is_err() {
            return false;
        }
        buffer.remove(index, size);

        if flush_after_secs > 0 {
            let cutoff = Utc::now() - chrono::Duration::seconds(flush_after_secs as i64);
            let evicted = buffer.evict_older_than(cutoff);
            if evicted > 0 {
                debug!("Evicted {evicted} stale bytes");
            }
        }
        if buffer.len() > MAX_BUFFERED_BYTES {
            warn!(
                "Dissector buffer too big. size={} content={}",
                buffer.len(),
                buffer.hex_dump()
            );
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::adu::{ExceptionAdu, RequestAdu, ResponseAdu};

    const REQUEST: [u8; 8] = [0x02, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xFE];
    const EXCEPTION: [u8; 5] = [0x02, 0x83, 0x02, 0x30, 0xF1];

    #[test]
    fn test_find_adu_skips_leading_noise() {
        let mut buffer = DissectorBuffer::new();
        buffer.extend(Utc::now(), &[0xFF, 0x00]);
        buffer.extend(Utc::now(), &REQUEST);

        let (index, adu) = find_adu(&buffer, AduFilter::Any).expect("request after noise");
        assert_eq!(index, 2);
        assert!(adu.is_request());
    }

    #[test]
    fn test_find_adu_honors_filter() {
        let mut buffer = DissectorBuffer::new();
        buffer.extend(Utc::now(), &EXCEPTION);
        buffer.extend(Utc::now(), &REQUEST);

        // Reply filter skips the request entirely
        let (index, adu) = find_adu(&buffer, AduFilter::OnlyReply).expect("exception present");
        assert_eq!(index, 0);
        assert!(adu.is_reply());

        let (index, adu) = find_adu(&buffer, AduFilter::OnlyRequest).expect("request present");
        assert_eq!(index, 5);
        assert!(adu.is_request());
    }

    #[test]
    fn test_find_adu_rejected_bytes_stay_put() {
        let mut buffer = DissectorBuffer::new();
        buffer.extend(Utc::now(), &EXCEPTION);

        assert!(find_adu(&buffer, AduFilter::OnlyRequest).is_none());
        assert_eq!(buffer.len(), EXCEPTION.len());
    }

    #[tokio::test]
    async fn test_step_shrinks_buffer_by_recognized_size() {
        let mut buffer = DissectorBuffer::new();
        buffer.extend(Utc::now(), &[0xFF]);
        buffer.extend(Utc::now(), &REQUEST);
        let (adu_tx, mut adu_rx) = mpsc::channel(4);

        assert!(step(&mut buffer, &adu_tx, AduFilter::Any, 0).await);
        // the 8 request bytes are gone, the unrecognized byte stays
        assert_eq!(buffer.len(), 1);
        assert!(adu_rx.recv().await.expect("one ADU emitted").is_request());
    }

    #[tokio::test]
    async fn test_dissect_task_emits_in_stream_order() {
        let (mut dissector, mut adu_rx) = Dissector::spawn(AduFilter::Any, 5);
        let input = dissector.input();

        let t = Utc::now();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&REQUEST);
        bytes.extend_from_slice(&ResponseAdu::new(0x02, 0x03, vec![0x12, 0x34], t).to_bytes());
        input
            .send(Chunk { time: t, bytes })
            .await
            .expect("dissector input open");

        let first = adu_rx.recv().await.expect("first ADU");
        let second = adu_rx.recv().await.expect("second ADU");
        assert_eq!(
            first,
            Adu::Request(RequestAdu::new(0x02, 0x03, [0x00, 0x00, 0x00, 0x0A], t))
        );
        assert_eq!(
            second,
            Adu::Response(ResponseAdu::new(0x02, 0x03, vec![0x12, 0x34], t))
        );

        dissector.close().await;
    }

    #[tokio::test]
    async fn test_dissect_task_survives_garbage_between_frames() {
        let (mut dissector, mut adu_rx) = Dissector::spawn(AduFilter::Any, 0);
        let input = dissector.input();

        let t = Utc::now();
        input
            .send(Chunk {
                time: t,
                bytes: vec![0xDE, 0xAD, 0xBE],
            })
            .await
            .expect("dissector input open");
        input
            .send(Chunk {
                time: t,
                bytes: EXCEPTION.to_vec(),
            })
            .await
            .expect("dissector input open");

        let adu = adu_rx.recv().await.expect("exception ADU");
        assert_eq!(adu, Adu::Exception(ExceptionAdu::new(0x02, 0x83, 0x02, t)));

        dissector.close().await;
    }
}
