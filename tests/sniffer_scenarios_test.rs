//! Sniffer end-to-end scenarios
//!
//! Drives complete captures through scripted byte sources:
//! 1. request -> response on a shared wire
//! 2. request -> exception on a shared wire
//! 3. a corrupted response never produces a transaction
//! 4. an orphan reply never produces a transaction
//! 5. full-duplex pairing across two wires
//! 6. scan finds the one configuration that carries valid traffic
//! plus the encode/decode round trip of the published results.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use sniffsrv::core::adu::{Reply, Transaction};
use sniffsrv::core::config::{FrameFormat, PortConfig, SnifferConfig};
use sniffsrv::core::scan::{scan_with_factory, ScanOptions};
use sniffsrv::core::sniffer::Sniffer;
use sniffsrv::core::transport::{BoxedByteSource, ByteSource, Chunk};
use sniffsrv::utils::error::Result;

/// Plays back a fixed chunk script, then stays silent forever
struct ScriptedSource {
    chunks: VecDeque<Chunk>,
}

impl ScriptedSource {
    fn new(chunks: Vec<Chunk>) -> Self {
        Self {
            chunks: chunks.into(),
        }
    }

    fn boxed(chunks: Vec<Chunk>) -> BoxedByteSource {
        Box::new(Self::new(chunks))
    }
}

#[async_trait]
impl ByteSource for ScriptedSource {
    async fn read_chunk(&mut self) -> Result<Chunk> {
        match self.chunks.pop_front() {
            Some(chunk) => Ok(chunk),
            None => std::future::pending().await,
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

const REQUEST_FC03: [u8; 8] = [0x02, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xFE];
const RESPONSE_FC03: [u8; 25] = [
    0x02, 0x03, 0x14, 0x80, 0x03, 0x80, 0x03, 0x80, 0x01, 0x80, 0x01, 0x80, 0x01, 0x80, 0x03,
    0x00, 0x37, 0x80, 0x03, 0x80, 0x03, 0x80, 0x03, 0xA6, 0xF9,
];
const REQUEST_FC03_REG9: [u8; 8] = [0x02, 0x03, 0x00, 0x09, 0x00, 0x01, 0x54, 0x3B];
const EXCEPTION_FC03: [u8; 5] = [0x02, 0x83, 0x02, 0x30, 0xF1];

fn half_duplex_config() -> SnifferConfig {
    let frame = FrameFormat::parse("8N1").expect("valid frame token");
    SnifferConfig::half_duplex(PortConfig::new("tap0", 9600, frame))
}

fn duplex_config() -> SnifferConfig {
    let frame = FrameFormat::parse("8N1").expect("valid frame token");
    SnifferConfig::full_duplex(
        PortConfig::new("tap-tx", 9600, frame),
        PortConfig::new("tap-rx", 9600, frame),
    )
}

fn chunk(time: DateTime<Utc>, bytes: &[u8]) -> Chunk {
    Chunk {
        time,
        bytes: bytes.to_vec(),
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_request_response_on_shared_wire() {
    let t0 = Utc::now();
    let source = ScriptedSource::boxed(vec![
        chunk(t0, &REQUEST_FC03),
        chunk(t0, &RESPONSE_FC03),
    ]);

    let mut sniffer =
        Sniffer::spawn(&half_duplex_config(), vec![source]).expect("sniffer starts");
    settle().await;

    let results = sniffer.drain_results();
    assert_eq!(results.len(), 1);
    assert_eq!(sniffer.result_count(), 0, "drain empties the store");

    let transaction = &results[0];
    assert_eq!(transaction.request.address, 0x02);
    assert_eq!(transaction.request.function_code, 0x03);
    assert_eq!(transaction.request.data, [0x00, 0x00, 0x00, 0x0A]);
    assert_eq!(transaction.request.time, t0);
    match &transaction.reply {
        Reply::Response(resp) => {
            assert_eq!(resp.address, 0x02);
            assert_eq!(resp.function_code, 0x03);
            assert_eq!(resp.byte_count(), 0x14);
            assert_eq!(resp.data, RESPONSE_FC03[3..23].to_vec());
            assert_eq!(resp.time, t0);
        }
        other => panic!("expected a response reply, got {other:?}"),
    }

    sniffer.close().await;
}

#[tokio::test]
async fn test_request_exception_on_shared_wire() {
    let t0 = Utc::now();
    let source = ScriptedSource::boxed(vec![
        chunk(t0, &REQUEST_FC03_REG9),
        chunk(t0, &EXCEPTION_FC03),
    ]);

    let mut sniffer =
        Sniffer::spawn(&half_duplex_config(), vec![source]).expect("sniffer starts");
    settle().await;

    let results = sniffer.drain_results();
    assert_eq!(results.len(), 1);
    match &results[0].reply {
        Reply::Exception(exc) => {
            assert_eq!(exc.function_code, 0x83);
            assert_eq!(exc.exception_code, 0x02);
            // the error bit masked out matches the request code
            assert_eq!(exc.function_code & 0x7F, results[0].request.function_code);
        }
        other => panic!("expected an exception reply, got {other:?}"),
    }

    sniffer.close().await;
}

#[tokio::test]
async fn test_corrupted_response_is_never_paired() {
    let t0 = Utc::now();
    let mut corrupted = RESPONSE_FC03;
    corrupted[5] ^= 0xFF; // flip one data byte, CRC no longer holds

    let source = ScriptedSource::boxed(vec![
        chunk(t0, &REQUEST_FC03),
        chunk(t0, &corrupted),
    ]);

    let mut sniffer =
        Sniffer::spawn(&half_duplex_config(), vec![source]).expect("sniffer starts");
    settle().await;

    assert!(sniffer.drain_results().is_empty());
    sniffer.close().await;
}

#[tokio::test]
async fn test_orphan_reply_is_never_paired() {
    let t0 = Utc::now();
    let source = ScriptedSource::boxed(vec![chunk(t0, &RESPONSE_FC03)]);

    let mut sniffer =
        Sniffer::spawn(&half_duplex_config(), vec![source]).expect("sniffer starts");
    settle().await;

    assert!(sniffer.drain_results().is_empty());
    sniffer.close().await;
}

#[tokio::test]
async fn test_duplex_pairing_across_two_wires() {
    let t0 = Utc::now();
    let tx_source = ScriptedSource::boxed(vec![chunk(t0, &REQUEST_FC03)]);
    let rx_source = ScriptedSource::boxed(vec![chunk(
        t0 + chrono::Duration::milliseconds(10),
        &RESPONSE_FC03,
    )]);

    let mut sniffer =
        Sniffer::spawn(&duplex_config(), vec![tx_source, rx_source]).expect("sniffer starts");
    settle().await;

    let results = sniffer.drain_results();
    assert_eq!(results.len(), 1);
    assert!(results[0].request.time < results[0].reply.time());

    // one pairing pass consumed both pending entries
    assert!(sniffer.drain_results().is_empty());
    sniffer.close().await;
}

#[tokio::test]
async fn test_scan_finds_the_live_configuration() {
    let base = half_duplex_config();
    let options = ScanOptions {
        baud: Some(9600), // pin one axis to keep the run short
        frame: None,
        window: Duration::from_millis(150),
    };

    let factory = |port: &PortConfig| -> Result<BoxedByteSource> {
        let t0 = Utc::now();
        if port.baud == 9600 && port.frame.to_string() == "8N1" {
            Ok(ScriptedSource::boxed(vec![
                chunk(t0, &REQUEST_FC03),
                chunk(t0, &RESPONSE_FC03),
            ]))
        } else {
            // wrong line settings read as framing garbage that fails CRC
            Ok(ScriptedSource::boxed(vec![chunk(
                t0,
                &[0x7E, 0x19, 0x00, 0xA5, 0x5A, 0xC3, 0x3C, 0x81],
            )]))
        }
    };

    let found = scan_with_factory(&base, &options, &factory)
        .await
        .expect("scan completes")
        .expect("a configuration is found");
    assert_eq!(found.ports[0].baud, 9600);
    assert_eq!(found.ports[0].frame.to_string(), "8N1");
}

#[tokio::test]
async fn test_encode_then_decode_round_trips() {
    let t0 = Utc::now();
    let source = ScriptedSource::boxed(vec![
        chunk(t0, &REQUEST_FC03),
        chunk(t0, &RESPONSE_FC03),
        chunk(t0, &REQUEST_FC03_REG9),
        chunk(t0, &EXCEPTION_FC03),
    ]);

    let mut sniffer =
        Sniffer::spawn(&half_duplex_config(), vec![source]).expect("sniffer starts");
    settle().await;
    assert_eq!(sniffer.result_count(), 2);

    let encoded = sniffer.encode_and_drain().expect("encoding succeeds");
    assert_eq!(sniffer.result_count(), 0);

    let decoded: Vec<Transaction> =
        serde_json::from_slice(&encoded).expect("decoding succeeds");
    assert_eq!(decoded.len(), 2);
    let reencoded = serde_json::to_vec(&decoded).expect("re-encoding succeeds");
    assert_eq!(encoded, reencoded);

    sniffer.close().await;
}
