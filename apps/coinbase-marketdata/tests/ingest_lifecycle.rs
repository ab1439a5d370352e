//! Ingest Lifecycle Integration Tests
//!
//! Drives the ingest facade over an in-memory connection: subscription,
//! forwarding, fatal start errors, read-path failure and stop semantics.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use coinbase_marketdata::{
    Closer, Connection, ConnectionState, Connector, DispatchSettings, FieldValue, FrameSource,
    FrameWriter, IngestError, IngestMetrics, IngestOptions, IngestSettings, JsonMetricParser,
    MarketDataIngest, Metric, OverflowPolicy, ParseError, RecordParser, RecordSink,
    TransportError,
};

const SUBSCRIBE: &str =
    r#"{"type":"subscribe","product_ids":["ETH-USD"],"channels":["level2","heartbeat","ticker"]}"#;

const TICKER: &str = r#"{"type":"ticker","sequence":10,"product_id":"ETH-USD","price":"4388.01","open_24h":"4300","volume_24h":"10","low_24h":"4200","high_24h":"4400","volume_30d":"100","best_bid":"4388","best_ask":"4388.01","side":"buy","time":"2017-09-02T17:05:49.250000Z","trade_id":3,"last_size":"0.03"}"#;

const L2_UPDATE: &str = r#"{"type":"l2update","product_id":"ETH-USD","time":"2017-09-02T17:05:49.250000Z","changes":[["sell","731.99","1.24025886"],["buy","730.00","2"]]}"#;

// =============================================================================
// In-memory transport
// =============================================================================

type FrameTx = mpsc::UnboundedSender<Result<String, TransportError>>;
type FrameRx = mpsc::UnboundedReceiver<Result<String, TransportError>>;

#[derive(Default)]
struct Wire {
    sent: Mutex<Vec<String>>,
    closes: AtomicUsize,
}

struct ChannelSource(FrameRx);

#[async_trait]
impl FrameSource for ChannelSource {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        self.0.recv().await
    }
}

struct RecordingWriter {
    wire: Arc<Wire>,
    fail_send: bool,
}

#[async_trait]
impl FrameWriter for RecordingWriter {
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        if self.fail_send {
            return Err(TransportError::WebSocket("broken pipe".to_string()));
        }
        self.wire.sent.lock().push(text.to_string());
        Ok(())
    }
}

#[async_trait]
impl Closer for RecordingWriter {
    async fn close(&mut self) -> Result<(), TransportError> {
        self.wire.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Behavior {
    Accept,
    Refuse,
    Hang,
    FailSubscribe,
}

struct TestConnector {
    behavior: Behavior,
    frames: Mutex<Option<FrameRx>>,
    wire: Arc<Wire>,
    addresses: Mutex<Vec<String>>,
}

impl TestConnector {
    fn new(behavior: Behavior) -> (Arc<Self>, FrameTx) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            behavior,
            frames: Mutex::new(Some(rx)),
            wire: Arc::new(Wire::default()),
            addresses: Mutex::new(Vec::new()),
        });
        (connector, tx)
    }
}

#[async_trait]
impl Connector for TestConnector {
    async fn connect(&self, address: &str) -> Result<Connection, TransportError> {
        self.addresses.lock().push(address.to_string());
        match self.behavior {
            Behavior::Refuse => Err(TransportError::WebSocket("connection refused".to_string())),
            Behavior::Hang => std::future::pending().await,
            Behavior::Accept | Behavior::FailSubscribe => {
                let frames = self
                    .frames
                    .lock()
                    .take()
                    .ok_or_else(|| TransportError::WebSocket("already connected".to_string()))?;
                Ok(Connection {
                    source: Box::new(ChannelSource(frames)),
                    writer: Box::new(RecordingWriter {
                        wire: Arc::clone(&self.wire),
                        fail_send: matches!(self.behavior, Behavior::FailSubscribe),
                    }),
                })
            }
        }
    }
}

// =============================================================================
// Recording sink
// =============================================================================

#[derive(Default)]
struct RecordingSink {
    records: Mutex<Vec<Metric>>,
    errors: Mutex<Vec<IngestError>>,
}

impl RecordingSink {
    fn record_count(&self) -> usize {
        self.records.lock().len()
    }

    fn error_count(&self) -> usize {
        self.errors.lock().len()
    }
}

impl RecordSink for RecordingSink {
    fn add_record(&self, metric: Metric) {
        self.records.lock().push(metric);
    }

    fn add_error(&self, error: IngestError) {
        self.errors.lock().push(error);
    }
}

// =============================================================================
// Gated parser
// =============================================================================

/// Parses with [`JsonMetricParser`] once released, announcing each call.
struct GatedParser {
    inner: JsonMetricParser,
    entered: Mutex<std_mpsc::Sender<()>>,
    release: Mutex<std_mpsc::Receiver<()>>,
}

impl GatedParser {
    fn new() -> (Self, std_mpsc::Receiver<()>, std_mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = std_mpsc::channel();
        let (release_tx, release_rx) = std_mpsc::channel();
        let parser = Self {
            inner: JsonMetricParser::default(),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        };
        (parser, entered_rx, release_tx)
    }
}

impl RecordParser for GatedParser {
    fn parse(&self, payload: &[u8]) -> Result<Vec<Metric>, ParseError> {
        let _ = self.entered.lock().send(());
        // Also returns once the release sender is dropped.
        let _ = self.release.lock().recv();
        self.inner.parse(payload)
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn settings() -> IngestSettings {
    IngestSettings::new("wss://ws-feed.example.test", SUBSCRIBE)
}

fn ingest(connector: Arc<TestConnector>, sink: Arc<RecordingSink>) -> MarketDataIngest {
    MarketDataIngest::new(connector, Arc::new(JsonMetricParser::default()), sink)
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn start_writes_subscription_verbatim() {
    let (connector, _frames) = TestConnector::new(Behavior::Accept);
    let sink = Arc::new(RecordingSink::default());
    let ingest = ingest(Arc::clone(&connector), sink);

    let handle = ingest.start(&settings()).await.unwrap();

    assert_eq!(handle.state(), ConnectionState::Reading);
    assert!(ingest.feed_state().is_reading());
    assert_eq!(
        connector.addresses.lock().as_slice(),
        ["wss://ws-feed.example.test"]
    );
    assert_eq!(connector.wire.sent.lock().as_slice(), [SUBSCRIBE]);

    handle.stop().await;
}

#[tokio::test]
async fn ticker_frame_reaches_sink() {
    let (connector, frames) = TestConnector::new(Behavior::Accept);
    let sink = Arc::new(RecordingSink::default());
    let ingest = ingest(connector, Arc::clone(&sink));
    let handle = ingest.start(&settings()).await.unwrap();

    frames.send(Ok(TICKER.to_string())).unwrap();
    wait_until("ticker metric", || sink.record_count() == 1).await;
    handle.stop().await;

    let records = sink.records.lock();
    let metric = &records[0];
    assert_eq!(metric.name, "ticker");
    assert_eq!(metric.tag("product_id"), Some("ETH-USD"));
    assert_eq!(metric.tag("side"), Some("buy"));
    assert_eq!(metric.field("price"), Some(&FieldValue::Float(4388.01)));
    assert_eq!(metric.field("sequence_id"), Some(&FieldValue::Float(10.0)));
    assert_eq!(sink.error_count(), 0);
}

#[tokio::test]
async fn every_l2update_row_is_forwarded_in_order() {
    let (connector, frames) = TestConnector::new(Behavior::Accept);
    let sink = Arc::new(RecordingSink::default());
    let ingest = ingest(connector, Arc::clone(&sink));
    let handle = ingest.start(&settings()).await.unwrap();

    frames.send(Ok(L2_UPDATE.to_string())).unwrap();
    wait_until("l2update metrics", || sink.record_count() == 2).await;
    handle.stop().await;

    let records = sink.records.lock();
    let sides: Vec<_> = records.iter().map(|m| m.tag("side")).collect();
    assert_eq!(sides, [Some("sell"), Some("buy")]);
    assert_eq!(records[0].field("price"), Some(&FieldValue::Float(731.99)));
    assert_eq!(records[0].field("qty"), Some(&FieldValue::Float(1.240_258_86)));
    assert!(records.iter().all(|m| m.tag("product_id") == Some("ETH-USD")));
}

#[tokio::test]
async fn invalid_frame_reported_and_next_frame_processed() {
    let (connector, frames) = TestConnector::new(Behavior::Accept);
    let sink = Arc::new(RecordingSink::default());
    let ingest = ingest(connector, Arc::clone(&sink));
    let handle = ingest.start(&settings()).await.unwrap();

    frames.send(Ok("{not json".to_string())).unwrap();
    frames
        .send(Ok(r#"{"type":"heartbeat","sequence":1}"#.to_string()))
        .unwrap();
    frames.send(Ok(TICKER.to_string())).unwrap();
    wait_until("ticker metric", || sink.record_count() == 1).await;
    handle.stop().await;

    let errors = sink.errors.lock();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], IngestError::Decode(_)));
}

#[tokio::test]
async fn connect_failure_is_fatal() {
    let (connector, _frames) = TestConnector::new(Behavior::Refuse);
    let sink = Arc::new(RecordingSink::default());
    let ingest = ingest(Arc::clone(&connector), Arc::clone(&sink));

    let err = ingest.start(&settings()).await.unwrap_err();

    assert!(err.is_fatal());
    match err {
        IngestError::Connect { address, source } => {
            assert_eq!(address, "wss://ws-feed.example.test");
            assert!(matches!(source, TransportError::WebSocket(_)));
        }
        other => panic!("expected connect error, got {other:?}"),
    }
    assert!(connector.wire.sent.lock().is_empty());
    assert_eq!(ingest.feed_state().state(), ConnectionState::Unconnected);
    assert!(ingest.feed_state().last_error().is_some());
    assert_eq!(sink.error_count(), 0);
}

#[tokio::test]
async fn connect_timeout_is_fatal() {
    let (connector, _frames) = TestConnector::new(Behavior::Hang);
    let ingest = ingest(connector, Arc::new(RecordingSink::default())).with_options(
        IngestOptions {
            connect_timeout: Duration::from_millis(50),
            ..IngestOptions::default()
        },
    );

    let err = ingest.start(&settings()).await.unwrap_err();

    assert!(matches!(
        err,
        IngestError::Connect {
            source: TransportError::Timeout(_),
            ..
        }
    ));
}

#[tokio::test]
async fn subscribe_failure_closes_connection() {
    let (connector, _frames) = TestConnector::new(Behavior::FailSubscribe);
    let ingest = ingest(Arc::clone(&connector), Arc::new(RecordingSink::default()));

    let err = ingest.start(&settings()).await.unwrap_err();

    assert!(matches!(err, IngestError::Subscribe(_)));
    assert!(err.is_fatal());
    assert_eq!(connector.wire.closes.load(Ordering::SeqCst), 1);
    assert_eq!(ingest.feed_state().state(), ConnectionState::Closed);
}

#[tokio::test]
async fn stop_twice_closes_once() {
    let (connector, _frames) = TestConnector::new(Behavior::Accept);
    let ingest = ingest(Arc::clone(&connector), Arc::new(RecordingSink::default()));
    let handle = ingest.start(&settings()).await.unwrap();

    handle.stop().await;
    handle.stop().await;

    assert_eq!(connector.wire.closes.load(Ordering::SeqCst), 1);
    assert_eq!(handle.state(), ConnectionState::Closed);
    assert!(!ingest.feed_state().is_reading());
}

#[tokio::test]
async fn concurrent_stops_do_not_deadlock() {
    let (connector, _frames) = TestConnector::new(Behavior::Accept);
    let ingest = ingest(Arc::clone(&connector), Arc::new(RecordingSink::default()));
    let handle = ingest.start(&settings()).await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), async {
        tokio::join!(handle.stop(), handle.stop());
    })
    .await
    .expect("stop deadlocked");

    assert_eq!(connector.wire.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn abandoned_stop_still_closes_connection() {
    let (connector, _frames) = TestConnector::new(Behavior::Accept);
    let ingest = ingest(Arc::clone(&connector), Arc::new(RecordingSink::default()));
    let handle = ingest.start(&settings()).await.unwrap();

    // Polled once, then dropped mid-teardown.
    assert!(handle.stop().now_or_never().is_none());
    handle.stop().await;

    assert_eq!(connector.wire.closes.load(Ordering::SeqCst), 1);
    assert_eq!(handle.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn stop_under_timeout_still_closes_connection() {
    let (connector, _frames) = TestConnector::new(Behavior::Accept);
    let ingest = ingest(Arc::clone(&connector), Arc::new(RecordingSink::default()));
    let handle = ingest.start(&settings()).await.unwrap();

    let _ = tokio::time::timeout(Duration::ZERO, handle.stop()).await;
    wait_until("connection close", || {
        connector.wire.closes.load(Ordering::SeqCst) == 1
    })
    .await;

    handle.stop().await;
    assert_eq!(connector.wire.closes.load(Ordering::SeqCst), 1);
    assert_eq!(ingest.feed_state().state(), ConnectionState::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_waits_for_in_flight_frame_work() {
    let (connector, frames) = TestConnector::new(Behavior::Accept);
    let sink = Arc::new(RecordingSink::default());
    let (parser, entered, release) = GatedParser::new();
    let ingest = MarketDataIngest::new(
        Arc::clone(&connector) as Arc<dyn Connector>,
        Arc::new(parser),
        Arc::clone(&sink) as Arc<dyn RecordSink>,
    );
    let handle = Arc::new(ingest.start(&settings()).await.unwrap());

    frames.send(Ok(TICKER.to_string())).unwrap();
    tokio::task::spawn_blocking(move || entered.recv())
        .await
        .unwrap()
        .expect("frame never reached the parser");

    let stopping = tokio::spawn({
        let handle = Arc::clone(&handle);
        async move { handle.stop().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(
        !stopping.is_finished(),
        "stop returned while a frame was still being processed"
    );
    assert_eq!(sink.record_count(), 0);
    assert_eq!(connector.wire.closes.load(Ordering::SeqCst), 0);

    release.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(2), stopping)
        .await
        .expect("stop did not finish after the frame completed")
        .unwrap();

    assert_eq!(sink.record_count(), 1);
    assert_eq!(connector.wire.closes.load(Ordering::SeqCst), 1);
    assert_eq!(handle.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn nothing_reaches_sink_after_stop() {
    let (connector, frames) = TestConnector::new(Behavior::Accept);
    let sink = Arc::new(RecordingSink::default());
    let ingest = ingest(connector, Arc::clone(&sink)).with_options(IngestOptions {
        dispatch: DispatchSettings {
            max_in_flight: 4,
            overflow: OverflowPolicy::Block,
        },
        ..IngestOptions::default()
    });
    let handle = ingest.start(&settings()).await.unwrap();

    for _ in 0..20 {
        frames.send(Ok(TICKER.to_string())).unwrap();
    }
    handle.stop().await;

    let records = sink.record_count();
    let errors = sink.error_count();

    // The read half is gone; later frames have nowhere to go.
    let _ = frames.send(Ok(TICKER.to_string()));
    let _ = frames.send(Ok("garbage".to_string()));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(sink.record_count(), records);
    assert_eq!(sink.error_count(), errors);
    assert_eq!(errors, 0);
}

#[tokio::test]
async fn read_error_ends_read_path_once() {
    let (connector, frames) = TestConnector::new(Behavior::Accept);
    let sink = Arc::new(RecordingSink::default());
    let ingest = ingest(Arc::clone(&connector), Arc::clone(&sink));
    let handle = ingest.start(&settings()).await.unwrap();

    frames
        .send(Err(TransportError::WebSocket("reset by peer".to_string())))
        .unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle.read_finished())
        .await
        .expect("read path did not finish");

    let _ = frames.send(Ok(TICKER.to_string()));
    assert!(!ingest.feed_state().is_reading());
    assert_eq!(handle.state(), ConnectionState::Failed);

    handle.stop().await;
    handle.stop().await;
    assert_eq!(handle.state(), ConnectionState::Closed);

    let errors = sink.errors.lock();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors[0],
        IngestError::Read(TransportError::WebSocket(_))
    ));
    assert_eq!(sink.record_count(), 0);
    assert_eq!(connector.wire.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn peer_close_reported_as_read_error() {
    let (connector, frames) = TestConnector::new(Behavior::Accept);
    let sink = Arc::new(RecordingSink::default());
    let ingest = ingest(connector, Arc::clone(&sink));
    let handle = ingest.start(&settings()).await.unwrap();

    drop(frames);
    tokio::time::timeout(Duration::from_secs(2), handle.read_finished())
        .await
        .expect("read path did not finish");
    handle.stop().await;

    let errors = sink.errors.lock();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], IngestError::Read(TransportError::Closed)));
    assert!(ingest.feed_state().last_error().is_some());
}

#[tokio::test]
async fn stats_count_frames_and_records() {
    let (connector, frames) = TestConnector::new(Behavior::Accept);
    let sink = Arc::new(RecordingSink::default());
    let ingest = ingest(connector, Arc::clone(&sink));
    let handle = ingest.start(&settings()).await.unwrap();

    frames.send(Ok(TICKER.to_string())).unwrap();
    frames.send(Ok(L2_UPDATE.to_string())).unwrap();
    wait_until("three metrics", || sink.record_count() == 3).await;
    handle.stop().await;

    let stats = ingest.stats();
    assert_eq!(stats.frames_received(), 2);
    assert_eq!(stats.records_forwarded(), 3);
    assert_eq!(stats.frames_dropped(), 0);
}

#[tokio::test]
async fn each_start_dials_a_new_connection() {
    let (connector, _frames) = TestConnector::new(Behavior::Accept);
    let ingest = ingest(Arc::clone(&connector), Arc::new(RecordingSink::default()));

    let first = tokio_test::assert_ok!(ingest.start(&settings()).await);
    first.stop().await;

    // The in-memory connector only hands out one connection.
    let err = tokio_test::assert_err!(ingest.start(&settings()).await);
    assert!(matches!(err, IngestError::Connect { .. }));
    assert_eq!(connector.addresses.lock().len(), 2);
}

#[derive(Default)]
struct StateLog(Mutex<Vec<u8>>);

impl IngestMetrics for StateLog {
    fn connection_state(&self, code: u8) {
        self.0.lock().push(code);
    }
}

#[tokio::test]
async fn metrics_exporter_sees_session_lifecycle() {
    let (connector, frames) = TestConnector::new(Behavior::Accept);
    let log = Arc::new(StateLog::default());
    let ingest = ingest(connector, Arc::new(RecordingSink::default()))
        .with_metrics(Arc::clone(&log) as Arc<dyn IngestMetrics>);
    let handle = ingest.start(&settings()).await.unwrap();

    drop(frames);
    tokio::time::timeout(Duration::from_secs(2), handle.read_finished())
        .await
        .expect("read path did not finish");
    handle.stop().await;

    let codes: Vec<u8> = log.0.lock().clone();
    let expected = [
        ConnectionState::Connected,
        ConnectionState::Subscribed,
        ConnectionState::Reading,
        ConnectionState::Failed,
        ConnectionState::Closing,
        ConnectionState::Closed,
    ]
    .map(|state| state as u8);
    assert_eq!(codes, expected);
}
