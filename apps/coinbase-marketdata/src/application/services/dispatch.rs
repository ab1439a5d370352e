//! Dispatch Loop
//!
//! Reads frames from the connection and fans per-frame work out to a bounded
//! set of tasks. Each task decodes the frame, routes it by event type,
//! normalizes it and forwards the parsed metrics to the sink.
//!
//! # Ordering
//!
//! Frames are taken off the transport in arrival order. Metrics derived from
//! one frame reach the sink in row order; metrics from different frames may
//! interleave.
//!
//! # Shutdown
//!
//! The stop token is raced against every read and every wait for a dispatch
//! slot. On exit the loop waits for all in-flight frame tasks, so nothing
//! reaches the sink once [`DispatchLoop::run`] has returned.
//!
//! # Backpressure
//!
//! Under [`OverflowPolicy::Block`] a slot is reserved before the next read,
//! so a saturated loop leaves frames on the transport. Under
//! [`OverflowPolicy::DropNewest`] the frame is read first and discarded if
//! no slot is free.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    FrameSource, IngestMetrics, NoopMetrics, ParseError, RecordParser, RecordSink, TransportError,
};
use crate::application::settings::{DispatchSettings, OverflowPolicy};
use crate::domain::normalizer::{
    EventKind, decode_frame, normalize_l2update, normalize_ticker,
};
use crate::domain::records::TypedRecord;
use crate::error::IngestError;

// =============================================================================
// Stats
// =============================================================================

/// Counters shared by the read path and frame tasks.
///
/// Every count is also passed to an [`IngestMetrics`] exporter.
pub struct DispatchStats {
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    records_forwarded: AtomicU64,
    errors_reported: AtomicU64,
    exporter: Arc<dyn IngestMetrics>,
}

impl Default for DispatchStats {
    fn default() -> Self {
        Self::with_exporter(Arc::new(NoopMetrics))
    }
}

impl std::fmt::Debug for DispatchStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchStats")
            .field("frames_received", &self.frames_received())
            .field("frames_dropped", &self.frames_dropped())
            .field("records_forwarded", &self.records_forwarded())
            .field("errors_reported", &self.errors_reported())
            .finish_non_exhaustive()
    }
}

impl DispatchStats {
    /// Counters that also feed `exporter`.
    #[must_use]
    pub fn with_exporter(exporter: Arc<dyn IngestMetrics>) -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            records_forwarded: AtomicU64::new(0),
            errors_reported: AtomicU64::new(0),
            exporter,
        }
    }

    /// Frames read from the transport.
    #[must_use]
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Frames discarded by [`OverflowPolicy::DropNewest`].
    #[must_use]
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    /// Metrics handed to the sink.
    #[must_use]
    pub fn records_forwarded(&self) -> u64 {
        self.records_forwarded.load(Ordering::Relaxed)
    }

    /// Errors passed to the sink's error channel.
    #[must_use]
    pub fn errors_reported(&self) -> u64 {
        self.errors_reported.load(Ordering::Relaxed)
    }

    fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.exporter.frame_received();
    }

    fn frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
        self.exporter.frame_dropped();
    }

    fn record_forwarded(&self, record_type: &'static str) {
        self.records_forwarded.fetch_add(1, Ordering::Relaxed);
        self.exporter.record_forwarded(record_type);
    }

    fn error_reported(&self, kind: &'static str) {
        self.errors_reported.fetch_add(1, Ordering::Relaxed);
        self.exporter.error_reported(kind);
    }
}

// =============================================================================
// Frame Processor
// =============================================================================

/// Per-frame decode, normalize and forward logic.
pub struct FrameProcessor {
    parser: Arc<dyn RecordParser>,
    sink: Arc<dyn RecordSink>,
    stats: Arc<DispatchStats>,
}

impl FrameProcessor {
    /// Create a processor.
    #[must_use]
    pub fn new(
        parser: Arc<dyn RecordParser>,
        sink: Arc<dyn RecordSink>,
        stats: Arc<DispatchStats>,
    ) -> Self {
        Self {
            parser,
            sink,
            stats,
        }
    }

    /// Handle one inbound text frame.
    pub fn process_frame(&self, text: &str) {
        let started = Instant::now();

        let event = match decode_frame(text) {
            Ok(event) => event,
            Err(e) => {
                self.report(e.into());
                return;
            }
        };

        let records: Vec<TypedRecord> = match EventKind::of(&event) {
            EventKind::Ticker => vec![normalize_ticker(&event).into()],
            EventKind::L2Update => {
                let batch = normalize_l2update(&event);
                for rejected in batch.rejected {
                    self.report(rejected.into());
                }
                batch.updates.into_iter().map(Into::into).collect()
            }
            EventKind::Other => {
                tracing::trace!(
                    event_type = ?event.get("type"),
                    "Ignoring unhandled event type"
                );
                return;
            }
        };

        for record in &records {
            self.forward(record);
        }

        self.stats.exporter.frame_processed(started.elapsed());
    }

    fn forward(&self, record: &TypedRecord) {
        let payload = match record.to_json_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                self.report(ParseError::InvalidJson(e.to_string()).into());
                return;
            }
        };

        match self.parser.parse(&payload) {
            Ok(parsed) => {
                for metric in parsed {
                    self.sink.add_record(metric);
                    self.stats.record_forwarded(record.kind());
                }
            }
            Err(e) => self.report(e.into()),
        }
    }

    /// Pass a non-fatal error to the sink's error channel.
    pub fn report(&self, error: IngestError) {
        tracing::debug!(kind = error.kind(), error = %error, "Ingest error");
        self.stats.error_reported(error.kind());
        self.sink.add_error(error);
    }
}

// =============================================================================
// Dispatch Loop
// =============================================================================

/// Why the read path stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadExit {
    /// The stop token was cancelled.
    Stopped,
    /// The transport failed or the peer closed the stream.
    Failed,
}

/// The read path of one connection.
pub struct DispatchLoop {
    source: Box<dyn FrameSource>,
    processor: Arc<FrameProcessor>,
    settings: DispatchSettings,
    stats: Arc<DispatchStats>,
    cancel: CancellationToken,
}

impl DispatchLoop {
    /// Create a dispatch loop over `source`.
    #[must_use]
    pub fn new(
        source: Box<dyn FrameSource>,
        processor: Arc<FrameProcessor>,
        settings: DispatchSettings,
        stats: Arc<DispatchStats>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            processor,
            settings,
            stats,
            cancel,
        }
    }

    /// Run until stopped or the transport fails.
    ///
    /// Returns the frame source so the owner can release the connection, and
    /// the reason the loop ended.
    pub async fn run(mut self) -> (Box<dyn FrameSource>, ReadExit) {
        let permits = Arc::new(Semaphore::new(self.settings.max_in_flight.max(1)));
        let mut in_flight = JoinSet::new();

        let exit = loop {
            while let Some(done) = in_flight.try_join_next() {
                log_task_result(done);
            }
            self.stats.exporter.frames_in_flight(in_flight.len());

            let reserved = match self.settings.overflow {
                OverflowPolicy::Block => tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => break ReadExit::Stopped,
                    permit = Arc::clone(&permits).acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => break ReadExit::Stopped,
                    },
                },
                OverflowPolicy::DropNewest => None,
            };

            let frame = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break ReadExit::Stopped,
                frame = self.source.next_frame() => frame,
            };

            let text = match frame {
                Some(Ok(text)) => text,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Feed read failed");
                    self.processor.report(IngestError::Read(e));
                    break ReadExit::Failed;
                }
                None => {
                    tracing::warn!("Feed stream ended");
                    self.processor.report(IngestError::Read(TransportError::Closed));
                    break ReadExit::Failed;
                }
            };

            self.stats.frame_received();
            tracing::trace!(frame = %text, "recv");

            let permit = if let Some(permit) = reserved {
                permit
            } else if let Ok(permit) = Arc::clone(&permits).try_acquire_owned() {
                permit
            } else {
                self.stats.frame_dropped();
                tracing::warn!(
                    max_in_flight = self.settings.max_in_flight,
                    "Dispatch saturated, dropping frame"
                );
                continue;
            };

            let processor = Arc::clone(&self.processor);
            in_flight.spawn(async move {
                processor.process_frame(&text);
                drop(permit);
            });
        };

        let pending = in_flight.len();
        if pending > 0 {
            tracing::debug!(pending, "Waiting for in-flight frames");
        }
        while let Some(done) = in_flight.join_next().await {
            log_task_result(done);
        }
        self.stats.exporter.frames_in_flight(0);

        (self.source, exit)
    }
}

fn log_task_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result
        && e.is_panic()
    {
        tracing::error!(error = %e, "Frame task panicked");
    }
}

// =============================================================================
// Tests
// =============================================================================
