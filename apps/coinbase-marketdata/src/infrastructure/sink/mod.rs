//! Channel Sink
//!
//! [`RecordSink`] backed by a bounded tokio mpsc channel. Calls never block:
//! when the channel is full or the receiver is gone the event is dropped and
//! counted.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::application::ports::RecordSink;
use crate::domain::metric::Metric;
use crate::error::IngestError;
use crate::infrastructure::metrics;

/// Default channel capacity.
pub const DEFAULT_SINK_CAPACITY: usize = 4096;

/// Event delivered to the downstream consumer.
#[derive(Debug)]
pub enum SinkEvent {
    /// A parsed metric.
    Metric(Metric),
    /// A non-fatal ingest error.
    Error(IngestError),
}

/// Non-blocking sink over a bounded channel.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<SinkEvent>,
    dropped: AtomicU64,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SinkEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Events dropped because the channel was full or closed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn offer(&self, event: SinkEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_sink_dropped();
                tracing::trace!("Sink full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

impl RecordSink for ChannelSink {
    fn add_record(&self, metric: Metric) {
        self.offer(SinkEvent::Metric(metric));
    }

    fn add_error(&self, error: IngestError) {
        tracing::warn!(kind = error.kind(), error = %error, "Ingest error");
        self.offer(SinkEvent::Error(error));
    }
}
