//! Market data ingest facade
//!
//! Wires a [`Connector`], a [`RecordParser`] and a [`RecordSink`] into one
//! start/stop surface. Each call to [`MarketDataIngest::start`] opens a fresh
//! session; the returned [`IngestHandle`] stops it.

use std::sync::Arc;

use super::dispatch::{DispatchStats, FrameProcessor};
use super::lifecycle::{ConnectionManager, FeedState, IngestHandle};
use crate::application::ports::{Connector, IngestMetrics, RecordParser, RecordSink};
use crate::application::settings::{IngestOptions, IngestSettings};
use crate::error::IngestError;

/// Coinbase market data ingest core.
pub struct MarketDataIngest {
    connector: Arc<dyn Connector>,
    parser: Arc<dyn RecordParser>,
    sink: Arc<dyn RecordSink>,
    options: IngestOptions,
    feed_state: Arc<FeedState>,
    stats: Arc<DispatchStats>,
}

impl MarketDataIngest {
    /// Create the ingest core with default options.
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        parser: Arc<dyn RecordParser>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            connector,
            parser,
            sink,
            options: IngestOptions::default(),
            feed_state: Arc::new(FeedState::new()),
            stats: Arc::new(DispatchStats::default()),
        }
    }

    /// Override dispatch and connect options.
    #[must_use]
    pub const fn with_options(mut self, options: IngestOptions) -> Self {
        self.options = options;
        self
    }

    /// Report counters and connection state to `exporter`.
    ///
    /// Replaces the shared [`FeedState`] and [`DispatchStats`], so call this
    /// before handing either to an observer.
    #[must_use]
    pub fn with_metrics(mut self, exporter: Arc<dyn IngestMetrics>) -> Self {
        self.feed_state = Arc::new(FeedState::with_exporter(Arc::clone(&exporter)));
        self.stats = Arc::new(DispatchStats::with_exporter(exporter));
        self
    }

    /// Connection state shared with observers such as the health server.
    #[must_use]
    pub fn feed_state(&self) -> Arc<FeedState> {
        Arc::clone(&self.feed_state)
    }

    /// Running frame and record counters.
    #[must_use]
    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Open the connection, subscribe and begin dispatching frames.
    ///
    /// Returns once the subscription frame has been written and the read
    /// path is running.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Connect`] or [`IngestError::Subscribe`]; both
    /// are fatal and nothing is retried.
    pub async fn start(&self, settings: &IngestSettings) -> Result<IngestHandle, IngestError> {
        let processor = Arc::new(FrameProcessor::new(
            Arc::clone(&self.parser),
            Arc::clone(&self.sink),
            Arc::clone(&self.stats),
        ));

        let manager = ConnectionManager::new(
            Arc::clone(&self.connector),
            self.options.connect_timeout,
            Arc::clone(&self.feed_state),
        );

        manager
            .start(
                settings,
                processor,
                self.options.dispatch,
                Arc::clone(&self.stats),
            )
            .await
    }
}
