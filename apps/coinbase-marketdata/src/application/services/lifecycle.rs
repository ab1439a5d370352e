//! Connection Lifecycle Manager
//!
//! Owns the duplex connection for one ingest session: dials it, writes the
//! subscription frame, lends the read half to the dispatch loop and closes
//! the connection exactly once on stop.
//!
//! ```text
//! Unconnected ─► Connected ─► Subscribed ─► Reading ─► Closing ─► Closed
//!                                              │           ▲
//!                                              └► Failed ──┘
//! ```
//!
//! `Failed` means the read path ended on a transport error; the connection
//! is still held until the handle is stopped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::dispatch::{DispatchLoop, DispatchStats, FrameProcessor, ReadExit};
use crate::application::ports::{
    Connector, FrameSource, FrameWriter, IngestMetrics, NoopMetrics, TransportError,
};
use crate::application::settings::{DispatchSettings, IngestSettings};
use crate::error::IngestError;

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of the feed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ConnectionState {
    /// No connection attempted yet.
    #[default]
    Unconnected = 0,
    /// Transport established.
    Connected = 1,
    /// Subscription frame written.
    Subscribed = 2,
    /// Read path running.
    Reading = 3,
    /// Stop requested, tearing down.
    Closing = 4,
    /// Connection released.
    Closed = 5,
    /// Read path ended on a transport error, connection not yet released.
    Failed = 6,
}

impl ConnectionState {
    /// State name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unconnected => "unconnected",
            Self::Connected => "connected",
            Self::Subscribed => "subscribed",
            Self::Reading => "reading",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

/// Observable state of the feed connection.
///
/// Only the lifecycle manager writes to it; anything else (the health
/// endpoint, tests) reads.
pub struct FeedState {
    state: RwLock<ConnectionState>,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    reader_active: AtomicBool,
    exporter: Arc<dyn IngestMetrics>,
}

impl Default for FeedState {
    fn default() -> Self {
        Self::with_exporter(Arc::new(NoopMetrics))
    }
}

impl std::fmt::Debug for FeedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedState")
            .field("state", &self.state())
            .field("last_connected_at", &self.last_connected_at())
            .field("last_error", &self.last_error())
            .finish_non_exhaustive()
    }
}

impl FeedState {
    /// Create state in `Unconnected`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create state in `Unconnected` that reports transitions to `exporter`.
    #[must_use]
    pub fn with_exporter(exporter: Arc<dyn IngestMetrics>) -> Self {
        Self {
            state: RwLock::new(ConnectionState::Unconnected),
            last_connected_at: RwLock::new(None),
            last_error: RwLock::new(None),
            reader_active: AtomicBool::new(false),
            exporter,
        }
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        self.exporter.connection_state(state as u8);
        if state == ConnectionState::Connected {
            *self.last_connected_at.write() = Some(Utc::now());
            *self.last_error.write() = None;
        }
    }

    pub(crate) fn set_error(&self, message: String) {
        *self.last_error.write() = Some(message);
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// When the transport was last established.
    #[must_use]
    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        *self.last_connected_at.read()
    }

    /// Most recent fatal or read-path error.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Whether the read path is currently consuming frames.
    #[must_use]
    pub fn is_reading(&self) -> bool {
        self.reader_active.load(Ordering::SeqCst) && self.state() == ConnectionState::Reading
    }
}

// =============================================================================
// Ingest Handle
// =============================================================================

struct Running {
    reader: JoinHandle<(Box<dyn FrameSource>, ReadExit)>,
    writer: Box<dyn FrameWriter>,
}

/// Handle to a running ingest session.
///
/// Dropping the handle signals the read path to stop but does not wait for
/// it; call [`IngestHandle::stop`] for an orderly shutdown.
pub struct IngestHandle {
    session_id: Uuid,
    cancel: CancellationToken,
    reader_done: CancellationToken,
    closed: CancellationToken,
    running: Mutex<Option<Running>>,
    feed_state: Arc<FeedState>,
}

impl std::fmt::Debug for IngestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestHandle")
            .field("session_id", &self.session_id)
            .field("state", &self.feed_state.state())
            .finish_non_exhaustive()
    }
}

impl IngestHandle {
    /// Session identifier, also recorded on the session's tracing span.
    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.feed_state.state()
    }

    /// Resolves once the read path has exited, for any reason.
    pub async fn read_finished(&self) {
        self.reader_done.cancelled().await;
    }

    /// Stop the session.
    ///
    /// Signals the read path, waits for it and all in-flight frame work to
    /// finish, then closes the connection. Safe to call more than once and
    /// after the read path has already failed; every call returns once the
    /// connection is closed.
    ///
    /// Cancel-safe: the first call hands teardown to its own task, so
    /// dropping a pending `stop` future does not abandon the connection.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let running = self.running.lock().take();
        if let Some(running) = running {
            self.feed_state.set_state(ConnectionState::Closing);
            tracing::info!(session_id = %self.session_id, "Stopping feed");

            let span = tracing::info_span!("feed_teardown", session_id = %self.session_id);
            tokio::spawn(
                teardown(running, Arc::clone(&self.feed_state), self.closed.clone())
                    .instrument(span),
            );
        }

        self.closed.cancelled().await;
    }
}

async fn teardown(running: Running, feed_state: Arc<FeedState>, closed: CancellationToken) {
    let Running { reader, mut writer } = running;

    match reader.await {
        Ok((source, exit)) => {
            tracing::debug!(?exit, "Read path finished");
            drop(source);
        }
        Err(e) => tracing::error!(error = %e, "Read path task failed"),
    }

    if let Err(e) = writer.close().await {
        tracing::debug!(error = %e, "Error closing feed connection");
    }

    feed_state.set_state(ConnectionState::Closed);
    tracing::info!("Feed stopped");
    closed.cancel();
}

impl Drop for IngestHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Connection Manager
// =============================================================================

/// Opens connections and starts their read path.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    feed_state: Arc<FeedState>,
}

impl ConnectionManager {
    /// Create a manager.
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        connect_timeout: Duration,
        feed_state: Arc<FeedState>,
    ) -> Self {
        Self {
            connector,
            connect_timeout,
            feed_state,
        }
    }

    /// Connect, subscribe and start reading.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Connect`] if the transport cannot be
    /// established within the connect timeout, or [`IngestError::Subscribe`]
    /// if the subscription frame cannot be written. Neither is retried.
    pub async fn start(
        &self,
        settings: &IngestSettings,
        processor: Arc<FrameProcessor>,
        dispatch: DispatchSettings,
        stats: Arc<DispatchStats>,
    ) -> Result<IngestHandle, IngestError> {
        let session_id = Uuid::new_v4();
        let span = tracing::info_span!("feed_session", %session_id);

        tracing::info!(
            parent: &span,
            service_address = %settings.service_address,
            "Connecting to feed"
        );
        tracing::info!(
            parent: &span,
            subscription = %settings.on_connect_message,
            "Subscription request"
        );

        let connection = match tokio::time::timeout(
            self.connect_timeout,
            self.connector.connect(&settings.service_address),
        )
        .await
        {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => return Err(self.connect_failed(settings, e)),
            Err(_) => {
                let timeout = TransportError::Timeout(self.connect_timeout);
                return Err(self.connect_failed(settings, timeout));
            }
        };
        self.feed_state.set_state(ConnectionState::Connected);

        let mut writer = connection.writer;
        if let Err(e) = writer.send_text(&settings.on_connect_message).await {
            tracing::error!(parent: &span, error = %e, "Subscription write failed");
            self.feed_state.set_error(e.to_string());
            drop(connection.source);
            if let Err(close_err) = writer.close().await {
                tracing::debug!(parent: &span, error = %close_err, "Error closing feed connection");
            }
            self.feed_state.set_state(ConnectionState::Closed);
            return Err(IngestError::Subscribe(e));
        }
        self.feed_state.set_state(ConnectionState::Subscribed);

        let cancel = CancellationToken::new();
        let reader_done = CancellationToken::new();
        let dispatch_loop = DispatchLoop::new(
            connection.source,
            processor,
            dispatch,
            stats,
            cancel.clone(),
        );

        let feed_state = Arc::clone(&self.feed_state);
        let done = reader_done.clone();
        feed_state.reader_active.store(true, Ordering::SeqCst);
        self.feed_state.set_state(ConnectionState::Reading);

        let reader = tokio::spawn(
            async move {
                let (source, exit) = dispatch_loop.run().await;
                feed_state.reader_active.store(false, Ordering::SeqCst);
                if exit == ReadExit::Failed {
                    feed_state.set_error("read path terminated".to_string());
                    feed_state.set_state(ConnectionState::Failed);
                }
                done.cancel();
                (source, exit)
            }
            .instrument(span),
        );

        Ok(IngestHandle {
            session_id,
            cancel,
            reader_done,
            closed: CancellationToken::new(),
            running: Mutex::new(Some(Running { reader, writer })),
            feed_state: Arc::clone(&self.feed_state),
        })
    }

    fn connect_failed(&self, settings: &IngestSettings, source: TransportError) -> IngestError {
        tracing::error!(
            service_address = %settings.service_address,
            error = %source,
            "Feed connect failed"
        );
        self.feed_state.set_error(source.to_string());
        IngestError::Connect {
            address: settings.service_address.clone(),
            source,
        }
    }
}
