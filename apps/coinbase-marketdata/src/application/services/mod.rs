//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `FrameProcessor` / `DispatchLoop`: Bounded per-frame decode and forward
//! - `ConnectionManager` / `IngestHandle`: Connect, subscribe, stop
//! - `MarketDataIngest`: Start/stop facade over the above

pub mod dispatch;
pub mod ingest;
pub mod lifecycle;

pub use dispatch::{DispatchLoop, DispatchStats, FrameProcessor, ReadExit};
pub use ingest::MarketDataIngest;
pub use lifecycle::{ConnectionManager, ConnectionState, FeedState, IngestHandle};
