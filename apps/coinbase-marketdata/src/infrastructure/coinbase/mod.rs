//! Coinbase WebSocket Adapters
//!
//! - **websocket**: `Connector` over tokio-tungstenite, split into read and
//!   write halves
//! - **subscription**: Default subscribe request for the feed

pub mod subscription;
pub mod websocket;

pub use subscription::SubscribeRequest;
pub use websocket::{WsConnector, WsFrameSource, WsFrameWriter};
