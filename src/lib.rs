//! Selkies streaming client
//!
//! Headless client for Selkies-style remote interaction streams: WebSocket
//! signalling, WebRTC media transport, a data-channel input protocol, and
//! per-second connection statistics.

pub mod config;
pub mod error;
pub mod events;
pub mod input;
pub mod metadata;
pub mod protocol;
pub mod session;
pub mod signalling;
pub mod sink;
pub mod stats;
pub mod supervisor;

pub use error::{ClientError, Result};
