//! # devlink-client
//!
//! Client library for devlink.
//!
//! This crate provides:
//! - UDP datagram transport with fixed or learned peer
//! - Command channel with per-message ids and id-correlated synchronous calls
//! - Handler dispatch for the always-listening receive path
//! - High-level device agent for property and system commands

pub mod agent;
pub mod channel;
pub mod dispatch;
pub mod error;
pub mod transport;

pub use agent::DeviceAgent;
pub use channel::{ChannelConfig, CommandChannel, DEFAULT_CALL_TIMEOUT};
pub use dispatch::{Dispatcher, Handler};
pub use error::ClientError;
pub use transport::{Datagram, DatagramTransport, Target, TransportConfig};
