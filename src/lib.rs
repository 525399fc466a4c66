//! SetuIO - network-transparent device data distribution
//!
//! Devices run inside a server process and publish typed, timestamped
//! messages over a [`connection::Connection`]; remotes decode them without
//! knowing the hardware's native format.
//!
//! ## Modules
//!
//! - [`core`]: the [`Device`](core::Device) trait and the
//!   [`Aggregator`](core::Aggregator) that ticks every device
//! - [`acquisition`]: serial report framing, resync and rate statistics
//! - [`devices`]: Flock of Birds trackers and a synthetic imager
//! - [`tracker`]: pose messages, publisher and remote
//! - [`imager`]: multi-channel 2-D grid streaming, server and remote
//! - [`connection`]: name registry plus loopback and TCP connections
//! - [`transport`]: serial ports and their mock

pub mod acquisition;
pub mod config;
pub mod connection;
pub mod core;
pub mod devices;
pub mod error;
pub mod imager;
pub mod tracker;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
