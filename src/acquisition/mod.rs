//! Serial acquisition building blocks
//!
//! Shared by every serial hardware variant:
//! - [`RingBuffer`]: receive ring with O(1) consume
//! - [`Framer`]: report extraction, first-byte timestamps, resync
//! - [`RateWindow`]: achieved report rate for diagnostics
//! - [`RecoveryLimits`]: bounds that stand in for protocol timeouts

pub mod framing;
pub mod ring_buffer;
pub mod stats;

pub use framing::{FrameFault, FrameFormat, Framer, NextReport, Resync};
pub use ring_buffer::RingBuffer;
pub use stats::RateWindow;

use serde::{Deserialize, Serialize};

/// Bounds on error recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RecoveryLimits {
    /// Bytes one resync attempt may skip
    pub resync_byte_limit: usize,
    /// Consecutive sync failures tolerated before a full reset
    pub max_sync_failures: u32,
    /// Consecutive resets tolerated before the session fails
    pub max_resets: u32,
    /// Polls to wait for a configuration acknowledgement
    pub ack_poll_limit: u32,
}

impl Default for RecoveryLimits {
    fn default() -> Self {
        Self {
            resync_byte_limit: 256,
            max_sync_failures: 10,
            max_resets: 5,
            ack_poll_limit: 50,
        }
    }
}
