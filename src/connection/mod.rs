//! Message registry and connection layer
//!
//! A [`Connection`] maps sender and message-type names to small per-connection
//! ids and moves `(sender, type, timestamp, payload)` tuples between
//! processes. Protocol endpoints never see sockets; they hold a
//! [`SharedConnection`] and implement [`MessageSink`] to receive traffic.
//!
//! Two names are registered on every connection before anything else:
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PING_TYPE`] | keep-alive; servers resend their state when pinged |
//! | [`CONNECTION_DROPPED_TYPE`] | a peer went away; remotes forget cached state |

mod loopback;
mod registry;
mod tcp;

pub use loopback::{LoopbackConnection, SentMessage};
pub use registry::NameRegistry;
pub use tcp::TcpConnection;

use crate::error::Result;
use parking_lot::Mutex;
use std::sync::Arc;

/// Keep-alive / state request message type
pub const PING_TYPE: &str = "setu ping";

/// Emitted locally when a peer disconnects
pub const CONNECTION_DROPPED_TYPE: &str = "setu connection dropped";

/// Sender used for messages the connection itself generates
pub const SYSTEM_SENDER: &str = "setu";

/// Per-connection sender identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SenderId(pub u32);

/// Per-connection message type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageTypeId(pub u32);

/// How hard the connection should try to deliver a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryClass {
    /// Ordered and never dropped
    #[default]
    Reliable,
    /// May be dropped instead of stalling behind older traffic
    LowLatency,
}

/// A decoded message as delivered to sinks
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub sender: SenderId,
    pub message_type: MessageTypeId,
    pub timestamp_us: u64,
    pub payload: Vec<u8>,
}

/// Connection shared between every endpoint of one process
pub type SharedConnection = Arc<Mutex<dyn Connection>>;

/// The registry/transport collaborator consumed by protocol endpoints
pub trait Connection: Send {
    /// Id for a sender name; the same name always yields the same id
    fn register_sender(&mut self, name: &str) -> SenderId;

    /// Id for a message type name; the same name always yields the same id
    fn register_message_type(&mut self, name: &str) -> MessageTypeId;

    /// Queue one message for delivery
    fn send(
        &mut self,
        sender: SenderId,
        message_type: MessageTypeId,
        timestamp_us: u64,
        payload: &[u8],
        class: DeliveryClass,
    ) -> Result<()>;

    /// Next inbound message, without blocking
    fn poll_incoming(&mut self) -> Result<Option<Message>>;

    /// Name registry of this connection
    fn registry(&self) -> &NameRegistry;
}

/// Receives inbound messages
///
/// Sinks are handed to [`dispatch_pending`] by the owner of the tick; there
/// is no process-wide handler table.
pub trait MessageSink {
    fn on_message(&mut self, msg: &Message) -> Result<()>;
}

/// Upper bound on messages delivered by one [`dispatch_pending`] call
///
/// Sinks that answer a message by sending another (a ping answered with a
/// description, on a self-delivering connection) must not keep the loop
/// alive forever.
pub const MAX_DISPATCH_PER_CALL: usize = 4096;

/// Drain inbound messages into `sinks`
///
/// The connection lock is released before any sink runs, so sinks may send.
/// A sink error is logged and does not stop delivery to the other sinks.
/// Returns the number of messages drained.
pub fn dispatch_pending(
    conn: &SharedConnection,
    sinks: &mut [&mut dyn MessageSink],
) -> Result<usize> {
    let mut delivered = 0;
    while delivered < MAX_DISPATCH_PER_CALL {
        let Some(msg) = conn.lock().poll_incoming()? else {
            break;
        };
        delivered += 1;
        for sink in sinks.iter_mut() {
            if let Err(e) = sink.on_message(&msg) {
                log::warn!("Message sink rejected message: {}", e);
            }
        }
    }
    Ok(delivered)
}
