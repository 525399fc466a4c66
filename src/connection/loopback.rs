//! In-process connection
//!
//! [`LoopbackConnection::new`] delivers everything it sends back to its own
//! inbound queue, which is how a server and its remotes talk when they share
//! one process. [`LoopbackConnection::pair`] cross-wires two endpoints the
//! way a network link would: names travel with each message and are mapped
//! to the receiving side's own ids.

use super::{
    CONNECTION_DROPPED_TYPE, Connection, DeliveryClass, Message, NameRegistry, SYSTEM_SENDER,
};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Message in flight between endpoints, identified by names
struct Envelope {
    sender: String,
    message_type: String,
    timestamp_us: u64,
    payload: Vec<u8>,
}

type Queue = Arc<Mutex<VecDeque<Envelope>>>;

/// Record of one `send` call
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub message: Message,
    pub class: DeliveryClass,
}

/// In-process [`Connection`]
pub struct LoopbackConnection {
    registry: NameRegistry,
    inbound: Queue,
    outbound: Queue,
    sent: Vec<SentMessage>,
    record_sent: bool,
}

impl LoopbackConnection {
    /// Self-delivering connection
    pub fn new() -> Self {
        let queue: Queue = Arc::default();
        Self {
            registry: NameRegistry::new(),
            inbound: queue.clone(),
            outbound: queue,
            sent: Vec::new(),
            record_sent: true,
        }
    }

    /// Two endpoints where each receives what the other sends
    pub fn pair() -> (Self, Self) {
        let a_to_b: Queue = Arc::default();
        let b_to_a: Queue = Arc::default();
        let a = Self {
            registry: NameRegistry::new(),
            inbound: b_to_a.clone(),
            outbound: a_to_b.clone(),
            sent: Vec::new(),
            record_sent: true,
        };
        let b = Self {
            registry: NameRegistry::new(),
            inbound: a_to_b,
            outbound: b_to_a,
            sent: Vec::new(),
            record_sent: true,
        };
        (a, b)
    }

    /// Stop keeping a copy of every sent message
    pub fn without_sent_log(mut self) -> Self {
        self.record_sent = false;
        self
    }

    /// Everything sent so far, oldest first
    pub fn sent(&self) -> &[SentMessage] {
        &self.sent
    }

    /// Sent messages of one type name
    pub fn sent_of_type(&self, name: &str) -> Vec<&SentMessage> {
        match self.registry.find_type(name) {
            Some(id) => self
                .sent
                .iter()
                .filter(|s| s.message.message_type == id)
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn clear_sent(&mut self) {
        self.sent.clear();
    }

    /// Messages waiting to be polled on this endpoint
    pub fn pending(&self) -> usize {
        self.inbound.lock().len()
    }

    /// Queue a connection-dropped notice on this endpoint
    pub fn simulate_drop(&mut self) {
        self.inbound.lock().push_back(Envelope {
            sender: SYSTEM_SENDER.to_string(),
            message_type: CONNECTION_DROPPED_TYPE.to_string(),
            timestamp_us: crate::core::timestamp_us(),
            payload: Vec::new(),
        });
    }
}

impl Default for LoopbackConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection for LoopbackConnection {
    fn register_sender(&mut self, name: &str) -> super::SenderId {
        self.registry.sender(name)
    }

    fn register_message_type(&mut self, name: &str) -> super::MessageTypeId {
        self.registry.message_type(name)
    }

    fn send(
        &mut self,
        sender: super::SenderId,
        message_type: super::MessageTypeId,
        timestamp_us: u64,
        payload: &[u8],
        class: DeliveryClass,
    ) -> Result<()> {
        let sender_name = self
            .registry
            .sender_name(sender)
            .ok_or_else(|| Error::InvalidParameter(format!("unregistered sender {}", sender.0)))?;
        let type_name = self.registry.type_name(message_type).ok_or_else(|| {
            Error::InvalidParameter(format!("unregistered message type {}", message_type.0))
        })?;

        self.outbound.lock().push_back(Envelope {
            sender: sender_name.to_string(),
            message_type: type_name.to_string(),
            timestamp_us,
            payload: payload.to_vec(),
        });

        if self.record_sent {
            self.sent.push(SentMessage {
                message: Message {
                    sender,
                    message_type,
                    timestamp_us,
                    payload: payload.to_vec(),
                },
                class,
            });
        }
        Ok(())
    }

    fn poll_incoming(&mut self) -> Result<Option<Message>> {
        let Some(envelope) = self.inbound.lock().pop_front() else {
            return Ok(None);
        };
        Ok(Some(Message {
            sender: self.registry.sender(&envelope.sender),
            message_type: self.registry.message_type(&envelope.message_type),
            timestamp_us: envelope.timestamp_us,
            payload: envelope.payload,
        }))
    }

    fn registry(&self) -> &NameRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_delivery_and_sent_log() {
        let mut conn = LoopbackConnection::new();
        let s = conn.register_sender("Imager0");
        let t = conn.register_message_type("Imager Region");
        conn.send(s, t, 42, &[9, 8, 7], DeliveryClass::LowLatency)
            .unwrap();

        let msg = conn.poll_incoming().unwrap().unwrap();
        assert_eq!(msg.sender, s);
        assert_eq!(msg.message_type, t);
        assert_eq!(msg.timestamp_us, 42);
        assert_eq!(msg.payload, vec![9, 8, 7]);
        assert!(conn.poll_incoming().unwrap().is_none());

        assert_eq!(conn.sent().len(), 1);
        assert_eq!(conn.sent()[0].class, DeliveryClass::LowLatency);
        assert_eq!(conn.sent_of_type("Imager Region").len(), 1);
    }

    #[test]
    fn test_pair_maps_ids_by_name() {
        let (mut server, mut client) = LoopbackConnection::pair();
        // Different registration order gives different ids on each side
        client.register_sender("other");
        let client_id = client.register_sender("Tracker0");

        let s = server.register_sender("Tracker0");
        let t = server.register_message_type("Tracker Pos_Quat");
        assert_ne!(s, client_id);
        server.send(s, t, 1, &[], DeliveryClass::Reliable).unwrap();

        assert!(server.poll_incoming().unwrap().is_none());
        let msg = client.poll_incoming().unwrap().unwrap();
        assert_eq!(msg.sender, client_id);
        assert_eq!(client.registry().type_name(msg.message_type), Some("Tracker Pos_Quat"));
    }

    #[test]
    fn test_unregistered_ids_rejected() {
        let mut conn = LoopbackConnection::new();
        let err = conn
            .send(
                super::super::SenderId(99),
                super::super::MessageTypeId(0),
                0,
                &[],
                DeliveryClass::Reliable,
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[test]
    fn test_simulate_drop() {
        let mut conn = LoopbackConnection::new();
        conn.simulate_drop();
        let msg = conn.poll_incoming().unwrap().unwrap();
        assert_eq!(
            conn.registry().type_name(msg.message_type),
            Some(CONNECTION_DROPPED_TYPE)
        );
    }
}
