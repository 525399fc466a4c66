//! Name to id tables for one connection

use super::{CONNECTION_DROPPED_TYPE, MessageTypeId, PING_TYPE, SYSTEM_SENDER, SenderId};
use std::collections::HashMap;

/// Bidirectional sender and message-type tables
///
/// Ids are dense and assigned in registration order. The system sender and
/// the ping / connection-dropped types always hold ids 0 and 0, 1.
#[derive(Debug, Clone)]
pub struct NameRegistry {
    senders: Vec<String>,
    sender_ids: HashMap<String, SenderId>,
    types: Vec<String>,
    type_ids: HashMap<String, MessageTypeId>,
}

impl NameRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            senders: Vec::new(),
            sender_ids: HashMap::new(),
            types: Vec::new(),
            type_ids: HashMap::new(),
        };
        registry.sender(SYSTEM_SENDER);
        registry.message_type(PING_TYPE);
        registry.message_type(CONNECTION_DROPPED_TYPE);
        registry
    }

    /// Look up or assign a sender id
    pub fn sender(&mut self, name: &str) -> SenderId {
        if let Some(&id) = self.sender_ids.get(name) {
            return id;
        }
        let id = SenderId(self.senders.len() as u32);
        self.senders.push(name.to_string());
        self.sender_ids.insert(name.to_string(), id);
        id
    }

    /// Look up or assign a message type id
    pub fn message_type(&mut self, name: &str) -> MessageTypeId {
        if let Some(&id) = self.type_ids.get(name) {
            return id;
        }
        let id = MessageTypeId(self.types.len() as u32);
        self.types.push(name.to_string());
        self.type_ids.insert(name.to_string(), id);
        id
    }

    pub fn sender_name(&self, id: SenderId) -> Option<&str> {
        self.senders.get(id.0 as usize).map(String::as_str)
    }

    pub fn type_name(&self, id: MessageTypeId) -> Option<&str> {
        self.types.get(id.0 as usize).map(String::as_str)
    }

    /// Lookup without assigning
    pub fn find_sender(&self, name: &str) -> Option<SenderId> {
        self.sender_ids.get(name).copied()
    }

    /// Lookup without assigning
    pub fn find_type(&self, name: &str) -> Option<MessageTypeId> {
        self.type_ids.get(name).copied()
    }

    /// All senders in id order
    pub fn senders(&self) -> impl Iterator<Item = (SenderId, &str)> {
        self.senders
            .iter()
            .enumerate()
            .map(|(i, name)| (SenderId(i as u32), name.as_str()))
    }

    /// All message types in id order
    pub fn types(&self) -> impl Iterator<Item = (MessageTypeId, &str)> {
        self.types
            .iter()
            .enumerate()
            .map(|(i, name)| (MessageTypeId(i as u32), name.as_str()))
    }
}

impl Default for NameRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_is_idempotent() {
        let mut reg = NameRegistry::new();
        let a = reg.sender("Imager0");
        let b = reg.sender("Imager0");
        assert_eq!(a, b);
        assert_eq!(reg.sender_name(a), Some("Imager0"));

        let t = reg.message_type("Imager Region");
        assert_eq!(reg.message_type("Imager Region"), t);
        assert_eq!(reg.find_type("Imager Region"), Some(t));
        assert_eq!(reg.find_type("Imager Description"), None);
    }

    #[test]
    fn test_ids_are_dense() {
        let mut reg = NameRegistry::new();
        let first = reg.sender("a");
        let second = reg.sender("b");
        assert_eq!(second.0, first.0 + 1);
        assert_eq!(reg.senders().count(), 3);
        assert_eq!(reg.types().count(), 2);
    }
}
