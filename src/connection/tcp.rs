//! TCP connection
//!
//! # Framing
//!
//! ```text
//! ┌──────────────────┬──────────────────────────┐
//! │ Length (4 bytes) │ Body                     │
//! │ Big-endian u32   │ postcard-encoded [Frame] │
//! └──────────────────┴──────────────────────────┘
//! ```
//!
//! Every id is declared before its first use, so each side keeps a
//! remote-id to local-id table per peer and never needs both sides to
//! register names in the same order.
//!
//! ## Writes
//!
//! Sockets stay non-blocking. Each peer queues what the kernel did not
//! take and the queue is flushed on every send and every incoming poll.
//! A peer more than [`MAX_PENDING_WRITE`] bytes behind is dropped.
//!
//! ## Error Handling
//!
//! - **Oversized frame** (> 1 MiB): peer closed
//! - **Undecodable frame or undeclared id**: frame logged and discarded
//! - **Peer gone**: a local `setu connection dropped` message is queued
//!
//! Both delivery classes share the stream; `LowLatency` is only a hint here.

use super::{
    CONNECTION_DROPPED_TYPE, Connection, DeliveryClass, Message, MessageTypeId, NameRegistry,
    SYSTEM_SENDER, SenderId,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

/// Frames above this size close the peer
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Unsent bytes a peer may accumulate before it is dropped
pub const MAX_PENDING_WRITE: usize = 4 * MAX_FRAME_SIZE;

/// Worst-case postcard bytes around a message payload
const MESSAGE_ENVELOPE: usize = 1 + 5 + 5 + 10 + 5;

/// One unit on the stream
///
/// Byte slices are written by postcard as a length followed by the raw
/// bytes, so they decode in place from the read buffer.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
enum Frame<'a> {
    DeclareSender {
        id: u32,
        name: &'a str,
    },
    DeclareType {
        id: u32,
        name: &'a str,
    },
    Message {
        sender: u32,
        message_type: u32,
        timestamp_us: u64,
        payload: &'a [u8],
    },
}

/// Append `[length][body]` for one frame
fn encode_frame(frame: &Frame<'_>, out: &mut Vec<u8>) -> Result<()> {
    let body = postcard::to_allocvec(frame).map_err(|e| Error::Serialization(e.to_string()))?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(Error::Capacity {
            what: "frame bytes",
            requested: body.len(),
            limit: MAX_FRAME_SIZE,
        });
    }
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    Ok(())
}

/// A name this side learned from a peer
enum Learned {
    Sender(SenderId, String),
    Type(MessageTypeId, String),
}

struct Peer {
    addr: SocketAddr,
    stream: TcpStream,
    read_buffer: Vec<u8>,
    write_buffer: Vec<u8>,
    senders: HashMap<u32, SenderId>,
    types: HashMap<u32, MessageTypeId>,
    closed: bool,
}

impl Peer {
    fn new(stream: TcpStream, addr: SocketAddr) -> Result<Self> {
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        Ok(Self {
            addr,
            stream,
            read_buffer: Vec::with_capacity(4096),
            write_buffer: Vec::new(),
            senders: HashMap::new(),
            types: HashMap::new(),
            closed: false,
        })
    }

    /// Queue encoded frames and write what the socket accepts
    fn enqueue(&mut self, frames: &[u8]) {
        if self.closed {
            return;
        }
        if self.write_buffer.len() + frames.len() > MAX_PENDING_WRITE {
            log::warn!(
                "{} is {} bytes behind, closing",
                self.addr,
                self.write_buffer.len()
            );
            self.closed = true;
            return;
        }
        self.write_buffer.extend_from_slice(frames);
        self.flush();
    }

    fn flush(&mut self) {
        let mut written = 0;
        while !self.closed && written < self.write_buffer.len() {
            match self.stream.write(&self.write_buffer[written..]) {
                Ok(0) => self.closed = true,
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::debug!("Write to {} failed: {}", self.addr, e);
                    self.closed = true;
                }
            }
        }
        self.write_buffer.drain(..written);
    }

    /// Pull whatever the socket has, marking the peer closed once it is gone
    fn fill(&mut self) {
        let mut chunk = [0u8; 4096];
        while !self.closed {
            match self.stream.read(&mut chunk) {
                Ok(0) => self.closed = true,
                Ok(n) => self.read_buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::debug!("Read from {} failed: {}", self.addr, e);
                    self.closed = true;
                }
            }
        }
    }

    /// Parse complete frames out of the read buffer
    ///
    /// Messages go to `inbound`; names this side had never seen go to
    /// `learned` so they can be introduced to every peer afterwards.
    fn read_frames(
        &mut self,
        registry: &mut NameRegistry,
        inbound: &mut VecDeque<Message>,
        learned: &mut Vec<Learned>,
    ) {
        let mut consumed = 0;
        loop {
            let buffer = &self.read_buffer[consumed..];
            let Some(prefix) = buffer.first_chunk::<4>() else {
                break;
            };
            let len = u32::from_be_bytes(*prefix) as usize;
            if len == 0 || len > MAX_FRAME_SIZE {
                log::warn!("Frame of {} bytes from {}, closing", len, self.addr);
                self.closed = true;
                break;
            }
            if buffer.len() < 4 + len {
                break;
            }
            consumed += 4 + len;

            let frame = match postcard::from_bytes::<Frame<'_>>(&buffer[4..4 + len]) {
                Ok(frame) => frame,
                Err(e) => {
                    log::warn!("Undecodable frame from {}: {}", self.addr, e);
                    continue;
                }
            };
            match frame {
                Frame::DeclareSender { id, name } => {
                    let local = match registry.find_sender(name) {
                        Some(local) => local,
                        None => {
                            let local = registry.sender(name);
                            learned.push(Learned::Sender(local, name.to_string()));
                            local
                        }
                    };
                    self.senders.insert(id, local);
                }
                Frame::DeclareType { id, name } => {
                    let local = match registry.find_type(name) {
                        Some(local) => local,
                        None => {
                            let local = registry.message_type(name);
                            learned.push(Learned::Type(local, name.to_string()));
                            local
                        }
                    };
                    self.types.insert(id, local);
                }
                Frame::Message {
                    sender,
                    message_type,
                    timestamp_us,
                    payload,
                } => match (self.senders.get(&sender), self.types.get(&message_type)) {
                    (Some(&sender), Some(&message_type)) => inbound.push_back(Message {
                        sender,
                        message_type,
                        timestamp_us,
                        payload: payload.to_vec(),
                    }),
                    _ => log::warn!(
                        "Message with undeclared ids ({}, {}) from {}",
                        sender,
                        message_type,
                        self.addr
                    ),
                },
            }
        }
        self.read_buffer.drain(..consumed);
    }
}

/// Connection over TCP, either accepting clients or connected to a server
pub struct TcpConnection {
    registry: NameRegistry,
    listener: Option<TcpListener>,
    peers: Vec<Peer>,
    inbound: VecDeque<Message>,
    scratch: Vec<u8>,
}

impl TcpConnection {
    /// Accept clients on `addr`
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        log::info!("Listening for connections on {}", listener.local_addr()?);
        Ok(Self {
            registry: NameRegistry::new(),
            listener: Some(listener),
            peers: Vec::new(),
            inbound: VecDeque::new(),
            scratch: Vec::with_capacity(1024),
        })
    }

    /// Connect to a server
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        let peer_addr = stream.peer_addr()?;
        log::info!("Connected to {}", peer_addr);
        let mut conn = Self {
            registry: NameRegistry::new(),
            listener: None,
            peers: Vec::new(),
            inbound: VecDeque::new(),
            scratch: Vec::with_capacity(1024),
        };
        conn.add_peer(Peer::new(stream, peer_addr)?)?;
        Ok(conn)
    }

    /// Bound address in server mode
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Number of connected peers
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Introduce every known name to a new peer, then keep it
    fn add_peer(&mut self, mut peer: Peer) -> Result<()> {
        self.scratch.clear();
        for (id, name) in self.registry.senders() {
            encode_frame(&Frame::DeclareSender { id: id.0, name }, &mut self.scratch)?;
        }
        for (id, name) in self.registry.types() {
            encode_frame(&Frame::DeclareType { id: id.0, name }, &mut self.scratch)?;
        }
        peer.enqueue(&self.scratch);
        self.peers.push(peer);
        Ok(())
    }

    fn accept_pending(&mut self) {
        let Some(listener) = &self.listener else {
            return;
        };
        let mut accepted = Vec::new();
        loop {
            match listener.accept() {
                Ok((stream, addr)) => accepted.push((stream, addr)),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("Accept failed: {}", e);
                    break;
                }
            }
        }
        for (stream, addr) in accepted {
            log::info!("Client connected: {}", addr);
            let added = Peer::new(stream, addr).and_then(|peer| self.add_peer(peer));
            if let Err(e) = added {
                log::warn!("Could not set up {}: {}", addr, e);
            }
        }
    }

    /// Queue the scratch buffer on every peer
    fn broadcast_scratch(&mut self) {
        let frames = &self.scratch;
        for peer in self.peers.iter_mut() {
            peer.enqueue(frames);
        }
    }

    fn declare(&mut self, frame: &Frame<'_>) {
        if self.peers.is_empty() {
            return;
        }
        self.scratch.clear();
        match encode_frame(frame, &mut self.scratch) {
            Ok(()) => self.broadcast_scratch(),
            Err(e) => log::warn!("Could not declare {:?}: {}", frame, e),
        }
        self.remove_closed();
    }

    /// Drop every peer marked closed, queueing one notice for each
    fn remove_closed(&mut self) {
        let mut gone = Vec::new();
        self.peers.retain(|peer| {
            if peer.closed {
                gone.push(peer.addr);
            }
            !peer.closed
        });
        for addr in gone {
            self.peer_dropped(addr);
        }
    }

    fn peer_dropped(&mut self, addr: SocketAddr) {
        log::info!("Peer disconnected: {}", addr);
        let sender = self.registry.sender(SYSTEM_SENDER);
        let message_type = self.registry.message_type(CONNECTION_DROPPED_TYPE);
        self.inbound.push_back(Message {
            sender,
            message_type,
            timestamp_us: crate::core::timestamp_us(),
            payload: Vec::new(),
        });
    }

    fn service_peers(&mut self) {
        let mut learned = Vec::new();
        for peer in self.peers.iter_mut() {
            peer.flush();
            peer.fill();
            peer.read_frames(&mut self.registry, &mut self.inbound, &mut learned);
        }

        // Names first seen from one peer are introduced to all of them
        for name in learned {
            match name {
                Learned::Sender(id, name) => self.declare(&Frame::DeclareSender {
                    id: id.0,
                    name: name.as_str(),
                }),
                Learned::Type(id, name) => self.declare(&Frame::DeclareType {
                    id: id.0,
                    name: name.as_str(),
                }),
            }
        }
        self.remove_closed();
    }
}

impl Connection for TcpConnection {
    fn register_sender(&mut self, name: &str) -> SenderId {
        if let Some(id) = self.registry.find_sender(name) {
            return id;
        }
        let id = self.registry.sender(name);
        self.declare(&Frame::DeclareSender { id: id.0, name });
        id
    }

    fn register_message_type(&mut self, name: &str) -> MessageTypeId {
        if let Some(id) = self.registry.find_type(name) {
            return id;
        }
        let id = self.registry.message_type(name);
        self.declare(&Frame::DeclareType { id: id.0, name });
        id
    }

    fn send(
        &mut self,
        sender: SenderId,
        message_type: MessageTypeId,
        timestamp_us: u64,
        payload: &[u8],
        _class: DeliveryClass,
    ) -> Result<()> {
        if MESSAGE_ENVELOPE + payload.len() > MAX_FRAME_SIZE {
            return Err(Error::Capacity {
                what: "frame bytes",
                requested: MESSAGE_ENVELOPE + payload.len(),
                limit: MAX_FRAME_SIZE,
            });
        }
        if self.peers.is_empty() {
            return Ok(());
        }
        self.scratch.clear();
        let frame = Frame::Message {
            sender: sender.0,
            message_type: message_type.0,
            timestamp_us,
            payload,
        };
        encode_frame(&frame, &mut self.scratch)?;
        self.broadcast_scratch();
        self.remove_closed();
        Ok(())
    }

    fn poll_incoming(&mut self) -> Result<Option<Message>> {
        if self.inbound.is_empty() {
            self.accept_pending();
            self.service_peers();
        }
        Ok(self.inbound.pop_front())
    }

    fn registry(&self) -> &NameRegistry {
        &self.registry
    }
}
