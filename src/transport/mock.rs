//! Mock transport for testing
//!
//! Clones share one buffer pair, so a test keeps a handle to inject bytes
//! while the session under test owns another. `disconnect()` makes every
//! subsequent read and write fail the way a pulled USB adapter would.

use super::{PortOpener, Transport};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Mock transport for unit testing
#[derive(Clone)]
pub struct MockTransport {
    name: Arc<str>,
    inner: Arc<Mutex<MockTransportInner>>,
}

struct MockTransportInner {
    read_buffer: VecDeque<u8>,
    write_buffer: Vec<u8>,
    connected: bool,
    /// Upper bound on bytes returned per read, emulating a slow UART
    max_read: usize,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        Self::named("mock")
    }

    /// Create a mock transport that reports `name` in its faults
    pub fn named(name: &str) -> Self {
        MockTransport {
            name: Arc::from(name),
            inner: Arc::new(Mutex::new(MockTransportInner {
                read_buffer: VecDeque::new(),
                write_buffer: Vec::new(),
                connected: true,
                max_read: usize::MAX,
            })),
        }
    }

    /// Inject data to be read
    pub fn inject_read(&self, data: &[u8]) {
        self.inner.lock().read_buffer.extend(data);
    }

    /// Get all written data
    pub fn get_written(&self) -> Vec<u8> {
        self.inner.lock().write_buffer.clone()
    }

    /// Clear written data
    pub fn clear_written(&self) {
        self.inner.lock().write_buffer.clear();
    }

    /// Clear read buffer
    pub fn clear_read(&self) {
        self.inner.lock().read_buffer.clear();
    }

    /// Number of injected bytes not yet read
    pub fn pending_read(&self) -> usize {
        self.inner.lock().read_buffer.len()
    }

    /// Limit how many bytes a single read may return
    pub fn set_max_read(&self, max_read: usize) {
        self.inner.lock().max_read = max_read.max(1);
    }

    /// Simulate the port vanishing
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock();
        inner.connected = false;
        inner.read_buffer.clear();
    }

    /// Bring a disconnected port back
    pub fn reconnect(&self) {
        self.inner.lock().connected = true;
    }

    /// Whether the port is currently connected
    pub fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }

    fn lost(&self) -> Error {
        Error::transport(&self.name, "device disconnected")
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        if !inner.connected {
            return Err(self.lost());
        }
        let available = inner.read_buffer.len().min(buffer.len()).min(inner.max_read);
        for (slot, byte) in buffer.iter_mut().zip(inner.read_buffer.drain(..available)) {
            *slot = byte;
        }
        Ok(available)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        if !inner.connected {
            return Err(self.lost());
        }
        inner.write_buffer.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<()> {
        if !self.is_connected() {
            return Err(self.lost());
        }
        Ok(())
    }

    fn available(&mut self) -> Result<usize> {
        Ok(self.inner.lock().read_buffer.len())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Hands out pre-registered [`MockTransport`]s by port name
///
/// Opening an unknown port, or one whose mock is disconnected, fails with a
/// transport fault. Every successful open is counted so tests can observe
/// resets.
#[derive(Clone, Default)]
pub struct MockPortOpener {
    ports: Arc<Mutex<HashMap<String, MockTransport>>>,
    opens: Arc<Mutex<HashMap<String, usize>>>,
}

impl MockPortOpener {
    /// Create an opener with no ports
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a port and return the test-side handle to it
    pub fn add_port(&self, port: &str) -> MockTransport {
        let transport = MockTransport::named(port);
        self.ports.lock().insert(port.to_string(), transport.clone());
        transport
    }

    /// Test-side handle for a registered port
    pub fn port(&self, port: &str) -> Option<MockTransport> {
        self.ports.lock().get(port).cloned()
    }

    /// How many times `port` was opened successfully
    pub fn open_count(&self, port: &str) -> usize {
        self.opens.lock().get(port).copied().unwrap_or(0)
    }
}

impl PortOpener for MockPortOpener {
    fn open(&mut self, port: &str, baud_rate: u32) -> Result<Box<dyn Transport>> {
        let transport = self
            .ports
            .lock()
            .get(port)
            .cloned()
            .ok_or_else(|| Error::transport(port, "no such port"))?;
        if !transport.is_connected() {
            return Err(Error::transport(port, "device disconnected"));
        }
        *self.opens.lock().entry(port.to_string()).or_insert(0) += 1;
        log::debug!("Opened mock port {} at {} baud", port, baud_rate);
        Ok(Box::new(transport))
    }
}
