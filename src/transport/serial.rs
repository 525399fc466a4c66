//! Serial transport implementation

use super::{PortOpener, Transport};
use crate::error::{Error, Result};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;

/// Read timeout; anything longer would stall the whole server tick
const READ_TIMEOUT: Duration = Duration::from_micros(100);

/// Serial transport for RS-232 trackers
pub struct SerialTransport {
    path: String,
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open a serial port
    ///
    /// # Arguments
    /// * `path` - Serial port path (e.g., "/dev/ttyUSB0")
    /// * `baud_rate` - Baud rate (e.g., 115200)
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| Error::transport(path, e.to_string()))?;

        log::info!("Opened serial port: {} at {} baud", path, baud_rate);

        // Stale bytes from a previous session would only cost a resync
        if let Err(e) = port.clear(serialport::ClearBuffer::All) {
            log::debug!("Could not clear buffers on {}: {}", path, e);
        }

        Ok(SerialTransport {
            path: path.to_string(),
            port,
        })
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        match self.port.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(Error::transport(&self.path, e.to_string())),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.port
            .write(data)
            .map_err(|e| Error::transport(&self.path, e.to_string()))
    }

    fn flush(&mut self) -> Result<()> {
        self.port
            .flush()
            .map_err(|e| Error::transport(&self.path, e.to_string()))
    }

    fn available(&mut self) -> Result<usize> {
        Ok(self.port.bytes_to_read()? as usize)
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        log::info!("Closed serial port: {}", self.path);
    }
}

/// Opens real serial ports
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialOpener;

impl PortOpener for SerialOpener {
    fn open(&mut self, port: &str, baud_rate: u32) -> Result<Box<dyn Transport>> {
        Ok(Box::new(SerialTransport::open(port, baud_rate)?))
    }
}
