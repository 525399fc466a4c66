//! Transport layer for I/O abstraction
//!
//! A [`Transport`] is one open byte stream (normally a serial port). A
//! [`PortOpener`] creates transports by port name, which lets acquisition
//! sessions close and reopen their port during a reset without knowing
//! whether they talk to real hardware or to a [`MockTransport`].

use crate::error::Result;

pub mod mock;
mod serial;

pub use mock::{MockPortOpener, MockTransport};
pub use serial::{SerialOpener, SerialTransport};

/// Transport trait for device communication
///
/// Reads must not block beyond a transport-level timeout of well under a
/// millisecond: returning `Ok(0)` means "nothing this tick".
pub trait Transport: Send {
    /// Read data into buffer, returns number of bytes read
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write data from buffer, returns number of bytes written
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Flush any pending writes (blocking until complete)
    fn flush(&mut self) -> Result<()>;

    /// Write the whole buffer, treating a short write as a fault
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < data.len() {
            let n = self.write(&data[written..])?;
            if n == 0 {
                return Err(crate::error::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "transport accepted no bytes",
                )));
            }
            written += n;
        }
        Ok(())
    }

    /// Check if data is available to read
    fn available(&mut self) -> Result<usize> {
        Ok(0)
    }
}

/// Opens transports by port name
pub trait PortOpener: Send {
    /// Open `port` at `baud_rate`
    fn open(&mut self, port: &str, baud_rate: u32) -> Result<Box<dyn Transport>>;
}
