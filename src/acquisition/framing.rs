//! Report assembly over a lossy byte stream
//!
//! A [`Framer`] owns the receive ring of one serial port. Hardware variants
//! describe their report layout through [`FrameFormat`]; the framer knows
//! nothing about what the bytes mean.
//!
//! Each report is stamped with the time its first byte was read from the
//! transport, not the time it was decoded.

use super::ring_buffer::RingBuffer;
use crate::core::timestamp_us;
use crate::error::Result;
use crate::transport::Transport;
use std::collections::VecDeque;
use std::fmt;

/// Receive ring capacity per port
pub const FRAMER_CAPACITY: usize = 1024;

/// Largest report any supported format produces
pub const MAX_REPORT_LEN: usize = 256;

/// Bytes pulled from the transport per `fill`
const READ_CHUNK: usize = 256;

/// Why a candidate report was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFault {
    /// Frame-start marker missing where a record should begin, or present
    /// where it must not be
    Phasing { offset: usize },
    /// Record tagged with an unexpected unit address
    Address { expected: u8, found: u8 },
    /// Buffered data does not begin on a frame start
    Misaligned,
}

impl fmt::Display for FrameFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameFault::Phasing { offset } => write!(f, "phasing error at byte {}", offset),
            FrameFault::Address { expected, found } => {
                write!(f, "address {} where {} was expected", found, expected)
            }
            FrameFault::Misaligned => write!(f, "stream not at a frame start"),
        }
    }
}

/// Layout of one hardware report
pub trait FrameFormat {
    /// Bytes in one complete report
    fn report_len(&self) -> usize;

    /// Whether `byte` can begin a report
    fn is_frame_start(&self, byte: u8) -> bool;

    /// Check a complete report
    fn validate(&self, report: &[u8]) -> std::result::Result<(), FrameFault>;
}

/// Outcome of [`Framer::next_report`]
#[derive(Debug, PartialEq)]
pub enum NextReport<'a> {
    /// Not enough bytes yet
    Incomplete,
    /// A validated report and its first-byte timestamp
    Report { bytes: &'a [u8], timestamp_us: u64 },
    /// Framing lost; nothing was consumed
    Fault(FrameFault),
}

/// Outcome of one [`Framer::resync`] step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resync {
    /// Stream now begins on a frame start after skipping this many bytes
    Found(usize),
    /// Skipped this many bytes, budget left, buffer empty
    Pending(usize),
    /// Skipped this many bytes and used up the budget
    Exhausted(usize),
}

/// Ring buffer plus first-byte timestamps
pub struct Framer {
    buffer: RingBuffer<FRAMER_CAPACITY>,
    /// `(absolute stream offset, read time)` of each chunk still buffered
    arrivals: VecDeque<(u64, u64)>,
    /// Absolute offset of the first buffered byte
    consumed: u64,
    /// Absolute offset one past the last buffered byte
    received: u64,
    report: [u8; MAX_REPORT_LEN],
    overflowed: u64,
}

impl Framer {
    pub fn new() -> Self {
        Self {
            buffer: RingBuffer::new(),
            arrivals: VecDeque::new(),
            consumed: 0,
            received: 0,
            report: [0u8; MAX_REPORT_LEN],
            overflowed: 0,
        }
    }

    /// One non-blocking read from `transport`
    pub fn fill(&mut self, transport: &mut dyn Transport) -> Result<usize> {
        let want = self.buffer.free().min(READ_CHUNK);
        if want == 0 {
            return Ok(0);
        }
        let mut chunk = [0u8; READ_CHUNK];
        let n = transport.read(&mut chunk[..want])?;
        if n > 0 {
            self.ingest(&chunk[..n], timestamp_us());
        }
        Ok(n)
    }

    /// Append bytes read at `timestamp_us`
    pub fn ingest(&mut self, bytes: &[u8], timestamp_us: u64) {
        if bytes.is_empty() {
            return;
        }
        let accepted = self.buffer.extend(bytes);
        if accepted < bytes.len() {
            self.overflowed += (bytes.len() - accepted) as u64;
            log::warn!(
                "Receive buffer full, dropped {} bytes",
                bytes.len() - accepted
            );
        }
        if accepted > 0 {
            self.arrivals.push_back((self.received, timestamp_us));
            self.received += accepted as u64;
        }
    }

    /// Buffered byte count
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Bytes lost to a full buffer since creation
    pub fn overflowed(&self) -> u64 {
        self.overflowed
    }

    /// Forget everything buffered
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.arrivals.clear();
        self.consumed = self.received;
    }

    /// Drop `n` bytes from the front
    pub fn discard(&mut self, n: usize) {
        let n = n.min(self.buffer.len());
        self.buffer.advance(n);
        self.consumed += n as u64;
        while self.arrivals.len() > 1 && self.arrivals[1].0 <= self.consumed {
            self.arrivals.pop_front();
        }
        if self.buffer.is_empty() {
            self.arrivals.clear();
        }
    }

    /// Move `out.len()` bytes out of the buffer, or nothing if fewer are buffered
    pub fn take(&mut self, out: &mut [u8]) -> bool {
        if !self.buffer.copy_to(0, out) {
            return false;
        }
        self.discard(out.len());
        true
    }

    /// Read time of the first buffered byte
    fn front_timestamp(&self) -> u64 {
        self.arrivals
            .iter()
            .rev()
            .find(|(offset, _)| *offset <= self.consumed)
            .map(|(_, ts)| *ts)
            .unwrap_or(0)
    }

    /// Extract the next complete report
    pub fn next_report(&mut self, format: &dyn FrameFormat) -> NextReport<'_> {
        let len = format.report_len().min(MAX_REPORT_LEN);
        let Some(first) = self.buffer.get(0) else {
            return NextReport::Incomplete;
        };
        if !format.is_frame_start(first) {
            return NextReport::Fault(FrameFault::Misaligned);
        }
        if self.buffer.len() < len {
            return NextReport::Incomplete;
        }
        let timestamp_us = self.front_timestamp();
        self.buffer.copy_to(0, &mut self.report[..len]);
        if let Err(fault) = format.validate(&self.report[..len]) {
            return NextReport::Fault(fault);
        }
        self.discard(len);
        NextReport::Report {
            bytes: &self.report[..len],
            timestamp_us,
        }
    }

    /// Scan for the next frame start, skipping at most `budget` bytes
    ///
    /// The byte at the front is examined too, so callers that just saw a
    /// fault must `discard(1)` first.
    pub fn resync(&mut self, format: &dyn FrameFormat, budget: usize) -> Resync {
        let scan = self.buffer.len().min(budget);
        if let Some(at) = self
            .buffer
            .position_from(0, |b| format.is_frame_start(b))
            .filter(|&at| at <= budget)
        {
            self.discard(at);
            return Resync::Found(at);
        }
        self.discard(scan);
        if scan >= budget {
            Resync::Exhausted(scan)
        } else {
            Resync::Pending(scan)
        }
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    /// Four-byte reports: a 0xA5 header then three bytes below 0x80
    struct Toy;

    impl FrameFormat for Toy {
        fn report_len(&self) -> usize {
            4
        }

        fn is_frame_start(&self, byte: u8) -> bool {
            byte == 0xA5
        }

        fn validate(&self, report: &[u8]) -> std::result::Result<(), FrameFault> {
            match report[1..].iter().position(|&b| b >= 0x80) {
                Some(i) => Err(FrameFault::Phasing { offset: i + 1 }),
                None => Ok(()),
            }
        }
    }

    #[test]
    fn test_report_waits_for_all_bytes() {
        let mut framer = Framer::new();
        framer.ingest(&[0xA5, 1], 100);
        assert_eq!(framer.next_report(&Toy), NextReport::Incomplete);

        framer.ingest(&[2, 3], 200);
        match framer.next_report(&Toy) {
            NextReport::Report {
                bytes,
                timestamp_us,
            } => {
                assert_eq!(bytes, &[0xA5, 1, 2, 3]);
                // Stamped with the read time of the first byte
                assert_eq!(timestamp_us, 100);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(framer.is_empty());
    }

    #[test]
    fn test_timestamp_follows_chunk_boundaries() {
        let mut framer = Framer::new();
        framer.ingest(&[0xA5, 1, 2, 3, 0xA5, 4], 10);
        framer.ingest(&[5, 6, 0xA5, 7, 8, 9], 20);

        let mut stamps = Vec::new();
        while let NextReport::Report { timestamp_us, .. } = framer.next_report(&Toy) {
            stamps.push(timestamp_us);
        }
        assert_eq!(stamps, vec![10, 10, 20]);
    }

    #[test]
    fn test_fault_consumes_nothing() {
        let mut framer = Framer::new();
        framer.ingest(&[0xA5, 1, 0x90, 3], 0);
        assert_eq!(
            framer.next_report(&Toy),
            NextReport::Fault(FrameFault::Phasing { offset: 2 })
        );
        assert_eq!(framer.len(), 4);

        framer.discard(1);
        assert_eq!(
            framer.next_report(&Toy),
            NextReport::Fault(FrameFault::Misaligned)
        );
    }

    #[test]
    fn test_resync_finds_next_start() {
        let mut framer = Framer::new();
        framer.ingest(&[1, 2, 3, 0xA5, 1, 2, 3], 0);
        assert_eq!(framer.resync(&Toy, 16), Resync::Found(3));
        assert!(matches!(
            framer.next_report(&Toy),
            NextReport::Report { .. }
        ));
    }

    #[test]
    fn test_resync_budget() {
        let mut framer = Framer::new();
        framer.ingest(&[1, 2, 3], 0);
        assert_eq!(framer.resync(&Toy, 8), Resync::Pending(3));
        framer.ingest(&[4, 5, 6, 7, 8, 0xA5], 0);
        assert_eq!(framer.resync(&Toy, 4), Resync::Exhausted(4));
        assert_eq!(framer.resync(&Toy, 4), Resync::Found(1));
    }

    #[test]
    fn test_take_and_fill() {
        let mock = MockTransport::new();
        mock.inject_read(&[0, 7, 9]);
        let mut port = mock.clone();

        let mut framer = Framer::new();
        assert_eq!(framer.fill(&mut port).unwrap(), 3);
        let mut ack = [0u8; 1];
        assert!(framer.take(&mut ack));
        assert_eq!(ack, [0]);
        let mut pair = [0u8; 2];
        assert!(framer.take(&mut pair));
        assert_eq!(pair, [7, 9]);
        assert!(!framer.take(&mut ack));
    }

    #[test]
    fn test_overflow_counted() {
        let mut framer = Framer::new();
        framer.ingest(&[1u8; FRAMER_CAPACITY], 0);
        framer.ingest(&[2u8; 10], 0);
        assert_eq!(framer.overflowed(), 10);
        assert_eq!(framer.len(), FRAMER_CAPACITY);
    }
}
