//! Fixed-capacity byte ring for serial report assembly
//!
//! Consuming bytes is O(1): the read cursor moves, nothing is shifted.

/// Fixed-capacity ring buffer with O(1) advance
///
/// Generic const parameter `N` sets buffer capacity.
pub struct RingBuffer<const N: usize = 1024> {
    data: [u8; N],
    head: usize, // next empty slot
    tail: usize, // first valid byte
    len: usize,
}

impl<const N: usize> RingBuffer<N> {
    /// Create a new empty ring buffer
    pub const fn new() -> Self {
        Self {
            data: [0u8; N],
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    /// Append bytes, returning how many fit
    ///
    /// Bytes beyond capacity are dropped; the caller decides whether that
    /// is worth a warning.
    #[inline]
    pub fn extend(&mut self, bytes: &[u8]) -> usize {
        let accepted = bytes.len().min(N - self.len);
        for &b in &bytes[..accepted] {
            self.data[self.head] = b;
            self.head = (self.head + 1) % N;
        }
        self.len += accepted;
        accepted
    }

    /// Consume n bytes from the front
    #[inline]
    pub fn advance(&mut self, n: usize) {
        let n = n.min(self.len);
        self.tail = (self.tail + n) % N;
        self.len -= n;
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.len = 0;
    }

    /// Number of bytes available to read
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Room left before bytes start being dropped
    #[inline]
    pub fn free(&self) -> usize {
        N - self.len
    }

    /// Read byte at logical index (handles wraparound)
    #[inline]
    pub fn get(&self, index: usize) -> Option<u8> {
        (index < self.len).then(|| self.data[(self.tail + index) % N])
    }

    /// Offset of the first byte at or after `from` matching `pred`
    pub fn position_from(&self, from: usize, pred: impl Fn(u8) -> bool) -> Option<usize> {
        (from..self.len).find(|&i| pred(self.data[(self.tail + i) % N]))
    }

    /// Copy `out.len()` bytes starting at logical `start` into `out`
    ///
    /// Returns false, leaving `out` untouched, if that many bytes are not
    /// buffered yet.
    pub fn copy_to(&self, start: usize, out: &mut [u8]) -> bool {
        if start + out.len() > self.len {
            return false;
        }
        let first = (self.tail + start) % N;
        let contiguous = (N - first).min(out.len());
        out[..contiguous].copy_from_slice(&self.data[first..first + contiguous]);
        let rest = out.len() - contiguous;
        out[contiguous..].copy_from_slice(&self.data[..rest]);
        true
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}
