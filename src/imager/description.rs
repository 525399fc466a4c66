//! Image description message
//!
//! ```text
//! rows i32 | cols i32 | minX f32 | maxX f32 | minY f32 | maxY f32 | count i32 | count × descriptor
//! ```

use super::MAX_CHANNELS;
use super::channel::{ChannelDescriptor, DESCRIPTOR_LEN};
use crate::error::{Error, Result};

/// Fixed part of a description payload
pub const DESCRIPTION_HEADER_LEN: usize = 4 * 7;

/// Physical coordinates of the outermost pixel centers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extents {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
}

impl Default for Extents {
    fn default() -> Self {
        Self {
            min_x: 0.0,
            max_x: 1.0,
            min_y: 0.0,
            max_y: 1.0,
        }
    }
}

/// Grid geometry plus channel list
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDescription {
    pub rows: i32,
    pub cols: i32,
    pub extents: Extents,
    pub channels: Vec<ChannelDescriptor>,
}

impl ImageDescription {
    /// Append the wire form to `out`
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.channels.len() > MAX_CHANNELS {
            return Err(Error::Capacity {
                what: "imager channels",
                requested: self.channels.len(),
                limit: MAX_CHANNELS,
            });
        }
        out.reserve(DESCRIPTION_HEADER_LEN + self.channels.len() * DESCRIPTOR_LEN);
        out.extend_from_slice(&self.rows.to_be_bytes());
        out.extend_from_slice(&self.cols.to_be_bytes());
        let e = &self.extents;
        for v in [e.min_x, e.max_x, e.min_y, e.max_y] {
            out.extend_from_slice(&v.to_be_bytes());
        }
        out.extend_from_slice(&(self.channels.len() as i32).to_be_bytes());
        for channel in &self.channels {
            channel.encode(out);
        }
        Ok(())
    }

    /// Parse a description payload
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < DESCRIPTION_HEADER_LEN {
            return Err(Error::ProtocolOrder(format!(
                "description of {} bytes is shorter than its header",
                payload.len()
            )));
        }
        let word = |i: usize| {
            let at = i * 4;
            [payload[at], payload[at + 1], payload[at + 2], payload[at + 3]]
        };
        let rows = i32::from_be_bytes(word(0));
        let cols = i32::from_be_bytes(word(1));
        let extents = Extents {
            min_x: f32::from_be_bytes(word(2)),
            max_x: f32::from_be_bytes(word(3)),
            min_y: f32::from_be_bytes(word(4)),
            max_y: f32::from_be_bytes(word(5)),
        };
        let count = i32::from_be_bytes(word(6));

        if rows < 0 || cols < 0 {
            return Err(Error::ProtocolOrder(format!(
                "negative grid size {}x{}",
                cols, rows
            )));
        }
        if count < 0 || count as usize > MAX_CHANNELS {
            return Err(Error::ProtocolOrder(format!(
                "description declares {} channels",
                count
            )));
        }
        let count = count as usize;
        let expected = DESCRIPTION_HEADER_LEN + count * DESCRIPTOR_LEN;
        if payload.len() != expected {
            return Err(Error::ProtocolOrder(format!(
                "description of {} bytes, {} channels need {}",
                payload.len(),
                count,
                expected
            )));
        }

        let channels = payload[DESCRIPTION_HEADER_LEN..]
            .chunks_exact(DESCRIPTOR_LEN)
            .map(ChannelDescriptor::decode)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rows,
            cols,
            extents,
            channels,
        })
    }

    pub fn channel(&self, index: usize) -> Option<&ChannelDescriptor> {
        self.channels.get(index)
    }
}
