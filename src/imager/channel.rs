//! Channel descriptors
//!
//! Wire layout (216 bytes):
//!
//! ```text
//! minVal f32 | maxVal f32 | offset f32 | scale f32 | name [100] | units [100]
//! ```
//!
//! Floats are big-endian. Text fields are NUL padded and always keep a
//! terminating NUL, so at most 99 bytes of text survive. Longer text is cut
//! at the last UTF-8 character boundary that fits and a warning is logged.

use crate::error::{Error, Result};

/// Size of the name and units fields
pub const TEXT_FIELD_LEN: usize = 100;

/// Encoded size of one descriptor
pub const DESCRIPTOR_LEN: usize = 4 * 4 + 2 * TEXT_FIELD_LEN;

/// One named, scaled stream of values within an image
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelDescriptor {
    pub name: String,
    pub units: String,
    pub min_val: f32,
    pub max_val: f32,
    /// Physical value = raw * scale + offset
    pub scale: f32,
    pub offset: f32,
}

impl ChannelDescriptor {
    /// 8-bit style channel: range 0..=255, unit scale, no offset
    pub fn new(name: &str, units: &str) -> Self {
        Self {
            name: name.to_string(),
            units: units.to_string(),
            min_val: 0.0,
            max_val: 255.0,
            scale: 1.0,
            offset: 0.0,
        }
    }

    pub fn with_range(mut self, min_val: f32, max_val: f32) -> Self {
        self.min_val = min_val;
        self.max_val = max_val;
        self
    }

    pub fn with_scale(mut self, scale: f32, offset: f32) -> Self {
        self.scale = scale;
        self.offset = offset;
        self
    }

    /// Convert a raw sample to physical units
    pub fn to_physical(&self, raw: f64) -> f64 {
        raw * self.scale as f64 + self.offset as f64
    }

    /// Copy with name and units cut to what the wire can carry
    pub fn bounded(&self) -> Self {
        let mut out = self.clone();
        out.name = bounded_text(&self.name, "name").to_string();
        out.units = bounded_text(&self.units, "units").to_string();
        out
    }

    /// Append the wire form to `out`
    pub fn encode(&self, out: &mut Vec<u8>) {
        for v in [self.min_val, self.max_val, self.offset, self.scale] {
            out.extend_from_slice(&v.to_be_bytes());
        }
        put_text(bounded_text(&self.name, "name"), out);
        put_text(bounded_text(&self.units, "units"), out);
    }

    /// Parse one descriptor from exactly [`DESCRIPTOR_LEN`] bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != DESCRIPTOR_LEN {
            return Err(Error::ProtocolOrder(format!(
                "channel descriptor of {} bytes, expected {}",
                bytes.len(),
                DESCRIPTOR_LEN
            )));
        }
        let f = |i: usize| {
            let at = i * 4;
            f32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        Ok(Self {
            min_val: f(0),
            max_val: f(1),
            offset: f(2),
            scale: f(3),
            name: get_text(&bytes[16..16 + TEXT_FIELD_LEN]),
            units: get_text(&bytes[16 + TEXT_FIELD_LEN..]),
        })
    }
}

fn bounded_text<'a>(text: &'a str, field: &str) -> &'a str {
    let limit = TEXT_FIELD_LEN - 1;
    if text.len() <= limit {
        return text;
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    log::warn!(
        "Channel {} truncated from {} to {} bytes: {:?}",
        field,
        text.len(),
        cut,
        &text[..cut]
    );
    &text[..cut]
}

fn put_text(text: &str, out: &mut Vec<u8>) {
    out.extend_from_slice(text.as_bytes());
    out.resize(out.len() + TEXT_FIELD_LEN - text.len(), 0);
}

fn get_text(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}
