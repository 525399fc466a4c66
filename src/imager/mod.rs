//! Imager streaming protocol
//!
//! A server describes a multi-channel 2-D sample grid once, then ships
//! rectangular single-channel regions of it. Remotes cache the description
//! and hand every region to their listeners as a borrowed [`Region`] view.
//!
//! # Message Types
//!
//! | Type | Delivery | Payload |
//! |------|----------|---------|
//! | [`DESCRIPTION_TYPE`] | reliable | grid geometry + channel descriptors |
//! | [`REGION_TYPE`] | low latency | region header + values, row-major |
//!
//! # Byte Order
//!
//! Header scalars are big-endian. Region values are little-endian and are
//! swapped on big-endian hosts, decided once at compile time by
//! [`HOST_NEEDS_SWAP`].
//!
//! # Region Size
//!
//! Each region must fit one transport frame:
//! `max values = (FRAME_CAPACITY - REGION_HEADER_BYTES) / size_of::<T>()`.
//! Callers tile larger areas into several regions.

mod channel;
mod description;
mod region;
mod remote;
mod server;
mod strided;

pub use channel::{ChannelDescriptor, DESCRIPTOR_LEN, TEXT_FIELD_LEN};
pub use description::{DESCRIPTION_HEADER_LEN, Extents, ImageDescription};
pub use region::{
    PackOptions, REGION_WIRE_HEADER_LEN, Region, RegionHeader, RegionRect, pack_region,
};
pub use remote::{DescriptionListener, ImagerRemote, RegionListener};
pub use server::ImagerServer;
pub use strided::{StridedView, StridedViewMut};

use std::fmt::Debug;

/// Most channels one imager can describe
pub const MAX_CHANNELS: usize = 10;

/// Bytes available to one message on the transport
pub const FRAME_CAPACITY: usize = 64_000;

/// Header budget reserved out of each frame: six 16-bit and six 32-bit fields
pub const REGION_HEADER_BYTES: usize = 6 * 2 + 6 * 4;

/// Message type carrying an [`ImageDescription`]
pub const DESCRIPTION_TYPE: &str = "Imager Description";

/// Message type carrying one region
pub const REGION_TYPE: &str = "Imager Region";

/// Region values are little-endian on the wire
pub const HOST_NEEDS_SWAP: bool = cfg!(target_endian = "big");

/// Largest region, in values, for elements of `element_size` bytes
pub const fn max_region_values(element_size: usize) -> usize {
    (FRAME_CAPACITY - REGION_HEADER_BYTES) / element_size
}

/// Element type tag carried in each region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ValueType {
    Unknown = 0,
    U8 = 1,
    U16 = 2,
    F32 = 3,
}

impl ValueType {
    pub fn from_wire(tag: u16) -> Self {
        match tag {
            1 => ValueType::U8,
            2 => ValueType::U16,
            3 => ValueType::F32,
            _ => ValueType::Unknown,
        }
    }

    /// Bytes per value, zero for unknown
    pub fn size(self) -> usize {
        match self {
            ValueType::U8 => 1,
            ValueType::U16 => 2,
            ValueType::F32 => 4,
            ValueType::Unknown => 0,
        }
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for u8 {}
    impl Sealed for u16 {}
    impl Sealed for f32 {}
}

/// A region value type: `u8`, `u16` or `f32`
pub trait Element: Copy + Default + PartialEq + Debug + Send + Sync + 'static + sealed::Sealed {
    const VALUE_TYPE: ValueType;
    const SIZE: usize;
    /// Region size bound for this element type
    const MAX_REGION_VALUES: usize = max_region_values(Self::SIZE);

    /// Write wire bytes; `out.len() == SIZE`
    fn write_wire(self, out: &mut [u8]);

    /// Read wire bytes; `bytes.len() == SIZE`
    fn read_wire(bytes: &[u8]) -> Self;

    fn to_f64(self) -> f64;
}

impl Element for u8 {
    const VALUE_TYPE: ValueType = ValueType::U8;
    const SIZE: usize = 1;

    #[inline]
    fn write_wire(self, out: &mut [u8]) {
        out[0] = self;
    }

    #[inline]
    fn read_wire(bytes: &[u8]) -> Self {
        bytes[0]
    }

    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl Element for u16 {
    const VALUE_TYPE: ValueType = ValueType::U16;
    const SIZE: usize = 2;

    #[inline]
    fn write_wire(self, out: &mut [u8]) {
        let v = if HOST_NEEDS_SWAP {
            self.swap_bytes()
        } else {
            self
        };
        out.copy_from_slice(&v.to_ne_bytes());
    }

    #[inline]
    fn read_wire(bytes: &[u8]) -> Self {
        let v = u16::from_ne_bytes([bytes[0], bytes[1]]);
        if HOST_NEEDS_SWAP { v.swap_bytes() } else { v }
    }

    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl Element for f32 {
    const VALUE_TYPE: ValueType = ValueType::F32;
    const SIZE: usize = 4;

    #[inline]
    fn write_wire(self, out: &mut [u8]) {
        let bits = if HOST_NEEDS_SWAP {
            self.to_bits().swap_bytes()
        } else {
            self.to_bits()
        };
        out.copy_from_slice(&bits.to_ne_bytes());
    }

    #[inline]
    fn read_wire(bytes: &[u8]) -> Self {
        let bits = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        f32::from_bits(if HOST_NEEDS_SWAP {
            bits.swap_bytes()
        } else {
            bits
        })
    }

    fn to_f64(self) -> f64 {
        self as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_region_sizes() {
        assert_eq!(REGION_HEADER_BYTES, 36);
        assert_eq!(u8::MAX_REGION_VALUES, 63_964);
        assert_eq!(u16::MAX_REGION_VALUES, 31_982);
        assert_eq!(f32::MAX_REGION_VALUES, 15_991);
        for size in [1, 2, 4] {
            assert_eq!(
                max_region_values(size),
                (FRAME_CAPACITY - REGION_HEADER_BYTES) / size
            );
        }
    }

    #[test]
    fn test_values_little_endian_on_wire() {
        let mut out = [0u8; 2];
        0x1234u16.write_wire(&mut out);
        assert_eq!(out, [0x34, 0x12]);
        assert_eq!(u16::read_wire(&out), 0x1234);

        let mut out = [0u8; 4];
        1.5f32.write_wire(&mut out);
        assert_eq!(out, 1.5f32.to_le_bytes());
        assert_eq!(f32::read_wire(&out), 1.5);
    }

    #[test]
    fn test_value_type_tags() {
        assert_eq!(ValueType::from_wire(1), ValueType::U8);
        assert_eq!(ValueType::from_wire(3), ValueType::F32);
        assert_eq!(ValueType::from_wire(9), ValueType::Unknown);
        assert_eq!(ValueType::U16 as u16, 2);
        assert_eq!(ValueType::F32.size(), 4);
    }
}
