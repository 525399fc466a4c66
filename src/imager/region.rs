//! Region codec
//!
//! ```text
//! chan i16 | cMin u16 | cMax u16 | rMin u16 | rMax u16 | valueType u16 | values...
//! ```
//!
//! Header fields are big-endian; values are row-major, little-endian.
//!
//! Packing walks a [`StridedView`] of the caller's buffer. With
//! `invert_rows` set, source row `n - 1 - r` feeds wire row `r`; with
//! `repeat > 1`, each logical source row fills `repeat` consecutive wire
//! rows. Decoding mirrors both: each wire row lands in `repeat` destination
//! rows starting at `row * repeat`, counted from the bottom when inverted.

use super::strided::{StridedView, StridedViewMut};
use super::{Element, ValueType};
use crate::error::{Error, Result};

/// Encoded size of a region header
pub const REGION_WIRE_HEADER_LEN: usize = 2 + 4 * 2 + 2;

/// Inclusive column and row bounds of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionRect {
    pub c_min: u16,
    pub c_max: u16,
    pub r_min: u16,
    pub r_max: u16,
}

impl RegionRect {
    pub fn new(c_min: u16, c_max: u16, r_min: u16, r_max: u16) -> Self {
        Self {
            c_min,
            c_max,
            r_min,
            r_max,
        }
    }

    pub fn width(&self) -> usize {
        (self.c_max as usize + 1).saturating_sub(self.c_min as usize)
    }

    pub fn height(&self) -> usize {
        (self.r_max as usize + 1).saturating_sub(self.r_min as usize)
    }

    /// Number of values in the rectangle
    pub fn count(&self) -> usize {
        self.width() * self.height()
    }

    fn is_ordered(&self) -> bool {
        self.c_min <= self.c_max && self.r_min <= self.r_max
    }
}

/// Decoded region header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionHeader {
    pub channel: i16,
    pub rect: RegionRect,
    pub value_type: ValueType,
}

impl RegionHeader {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.channel.to_be_bytes());
        for v in [
            self.rect.c_min,
            self.rect.c_max,
            self.rect.r_min,
            self.rect.r_max,
            self.value_type as u16,
        ] {
            out.extend_from_slice(&v.to_be_bytes());
        }
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < REGION_WIRE_HEADER_LEN {
            return Err(Error::ProtocolOrder(format!(
                "region of {} bytes is shorter than its header",
                bytes.len()
            )));
        }
        let u = |i: usize| u16::from_be_bytes([bytes[i], bytes[i + 1]]);
        Ok(Self {
            channel: i16::from_be_bytes([bytes[0], bytes[1]]),
            rect: RegionRect::new(u(2), u(4), u(6), u(8)),
            value_type: ValueType::from_wire(u(10)),
        })
    }
}

/// Row inversion and repetition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackOptions {
    /// Flip rows within an image of this many rows
    pub invert_rows: Option<u32>,
    /// Wire rows per logical row
    pub repeat: u32,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            invert_rows: None,
            repeat: 1,
        }
    }
}

impl PackOptions {
    pub fn inverted(rows: u32) -> Self {
        Self {
            invert_rows: Some(rows),
            repeat: 1,
        }
    }

    pub fn repeated(repeat: u32) -> Self {
        Self {
            invert_rows: None,
            repeat,
        }
    }

    /// Source row feeding wire row `row` of a region starting at `r_min`
    fn source_row(&self, r_min: usize, row: usize) -> Option<usize> {
        let logical = r_min + (row - r_min) / self.repeat as usize;
        match self.invert_rows {
            Some(n) => (n as usize).checked_sub(1)?.checked_sub(logical),
            None => Some(logical),
        }
    }
}

/// Encode one region of `source` into `out`
///
/// On error `out` is left empty: the caller has nothing to send.
pub fn pack_region<T: Element>(
    channel: i16,
    rect: RegionRect,
    source: &StridedView<'_, T>,
    options: PackOptions,
    out: &mut Vec<u8>,
) -> Result<()> {
    out.clear();
    if !rect.is_ordered() {
        return Err(Error::InvalidParameter(format!(
            "region bounds out of order: {:?}",
            rect
        )));
    }
    if options.repeat == 0 {
        return Err(Error::InvalidParameter("row repeat of zero".into()));
    }
    let count = rect.count();
    if count > T::MAX_REGION_VALUES {
        return Err(Error::Capacity {
            what: "region values",
            requested: count,
            limit: T::MAX_REGION_VALUES,
        });
    }

    let r_min = rect.r_min as usize;
    let r_max = rect.r_max as usize;
    let c_min = rect.c_min as usize;
    let c_max = rect.c_max as usize;
    // Source rows are monotone in the wire row, so the extremes bound them all
    let (Some(first), Some(last)) = (
        options.source_row(r_min, r_min),
        options.source_row(r_min, r_max),
    ) else {
        return Err(Error::InvalidParameter(format!(
            "rows {}..={} fall outside an inverted image of {:?} rows",
            r_min, r_max, options.invert_rows
        )));
    };
    if !source.covers(c_max, first.max(last)) {
        return Err(Error::InvalidParameter(format!(
            "source buffer does not cover columns ..={} rows ..={}",
            c_max,
            first.max(last)
        )));
    }

    out.reserve(REGION_WIRE_HEADER_LEN + count * T::SIZE);
    RegionHeader {
        channel,
        rect,
        value_type: T::VALUE_TYPE,
    }
    .encode(out);

    let mut cell = [0u8; 4];
    for row in r_min..=r_max {
        let Some(src) = options.source_row(r_min, row) else {
            continue;
        };
        for value in source.row(src, c_min, c_max) {
            value.write_wire(&mut cell[..T::SIZE]);
            out.extend_from_slice(&cell[..T::SIZE]);
        }
    }
    Ok(())
}

/// Borrowed view of one received region
///
/// Valid only while the payload it was parsed from is alive, which for
/// listeners means the duration of the callback.
#[derive(Debug, Clone, Copy)]
pub struct Region<'a> {
    header: RegionHeader,
    values: &'a [u8],
}

impl<'a> Region<'a> {
    /// Parse a region payload without copying its values
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let header = RegionHeader::decode(payload)?;
        if !header.rect.is_ordered() {
            return Err(Error::ProtocolOrder(format!(
                "region bounds out of order: {:?}",
                header.rect
            )));
        }
        let size = header.value_type.size();
        if size == 0 {
            return Err(Error::ProtocolOrder("region of unknown value type".into()));
        }
        let values = &payload[REGION_WIRE_HEADER_LEN..];
        let expected = header.rect.count() * size;
        if values.len() != expected {
            return Err(Error::ProtocolOrder(format!(
                "region carries {} value bytes, bounds imply {}",
                values.len(),
                expected
            )));
        }
        Ok(Self { header, values })
    }

    pub fn header(&self) -> &RegionHeader {
        &self.header
    }

    pub fn channel(&self) -> i16 {
        self.header.channel
    }

    pub fn rect(&self) -> RegionRect {
        self.header.rect
    }

    pub fn value_type(&self) -> ValueType {
        self.header.value_type
    }

    /// Number of values
    pub fn len(&self) -> usize {
        self.header.rect.count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wire bytes of the values, row-major, little-endian
    pub fn raw_values(&self) -> &'a [u8] {
        self.values
    }

    fn offset(&self, col: u16, row: u16) -> Option<usize> {
        let r = &self.header.rect;
        if col < r.c_min || col > r.c_max || row < r.r_min || row > r.r_max {
            return None;
        }
        Some((col - r.c_min) as usize + (row - r.r_min) as usize * r.width())
    }

    /// Raw value at image coordinates `(col, row)`
    ///
    /// `None` if the point is outside the region or `T` is not the region's
    /// value type; no transcoding is done.
    pub fn read_unscaled_pixel<T: Element>(&self, col: u16, row: u16) -> Option<T> {
        if T::VALUE_TYPE != self.header.value_type {
            return None;
        }
        let at = self.offset(col, row)? * T::SIZE;
        Some(T::read_wire(&self.values[at..at + T::SIZE]))
    }

    /// Value at `(col, row)` converted with `scale` and `offset`
    pub fn scaled_pixel(&self, col: u16, row: u16, scale: f32, offset: f32) -> Option<f64> {
        let raw = match self.header.value_type {
            ValueType::U8 => self.read_unscaled_pixel::<u8>(col, row)?.to_f64(),
            ValueType::U16 => self.read_unscaled_pixel::<u16>(col, row)?.to_f64(),
            ValueType::F32 => self.read_unscaled_pixel::<f32>(col, row)?.to_f64(),
            ValueType::Unknown => return None,
        };
        Some(raw * scale as f64 + offset as f64)
    }

    /// Copy every value into `dest` at its image coordinates
    ///
    /// `options.repeat` writes each wire row into that many destination rows;
    /// `options.invert_rows` counts rows from the bottom of an image of that
    /// height. Nothing is written unless the whole destination rectangle fits.
    pub fn decode_unscaled_into<T: Element>(
        &self,
        dest: &mut StridedViewMut<'_, T>,
        options: PackOptions,
    ) -> Result<()> {
        if T::VALUE_TYPE != self.header.value_type {
            return Err(Error::InvalidParameter(format!(
                "region holds {:?}, asked to decode as {:?}",
                self.header.value_type,
                T::VALUE_TYPE
            )));
        }
        if options.repeat == 0 {
            return Err(Error::InvalidParameter("row repeat of zero".into()));
        }
        let r = self.header.rect;
        let repeat = options.repeat as usize;
        let dest_row = |row: usize, k: usize| -> Option<usize> {
            let flipped = match options.invert_rows {
                Some(n) => (n as usize).checked_sub(1)?.checked_sub(row)?,
                None => row,
            };
            Some(flipped * repeat + k)
        };

        let rows = [r.r_min as usize, r.r_max as usize];
        let mut far_row = 0;
        for row in rows {
            let Some(last) = dest_row(row, repeat - 1) else {
                return Err(Error::InvalidParameter(format!(
                    "row {} outside an inverted image of {:?} rows",
                    row, options.invert_rows
                )));
            };
            far_row = far_row.max(last);
        }
        if !dest.covers(r.c_max as usize, far_row) {
            return Err(Error::InvalidParameter(format!(
                "destination does not cover columns ..={} rows ..={}",
                r.c_max, far_row
            )));
        }

        let width = r.width();
        for (i, wire_row) in self.values.chunks_exact(width * T::SIZE).enumerate() {
            let row = r.r_min as usize + i;
            for k in 0..repeat {
                let Some(target) = dest_row(row, k) else {
                    continue;
                };
                for (j, cell) in wire_row.chunks_exact(T::SIZE).enumerate() {
                    dest.set(r.c_min as usize + j, target, T::read_wire(cell));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack<T: Element>(rect: RegionRect, src: &StridedView<'_, T>, opts: PackOptions) -> Vec<u8> {
        let mut out = Vec::new();
        pack_region(0, rect, src, opts, &mut out).unwrap();
        out
    }

    #[test]
    fn test_header_layout() {
        let data = [7u8; 16];
        let wire = pack(
            RegionRect::new(1, 2, 3, 4),
            &StridedView::dense(&data, 3),
            PackOptions::default(),
        );
        // Channel 0, then bounds, then type tag 1
        assert_eq!(&wire[..12], &[0, 0, 0, 1, 0, 2, 0, 3, 0, 4, 0, 1]);
        assert_eq!(wire.len(), 12 + 4);
    }

    #[test]
    fn test_read_unscaled_pixel() {
        let data: Vec<u8> = (0..16).collect();
        let wire = pack(
            RegionRect::new(0, 3, 0, 3),
            &StridedView::dense(&data, 4),
            PackOptions::default(),
        );
        let region = Region::parse(&wire).unwrap();
        assert_eq!(region.read_unscaled_pixel::<u8>(2, 1), Some(6));
        assert_eq!(region.read_unscaled_pixel::<u8>(4, 1), None);
        assert_eq!(region.read_unscaled_pixel::<u16>(2, 1), None);
        assert_eq!(region.len(), 16);
    }

    #[test]
    fn test_offset_region_reads_image_coordinates() {
        // 6x4 image, region covers columns 2..=4, rows 1..=2
        let data: Vec<u16> = (0..24).map(|v| v * 100).collect();
        let wire = pack(
            RegionRect::new(2, 4, 1, 2),
            &StridedView::dense(&data, 6),
            PackOptions::default(),
        );
        let region = Region::parse(&wire).unwrap();
        assert_eq!(region.read_unscaled_pixel::<u16>(2, 1), Some(800));
        assert_eq!(region.read_unscaled_pixel::<u16>(4, 2), Some(1600));
        assert_eq!(region.read_unscaled_pixel::<u16>(1, 1), None);
    }

    #[test]
    fn test_strided_round_trip_f32() {
        // Two interleaved channels; pack the second one
        let cols = 5;
        let rows = 3;
        let mut interleaved = vec![0f32; cols * rows * 2];
        for r in 0..rows {
            for c in 0..cols {
                interleaved[(r * cols + c) * 2 + 1] = (r * 10 + c) as f32 + 0.5;
            }
        }
        let view = StridedView::with_base(&interleaved, 1, 2, cols * 2);
        let rect = RegionRect::new(0, 4, 0, 2);
        let wire = pack(rect, &view, PackOptions::default());

        let mut dense = vec![0f32; cols * rows];
        let region = Region::parse(&wire).unwrap();
        region
            .decode_unscaled_into(&mut StridedViewMut::dense(&mut dense, cols), PackOptions::default())
            .unwrap();
        for r in 0..rows {
            for c in 0..cols {
                assert_eq!(dense[r * cols + c], view.get(c, r).unwrap());
            }
        }
    }

    #[test]
    fn test_inverted_pack_and_decode_cancel() {
        let data: Vec<u8> = (0..12).collect(); // 3 cols x 4 rows
        let wire = pack(
            RegionRect::new(0, 2, 0, 3),
            &StridedView::dense(&data, 3),
            PackOptions::inverted(4),
        );
        let region = Region::parse(&wire).unwrap();
        // Wire row 0 carries the bottom source row
        assert_eq!(region.read_unscaled_pixel::<u8>(0, 0), Some(9));

        let mut back = vec![0u8; 12];
        region
            .decode_unscaled_into(&mut StridedViewMut::dense(&mut back, 3), PackOptions::inverted(4))
            .unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_repeat_on_pack_duplicates_rows() {
        let data: Vec<u8> = (0..6).collect(); // 3 cols x 2 rows
        let wire = pack(
            RegionRect::new(0, 2, 0, 3),
            &StridedView::dense(&data, 3),
            PackOptions::repeated(2),
        );
        let region = Region::parse(&wire).unwrap();
        assert_eq!(region.raw_values(), &[0, 1, 2, 0, 1, 2, 3, 4, 5, 3, 4, 5]);
    }

    #[test]
    fn test_repeat_on_decode_upsamples() {
        let data: Vec<u16> = (0..6).collect(); // 3 cols x 2 rows
        let wire = pack(
            RegionRect::new(0, 2, 0, 1),
            &StridedView::dense(&data, 3),
            PackOptions::default(),
        );
        let region = Region::parse(&wire).unwrap();

        let mut up = vec![0u16; 12];
        region
            .decode_unscaled_into(&mut StridedViewMut::dense(&mut up, 3), PackOptions::repeated(2))
            .unwrap();
        assert_eq!(up, vec![0, 1, 2, 0, 1, 2, 3, 4, 5, 3, 4, 5]);
    }

    #[test]
    fn test_capacity_bound_is_exact() {
        let max = u16::MAX_REGION_VALUES; // 31982 = 2 * 15991
        let data = vec![1u16; max + 2];
        let mut out = Vec::new();

        let fits = RegionRect::new(0, 1, 0, (max / 2 - 1) as u16);
        assert_eq!(fits.count(), max);
        pack_region(0, fits, &StridedView::dense(&data, 2), PackOptions::default(), &mut out)
            .unwrap();
        assert_eq!(out.len(), REGION_WIRE_HEADER_LEN + max * 2);

        let one_more = RegionRect::new(0, 0, 0, max as u16);
        assert_eq!(one_more.count(), max + 1);
        let err = pack_region(
            0,
            one_more,
            &StridedView::dense(&data, 1),
            PackOptions::default(),
            &mut out,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Capacity { requested, limit, .. } if requested == max + 1 && limit == max));
        assert!(out.is_empty());
    }

    #[test]
    fn test_source_too_small() {
        let data = [0u8; 8];
        let mut out = Vec::new();
        let err = pack_region(
            0,
            RegionRect::new(0, 3, 0, 2),
            &StridedView::dense(&data, 4),
            PackOptions::default(),
            &mut out,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
        assert!(out.is_empty());
    }

    #[test]
    fn test_parse_rejects_inconsistent_length() {
        let data = [1u8; 4];
        let mut wire = pack(
            RegionRect::new(0, 1, 0, 1),
            &StridedView::dense(&data, 2),
            PackOptions::default(),
        );
        wire.push(0);
        assert!(matches!(Region::parse(&wire), Err(Error::ProtocolOrder(_))));
        assert!(Region::parse(&wire[..5]).is_err());
    }

    #[test]
    fn test_scaled_pixel() {
        let data = [10u8, 20];
        let wire = pack(
            RegionRect::new(0, 1, 0, 0),
            &StridedView::dense(&data, 2),
            PackOptions::default(),
        );
        let region = Region::parse(&wire).unwrap();
        assert_eq!(region.scaled_pixel(1, 0, 0.5, 1.0), Some(11.0));
    }
}
