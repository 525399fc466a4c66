//! Flock of Birds serial protocol
//!
//! # Position/Quaternion Record (14 bytes)
//!
//! ```text
//! ┌──────┬──────┬──────┬──────┬──────┬──────┬──────┐
//! │  X   │  Y   │  Z   │  Q0  │  Q1  │  Q2  │  Q3  │  7 words, LSB byte first
//! └──────┴──────┴──────┴──────┴──────┴──────┴──────┘
//! ```
//!
//! Every byte carries 7 data bits. Bit 7 is the phasing bit: set on the
//! first byte of a record and clear on every other byte, which is the only
//! framing the hardware provides. In group mode each record is followed by
//! the bird's bus address (one more byte, phasing bit clear) and one report
//! carries the records of all birds in address order.
//!
//! A word is `((msb << 7) | lsb) << 2` read as `i16`; full scale is
//! 36 inches for position and 1.0 for quaternion components.

use crate::acquisition::{FrameFault, FrameFormat};

/// Birds addressable in normal addressing mode
pub const MAX_SENSORS: usize = 13;

/// Factory default baud rate
pub const DEFAULT_BAUD: u32 = 38_400;

/// Bytes in one position/quaternion record
pub const RECORD_LEN: usize = 14;

/// Record plus address byte, as sent in group mode
pub const GROUP_RECORD_LEN: usize = RECORD_LEN + 1;

/// Marks the first byte of a record
pub const PHASING_BIT: u8 = 0x80;

/// Position full scale in meters (36 inches)
pub const POSITION_FULL_SCALE_M: f64 = 36.0 * 0.0254;

const WORD_FULL_SCALE: f64 = 32768.0;

/// Host commands
pub mod command {
    /// Report position and quaternion
    pub const POSITION_QUATERNION: u8 = b']';
    /// Start streaming reports
    pub const STREAM: u8 = b'@';
    /// Request one report
    pub const POINT: u8 = b'B';
    /// Prefix routing the next command to one bird: `RS232_TO_FBB + address`
    pub const RS232_TO_FBB: u8 = 0xF0;
    /// Examine error code; the reply is one byte, zero when healthy
    pub const EXAMINE_ERROR: [u8; 2] = [b'O', 0x0A];
    /// Examine expanded error; the reply is the code and the bird address
    pub const EXPANDED_ERROR: [u8; 2] = [b'O', 0x10];
    /// Enable group report mode
    pub const GROUP_MODE: [u8; 3] = [b'P', 0x23, 1];

    /// Configure the bus for `birds` units
    pub fn autoconfig(birds: u8) -> [u8; 3] {
        [b'P', 0x32, birds]
    }

    /// Route `command` to bird `address`
    pub fn addressed(address: u8, command: u8) -> [u8; 2] {
        [RS232_TO_FBB.wrapping_add(address), command]
    }
}

/// Report layout of one port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlockFormat {
    /// Birds reporting on this port
    pub sensors: usize,
    /// Whether reports are group reports
    pub group: bool,
}

impl FlockFormat {
    pub fn single() -> Self {
        Self {
            sensors: 1,
            group: false,
        }
    }

    pub fn group(sensors: usize) -> Self {
        Self {
            sensors,
            group: true,
        }
    }

    /// Bytes per bird record
    pub fn record_len(&self) -> usize {
        if self.group {
            GROUP_RECORD_LEN
        } else {
            RECORD_LEN
        }
    }

    /// Split a validated report into per-bird records of [`RECORD_LEN`] bytes
    pub fn records<'a>(&self, report: &'a [u8]) -> impl Iterator<Item = &'a [u8]> + 'a {
        report
            .chunks_exact(self.record_len())
            .map(|chunk| &chunk[..RECORD_LEN])
    }
}

impl FrameFormat for FlockFormat {
    fn report_len(&self) -> usize {
        if self.group {
            self.sensors * GROUP_RECORD_LEN
        } else {
            RECORD_LEN
        }
    }

    fn is_frame_start(&self, byte: u8) -> bool {
        byte & PHASING_BIT != 0
    }

    fn validate(&self, report: &[u8]) -> Result<(), FrameFault> {
        let record_len = self.record_len();
        for (k, record) in report.chunks(record_len).enumerate() {
            let base = k * record_len;
            for (i, &byte) in record.iter().enumerate() {
                let phasing = byte & PHASING_BIT != 0;
                if phasing != (i == 0) {
                    return Err(FrameFault::Phasing { offset: base + i });
                }
            }
            if self.group {
                let expected = k as u8 + 1;
                let found = record[RECORD_LEN] & !PHASING_BIT;
                if found != expected {
                    return Err(FrameFault::Address { expected, found });
                }
            }
        }
        Ok(())
    }
}

fn decode_word(lsb: u8, msb: u8) -> i16 {
    let raw = ((msb & 0x7F) as u16) << 7 | (lsb & 0x7F) as u16;
    (raw << 2) as i16
}

fn encode_word(value: i16) -> [u8; 2] {
    let raw = (value as u16) >> 2;
    [(raw & 0x7F) as u8, ((raw >> 7) & 0x7F) as u8]
}

/// Position (meters) and orientation `[x, y, z, w]` of one record
pub fn decode_record(record: &[u8]) -> ([f64; 3], [f64; 4]) {
    let mut words = [0.0f64; 7];
    for (i, word) in words.iter_mut().enumerate() {
        *word = decode_word(record[2 * i], record[2 * i + 1]) as f64 / WORD_FULL_SCALE;
    }
    let position = [
        words[0] * POSITION_FULL_SCALE_M,
        words[1] * POSITION_FULL_SCALE_M,
        words[2] * POSITION_FULL_SCALE_M,
    ];
    // Q0 is the scalar part
    let orientation = [words[4], words[5], words[6], words[3]];
    (position, orientation)
}

/// Build a record the way a bird sends it
///
/// `address` appends the group-mode address byte. Values are quantized to
/// the hardware's 14-bit resolution.
pub fn encode_record(position: [f64; 3], orientation: [f64; 4], address: Option<u8>) -> Vec<u8> {
    let quantize = |v: f64| (v * WORD_FULL_SCALE).round().clamp(-32768.0, 32767.0) as i16;
    let words = [
        quantize(position[0] / POSITION_FULL_SCALE_M),
        quantize(position[1] / POSITION_FULL_SCALE_M),
        quantize(position[2] / POSITION_FULL_SCALE_M),
        quantize(orientation[3]),
        quantize(orientation[0]),
        quantize(orientation[1]),
        quantize(orientation[2]),
    ];
    let mut out = Vec::with_capacity(GROUP_RECORD_LEN);
    for word in words {
        out.extend_from_slice(&encode_word(word));
    }
    out[0] |= PHASING_BIT;
    if let Some(address) = address {
        out.push(address & !PHASING_BIT);
    }
    out
}

/// Text for an examine-error code
pub fn error_text(code: u8) -> &'static str {
    match code {
        0 => "no error",
        1 => "system RAM failure",
        2 => "non-volatile storage write failure",
        3 => "PCB configuration data corrupt",
        4 => "transmitter calibration data corrupt or not connected",
        5 => "receiver calibration data corrupt or not connected",
        6 => "invalid RS232 command",
        7 => "not an FBB master",
        8 => "no birds accessible in device list",
        9 => "bird is not initialized",
        10 => "FBB receive error, intra bird bus",
        11 => "RS232 receive error",
        12 => "FBB receive error, FBB host bus",
        13 => "no FBB command response",
        14 => "invalid FBB host command",
        15 => "FBB run time error",
        16 => "invalid CPU speed",
        17 => "no FBB data",
        18 => "illegal baud rate",
        19 => "slave acknowledge error",
        20 => "CPU divide error",
        21 => "CPU single step",
        22 => "CPU breakpoint",
        23 => "CPU non-maskable interrupt",
        24 => "CPU overflow",
        25 => "CPU array bounds",
        26 => "CPU unused opcode",
        27 => "CPU escape opcode",
        28 => "reserved interrupt 9",
        29 => "reserved interrupt 10",
        30 => "reserved interrupt 11",
        31 => "numeric CPU error",
        32 => "CRT synchronization error",
        33 => "transmitter not active",
        34 => "extended range transmitter not attached",
        35 => "CPU time overflow",
        _ => "unknown error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_word_round_trip() {
        for v in [0i16, 4, -4, 8188, -8192 * 4, 32764] {
            let [lsb, msb] = encode_word(v);
            assert_eq!(lsb & PHASING_BIT, 0);
            assert_eq!(msb & PHASING_BIT, 0);
            assert_eq!(decode_word(lsb, msb), v);
        }
    }

    #[test]
    fn test_record_decodes_to_meters_and_xyzw() {
        let record = encode_record([0.3, -0.1, 0.05], [0.0, 0.0, 0.6, 0.8], None);
        assert_eq!(record.len(), RECORD_LEN);
        assert!(FlockFormat::single().validate(&record).is_ok());

        let (position, orientation) = decode_record(&record);
        assert_abs_diff_eq!(position[0], 0.3, epsilon = 1e-4);
        assert_abs_diff_eq!(position[1], -0.1, epsilon = 1e-4);
        assert_abs_diff_eq!(orientation[2], 0.6, epsilon = 1e-3);
        assert_abs_diff_eq!(orientation[3], 0.8, epsilon = 1e-3);
    }

    #[test]
    fn test_phasing_violation_detected() {
        let mut record = encode_record([0.1; 3], [0.0, 0.0, 0.0, 1.0], None);
        record[5] |= PHASING_BIT;
        assert_eq!(
            FlockFormat::single().validate(&record),
            Err(FrameFault::Phasing { offset: 5 })
        );
    }

    #[test]
    fn test_group_report_addresses() {
        let format = FlockFormat::group(2);
        let mut report = encode_record([0.1; 3], [0.0, 0.0, 0.0, 1.0], Some(1));
        report.extend(encode_record([0.2; 3], [0.0, 0.0, 0.0, 1.0], Some(2)));
        assert_eq!(report.len(), format.report_len());
        assert!(format.validate(&report).is_ok());
        assert_eq!(format.records(&report).count(), 2);

        report[29] = 3;
        assert_eq!(
            format.validate(&report),
            Err(FrameFault::Address {
                expected: 2,
                found: 3
            })
        );
    }

    #[test]
    fn test_commands() {
        assert_eq!(command::autoconfig(3), [b'P', 0x32, 3]);
        assert_eq!(command::addressed(2, command::POSITION_QUATERNION), [0xF2, b']']);
    }

    #[test]
    fn test_error_text() {
        assert_eq!(error_text(6), "invalid RS232 command");
        assert_eq!(error_text(35), "CPU time overflow");
        assert_eq!(error_text(99), "unknown error");
    }
}
