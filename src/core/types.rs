//! Core data types shared by devices and protocol endpoints.
//!
//! Key types for device implementers:
//! - [`Capability`]: what kind of data a device produces
//! - [`SensorPose`]: one tracked sensor's position and orientation
//! - [`DeviceStatus`]: aggregator-visible health of a device

/// Kinds of data a device can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    ProducesPoses,
    ProducesAnalogSamples,
    ProducesButtons,
    ProducesImageRegions,
}

/// Pose of one tracked sensor
///
/// Position is in meters, orientation is a unit quaternion stored as
/// `[x, y, z, w]`. The timestamp is the moment the first byte of the
/// originating report was read from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorPose {
    pub sensor: i32,
    pub position: [f64; 3],
    pub orientation: [f64; 4],
    pub timestamp_us: u64,
}

/// Health of a device as tracked by the aggregator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Polled every tick
    Live,
    /// Reported an unrecoverable fault; skipped on later ticks
    Failed(String),
    /// Torn down by `shutdown()`
    Shutdown,
}

impl DeviceStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, DeviceStatus::Live)
    }
}

/// Microseconds since the Unix epoch
pub fn timestamp_us() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pose_is_identity_at_origin() {
        let pose = SensorPose::default();
        assert_eq!(pose.position, [0.0; 3]);
        assert_eq!(pose.timestamp_us, 0);
    }

    #[test]
    fn test_timestamp_monotonic_enough() {
        let a = timestamp_us();
        let b = timestamp_us();
        assert!(b >= a);
        assert!(a > 1_600_000_000_000_000);
    }

    #[test]
    fn test_status_liveness() {
        assert!(DeviceStatus::Live.is_live());
        assert!(!DeviceStatus::Failed("port lost".into()).is_live());
        assert!(!DeviceStatus::Shutdown.is_live());
    }
}
