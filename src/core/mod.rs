//! Core abstractions: devices, their aggregator, listener lists

pub mod aggregator;
pub mod device;
pub mod listeners;
pub mod types;

pub use aggregator::{Aggregator, TickSummary};
pub use device::Device;
pub use listeners::{ListenerControl, ListenerList, ListenerToken};
pub use types::{Capability, DeviceStatus, SensorPose, timestamp_us};
