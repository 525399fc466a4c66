//! Device aggregator
//!
//! Owns every device of the server and drives them from one cooperative
//! tick:
//!
//! ```text
//! tick()
//!   ├─ drain inbound connection traffic → Device::on_message (live devices)
//!   └─ Device::poll() once per live device, in insertion order
//! ```
//!
//! A device whose `poll()` fails is marked [`DeviceStatus::Failed`] and
//! skipped from then on; it stays in the collection so its status remains
//! queryable. `shutdown()` tears devices down in reverse insertion order.

use crate::connection::{MAX_DISPATCH_PER_CALL, SharedConnection};
use crate::core::device::Device;
use crate::core::types::DeviceStatus;
use crate::error::Result;

struct DeviceSlot {
    device: Box<dyn Device>,
    status: DeviceStatus,
    emitted: u64,
}

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Devices polled this tick
    pub polled: usize,
    /// Messages emitted by all devices this tick
    pub emitted: usize,
    /// Devices that failed during this tick
    pub failed: usize,
    /// Inbound messages delivered before polling
    pub inbound: usize,
}

/// Heterogeneous device collection driven by a single tick
pub struct Aggregator {
    slots: Vec<DeviceSlot>,
    connection: Option<SharedConnection>,
    ticks: u64,
}

impl Aggregator {
    /// Aggregator without inbound traffic
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            connection: None,
            ticks: 0,
        }
    }

    /// Aggregator that forwards inbound messages from `connection` to devices
    pub fn with_connection(connection: SharedConnection) -> Self {
        Self {
            slots: Vec::new(),
            connection: Some(connection),
            ticks: 0,
        }
    }

    /// Take ownership of a device; returns its index
    pub fn add(&mut self, device: Box<dyn Device>) -> usize {
        log::info!(
            "Adding device {} ({:?})",
            device.name(),
            device.capabilities()
        );
        self.slots.push(DeviceSlot {
            device,
            status: DeviceStatus::Live,
            emitted: 0,
        });
        self.slots.len() - 1
    }

    /// Run one tick
    pub fn tick(&mut self) -> TickSummary {
        self.ticks += 1;
        let mut summary = TickSummary {
            inbound: self.deliver_inbound(),
            ..TickSummary::default()
        };

        for slot in self.slots.iter_mut().filter(|s| s.status.is_live()) {
            summary.polled += 1;
            match slot.device.poll() {
                Ok(n) => {
                    summary.emitted += n;
                    slot.emitted += n as u64;
                }
                Err(e) => {
                    log::error!("Device {} failed: {}", slot.device.name(), e);
                    slot.status = DeviceStatus::Failed(e.to_string());
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    fn deliver_inbound(&mut self) -> usize {
        let Some(connection) = &self.connection else {
            return 0;
        };
        let mut delivered = 0;
        while delivered < MAX_DISPATCH_PER_CALL {
            let msg = match connection.lock().poll_incoming() {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Connection poll failed: {}", e);
                    break;
                }
            };
            delivered += 1;
            for slot in self.slots.iter_mut().filter(|s| s.status.is_live()) {
                if let Err(e) = slot.device.on_message(&msg) {
                    log::warn!("Device {} dropped a message: {}", slot.device.name(), e);
                }
            }
        }
        delivered
    }

    /// Status of the device at `index`
    pub fn status(&self, index: usize) -> Option<&DeviceStatus> {
        self.slots.get(index).map(|s| &s.status)
    }

    /// `(name, status)` of every device in insertion order
    pub fn statuses(&self) -> impl Iterator<Item = (&str, &DeviceStatus)> {
        self.slots.iter().map(|s| (s.device.name(), &s.status))
    }

    /// Messages emitted by the device at `index` since it was added
    pub fn emitted(&self, index: usize) -> Option<u64> {
        self.slots.get(index).map(|s| s.emitted)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Devices still being polled
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.status.is_live()).count()
    }

    /// Ticks run so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Tear down every device in reverse insertion order and release them
    ///
    /// Every device is shut down even if an earlier one fails; the first
    /// error is returned.
    pub fn shutdown(&mut self) -> Result<()> {
        let mut first_error = None;
        for slot in self.slots.iter_mut().rev() {
            log::info!("Shutting down device {}", slot.device.name());
            if let Err(e) = slot.device.shutdown() {
                log::error!("Shutdown of {} failed: {}", slot.device.name(), e);
                first_error.get_or_insert(e);
            }
            slot.status = DeviceStatus::Shutdown;
        }
        self.slots.clear();
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        if !self.slots.is_empty()
            && let Err(e) = self.shutdown()
        {
            log::warn!("Aggregator dropped with failing shutdown: {}", e);
        }
    }
}
