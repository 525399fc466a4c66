//! Device trait definition

use crate::connection::Message;
use crate::core::types::Capability;
use crate::error::Result;

/// A polled data source owned by the [`Aggregator`](super::Aggregator)
///
/// `poll()` performs at most one bounded unit of transport I/O and must
/// return immediately when no data is ready. Returning `Err` tells the
/// aggregator the device is beyond recovery.
pub trait Device: Send {
    /// Instance name from configuration
    fn name(&self) -> &str;

    /// What this device produces
    fn capabilities(&self) -> &'static [Capability];

    /// Advance the device by one step, returning the number of messages emitted
    fn poll(&mut self) -> Result<usize>;

    /// Inbound connection traffic (pings, drops) delivered before polling
    fn on_message(&mut self, _msg: &Message) -> Result<()> {
        Ok(())
    }

    /// Release transport handles
    fn shutdown(&mut self) -> Result<()>;
}
