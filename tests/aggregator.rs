//! Heterogeneous devices under one aggregator

use parking_lot::Mutex;
use setu_io::config::Config;
use setu_io::connection::{LoopbackConnection, Message, SharedConnection};
use setu_io::core::{Aggregator, Capability, Device, DeviceStatus};
use setu_io::devices::create_device_with;
use setu_io::error::{Error, Result};
use setu_io::imager::{ImagerRemote, REGION_TYPE};
use setu_io::transport::MockPortOpener;
use std::sync::Arc;

/// Emits `per_poll` messages each tick, failing on poll number `fail_at`
struct Scripted {
    name: String,
    per_poll: usize,
    fail_at: Option<usize>,
    polls: usize,
    log: Arc<Mutex<Vec<String>>>,
}

impl Scripted {
    fn new(name: &str, per_poll: usize, fail_at: Option<usize>, log: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            per_poll,
            fail_at,
            polls: 0,
            log: log.clone(),
        }
    }
}

impl Device for Scripted {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::ProducesAnalogSamples]
    }

    fn poll(&mut self) -> Result<usize> {
        self.polls += 1;
        if self.fail_at == Some(self.polls) {
            return Err(Error::DeviceFailed(format!("{} unplugged", self.name)));
        }
        Ok(self.per_poll)
    }

    fn on_message(&mut self, msg: &Message) -> Result<()> {
        self.log
            .lock()
            .push(format!("{} got {} bytes", self.name, msg.payload.len()));
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.log.lock().push(format!("{} after {} polls", self.name, self.polls));
        Ok(())
    }
}

#[test]
fn test_failed_device_is_skipped_and_others_continue() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut aggregator = Aggregator::new();
    aggregator.add(Box::new(Scripted::new("A", 1, None, &log)));
    aggregator.add(Box::new(Scripted::new("B", 2, Some(2), &log)));
    aggregator.add(Box::new(Scripted::new("C", 3, None, &log)));

    let first = aggregator.tick();
    assert_eq!((first.polled, first.emitted, first.failed), (3, 6, 0));

    let second = aggregator.tick();
    assert_eq!((second.polled, second.emitted, second.failed), (3, 4, 1));
    assert!(matches!(aggregator.status(1), Some(DeviceStatus::Failed(_))));

    let third = aggregator.tick();
    assert_eq!((third.polled, third.emitted), (2, 4));
    assert_eq!(aggregator.live_count(), 2);
    assert_eq!(aggregator.emitted(1), Some(2));

    aggregator.shutdown().unwrap();
    assert_eq!(
        *log.lock(),
        vec!["C after 3 polls", "B after 2 polls", "A after 3 polls"]
    );
    assert!(aggregator.is_empty());
}

#[test]
fn test_configured_devices_share_one_connection() {
    let config = Config::parse(
        r#"
[[device]]
name = "Tracker0"
type = "flock"
port = "/dev/ttyS0"

[[device]]
name = "Pattern"
type = "imager_pattern"
cols = 32
rows = 16
"#,
    )
    .unwrap();

    let loopback = Arc::new(Mutex::new(LoopbackConnection::new()));
    let conn: SharedConnection = loopback.clone();
    let opener = MockPortOpener::new();
    opener.add_port("/dev/ttyS0");

    let mut aggregator = Aggregator::with_connection(conn.clone());
    for device in &config.devices {
        aggregator.add(create_device_with(device, conn.clone(), opener.clone()).unwrap());
    }
    assert_eq!(aggregator.len(), 2);

    // The remote's ping is delivered to the imager on the next tick
    let _remote = ImagerRemote::new("Pattern", &conn).unwrap();
    let summary = aggregator.tick();
    assert!(summary.inbound >= 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(opener.open_count("/dev/ttyS0"), 1);

    let names: Vec<&str> = aggregator.statuses().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["Tracker0", "Pattern"]);
    assert!(!loopback.lock().sent_of_type(REGION_TYPE).is_empty());

    aggregator.shutdown().unwrap();
}

#[test]
fn test_inbound_messages_reach_live_devices() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let loopback = Arc::new(Mutex::new(LoopbackConnection::new()));
    loopback.lock().simulate_drop();
    let conn: SharedConnection = loopback;

    let mut aggregator = Aggregator::with_connection(conn);
    aggregator.add(Box::new(Scripted::new("A", 0, None, &log)));
    let summary = aggregator.tick();
    assert_eq!(summary.inbound, 1);
    assert_eq!(aggregator.ticks(), 1);
    assert_eq!(*log.lock(), vec!["A got 0 bytes"]);
}
