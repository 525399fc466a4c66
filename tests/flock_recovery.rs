//! Flock acquisition against mock serial ports

use approx::assert_relative_eq;
use parking_lot::Mutex;
use setu_io::acquisition::RecoveryLimits;
use setu_io::connection::{LoopbackConnection, SharedConnection, dispatch_pending};
use setu_io::core::{Device, SensorPose};
use setu_io::devices::flock::protocol::{PHASING_BIT, encode_record};
use setu_io::devices::flock::{
    DEFAULT_BAUD, FlockTracker, ParallelGroup, SessionConfig, SessionState,
};
use setu_io::tracker::{POSITION_TYPE, TrackerRemote};
use setu_io::transport::MockPortOpener;
use std::sync::Arc;

fn record(x: f64) -> Vec<u8> {
    encode_record([x, 0.0, 0.0], [0.0, 0.0, 0.0, 1.0], None)
}

fn collect_poses(conn: &SharedConnection, name: &str) -> (TrackerRemote, Arc<Mutex<Vec<SensorPose>>>) {
    let mut remote = TrackerRemote::new(name, conn);
    let poses = Arc::new(Mutex::new(Vec::new()));
    let p = poses.clone();
    remote.on_pose(move |pose: &SensorPose| p.lock().push(*pose));
    (remote, poses)
}

#[test]
fn test_corrupted_record_resyncs_without_reset() {
    let loopback = Arc::new(Mutex::new(LoopbackConnection::new()));
    let conn: SharedConnection = loopback.clone();
    let opener = MockPortOpener::new();
    let port = opener.add_port("/dev/ttyS0");
    let mut tracker = FlockTracker::new(
        "Tracker0",
        SessionConfig::single("/dev/ttyS0", DEFAULT_BAUD),
        Box::new(opener.clone()),
        conn.clone(),
    )
    .unwrap();
    let (mut remote, poses) = collect_poses(&conn, "Tracker0");

    tracker.poll().unwrap();
    port.inject_read(&[0]);
    tracker.poll().unwrap();
    assert_eq!(tracker.session().state(), SessionState::Streaming);

    let mut corrupted = record(0.1);
    corrupted[5] |= PHASING_BIT;
    port.inject_read(&corrupted);
    port.inject_read(&record(0.3));

    let mut emitted = 0;
    for _ in 0..6 {
        emitted += tracker.poll().unwrap();
    }
    assert_eq!(emitted, 1);
    dispatch_pending(&conn, &mut [&mut remote]).unwrap();

    let poses = poses.lock();
    assert_eq!(poses.len(), 1);
    assert_relative_eq!(poses[0].position[0], 0.3, epsilon = 1e-3);
    // The stray phasing bit is tried as a record start and rejected too
    assert_eq!(tracker.session().sync_losses(), 2);
    assert_eq!(tracker.session().resets(), 1);
    assert_eq!(opener.open_count("/dev/ttyS0"), 1);
    assert_eq!(loopback.lock().sent_of_type(POSITION_TYPE).len(), 1);
}

#[test]
fn test_repeated_sync_loss_resets_port() {
    let conn: SharedConnection = Arc::new(Mutex::new(LoopbackConnection::new()));
    let opener = MockPortOpener::new();
    let port = opener.add_port("/dev/ttyS0");
    let config = SessionConfig {
        limits: RecoveryLimits {
            max_sync_failures: 2,
            resync_byte_limit: 4,
            ..RecoveryLimits::default()
        },
        ..SessionConfig::single("/dev/ttyS0", DEFAULT_BAUD)
    };
    let mut tracker = FlockTracker::new("Tracker0", config, Box::new(opener), conn).unwrap();
    tracker.poll().unwrap();
    port.inject_read(&[0]);
    tracker.poll().unwrap();

    // Line noise with no phasing bit anywhere
    port.inject_read(&[0x01; 20]);
    for _ in 0..8 {
        tracker.poll().unwrap();
    }
    assert!(tracker.session().resets() >= 2);
    assert!(!tracker.session().is_failed());
}

#[test]
fn test_parallel_slave_loss_keeps_group_running() {
    let opener = MockPortOpener::new();
    let master = opener.add_port("/dev/ttyS0");
    let slave_ports = vec!["/dev/ttyS1".to_string(), "/dev/ttyS2".to_string()];
    let slaves: Vec<_> = slave_ports.iter().map(|p| opener.add_port(p)).collect();
    let conn: SharedConnection = Arc::new(Mutex::new(LoopbackConnection::new()));
    let mut group = ParallelGroup::new(
        "Flock",
        "/dev/ttyS0",
        &slave_ports,
        115_200,
        RecoveryLimits::default(),
        opener,
        conn.clone(),
    )
    .unwrap();
    let (mut remote, poses) = collect_poses(&conn, "Flock");

    group.poll().unwrap();
    master.inject_read(&[0]);
    for slave in &slaves {
        slave.inject_read(&[0]);
    }
    group.poll().unwrap();

    master.inject_read(&record(0.1));
    slaves[0].inject_read(&record(0.2));
    slaves[1].inject_read(&record(0.3));
    assert_eq!(Device::poll(&mut group).unwrap(), 3);

    slaves[1].disconnect();
    master.inject_read(&record(0.15));
    slaves[0].inject_read(&record(0.25));
    assert_eq!(Device::poll(&mut group).unwrap(), 2);

    assert!(group.is_stale(2));
    assert!(!group.is_stale(1));
    assert_relative_eq!(group.last_pose(2).unwrap().position[0], 0.3, epsilon = 1e-3);
    assert_relative_eq!(group.last_pose(1).unwrap().position[0], 0.25, epsilon = 1e-3);

    // Still running on the remaining ports
    master.inject_read(&record(0.05));
    assert_eq!(Device::poll(&mut group).unwrap(), 1);

    dispatch_pending(&conn, &mut [&mut remote]).unwrap();
    let sensors: Vec<i32> = poses.lock().iter().map(|p| p.sensor).collect();
    assert_eq!(sensors, vec![0, 1, 2, 0, 1, 0]);

    group.shutdown().unwrap();
    assert_eq!(group.master().state(), SessionState::Disconnected);
    assert!(group.slave(1).unwrap().is_failed());
}
