//! One bird per serial port, driven as a single tracker
//!
//! The master port (sensor 0) configures the whole bus and owns reset
//! authority; slave `k` reads sensor `k` from its own port. Each
//! [`poll`](ParallelGroup::poll) advances the master, then every slave in
//! port order, then resets the whole group in that same order if any member
//! lost sync. All poses go out under the master's sender and position type.
//!
//! A slave whose port is lost stops publishing and its last pose is marked
//! stale; the group keeps running. Only a master failure fails the group.
//! Staleness is visible on the server only, through [`ParallelGroup::stale_since`]
//! and one warning per sensor. Remotes just stop receiving that sensor.

use super::protocol::MAX_SENSORS;
use super::session::{FlockSession, Role, SessionConfig};
use crate::acquisition::RecoveryLimits;
use crate::connection::SharedConnection;
use crate::core::types::{Capability, SensorPose};
use crate::core::Device;
use crate::error::{Error, Result};
use crate::tracker::PosePublisher;
use crate::transport::PortOpener;

/// Master session plus slave sessions publishing as one tracker
pub struct ParallelGroup {
    name: String,
    master: FlockSession,
    slaves: Vec<FlockSession>,
    publisher: PosePublisher,
    slave_publishers: Vec<PosePublisher>,
    last: Vec<SensorPose>,
    stale: Vec<bool>,
}

impl ParallelGroup {
    pub fn new<O>(
        name: &str,
        port: &str,
        slave_ports: &[String],
        baud: u32,
        limits: RecoveryLimits,
        opener: O,
        connection: SharedConnection,
    ) -> Result<Self>
    where
        O: PortOpener + Clone + 'static,
    {
        let sensors = slave_ports.len() + 1;
        if sensors > MAX_SENSORS {
            return Err(Error::Config(format!(
                "{}: {} sensors, at most {} are addressable",
                name, sensors, MAX_SENSORS
            )));
        }

        let member = |port: &str, role: Role, sensor: usize| SessionConfig {
            port: port.to_string(),
            baud,
            sensors: 1,
            stream: true,
            group: false,
            role,
            first_sensor: sensor as i32,
            limits,
        };
        let master = FlockSession::coordinated(
            member(
                port,
                Role::GroupMaster {
                    group_size: sensors as u8,
                },
                0,
            ),
            Box::new(opener.clone()),
        );
        let slaves = slave_ports
            .iter()
            .enumerate()
            .map(|(i, slave_port)| {
                FlockSession::coordinated(
                    member(slave_port, Role::GroupSlave, i + 1),
                    Box::new(opener.clone()),
                )
            })
            .collect();

        let publisher = PosePublisher::new(name, connection.clone());
        // Slaves have no identity of their own on the wire
        let slave_publishers = (0..slave_ports.len())
            .map(|_| {
                PosePublisher::with_ids(
                    connection.clone(),
                    publisher.sender(),
                    publisher.position_type(),
                )
            })
            .collect();

        log::info!(
            "{}: parallel flock, master {} and {} slave port(s)",
            name,
            port,
            slave_ports.len()
        );
        Ok(Self {
            name: name.to_string(),
            master,
            slaves,
            publisher,
            slave_publishers,
            last: (0..sensors)
                .map(|k| SensorPose {
                    sensor: k as i32,
                    ..SensorPose::default()
                })
                .collect(),
            stale: vec![false; sensors],
        })
    }

    /// Sensors in the group, master included
    pub fn sensors(&self) -> usize {
        self.last.len()
    }

    /// Last pose published for `sensor`
    pub fn last_pose(&self, sensor: usize) -> Option<&SensorPose> {
        self.last.get(sensor)
    }

    /// Whether `sensor`'s port was lost; its last pose will not be updated
    pub fn is_stale(&self, sensor: usize) -> bool {
        self.stale.get(sensor).copied().unwrap_or(false)
    }

    /// Timestamp of the last pose a stale sensor published
    pub fn stale_since(&self, sensor: usize) -> Option<u64> {
        self.is_stale(sensor).then(|| self.last[sensor].timestamp_us)
    }

    pub fn master(&self) -> &FlockSession {
        &self.master
    }

    pub fn slave(&self, index: usize) -> Option<&FlockSession> {
        self.slaves.get(index)
    }

    pub fn publisher(&self) -> &PosePublisher {
        &self.publisher
    }

    /// Reset the master, then every live slave, in port order
    pub fn reset_all(&mut self) -> Result<()> {
        log::info!("{}: resetting group", self.name);
        self.master.reset()?;
        for (i, slave) in self.slaves.iter_mut().enumerate() {
            if slave.is_failed() {
                continue;
            }
            if let Err(e) = slave.reset() {
                mark_stale(&self.name, &mut self.stale, &self.last, i + 1, &e);
            }
        }
        Ok(())
    }

    /// One group step, returning the number of poses published
    pub fn poll(&mut self) -> Result<usize> {
        if self.master.needs_reset() {
            self.reset_all()?;
            return Ok(0);
        }

        let mut emitted = 0;
        if let Some(poses) = self.master.poll()? {
            for pose in poses {
                self.publisher.publish(pose)?;
                self.last[0] = *pose;
                emitted += 1;
            }
        }

        for (i, slave) in self.slaves.iter_mut().enumerate() {
            let sensor = i + 1;
            if self.stale[sensor] {
                continue;
            }
            match slave.poll() {
                Ok(Some(poses)) => {
                    for pose in poses {
                        self.slave_publishers[i].publish(pose)?;
                        self.last[sensor] = *pose;
                        emitted += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => mark_stale(&self.name, &mut self.stale, &self.last, sensor, &e),
            }
        }

        let slave_lost_sync = self
            .slaves
            .iter()
            .any(|s| !s.is_failed() && s.needs_reset());
        if self.master.needs_reset() || slave_lost_sync {
            self.reset_all()?;
        }
        Ok(emitted)
    }

    /// Close slave ports, then the master's
    pub fn close(&mut self) {
        for slave in self.slaves.iter_mut().rev() {
            slave.shutdown();
        }
        self.master.shutdown();
    }
}

fn mark_stale(name: &str, stale: &mut [bool], last: &[SensorPose], sensor: usize, error: &Error) {
    if !stale[sensor] {
        log::warn!(
            "{}: sensor {} lost, last pose at {} us is now stale: {}",
            name,
            sensor,
            last[sensor].timestamp_us,
            error
        );
        stale[sensor] = true;
    }
}

impl Device for ParallelGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::ProducesPoses]
    }

    fn poll(&mut self) -> Result<usize> {
        ParallelGroup::poll(self)
    }

    fn shutdown(&mut self) -> Result<()> {
        self.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::LoopbackConnection;
    use crate::devices::flock::protocol::encode_record;
    use crate::transport::{MockPortOpener, MockTransport};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn record(x: f64) -> Vec<u8> {
        encode_record([x, 0.0, 0.0], [0.0, 0.0, 0.0, 1.0], None)
    }

    fn group(slaves: usize) -> (ParallelGroup, Vec<MockTransport>, Arc<Mutex<LoopbackConnection>>) {
        let opener = MockPortOpener::new();
        let mut ports = vec![opener.add_port("/dev/ttyM0")];
        let slave_ports: Vec<String> = (1..=slaves).map(|k| format!("/dev/ttyS{}", k)).collect();
        for p in &slave_ports {
            ports.push(opener.add_port(p));
        }
        let loopback = Arc::new(Mutex::new(LoopbackConnection::new()));
        let group = ParallelGroup::new(
            "Flock",
            "/dev/ttyM0",
            &slave_ports,
            115_200,
            RecoveryLimits::default(),
            opener,
            loopback.clone(),
        )
        .unwrap();
        (group, ports, loopback)
    }

    #[test]
    fn test_first_poll_configures_every_port() {
        let (mut group, ports, _) = group(2);
        assert_eq!(group.poll().unwrap(), 0);
        assert_eq!(ports[0].get_written(), vec![b'P', 0x32, 3, b']', b'O', 0x0A]);
        assert_eq!(ports[1].get_written(), vec![b']', b'O', 0x0A]);
        assert_eq!(ports[2].get_written(), vec![b']', b'O', 0x0A]);
    }

    #[test]
    fn test_all_sensors_share_master_identity() {
        let (mut group, ports, loopback) = group(2);
        group.poll().unwrap();
        for port in &ports {
            port.inject_read(&[0]);
        }
        group.poll().unwrap();
        for (k, port) in ports.iter().enumerate() {
            port.inject_read(&record(0.1 * (k + 1) as f64));
        }
        assert_eq!(group.poll().unwrap(), 3);

        let conn = loopback.lock();
        let sent = conn.sent_of_type(crate::tracker::POSITION_TYPE);
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|s| s.message.sender == group.publisher().sender()));
        let sensors: Vec<i32> = sent
            .iter()
            .map(|s| crate::tracker::decode_pose(&s.message.payload, 0).unwrap().sensor)
            .collect();
        assert_eq!(sensors, vec![0, 1, 2]);
    }

    #[test]
    fn test_lost_slave_keeps_last_timestamp() {
        let (mut group, ports, _) = group(2);
        group.poll().unwrap();
        for port in &ports {
            port.inject_read(&[0]);
        }
        group.poll().unwrap();
        for port in &ports {
            port.inject_read(&record(0.1));
        }
        assert_eq!(group.poll().unwrap(), 3);
        let published_at = group.last_pose(2).unwrap().timestamp_us;
        assert_eq!(group.stale_since(2), None);

        ports[2].disconnect();
        ports[0].inject_read(&record(0.2));
        ports[1].inject_read(&record(0.2));
        assert_eq!(group.poll().unwrap(), 2);
        assert_eq!(group.stale_since(2), Some(published_at));
        assert_eq!(group.stale_since(1), None);

        // Later polls neither re-mark nor touch the stale pose
        ports[0].inject_read(&record(0.3));
        assert_eq!(group.poll().unwrap(), 1);
        assert_eq!(group.stale_since(2), Some(published_at));
    }

    #[test]
    fn test_too_many_ports_rejected() {
        let slave_ports: Vec<String> = (0..MAX_SENSORS).map(|k| format!("/dev/ttyS{}", k)).collect();
        let conn: SharedConnection = Arc::new(Mutex::new(LoopbackConnection::new()));
        let result = ParallelGroup::new(
            "Flock",
            "/dev/ttyM0",
            &slave_ports,
            115_200,
            RecoveryLimits::default(),
            MockPortOpener::new(),
            conn,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
