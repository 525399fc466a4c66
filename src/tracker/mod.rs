//! Tracker pose messages
//!
//! # Wire Format
//!
//! One `Tracker Pos_Quat` message per sensor report, big-endian:
//!
//! ```text
//! ┌────────────┬─────────┬──────────────────┬──────────────────────┐
//! │ sensor i32 │ pad i32 │ position 3 × f64 │ orientation 4 × f64  │
//! └────────────┴─────────┴──────────────────┴──────────────────────┘
//! ```
//!
//! Orientation is `[x, y, z, w]`. The message timestamp is the pose's
//! acquisition timestamp.
//!
//! A [`PosePublisher`] is just a sender id and a message type id on a
//! shared connection, so several acquisition sessions can publish under one
//! tracker identity by holding clones of the same publisher.

use crate::connection::{
    Connection, DeliveryClass, Message, MessageSink, MessageTypeId, SenderId, SharedConnection,
};
use crate::core::listeners::{ListenerControl, ListenerList, ListenerToken};
use crate::core::types::SensorPose;
use crate::error::{Error, Result};

/// Message type name for pose reports
pub const POSITION_TYPE: &str = "Tracker Pos_Quat";

/// Encoded size of one pose
pub const POSE_PAYLOAD_LEN: usize = 4 + 4 + 3 * 8 + 4 * 8;

/// Encode `pose` into `out`
pub fn encode_pose(pose: &SensorPose, out: &mut [u8; POSE_PAYLOAD_LEN]) {
    out[0..4].copy_from_slice(&pose.sensor.to_be_bytes());
    out[4..8].copy_from_slice(&0i32.to_be_bytes());
    let values = pose.position.iter().chain(pose.orientation.iter());
    for (i, value) in values.enumerate() {
        let at = 8 + i * 8;
        out[at..at + 8].copy_from_slice(&value.to_be_bytes());
    }
}

/// Decode a pose payload stamped with `timestamp_us`
pub fn decode_pose(payload: &[u8], timestamp_us: u64) -> Result<SensorPose> {
    if payload.len() != POSE_PAYLOAD_LEN {
        return Err(Error::ProtocolOrder(format!(
            "pose payload of {} bytes, expected {}",
            payload.len(),
            POSE_PAYLOAD_LEN
        )));
    }
    let f64_at = |i: usize| {
        let at = 8 + i * 8;
        let mut word = [0u8; 8];
        word.copy_from_slice(&payload[at..at + 8]);
        f64::from_be_bytes(word)
    };
    Ok(SensorPose {
        sensor: i32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
        position: [f64_at(0), f64_at(1), f64_at(2)],
        orientation: [f64_at(3), f64_at(4), f64_at(5), f64_at(6)],
        timestamp_us,
    })
}

/// Publishes poses under one tracker identity
#[derive(Clone)]
pub struct PosePublisher {
    connection: SharedConnection,
    sender: SenderId,
    position_type: MessageTypeId,
}

impl PosePublisher {
    /// Register `name` as a tracker on `connection`
    pub fn new(name: &str, connection: SharedConnection) -> Self {
        let (sender, position_type) = {
            let mut conn = connection.lock();
            (
                conn.register_sender(name),
                conn.register_message_type(POSITION_TYPE),
            )
        };
        Self {
            connection,
            sender,
            position_type,
        }
    }

    /// Publisher reusing ids that were registered elsewhere
    pub fn with_ids(
        connection: SharedConnection,
        sender: SenderId,
        position_type: MessageTypeId,
    ) -> Self {
        Self {
            connection,
            sender,
            position_type,
        }
    }

    pub fn sender(&self) -> SenderId {
        self.sender
    }

    pub fn position_type(&self) -> MessageTypeId {
        self.position_type
    }

    /// Send one pose, stamped with its acquisition time
    pub fn publish(&self, pose: &SensorPose) -> Result<()> {
        let mut payload = [0u8; POSE_PAYLOAD_LEN];
        encode_pose(pose, &mut payload);
        self.connection.lock().send(
            self.sender,
            self.position_type,
            pose.timestamp_us,
            &payload,
            DeliveryClass::LowLatency,
        )
    }
}

/// Receives decoded poses
pub trait PoseListener: Send {
    fn on_pose(&mut self, pose: &SensorPose);
}

impl<F> PoseListener for F
where
    F: FnMut(&SensorPose) + Send,
{
    fn on_pose(&mut self, pose: &SensorPose) {
        self(pose)
    }
}

/// Client side of a named tracker
pub struct TrackerRemote {
    sender: SenderId,
    position_type: MessageTypeId,
    listeners: ListenerList<dyn PoseListener>,
}

impl TrackerRemote {
    /// Listen for poses from tracker `name`
    pub fn new(name: &str, connection: &SharedConnection) -> Self {
        let mut conn = connection.lock();
        Self {
            sender: conn.register_sender(name),
            position_type: conn.register_message_type(POSITION_TYPE),
            listeners: ListenerList::new(),
        }
    }

    pub fn register_listener(&mut self, listener: Box<dyn PoseListener>) -> ListenerToken {
        self.listeners.register(listener)
    }

    /// Register a closure
    pub fn on_pose<F>(&mut self, f: F) -> ListenerToken
    where
        F: FnMut(&SensorPose) + Send + 'static,
    {
        self.listeners.register(Box::new(f))
    }

    pub fn unregister_listener(&mut self, token: ListenerToken) -> bool {
        self.listeners.unregister(token)
    }

    pub fn listener_control(&self) -> ListenerControl<dyn PoseListener> {
        self.listeners.control()
    }
}

impl MessageSink for TrackerRemote {
    fn on_message(&mut self, msg: &Message) -> Result<()> {
        if msg.sender != self.sender || msg.message_type != self.position_type {
            return Ok(());
        }
        let pose = decode_pose(&msg.payload, msg.timestamp_us)?;
        self.listeners.dispatch(|l| l.on_pose(&pose));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{LoopbackConnection, dispatch_pending};
    use approx::assert_relative_eq;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn sample_pose() -> SensorPose {
        SensorPose {
            sensor: 2,
            position: [0.25, -0.5, 0.125],
            orientation: [0.0, 0.0, 0.70710678, 0.70710678],
            timestamp_us: 1_000,
        }
    }

    #[test]
    fn test_pose_payload_layout() {
        let mut payload = [0u8; POSE_PAYLOAD_LEN];
        encode_pose(&sample_pose(), &mut payload);
        assert_eq!(payload.len(), 64);
        assert_eq!(&payload[0..8], &[0, 0, 0, 2, 0, 0, 0, 0]);
        assert_eq!(&payload[8..16], &0.25f64.to_be_bytes());

        let decoded = decode_pose(&payload, 1_000).unwrap();
        assert_eq!(decoded, sample_pose());
    }

    #[test]
    fn test_short_payload_rejected() {
        assert!(matches!(
            decode_pose(&[0u8; 10], 0),
            Err(Error::ProtocolOrder(_))
        ));
    }

    #[test]
    fn test_remote_receives_published_pose() {
        let conn: SharedConnection = Arc::new(Mutex::new(LoopbackConnection::new()));
        let publisher = PosePublisher::new("Tracker0", conn.clone());
        let mut remote = TrackerRemote::new("Tracker0", &conn);
        let mut other = TrackerRemote::new("Tracker1", &conn);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        remote.on_pose(move |pose: &SensorPose| sink.lock().push(*pose));
        let stray = Arc::new(Mutex::new(0usize));
        let stray_sink = stray.clone();
        other.on_pose(move |_: &SensorPose| *stray_sink.lock() += 1);

        publisher.publish(&sample_pose()).unwrap();
        dispatch_pending(&conn, &mut [&mut remote, &mut other]).unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].sensor, 2);
        assert_eq!(seen[0].timestamp_us, 1_000);
        assert_relative_eq!(seen[0].orientation[3], 0.70710678);
        assert_eq!(*stray.lock(), 0);
    }

    #[test]
    fn test_cloned_publisher_shares_identity() {
        let conn: SharedConnection = Arc::new(Mutex::new(LoopbackConnection::new()));
        let master = PosePublisher::new("Flock", conn.clone());
        let slave = PosePublisher::with_ids(conn.clone(), master.sender(), master.position_type());
        assert_eq!(slave.sender(), master.sender());
        assert_eq!(slave.position_type(), master.position_type());
    }
}
