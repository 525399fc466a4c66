//! One Flock serial port as a resettable state machine
//!
//! ```text
//! Disconnected ──reset()──▶ Configuring ──ack 0──▶ Streaming ◀──resync──┐
//!      ▲                     │ error code           │ framing fault     │
//!      │                     ▼                      ▼                   │
//!      └── transport fault ─ AwaitExpanded     ErrorRecovering ─────────┘
//!                                                   │ too many sync failures
//!                                                   ▼
//!                                                reset() ── too many resets ──▶ Failed
//! ```
//!
//! `poll()` never blocks: it performs one non-blocking read and advances the
//! machine as far as the buffered bytes allow, yielding at most one report.

use super::protocol::{FlockFormat, command, decode_record, error_text};
use crate::acquisition::{Framer, NextReport, RateWindow, RecoveryLimits, Resync};
use crate::core::types::SensorPose;
use crate::error::{Error, Result};
use crate::transport::{PortOpener, Transport};

/// Where the session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No open port, or the port was lost
    Disconnected,
    /// Setup sent, waiting for the hardware
    Configuring(ConfigStep),
    Streaming,
    /// Framing lost; scanning for the next record start
    ErrorRecovering,
    /// Gave up after repeated failed resets
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStep {
    /// Waiting for the examine-error reply
    AwaitAck,
    /// Waiting for the expanded error code and bird address
    AwaitExpanded,
}

/// Position of this port in its flock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// All birds on this one port
    Standalone,
    /// Master of a one-port-per-bird flock of `group_size` birds
    GroupMaster { group_size: u8 },
    /// One bird of a parallel flock; its master configures the bus
    GroupSlave,
}

/// Static parameters of a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub port: String,
    pub baud: u32,
    /// Birds reporting on this port
    pub sensors: usize,
    pub stream: bool,
    pub group: bool,
    pub role: Role,
    /// Sensor index of the first bird on this port
    pub first_sensor: i32,
    pub limits: RecoveryLimits,
}

impl SessionConfig {
    /// Single bird on one port, streaming
    pub fn single(port: &str, baud: u32) -> Self {
        Self {
            port: port.to_string(),
            baud,
            sensors: 1,
            stream: true,
            group: false,
            role: Role::Standalone,
            first_sensor: 0,
            limits: RecoveryLimits::default(),
        }
    }

    fn format(&self) -> FlockFormat {
        if self.group {
            FlockFormat::group(self.sensors)
        } else {
            FlockFormat::single()
        }
    }
}

/// Acquisition session bound to one serial port
pub struct FlockSession {
    config: SessionConfig,
    format: FlockFormat,
    opener: Box<dyn PortOpener>,
    transport: Option<Box<dyn Transport>>,
    framer: Framer,
    state: SessionState,
    /// Reset on its own when recovery demands it
    auto_reset: bool,
    reset_requested: bool,
    ack_polls: u32,
    sync_failures: u32,
    failed_resets: u32,
    resets: u64,
    sync_losses: u64,
    rate: RateWindow,
    poses: Vec<SensorPose>,
}

impl FlockSession {
    /// Session that resets itself whenever recovery requires it
    pub fn new(config: SessionConfig, opener: Box<dyn PortOpener>) -> Self {
        Self::build(config, opener, true)
    }

    /// Session whose resets are driven by an owner via [`reset`](Self::reset)
    pub fn coordinated(config: SessionConfig, opener: Box<dyn PortOpener>) -> Self {
        Self::build(config, opener, false)
    }

    fn build(config: SessionConfig, opener: Box<dyn PortOpener>, auto_reset: bool) -> Self {
        let format = config.format();
        let poses = (0..config.sensors)
            .map(|k| SensorPose {
                sensor: config.first_sensor + k as i32,
                ..SensorPose::default()
            })
            .collect();
        Self {
            config,
            format,
            opener,
            transport: None,
            framer: Framer::new(),
            state: SessionState::Disconnected,
            auto_reset,
            reset_requested: false,
            ack_polls: 0,
            sync_failures: 0,
            failed_resets: 0,
            resets: 0,
            sync_losses: 0,
            rate: RateWindow::default(),
            poses,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn port(&self) -> &str {
        &self.config.port
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Resets performed, including the initial connect
    pub fn resets(&self) -> u64 {
        self.resets
    }

    /// Framing faults seen
    pub fn sync_losses(&self) -> u64 {
        self.sync_losses
    }

    /// Valid reports decoded since creation
    pub fn reports(&self) -> u64 {
        self.rate.total()
    }

    /// Reports per second over the last completed window
    pub fn measurement_rate(&self) -> Option<f64> {
        self.rate.rate()
    }

    /// Whether the owner should call [`reset`](Self::reset)
    pub fn needs_reset(&self) -> bool {
        self.reset_requested || self.state == SessionState::Disconnected
    }

    pub fn is_failed(&self) -> bool {
        self.state == SessionState::Failed
    }

    /// Most recent pose of every bird on this port
    pub fn poses(&self) -> &[SensorPose] {
        &self.poses
    }

    /// (Re)open the port and send the setup sequence
    ///
    /// Returns `Err` only once the session has failed for good; a port that
    /// cannot be opened leaves the session `Disconnected` for another try.
    pub fn reset(&mut self) -> Result<()> {
        if self.state == SessionState::Failed {
            return Err(self.failed_error());
        }
        self.reset_requested = false;
        if self.failed_resets >= self.config.limits.max_resets {
            return self.fail(format!(
                "{} consecutive resets without a report",
                self.failed_resets
            ));
        }
        self.resets += 1;
        self.failed_resets += 1;
        self.sync_failures = 0;
        self.ack_polls = 0;
        self.framer.clear();
        self.rate.restart();
        log::info!("{}: reset #{}", self.config.port, self.resets);

        if self.transport.is_none() {
            match self.opener.open(&self.config.port, self.config.baud) {
                Ok(transport) => self.transport = Some(transport),
                Err(e) => return self.transport_fault(e),
            }
        }
        let setup = self.setup_sequence();
        log::debug!("{}: setup {:02X?}", self.config.port, setup);
        if let Err(e) = self.write(&setup) {
            return self.transport_fault(e);
        }
        self.state = SessionState::Configuring(ConfigStep::AwaitAck);
        Ok(())
    }

    fn setup_sequence(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self.config.role {
            Role::Standalone if self.config.group => {
                out.extend(command::autoconfig(self.config.sensors as u8));
                out.extend(command::GROUP_MODE);
                for address in 1..=self.config.sensors as u8 {
                    out.extend(command::addressed(address, command::POSITION_QUATERNION));
                }
            }
            Role::GroupMaster { group_size } => {
                out.extend(command::autoconfig(group_size));
                out.push(command::POSITION_QUATERNION);
            }
            Role::Standalone | Role::GroupSlave => out.push(command::POSITION_QUATERNION),
        }
        out.extend(command::EXAMINE_ERROR);
        out
    }

    /// Advance by one step, returning the poses of a report read this step
    pub fn poll(&mut self) -> Result<Option<&[SensorPose]>> {
        match self.state {
            SessionState::Failed => return Err(self.failed_error()),
            SessionState::Disconnected => {
                if self.auto_reset {
                    self.reset()?;
                }
                return Ok(None);
            }
            _ => {}
        }
        if self.reset_requested {
            if self.auto_reset {
                self.reset()?;
            }
            return Ok(None);
        }

        let filled = match self.transport.as_deref_mut() {
            Some(transport) => self.framer.fill(transport),
            None => return Ok(None),
        };
        if let Err(e) = filled {
            self.transport_fault(e)?;
            return Ok(None);
        }

        match self.state {
            SessionState::Configuring(step) => {
                self.configure(step)?;
                Ok(None)
            }
            SessionState::ErrorRecovering => {
                if self.recover()? {
                    self.read_report()
                } else {
                    Ok(None)
                }
            }
            SessionState::Streaming => self.read_report(),
            SessionState::Disconnected | SessionState::Failed => Ok(None),
        }
    }

    fn configure(&mut self, step: ConfigStep) -> Result<()> {
        match step {
            ConfigStep::AwaitAck => {
                let mut ack = [0u8; 1];
                if !self.framer.take(&mut ack) {
                    return self.count_ack_poll();
                }
                if ack[0] == 0 {
                    return self.start_streaming();
                }
                log::warn!(
                    "{}: error {} ({})",
                    self.config.port,
                    ack[0],
                    error_text(ack[0])
                );
                self.ack_polls = 0;
                if let Err(e) = self.write(&command::EXPANDED_ERROR) {
                    return self.transport_fault(e);
                }
                self.state = SessionState::Configuring(ConfigStep::AwaitExpanded);
                Ok(())
            }
            ConfigStep::AwaitExpanded => {
                let mut reply = [0u8; 2];
                if !self.framer.take(&mut reply) {
                    return self.count_ack_poll();
                }
                log::warn!(
                    "{}: expanded error {} ({}) from bird {}",
                    self.config.port,
                    reply[0],
                    error_text(reply[0]),
                    reply[1]
                );
                self.request_reset()
            }
        }
    }

    fn count_ack_poll(&mut self) -> Result<()> {
        self.ack_polls += 1;
        if self.ack_polls >= self.config.limits.ack_poll_limit {
            log::warn!(
                "{}: no reply after {} polls",
                self.config.port,
                self.ack_polls
            );
            return self.request_reset();
        }
        Ok(())
    }

    fn start_streaming(&mut self) -> Result<()> {
        let start = if self.config.stream {
            command::STREAM
        } else {
            command::POINT
        };
        if let Err(e) = self.write(&[start]) {
            return self.transport_fault(e);
        }
        log::info!(
            "{}: streaming {} bird(s), {} mode",
            self.config.port,
            self.config.sensors,
            if self.config.stream { "stream" } else { "point" }
        );
        self.state = SessionState::Streaming;
        Ok(())
    }

    /// One resync step; true once the stream is aligned again
    fn recover(&mut self) -> Result<bool> {
        let budget = self.config.limits.resync_byte_limit;
        match self.framer.resync(&self.format, budget) {
            Resync::Found(skipped) => {
                log::debug!("{}: resynced after {} bytes", self.config.port, skipped);
                self.state = SessionState::Streaming;
                Ok(true)
            }
            Resync::Pending(_) => Ok(false),
            Resync::Exhausted(skipped) => {
                log::warn!(
                    "{}: no record start in {} bytes",
                    self.config.port,
                    skipped
                );
                self.sync_failure()?;
                Ok(false)
            }
        }
    }

    fn read_report(&mut self) -> Result<Option<&[SensorPose]>> {
        let (timestamp_us, fault) = match self.framer.next_report(&self.format) {
            NextReport::Incomplete => return Ok(None),
            NextReport::Fault(fault) => (0, Some(fault)),
            NextReport::Report {
                bytes,
                timestamp_us,
            } => {
                for (pose, record) in self.poses.iter_mut().zip(self.format.records(bytes)) {
                    let (position, orientation) = decode_record(record);
                    pose.position = position;
                    pose.orientation = orientation;
                    pose.timestamp_us = timestamp_us;
                }
                (timestamp_us, None)
            }
        };

        if let Some(fault) = fault {
            self.sync_losses += 1;
            log::warn!("{}: {}", self.config.port, fault);
            self.framer.discard(1);
            self.state = SessionState::ErrorRecovering;
            self.sync_failure()?;
            return Ok(None);
        }

        self.sync_failures = 0;
        self.failed_resets = 0;
        if let Some(rate) = self.rate.record() {
            log::debug!("{}: {:.1} reports/s", self.config.port, rate);
        }
        if !self.config.stream
            && let Err(e) = self.write(&[command::POINT])
        {
            self.transport_fault(e)?;
        }
        log::trace!("{}: report at {}", self.config.port, timestamp_us);
        Ok(Some(&self.poses))
    }

    fn sync_failure(&mut self) -> Result<()> {
        self.sync_failures += 1;
        if self.sync_failures >= self.config.limits.max_sync_failures {
            log::warn!(
                "{}: {} consecutive sync failures",
                self.config.port,
                self.sync_failures
            );
            return self.request_reset();
        }
        Ok(())
    }

    fn request_reset(&mut self) -> Result<()> {
        if self.auto_reset {
            self.reset()
        } else {
            self.reset_requested = true;
            Ok(())
        }
    }

    /// Port lost: slaves fail at once, others close and retry on reset
    fn transport_fault(&mut self, error: Error) -> Result<()> {
        self.transport = None;
        self.framer.clear();
        if self.config.role == Role::GroupSlave {
            return self.fail(error.to_string());
        }
        log::warn!("{}: {}", self.config.port, error);
        self.state = SessionState::Disconnected;
        Ok(())
    }

    fn fail(&mut self, reason: String) -> Result<()> {
        log::error!("{}: failed: {}", self.config.port, reason);
        self.state = SessionState::Failed;
        self.transport = None;
        Err(Error::DeviceFailed(format!("{}: {}", self.config.port, reason)))
    }

    fn failed_error(&self) -> Error {
        Error::DeviceFailed(format!("{} has failed", self.config.port))
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        match self.transport.as_deref_mut() {
            Some(transport) => transport.write_all(bytes),
            None => Err(Error::transport(&self.config.port, "port not open")),
        }
    }

    /// Close the port
    pub fn shutdown(&mut self) {
        if self.transport.take().is_some() {
            log::info!("{}: closed", self.config.port);
        }
        if self.state != SessionState::Failed {
            self.state = SessionState::Disconnected;
        }
    }
}
