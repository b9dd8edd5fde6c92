//! # Actuator Link Module
//!
//! The actuator link is the sole owner of the channel to one Dynamixel actuator. It turns the
//! abstract operations the rest of the executable needs (presence check, preparation, goal
//! position) into instruction/status exchanges on that channel.
//!
//! The link is generic over a [`Transport`] so the same code drives the Pi UART and the
//! [`sim::SimServo`] used for tests and dry runs. Every operation takes `&mut self`, so at most
//! one transaction can ever be in flight on the channel.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// [`Transport`] emulating an X-series actuator in memory.
pub mod sim;

/// [`Transport`] implementation over a Linux serial device.
#[cfg(target_os = "linux")]
pub mod uart;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::io;
use std::time::{Duration, Instant};

use dxl_if::{
    ctrl_table::{self, CtrlItem, OperatingMode},
    instr,
    packet::{self, Decoded},
    DeviceError, Frame, PacketError, ProtocolVersion, StatusPacket,
};
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};

use crate::params::LinkParams;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Size of the chunks read from the transport.
const RECV_CHUNK_LEN: usize = 64;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Byte level access to the bus an actuator is connected to.
pub trait Transport {
    /// Write all of `bytes` to the bus, returning once they have been transmitted.
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Read whatever is available into `buf`, waiting at most `timeout` for the first byte.
    ///
    /// Returns `Ok(0)` if nothing arrived in time.
    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Drop any bytes received but not yet read.
    fn discard_input(&mut self) -> io::Result<()>;
}

/// Anything which accepts absolute goal positions.
pub trait PositionSink {
    /// Command a single absolute goal position.
    fn set_position(&mut self, position: i32) -> Result<(), LinkError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Link to a single actuator.
pub struct ActLink<T: Transport> {
    /// The channel, `None` once closed
    transport: Option<T>,

    id: u8,
    version: ProtocolVersion,
    io_timeout: Duration,

    /// The first frame after each instruction may be its echo
    echo: bool,

    /// Set once the actuator has answered a ping. No positions are written before this.
    verified: bool,

    /// Hardware alert flag of the last status received
    alert: bool,

    rx_buf: Vec<u8>,
}

/// Identification returned by the presence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub model_number: u16,
    pub firmware_version: u8,
}

/// Device enforced motion limits.
///
/// Units are those of the control table (0.229 rpm per velocity unit, 214.577 rev/min² per
/// acceleration unit on X-series).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionProfile {
    pub max_velocity: Option<u32>,
    pub max_acceleration: Option<u32>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Failure of a single instruction/status exchange.
#[derive(Debug, thiserror::Error)]
pub enum TxError {
    #[error("channel I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("no status packet received within {0:?}")]
    Timeout(Duration),

    #[error("bad packet: {0}")]
    Packet(#[from] PacketError),

    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error("unexpected status parameters ({0} bytes)")]
    UnexpectedParams(usize),

    #[error("the channel is closed")]
    Closed,
}

/// Errors produced by the [`ActLink`].
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Could not open the channel on {port}: {reason}")]
    Connection { port: String, reason: String },

    #[error("Actuator {id} is not responding: {cause}")]
    DeviceNotResponding { id: u8, cause: TxError },

    #[error("Could not configure actuator {id} ({step}): {cause}")]
    Configuration {
        id: u8,
        step: &'static str,
        cause: TxError,
    },

    #[error("Actuator ID {0} is outside the assignable range (0 to {max})", max = dxl_if::MAX_ID)]
    InvalidId(u8),

    #[error("Presence of actuator {0} has not been verified")]
    NotVerified(u8),

    #[error("Could not write goal position {position} to actuator {id}: {cause}")]
    Write {
        id: u8,
        position: i32,
        cause: TxError,
    },

    #[error("Could not read {item} from actuator {id}: {cause}")]
    Read {
        id: u8,
        item: &'static str,
        cause: TxError,
    },

    #[error("The channel to the actuator is closed")]
    Closed,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<T: Transport> ActLink<T> {
    /// Wrap an already open transport.
    pub fn new(transport: T, params: &LinkParams) -> Self {
        Self {
            transport: Some(transport),
            id: params.actuator_id,
            version: params.protocol_version,
            io_timeout: params.io_timeout(),
            echo: params.echo,
            verified: false,
            alert: false,
            rx_buf: Vec::with_capacity(RECV_CHUNK_LEN),
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    /// Whether the last status packet flagged a hardware error. Read
    /// [`ActLink::hardware_error_status`] for the details.
    pub fn hardware_alert(&self) -> bool {
        self.alert
    }

    /// Ping the actuator and read its identification.
    pub fn verify_presence(&mut self) -> Result<DeviceInfo, LinkError> {
        self.require_open()?;

        if self.id > dxl_if::MAX_ID {
            return Err(LinkError::InvalidId(self.id));
        }

        let id = self.id;
        let not_responding = |cause| LinkError::DeviceNotResponding { id, cause };

        let status = self.transact(instr::ping(id)).map_err(not_responding)?;

        let info = match self.version {
            // Protocol 2.0 pings return the model number and firmware version
            ProtocolVersion::V2 => match status.params.len() {
                3 => DeviceInfo {
                    model_number: (status.params[0] as u16) | ((status.params[1] as u16) << 8),
                    firmware_version: status.params[2],
                },
                n => return Err(not_responding(TxError::UnexpectedParams(n))),
            },
            ProtocolVersion::V1 => DeviceInfo {
                model_number: self
                    .read_item(ctrl_table::MODEL_NUMBER)
                    .map_err(not_responding)? as u16,
                firmware_version: self
                    .read_item(ctrl_table::FIRMWARE_VERSION)
                    .map_err(not_responding)? as u8,
            },
        };

        self.verified = true;

        info!(
            "Actuator {} present (model {}, firmware {}, protocol {})",
            id, info.model_number, info.firmware_version, self.version
        );

        Ok(info)
    }

    /// Put the actuator into `mode` and apply the motion profile.
    ///
    /// Torque is disabled before the mode is written and re-enabled afterwards, the operating mode
    /// lives in EEPROM which firmware refuses to write while torque is on.
    pub fn prepare(
        &mut self,
        mode: OperatingMode,
        profile: &MotionProfile,
    ) -> Result<(), LinkError> {
        self.require_verified()?;

        let mut steps: Vec<(&'static str, CtrlItem, u32)> = vec![
            ("torque off", ctrl_table::TORQUE_ENABLE, ctrl_table::TORQUE_OFF),
            ("operating mode", ctrl_table::OPERATING_MODE, mode.value()),
            ("torque on", ctrl_table::TORQUE_ENABLE, ctrl_table::TORQUE_ON),
        ];

        if let Some(v) = profile.max_velocity {
            steps.push(("profile velocity", ctrl_table::PROFILE_VELOCITY, v));
        }
        if let Some(a) = profile.max_acceleration {
            steps.push(("profile acceleration", ctrl_table::PROFILE_ACCELERATION, a));
        }

        for (step, item, value) in steps {
            let id = self.id;
            self.write_item(item, value)
                .map_err(|cause| LinkError::Configuration { id, step, cause })?;
            debug!("Actuator {}: {} ({} = {})", id, step, item.name, value);
        }

        info!("Actuator {} prepared in {:?} mode", self.id, mode);

        Ok(())
    }

    /// Write a single goal position. The position is not range checked here.
    pub fn set_position(&mut self, position: i32) -> Result<(), LinkError> {
        self.require_verified()?;

        let id = self.id;
        self.write_item(ctrl_table::GOAL_POSITION, position as u32)
            .map_err(|cause| match cause {
                TxError::Closed => LinkError::Closed,
                cause => LinkError::Write {
                    id,
                    position,
                    cause,
                },
            })
    }

    /// Read the actuator's present position.
    pub fn present_position(&mut self) -> Result<i32, LinkError> {
        self.require_verified()?;

        let id = self.id;
        self.read_item(ctrl_table::PRESENT_POSITION)
            .map(|p| p as i32)
            .map_err(|cause| LinkError::Read {
                id,
                item: ctrl_table::PRESENT_POSITION.name,
                cause,
            })
    }

    /// Read the hardware error status, zero if the actuator is healthy.
    pub fn hardware_error_status(&mut self) -> Result<u8, LinkError> {
        self.require_verified()?;

        let id = self.id;
        self.read_item(ctrl_table::HARDWARE_ERROR_STATUS)
            .map(|s| s as u8)
            .map_err(|cause| LinkError::Read {
                id,
                item: ctrl_table::HARDWARE_ERROR_STATUS.name,
                cause,
            })
    }

    /// Release the channel. Calling this on a closed link does nothing.
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            info!("Channel to actuator {} closed", self.id);
        }
        self.verified = false;
        self.alert = false;
        self.rx_buf.clear();
    }

    /// Disable torque, then close the channel.
    ///
    /// The channel is closed even if the torque write fails, the failure is still returned.
    pub fn halt_and_release(&mut self) -> Result<(), LinkError> {
        if !self.is_open() {
            return Ok(());
        }

        let id = self.id;
        let result = self
            .write_item(ctrl_table::TORQUE_ENABLE, ctrl_table::TORQUE_OFF)
            .map_err(|cause| LinkError::Configuration {
                id,
                step: "torque off",
                cause,
            });

        if result.is_ok() {
            info!("Actuator {} torque disabled", id);
        }

        self.close();

        result
    }

    fn require_open(&self) -> Result<(), LinkError> {
        match self.transport {
            Some(_) => Ok(()),
            None => Err(LinkError::Closed),
        }
    }

    fn require_verified(&self) -> Result<(), LinkError> {
        self.require_open()?;
        match self.verified {
            true => Ok(()),
            false => Err(LinkError::NotVerified(self.id)),
        }
    }

    fn write_item(&mut self, item: CtrlItem, value: u32) -> Result<(), TxError> {
        self.transact(instr::write(self.version, self.id, item, value))
            .map(|_| ())
    }

    fn read_item(&mut self, item: CtrlItem) -> Result<u32, TxError> {
        let status = self.transact(instr::read(self.version, self.id, item))?;

        item.decode(&status.params)
            .ok_or(TxError::UnexpectedParams(status.params.len()))
    }

    /// Send one instruction and wait for the matching status packet.
    fn transact(&mut self, request: Frame) -> Result<StatusPacket, TxError> {
        let version = self.version;
        let timeout = self.io_timeout;

        let transport = match self.transport.as_mut() {
            Some(t) => t,
            None => return Err(TxError::Closed),
        };

        let bytes = request.encode(version)?;

        // Anything left over belongs to an earlier, failed exchange
        transport.discard_input()?;
        self.rx_buf.clear();

        transport.send(&bytes)?;

        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; RECV_CHUNK_LEN];

        // Only the first frame can be the echo. A protocol 1.0 status can be byte identical to
        // the instruction (ping answered with an error flag), so nothing else is dropped for it.
        let mut echo_expected = self.echo;

        loop {
            match packet::decode(version, &self.rx_buf) {
                Ok(Decoded::Complete(frame, used)) => {
                    self.rx_buf.drain(..used);

                    let is_echo = echo_expected && frame == request;
                    echo_expected = false;

                    if is_echo || frame.id != request.id {
                        trace!("Ignoring frame {:?}", frame);
                        continue;
                    }

                    let status = StatusPacket::from_frame(version, frame)?;

                    let alert = status.hardware_alert(version);
                    if alert && !self.alert {
                        warn!("Actuator {} reports a hardware error", self.id);
                    }
                    self.alert = alert;

                    return match status.device_error(version) {
                        Some(e) => Err(TxError::Device(e)),
                        None => Ok(status),
                    };
                }
                Ok(Decoded::Incomplete(drop)) => {
                    self.rx_buf.drain(..drop);
                }
                Err(e) => {
                    self.rx_buf.clear();
                    return Err(TxError::Packet(e));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(TxError::Timeout(timeout));
            }

            let n = transport.recv(&mut chunk, deadline - now)?;
            self.rx_buf.extend_from_slice(&chunk[..n]);
        }
    }
}

impl<T: Transport> PositionSink for ActLink<T> {
    fn set_position(&mut self, position: i32) -> Result<(), LinkError> {
        ActLink::set_position(self, position)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).send(bytes)
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        (**self).recv(buf, timeout)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        (**self).discard_input()
    }
}

impl LinkError {
    /// Whether the error means the link can no longer be used.
    ///
    /// Only failed reads and writes of a working link are recoverable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LinkError::Write { .. } | LinkError::Read { .. })
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Open the serial channel described by `params`.
pub fn open(params: &LinkParams) -> Result<ActLink<Box<dyn Transport>>, LinkError> {
    let transport = open_transport(params)?;

    info!(
        "Opened {} at {} baud (protocol {})",
        params.port, params.baud_rate, params.protocol_version
    );

    Ok(ActLink::new(transport, params))
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

#[cfg(target_os = "linux")]
fn open_transport(params: &LinkParams) -> Result<Box<dyn Transport>, LinkError> {
    let t = uart::UartTransport::open(&params.port, params.baud_rate, params.dir_pin)?;
    Ok(Box::new(t))
}

#[cfg(not(target_os = "linux"))]
fn open_transport(params: &LinkParams) -> Result<Box<dyn Transport>, LinkError> {
    Err(LinkError::Connection {
        port: params.port.clone(),
        reason: String::from("serial channels are only supported on Linux hosts"),
    })
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::sim::SimServo;
    use super::*;
    use dxl_if::instr::Request;

    fn link_params(version: ProtocolVersion) -> LinkParams {
        LinkParams {
            port: String::from("sim"),
            actuator_id: 1,
            protocol_version: version,
            baud_rate: 57600,
            io_timeout_ms: 5,
            dir_pin: None,
            echo: false,
        }
    }

    #[test]
    fn test_presence_and_prepare() {
        for &version in &[ProtocolVersion::V1, ProtocolVersion::V2] {
            let servo = SimServo::new(1, version);
            let handle = servo.handle();
            let mut link = ActLink::new(servo, &link_params(version));

            let info = link.verify_presence().unwrap();
            assert_eq!(info.model_number, 1030);

            link.prepare(
                OperatingMode::ExtendedPosition,
                &MotionProfile {
                    max_velocity: Some(400),
                    max_acceleration: None,
                },
            )
            .unwrap();

            assert!(handle.torque_enabled());
            assert_eq!(
                handle.operating_mode(),
                Some(OperatingMode::ExtendedPosition)
            );
            assert_eq!(handle.read_item(ctrl_table::PROFILE_VELOCITY), 400);

            link.set_position(3000).unwrap();
            assert_eq!(link.present_position().unwrap(), 3000);
        }
    }

    #[test]
    fn test_no_writes_before_presence() {
        let servo = SimServo::new(1, ProtocolVersion::V2);
        let handle = servo.handle();
        let mut link = ActLink::new(servo, &link_params(ProtocolVersion::V2));

        assert!(matches!(
            link.set_position(2048),
            Err(LinkError::NotVerified(1))
        ));
        assert!(matches!(
            link.prepare(OperatingMode::Position, &MotionProfile::default()),
            Err(LinkError::NotVerified(1))
        ));
        assert!(handle.requests().is_empty());
    }

    #[test]
    fn test_invalid_id() {
        let mut params = link_params(ProtocolVersion::V2);
        params.actuator_id = dxl_if::BROADCAST_ID;

        let servo = SimServo::new(1, ProtocolVersion::V2);
        let handle = servo.handle();
        let mut link = ActLink::new(servo, &params);

        assert!(matches!(
            link.verify_presence(),
            Err(LinkError::InvalidId(0xFE))
        ));
        assert!(handle.requests().is_empty());
    }

    #[test]
    fn test_hardware_error_status() {
        let servo = SimServo::new(1, ProtocolVersion::V1);
        let mut link = ActLink::new(servo, &link_params(ProtocolVersion::V1));

        assert!(matches!(
            link.hardware_error_status(),
            Err(LinkError::NotVerified(1))
        ));

        link.verify_presence().unwrap();
        assert_eq!(link.hardware_error_status().unwrap(), 0);
    }

    #[test]
    fn test_v1_status_identical_to_ping() {
        // Input voltage flag, the ping reply has the same bytes as the ping
        let servo = SimServo::new(1, ProtocolVersion::V1);
        let handle = servo.handle();
        handle.set_hardware_error(0x01);
        let mut link = ActLink::new(servo, &link_params(ProtocolVersion::V1));

        let info = link.verify_presence().unwrap();
        assert_eq!(info.model_number, 1030);
        assert!(link.hardware_alert());
        assert_eq!(link.hardware_error_status().unwrap(), 0x01);
    }

    #[test]
    fn test_hardware_alert_is_not_fatal() {
        for &version in &[ProtocolVersion::V1, ProtocolVersion::V2] {
            let servo = SimServo::new(1, version);
            let handle = servo.handle();
            handle.set_hardware_error(0x20);
            let mut link = ActLink::new(servo, &link_params(version));

            assert!(!link.hardware_alert());
            link.verify_presence().unwrap();
            assert!(link.hardware_alert());

            link.prepare(OperatingMode::Position, &MotionProfile::default())
                .unwrap();
            assert_eq!(link.hardware_error_status().unwrap(), 0x20);
            link.set_position(1000).unwrap();
            assert_eq!(handle.goal_writes(), vec![1000]);

            // Cleared once the device recovers
            handle.set_hardware_error(0);
            link.set_position(1100).unwrap();
            assert!(!link.hardware_alert());
        }
    }

    #[test]
    fn test_echo_skipped() {
        for &version in &[ProtocolVersion::V1, ProtocolVersion::V2] {
            let mut params = link_params(version);
            params.echo = true;

            let servo = SimServo::new(1, version);
            let handle = servo.handle();
            handle.set_echo(true);
            handle.set_hardware_error(0x01);
            let mut link = ActLink::new(servo, &params);

            link.verify_presence().unwrap();
            link.set_position(3000).unwrap();
            assert_eq!(link.present_position().unwrap(), 3000);
        }
    }

    #[test]
    fn test_wrong_id_times_out() {
        let servo = SimServo::new(2, ProtocolVersion::V2);
        let mut link = ActLink::new(servo, &link_params(ProtocolVersion::V2));

        match link.verify_presence() {
            Err(LinkError::DeviceNotResponding {
                id: 1,
                cause: TxError::Timeout(_),
            }) => (),
            r => panic!("Expected a timeout, got {:?}", r),
        }
        assert!(!link.is_verified());
    }

    #[test]
    fn test_write_error_is_not_fatal() {
        let servo = SimServo::new(1, ProtocolVersion::V2);
        let handle = servo.handle();
        let mut link = ActLink::new(servo, &link_params(ProtocolVersion::V2));
        link.verify_presence().unwrap();

        handle.fail_next_goal_writes(1);

        let err = link.set_position(100).unwrap_err();
        assert!(matches!(
            err,
            LinkError::Write {
                position: 100,
                cause: TxError::Device(DeviceError::ResultFail),
                ..
            }
        ));
        assert!(!err.is_fatal());

        // The next write goes through
        link.set_position(200).unwrap();
        assert_eq!(handle.goal_writes(), vec![100, 200]);
    }

    #[test]
    fn test_halt_and_release() {
        let servo = SimServo::new(1, ProtocolVersion::V2);
        let handle = servo.handle();
        let mut link = ActLink::new(servo, &link_params(ProtocolVersion::V2));
        link.verify_presence().unwrap();
        link.prepare(OperatingMode::Position, &MotionProfile::default())
            .unwrap();

        link.halt_and_release().unwrap();
        assert!(!handle.torque_enabled());
        assert!(!link.is_open());

        // Idempotent, and nothing else reaches the device
        let n = handle.requests().len();
        link.halt_and_release().unwrap();
        link.close();
        assert_eq!(handle.requests().len(), n);

        let err = link.set_position(2048).unwrap_err();
        assert!(matches!(err, LinkError::Closed));
        assert!(err.is_fatal());
        assert_eq!(
            handle.requests().last(),
            Some(&Request::Write {
                addr: ctrl_table::TORQUE_ENABLE.addr,
                data: vec![0]
            })
        );
    }
}
