//! Simulated X-series actuator.
//!
//! The servo answers instructions from an in-memory control table, including the firmware's
//! refusal to write EEPROM items while torque is enabled. Goal positions are reached instantly.
//! A [`SimHandle`] gives access to the servo's state after the servo itself has been moved into
//! an [`ActLink`](super::ActLink).

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use dxl_if::{
    ctrl_table::{self, CtrlItem, OperatingMode},
    instr::Request,
    packet::{self, Decoded},
    status, DeviceError, ProtocolVersion, StatusPacket, BROADCAST_ID,
};
use log::trace;

use super::Transport;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Model number reported by the simulated servo (XM430-W210).
pub const SIM_MODEL_NUMBER: u16 = 1030;

/// Firmware version reported by the simulated servo.
pub const SIM_FIRMWARE_VERSION: u8 = 45;

/// Start position of the simulated servo, centre of the single turn range.
const SIM_START_POSITION: u32 = 2048;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The simulated actuator, acting as the transport to itself.
pub struct SimServo {
    version: ProtocolVersion,
    state: Arc<Mutex<SimState>>,

    /// Status bytes waiting to be read
    pending: VecDeque<u8>,
}

/// Shared access to a [`SimServo`]'s state.
#[derive(Clone)]
pub struct SimHandle(Arc<Mutex<SimState>>);

struct SimState {
    id: u8,
    table: [u8; ctrl_table::TABLE_SIZE],

    /// When false the servo never answers
    online: bool,

    /// Loop instructions back ahead of the status, like a single wire adapter
    echo: bool,

    /// Number of upcoming goal position writes to reject
    failing_goal_writes: u32,

    /// Every request addressed to this servo, in order
    requests: Vec<Request>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimServo {
    pub fn new(id: u8, version: ProtocolVersion) -> Self {
        let mut state = SimState {
            id,
            table: [0u8; ctrl_table::TABLE_SIZE],
            online: true,
            echo: false,
            failing_goal_writes: 0,
            requests: Vec::new(),
        };

        state.set(ctrl_table::MODEL_NUMBER, SIM_MODEL_NUMBER as u32);
        state.set(ctrl_table::FIRMWARE_VERSION, SIM_FIRMWARE_VERSION as u32);
        state.set(
            ctrl_table::OPERATING_MODE,
            OperatingMode::Position.value(),
        );
        state.set(ctrl_table::GOAL_POSITION, SIM_START_POSITION);
        state.set(ctrl_table::PRESENT_POSITION, SIM_START_POSITION);

        Self {
            version,
            state: Arc::new(Mutex::new(state)),
            pending: VecDeque::new(),
        }
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle(self.state.clone())
    }

    fn state(&self) -> MutexGuard<SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for SimServo {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let version = self.version;
        let mut buf = bytes.to_vec();
        let mut replies = Vec::new();

        {
            let mut state = self.state();

            if state.echo {
                replies.extend_from_slice(bytes);
            }

            loop {
                match packet::decode(version, &buf) {
                    Ok(Decoded::Complete(frame, used)) => {
                        buf.drain(..used);

                        if frame.id != state.id && frame.id != BROADCAST_ID {
                            continue;
                        }

                        // A real device silently drops instructions it can't parse
                        let request = match Request::from_frame(version, &frame) {
                            Ok(r) => r,
                            Err(_) => continue,
                        };

                        trace!("Sim servo {} received {:?}", state.id, request);
                        state.requests.push(request.clone());

                        if !state.online || frame.id == BROADCAST_ID {
                            continue;
                        }

                        let status = state.process(version, request);
                        match status.to_frame(version).encode(version) {
                            Ok(b) => replies.extend(b),
                            Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
                        }
                    }
                    Ok(Decoded::Incomplete(_)) | Err(_) => break,
                }
            }
        }

        self.pending.extend(replies);

        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if self.pending.is_empty() {
            thread::sleep(timeout);
            return Ok(0);
        }

        let n = buf.len().min(self.pending.len());
        for (dst, src) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *dst = src;
        }

        Ok(n)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.pending.clear();
        Ok(())
    }
}

impl SimHandle {
    /// Make the servo answer, or stop answering, instructions.
    pub fn set_online(&self, online: bool) {
        self.state().online = online;
    }

    /// Loop every instruction back to the receiver before answering it.
    pub fn set_echo(&self, echo: bool) {
        self.state().echo = echo;
    }

    /// Set the hardware error status. While non-zero every status packet carries the alert.
    pub fn set_hardware_error(&self, hw_status: u8) {
        self.state()
            .set(ctrl_table::HARDWARE_ERROR_STATUS, hw_status as u32);
    }

    /// Reject the next `n` goal position writes with a result fail error.
    pub fn fail_next_goal_writes(&self, n: u32) {
        self.state().failing_goal_writes = n;
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<Request> {
        self.state().requests.clone()
    }

    /// Every goal position write received, accepted or not.
    pub fn goal_writes(&self) -> Vec<i32> {
        self.state()
            .requests
            .iter()
            .filter_map(|r| match r {
                Request::Write { addr, data } if *addr == ctrl_table::GOAL_POSITION.addr => {
                    ctrl_table::GOAL_POSITION.decode(data).map(|p| p as i32)
                }
                _ => None,
            })
            .collect()
    }

    pub fn read_item(&self, item: CtrlItem) -> u32 {
        self.state().get(item)
    }

    pub fn torque_enabled(&self) -> bool {
        self.read_item(ctrl_table::TORQUE_ENABLE) == ctrl_table::TORQUE_ON
    }

    pub fn operating_mode(&self) -> Option<OperatingMode> {
        OperatingMode::from_value(self.read_item(ctrl_table::OPERATING_MODE))
    }

    fn state(&self) -> MutexGuard<SimState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SimState {
    fn get(&self, item: CtrlItem) -> u32 {
        let start = item.addr as usize;
        item.decode(&self.table[start..]).unwrap_or(0)
    }

    fn set(&mut self, item: CtrlItem, value: u32) {
        let start = item.addr as usize;
        let bytes = item.encode(value);
        self.table[start..start + bytes.len()].copy_from_slice(&bytes);
    }

    /// Execute a request and build the status packet to return.
    fn process(&mut self, version: ProtocolVersion, request: Request) -> StatusPacket {
        let result = match request {
            Request::Ping => match version {
                ProtocolVersion::V1 => Ok(vec![]),
                ProtocolVersion::V2 => {
                    let mut p = self.table[0..2].to_vec();
                    p.push(self.table[ctrl_table::FIRMWARE_VERSION.addr as usize]);
                    Ok(p)
                }
            },
            Request::Read { addr, len } => self.read(addr, len),
            Request::Write { addr, data } => self.write(addr, &data).map(|_| vec![]),
            Request::Reboot => {
                self.set(ctrl_table::TORQUE_ENABLE, ctrl_table::TORQUE_OFF);
                Ok(vec![])
            }
        };

        let hw_status = self.get(ctrl_table::HARDWARE_ERROR_STATUS) as u8;
        let alert = status::alert_bits(version, hw_status);

        match result {
            Ok(params) => StatusPacket {
                id: self.id,
                error: alert,
                params,
            },
            Err(e) => StatusPacket {
                id: self.id,
                error: e.to_byte(version) | alert,
                params: vec![],
            },
        }
    }

    fn read(&self, addr: u16, len: u16) -> Result<Vec<u8>, DeviceError> {
        let start = addr as usize;
        let end = start + len as usize;

        match self.table.get(start..end) {
            Some(b) => Ok(b.to_vec()),
            None => Err(DeviceError::DataRange),
        }
    }

    fn write(&mut self, addr: u16, data: &[u8]) -> Result<(), DeviceError> {
        let start = addr as usize;
        let end = start + data.len();

        if end > self.table.len() {
            return Err(DeviceError::DataRange);
        }

        if addr < ctrl_table::EEPROM_END
            && self.get(ctrl_table::TORQUE_ENABLE) == ctrl_table::TORQUE_ON
        {
            return Err(DeviceError::Access);
        }

        let goal = ctrl_table::GOAL_POSITION;
        if addr == goal.addr {
            if self.failing_goal_writes > 0 {
                self.failing_goal_writes -= 1;
                return Err(DeviceError::ResultFail);
            }

            self.table[start..end].copy_from_slice(data);

            // Ideal servo, no travel time
            let position = self.get(goal);
            self.set(ctrl_table::PRESENT_POSITION, position);
            return Ok(());
        }

        self.table[start..end].copy_from_slice(data);
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use dxl_if::{instr, packet::Decoded, StatusPacket};

    /// Send `frame` to the servo and decode its answer.
    fn exchange(servo: &mut SimServo, frame: dxl_if::Frame) -> Option<StatusPacket> {
        let v = servo.version;
        servo.send(&frame.encode(v).unwrap()).unwrap();

        let mut buf = [0u8; 64];
        let n = servo.recv(&mut buf, Duration::from_millis(1)).unwrap();

        match packet::decode(v, &buf[..n]).unwrap() {
            Decoded::Complete(f, _) => Some(StatusPacket::from_frame(v, f).unwrap()),
            Decoded::Incomplete(_) => None,
        }
    }

    #[test]
    fn test_eeprom_locked_while_torque_on() {
        let v = ProtocolVersion::V2;
        let mut servo = SimServo::new(1, v);
        let handle = servo.handle();

        let torque_on = instr::write(v, 1, ctrl_table::TORQUE_ENABLE, 1);
        assert_eq!(exchange(&mut servo, torque_on).unwrap().error, 0);

        let mode = instr::write(v, 1, ctrl_table::OPERATING_MODE, 4);
        let status = exchange(&mut servo, mode).unwrap();
        assert_eq!(status.device_error(v), Some(DeviceError::Access));
        assert_eq!(handle.operating_mode(), Some(OperatingMode::Position));

        let torque_off = instr::write(v, 1, ctrl_table::TORQUE_ENABLE, 0);
        exchange(&mut servo, torque_off).unwrap();
        let mode = instr::write(v, 1, ctrl_table::OPERATING_MODE, 4);
        assert_eq!(exchange(&mut servo, mode).unwrap().error, 0);
        assert_eq!(
            handle.operating_mode(),
            Some(OperatingMode::ExtendedPosition)
        );
    }

    #[test]
    fn test_offline_and_foreign_ids() {
        let v = ProtocolVersion::V1;
        let mut servo = SimServo::new(3, v);
        let handle = servo.handle();

        assert!(exchange(&mut servo, instr::ping(4)).is_none());
        assert!(exchange(&mut servo, instr::ping(3)).is_some());

        handle.set_online(false);
        assert!(exchange(&mut servo, instr::ping(3)).is_none());

        // Only requests addressed to the servo are logged
        assert_eq!(handle.requests(), vec![Request::Ping, Request::Ping]);
    }

    #[test]
    fn test_reboot_disables_torque() {
        let v = ProtocolVersion::V2;
        let mut servo = SimServo::new(1, v);
        let handle = servo.handle();

        exchange(&mut servo, instr::write(v, 1, ctrl_table::TORQUE_ENABLE, 1)).unwrap();
        assert!(handle.torque_enabled());

        assert_eq!(exchange(&mut servo, instr::reboot(1)).unwrap().error, 0);
        assert!(!handle.torque_enabled());
        assert_eq!(handle.requests().last(), Some(&Request::Reboot));
    }

    #[test]
    fn test_hardware_error_sets_alert() {
        for &v in &[ProtocolVersion::V1, ProtocolVersion::V2] {
            let mut servo = SimServo::new(1, v);
            let handle = servo.handle();

            handle.set_hardware_error(0x20);

            let status = exchange(&mut servo, instr::ping(1)).unwrap();
            assert!(status.hardware_alert(v));
            assert_eq!(status.device_error(v), None);

            let read = instr::read(v, 1, ctrl_table::HARDWARE_ERROR_STATUS);
            assert_eq!(exchange(&mut servo, read).unwrap().params, vec![0x20]);

            handle.set_hardware_error(0);
            assert!(!exchange(&mut servo, instr::ping(1)).unwrap().hardware_alert(v));
        }
    }

    #[test]
    fn test_echo() {
        let v = ProtocolVersion::V2;
        let mut servo = SimServo::new(1, v);
        servo.handle().set_echo(true);

        let ping = instr::ping(1);
        servo.send(&ping.encode(v).unwrap()).unwrap();

        let mut buf = [0u8; 64];
        let n = servo.recv(&mut buf, Duration::from_millis(1)).unwrap();

        match packet::decode(v, &buf[..n]).unwrap() {
            Decoded::Complete(f, used) => {
                assert_eq!(f, ping);
                assert!(matches!(
                    packet::decode(v, &buf[used..n]).unwrap(),
                    Decoded::Complete(_, _)
                ));
            }
            Decoded::Incomplete(_) => panic!("Expected the echo"),
        }
    }

    #[test]
    fn test_read_out_of_table() {
        let v = ProtocolVersion::V2;
        let mut servo = SimServo::new(1, v);

        let read = dxl_if::Frame::new(1, 0x02, vec![0x90, 0x00, 0x08, 0x00]);
        let status = exchange(&mut servo, read).unwrap();
        assert_eq!(status.device_error(v), Some(DeviceError::DataRange));
    }
}
