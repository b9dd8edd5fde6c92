//! Start-up and run sequence of the executable, against a simulated actuator.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Duration;

use dxl_if::{ctrl_table, instr::Request, OperatingMode, PositionRange, ProtocolVersion};
use fish_lib::{
    act_link::{
        sim::{SimHandle, SimServo},
        ActLink, LinkError, MotionProfile, PositionSink, TxError,
    },
    motion::{GenState, MotionGen, MotionParams, RunError, RunOptions, Sine, StopHandle},
    params::LinkParams,
};

// ------------------------------------------------------------------------------------------------
// HELPERS
// ------------------------------------------------------------------------------------------------

fn link_params(version: ProtocolVersion) -> LinkParams {
    LinkParams {
        port: String::from("sim"),
        actuator_id: 7,
        protocol_version: version,
        baud_rate: 57600,
        io_timeout_ms: 10,
        dir_pin: None,
        echo: false,
    }
}

fn sim_link(version: ProtocolVersion) -> (ActLink<SimServo>, SimHandle) {
    let servo = SimServo::new(7, version);
    let handle = servo.handle();
    (ActLink::new(servo, &link_params(version)), handle)
}

fn motion_gen(tick_ms: u64) -> MotionGen {
    let p = MotionParams::new(
        2048,
        400,
        0.5,
        Duration::from_millis(tick_ms),
        PositionRange::X_SERIES,
    )
    .unwrap();
    MotionGen::new(p, Box::new(Sine))
}

/// Forwards to a link, raising the stop flag after a number of ticks.
struct StopAfter<'a> {
    link: &'a mut ActLink<SimServo>,
    remaining: u32,
    stop: StopHandle,
}

impl<'a> PositionSink for StopAfter<'a> {
    fn set_position(&mut self, position: i32) -> Result<(), LinkError> {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.stop.stop();
        }
        self.link.set_position(position)
    }
}

fn write(item: ctrl_table::CtrlItem, value: u32) -> Request {
    Request::Write {
        addr: item.addr,
        data: item.encode(value),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[test]
fn failed_presence_check_prevents_all_writes() {
    let (mut link, sim) = sim_link(ProtocolVersion::V2);
    sim.set_online(false);

    match link.verify_presence() {
        Err(LinkError::DeviceNotResponding {
            id: 7,
            cause: TxError::Timeout(_),
        }) => (),
        r => panic!("Expected the actuator not to respond, got {:?}", r),
    }

    // The actuator comes back, but presence was never verified
    sim.set_online(true);

    assert!(matches!(
        link.prepare(OperatingMode::Position, &MotionProfile::default()),
        Err(LinkError::NotVerified(7))
    ));

    let mut gen = motion_gen(1);
    let mut sink = StopAfter {
        link: &mut link,
        remaining: 3,
        stop: gen.stop_handle(),
    };
    assert!(matches!(
        gen.run(&mut sink, &RunOptions::default()),
        Err(RunError::Link(LinkError::NotVerified(7)))
    ));

    assert_eq!(sim.requests(), vec![Request::Ping]);
    assert!(sim.goal_writes().is_empty());
    assert!(!sim.torque_enabled());
}

#[test]
fn start_up_sequence_order() {
    for &version in &[ProtocolVersion::V1, ProtocolVersion::V2] {
        let (mut link, sim) = sim_link(version);

        let info = link.verify_presence().unwrap();
        assert_eq!(info.model_number, 1030);
        assert_eq!(info.firmware_version, 45);

        link.prepare(
            OperatingMode::Position,
            &MotionProfile {
                max_velocity: Some(400),
                max_acceleration: Some(50),
            },
        )
        .unwrap();

        let requests = sim.requests();
        let setup = match version {
            // Protocol 1.0 pings carry no identification, it is read instead
            ProtocolVersion::V1 => &requests[3..],
            ProtocolVersion::V2 => &requests[1..],
        };

        assert_eq!(requests[0], Request::Ping);
        assert_eq!(
            setup,
            &[
                write(ctrl_table::TORQUE_ENABLE, 0),
                write(ctrl_table::OPERATING_MODE, 3),
                write(ctrl_table::TORQUE_ENABLE, 1),
                write(ctrl_table::PROFILE_VELOCITY, 400),
                write(ctrl_table::PROFILE_ACCELERATION, 50),
            ][..]
        );
        assert!(sim.torque_enabled());
    }
}

#[test]
fn start_up_with_hardware_error() {
    for &version in &[ProtocolVersion::V1, ProtocolVersion::V2] {
        let (mut link, sim) = sim_link(version);

        // Overheating, reported on every status but not a failed instruction
        sim.set_hardware_error(0x04);

        link.verify_presence().unwrap();
        link.prepare(OperatingMode::Position, &MotionProfile::default())
            .unwrap();

        assert!(link.hardware_alert());
        assert_eq!(link.hardware_error_status().unwrap(), 0x04);
        assert!(sim.torque_enabled());
    }
}

#[test]
fn prepare_with_torque_already_on() {
    // Preparing twice must still work, the second mode write happens with torque off
    let (mut link, sim) = sim_link(ProtocolVersion::V2);
    link.verify_presence().unwrap();

    link.prepare(OperatingMode::Position, &MotionProfile::default())
        .unwrap();
    link.prepare(OperatingMode::ExtendedPosition, &MotionProfile::default())
        .unwrap();

    assert_eq!(sim.operating_mode(), Some(OperatingMode::ExtendedPosition));
    assert!(sim.torque_enabled());
}

#[test]
fn write_error_does_not_stop_the_run() {
    let (mut link, sim) = sim_link(ProtocolVersion::V2);
    link.verify_presence().unwrap();
    link.prepare(OperatingMode::Position, &MotionProfile::default())
        .unwrap();

    // First goal write of the run fails
    sim.fail_next_goal_writes(1);

    let mut gen = motion_gen(2);
    let mut sink = StopAfter {
        link: &mut link,
        remaining: 5,
        stop: gen.stop_handle(),
    };
    let report = gen.run(&mut sink, &RunOptions::default()).unwrap();

    assert_eq!(report.state, GenState::Stopped);
    assert_eq!(report.stats.ticks, 5);
    assert_eq!(report.stats.write_errors, 1);
    assert_eq!(sim.goal_writes().len(), 5);

    // The actuator followed the last accepted write
    let last = report.last_position.unwrap();
    assert_eq!(sim.read_item(ctrl_table::GOAL_POSITION), last as u32);
    assert!((2048..=2448).contains(&last));
}

#[test]
fn shutdown_releases_torque() {
    let (mut link, sim) = sim_link(ProtocolVersion::V2);
    link.verify_presence().unwrap();
    link.prepare(OperatingMode::Position, &MotionProfile::default())
        .unwrap();

    // Park, then release
    link.set_position(2048).unwrap();
    link.halt_and_release().unwrap();

    assert!(!sim.torque_enabled());
    assert!(!link.is_open());
    assert_eq!(
        sim.requests().last(),
        Some(&write(ctrl_table::TORQUE_ENABLE, 0))
    );

    // Further calls are harmless
    link.halt_and_release().unwrap();
    link.close();
    assert!(matches!(link.set_position(2048), Err(LinkError::Closed)));
}
