//! Main fish executable entry point.
//!
//! # Architecture
//!
//! The executable drives a single Dynamixel actuator through an oscillation:
//!
//!     - Load parameters and open the channel to the actuator
//!     - Check the actuator is present, fatal if it isn't
//!     - Put the actuator in its operating mode and apply the motion profile
//!     - Run the motion generator until stopped by SIGINT/SIGTERM
//!     - Park the actuator at the center and release it
//!
//! The executable is expected to be restarted by its supervisor on failure, so every start-up
//! failure ends the process with a non-zero status.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::thread;
use structopt::StructOpt;

// Internal
use fish_lib::{
    act_link::{self, sim::SimServo, ActLink, Transport},
    motion::{MotionGen, StopHandle},
    params::FishExecParams,
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(
    name = "fish_exec",
    about = "Oscillates a single Dynamixel actuator"
)]
struct Args {
    /// Parameter file, defaults to $FISH_SW_ROOT/params/fish_exec.toml
    #[structopt(short, long, parse(from_os_str))]
    params: Option<PathBuf>,

    /// Drive a simulated actuator instead of the serial channel
    #[structopt(long)]
    sim: bool,

    /// Log debug messages
    #[structopt(short, long)]
    verbose: bool,

    /// Only log warnings and errors
    #[structopt(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let args = Args::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("fish_exec").wrap_err("Failed to create the session")?;

    // Initialise logger
    let level = if args.verbose {
        LevelFilter::Debug
    } else if args.quiet {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    };
    logger_init(level, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Fish Executable\n");
    info!(
        "Running on: {:#?}",
        host::get_uname().wrap_err("Failed to get host information")?
    );
    debug!("CLI arguments: {:?}", args);

    // Installed before the actuator is touched, a signal during start-up still goes through the
    // normal shutdown
    let stop_handle = StopHandle::default();
    let handler_stop = stop_handle.clone();
    ctrlc::set_handler(move || handler_stop.stop())
        .wrap_err("Failed to install the signal handler")?;

    // ---- LOAD PARAMETERS ----

    let params: FishExecParams = match &args.params {
        Some(p) => util::params::load_path(p),
        None => util::params::load("fish_exec.toml"),
    }
    .wrap_err("Could not load exec params")?;

    let motion_params = params
        .motion
        .motion_params()
        .wrap_err("Invalid motion parameters")?;

    info!("Exec parameters loaded");

    // ---- INITIALISE ACTUATOR ----

    let mut link = if args.sim {
        info!("Using a simulated actuator");
        let servo: Box<dyn Transport> = Box::new(SimServo::new(
            params.link.actuator_id,
            params.link.protocol_version,
        ));
        ActLink::new(servo, &params.link)
    } else {
        act_link::open(&params.link).wrap_err("Failed to open the actuator channel")?
    };

    link.verify_presence()
        .wrap_err("Actuator presence check failed")?;

    // Preparation can fail after torque has been re-enabled
    if let Err(e) = link.prepare(params.motion.operating_mode, &params.motion.profile()) {
        if let Err(r) = link.halt_and_release() {
            warn!("{}", r);
        }
        return Err(e).wrap_err("Failed to prepare the actuator");
    }

    match link.present_position() {
        Ok(p) => info!("Present position: {}", p),
        Err(e) => warn!("{}", e),
    }

    match link.hardware_error_status() {
        Ok(0) => (),
        Ok(s) => warn!("Actuator reports hardware errors: {:#010b}", s),
        Err(e) => warn!("{}", e),
    }

    // ---- MAIN LOOP ----

    let mut motion_gen = MotionGen::new(motion_params, params.motion.waveform.build())
        .with_stop_handle(stop_handle.clone());

    if stop_handle.is_stopped() {
        info!("Stop requested during start-up, skipping the main loop");
    } else {
        info!("Beginning main loop\n");
    }

    let result = motion_gen.run(&mut link, &params.motion.run_options());

    // ---- SHUTDOWN ----

    if params.motion.park_on_stop && link.is_open() {
        let center = motion_gen.params().center();
        match link.set_position(center) {
            Ok(()) => {
                info!("Parking at {}", center);
                thread::sleep(params.motion.park_settle());
            }
            Err(e) => warn!("Could not park the actuator: {}", e),
        }
    }

    if params.motion.release_on_exit {
        if let Err(e) = link.halt_and_release() {
            warn!("{}", e);
        }
    } else {
        link.close();
    }

    let report = result.wrap_err("Motion ended with an unrecoverable error")?;

    info!(
        "Run report: {}",
        serde_json::to_string(&report).wrap_err("Could not serialise the run report")?
    );
    info!("End of execution");

    Ok(())
}
