//! Motion generator state machine.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};
use std::time::{Duration, Instant};

use log::info;
use serde::Serialize;

use super::{MotionParams, TickError, Waveform};
use crate::act_link::PositionSink;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Source of monotonic time for the generator.
pub trait Clock {
    fn now(&self) -> Instant;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// [`Clock`] reading [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

/// Generates the oscillation and feeds it to a [`PositionSink`].
pub struct MotionGen<C: Clock = MonotonicClock> {
    params: MotionParams,
    waveform: Box<dyn Waveform>,
    clock: C,

    /// Instant the trajectory started, set once
    start: Option<Instant>,

    state: GenState,

    stop_flag: StopHandle,
    pending_params: ParamsHandle,

    pub(super) stats: TickStats,
    last_position: Option<i32>,
}

/// Cloneable flag which stops the generator, safe to raise from any thread.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

/// Cloneable slot through which new parameters are handed to a running generator.
#[derive(Debug, Clone, Default)]
pub struct ParamsHandle(Arc<Mutex<Option<MotionParams>>>);

/// Tick bookkeeping. Never used to compute positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickStats {
    /// Ticks attempted
    pub ticks: u64,

    pub write_errors: u64,

    /// Write errors since the last successful write
    pub consecutive_write_errors: u32,

    /// Ticks which took longer than the tick period
    pub overruns: u64,
}

/// Result of a successful tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TickReport {
    pub elapsed_s: f64,
    pub position: i32,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GenState {
    Uninitialised,
    Running,

    /// Terminal
    Stopped,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl MotionGen<MonotonicClock> {
    pub fn new(params: MotionParams, waveform: Box<dyn Waveform>) -> Self {
        Self::with_clock(params, waveform, MonotonicClock)
    }
}

impl<C: Clock> MotionGen<C> {
    pub fn with_clock(params: MotionParams, waveform: Box<dyn Waveform>, clock: C) -> Self {
        Self {
            params,
            waveform,
            clock,
            start: None,
            state: GenState::Uninitialised,
            stop_flag: StopHandle::default(),
            pending_params: ParamsHandle::default(),
            stats: TickStats::default(),
            last_position: None,
        }
    }

    /// Use an existing stop flag, so a stop can be requested before the generator exists.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop_flag = stop;
        self
    }

    /// Capture the start instant. Does nothing if already started or stopped.
    pub fn start(&mut self) {
        if self.state == GenState::Uninitialised {
            self.start = Some(self.clock.now());
            self.state = GenState::Running;
            info!(
                "Motion started: {} ± {} at {} Hz",
                self.params.center(),
                self.params.amplitude(),
                self.params.frequency_hz()
            );
        }
    }

    /// Compute the position for the current instant and send it to `sink`.
    ///
    /// A failed write is returned but leaves the generator running.
    pub fn tick<S: PositionSink + ?Sized>(&mut self, sink: &mut S) -> Result<TickReport, TickError> {
        if self.stop_flag.is_stopped() {
            self.stop();
        }

        match self.state {
            GenState::Stopped => return Err(TickError::Stopped),
            GenState::Uninitialised => self.start(),
            GenState::Running => (),
        }

        if let Some(p) = self.pending_params.take() {
            info!(
                "New motion parameters: {} ± {} at {} Hz",
                p.center(),
                p.amplitude(),
                p.frequency_hz()
            );
            self.params = p;
        }

        let elapsed_s = self.elapsed().as_secs_f64();
        let position = self.params.position_at(self.waveform.as_ref(), elapsed_s);

        self.stats.ticks += 1;

        match sink.set_position(position) {
            Ok(()) => {
                self.stats.consecutive_write_errors = 0;
                self.last_position = Some(position);
                Ok(TickReport {
                    elapsed_s,
                    position,
                })
            }
            Err(source) => {
                self.stats.write_errors += 1;
                self.stats.consecutive_write_errors += 1;
                Err(TickError::Write {
                    position,
                    elapsed_s,
                    source,
                })
            }
        }
    }

    /// Stop the generator for good. Calling this again has no further effect.
    pub fn stop(&mut self) {
        if self.state != GenState::Stopped {
            self.state = GenState::Stopped;
            info!("Motion stopped after {:.3} s", self.elapsed().as_secs_f64());
        }
        self.stop_flag.stop();
    }

    /// Time since the start, zero if not started.
    pub fn elapsed(&self) -> Duration {
        match self.start {
            Some(s) => self.clock.now().saturating_duration_since(s),
            None => Duration::from_secs(0),
        }
    }

    pub fn state(&self) -> GenState {
        self.state
    }

    pub fn params(&self) -> &MotionParams {
        &self.params
    }

    pub fn stats(&self) -> TickStats {
        self.stats
    }

    /// Last position successfully written.
    pub fn last_position(&self) -> Option<i32> {
        self.last_position
    }

    /// Whether a stop has been requested, through [`MotionGen::stop`] or a [`StopHandle`].
    pub fn is_stop_requested(&self) -> bool {
        self.stop_flag.is_stopped()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop_flag.clone()
    }

    pub fn params_handle(&self) -> ParamsHandle {
        self.pending_params.clone()
    }
}

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl ParamsHandle {
    /// Queue parameters to be applied at the start of the next tick, replacing any already queued.
    pub fn submit(&self, params: MotionParams) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(params);
    }

    fn take(&self) -> Option<MotionParams> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::super::Sine;
    use super::*;
    use crate::act_link::{LinkError, TxError};
    use dxl_if::PositionRange;
    use proptest::prelude::*;
    use std::{cell::Cell, rc::Rc};

    /// Clock which only moves when told to.
    #[derive(Clone)]
    struct ManualClock {
        origin: Instant,
        offset: Rc<Cell<Duration>>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                origin: Instant::now(),
                offset: Rc::new(Cell::new(Duration::from_secs(0))),
            }
        }

        fn set(&self, secs: f64) {
            self.offset.set(Duration::from_secs_f64(secs));
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.origin + self.offset.get()
        }
    }

    /// Sink recording positions, failing on chosen calls.
    #[derive(Default)]
    struct Recorder {
        positions: Vec<i32>,
        fail_on: Vec<usize>,
        calls: usize,
    }

    impl PositionSink for Recorder {
        fn set_position(&mut self, position: i32) -> Result<(), LinkError> {
            let call = self.calls;
            self.calls += 1;

            if self.fail_on.contains(&call) {
                return Err(LinkError::Write {
                    id: 1,
                    position,
                    cause: TxError::Timeout(Duration::from_millis(50)),
                });
            }

            self.positions.push(position);
            Ok(())
        }
    }

    fn params(center: i32) -> MotionParams {
        MotionParams::new(
            center,
            400,
            0.5,
            Duration::from_millis(20),
            PositionRange::X_SERIES,
        )
        .unwrap()
    }

    fn manual_gen() -> (MotionGen<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let gen = MotionGen::with_clock(params(2048), Box::new(Sine), clock.clone());
        (gen, clock)
    }

    #[test]
    fn test_ticks_follow_elapsed_time() {
        let (mut gen, clock) = manual_gen();
        let mut sink = Recorder::default();

        assert_eq!(gen.state(), GenState::Uninitialised);

        // First tick starts the generator
        let r = gen.tick(&mut sink).unwrap();
        assert_eq!(gen.state(), GenState::Running);
        assert_eq!(r.position, 2048);

        for &(t, expected) in &[(0.5, 2448), (1.0, 2048), (1.5, 1648), (0.25, 2331)] {
            clock.set(t);
            assert_eq!(gen.tick(&mut sink).unwrap().position, expected);
        }

        assert_eq!(sink.positions, vec![2048, 2448, 2048, 1648, 2331]);
        assert_eq!(gen.stats().ticks, 5);
        assert_eq!(gen.last_position(), Some(2331));
    }

    #[test]
    fn test_start_is_captured_once() {
        let (mut gen, clock) = manual_gen();

        clock.set(2.0);
        gen.start();
        clock.set(2.5);
        gen.start();

        assert_eq!(gen.elapsed(), Duration::from_millis(500));
    }

    #[test]
    fn test_write_error_keeps_running() {
        let (mut gen, clock) = manual_gen();
        let mut sink = Recorder {
            fail_on: vec![1, 2],
            ..Default::default()
        };

        gen.tick(&mut sink).unwrap();

        clock.set(0.5);
        match gen.tick(&mut sink) {
            Err(TickError::Write { position: 2448, .. }) => (),
            r => panic!("Expected a write error, got {:?}", r),
        }
        clock.set(1.5);
        assert!(gen.tick(&mut sink).is_err());
        assert_eq!(gen.stats().consecutive_write_errors, 2);
        assert_eq!(gen.state(), GenState::Running);

        clock.set(2.5);
        assert_eq!(gen.tick(&mut sink).unwrap().position, 2448);

        let stats = gen.stats();
        assert_eq!(stats.ticks, 4);
        assert_eq!(stats.write_errors, 2);
        assert_eq!(stats.consecutive_write_errors, 0);
    }

    #[test]
    fn test_early_stop_request() {
        let stop = StopHandle::default();
        stop.stop();

        let (gen, _clock) = manual_gen();
        let mut gen = gen.with_stop_handle(stop);
        let mut sink = Recorder::default();

        assert!(gen.is_stop_requested());
        assert!(matches!(gen.tick(&mut sink), Err(TickError::Stopped)));
        assert_eq!(gen.state(), GenState::Stopped);
        assert!(sink.positions.is_empty());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (mut gen, _clock) = manual_gen();
        let mut sink = Recorder::default();
        gen.tick(&mut sink).unwrap();

        gen.stop();
        let after_once = (gen.state(), gen.stats(), gen.stop_handle().is_stopped());
        gen.stop();
        let after_twice = (gen.state(), gen.stats(), gen.stop_handle().is_stopped());

        assert_eq!(after_once, after_twice);
        assert_eq!(after_twice.0, GenState::Stopped);
        assert!(matches!(gen.tick(&mut sink), Err(TickError::Stopped)));

        // Stopping is terminal
        gen.start();
        assert_eq!(gen.state(), GenState::Stopped);
        assert_eq!(sink.positions.len(), 1);
    }

    #[test]
    fn test_stop_handle_from_another_thread() {
        let (mut gen, _clock) = manual_gen();
        let mut sink = Recorder::default();
        gen.tick(&mut sink).unwrap();

        let handle = gen.stop_handle();
        std::thread::spawn(move || handle.stop()).join().unwrap();

        assert!(matches!(gen.tick(&mut sink), Err(TickError::Stopped)));
        assert_eq!(gen.state(), GenState::Stopped);
    }

    #[test]
    fn test_params_swapped_at_next_tick() {
        let (mut gen, clock) = manual_gen();
        let mut sink = Recorder::default();
        let handle = gen.params_handle();

        clock.set(0.5);
        gen.tick(&mut sink).unwrap();

        // Second submission replaces the first
        handle.submit(params(1000));
        handle.submit(params(3000));
        assert_eq!(gen.params().center(), 2048);

        assert_eq!(gen.tick(&mut sink).unwrap().position, 3400);
        assert_eq!(gen.params().center(), 3000);

        // Phase is unaffected by the swap
        clock.set(1.0);
        assert_eq!(gen.tick(&mut sink).unwrap().position, 3000);
    }

    proptest! {
        #[test]
        fn position_independent_of_tick_history(
            history in proptest::collection::vec(0.0f64..100.0, 0..20),
            t in 0.0f64..100.0,
        ) {
            let mut sink = Recorder::default();

            let (mut jittery, clock) = manual_gen();
            jittery.tick(&mut sink).unwrap();
            for h in history {
                clock.set(h);
                jittery.tick(&mut sink).unwrap();
            }
            clock.set(t);
            let a = jittery.tick(&mut sink).unwrap().position;

            let (mut direct, clock) = manual_gen();
            direct.start();
            clock.set(t);
            let b = direct.tick(&mut sink).unwrap().position;

            prop_assert_eq!(a, b);
            let t_ns = Duration::from_secs_f64(t).as_secs_f64();
            prop_assert_eq!(a, params(2048).position_at(&Sine, t_ns));
        }
    }
}
