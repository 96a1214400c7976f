//! `MCU_stepper` (spec §2 Stepper, §4.3): a single stepper's step-pulse
//! queue plus its commanded-position bookkeeping. Owns its
//! [`StepQueue`] outright (no other object type references it); holds
//! only a non-owning [`Weak`] reference back to the MCU so it can send
//! `reset_step_clock`/`set_next_step_dir` and read shutdown state.

use crate::error::McuError;
use crate::mcu::McuInner;
use klipper_stepcompress::StepQueue;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

struct StepperInner {
    oid: u32,
    queue: Rc<RefCell<StepQueue>>,
    mcu: Weak<RefCell<McuInner>>,
    invert_dir: bool,
    /// Host-authoritative step count of host-commanded motion (spec
    /// §3's `commanded_position`).
    commanded_position: i64,
    /// Such that `commanded_position + mcu_position_offset` is the
    /// MCU-side absolute step counter outside an in-progress homing
    /// sequence.
    mcu_position_offset: i64,
    /// The last direction sent via `set_next_step_dir`, wire-level
    /// (already XOR'd against `invert_dir`) — `None` until the first
    /// `step()` call, so that call always emits the direction command.
    last_dir_wire: Option<bool>,
}

/// A cloneable handle to one stepper's queue and position state.
#[derive(Clone)]
pub struct Stepper {
    inner: Rc<RefCell<StepperInner>>,
}

impl Stepper {
    pub(crate) fn new(oid: u32, queue: Rc<RefCell<StepQueue>>, mcu: Weak<RefCell<McuInner>>, invert_dir: bool) -> Self {
        Stepper {
            inner: Rc::new(RefCell::new(StepperInner {
                oid,
                queue,
                mcu,
                invert_dir,
                commanded_position: 0,
                mcu_position_offset: 0,
                last_dir_wire: None,
            })),
        }
    }

    pub fn oid(&self) -> u32 {
        self.inner.borrow().oid
    }

    fn upgrade(&self) -> Result<Rc<RefCell<McuInner>>, McuError> {
        self.inner.borrow().mcu.upgrade().ok_or(McuError::Transport("mcu dropped".into()))
    }

    pub fn commanded_position(&self) -> i64 {
        self.inner.borrow().commanded_position
    }

    /// `set_position`: re-labels the host's step counter without moving
    /// the MCU — `mcu_position_offset += commanded_position - pos`, then
    /// `commanded_position = pos`, leaving `get_mcu_position()` unchanged.
    pub fn set_position(&self, pos: i64) {
        let mut inner = self.inner.borrow_mut();
        inner.mcu_position_offset += inner.commanded_position - pos;
        inner.commanded_position = pos;
    }

    /// `set_mcu_position`: the inverse of [`Self::set_position`] — treats
    /// `pos` as the MCU's authoritative position (as reported by an
    /// endstop trigger) and re-anchors `mcu_position_offset` so that
    /// `get_mcu_position()` becomes `pos` without touching
    /// `commanded_position`.
    pub fn set_mcu_position(&self, pos: i64) {
        let mut inner = self.inner.borrow_mut();
        inner.mcu_position_offset = pos - inner.commanded_position;
    }

    pub fn get_mcu_position(&self) -> i64 {
        let inner = self.inner.borrow();
        inner.commanded_position + inner.mcu_position_offset
    }

    /// Whether this stepper's `dir_pin` wiring is inverted — an endstop
    /// homing against this stepper negates the MCU-reported trigger
    /// position when this is set (spec §4.4's `home_wait`).
    pub fn invert_dir(&self) -> bool {
        self.inner.borrow().invert_dir
    }

    /// `reset_step_clock`: tells the MCU to treat `clock` as this
    /// stepper's step-queue baseline, and resets the local compressor's
    /// notion of the same.
    pub fn reset_step_clock(&self, clock: u64) -> Result<(), McuError> {
        let mcu = self.upgrade()?;
        let oid = self.oid();
        {
            let mut inner = mcu.borrow_mut();
            if inner.is_shutdown() {
                return Err(inner.shutdown_error());
            }
            if let Some(fmt) = inner.transport.msgparser().lookup_command("reset_step_clock").cloned() {
                if let Ok(payload) = fmt.encode(&[(oid as i64).into(), (clock as i64).into()]) {
                    inner.transport.send(payload, 0, clock, None);
                }
            }
        }
        self.inner.borrow().queue.borrow_mut().reset(clock);
        self.inner.borrow_mut().last_dir_wire = None;
        Ok(())
    }

    /// Arms (or disarms, with `None`) the homing barrier clock past which
    /// this stepper's queue refuses further step pushes.
    pub fn note_homing_start(&self, home_end_clock: u64) {
        self.inner.borrow().queue.borrow_mut().set_homing(Some(home_end_clock));
    }

    /// `note_homing_finalized`: clears the barrier and, mirroring
    /// klippy's `stepper_note_homing_end`, discards whatever's left
    /// queued so the next push starts clean from the MCU position the
    /// endstop reported.
    pub fn note_homing_finalized(&self) {
        let inner = self.inner.borrow();
        let mut queue = inner.queue.borrow_mut();
        let last_clock = queue.last_clock_seen();
        queue.set_homing(None);
        queue.reset(last_clock);
    }

    pub fn get_errors(&self) -> u32 {
        self.inner.borrow().queue.borrow().get_errors()
    }

    fn send_dir_if_changed(&self, wire_dir: bool) -> Result<(), McuError> {
        let needs_send = self.inner.borrow().last_dir_wire != Some(wire_dir);
        if !needs_send {
            return Ok(());
        }
        let mcu = self.upgrade()?;
        let oid = self.oid();
        {
            let mut mcu = mcu.borrow_mut();
            if mcu.is_shutdown() {
                return Err(mcu.shutdown_error());
            }
            if let Some(fmt) = mcu.transport.msgparser().lookup_command("set_next_step_dir").cloned() {
                if let Ok(payload) = fmt.encode(&[(oid as i64).into(), (wire_dir as i64).into()]) {
                    mcu.transport.send(payload, 0, 0, None);
                }
            }
        }
        // A direction change can't be folded into the in-progress
        // arithmetic run — klippy closes it out first.
        self.inner.borrow().queue.borrow_mut().finalize_pending();
        self.inner.borrow_mut().last_dir_wire = Some(wire_dir);
        Ok(())
    }

    /// `step(mcu_time, sdir)`: a single pulse in direction `sdir` (host
    /// convention, pre-inversion). Emits `set_next_step_dir` only when
    /// the direction actually changes, then pushes the pulse; on success
    /// `commanded_position` moves by `+1`/`-1` to match `sdir`.
    pub fn step(&self, clock: u64, sdir: bool) -> Result<u32, McuError> {
        let wire_dir = sdir ^ self.inner.borrow().invert_dir;
        self.send_dir_if_changed(wire_dir)?;
        let placed = self.inner.borrow().queue.borrow_mut().push_step(clock);
        if placed > 0 {
            let mut inner = self.inner.borrow_mut();
            inner.commanded_position += if sdir { 1 } else { -1 };
        }
        Ok(placed)
    }

    /// Pushes a pre-computed absolute clock directly, bypassing
    /// direction bookkeeping — used by tests and by callers that already
    /// hold a raw clock stream. Does not touch `commanded_position`.
    pub fn queue_step(&self, clock: u64) -> bool {
        self.inner.borrow().queue.borrow_mut().push_clock(clock)
    }

    /// `step_sqrt`: a Bresenham-style square-root generator. `steps`
    /// pulses are attempted in the direction already latched by the most
    /// recent `step()`/`set_next_step_dir`; the queue returns the count
    /// actually placed, added unsigned to `commanded_position` — the
    /// caller already knows which way that count moved the axis.
    pub fn step_sqrt(&self, start_clock: u64, steps: u32, step_offset: f64, sqrt_offset: f64, factor: f64) -> u32 {
        let placed = self
            .inner
            .borrow()
            .queue
            .borrow_mut()
            .push_step_sqrt(start_clock, steps, step_offset, sqrt_offset, factor);
        self.inner.borrow_mut().commanded_position += placed as i64;
        placed
    }

    pub fn step_factor(&self, start_clock: u64, steps: u32, step_offset: f64, factor: f64) -> u32 {
        let placed = self.inner.borrow().queue.borrow_mut().push_step_factor(start_clock, steps, step_offset, factor);
        self.inner.borrow_mut().commanded_position += placed as i64;
        placed
    }

    pub fn step_delta_const(&self, start_clock: u64, steps: u32, step_offset: f64, factor: f64) -> u32 {
        let placed = self
            .inner
            .borrow()
            .queue
            .borrow_mut()
            .push_step_delta_const(start_clock, steps, step_offset, factor);
        self.inner.borrow_mut().commanded_position += placed as i64;
        placed
    }

    pub fn step_delta_accel(&self, start_clock: u64, steps: u32, step_offset: f64, inv_velocity: f64, accel: f64) -> u32 {
        let placed = self
            .inner
            .borrow()
            .queue
            .borrow_mut()
            .push_step_delta_accel(start_clock, steps, step_offset, inv_velocity, accel);
        self.inner.borrow_mut().commanded_position += placed as i64;
        placed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcu::McuController;
    use klipper_proto::commands::Dictionary;

    #[test]
    fn set_position_relabels_without_moving_the_mcu() {
        let mcu = McuController::connect_file("mcu", Dictionary::simulated());
        let stepper = mcu.create_stepper("PA0", "PA1", 10, false);
        mcu.build_config().unwrap();
        stepper.reset_step_clock(0).unwrap();
        for i in 1..=10u64 {
            stepper.step(i * 100, true).unwrap();
        }
        assert_eq!(stepper.commanded_position(), 10);
        assert_eq!(stepper.get_mcu_position(), 10);

        stepper.set_position(0);
        assert_eq!(stepper.commanded_position(), 0);
        assert_eq!(stepper.get_mcu_position(), 10);

        stepper.step(1_100, false).unwrap();
        assert_eq!(stepper.commanded_position(), -1);
        assert_eq!(stepper.get_mcu_position(), 9);
    }

    #[test]
    fn set_mcu_position_re_anchors_the_offset() {
        let mcu = McuController::connect_file("mcu", Dictionary::simulated());
        let stepper = mcu.create_stepper("PA0", "PA1", 10, true);
        mcu.build_config().unwrap();
        stepper.set_mcu_position(-42);
        assert_eq!(stepper.get_mcu_position(), -42);
        assert_eq!(stepper.commanded_position(), 0);
    }

    #[test]
    fn direction_change_does_not_break_position_accounting() {
        let mcu = McuController::connect_file("mcu", Dictionary::simulated());
        let stepper = mcu.create_stepper("PA0", "PA1", 10, false);
        mcu.build_config().unwrap();
        stepper.reset_step_clock(0).unwrap();
        stepper.step(100, true).unwrap();
        stepper.step(200, true).unwrap();
        stepper.step(300, false).unwrap();
        assert_eq!(stepper.commanded_position(), 1);
    }

    #[test]
    fn homing_barrier_rejects_steps_past_the_clock() {
        let mcu = McuController::connect_file("mcu", Dictionary::simulated());
        let stepper = mcu.create_stepper("PA0", "PA1", 10, false);
        stepper.note_homing_start(500);
        assert!(stepper.queue_step(400));
        assert!(!stepper.queue_step(600));
        assert_eq!(stepper.get_errors(), 1);
    }

    #[test]
    fn generator_pushes_add_unsigned_counts_to_commanded_position() {
        let mcu = McuController::connect_file("mcu", Dictionary::simulated());
        let stepper = mcu.create_stepper("PA0", "PA1", 10, false);
        mcu.build_config().unwrap();
        stepper.reset_step_clock(0).unwrap();
        let placed = stepper.step_factor(0, 5, 0.0, 1_000.0);
        assert_eq!(placed, 5);
        assert_eq!(stepper.commanded_position(), 5);
    }

    #[test]
    fn reset_step_clock_requires_config_first() {
        let mcu = McuController::connect_file("mcu", Dictionary::simulated());
        let stepper = mcu.create_stepper("PA0", "PA1", 10, false);
        mcu.build_config().unwrap();
        assert!(stepper.reset_step_clock(0).is_ok());
    }
}
