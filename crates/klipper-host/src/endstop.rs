//! `MCU_endstop` (spec §2 Endstop, §4.4's homing protocol): arms the
//! stepper's queue against a homing barrier, issues `end_stop_home`, and
//! polls `_check_busy`-style for the MCU's `end_stop_state` reply. Holds
//! a strong reference to its [`Stepper`] (no cycle: `Stepper` never
//! references its endstop) and a non-owning reference back to the MCU.

use crate::error::McuError;
use crate::mcu::McuInner;
use crate::reactor::EventTime;
use crate::stepper::Stepper;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// One `end_stop_state` reply, as reported to [`Endstop::on_end_stop_state`].
#[derive(Debug, Clone, Copy)]
struct EndStopState {
    /// Host eventtime this reply was received/processed at — compared
    /// against `min_query_time` the way klippy's `_check_busy` does.
    sent_time: EventTime,
    /// The MCU clock the reply says the query/trigger happened at.
    sent_clock: u64,
    /// Wire `homing` field: nonzero means the MCU is still armed and
    /// watching; zero means it reports a trigger (has `pos` to give).
    homing_wire: bool,
    pos: i64,
}

/// `_check_busy`'s outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckBusyResult {
    Busy,
    Done,
}

struct EndstopInner {
    oid: u32,
    stepper: Stepper,
    mcu: Weak<RefCell<McuInner>>,
    invert: bool,
    homing: bool,
    min_query_time: EventTime,
    next_query_clock: u64,
    home_timeout_clock: u64,
    retry_query_ticks: u64,
    last_state: Option<EndStopState>,
    /// Last pin reading observed via a non-homing `query_endstop`,
    /// defaulting to `invert` so an absent reply's `pin ^ invert` reads
    /// as inactive (spec §4.4's `query_endstop_wait`).
    last_pin: bool,
}

#[derive(Clone)]
pub struct Endstop {
    inner: Rc<RefCell<EndstopInner>>,
}

impl Endstop {
    pub(crate) fn new(oid: u32, stepper: Stepper, mcu: Weak<RefCell<McuInner>>, invert: bool) -> Self {
        Endstop {
            inner: Rc::new(RefCell::new(EndstopInner {
                oid,
                stepper,
                mcu,
                invert,
                homing: false,
                min_query_time: 0.0,
                next_query_clock: 0,
                home_timeout_clock: 0,
                retry_query_ticks: 0,
                last_state: None,
                last_pin: invert,
            })),
        }
    }

    pub fn oid(&self) -> u32 {
        self.inner.borrow().oid
    }

    pub fn stepper(&self) -> Stepper {
        self.inner.borrow().stepper.clone()
    }

    fn upgrade(&self) -> Result<Rc<RefCell<McuInner>>, McuError> {
        self.inner.borrow().mcu.upgrade().ok_or(McuError::Transport("mcu dropped".into()))
    }

    fn mcu_freq(&self) -> Result<f64, McuError> {
        Ok(self.upgrade()?.borrow().transport.dictionary().clock_freq)
    }

    /// `home_start(mcu_time, rest_time)`: sends `end_stop_home oid clock
    /// rest_ticks pin_value` with `pin_value = 1 XOR invert`, arms the
    /// first retry query one second out, and installs the stepper's
    /// homing barrier at `clock`.
    pub fn home_start(&self, eventtime: EventTime, clock: u64, rest_ticks: u32) -> Result<(), McuError> {
        let mcu_freq = self.mcu_freq()?;
        let mcu = self.upgrade()?;
        let oid = self.oid();
        let pin_value = self.inner.borrow().invert ^ true;
        {
            let mut mcu = mcu.borrow_mut();
            if mcu.is_shutdown() {
                return Err(mcu.shutdown_error());
            }
            if let Some(fmt) = mcu.transport.msgparser().lookup_command("end_stop_home").cloned() {
                if let Ok(payload) = fmt.encode(&[
                    (oid as i64).into(),
                    (clock as i64).into(),
                    (rest_ticks as i64).into(),
                    (pin_value as i64).into(),
                ]) {
                    mcu.transport.send(payload, 0, clock, None);
                }
            }
        }
        let retry_query_ticks = mcu_freq.round() as u64;
        {
            let mut inner = self.inner.borrow_mut();
            inner.homing = true;
            inner.last_state = None;
            inner.min_query_time = eventtime;
            inner.retry_query_ticks = retry_query_ticks;
            inner.next_query_clock = clock + retry_query_ticks;
        }
        self.inner.borrow().stepper.note_homing_start(clock);
        Ok(())
    }

    /// `home_finalize(mcu_time)`: tells the stepper homing is complete
    /// (clears the barrier) and records the deadline `home_wait` polls
    /// against.
    pub fn home_finalize(&self, mcu_time: f64) -> Result<(), McuError> {
        let mcu_freq = self.mcu_freq()?;
        self.inner.borrow_mut().home_timeout_clock = (mcu_time * mcu_freq).round() as u64;
        self.inner.borrow().stepper.note_homing_finalized();
        Ok(())
    }

    /// Feeds one `end_stop_state { homing, pin, pos, #sent_time }` reply
    /// into the state machine — a host application calls this from its
    /// response dispatch, the same way `_handle_end_stop_state` does.
    pub fn on_end_stop_state(&self, sent_time: EventTime, sent_clock: u64, homing_wire: bool, pin: bool, pos: i64) {
        let mut inner = self.inner.borrow_mut();
        inner.last_state = Some(EndStopState { sent_time, sent_clock, homing_wire, pos });
        inner.last_pin = pin;
    }

    /// `_check_busy`: the homing state machine's one poll step. File-output
    /// mode isn't modeled separately here — a dry-run transport simply
    /// never produces a trigger reply, so `home_wait`'s deadline check
    /// ends the wait the same way a real timeout would.
    fn check_busy(&self, eventtime: EventTime) -> Result<CheckBusyResult, McuError> {
        let mcu = self.upgrade()?;
        let (last_clock, _) = mcu.borrow().transport.get_last_clock();

        let mut inner = self.inner.borrow_mut();
        if let Some(state) = inner.last_state {
            if state.sent_time >= inner.min_query_time {
                if !inner.homing {
                    return Ok(CheckBusyResult::Done);
                }
                if !state.homing_wire {
                    let stepper = inner.stepper.clone();
                    let pos = if stepper.invert_dir() { -state.pos } else { state.pos };
                    drop(inner);
                    stepper.set_mcu_position(pos);
                    self.inner.borrow_mut().homing = false;
                    return Ok(CheckBusyResult::Done);
                }
                if state.sent_clock > inner.home_timeout_clock {
                    let oid = inner.oid;
                    drop(inner);
                    self.send_disarm(&mcu, oid);
                    return Err(McuError::HomingTimeout);
                }
            }
        }
        if mcu.borrow().is_shutdown() {
            return Err(mcu.borrow().shutdown_error());
        }
        if last_clock >= inner.next_query_clock {
            let oid = inner.oid;
            let retry = inner.retry_query_ticks;
            inner.next_query_clock += retry;
            drop(inner);
            self.send_query(&mcu, oid);
        }
        Ok(CheckBusyResult::Busy)
    }

    fn send_disarm(&self, mcu: &Rc<RefCell<McuInner>>, oid: u32) {
        let mut mcu = mcu.borrow_mut();
        if let Some(fmt) = mcu.transport.msgparser().lookup_command("end_stop_home").cloned() {
            if let Ok(payload) = fmt.encode(&[(oid as i64).into(), 0i64.into(), 0i64.into(), 0i64.into()]) {
                mcu.transport.send(payload, 0, 0, None);
            }
        }
    }

    fn send_query(&self, mcu: &Rc<RefCell<McuInner>>, oid: u32) {
        let mut mcu = mcu.borrow_mut();
        if let Some(fmt) = mcu.transport.msgparser().lookup_command("end_stop_query").cloned() {
            if let Ok(payload) = fmt.encode(&[(oid as i64).into()]) {
                mcu.transport.send(payload, 0, 0, None);
            }
        }
    }

    /// `home_wait`: spins in `pause(eventtime + 0.1)` steps while
    /// [`Self::check_busy`] reports busy, up to `deadline`.
    pub fn home_wait(&self, mut eventtime: EventTime, deadline: EventTime) -> Result<u64, McuError> {
        loop {
            match self.check_busy(eventtime)? {
                CheckBusyResult::Done => {
                    return Ok(self.inner.borrow().last_state.map(|s| s.sent_clock).unwrap_or(0));
                }
                CheckBusyResult::Busy => {
                    if eventtime >= deadline {
                        let oid = self.oid();
                        let mcu = self.upgrade()?;
                        self.send_disarm(&mcu, oid);
                        return Err(McuError::HomingTimeout);
                    }
                    eventtime += 0.1;
                }
            }
        }
    }

    /// `query_endstop(mcu_time)`: asks the MCU for the pin's current
    /// state non-homingly.
    pub fn query_endstop(&self) -> Result<(), McuError> {
        let mcu = self.upgrade()?;
        if mcu.borrow().is_shutdown() {
            return Err(mcu.borrow().shutdown_error());
        }
        let oid = self.oid();
        self.send_query(&mcu, oid);
        Ok(())
    }

    /// `query_endstop_wait`: returns `pin XOR invert` from the last
    /// observed reading, defaulting that reading to `invert` itself so a
    /// missing reply reads as inactive (`invert XOR invert == false`).
    pub fn query_endstop_wait(&self) -> bool {
        let inner = self.inner.borrow();
        inner.last_pin ^ inner.invert
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcu::McuController;
    use klipper_proto::commands::Dictionary;

    fn setup() -> (McuController, Endstop) {
        let mcu = McuController::connect_file("mcu", Dictionary::simulated());
        let stepper = mcu.create_stepper("PA0", "PA1", 10, true);
        let endstop = mcu.create_endstop("PA2", &stepper, true, true);
        mcu.build_config().unwrap();
        (mcu, endstop)
    }

    #[test]
    fn home_start_arms_the_stepper_barrier_at_the_start_clock() {
        let (_mcu, endstop) = setup();
        endstop.home_start(0.0, 1_000, 100).unwrap();
        let stepper = endstop.stepper();
        assert!(!stepper.queue_step(1_500));
        stepper.note_homing_finalized();
    }

    #[test]
    fn homing_success_reports_the_inverted_trigger_position() {
        let (mcu, endstop) = setup();
        mcu.note_alive(0.0);
        endstop.home_start(0.0, 0, 100).unwrap();
        endstop.home_finalize(1.0).unwrap();
        endstop.on_end_stop_state(0.5, 500, false, true, 42);
        let stepper = endstop.stepper();
        let _ = endstop.home_wait(0.5, 10.0).unwrap();
        assert_eq!(stepper.get_mcu_position(), -42);
    }

    #[test]
    fn home_wait_times_out_past_deadline_with_no_reply() {
        let (mcu, endstop) = setup();
        mcu.note_alive(0.0);
        endstop.home_start(0.0, 0, 100).unwrap();
        endstop.home_finalize(1.0).unwrap();
        let err = endstop.home_wait(0.0, 0.05).unwrap_err();
        assert!(matches!(err, McuError::HomingTimeout));
    }

    #[test]
    fn query_endstop_wait_defaults_to_inactive_then_follows_the_xor_law() {
        let (_mcu, endstop) = setup();
        assert!(!endstop.query_endstop_wait());
        endstop.on_end_stop_state(0.0, 0, true, false, 0);
        assert!(endstop.query_endstop_wait());
        endstop.on_end_stop_state(0.0, 0, true, true, 0);
        assert!(!endstop.query_endstop_wait());
    }
}
