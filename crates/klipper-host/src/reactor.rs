//! A minimal cooperative reactor (spec §5): one registration per timer,
//! `pause` yields the caller until the reactor's notion of time reaches
//! `waketime`. The host binary drives the real wall-clock sleep; this
//! type only owns the bookkeeping the MCU controller and its objects
//! depend on (`NEVER`, re-arming the comm-timeout timer, `home_wait`'s
//! poll loop).

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch — the same timebase klippy's
/// `reactor.monotonic()`/`time.time()` use.
pub type EventTime = f64;

/// A sentinel wake time meaning "never again" — returned by a timer
/// callback that wants to disarm itself (spec §4.2, comm-timeout).
pub const NEVER: EventTime = f64::INFINITY;

pub fn now() -> EventTime {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

/// One registered timer: a caller-supplied id and its next wake time.
/// A real reactor would hold the callback itself; here the MCU
/// controller owns the callback logic and only uses this to track the
/// single comm-timeout timer's schedule, matching spec §4.2's "a reactor
/// timer is armed for `COMM_TIMEOUT` beyond the last observed clock
/// update".
#[derive(Debug, Clone, Copy)]
pub struct TimerHandle {
    pub next_wake: EventTime,
}

#[derive(Debug, Default)]
pub struct Reactor {
    timers: Vec<TimerHandle>,
}

impl Reactor {
    pub fn new() -> Self {
        Reactor { timers: Vec::new() }
    }

    /// `register_timer`: allocates a new timer, initially disarmed
    /// (`NEVER`), and returns a handle index into this reactor.
    pub fn register_timer(&mut self) -> usize {
        self.timers.push(TimerHandle { next_wake: NEVER });
        self.timers.len() - 1
    }

    /// `update_timer`: (re)arms a previously-registered timer.
    pub fn update_timer(&mut self, handle: usize, waketime: EventTime) {
        self.timers[handle].next_wake = waketime;
    }

    pub fn next_wake(&self, handle: usize) -> EventTime {
        self.timers[handle].next_wake
    }

    /// `pause`: in the real reactor this suspends the caller until the
    /// wall clock passes `waketime`; callers that only need the
    /// bookkeeping semantics (tests, the homing poll loop) can treat this
    /// as returning the later of "now" and `waketime`.
    pub fn pause(&self, waketime: EventTime) -> EventTime {
        now().max(waketime)
    }
}
