#![deny(clippy::all)]
#![deny(warnings)]

//! Port of Klipper's `chelper` step-compression kernel
//! (`stepcompress.c`/`steppersync.c`).
//!
//! The host never sends one MCU message per step pulse: consecutive step
//! clocks that form an arithmetic progression (constant first interval,
//! constant per-step `add`) are folded into a single `queue_step
//! oid interval count add` triplet. [`StepQueue`] performs that folding
//! for one stepper; [`sync::StepperSync`] drains many queues at once while
//! respecting the MCU's finite move-slot buffer.
//!
//! The five `push_*` methods are the host-side entry points described in
//! klippy's `MCU_stepper` (`step`, `step_sqrt`, `step_factor`,
//! `step_delta_const`, `step_delta_accel`): each takes move parameters
//! already pre-scaled by `mcu_freq`/`mcu_freq^2` by the caller and expands
//! them into absolute step clocks internally, one clock at a time, through
//! [`StepQueue::push_clock`].

pub mod sync;

use std::collections::VecDeque;

/// One compressed step message ready to be sent as `queue_step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStepMsg {
    pub interval: u32,
    pub count: u16,
    pub add: i16,
    /// Absolute MCU clock of the last step in this run — the ordering key
    /// the multi-queue flush drains by.
    pub end_clock: u64,
}

#[derive(Debug, Clone, Copy)]
struct PendingRun {
    interval: u32,
    add: i16,
    count: u16,
    last_interval: i64,
    end_clock: u64,
}

/// A per-stepper ring of pending step messages, ordered by clock.
///
/// Single-producer (the host motion pipeline pushing new steps),
/// single-consumer (a [`sync::StepperSync`] flush draining completed
/// messages). Not `Sync`; share it the way the rest of this crate's host
/// expects a single-threaded cooperative reactor to own it.
#[derive(Debug)]
pub struct StepQueue {
    /// Clock the next pushed step's interval is measured from.
    last_clock: u64,
    /// Set by `note_homing_start`; steps at or past this clock are
    /// rejected until `note_homing_finalized` clears it.
    homing_clock: Option<u64>,
    pending: Option<PendingRun>,
    messages: VecDeque<QueueStepMsg>,
    error_count: u32,
}

impl Default for StepQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl StepQueue {
    pub fn new() -> Self {
        StepQueue {
            last_clock: 0,
            homing_clock: None,
            pending: None,
            messages: VecDeque::new(),
            error_count: 0,
        }
    }

    /// `reset_step_clock`: closes any in-progress run and re-anchors the
    /// interval baseline to `clock`. Required before pushing into a new
    /// time window (a fresh print, or after a homing move).
    pub fn reset(&mut self, clock: u64) {
        self.close_pending_run();
        self.last_clock = clock;
    }

    /// `stepcompress_set_homing`: a nonzero clock arms the barrier; `None`
    /// (klippy's `0`) clears it.
    pub fn set_homing(&mut self, barrier: Option<u64>) {
        self.homing_clock = barrier;
    }

    pub fn get_errors(&self) -> u32 {
        self.error_count
    }

    /// The clock the next pushed step's interval would be measured from
    /// — exposed so a caller finishing a homing move can re-anchor the
    /// queue at its own current baseline without guessing it.
    pub fn last_clock_seen(&self) -> u64 {
        self.last_clock
    }

    /// Appends one absolute step clock to the queue, merging it into the
    /// in-progress arithmetic run when the interval sequence allows.
    /// Returns `false` (and counts an error) if `clock` would move time
    /// backwards or crosses the homing barrier — the caller must not
    /// advance its position counter in that case.
    pub fn push_clock(&mut self, clock: u64) -> bool {
        if clock < self.last_clock {
            self.error_count += 1;
            return false;
        }
        if let Some(barrier) = self.homing_clock {
            if clock > barrier {
                self.error_count += 1;
                return false;
            }
        }
        let interval = (clock - self.last_clock) as u32;
        self.last_clock = clock;
        match self.pending {
            None => {
                self.pending = Some(PendingRun {
                    interval,
                    add: 0,
                    count: 1,
                    last_interval: interval as i64,
                    end_clock: clock,
                });
            }
            Some(ref mut run) if run.count == 1 => {
                run.add = (interval as i64 - run.last_interval) as i16;
                run.last_interval = interval as i64;
                run.count = 2;
                run.end_clock = clock;
            }
            Some(ref mut run) => {
                let expected = run.last_interval + run.add as i64;
                if expected == interval as i64 && run.count < u16::MAX {
                    run.count += 1;
                    run.last_interval = interval as i64;
                    run.end_clock = clock;
                } else {
                    let finished = *run;
                    self.messages.push_back(QueueStepMsg {
                        interval: finished.interval,
                        count: finished.count,
                        add: finished.add,
                        end_clock: finished.end_clock,
                    });
                    self.pending = Some(PendingRun {
                        interval,
                        add: 0,
                        count: 1,
                        last_interval: interval as i64,
                        end_clock: clock,
                    });
                }
            }
        }
        true
    }

    fn close_pending_run(&mut self) {
        if let Some(run) = self.pending.take() {
            self.messages.push_back(QueueStepMsg {
                interval: run.interval,
                count: run.count,
                add: run.add,
                end_clock: run.end_clock,
            });
        }
    }

    /// `stepcompress_push`: a single step pulse at `clock`. Returns `1` if
    /// placed, `0` if rejected (barrier or non-monotonic).
    pub fn push_step(&mut self, clock: u64) -> u32 {
        u32::from(self.push_clock(clock))
    }

    /// `stepcompress_push_sqrt`: generates up to `steps` clocks following
    /// `start_clock + round(sqrt(sqrt_offset + factor*(i + step_offset)))`,
    /// the constant-acceleration timing curve used by the kinematic move
    /// splitters. `sqrt_offset`/`factor` are expected pre-multiplied by
    /// `mcu_freq^2` by the caller. Stops early (returning the count placed
    /// so far) at the first step the queue rejects.
    pub fn push_step_sqrt(
        &mut self,
        start_clock: u64,
        steps: u32,
        step_offset: f64,
        sqrt_offset: f64,
        factor: f64,
    ) -> u32 {
        let mut placed = 0;
        for i in 0..steps {
            let n = i as f64 + step_offset;
            let radicand = sqrt_offset + factor * n;
            if radicand < 0.0 {
                break;
            }
            let dt = radicand.sqrt().round() as u64;
            if !self.push_clock(start_clock + dt) {
                break;
            }
            placed += 1;
        }
        placed
    }

    /// `stepcompress_push_factor`: linear generator,
    /// `start_clock + round((i + step_offset) * factor)`. `factor` is
    /// expected pre-multiplied by `mcu_freq` by the caller.
    pub fn push_step_factor(&mut self, start_clock: u64, steps: u32, step_offset: f64, factor: f64) -> u32 {
        let mut placed = 0;
        for i in 0..steps {
            let dt = ((i as f64 + step_offset) * factor).round() as u64;
            if !self.push_clock(start_clock + dt) {
                break;
            }
            placed += 1;
        }
        placed
    }

    /// `stepcompress_push_delta_const`: delta-geometry generator at
    /// constant velocity. `inv_velocity` is ticks-per-step, pre-multiplied
    /// by `mcu_freq` by the caller (so `dt = (i + step_offset) *
    /// inv_velocity` is already in clock ticks).
    pub fn push_step_delta_const(
        &mut self,
        start_clock: u64,
        steps: u32,
        step_offset: f64,
        inv_velocity: f64,
    ) -> u32 {
        self.push_step_factor(start_clock, steps, step_offset, inv_velocity)
    }

    /// `stepcompress_push_delta_accel`: delta-geometry generator under
    /// constant acceleration, using the standard kinematic root
    /// `dt = (-v + sqrt(v^2 + 2*a*n)) / a`. `inv_velocity` and `accel` are
    /// pre-multiplied by `mcu_freq`/`mcu_freq^2` respectively.
    pub fn push_step_delta_accel(
        &mut self,
        start_clock: u64,
        steps: u32,
        step_offset: f64,
        inv_velocity: f64,
        accel: f64,
    ) -> u32 {
        if accel == 0.0 {
            return self.push_step_factor(start_clock, steps, step_offset, inv_velocity);
        }
        let velocity = 1.0 / inv_velocity;
        let mut placed = 0;
        for i in 0..steps {
            let n = i as f64 + step_offset;
            let radicand = velocity * velocity + 2.0 * accel * n;
            if radicand < 0.0 {
                break;
            }
            let dt = ((-velocity + radicand.sqrt()) / accel).round();
            if dt < 0.0 {
                break;
            }
            if !self.push_clock(start_clock + dt as u64) {
                break;
            }
            placed += 1;
        }
        placed
    }

    /// The clock of the oldest not-yet-flushed message, if any — used by
    /// [`sync::StepperSync`] to pick the globally earliest-due queue.
    pub fn peek_front_clock(&self) -> Option<u64> {
        self.messages.front().map(|m| m.end_clock)
    }

    /// Removes and returns the oldest not-yet-flushed message.
    pub fn pop_front(&mut self) -> Option<QueueStepMsg> {
        self.messages.pop_front()
    }

    /// Closes any in-progress run so it becomes visible to
    /// [`Self::peek_front_clock`]/[`Self::pop_front`] even though no
    /// further, non-matching step has arrived yet. Called by a flush
    /// before it drains a queue, mirroring `steppersync_flush`'s implicit
    /// finalization of the current move.
    pub fn finalize_pending(&mut self) {
        self.close_pending_run();
    }
}
