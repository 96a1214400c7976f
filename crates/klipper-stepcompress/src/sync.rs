//! Port of `steppersync_flush`: drains every registered stepper's
//! [`crate::StepQueue`] up to a target MCU clock, in clock order, while
//! never handing out more `queue_step` sends than the MCU's move ring
//! buffer (`move_count`) has room for in one flush.

use crate::{QueueStepMsg, StepQueue};
use std::cell::RefCell;
use std::rc::Rc;

/// A step message tagged with which registered stepper it belongs to, so
/// the caller knows which `oid`/command queue to send it against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentStep {
    pub stepper_index: usize,
    pub msg: QueueStepMsg,
}

/// Aggregates every stepper's queue behind a shared, interior-mutable
/// handle — mirrors `steppersync_alloc`'s array of `stepcompress_t*`,
/// minus the FFI: the queues here are owned Rust values the stepper and
/// the sync share via `Rc<RefCell<_>>` rather than a raw pointer the
/// sync frees on disconnect.
pub struct StepperSync {
    queues: Vec<Rc<RefCell<StepQueue>>>,
    move_count: u32,
}

impl StepperSync {
    /// `steppersync_alloc`: takes the full set of per-stepper queues and
    /// the `move_count` the MCU reported in its `config` response.
    pub fn new(queues: Vec<Rc<RefCell<StepQueue>>>, move_count: u32) -> Self {
        StepperSync { queues, move_count }
    }

    pub fn move_count(&self) -> u32 {
        self.move_count
    }

    /// `steppersync_flush`: finalizes every queue's in-progress run, then
    /// repeatedly pops the globally earliest ready message (clock ≤
    /// `target_clock`) across all queues until either no queue has one
    /// ready or `move_count` slots have been spent. Messages left behind
    /// stay queued for the next flush call.
    pub fn flush(&mut self, target_clock: u64) -> Vec<SentStep> {
        for q in &self.queues {
            q.borrow_mut().finalize_pending();
        }
        let mut out = Vec::new();
        let mut budget = self.move_count;
        loop {
            if budget == 0 {
                break;
            }
            let mut best: Option<(usize, u64)> = None;
            for (idx, q) in self.queues.iter().enumerate() {
                if let Some(clock) = q.borrow().peek_front_clock() {
                    if clock <= target_clock && best.map(|(_, c)| clock < c).unwrap_or(true) {
                        best = Some((idx, clock));
                    }
                }
            }
            let Some((idx, _)) = best else { break };
            let msg = self.queues[idx].borrow_mut().pop_front().unwrap();
            out.push(SentStep { stepper_index: idx, msg });
            budget -= 1;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pushes each clock as its own finalized run (rather than letting
    /// consecutive pushes merge into one arithmetic-sequence message), so
    /// tests can reason about distinct, independently-orderable messages.
    fn queue_with(clocks: &[u64]) -> Rc<RefCell<StepQueue>> {
        let q = Rc::new(RefCell::new(StepQueue::new()));
        for &c in clocks {
            let mut q = q.borrow_mut();
            q.push_clock(c);
            q.finalize_pending();
        }
        q
    }

    #[test]
    fn flush_drains_in_clock_order_across_queues() {
        let a = queue_with(&[100, 400]);
        let b = queue_with(&[200, 300]);
        let mut sync = StepperSync::new(vec![a, b], 100);

        let sent = sync.flush(1_000);
        let clocks: Vec<u64> = sent.iter().map(|s| s.msg.end_clock).collect();
        assert_eq!(clocks, vec![100, 200, 300, 400]);
    }

    #[test]
    fn flush_respects_target_clock() {
        let a = queue_with(&[100, 5_000]);
        let mut sync = StepperSync::new(vec![a.clone()], 100);

        let sent = sync.flush(1_000);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].msg.end_clock, 100);
        assert!(a.borrow_mut().peek_front_clock().is_some());
    }

    #[test]
    fn flush_respects_move_slot_budget() {
        let a = queue_with(&[100, 200, 300, 400]);
        let mut sync = StepperSync::new(vec![a], 2);

        let sent = sync.flush(10_000);
        assert_eq!(sent.len(), 2);
    }
}
