//! The MCU coordination object (spec §2, §4): owns the wire connection,
//! the config negotiation, oid allocation, the per-stepper step queues and
//! their flush scheduling, and shutdown/comm-timeout handling. Every other
//! object type in this crate (`Stepper`, `Endstop`, `DigitalOut`, `Pwm`,
//! `Adc`) is created through one of this type's factory methods and holds
//! a non-owning [`Weak`] reference back to it.

use crate::adc::Adc;
use crate::digital_out::DigitalOut;
use crate::endstop::Endstop;
use crate::error::McuError;
use crate::pins::PinTable;
use crate::pwm::Pwm;
use crate::reactor::{EventTime, Reactor, NEVER};
use crate::serial::{FileOutputTransport, SerialTransport, TokioSerialTransport};
use crate::stepper::Stepper;
use klipper_proto::crc::crc32;
use klipper_stepcompress::sync::StepperSync;
use klipper_stepcompress::StepQueue;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// How long the host tolerates silence from the MCU before declaring it
/// lost (spec §4.2, §7).
pub const COMM_TIMEOUT: f64 = 3.5;

/// The time the planner's step buffer is kept filled ahead of the
/// requested clock, in the absence of `pace` mode — spec §4.3's
/// `get_print_buffer_time` stub.
const DEFAULT_PRINT_BUFFER_TIME: f64 = 0.250;

pub(crate) struct McuInner {
    pub(crate) name: String,
    pub(crate) transport: Box<dyn SerialTransport>,
    pub(crate) pin_table: PinTable,
    oid_count: u32,
    config_cmds: Vec<String>,
    config_crc: Option<u32>,
    is_config: bool,
    is_shutdown: bool,
    shutdown_reason: Option<String>,
    move_count: u32,
    step_queues: Vec<Rc<RefCell<StepQueue>>>,
    /// The wire `oid` of each entry in `step_queues`, same index order —
    /// `StepperSync`'s `stepper_index` is a position in that vec, not an
    /// oid, since other object types can be created in between steppers.
    step_queue_oids: Vec<u32>,
    stepper_sync: Option<StepperSync>,
    print_start_time: f64,
    reactor: Reactor,
    comm_timeout_handle: usize,
}

/// A cloneable handle to an MCU connection. All clones share the same
/// underlying state; dropping the last clone runs [`Drop`] (spec §4.4's
/// `__del__`: flush moves, then disconnect the transport).
#[derive(Clone)]
pub struct McuController {
    inner: Rc<RefCell<McuInner>>,
}

impl McuController {
    pub fn new(name: impl Into<String>, transport: Box<dyn SerialTransport>) -> Self {
        let mut reactor = Reactor::new();
        let comm_timeout_handle = reactor.register_timer();
        let inner = McuInner {
            name: name.into(),
            transport,
            pin_table: PinTable::new(),
            oid_count: 0,
            config_cmds: Vec::new(),
            config_crc: None,
            is_config: false,
            is_shutdown: false,
            shutdown_reason: None,
            move_count: 0,
            step_queues: Vec::new(),
            step_queue_oids: Vec::new(),
            stepper_sync: None,
            print_start_time: 0.0,
            reactor,
            comm_timeout_handle,
        };
        McuController { inner: Rc::new(RefCell::new(inner)) }
    }

    /// Establishes a dry-run connection against an in-process simulated
    /// MCU: a [`FileOutputTransport`] that answers `get_config` with
    /// `is_config=0, move_count=500` and echoes back the host's own
    /// computed CRC. Mirrors `MCU.connect_file`.
    pub fn connect_file(name: impl Into<String>, dictionary: klipper_proto::commands::Dictionary) -> Self {
        let pin_table = PinTable::default_for(&dictionary.mcu_name);
        let transport = FileOutputTransport::new(dictionary);
        let mcu = McuController::new(name, Box::new(transport));
        mcu.inner.borrow_mut().pin_table = pin_table;
        mcu
    }

    pub fn name(&self) -> String {
        self.inner.borrow().name.clone()
    }

    /// `oid = self.create_oid()`: every MCU object gets one of these,
    /// assigned in the order it's created.
    pub fn alloc_oid(&self) -> u32 {
        let mut inner = self.inner.borrow_mut();
        let oid = inner.oid_count;
        inner.oid_count += 1;
        oid
    }

    /// `add_config_cmd`: appends a resolved-name-pending config command
    /// line to the list `build_config` will translate pins in, hash, and
    /// send.
    pub(crate) fn add_config_cmd(&self, text: String) {
        self.inner.borrow_mut().config_cmds.push(text);
    }

    pub(crate) fn register_step_queue(&self, oid: u32, queue: Rc<RefCell<StepQueue>>) {
        let mut inner = self.inner.borrow_mut();
        inner.step_queues.push(queue);
        inner.step_queue_oids.push(oid);
    }

    pub(crate) fn weak(&self) -> Weak<RefCell<McuInner>> {
        Rc::downgrade(&self.inner)
    }

    pub fn create_stepper(&self, step_pin: &str, dir_pin: &str, min_stop_interval_ticks: u32, invert_step: bool) -> Stepper {
        let oid = self.alloc_oid();
        self.add_config_cmd(format!(
            "config_stepper oid={oid} step_pin={step_pin} dir_pin={dir_pin} min_stop_interval={min_stop_interval_ticks} invert_step={}",
            invert_step as u8
        ));
        let queue = Rc::new(RefCell::new(StepQueue::new()));
        self.register_step_queue(oid, queue.clone());
        Stepper::new(oid, queue, self.weak(), invert_step)
    }

    /// `invert` is the endstop's trigger polarity (from the pin's `!`
    /// prefix), independent of `pull_up` (from `^`) — the two are parsed
    /// together by [`crate::pins::parse_pin_extras`] but mean different
    /// things: one is an electrical pull-up request sent to the MCU, the
    /// other flips which wire level this layer calls "triggered".
    pub fn create_endstop(&self, pin: &str, stepper: &Stepper, pull_up: bool, invert: bool) -> Endstop {
        let oid = self.alloc_oid();
        self.add_config_cmd(format!(
            "config_end_stop oid={oid} pin={pin} pull_up={} stepper_oid={}",
            pull_up as u8,
            stepper.oid()
        ));
        Endstop::new(oid, stepper.clone(), self.weak(), invert)
    }

    /// `invert` is the pin's `!` prefix (spec §3's DigitalOut invert
    /// flag): it never appears in `config_digital_out` itself (the MCU
    /// only ever sees a raw pin number), but flips every value
    /// `DigitalOut::set_digital` schedules afterward.
    pub fn create_digital_out(&self, pin: &str, invert: bool, default_value: bool, max_duration_ticks: u32) -> DigitalOut {
        let oid = self.alloc_oid();
        self.add_config_cmd(format!(
            "config_digital_out oid={oid} pin={pin} default_value={} max_duration={max_duration_ticks}",
            default_value as u8
        ));
        DigitalOut::new(oid, self.weak(), invert)
    }

    /// `create_pwm`: dispatches between hard-pwm, digital-out fallback and
    /// soft-pwm config commands based on `hard_cycle_ticks`. The `< 0`
    /// fallback branch is checked only after the `!= 0` branch has already
    /// claimed every nonzero value, so it can never run — preserved as-is.
    pub fn create_pwm(&self, pin: &str, hard_cycle_ticks: i32, soft_cycle_ticks: u32, default_value: u8, max_duration_ticks: u32) -> Pwm {
        let oid = self.alloc_oid();
        if hard_cycle_ticks != 0 {
            self.add_config_cmd(format!(
                "config_pwm_out oid={oid} pin={pin} cycle_ticks={hard_cycle_ticks} default_value={default_value} max_duration={max_duration_ticks}"
            ));
            Pwm::new(oid, true, self.weak())
        } else if hard_cycle_ticks < 0 {
            self.add_config_cmd(format!(
                "config_digital_out oid={oid} pin={pin} default_value={default_value} max_duration={max_duration_ticks}"
            ));
            Pwm::new(oid, false, self.weak())
        } else {
            self.add_config_cmd(format!(
                "config_soft_pwm_out oid={oid} pin={pin} cycle_ticks={soft_cycle_ticks} default_value={default_value} max_duration={max_duration_ticks}"
            ));
            Pwm::new(oid, false, self.weak())
        }
    }

    pub fn create_adc(&self, pin: &str) -> Adc {
        let oid = self.alloc_oid();
        self.add_config_cmd(format!("config_analog_in oid={oid} pin={pin}"));
        Adc::new(oid, self.weak())
    }

    /// `build_config`: resolves every queued config command's pin names,
    /// hashes the resolved text (CRC32, the same variant
    /// [`klipper_proto::crc::crc32`] implements) and negotiates it with
    /// the MCU via `get_config`/`finalize_config`.
    pub fn build_config(&self) -> Result<(), McuError> {
        let resolved = {
            let inner = self.inner.borrow();
            let mut resolved = Vec::with_capacity(inner.config_cmds.len() + 1);
            resolved.push(format!("allocate_oids count={}", inner.oid_count));
            for cmd in &inner.config_cmds {
                let r = crate::pins::resolve_pins(cmd, &inner.pin_table)
                    .map_err(|_| McuError::Configuration(cmd.clone()))?;
                resolved.push(r);
            }
            resolved
        };
        let joined = resolved.join("\n");
        let crc = crc32(joined.as_bytes());

        let mut inner = self.inner.borrow_mut();
        inner.config_crc = Some(crc);
        inner.transport.note_config_crc(crc);

        let get_config = inner
            .transport
            .msgparser()
            .lookup_command("get_config")
            .ok_or_else(|| McuError::Transport("get_config not registered".into()))?
            .encode(&[])
            .map_err(|e| McuError::Transport(format!("{e:?}")))?;
        inner.transport.send(get_config, 0, 0, None);
        let config = inner.transport.send_with_response(Vec::new(), "config")?;

        let is_config = config.get_i64_or("is_config", 0) != 0;
        let move_count = config.get_i64_or("move_count", 0) as u32;
        let mcu_crc = config.get_u32("crc").unwrap_or(0);

        if is_config {
            if mcu_crc != crc {
                return Err(McuError::CrcMismatch { expected: crc, actual: mcu_crc });
            }
        } else {
            let registry = inner.transport.msgparser().clone();
            for cmd in &resolved {
                let payload = registry.create_command(cmd).map_err(|e| McuError::Transport(format!("{e:?}")))?;
                inner.transport.send(payload, 0, 0, None);
            }
            let finalize = registry
                .lookup_command("finalize_config")
                .ok_or_else(|| McuError::Transport("finalize_config not registered".into()))?
                .encode(&[(crc as i64).into()])
                .map_err(|e| McuError::Transport(format!("{e:?}")))?;
            inner.transport.send(finalize, 0, 0, None);
        }

        inner.is_config = true;
        inner.move_count = move_count;
        let queues = inner.step_queues.clone();
        inner.stepper_sync = Some(StepperSync::new(queues, move_count.max(1)));
        Ok(())
    }

    pub fn is_config(&self) -> bool {
        self.inner.borrow().is_config
    }

    pub fn move_count(&self) -> u32 {
        self.inner.borrow().move_count
    }

    pub fn config_crc(&self) -> Option<u32> {
        self.inner.borrow().config_crc
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.borrow().is_shutdown
    }

    pub fn shutdown_reason(&self) -> Option<String> {
        self.inner.borrow().shutdown_reason.clone()
    }

    /// `handle_shutdown`/`handle_is_shutdown`: records the first reported
    /// shutdown reason. Idempotent — once shut down, later reasons (and
    /// [`force_shutdown`](Self::force_shutdown) itself) don't overwrite it.
    fn handle_shutdown(&self, reason: &str) {
        let mut inner = self.inner.borrow_mut();
        if !inner.is_shutdown {
            inner.is_shutdown = true;
            inner.shutdown_reason = Some(reason.to_string());
        }
    }

    /// `force_shutdown`: sends `emergency_stop` and locally records the
    /// shutdown immediately rather than waiting on the MCU's own
    /// `shutdown` notification — there is no separate asynchronous
    /// notification channel in this coordination layer, so the host
    /// treats issuing the command as sufficient cause.
    pub fn force_shutdown(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if let Some(fmt) = inner.transport.msgparser().lookup_command("emergency_stop").cloned() {
                if let Ok(payload) = fmt.encode(&[]) {
                    inner.transport.send(payload, 0, 0, None);
                }
            }
        }
        self.handle_shutdown("Forced shutdown command");
    }

    /// `clear_shutdown`: only meaningful after the MCU itself has
    /// restarted; sends `clear_shutdown` and resets local state.
    pub fn clear_shutdown(&self) {
        let mut inner = self.inner.borrow_mut();
        if let Some(fmt) = inner.transport.msgparser().lookup_command("clear_shutdown").cloned() {
            if let Ok(payload) = fmt.encode(&[]) {
                inner.transport.send(payload, 0, 0, None);
            }
        }
        inner.is_shutdown = false;
        inner.shutdown_reason = None;
    }

    /// `timeout_handler`: the comm-timeout reactor timer's callback.
    /// Returns the next wake time (or [`NEVER`] once shutdown has fired).
    /// Before any response has ever been observed ([`None`] from
    /// `get_last_clock`), this never trips — there is nothing yet to have
    /// gone silent on.
    pub fn poll_comm_timeout(&self, eventtime: EventTime) -> EventTime {
        if self.inner.borrow().is_shutdown {
            return NEVER;
        }
        let (_, last_alive) = {
            let inner = self.inner.borrow();
            inner.transport.get_last_clock()
        };
        let Some(last_alive) = last_alive else {
            return eventtime + COMM_TIMEOUT;
        };
        if eventtime - last_alive > COMM_TIMEOUT {
            self.force_shutdown();
            return NEVER;
        }
        let next = last_alive + COMM_TIMEOUT;
        let mut inner = self.inner.borrow_mut();
        let handle = inner.comm_timeout_handle;
        inner.reactor.update_timer(handle, next);
        next
    }

    /// Records that the MCU was confirmed responsive at `eventtime` —
    /// a host application calls this whenever it observes a fresh
    /// message from the MCU (the real clocksync's periodic update),
    /// resetting the comm-timeout clock.
    pub fn note_alive(&self, eventtime: EventTime) {
        self.inner.borrow_mut().transport.note_alive(eventtime);
    }

    pub fn set_print_start_time(&self, t: f64) {
        self.inner.borrow_mut().print_start_time = t;
    }

    pub fn print_to_mcu_time(&self, print_time: f64) -> f64 {
        print_time + self.inner.borrow().print_start_time
    }

    /// `get_print_buffer_time`: how far ahead of the target clock the
    /// planner keeps steps queued. `pace` mode (real-time-throttled
    /// playback) is out of scope for this layer, so this is a constant.
    pub fn get_print_buffer_time(&self) -> f64 {
        DEFAULT_PRINT_BUFFER_TIME
    }

    /// `clock = round(mcu_time * mcu_freq)`, via the transport's clock
    /// estimator. Exposed for objects (e.g. [`crate::fan::PrinterFan`])
    /// that compute their own `mcu_time` rather than a `print_time`.
    pub fn clock_for_mcu_time(&self, mcu_time: f64) -> u64 {
        self.inner.borrow().transport.get_clock(mcu_time)
    }

    fn print_time_to_clock(&self, print_time: f64) -> u64 {
        let mcu_time = self.print_to_mcu_time(print_time);
        self.clock_for_mcu_time(mcu_time)
    }

    /// `flush_moves`: drains every stepper's queued steps up to
    /// `print_time` (converted to an MCU clock) and sends each resulting
    /// `queue_step` command in clock order.
    pub fn flush_moves(&self, print_time: f64) -> Result<(), McuError> {
        if self.inner.borrow().is_shutdown {
            return Err(McuError::Shutdown(self.shutdown_reason().unwrap_or_default()));
        }
        let target_clock = self.print_time_to_clock(print_time);
        let sent = {
            let mut inner = self.inner.borrow_mut();
            match inner.stepper_sync.as_mut() {
                Some(sync) => sync.flush(target_clock),
                None => return Ok(()),
            }
        };
        let mut inner = self.inner.borrow_mut();
        let registry = inner.transport.msgparser().clone();
        for sent_step in sent {
            let queue_oid = inner.step_queue_oids[sent_step.stepper_index];
            let text = format!(
                "queue_step oid={queue_oid} interval={} count={} add={}",
                sent_step.msg.interval, sent_step.msg.count, sent_step.msg.add
            );
            let payload = registry.create_command(&text).map_err(|e| McuError::Transport(format!("{e:?}")))?;
            inner.transport.send(payload, 0, sent_step.msg.end_clock, None);
        }
        Ok(())
    }

    /// `stats`: requests the MCU's running sample counters and reports
    /// them as an average and standard deviation, scaled by
    /// `stats_sumsq_base` — mirrors `handle_mcu_stats`'s
    /// `stddev = sqrt(sumsq/stats_sumsq_base/count - avg**2)`.
    pub fn stats(&self, eventtime: EventTime) -> Result<String, McuError> {
        let mut inner = self.inner.borrow_mut();
        if let Some(fmt) = inner.transport.msgparser().lookup_command("stats").cloned() {
            if let Ok(payload) = fmt.encode(&[]) {
                inner.transport.send(payload, 0, 0, None);
            }
        }
        let sumsq_base = inner.transport.dictionary().stats_sumsq_base;
        let params = inner.transport.send_with_response(Vec::new(), "stats_state")?;
        let count = params.get_i64_or("count", 0).max(1) as f64;
        let sum = params.get_i64_or("sum", 0) as f64;
        let sumsq = params.get_i64_or("sumsq", 0) as f64;
        let avg = sum / count;
        let variance = (sumsq / sumsq_base / count - avg * avg).max(0.0);
        Ok(format!(
            "{}: mcu_awake={:.3} count={} avg={:.3} stddev={:.3}",
            inner.name,
            eventtime,
            count as u64,
            avg,
            variance.sqrt()
        ))
    }

    pub fn dump_debug(&self) -> String {
        self.inner.borrow().transport.dump_debug()
    }
}

impl McuInner {
    /// Lets sibling object modules (`Stepper`, `Endstop`, `DigitalOut`,
    /// `Pwm`, `Adc`) check shutdown state before issuing a scheduled
    /// command, without needing their own copy of the flag.
    pub(crate) fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    pub(crate) fn shutdown_error(&self) -> McuError {
        McuError::Shutdown(self.shutdown_reason.clone().unwrap_or_default())
    }
}

impl Drop for McuInner {
    /// `__del__`: flush whatever steps remain, then disconnect. Both are
    /// best-effort — a disconnect during teardown must not panic.
    fn drop(&mut self) {
        if let Some(sync) = self.stepper_sync.as_mut() {
            sync.flush(u64::MAX);
        }
        self.transport.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use klipper_proto::commands::Dictionary;

    #[test]
    fn build_config_negotiates_crc_with_simulated_mcu() {
        let mcu = McuController::connect_file("mcu", Dictionary::simulated());
        let _stepper = mcu.create_stepper("PA0", "PA1", 10, false);
        mcu.build_config().unwrap();
        assert!(mcu.is_config());
        assert_eq!(mcu.move_count(), 500);
        assert!(mcu.config_crc().is_some());
    }

    #[test]
    fn build_config_fails_on_unknown_pin() {
        let mcu = McuController::connect_file("mcu", Dictionary::simulated());
        let _stepper = mcu.create_stepper("ZZ9", "PA1", 10, false);
        let err = mcu.build_config().unwrap_err();
        assert!(matches!(err, McuError::Configuration(_)));
    }

    #[test]
    fn force_shutdown_is_idempotent_and_keeps_first_reason() {
        let mcu = McuController::connect_file("mcu", Dictionary::simulated());
        mcu.build_config().unwrap();
        mcu.force_shutdown();
        assert!(mcu.is_shutdown());
        let first = mcu.shutdown_reason();
        mcu.handle_shutdown("a different reason");
        assert_eq!(mcu.shutdown_reason(), first);
    }

    #[test]
    fn clear_shutdown_resets_state() {
        let mcu = McuController::connect_file("mcu", Dictionary::simulated());
        mcu.build_config().unwrap();
        mcu.force_shutdown();
        mcu.clear_shutdown();
        assert!(!mcu.is_shutdown());
        assert!(mcu.shutdown_reason().is_none());
    }

    #[test]
    fn stats_reports_zero_stddev_for_uniform_samples() {
        let mcu = McuController::connect_file("mcu", Dictionary::simulated());
        mcu.build_config().unwrap();
        let report = mcu.stats(1.0).unwrap();
        assert!(report.contains("stddev=0.000"));
    }

    #[test]
    fn flush_moves_is_rejected_once_shutdown() {
        let mcu = McuController::connect_file("mcu", Dictionary::simulated());
        mcu.build_config().unwrap();
        mcu.force_shutdown();
        assert!(matches!(mcu.flush_moves(1.0), Err(McuError::Shutdown(_))));
    }
}
