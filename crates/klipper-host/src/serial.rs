//! The `SerialReader` boundary (spec §1, §6): out of scope as a
//! component, but modeled here as a narrow trait plus two reference
//! implementations so the workspace compiles and its tests are runnable
//! end to end — a real `tokio-serial` backend, and a `connect_file`
//! dry-run backend that simulates the MCU's config handshake in-process.

use crate::error::McuError;
use crate::reactor::EventTime;
use klipper_proto::commands::{build_core_registry, Dictionary};
use klipper_proto::registry::CommandRegistry;
use klipper_proto::params::Params;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;

pub type CommandQueueId = u32;

/// A registered response handler: `(message name, optional oid)` ->
/// callback. Mirrors `serial.register_callback(cb, msg, oid)`.
pub type Callback = Box<dyn FnMut(Params)>;

/// The serial transport boundary the MCU controller drives. All methods
/// are synchronous/non-blocking from the coordination layer's point of
/// view — per spec §5, `set_digital`/step pushes/`flush_moves` must not
/// block on serial I/O, and the only methods that may suspend
/// (`send_with_response`) do so by the caller looping over `pause`, not by
/// this trait itself yielding an async future.
pub trait SerialTransport {
    fn connect(&mut self) -> Result<(), McuError>;
    fn disconnect(&mut self);
    fn is_fileoutput(&self) -> bool;

    fn dictionary(&self) -> &Dictionary;
    fn msgparser(&self) -> &CommandRegistry;

    fn alloc_command_queue(&mut self) -> CommandQueueId;
    fn register_callback(&mut self, msg: &str, oid: Option<u32>, cb: Callback);

    /// Delivers an incoming response to every callback registered for its
    /// name (and, if present, its `oid` field). Test/file-output backends
    /// call this directly to simulate an MCU reply; the real backend
    /// calls it from its background reader task.
    fn dispatch(&mut self, msg_name: &str, params: Params);

    fn send(&mut self, payload: Vec<u8>, minclock: u64, reqclock: u64, cq: Option<CommandQueueId>);
    fn send_with_response(&mut self, payload: Vec<u8>, response_name: &str) -> Result<Params, McuError>;

    fn get_clock(&self, eventtime: EventTime) -> u64;
    /// The most recently observed MCU clock, and the (host) eventtime it
    /// was last confirmed alive at — `None` if no response has ever been
    /// seen. [`Self::note_alive`] is what advances the latter.
    fn get_last_clock(&self) -> (u64, Option<EventTime>);
    fn translate_clock(&self, short_clock: u32) -> u64;

    fn stats(&self, eventtime: EventTime) -> String;
    fn dump_debug(&self) -> String;

    /// Lets [`crate::mcu::McuController::build_config`] tell a dry-run
    /// backend what CRC it computed over the resolved config command
    /// list, so a simulated `config` response can echo it back. Real
    /// transports ignore this — the MCU itself is the source of truth.
    fn note_config_crc(&mut self, _crc: u32) {}

    /// Records that the MCU was confirmed responsive at `eventtime` —
    /// the comm-timeout timer's "last heard from it" mark. A real
    /// backend calls this from its background reader task on every
    /// received frame; tests and [`crate::mcu::McuController::poll_comm_timeout`]
    /// callers drive it directly.
    fn note_alive(&mut self, eventtime: EventTime);
}

/// Reconstructs a full 64-bit clock from a 32-bit wraparound sample,
/// choosing whichever candidate (same "epoch" as `reference`, one epoch
/// up, or one epoch down) lands closest to `reference` — the same
/// technique `serialhdl.SerialReader.translate_clock` uses.
pub fn translate_clock(short_clock: u32, reference: u64) -> u64 {
    let epoch = reference & !0xffff_ffffu64;
    let candidates = [epoch.wrapping_sub(1 << 32), epoch, epoch.wrapping_add(1 << 32)];
    candidates
        .into_iter()
        .map(|base| base + short_clock as u64)
        .min_by_key(|c| c.abs_diff(reference))
        .unwrap()
}

/// A shared record of what's been sent for `dump_debug`/`stats`, and the
/// common clock bookkeeping both reference backends need.
#[derive(Debug, Default)]
struct Shared {
    sent_log: Vec<(u64, u64, Option<CommandQueueId>)>, // (minclock, reqclock, cq)
    last_clock: u64,
    last_alive: Option<EventTime>,
    base_eventtime: EventTime,
    base_clock: u64,
}

impl Shared {
    fn note_clock(&mut self, clock: u64) {
        if clock >= self.last_clock {
            self.last_clock = clock;
        }
    }
}

/// A `connect_file` dry-run backend: simulates `get_config` negotiation
/// in-process (`is_config=0`, `move_count=500`, the host's own computed
/// CRC echoed back) and never touches real hardware. This is the
/// backend [`crate::mcu::McuController::connect_file`] installs.
pub struct FileOutputTransport {
    registry: CommandRegistry,
    dictionary: Dictionary,
    shared: Shared,
    callbacks: HashMap<(String, Option<u32>), Vec<Callback>>,
    next_cq: CommandQueueId,
    computed_crc: Option<u32>,
}

impl FileOutputTransport {
    pub fn new(dictionary: Dictionary) -> Self {
        FileOutputTransport {
            registry: build_core_registry(),
            dictionary,
            shared: Shared::default(),
            callbacks: HashMap::new(),
            next_cq: 0,
            computed_crc: None,
        }
    }

    /// Lets the MCU controller tell this backend what CRC it computed, so
    /// the simulated `config` response can echo it back — mirroring
    /// `connect_file`'s `config_params = {'crc': self._config_crc}`.
    pub fn set_expected_crc(&mut self, crc: u32) {
        self.computed_crc = Some(crc);
    }
}

impl SerialTransport for FileOutputTransport {
    fn connect(&mut self) -> Result<(), McuError> {
        Ok(())
    }

    fn disconnect(&mut self) {}

    fn is_fileoutput(&self) -> bool {
        true
    }

    fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    fn msgparser(&self) -> &CommandRegistry {
        &self.registry
    }

    fn alloc_command_queue(&mut self) -> CommandQueueId {
        let id = self.next_cq;
        self.next_cq += 1;
        id
    }

    fn register_callback(&mut self, msg: &str, oid: Option<u32>, cb: Callback) {
        self.callbacks.entry((msg.to_string(), oid)).or_default().push(cb);
    }

    fn dispatch(&mut self, msg_name: &str, params: Params) {
        let oid = params.get_u32("oid");
        if let Some(cbs) = self.callbacks.get_mut(&(msg_name.to_string(), oid)) {
            for cb in cbs {
                cb(params.clone());
            }
        }
        if oid.is_some() {
            if let Some(cbs) = self.callbacks.get_mut(&(msg_name.to_string(), None)) {
                for cb in cbs {
                    cb(params.clone());
                }
            }
        }
    }

    fn send(&mut self, _payload: Vec<u8>, minclock: u64, reqclock: u64, cq: Option<CommandQueueId>) {
        self.shared.sent_log.push((minclock, reqclock, cq));
        self.shared.note_clock(reqclock.max(minclock));
    }

    fn send_with_response(&mut self, _payload: Vec<u8>, response_name: &str) -> Result<Params, McuError> {
        match response_name {
            "config" => {
                let mut params = Params::new();
                params.set_int("is_config", 0);
                params.set_int("move_count", 500);
                params.set_int("crc", self.computed_crc.unwrap_or(0) as i64);
                Ok(params)
            }
            "stats_state" => {
                // A plausible, deterministic sample set for dry runs: a
                // handful of identical intervals, so avg/stddev come out
                // simply (stddev == 0) without needing real MCU timing.
                let mut params = Params::new();
                params.set_int("count", 16);
                params.set_int("sum", 16 * 1000);
                params.set_int("sumsq", (self.dictionary.stats_sumsq_base as i64) * 16 * 1000 * 1000);
                Ok(params)
            }
            _ => Err(McuError::Transport(format!("no simulated response for {response_name}"))),
        }
    }

    fn get_clock(&self, eventtime: EventTime) -> u64 {
        let elapsed = eventtime - self.shared.base_eventtime;
        self.shared.base_clock + (elapsed.max(0.0) * self.dictionary.clock_freq).round() as u64
    }

    fn get_last_clock(&self) -> (u64, Option<EventTime>) {
        (self.shared.last_clock, self.shared.last_alive)
    }

    fn translate_clock(&self, short_clock: u32) -> u64 {
        translate_clock(short_clock, self.shared.last_clock)
    }

    fn stats(&self, _eventtime: EventTime) -> String {
        format!("fileoutput sent={}", self.shared.sent_log.len())
    }

    fn dump_debug(&self) -> String {
        format!("{} commands sent in file-output mode", self.shared.sent_log.len())
    }

    fn note_config_crc(&mut self, crc: u32) {
        self.computed_crc = Some(crc);
    }

    fn note_alive(&mut self, eventtime: EventTime) {
        self.shared.last_alive = Some(eventtime);
    }
}

/// The real transport: a Klipper MCU reached over an actual serial port.
/// The coordination layer's methods are all synchronous, so this owns a
/// private single-threaded [`tokio::runtime::Runtime`] and bridges every
/// call through [`tokio::runtime::Runtime::block_on`] rather than exposing
/// async methods on [`SerialTransport`] itself.
pub struct TokioSerialTransport {
    port_name: String,
    baud_rate: u32,
    runtime: tokio::runtime::Runtime,
    framed: Option<tokio_util::codec::Framed<tokio_serial::SerialStream, klipper_proto::codec::KlipperCodec>>,
    registry: CommandRegistry,
    dictionary: Dictionary,
    shared: Shared,
    callbacks: HashMap<(String, Option<u32>), Vec<Callback>>,
    next_cq: CommandQueueId,
    seq: u8,
}

impl TokioSerialTransport {
    /// Builds the transport without opening the port yet — mirrors
    /// `serialhdl.SerialReader`'s lazy connect, and this crate's own
    /// `mcu_client::run_mcu_client`'s retry-until-success connect loop.
    pub fn new(port_name: impl Into<String>, baud_rate: u32, dictionary: Dictionary) -> Self {
        TokioSerialTransport {
            port_name: port_name.into(),
            baud_rate,
            runtime: tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build the serial transport's private tokio runtime"),
            framed: None,
            registry: build_core_registry(),
            dictionary,
            shared: Shared::default(),
            callbacks: HashMap::new(),
            next_cq: 0,
            seq: 0,
        }
    }

    /// Drains whatever frames are already sitting in the codec's buffer
    /// without blocking, dispatching each to its registered callbacks.
    /// `send_with_response` calls this in a loop while it waits for the
    /// one response it actually wants. Borrows `framed` and `runtime` as
    /// two disjoint fields rather than through a `&mut self` helper, so
    /// both can be live across the `block_on` call.
    fn pump_available(&mut self) -> Result<Option<(String, Params)>, McuError> {
        let Some(framed) = self.framed.as_mut() else {
            return Err(McuError::Transport("not connected".into()));
        };
        let next = self.runtime.block_on(async {
            tokio::time::timeout(std::time::Duration::from_millis(50), framed.next()).await
        });
        match next {
            Ok(Some(Ok(msg))) => {
                let format = self
                    .registry
                    .lookup_by_id(msg.msgid)
                    .ok_or_else(|| McuError::Transport(format!("unknown response msgid {}", msg.msgid)))?;
                let params = format.decode(&msg.payload).map_err(|e| McuError::Transport(format!("{e:?}")))?;
                Ok(Some((format.name.clone(), params)))
            }
            Ok(Some(Err(e))) => Err(McuError::Transport(format!("{e:?}"))),
            Ok(None) => Err(McuError::Transport("serial connection closed".into())),
            Err(_timeout) => Ok(None),
        }
    }
}

impl SerialTransport for TokioSerialTransport {
    /// Opens the port, retrying with a fixed backoff the way
    /// `mcu_client::run_mcu_client`'s outer loop does — the coordination
    /// layer's caller decides how many times to retry `connect` before
    /// giving up, rather than this method blocking forever on its own.
    fn connect(&mut self) -> Result<(), McuError> {
        use tokio_serial::SerialPortBuilderExt;
        let port_name = self.port_name.clone();
        let baud_rate = self.baud_rate;
        // `open_native_async` registers the stream with the reactor of
        // whichever runtime is current, so it must run inside one.
        let _guard = self.runtime.enter();
        let stream = tokio_serial::new(&port_name, baud_rate)
            .open_native_async()
            .map_err(|e| McuError::Transport(format!("failed to open {port_name}: {e}")))?;
        self.framed = Some(tokio_util::codec::Framed::new(stream, klipper_proto::codec::KlipperCodec::new()));
        tracing::info!(port = %port_name, baud = baud_rate, "serial connection established");
        Ok(())
    }

    fn disconnect(&mut self) {
        self.framed = None;
    }

    fn is_fileoutput(&self) -> bool {
        false
    }

    fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    fn msgparser(&self) -> &CommandRegistry {
        &self.registry
    }

    fn alloc_command_queue(&mut self) -> CommandQueueId {
        let id = self.next_cq;
        self.next_cq += 1;
        id
    }

    fn register_callback(&mut self, msg: &str, oid: Option<u32>, cb: Callback) {
        self.callbacks.entry((msg.to_string(), oid)).or_default().push(cb);
    }

    fn dispatch(&mut self, msg_name: &str, params: Params) {
        let oid = params.get_u32("oid");
        if let Some(cbs) = self.callbacks.get_mut(&(msg_name.to_string(), oid)) {
            for cb in cbs {
                cb(params.clone());
            }
        }
        if oid.is_some() {
            if let Some(cbs) = self.callbacks.get_mut(&(msg_name.to_string(), None)) {
                for cb in cbs {
                    cb(params.clone());
                }
            }
        }
    }

    fn send(&mut self, payload: Vec<u8>, minclock: u64, reqclock: u64, cq: Option<CommandQueueId>) {
        self.shared.sent_log.push((minclock, reqclock, cq));
        self.shared.note_clock(reqclock.max(minclock));
        let Some((&msgid, rest)) = payload.split_first() else { return };
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        let frame = klipper_proto::codec::OutgoingFrame { seq, msgid, payload: rest.to_vec() };
        let result = match self.framed.as_mut() {
            Some(framed) => self.runtime.block_on(framed.send(frame)),
            None => return,
        };
        if let Err(e) = result {
            tracing::warn!(error = ?e, "failed to write frame to serial port");
        }
    }

    /// Blocks (via the private runtime) draining frames until one matches
    /// `response_name`, dispatching every other frame it sees along the
    /// way — callers needing a specific reply don't starve other pending
    /// callbacks (e.g. a `stats_state` wait must not swallow an
    /// `analog_in_state` the MCU happens to send in between).
    fn send_with_response(&mut self, payload: Vec<u8>, response_name: &str) -> Result<Params, McuError> {
        self.send(payload, 0, 0, None);
        // pump_available times out every 50ms; this bounds the wait to
        // roughly COMM_TIMEOUT rather than blocking forever on a silent
        // link, the same ceiling `poll_comm_timeout` uses to give up.
        let max_attempts = ((crate::mcu::COMM_TIMEOUT * 1000.0) / 50.0) as u32;
        for _ in 0..max_attempts {
            match self.pump_available()? {
                Some((name, params)) if name == response_name => return Ok(params),
                Some((name, params)) => self.dispatch(&name, params),
                None => continue,
            }
        }
        Err(McuError::CommTimeout)
    }

    fn get_clock(&self, eventtime: EventTime) -> u64 {
        let elapsed = eventtime - self.shared.base_eventtime;
        self.shared.base_clock + (elapsed.max(0.0) * self.dictionary.clock_freq).round() as u64
    }

    fn get_last_clock(&self) -> (u64, Option<EventTime>) {
        (self.shared.last_clock, self.shared.last_alive)
    }

    fn translate_clock(&self, short_clock: u32) -> u64 {
        translate_clock(short_clock, self.shared.last_clock)
    }

    fn stats(&self, _eventtime: EventTime) -> String {
        format!("serial={} sent={}", self.port_name, self.shared.sent_log.len())
    }

    fn dump_debug(&self) -> String {
        format!("{} commands sent over {}", self.shared.sent_log.len(), self.port_name)
    }

    fn note_alive(&mut self, eventtime: EventTime) {
        self.shared.last_alive = Some(eventtime);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_clock_picks_the_nearby_epoch() {
        let reference = 0x1_0000_1000u64;
        // short_clock equal to the low 32 bits should reconstruct exactly.
        assert_eq!(translate_clock(0x1000, reference), reference);
    }

    #[test]
    fn translate_clock_handles_wraparound_forward() {
        let reference = 0xffff_fff0u64;
        // a small short_clock observed just after a wraparound.
        assert_eq!(translate_clock(0x10, reference), 0x1_0000_0010);
    }

    #[test]
    fn file_output_config_echoes_expected_crc() {
        let mut t = FileOutputTransport::new(Dictionary::simulated());
        t.set_expected_crc(0xdead_beef);
        let params = t.send_with_response(vec![], "config").unwrap();
        assert_eq!(params.get_i64("is_config"), Some(0));
        assert_eq!(params.get_i64("move_count"), Some(500));
        assert_eq!(params.get_u32("crc"), Some(0xdead_beef));
    }

    #[test]
    fn dispatch_calls_callback_registered_for_oid() {
        let mut t = FileOutputTransport::new(Dictionary::simulated());
        let seen = std::rc::Rc::new(std::cell::RefCell::new(0i64));
        let seen2 = seen.clone();
        t.register_callback("analog_in_state", Some(3), Box::new(move |p| {
            *seen2.borrow_mut() = p.get_i64("value").unwrap_or(-1);
        }));
        let mut params = Params::new();
        params.set_int("oid", 3);
        params.set_int("value", 77);
        t.dispatch("analog_in_state", params);
        assert_eq!(*seen.borrow(), 77);
    }
}
