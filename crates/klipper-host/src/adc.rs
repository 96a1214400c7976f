//! `MCU_adc` (spec §2 Adc, §4.6): periodic analog sampling with a
//! host-side min/max alarm window expressed as a raw sample-sum bound.

use crate::error::McuError;
use crate::mcu::McuInner;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

type AdcCallback = Box<dyn FnMut(f64, f64)>;

/// The inclusive raw-sum window a `query_analog_in` alarm is armed
/// against — everything [`Adc::set_minmax`] precomputes from a
/// fractional `(minval, maxval)` threshold.
#[derive(Debug, Clone, Copy, Default)]
struct MinMax {
    sample_ticks: u32,
    sample_count: u8,
    min_value: u16,
    max_value: u16,
    /// `1/(sample_count * ADC_MAX)` — the inverse of the scale a raw
    /// sample *sum* needs to recover a 0.0-1.0 fraction; `analog_in_state`
    /// reports the sum of `sample_count` individual samples, not an
    /// average, so [`Adc::handle_analog_in_state`] must multiply by this
    /// rather than by a plain `1/ADC_MAX`.
    inv_scale: f64,
}

struct AdcInner {
    oid: u32,
    mcu: Weak<RefCell<McuInner>>,
    minmax: MinMax,
    callback: Option<AdcCallback>,
}

#[derive(Clone)]
pub struct Adc {
    inner: Rc<RefCell<AdcInner>>,
}

impl Adc {
    pub(crate) fn new(oid: u32, mcu: Weak<RefCell<McuInner>>) -> Self {
        Adc {
            inner: Rc::new(RefCell::new(AdcInner {
                oid,
                mcu,
                minmax: MinMax { max_value: u16::MAX, ..MinMax::default() },
                callback: None,
            })),
        }
    }

    pub fn oid(&self) -> u32 {
        self.inner.borrow().oid
    }

    fn upgrade(&self) -> Result<Rc<RefCell<McuInner>>, McuError> {
        self.inner.borrow().mcu.upgrade().ok_or(McuError::Transport("mcu dropped".into()))
    }

    /// `set_minmax(sample_time, sample_count, minval, maxval)`:
    /// precomputes `sample_ticks` from `sample_time`, and the inclusive
    /// sample-sum window `[minval*sample_count*ADC_MAX,
    /// ceil(maxval*sample_count*ADC_MAX)]` clamped to `[0, 0xFFFF]`.
    pub fn set_minmax(&self, sample_time: f64, sample_count: u8, minval: f64, maxval: f64) -> Result<(), McuError> {
        let mcu = self.upgrade()?;
        let dict = mcu.borrow();
        let dict = dict.transport.dictionary();
        let mcu_freq = dict.clock_freq;
        let adc_max = dict.adc_max;
        let count = sample_count.max(1) as f64;

        let sample_ticks = (sample_time * mcu_freq).round().max(0.0) as u32;
        let lower = (minval * count * adc_max).clamp(0.0, u16::MAX as f64) as u16;
        let upper = (maxval * count * adc_max).ceil().clamp(0.0, u16::MAX as f64) as u16;
        let inv_scale = 1.0 / (count * adc_max);

        self.inner.borrow_mut().minmax = MinMax {
            sample_ticks,
            sample_count,
            min_value: lower,
            max_value: upper,
            inv_scale,
        };
        Ok(())
    }

    pub fn set_adc_callback(&self, callback: impl FnMut(f64, f64) + 'static) {
        self.inner.borrow_mut().callback = Some(Box::new(callback));
    }

    /// `query_analog_in`'s per-oid sampling stagger,
    /// `(1.0 + 0.01*oid)` seconds — a heuristic spread (marked `XXX` in
    /// the original source too) meant only to avoid every ADC channel
    /// sampling in lockstep, not a precise timing requirement.
    pub fn sample_stagger_seconds(&self) -> f64 {
        1.0 + 0.01 * self.oid() as f64
    }

    /// Sends `query_analog_in` using the window [`Self::set_minmax`]
    /// last computed, with `clock` as the initial sample time and
    /// `report_clock` as both the MCU-side repeat interval
    /// (`rest_ticks`) and the offset [`Self::handle_analog_in_state`]
    /// subtracts back out of `next_clock` to compute `read_time`.
    pub fn query_analog_in(&self, clock: u64, report_clock: u32) -> Result<(), McuError> {
        let mcu = self.upgrade()?;
        let oid = self.oid();
        let minmax = self.inner.borrow().minmax;
        let mut mcu = mcu.borrow_mut();
        if mcu.is_shutdown() {
            return Err(mcu.shutdown_error());
        }
        if let Some(fmt) = mcu.transport.msgparser().lookup_command("query_analog_in").cloned() {
            if let Ok(payload) = fmt.encode(&[
                (oid as i64).into(),
                (clock as i64).into(),
                (minmax.sample_ticks as i64).into(),
                (minmax.sample_count as i64).into(),
                (report_clock as i64).into(),
                (minmax.min_value as i64).into(),
                (minmax.max_value as i64).into(),
            ]) {
                mcu.transport.send(payload, 0, clock, None);
            }
        }
        Ok(())
    }

    /// `_handle_analog_in_state`: converts a raw `value` (the *sum* of
    /// `sample_count` samples, not an average) into a 0.0-1.0 fraction
    /// via `value * inv_scale` where `inv_scale = 1/(sample_count *
    /// ADC_MAX)` (the value [`Self::set_minmax`] precomputed), and a
    /// receive time (`(next_clock - report_clock)/mcu_freq`), then
    /// forwards both to the registered callback.
    pub fn handle_analog_in_state(&self, raw_value: u16, next_clock: u64, report_clock: u32) -> Result<(), McuError> {
        let mcu = self.upgrade()?;
        let mcu_freq = mcu.borrow().transport.dictionary().clock_freq;
        let read_time = (next_clock.saturating_sub(report_clock as u64)) as f64 / mcu_freq;
        let mut inner = self.inner.borrow_mut();
        let fraction = raw_value as f64 * inner.minmax.inv_scale;
        if let Some(cb) = inner.callback.as_mut() {
            cb(read_time, fraction);
        }
        Ok(())
    }
}
