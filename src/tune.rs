//! Noise-driven auto-tuning. A one-shot pass sizes the sense clock and
//! resolution from the measured parasitic capacitance; an ongoing
//! per-frame pass rebuilds the detection thresholds from the noise
//! envelope of the filtered raw counts.

use crate::calibrate;
use crate::config::{CalibrationTarget, ClockSource, TuningConfig, WidgetParams};
use crate::error::Error;
use crate::hal::SenseDriver;
use crate::types::WidgetId;
use crate::widget::Widget;

/// Coarse passes run at a fixed resolution and sense clock so capacitance
/// estimates are comparable across widgets.
const CALIBRATION_RESOLUTION: u8 = 12;
const CALIBRATION_CLOCK_KHZ: u32 = 1500;

/// Hardware ceiling on the sense-clock frequency.
const SENSE_CLOCK_KHZ_MAX: u32 = 6000;
const MIN_SENSE_DIVIDER: u32 = 4;

/// Parasitic capacitance above this cannot be tuned reliably.
const CP_MAX_FEMTOFARADS: u64 = 69_000;

const MIN_RESOLUTION: u8 = 8;
const MAX_RESOLUTION: u8 = 16;

/// Spread-spectrum clocking needs room for the dither pattern within one
/// conversion window.
const SSC_MIN_DIVIDER: u32 = 8;
const SSC_MIN_CONVERSIONS: u32 = 63;

const ENVELOPE_DECAY_SHIFT: u32 = 3;
const PERCENT_100: u64 = 100;

/// Decaying running extremes of a sensor's filtered raw counts. Excursions
/// widen the envelope immediately; both edges relax toward the current
/// sample by an eighth of the gap per scan.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct NoiseEnvelope {
    maximum: u16,
    minimum: u16,
    primed: bool,
}

impl NoiseEnvelope {
    pub fn new() -> Self {
        NoiseEnvelope::default()
    }

    pub fn reset(&mut self) {
        *self = NoiseEnvelope::default();
    }

    pub fn update(&mut self, raw: u16) {
        if !self.primed {
            self.maximum = raw;
            self.minimum = raw;
            self.primed = true;
            return;
        }
        if raw > self.maximum {
            self.maximum = raw;
        } else {
            self.maximum -= (self.maximum - raw) >> ENVELOPE_DECAY_SHIFT;
        }
        if raw < self.minimum {
            self.minimum = raw;
        } else {
            self.minimum += (raw - self.minimum) >> ENVELOPE_DECAY_SHIFT;
        }
    }

    pub fn amplitude(&self) -> u16 {
        self.maximum - self.minimum
    }
}

/// Rebuilds the detection thresholds from the widest sensor envelope and
/// the predicted finger signal. The noise floor carries a 50% margin; the
/// finger threshold sits half a signal above it and the hysteresis is an
/// eighth of the finger threshold. The noise thresholds together must fit
/// in the full scale and the finger threshold never exceeds it, so a noise
/// envelope wider than the conversion range cannot push the parameters out
/// of their own validation.
pub(crate) fn update_thresholds(params: &mut WidgetParams, amplitude: u16, signal_estimate: u16) {
    let full_scale = params.max_raw_count();
    let noise = amplitude.saturating_add(amplitude / 2).min(full_scale / 2);
    params.noise_threshold = noise;
    params.negative_noise_threshold = noise;
    let finger = (signal_estimate / 2)
        .saturating_add(noise)
        .max(noise.saturating_add(1))
        .max(2)
        .min(full_scale);
    params.finger_threshold = finger;
    params.hysteresis = (finger / 8).clamp(1, finger - 1);
}

pub(crate) fn autotune_widget<D: SenseDriver>(
    driver: &mut D,
    widget: &mut Widget,
    id: WidgetId,
    tuning: &TuningConfig,
) -> Result<(), Error> {
    if driver.is_busy() {
        return Err(Error::Busy);
    }
    let configured_source = widget.params.clock_source;
    let input_clock_khz = tuning.peripheral_clock_khz;
    // Tolerance 100 disables the verification band for the coarse passes.
    let coarse = CalibrationTarget { percent: tuning.calibration_target.percent, tolerance: 100 };

    // Phase 1: coarse calibration at the fixed clock, then size the sense
    // clock from the worst parasitic capacitance per axis.
    widget.params.resolution = CALIBRATION_RESOLUTION;
    let coarse_divider = make_even((input_clock_khz / CALIBRATION_CLOCK_KHZ).max(MIN_SENSE_DIVIDER));
    widget.params.sense_clock_divider = coarse_divider as u16;
    widget.params.row_sense_clock_divider = coarse_divider as u16;
    calibrate::calibrate_widget(driver, widget, id, coarse, tuning)?;

    let columns = widget.column_count();
    let column_cp = axis_capacitance(widget, 0, columns, coarse_divider, tuning);
    let row_cp = if widget.has_row_axis() {
        axis_capacitance(widget, columns, widget.sensors.len(), coarse_divider, tuning)
    } else {
        0
    };
    let worst_cp = column_cp.max(row_cp);
    if worst_cp == 0 || worst_cp > CP_MAX_FEMTOFARADS {
        log::warn!("widget {} parasitic capacitance {worst_cp} fF untunable", id.0);
        return Err(Error::OutOfTolerance);
    }
    let minimum_divider = make_even(
        (input_clock_khz / SENSE_CLOCK_KHZ_MAX).max(MIN_SENSE_DIVIDER),
    );
    widget.params.sense_clock_divider =
        solve_divider(column_cp, input_clock_khz, minimum_divider, tuning) as u16;
    widget.params.row_sense_clock_divider = if widget.has_row_axis() {
        solve_divider(row_cp, input_clock_khz, minimum_divider, tuning) as u16
    } else {
        widget.params.sense_clock_divider
    };
    log::debug!(
        "widget {} cp {worst_cp} fF, dividers {}/{}",
        id.0,
        widget.params.sense_clock_divider,
        widget.params.row_sense_clock_divider
    );

    // Phase 2: recalibrate at the final clock and pick the smallest
    // resolution whose predicted finger signal clears the floor.
    calibrate::calibrate_widget(driver, widget, id, coarse, tuning)?;
    let (resolution, signal) = solve_resolution(worst_cp, widget.params.finger_capacitance, tuning);
    widget.params.resolution = resolution;
    widget.signal_estimate = signal;
    log::debug!("widget {} resolution {resolution}, predicted signal {signal}", id.0);

    // Phase 3: settle the clock source and calibrate at final settings.
    widget.params.clock_source = match configured_source {
        ClockSource::Auto => resolve_clock_source(
            widget.params.sense_clock_divider as u32,
            widget.params.resolution,
        ),
        fixed => fixed,
    };
    calibrate::calibrate_widget(driver, widget, id, tuning.calibration_target, tuning)
}

/// Estimates the largest parasitic capacitance on one axis, in
/// femtofarads, from the calibrated code of its strongest sensor. The
/// sensing current balances the sensor charge, so
/// `Cp = I * duty / (Vref * Fsense)` with the duty pinned at the
/// calibration target.
fn axis_capacitance(
    widget: &Widget,
    start: usize,
    end: usize,
    divider: u32,
    tuning: &TuningConfig,
) -> u64 {
    let mut code = 0u64;
    for sensor in &widget.sensors[start..end] {
        code = code.max(sensor.code as u64);
    }
    let gain = tuning
        .idac_gains_pa
        .get(widget.gain_index as usize)
        .copied()
        .unwrap_or(0) as u64;
    let sense_clock_khz = (tuning.peripheral_clock_khz / divider.max(1)) as u64;
    let denominator = tuning.vref_mv as u64 * sense_clock_khz;
    if denominator == 0 {
        return 0;
    }
    // pA * percent*10 / (mV * kHz) yields femtofarads.
    gain * code * (tuning.calibration_target.percent as u64 * 10) / denominator
}

/// Sense-clock divider giving a period of at least ten sensing time
/// constants (2 * 5 * R * Cp), rounded up to even.
fn solve_divider(cp_femtofarads: u64, input_clock_khz: u32, minimum: u32, tuning: &TuningConfig) -> u32 {
    let product =
        10u64 * tuning.series_resistance_ohm as u64 * cp_femtofarads * input_clock_khz as u64;
    // ohm * fF * kHz carries a factor of 1e-12 against the divider unit.
    let divider = product.div_ceil(1_000_000_000_000) as u32;
    make_even(divider.max(minimum))
}

/// Smallest resolution whose predicted finger signal clears the signal
/// floor, with the prediction at that resolution.
fn solve_resolution(cp_femtofarads: u64, finger_capacitance: u16, tuning: &TuningConfig) -> (u8, u16) {
    let finger = finger_capacitance as u64;
    let mut chosen = MAX_RESOLUTION;
    let mut predicted = 0u64;
    for resolution in MIN_RESOLUTION..=MAX_RESOLUTION {
        let full_scale = (1u64 << resolution) - 1;
        let touched_raw = full_scale * tuning.calibration_target.percent as u64 / PERCENT_100;
        predicted = touched_raw * finger / (cp_femtofarads + finger).max(1);
        if predicted >= tuning.signal_floor as u64 {
            chosen = resolution;
            break;
        }
    }
    (chosen, predicted.min(u16::MAX as u64) as u16)
}

fn resolve_clock_source(divider: u32, resolution: u8) -> ClockSource {
    let conversions = (1u32 << resolution) / divider.max(1);
    if divider >= SSC_MIN_DIVIDER && conversions >= SSC_MIN_CONVERSIONS {
        ClockSource::SpreadSpectrum
    } else {
        ClockSource::Direct
    }
}

fn make_even(value: u32) -> u32 {
    (value + 1) & !1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_widens_instantly_and_decays_slowly() {
        let mut envelope = NoiseEnvelope::new();
        envelope.update(1000);
        assert_eq!(envelope.amplitude(), 0);
        envelope.update(1040);
        // Maximum jumps to 1040 while the minimum relaxes upward a step.
        assert_eq!(envelope.amplitude(), 35);
        // Quiet samples shrink the envelope gradually.
        let mut last = envelope.amplitude();
        for _ in 0..10 {
            envelope.update(1020);
            assert!(envelope.amplitude() <= last);
            last = envelope.amplitude();
        }
        assert!(last < 40);
    }

    #[test]
    fn thresholds_keep_their_ordering() {
        let mut params = WidgetParams::default();
        for (amplitude, signal) in [(0u16, 0u16), (4, 60), (40, 200), (500, 40)] {
            update_thresholds(&mut params, amplitude, signal);
            assert!(params.finger_threshold > params.noise_threshold);
            assert!(params.hysteresis >= 1);
            assert!(params.hysteresis < params.finger_threshold);
            assert_eq!(params.noise_threshold, params.negative_noise_threshold);
        }
    }

    #[test]
    fn wide_envelope_keeps_thresholds_within_full_scale() {
        let mut params = WidgetParams::default();
        params.resolution = 12;
        let full_scale = params.max_raw_count();
        // Amplitudes up to and beyond the conversion range.
        for (amplitude, signal) in [(3800u16, 19u16), (5000, 0), (u16::MAX, 400)] {
            update_thresholds(&mut params, amplitude, signal);
            assert!(
                params.noise_threshold as u32 + params.negative_noise_threshold as u32
                    <= full_scale as u32
            );
            assert!(params.finger_threshold <= full_scale);
            assert!(params.finger_threshold > params.noise_threshold);
            assert_eq!(params.validate(), Ok(()));
        }
    }

    #[test]
    fn noisier_envelope_raises_the_noise_floor() {
        let mut quiet = WidgetParams::default();
        let mut noisy = WidgetParams::default();
        update_thresholds(&mut quiet, 10, 100);
        update_thresholds(&mut noisy, 80, 100);
        assert!(noisy.noise_threshold > quiet.noise_threshold);
        assert!(noisy.finger_threshold > quiet.finger_threshold);
    }

    #[test]
    fn divider_grows_with_capacitance() {
        let tuning = TuningConfig::default();
        let small = solve_divider(5_000, 48_000, 8, &tuning);
        let large = solve_divider(50_000, 48_000, 8, &tuning);
        assert!(large > small);
        assert_eq!(small % 2, 0);
        assert_eq!(large % 2, 0);
        assert!(small >= 8);
    }

    #[test]
    fn resolution_rises_until_signal_clears_the_floor() {
        let tuning = TuningConfig::default();
        let (low_cp_resolution, low_signal) = solve_resolution(5_000, 160, &tuning);
        let (high_cp_resolution, high_signal) = solve_resolution(60_000, 160, &tuning);
        assert!(high_cp_resolution >= low_cp_resolution);
        assert!(low_signal >= tuning.signal_floor);
        assert!(high_signal >= tuning.signal_floor || high_cp_resolution == MAX_RESOLUTION);
    }

    #[test]
    fn clock_source_resolution_rule() {
        assert_eq!(resolve_clock_source(16, 12), ClockSource::SpreadSpectrum);
        assert_eq!(resolve_clock_source(4, 12), ClockSource::Direct);
        assert_eq!(resolve_clock_source(64, 8), ClockSource::Direct);
    }
}
