//! Successive-approximation calibration of the sensing codes.
//!
//! Self-cap widgets search a 7-bit code per sensor, keep the largest code
//! per axis as the shared modulator and optionally re-derive per-sensor
//! compensation codes from the settled raw counts. Mutual-cap widgets
//! search every sensor's compensation code in parallel. Both paths finish
//! with a verification scan against a tolerance band around the target.

use heapless::Vec;

use crate::config::{CalibrationTarget, SenseMethod, TuningConfig};
use crate::error::Error;
use crate::hal::{self, SenseDriver};
use crate::types::{FrequencyChannel, SensorId, WidgetId, MAX_WIDGET_SENSORS};
use crate::widget::Widget;

/// Starting point of the binary search, the 7-bit mid code.
const CODE_MIDDLE: u8 = 0x40;
const CODE_MAX: u32 = 127;
const PERCENT_100: u32 = 100;

pub(crate) fn calibrate_widget<D: SenseDriver>(
    driver: &mut D,
    widget: &mut Widget,
    id: WidgetId,
    target: CalibrationTarget,
    tuning: &TuningConfig,
) -> Result<(), Error> {
    if driver.is_busy() {
        return Err(Error::Busy);
    }
    let raw_target =
        ((widget.params.max_raw_count() as u32 * target.percent as u32) / PERCENT_100) as u16;
    match widget.method {
        SenseMethod::SelfCap => calibrate_self_cap(driver, widget, id, raw_target, target, tuning),
        SenseMethod::MutualCap => calibrate_mutual_cap(driver, widget, id, raw_target, tuning)?,
    }
    verify(driver, widget, id, target, tuning)
}

/// One sensor's binary search: seven scans narrow the code, one settle
/// rescan reads the raw count at the final code. Self-cap raw counts fall
/// as the code rises, so a raw below target clears the bit under test.
/// Code zero is never programmed.
fn search_code<D: SenseDriver>(
    driver: &mut D,
    id: WidgetId,
    sensor: SensorId,
    gain_index: u8,
    raw_target: u16,
    budget: u32,
) -> (u8, u16) {
    let mut code = CODE_MIDDLE;
    let mut mask = CODE_MIDDLE;
    loop {
        driver.program_code(id, sensor, code, gain_index);
        let raw = hal::scan_blocking(driver, id, sensor, FrequencyChannel::Ch0, budget);
        mask >>= 1;
        if raw < raw_target {
            code &= !(mask << 1);
        }
        code |= mask;
        if code == 0 {
            code = 1;
        }
        if mask == 0 {
            break;
        }
    }
    driver.program_code(id, sensor, code, gain_index);
    let settled = hal::scan_blocking(driver, id, sensor, FrequencyChannel::Ch0, budget);
    (code, settled)
}

fn calibrate_self_cap<D: SenseDriver>(
    driver: &mut D,
    widget: &mut Widget,
    id: WidgetId,
    raw_target: u16,
    target: CalibrationTarget,
    tuning: &TuningConfig,
) {
    let mut settled: Vec<u16, MAX_WIDGET_SENSORS> = Vec::new();
    loop {
        settled.clear();
        let mut column_max = 0u8;
        let mut row_max = 0u8;
        let columns = widget.column_count();
        for index in 0..widget.sensors.len() {
            let (code, raw) = search_code(
                driver,
                id,
                SensorId(index as u16),
                widget.gain_index,
                raw_target,
                tuning.watchdog_polls,
            );
            let sensor = &mut widget.sensors[index];
            sensor.code = code;
            sensor.compensation_code = code;
            let _ = settled.push(raw);
            if index < columns {
                column_max = column_max.max(code);
            } else {
                row_max = row_max.max(code);
            }
        }
        widget.modulator_code = column_max.max(1);
        widget.row_modulator_code = if widget.has_row_axis() { row_max.max(1) } else { 0 };
        if !switch_gain(widget, tuning) {
            break;
        }
        log::debug!("widget {} gain lowered to {}", id.0, widget.gain_index);
    }

    if tuning.compensation {
        normalize_compensation(widget, &settled, target.percent as u32);
    }
    if tuning.row_col_align && widget.has_row_axis() {
        align_row_column(widget);
    }
}

/// Lower the sensing-current gain while some code sits below the floor and
/// the rescaled maximum still fits in the 7-bit space.
fn switch_gain(widget: &mut Widget, tuning: &TuningConfig) -> bool {
    if widget.gain_index == 0 {
        return false;
    }
    let mut max_code = widget.modulator_code as u32;
    let mut min_code = widget.modulator_code as u32;
    if widget.has_row_axis() {
        max_code = max_code.max(widget.row_modulator_code as u32);
        min_code = min_code.min(widget.row_modulator_code as u32);
    }
    for sensor in &widget.sensors {
        min_code = min_code.min(sensor.compensation_code as u32);
    }
    if min_code >= tuning.code_floor as u32 {
        return false;
    }
    let gain = widget.gain_index as usize;
    let Some(current) = tuning.idac_gains_pa.get(gain) else { return false };
    let Some(lower) = tuning.idac_gains_pa.get(gain - 1) else { return false };
    if *lower == 0 {
        return false;
    }
    let ratio = current / lower;
    if max_code * ratio >= CODE_MAX {
        return false;
    }
    widget.gain_index -= 1;
    true
}

/// Re-derives per-sensor compensation codes from the deficit between each
/// settled raw count and the target, then shrinks the shared modulator to
/// what the least sensitive sensor needs. The row pass recomputes only the
/// first `column_count` row sensors, matching long-standing production
/// behavior that boards are tuned against.
fn normalize_compensation(widget: &mut Widget, settled: &[u16], percent: u32) {
    let max_raw = widget.params.max_raw_count() as u32;
    let columns = widget.column_count();
    let total = widget.sensors.len();

    let column_modulator = normalize_axis(widget, settled, 0, columns, columns, max_raw, percent);
    widget.modulator_code = column_modulator;
    if widget.has_row_axis() && total > columns {
        let row_modulator =
            normalize_axis(widget, settled, columns, total, columns.min(total - columns), max_raw, percent);
        widget.row_modulator_code = row_modulator;
    }
}

fn normalize_axis(
    widget: &mut Widget,
    settled: &[u16],
    start: usize,
    end: usize,
    recompute_count: usize,
    max_raw: u32,
    percent: u32,
) -> u8 {
    let axis_modulator = if start == 0 {
        widget.modulator_code
    } else {
        widget.row_modulator_code
    } as u32;
    let mut min_code = axis_modulator;
    let mut min_raw = settled[start] as u32;
    for index in start..end {
        let code = widget.sensors[index].compensation_code as u32;
        if min_code > code {
            min_code = code;
            min_raw = settled[index] as u32;
        }
    }

    let raw_level = (min_raw * PERCENT_100) / max_raw.max(1) + PERCENT_100;
    let mut modulator = (raw_level * min_code) / percent.max(1);
    if modulator > axis_modulator {
        modulator = axis_modulator;
    }
    let floor = modulator * percent;

    for index in start..(start + recompute_count).min(end) {
        let sensor = &mut widget.sensors[index];
        let level = ((settled[index] as u32 * PERCENT_100) / max_raw.max(1) + PERCENT_100)
            * sensor.compensation_code as u32;
        sensor.compensation_code = if level < floor {
            0
        } else {
            (((level - floor) + (PERCENT_100 / 2)) / PERCENT_100).min(CODE_MAX) as u8
        };
    }
    modulator.max(1) as u8
}

/// Scales the weaker axis modulator by the sense-clock ratio so both axes
/// drive comparable charge per conversion.
fn align_row_column(widget: &mut Widget) {
    let column_clock = widget.params.sense_clock_divider as u32;
    let row_clock = widget.params.row_sense_clock_divider as u32;
    let column_product = widget.modulator_code as u32 * column_clock;
    let row_product = widget.row_modulator_code as u32 * row_clock;
    if column_product < row_product {
        widget.modulator_code = (row_product / column_clock.max(1)).min(CODE_MAX) as u8;
    } else {
        widget.row_modulator_code = (column_product / row_clock.max(1)).min(CODE_MAX) as u8;
    }
}

/// All sensors advance one code bit per round; mutual-cap raw counts rise
/// with the compensation code, so a raw above target clears the bit.
fn calibrate_mutual_cap<D: SenseDriver>(
    driver: &mut D,
    widget: &mut Widget,
    id: WidgetId,
    raw_target: u16,
    tuning: &TuningConfig,
) -> Result<(), Error> {
    let mut mask = CODE_MIDDLE;
    for sensor in &mut widget.sensors {
        sensor.compensation_code = CODE_MIDDLE;
    }
    loop {
        for index in 0..widget.sensors.len() {
            let code = widget.sensors[index].compensation_code;
            driver.program_code(id, SensorId(index as u16), code, widget.gain_index);
            let raw = hal::scan_blocking(
                driver,
                id,
                SensorId(index as u16),
                FrequencyChannel::Ch0,
                tuning.watchdog_polls,
            );
            let sensor = &mut widget.sensors[index];
            let mut code = sensor.compensation_code;
            let next_mask = mask >> 1;
            if raw > raw_target {
                code &= !mask;
            }
            code |= next_mask;
            if code == 0 {
                code = 1;
            }
            sensor.compensation_code = code;
            sensor.code = code;
        }
        mask >>= 1;
        if mask == 0 {
            break;
        }
    }
    if !hal::wait_idle(driver, tuning.watchdog_polls) {
        return Err(Error::Timeout);
    }
    Ok(())
}

/// Rescans every sensor at its final code and checks the raw count against
/// the tolerance band around the target.
fn verify<D: SenseDriver>(
    driver: &mut D,
    widget: &mut Widget,
    id: WidgetId,
    target: CalibrationTarget,
    tuning: &TuningConfig,
) -> Result<(), Error> {
    let max_raw = widget.params.max_raw_count() as u32;
    let lower_percent = (target.percent as u32).saturating_sub(target.tolerance as u32);
    let upper_percent = (target.percent as u32 + target.tolerance as u32).min(PERCENT_100);
    let lower = (max_raw * lower_percent) / PERCENT_100;
    let upper = (max_raw * upper_percent) / PERCENT_100;
    let columns = widget.column_count();

    for index in 0..widget.sensors.len() {
        let code = effective_code(widget, index, columns, tuning);
        driver.program_code(id, SensorId(index as u16), code, widget.gain_index);
        let raw = hal::scan_blocking(
            driver,
            id,
            SensorId(index as u16),
            FrequencyChannel::Ch0,
            tuning.watchdog_polls,
        ) as u32;
        if raw < lower || raw > upper {
            log::warn!(
                "widget {} sensor {index} out of tolerance: raw {raw} not in [{lower}, {upper}]",
                id.0
            );
            return Err(Error::OutOfTolerance);
        }
    }
    if !hal::wait_idle(driver, tuning.watchdog_polls) {
        return Err(Error::Timeout);
    }
    Ok(())
}

/// The code a sensor actually runs with after calibration.
fn effective_code(widget: &Widget, index: usize, columns: usize, tuning: &TuningConfig) -> u8 {
    match widget.method {
        SenseMethod::MutualCap => widget.sensors[index].compensation_code,
        SenseMethod::SelfCap => {
            if tuning.compensation {
                widget.sensors[index].code
            } else if index < columns || !widget.has_row_axis() {
                widget.modulator_code
            } else {
                widget.row_modulator_code
            }
        }
    }
}
