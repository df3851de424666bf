//! The sensing engine: owns all widget state and runs the processing
//! pipeline for each scanned frame. Raw counts come in through a
//! [`ScanFrame`]; debounced statuses and positions come out as a
//! [`TouchReport`]. Control-loop entry points hand the peripheral to the
//! calibration and tuning passes.

use heapless::Vec;

use crate::calibrate;
use crate::centroid::{self, ThreeByThreeCentroid, TouchpadCentroid};
use crate::config::{
    CalibrationTarget, SenseMethod, TuningConfig, WidgetConfig, WidgetLayout, WidgetParams,
};
use crate::error::Error;
use crate::filter::median3;
use crate::hal::SenseDriver;
use crate::status::DetectThresholds;
use crate::tune;
use crate::types::{
    FrequencyChannel, Position, TouchReport, WidgetId, WidgetPositions, MAX_TOUCHES, MAX_WIDGETS,
    MAX_WIDGET_SENSORS,
};
use crate::widget::Widget;

/// One scan of raw counts for a widget: one sample per sensor per enabled
/// frequency channel, in sensor order.
pub struct ScanFrame<'a> {
    channels: [Option<&'a [u16]>; FrequencyChannel::COUNT],
}

impl<'a> ScanFrame<'a> {
    pub fn single(samples: &'a [u16]) -> Self {
        ScanFrame { channels: [Some(samples), None, None] }
    }

    pub fn multi_frequency(ch0: &'a [u16], ch1: &'a [u16], ch2: &'a [u16]) -> Self {
        ScanFrame { channels: [Some(ch0), Some(ch1), Some(ch2)] }
    }

    fn channel(&self, index: usize) -> Option<&'a [u16]> {
        self.channels.get(index).copied().flatten()
    }
}

static DEFAULT_TOUCHPAD_CENTROID: ThreeByThreeCentroid = ThreeByThreeCentroid;

pub struct SensingEngine {
    widgets: Vec<Widget, MAX_WIDGETS>,
    tuning: TuningConfig,
    timestamp: u32,
    touchpad_centroid: &'static (dyn TouchpadCentroid + Sync),
}

impl SensingEngine {
    pub fn new(tuning: TuningConfig) -> Self {
        SensingEngine {
            widgets: Vec::new(),
            tuning,
            timestamp: 0,
            touchpad_centroid: &DEFAULT_TOUCHPAD_CENTROID,
        }
    }

    /// Registers a widget and returns its handle. Fails when validation
    /// rejects the configuration or the widget table is full.
    pub fn add_widget(&mut self, config: WidgetConfig) -> Result<WidgetId, Error> {
        let widget = Widget::new(config, self.tuning.gain_index)?;
        let id = WidgetId(self.widgets.len() as u16);
        self.widgets.push(widget).map_err(|_| Error::InvalidConfig)?;
        log::debug!("widget {} registered", id.0);
        Ok(id)
    }

    /// Swaps in the advanced touchpad centroid for self-cap touchpads.
    pub fn set_touchpad_centroid(&mut self, centroid: &'static (dyn TouchpadCentroid + Sync)) {
        self.touchpad_centroid = centroid;
    }

    pub fn widget_params(&self, id: WidgetId) -> Result<&WidgetParams, Error> {
        self.widgets
            .get(id.0 as usize)
            .map(|widget| &widget.params)
            .ok_or(Error::InvalidWidget)
    }

    pub fn set_widget_params(&mut self, id: WidgetId, params: WidgetParams) -> Result<(), Error> {
        params.validate()?;
        self.widget_mut(id)?.params = params;
        Ok(())
    }

    /// Drops runtime history; the next frame re-seeds baselines, filters
    /// and status machines.
    pub fn reset_widget(&mut self, id: WidgetId) -> Result<(), Error> {
        self.widget_mut(id)?.reset();
        Ok(())
    }

    /// Advances the engine clock feeding the ballistic filter.
    pub fn increment_timestamp(&mut self, interval: u32) {
        self.timestamp = self.timestamp.wrapping_add(interval);
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Calibrates one widget's sensing codes toward the target.
    pub fn calibrate_widget<D: SenseDriver>(
        &mut self,
        driver: &mut D,
        id: WidgetId,
        target: CalibrationTarget,
    ) -> Result<(), Error> {
        let tuning = self.tuning.clone();
        let widget = self.widgets.get_mut(id.0 as usize).ok_or(Error::InvalidWidget)?;
        widget.gain_index = tuning.gain_index;
        calibrate::calibrate_widget(driver, widget, id, target, &tuning)
    }

    /// Runs the full three-phase auto-tuning pass on one widget.
    pub fn autotune_widget<D: SenseDriver>(
        &mut self,
        driver: &mut D,
        id: WidgetId,
    ) -> Result<(), Error> {
        let tuning = self.tuning.clone();
        let widget = self.widgets.get_mut(id.0 as usize).ok_or(Error::InvalidWidget)?;
        widget.gain_index = tuning.gain_index;
        tune::autotune_widget(driver, widget, id, &tuning)
    }

    /// Processes one scanned frame for one widget.
    ///
    /// The first frame after registration or reset seeds filter and
    /// baseline history and reports no activity.
    pub fn process_frame(&mut self, id: WidgetId, frame: &ScanFrame) -> Result<TouchReport, Error> {
        let timestamp = self.timestamp;
        let auto_reset = self.tuning.auto_reset;
        let touchpad_centroid = self.touchpad_centroid;
        let widget = self.widgets.get_mut(id.0 as usize).ok_or(Error::InvalidWidget)?;

        let sensor_count = widget.sensors.len();
        for channel in 0..widget.frequency_channels {
            match frame.channel(channel) {
                Some(samples) if samples.len() == sensor_count => {}
                _ => return Err(Error::InvalidSensor),
            }
        }

        let first_frame = !widget.initialized;
        let params = widget.params;

        // Raw filters and baselines, per sensor per channel.
        for (index, sensor) in widget.sensors.iter_mut().enumerate() {
            for channel in 0..sensor.channels.len() {
                let raw = match frame.channel(channel) {
                    Some(samples) => samples[index],
                    None => continue,
                };
                let samples = &mut sensor.channels[channel];
                let filtered = samples.chain.apply(raw);
                samples.raw = filtered;
                if first_frame {
                    samples.baseline.reset(filtered);
                } else {
                    samples.baseline.update(filtered, &params, auto_reset);
                }
            }
        }

        // Threshold auto-tuning runs before differences, so this frame's
        // decisions already use the refreshed thresholds.
        if params.smartsense && !first_frame {
            let mut amplitude = 0u16;
            for sensor in &mut widget.sensors {
                sensor.envelope.update(sensor.channels[0].raw);
                amplitude = amplitude.max(sensor.envelope.amplitude());
            }
            let signal_estimate = widget.signal_estimate;
            tune::update_thresholds(&mut widget.params, amplitude, signal_estimate);
        }
        let params = widget.params;

        // Differences, with the multi-frequency median when enabled.
        for sensor in &mut widget.sensors {
            for samples in &mut sensor.channels {
                samples.diff = samples.baseline.gated_diff(samples.raw, params.noise_threshold);
            }
            sensor.diff = if sensor.channels.len() == FrequencyChannel::COUNT {
                median3(
                    sensor.channels[0].diff,
                    sensor.channels[1].diff,
                    sensor.channels[2].diff,
                )
            } else {
                sensor.channels[0].diff
            };
        }
        widget.initialized = true;

        let touch_thresholds = DetectThresholds {
            threshold: params.finger_threshold,
            hysteresis: params.hysteresis,
            on_debounce: params.on_debounce,
        };

        let mut report = TouchReport::inactive(id);
        match widget.layout {
            WidgetLayout::Button { .. } => {
                for (index, sensor) in widget.sensors.iter_mut().enumerate() {
                    let active = sensor.touch_machine.step(sensor.diff, touch_thresholds);
                    sensor.status.touch = active;
                    if active {
                        report.active_mask |= 1 << index;
                    }
                }
                report.active = report.active_mask != 0;
            }
            WidgetLayout::Proximity { .. } => {
                let proximity_thresholds = DetectThresholds {
                    threshold: params.proximity_threshold,
                    ..touch_thresholds
                };
                for (index, sensor) in widget.sensors.iter_mut().enumerate() {
                    let touch = sensor.touch_machine.step(sensor.diff, touch_thresholds);
                    let proximity =
                        sensor.proximity_machine.step(sensor.diff, proximity_thresholds);
                    sensor.status.touch = touch;
                    sensor.status.proximity = proximity;
                    if touch {
                        report.active_mask |= 1 << index;
                    }
                    if proximity {
                        report.proximity_mask |= 1 << index;
                    }
                }
                report.active = (report.active_mask | report.proximity_mask) != 0;
            }
            WidgetLayout::LinearSlider { max_position, diplexed, .. } => {
                process_slider(widget, &mut report, touch_thresholds, &params, |diffs| {
                    if diplexed {
                        centroid::diplexed(diffs, max_position)
                    } else {
                        centroid::linear(diffs, max_position)
                    }
                });
            }
            WidgetLayout::RadialSlider { max_position, .. } => {
                process_slider(widget, &mut report, touch_thresholds, &params, |diffs| {
                    centroid::radial(diffs, max_position)
                });
            }
            WidgetLayout::MatrixButtons { columns, .. } => {
                let columns = columns as usize;
                let mut column_active: Vec<bool, MAX_WIDGET_SENSORS> = Vec::new();
                let mut row_active: Vec<bool, MAX_WIDGET_SENSORS> = Vec::new();
                for (index, sensor) in widget.sensors.iter_mut().enumerate() {
                    let active = sensor.touch_machine.step(sensor.diff, touch_thresholds);
                    sensor.status.touch = active;
                    if active {
                        report.active_mask |= 1 << index;
                    }
                    if index < columns {
                        let _ = column_active.push(active);
                    } else {
                        let _ = row_active.push(active);
                    }
                }
                report.positions = centroid::matrix_positions(&column_active, &row_active);
                report.active = report.active_mask != 0;
            }
            WidgetLayout::Touchpad { columns, rows, max_position_x, max_position_y } => {
                match widget.method {
                    SenseMethod::SelfCap => {
                        process_self_cap_touchpad(
                            widget,
                            &mut report,
                            touch_thresholds,
                            &params,
                            touchpad_centroid,
                            max_position_x,
                            max_position_y,
                            timestamp,
                        );
                    }
                    SenseMethod::MutualCap => {
                        process_mutual_cap_touchpad(
                            widget,
                            &mut report,
                            &params,
                            columns as usize,
                            rows as usize,
                            max_position_x,
                            max_position_y,
                            timestamp,
                        );
                    }
                }
            }
        }
        Ok(report)
    }

    fn widget_mut(&mut self, id: WidgetId) -> Result<&mut Widget, Error> {
        self.widgets.get_mut(id.0 as usize).ok_or(Error::InvalidWidget)
    }
}

/// Sliders debounce at widget level on the peak difference; per-sensor
/// statuses only report while the widget is active.
fn process_slider(
    widget: &mut Widget,
    report: &mut TouchReport,
    thresholds: DetectThresholds,
    params: &WidgetParams,
    locate: impl Fn(&[u16]) -> Option<u16>,
) {
    let peak = widget.sensors.iter().map(|sensor| sensor.diff).max().unwrap_or(0);
    let active = widget.widget_machine.step(peak, thresholds);
    report.active = active;
    let mut touches: Vec<Position, MAX_TOUCHES> = Vec::new();
    if active {
        let mut diffs: Vec<u16, MAX_WIDGET_SENSORS> = Vec::new();
        for (index, sensor) in widget.sensors.iter_mut().enumerate() {
            let _ = diffs.push(sensor.diff);
            sensor.status.touch = sensor.diff > params.finger_threshold;
            if sensor.status.touch {
                report.active_mask |= 1 << index;
            }
        }
        if let Some(x) = locate(&diffs) {
            let _ = touches.push(Position { id: 0, x, y: 0, z: peak });
        }
    } else {
        for sensor in &mut widget.sensors {
            sensor.status.touch = false;
        }
    }
    widget.filters.apply(&widget.position_filter, &mut touches);
    if !touches.is_empty() {
        report.positions = WidgetPositions::Detected(touches);
    }
}

#[allow(clippy::too_many_arguments)]
fn process_self_cap_touchpad(
    widget: &mut Widget,
    report: &mut TouchReport,
    thresholds: DetectThresholds,
    params: &WidgetParams,
    locate: &dyn TouchpadCentroid,
    max_position_x: u16,
    max_position_y: u16,
    timestamp: u32,
) {
    let columns = widget.column_count();
    let column_peak = widget.sensors[..columns].iter().map(|s| s.diff).max().unwrap_or(0);
    let row_peak = widget.sensors[columns..].iter().map(|s| s.diff).max().unwrap_or(0);
    // Both axes must carry signal for a real contact.
    let metric = column_peak.min(row_peak);
    let active = widget.widget_machine.step(metric, thresholds);
    report.active = active;

    let mut touches: Vec<Position, MAX_TOUCHES> = Vec::new();
    if active {
        let mut column_diffs: Vec<u16, MAX_WIDGET_SENSORS> = Vec::new();
        let mut row_diffs: Vec<u16, MAX_WIDGET_SENSORS> = Vec::new();
        for (index, sensor) in widget.sensors.iter_mut().enumerate() {
            if index < columns {
                let _ = column_diffs.push(sensor.diff);
            } else {
                let _ = row_diffs.push(sensor.diff);
            }
            sensor.status.touch = sensor.diff > params.finger_threshold;
            if sensor.status.touch {
                report.active_mask |= 1 << index;
            }
        }
        if let Some((x, y)) =
            locate.locate(&column_diffs, &row_diffs, max_position_x, max_position_y)
        {
            let _ = touches.push(Position { id: 0, x, y, z: metric });
        }
    } else {
        for sensor in &mut widget.sensors {
            sensor.status.touch = false;
        }
    }
    widget.filters.apply(&widget.position_filter, &mut touches);
    if let Some(ballistic) = widget.position_filter.ballistic {
        report.ballistic_delta = widget.filters.ballistic_delta(&ballistic, &touches, timestamp);
    }
    if !touches.is_empty() {
        report.positions = WidgetPositions::Detected(touches);
    }
}

#[allow(clippy::too_many_arguments)]
fn process_mutual_cap_touchpad(
    widget: &mut Widget,
    report: &mut TouchReport,
    params: &WidgetParams,
    columns: usize,
    rows: usize,
    max_position_x: u16,
    max_position_y: u16,
    timestamp: u32,
) {
    let mut diffs: Vec<u16, MAX_WIDGET_SENSORS> = Vec::new();
    for sensor in &mut widget.sensors {
        let _ = diffs.push(sensor.diff);
        sensor.status.touch = false;
    }
    let peaks = centroid::local_maxima(&diffs, columns, rows, params.finger_threshold);

    let mut touches: Vec<Position, MAX_TOUCHES> = Vec::new();
    for (column, row) in &peaks {
        let node = row * columns + column;
        widget.sensors[node].status.touch = true;
        report.active_mask |= 1 << node;
        let _ = touches.push(centroid::node_centroid(
            &diffs,
            columns,
            rows,
            (*column, *row),
            max_position_x,
            max_position_y,
        ));
    }
    widget.tracker.track(&mut touches, &widget.tracker_config);
    widget.filters.apply(&widget.position_filter, &mut touches);
    if let Some(ballistic) = widget.position_filter.ballistic {
        report.ballistic_delta = widget.filters.ballistic_delta(&ballistic, &touches, timestamp);
    }
    report.active = !touches.is_empty();
    if !touches.is_empty() {
        report.positions = WidgetPositions::Detected(touches);
    }
}
