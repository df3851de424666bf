//! Internal per-widget state: sensor sample storage, filter chains,
//! status machines and calibration results.

use heapless::Vec;

use crate::baseline::Baseline;
use crate::config::{
    PositionFilterConfig, RawFilterConfig, SenseMethod, WidgetConfig, WidgetLayout, WidgetParams,
};
use crate::error::Error;
use crate::filter::RawFilterChain;
use crate::position::PositionFilters;
use crate::status::StatusMachine;
use crate::tracker::{TouchTracker, TrackerConfig};
use crate::tune::NoiseEnvelope;
use crate::types::{FrequencyChannel, SensorStatus, MAX_WIDGET_SENSORS};

/// Raw, baseline and difference of one sensor on one frequency channel.
pub(crate) struct ChannelSamples {
    pub raw: u16,
    pub baseline: Baseline,
    pub diff: u16,
    pub chain: RawFilterChain,
}

impl ChannelSamples {
    fn new(filter: &RawFilterConfig) -> Self {
        ChannelSamples {
            raw: 0,
            baseline: Baseline::new(0),
            diff: 0,
            chain: RawFilterChain::new(filter),
        }
    }
}

pub(crate) struct SensorState {
    pub channels: Vec<ChannelSamples, { FrequencyChannel::COUNT }>,
    /// Difference after multi-frequency median, the value detection uses.
    pub diff: u16,
    pub status: SensorStatus,
    /// Sensing code from the calibration search.
    pub code: u8,
    /// Per-sensor compensation code, when compensation is enabled.
    pub compensation_code: u8,
    pub touch_machine: StatusMachine,
    pub proximity_machine: StatusMachine,
    pub envelope: NoiseEnvelope,
}

impl SensorState {
    fn new(filter: &RawFilterConfig, channels: usize) -> Self {
        let mut channel_samples = Vec::new();
        for _ in 0..channels {
            let _ = channel_samples.push(ChannelSamples::new(filter));
        }
        SensorState {
            channels: channel_samples,
            diff: 0,
            status: SensorStatus::default(),
            code: 0,
            compensation_code: 0,
            touch_machine: StatusMachine::new(),
            proximity_machine: StatusMachine::new(),
            envelope: NoiseEnvelope::new(),
        }
    }
}

pub(crate) struct Widget {
    pub layout: WidgetLayout,
    pub method: SenseMethod,
    pub params: WidgetParams,
    pub position_filter: PositionFilterConfig,
    pub tracker_config: TrackerConfig,
    pub frequency_channels: usize,
    pub sensors: Vec<SensorState, MAX_WIDGET_SENSORS>,
    /// Shared detection machine for sliders and self-cap touchpads.
    pub widget_machine: StatusMachine,
    pub tracker: TouchTracker,
    pub filters: PositionFilters,
    /// Column-axis modulator code from calibration.
    pub modulator_code: u8,
    /// Row-axis modulator code, matrix and self-cap touchpad only.
    pub row_modulator_code: u8,
    pub gain_index: u8,
    /// Predicted finger signal from auto-tuning, in counts.
    pub signal_estimate: u16,
    pub initialized: bool,
}

impl Widget {
    pub fn new(config: WidgetConfig, gain_index: u8) -> Result<Self, Error> {
        config.params.validate()?;
        if config.frequency_channels != 1 && config.frequency_channels != 3 {
            return Err(Error::InvalidConfig);
        }
        let sensor_count = config.layout.sensor_count(config.method);
        if sensor_count == 0 || sensor_count > MAX_WIDGET_SENSORS {
            return Err(Error::InvalidConfig);
        }
        match config.layout {
            WidgetLayout::LinearSlider { sensors, .. } if sensors < 2 => {
                return Err(Error::InvalidConfig)
            }
            WidgetLayout::RadialSlider { sensors, .. } if sensors < 3 => {
                return Err(Error::InvalidConfig)
            }
            WidgetLayout::MatrixButtons { columns, rows } if columns == 0 || rows == 0 => {
                return Err(Error::InvalidConfig)
            }
            WidgetLayout::Touchpad { columns, rows, .. } if columns < 2 || rows < 2 => {
                return Err(Error::InvalidConfig)
            }
            // Matrix decoding relies on per-axis self-cap sensors.
            WidgetLayout::MatrixButtons { .. } if config.method == SenseMethod::MutualCap => {
                return Err(Error::InvalidConfig)
            }
            _ => {}
        }

        let mut sensors = Vec::new();
        for _ in 0..sensor_count {
            let _ = sensors.push(SensorState::new(
                &config.raw_filter,
                config.frequency_channels as usize,
            ));
        }
        Ok(Widget {
            layout: config.layout,
            method: config.method,
            params: config.params,
            position_filter: config.position_filter,
            tracker_config: config.tracker,
            frequency_channels: config.frequency_channels as usize,
            sensors,
            widget_machine: StatusMachine::new(),
            tracker: TouchTracker::new(),
            filters: PositionFilters::new(),
            modulator_code: 0,
            row_modulator_code: 0,
            gain_index,
            signal_estimate: 0,
            initialized: false,
        })
    }

    /// Column sensor count for axis-split layouts; for everything else the
    /// whole sensor list is "columns".
    pub fn column_count(&self) -> usize {
        match self.layout {
            WidgetLayout::MatrixButtons { columns, .. } => columns as usize,
            WidgetLayout::Touchpad { columns, .. } if self.method == SenseMethod::SelfCap => {
                columns as usize
            }
            _ => self.sensors.len(),
        }
    }

    /// Whether the layout splits sensors into a column axis and a row axis.
    pub fn has_row_axis(&self) -> bool {
        matches!(self.layout, WidgetLayout::MatrixButtons { .. })
            || (matches!(self.layout, WidgetLayout::Touchpad { .. })
                && self.method == SenseMethod::SelfCap)
    }

    /// Drops all runtime history; the next frame re-seeds baselines and
    /// filters from its samples.
    pub fn reset(&mut self) {
        for sensor in &mut self.sensors {
            for channel in &mut sensor.channels {
                channel.chain.reset();
                channel.raw = 0;
                channel.diff = 0;
            }
            sensor.diff = 0;
            sensor.status = SensorStatus::default();
            sensor.touch_machine.reset();
            sensor.proximity_machine.reset();
            sensor.envelope.reset();
        }
        self.widget_machine.reset();
        self.tracker.reset();
        self.filters.reset();
        self.initialized = false;
    }
}
