use heapless::Vec;

use crate::error::Error;
use crate::tracker::TrackerConfig;

/// Sensing electrode arrangement of a widget.
///
/// Sensor order within a scan frame follows the layout: matrix and self-cap
/// touchpad widgets list all column sensors first, then all row sensors;
/// mutual-cap touchpads list nodes row-major (`row * columns + column`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WidgetLayout {
    Button { sensors: u16 },
    Proximity { sensors: u16 },
    LinearSlider { sensors: u16, max_position: u16, diplexed: bool },
    RadialSlider { sensors: u16, max_position: u16 },
    MatrixButtons { columns: u16, rows: u16 },
    Touchpad { columns: u16, rows: u16, max_position_x: u16, max_position_y: u16 },
}

impl WidgetLayout {
    /// Number of sensing elements the scan frame must carry.
    pub fn sensor_count(&self, method: SenseMethod) -> usize {
        match *self {
            WidgetLayout::Button { sensors } => sensors as usize,
            WidgetLayout::Proximity { sensors } => sensors as usize,
            WidgetLayout::LinearSlider { sensors, .. } => sensors as usize,
            WidgetLayout::RadialSlider { sensors, .. } => sensors as usize,
            WidgetLayout::MatrixButtons { columns, rows } => (columns + rows) as usize,
            WidgetLayout::Touchpad { columns, rows, .. } => match method {
                SenseMethod::SelfCap => (columns + rows) as usize,
                SenseMethod::MutualCap => columns as usize * rows as usize,
            },
        }
    }
}

/// Electrode excitation scheme. Self-cap raw counts fall as the programmed
/// sensing code rises; mutual-cap raw counts rise as the compensation code
/// rises, which flips the comparison in the calibration loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SenseMethod {
    SelfCap,
    MutualCap,
}

/// Sense-clock generation for a widget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockSource {
    Direct,
    SpreadSpectrum,
    /// Resolved to `Direct` or `SpreadSpectrum` by auto-tuning.
    Auto,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IirMode {
    /// 16-bit filter state.
    Standard,
    /// 16-bit state plus an 8-bit fractional remainder, which keeps
    /// sub-count drift when the coefficient is small.
    Performance,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IirConfig {
    pub mode: IirMode,
    /// Input weight out of 256.
    pub coefficient: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AverageLength {
    Two,
    Four,
}

/// Raw-count filter pipeline. Enabled stages always run in the order
/// median, IIR, average, jitter.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawFilterConfig {
    pub median: bool,
    pub iir: Option<IirConfig>,
    pub average: Option<AverageLength>,
    pub jitter: bool,
}

/// Adaptive position IIR: the coefficient rises with displacement so slow
/// drifts smooth hard while fast motion passes through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdaptiveIirConfig {
    pub min_coefficient: u8,
    pub max_coefficient: u8,
    /// Displacement at or below this decays the coefficient.
    pub no_movement_threshold: u16,
    /// Displacement at or above this raises the coefficient by one step.
    pub little_movement_threshold: u16,
    /// Displacement at or above this jumps straight to `max_coefficient`.
    pub large_movement_threshold: u16,
}

/// Pointer-ballistics settings for touchpad delta reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BallisticConfig {
    pub speed_coefficient: u8,
    pub acceleration_coefficient: u8,
    /// Counts-per-timestamp-tick speed above which acceleration applies.
    pub speed_threshold: u16,
    pub divisor_shift: u8,
}

/// Per-axis position filter pipeline for resolved touches.
#[derive(Clone, Copy, Debug, Default)]
pub struct PositionFilterConfig {
    pub median: bool,
    pub iir_coefficient: Option<u8>,
    pub adaptive_iir: Option<AdaptiveIirConfig>,
    pub ballistic: Option<BallisticConfig>,
}

/// Detection and conversion parameters of one widget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WidgetParams {
    pub finger_threshold: u16,
    pub proximity_threshold: u16,
    pub noise_threshold: u16,
    pub negative_noise_threshold: u16,
    pub hysteresis: u16,
    /// Consecutive qualifying scans before a detection is raised.
    pub on_debounce: u8,
    /// Scans with the baseline stuck above raw by more than the negative
    /// noise threshold before the baseline snaps down to raw.
    pub low_baseline_reset: u8,
    /// Baseline IIR input weight out of 256.
    pub baseline_coefficient: u8,
    /// Conversion resolution in bits, 8..=16.
    pub resolution: u8,
    pub sense_clock_divider: u16,
    pub row_sense_clock_divider: u16,
    pub clock_source: ClockSource,
    /// Expected finger capacitance in femtofarads, used by auto-tuning to
    /// predict the touch signal.
    pub finger_capacitance: u16,
    /// Recompute thresholds from the measured noise envelope every frame.
    pub smartsense: bool,
}

impl Default for WidgetParams {
    fn default() -> Self {
        WidgetParams {
            finger_threshold: 100,
            proximity_threshold: 200,
            noise_threshold: 40,
            negative_noise_threshold: 40,
            hysteresis: 10,
            on_debounce: 3,
            low_baseline_reset: 30,
            baseline_coefficient: 8,
            resolution: 12,
            sense_clock_divider: 8,
            row_sense_clock_divider: 8,
            clock_source: ClockSource::Direct,
            finger_capacitance: 160,
            smartsense: false,
        }
    }
}

impl WidgetParams {
    /// Full-scale raw count at the configured resolution.
    pub fn max_raw_count(&self) -> u16 {
        if self.resolution >= 16 {
            u16::MAX
        } else {
            (1u16 << self.resolution) - 1
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.resolution < 8 || self.resolution > 16 {
            return Err(Error::InvalidConfig);
        }
        let full_scale = self.max_raw_count() as u32;
        if self.noise_threshold as u32 + self.negative_noise_threshold as u32 > full_scale {
            return Err(Error::InvalidConfig);
        }
        if self.hysteresis == 0 || self.hysteresis >= self.finger_threshold {
            return Err(Error::InvalidConfig);
        }
        if self.on_debounce == 0 || self.low_baseline_reset == 0 {
            return Err(Error::InvalidConfig);
        }
        if self.sense_clock_divider == 0 || self.row_sense_clock_divider == 0 {
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }
}

/// Raw-count target for calibration, in percent of full scale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CalibrationTarget {
    pub percent: u8,
    /// Verification half-band around the target, in percent of full scale.
    pub tolerance: u8,
}

impl Default for CalibrationTarget {
    fn default() -> Self {
        CalibrationTarget { percent: 85, tolerance: 10 }
    }
}

/// Number of selectable sensing-current gains.
pub const IDAC_GAIN_SLOTS: usize = 6;

/// Board-level constants shared by calibration and auto-tuning.
#[derive(Clone, Debug)]
pub struct TuningConfig {
    /// Clock feeding the per-widget sense-clock divider, in kHz.
    pub peripheral_clock_khz: u32,
    /// External series resistance on the sensing lines, in ohms.
    pub series_resistance_ohm: u32,
    /// Modulator reference voltage, in millivolts.
    pub vref_mv: u16,
    /// Sensing current per code LSB for each gain index, in picoamps,
    /// ascending.
    pub idac_gains_pa: Vec<u32, IDAC_GAIN_SLOTS>,
    /// Gain index calibration starts from.
    pub gain_index: u8,
    /// Calibrated codes below this trigger a switch to a lower gain.
    pub code_floor: u8,
    pub calibration_target: CalibrationTarget,
    /// Minimum acceptable predicted finger signal, in counts.
    pub signal_floor: u16,
    /// Iteration budget for busy-wait loops around scans.
    pub watchdog_polls: u32,
    /// Let baselines track upward through touches (auto-reset mode).
    pub auto_reset: bool,
    /// Rescale the row modulator code by the sense-clock ratio after
    /// calibration so both axes run comparable current.
    pub row_col_align: bool,
    /// Derive per-sensor compensation codes after calibration.
    pub compensation: bool,
}

impl Default for TuningConfig {
    fn default() -> Self {
        let mut idac_gains_pa = Vec::new();
        for gain in [37_500u32, 75_000, 300_000, 600_000, 1_200_000, 2_400_000] {
            let _ = idac_gains_pa.push(gain);
        }
        TuningConfig {
            peripheral_clock_khz: 48_000,
            series_resistance_ohm: 560,
            vref_mv: 1200,
            idac_gains_pa,
            gain_index: 5,
            code_floor: 20,
            calibration_target: CalibrationTarget::default(),
            signal_floor: 50,
            watchdog_polls: 200_000,
            auto_reset: false,
            row_col_align: true,
            compensation: true,
        }
    }
}

/// Everything the engine needs to own one widget.
#[derive(Clone, Debug)]
pub struct WidgetConfig {
    pub layout: WidgetLayout,
    pub method: SenseMethod,
    pub params: WidgetParams,
    pub raw_filter: RawFilterConfig,
    pub position_filter: PositionFilterConfig,
    pub tracker: TrackerConfig,
    /// 1 for single-frequency scanning, 3 for multi-frequency.
    pub frequency_channels: u8,
}

impl WidgetConfig {
    pub fn new(layout: WidgetLayout, method: SenseMethod) -> Self {
        WidgetConfig {
            layout,
            method,
            params: WidgetParams::default(),
            raw_filter: RawFilterConfig::default(),
            position_filter: PositionFilterConfig::default(),
            tracker: TrackerConfig::default(),
            frequency_channels: 1,
        }
    }
}
