//! End-to-end runs through the public engine API: calibration and tuning
//! against a mock peripheral, then frame processing from raw counts to
//! touch reports.

use touchsense::{
    CalibrationTarget, Error, FrequencyChannel, ScanFrame, SenseDriver, SenseMethod,
    SensingEngine, SensorId, TuningConfig, WidgetConfig, WidgetId, WidgetLayout, WidgetPositions,
};

/// Self-cap electrical model: raw counts fall linearly with the programmed
/// sensing code. With the default top gain the slope is 24 counts per code
/// step, which lands the calibrated code near 25 at 12-bit resolution.
struct SelfCapModel {
    codes: [u8; 16],
    scans: u32,
    full_scale: u32,
}

impl SelfCapModel {
    fn new(full_scale: u32) -> Self {
        SelfCapModel { codes: [0; 16], scans: 0, full_scale }
    }
}

impl SenseDriver for SelfCapModel {
    fn start_scan(&mut self, _: WidgetId, _: SensorId, _: FrequencyChannel) {
        self.scans += 1;
    }

    fn is_busy(&self) -> bool {
        false
    }

    fn read_raw(&mut self, _: WidgetId, sensor: SensorId, _: FrequencyChannel) -> u16 {
        let code = self.codes[sensor.0 as usize] as u32;
        self.full_scale.saturating_sub(code * 24) as u16
    }

    fn program_code(&mut self, _: WidgetId, sensor: SensorId, code: u8, _: u8) {
        self.codes[sensor.0 as usize] = code;
    }
}

struct StuckBusyDriver;

impl SenseDriver for StuckBusyDriver {
    fn start_scan(&mut self, _: WidgetId, _: SensorId, _: FrequencyChannel) {}

    fn is_busy(&self) -> bool {
        true
    }

    fn read_raw(&mut self, _: WidgetId, _: SensorId, _: FrequencyChannel) -> u16 {
        0
    }

    fn program_code(&mut self, _: WidgetId, _: SensorId, _: u8, _: u8) {}
}

fn button_engine() -> (SensingEngine, WidgetId) {
    let mut engine = SensingEngine::new(TuningConfig::default());
    let id = engine
        .add_widget(WidgetConfig::new(
            WidgetLayout::Button { sensors: 1 },
            SenseMethod::SelfCap,
        ))
        .unwrap();
    (engine, id)
}

#[test]
fn calibration_converges_into_the_tolerance_band() {
    let (mut engine, id) = button_engine();
    let mut driver = SelfCapModel::new(4095);
    engine
        .calibrate_widget(&mut driver, id, CalibrationTarget::default())
        .unwrap();
    // Raw at the final code must sit within 10% of the 85% target.
    let raw = 4095u32.saturating_sub(driver.codes[0] as u32 * 24);
    assert!(raw >= 4095 * 75 / 100, "raw {raw} below the band");
    assert!(raw <= 4095 * 95 / 100, "raw {raw} above the band");
}

#[test]
fn calibration_scan_count_is_bounded() {
    let (mut engine, id) = button_engine();
    let mut driver = SelfCapModel::new(4095);
    engine
        .calibrate_widget(&mut driver, id, CalibrationTarget::default())
        .unwrap();
    // Seven search scans, one settle rescan, one verification scan.
    assert_eq!(driver.scans, 9);
}

#[test]
fn busy_peripheral_rejects_control_loops() {
    let (mut engine, id) = button_engine();
    let mut driver = StuckBusyDriver;
    assert_eq!(
        engine.calibrate_widget(&mut driver, id, CalibrationTarget::default()),
        Err(Error::Busy)
    );
    assert_eq!(engine.autotune_widget(&mut driver, id), Err(Error::Busy));
}

#[test]
fn autotune_sizes_clock_and_resolution() {
    let mut tuning = TuningConfig::default();
    tuning.signal_floor = 15;
    let mut engine = SensingEngine::new(tuning);
    let id = engine
        .add_widget(WidgetConfig::new(
            WidgetLayout::Button { sensors: 1 },
            SenseMethod::SelfCap,
        ))
        .unwrap();
    let mut driver = SelfCapModel::new(4095);
    engine.autotune_widget(&mut driver, id).unwrap();

    let params = engine.widget_params(id).unwrap();
    // The model's 28 nF-ish parasitic lands on an 8-divider, 12-bit setup.
    assert_eq!(params.sense_clock_divider, 8);
    assert_eq!(params.resolution, 12);
    assert_eq!(params.sense_clock_divider % 2, 0);
    assert!((8..=16).contains(&params.resolution));
}

#[test]
fn untunable_capacitance_is_reported() {
    // A shallow slope calibrates to a large code, which reads back as a
    // parasitic capacitance above the supported ceiling.
    struct ShallowSlope {
        codes: [u8; 4],
    }
    impl SenseDriver for ShallowSlope {
        fn start_scan(&mut self, _: WidgetId, _: SensorId, _: FrequencyChannel) {}
        fn is_busy(&self) -> bool {
            false
        }
        fn read_raw(&mut self, _: WidgetId, sensor: SensorId, _: FrequencyChannel) -> u16 {
            4095u32.saturating_sub(self.codes[sensor.0 as usize] as u32 * 6) as u16
        }
        fn program_code(&mut self, _: WidgetId, sensor: SensorId, code: u8, _: u8) {
            self.codes[sensor.0 as usize] = code;
        }
    }

    let (mut engine, id) = button_engine();
    let mut driver = ShallowSlope { codes: [0; 4] };
    assert_eq!(engine.autotune_widget(&mut driver, id), Err(Error::OutOfTolerance));
}

#[test]
fn button_lifecycle_through_the_public_api() {
    let (mut engine, id) = button_engine();
    let quiet = [3481u16];
    let touched = [3681u16];

    let report = engine.process_frame(id, &ScanFrame::single(&quiet)).unwrap();
    assert!(!report.active);
    // Default on-debounce is 3: two qualifying scans stay quiet.
    for _ in 0..2 {
        let report = engine.process_frame(id, &ScanFrame::single(&touched)).unwrap();
        assert!(!report.active);
    }
    let report = engine.process_frame(id, &ScanFrame::single(&touched)).unwrap();
    assert!(report.active);
    assert_eq!(report.active_mask, 0b1);
    // Release clears in a single scan.
    let report = engine.process_frame(id, &ScanFrame::single(&quiet)).unwrap();
    assert!(!report.active);
}

#[test]
fn mutual_touchpad_keeps_the_touch_id_while_moving() {
    let mut engine = SensingEngine::new(TuningConfig::default());
    let mut config = WidgetConfig::new(
        WidgetLayout::Touchpad { columns: 4, rows: 3, max_position_x: 300, max_position_y: 200 },
        SenseMethod::MutualCap,
    );
    config.tracker.displacement_sq = 40_000;
    let id = engine.add_widget(config).unwrap();

    let quiet = [1000u16; 12];
    let _ = engine.process_frame(id, &ScanFrame::single(&quiet)).unwrap();

    // Contact on node (1, 1), then one node to the right.
    let mut frame = quiet;
    frame[5] = 1300;
    let report = engine.process_frame(id, &ScanFrame::single(&frame)).unwrap();
    assert!(report.active);
    let first = match report.positions {
        WidgetPositions::Detected(touches) => touches[0],
        other => panic!("expected one touch, got {other:?}"),
    };
    assert_eq!((first.x, first.y), (100, 100));

    let mut frame = quiet;
    frame[6] = 1300;
    let report = engine.process_frame(id, &ScanFrame::single(&frame)).unwrap();
    let second = match report.positions {
        WidgetPositions::Detected(touches) => touches[0],
        other => panic!("expected one touch, got {other:?}"),
    };
    assert_eq!(second.id, first.id);
    assert_eq!((second.x, second.y), (200, 100));
}

#[test]
fn smartsense_thresholds_stay_within_full_scale() {
    let mut engine = SensingEngine::new(TuningConfig::default());
    let mut config = WidgetConfig::new(
        WidgetLayout::Button { sensors: 1 },
        SenseMethod::SelfCap,
    );
    config.params.smartsense = true;
    let id = engine.add_widget(config).unwrap();

    // Interference swinging across most of the 12-bit range blows the
    // envelope wide open; the rebuilt thresholds must still fit the scale.
    for raw in [100u16, 3900, 100, 3900, 100, 3900, 100, 3900] {
        let frame = [raw];
        let _ = engine.process_frame(id, &ScanFrame::single(&frame)).unwrap();
    }
    let params = engine.widget_params(id).unwrap();
    let full_scale = 4095u32;
    assert!(
        params.noise_threshold as u32 + params.negative_noise_threshold as u32 <= full_scale
    );
    assert!((params.finger_threshold as u32) <= full_scale);
    assert!(params.finger_threshold > params.noise_threshold);
    assert!(params.hysteresis >= 1);
    assert!(params.hysteresis < params.finger_threshold);
}

#[test]
fn smartsense_rebuilds_thresholds_from_noise() {
    let mut engine = SensingEngine::new(TuningConfig::default());
    let mut config = WidgetConfig::new(
        WidgetLayout::Button { sensors: 1 },
        SenseMethod::SelfCap,
    );
    config.params.smartsense = true;
    let id = engine.add_widget(config).unwrap();

    // Noisy idle counts: the envelope widens and the thresholds follow.
    for raw in [1000u16, 1020, 980, 1025, 975, 1015, 985] {
        let frame = [raw];
        let _ = engine.process_frame(id, &ScanFrame::single(&frame)).unwrap();
    }
    let params = engine.widget_params(id).unwrap();
    assert!(params.noise_threshold > 0);
    assert!(params.finger_threshold > params.noise_threshold);
    assert!(params.hysteresis >= 1);
    assert!(params.hysteresis < params.finger_threshold);
}
