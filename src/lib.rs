//! Capacitive touch sensing data-processing and auto-calibration engine.
//!
//! The crate turns raw capacitive scan counts into debounced touch reports:
//! raw-count filtering, baseline and difference tracking, successive
//! approximation calibration of the sensing codes, noise-envelope threshold
//! tuning, centroid extraction, multi-touch identity tracking and position
//! filtering. Register-level hardware access stays behind the
//! [`hal::SenseDriver`] trait; the crate never owns the peripheral.
//!
//! All storage is bounded and allocation-free.

#![cfg_attr(not(test), no_std)]

pub mod centroid;
pub mod config;
pub mod engine;
pub mod error;
pub mod hal;
pub mod tracker;
pub mod types;

mod baseline;
mod calibrate;
mod filter;
mod position;
mod status;
mod tune;
mod widget;

pub use centroid::{FiveByFiveCentroid, ThreeByThreeCentroid, TouchpadCentroid};
pub use config::{
    AdaptiveIirConfig, AverageLength, BallisticConfig, CalibrationTarget, ClockSource, IirConfig,
    IirMode, PositionFilterConfig, RawFilterConfig, SenseMethod, TuningConfig, WidgetConfig,
    WidgetLayout, WidgetParams,
};
pub use engine::{ScanFrame, SensingEngine};
pub use error::Error;
pub use hal::SenseDriver;
pub use tracker::TrackerConfig;
pub use types::{
    FrequencyChannel, Position, SensorId, SensorStatus, TouchReport, WidgetId, WidgetPositions,
    MAX_TOUCHES, MAX_WIDGETS, MAX_WIDGET_SENSORS,
};
