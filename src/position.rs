//! Position filtering for resolved touches. Each tracked id carries its
//! own per-axis filter history; a new id seeds from its first position so
//! filters never blend positions of different fingers.

use heapless::Vec;

use crate::config::{AdaptiveIirConfig, BallisticConfig, PositionFilterConfig};
use crate::filter::{iir_u32, median3};
use crate::types::{Position, MAX_TOUCHES};

#[derive(Clone, Copy, Debug)]
struct AxisFilter {
    median: [u16; 2],
    iir: u16,
    adaptive: u16,
    adaptive_coefficient: u8,
}

impl AxisFilter {
    fn seed(value: u16, config: &PositionFilterConfig) -> Self {
        AxisFilter {
            median: [value; 2],
            iir: value,
            adaptive: value,
            adaptive_coefficient: config
                .adaptive_iir
                .map_or(0, |adaptive| adaptive.min_coefficient),
        }
    }

    fn apply(&mut self, config: &PositionFilterConfig, input: u16) -> u16 {
        let mut value = input;
        if config.median {
            let out = median3(value, self.median[0], self.median[1]);
            self.median[1] = self.median[0];
            self.median[0] = value;
            value = out;
        }
        if let Some(coefficient) = config.iir_coefficient {
            value = iir_u32(value as u32, self.iir as u32, coefficient) as u16;
            self.iir = value;
        }
        if let Some(adaptive) = config.adaptive_iir {
            self.adapt_coefficient(&adaptive, value);
            value = iir_u32(value as u32, self.adaptive as u32, self.adaptive_coefficient) as u16;
            self.adaptive = value;
        }
        value
    }

    fn adapt_coefficient(&mut self, config: &AdaptiveIirConfig, input: u16) {
        let displacement = input.abs_diff(self.adaptive);
        if displacement >= config.large_movement_threshold {
            self.adaptive_coefficient = config.max_coefficient;
        } else if displacement >= config.little_movement_threshold {
            self.adaptive_coefficient =
                (self.adaptive_coefficient + 1).min(config.max_coefficient);
        } else if displacement <= config.no_movement_threshold {
            self.adaptive_coefficient =
                self.adaptive_coefficient.saturating_sub(1).max(config.min_coefficient);
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct TouchFilter {
    id: u16,
    x: AxisFilter,
    y: AxisFilter,
}

#[derive(Clone, Copy, Debug, Default)]
struct BallisticState {
    previous_count: u8,
    previous_x: u16,
    previous_y: u16,
    previous_timestamp: u32,
}

/// Filter histories for every tracked touch of one widget.
#[derive(Debug, Default)]
pub(crate) struct PositionFilters {
    entries: Vec<TouchFilter, MAX_TOUCHES>,
    ballistic: BallisticState,
}

impl PositionFilters {
    pub fn new() -> Self {
        PositionFilters::default()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.ballistic = BallisticState::default();
    }

    /// Filters every touch in place, dropping histories of vanished ids.
    pub fn apply(&mut self, config: &PositionFilterConfig, touches: &mut Vec<Position, MAX_TOUCHES>) {
        let mut kept: Vec<TouchFilter, MAX_TOUCHES> = Vec::new();
        for touch in touches.iter_mut() {
            let mut entry = self
                .entries
                .iter()
                .find(|entry| entry.id == touch.id)
                .copied()
                .unwrap_or(TouchFilter {
                    id: touch.id,
                    x: AxisFilter::seed(touch.x, config),
                    y: AxisFilter::seed(touch.y, config),
                });
            touch.x = entry.x.apply(config, touch.x);
            touch.y = entry.y.apply(config, touch.y);
            let _ = kept.push(entry);
        }
        self.entries = kept;
    }

    /// Pointer-style displacement of the primary touch, scaled by speed.
    /// State resets whenever the touch count passes through zero.
    pub fn ballistic_delta(
        &mut self,
        config: &BallisticConfig,
        touches: &Vec<Position, MAX_TOUCHES>,
        timestamp: u32,
    ) -> Option<(i16, i16)> {
        let count = touches.len() as u8;
        let state = &mut self.ballistic;
        if count == 0 || state.previous_count == 0 {
            if let Some(primary) = touches.first() {
                state.previous_x = primary.x;
                state.previous_y = primary.y;
            }
            state.previous_timestamp = timestamp;
            state.previous_count = count;
            return None;
        }
        let primary = touches.first()?;
        let elapsed = timestamp.wrapping_sub(state.previous_timestamp).max(1);
        let delta_x = axis_delta(primary.x, state.previous_x, elapsed, config);
        let delta_y = axis_delta(primary.y, state.previous_y, elapsed, config);
        state.previous_x = primary.x;
        state.previous_y = primary.y;
        state.previous_timestamp = timestamp;
        state.previous_count = count;
        Some((delta_x, delta_y))
    }
}

fn axis_delta(current: u16, previous: u16, elapsed: u32, config: &BallisticConfig) -> i16 {
    let displacement = current as i32 - previous as i32;
    let speed = displacement.unsigned_abs() / elapsed;
    let mut gain = config.speed_coefficient as u32;
    if speed > config.speed_threshold as u32 {
        gain = gain.saturating_add(
            (config.acceleration_coefficient as u32)
                .saturating_mul(speed - config.speed_threshold as u32),
        );
    }
    let scaled = (displacement.saturating_mul(gain as i32)) >> config.divisor_shift;
    scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}
