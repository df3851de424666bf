//! Baseline tracking. The baseline follows slow environmental drift in the
//! filtered raw counts but freezes under a touch, so the difference count
//! `raw - baseline` isolates the touch signal.

use fixed::types::U24F8;

use crate::config::WidgetParams;
use crate::filter::iir_u32;

/// Per-sensor per-channel baseline with 8 fractional bits, so small IIR
/// increments are not lost to integer rounding.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Baseline {
    value: U24F8,
    negative_reset_count: u8,
}

impl Baseline {
    pub fn new(raw: u16) -> Self {
        Baseline {
            value: U24F8::from_num(raw),
            negative_reset_count: 0,
        }
    }

    pub fn get(&self) -> u16 {
        self.value.to_num::<u32>() as u16
    }

    pub fn reset(&mut self, raw: u16) {
        self.value = U24F8::from_num(raw);
        self.negative_reset_count = 0;
    }

    /// One scan of baseline history. `auto_reset` lets the baseline keep
    /// tracking upward through a touch instead of freezing.
    pub fn update(&mut self, raw: u16, params: &WidgetParams, auto_reset: bool) {
        let baseline = self.get();
        if raw >= baseline {
            self.negative_reset_count = 0;
        }
        if baseline as u32 > raw as u32 + params.negative_noise_threshold as u32 {
            // Raw stuck well below the baseline: count toward a snap-down.
            self.negative_reset_count = self.negative_reset_count.saturating_add(1);
            if self.negative_reset_count >= params.low_baseline_reset {
                self.reset(raw);
            }
        } else if auto_reset || raw as u32 <= baseline as u32 + params.noise_threshold as u32 {
            let prev = self.value.to_bits();
            let next = iir_u32((raw as u32) << 8, prev, params.baseline_coefficient);
            self.value = U24F8::from_bits(next);
        }
    }

    /// Difference count: zero unless raw clears the baseline by more than
    /// the noise threshold. The noise threshold gates but is not
    /// subtracted from the reported difference.
    pub fn gated_diff(&self, raw: u16, noise_threshold: u16) -> u16 {
        let baseline = self.get();
        if raw as u32 > baseline as u32 + noise_threshold as u32 {
            raw - baseline
        } else {
            0
        }
    }
}
