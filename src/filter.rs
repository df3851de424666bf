//! Raw-count filters. One [`RawFilterChain`] runs per sensor per frequency
//! channel; every enabled stage seeds its history from the first sample so
//! a freshly initialized chain passes raw counts through unchanged.

use heapless::Vec;

use crate::config::{AverageLength, IirMode, RawFilterConfig};

/// Median of three, stable for any argument order.
pub(crate) fn median3(a: u16, b: u16, c: u16) -> u16 {
    let (lo, hi) = if a > b { (b, a) } else { (a, b) };
    if c <= lo {
        lo
    } else if c >= hi {
        hi
    } else {
        c
    }
}

/// First-order IIR: `(k*input + (256-k)*prev) >> 8` with `k` the input
/// weight out of 256.
pub(crate) fn iir_u32(input: u32, prev: u32, coefficient: u8) -> u32 {
    let k = coefficient as u32;
    (k * input + (256 - k) * prev) >> 8
}

/// Moves the previous output one count toward the input.
pub(crate) fn jitter(input: u16, prev: u16) -> u16 {
    match input {
        i if i > prev => prev + 1,
        i if i < prev => prev - 1,
        _ => prev,
    }
}

const MAX_STAGES: usize = 4;

#[derive(Clone, Copy, Debug)]
enum FilterStage {
    Median {
        history: [u16; 2],
    },
    Iir {
        mode: IirMode,
        coefficient: u8,
        history: u16,
        /// Fractional remainder, performance mode only.
        low: u8,
    },
    Average {
        length: AverageLength,
        history: [u16; 3],
    },
    Jitter {
        history: u16,
    },
}

impl FilterStage {
    fn seed(&mut self, raw: u16) {
        match self {
            FilterStage::Median { history } => *history = [raw; 2],
            FilterStage::Iir { history, low, .. } => {
                *history = raw;
                *low = 0;
            }
            FilterStage::Average { history, .. } => *history = [raw; 3],
            FilterStage::Jitter { history } => *history = raw,
        }
    }

    fn apply(&mut self, raw: u16) -> u16 {
        match self {
            FilterStage::Median { history } => {
                let out = median3(raw, history[0], history[1]);
                history[1] = history[0];
                history[0] = raw;
                out
            }
            FilterStage::Iir { mode: IirMode::Standard, coefficient, history, .. } => {
                let out = iir_u32(raw as u32, *history as u32, *coefficient) as u16;
                *history = out;
                out
            }
            FilterStage::Iir { mode: IirMode::Performance, coefficient, history, low } => {
                let prev = ((*history as u32) << 8) | *low as u32;
                let next = iir_u32((raw as u32) << 8, prev, *coefficient);
                *low = (next & 0xFF) as u8;
                *history = (next >> 8) as u16;
                *history
            }
            FilterStage::Average { length: AverageLength::Two, history } => {
                let out = ((raw as u32 + history[0] as u32) / 2) as u16;
                history[0] = raw;
                out
            }
            FilterStage::Average { length: AverageLength::Four, history } => {
                let sum =
                    raw as u32 + history[0] as u32 + history[1] as u32 + history[2] as u32;
                history[2] = history[1];
                history[1] = history[0];
                history[0] = raw;
                (sum / 4) as u16
            }
            FilterStage::Jitter { history } => {
                let out = jitter(raw, *history);
                *history = out;
                out
            }
        }
    }
}

/// Ordered raw-count filter pipeline with per-stage history.
#[derive(Clone, Debug)]
pub(crate) struct RawFilterChain {
    stages: Vec<FilterStage, MAX_STAGES>,
    primed: bool,
}

impl RawFilterChain {
    pub fn new(config: &RawFilterConfig) -> Self {
        let mut stages = Vec::new();
        if config.median {
            let _ = stages.push(FilterStage::Median { history: [0; 2] });
        }
        if let Some(iir) = config.iir {
            let _ = stages.push(FilterStage::Iir {
                mode: iir.mode,
                coefficient: iir.coefficient,
                history: 0,
                low: 0,
            });
        }
        if let Some(length) = config.average {
            let _ = stages.push(FilterStage::Average { length, history: [0; 3] });
        }
        if config.jitter {
            let _ = stages.push(FilterStage::Jitter { history: 0 });
        }
        RawFilterChain { stages, primed: false }
    }

    pub fn reset(&mut self) {
        self.primed = false;
    }

    pub fn apply(&mut self, raw: u16) -> u16 {
        if !self.primed {
            for stage in &mut self.stages {
                stage.seed(raw);
            }
            self.primed = true;
            return raw;
        }
        let mut value = raw;
        for stage in &mut self.stages {
            value = stage.apply(value);
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IirConfig;

    #[test]
    fn median_is_order_independent() {
        let samples = [(3u16, 9u16, 7u16), (9, 7, 3), (7, 3, 9), (3, 7, 9), (9, 3, 7), (7, 9, 3)];
        for (a, b, c) in samples {
            assert_eq!(median3(a, b, c), 7);
        }
        assert_eq!(median3(5, 5, 1), 5);
        assert_eq!(median3(5, 5, 9), 5);
    }

    #[test]
    fn iir_converges_monotonically_to_step() {
        let mut prev = 100u32;
        let target = 600u32;
        let mut last = prev;
        for _ in 0..200 {
            prev = iir_u32(target, prev, 64);
            assert!(prev >= last);
            assert!(prev <= target);
            last = prev;
        }
        assert!(target - prev <= 4);
    }

    #[test]
    fn performance_iir_keeps_fractional_drift() {
        // Coefficient 1 with a 100-count step: the standard filter rounds
        // every increment to zero, the performance filter accumulates.
        let mut standard = FilterStage::Iir {
            mode: IirMode::Standard,
            coefficient: 1,
            history: 0,
            low: 0,
        };
        let mut performance = FilterStage::Iir {
            mode: IirMode::Performance,
            coefficient: 1,
            history: 0,
            low: 0,
        };
        let mut std_out = 0;
        let mut perf_out = 0;
        for _ in 0..600 {
            std_out = standard.apply(100);
            perf_out = performance.apply(100);
        }
        assert_eq!(std_out, 0);
        assert!(perf_out > 0);
    }

    #[test]
    fn chain_seeds_from_first_sample() {
        let config = RawFilterConfig {
            median: true,
            iir: Some(IirConfig { mode: IirMode::Standard, coefficient: 128 }),
            average: Some(AverageLength::Four),
            jitter: false,
        };
        let mut chain = RawFilterChain::new(&config);
        assert_eq!(chain.apply(500), 500);
        // A steady input stays steady through every stage.
        for _ in 0..10 {
            assert_eq!(chain.apply(500), 500);
        }
    }

    #[test]
    fn average_of_four_windows_history() {
        let mut stage = FilterStage::Average { length: AverageLength::Four, history: [100; 3] };
        assert_eq!(stage.apply(100), 100);
        assert_eq!(stage.apply(200), 125);
        assert_eq!(stage.apply(200), 150);
        assert_eq!(stage.apply(200), 175);
        assert_eq!(stage.apply(200), 200);
    }

    #[test]
    fn jitter_moves_one_count_per_scan() {
        let mut stage = FilterStage::Jitter { history: 100 };
        assert_eq!(stage.apply(110), 101);
        assert_eq!(stage.apply(110), 102);
        assert_eq!(stage.apply(95), 101);
        assert_eq!(stage.apply(101), 101);
    }

    #[test]
    fn reset_reprimes_from_next_sample() {
        let config = RawFilterConfig {
            median: false,
            iir: Some(IirConfig { mode: IirMode::Standard, coefficient: 32 }),
            average: None,
            jitter: false,
        };
        let mut chain = RawFilterChain::new(&config);
        chain.apply(100);
        chain.apply(100);
        chain.reset();
        assert_eq!(chain.apply(900), 900);
    }
}
