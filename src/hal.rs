//! Hardware seam. The application owns the peripheral and exposes it to
//! the engine through [`SenseDriver`]; the engine never touches registers.

use crate::types::{FrequencyChannel, SensorId, WidgetId};

/// Scan and programming interface of the capacitive sensing peripheral.
///
/// `read_raw` must return the counts of the most recently completed scan
/// for the addressed sensor and channel. `program_code` applies a sensing
/// current code and gain index; the code takes effect on the next scan.
pub trait SenseDriver {
    fn start_scan(&mut self, widget: WidgetId, sensor: SensorId, channel: FrequencyChannel);
    fn is_busy(&self) -> bool;
    fn read_raw(&mut self, widget: WidgetId, sensor: SensorId, channel: FrequencyChannel) -> u16;
    fn program_code(&mut self, widget: WidgetId, sensor: SensorId, code: u8, gain_index: u8);
}

/// Polls `is_busy` up to `budget` times. Returns whether the driver went
/// idle within the budget.
pub(crate) fn wait_idle<D: SenseDriver + ?Sized>(driver: &D, budget: u32) -> bool {
    for _ in 0..budget {
        if !driver.is_busy() {
            return true;
        }
    }
    !driver.is_busy()
}

/// Runs one scan and reads it back. An expired watchdog is logged and the
/// stale read is used anyway; calibration verification catches sensors
/// that never produce plausible data.
pub(crate) fn scan_blocking<D: SenseDriver + ?Sized>(
    driver: &mut D,
    widget: WidgetId,
    sensor: SensorId,
    channel: FrequencyChannel,
    budget: u32,
) -> u16 {
    driver.start_scan(widget, sensor, channel);
    if !wait_idle(driver, budget) {
        log::warn!(
            "scan watchdog expired: widget {} sensor {}",
            widget.0,
            sensor.0
        );
    }
    driver.read_raw(widget, sensor, channel)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountdownDriver {
        busy_polls: core::cell::Cell<u32>,
        raw: u16,
        scans: u32,
    }

    impl SenseDriver for CountdownDriver {
        fn start_scan(&mut self, _: WidgetId, _: SensorId, _: FrequencyChannel) {
            self.scans += 1;
        }

        fn is_busy(&self) -> bool {
            let left = self.busy_polls.get();
            if left == 0 {
                return false;
            }
            self.busy_polls.set(left - 1);
            true
        }

        fn read_raw(&mut self, _: WidgetId, _: SensorId, _: FrequencyChannel) -> u16 {
            self.raw
        }

        fn program_code(&mut self, _: WidgetId, _: SensorId, _: u8, _: u8) {}
    }

    #[test]
    fn scan_returns_raw_once_idle() {
        let mut driver = CountdownDriver {
            busy_polls: core::cell::Cell::new(3),
            raw: 777,
            scans: 0,
        };
        let raw = scan_blocking(&mut driver, WidgetId(0), SensorId(0), FrequencyChannel::Ch0, 10);
        assert_eq!(raw, 777);
        assert_eq!(driver.scans, 1);
    }

    #[test]
    fn expired_watchdog_still_reads() {
        let mut driver = CountdownDriver {
            busy_polls: core::cell::Cell::new(1_000),
            raw: 42,
            scans: 0,
        };
        let raw = scan_blocking(&mut driver, WidgetId(0), SensorId(1), FrequencyChannel::Ch0, 4);
        assert_eq!(raw, 42);
    }
}
