use core::fmt;

/// Failure modes of the sensing engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The driver reported an in-flight scan when a control loop tried to
    /// take over the peripheral.
    Busy,
    /// Calibration verification found a sensor outside the tolerance band,
    /// or tuning measured a parasitic capacitance above the supported
    /// ceiling.
    OutOfTolerance,
    /// The final wait of a calibration pass exhausted its iteration budget.
    Timeout,
    /// Unknown widget id.
    InvalidWidget,
    /// Sensor index or frame shape does not match the widget layout.
    InvalidSensor,
    /// Widget configuration rejected by validation.
    InvalidConfig,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Busy => f.write_str("peripheral busy"),
            Error::OutOfTolerance => f.write_str("calibration out of tolerance"),
            Error::Timeout => f.write_str("calibration wait timed out"),
            Error::InvalidWidget => f.write_str("unknown widget id"),
            Error::InvalidSensor => f.write_str("sensor data does not match widget layout"),
            Error::InvalidConfig => f.write_str("invalid widget configuration"),
        }
    }
}
