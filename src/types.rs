use heapless::Vec;

/// Most simultaneous touches a touchpad widget resolves and tracks.
pub const MAX_TOUCHES: usize = 3;

/// Touch identifiers live in `[0, MAX_TOUCH_ID]`; retired ids are reused.
pub const MAX_TOUCH_ID: u16 = 7;

/// Upper bound on widgets owned by one engine.
pub const MAX_WIDGETS: usize = 8;

/// Upper bound on sensing elements in one widget. Also bounds the
/// per-sensor bits of [`TouchReport::active_mask`].
pub const MAX_WIDGET_SENSORS: usize = 32;

/// Engine-assigned widget handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct WidgetId(pub u16);

/// Sensor index within its widget, in scan order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SensorId(pub u16);

/// Scan frequency channel. Multi-frequency scanning runs every sensor on
/// three nearby frequencies and takes the median of the per-channel
/// differences, which suppresses narrow-band interference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrequencyChannel {
    Ch0,
    Ch1,
    Ch2,
}

impl FrequencyChannel {
    pub const COUNT: usize = 3;
}

/// One resolved touch. `x`/`y` are in the widget's position space,
/// `z` is the peak difference count under the touch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Position {
    pub id: u16,
    pub x: u16,
    pub y: u16,
    pub z: u16,
}

/// Positions reported by one widget for one processed frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WidgetPositions {
    /// No confirmed touch.
    None,
    /// Up to [`MAX_TOUCHES`] resolved positions.
    Detected(Vec<Position, MAX_TOUCHES>),
    /// Matrix widgets only: more than one active element per axis, so no
    /// single position exists.
    Multiple,
}

impl WidgetPositions {
    pub(crate) fn single(position: Position) -> Self {
        let mut touches = Vec::new();
        let _ = touches.push(position);
        WidgetPositions::Detected(touches)
    }
}

/// Per-sensor detection flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SensorStatus {
    pub touch: bool,
    pub proximity: bool,
}

/// Outcome of processing one scan frame for one widget.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TouchReport {
    pub widget_id: WidgetId,
    /// Widget-level detection after hysteresis and debounce.
    pub active: bool,
    /// Bit per sensor (bit i = sensor i), touch detection.
    pub active_mask: u32,
    /// Bit per sensor, proximity detection. Zero for non-proximity widgets.
    pub proximity_mask: u32,
    pub positions: WidgetPositions,
    /// Pointer-style displacement from the ballistic filter, when enabled
    /// on a touchpad widget.
    pub ballistic_delta: Option<(i16, i16)>,
}

impl TouchReport {
    pub(crate) fn inactive(widget_id: WidgetId) -> Self {
        TouchReport {
            widget_id,
            active: false,
            active_mask: 0,
            proximity_mask: 0,
            positions: WidgetPositions::None,
            ballistic_delta: None,
        }
    }
}
