//! Turning a click on the letterboxed preview into a point on the sensor.

use serde::Deserialize;

use crate::error::{LinkError, Result};
use crate::protocol::{OutboundCommand, SensorSize};

/// What a click in the frame turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ClickMode {
    /// Two clicks make one `PointPair` (distance between two points).
    #[default]
    Pair,
    /// Every click sends a sensor-pixel `Point`.
    Point,
    /// Every click sends the `"x,y"` text signal in sensor pixels.
    Legacy,
}

impl ClickMode {
    pub fn next(self) -> Self {
        match self {
            ClickMode::Pair => ClickMode::Point,
            ClickMode::Point => ClickMode::Legacy,
            ClickMode::Legacy => ClickMode::Pair,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ClickMode::Pair => "pair",
            ClickMode::Point => "point",
            ClickMode::Legacy => "legacy",
        }
    }
}

pub fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// Position as a fraction of sensor width and height, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedPoint {
    pub x: f32,
    pub y: f32,
}

impl NormalizedPoint {
    /// Nearest sensor pixel, kept inside the frame.
    pub fn to_sensor_pixel(self, sensor: SensorSize) -> (i32, i32) {
        let px = (self.x as f64 * sensor.width as f64).round() as i32;
        let py = (self.y as f64 * sensor.height as f64).round() as i32;
        (
            px.clamp(0, sensor.width - 1),
            py.clamp(0, sensor.height - 1),
        )
    }
}

/// Where the sensor image sits inside the viewport once it has been scaled
/// to fit with its aspect ratio preserved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportMapping {
    pub start_x: f64,
    pub start_y: f64,
    pub display_w: f64,
    pub display_h: f64,
}

impl ViewportMapping {
    pub fn compute(viewport: (f64, f64), sensor: SensorSize) -> Result<Self> {
        let (viewport_w, viewport_h) = viewport;
        if !(viewport_w > 0.0 && viewport_h > 0.0) || !viewport_w.is_finite() || !viewport_h.is_finite() {
            return Err(LinkError::InvalidGeometry(format!(
                "viewport is {}x{}",
                viewport_w, viewport_h
            )));
        }
        if sensor.width <= 0 || sensor.height <= 0 {
            return Err(LinkError::InvalidGeometry(format!(
                "sensor is {}x{}",
                sensor.width, sensor.height
            )));
        }

        let (sensor_w, sensor_h) = (sensor.width as f64, sensor.height as f64);

        // Ratios compared and applied by cross-multiplying so integral sizes
        // stay exact. Wider sensor: bars top and bottom, else left and right.
        let (display_w, display_h) = if sensor_w * viewport_h > viewport_w * sensor_h {
            (viewport_w, viewport_w * sensor_h / sensor_w)
        } else {
            (viewport_h * sensor_w / sensor_h, viewport_h)
        };

        Ok(Self {
            start_x: (viewport_w - display_w) / 2.0,
            start_y: (viewport_h - display_h) / 2.0,
            display_w,
            display_h,
        })
    }

    pub fn contains(&self, px: f64, py: f64) -> bool {
        px >= self.start_x
            && px <= self.start_x + self.display_w
            && py >= self.start_y
            && py <= self.start_y + self.display_h
    }

    /// `None` when the click landed in a letterbox bar.
    pub fn normalize(&self, px: f64, py: f64) -> Option<NormalizedPoint> {
        if !self.contains(px, py) {
            return None;
        }
        Some(NormalizedPoint {
            x: clamp01((px - self.start_x) / self.display_w) as f32,
            y: clamp01((py - self.start_y) / self.display_h) as f32,
        })
    }
}

/// Points of a two-point gesture collected so far. Holds 0 or 1 between
/// clicks; the second point empties it.
#[derive(Debug, Default)]
pub struct ClickAccumulator {
    points: Vec<NormalizedPoint>,
}

impl ClickAccumulator {
    /// Add a point. Returns the completed pair, in click order, when this
    /// was the second one.
    pub fn push(&mut self, point: NormalizedPoint) -> Option<(NormalizedPoint, NormalizedPoint)> {
        self.points.push(point);
        if self.points.len() < 2 {
            return None;
        }
        let second = self.points.pop()?;
        let first = self.points.pop()?;
        Some((first, second))
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}

/// Stateful click handler. Lives on the thread that receives clicks.
#[derive(Debug)]
pub struct ViewportMapper {
    mode: ClickMode,
    accumulator: ClickAccumulator,
}

impl ViewportMapper {
    pub fn new(mode: ClickMode) -> Self {
        Self {
            mode,
            accumulator: ClickAccumulator::default(),
        }
    }

    pub fn mode(&self) -> ClickMode {
        self.mode
    }

    /// Switching modes drops a half-finished pair.
    pub fn set_mode(&mut self, mode: ClickMode) {
        self.mode = mode;
        self.accumulator.clear();
    }

    /// Points waiting for a partner.
    pub fn pending(&self) -> usize {
        self.accumulator.len()
    }

    pub fn clear(&mut self) {
        self.accumulator.clear();
    }

    /// Map one click. Returns the command to send, or `None` if the click
    /// was in a letterbox bar or only started a pair. Bad geometry is an
    /// error and leaves the pending pair untouched.
    pub fn map_click(
        &mut self,
        viewport: (f64, f64),
        sensor: SensorSize,
        click: (f64, f64),
    ) -> Result<Option<OutboundCommand>> {
        let mapping = ViewportMapping::compute(viewport, sensor)?;
        let Some(point) = mapping.normalize(click.0, click.1) else {
            return Ok(None);
        };

        Ok(match self.mode {
            ClickMode::Pair => self.accumulator.push(point).map(|(a, b)| OutboundCommand::PointPair {
                x1: a.x,
                y1: a.y,
                x2: b.x,
                y2: b.y,
            }),
            ClickMode::Point => {
                let (x, y) = point.to_sensor_pixel(sensor);
                Some(OutboundCommand::Point { x, y })
            }
            ClickMode::Legacy => {
                let (x, y) = point.to_sensor_pixel(sensor);
                Some(OutboundCommand::LegacyText { x, y })
            }
        })
    }
}
