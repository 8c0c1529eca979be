use ratatui::layout::Rect;

use crate::protocol::{DistanceMessage, OutboundCommand};
use crate::viewport::ViewportMapping;

/// Terminal cell size in pixels, as reported by the graphics picker.
pub type FontSize = (u16, u16);

/// Pixel size of `area`, the viewport clicks are mapped against.
pub fn viewport_pixels(area: Rect, font: FontSize) -> (f64, f64) {
    (
        area.width as f64 * font.0 as f64,
        area.height as f64 * font.1 as f64,
    )
}

/// Pixel position of the centre of a clicked cell, relative to `area`.
/// `None` when the cell lies outside it.
pub fn cell_to_pixel(area: Rect, column: u16, row: u16, font: FontSize) -> Option<(f64, f64)> {
    if column < area.x
        || row < area.y
        || column >= area.x + area.width
        || row >= area.y + area.height
    {
        return None;
    }
    let px = (column - area.x) as f64 * font.0 as f64 + font.0 as f64 / 2.0;
    let py = (row - area.y) as f64 * font.1 as f64 + font.1 as f64 / 2.0;
    Some((px, py))
}

/// Cells covered by the letterboxed display rectangle inside `area`.
pub fn display_cells(area: Rect, font: FontSize, mapping: &ViewportMapping) -> Rect {
    let (fw, fh) = (font.0.max(1) as f64, font.1.max(1) as f64);
    let x = (mapping.start_x / fw).round() as u16;
    let y = (mapping.start_y / fh).round() as u16;
    let width = ((mapping.display_w / fw).round() as u16).min(area.width.saturating_sub(x));
    let height = ((mapping.display_h / fh).round() as u16).min(area.height.saturating_sub(y));
    Rect {
        x: area.x + x,
        y: area.y + y,
        width: width.max(1),
        height: height.max(1),
    }
}

/// Viewport and click, both in pixels relative to the drawn image `display`.
/// `None` when the click misses it.
///
/// ratatui-image fits the frame into `display` from its top-left corner, so
/// the drawn pixels and the mapper's centred placement can differ by at most
/// a quarter cell; a cell centre inside `display` always lands on the image.
pub fn click_in_display(
    display: Rect,
    column: u16,
    row: u16,
    font: FontSize,
) -> Option<((f64, f64), (f64, f64))> {
    let click = cell_to_pixel(display, column, row, font)?;
    Some((viewport_pixels(display, font), click))
}

pub fn format_distance(sample: &DistanceMessage) -> String {
    match *sample {
        DistanceMessage::Full { distance, dx, dy, dz } => {
            format!("{:.3} m ({:+.2}, {:+.2}, {:+.2})", distance, dx, dy, dz)
        }
        DistanceMessage::Vector { x, y, z } => {
            format!("{:.3} m ({:+.2}, {:+.2}, {:+.2})", sample.distance(), x, y, z)
        }
        DistanceMessage::Scalar { distance } => format!("{:.3} m", distance),
    }
}

pub fn describe_command(command: &OutboundCommand) -> String {
    match *command {
        OutboundCommand::Point { x, y } => format!("sent point ({}, {})", x, y),
        OutboundCommand::PointPair { x1, y1, x2, y2 } => format!(
            "sent pair ({:.3}, {:.3}) → ({:.3}, {:.3})",
            x1, y1, x2, y2
        ),
        OutboundCommand::LegacyText { x, y } => format!("sent legacy tap {},{}", x, y),
    }
}
