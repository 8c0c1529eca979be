use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

use ratatui_image::StatefulImage;

use super::helpers::{display_cells, format_distance, viewport_pixels};
use super::types::LinkState;
use super::ViewerUI;
use crate::viewport::ViewportMapping;

impl ViewerUI {
    pub(crate) fn ui(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(1),    // Frame area
                Constraint::Length(1), // Status bar
                Constraint::Length(1), // Key help
            ])
            .split(f.area());

        self.frame_area = chunks[0];
        self.render_frame(f);
        self.render_status(f, chunks[1]);
        self.render_help(f, chunks[2]);
    }

    fn render_frame(&mut self, f: &mut Frame) {
        let area = self.frame_area;
        let placement = self.placement();

        match (self.protocol.as_mut(), placement) {
            (Some(protocol), Some(target)) => {
                // No block or border here: clearing the area flickers with Sixel/Kitty.
                f.render_stateful_widget(StatefulImage::default(), target, protocol);
            }
            _ => {
                let text = match self.link {
                    LinkState::Waiting => "📱 waiting for a device to connect...",
                    LinkState::Connected { .. } => "📱 connected, waiting for frames...",
                };
                let waiting = Paragraph::new(text)
                    .style(Style::default().fg(Color::DarkGray))
                    .alignment(Alignment::Center);
                f.render_widget(waiting, area);
            }
        }
    }

    /// Cells the frame is drawn into; clicks map against the same rect.
    pub(crate) fn placement(&self) -> Option<Rect> {
        let area = self.frame_area;
        let sensor = self.sensor?;
        let mapping = ViewportMapping::compute(viewport_pixels(area, self.font), sensor).ok()?;
        Some(display_cells(area, self.font, &mapping))
    }

    fn render_status(&self, f: &mut Frame, area: Rect) {
        let link = match &self.link {
            LinkState::Waiting => Span::styled(" ○ no device ", Style::default().fg(Color::Yellow)),
            LinkState::Connected { id, peer } => Span::styled(
                format!(" ● #{} {} ", id, peer),
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
            ),
        };

        let size = self
            .sensor
            .map(|s| format!("{}×{}", s.width, s.height))
            .unwrap_or_else(|| "—".to_string());
        let intrinsics = self
            .intrinsics
            .map(|k| format!("f {:.0},{:.0} c {:.0},{:.0}", k.fx, k.fy, k.cx, k.cy))
            .unwrap_or_else(|| "—".to_string());
        let distance = self
            .distance
            .as_ref()
            .map(format_distance)
            .unwrap_or_else(|| "—".to_string());

        let status = Paragraph::new(Line::from(vec![
            link,
            Span::raw("│ "),
            Span::raw(size),
            Span::raw(" │ "),
            Span::raw(intrinsics),
            Span::raw(" │ 📏 "),
            Span::styled(distance, Style::default().fg(Color::Cyan)),
            Span::raw(" │ "),
            Span::styled(
                format!("{} {}/2", self.mapper.mode().label(), self.mapper.pending()),
                Style::default().fg(Color::Magenta),
            ),
            Span::raw(" │ "),
            Span::raw(self.status.clone()),
        ]))
        .style(Style::default().bg(Color::DarkGray).fg(Color::White));
        f.render_widget(status, area);
    }

    fn render_help(&self, f: &mut Frame, area: Rect) {
        let key = Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD);
        let help = Paragraph::new(Line::from(vec![
            Span::styled(" click", key),
            Span::raw(" tap │ "),
            Span::styled("m", key),
            Span::raw(" mode │ "),
            Span::styled("c", key),
            Span::raw(" clear │ "),
            Span::styled("q", key),
            Span::raw(" quit"),
        ]))
        .style(Style::default().fg(Color::DarkGray));
        f.render_widget(help, area);
    }
}
