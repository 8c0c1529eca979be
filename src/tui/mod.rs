mod helpers;
mod render;
mod types;

use anyhow::Result;
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, KeyModifiers,
        MouseButton, MouseEventKind,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, layout::Rect, Terminal};
use ratatui_image::picker::Picker;
use ratatui_image::protocol::StatefulProtocol;
use std::io;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::protocol::{DistanceMessage, Intrinsics, SensorSize};
use crate::screen::viewer::DecodedFrame;
use crate::server::sender::CommandSender;
use crate::server::LinkEvent;
use crate::viewport::{ClickMode, ViewportMapper};

use helpers::{cell_to_pixel, click_in_display, describe_command, FontSize};
use types::LinkState;

pub struct ViewerUI {
    pub(crate) picker: Picker,
    pub(crate) font: FontSize,
    pub(crate) sender: CommandSender,
    pub(crate) mapper: ViewportMapper,
    pub(crate) link: LinkState,
    /// Declared size of the latest frame; clicks map against this
    pub(crate) sensor: Option<SensorSize>,
    pub(crate) intrinsics: Option<Intrinsics>,
    pub(crate) distance: Option<DistanceMessage>,
    pub(crate) protocol: Option<StatefulProtocol>,
    /// Where the last draw put the frame, in cells
    pub(crate) frame_area: Rect,
    pub(crate) status: String,
    pub(crate) should_quit: bool,
}

impl ViewerUI {
    pub fn new(picker: Picker, sender: CommandSender, mode: ClickMode) -> Self {
        let font = picker.font_size();
        Self {
            picker,
            font,
            sender,
            mapper: ViewportMapper::new(mode),
            link: LinkState::Waiting,
            sensor: None,
            intrinsics: None,
            distance: None,
            protocol: None,
            frame_area: Rect::default(),
            status: "Listening...".to_string(),
            should_quit: false,
        }
    }

    pub async fn run(&mut self, mut events: mpsc::UnboundedReceiver<LinkEvent>) -> Result<()> {
        // Mouse capture is on: clicks on the frame are the whole point
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.run_loop(&mut terminal, &mut events).await;

        // Restore terminal
        disable_raw_mode()?;
        execute!(
            terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture,
        )?;
        terminal.show_cursor()?;

        result
    }

    async fn run_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
        events: &mut mpsc::UnboundedReceiver<LinkEvent>,
    ) -> Result<()> {
        loop {
            terminal.draw(|f| self.ui(f))?;

            // Drain link events; only the newest frame gets decoded
            let mut latest_frame = None;
            while let Ok(link_event) = events.try_recv() {
                match link_event {
                    LinkEvent::Frame { id, frame } => {
                        if self.link.current_id() == Some(id) {
                            latest_frame = Some(frame);
                        }
                    }
                    other => self.handle_link_event(other),
                }
            }
            if let Some(frame) = latest_frame {
                self.show_frame(&frame);
            }

            if event::poll(std::time::Duration::from_millis(30))? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        let ctrl_c = key.modifiers.contains(KeyModifiers::CONTROL)
                            && key.code == KeyCode::Char('c');
                        if ctrl_c {
                            self.should_quit = true;
                        } else {
                            self.handle_key(key.code);
                        }
                    }
                    Event::Mouse(mouse) => {
                        if let MouseEventKind::Down(MouseButton::Left) = mouse.kind {
                            self.handle_click(mouse.column, mouse.row).await;
                        }
                    }
                    _ => {}
                }
            }

            if self.should_quit {
                return Ok(());
            }
        }
    }

    pub(crate) fn handle_link_event(&mut self, link_event: LinkEvent) {
        match link_event {
            LinkEvent::Connected { id, peer } => {
                self.link = LinkState::Connected { id, peer };
                self.sensor = None;
                self.intrinsics = None;
                self.distance = None;
                self.protocol = None;
                self.mapper.clear();
                self.status = format!("Device {} connected", peer);
            }
            LinkEvent::Frame { id, frame } => {
                if self.link.current_id() == Some(id) {
                    self.show_frame(&frame);
                }
            }
            LinkEvent::Distance { id, distance } => {
                if self.link.current_id() == Some(id) {
                    self.distance = Some(distance);
                }
            }
            LinkEvent::Disconnected { id, reason } => {
                // A preempted connection reports after its successor is up
                if self.link.current_id() == Some(id) {
                    self.link = LinkState::Waiting;
                    self.mapper.clear();
                    self.status = format!("Device gone: {}", reason);
                }
            }
        }
    }

    /// Decode and display a frame. A frame that fails to decode leaves the
    /// previous image on screen.
    fn show_frame(&mut self, frame: &crate::protocol::FrameMessage) {
        self.sensor = Some(frame.sensor_size());
        self.intrinsics = Some(frame.intrinsics);
        match DecodedFrame::from_frame(frame) {
            Ok(decoded) => {
                if (decoded.width as i32, decoded.height as i32) != (frame.width, frame.height) {
                    debug!(
                        declared = ?(frame.width, frame.height),
                        decoded = ?(decoded.width, decoded.height),
                        "frame size differs from its image"
                    );
                }
                self.protocol = Some(decoded.to_protocol(&mut self.picker));
            }
            Err(e) => warn!(error = %e, "dropping undecodable frame"),
        }
    }

    pub(crate) fn handle_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('c') => {
                self.mapper.clear();
                self.status = "Cleared pending point".to_string();
            }
            KeyCode::Char('m') => {
                let mut mode = self.mapper.mode().next();
                if mode == ClickMode::Legacy && !self.sender.has_legacy_target() {
                    mode = mode.next();
                }
                self.mapper.set_mode(mode);
                self.status = format!("Click mode: {}", mode.label());
                info!(mode = mode.label(), "click mode changed");
            }
            _ => {}
        }
    }

    async fn handle_click(&mut self, column: u16, row: u16) {
        if cell_to_pixel(self.frame_area, column, row, self.font).is_none() {
            return;
        }
        // Before the first frame there is no image; let the sender say why.
        let target = self.placement().unwrap_or(self.frame_area);
        let Some((viewport, click)) = click_in_display(target, column, row, self.font) else {
            self.status = "Click is outside the image".to_string();
            return;
        };

        self.status = match self
            .sender
            .dispatch_click(&mut self.mapper, viewport, click)
            .await
        {
            Ok(Some(command)) => describe_command(&command),
            Ok(None) if self.mapper.pending() > 0 => "First point set, click the second".to_string(),
            Ok(None) => "Click is outside the image".to_string(),
            Err(e) => {
                warn!(error = %e, "click not sent");
                format!("Not sent: {}", e)
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameMessage;
    use crate::screen::synthetic::{jpeg_encode, test_pattern};
    use crate::server::CurrentConnection;
    use bytes::Bytes;

    fn viewer() -> ViewerUI {
        let sender = CommandSender::new(CurrentConnection::default(), None);
        ViewerUI::new(Picker::halfblocks(), sender, ClickMode::Pair)
    }

    fn jpeg_frame(width: u32, height: u32) -> FrameMessage {
        let rgb = test_pattern(width, height, 0);
        FrameMessage {
            intrinsics: Intrinsics {
                fx: 10.0,
                fy: 10.0,
                cx: 8.0,
                cy: 4.5,
            },
            width: width as i32,
            height: height as i32,
            image: Bytes::from(jpeg_encode(&rgb, width, height).unwrap()),
        }
    }

    fn connected(ui: &mut ViewerUI, id: u64) {
        ui.handle_link_event(LinkEvent::Connected {
            id,
            peer: "127.0.0.1:5000".parse().unwrap(),
        });
    }

    #[test]
    fn test_frames_from_current_device_are_shown() {
        let mut ui = viewer();
        connected(&mut ui, 1);
        ui.handle_link_event(LinkEvent::Frame {
            id: 1,
            frame: jpeg_frame(16, 9),
        });
        assert!(ui.protocol.is_some());
        assert_eq!(ui.sensor, Some(SensorSize { width: 16, height: 9 }));

        ui.handle_link_event(LinkEvent::Distance {
            id: 2,
            distance: DistanceMessage::Scalar { distance: 1.0 },
        });
        assert!(ui.distance.is_none());
    }

    #[test]
    fn test_bad_jpeg_keeps_previous_image() {
        let mut ui = viewer();
        connected(&mut ui, 1);
        ui.handle_link_event(LinkEvent::Frame {
            id: 1,
            frame: jpeg_frame(16, 9),
        });
        let mut broken = jpeg_frame(16, 9);
        broken.image = Bytes::from_static(b"nope");
        ui.handle_link_event(LinkEvent::Frame { id: 1, frame: broken });
        assert!(ui.protocol.is_some());
    }

    #[test]
    fn test_stale_disconnect_is_ignored() {
        let mut ui = viewer();
        connected(&mut ui, 1);
        connected(&mut ui, 2);
        ui.handle_link_event(LinkEvent::Disconnected {
            id: 1,
            reason: "preempted".to_string(),
        });
        assert_eq!(ui.link.current_id(), Some(2));

        ui.handle_link_event(LinkEvent::Disconnected {
            id: 2,
            reason: "connection closed".to_string(),
        });
        assert_eq!(ui.link, LinkState::Waiting);
    }

    #[test]
    fn test_keys() {
        let mut ui = viewer();
        ui.handle_key(KeyCode::Char('m'));
        assert_eq!(ui.mapper.mode(), ClickMode::Point);
        ui.handle_key(KeyCode::Char('c'));
        assert_eq!(ui.mapper.pending(), 0);
        assert!(!ui.should_quit);
        ui.handle_key(KeyCode::Esc);
        assert!(ui.should_quit);
    }

    #[test]
    fn test_mode_cycle_skips_legacy_without_receiver() {
        let mut ui = viewer();
        ui.handle_key(KeyCode::Char('m'));
        ui.handle_key(KeyCode::Char('m'));
        assert_eq!(ui.mapper.mode(), ClickMode::Pair);

        let sender = CommandSender::new(
            CurrentConnection::default(),
            Some("127.0.0.1:9000".to_string()),
        );
        let mut ui = ViewerUI::new(Picker::halfblocks(), sender, ClickMode::Pair);
        ui.handle_key(KeyCode::Char('m'));
        ui.handle_key(KeyCode::Char('m'));
        assert_eq!(ui.mapper.mode(), ClickMode::Legacy);
    }

    #[test]
    fn test_image_placement_is_letterboxed_in_frame_area() {
        let mut ui = viewer();
        connected(&mut ui, 1);
        assert_eq!(ui.placement(), None);

        ui.frame_area = Rect::new(0, 0, 80, 24);
        ui.handle_link_event(LinkEvent::Frame {
            id: 1,
            frame: jpeg_frame(16, 9),
        });
        let placement = ui.placement().unwrap();
        assert!(placement.height < ui.frame_area.height || placement.width < ui.frame_area.width);
        assert!(placement.y + placement.height <= ui.frame_area.height);
    }

    #[tokio::test]
    async fn test_click_without_device_reports_error() {
        let mut ui = viewer();
        ui.frame_area = Rect::new(0, 0, 80, 24);
        ui.handle_click(10, 10).await;
        assert!(ui.status.starts_with("Not sent"));
    }
}
