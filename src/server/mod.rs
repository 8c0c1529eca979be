pub mod connection;
pub mod reader;
pub mod sender;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use crate::error::{LinkError, Result};
use crate::protocol::{DistanceMessage, FrameMessage, WireOptions};
use connection::{Connection, ConnectionId};
use reader::FrameReader;

/// Pause after a failed accept so a persistent error can't spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// What to do when a second device connects while one is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ClientPolicy {
    /// The newcomer becomes current and the old connection is closed.
    #[default]
    Preempt,
    /// The newcomer is turned away.
    Reject,
}

/// Everything the link reports to the display side.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    Connected { id: ConnectionId, peer: SocketAddr },
    Frame { id: ConnectionId, frame: FrameMessage },
    Distance { id: ConnectionId, distance: DistanceMessage },
    Disconnected { id: ConnectionId, reason: String },
}

/// The single device outbound commands go to.
#[derive(Clone, Default)]
pub struct CurrentConnection(Arc<RwLock<Option<Arc<Connection>>>>);

impl CurrentConnection {
    pub async fn get(&self) -> Option<Arc<Connection>> {
        self.0.read().await.clone()
    }

    /// Make `conn` current under `policy`. On success returns the
    /// connection it displaced; on rejection returns the one holding the slot.
    async fn install(
        &self,
        conn: Arc<Connection>,
        policy: ClientPolicy,
    ) -> std::result::Result<Option<Arc<Connection>>, Arc<Connection>> {
        let mut slot = self.0.write().await;
        if policy == ClientPolicy::Reject {
            if let Some(holder) = slot.as_ref().filter(|c| c.is_open()) {
                return Err(holder.clone());
            }
        }
        Ok(slot.replace(conn))
    }

    /// Clear the slot if it still points at `id`.
    async fn clear_if(&self, id: ConnectionId) -> bool {
        let mut slot = self.0.write().await;
        if slot.as_ref().map(|c| c.id()) == Some(id) {
            *slot = None;
            true
        } else {
            false
        }
    }
}

/// Owns the listening socket and one reader task per device.
pub struct ConnectionManager {
    listener: TcpListener,
    current: CurrentConnection,
    events: mpsc::UnboundedSender<LinkEvent>,
    options: WireOptions,
    policy: ClientPolicy,
    next_id: ConnectionId,
}

impl ConnectionManager {
    pub async fn start(
        host: &str,
        port: u16,
        options: WireOptions,
        policy: ClientPolicy,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Self> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(LinkError::Socket)?;
        info!(addr = %listener.local_addr().map_err(LinkError::Socket)?, ?policy, "listening for devices");
        Ok(Self {
            listener,
            current: CurrentConnection::default(),
            events,
            options,
            policy,
            next_id: 1,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(LinkError::Socket)
    }

    pub fn current(&self) -> CurrentConnection {
        self.current.clone()
    }

    /// Accept devices forever. A failed accept is logged and retried; it
    /// never ends the loop.
    pub async fn run(mut self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => self.admit(stream, peer).await,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }

    async fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        let id = self.next_id;
        self.next_id += 1;

        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let conn = Arc::new(Connection::new(id, peer, write_half));

        match self.current.install(conn.clone(), self.policy).await {
            Err(holder) => {
                warn!(id, %peer, current = holder.id(), "device rejected, another is connected");
                conn.close();
                conn.shutdown().await;
                return;
            }
            Ok(Some(previous)) if previous.is_open() => {
                info!(id, %peer, previous = previous.id(), "device preempts current connection");
                previous.close();
            }
            Ok(_) => {}
        }

        info!(id, %peer, "device connected");
        let _ = self.events.send(LinkEvent::Connected { id, peer });

        let events = self.events.clone();
        let current = self.current.clone();
        let options = self.options;
        tokio::spawn(async move {
            let mut reader = FrameReader::new(read_half, options);
            let reason = reader::pump(&conn, &mut reader, &events).await;
            match &reason {
                LinkError::ConnectionClosed => info!(id, "device disconnected"),
                other => warn!(id, error = %other, "dropping device connection"),
            }

            conn.close();
            conn.shutdown().await;
            current.clear_if(id).await;
            let _ = events.send(LinkEvent::Disconnected {
                id,
                reason: reason.to_string(),
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::sender::CommandSender;
    use super::*;
    use crate::protocol::{decode_tag, Intrinsics, OutboundCommand, MSG_DISTANCE};
    use crate::viewport::{ClickMode, ViewportMapper};
    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn start(policy: ClientPolicy) -> (SocketAddr, CurrentConnection, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::start("127.0.0.1", 0, WireOptions::default(), policy, tx)
            .await
            .unwrap();
        let addr = manager.local_addr().unwrap();
        let current = manager.current();
        tokio::spawn(manager.run());
        (addr, current, rx)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> LinkEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for link event")
            .expect("event channel closed")
    }

    async fn connect(addr: SocketAddr, rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> (TcpStream, ConnectionId) {
        let stream = TcpStream::connect(addr).await.unwrap();
        match next_event(rx).await {
            LinkEvent::Connected { id, .. } => (stream, id),
            other => panic!("expected Connected, got {:?}", other),
        }
    }

    fn frame(width: i32, height: i32) -> Bytes {
        FrameMessage {
            intrinsics: Intrinsics::default(),
            width,
            height,
            image: Bytes::from_static(b"\xff\xd8\xff\xd9"),
        }
        .encode()
    }

    async fn read_command(device: &mut TcpStream) -> OutboundCommand {
        let mut header = [0u8; 8];
        device.read_exact(&mut header).await.unwrap();
        let msg_type = decode_tag(header[0..4].try_into().unwrap());
        let len = decode_tag(header[4..8].try_into().unwrap());
        let mut body = vec![0u8; len as usize];
        device.read_exact(&mut body).await.unwrap();
        OutboundCommand::decode(msg_type, len, &body).unwrap()
    }

    async fn expect_eof(device: &mut TcpStream) {
        let mut rest = Vec::new();
        let n = tokio::time::timeout(Duration::from_secs(5), device.read_to_end(&mut rest))
            .await
            .expect("timed out waiting for EOF")
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_frame_event_then_point_command() {
        let (addr, current, mut rx) = start(ClientPolicy::Preempt).await;
        let (mut device, id) = connect(addr, &mut rx).await;

        device.write_all(&frame(1920, 1080)).await.unwrap();
        match next_event(&mut rx).await {
            LinkEvent::Frame { id: from, frame } => {
                assert_eq!(from, id);
                assert_eq!((frame.width, frame.height), (1920, 1080));
            }
            other => panic!("expected Frame, got {:?}", other),
        }

        let sender = CommandSender::new(current, None);
        sender.send(OutboundCommand::Point { x: 10, y: 20 }).await.unwrap();
        assert_eq!(read_command(&mut device).await, OutboundCommand::Point { x: 10, y: 20 });
    }

    #[tokio::test]
    async fn test_send_without_device_is_not_connected() {
        let (_addr, current, _rx) = start(ClientPolicy::Preempt).await;
        let sender = CommandSender::new(current, None);

        let err = sender.send(OutboundCommand::Point { x: 1, y: 1 }).await.unwrap_err();
        assert!(matches!(err, LinkError::NotConnected));

        let mut mapper = ViewportMapper::new(ClickMode::Pair);
        let err = sender
            .dispatch_click(&mut mapper, (800.0, 480.0), (400.0, 240.0))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::NotConnected));
        assert_eq!(mapper.pending(), 0);
    }

    #[tokio::test]
    async fn test_click_before_first_frame_is_rejected() {
        let (addr, current, mut rx) = start(ClientPolicy::Preempt).await;
        let (_device, _id) = connect(addr, &mut rx).await;
        let sender = CommandSender::new(current, None);

        let mut mapper = ViewportMapper::new(ClickMode::Pair);
        let err = sender
            .dispatch_click(&mut mapper, (800.0, 480.0), (400.0, 240.0))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::InvalidGeometry(_)));
    }

    #[tokio::test]
    async fn test_two_clicks_send_one_point_pair() {
        let (addr, current, mut rx) = start(ClientPolicy::Preempt).await;
        let (mut device, _id) = connect(addr, &mut rx).await;
        device.write_all(&frame(1920, 1080)).await.unwrap();
        assert!(matches!(next_event(&mut rx).await, LinkEvent::Frame { .. }));

        let sender = CommandSender::new(current, None);
        let mut mapper = ViewportMapper::new(ClickMode::Pair);
        let viewport = (800.0, 480.0);

        assert_eq!(sender.dispatch_click(&mut mapper, viewport, (400.0, 15.0)).await.unwrap(), None);
        // Top letterbox bar: ignored, pair still half full.
        assert_eq!(sender.dispatch_click(&mut mapper, viewport, (400.0, 5.0)).await.unwrap(), None);
        assert_eq!(mapper.pending(), 1);

        let sent = sender
            .dispatch_click(&mut mapper, viewport, (0.0, 465.0))
            .await
            .unwrap()
            .expect("second click completes the pair");
        assert_eq!(mapper.pending(), 0);

        let received = read_command(&mut device).await;
        assert_eq!(received, sent);
        match received {
            OutboundCommand::PointPair { x1, y1, x2, y2 } => {
                assert!((x1 - 0.5).abs() < 1e-6);
                assert!(y1.abs() < 1e-6);
                assert!(x2.abs() < 1e-6);
                assert!((y2 - 1.0).abs() < 1e-6);
            }
            other => panic!("expected PointPair, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_new_device_preempts_current() {
        let (addr, current, mut rx) = start(ClientPolicy::Preempt).await;
        let (mut first, first_id) = connect(addr, &mut rx).await;

        let _second = TcpStream::connect(addr).await.unwrap();
        let mut second_id = None;
        let mut first_dropped = false;
        for _ in 0..2 {
            match next_event(&mut rx).await {
                LinkEvent::Connected { id, .. } => second_id = Some(id),
                LinkEvent::Disconnected { id, .. } => {
                    assert_eq!(id, first_id);
                    first_dropped = true;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(first_dropped);
        expect_eof(&mut first).await;

        let holder = current.get().await.expect("second device is current");
        assert_eq!(Some(holder.id()), second_id);
    }

    #[tokio::test]
    async fn test_reject_policy_keeps_first_device() {
        let (addr, current, mut rx) = start(ClientPolicy::Reject).await;
        let (_first, first_id) = connect(addr, &mut rx).await;

        let mut second = TcpStream::connect(addr).await.unwrap();
        expect_eof(&mut second).await;

        assert_eq!(current.get().await.map(|c| c.id()), Some(first_id));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err(), "rejected device must not produce events");
    }

    #[tokio::test]
    async fn test_unknown_type_drops_device_but_server_keeps_accepting() {
        let (addr, current, mut rx) = start(ClientPolicy::Preempt).await;
        let (mut bad, bad_id) = connect(addr, &mut rx).await;

        bad.write_all(&99i32.to_be_bytes()).await.unwrap();
        bad.write_all(&[0x5A; 40]).await.unwrap();
        match next_event(&mut rx).await {
            LinkEvent::Disconnected { id, reason } => {
                assert_eq!(id, bad_id);
                assert!(reason.contains("99"), "reason was {:?}", reason);
            }
            other => panic!("expected Disconnected, got {:?}", other),
        }
        assert!(current.get().await.is_none());

        let (mut good, good_id) = connect(addr, &mut rx).await;
        good.write_all(&frame(640, 480)).await.unwrap();
        match next_event(&mut rx).await {
            LinkEvent::Frame { id, .. } => assert_eq!(id, good_id),
            other => panic!("expected Frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_distance_event_forwarded() {
        let (addr, _current, mut rx) = start(ClientPolicy::Preempt).await;
        let (mut device, id) = connect(addr, &mut rx).await;

        let sample = DistanceMessage::Full {
            distance: 0.8,
            dx: 0.0,
            dy: 0.1,
            dz: 0.79,
        };
        device.write_all(&sample.encode_tagged(MSG_DISTANCE)).await.unwrap();
        match next_event(&mut rx).await {
            LinkEvent::Distance { id: from, distance } => {
                assert_eq!(from, id);
                assert_eq!(distance, sample);
            }
            other => panic!("expected Distance, got {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sends_never_interleave() {
        let (addr, current, mut rx) = start(ClientPolicy::Preempt).await;
        let (mut device, _id) = connect(addr, &mut rx).await;
        let sender = CommandSender::new(current, None);

        let mut tasks = Vec::new();
        for i in 0..32 {
            let sender = sender.clone();
            tasks.push(tokio::spawn(async move {
                let command = if i % 2 == 0 {
                    OutboundCommand::Point { x: i, y: -i }
                } else {
                    OutboundCommand::PointPair {
                        x1: i as f32,
                        y1: 0.25,
                        x2: 0.5,
                        y2: 0.75,
                    }
                };
                sender.send(command).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut points = Vec::new();
        let mut pairs = 0;
        for _ in 0..32 {
            match read_command(&mut device).await {
                OutboundCommand::Point { x, y } => {
                    assert_eq!(y, -x);
                    points.push(x);
                }
                OutboundCommand::PointPair { y1, x2, y2, .. } => {
                    assert_eq!((y1, x2, y2), (0.25, 0.5, 0.75));
                    pairs += 1;
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        points.sort();
        assert_eq!(points, (0..32).step_by(2).collect::<Vec<_>>());
        assert_eq!(pairs, 16);
    }

    #[tokio::test]
    async fn test_legacy_text_uses_one_shot_connection() {
        let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_addr = target.local_addr().unwrap().to_string();
        let sender = CommandSender::new(CurrentConnection::default(), Some(target_addr));

        let receive = tokio::spawn(async move {
            let (mut stream, _) = target.accept().await.unwrap();
            let mut text = String::new();
            stream.read_to_string(&mut text).await.unwrap();
            text
        });

        sender.send(OutboundCommand::LegacyText { x: 321, y: 654 }).await.unwrap();
        let text = tokio::time::timeout(Duration::from_secs(5), receive)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(text, "321,654");
        assert_eq!(
            OutboundCommand::parse_legacy(&text).unwrap(),
            OutboundCommand::LegacyText { x: 321, y: 654 }
        );
    }

    #[tokio::test]
    async fn test_legacy_without_target_is_not_connected() {
        let sender = CommandSender::new(CurrentConnection::default(), None);
        assert!(!sender.has_legacy_target());
        let err = sender
            .send(OutboundCommand::LegacyText { x: 1, y: 2 })
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::NotConnected));
    }

    #[tokio::test]
    async fn test_legacy_click_leaves_device_current() {
        let (addr, current, mut rx) = start(ClientPolicy::Preempt).await;
        let (mut device, id) = connect(addr, &mut rx).await;
        device.write_all(&frame(1920, 1080)).await.unwrap();
        assert!(matches!(next_event(&mut rx).await, LinkEvent::Frame { .. }));

        let receiver = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let receiver_addr = receiver.local_addr().unwrap().to_string();
        let receive = tokio::spawn(async move {
            let (mut stream, _) = receiver.accept().await.unwrap();
            let mut text = String::new();
            stream.read_to_string(&mut text).await.unwrap();
            text
        });

        let sender = CommandSender::new(current.clone(), Some(receiver_addr));
        let mut mapper = ViewportMapper::new(ClickMode::Legacy);
        let sent = sender
            .dispatch_click(&mut mapper, (800.0, 480.0), (400.0, 240.0))
            .await
            .unwrap();
        assert_eq!(sent, Some(OutboundCommand::LegacyText { x: 960, y: 540 }));

        let text = tokio::time::timeout(Duration::from_secs(5), receive)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(text, "960,540");

        // The device link is untouched and still takes framed commands.
        assert_eq!(current.get().await.map(|c| c.id()), Some(id));
        sender.send(OutboundCommand::Point { x: 7, y: 8 }).await.unwrap();
        assert_eq!(read_command(&mut device).await, OutboundCommand::Point { x: 7, y: 8 });
        assert!(rx.try_recv().is_err());
    }
}
