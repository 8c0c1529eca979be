use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::connection::Connection;
use super::CurrentConnection;
use crate::error::{LinkError, Result};
use crate::protocol::{OutboundCommand, SensorSize};
use crate::viewport::ViewportMapper;

/// Write one framed command. The whole encoding goes out under the
/// connection's write lock.
pub async fn send_on(conn: &Connection, command: &OutboundCommand) -> Result<()> {
    if !command.is_framed() {
        return Err(LinkError::MalformedPayload(
            "legacy text cannot share the framed device connection".to_string(),
        ));
    }
    if !conn.is_open() {
        return Err(LinkError::NotConnected);
    }

    let bytes = command.encode();
    let mut writer = conn.writer().lock().await;
    writer.write_all(&bytes).await.map_err(LinkError::SendFailed)?;
    writer.flush().await.map_err(LinkError::SendFailed)?;
    debug!(id = conn.id(), peer = %conn.peer(), ?command, "command sent");
    Ok(())
}

/// Deliver a `LegacyText` command: connect, write `"x,y"`, close.
pub async fn send_legacy(target: &str, command: &OutboundCommand) -> Result<()> {
    let mut stream = TcpStream::connect(target)
        .await
        .map_err(LinkError::SendFailed)?;
    let text = command.encode();
    stream.write_all(&text).await.map_err(LinkError::SendFailed)?;
    stream.shutdown().await.map_err(LinkError::SendFailed)?;
    info!(addr = target, text = %String::from_utf8_lossy(&text), "legacy tap sent");
    Ok(())
}

/// Sends commands to whichever device is current. Cheap to clone; hand
/// one to every producer.
///
/// Legacy text goes to its own receiver, never to the device listener.
/// Without one configured, legacy commands fail with `NotConnected`.
#[derive(Clone)]
pub struct CommandSender {
    current: CurrentConnection,
    legacy_target: Option<String>,
}

impl CommandSender {
    pub fn new(current: CurrentConnection, legacy_target: Option<String>) -> Self {
        Self {
            current,
            legacy_target,
        }
    }

    pub fn has_legacy_target(&self) -> bool {
        self.legacy_target.is_some()
    }

    pub async fn connection(&self) -> Result<Arc<Connection>> {
        self.current.get().await.ok_or(LinkError::NotConnected)
    }

    pub async fn send(&self, command: OutboundCommand) -> Result<()> {
        if !command.is_framed() {
            let target = self.legacy_target.as_deref().ok_or(LinkError::NotConnected)?;
            return send_legacy(target, &command).await;
        }
        let conn = self.connection().await?;
        send_on(&conn, &command).await
    }

    pub async fn current_sensor_size(&self) -> Result<SensorSize> {
        self.connection()
            .await?
            .sensor_size()
            .ok_or_else(|| LinkError::InvalidGeometry("no frame received yet".to_string()))
    }

    /// Map a viewport click against the current device's frame size and
    /// send whatever command it completes. `Ok(None)` means nothing was
    /// sent: the click hit a letterbox bar or started a new point pair.
    pub async fn dispatch_click(
        &self,
        mapper: &mut ViewportMapper,
        viewport: (f64, f64),
        click: (f64, f64),
    ) -> Result<Option<OutboundCommand>> {
        let sensor = self.current_sensor_size().await?;
        let Some(command) = mapper.map_click(viewport, sensor, click)? else {
            return Ok(None);
        };
        self.send(command).await?;
        Ok(Some(command))
    }
}
