//! Blocking read-dispatch loop for one device connection.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::debug;

use super::connection::Connection;
use super::LinkEvent;
use crate::error::{LinkError, Result};
use crate::protocol::{decode_tag, DistanceMessage, FrameMessage, InboundMessage, WireOptions};

/// Read exactly `n` bytes, looping over short reads. EOF partway through
/// is `ConnectionClosed`.
pub async fn read_exact<R>(reader: &mut R, n: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; n];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(LinkError::from_read)?;
    Ok(buf)
}

pub async fn read_word<R>(reader: &mut R) -> Result<[u8; 4]>
where
    R: AsyncRead + Unpin,
{
    let mut word = [0u8; 4];
    reader
        .read_exact(&mut word)
        .await
        .map_err(LinkError::from_read)?;
    Ok(word)
}

/// Decodes whole messages off a byte stream.
pub struct FrameReader<R> {
    inner: R,
    options: WireOptions,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, options: WireOptions) -> Self {
        Self { inner, options }
    }

    /// Read one complete message. A message is either fully consumed and
    /// returned, or the stream is unusable and an error comes back.
    pub async fn next_message(&mut self) -> Result<InboundMessage> {
        let tag = decode_tag(read_word(&mut self.inner).await?);
        let kind = self.options.classify(tag)?;

        match kind.fixed_len() {
            None => {
                let size = self.options.frame_size(read_word(&mut self.inner).await?)?;
                let body = read_exact(&mut self.inner, size).await?;
                Ok(InboundMessage::Frame(FrameMessage::decode(Bytes::from(body))?))
            }
            Some(len) => {
                let body = read_exact(&mut self.inner, len).await?;
                Ok(InboundMessage::Distance(DistanceMessage::decode(kind, &body)?))
            }
        }
    }
}

/// Drive `reader` until the stream ends, a message fails to decode, the
/// connection is closed locally or the event receiver is dropped. Returns
/// why it stopped.
///
/// Every fully decoded message produces exactly one event. The sensor size
/// is recorded on the connection before the frame event goes out.
pub async fn pump<R>(
    conn: &Connection,
    reader: &mut FrameReader<R>,
    events: &mpsc::UnboundedSender<LinkEvent>,
) -> LinkError
where
    R: AsyncRead + Unpin,
{
    loop {
        let message = tokio::select! {
            message = reader.next_message() => message,
            _ = conn.closed() => return LinkError::ConnectionClosed,
        };

        let event = match message {
            Ok(InboundMessage::Frame(frame)) => {
                let size = frame.sensor_size();
                if conn.set_sensor_size(size) {
                    debug!(id = conn.id(), width = size.width, height = size.height, "sensor size changed");
                }
                LinkEvent::Frame { id: conn.id(), frame }
            }
            Ok(InboundMessage::Distance(distance)) => LinkEvent::Distance {
                id: conn.id(),
                distance,
            },
            Err(err) => return err,
        };

        // Nobody left to display anything
        if events.send(event).is_err() {
            return LinkError::ConnectionClosed;
        }
    }
}
