use thiserror::Error;

/// Errors raised by the device link: wire decoding, per-connection I/O,
/// click mapping and command delivery.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("socket error: {0}")]
    Socket(#[source] std::io::Error),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("unknown message type {0}")]
    UnknownMessageType(i32),
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error("no device connected")]
    NotConnected,
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),
}

impl LinkError {
    /// Reads use this: a short read means the peer went away mid-message.
    pub fn from_read(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            LinkError::ConnectionClosed
        } else {
            LinkError::Socket(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
