use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;

use crate::protocol::SensorSize;

pub type ConnectionId = u64;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One accepted device. The reader task owns the read half; this holds the
/// write half behind a lock so concurrent commands never interleave.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    writer: tokio::sync::Mutex<BoxedWriter>,
    /// Set by the reader from every frame, read by click mapping.
    sensor_size: Mutex<Option<SensorSize>>,
    open: AtomicBool,
    closed: Notify,
}

impl Connection {
    pub fn new<W>(id: ConnectionId, peer: SocketAddr, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id,
            peer,
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            sensor_size: Mutex::new(None),
            open: AtomicBool::new(true),
            closed: Notify::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn sensor_size(&self) -> Option<SensorSize> {
        *self
            .sensor_size
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the latest frame size. Returns true when it changed.
    pub fn set_sensor_size(&self, size: SensorSize) -> bool {
        let mut slot = self
            .sensor_size
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let changed = *slot != Some(size);
        *slot = Some(size);
        changed
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Mark closed and wake the reader so it stops.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.closed.notify_one();
        }
    }

    /// Resolves once `close` has been called.
    pub async fn closed(&self) {
        if !self.is_open() {
            return;
        }
        self.closed.notified().await;
    }

    pub(crate) fn writer(&self) -> &tokio::sync::Mutex<BoxedWriter> {
        &self.writer
    }

    /// Half-close our side so the device sees EOF.
    pub async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("sensor_size", &self.sensor_size())
            .field("open", &self.is_open())
            .finish()
    }
}
