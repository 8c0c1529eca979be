use std::net::SocketAddr;

use crate::server::connection::ConnectionId;

/// Link state shown in the status bar
#[derive(Clone, Debug, PartialEq)]
pub enum LinkState {
    Waiting,
    Connected { id: ConnectionId, peer: SocketAddr },
}

impl LinkState {
    pub fn current_id(&self) -> Option<ConnectionId> {
        match self {
            LinkState::Waiting => None,
            LinkState::Connected { id, .. } => Some(*id),
        }
    }
}
