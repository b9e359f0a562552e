use tokio::sync::mpsc;
use uuid::Uuid;

use super::protocol::ControlMessage;

/// One frame queued for a client socket's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Control(ControlMessage),
    Audio(Vec<u8>),
    Close,
}

/// Sending side of one client connection.
///
/// Sends never block: frames go onto the connection's writer queue and the
/// writer task owns the socket. A failed send means the connection is gone.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl ClientHandle {
    pub fn new(tx: mpsc::UnboundedSender<OutboundFrame>) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            tx,
        }
    }

    /// Handle plus the receiver a writer task drains. Used by tests and embedders.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    pub fn send_control(&self, msg: ControlMessage) -> bool {
        let kind = msg.type_name();
        if self.tx.send(OutboundFrame::Control(msg)).is_err() {
            log::debug!("Client {}: dropped {} (connection gone)", self.conn_id, kind);
            return false;
        }
        true
    }

    pub fn send_audio(&self, bytes: Vec<u8>) -> bool {
        if self.tx.send(OutboundFrame::Audio(bytes)).is_err() {
            log::debug!("Client {}: dropped audio frame (connection gone)", self.conn_id);
            return false;
        }
        true
    }

    /// Ask the writer to close the socket.
    pub fn close(&self) {
        let _ = self.tx.send(OutboundFrame::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn same_connection(&self, other: &ClientHandle) -> bool {
        self.conn_id == other.conn_id
    }
}
