use launcher_model::{Origin, ServerMessage, Slug};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identity of one viewer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub id: Uuid,
    pub slug: Slug,
    pub origin: Origin,
}

/// A registered connection: its identity plus the receiving end of its outbound queue.
#[derive(Debug)]
pub struct ViewerSession {
    pub viewer: Viewer,
    pub outbound: mpsc::Receiver<ServerMessage>,
}

impl ViewerSession {
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.outbound.recv().await
    }
}

/// Sending half kept in the hub's per-workload table.
pub(super) struct Connection {
    pub origin: Origin,
    pub tx: mpsc::Sender<ServerMessage>,
}
