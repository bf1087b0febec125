pub mod client;
pub mod dispatch;
pub mod framing;
pub mod server;
pub mod status;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::packets::MessageBody;

pub use client::NetClient;
pub use dispatch::Dispatcher;
pub use server::NetServer;
pub use status::NodeStatusMap;

/// The block manager's and the sync loop's only view of the network: fire
/// one request at a peer and get the raw reply, or `None` when the peer
/// is unreachable.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, node: &str, body: MessageBody) -> Option<Value>;

    /// Current liveness per peer, self always alive.
    fn statuses(&self) -> BTreeMap<String, bool>;
}
