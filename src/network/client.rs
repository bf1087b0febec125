use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::framing::{read_frame, write_frame};
use super::{MessageSender, NodeStatusMap};
use crate::config::Config;
use crate::packets::{parse_reply, Message, MessageBody};
use crate::{debug, error};

/// Long enough to push a base-64-inflated block through a slow link.
pub const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound side of the transport: one connection per request, one framed
/// request, one framed reply. Every outcome feeds the liveness map.
#[derive(Clone)]
pub struct NetClient {
    config: Arc<Config>,
    status: Arc<NodeStatusMap>,
}

impl NetClient {
    pub fn new(config: Arc<Config>, status: Arc<NodeStatusMap>) -> Self {
        NetClient { config, status }
    }

    pub fn status_map(&self) -> &Arc<NodeStatusMap> {
        &self.status
    }

    pub async fn send_message(&self, node: &str, body: MessageBody) -> Option<Value> {
        if node == self.config.this_node {
            debug!("ignoring send to ourselves");
            return None;
        }

        let Some(addr) = self.config.network_addr(node) else {
            error!("unknown peer {}", node);
            return None;
        };

        let message = Message::new(&self.config.this_node, body);
        let payload = match serde_json::to_vec(&message) {
            Ok(payload) => payload,
            Err(e) => {
                error!("failed to serialize message for {}: {}", node, e);
                return None;
            }
        };

        let exchange = async {
            let mut stream = TcpStream::connect(&addr).await?;
            write_frame(&mut stream, &payload).await?;
            read_frame(&mut stream).await
        };

        match timeout(SOCKET_TIMEOUT, exchange).await {
            Ok(Ok(raw)) => match serde_json::from_slice::<Value>(&raw) {
                Ok(reply) => {
                    self.status.mark_alive(node);
                    Some(reply)
                }
                Err(e) => {
                    error!("malformed reply from {}: {}", node, e);
                    self.status.mark_dead(node);
                    None
                }
            },
            Ok(Err(e)) => {
                debug!("send to {} failed: {}", node, e);
                self.status.mark_dead(node);
                None
            }
            Err(_) => {
                debug!("send to {} timed out", node);
                self.status.mark_dead(node);
                None
            }
        }
    }

    /// Sends and parses the reply into the DTO the request implies.
    pub async fn request<T: DeserializeOwned>(&self, node: &str, body: MessageBody) -> Option<T> {
        let reply = self.send_message(node, body).await?;
        parse_reply(reply)
    }

    /// Probes every other peer. Each probe runs on its own task so one
    /// stuck peer does not delay the rest of the round.
    pub fn spawn_heartbeat_round(&self) {
        for node in self.config.remote_nodes() {
            let client = self.clone();
            let name = node.name.clone();
            tokio::spawn(async move {
                client.send_message(&name, MessageBody::Heartbeat).await;
            });
        }
    }
}

#[async_trait]
impl MessageSender for NetClient {
    async fn send(&self, node: &str, body: MessageBody) -> Option<Value> {
        self.send_message(node, body).await
    }

    fn statuses(&self) -> BTreeMap<String, bool> {
        self.status.statuses()
    }
}
