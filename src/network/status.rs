use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::Config;

#[derive(Debug, Clone)]
struct PeerState {
    alive: bool,
    last_seen: Instant,
}

/// Liveness bookkeeping for every remote peer. Updated by the client on
/// every call outcome, by the dispatcher on every inbound request, and by
/// the watchdog when a peer goes quiet.
#[derive(Debug)]
pub struct NodeStatusMap {
    this_node: String,
    peers: DashMap<String, PeerState>,
}

impl NodeStatusMap {
    pub fn new(config: &Config) -> Self {
        let peers = DashMap::new();
        for node in config.remote_nodes() {
            peers.insert(
                node.name.clone(),
                PeerState {
                    alive: true,
                    last_seen: Instant::now(),
                },
            );
        }
        NodeStatusMap {
            this_node: config.this_node.clone(),
            peers,
        }
    }

    pub fn mark_alive(&self, node: &str) {
        if let Some(mut state) = self.peers.get_mut(node) {
            state.alive = true;
            state.last_seen = Instant::now();
        }
    }

    pub fn mark_dead(&self, node: &str) {
        if let Some(mut state) = self.peers.get_mut(node) {
            state.alive = false;
        }
    }

    pub fn is_alive(&self, node: &str) -> bool {
        if node == self.this_node {
            return true;
        }
        self.peers
            .get(node)
            .map(|state| state.alive)
            .unwrap_or(false)
    }

    /// Snapshot of every peer's flag, self included (always alive).
    pub fn statuses(&self) -> BTreeMap<String, bool> {
        let mut statuses: BTreeMap<String, bool> = self
            .peers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().alive))
            .collect();
        statuses.insert(self.this_node.clone(), true);
        statuses
    }

    /// Flips peers silent for longer than `timeout` to dead; returns the
    /// names that changed.
    pub fn expire(&self, timeout: Duration) -> Vec<String> {
        let mut expired = Vec::new();
        for mut entry in self.peers.iter_mut() {
            if entry.alive && entry.last_seen.elapsed() > timeout {
                entry.alive = false;
                expired.push(entry.key().clone());
            }
        }
        expired
    }
}
