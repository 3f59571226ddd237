//! In-memory peer network
//!
//! For single-process clusters (tests, the `simulate` command). Each node
//! joins with the handler keys it serves and gets an unbounded receiver.
//! Delivery is FIFO per sender/receiver pair.
//!
//! # Example
//! ```rust,ignore
//! let network = InMemoryNetwork::new();
//! let (endpoint, mut inbox) = network.join("node-a", &["sc", "any"]);
//! endpoint.send("node-b", PeerMessage::new("node-a").with("sc", "marker"));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use super::{PeerId, PeerMessage, PeerTransport};

struct Subscription {
    keys: Vec<String>,
    tx: mpsc::UnboundedSender<PeerMessage>,
}

/// Shared routing table for in-process nodes
#[derive(Clone, Default)]
pub struct InMemoryNetwork {
    routes: Arc<RwLock<HashMap<PeerId, Vec<Subscription>>>>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `uuid` for messages carrying any of `keys`.
    ///
    /// A node may join several times with different keys; a message is
    /// delivered once to every matching subscription.
    pub fn join(
        &self,
        uuid: impl Into<PeerId>,
        keys: &[&str],
    ) -> (NetworkEndpoint, mpsc::UnboundedReceiver<PeerMessage>) {
        let uuid = uuid.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes
            .write()
            .entry(uuid.clone())
            .or_default()
            .push(Subscription {
                keys: keys.iter().map(|k| k.to_string()).collect(),
                tx,
            });
        let endpoint = NetworkEndpoint {
            uuid,
            network: self.clone(),
        };
        (endpoint, rx)
    }

    /// Drop every subscription of `uuid`
    pub fn leave(&self, uuid: &str) -> bool {
        self.routes.write().remove(uuid).is_some()
    }

    /// Known node identities, sorted
    pub fn members(&self) -> Vec<PeerId> {
        let mut members: Vec<PeerId> = self.routes.read().keys().cloned().collect();
        members.sort();
        members
    }

    /// Route `message` to every subscription of `to` that serves one of its
    /// handler keys. Returns `true` if at least one subscription took it.
    pub fn deliver(&self, to: &str, message: PeerMessage) -> bool {
        let routes = self.routes.read();
        let Some(subscriptions) = routes.get(to) else {
            warn!(peer = %to, "Dropping message for unknown peer");
            return false;
        };

        let handler_keys = message.handler_keys();
        let mut delivered = false;
        for sub in subscriptions {
            if !sub.keys.iter().any(|k| handler_keys.contains(k.as_str())) {
                continue;
            }
            if sub.tx.send(message.clone()).is_ok() {
                delivered = true;
            }
        }
        trace!(from = %message.source, to = %to, delivered, "Routed message");
        delivered
    }
}

impl std::fmt::Debug for InMemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryNetwork")
            .field("members", &self.members())
            .finish()
    }
}

/// One node's handle on an [`InMemoryNetwork`]
#[derive(Debug, Clone)]
pub struct NetworkEndpoint {
    uuid: PeerId,
    network: InMemoryNetwork,
}

impl NetworkEndpoint {
    pub fn network(&self) -> &InMemoryNetwork {
        &self.network
    }
}

impl PeerTransport for NetworkEndpoint {
    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn send(&self, peer: &str, mut message: PeerMessage) -> bool {
        message.source = self.uuid.clone();
        self.network.deliver(peer, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_routes_by_handler_key() {
        let network = InMemoryNetwork::new();
        let (a, _a_rx) = network.join("a", &["sc"]);
        let (_b, mut b_sc) = network.join("b", &["sc", "any"]);
        let (_b2, mut b_lb) = network.join("b", &["lb"]);

        assert!(a.send("b", PeerMessage::new("ignored").with("sc", "marker")));
        let got = b_sc.recv().await.unwrap();
        assert_eq!(got.source, "a");
        assert!(b_lb.try_recv().is_err());

        assert!(a.send("b", PeerMessage::new("a").with("lb", "CollectedState")));
        assert_eq!(b_lb.recv().await.unwrap().get("lb"), Some("CollectedState"));
    }

    #[tokio::test]
    async fn test_unmatched_and_unknown_peer() {
        let network = InMemoryNetwork::new();
        let (a, _rx) = network.join("a", &["sc"]);
        let (_b, _b_rx) = network.join("b", &["sc"]);

        assert!(!a.send("b", PeerMessage::new("a").with("gm", "x")));
        assert!(!a.send("nobody", PeerMessage::new("a").with("sc", "x")));
        assert_eq!(network.members(), vec!["a".to_string(), "b".to_string()]);

        assert!(network.leave("b"));
        assert!(!a.send("b", PeerMessage::new("a").with("sc", "x")));
    }

    #[tokio::test]
    async fn test_fifo_per_pair() {
        let network = InMemoryNetwork::new();
        let (a, _) = network.join("a", &["sc"]);
        let (_, mut rx) = network.join("b", &["sc"]);

        for i in 0..5 {
            a.send("b", PeerMessage::new("a").with("sc", i));
        }
        for i in 0..5 {
            assert_eq!(rx.recv().await.unwrap().get("sc"), Some(i.to_string().as_str()));
        }
    }
}
