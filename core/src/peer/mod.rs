//! Peer identities, messages and the transport seam
//!
//! Messages are flat string property maps with dotted keys. The first
//! segment of a key names the handler a message is meant for (`sc.source`
//! belongs to `sc`), which is how the in-memory network routes them.

pub mod in_memory;

pub use in_memory::{InMemoryNetwork, NetworkEndpoint};

use std::collections::{BTreeMap, BTreeSet};

/// Identity of a peer node
pub type PeerId = String;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerMessage {
    /// Sender identity, stamped by the transport on send
    pub source: PeerId,
    pub entries: BTreeMap<String, String>,
}

impl PeerMessage {
    pub fn new(source: impl Into<PeerId>) -> Self {
        Self {
            source: source.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        self.entries.insert(key.into(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Distinct handler keys (first key segments) present in the message
    pub fn handler_keys(&self) -> BTreeSet<&str> {
        self.entries
            .keys()
            .map(|k| k.split('.').next().unwrap_or(k.as_str()))
            .collect()
    }
}

/// Outbound side of the peer network, as seen by one node
pub trait PeerTransport: Send + Sync {
    /// This node's identity
    fn uuid(&self) -> &str;

    /// Best-effort delivery. Returns `false` when the peer is unreachable.
    fn send(&self, peer: &str, message: PeerMessage) -> bool;
}

/// The set of peers taking part in snapshots. Always contains self.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSet {
    own: PeerId,
    peers: BTreeSet<PeerId>,
}

impl PeerSet {
    pub fn new(own: impl Into<PeerId>) -> Self {
        let own = own.into();
        let mut peers = BTreeSet::new();
        peers.insert(own.clone());
        Self { own, peers }
    }

    pub fn with_peers<I, S>(own: impl Into<PeerId>, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<PeerId>,
    {
        let mut set = Self::new(own);
        for peer in peers {
            set.insert(peer);
        }
        set
    }

    pub fn own_id(&self) -> &str {
        &self.own
    }

    /// Returns `true` if the peer was not known before
    pub fn insert(&mut self, peer: impl Into<PeerId>) -> bool {
        self.peers.insert(peer.into())
    }

    /// Self can never be removed
    pub fn remove(&mut self, peer: &str) -> bool {
        if peer == self.own {
            return false;
        }
        self.peers.remove(peer)
    }

    pub fn contains(&self, peer: &str) -> bool {
        self.peers.contains(peer)
    }

    /// Number of participants, self included
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.peers.iter().map(String::as_str)
    }

    /// Every participant except self
    pub fn others(&self) -> impl Iterator<Item = &str> {
        let own = self.own.as_str();
        self.iter().filter(move |p| *p != own)
    }

    /// Replace the membership with `announced`, keeping self.
    ///
    /// Returns the peers that were added and removed.
    pub fn reconcile<I, S>(&mut self, announced: I) -> (Vec<PeerId>, Vec<PeerId>)
    where
        I: IntoIterator<Item = S>,
        S: Into<PeerId>,
    {
        let mut next: BTreeSet<PeerId> = announced.into_iter().map(Into::into).collect();
        next.insert(self.own.clone());

        let added = next.difference(&self.peers).cloned().collect();
        let removed = self.peers.difference(&next).cloned().collect();
        self.peers = next;
        (added, removed)
    }
}
