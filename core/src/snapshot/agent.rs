//! Chandy-Lamport state collection agent
//!
//! One agent runs per node. An initiator records its local gateway reading,
//! sends a marker to every peer and waits for the response timeout. Every
//! other node records its own reading on the first marker of a version,
//! forwards the marker, records channel traffic until it has seen a marker
//! from every other peer, then ships what it recorded back to the initiator.
//!
//! Marker counting per version:
//!
//! * the initiator starts at 1 and is done at `N` (one marker from each peer)
//! * everyone else starts at 1 and is done at `N - 1`
//!
//! where `N` is the size of the peer set, self included.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::message::{self, consolidate, CollectedState, SnapshotMessage, StateFragment};
use super::timer::ResponseTimer;
use super::version::SnapshotVersion;
use super::SnapshotError;
use crate::config::SnapshotConfig;
use crate::device::DeviceInventory;
use crate::peer::{PeerId, PeerMessage, PeerSet, PeerTransport};
use crate::scheduler::TimerStatus;

/// Finished versions remembered so late markers can be recognised
const RETIRED_CAPACITY: usize = 32;

/// What the initiator did when its response timer expired
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    /// Every marker arrived; the consolidated state was sent to the requester
    Complete(CollectedState),
    /// Markers are missing and the timeout was re-armed
    Extended { remaining: u32 },
    /// Markers are missing and no extensions are left
    Incomplete {
        version: SnapshotVersion,
        markers: usize,
        expected: usize,
    },
}

pub struct SnapshotAgent {
    uuid: PeerId,
    transport: Arc<dyn PeerTransport>,
    inventory: Arc<dyn DeviceInventory>,
    timer: Box<dyn ResponseTimer>,
    config: SnapshotConfig,
    peers: PeerSet,
    current: SnapshotVersion,
    next_sequence: u64,
    /// Module that asked for the snapshot in progress
    requester: Option<String>,
    markers: HashMap<SnapshotVersion, usize>,
    collected: HashMap<SnapshotVersion, Vec<StateFragment>>,
    recording: HashSet<SnapshotVersion>,
    retired: VecDeque<SnapshotVersion>,
    extensions_left: u32,
}

impl SnapshotAgent {
    pub fn new(
        transport: Arc<dyn PeerTransport>,
        inventory: Arc<dyn DeviceInventory>,
        timer: Box<dyn ResponseTimer>,
        config: SnapshotConfig,
    ) -> Self {
        let uuid = transport.uuid().to_string();
        Self {
            peers: PeerSet::new(uuid.clone()),
            uuid,
            transport,
            inventory,
            timer,
            config,
            current: SnapshotVersion::sentinel(),
            next_sequence: 0,
            requester: None,
            markers: HashMap::new(),
            collected: HashMap::new(),
            recording: HashSet::new(),
            retired: VecDeque::new(),
            extensions_left: 0,
        }
    }

    /// Seed the peer set
    pub fn with_peers<I, S>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<PeerId>,
    {
        for peer in peers {
            self.peers.insert(peer);
        }
        self
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn peers(&self) -> &PeerSet {
        &self.peers
    }

    pub fn current_version(&self) -> &SnapshotVersion {
        &self.current
    }

    pub fn requester(&self) -> Option<&str> {
        self.requester.as_deref()
    }

    pub fn marker_count(&self, version: &SnapshotVersion) -> usize {
        self.markers.get(version).copied().unwrap_or(0)
    }

    pub fn is_recording(&self, version: &SnapshotVersion) -> bool {
        self.recording.contains(version)
    }

    pub fn fragments(&self, version: &SnapshotVersion) -> &[StateFragment] {
        self.collected.get(version).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether this node started the current snapshot and still owes the
    /// requester an answer
    pub fn awaiting_response(&self) -> bool {
        !self.current.is_sentinel() && self.current.initiated_by(&self.uuid)
    }

    /// Start a snapshot on behalf of `module`
    pub fn request(&mut self, module: impl Into<String>) -> SnapshotVersion {
        self.requester = Some(module.into());
        self.initiate()
    }

    /// Apply one inbound message.
    ///
    /// Fails only when the message claims to be snapshot traffic but cannot
    /// be parsed.
    pub fn handle_message(&mut self, msg: PeerMessage) -> Result<(), SnapshotError> {
        if !msg.source.is_empty() && self.peers.insert(msg.source.clone()) {
            debug!(peer = %msg.source, "Peer not in peer set; added");
        }
        let Some(parsed) = SnapshotMessage::parse(&msg)? else {
            trace!(from = %msg.source, "Ignoring message without snapshot content");
            return Ok(());
        };

        match parsed {
            SnapshotMessage::PeerList { leader, peers } => self.on_peer_list(&leader, peers),
            SnapshotMessage::Request { module, source } => {
                info!(module = %module, from = %source, "Received state collection request");
                self.request(module);
            }
            SnapshotMessage::Marker(version) => self.on_marker(version),
            SnapshotMessage::State(fragment) => self.on_state(fragment),
            SnapshotMessage::Payload { value, sender, tag } => self.on_payload(value, sender, tag),
        }
        Ok(())
    }

    /// React to the response timer finishing with `status`.
    ///
    /// Returns `None` when there was nothing to respond to (cancelled timer,
    /// or no snapshot of ours in progress).
    pub fn handle_response_timer(&mut self, status: TimerStatus) -> Option<ResponseOutcome> {
        if status.is_cancelled() {
            info!("Response timer cancelled");
            return None;
        }
        if !self.awaiting_response() {
            debug!("Response timer fired with no snapshot awaiting a response");
            return None;
        }

        let version = self.current.clone();
        let expected = self.peers.len();
        let markers = self.marker_count(&version);

        if markers >= expected {
            let state = CollectedState {
                module: self.requester.clone().unwrap_or_default(),
                version: version.clone(),
                gateway: consolidate(self.fragments(&version)),
            };
            info!(%version, collected = %state.gateway, "Collected states");
            match &self.requester {
                Some(module) => {
                    info!(module = %module, "Sending collected state to requesting module");
                    if !self.transport.send(&self.uuid, state.to_message(&self.uuid)) {
                        warn!(module = %module, "Requesting module is not listening");
                    }
                }
                None => warn!(%version, "No module requested this snapshot; result not delivered"),
            }
            self.finish_current();
            return Some(ResponseOutcome::Complete(state));
        }

        if self.extensions_left > 0 {
            self.extensions_left -= 1;
            info!(
                %version,
                markers,
                expected,
                remaining = self.extensions_left,
                "Markers missing; extending response timeout"
            );
            self.timer.arm(self.config.response_timeout());
            return Some(ResponseOutcome::Extended {
                remaining: self.extensions_left,
            });
        }

        warn!(%version, markers, expected, "Not receiving all states back");
        self.finish_current();
        Some(ResponseOutcome::Incomplete {
            version,
            markers,
            expected,
        })
    }

    /// Drive the agent until `shutdown` fires or the inbox closes.
    pub async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<PeerMessage>,
        mut timer_rx: mpsc::UnboundedReceiver<TimerStatus>,
        shutdown: CancellationToken,
    ) -> Result<(), SnapshotError> {
        info!(uuid = %self.uuid, peers = self.peers.len(), "State collection agent started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(status) = timer_rx.recv() => {
                    self.handle_response_timer(status);
                }
                message = inbox.recv() => match message {
                    Some(message) => {
                        let from = message.source.clone();
                        if let Err(e) = self.handle_message(message) {
                            error!(from = %from, error = %e, "Malformed snapshot message");
                            return Err(e);
                        }
                    }
                    None => break,
                },
            }
        }
        info!(uuid = %self.uuid, "State collection agent stopped");
        Ok(())
    }

    fn initiate(&mut self) -> SnapshotVersion {
        self.markers.clear();
        self.collected.clear();
        self.recording.clear();

        self.next_sequence += 1;
        let version = SnapshotVersion::new(self.uuid.clone(), self.next_sequence);
        self.current = version.clone();
        self.markers.insert(version.clone(), 1);
        let fragment = self.take_snapshot();
        self.collected.entry(version.clone()).or_default().push(fragment);
        self.recording.insert(version.clone());

        info!(%version, peers = self.peers.len(), "Initiating state collection");
        self.send_to_others(&message::marker(&version));

        self.extensions_left = self.config.response_extensions;
        self.timer.arm(self.config.response_timeout());
        version
    }

    fn on_marker(&mut self, version: SnapshotVersion) {
        let n = self.peers.len();

        if version == self.current {
            let count = self.bump_marker(&version);
            if version.initiated_by(&self.uuid) {
                if count >= n {
                    self.recording.remove(&version);
                    info!(%version, "Received every marker; recording stopped");
                }
            } else if count + 1 >= n {
                self.send_state_back(&version);
                self.retire(&version);
                self.current = SnapshotVersion::sentinel();
            }
            return;
        }

        if self.markers.contains_key(&version) {
            let count = self.bump_marker(&version);
            if count + 1 >= n {
                self.send_state_back(&version);
                self.retire(&version);
            }
            return;
        }

        if self.retired.contains(&version)
            || version.initiated_by(&self.uuid)
            || self.markers.keys().any(|v| supersedes(v, &version))
        {
            debug!(%version, "Ignoring stale marker");
            return;
        }
        self.abandon_superseded(&version);

        let adopted = self.current.is_sentinel();
        if adopted {
            info!(%version, "First marker; adopting version");
            self.current = version.clone();
        } else {
            info!(%version, current = %self.current, "Marker for a concurrent snapshot");
        }
        self.markers.insert(version.clone(), 1);
        let fragment = self.take_snapshot();
        self.collected.entry(version.clone()).or_default().push(fragment);
        self.send_to_others(&message::marker(&version));

        if n <= 2 {
            self.send_state_back(&version);
            self.retire(&version);
            if adopted {
                self.current = SnapshotVersion::sentinel();
            }
        } else {
            self.recording.insert(version);
        }
    }

    fn on_state(&mut self, fragment: StateFragment) {
        if self.current.is_sentinel() {
            warn!(?fragment, "Dropping state fragment; no snapshot in progress");
            return;
        }
        debug!(version = %self.current, ?fragment, "Received state from peer");
        self.collected
            .entry(self.current.clone())
            .or_default()
            .push(fragment);
    }

    fn on_payload(&mut self, value: String, sender: PeerId, tag: Option<SnapshotVersion>) {
        let targets: Vec<SnapshotVersion> = match tag {
            Some(version) if self.recording.contains(&version) => vec![version],
            Some(_) => Vec::new(),
            None => self.recording.iter().cloned().collect(),
        };
        if targets.is_empty() {
            trace!(from = %sender, "Not recording; payload ignored");
            return;
        }
        for version in targets {
            debug!(%version, from = %sender, "Recorded message in transit");
            self.collected.entry(version).or_default().push(StateFragment::InTransit {
                value: value.clone(),
                source: sender.clone(),
                destination: self.uuid.clone(),
            });
        }
    }

    fn on_peer_list(&mut self, leader: &str, peers: Vec<PeerId>) {
        let (added, removed) = self.peers.reconcile(peers);
        info!(leader = %leader, ?added, ?removed, "Peer list received from group leader");

        if leader == self.uuid {
            self.initiate();
        } else {
            self.current = SnapshotVersion::sentinel();
            self.markers.clear();
            self.collected.clear();
            self.recording.clear();
        }
    }

    fn take_snapshot(&self) -> StateFragment {
        let value = self
            .inventory
            .sum_signal(&self.config.gateway_device_type, &self.config.gateway_signal);
        debug!(
            device_type = %self.config.gateway_device_type,
            signal = %self.config.gateway_signal,
            value,
            "Took local snapshot"
        );
        StateFragment::Gateway {
            source: self.uuid.clone(),
            value,
        }
    }

    /// Count one more marker for `version`, never beyond the peer-set size
    fn bump_marker(&mut self, version: &SnapshotVersion) -> usize {
        let limit = self.peers.len();
        let count = self.markers.entry(version.clone()).or_insert(0);
        *count = (*count + 1).min(limit);
        *count
    }

    fn send_to_others(&self, message: &PeerMessage) {
        for peer in self.peers.others() {
            if !self.transport.send(peer, message.clone()) {
                warn!(peer = %peer, "Failed to send to peer");
            }
        }
    }

    fn send_state_back(&self, version: &SnapshotVersion) {
        let fragments = self.fragments(version);
        info!(%version, fragments = fragments.len(), to = %version.initiator, "Sending collected states back");
        for fragment in fragments {
            if !self
                .transport
                .send(&version.initiator, fragment.to_message(&self.uuid))
            {
                warn!(peer = %version.initiator, "Failed to send state to initiator");
            }
        }
    }

    /// Drop all bookkeeping of a finished version
    fn retire(&mut self, version: &SnapshotVersion) {
        self.markers.remove(version);
        self.collected.remove(version);
        self.recording.remove(version);
        self.retired.push_back(version.clone());
        while self.retired.len() > RETIRED_CAPACITY {
            self.retired.pop_front();
        }
    }

    /// Give up on older versions from the same initiator. An initiator
    /// runs one snapshot at a time, so their missing markers never come.
    fn abandon_superseded(&mut self, version: &SnapshotVersion) {
        let abandoned: Vec<SnapshotVersion> = self
            .markers
            .keys()
            .filter(|v| supersedes(version, v))
            .cloned()
            .collect();
        for old in abandoned {
            warn!(version = %old, newer = %version, "Abandoning unfinished snapshot");
            self.retire(&old);
            if old == self.current {
                self.current = SnapshotVersion::sentinel();
            }
        }
    }

    fn finish_current(&mut self) {
        let version = std::mem::take(&mut self.current);
        self.retire(&version);
    }
}

/// Whether `newer` replaces `older` (same initiator, later sequence)
fn supersedes(newer: &SnapshotVersion, older: &SnapshotVersion) -> bool {
    newer.initiator == older.initiator && newer.sequence > older.sequence
}

impl std::fmt::Debug for SnapshotAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotAgent")
            .field("uuid", &self.uuid)
            .field("current", &self.current)
            .field("peers", &self.peers.len())
            .field("recording", &self.recording.len())
            .finish()
    }
}
