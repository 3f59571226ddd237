//! Snapshot wire vocabulary
//!
//! Everything the state collector sends or understands, mapped onto the flat
//! [`PeerMessage`] property map. Parsing is strict: a message that claims to
//! be a marker or state but lacks a field is an error, not a no-op.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::version::SnapshotVersion;
use crate::peer::{PeerId, PeerMessage};

pub const KEY_SC: &str = "sc";
pub const KEY_SOURCE: &str = "sc.source";
pub const KEY_ID: &str = "sc.id";
pub const KEY_MODULE: &str = "sc.module";
pub const KEY_TYPE: &str = "sc.type";
pub const KEY_GATEWAY: &str = "sc.gateway";
pub const KEY_TRANSIT_VALUE: &str = "sc.transit.value";
pub const KEY_TRANSIT_SOURCE: &str = "sc.transit.source";
pub const KEY_TRANSIT_DESTIN: &str = "sc.transit.destin";
pub const KEY_VERSION_SOURCE: &str = "sc.version.source";
pub const KEY_VERSION_ID: &str = "sc.version.id";
pub const KEY_ANY: &str = "any";
pub const KEY_PEERS: &str = "any.peers";

const KIND_MARKER: &str = "marker";
const KIND_STATE: &str = "state";
const KIND_REQUEST: &str = "request";
const KIND_PEER_LIST: &str = "peerList";
const TYPE_GATEWAY: &str = "gateway";
const TYPE_MESSAGE: &str = "Message";
const COLLECTED_STATE: &str = "CollectedState";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MessageError {
    #[error("missing key `{0}`")]
    MissingKey(&'static str),

    #[error("invalid number in `{key}`: {value:?}")]
    InvalidNumber { key: &'static str, value: String },

    #[error("unknown state type `{0}`")]
    UnknownStateType(String),
}

/// One recorded piece of global state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateFragment {
    /// A node's local gateway reading
    Gateway { source: PeerId, value: f64 },
    /// A message that was in flight on a channel while recording
    InTransit {
        value: String,
        source: PeerId,
        destination: PeerId,
    },
}

impl StateFragment {
    pub fn to_message(&self, from: &str) -> PeerMessage {
        let msg = PeerMessage::new(from).with(KEY_SC, KIND_STATE);
        match self {
            StateFragment::Gateway { source, value } => msg
                .with(KEY_TYPE, TYPE_GATEWAY)
                .with(KEY_GATEWAY, value)
                .with(KEY_SOURCE, source),
            StateFragment::InTransit {
                value,
                source,
                destination,
            } => msg
                .with(KEY_TYPE, TYPE_MESSAGE)
                .with(KEY_SOURCE, from)
                .with(KEY_TRANSIT_VALUE, value)
                .with(KEY_TRANSIT_SOURCE, source)
                .with(KEY_TRANSIT_DESTIN, destination),
        }
    }
}

impl fmt::Display for StateFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateFragment::Gateway { value, .. } => write!(f, "{value}"),
            StateFragment::InTransit {
                value,
                source,
                destination,
            } => write!(f, "{value}(from {source} to {destination})"),
        }
    }
}

/// Render fragments in arrival order as one comma-separated string
pub fn consolidate(fragments: &[StateFragment]) -> String {
    fragments
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// A message addressed to the state collector
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotMessage {
    /// Group membership announced by `leader`
    PeerList { leader: PeerId, peers: Vec<PeerId> },
    /// A module asks for a global snapshot
    Request { module: String, source: PeerId },
    Marker(SnapshotVersion),
    State(StateFragment),
    /// Any other `sc` traffic; recorded while a snapshot is in progress
    Payload {
        value: String,
        sender: PeerId,
        tag: Option<SnapshotVersion>,
    },
}

impl SnapshotMessage {
    /// Interpret `msg`. Returns `Ok(None)` for messages with no snapshot
    /// content at all.
    pub fn parse(msg: &PeerMessage) -> Result<Option<Self>, MessageError> {
        if msg.get(KEY_ANY) == Some(KIND_PEER_LIST) {
            let peers = require(msg, KEY_PEERS)?
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
            return Ok(Some(SnapshotMessage::PeerList {
                leader: msg.source.clone(),
                peers,
            }));
        }

        let Some(kind) = msg.get(KEY_SC) else {
            return Ok(None);
        };
        let parsed = match kind {
            KIND_REQUEST => SnapshotMessage::Request {
                module: require(msg, KEY_MODULE)?.to_string(),
                source: msg.get(KEY_SOURCE).unwrap_or(msg.source.as_str()).to_string(),
            },
            KIND_MARKER => SnapshotMessage::Marker(SnapshotVersion::new(
                require(msg, KEY_SOURCE)?,
                number(msg, KEY_ID)?,
            )),
            KIND_STATE => SnapshotMessage::State(parse_fragment(msg)?),
            other => SnapshotMessage::Payload {
                value: other.to_string(),
                sender: msg.get(KEY_SOURCE).unwrap_or(msg.source.as_str()).to_string(),
                tag: parse_tag(msg)?,
            },
        };
        Ok(Some(parsed))
    }
}

fn require<'a>(msg: &'a PeerMessage, key: &'static str) -> Result<&'a str, MessageError> {
    msg.get(key).ok_or(MessageError::MissingKey(key))
}

fn number<T: std::str::FromStr>(msg: &PeerMessage, key: &'static str) -> Result<T, MessageError> {
    let raw = require(msg, key)?;
    raw.trim().parse().map_err(|_| MessageError::InvalidNumber {
        key,
        value: raw.to_string(),
    })
}

fn parse_fragment(msg: &PeerMessage) -> Result<StateFragment, MessageError> {
    match require(msg, KEY_TYPE)? {
        TYPE_GATEWAY => Ok(StateFragment::Gateway {
            source: require(msg, KEY_SOURCE)?.to_string(),
            value: number(msg, KEY_GATEWAY)?,
        }),
        TYPE_MESSAGE => Ok(StateFragment::InTransit {
            value: require(msg, KEY_TRANSIT_VALUE)?.to_string(),
            source: require(msg, KEY_TRANSIT_SOURCE)?.to_string(),
            destination: require(msg, KEY_TRANSIT_DESTIN)?.to_string(),
        }),
        other => Err(MessageError::UnknownStateType(other.to_string())),
    }
}

fn parse_tag(msg: &PeerMessage) -> Result<Option<SnapshotVersion>, MessageError> {
    match msg.get(KEY_VERSION_SOURCE) {
        Some(initiator) => Ok(Some(SnapshotVersion::new(
            initiator,
            number(msg, KEY_VERSION_ID)?,
        ))),
        None => Ok(None),
    }
}

pub fn marker(version: &SnapshotVersion) -> PeerMessage {
    PeerMessage::new(version.initiator.clone())
        .with(KEY_SC, KIND_MARKER)
        .with(KEY_SOURCE, &version.initiator)
        .with(KEY_ID, version.sequence)
}

pub fn request(from: &str, module: &str) -> PeerMessage {
    PeerMessage::new(from)
        .with(KEY_SC, KIND_REQUEST)
        .with(KEY_MODULE, module)
        .with(KEY_SOURCE, from)
}

pub fn peer_list<'a>(leader: &str, peers: impl IntoIterator<Item = &'a str>) -> PeerMessage {
    let peers: Vec<&str> = peers.into_iter().collect();
    PeerMessage::new(leader)
        .with(KEY_ANY, KIND_PEER_LIST)
        .with(KEY_PEERS, peers.join(","))
}

/// Ordinary `sc` traffic, optionally tagged with the snapshot it belongs to
pub fn payload(from: &str, value: &str, tag: Option<&SnapshotVersion>) -> PeerMessage {
    let msg = PeerMessage::new(from)
        .with(KEY_SC, value)
        .with(KEY_SOURCE, from);
    match tag {
        Some(version) => msg
            .with(KEY_VERSION_SOURCE, &version.initiator)
            .with(KEY_VERSION_ID, version.sequence),
        None => msg,
    }
}

/// Consolidated snapshot delivered to the requesting module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectedState {
    pub module: String,
    pub version: SnapshotVersion,
    /// Comma-separated rendering of every fragment
    pub gateway: String,
}

impl CollectedState {
    pub fn to_message(&self, from: &str) -> PeerMessage {
        PeerMessage::new(from)
            .with(&self.module, COLLECTED_STATE)
            .with(format!("{}.gateway", self.module), &self.gateway)
            .with(
                format!("{}.version", self.module),
                format!("{}:{}", self.version.initiator, self.version.sequence),
            )
    }

    /// Read a collected state addressed to `module`
    pub fn from_message(module: &str, msg: &PeerMessage) -> Option<Self> {
        if msg.get(module) != Some(COLLECTED_STATE) {
            return None;
        }
        let gateway = msg.get(&format!("{module}.gateway"))?.to_string();
        let (initiator, sequence) = msg.get(&format!("{module}.version"))?.rsplit_once(':')?;
        Some(Self {
            module: module.to_string(),
            version: SnapshotVersion::new(initiator, sequence.parse().ok()?),
            gateway,
        })
    }

    /// Individual rendered fragments
    pub fn values(&self) -> Vec<&str> {
        if self.gateway.is_empty() {
            return Vec::new();
        }
        self.gateway.split(',').collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_marker() {
        let msg = marker(&SnapshotVersion::new("a", 4));
        assert_eq!(
            SnapshotMessage::parse(&msg).unwrap(),
            Some(SnapshotMessage::Marker(SnapshotVersion::new("a", 4)))
        );
    }

    #[test]
    fn test_parse_peer_list() {
        let msg = peer_list("leader", ["a", "b", "leader"]);
        match SnapshotMessage::parse(&msg).unwrap() {
            Some(SnapshotMessage::PeerList { leader, peers }) => {
                assert_eq!(leader, "leader");
                assert_eq!(peers, vec!["a", "b", "leader"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_state_fragments() {
        let gateway = StateFragment::Gateway {
            source: "b".into(),
            value: 2.5,
        };
        let transit = StateFragment::InTransit {
            value: "hello".into(),
            source: "c".into(),
            destination: "b".into(),
        };
        for fragment in [gateway, transit] {
            let parsed = SnapshotMessage::parse(&fragment.to_message("b")).unwrap();
            assert_eq!(parsed, Some(SnapshotMessage::State(fragment)));
        }
    }

    #[test]
    fn test_parse_payload_tag() {
        let version = SnapshotVersion::new("a", 2);
        let tagged = payload("c", "lb-offer", Some(&version));
        assert_eq!(
            SnapshotMessage::parse(&tagged).unwrap(),
            Some(SnapshotMessage::Payload {
                value: "lb-offer".into(),
                sender: "c".into(),
                tag: Some(version),
            })
        );
    }

    #[test]
    fn test_parse_errors() {
        let msg = PeerMessage::new("a").with(KEY_SC, "marker").with(KEY_SOURCE, "a");
        assert_eq!(
            SnapshotMessage::parse(&msg),
            Err(MessageError::MissingKey(KEY_ID))
        );

        let msg = msg.with(KEY_ID, "three");
        assert!(matches!(
            SnapshotMessage::parse(&msg),
            Err(MessageError::InvalidNumber { key: KEY_ID, .. })
        ));

        let msg = PeerMessage::new("a").with(KEY_SC, "state").with(KEY_TYPE, "voltage");
        assert_eq!(
            SnapshotMessage::parse(&msg),
            Err(MessageError::UnknownStateType("voltage".into()))
        );
    }

    #[test]
    fn test_not_for_collector() {
        let msg = PeerMessage::new("a").with("lb", "demand");
        assert_eq!(SnapshotMessage::parse(&msg).unwrap(), None);
    }

    #[test]
    fn test_consolidate_and_collected_state() {
        let fragments = vec![
            StateFragment::Gateway {
                source: "a".into(),
                value: 1.0,
            },
            StateFragment::InTransit {
                value: "x".into(),
                source: "b".into(),
                destination: "a".into(),
            },
            StateFragment::Gateway {
                source: "b".into(),
                value: 2.5,
            },
        ];
        let rendered = consolidate(&fragments);
        assert_eq!(rendered, "1,x(from b to a),2.5");

        let state = CollectedState {
            module: "lb".into(),
            version: SnapshotVersion::new("a", 1),
            gateway: rendered,
        };
        let msg = state.to_message("a");
        assert_eq!(CollectedState::from_message("lb", &msg), Some(state.clone()));
        assert_eq!(CollectedState::from_message("gm", &msg), None);
        assert_eq!(state.values(), vec!["1", "x(from b to a)", "2.5"]);
    }
}
