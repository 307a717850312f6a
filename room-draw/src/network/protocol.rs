//! Protocol Messages
//!
//! Two layers share this module:
//! - Sync messages: what peers say to each other inside a room, carried in
//!   an `{event, payload}` envelope.
//! - Relay frames: what a peer says to the relay server to subscribe to
//!   topics and publish envelopes. All JSON.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::game::state::{CustomEntry, ItemId, Ordinal, ParticipantId, Snapshot};

/// Relay-assigned tag identifying one connected peer.
pub type PeerTag = u64;

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload did not decode.
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Ordinals are 1-based.
    #[error("Invalid ordinal: {0}")]
    InvalidOrdinal(Ordinal),

    /// Empty text or name.
    #[error("Empty {0}")]
    Empty(&'static str),
}

// =============================================================================
// ENVELOPE
// =============================================================================

/// Message envelope as it travels through the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name.
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Create an envelope.
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self { event: event.into(), payload }
    }
}

// =============================================================================
// SYNC MESSAGES (peer -> peers)
// =============================================================================

/// Messages exchanged between peers in a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum SyncMessage {
    /// A draw settled.
    Roll(RollPayload),

    /// A participant excluded or re-included an item.
    ToggleExclude(ToggleExcludePayload),

    /// A custom item was added.
    AddQuestion(AddQuestionPayload),

    /// A custom item was removed.
    RemoveQuestion(RemoveQuestionPayload),

    /// A participant changed display name.
    SetName(SetNamePayload),

    /// Full-state snapshot.
    SyncState(SyncStatePayload),

    /// Draw history was cleared.
    Reset(ResetPayload),
}

/// Settled draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollPayload {
    /// Drawn ordinal.
    pub ordinal: Ordinal,
    /// Drawer.
    pub id: ParticipantId,
    /// Drawer's display name at the time.
    #[serde(default)]
    pub name: String,
    /// Draw stamp.
    #[serde(default)]
    pub stamp: u64,
}

/// Exclusion toggle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleExcludePayload {
    /// Target ordinal.
    pub ordinal: Ordinal,
    /// New exclusion value for the actor.
    pub is_excluded: bool,
    /// Actor.
    pub id: ParticipantId,
    /// Actor's display name at the time.
    #[serde(default)]
    pub name: String,
}

/// Added custom item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddQuestionPayload {
    /// Item text.
    pub text: String,
    /// Item id.
    pub id: ItemId,
    /// Ordinal assigned by the author.
    pub slot: Ordinal,
}

impl AddQuestionPayload {
    /// Convert to a custom entry.
    pub fn to_entry(&self) -> CustomEntry {
        CustomEntry {
            id: self.id.clone(),
            slot: self.slot,
            text: self.text.clone(),
        }
    }
}

/// Removed custom item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveQuestionPayload {
    /// Ordinal at the sender.
    pub ordinal: Ordinal,
    /// Item id, when the sender knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ItemId>,
}

/// Display name change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetNamePayload {
    /// Participant.
    pub id: ParticipantId,
    /// New display name.
    pub name: String,
    /// Rename revision.
    #[serde(default)]
    pub rev: u64,
}

/// Full-state snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatePayload {
    /// Sender.
    pub from: ParticipantId,
    /// Whether the sender wants peers to answer with their own snapshot.
    #[serde(default)]
    pub request: bool,
    /// Hex fingerprint of the sender's fixed catalogue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,
    /// Snapshot.
    pub state: Snapshot,
}

/// Reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetPayload {
    /// Who reset.
    pub id: ParticipantId,
}

impl SyncMessage {
    /// Event name on the wire.
    pub fn event_name(&self) -> &'static str {
        match self {
            SyncMessage::Roll(_) => "roll",
            SyncMessage::ToggleExclude(_) => "toggle_exclude",
            SyncMessage::AddQuestion(_) => "add_question",
            SyncMessage::RemoveQuestion(_) => "remove_question",
            SyncMessage::SetName(_) => "set_name",
            SyncMessage::SyncState(_) => "sync_state",
            SyncMessage::Reset(_) => "reset",
        }
    }

    /// Wrap in an envelope.
    pub fn to_envelope(&self) -> Result<Envelope, ProtocolError> {
        let value = serde_json::to_value(self)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Decode and validate from an envelope.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, ProtocolError> {
        let value = serde_json::to_value(envelope)?;
        let message: SyncMessage = serde_json::from_value(value)?;
        message.validate()?;
        Ok(message)
    }

    /// Reject payloads that decode but cannot be applied.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            SyncMessage::Roll(p) if p.ordinal == 0 => Err(ProtocolError::InvalidOrdinal(0)),
            SyncMessage::ToggleExclude(p) if p.ordinal == 0 => Err(ProtocolError::InvalidOrdinal(0)),
            SyncMessage::RemoveQuestion(p) if p.ordinal == 0 => Err(ProtocolError::InvalidOrdinal(0)),
            SyncMessage::AddQuestion(p) if p.slot == 0 => Err(ProtocolError::InvalidOrdinal(0)),
            SyncMessage::AddQuestion(p) if p.text.trim().is_empty() => Err(ProtocolError::Empty("text")),
            SyncMessage::SetName(p) if p.name.trim().is_empty() => Err(ProtocolError::Empty("name")),
            _ => Ok(()),
        }
    }
}

// =============================================================================
// RELAY FRAMES (peer -> relay)
// =============================================================================

/// Frames sent from a peer to the relay server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayRequest {
    /// Start receiving a topic.
    Subscribe {
        topic: String,
        /// Deliver this peer's own publishes back to it.
        #[serde(default)]
        echo_self: bool,
    },

    /// Stop receiving a topic.
    Unsubscribe { topic: String },

    /// Broadcast an envelope to a topic.
    Publish { topic: String, envelope: Envelope },

    /// Ping for latency measurement.
    Ping { timestamp: u64 },
}

// =============================================================================
// RELAY FRAMES (relay -> peer)
// =============================================================================

/// Frames sent from the relay server to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayNotice {
    /// First frame on every connection.
    Welcome { peer: PeerTag, server_version: String },

    /// Subscription acknowledged.
    Subscribed { topic: String },

    /// Unsubscription acknowledged.
    Unsubscribed { topic: String },

    /// A publish on a subscribed topic.
    Delivery { topic: String, sender: PeerTag, envelope: Envelope },

    /// Pong response.
    Pong { timestamp: u64, server_time: u64 },

    /// Request failed.
    Error(RelayErrorFrame),

    /// Server is shutting down.
    Shutdown { reason: String },
}

/// Relay error frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayErrorFrame {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Topic the failed request named, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

/// Relay error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Frame did not decode.
    InvalidFrame,
    /// Publish on a topic the peer is not subscribed to.
    NotSubscribed,
    /// Peer holds too many subscriptions.
    TooManyTopics,
    /// Server at connection capacity.
    ServerOverloaded,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl RelayRequest {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl RelayNotice {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
