//! Action envelope exchanged between channel adapters and the engine.
//!
//! Every inbound user event and outbound bot reply travels as one [`Action`]:
//! a shared envelope plus a kind-discriminated payload. Engine code matches on
//! [`ActionKind`] exhaustively; adapters only construct and consume envelopes.

use std::collections::BTreeMap;
use std::fmt;

use murmur_core::{current_unix_timestamp_ms, mint_id};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::user_contract::UserId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
/// Identifies a channel family ("slack", "web", "messenger", ...).
pub struct ChannelType(String);

impl ChannelType {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `ActionPriority` values.
pub enum ActionPriority {
    #[default]
    Normal,
    Urgent,
}

impl ActionPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Urgent => "urgent",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `ActionVisibility` values.
pub enum ActionVisibility {
    #[default]
    Unknown,
    Public,
    Private,
}

impl ActionVisibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `ActionNotificationType` values for proactive sends.
pub enum ActionNotificationType {
    Transactional,
    Informative,
    Marketing,
}

impl ActionNotificationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transactional => "transactional",
            Self::Informative => "informative",
            Self::Marketing => "marketing",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `AttachmentKind` values.
pub enum AttachmentKind {
    Image,
    Audio,
    Video,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    Sentence {
        #[serde(default)]
        text: Option<String>,
        /// Pre-computed NLU payload bypassing the remote classify call.
        /// Opaque at this layer; the NLP crate owns the concrete shape.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        precomputed_nlp: Option<Value>,
    },
    Choice {
        intent: String,
        #[serde(default)]
        parameters: BTreeMap<String, String>,
    },
    Attachment {
        url: String,
        attachment: AttachmentKind,
    },
    Location {
        latitude: f64,
        longitude: f64,
    },
    Custom {
        payload: Value,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
/// Public struct `ActionMetadata` used across Murmur components.
pub struct ActionMetadata {
    #[serde(default)]
    pub priority: ActionPriority,
    #[serde(default)]
    pub visibility: ActionVisibility,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<ActionNotificationType>,
    /// Marks the last bot answer of a turn.
    #[serde(default)]
    pub last_answer: bool,
    /// Channel-specific rich message attached by the message bus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_message: Option<Value>,
    /// NLU call statistics recorded after a successful parse (opaque here).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nlp_stats: Option<Value>,
    /// Intent resolved for the turn this action belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    /// Story step selected for the turn this action belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `Action` used across Murmur components.
pub struct Action {
    pub id: String,
    pub user_id: UserId,
    pub recipient_id: UserId,
    pub channel_type: ChannelType,
    pub timestamp_ms: u64,
    pub kind: ActionKind,
    #[serde(default)]
    pub metadata: ActionMetadata,
}

impl Action {
    pub fn new(user_id: UserId, recipient_id: UserId, channel_type: ChannelType, kind: ActionKind) -> Self {
        Self {
            id: mint_id("act"),
            user_id,
            recipient_id,
            channel_type,
            timestamp_ms: current_unix_timestamp_ms(),
            kind,
            metadata: ActionMetadata::default(),
        }
    }

    pub fn sentence(
        user_id: UserId,
        recipient_id: UserId,
        channel_type: ChannelType,
        text: impl Into<String>,
    ) -> Self {
        Self::new(
            user_id,
            recipient_id,
            channel_type,
            ActionKind::Sentence {
                text: Some(text.into()),
                precomputed_nlp: None,
            },
        )
    }

    pub fn choice(
        user_id: UserId,
        recipient_id: UserId,
        channel_type: ChannelType,
        intent: impl Into<String>,
        parameters: BTreeMap<String, String>,
    ) -> Self {
        Self::new(
            user_id,
            recipient_id,
            channel_type,
            ActionKind::Choice {
                intent: intent.into(),
                parameters,
            },
        )
    }

    pub fn attachment(
        user_id: UserId,
        recipient_id: UserId,
        channel_type: ChannelType,
        url: impl Into<String>,
        attachment: AttachmentKind,
    ) -> Self {
        Self::new(
            user_id,
            recipient_id,
            channel_type,
            ActionKind::Attachment {
                url: url.into(),
                attachment,
            },
        )
    }

    pub fn location(
        user_id: UserId,
        recipient_id: UserId,
        channel_type: ChannelType,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        Self::new(
            user_id,
            recipient_id,
            channel_type,
            ActionKind::Location {
                latitude,
                longitude,
            },
        )
    }

    /// Builds a reply envelope addressed back to the sender of `inbound`.
    pub fn reply_to(inbound: &Action, kind: ActionKind) -> Self {
        Self::new(
            inbound.recipient_id.clone(),
            inbound.user_id.clone(),
            inbound.channel_type.clone(),
            kind,
        )
    }

    /// The sentence text, if this action carries one.
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            ActionKind::Sentence { text, .. } => text.as_deref(),
            _ => None,
        }
    }

    pub fn has_empty_text(&self) -> bool {
        self.text().map(str::trim).unwrap_or_default().is_empty()
    }

    pub fn is_notification(&self) -> bool {
        self.metadata.notification.is_some()
    }
}
