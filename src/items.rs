//! Message and topic model
//!
//! This module defines the addressing primitives and typed message envelopes
//! exchanged between agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Instance key used when only one instance of an agent kind exists.
pub const DEFAULT_AGENT_KEY: &str = "default";

/// Identity of a registered agent: a role class plus an instance key.
///
/// Two identities are equal iff both fields match. Identities are the map key
/// in the registry and the destination of direct deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId {
    /// Role/behavior class, e.g. `"writer"` or `"editor"`.
    pub kind: String,
    /// Disambiguates multiple instances of the same kind.
    pub key: String,
}

impl AgentId {
    pub fn new(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            key: key.into(),
        }
    }

    /// Identity with the well-known default instance key.
    pub fn of(kind: impl Into<String>) -> Self {
        Self::new(kind, DEFAULT_AGENT_KEY)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.key)
    }
}

/// A named broadcast channel for fan-out delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic {
    pub kind: String,
}

impl Topic {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into() }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.kind)
    }
}

/// Origin of a message: the external user or a registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "id")]
pub enum Source {
    User,
    Agent(AgentId),
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::User => f.write_str("user"),
            Source::Agent(id) => write!(f, "{}", id),
        }
    }
}

/// A tool call produced by a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Message content: plain text or structured tool traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Text { text: String },
    ToolCalls { calls: Vec<ToolCall> },
    ToolResult { call_id: String, result: Value },
}

impl Payload {
    pub fn text(text: impl Into<String>) -> Self {
        Payload::Text { text: text.into() }
    }

    /// Raw text content, if this payload carries any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A single envelope in a conversation, immutable once appended to history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub source: Source,
    pub payload: Payload,
    /// Position in the conversation's total order.
    pub turn: u64,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(source: Source, payload: Payload, turn: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            payload,
            turn,
            created_at: Utc::now(),
        }
    }

    /// Seed message carrying the initial task, attributed to the user.
    pub fn task(text: impl Into<String>) -> Self {
        Self::new(Source::User, Payload::text(text), 0)
    }

    pub fn from_agent(id: AgentId, payload: Payload, turn: u64) -> Self {
        Self::new(Source::Agent(id), payload, turn)
    }
}

/// Append-only conversation transcript, totally ordered by turn sequence.
///
/// The runtime driver is the sole owner; capabilities only ever see read-only
/// slices, and appends happen in exactly one place (the scheduler loop).
#[derive(Debug, Default, Clone)]
pub struct History {
    messages: Vec<ChatMessage>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next turn sequence number.
    pub fn next_turn(&self) -> u64 {
        self.messages.len() as u64
    }

    pub fn append(&mut self, message: ChatMessage) {
        debug_assert_eq!(message.turn, self.next_turn());
        self.messages.push(message);
    }

    pub fn as_slice(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn identity_equality_is_fieldwise() {
        let a = AgentId::new("writer", "default");
        let b = AgentId::of("writer");
        assert_eq!(a, b);
        assert_ne!(a, AgentId::new("writer", "backup"));
        assert_ne!(a, AgentId::of("editor"));
    }

    #[test]
    fn payload_text_access() {
        let p = Payload::text("hello");
        assert_eq!(p.as_text(), Some("hello"));

        let tc = Payload::ToolCalls {
            calls: vec![ToolCall {
                id: "c1".to_string(),
                name: "search".to_string(),
                arguments: serde_json::json!({"q": "rust"}),
            }],
        };
        assert_eq!(tc.as_text(), None);
    }

    #[test]
    fn history_orders_by_turn() {
        let mut h = History::new();
        assert_eq!(h.next_turn(), 0);
        h.append(ChatMessage::task("start"));
        h.append(ChatMessage::from_agent(
            AgentId::of("writer"),
            Payload::text("draft"),
            1,
        ));
        assert_eq!(h.len(), 2);
        assert_eq!(h.as_slice()[0].turn, 0);
        assert_eq!(h.last().unwrap().turn, 1);
        assert_eq!(
            h.last().unwrap().source,
            Source::Agent(AgentId::of("writer"))
        );
    }

    #[test]
    fn message_serialization_tags_payload() {
        let msg = ChatMessage::task("Analyze data");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"text\""));
        assert!(json.contains("\"Analyze data\""));

        let back: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.payload.as_text(), Some("Analyze data"));
        assert_eq!(back.turn, 0);
    }
}
