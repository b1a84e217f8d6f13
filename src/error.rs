//! Error types for the orchestration runtime

use crate::items::AgentId;
use thiserror::Error;

/// Result type alias for the runtime.
pub type Result<T> = std::result::Result<T, ChatError>;

/// Main error type for the runtime.
///
/// `MaxTurnsExceeded` is deliberately absent: exhausting the turn budget is a
/// normal termination reason (`StopReason::MaxTurnsExceeded`), not a failure.
#[derive(Debug, Error)]
pub enum ChatError {
    /// An identity was registered twice in the same runtime
    #[error("duplicate agent identity: {0}")]
    DuplicateIdentity(AgentId),

    /// Delivery or resolution targeted an unregistered identity
    #[error("unknown agent: {0}")]
    UnknownAgent(AgentId),

    /// The opaque capability behind an agent failed to produce a reply
    #[error("capability failure for {agent}: {message}")]
    CapabilityFailure { agent: AgentId, message: String },

    /// The run-scoped cancellation token fired during an in-flight turn
    #[error("turn cancelled")]
    Cancelled,

    /// A manager-directed selector picked an identity outside the
    /// participant set; fatal protocol error, never retried
    #[error("invalid speaker selection: {selected}")]
    InvalidSelection { selected: String },

    /// The speaker picker itself failed to produce a selection
    #[error("speaker selection failed: {message}")]
    SelectorFailure { message: String },

    /// A conversation was configured with no participants
    #[error("no participants configured")]
    NoParticipants,

    /// The external input source behind the user proxy reached EOF
    #[error("user input ended")]
    UserEnded,

    /// One or more subscribers failed during a topic fan-out; delivery to
    /// the remaining subscribers still happened
    #[error("fan-out delivery failed for {}", format_failed(.failed))]
    FanoutFailure { failed: Vec<AgentId> },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_failed(failed: &[AgentId]) -> String {
    failed
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ChatError {
    /// Recover a `ChatError` carried through a `tower::BoxError` channel.
    ///
    /// Capability services use `BoxError`; the scheduler needs to tell
    /// cancellation and user-EOF apart from plain capability failure.
    pub fn from_box(err: tower::BoxError) -> Option<ChatError> {
        err.downcast::<ChatError>().ok().map(|e| *e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_identity() {
        let err = ChatError::UnknownAgent(AgentId::of("writer"));
        assert_eq!(err.to_string(), "unknown agent: writer/default");

        let err = ChatError::InvalidSelection {
            selected: "ghost/default".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid speaker selection: ghost/default"
        );
    }

    #[test]
    fn fanout_lists_all_failed() {
        let err = ChatError::FanoutFailure {
            failed: vec![AgentId::of("a"), AgentId::of("b")],
        };
        let s = err.to_string();
        assert!(s.contains("a/default"));
        assert!(s.contains("b/default"));
    }

    #[test]
    fn roundtrips_through_box_error() {
        let boxed: tower::BoxError = Box::new(ChatError::Cancelled);
        assert!(matches!(
            ChatError::from_box(boxed),
            Some(ChatError::Cancelled)
        ));

        let foreign: tower::BoxError = "some other failure".into();
        assert!(ChatError::from_box(foreign).is_none());
    }
}
