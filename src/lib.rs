//! # Multi-Agent Conversation Orchestration for Rust
//!
//! A Tower-based runtime for turn-structured conversations between
//! independently-addressable agents. Agents wrap opaque decision procedures
//! (model calls, tools, humans); the runtime registers them, routes messages,
//! orders their turns, and decides when the conversation is over.
//!
//! ## Core Concepts
//!
//! - **Agent**: an [`AgentId`] backed by a capability, a Tower service from
//!   the conversation history to one reply
//! - **Registry**: lazy, memoized construction of one handler per identity
//! - **Router**: direct delivery plus best-effort topic fan-out, with at most
//!   one invocation in flight per conversation
//! - **Scheduler**: round-robin or manager-directed speaker selection
//! - **Termination**: latched, composable stop conditions evaluated after
//!   every turn
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use tower_agentchat::{
//!     text_capability, AgentId, Console, GroupChat, TextMention,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let mut chat = GroupChat::builder()
//!     .participant(
//!         AgentId::of("writer"),
//!         "Drafts the content.",
//!         Box::new(|| text_capability(|task| format!("Draft for: {task}"))),
//!     )
//!     .participant(
//!         AgentId::of("editor"),
//!         "Reviews and approves drafts.",
//!         Box::new(|| text_capability(|_| "APPROVE".to_string())),
//!     )
//!     .termination(Box::new(TextMention::new("APPROVE")))
//!     .max_turns(10)
//!     .build()?;
//!
//! let run = Console::stdout(chat.run_stream("Write a haiku about Rust")).await;
//! println!("{:?}", run.map(|r| r.status));
//! # Ok(())
//! # }
//! ```

pub mod capability;
pub mod console;
pub mod error;
pub mod items;
pub mod registry;
pub mod router;
pub mod runner;
pub mod scheduler;
pub mod termination;
pub mod user_proxy;

pub use capability::{
    capability_fn, failing_capability, fixed_capability, invoke_with_cancel,
    replay_aware_capability, text_capability, CapabilityFactory, CapabilitySvc, TurnRequest,
};
pub use console::Console;
pub use error::{ChatError, Result};
pub use items::{
    AgentId, ChatMessage, History, Payload, Source, ToolCall, Topic, DEFAULT_AGENT_KEY,
};
pub use registry::AgentRegistry;
pub use router::{FanoutOutcome, Router};
pub use runner::{
    ChatEvent, ChatRun, ChatStatus, GroupChat, GroupChatBuilder, DEFAULT_MAX_TURNS,
};
pub use scheduler::{
    manager_directed, picker_fn, pick_speaker, round_robin, Candidate, PickerSvc, SchedulerState,
    SelectRequest, SpeakerPicker,
};
pub use termination::{
    all, any, BoxedCondition, Composite, MaxTurns, StopReason, TerminationCondition, TextMention,
};
pub use user_proxy::{user_proxy, InputSource, ScriptedSource, StdinSource};

// Re-export the cancellation token and Tower traits users touch directly.
pub use tokio_util::sync::CancellationToken;
pub use tower::{BoxError, Service, ServiceExt};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_imports() {
        // Verify that the public surface compiles together.
        let _ = std::mem::size_of::<ChatError>();
        let _ = AgentId::of("smoke");
    }
}
