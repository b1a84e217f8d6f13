//! Termination conditions
//!
//! Pluggable predicates evaluated after every turn to decide whether the
//! conversation has reached a natural end. Conditions latch: once one has
//! signaled stop it keeps signaling stop until explicitly `reset`, so a
//! finished conversation can never silently resume.

use std::fmt;

use crate::items::ChatMessage;

/// Why a conversation stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// A configured substring appeared in the newest message's text.
    TextMention { needle: String },
    /// The turn budget was reached; a normal stop, not an error.
    MaxTurnsExceeded { max_turns: usize },
    /// The external input source behind the user proxy reached EOF.
    UserEnded,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::TextMention { needle } => write!(f, "text mention: {needle:?}"),
            StopReason::MaxTurnsExceeded { max_turns } => {
                write!(f, "maximum turns exceeded: {max_turns}")
            }
            StopReason::UserEnded => f.write_str("user ended the conversation"),
        }
    }
}

/// Predicate over `(newest message, history so far)`.
///
/// Invariant: after `check` has returned `Some`, it returns that same verdict
/// on every subsequent call until `reset`.
pub trait TerminationCondition: Send {
    fn check(&mut self, newest: &ChatMessage, history: &[ChatMessage]) -> Option<StopReason>;

    /// Clear the latch (and any accumulated state) for reuse.
    fn reset(&mut self);

    /// Whether this condition has already signaled stop.
    fn is_terminated(&self) -> bool;
}

pub type BoxedCondition = Box<dyn TerminationCondition>;

/// Stops when a configured exact substring appears in the newest message's
/// text content. Case-sensitive, raw substring search, no trimming; non-text
/// payloads never match.
pub struct TextMention {
    needle: String,
    fired: Option<StopReason>,
}

impl TextMention {
    pub fn new(needle: impl Into<String>) -> Self {
        Self {
            needle: needle.into(),
            fired: None,
        }
    }
}

impl TerminationCondition for TextMention {
    fn check(&mut self, newest: &ChatMessage, _history: &[ChatMessage]) -> Option<StopReason> {
        if self.fired.is_none() {
            if let Some(text) = newest.payload.as_text() {
                if text.contains(&self.needle) {
                    self.fired = Some(StopReason::TextMention {
                        needle: self.needle.clone(),
                    });
                }
            }
        }
        self.fired.clone()
    }

    fn reset(&mut self) {
        self.fired = None;
    }

    fn is_terminated(&self) -> bool {
        self.fired.is_some()
    }
}

/// Stops after `max_turns` evaluated replies. The scheduler enforces its own
/// budget independently; this standalone form exists for composition.
pub struct MaxTurns {
    max_turns: usize,
    seen: usize,
    fired: Option<StopReason>,
}

impl MaxTurns {
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns,
            seen: 0,
            fired: None,
        }
    }
}

impl TerminationCondition for MaxTurns {
    fn check(&mut self, _newest: &ChatMessage, _history: &[ChatMessage]) -> Option<StopReason> {
        if self.fired.is_none() {
            self.seen += 1;
            if self.seen >= self.max_turns {
                self.fired = Some(StopReason::MaxTurnsExceeded {
                    max_turns: self.max_turns,
                });
            }
        }
        self.fired.clone()
    }

    fn reset(&mut self) {
        self.seen = 0;
        self.fired = None;
    }

    fn is_terminated(&self) -> bool {
        self.fired.is_some()
    }
}

enum CompositeMode {
    /// Stop when any child stops.
    Any,
    /// Stop once every child has stopped.
    All,
}

/// Logical combination of conditions, short-circuiting on the first deciding
/// sub-condition in declaration order: for `any`, the first child to stop
/// decides; for `all`, the first still-continuing child decides.
pub struct Composite {
    mode: CompositeMode,
    children: Vec<BoxedCondition>,
    fired: Option<StopReason>,
}

/// Stop when any of `children` stops (logical OR).
pub fn any(children: Vec<BoxedCondition>) -> Composite {
    Composite {
        mode: CompositeMode::Any,
        children,
        fired: None,
    }
}

/// Stop once all of `children` have stopped (logical AND). Children latch, so
/// earlier fires are remembered across turns.
pub fn all(children: Vec<BoxedCondition>) -> Composite {
    Composite {
        mode: CompositeMode::All,
        children,
        fired: None,
    }
}

impl TerminationCondition for Composite {
    fn check(&mut self, newest: &ChatMessage, history: &[ChatMessage]) -> Option<StopReason> {
        if self.fired.is_some() {
            return self.fired.clone();
        }
        match self.mode {
            CompositeMode::Any => {
                for child in &mut self.children {
                    if let Some(reason) = child.check(newest, history) {
                        self.fired = Some(reason);
                        break;
                    }
                }
            }
            CompositeMode::All => {
                let mut last_reason = None;
                for child in &mut self.children {
                    if child.is_terminated() {
                        continue;
                    }
                    match child.check(newest, history) {
                        Some(reason) => last_reason = Some(reason),
                        // First undecided child decides: keep going.
                        None => return None,
                    }
                }
                // Every child has fired; report the final deciding reason.
                self.fired = last_reason.or_else(|| {
                    self.children
                        .last_mut()
                        .and_then(|c| c.check(newest, history))
                });
            }
        }
        self.fired.clone()
    }

    fn reset(&mut self) {
        for child in &mut self.children {
            child.reset();
        }
        self.fired = None;
    }

    fn is_terminated(&self) -> bool {
        self.fired.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::{AgentId, Payload};

    fn reply(text: &str, turn: u64) -> ChatMessage {
        ChatMessage::from_agent(AgentId::of("agent"), Payload::text(text), turn)
    }

    #[test]
    fn text_mention_is_exact_substring_case_sensitive() {
        let mut cond = TextMention::new("APPROVE");
        assert!(cond.check(&reply("please APPROVE this", 1), &[]).is_some());

        let mut cond = TextMention::new("APPROVE");
        assert!(cond.check(&reply("APPROVED", 1), &[]).is_some());

        let mut cond = TextMention::new("APPROVE");
        assert!(cond.check(&reply("approve", 1), &[]).is_none());
        assert!(cond.check(&reply("still working", 2), &[]).is_none());
    }

    #[test]
    fn text_mention_ignores_non_text_payloads() {
        let mut cond = TextMention::new("APPROVE");
        let msg = ChatMessage::from_agent(
            AgentId::of("agent"),
            Payload::ToolResult {
                call_id: "c1".to_string(),
                result: serde_json::json!({"note": "APPROVE"}),
            },
            1,
        );
        assert!(cond.check(&msg, &[]).is_none());
    }

    #[test]
    fn conditions_latch_until_reset() {
        let mut cond = TextMention::new("DONE");
        assert!(cond.check(&reply("DONE", 1), &[]).is_some());
        assert!(cond.is_terminated());
        // Still stopped, even for a message without the needle.
        assert!(cond.check(&reply("more work", 2), &[]).is_some());

        cond.reset();
        assert!(!cond.is_terminated());
        assert!(cond.check(&reply("fresh start", 3), &[]).is_none());
    }

    #[test]
    fn max_turns_counts_evaluated_replies() {
        let mut cond = MaxTurns::new(3);
        assert!(cond.check(&reply("a", 1), &[]).is_none());
        assert!(cond.check(&reply("b", 2), &[]).is_none());
        let reason = cond.check(&reply("c", 3), &[]).unwrap();
        assert_eq!(reason, StopReason::MaxTurnsExceeded { max_turns: 3 });

        cond.reset();
        assert!(cond.check(&reply("d", 4), &[]).is_none());
    }

    #[test]
    fn any_stops_on_first_deciding_child() {
        let mut cond = any(vec![
            Box::new(TextMention::new("APPROVE")),
            Box::new(MaxTurns::new(2)),
        ]);
        assert!(cond.check(&reply("thinking", 1), &[]).is_none());
        let reason = cond.check(&reply("more thinking", 2), &[]).unwrap();
        assert_eq!(reason, StopReason::MaxTurnsExceeded { max_turns: 2 });
    }

    #[test]
    fn all_waits_for_every_child() {
        let mut cond = all(vec![
            Box::new(TextMention::new("APPROVE")),
            Box::new(MaxTurns::new(2)),
        ]);
        // Mention fires on turn 1 and is remembered; MaxTurns still continues.
        assert!(cond.check(&reply("APPROVE", 1), &[]).is_none());
        // Turn 2: MaxTurns reaches its budget, so every child has now fired.
        let verdict = cond.check(&reply("wrap up", 2), &[]);
        assert!(verdict.is_some());
        assert!(cond.is_terminated());
    }
}
