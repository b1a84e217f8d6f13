//! Message router
//!
//! Delivers envelopes either to one addressed agent (`deliver_direct`) or to
//! every subscriber of a topic (`publish`). The router owns the concurrency
//! discipline: within one conversation at most one handler invocation is in
//! flight at a time, so replies are always meaningful relative to the history
//! snapshot taken at dispatch time. Fan-out is deterministic sequential in
//! subscription-registration order.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::capability::{invoke_with_cancel, TurnRequest};
use crate::error::{ChatError, Result};
use crate::items::{AgentId, ChatMessage, History, Payload, Source, Topic};
use crate::registry::AgentRegistry;

/// Result of a best-effort topic fan-out: replies from surviving subscribers
/// plus the failures collected along the way.
#[derive(Debug, Default)]
pub struct FanoutOutcome {
    pub replies: Vec<(AgentId, Payload)>,
    pub failures: Vec<(AgentId, ChatError)>,
}

impl FanoutOutcome {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Collapse into a single aggregated error listing the failed identities,
    /// discarding nothing the caller hasn't already consumed.
    pub fn into_result(self) -> Result<Vec<(AgentId, Payload)>> {
        if self.failures.is_empty() {
            Ok(self.replies)
        } else {
            Err(ChatError::FanoutFailure {
                failed: self.failures.into_iter().map(|(id, _)| id).collect(),
            })
        }
    }
}

/// Router over a per-runtime registry.
pub struct Router {
    registry: AgentRegistry,
}

impl Router {
    pub fn new(registry: AgentRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut AgentRegistry {
        &mut self.registry
    }

    /// Invoke the resolved handler's capability with the given history
    /// snapshot, under the run-scoped cancellation token.
    ///
    /// Failures are mapped onto the runtime taxonomy: a fired token yields
    /// `Cancelled`, a user-proxy EOF yields `UserEnded`, anything else is a
    /// `CapabilityFailure` attributed to `id`.
    pub async fn deliver_direct(
        &mut self,
        id: &AgentId,
        history: Arc<Vec<ChatMessage>>,
        cancel: &CancellationToken,
    ) -> Result<Payload> {
        let handler = self.registry.resolve(id)?;
        debug!(agent = %id, turn = history.len(), "dispatching turn");
        let req = TurnRequest {
            history,
            cancel: cancel.clone(),
        };
        match invoke_with_cancel(handler, req).await {
            Ok(payload) => Ok(payload),
            Err(err) => match err.downcast::<ChatError>() {
                Ok(known) => match *known {
                    ChatError::Cancelled => Err(ChatError::Cancelled),
                    ChatError::UserEnded => Err(ChatError::UserEnded),
                    other => Err(ChatError::CapabilityFailure {
                        agent: id.clone(),
                        message: other.to_string(),
                    }),
                },
                Err(raw) => Err(ChatError::CapabilityFailure {
                    agent: id.clone(),
                    message: raw.to_string(),
                }),
            },
        }
    }

    /// Broadcast one message to every subscriber of `topic`, sequentially,
    /// in subscription-registration order.
    ///
    /// The published message is appended to `history` exactly once, before
    /// any delivery; every subscriber then sees the same snapshot with the
    /// broadcast as the newest entry. Survivor replies are appended after
    /// the round, in delivery order.
    ///
    /// A subscriber failure is collected, not fatal to the others; the caller
    /// gets replies from the survivors plus the failed identities.
    /// Cancellation is the one fatal case: it aborts the remaining fan-out
    /// and commits no replies (the broadcast itself stays appended).
    pub async fn publish(
        &mut self,
        topic: &Topic,
        source: Source,
        payload: Payload,
        history: &mut History,
        cancel: &CancellationToken,
    ) -> Result<FanoutOutcome> {
        let subscribers = self.registry.subscribers(topic);
        debug!(topic = %topic, count = subscribers.len(), "publishing to topic");

        history.append(ChatMessage::new(source, payload, history.next_turn()));
        let snapshot = Arc::new(history.as_slice().to_vec());

        let mut outcome = FanoutOutcome::default();
        for id in subscribers {
            match self.deliver_direct(&id, snapshot.clone(), cancel).await {
                Ok(payload) => outcome.replies.push((id, payload)),
                Err(ChatError::Cancelled) => return Err(ChatError::Cancelled),
                Err(err) => {
                    warn!(agent = %id, error = %err, "subscriber failed during fan-out");
                    outcome.failures.push((id, err));
                }
            }
        }
        for (id, payload) in &outcome.replies {
            history.append(ChatMessage::from_agent(
                id.clone(),
                payload.clone(),
                history.next_turn(),
            ));
        }
        Ok(outcome)
    }
}
