//! The opaque capability boundary
//!
//! Every agent wraps a decision procedure the runtime never inspects: given
//! the conversation so far, produce one reply. The boundary is modeled as a
//! Tower service so arbitrary behaviors (model calls, tool invocations,
//! scripted fakes) plug in behind one interface, with no inheritance
//! hierarchy.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tower::util::BoxService;
use tower::{BoxError, Service};

use crate::items::{ChatMessage, Payload};

/// One turn's worth of input to a capability: the full history (the newest
/// message last) and the run-scoped cancellation token.
///
/// The token is also raced by the router, so a capability that ignores it is
/// still aborted promptly; honoring it merely lets the capability release
/// resources early.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub history: Arc<Vec<ChatMessage>>,
    pub cancel: CancellationToken,
}

/// Boxed capability service type: `Act(history) -> Payload`.
pub type CapabilitySvc = BoxService<TurnRequest, Payload, BoxError>;

/// Factory invoked lazily by the registry, exactly once per identity.
pub type CapabilityFactory = Box<dyn Fn() -> CapabilitySvc + Send + Sync>;

/// Create a capability from an async handler over the history.
pub fn capability_fn<H, Fut>(handler: H) -> CapabilitySvc
where
    H: FnMut(Arc<Vec<ChatMessage>>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<Payload, BoxError>> + Send + 'static,
{
    let mut handler = handler;
    BoxService::new(tower::service_fn(move |req: TurnRequest| {
        handler(req.history)
    }))
}

/// DX sugar: a capability that replies with plain text derived from the
/// newest message's text content.
pub fn text_capability<H>(handler: H) -> CapabilitySvc
where
    H: Fn(&str) -> String + Send + Sync + 'static,
{
    let handler = Arc::new(handler);
    capability_fn(move |history: Arc<Vec<ChatMessage>>| {
        let handler = handler.clone();
        async move {
            let newest = history
                .last()
                .and_then(|m| m.payload.as_text())
                .unwrap_or_default();
            Ok(Payload::text(handler(newest)))
        }
    })
}

/// Fixed-reply capability; handy for tests and wiring demos.
pub fn fixed_capability(reply: impl Into<String>) -> CapabilitySvc {
    let reply = reply.into();
    capability_fn(move |_history| {
        let reply = reply.clone();
        async move { Ok(Payload::text(reply)) }
    })
}

/// Capability that always fails; the failure is surfaced as a
/// `CapabilityFailure` for the owning agent.
pub fn failing_capability(message: impl Into<String>) -> CapabilitySvc {
    let message = message.into();
    capability_fn(move |_history| {
        let message = message.clone();
        async move { Err::<Payload, BoxError>(message.into()) }
    })
}

/// Helper for capabilities that resolve mid-conversation: the full history
/// arrives on their first turn, so replay needs no extra machinery. This
/// wrapper makes the contract visible by handing the handler an explicit
/// `(replayed, newest)` split.
pub fn replay_aware_capability<H, Fut>(handler: H) -> CapabilitySvc
where
    H: Fn(Vec<ChatMessage>, Option<ChatMessage>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Payload, BoxError>> + Send + 'static,
{
    let handler = Arc::new(handler);
    capability_fn(move |history: Arc<Vec<ChatMessage>>| {
        let handler = handler.clone();
        async move {
            let mut replayed: Vec<ChatMessage> = (*history).clone();
            let newest = replayed.pop();
            handler(replayed, newest).await
        }
    })
}

/// Invoke a capability future under a cancellation token.
///
/// Races the act future against the token; cancellation wins promptly and the
/// partially-produced reply is dropped, never committed.
pub async fn invoke_with_cancel(
    svc: &mut CapabilitySvc,
    req: TurnRequest,
) -> Result<Payload, BoxError> {
    use tower::ServiceExt;

    let cancel = req.cancel.clone();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Box::new(crate::error::ChatError::Cancelled) as BoxError),
        out = async { ServiceExt::ready(&mut *svc).await?.call(req).await } => out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;
    use crate::items::{AgentId, ChatMessage};
    use std::time::Duration;

    fn history_of(texts: &[&str]) -> Arc<Vec<ChatMessage>> {
        let mut h = Vec::new();
        for (i, t) in texts.iter().enumerate() {
            h.push(ChatMessage::from_agent(
                AgentId::of("peer"),
                Payload::text(*t),
                i as u64,
            ));
        }
        Arc::new(h)
    }

    #[tokio::test]
    async fn text_capability_sees_newest_message() {
        let mut cap = text_capability(|newest| format!("echo: {}", newest));
        let req = TurnRequest {
            history: history_of(&["first", "second"]),
            cancel: CancellationToken::new(),
        };
        let out = invoke_with_cancel(&mut cap, req).await.unwrap();
        assert_eq!(out.as_text(), Some("echo: second"));
    }

    #[tokio::test]
    async fn cancellation_beats_a_slow_act() {
        let mut cap = capability_fn(|_h| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Payload::text("too late"))
        });
        let cancel = CancellationToken::new();
        let req = TurnRequest {
            history: history_of(&["go"]),
            cancel: cancel.clone(),
        };
        cancel.cancel();
        let err = invoke_with_cancel(&mut cap, req).await.unwrap_err();
        assert!(matches!(
            ChatError::from_box(err),
            Some(ChatError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn replay_split_hands_over_prior_turns() {
        let mut cap = replay_aware_capability(|replayed, newest| async move {
            Ok(Payload::text(format!(
                "{} prior, newest={}",
                replayed.len(),
                newest.and_then(|m| m.payload.as_text().map(String::from)).unwrap_or_default()
            )))
        });
        let req = TurnRequest {
            history: history_of(&["a", "b", "c"]),
            cancel: CancellationToken::new(),
        };
        let out = invoke_with_cancel(&mut cap, req).await.unwrap();
        assert_eq!(out.as_text(), Some("2 prior, newest=c"));
    }
}
