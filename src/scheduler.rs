//! Turn scheduling
//!
//! Orders participants and picks the next speaker one turn at a time. Two
//! policies are provided: a fixed cyclic round-robin and a manager-directed
//! picker where a distinguished selector is consulted with the history and
//! the static candidate list. Pickers are Tower services so custom policies
//! plug in at the same seam.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tower::util::BoxService;
use tower::{BoxError, Service, ServiceExt};

use crate::error::ChatError;
use crate::items::{AgentId, ChatMessage};

/// Scheduler states, driven by the runtime loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    /// A speaker has been picked and its capability invocation is pending.
    AwaitingTurn,
    /// The newest reply is being evaluated by the termination condition.
    Evaluating,
    Done,
}

/// A participant as seen by a manager-directed selector.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub id: AgentId,
    pub description: String,
}

/// Input to a speaker picker: the history so far and the static candidate
/// list (registration order).
#[derive(Debug, Clone)]
pub struct SelectRequest {
    pub history: Arc<Vec<ChatMessage>>,
    pub candidates: Arc<Vec<Candidate>>,
}

/// Boxed speaker picker service.
pub type PickerSvc = BoxService<SelectRequest, AgentId, BoxError>;

pub trait SpeakerPicker: Service<SelectRequest, Response = AgentId, Error = BoxError> {}
impl<T> SpeakerPicker for T where T: Service<SelectRequest, Response = AgentId, Error = BoxError> {}

/// Build a picker from an async closure.
pub fn picker_fn<F, Fut>(f: F) -> PickerSvc
where
    F: FnMut(SelectRequest) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<AgentId, BoxError>> + Send + 'static,
{
    BoxService::new(tower::service_fn(f))
}

/// Fixed cyclic ordering over the candidate list.
///
/// The order is the registration order of the participants; the first call
/// picks `candidates[0]`, then `candidates[(last + 1) % N]` thereafter. The
/// picker carries its own cursor so the conversation loop stays stateless
/// about speaker order.
pub fn round_robin() -> PickerSvc {
    let cursor = Arc::new(AtomicUsize::new(0));
    picker_fn(move |req: SelectRequest| {
        let cursor = cursor.clone();
        async move {
            if req.candidates.is_empty() {
                return Err("round-robin picker needs at least one candidate".into());
            }
            let idx = cursor.fetch_add(1, Ordering::SeqCst) % req.candidates.len();
            Ok(req.candidates[idx].id.clone())
        }
    })
}

/// Manager-directed selection: a distinguished selector is consulted each
/// turn with the history and the static candidate list, and names the next
/// speaker.
///
/// The returned name is resolved against the candidates by `kind` (or the
/// full `kind/key` form); a name outside the participant set is a fatal
/// `InvalidSelection`, never retried.
pub fn manager_directed<F, Fut>(mut select: F) -> PickerSvc
where
    F: FnMut(SelectRequest) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<String, BoxError>> + Send + 'static,
{
    BoxService::new(tower::service_fn(move |req: SelectRequest| {
        let candidates = req.candidates.clone();
        let fut = select(req);
        async move {
            let name = fut.await?;
            candidates
                .iter()
                .find(|c| c.id.kind == name || c.id.to_string() == name)
                .map(|c| c.id.clone())
                .ok_or_else(|| {
                    Box::new(ChatError::InvalidSelection { selected: name }) as BoxError
                })
        }
    }))
}

/// Consult `picker` and enforce that the selection is one of the registered
/// candidates; an out-of-set pick is a fatal protocol error, never retried.
pub async fn pick_speaker(
    picker: &mut PickerSvc,
    req: SelectRequest,
) -> Result<AgentId, BoxError> {
    let candidates = req.candidates.clone();
    let picked = ServiceExt::ready(&mut *picker).await?.call(req).await?;
    if candidates.iter().any(|c| c.id == picked) {
        Ok(picked)
    } else {
        Err(Box::new(ChatError::InvalidSelection {
            selected: picked.to_string(),
        }))
    }
}
