//! Runtime driver
//!
//! [`GroupChat`] wires the registry, router, picker, and termination
//! condition into one conversation loop: seed the history with the task,
//! pick a speaker, deliver the history, append the reply, evaluate
//! termination, repeat until done, aborted, or failed. The growing history is
//! also exposed as a lazy, finite event stream for incremental consumers.

use std::sync::Arc;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capability::CapabilityFactory;
use crate::error::{ChatError, Result};
use crate::items::{AgentId, ChatMessage, History, Topic};
use crate::registry::AgentRegistry;
use crate::router::Router;
use crate::scheduler::{pick_speaker, round_robin, Candidate, PickerSvc, SchedulerState, SelectRequest};
use crate::termination::{BoxedCondition, StopReason};

/// Default turn budget applied when the caller does not set one.
pub const DEFAULT_MAX_TURNS: usize = 100;

/// Terminal outcome of a conversation.
#[derive(Debug)]
pub enum ChatStatus {
    /// The scheduler reached `Done` with a termination reason.
    Done(StopReason),
    /// External cancellation aborted the in-flight turn.
    Aborted,
    /// A capability or protocol failure ended the run; the partial
    /// transcript up to the failure point is preserved.
    Failed(ChatError),
}

/// Final result of a run: the full transcript is always present, whatever
/// the status.
#[derive(Debug)]
pub struct ChatRun {
    pub history: Vec<ChatMessage>,
    /// Replies produced, excluding the seed task message.
    pub turns: usize,
    pub status: ChatStatus,
}

impl ChatRun {
    /// Treat abort/failure as errors, keeping only a natural stop.
    pub fn into_result(self) -> Result<(Vec<ChatMessage>, StopReason)> {
        match self.status {
            ChatStatus::Done(reason) => Ok((self.history, reason)),
            ChatStatus::Aborted => Err(ChatError::Cancelled),
            ChatStatus::Failed(err) => Err(err),
        }
    }
}

/// Items of the lazy run stream: one `Message` per appended history entry
/// (the seed included), then exactly one `Completed`.
#[derive(Debug)]
pub enum ChatEvent {
    Message(ChatMessage),
    Completed(ChatRun),
}

/// Builder for a conversation runtime.
///
/// Participants join the turn order in the order they are added, which is
/// also the round-robin cycle and the candidate order handed to
/// manager-directed pickers.
pub struct GroupChatBuilder {
    registry: AgentRegistry,
    participants: Vec<Candidate>,
    picker: Option<PickerSvc>,
    termination: Option<BoxedCondition>,
    max_turns: usize,
    build_error: Option<ChatError>,
}

impl Default for GroupChatBuilder {
    fn default() -> Self {
        Self {
            registry: AgentRegistry::new(),
            participants: Vec::new(),
            picker: None,
            termination: None,
            max_turns: DEFAULT_MAX_TURNS,
            build_error: None,
        }
    }
}

impl GroupChatBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a turn-taking participant with no topic subscriptions.
    pub fn participant(
        self,
        id: AgentId,
        description: impl Into<String>,
        factory: CapabilityFactory,
    ) -> Self {
        self.participant_on_topics(id, description, vec![], factory)
    }

    /// Add a turn-taking participant subscribed to the given topics.
    pub fn participant_on_topics(
        mut self,
        id: AgentId,
        description: impl Into<String>,
        topics: Vec<Topic>,
        factory: CapabilityFactory,
    ) -> Self {
        let description = description.into();
        if self.build_error.is_none() {
            match self
                .registry
                .register(id.clone(), description.clone(), topics, factory)
            {
                Ok(()) => self.participants.push(Candidate { id, description }),
                Err(err) => self.build_error = Some(err),
            }
        }
        self
    }

    /// Register an agent that never takes a turn but receives topic
    /// fan-outs (and is addressable directly).
    pub fn listener(
        mut self,
        id: AgentId,
        description: impl Into<String>,
        topics: Vec<Topic>,
        factory: CapabilityFactory,
    ) -> Self {
        if self.build_error.is_none() {
            if let Err(err) = self.registry.register(id, description.into(), topics, factory) {
                self.build_error = Some(err);
            }
        }
        self
    }

    /// Speaker policy; defaults to round-robin over the participant order.
    pub fn picker(mut self, picker: PickerSvc) -> Self {
        self.picker = Some(picker);
        self
    }

    pub fn termination(mut self, condition: BoxedCondition) -> Self {
        self.termination = Some(condition);
        self
    }

    /// Turn budget, enforced independently of any termination condition.
    pub fn max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn build(self) -> Result<GroupChat> {
        if let Some(err) = self.build_error {
            return Err(err);
        }
        if self.participants.is_empty() {
            return Err(ChatError::NoParticipants);
        }
        Ok(GroupChat {
            router: Router::new(self.registry),
            participants: Arc::new(self.participants),
            picker: self.picker.unwrap_or_else(round_robin),
            termination: self.termination,
            max_turns: self.max_turns,
            state: SchedulerState::Idle,
        })
    }
}

/// One conversation runtime. Independent instances share no state and may
/// run fully in parallel.
pub struct GroupChat {
    router: Router,
    participants: Arc<Vec<Candidate>>,
    picker: PickerSvc,
    termination: Option<BoxedCondition>,
    max_turns: usize,
    state: SchedulerState,
}

impl std::fmt::Debug for GroupChat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupChat")
            .field("participants", &self.participants)
            .field("max_turns", &self.max_turns)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl GroupChat {
    pub fn builder() -> GroupChatBuilder {
        GroupChatBuilder::new()
    }

    /// Direct access to the router, e.g. for topic fan-outs outside the
    /// turn loop.
    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Run to completion with an internally-owned cancellation token.
    pub async fn run(&mut self, task: impl Into<String>) -> ChatRun {
        self.run_with_cancel(task, CancellationToken::new()).await
    }

    /// Run to completion; canceling `cancel` aborts the in-flight turn
    /// promptly and yields `ChatStatus::Aborted`.
    pub async fn run_with_cancel(
        &mut self,
        task: impl Into<String>,
        cancel: CancellationToken,
    ) -> ChatRun {
        self.drive(task.into(), cancel, None).await
    }

    /// Lazy event stream over a run: one `ChatEvent::Message` per appended
    /// message as it happens, then exactly one `ChatEvent::Completed`. The
    /// stream is finite and ends when the scheduler reaches `Done` (or the
    /// run aborts/fails).
    pub fn run_stream(
        &mut self,
        task: impl Into<String>,
    ) -> impl Stream<Item = ChatEvent> + '_ {
        self.run_stream_with_cancel(task, CancellationToken::new())
    }

    pub fn run_stream_with_cancel(
        &mut self,
        task: impl Into<String>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = ChatEvent> + '_ {
        let task = task.into();
        async_stream::stream! {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let drive = self.drive(task, cancel, Some(tx));
            tokio::pin!(drive);

            let run = loop {
                tokio::select! {
                    biased;
                    run = &mut drive => break run,
                    maybe = rx.recv() => {
                        // `None` is unreachable while the drive future (and
                        // its sender) is still pending.
                        if let Some(msg) = maybe {
                            yield ChatEvent::Message(msg);
                        }
                    }
                }
            };
            // Flush messages appended since the receiver was last polled,
            // so every Message event precedes the final Completed.
            while let Ok(msg) = rx.try_recv() {
                yield ChatEvent::Message(msg);
            }
            yield ChatEvent::Completed(run);
        }
    }

    async fn drive(
        &mut self,
        task: String,
        cancel: CancellationToken,
        events: Option<mpsc::UnboundedSender<ChatMessage>>,
    ) -> ChatRun {
        let emit = |msg: &ChatMessage| {
            if let Some(tx) = &events {
                // A gone consumer must not affect the conversation.
                let _ = tx.send(msg.clone());
            }
        };

        // Reusing a runtime after a stop requires the condition's latch to
        // be cleared; the driver is the one caller, so it resets here.
        if let Some(cond) = &mut self.termination {
            cond.reset();
        }

        let mut history = History::new();
        let seed = ChatMessage::task(task);
        emit(&seed);
        history.append(seed);

        info!(
            participants = self.participants.len(),
            max_turns = self.max_turns,
            "starting conversation"
        );

        let mut turns = 0usize;
        let status = loop {
            if turns >= self.max_turns {
                info!(turns, "turn budget exhausted");
                break ChatStatus::Done(StopReason::MaxTurnsExceeded {
                    max_turns: self.max_turns,
                });
            }

            self.state = SchedulerState::AwaitingTurn;
            let snapshot = Arc::new(history.as_slice().to_vec());
            let select = SelectRequest {
                history: snapshot.clone(),
                candidates: self.participants.clone(),
            };
            let speaker = tokio::select! {
                biased;
                _ = cancel.cancelled() => break ChatStatus::Aborted,
                picked = pick_speaker(&mut self.picker, select) => match picked {
                    Ok(id) => id,
                    Err(err) => {
                        let failure = match err.downcast::<ChatError>() {
                            Ok(known) => *known,
                            Err(raw) => ChatError::SelectorFailure {
                                message: raw.to_string(),
                            },
                        };
                        warn!(error = %failure, "speaker selection failed");
                        break ChatStatus::Failed(failure);
                    }
                },
            };
            debug!(speaker = %speaker, turn = history.next_turn(), "speaker picked");

            match self.router.deliver_direct(&speaker, snapshot, &cancel).await {
                Ok(payload) => {
                    let msg = ChatMessage::from_agent(speaker, payload, history.next_turn());
                    emit(&msg);
                    history.append(msg);
                    turns += 1;

                    self.state = SchedulerState::Evaluating;
                    let newest = history.last().expect("just appended").clone();
                    if let Some(cond) = &mut self.termination {
                        if let Some(reason) = cond.check(&newest, history.as_slice()) {
                            info!(%reason, turns, "termination condition fired");
                            break ChatStatus::Done(reason);
                        }
                    }
                }
                Err(ChatError::Cancelled) => {
                    info!(turns, "run aborted by cancellation");
                    break ChatStatus::Aborted;
                }
                Err(ChatError::UserEnded) => {
                    info!(turns, "user input ended the conversation");
                    break ChatStatus::Done(StopReason::UserEnded);
                }
                Err(err) => {
                    warn!(error = %err, turns, "turn failed");
                    break ChatStatus::Failed(err);
                }
            }
        };

        self.state = SchedulerState::Done;
        ChatRun {
            history: history.into_messages(),
            turns,
            status,
        }
    }
}
