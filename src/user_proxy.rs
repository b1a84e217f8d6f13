//! User proxy
//!
//! A participant whose "capability" is the human: its turn blocks on an
//! external input source and replays the line as the reply. This is the one
//! synchronization point where the runtime waits on an external actor rather
//! than an agent handler. EOF on the source is the implicit `UserEnded`
//! termination signal.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tower::BoxError;

use crate::capability::{capability_fn, CapabilitySvc};
use crate::error::ChatError;
use crate::items::Payload;

/// Blocking line-oriented input; `Ok(None)` means EOF.
#[async_trait]
pub trait InputSource: Send {
    async fn read_line(&mut self) -> io::Result<Option<String>>;
}

/// Standard input, line by line.
pub struct StdinSource {
    lines: Lines<BufReader<Stdin>>,
}

impl StdinSource {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InputSource for StdinSource {
    async fn read_line(&mut self) -> io::Result<Option<String>> {
        self.lines.next_line().await
    }
}

/// Pre-scripted input for tests and demos; EOF once the script runs out.
pub struct ScriptedSource {
    lines: VecDeque<String>,
}

impl ScriptedSource {
    pub fn new(lines: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl InputSource for ScriptedSource {
    async fn read_line(&mut self) -> io::Result<Option<String>> {
        Ok(self.lines.pop_front())
    }
}

/// Build the user-proxy capability over `source`.
///
/// Each turn reads one line; EOF surfaces as `ChatError::UserEnded`, which
/// the scheduler maps to a normal `StopReason::UserEnded` stop.
pub fn user_proxy<S>(source: S) -> CapabilitySvc
where
    S: InputSource + 'static,
{
    let source = Arc::new(tokio::sync::Mutex::new(source));
    capability_fn(move |_history| {
        let source = source.clone();
        async move {
            let mut guard = source.lock().await;
            match guard.read_line().await {
                Ok(Some(line)) => Ok(Payload::text(line)),
                Ok(None) => Err(Box::new(ChatError::UserEnded) as BoxError),
                Err(err) => Err(Box::new(ChatError::Io(err)) as BoxError),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{invoke_with_cancel, TurnRequest};
    use crate::items::ChatMessage;
    use tokio_util::sync::CancellationToken;

    fn req() -> TurnRequest {
        TurnRequest {
            history: Arc::new(vec![ChatMessage::task("hello")]),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn replays_scripted_lines_then_signals_eof() {
        let mut proxy = user_proxy(ScriptedSource::new(["first", "second"]));

        let out = invoke_with_cancel(&mut proxy, req()).await.unwrap();
        assert_eq!(out.as_text(), Some("first"));
        let out = invoke_with_cancel(&mut proxy, req()).await.unwrap();
        assert_eq!(out.as_text(), Some("second"));

        let err = invoke_with_cancel(&mut proxy, req()).await.unwrap_err();
        assert!(matches!(
            ChatError::from_box(err),
            Some(ChatError::UserEnded)
        ));
    }
}
