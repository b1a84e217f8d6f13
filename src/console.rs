//! Console transcript sink
//!
//! Consumes the lazy run stream and renders each message as it arrives. The
//! sink is deliberately decoupled from scheduling correctness: a failing
//! writer is logged and skipped, never surfaced to the conversation.

use std::io::Write;

use futures::{pin_mut, Stream, StreamExt};
use tracing::warn;

use crate::items::{ChatMessage, Payload};
use crate::runner::{ChatEvent, ChatRun};

fn truncate_for_render(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    // Back up to a char boundary so multi-byte text never splits.
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = s[..cut].to_string();
    out.push('…');
    out
}

fn format_message(msg: &ChatMessage) -> String {
    let body = match &msg.payload {
        Payload::Text { text } => truncate_for_render(text, 400),
        Payload::ToolCalls { calls } => {
            let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
            format!("[tool calls: {}]", names.join(", "))
        }
        Payload::ToolResult { call_id, result } => {
            format!("[tool result {}] {}", call_id, truncate_for_render(&result.to_string(), 200))
        }
    };
    format!("{:>3} {:<16} | {}", msg.turn, msg.source.to_string(), body)
}

/// Incremental transcript renderer.
pub struct Console;

impl Console {
    /// Drain `stream` into `out`, returning the final run summary.
    ///
    /// Returns `None` only if the stream ended without a `Completed` event,
    /// which a well-formed run stream never does.
    pub async fn render<W: Write>(
        stream: impl Stream<Item = ChatEvent>,
        out: &mut W,
    ) -> Option<ChatRun> {
        pin_mut!(stream);
        let mut run = None;
        while let Some(event) = stream.next().await {
            match event {
                ChatEvent::Message(msg) => {
                    if let Err(err) = writeln!(out, "{}", format_message(&msg)) {
                        warn!(error = %err, "transcript sink write failed; continuing");
                    }
                }
                ChatEvent::Completed(r) => run = Some(r),
            }
        }
        run
    }

    /// Render to standard output.
    pub async fn stdout(stream: impl Stream<Item = ChatEvent>) -> Option<ChatRun> {
        let mut out = std::io::stdout();
        Self::render(stream, &mut out).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::{AgentId, Source};
    use crate::runner::ChatStatus;
    use crate::termination::StopReason;

    fn fake_stream(messages: Vec<ChatMessage>) -> impl Stream<Item = ChatEvent> {
        let run = ChatRun {
            history: messages.clone(),
            turns: messages.len().saturating_sub(1),
            status: ChatStatus::Done(StopReason::UserEnded),
        };
        futures::stream::iter(
            messages
                .into_iter()
                .map(ChatEvent::Message)
                .chain(std::iter::once(ChatEvent::Completed(run))),
        )
    }

    #[tokio::test]
    async fn renders_each_message_and_returns_the_run() {
        let messages = vec![
            ChatMessage::task("Analyze data"),
            ChatMessage::from_agent(AgentId::of("analyst"), Payload::text("done"), 1),
        ];
        let mut out = Vec::new();
        let run = Console::render(fake_stream(messages), &mut out)
            .await
            .unwrap();

        let rendered = String::from_utf8(out).unwrap();
        assert!(rendered.contains("Analyze data"));
        assert!(rendered.contains("analyst/default"));
        assert_eq!(run.history.len(), 2);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "héllo wörld";
        for max in 0..s.len() {
            let t = truncate_for_render(s, max);
            assert!(t.ends_with('…'));
        }
        assert_eq!(truncate_for_render("short", 400), "short");
    }

    #[tokio::test]
    async fn sink_failure_does_not_stop_consumption() {
        struct FailingWriter;
        impl Write for FailingWriter {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("sink closed"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let messages = vec![ChatMessage::task("hi")];
        let run = Console::render(fake_stream(messages), &mut FailingWriter)
            .await
            .unwrap();
        assert_eq!(run.history.len(), 1);
        assert!(matches!(run.history[0].source, Source::User));
    }
}
