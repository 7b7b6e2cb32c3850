use std::io::Write;

use anyhow::{Context, Result};
use assistant_backend::agent::AgentEvent;
use assistant_backend::assistant::Assistant;
use assistant_backend::runtime::AssistantRuntime;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

const WELCOME: &str = "Welcome to the AI Assistant. Type 'exit' to end the conversation.";

/// Interactive terminal chat on stdin/stdout.
pub async fn run(runtime: AssistantRuntime) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    chat_loop(
        &runtime.assistant,
        Some(&runtime.events),
        stdin,
        std::io::stdout(),
    )
    .await
}

fn describe_event(event: &AgentEvent) -> Option<String> {
    match event {
        AgentEvent::ToolCalled {
            tool_name,
            arguments,
            ..
        } => Some(format!("[tool] {}({})", tool_name, arguments)),
        AgentEvent::RetryScheduled {
            attempt, delay_ms, ..
        } => Some(format!(
            "[retry] attempt {} in {:.1}s",
            attempt,
            *delay_ms as f64 / 1000.0
        )),
        AgentEvent::Error { .. } => None,
    }
}

/// Echo what the agent did for this turn, ahead of its reply.
fn write_turn_events<W: Write>(
    events: &flume::Receiver<AgentEvent>,
    session_id: &str,
    out: &mut W,
) -> Result<()> {
    for event in events.drain() {
        if event.session_id() != session_id {
            continue;
        }
        if let Some(line) = describe_event(&event) {
            writeln!(out, "{}", line)?;
        }
    }
    Ok(())
}

async fn chat_loop<R, W>(
    assistant: &Assistant,
    events: Option<&flume::Receiver<AgentEvent>>,
    reader: R,
    mut out: W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut history = assistant.new_history();
    let mut lines = reader.lines();

    writeln!(out, "{}", WELCOME)?;
    loop {
        write!(out, "You: ")?;
        out.flush()?;

        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            writeln!(out)?;
            break;
        };
        let input = line.trim();
        if input.eq_ignore_ascii_case("exit") {
            writeln!(out, "Goodbye!")?;
            break;
        }
        if input.is_empty() {
            continue;
        }

        tracing::debug!("User input: {}", input);
        let reply = assistant.chat(input, &mut history).await;
        if let Some(events) = events {
            write_turn_events(events, history.session_id(), &mut out)?;
        }
        writeln!(out, "AI: {}", reply)?;
    }
    Ok(())
}
