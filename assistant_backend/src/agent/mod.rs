pub mod history;
pub mod prompt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub use history::{ConversationHistory, Role, Turn};

/// Something that can turn a user input plus prior turns into a reply.
///
/// The production implementation is the tool-calling loop in
/// [`crate::tools::agentic::ToolCallingAgent`]; tests swap in scripted fakes.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// `chat_history` excludes the system turn and the current input.
    /// `session_id` attributes any tool calls and events to the conversation.
    async fn invoke(&self, session_id: &str, input: &str, chat_history: &[Turn])
        -> Result<String>;
}

/// Events surfaced to front-ends while a turn is in flight.
///
/// Every event names the session it belongs to; consumers must filter on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    ToolCalled {
        session_id: String,
        tool_name: String,
        arguments: serde_json::Value,
        output_preview: String,
    },
    RetryScheduled {
        session_id: String,
        attempt: u32,
        delay_ms: u64,
    },
    Error {
        session_id: String,
        message: String,
    },
}

impl AgentEvent {
    pub fn session_id(&self) -> &str {
        match self {
            AgentEvent::ToolCalled { session_id, .. }
            | AgentEvent::RetryScheduled { session_id, .. }
            | AgentEvent::Error { session_id, .. } => session_id,
        }
    }
}

/// Bounded exponential backoff around a single agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): 4s, 8s, then capped at 10s.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = self
            .multiplier
            .saturating_pow(retry.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Succeeded { reply: String, attempts: u32 },
    ExhaustedRetries { error: String, attempts: u32 },
}

/// Runs the executor for the pending human turn, retrying on failure.
pub struct AgentDispatcher {
    executor: Arc<dyn AgentExecutor>,
    policy: RetryPolicy,
    events: Option<flume::Sender<AgentEvent>>,
}

impl AgentDispatcher {
    pub fn new(executor: Arc<dyn AgentExecutor>, policy: RetryPolicy) -> Self {
        Self {
            executor,
            policy,
            events: None,
        }
    }

    pub fn with_events(mut self, events: flume::Sender<AgentEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Produce a reply for the last human turn in `history`.
    ///
    /// The history is only read. Retries reuse the same input and context.
    pub async fn get_response(&self, history: &ConversationHistory) -> TurnOutcome {
        let Some((chat_history, input)) = history.pending_input() else {
            return TurnOutcome::ExhaustedRetries {
                error: "no pending user input".to_string(),
                attempts: 0,
            };
        };

        let session_id = history.session_id();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.executor.invoke(session_id, input, chat_history).await {
                Ok(reply) => {
                    if attempt > 1 {
                        tracing::info!("Agent succeeded on attempt {}", attempt);
                    }
                    return TurnOutcome::Succeeded {
                        reply,
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    tracing::error!(
                        "Error in get_response for session {} (attempt {}/{}): {:#}",
                        session_id,
                        attempt,
                        max_attempts,
                        e
                    );
                    if attempt >= max_attempts {
                        tracing::error!("Giving up after {} attempts: {:#}", attempt, e);
                        self.emit(AgentEvent::Error {
                            session_id: session_id.to_string(),
                            message: format!("{:#}", e),
                        });
                        return TurnOutcome::ExhaustedRetries {
                            error: format!("{:#}", e),
                            attempts: attempt,
                        };
                    }

                    let delay = self.policy.delay_for_retry(attempt);
                    tracing::info!(
                        "Retrying agent call in {:?} (attempt {}/{})",
                        delay,
                        attempt + 1,
                        max_attempts
                    );
                    self.emit(AgentEvent::RetryScheduled {
                        session_id: session_id.to_string(),
                        attempt: attempt + 1,
                        delay_ms: delay.as_millis() as u64,
                    });
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_executors {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Fails the first `failures` calls, then echoes the input.
    pub struct ScriptedExecutor {
        failures: u32,
        pub calls: AtomicU32,
        pub seen_history: Mutex<Vec<Vec<Turn>>>,
        pub seen_sessions: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        pub fn failing(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                seen_history: Mutex::new(Vec::new()),
                seen_sessions: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AgentExecutor for ScriptedExecutor {
        async fn invoke(
            &self,
            session_id: &str,
            input: &str,
            chat_history: &[Turn],
        ) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.seen_history.lock().unwrap().push(chat_history.to_vec());
            self.seen_sessions
                .lock()
                .unwrap()
                .push(session_id.to_string());
            if call <= self.failures {
                anyhow::bail!("model unavailable (call {})", call);
            }
            Ok(format!("echo: {}", input))
        }
    }
}
