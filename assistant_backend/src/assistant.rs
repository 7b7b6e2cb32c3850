use crate::agent::{AgentDispatcher, ConversationHistory, TurnOutcome};

/// Reply given when every attempt at producing a response failed.
pub const FALLBACK_REPLY: &str = "I'm sorry, but I'm having trouble connecting to my knowledge base right now. Please try again later.";

/// Conversation front door shared by the CLI and the web sessions.
///
/// Holds no per-conversation state; callers own their [`ConversationHistory`].
pub struct Assistant {
    dispatcher: AgentDispatcher,
    system_prompt: String,
}

impl Assistant {
    pub fn new(dispatcher: AgentDispatcher, system_prompt: impl Into<String>) -> Self {
        Self {
            dispatcher,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn new_history(&self) -> ConversationHistory {
        ConversationHistory::new(self.system_prompt.clone())
    }

    /// A fresh history whose events are attributed to `session_id`.
    pub fn history_for(&self, session_id: impl Into<String>) -> ConversationHistory {
        ConversationHistory::with_session(self.system_prompt.clone(), session_id)
    }

    /// Answer `input` in the context of `history`.
    ///
    /// On success the human turn and the reply are appended. On failure the
    /// apology is returned and `history` is left exactly as it was.
    pub async fn chat(&self, input: &str, history: &mut ConversationHistory) -> String {
        let mut pending = history.clone();
        pending.push_human(input);

        match self.dispatcher.get_response(&pending).await {
            TurnOutcome::Succeeded { reply, attempts } => {
                tracing::debug!("Reply ready after {} attempt(s)", attempts);
                pending.push_assistant(reply.clone());
                *history = pending;
                reply
            }
            TurnOutcome::ExhaustedRetries { error, attempts } => {
                tracing::error!("Error in chat after {} attempt(s): {}", attempts, error);
                FALLBACK_REPLY.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::test_executors::ScriptedExecutor;
    use crate::agent::{RetryPolicy, Role, Turn};
    use std::sync::Arc;

    fn assistant(executor: Arc<ScriptedExecutor>) -> Assistant {
        Assistant::new(
            AgentDispatcher::new(executor, RetryPolicy::default()),
            "system prompt",
        )
    }

    #[tokio::test]
    async fn successful_turn_appends_both_sides() {
        let assistant = assistant(Arc::new(ScriptedExecutor::failing(0)));
        let mut history = assistant.new_history();

        let reply = assistant.chat("hello", &mut history).await;
        assert_eq!(reply, "echo: hello");
        assert_eq!(
            history.visible(),
            &[
                Turn::new(Role::Human, "hello"),
                Turn::new(Role::Assistant, "echo: hello")
            ]
        );
        assert_eq!(history.system().content, "system prompt");
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_return_fallback_and_keep_history() {
        let executor = Arc::new(ScriptedExecutor::failing(u32::MAX));
        let assistant = assistant(executor.clone());
        let mut history = assistant.new_history();
        history.push_human("before");
        history.push_assistant("ok");
        let snapshot = history.turns().to_vec();

        let reply = assistant.chat("now fail", &mut history).await;
        assert_eq!(reply, FALLBACK_REPLY);
        assert_eq!(history.turns(), snapshot.as_slice());
        assert_eq!(executor.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn context_grows_across_turns() {
        let executor = Arc::new(ScriptedExecutor::failing(0));
        let assistant = assistant(executor.clone());
        let mut history = assistant.new_history();

        assistant.chat("one", &mut history).await;
        assistant.chat("two", &mut history).await;

        let seen = executor.seen_history.lock().unwrap();
        assert!(seen[0].is_empty());
        assert_eq!(
            seen[1],
            vec![
                Turn::new(Role::Human, "one"),
                Turn::new(Role::Assistant, "echo: one")
            ]
        );
        assert_eq!(history.len(), 5);
    }

    #[tokio::test]
    async fn session_id_reaches_the_executor() {
        let executor = Arc::new(ScriptedExecutor::failing(0));
        let assistant = assistant(executor.clone());
        let mut history = assistant.history_for("web-1");

        assistant.chat("hello", &mut history).await;
        assert_eq!(history.session_id(), "web-1");
        assert_eq!(*executor.seen_sessions.lock().unwrap(), vec!["web-1"]);
    }
}
