use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Human,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Append-only conversation log that always starts with the system turn.
///
/// Turns are only reachable by shared reference, so the system turn fixed at
/// construction can never be replaced or removed.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    session_id: String,
    turns: Vec<Turn>,
}

impl ConversationHistory {
    /// A history under a freshly generated session id.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self::with_session(system_prompt, Uuid::new_v4().to_string())
    }

    pub fn with_session(system_prompt: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            turns: vec![Turn::new(Role::System, system_prompt)],
        }
    }

    /// Attribution for tool calls and events raised while answering this history.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn system(&self) -> &Turn {
        &self.turns[0]
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Everything after the system turn.
    pub fn visible(&self) -> &[Turn] {
        &self.turns[1..]
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// True when nothing but the system turn has been recorded.
    pub fn is_empty(&self) -> bool {
        self.turns.len() == 1
    }

    pub fn push_human(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::new(Role::Human, content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::new(Role::Assistant, content));
    }

    /// Split into (chat context, pending input) when the last turn is a human
    /// turn awaiting a reply. Context excludes the system turn.
    pub fn pending_input(&self) -> Option<(&[Turn], &str)> {
        match self.turns.split_last() {
            Some((last, rest)) if last.role == Role::Human => Some((&rest[1..], &last.content)),
            _ => None,
        }
    }
}
