//! The core models for managing a stateful chat with an LLM.
use serde::{Deserialize, Serialize};

/// Who said a turn. Only users and the assistant ever land in a
/// transcript, system prompts are never stored.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// A single message in the conversation. Fields are private so a
/// turn can't be edited once it exists.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Turn {
    role: TurnRole,
    content: String,
}

impl Turn {
    pub fn new(role: TurnRole, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self::new(TurnRole::User, content)
    }

    pub fn assistant(content: &str) -> Self {
        Self::new(TurnRole::Assistant, content)
    }

    pub fn role(&self) -> TurnRole {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Append-only log of turns in chronological order. Alternation of
/// roles is not enforced.
#[derive(Default, Debug)]
pub struct Transcript(Vec<Turn>);

impl Transcript {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn new_with_turns(turns: Vec<Turn>) -> Self {
        Self(turns)
    }

    pub fn append(&mut self, turn: Turn) {
        self.0.push(turn)
    }

    /// Returns an owned copy of the history. Later calls to `append`
    /// or `clear` don't affect a snapshot that was already taken.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.0.clone()
    }

    pub fn clear(&mut self) {
        self.0.clear()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Turn> {
        self.0.iter()
    }
}
