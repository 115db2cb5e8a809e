//! Transcript Store: the ordered conversation log.
//!
//! The log is the literal prompt history, so order is load-bearing. The first
//! entry is a synthetic system turn carrying the active persona's instruction;
//! it is never rendered and is the only entry that is ever rewritten.

use crate::persona::{Persona, Roster};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    role: Role,
    /// Persona that produced an assistant turn; `None` for user and system turns.
    speaker: Option<Persona>,
    text: String,
}

impl Turn {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            speaker: None,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            speaker: None,
            text: text.into(),
        }
    }

    pub fn assistant(persona: Persona, text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            speaker: Some(persona),
            text: text.into(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn speaker(&self) -> Option<Persona> {
        self.speaker
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_from(&self, persona: Persona) -> bool {
        self.role == Role::Assistant && self.speaker == Some(persona)
    }
}

/// Wire-shaped message handed to the completion driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A turn resolved for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedTurn {
    pub name: String,
    pub avatar: String,
    pub role: Role,
    pub speaker: Option<Persona>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    /// New transcript holding only the synthetic system turn.
    pub fn new(system_instruction: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::system(system_instruction)],
        }
    }

    /// Swap the synthetic system turn (persona change).
    pub fn set_system_instruction(&mut self, instruction: impl Into<String>) {
        self.turns[0] = Turn::system(instruction);
    }

    pub fn system_instruction(&self) -> &str {
        self.turns[0].text()
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Number of turns, system turn included.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// True while nothing but the system turn exists.
    pub fn is_fresh(&self) -> bool {
        self.turns.len() == 1
    }

    /// Everything after the system turn.
    pub fn dialogue(&self) -> &[Turn] {
        &self.turns[1..]
    }

    /// The last `n` dialogue turns.
    pub fn recent(&self, n: usize) -> &[Turn] {
        let dialogue = self.dialogue();
        &dialogue[dialogue.len().saturating_sub(n)..]
    }

    pub fn last(&self) -> Option<&Turn> {
        self.dialogue().last()
    }

    /// Prompt history with the leading system message replaced by `instruction`.
    pub fn history_for_completion(&self, instruction: &str) -> Vec<ChatMessage> {
        std::iter::once(ChatMessage::new(Role::System, instruction))
            .chain(
                self.dialogue()
                    .iter()
                    .map(|t| ChatMessage::new(t.role, t.text.clone())),
            )
            .collect()
    }

    /// Dialogue turns paired with display identities; the system turn never leaks.
    pub fn render(&self, roster: &Roster<'_>) -> Vec<RenderedTurn> {
        self.dialogue()
            .iter()
            .map(|t| {
                let (name, avatar) = roster.identity(t.speaker);
                RenderedTurn {
                    name: name.to_string(),
                    avatar: avatar.to_string(),
                    role: t.role,
                    speaker: t.speaker,
                    text: t.text.clone(),
                }
            })
            .collect()
    }
}
