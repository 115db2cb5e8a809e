//! Personas: who is talking, how they sound, and what they are told.
//!
//! The two scripted characters are fixed; their names, voices and system
//! instructions come from settings and are read-only for the session.

use serde::{Deserialize, Serialize};

/// One of the two scripted AI characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    /// Guides the pre-brief and runs the debrief.
    Instructor,
    /// The resistant counterpart the trainee has to win over.
    Stakeholder,
}

impl Persona {
    pub fn as_str(&self) -> &'static str {
        match self {
            Persona::Instructor => "instructor",
            Persona::Stakeholder => "stakeholder",
        }
    }
}

/// Static persona configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Display name (also used as the transcript label).
    pub name: String,
    /// Avatar path or URL for presentation layers that show one.
    #[serde(default)]
    pub avatar: String,
    /// TTS voice id (alloy, echo, fable, onyx, nova, shimmer...).
    pub voice: String,
    /// System instruction sent as the first completion message while this persona is active.
    pub instruction: String,
    /// Profile lines shown next to the conversation (position, institution...).
    #[serde(default)]
    pub profile: Vec<String>,
}

/// The human side of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraineeConfig {
    pub name: String,
    #[serde(default)]
    pub avatar: String,
}

/// Borrowed lookup table from speaker tag to display identity.
#[derive(Debug, Clone, Copy)]
pub struct Roster<'a> {
    pub trainee: &'a TraineeConfig,
    pub instructor: &'a PersonaConfig,
    pub stakeholder: &'a PersonaConfig,
}

impl<'a> Roster<'a> {
    pub fn persona(&self, persona: Persona) -> &'a PersonaConfig {
        match persona {
            Persona::Instructor => self.instructor,
            Persona::Stakeholder => self.stakeholder,
        }
    }

    /// Display name and avatar for a speaker tag. `None` is the trainee.
    pub fn identity(&self, speaker: Option<Persona>) -> (&'a str, &'a str) {
        match speaker {
            Some(p) => {
                let cfg = self.persona(p);
                (cfg.name.as_str(), cfg.avatar.as_str())
            }
            None => (self.trainee.name.as_str(), self.trainee.avatar.as_str()),
        }
    }
}
