//! # Rehearsal Core
//!
//! Conversation-phase orchestration for a three-phase role-play: the trainee
//! prepares with an instructor (pre-brief), talks a resistant stakeholder
//! round (simulation), then gets feedback from the instructor (debrief).
//!
//! ```text
//! input ─▶ stop voice ─▶ drain deferred hand-off ─▶ readiness classifier
//!                                                        │
//!          voice ◀─ transcript ◀─ completion driver ◀─ phase machine
//! ```
//!
//! [`Session`] is the entry point; everything else is usable on its own.

pub mod completion;
pub mod error;
pub mod export;
pub mod incident;
pub mod persona;
pub mod phase;
pub mod readiness;
pub mod session;
pub mod settings;
pub mod transcript;

pub use completion::{
    provider_from_settings, AnthropicMessages, CompletionDriver, CompletionProvider,
    CompletionRequest, Fragment, OpenAiChat, ReplyAggregator, ScriptedCompletion, ScriptedReply,
};
pub use error::{CompletionError, SessionError, SessionResult, SettingsError};
pub use export::TranscriptDocument;
pub use incident::{format_elapsed, report_incident, Incident, IncidentId};
pub use persona::{Persona, PersonaConfig, Roster, TraineeConfig};
pub use phase::{
    Effect, InputSource, Phase, PhaseMachine, SessionFlags, Step, Transition, UiEvent, Utterance,
};
pub use readiness::{
    detect_debrief_ready, detect_prebrief_ready, PhraseClassifier, ReadinessClassifier,
    TriggerPhrases, Verdict,
};
pub use session::{
    Affordance, AppendedTurn, ReplyEvent, ReplySink, Session, SessionView, TurnOutcome,
};
pub use settings::{ProviderKind, Secrets, SessionSettings};
pub use transcript::{ChatMessage, RenderedTurn, Role, Transcript, Turn};
