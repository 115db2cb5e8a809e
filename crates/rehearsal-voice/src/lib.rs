//! # Rehearsal Voice - persona speech for role-play sessions
//!
//! This crate turns persona lines into audio and makes sure only one line is
//! ever audible. The orchestrator in `rehearsal-core` hands it text plus a
//! voice id; the sequencer synthesizes, plays, and can be cut off at any time.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Voice Sequencer                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐       │
//! │  │   enqueue    │→ │ TTS backend  │→ │  Audio sink  │       │
//! │  │ (text,voice) │  │  (OpenAI)    │  │   (rodio)    │       │
//! │  └──────────────┘  └──────────────┘  └──────────────┘       │
//! │         ↑                                      ↑            │
//! │  ┌──────────────┐                    ┌──────────────┐       │
//! │  │  New input   │────── stop() ─────→│ Cancellation │       │
//! │  │  (trainee)   │                    │    token     │       │
//! │  └──────────────┘                    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod sequencer;
pub mod sink;
pub mod stt;
pub mod tts;

pub use error::{VoiceError, VoiceResult};
pub use sequencer::{SequencerState, SpeechJob, VoiceSequencer};
pub use sink::{AudioSink, NullSink};
#[cfg(feature = "speaker")]
pub use sink::RodioSink;
pub use stt::{recognize, OpenAiStt, CannedStt, RecordedAudio, SttBackend};
pub use tts::{OpenAiTts, SilentTts, TtsBackend};
