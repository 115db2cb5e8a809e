//! Session orchestrator.
//!
//! One `Session` per trainee. It owns the transcript, the phase machine and the
//! voice sequencer, and applies the machine's effects in order. Every input is
//! processed to completion before the next one is accepted (`&mut self`).

use crate::completion::{CompletionDriver, Fragment, ReplyAggregator};
use crate::error::{SessionError, SessionResult};
use crate::export::TranscriptDocument;
use crate::incident::format_elapsed;
use crate::persona::Persona;
use crate::phase::{Effect, InputSource, Phase, PhaseMachine, SessionFlags, Transition, Utterance};
use crate::readiness::{PhraseClassifier, ReadinessClassifier};
use crate::settings::SessionSettings;
use crate::transcript::{RenderedTurn, Transcript, Turn};
use futures::StreamExt;
use rehearsal_voice::{SpeechJob, VoiceSequencer};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

/// Progress of a streamed reply, for live rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyEvent {
    Started(Persona),
    Fragment(String),
    /// The reply failed; discard what was shown and display this instead.
    Replaced(String),
    Finished,
}

/// Callback receiving [`ReplyEvent`]s while a reply streams.
pub type ReplySink<'a> = dyn FnMut(ReplyEvent) + Send + 'a;

/// A turn appended during one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendedTurn {
    pub turn: Turn,
    /// Already delivered fragment by fragment through the reply sink.
    pub streamed: bool,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub phase: Phase,
    pub transition: Option<Transition>,
    pub appended: Vec<AppendedTurn>,
    /// The input did not apply (e.g. a button outside its phase).
    pub ignored: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Affordance {
    MeetStakeholder,
    EndSession,
    DownloadTranscript,
}

/// Everything a presentation layer needs to draw the session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub phase: Phase,
    pub active: Persona,
    pub turns: Vec<RenderedTurn>,
    pub affordances: Vec<Affordance>,
    pub placeholder: String,
    pub flags: SessionFlags,
}

pub struct Session {
    id: String,
    settings: Arc<SessionSettings>,
    transcript: Transcript,
    machine: PhaseMachine,
    classifier: Box<dyn ReadinessClassifier>,
    driver: CompletionDriver,
    voice: VoiceSequencer,
    started_at: Instant,
}

impl Session {
    /// Session using the phrase classifier configured in `settings.triggers`.
    pub fn new(
        settings: Arc<SessionSettings>,
        driver: CompletionDriver,
        voice: VoiceSequencer,
    ) -> SessionResult<Self> {
        let classifier = PhraseClassifier::new(&settings.triggers)?;
        Ok(Self::with_classifier(settings, driver, voice, Box::new(classifier)))
    }

    pub fn with_classifier(
        settings: Arc<SessionSettings>,
        driver: CompletionDriver,
        voice: VoiceSequencer,
        classifier: Box<dyn ReadinessClassifier>,
    ) -> Self {
        let id = Uuid::new_v4().to_string();
        info!("🎓 Session {} created (provider {})", id, driver.provider_name());
        let opener = settings.persona(Phase::default().active_persona()).instruction.clone();
        Self {
            transcript: Transcript::new(opener),
            machine: PhaseMachine::new(settings.scripts.clone()),
            id,
            settings,
            classifier,
            driver,
            voice,
            started_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> Phase {
        self.machine.phase()
    }

    pub fn flags(&self) -> SessionFlags {
        self.phase().flags()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn voice(&self) -> &VoiceSequencer {
        &self.voice
    }

    /// A phase hand-off is waiting for its announcement to finish.
    pub fn has_deferred(&self) -> bool {
        self.machine.has_deferred()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Append and speak the instructor's welcome. Only on a fresh transcript.
    pub fn open(&mut self) -> Option<Turn> {
        if !self.transcript.is_fresh() {
            return None;
        }
        info!("🔓 Session {} opened", self.id);
        let text = self.settings.scripts.welcome.clone();
        let turn = Turn::assistant(Persona::Instructor, text.clone());
        self.transcript.append(turn.clone());
        self.speak(Persona::Instructor, &text);
        Some(turn)
    }

    /// Process one utterance end to end.
    pub async fn handle(
        &mut self,
        utterance: Utterance,
        on_reply: &mut ReplySink<'_>,
    ) -> SessionResult<TurnOutcome> {
        let len = utterance.text.trim().chars().count();
        if len > self.settings.max_input_chars {
            return Err(SessionError::InputTooLong {
                len,
                max: self.settings.max_input_chars,
            });
        }
        let is_button = matches!(utterance.source, InputSource::Button(_));
        if len == 0 && !is_button {
            return Ok(self.outcome(None, Vec::new(), true));
        }

        // New input always silences whoever is talking.
        self.voice.stop();

        let mut appended = Vec::new();
        if let Some(stage) = self.machine.take_deferred() {
            debug!("Hand-off superseded by new input; opening line stays silent");
            for effect in stage {
                self.apply(effect, false, &mut appended, on_reply).await;
            }
        }

        let step = self
            .machine
            .advance(&utterance, self.transcript.dialogue(), self.classifier.as_ref());
        if step.is_ignored() {
            // A superseded hand-off may still have appended turns.
            let ignored = appended.is_empty();
            return Ok(self.outcome(None, appended, ignored));
        }
        for effect in step.effects {
            self.apply(effect, true, &mut appended, on_reply).await;
        }
        Ok(self.outcome(step.transition, appended, false))
    }

    /// Wait for the current announcement to finish, then run the deferred hand-off.
    ///
    /// Cancel-safe: dropping the future before playback ends leaves the stage queued.
    pub async fn settle(&mut self) -> Vec<AppendedTurn> {
        let mut appended = Vec::new();
        if !self.machine.has_deferred() {
            return appended;
        }
        self.voice.wait_idle().await;
        if let Some(stage) = self.machine.take_deferred() {
            for effect in stage {
                self.apply(effect, true, &mut appended, &mut ignore_reply).await;
            }
        }
        appended
    }

    pub fn view(&self) -> SessionView {
        let phase = self.phase();
        let flags = phase.flags();
        let mut affordances = Vec::new();
        if !self.machine.has_deferred() {
            match phase {
                Phase::PreBrief if self.classifier.readiness_prompted(self.transcript.dialogue()) => {
                    affordances.push(Affordance::MeetStakeholder)
                }
                Phase::Simulation => affordances.push(Affordance::EndSession),
                _ => {}
            }
        }
        if flags.transcript_ready {
            affordances.push(Affordance::DownloadTranscript);
        }

        let placeholders = &self.settings.placeholders;
        let placeholder = match phase {
            Phase::PreBrief => &placeholders.pre_brief,
            Phase::Simulation => &placeholders.simulation,
            Phase::Debrief => &placeholders.debrief,
        };

        SessionView {
            phase,
            active: phase.active_persona(),
            turns: self.transcript.render(&self.settings.roster()),
            affordances,
            placeholder: placeholder.clone(),
            flags,
        }
    }

    pub fn export(&self) -> TranscriptDocument {
        TranscriptDocument::from_rendered(&self.transcript.render(&self.settings.roster()))
    }

    /// Write the transcript to `path`, or to a timestamped file in the working directory.
    pub async fn save_transcript(&self, path: Option<&Path>) -> SessionResult<PathBuf> {
        let document = self.export();
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => PathBuf::from(document.default_file_name()),
        };
        document.save(&path).await?;
        info!("📄 Transcript saved: {} ({} turns)", path.display(), document.len());
        Ok(path)
    }

    /// Stop speech and log how long the session ran.
    pub fn close(self) -> Duration {
        self.voice.stop();
        let elapsed = self.started_at.elapsed();
        info!(
            "🏁 Session {} ended in {} after {}",
            self.id,
            self.phase().as_str(),
            format_elapsed(elapsed)
        );
        elapsed
    }

    async fn apply(
        &mut self,
        effect: Effect,
        speak: bool,
        appended: &mut Vec<AppendedTurn>,
        on_reply: &mut ReplySink<'_>,
    ) {
        match effect {
            Effect::AppendUser(text) => {
                let turn = Turn::user(text);
                self.transcript.append(turn.clone());
                appended.push(AppendedTurn {
                    turn,
                    streamed: false,
                });
            }
            Effect::Announce { persona, text } => {
                let turn = Turn::assistant(persona, text);
                self.transcript.append(turn.clone());
                appended.push(AppendedTurn {
                    turn,
                    streamed: false,
                });
            }
            Effect::Speak { persona, text } => {
                if speak {
                    self.speak(persona, &text);
                }
            }
            Effect::EnterPhase(phase) => {
                let persona = phase.active_persona();
                let instruction = self.settings.persona(persona).instruction.clone();
                self.transcript.set_system_instruction(instruction);
                info!("🎭 {} is now active ({})", self.settings.persona(persona).name, phase.as_str());
            }
            Effect::Complete(persona) => {
                let turn = self.complete(persona, speak, on_reply).await;
                appended.push(AppendedTurn {
                    turn,
                    streamed: true,
                });
            }
        }
    }

    async fn complete(&mut self, persona: Persona, speak: bool, on_reply: &mut ReplySink<'_>) -> Turn {
        let settings = Arc::clone(&self.settings);
        let config = settings.persona(persona);
        let history = self.transcript.history_for_completion(&config.instruction);

        on_reply(ReplyEvent::Started(persona));
        let stream = self.driver.stream_reply(&history, config);
        futures::pin_mut!(stream);
        let mut reply = ReplyAggregator::new();
        while let Some(fragment) = stream.next().await {
            match &fragment {
                Fragment::Text(text) => on_reply(ReplyEvent::Fragment(text.clone())),
                Fragment::Fallback(apology) => on_reply(ReplyEvent::Replaced(apology.clone())),
            }
            reply.push(&fragment);
        }
        on_reply(ReplyEvent::Finished);

        let text = reply.finish();
        let turn = Turn::assistant(persona, text.clone());
        self.transcript.append(turn.clone());
        if speak {
            self.speak(persona, &text);
        }
        turn
    }

    fn speak(&self, persona: Persona, text: &str) {
        let config = self.settings.persona(persona);
        self.voice
            .enqueue(SpeechJob::new(text, config.voice.clone(), config.name.clone()));
    }

    fn outcome(&self, transition: Option<Transition>, appended: Vec<AppendedTurn>, ignored: bool) -> TurnOutcome {
        TurnOutcome {
            phase: self.phase(),
            transition,
            appended,
            ignored,
        }
    }
}

fn ignore_reply(_: ReplyEvent) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{ScriptedCompletion, ScriptedReply};
    use crate::phase::UiEvent;
    use rehearsal_voice::{NullSink, SilentTts};

    fn session(replies: Vec<ScriptedReply>) -> Session {
        let settings = Arc::new(SessionSettings::default());
        let driver = CompletionDriver::new(Arc::new(ScriptedCompletion::new(replies)), &settings.completion);
        let voice = VoiceSequencer::new(Arc::new(SilentTts), Arc::new(NullSink));
        Session::new(settings, driver, voice).unwrap()
    }

    #[test]
    fn system_turn_starts_with_the_instructor() {
        let s = session(Vec::new());
        assert_eq!(
            s.transcript().system_instruction(),
            s.settings().instructor.instruction
        );
    }

    #[tokio::test]
    async fn late_button_still_reports_the_superseded_opening() {
        let mut s = session(Vec::new());
        s.open();
        s.handle(Utterance::typed("I'm ready"), &mut ignore_reply).await.unwrap();
        assert!(s.has_deferred());

        let scripts = s.settings().scripts.clone();
        let outcome = s
            .handle(Utterance::button(UiEvent::MeetStakeholder, &scripts), &mut ignore_reply)
            .await
            .unwrap();
        assert!(!outcome.ignored);
        assert_eq!(outcome.phase, Phase::Simulation);
        assert_eq!(outcome.appended.len(), 1);
        assert!(outcome.appended[0].turn.is_from(Persona::Stakeholder));
        assert_eq!(outcome.appended[0].turn.text(), scripts.stakeholder_opening);
    }

    #[tokio::test]
    async fn whitespace_reply_is_stored_as_the_apology() {
        let mut s = session(vec![ScriptedReply::fragments(["  ", "\n"])]);
        s.handle(Utterance::typed("Tell me about Sam"), &mut ignore_reply)
            .await
            .unwrap();
        let last = s.transcript().last().unwrap();
        assert!(last.is_from(Persona::Instructor));
        assert_eq!(last.text(), s.settings().completion.fallback);
    }

    #[tokio::test]
    async fn open_welcomes_once() {
        let mut s = session(Vec::new());
        let welcome = s.open().unwrap();
        assert!(welcome.is_from(Persona::Instructor));
        assert!(s.open().is_none());
        assert_eq!(s.transcript().dialogue().len(), 1);
    }

    #[tokio::test]
    async fn blank_input_is_not_a_turn() {
        let mut s = session(Vec::new());
        let outcome = s.handle(Utterance::typed("   "), &mut ignore_reply).await.unwrap();
        assert!(outcome.ignored);
        assert!(s.transcript().is_fresh());
    }

    #[tokio::test]
    async fn oversized_input_is_rejected_without_touching_state() {
        let mut s = session(Vec::new());
        let long = "a".repeat(s.settings().max_input_chars + 1);
        let err = s.handle(Utterance::typed(long), &mut ignore_reply).await.unwrap_err();
        assert!(matches!(err, SessionError::InputTooLong { .. }));
        assert!(s.transcript().is_fresh());
    }

    #[tokio::test]
    async fn reply_events_mirror_fragments() {
        let mut s = session(vec![ScriptedReply::fragments(["Think about ", "staffing."])]);
        let mut events = Vec::new();
        let outcome = s
            .handle(Utterance::typed("What should I lead with?"), &mut |e| events.push(e))
            .await
            .unwrap();

        assert_eq!(
            events,
            vec![
                ReplyEvent::Started(Persona::Instructor),
                ReplyEvent::Fragment("Think about ".to_string()),
                ReplyEvent::Fragment("staffing.".to_string()),
                ReplyEvent::Finished,
            ]
        );
        assert_eq!(outcome.appended.len(), 2);
        assert!(outcome.appended[1].streamed);
        assert_eq!(outcome.appended[1].turn.text(), "Think about staffing.");
    }

    #[tokio::test]
    async fn view_offers_meet_button_after_readiness_question() {
        let mut s = session(vec![ScriptedReply::text("Good plan. Are you ready to meet Sam?")]);
        s.open();
        assert!(s.view().affordances.is_empty());

        s.handle(Utterance::typed("I'll lead with staffing"), &mut ignore_reply)
            .await
            .unwrap();
        let view = s.view();
        assert_eq!(view.affordances, vec![Affordance::MeetStakeholder]);
        assert_eq!(view.placeholder, s.settings().placeholders.pre_brief);
        assert_eq!(view.active, Persona::Instructor);
    }
}
