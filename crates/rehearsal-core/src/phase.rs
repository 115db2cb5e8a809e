//! Phase State Machine.
//!
//! Owns the single `Phase` value and turns each utterance into a list of
//! effects for the session to apply. The pre-brief hand-off is split in two:
//! the instructor's announcement goes out immediately, and the switch to the
//! stakeholder waits in an explicit queue until the announcement has finished
//! (or the trainee talks over it).

use crate::persona::Persona;
use crate::readiness::{ReadinessClassifier, Verdict};
use crate::settings::Scripts;
use crate::transcript::Turn;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info};

/// Conversation stage. Only ever moves forward.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    PreBrief,
    Simulation,
    Debrief,
}

impl Phase {
    pub fn active_persona(self) -> Persona {
        match self {
            Phase::PreBrief | Phase::Debrief => Persona::Instructor,
            Phase::Simulation => Persona::Stakeholder,
        }
    }

    pub fn flags(self) -> SessionFlags {
        let ended = self == Phase::Debrief;
        SessionFlags {
            transcript_ready: ended,
            session_ended: ended,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::PreBrief => "pre-brief",
            Phase::Simulation => "simulation",
            Phase::Debrief => "debrief",
        }
    }
}

/// Presentation flags, always derived from the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionFlags {
    pub transcript_ready: bool,
    pub session_ended: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    ToSimulation,
    ToDebrief,
}

impl Transition {
    pub fn target(self) -> Phase {
        match self {
            Transition::ToSimulation => Phase::Simulation,
            Transition::ToDebrief => Phase::Debrief,
        }
    }
}

/// Buttons the presentation layer may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UiEvent {
    MeetStakeholder,
    EndSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    Typed,
    Spoken,
    Button(UiEvent),
}

/// Normalized user input, whatever produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub text: String,
    pub source: InputSource,
}

impl Utterance {
    pub fn typed(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: InputSource::Typed,
        }
    }

    pub fn spoken(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: InputSource::Spoken,
        }
    }

    /// A button press carrying its canonical trigger text.
    pub fn button(event: UiEvent, scripts: &Scripts) -> Self {
        let text = match event {
            UiEvent::MeetStakeholder => scripts.meet_button_text.clone(),
            UiEvent::EndSession => scripts.end_button_text.clone(),
        };
        Self {
            text,
            source: InputSource::Button(event),
        }
    }
}

/// One instruction for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Append the trainee's turn.
    AppendUser(String),
    /// Append a scripted assistant turn.
    Announce { persona: Persona, text: String },
    /// Hand a line to the voice sequencer.
    Speak { persona: Persona, text: String },
    /// The phase changed; swap the system instruction to this phase's persona.
    EnterPhase(Phase),
    /// Stream a reply from `persona`, append it and speak it.
    Complete(Persona),
}

/// Result of one `advance` call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Step {
    pub effects: Vec<Effect>,
    pub transition: Option<Transition>,
}

impl Step {
    /// Input that does not apply in the current phase.
    pub fn is_ignored(&self) -> bool {
        self.effects.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct PhaseMachine {
    phase: Phase,
    scripts: Scripts,
    fired: Vec<Transition>,
    deferred: VecDeque<Vec<Effect>>,
}

impl PhaseMachine {
    pub fn new(scripts: Scripts) -> Self {
        Self {
            phase: Phase::PreBrief,
            scripts,
            fired: Vec::new(),
            deferred: VecDeque::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn has_deferred(&self) -> bool {
        !self.deferred.is_empty()
    }

    pub fn has_fired(&self, transition: Transition) -> bool {
        self.fired.contains(&transition)
    }

    /// Pop the queued stage, committing any phase change it carries.
    pub fn take_deferred(&mut self) -> Option<Vec<Effect>> {
        let stage = self.deferred.pop_front()?;
        for effect in &stage {
            if let Effect::EnterPhase(next) = effect {
                self.enter(*next);
            }
        }
        Some(stage)
    }

    /// Decide what `utterance` does. Callers drain the deferred stage first.
    pub fn advance(
        &mut self,
        utterance: &Utterance,
        recent: &[Turn],
        classifier: &dyn ReadinessClassifier,
    ) -> Step {
        let text = utterance.text.trim();
        let button = match utterance.source {
            InputSource::Button(event) => Some(event),
            _ => None,
        };

        if let Some(event) = button {
            let offered = matches!(
                (self.phase, event),
                (Phase::PreBrief, UiEvent::MeetStakeholder) | (Phase::Simulation, UiEvent::EndSession)
            );
            if !offered || self.has_deferred() {
                debug!("Ignoring {:?} during {}", event, self.phase.as_str());
                return Step::default();
            }
        }

        if self.phase == Phase::PreBrief
            && !self.has_fired(Transition::ToSimulation)
            && !self.has_deferred()
        {
            let verdict = match button {
                Some(_) => Verdict::Confirmed,
                None => classifier.classify_prebrief(text, recent),
            };
            debug!("Pre-brief readiness: {:?}", verdict);
            if verdict == Verdict::Confirmed {
                return self.meet_stakeholder(text);
            }
        }

        if self.phase == Phase::Simulation && !self.has_fired(Transition::ToDebrief) {
            let verdict = match button {
                Some(_) => Verdict::Confirmed,
                None => classifier.classify_debrief(text),
            };
            if verdict == Verdict::Confirmed {
                return self.end_simulation(text);
            }
        }

        Step {
            effects: vec![
                Effect::AppendUser(text.to_string()),
                Effect::Complete(self.phase.active_persona()),
            ],
            transition: None,
        }
    }

    fn meet_stakeholder(&mut self, text: &str) -> Step {
        self.fired.push(Transition::ToSimulation);
        info!("🚪 Trainee ready; introducing the stakeholder");

        let opening = self.scripts.stakeholder_opening.clone();
        self.deferred.push_back(vec![
            Effect::EnterPhase(Phase::Simulation),
            Effect::Announce {
                persona: Persona::Stakeholder,
                text: opening.clone(),
            },
            Effect::Speak {
                persona: Persona::Stakeholder,
                text: opening,
            },
        ]);

        let announcement = self.scripts.transition.clone();
        Step {
            effects: vec![
                Effect::AppendUser(text.to_string()),
                Effect::Announce {
                    persona: Persona::Instructor,
                    text: announcement.clone(),
                },
                Effect::Speak {
                    persona: Persona::Instructor,
                    text: announcement,
                },
            ],
            transition: Some(Transition::ToSimulation),
        }
    }

    fn end_simulation(&mut self, text: &str) -> Step {
        self.fired.push(Transition::ToDebrief);
        self.enter(Phase::Debrief);

        let mut effects = vec![
            Effect::AppendUser(text.to_string()),
            Effect::EnterPhase(Phase::Debrief),
        ];
        match &self.scripts.debrief_opening {
            Some(line) => {
                effects.push(Effect::Announce {
                    persona: Persona::Instructor,
                    text: line.clone(),
                });
                effects.push(Effect::Speak {
                    persona: Persona::Instructor,
                    text: line.clone(),
                });
            }
            None => effects.push(Effect::Complete(Persona::Instructor)),
        }
        Step {
            effects,
            transition: Some(Transition::ToDebrief),
        }
    }

    fn enter(&mut self, next: Phase) {
        if next <= self.phase {
            debug!("Ignoring backwards move {} -> {}", self.phase.as_str(), next.as_str());
            return;
        }
        info!("🎬 Phase {} -> {}", self.phase.as_str(), next.as_str());
        self.phase = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readiness::{PhraseClassifier, TriggerPhrases};

    fn machine() -> PhaseMachine {
        PhaseMachine::new(Scripts::default())
    }

    fn classifier() -> PhraseClassifier {
        PhraseClassifier::new(&TriggerPhrases::default()).unwrap()
    }

    fn to_simulation(m: &mut PhaseMachine) {
        let step = m.advance(&Utterance::typed("I'm ready"), &[], &classifier());
        assert_eq!(step.transition, Some(Transition::ToSimulation));
        m.take_deferred().unwrap();
    }

    #[test]
    fn persona_follows_phase() {
        assert_eq!(Phase::PreBrief.active_persona(), Persona::Instructor);
        assert_eq!(Phase::Simulation.active_persona(), Persona::Stakeholder);
        assert_eq!(Phase::Debrief.active_persona(), Persona::Instructor);
    }

    #[test]
    fn flags_only_in_debrief() {
        assert!(!Phase::PreBrief.flags().transcript_ready);
        assert!(!Phase::Simulation.flags().session_ended);
        let f = Phase::Debrief.flags();
        assert!(f.transcript_ready && f.session_ended);
    }

    #[test]
    fn plain_turn_completes_with_active_persona() {
        let mut m = machine();
        let step = m.advance(&Utterance::typed("  What does Sam care about?  "), &[], &classifier());
        assert_eq!(
            step.effects,
            vec![
                Effect::AppendUser("What does Sam care about?".to_string()),
                Effect::Complete(Persona::Instructor),
            ]
        );
        assert_eq!(m.phase(), Phase::PreBrief);
    }

    #[test]
    fn prebrief_trigger_defers_the_stakeholder() {
        let scripts = Scripts::default();
        let mut m = machine();
        let step = m.advance(&Utterance::typed("Let's start"), &[], &classifier());

        assert_eq!(step.transition, Some(Transition::ToSimulation));
        assert_eq!(
            step.effects,
            vec![
                Effect::AppendUser("Let's start".to_string()),
                Effect::Announce {
                    persona: Persona::Instructor,
                    text: scripts.transition.clone(),
                },
                Effect::Speak {
                    persona: Persona::Instructor,
                    text: scripts.transition.clone(),
                },
            ]
        );
        // Still pre-brief until the stage is drained.
        assert_eq!(m.phase(), Phase::PreBrief);
        assert!(m.has_deferred());

        let stage = m.take_deferred().unwrap();
        assert_eq!(stage[0], Effect::EnterPhase(Phase::Simulation));
        assert!(matches!(
            &stage[1],
            Effect::Announce { persona: Persona::Stakeholder, text } if *text == scripts.stakeholder_opening
        ));
        assert_eq!(m.phase(), Phase::Simulation);
        assert!(m.take_deferred().is_none());
    }

    #[test]
    fn transition_fires_once() {
        let mut m = machine();
        m.advance(&Utterance::typed("ready"), &[], &classifier());
        // Second "ready" while the stage is still queued is a normal turn.
        let again = m.advance(&Utterance::typed("ready"), &[], &classifier());
        assert_eq!(again.transition, None);
        assert_eq!(again.effects[1], Effect::Complete(Persona::Instructor));
    }

    #[test]
    fn declined_stays_in_prebrief() {
        let mut m = machine();
        let recent = vec![Turn::assistant(Persona::Instructor, "Are you ready to meet Sam?")];
        let step = m.advance(&Utterance::typed("not yet"), &recent, &classifier());
        assert_eq!(step.transition, None);
        assert!(!m.has_deferred());
    }

    #[test]
    fn simulation_trigger_enters_debrief_in_one_step() {
        let mut m = machine();
        to_simulation(&mut m);

        let step = m.advance(
            &Utterance::typed("let's end this, I want feedback"),
            &[],
            &classifier(),
        );
        assert_eq!(step.transition, Some(Transition::ToDebrief));
        assert_eq!(
            step.effects,
            vec![
                Effect::AppendUser("let's end this, I want feedback".to_string()),
                Effect::EnterPhase(Phase::Debrief),
                Effect::Complete(Persona::Instructor),
            ]
        );
        assert_eq!(m.phase(), Phase::Debrief);
        assert!(m.phase().flags().transcript_ready);
        assert!(!m.has_deferred());
    }

    #[test]
    fn scripted_debrief_opening_is_announced() {
        let mut m = PhaseMachine::new(Scripts {
            debrief_opening: Some("How do you think that went?".to_string()),
            ..Scripts::default()
        });
        to_simulation(&mut m);
        let step = m.advance(&Utterance::typed("goodbye"), &[], &classifier());
        assert_eq!(
            step.effects[2],
            Effect::Announce {
                persona: Persona::Instructor,
                text: "How do you think that went?".to_string()
            }
        );
        assert!(matches!(step.effects[3], Effect::Speak { persona: Persona::Instructor, .. }));
    }

    #[test]
    fn simulation_ignores_readiness_words() {
        let mut m = machine();
        to_simulation(&mut m);
        let step = m.advance(&Utterance::typed("I'm ready to talk numbers"), &[], &classifier());
        assert_eq!(step.transition, None);
        assert_eq!(step.effects[1], Effect::Complete(Persona::Stakeholder));
    }

    #[test]
    fn debrief_is_terminal() {
        let mut m = machine();
        to_simulation(&mut m);
        m.advance(&Utterance::typed("finish"), &[], &classifier());
        let step = m.advance(&Utterance::typed("ready, let's start, goodbye"), &[], &classifier());
        assert_eq!(step.transition, None);
        assert_eq!(step.effects[1], Effect::Complete(Persona::Instructor));
        assert_eq!(m.phase(), Phase::Debrief);
    }

    #[test]
    fn buttons_only_work_in_their_phase() {
        let scripts = Scripts::default();
        let mut m = machine();

        let early_end = m.advance(&Utterance::button(UiEvent::EndSession, &scripts), &[], &classifier());
        assert!(early_end.is_ignored());
        assert_eq!(m.phase(), Phase::PreBrief);

        let meet = m.advance(&Utterance::button(UiEvent::MeetStakeholder, &scripts), &[], &classifier());
        assert_eq!(meet.transition, Some(Transition::ToSimulation));
        assert_eq!(meet.effects[0], Effect::AppendUser(scripts.meet_button_text.clone()));
        m.take_deferred();

        let late_meet = m.advance(&Utterance::button(UiEvent::MeetStakeholder, &scripts), &[], &classifier());
        assert!(late_meet.is_ignored());

        let end = m.advance(&Utterance::button(UiEvent::EndSession, &scripts), &[], &classifier());
        assert_eq!(end.transition, Some(Transition::ToDebrief));
        assert_eq!(end.effects[0], Effect::AppendUser(scripts.end_button_text.clone()));
    }

    #[test]
    fn button_needs_no_readiness_words() {
        let scripts = Scripts {
            meet_button_text: "Introduce me.".to_string(),
            ..Scripts::default()
        };
        let mut m = PhaseMachine::new(scripts.clone());
        let step = m.advance(&Utterance::button(UiEvent::MeetStakeholder, &scripts), &[], &classifier());
        assert_eq!(step.transition, Some(Transition::ToSimulation));
    }
}
