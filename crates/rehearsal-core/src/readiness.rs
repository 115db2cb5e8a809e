//! Readiness Detector: decides whether free text means "move on".
//!
//! Classification is pluggable behind [`ReadinessClassifier`]; the shipped
//! [`PhraseClassifier`] matches configurable phrase lists case-insensitively on
//! word boundaries. It is pure: no I/O, no state, same answer every time.

use crate::persona::Persona;
use crate::transcript::Turn;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// Outcome of classifying one utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Confirmed,
    Unclear,
    Declined,
}

pub trait ReadinessClassifier: Send + Sync {
    /// Is the trainee ready to leave the pre-brief? `recent` is the dialogue so far.
    fn classify_prebrief(&self, text: &str, recent: &[Turn]) -> Verdict;

    /// Is the trainee asking to end the simulation?
    fn classify_debrief(&self, text: &str) -> Verdict;

    /// Did the instructor just ask whether the trainee is ready?
    fn readiness_prompted(&self, recent: &[Turn]) -> bool;
}

pub fn detect_prebrief_ready(classifier: &dyn ReadinessClassifier, text: &str, recent: &[Turn]) -> bool {
    classifier.classify_prebrief(text, recent) == Verdict::Confirmed
}

pub fn detect_debrief_ready(classifier: &dyn ReadinessClassifier, text: &str) -> bool {
    classifier.classify_debrief(text) == Verdict::Confirmed
}

/// Phrase lists driving [`PhraseClassifier`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerPhrases {
    /// Words that signal readiness on their own.
    pub readiness: Vec<String>,
    /// Weak agreement ("yes", "ok"...).
    pub affirmatives: Vec<String>,
    /// Instructor phrasings that count as asking for readiness.
    pub readiness_questions: Vec<String>,
    pub declines: Vec<String>,
    /// Requests to end the simulation.
    pub closing: Vec<String>,
    /// How many recent turns to search for the instructor's readiness question.
    pub question_window: usize,
    /// When set, weak affirmatives only count after a readiness question.
    pub strict_affirmatives: bool,
}

fn phrases(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for TriggerPhrases {
    fn default() -> Self {
        Self {
            readiness: phrases(&["ready", "begin", "start", "let's"]),
            affirmatives: phrases(&["yes", "yeah", "yep", "sure", "ok", "okay"]),
            readiness_questions: phrases(&[
                "ready to start",
                "ready to meet",
                "would you like to meet",
                "ready for the simulation",
                "are you ready",
                "shall we begin",
            ]),
            declines: phrases(&["not yet", "not ready", "hold on", "wait a", "one moment", "no,"]),
            closing: phrases(&[
                "ready for feedback",
                "end session",
                "end this",
                "finish",
                "complete",
                "goodbye",
                "feedback",
                "wrap up",
                "debrief",
            ]),
            question_window: 3,
            strict_affirmatives: false,
        }
    }
}

/// Compiled alternation of phrases. An empty list never matches.
#[derive(Debug, Clone)]
struct PhraseSet(Option<Regex>);

impl PhraseSet {
    fn compile(list: &[String]) -> Result<Self, regex::Error> {
        let alternatives: Vec<String> = list
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(bounded)
            .collect();
        if alternatives.is_empty() {
            return Ok(Self(None));
        }
        let pattern = format!("(?:{})", alternatives.join("|"));
        let regex = RegexBuilder::new(&pattern).case_insensitive(true).build()?;
        Ok(Self(Some(regex)))
    }

    fn matches(&self, text: &str) -> bool {
        self.0.as_ref().is_some_and(|r| r.is_match(text))
    }
}

/// One phrase as a regex. Word boundaries only apply at word characters, so
/// "no," matches "No, later" but not "No problem".
fn bounded(phrase: &str) -> String {
    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
    // Accept straight and curly apostrophes, or none ("lets").
    let body = regex::escape(&phrase.to_lowercase())
        .replace('\'', "['’]?")
        .replace(' ', r"\s+");
    let lead = if is_word(phrase.chars().next()) { r"\b" } else { "" };
    let tail = if is_word(phrase.chars().last()) { r"\b" } else { "" };
    format!("{}{}{}", lead, body, tail)
}

/// Default classifier over [`TriggerPhrases`].
#[derive(Debug, Clone)]
pub struct PhraseClassifier {
    readiness: PhraseSet,
    affirmatives: PhraseSet,
    questions: PhraseSet,
    declines: PhraseSet,
    closing: PhraseSet,
    window: usize,
    strict_affirmatives: bool,
}

impl PhraseClassifier {
    pub fn new(phrases: &TriggerPhrases) -> Result<Self, regex::Error> {
        Ok(Self {
            readiness: PhraseSet::compile(&phrases.readiness)?,
            affirmatives: PhraseSet::compile(&phrases.affirmatives)?,
            questions: PhraseSet::compile(&phrases.readiness_questions)?,
            declines: PhraseSet::compile(&phrases.declines)?,
            closing: PhraseSet::compile(&phrases.closing)?,
            window: phrases.question_window,
            strict_affirmatives: phrases.strict_affirmatives,
        })
    }
}

impl ReadinessClassifier for PhraseClassifier {
    fn classify_prebrief(&self, text: &str, recent: &[Turn]) -> Verdict {
        if self.declines.matches(text) {
            return Verdict::Declined;
        }
        let asked = self.readiness_prompted(recent);
        if asked || self.readiness.matches(text) {
            return Verdict::Confirmed;
        }
        if !self.strict_affirmatives && self.affirmatives.matches(text) {
            return Verdict::Confirmed;
        }
        Verdict::Unclear
    }

    fn classify_debrief(&self, text: &str) -> Verdict {
        if self.closing.matches(text) {
            Verdict::Confirmed
        } else {
            Verdict::Unclear
        }
    }

    fn readiness_prompted(&self, recent: &[Turn]) -> bool {
        let window = &recent[recent.len().saturating_sub(self.window)..];
        window
            .iter()
            .rev()
            .find(|t| t.is_from(Persona::Instructor))
            .is_some_and(|t| self.questions.matches(t.text()))
    }
}
