//! Session settings: scenario content, persona configuration and provider parameters.
//!
//! Loaded with the `config` crate from a TOML file (`REHEARSAL_SETTINGS`, default
//! `settings.toml`) and overridden by `REHEARSAL__SECTION__KEY` environment
//! variables. Every field has a built-in default, so a partial file is fine and
//! a broken one falls back to the defaults. Secrets never live here; see [`Secrets`].

use crate::error::SettingsError;
use crate::persona::{Persona, PersonaConfig, Roster, TraineeConfig};
use crate::readiness::TriggerPhrases;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub const SETTINGS_PATH_ENV: &str = "REHEARSAL_SETTINGS";
pub const DEFAULT_SETTINGS_PATH: &str = "settings.toml";

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub title: String,
    pub intro: String,
    pub warning: String,
    /// Apology shown with an incident reference id.
    pub error_message: String,
    /// Longest accepted utterance, in characters.
    pub max_input_chars: usize,
    pub trainee: TraineeConfig,
    pub instructor: PersonaConfig,
    pub stakeholder: PersonaConfig,
    pub scripts: Scripts,
    pub placeholders: Placeholders,
    pub triggers: TriggerPhrases,
    pub completion: CompletionSettings,
    pub speech: SpeechSettings,
}

/// Fixed lines spoken at scripted moments, and the canonical button texts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scripts {
    pub welcome: String,
    pub transition: String,
    pub stakeholder_opening: String,
    /// Scripted debrief opener. When unset the instructor generates one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debrief_opening: Option<String>,
    pub meet_button_label: String,
    pub meet_button_text: String,
    pub end_button_label: String,
    pub end_button_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Placeholders {
    pub pre_brief: String,
    pub simulation: String,
    pub debrief: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    /// Canned replies, no network.
    Scripted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionSettings {
    pub provider: ProviderKind,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Apology used whenever the provider fails mid-turn.
    pub fallback: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechSettings {
    pub base_url: String,
    pub tts_model: String,
    pub stt_model: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            title: "Columbia University School of Nursing: Implementing Flu Vaccination Program"
                .to_string(),
            intro: "Welcome to the simulation. You will prepare with your clinical instructor, \
                    meet the operations manager of a county corrections facility, and then \
                    debrief on how the conversation went."
                .to_string(),
            warning: "This is a simulation. The characters are AI generated.".to_string(),
            error_message: "😞 Oops! An unexpected error occurred. Please try again. If the \
                            error persists, please contact the administrator."
                .to_string(),
            max_input_chars: 4000,
            trainee: TraineeConfig {
                name: "Public Health Nurse".to_string(),
                avatar: "assets/User.png".to_string(),
            },
            instructor: PersonaConfig {
                name: "Noa Martinez".to_string(),
                avatar: "assets/Noa.jpg".to_string(),
                voice: "nova".to_string(),
                instruction: "You are Noa Martinez, a clinical nursing instructor at Columbia \
                              University School of Nursing. Help the public health nurse prepare \
                              to propose a flu vaccination program to Sam Richards, the operations \
                              manager of a county corrections facility. Keep answers short. When \
                              the nurse seems prepared, ask whether they are ready to meet Sam. \
                              After the meeting, give specific, constructive feedback on how they \
                              handled Sam's concerns."
                    .to_string(),
                profile: vec![
                    "Position: Clinical Nursing Instructor".to_string(),
                    "Institution: Columbia University School of Nursing".to_string(),
                ],
            },
            stakeholder: PersonaConfig {
                name: "Sam Richards".to_string(),
                avatar: "assets/Sam.jpg".to_string(),
                voice: "onyx".to_string(),
                instruction: "You are Sam Richards, operations manager of a county corrections \
                              facility for 14 years. You are skeptical of a new flu vaccination \
                              program: the facility is understaffed, houses 500 inmates and every \
                              movement is a security concern. Push back, ask hard questions and \
                              only warm up when the nurse addresses your concerns concretely. \
                              Stay in character."
                    .to_string(),
                profile: vec![
                    "Position: Operations Manager".to_string(),
                    "Years in Position: 14".to_string(),
                    "Facility: County Corrections Facility".to_string(),
                ],
            },
            scripts: Scripts::default(),
            placeholders: Placeholders::default(),
            triggers: TriggerPhrases::default(),
            completion: CompletionSettings::default(),
            speech: SpeechSettings::default(),
        }
    }
}

impl Default for Scripts {
    fn default() -> Self {
        Self {
            welcome: "Hi there! I'm Noa Martinez, one of the clinical instructors here at \
                      Columbia. I'll be guiding you through today's simulation. We're going to \
                      practice some change management skills in a challenging setting - \
                      implementing a flu vaccination program at a county corrections facility. \
                      Before we start, do you have any questions about the scenario or would you \
                      like to discuss your approach?"
                .to_string(),
            transition: "Great! I'll introduce you to Sam now. Remember to focus on addressing \
                         his specific concerns while emphasizing the benefits to his facility. \
                         Good luck!"
                .to_string(),
            stakeholder_opening: "Hey there, I'm Sam Richards. So, you're here to talk about \
                                  this new flu vaccination program, right? Look, I've got 500 \
                                  inmates to manage, an understaffed facility, and security \
                                  concerns you wouldn't believe. I'm not sure how you expect this \
                                  to work. What's your plan here?"
                .to_string(),
            debrief_opening: None,
            meet_button_label: "👨‍💼 I'm Ready to Meet Sam".to_string(),
            meet_button_text: "I'm ready to meet Sam.".to_string(),
            end_button_label: "End Session & Get Feedback".to_string(),
            end_button_text: "Ready for feedback on my conversation with Sam.".to_string(),
        }
    }
}

impl Default for Placeholders {
    fn default() -> Self {
        Self {
            pre_brief: "Chat with Noa to prepare for your meeting with Sam...".to_string(),
            simulation: "Chat with Sam Richards about implementing the flu vaccination program..."
                .to_string(),
            debrief: "Ask Noa questions about your feedback or the simulation...".to_string(),
        }
    }
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: "gpt-4o".to_string(),
            temperature: 0.7,
            max_tokens: 800,
            base_url: None,
            fallback: "I'm sorry, there was an issue generating a response. Let's try again."
                .to_string(),
        }
    }
}

impl CompletionSettings {
    /// Configured base URL, or the provider's public endpoint.
    pub fn endpoint(&self) -> &str {
        match (&self.base_url, self.provider) {
            (Some(url), _) => url.trim_end_matches('/'),
            (None, ProviderKind::Anthropic) => ANTHROPIC_API_BASE,
            (None, _) => OPENAI_API_BASE,
        }
    }
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            base_url: OPENAI_API_BASE.to_string(),
            tts_model: "tts-1".to_string(),
            stt_model: "whisper-1".to_string(),
        }
    }
}

impl SessionSettings {
    /// Settings path from `REHEARSAL_SETTINGS`, else `settings.toml`.
    pub fn default_path() -> PathBuf {
        env_opt_string(SETTINGS_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH))
    }

    /// Layer the file at `path` (if it exists) and `REHEARSAL__*` env vars over the defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let builder = config::Config::builder();
        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };
        let built = builder
            .add_source(config::Environment::with_prefix("REHEARSAL").separator("__"))
            .build()?;
        Ok(built.try_deserialize()?)
    }

    /// Like [`SessionSettings::load`], but any failure is logged and the defaults are used.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(settings) => {
                info!("⚙️ Settings loaded ({})", path.display());
                settings
            }
            Err(e) => {
                error!("Error loading settings from {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Effective settings as TOML.
    pub fn to_toml(&self) -> Result<String, SettingsError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn roster(&self) -> Roster<'_> {
        Roster {
            trainee: &self.trainee,
            instructor: &self.instructor,
            stakeholder: &self.stakeholder,
        }
    }

    pub fn persona(&self, persona: Persona) -> &PersonaConfig {
        match persona {
            Persona::Instructor => &self.instructor,
            Persona::Stakeholder => &self.stakeholder,
        }
    }
}

/// Credentials read from the environment (`.env` is loaded by the binary).
#[derive(Clone, Default)]
pub struct Secrets {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub access_code: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self {
            openai_api_key: env_opt_string("OPENAI_API_KEY"),
            anthropic_api_key: env_opt_string("ANTHROPIC_API_KEY"),
            access_code: env_opt_string("REHEARSAL_ACCESS_CODE"),
        }
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |v: &Option<String>| if v.is_some() { "set" } else { "unset" };
        f.debug_struct("Secrets")
            .field("openai_api_key", &mask(&self.openai_api_key))
            .field("anthropic_api_key", &mask(&self.anthropic_api_key))
            .field("access_code", &mask(&self.access_code))
            .finish()
    }
}

fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
