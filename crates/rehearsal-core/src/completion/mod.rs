//! Completion Driver.
//!
//! Turns transcript history plus the active persona into a lazy stream of
//! reply fragments. Providers only know how to open a raw text stream; the
//! driver owns the failure policy: whatever goes wrong, the caller sees a
//! single [`Fragment::Fallback`] and the stream ends.

mod anthropic;
mod openai;
mod scripted;
mod sse;

pub use anthropic::AnthropicMessages;
pub use openai::OpenAiChat;
pub use scripted::{ScriptedCompletion, ScriptedReply};

use crate::error::CompletionError;
use crate::persona::PersonaConfig;
use crate::settings::{CompletionSettings, ProviderKind, Secrets};
use crate::transcript::{ChatMessage, Role};
use async_stream::stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Raw provider output: text deltas or an error.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, CompletionError>> + Send>>;

/// Provider-neutral request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    /// Instruction of the persona that is answering.
    pub system: String,
    /// Conversation so far, without any system message.
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Send the request and return the streaming body.
    async fn open(&self, request: CompletionRequest) -> Result<FragmentStream, CompletionError>;
}

/// What the driver hands to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text(String),
    /// The provider failed; this apology replaces the reply. Always last.
    Fallback(String),
}

/// Builds the final reply text from fragments.
#[derive(Debug, Default)]
pub struct ReplyAggregator {
    text: String,
}

impl ReplyAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: &Fragment) {
        match fragment {
            Fragment::Text(t) => self.text.push_str(t),
            Fragment::Fallback(apology) => {
                self.text.clear();
                self.text.push_str(apology);
            }
        }
    }

    pub fn finish(self) -> String {
        self.text.trim().to_string()
    }
}

pub struct CompletionDriver {
    provider: Arc<dyn CompletionProvider>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    fallback: String,
}

impl CompletionDriver {
    pub fn new(provider: Arc<dyn CompletionProvider>, settings: &CompletionSettings) -> Self {
        Self {
            provider,
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            fallback: settings.fallback.clone(),
        }
    }

    /// Driver over the provider named in settings.
    pub fn from_settings(settings: &CompletionSettings, secrets: &Secrets) -> Result<Self, CompletionError> {
        let provider = provider_from_settings(settings, secrets)?;
        info!(
            "🧠 Completion provider: {} (model {})",
            provider.name(),
            settings.model
        );
        Ok(Self::new(provider, settings))
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// The persona's instruction becomes the system prompt; system messages in
    /// `history` are dropped.
    pub fn build_request(&self, history: &[ChatMessage], persona: &PersonaConfig) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            system: persona.instruction.clone(),
            messages: history
                .iter()
                .filter(|m| m.role != Role::System)
                .cloned()
                .collect(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// Stream a reply. Finite, lazy, and never fails: errors become one fallback fragment.
    pub fn stream_reply(
        &self,
        history: &[ChatMessage],
        persona: &PersonaConfig,
    ) -> impl Stream<Item = Fragment> + Send + 'static {
        let request = self.build_request(history, persona);
        let provider = Arc::clone(&self.provider);
        let fallback = self.fallback.clone();
        let speaker = persona.name.clone();

        stream! {
            debug!("Requesting {} reply ({} messages)", speaker, request.messages.len());
            let mut inner = match provider.open(request).await {
                Ok(inner) => inner,
                Err(e) => {
                    warn!("⚠️ {} completion failed to start: {}", provider.name(), e);
                    yield Fragment::Fallback(fallback);
                    return;
                }
            };

            let mut produced = false;
            while let Some(item) = inner.next().await {
                match item {
                    Ok(text) if text.is_empty() => {}
                    Ok(text) => {
                        produced |= !text.trim().is_empty();
                        yield Fragment::Text(text);
                    }
                    Err(e) => {
                        warn!("⚠️ {} completion stream failed: {}", provider.name(), e);
                        yield Fragment::Fallback(fallback);
                        return;
                    }
                }
            }
            if !produced {
                warn!("⚠️ {} returned an empty reply", provider.name());
                yield Fragment::Fallback(fallback);
            }
        }
    }
}

/// Pick the provider named in settings; HTTP providers need their API key.
pub fn provider_from_settings(
    settings: &CompletionSettings,
    secrets: &Secrets,
) -> Result<Arc<dyn CompletionProvider>, CompletionError> {
    let base = settings.endpoint();
    match settings.provider {
        ProviderKind::OpenAi => {
            let key = secrets
                .openai_api_key
                .clone()
                .ok_or_else(|| CompletionError::Config("OPENAI_API_KEY is not set".to_string()))?;
            Ok(Arc::new(OpenAiChat::new(base, key)?))
        }
        ProviderKind::Anthropic => {
            let key = secrets
                .anthropic_api_key
                .clone()
                .ok_or_else(|| CompletionError::Config("ANTHROPIC_API_KEY is not set".to_string()))?;
            Ok(Arc::new(AnthropicMessages::new(base, key)?))
        }
        ProviderKind::Scripted => Ok(Arc::new(ScriptedCompletion::offline())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persona() -> PersonaConfig {
        PersonaConfig {
            name: "Sam Richards".to_string(),
            avatar: String::new(),
            voice: "onyx".to_string(),
            instruction: "You are Sam".to_string(),
            profile: Vec::new(),
        }
    }

    fn history() -> Vec<ChatMessage> {
        vec![
            ChatMessage::new(Role::System, "You are Noa"),
            ChatMessage::new(Role::User, "Hi Sam"),
        ]
    }

    async fn collect(driver: &CompletionDriver) -> Vec<Fragment> {
        driver.stream_reply(&history(), &persona()).collect().await
    }

    #[test]
    fn request_carries_persona_instruction_and_settings() {
        let driver = CompletionDriver::new(
            Arc::new(ScriptedCompletion::new(Vec::new())),
            &CompletionSettings::default(),
        );
        let request = driver.build_request(&history(), &persona());
        assert_eq!(request.system, "You are Sam");
        assert_eq!(request.messages, vec![ChatMessage::new(Role::User, "Hi Sam")]);
        assert_eq!(request.model, "gpt-4o");
        assert_eq!(request.max_tokens, 800);
    }

    #[tokio::test]
    async fn fragments_pass_through_in_order() {
        let provider = ScriptedCompletion::new(vec![ScriptedReply::fragments(["Look, ", "I'm busy."])]);
        let driver = CompletionDriver::new(Arc::new(provider), &CompletionSettings::default());
        assert_eq!(
            collect(&driver).await,
            vec![
                Fragment::Text("Look, ".to_string()),
                Fragment::Text("I'm busy.".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn mid_stream_failure_ends_with_one_fallback() {
        let settings = CompletionSettings::default();
        let provider = ScriptedCompletion::new(vec![ScriptedReply::FailAfter(vec!["Partial".to_string()])]);
        let driver = CompletionDriver::new(Arc::new(provider), &settings);

        let fragments = collect(&driver).await;
        assert_eq!(
            fragments,
            vec![
                Fragment::Text("Partial".to_string()),
                Fragment::Fallback(settings.fallback.clone())
            ]
        );

        let mut agg = ReplyAggregator::new();
        fragments.iter().for_each(|f| agg.push(f));
        assert_eq!(agg.finish(), settings.fallback);
    }

    #[tokio::test]
    async fn refused_request_and_empty_reply_fall_back() {
        let settings = CompletionSettings::default();
        let provider = ScriptedCompletion::new(vec![ScriptedReply::Refuse, ScriptedReply::fragments([""])]);
        let driver = CompletionDriver::new(Arc::new(provider), &settings);

        assert_eq!(collect(&driver).await, vec![Fragment::Fallback(settings.fallback.clone())]);
        assert_eq!(collect(&driver).await, vec![Fragment::Fallback(settings.fallback.clone())]);
    }

    #[tokio::test]
    async fn whitespace_only_reply_falls_back() {
        let settings = CompletionSettings::default();
        let provider = ScriptedCompletion::new(vec![ScriptedReply::fragments(["  ", "\n"])]);
        let driver = CompletionDriver::new(Arc::new(provider), &settings);

        let fragments = collect(&driver).await;
        assert_eq!(fragments.last(), Some(&Fragment::Fallback(settings.fallback.clone())));

        let mut agg = ReplyAggregator::new();
        fragments.iter().for_each(|f| agg.push(f));
        assert_eq!(agg.finish(), settings.fallback);
    }

    #[test]
    fn aggregator_trims() {
        let mut agg = ReplyAggregator::new();
        agg.push(&Fragment::Text("  Hello".to_string()));
        agg.push(&Fragment::Text(" there \n".to_string()));
        assert_eq!(agg.finish(), "Hello there");
    }

    #[test]
    fn http_providers_need_keys() {
        let settings = CompletionSettings::default();
        assert!(matches!(
            provider_from_settings(&settings, &Secrets::default()),
            Err(CompletionError::Config(_))
        ));
        let scripted = CompletionSettings {
            provider: ProviderKind::Scripted,
            ..CompletionSettings::default()
        };
        let provider = provider_from_settings(&scripted, &Secrets::default()).unwrap();
        assert_eq!(provider.name(), "scripted");
    }
}
