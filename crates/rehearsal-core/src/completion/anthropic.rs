//! Anthropic Messages API (`POST {base}/messages`, SSE).
//!
//! The system prompt is a top-level field, and the message list must start
//! with a user turn and alternate roles, so history is normalized first.

use super::sse::{text_deltas, Delta, SseEvent};
use super::{CompletionProvider, CompletionRequest, FragmentStream};
use crate::error::CompletionError;
use crate::transcript::{ChatMessage, Role};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Stands in for the trainee when the history opens with an assistant turn
/// (the scripted welcome always does).
const OPENING_NUDGE: &str = "(The session begins.)";

pub struct AnthropicMessages {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    system: &'a str,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize, Debug, PartialEq)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta { delta: BlockDelta },
    MessageStop,
    Error { error: ApiError },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

impl AnthropicMessages {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, CompletionError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| CompletionError::Config(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }
}

/// Merge consecutive same-role messages and make sure the first one is from the user.
fn normalize(messages: Vec<ChatMessage>) -> Vec<WireMessage> {
    let mut out: Vec<WireMessage> = Vec::with_capacity(messages.len() + 1);
    for m in messages {
        let role = match m.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => continue,
        };
        match out.last_mut() {
            Some(last) if last.role == role => {
                last.content.push_str("\n\n");
                last.content.push_str(&m.content);
            }
            _ => out.push(WireMessage {
                role,
                content: m.content,
            }),
        }
    }
    if out.first().map_or(true, |m| m.role != "user") {
        out.insert(
            0,
            WireMessage {
                role: "user",
                content: OPENING_NUDGE.to_string(),
            },
        );
    }
    out
}

fn parse_event(event: &SseEvent) -> Result<Delta, CompletionError> {
    let parsed: StreamEvent = match serde_json::from_str(&event.data) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("Skipping unparseable event {:?}: {}", event.event, e);
            return Ok(Delta::Skip);
        }
    };
    match parsed {
        StreamEvent::ContentBlockDelta {
            delta: BlockDelta::TextDelta { text },
        } => Ok(Delta::Text(text)),
        StreamEvent::MessageStop => Ok(Delta::Done),
        StreamEvent::Error { error } => Err(CompletionError::Provider(error.message)),
        _ => Ok(Delta::Skip),
    }
}

#[async_trait]
impl CompletionProvider for AnthropicMessages {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn open(&self, request: CompletionRequest) -> Result<FragmentStream, CompletionError> {
        let body = MessagesBody {
            model: &request.model,
            system: &request.system,
            messages: normalize(request.messages.clone()),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: true,
        };

        let url = format!("{}/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }
        debug!("HTTP {} OK - SSE stream established", status);

        Ok(text_deltas(response.bytes_stream(), parse_event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn normalize_merges_and_leads_with_user() {
        let wire = normalize(vec![
            ChatMessage::new(Role::Assistant, "Welcome!"),
            ChatMessage::new(Role::User, "I'm ready"),
            ChatMessage::new(Role::Assistant, "Great, meet Sam."),
            ChatMessage::new(Role::Assistant, "Hey, I'm Sam."),
        ]);
        assert_eq!(wire.len(), 4);
        assert_eq!(wire[0].role, "user");
        assert_eq!(wire[0].content, OPENING_NUDGE);
        assert_eq!(wire[3].role, "assistant");
        assert_eq!(wire[3].content, "Great, meet Sam.\n\nHey, I'm Sam.");
    }

    #[test]
    fn normalize_empty_history_still_has_a_user_turn() {
        let wire = normalize(Vec::new());
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0].role, "user");
    }

    #[tokio::test]
    async fn streams_text_deltas_until_message_stop() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("x-api-key", "ak-test"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(json!({
                "model": "claude-3-5-sonnet-latest",
                "system": "You are Sam",
                "stream": true,
                "max_tokens": 800
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(concat!(
                        "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{}}\n\n",
                        "event: ping\ndata: {\"type\":\"ping\"}\n\n",
                        "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Look,\"}}\n\n",
                        "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\" no.\"}}\n\n",
                        "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
                    )),
            )
            .expect(1)
            .mount(&server)
            .await;

        let provider = AnthropicMessages::new(server.uri(), "ak-test").unwrap();
        let request = CompletionRequest {
            model: "claude-3-5-sonnet-latest".to_string(),
            system: "You are Sam".to_string(),
            messages: vec![ChatMessage::new(Role::User, "Hello Sam")],
            temperature: 0.7,
            max_tokens: 800,
        };
        let text: String = provider
            .open(request)
            .await
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(text, "Look, no.");
    }

    #[test]
    fn error_event_is_a_provider_error() {
        let event = SseEvent {
            event: Some("error".to_string()),
            data: r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#
                .to_string(),
        };
        assert!(matches!(parse_event(&event), Err(CompletionError::Provider(m)) if m == "Overloaded"));
    }
}
