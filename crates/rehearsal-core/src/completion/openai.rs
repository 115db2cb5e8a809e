//! OpenAI-compatible chat completions (`POST {base}/chat/completions`, SSE).

use super::sse::{text_deltas, Delta, SseEvent};
use super::{CompletionProvider, CompletionRequest, FragmentStream};
use crate::error::CompletionError;
use crate::transcript::{ChatMessage, Role};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub struct OpenAiChat {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

impl OpenAiChat {
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

fn parse_event(event: &SseEvent) -> Result<Delta, CompletionError> {
    let data = event.data.trim();
    if data == "[DONE]" {
        return Ok(Delta::Done);
    }
    let chunk: StreamChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!("Skipping unparseable chunk: {} - data: {}", e, data);
            return Ok(Delta::Skip);
        }
    };
    if let Some(err) = chunk.error {
        return Err(CompletionError::Provider(err.message));
    }
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .map(Delta::Text)
        .unwrap_or(Delta::Skip))
}

#[async_trait]
impl CompletionProvider for OpenAiChat {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn open(&self, request: CompletionRequest) -> Result<FragmentStream, CompletionError> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(ChatMessage::new(Role::System, request.system));
        messages.extend(request.messages);

        let body = ChatBody {
            model: &request.model,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
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

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o".to_string(),
            system: "You are Noa".to_string(),
            messages: vec![ChatMessage::new(Role::User, "Hi")],
            temperature: 0.7,
            max_tokens: 800,
        }
    }

    fn sse(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/event-stream")
            .set_body_string(body.to_string())
    }

    #[tokio::test]
    async fn streams_delta_content_until_done() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4o",
                "stream": true,
                "max_tokens": 800,
                "messages": [
                    {"role": "system", "content": "You are Noa"},
                    {"role": "user", "content": "Hi"}
                ]
            })))
            .respond_with(sse(concat!(
                "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n\n",
                "data: [DONE]\n\n",
            )))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAiChat::new(server.uri(), "sk-test").unwrap();
        let text: Vec<String> = provider
            .open(request())
            .await
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(text, vec!["Hello", " there"]);
    }

    #[tokio::test]
    async fn http_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let provider = OpenAiChat::new(server.uri(), "sk-wrong").unwrap();
        match provider.open(request()).await {
            Err(CompletionError::Status { status, body }) => {
                assert_eq!(status, 401);
                assert_eq!(body, "bad key");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[test]
    fn error_payload_becomes_provider_error() {
        let event = SseEvent {
            event: None,
            data: r#"{"error":{"message":"overloaded"}}"#.to_string(),
        };
        assert!(matches!(parse_event(&event), Err(CompletionError::Provider(m)) if m == "overloaded"));
    }
}
