//! Canned completions for offline runs and tests.

use super::{CompletionProvider, CompletionRequest, FragmentStream};
use crate::error::CompletionError;
use crate::transcript::Role;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// One queued reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    Fragments(Vec<String>),
    /// Stream these fragments, then break.
    FailAfter(Vec<String>),
    /// Fail before any fragment (like an HTTP error).
    Refuse,
}

impl ScriptedReply {
    pub fn fragments<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Fragments(parts.into_iter().map(Into::into).collect())
    }

    pub fn text(reply: &str) -> Self {
        Self::Fragments(reply.split_inclusive(' ').map(str::to_string).collect())
    }
}

/// Plays queued replies in order; once the queue is empty it echoes the
/// trainee's last message.
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Echo-only provider for `--offline`.
    pub fn offline() -> Self {
        Self::default()
    }

    pub fn push(&self, reply: ScriptedReply) {
        lock(&self.replies).push_back(reply);
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }

    fn echo(request: &CompletionRequest) -> ScriptedReply {
        let said = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("nothing yet");
        ScriptedReply::text(&format!("[offline] I heard: \"{}\"", said))
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompletion {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn open(&self, request: CompletionRequest) -> Result<FragmentStream, CompletionError> {
        let reply = lock(&self.replies)
            .pop_front()
            .unwrap_or_else(|| Self::echo(&request));
        lock(&self.requests).push(request);

        let items: Vec<Result<String, CompletionError>> = match reply {
            ScriptedReply::Refuse => {
                return Err(CompletionError::Status {
                    status: 503,
                    body: "scripted refusal".to_string(),
                })
            }
            ScriptedReply::Fragments(parts) => parts.into_iter().map(Ok).collect(),
            ScriptedReply::FailAfter(parts) => parts
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(CompletionError::Stream(
                    "scripted disconnect".to_string(),
                ))))
                .collect(),
        };
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
