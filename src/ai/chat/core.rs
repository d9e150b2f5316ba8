use futures::stream::{self, BoxStream};
use futures_util::StreamExt;

use super::models::{Transcript, Turn, TurnRole};
use crate::core::config::{ModelConfig, Settings};
use crate::openai::{CompletionClient, CompletionError, Message, Role, StreamRequest};

pub type BoxedCompletionClient = Box<dyn CompletionClient + 'static>;

/// Why an exchange failed. Callers branch on this rather than on the
/// message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No API key was configured so nothing was sent.
    MissingCredential,
    /// The API refused the key, model or parameters.
    CollaboratorRejected,
    TransportFailure,
    Unknown,
}

impl From<&CompletionError> for ErrorKind {
    fn from(err: &CompletionError) -> Self {
        match err {
            CompletionError::Rejected(_) => ErrorKind::CollaboratorRejected,
            CompletionError::Transport(_) => ErrorKind::TransportFailure,
            CompletionError::Unknown(_) => ErrorKind::Unknown,
        }
    }
}

/// Everything received so far for the in-flight reply.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialResult {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TerminalResult {
    Success { final_text: String },
    Failure { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Partial(PartialResult),
    Terminal(TerminalResult),
}

/// Scratch buffer for one exchange. Fragments are appended verbatim
/// in the order they arrive. Dropping it discards the partial reply.
#[derive(Debug, Default)]
struct StreamAccumulator {
    buffer: String,
}

impl StreamAccumulator {
    fn push(&mut self, fragment: &str) -> PartialResult {
        self.buffer.push_str(fragment);
        PartialResult {
            text: self.buffer.clone(),
        }
    }

    fn len(&self) -> usize {
        self.buffer.len()
    }

    fn into_text(self) -> String {
        self.buffer
    }
}

/// Convert the history plus the new user text into the messages sent
/// to the API. No system message is added.
pub fn build_request(history: &[Turn], new_user_text: &str, config: &ModelConfig) -> StreamRequest {
    let mut messages: Vec<Message> = history
        .iter()
        .map(|turn| match turn.role() {
            TurnRole::User => Message::new(Role::User, turn.content()),
            TurnRole::Assistant => Message::new(Role::Assistant, turn.content()),
        })
        .collect();
    messages.push(Message::new(Role::User, new_user_text));

    StreamRequest {
        messages,
        model: config.model.clone(),
        temperature: config.temperature,
    }
}

/// Runs exactly one request/response cycle against a completion
/// backend.
pub struct StreamingSession<'c> {
    client: &'c dyn CompletionClient,
    credential: Option<String>,
}

impl<'c> StreamingSession<'c> {
    pub fn new(client: &'c dyn CompletionClient, credential: Option<&str>) -> Self {
        Self {
            client,
            credential: credential.map(str::to_string),
        }
    }

    /// Streams the reply to `new_user_text` given the prior `history`.
    ///
    /// Every fragment produces a `SessionEvent::Partial` with the full
    /// text so far and the stream always ends with exactly one
    /// `SessionEvent::Terminal`. The reply is appended to `store` as an
    /// assistant turn only when the backend finishes cleanly. Errors
    /// and dropping the stream early leave `store` untouched.
    pub fn run<'a>(
        self,
        store: &'a mut Transcript,
        history: &[Turn],
        new_user_text: &str,
        config: &ModelConfig,
    ) -> BoxStream<'a, SessionEvent> {
        let Some(credential) = self.credential.filter(|c| !c.is_empty()) else {
            tracing::warn!("Refusing to start a chat completion without an API key");
            return Box::pin(stream::once(async {
                SessionEvent::Terminal(TerminalResult::Failure {
                    kind: ErrorKind::MissingCredential,
                    message: String::from("An API key is required to start chatting"),
                })
            }));
        };

        let request = build_request(history, new_user_text, config);
        tracing::debug!(
            "Starting chat completion with {} messages using {}",
            request.messages.len(),
            request.model
        );
        let mut fragments = self.client.stream(request, &credential);

        Box::pin(async_stream::stream! {
            let mut accumulator = StreamAccumulator::default();

            while let Some(fragment) = fragments.next().await {
                match fragment {
                    Ok(text) => {
                        yield SessionEvent::Partial(accumulator.push(&text));
                    }
                    Err(err) => {
                        tracing::warn!(
                            "Chat completion failed after {} bytes: {}",
                            accumulator.len(),
                            err
                        );
                        yield SessionEvent::Terminal(TerminalResult::Failure {
                            kind: ErrorKind::from(&err),
                            message: err.to_string(),
                        });
                        return;
                    }
                }
            }

            let final_text = accumulator.into_text();
            store.append(Turn::assistant(&final_text));
            tracing::debug!("Chat completion finished with {} bytes", final_text.len());
            yield SessionEvent::Terminal(TerminalResult::Success { final_text });
        })
    }
}

/// A single conversation: the transcript, the user's settings and the
/// backend used to answer.
///
/// Use `ChatBuilder` to construct a `Chat`.
pub struct Chat {
    client: BoxedCompletionClient,
    settings: Settings,
    transcript: Transcript,
}

impl Chat {
    /// Send the next user message and stream back the reply.
    ///
    /// The user turn is recorded before the request goes out unless
    /// there is no API key, in which case nothing is recorded and the
    /// stream only contains the failure.
    pub fn send(&mut self, text: &str) -> BoxStream<'_, SessionEvent> {
        let credential = self.settings.effective_credential();
        let history = self.transcript.snapshot();
        if credential.is_some() {
            self.transcript.append(Turn::user(text));
        }

        StreamingSession::new(self.client.as_ref(), credential).run(
            &mut self.transcript,
            &history,
            text,
            self.settings.model_config(),
        )
    }

    pub fn clear(&mut self) {
        tracing::debug!("Clearing {} turns", self.transcript.len());
        self.transcript.clear()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}

pub struct ChatBuilder {
    client: BoxedCompletionClient,
    settings: Settings,
    transcript: Transcript,
}

impl ChatBuilder {
    pub fn new(client: BoxedCompletionClient, settings: Settings) -> Self {
        Self {
            client,
            settings,
            transcript: Transcript::new(),
        }
    }

    pub fn build(self) -> Chat {
        Chat {
            client: self.client,
            settings: self.settings,
            transcript: self.transcript,
        }
    }

    pub fn transcript(mut self, turns: Vec<Turn>) -> Self {
        self.transcript = Transcript::new_with_turns(turns);
        self
    }
}
