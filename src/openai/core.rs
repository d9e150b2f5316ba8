use futures::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub enum Role {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "assistant")]
    Assistant,
    #[serde(rename = "user")]
    User,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: &str) -> Self {
        Message {
            role,
            content: content.to_string(),
        }
    }
}

/// Everything needed for one streamed chat completion besides the
/// credential.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamRequest {
    pub messages: Vec<Message>,
    pub model: String,
    pub temperature: f64,
}

/// Failures surfaced by a completion backend, already sorted into the
/// buckets callers branch on.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompletionError {
    /// The API refused the request: bad key, unknown model, invalid
    /// parameters.
    #[error("Request rejected: {0}")]
    Rejected(String),
    /// Couldn't connect, or the connection died part way through.
    #[error("Transport failure: {0}")]
    Transport(String),
    #[error("{0}")]
    Unknown(String),
}

impl CompletionError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_body() || err.is_request() {
            CompletionError::Transport(err.to_string())
        } else {
            CompletionError::Unknown(err.to_string())
        }
    }

    fn from_status(status: StatusCode, body: &str) -> Self {
        // Prefer the message from the API's error envelope if there is one
        let message = serde_json::from_str::<ApiErrorResponse>(body)
            .map(|resp| resp.error.message)
            .unwrap_or_else(|_| format!("{} {}", status, body.trim()));

        match status.as_u16() {
            400 | 401 | 403 | 404 | 422 => CompletionError::Rejected(message),
            408 | 429 | 500..=599 => CompletionError::Transport(message),
            _ => CompletionError::Unknown(message),
        }
    }

    fn from_api_error(error: ApiError) -> Self {
        match error.r#type.as_deref() {
            Some("invalid_request_error")
            | Some("authentication_error")
            | Some("permission_error")
            | Some("not_found_error") => CompletionError::Rejected(error.message),
            _ => CompletionError::Unknown(error.message),
        }
    }
}

/// A streaming chat completion backend. Implementations must yield
/// text fragments in the order they were generated and end the stream
/// after the first error.
pub trait CompletionClient: Send + Sync {
    fn stream(
        &self,
        request: StreamRequest,
        credential: &str,
    ) -> BoxStream<'static, Result<String, CompletionError>>;
}

/// Client for any OpenAI compatible chat completions API.
#[derive(Clone, Debug)]
pub struct OpenAiClient {
    api_hostname: String,
}

impl OpenAiClient {
    pub fn new(api_hostname: &str) -> Self {
        Self {
            api_hostname: api_hostname.to_string(),
        }
    }
}

impl CompletionClient for OpenAiClient {
    fn stream(
        &self,
        request: StreamRequest,
        credential: &str,
    ) -> BoxStream<'static, Result<String, CompletionError>> {
        completion_stream(request, &self.api_hostname, credential)
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
    #[serde(default)]
    r#type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionChunkChoice {
    #[serde(default)]
    delta: Delta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<CompletionChunkChoice>,
}

// Errors can show up in the middle of an otherwise successful stream
// so each payload is checked for the error envelope first.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StreamPayload {
    Error(ApiErrorResponse),
    Chunk(CompletionChunk),
}

/// What a single SSE `data:` payload means for the caller.
#[derive(Debug, PartialEq)]
enum SseData {
    Fragment(String),
    Finished(Option<String>),
    Skip,
}

fn parse_sse_data(data: &str) -> Result<SseData, CompletionError> {
    if data == "[DONE]" {
        return Ok(SseData::Finished(None));
    }

    let payload = serde_json::from_str::<StreamPayload>(data).map_err(|e| {
        tracing::error!("Parsing completion chunk failed for {}\nError:{}", data, e);
        CompletionError::Unknown(format!("Malformed completion chunk: {}", e))
    })?;

    let chunk = match payload {
        StreamPayload::Error(resp) => return Err(CompletionError::from_api_error(resp.error)),
        StreamPayload::Chunk(chunk) => chunk,
    };

    // Usage-only chunks have no choices
    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(SseData::Skip);
    };

    let content = choice.delta.content.filter(|c| !c.is_empty());
    match (content, choice.finish_reason) {
        (content, Some(_)) => Ok(SseData::Finished(content)),
        (Some(content), None) => Ok(SseData::Fragment(content)),
        (None, None) => Ok(SseData::Skip),
    }
}

const EVENT_DELIMITERS: [&[u8]; 3] = [b"\r\n\r\n", b"\n\n", b"\r\r"];

/// Pull the next complete SSE event out of `buffer`, leaving any
/// partial event in place for the next network chunk. Events end with
/// a blank line in any of the line ending styles SSE allows.
fn next_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let (end, delimiter_len) = (0..buffer.len()).find_map(|i| {
        let rest = &buffer[i..];
        EVENT_DELIMITERS
            .into_iter()
            .find(|delimiter| rest.starts_with(delimiter))
            .map(|delimiter| (i, delimiter.len()))
    })?;
    let event: Vec<u8> = buffer.drain(..end + delimiter_len).collect();
    Some(event[..end].to_vec())
}

/// Streams a chat completion, yielding each text delta as it
/// arrives. Dropping the returned stream drops the response body which
/// closes the connection.
pub fn completion_stream(
    request: StreamRequest,
    api_hostname: &str,
    api_key: &str,
) -> BoxStream<'static, Result<String, CompletionError>> {
    let url = format!("{}/v1/chat/completions", api_hostname.trim_end_matches("/"));
    let api_key = api_key.to_string();

    Box::pin(async_stream::try_stream! {
        let payload = json!({
            "model": request.model,
            "temperature": request.temperature,
            "messages": request.messages,
            "stream": true,
        });

        tracing::debug!("Requesting completion stream from {} with model {}", url, request.model);

        let response = reqwest::Client::new()
            .post(&url)
            .bearer_auth(&api_key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(CompletionError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("Completion request failed with status {}", status);
            Err::<(), _>(CompletionError::from_status(status, &body))?;
            return;
        }

        let mut stream = response.bytes_stream();

        // Raw bytes are buffered so SSE events and multi-byte
        // characters split across network chunks are reassembled
        // before decoding.
        let mut buffer: Vec<u8> = Vec::new();
        let mut finished = false;

        'outer: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(CompletionError::from_reqwest)?;
            buffer.extend_from_slice(&chunk);

            while let Some(event) = next_event(&mut buffer) {
                let event = std::str::from_utf8(&event).map_err(|e| {
                    CompletionError::Unknown(format!("Completion stream was not valid UTF-8: {}", e))
                })?;

                for line in event.split(['\r', '\n']) {
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();

                    // Data can sometimes be empty
                    if data.is_empty() {
                        continue;
                    }

                    match parse_sse_data(data)? {
                        SseData::Fragment(content) => {
                            yield content;
                        }
                        SseData::Finished(content) => {
                            if let Some(content) = content {
                                yield content;
                            }
                            finished = true;
                            break 'outer;
                        }
                        SseData::Skip => {}
                    }
                }
            }
        }

        // A body that ends without `[DONE]` or a finish reason was cut
        // off, whatever is left in the buffer included.
        if !finished {
            tracing::warn!(
                "Completion stream ended before completion with {} unparsed bytes",
                buffer.len()
            );
            Err::<(), _>(CompletionError::Transport(String::from(
                "stream ended before completion",
            )))?;
            return;
        }

        tracing::debug!("Completion stream finished");
    })
}
