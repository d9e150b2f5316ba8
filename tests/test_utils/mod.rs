//! Test utilities for integration tests
#![allow(dead_code)]
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::stream::{BoxStream, StreamExt};

use chatbot::ai::chat::{SessionEvent, TerminalResult};
use chatbot::core::config::{DEFAULT_MODELS, ModelConfig, Settings};
use chatbot::openai::{CompletionClient, CompletionError, StreamRequest};

/// Shared view into what a `FakeClient` was asked to do, usable after
/// the client itself has been boxed and handed off.
#[derive(Clone, Default)]
pub struct FakeHandles {
    pub calls: Arc<AtomicUsize>,
    pub requests: Arc<Mutex<Vec<(StreamRequest, String)>>>,
    pub dropped: Arc<AtomicBool>,
}

impl FakeHandles {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<StreamRequest> {
        self.requests.lock().unwrap().last().map(|(r, _)| r.clone())
    }

    pub fn last_credential(&self) -> Option<String> {
        self.requests.lock().unwrap().last().map(|(_, c)| c.clone())
    }

    pub fn stream_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// A completion backend that replays scripted fragments, then
/// optionally fails or hangs forever.
#[derive(Default)]
pub struct FakeClient {
    fragments: Vec<String>,
    error: Option<CompletionError>,
    hang: bool,
    handles: FakeHandles,
}

impl FakeClient {
    pub fn new(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn failing_with(mut self, error: CompletionError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn handles(&self) -> FakeHandles {
        self.handles.clone()
    }
}

impl CompletionClient for FakeClient {
    fn stream(
        &self,
        request: StreamRequest,
        credential: &str,
    ) -> BoxStream<'static, Result<String, CompletionError>> {
        self.handles.calls.fetch_add(1, Ordering::SeqCst);
        self.handles
            .requests
            .lock()
            .unwrap()
            .push((request, credential.to_string()));

        let guard = DropFlag(Arc::clone(&self.handles.dropped));
        let fragments = self.fragments.clone();
        let error = self.error.clone();
        let hang = self.hang;

        Box::pin(async_stream::stream! {
            let _guard = guard;
            for fragment in fragments {
                yield Ok(fragment);
            }
            if let Some(error) = error {
                yield Err(error);
                return;
            }
            if hang {
                futures::future::pending::<()>().await;
            }
        })
    }
}

pub fn model_config(model: &str, temperature: f64) -> ModelConfig {
    ModelConfig {
        model: model.to_string(),
        temperature,
    }
}

pub fn test_settings(credential: Option<&str>) -> Settings {
    Settings::new(
        ModelConfig::default(),
        DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
        credential.map(str::to_string),
    )
}

/// Drains an event stream, returning the partial texts and the
/// terminal result. Panics if the stream doesn't end with exactly one
/// terminal event.
pub async fn collect_events(
    mut events: BoxStream<'_, SessionEvent>,
) -> (Vec<String>, TerminalResult) {
    let mut partials = Vec::new();
    let mut terminal = None;

    while let Some(event) = events.next().await {
        assert!(terminal.is_none(), "Received an event after the terminal result");
        match event {
            SessionEvent::Partial(partial) => partials.push(partial.text),
            SessionEvent::Terminal(result) => terminal = Some(result),
        }
    }

    (partials, terminal.expect("Stream ended without a terminal result"))
}
