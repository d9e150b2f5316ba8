use std::io::Write;

use anyhow::Result;
use futures_util::StreamExt;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use crate::ai::chat::{Chat, ChatBuilder, ErrorKind, SessionEvent, TerminalResult, TurnRole};
use crate::core::AppConfig;
use crate::openai::OpenAiClient;

/// A line typed at the prompt.
#[derive(Debug, PartialEq)]
enum Input<'a> {
    Message(&'a str),
    Clear,
    History,
    Model(&'a str),
    Temperature(&'a str),
    Key(&'a str),
    Help,
    Empty,
}

impl<'a> Input<'a> {
    fn parse(line: &'a str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Input::Empty;
        }
        if !trimmed.starts_with('/') {
            return Input::Message(line);
        }

        let (cmd, arg) = trimmed
            .split_once(char::is_whitespace)
            .map(|(c, a)| (c, a.trim()))
            .unwrap_or((trimmed, ""));
        match cmd {
            "/clear" => Input::Clear,
            "/history" => Input::History,
            "/model" => Input::Model(arg),
            "/temperature" => Input::Temperature(arg),
            "/key" => Input::Key(arg),
            "/help" => Input::Help,
            _ => Input::Message(line),
        }
    }
}

const HELP: &str = "\
/clear               Clear the chat history
/history             Show the chat history
/model <id>          Switch models
/temperature <t>     Set the temperature (0.0 - 2.0)
/key <api key>       Set the API key
/help                Show this message";

/// Prints only the part of `text` that hasn't been printed yet.
fn render_partial(printed: &mut usize, text: &str) -> Result<()> {
    let mut stdout = std::io::stdout();
    if let Some(new) = text.get(*printed..) {
        write!(stdout, "{}", new)?;
        stdout.flush()?;
    }
    *printed = text.len();
    Ok(())
}

async fn send(chat: &mut Chat, text: &str) -> Result<()> {
    let mut events = chat.send(text);
    let mut printed = 0;

    while let Some(event) = events.next().await {
        match event {
            SessionEvent::Partial(partial) => render_partial(&mut printed, &partial.text)?,
            SessionEvent::Terminal(TerminalResult::Success { final_text }) => {
                render_partial(&mut printed, &final_text)?;
                println!();
            }
            SessionEvent::Terminal(TerminalResult::Failure { kind, message }) => {
                if printed > 0 {
                    println!();
                }
                println!("Error: {}", message);
                match kind {
                    ErrorKind::MissingCredential => {
                        println!("Set an API key with /key or the OPENAI_API_KEY env var.")
                    }
                    ErrorKind::CollaboratorRejected => {
                        println!("Please check your API key and model and try again.")
                    }
                    ErrorKind::TransportFailure | ErrorKind::Unknown => {
                        println!("Please try again.")
                    }
                }
            }
        }
    }

    Ok(())
}

pub async fn run(
    config: &AppConfig,
    model: Option<&str>,
    temperature: Option<f64>,
    api_key: Option<&str>,
) -> Result<()> {
    let mut rl = DefaultEditor::new()?;

    let mut settings = config.settings(model, temperature)?;
    if let Some(key) = api_key {
        settings.set_credential(key);
    }
    if settings.effective_credential().is_none() {
        println!("No API key found. Set one with /key to start chatting.");
    }

    let client = OpenAiClient::new(&config.openai_api_hostname);
    let mut chat = ChatBuilder::new(Box::new(client), settings).build();

    loop {
        let readline = rl.readline(">>> ");
        match readline {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());
                match Input::parse(&line) {
                    Input::Message(text) => send(&mut chat, text).await?,
                    Input::Clear => {
                        chat.clear();
                        println!("Chat history cleared.");
                    }
                    Input::History => {
                        for turn in chat.transcript().iter() {
                            let who = match turn.role() {
                                TurnRole::User => "you",
                                TurnRole::Assistant => "assistant",
                            };
                            println!("{}: {}", who, turn.content());
                        }
                    }
                    Input::Model(id) => match chat.settings_mut().set_model(id) {
                        Ok(()) => println!("Using model {}", id),
                        Err(err) => println!("Error: {}", err),
                    },
                    Input::Temperature(value) => match value.parse::<f64>() {
                        Ok(t) => match chat.settings_mut().set_temperature(t) {
                            Ok(()) => println!("Temperature set to {}", t),
                            Err(err) => println!("Error: {}", err),
                        },
                        Err(_) => println!("Error: {} is not a number", value),
                    },
                    Input::Key(key) => {
                        chat.settings_mut().set_credential(key);
                        if chat.settings().effective_credential().is_some() {
                            println!("API key set.");
                        }
                    }
                    Input::Help => println!("{}", HELP),
                    Input::Empty => {}
                }
            }
            Err(ReadlineError::Interrupted) => break,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}
