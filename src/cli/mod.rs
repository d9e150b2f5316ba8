use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::core::AppConfig;

pub mod chat;

#[derive(Subcommand)]
enum Command {
    /// Start a chat bot session
    Chat {
        /// Model to use, must be one of the supported models
        #[arg(long)]
        model: Option<String>,

        /// Sampling temperature between 0.0 and 2.0
        #[arg(long)]
        temperature: Option<f64>,

        /// API key, defaults to OPENAI_API_KEY
        #[arg(long)]
        api_key: Option<String>,
    },
    /// List the models that can be selected
    Models {},
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

pub async fn run() -> Result<()> {
    let args = Cli::parse();
    init_tracing();

    let config = AppConfig::from_env()?;

    // Handle each sub command
    match args.command {
        Some(Command::Chat {
            model,
            temperature,
            api_key,
        }) => {
            chat::run(&config, model.as_deref(), temperature, api_key.as_deref()).await?;
        }
        Some(Command::Models {}) => {
            for model in config.allowed_models.iter() {
                if *model == config.openai_model {
                    println!("{} (default)", model);
                } else {
                    println!("{}", model);
                }
            }
        }
        None => {
            chat::run(&config, None, None, None).await?;
        }
    }

    Ok(())
}
