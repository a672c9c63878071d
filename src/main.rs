//! gpt-relay command line.
//!
//! ```bash
//! gpt-relay chat --mode creativity --system "Be brief." "Tell me a joke"
//! gpt-relay chat --no-stream "Hello"
//! gpt-relay count --model gpt-4 --system "Be brief." "Hello"
//! gpt-relay modes
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use gpt_relay::config::{self, RelayConfig};
use gpt_relay::logging::{self, LoggingGuard};
use gpt_relay::prelude::*;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "gpt-relay", version, about = "Token-accounted chat completions")]
struct Cli {
    /// Configuration file (defaults to ./gpt-relay.toml, then the XDG config dir)
    #[arg(long, short, env = "GPT_RELAY_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Override the configured model
    #[arg(long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a prompt and print the reply
    Chat {
        /// Sampling mode name or label
        #[arg(long, short, default_value = "balance")]
        mode: SamplingMode,

        /// Optional system message placed before the prompt
        #[arg(long, short)]
        system: Option<String>,

        /// Use a blocking completion instead of streaming
        #[arg(long)]
        no_stream: bool,

        /// Prompt text
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
    },
    /// Print the prompt token count of a conversation without sending it
    Count {
        /// Optional system message placed before the prompt
        #[arg(long, short)]
        system: Option<String>,

        /// Prompt text
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
    },
    /// List the sampling modes
    Modes,
}

fn load_config(cli: &Cli) -> anyhow::Result<RelayConfig> {
    let mut config = match cli.config {
        Some(ref path) => config::from_path(path)?,
        None => config::load()?,
    };
    if let Some(ref model) = cli.model {
        config.model = model.clone();
    }
    Ok(config)
}

fn init_logging(config: &RelayConfig) -> Option<LoggingGuard> {
    if config.logging.enabled {
        match logging::init_file_logging(&config.logging) {
            Ok(guard) => return guard,
            Err(e) => eprintln!("warning: {e}; logging to stderr"),
        }
    }
    if let Err(e) = logging::init_stderr_logging(config.logging.level) {
        eprintln!("warning: {e}");
    }
    None
}

fn history(system: Option<String>, prompt: &[String]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = system {
        messages.push(Message::system(system));
    }
    messages.push(Message::user(prompt.join(" ")));
    messages
}

async fn chat(
    config: &RelayConfig,
    mode: SamplingMode,
    messages: Vec<Message>,
    stream: bool,
) -> anyhow::Result<()> {
    let client = ChatClient::from_config(config).context("failed to configure chat client")?;

    if !stream {
        let reply = client.completions(&messages, mode).await?;
        println!("{}", reply.content);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let mut handle = client.spawn_stream(cancel, &messages, mode);
    while let Some(chunk) = handle.recv().await {
        println!("{chunk}");
    }

    match handle.finish().await {
        Err(e) if e.is_cancelled() => {
            eprintln!("interrupted");
            Ok(())
        }
        other => Ok(other?),
    }
}

fn count(config: &RelayConfig, messages: &[Message]) -> anyhow::Result<()> {
    let tokens = TokenAccountant::default().count_tokens(messages, &config.model)?;
    println!("{tokens}");
    Ok(())
}

fn modes() {
    for mode in SamplingMode::ALL {
        println!("{:<12}{:<6}{:.1}", mode.name(), mode.label(), mode.temperature());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let _guard = init_logging(&config);

    match cli.command {
        Command::Chat {
            mode,
            system,
            no_stream,
            prompt,
        } => chat(&config, mode, history(system, &prompt), !no_stream).await,
        Command::Count { system, prompt } => count(&config, &history(system, &prompt)),
        Command::Modes => {
            modes();
            Ok(())
        }
    }
}
