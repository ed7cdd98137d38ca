use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    config::normalize_base_url, load_settings, ChatController, MessageKind, Rejection,
    SessionEvent, SubmitOutcome,
};
use shared::domain::ConnectionStatus;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::{error::RecvError, Receiver},
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod render;

#[derive(Parser, Debug)]
#[command(about = "Terminal chat client for the public-data Q&A assistant")]
struct Args {
    /// Settings file; defaults to ./chat_client.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    base_url: Option<String>,
    #[arg(long)]
    api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings =
        load_settings(args.config.as_deref()).context("failed to load client settings")?;
    if let Some(base_url) = args.base_url {
        settings.base_url = normalize_base_url(&base_url)?;
    }
    if let Some(api_key) = args.api_key.filter(|key| !key.trim().is_empty()) {
        settings.api_key = Some(api_key);
    }

    let controller =
        ChatController::from_settings(&settings).context("failed to start chat session")?;
    let updates = controller.subscribe();
    for message in controller.snapshot().await.messages {
        println!("{}", render::render_message(&message));
    }
    let printer = tokio::spawn(print_updates(updates));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        match line.trim() {
            "/quit" | "/exit" => break,
            "/status" => {
                println!("{}", render::status_line(&controller.snapshot().await));
                continue;
            }
            _ => {}
        }

        match controller.submit(&line).await {
            SubmitOutcome::Rejected(Rejection::MissingApiKey) => {
                eprintln!("No API key configured; set CHATBOT_API_KEY or pass --api-key.");
            }
            SubmitOutcome::Rejected(Rejection::RequestInFlight) => {
                eprintln!("Still waiting for the previous answer.");
            }
            SubmitOutcome::Rejected(Rejection::EmptyInput) | SubmitOutcome::Completed(_) => {}
        }
    }

    // Dropping the last controller handle closes the update channel.
    drop(controller);
    printer.await.context("update printer panicked")?;
    Ok(())
}

async fn print_updates(mut updates: Receiver<SessionEvent>) {
    loop {
        match updates.recv().await {
            Ok(SessionEvent::MessageAppended(message)) => {
                if !matches!(message.kind, MessageKind::UserText { .. }) {
                    println!("{}", render::render_message(&message));
                }
            }
            Ok(SessionEvent::StatusChanged { status, loading }) => {
                if loading {
                    eprintln!("... {}", status.label());
                } else if status == ConnectionStatus::Error {
                    eprintln!("[{}] you can send your message again", status.label());
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "terminal fell behind session updates");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
