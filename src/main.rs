#![deny(clippy::all)]

mod audio;
mod document;
mod session;
mod settings;
mod transport;

use anyhow::Context;
use clap::{Parser, Subcommand};
use document::TextDocument;
use session::{lock_recover, SessionController};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

/// Application configuration
#[derive(serde::Deserialize)]
struct Config {
    service: ServiceConfig,
}

#[derive(serde::Deserialize)]
struct ServiceConfig {
    endpoint: String,
}

/// Load configuration from embedded config.toml
fn load_config() -> anyhow::Result<Config> {
    const CONFIG_TOML: &str = include_str!("../config.toml");
    let config: Config = toml::from_str(CONFIG_TOML)?;
    Ok(config)
}

#[derive(Parser)]
#[command(name = "voicenote")]
#[command(about = "Dictate speech into a text file via live transcription", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dictate into a note file (created if missing)
    Dictate {
        /// Path of the note to dictate into
        note: PathBuf,
    },
    /// Write a default settings file and print its location
    InitSettings,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for structured logging
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::InitSettings => {
            let path = settings::ensure_default_settings()?;
            println!("Settings file: {}", path.display());
            Ok(())
        }
        Commands::Dictate { note } => dictate(note).await,
    }
}

/// Run a dictation session against the given note file
async fn dictate(note: PathBuf) -> anyhow::Result<()> {
    let config = load_config()?;

    let text = if note.exists() {
        std::fs::read_to_string(&note)
            .with_context(|| format!("Failed to read {}", note.display()))?
    } else {
        String::new()
    };

    // Dictation begins at the end of the note
    let doc = Arc::new(Mutex::new(TextDocument::from_text(&text)));
    let controller = SessionController::new(doc.clone(), config.service.endpoint);

    controller.start().await?;
    println!(
        "Dictating into {} - press Enter to toggle recording, Ctrl-C to finish",
        note.display()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(_)) => {
                        if let Err(e) = controller.toggle().await {
                            error!("Toggle failed: {}", e);
                        }
                        println!("Status: {}", controller.state());
                    }
                    Ok(None) | Err(_) => break,
                }
            }
        }
    }

    controller.stop().await;

    let contents = lock_recover(&doc).contents();
    std::fs::write(&note, contents).with_context(|| format!("Failed to write {}", note.display()))?;
    info!("Saved {}", note.display());

    Ok(())
}
