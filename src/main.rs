use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::warn;

use stem_spark::core::config::Config;
use stem_spark::core::history::HistoryStore;
use stem_spark::core::io::{NativeStorage, Storage};
use stem_spark::services::llm::create_llm;
use stem_spark::services::speech::{create_platform, SpeechController};
use stem_spark::services::workflow::{browse_history, WorkflowManager};
use stem_spark::services::{proxy, setup};

#[derive(Parser)]
#[command(
    name = "stem-spark",
    version,
    about = "Kid-friendly science explanations, stories and quizzes"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the generation proxy and serve the web app
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Start an interactive learning session (default)
    Learn,
    /// Browse past explanations
    History {
        /// Delete all saved history
        #[arg(long)]
        clear: bool,
    },
    /// List speech voices
    Voices {
        /// Preview voices and save one for reading aloud
        #[arg(long)]
        select: bool,
        /// Only show voices for this language (name or locale tag)
        #[arg(long)]
        language: Option<String>,
    },
}

fn history_store(config: &Config) -> HistoryStore {
    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new(&config.history.data_dir));
    HistoryStore::new(storage, config.history.max_items)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please check that 'config.yml' is valid YAML.");
            return Err(e);
        }
    };

    match cli.command.unwrap_or(Command::Learn) {
        Command::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            proxy::serve(&config).await?;
        }
        Command::Learn => {
            let llm = create_llm(&config)?;
            let storage: Arc<dyn Storage> =
                Arc::new(NativeStorage::new(&config.history.data_dir));
            let mut manager = WorkflowManager::new(config, llm, storage).await?;
            match create_platform() {
                Ok(platform) => manager = manager.with_speech(SpeechController::new(platform)),
                Err(e) => warn!("Read aloud disabled: {}", e),
            }
            manager.run().await?;
        }
        Command::History { clear } => {
            browse_history(&history_store(&config), clear).await?;
        }
        Command::Voices { select, language } => {
            let mut speech = SpeechController::new(create_platform()?);
            setup::run_voice_setup(
                &mut speech,
                &history_store(&config),
                select,
                language.as_deref(),
            )
            .await?;
        }
    }

    Ok(())
}
