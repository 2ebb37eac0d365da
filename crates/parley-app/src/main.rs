//! Parley application binary - composition root.
//!
//! Ties the Parley crates into a single executable:
//! 1. Load configuration from TOML and install the tracing subscriber
//! 2. Open the SQLite session store and embedding cache
//! 3. Register the demo commands and warm the embedding index
//! 4. Answer one utterance (`--once`) or run an interactive REPL

mod cli;
mod demo;

use std::sync::Arc;

use clap::Parser;
use parley_action::CommandRegistry;
use parley_chat::{DispatchEngine, HeuristicGenerator, TurnResult};
use parley_core::ParleyConfig;
use parley_storage::{
    Database, EmbeddingCacheRepository, SessionRepository, SessionStore, StoreOptions,
};
use parley_vector::EmbeddingIndexer;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use cli::CliArgs;

const EXIT_WORDS: &[&str] = &["exit", "quit", "bye"];

fn print_result(result: &TurnResult) {
    println!("{}", result.response_text);
    if let Some(ref error) = result.error {
        tracing::debug!(kind = ?error.kind, message = %error.message, "Turn reported an error");
    }
}

/// Read utterances from stdin until EOF or an exit word.
async fn repl(engine: &DispatchEngine, session_id: &str) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    println!("Parley is listening (session {}). Say 'help' to see what I can do.", session_id);
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let utterance = line.trim();
        if EXIT_WORDS.contains(&utterance.to_lowercase().as_str()) {
            break;
        }
        let result = engine.handle_utterance(session_id, utterance).await;
        print_result(&result);
    }

    let health = engine.health();
    if health.persistence_degraded {
        tracing::warn!(
            sessions = ?health.degraded_sessions,
            "Session store was unavailable; some turns were kept in memory only"
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config is read before tracing so its log level can seed the filter.
    let config_file = args.resolve_config_path();
    let loaded = if config_file.exists() {
        Some(ParleyConfig::load(&config_file))
    } else {
        None
    };
    let mut config = match &loaded {
        Some(Ok(config)) => config.clone(),
        _ => ParleyConfig::default(),
    };

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(args.resolve_log_filter(&config.general.log_level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting Parley v{}", env!("CARGO_PKG_VERSION"));
    match loaded {
        Some(Ok(_)) => tracing::info!(path = %config_file.display(), "Configuration loaded"),
        Some(Err(e)) => {
            tracing::warn!(path = %config_file.display(), error = %e, "Invalid configuration; using defaults")
        }
        None => tracing::info!(path = %config_file.display(), "No configuration file; using defaults"),
    }

    // Storage.
    config.storage.cache_backend = args.resolve_db(&config.storage.cache_backend);
    let db = Arc::new(Database::open(&config.storage)?);
    tracing::info!(backend = %config.storage.cache_backend, "Session store opened");

    let store = Arc::new(SessionStore::new(
        Arc::new(SessionRepository::new(Arc::clone(&db))),
        StoreOptions::from_config(&config),
    ));

    // Commands and matching.
    let registry = Arc::new(CommandRegistry::new());
    demo::register_demo_commands(&registry)?;
    tracing::info!(commands = registry.len(), "Demo commands registered");

    let indexer = Arc::new(
        EmbeddingIndexer::new(Arc::new(demo::embedding()), config.matching.embedding_model.clone())
            .with_persistent_cache(EmbeddingCacheRepository::new(Arc::clone(&db))),
    );

    let engine = DispatchEngine::new(
        registry,
        indexer,
        Arc::new(HeuristicGenerator::new()),
        store,
        &config,
    );
    demo::install_responders(&engine);
    if let Err(e) = engine.warm_index().await {
        tracing::warn!(error = %e, "Embedding index not warmed; commands will be embedded on demand");
    }

    let session_id = args
        .session
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    tracing::info!(session_id = %session_id, "Session ready");

    if let Some(ref utterance) = args.once {
        let result = engine.handle_utterance(&session_id, utterance).await;
        print_result(&result);
        return Ok(());
    }

    let sweeper = engine.spawn_sweeper();
    repl(&engine, &session_id).await?;
    if let Some(handle) = sweeper {
        handle.abort();
    }

    tracing::info!("Parley stopped");
    Ok(())
}
