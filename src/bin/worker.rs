use anyhow::Result;
use clap::Parser;
use taste_engine::services::kafka::{KafkaConsumer, LibrarySyncedEvent};
use taste_engine::{init_tracing, AppState, Config, EngineError};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Rebuilds preference vectors whenever the library sync pipeline reports
/// a completed sync.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    std::env::set_var("RUST_LOG", &args.log_level);
    init_tracing().await;

    let config = Config::from_file(&args.config)?;
    info!("Starting rebuild worker on topic {}", config.kafka.sync_topic);

    let consumer = KafkaConsumer::new(&config.kafka)?;
    let state = AppState::new(config).await?;

    let (tx, mut rx) = mpsc::channel::<LibrarySyncedEvent>(1000);
    tokio::spawn(async move {
        if let Err(e) = consumer.consume_library_synced(tx).await {
            error!("Library sync consumer error: {}", e);
        }
    });

    while let Some(event) = rx.recv().await {
        match state.preference_builder.rebuild(event.user_id).await {
            Ok(vector) => info!(
                user_id = %event.user_id,
                contributing = vector.contributing_items,
                "Rebuilt after library sync"
            ),
            Err(EngineError::InsufficientData(reason)) => {
                warn!(user_id = %event.user_id, "Nothing to rebuild: {}", reason)
            }
            Err(e) => error!(user_id = %event.user_id, "Rebuild failed: {}", e),
        }
    }

    Ok(())
}
