use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use taste_engine::services::kafka::{KafkaProducer, LibrarySyncedEvent};
use taste_engine::{init_tracing, AppState, Config, EngineError, UserId};
use tracing::{error, info, warn};

/// Rebuilds preference vectors for the given users, either inline or by
/// publishing sync events for the worker to pick up.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Users to rebuild.
    #[arg(short, long, required = true, num_args = 1..)]
    users: Vec<UserId>,

    /// Publish `library_synced` events instead of rebuilding in-process.
    #[arg(long)]
    enqueue: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    std::env::set_var("RUST_LOG", &args.log_level);
    init_tracing().await;

    let config = Config::from_file(&args.config)?;

    if args.enqueue {
        let producer = KafkaProducer::new(&config.kafka)?;
        for user_id in &args.users {
            producer
                .send_library_synced(&LibrarySyncedEvent {
                    user_id: *user_id,
                    synced_at: Utc::now(),
                })
                .await?;
        }
        info!("Enqueued {} rebuilds", args.users.len());
        return Ok(());
    }

    let state = AppState::new(config).await?;
    let mut failed = 0;
    for user_id in &args.users {
        match state.preference_builder.rebuild(*user_id).await {
            Ok(vector) => info!(
                user_id = %user_id,
                contributing = vector.contributing_items,
                below_threshold = vector.report.below_threshold,
                missing_embedding = vector.report.missing_embedding,
                "Rebuilt"
            ),
            Err(EngineError::InsufficientData(reason)) => {
                warn!(user_id = %user_id, "Skipped: {}", reason);
            }
            Err(e) => {
                error!(user_id = %user_id, "Rebuild failed: {}", e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} rebuilds failed", args.users.len());
    }
    Ok(())
}
