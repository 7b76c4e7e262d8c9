use async_trait::async_trait;
use std::sync::Arc;
use taste_engine::algorithms::VectorDimension;
use taste_engine::services::embedding::EmbeddingProvider;
use taste_engine::services::entitlement::StaticEntitlements;
use taste_engine::services::vector_db::ingest;
use taste_engine::*;

const DIM: usize = 4;
const AXES: [&str; DIM] = ["space", "farm", "horror", "puzzle"];

/// Offline provider: one axis per keyword on a small baseline.
struct KeywordProvider;

#[async_trait]
impl EmbeddingProvider for KeywordProvider {
    fn dimension(&self) -> VectorDimension {
        VectorDimension::new(DIM).expect("non-zero dimension")
    }

    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let text = text.to_lowercase();
        Ok(AXES
            .iter()
            .map(|axis| if text.contains(axis) { 1.05 } else { 0.05 })
            .collect())
    }
}

fn game(id: u64, name: &str, vector: [f32; DIM], tags: &[&str], review_count: u32) -> anyhow::Result<ItemEmbedding> {
    Ok(ItemEmbedding {
        item_id: ItemId::new(id)?,
        vector: vector.to_vec(),
        metadata: ItemMetadata {
            schema_version: METADATA_SCHEMA_VERSION,
            name: name.to_string(),
            genres: vec!["Indie".to_string()],
            tags: tags.iter().map(|t| t.to_string()).collect(),
            review_score: Some(90.0),
            review_count,
            release_year: Some(2020),
            is_free: false,
        },
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing().await;

    let mut config = Config::default();
    config.vector.dimension = DIM;

    let gate = Arc::new(StaticEntitlements::new());
    let state = AppState::in_memory(config, Arc::new(KeywordProvider), gate.clone())?;
    println!("In-memory engine ready (dimension {DIM})");

    // 1. Catalog
    let catalog = vec![
        game(10, "Outer Wilds", [1.0, 0.0, 0.1, 0.3], &["Space", "Exploration"], 40_000)?,
        game(11, "Starbound", [0.9, 0.3, 0.0, 0.0], &["Space", "Crafting"], 90_000)?,
        game(12, "Stardew Valley", [0.0, 1.0, 0.0, 0.1], &["Farming Sim", "Cozy"], 500_000)?,
        game(13, "Dredge", [0.1, 0.2, 0.9, 0.1], &["Horror", "Fishing"], 30_000)?,
        game(14, "Baba Is You", [0.0, 0.0, 0.0, 1.0], &["Puzzle"], 15_000)?,
        game(15, "Hardspace: Shipbreaker", [0.9, 0.0, 0.0, 0.4], &["Space", "Puzzle"], 25_000)?,
        game(16, "Slime Rancher", [0.3, 0.8, 0.0, 0.0], &["Farming Sim", "Space"], 120_000)?,
    ];
    for item in catalog {
        ingest(state.embeddings.as_ref(), item).await?;
    }
    println!("Ingested 7 games");

    // 2. Library sync and preference vector
    let user = UserId::new(76561198000000001)?;
    let signals = vec![(10, 1_800), (14, 300), (15, 0), (12, 20)]
        .into_iter()
        .map(|(item, minutes)| {
            Ok(OwnedItemSignal {
                user_id: user,
                item_id: ItemId::new(item)?,
                playtime_minutes: minutes,
                last_played_at: None,
                completion_ratio: None,
                genres: vec![],
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    let report = state.sync.replace_library(user, signals).await?;
    println!("Preference vector built: {:?}", report.build);

    // 3. Recommendations
    let request = RecommendationRequest::new(QuerySource::Preference)
        .with_limit(3)
        .excluding_owned();
    let response = state.ranker.recommend(user, &request).await?;
    for rec in &response.recommendations {
        println!("  {} (similarity {:.3})", rec.name, rec.similarity);
    }

    let hidden = RecommendationRequest {
        mood: Some("hidden_gems".to_string()),
        min_review_score: Some(0.0),
        ..request.clone()
    };
    let response = state.ranker.recommend(user, &hidden).await?;
    println!("Hidden gems mood, threshold {:?}:", response.popularity_threshold);
    for rec in &response.recommendations {
        println!("  {} ({} reviews)", rec.name, rec.review_count);
    }

    // 4. Unplayed gems and daily pick
    for gem in state.ranker.unplayed_gems(user, Some(5)).await? {
        println!("Unplayed: {} ({})", gem.name, gem.justification);
    }
    let pick = state.ranker.daily_pick(user).await?;
    println!("Daily pick for {}: {}", pick.day, pick.name);

    // 5. Premium feedback
    gate.grant(user);
    let learned = state
        .feedback
        .submit_feedback(user, ItemId::new(13)?, FeedbackLabel::StrongDislike)
        .await?;
    println!("Learned vector updated from {} feedback events", learned.feedback_count);

    // 6. Conversational refinement
    let session = state
        .refiner
        .start(
            user,
            &StartRefinementRequest {
                query: "relaxing space games".to_string(),
                limit: Some(3),
                exclude_owned: false,
                mood: None,
                popularity_score: None,
            },
        )
        .await?;
    println!("Round {} for {:?}", session.round, session.query);
    if let Some(option) = session.follow_up.first().and_then(|q| q.options.first()) {
        let refined = state.refiner.refine(user, session.session_id, &[option.clone()]).await?;
        println!("Round {} for {:?}", refined.round, refined.query);
        for rec in &refined.recommendations {
            println!("  {}", rec.name);
        }
    }

    Ok(())
}
