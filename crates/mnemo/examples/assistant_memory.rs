//! Walks one user through the whole memory lifecycle: conversation,
//! recall, reinforcement, forgetting and the entity graph.
//!
//! Run with: `cargo run --example assistant_memory`

use mnemo::prelude::*;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mnemo=debug".into()),
        )
        .init();

    let store = Arc::new(InMemoryMemoryStore::new());
    let forgetter = Arc::new(Forgetter::new(store.clone() as Arc<dyn MemoryStore>));
    let retriever = Retriever::new(RetrievalConfig::default());
    let sessions = WorkingMemoryStore::new(WorkingMemoryConfig::default());
    let graph = EntityGraphStore::new();
    let extractor = GraphExtractor::new();

    // Things the user did over the past week.
    for (summary, event_type, importance, days_ago) in [
        ("早上送孩子去阳光学校", "school_run", 4, 0),
        ("和同事开了整天的会", "work", 2, 1),
        ("周末去超市采购", "shopping", 2, 6),
    ] {
        let item = EpisodicMemoryItem::new("alice", summary)
            .with_event_type(event_type)
            .with_importance(importance)
            .with_date(chrono::Utc::now() - chrono::Duration::days(days_ago));
        forgetter.create_metadata(&item).await?;
        store.add_item(item).await?;
    }

    // A new message arrives.
    let text = "提醒我下午送孩子去阳光学校";
    let message = sessions.add_message("alice", "s1", MessageRole::User, text);
    println!("detected intent: {:?}", message.intent);

    if let Some(switch) = sessions.detect_topic_switch("alice", "s1", text) {
        println!("topic switched from {} to {}", switch.from, switch.to);
    }

    // Recall relevant memories and reinforce them.
    let candidates = store.recent("alice", 100).await?;
    let hits = retriever.retrieve(text, &candidates, 3, false).await?;
    for hit in &hits {
        println!("recalled: {} (score {:.3}, {:?})", hit.item.summary, hit.score, hit.match_reasons);
    }
    let ids: Vec<String> = hits.iter().map(|h| h.item.id.clone()).collect();
    forgetter.record_accesses(&ids).await?;

    // Grow the entity graph from the same utterance.
    let report = extractor.extract(&graph, "alice", text)?;
    println!(
        "graph grew by {} entities, {} relations",
        report.entities.len(),
        report.relations.len()
    );

    // Forgetting runs periodically in the background.
    let sweeper = forgetter.spawn_sweeper();
    let dry = forgetter.scan_and_forget("alice", None, true).await?;
    println!(
        "sweep preview: {} scanned, {} would be forgotten",
        dry.scanned,
        dry.forgotten.len()
    );
    sweeper.stop();

    Ok(())
}
