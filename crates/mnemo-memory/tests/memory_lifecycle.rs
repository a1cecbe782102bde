//! End-to-end flow across the memory layers: a conversation fills working
//! memory, retrieval surfaces episodic records and reinforces them, and a
//! forgetting sweep spares what was just recalled.

use mnemo_memory::{
    EpisodicMemoryItem, Forgetter, InMemoryMemoryStore, MemoryStore, MessageRole, RetrievalConfig,
    Retriever, WorkingMemoryConfig, WorkingMemoryStore,
};
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn test_conversation_retrieval_and_forgetting_interplay() {
    init_tracing();

    let store = Arc::new(InMemoryMemoryStore::new());
    let forgetter = Forgetter::new(store.clone() as Arc<dyn MemoryStore>);
    let retriever = Retriever::new(RetrievalConfig::default());
    let sessions = WorkingMemoryStore::new(WorkingMemoryConfig::default());

    // Long-term memories from earlier days, one about to fade.
    let school = EpisodicMemoryItem::new("alice", "早上送孩子上学")
        .with_event_type("school_run")
        .with_importance(4);
    forgetter.create_metadata(&school).await.unwrap();
    store.add_item(school.clone()).await.unwrap();

    let errand = EpisodicMemoryItem::new("alice", "取了一次快递")
        .with_importance(1)
        .with_date(chrono::Utc::now() - chrono::Duration::days(60));
    forgetter.create_metadata(&errand).await.unwrap();
    let mut faded = store.metadata(&errand.id).await.unwrap().unwrap();
    faded.retention_score = 0.2;
    faded.last_accessed_at = Some(chrono::Utc::now() - chrono::Duration::days(60));
    store.put_metadata(faded).await.unwrap();
    store.add_item(errand.clone()).await.unwrap();

    // The conversation turns to school.
    let message = sessions.add_message("alice", "s1", MessageRole::User, "提醒我下午送孩子去学校");
    assert_eq!(message.intent.as_deref(), Some("reminder"));

    let candidates = store.recent("alice", 100).await.unwrap();
    let hits = retriever
        .retrieve("送孩子去学校", &candidates, 1, false)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].item.id, school.id);

    // Retrieval reinforces what it surfaced.
    let ids: Vec<String> = hits.iter().map(|h| h.item.id.clone()).collect();
    forgetter.record_accesses(&ids).await.unwrap();
    let reinforced = store.metadata(&school.id).await.unwrap().unwrap();
    assert_eq!(reinforced.access_count, 1);

    // A sweep forgets the faded errand but spares the recalled memory.
    let report = forgetter.scan_and_forget("alice", None, false).await.unwrap();
    assert_eq!(report.forgotten, vec![errand.id.clone()]);
    assert!(store.get_item(&school.id).await.unwrap().is_some());
    assert!(store.get_item(&errand.id).await.unwrap().is_none());

    // The working-memory side kept its own view of the exchange.
    let snapshot = sessions.get_context_snapshot("alice", "s1");
    assert_eq!(snapshot.current_topic.as_deref(), Some("reminder"));
    assert_eq!(snapshot.entity_mentions.get("孩子"), Some(&1));
}
