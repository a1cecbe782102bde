//! # Mnemo Memory
//!
//! Memory subsystem for conversational agents: short-lived working memory
//! per session, hybrid retrieval over long-term episodic records, and a
//! forgetting engine that decays, reinforces and consolidates them.
//!
//! ## Layers
//!
//! - **Working memory**: TTL-bound per-session buffers with sliding-window
//!   compression, intent tracking and topic-switch detection
//! - **Retrieval**: lexical + symbolic scoring fused with Reciprocal Rank
//!   Fusion, with an optional external reranking stage that degrades
//!   silently
//! - **Forgetting**: exponential retention decay with access
//!   reinforcement, atomic sweeps, consolidation of related memories and
//!   an audit log
//!
//! ## Example
//!
//! ```rust,no_run
//! use mnemo_memory::{
//!     EpisodicMemoryItem, Forgetter, InMemoryMemoryStore, MemoryStore, RetrievalConfig,
//!     Retriever,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryMemoryStore::new());
//! let forgetter = Forgetter::new(store.clone() as Arc<dyn MemoryStore>);
//!
//! let item = EpisodicMemoryItem::new("alice", "took the kids to school")
//!     .with_event_type("school_run")
//!     .with_importance(4);
//! forgetter.create_metadata(&item).await?;
//! store.add_item(item).await?;
//!
//! let retriever = Retriever::new(RetrievalConfig::default());
//! let candidates = store.recent("alice", 100).await?;
//! let hits = retriever.retrieve("school", &candidates, 5, false).await?;
//! forgetter
//!     .record_accesses(&hits.iter().map(|h| h.item.id.clone()).collect::<Vec<_>>())
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod forgetter;
pub mod intent;
pub mod message;
pub mod retriever;
pub mod store;
pub mod working;

pub use error::{MemoryError, MemoryResult};
pub use forgetter::{Forgetter, ForgetterConfig, RetentionStats, SweepReport, SweeperHandle};
pub use intent::{EntityKind, ExtractedEntity, IntentCatalog, IntentRule, GENERIC_INTENT};
pub use message::{ChatMessage, MessageRole};
pub use retriever::{
    RerankChoice, Reranker, RetrievalConfig, RetrievedMemory, Retriever, SymbolicRules,
    TriggerRule,
};
pub use store::{
    ConsolidationBatch, EpisodicMemoryItem, ForgetAction, ForgetAuditEntry, InMemoryMemoryStore,
    ItemPatch, MemoryMetadata, MemoryStore, SweepBatch,
};
pub use working::{
    ContextSnapshot, IntentRecord, TopicSwitch, WorkingMemoryConfig, WorkingMemorySession,
    WorkingMemoryStats, WorkingMemoryStore,
};
