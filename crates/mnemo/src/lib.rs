//! # Mnemo - Memory for Conversational Agents
//!
//! **Mnemo** models how an assistant remembers a user:
//!
//! - **Mnemo Memory**: per-session working memory, hybrid retrieval over
//!   episodic records, and a forgetting engine with decay, reinforcement
//!   and consolidation
//! - **Mnemo Graph**: a per-user entity-relation graph with pathfinding,
//!   neighborhood queries and rule-based extraction from free text
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mnemo::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(InMemoryMemoryStore::new());
//!     let forgetter = Arc::new(Forgetter::new(store.clone() as Arc<dyn MemoryStore>));
//!     let retriever = Retriever::new(RetrievalConfig::default());
//!     let sessions = WorkingMemoryStore::new(WorkingMemoryConfig::default());
//!
//!     // Remember something that happened.
//!     let item = EpisodicMemoryItem::new("alice", "took the kids to school")
//!         .with_event_type("school_run")
//!         .with_importance(4);
//!     forgetter.create_metadata(&item).await?;
//!     store.add_item(item).await?;
//!
//!     // A new utterance arrives.
//!     sessions.add_message("alice", "s1", MessageRole::User, "school today?");
//!     let candidates = store.recent("alice", 100).await?;
//!     let hits = retriever.retrieve("school today?", &candidates, 5, true).await?;
//!
//!     // Retrieval reinforces what it surfaced.
//!     let ids: Vec<String> = hits.iter().map(|h| h.item.id.clone()).collect();
//!     forgetter.record_accesses(&ids).await?;
//!
//!     // Forgetting runs in the background.
//!     let sweeper = forgetter.spawn_sweeper();
//!     sweeper.stop();
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/mnemo/0.1.0")]
#![warn(missing_docs)]

// Re-export sub-crates
#[cfg(feature = "memory")]
pub use mnemo_memory as memory;

#[cfg(feature = "graph")]
pub use mnemo_graph as graph;

/// Commonly used types and traits
pub mod prelude {
    #[cfg(feature = "memory")]
    pub use crate::memory::{
        ChatMessage, EpisodicMemoryItem, Forgetter, ForgetterConfig, InMemoryMemoryStore,
        MemoryError, MemoryResult, MemoryStore, MessageRole, RetrievalConfig, RetrievedMemory,
        Retriever, WorkingMemoryConfig, WorkingMemoryStore,
    };

    #[cfg(feature = "graph")]
    pub use crate::graph::{
        EntityGraphStore, EntityType, GraphError, GraphExtractor, GraphResult, RelationType,
    };
}
