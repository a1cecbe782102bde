//! # Mnemo Graph
//!
//! Per-user entity-relation graph for conversational agents: typed
//! entities (people, places, preferences, ...), typed relations between
//! them, BFS pathfinding and neighborhood queries, a render-ready
//! visualization dump, and a shallow rule-based extractor that grows the
//! graph from free text.
//!
//! ## Example
//!
//! ```rust
//! use mnemo_graph::{EntityGraphStore, EntityType, GraphExtractor};
//! use std::collections::HashMap;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = EntityGraphStore::new();
//! let extractor = GraphExtractor::new();
//!
//! extractor.extract(&store, "alice", "周末带孩子去阳光学校")?;
//!
//! let school = store
//!     .find_entity("alice", "阳光学校", EntityType::Location)
//!     .ok_or("school not extracted")?;
//! let nearby = store.neighbors(&school.id, 2).ok_or("school vanished")?;
//! println!("{} related entities", nearby.entities.len());
//!
//! store.upsert_entity("alice", "阳光学校", EntityType::Location, HashMap::new(), None)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod extract;
pub mod model;
pub mod store;

pub use error::{GraphError, GraphResult};
pub use extract::{ExtractionReport, GraphExtractor, SELF_ENTITY_NAME};
pub use model::{
    EntityType, GraphEntity, GraphPath, GraphRelation, GraphSnapshot, GraphVisualization,
    Neighborhood, PropertyValue, RelationType, VisEdge, VisNode,
};
pub use store::{EntityGraphStore, DEFAULT_MAX_PATH_DEPTH};
