//! Typed nodes, edges and property values of the entity graph

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What kind of thing an entity node represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A person the user talks about
    Person,
    /// A place
    Location,
    /// A company, school or other organization
    Organization,
    /// A vehicle
    Vehicle,
    /// A recurring or one-off event
    Event,
    /// Something the user likes or dislikes
    Preference,
    /// A time reference (anniversary, schedule slot)
    Time,
    /// A physical object
    Item,
}

impl EntityType {
    /// Stable lowercase label, used in visualization payloads
    pub fn label(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Location => "location",
            Self::Organization => "organization",
            Self::Vehicle => "vehicle",
            Self::Event => "event",
            Self::Preference => "preference",
            Self::Time => "time",
            Self::Item => "item",
        }
    }
}

/// How two entities relate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    /// Family tie
    Family,
    /// Friendship
    Friend,
    /// Ownership
    Owns,
    /// Employment or membership
    WorksAt,
    /// Residence
    LivesIn,
    /// Spatial containment
    LocatedAt,
    /// Positive preference
    Likes,
    /// Negative preference
    Dislikes,
    /// Took part in an event
    ParticipatedIn,
    /// Has been to a place
    Visited,
    /// Catch-all association
    RelatedTo,
}

impl RelationType {
    /// Stable lowercase label, used in visualization payloads
    pub fn label(&self) -> &'static str {
        match self {
            Self::Family => "family",
            Self::Friend => "friend",
            Self::Owns => "owns",
            Self::WorksAt => "works_at",
            Self::LivesIn => "lives_in",
            Self::LocatedAt => "located_at",
            Self::Likes => "likes",
            Self::Dislikes => "dislikes",
            Self::ParticipatedIn => "participated_in",
            Self::Visited => "visited",
            Self::RelatedTo => "related_to",
        }
    }
}

/// A typed property value attached to an entity or relation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Text
    String(String),
    /// Whole number
    Integer(i64),
    /// Floating point
    Float(f64),
    /// Flag
    Boolean(bool),
    /// Ordered values
    List(Vec<PropertyValue>),
    /// Nested map
    Map(HashMap<String, PropertyValue>),
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

/// A node of the per-user entity graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEntity {
    /// Unique identifier
    pub id: String,

    /// Owning user; graphs never cross users
    pub user_id: String,

    /// Canonical display name
    pub name: String,

    /// What kind of thing this is
    pub entity_type: EntityType,

    /// Free-form typed properties
    pub properties: HashMap<String, PropertyValue>,

    /// Where the entity came from (conversation, import, ...)
    pub source: String,

    /// Extraction confidence in [0, 1]
    pub confidence: f64,

    /// How often the entity has been mentioned; never decreases
    pub mention_count: u32,

    /// First time the entity was seen
    pub created_at: chrono::DateTime<chrono::Utc>,

    /// Last time the entity was mentioned or updated
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl GraphEntity {
    /// Create a fresh entity node
    pub fn new(user_id: impl Into<String>, name: impl Into<String>, entity_type: EntityType) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            name: name.into(),
            entity_type,
            properties: HashMap::new(),
            source: "conversation".to_string(),
            confidence: 0.8,
            mention_count: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A typed, directed edge between two entities of the same user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRelation {
    /// Unique identifier
    pub id: String,

    /// Owning user
    pub user_id: String,

    /// Source entity id
    pub source_id: String,

    /// Target entity id
    pub target_id: String,

    /// Kind of relation
    pub relation_type: RelationType,

    /// Display label ("daughter", "favorite restaurant", ...)
    pub label: String,

    /// Free-form typed properties
    pub properties: HashMap<String, PropertyValue>,

    /// Where the relation came from
    pub source: String,

    /// Relative strength of the tie in [0, 1]
    pub weight: f64,

    /// Extraction confidence in [0, 1]
    pub confidence: f64,

    /// First time the relation was seen
    pub created_at: chrono::DateTime<chrono::Utc>,

    /// Last time the relation was reasserted or updated
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl GraphRelation {
    /// Create a fresh relation edge
    pub fn new(
        user_id: impl Into<String>,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relation_type: RelationType,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            relation_type,
            label: relation_type.label().to_string(),
            properties: HashMap::new(),
            source: "conversation".to_string(),
            weight: 0.5,
            confidence: 0.8,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Serializable dump of a whole graph, used for export and restore
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// All entity nodes
    pub entities: Vec<GraphEntity>,
    /// All relation edges
    pub relations: Vec<GraphRelation>,
}

/// One node of a visualization payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisNode {
    /// Entity id
    pub id: String,
    /// Display label
    pub label: String,
    /// Entity type label
    pub entity_type: String,
    /// Render size, scaled from mention counts
    pub size: f64,
    /// Raw mention count
    pub mention_count: u32,
}

/// One edge of a visualization payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisEdge {
    /// Source entity id
    pub source: String,
    /// Target entity id
    pub target: String,
    /// Relation type label
    pub label: String,
    /// Edge weight
    pub weight: f64,
}

/// Render-ready view of one user's graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphVisualization {
    /// Nodes with render sizes
    pub nodes: Vec<VisNode>,
    /// Edges with weights
    pub edges: Vec<VisEdge>,
    /// Entity count per type label
    pub entity_counts: HashMap<String, usize>,
    /// Relation count per type label
    pub relation_counts: HashMap<String, usize>,
}

/// Entities and relations reachable within a bounded number of hops
#[derive(Debug, Clone, Default)]
pub struct Neighborhood {
    /// Entities encountered, start excluded, deduplicated
    pub entities: Vec<GraphEntity>,
    /// Relations traversed, deduplicated
    pub relations: Vec<GraphRelation>,
}

/// A path between two entities: the nodes in order plus the edges walked
#[derive(Debug, Clone)]
pub struct GraphPath {
    /// Entities along the path, endpoints included
    pub entities: Vec<GraphEntity>,
    /// Relations traversed, one per hop
    pub relations: Vec<GraphRelation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_values_serialize_untagged() {
        // Snapshots are exchanged with non-Rust consumers; property values
        // must read as plain JSON scalars, not tagged enums.
        let mut entity = GraphEntity::new("alice", "小明", EntityType::Person);
        entity.properties.insert("age".to_string(), PropertyValue::from(7i64));
        entity
            .properties
            .insert("grade".to_string(), PropertyValue::from("first"));

        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["properties"]["age"], serde_json::json!(7));
        assert_eq!(json["properties"]["grade"], serde_json::json!("first"));
        assert_eq!(json["entity_type"], serde_json::json!("person"));

        let back: GraphEntity = serde_json::from_value(json).unwrap();
        assert_eq!(back.properties, entity.properties);
    }
}
