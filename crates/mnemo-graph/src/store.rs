//! Per-user entity graph: arena-indexed nodes and edges with BFS queries
//!
//! Entities and relations live in id-indexed tables; relations hold ids,
//! never embedded entities, so cyclic graphs need no ownership tricks.
//! All queries are scoped to one user; graphs never cross users.

use crate::error::{GraphError, GraphResult};
use crate::model::{
    EntityType, GraphEntity, GraphPath, GraphRelation, GraphSnapshot, GraphVisualization,
    Neighborhood, PropertyValue, RelationType, VisEdge, VisNode,
};
use std::collections::{HashMap, HashSet, VecDeque};

/// Default BFS depth bound for [`EntityGraphStore::find_path`]
pub const DEFAULT_MAX_PATH_DEPTH: usize = 4;

const MIN_NODE_SIZE: f64 = 10.0;
const MAX_NODE_SIZE: f64 = 50.0;

#[derive(Default)]
struct GraphInner {
    entities: HashMap<String, GraphEntity>,
    relations: HashMap<String, GraphRelation>,
    /// (user_id, lowercase name, type) -> entity id
    entity_index: HashMap<(String, String, EntityType), String>,
    /// (user_id, source id, target id, type) -> relation id
    relation_index: HashMap<(String, String, String, RelationType), String>,
}

/// Thread-safe in-process entity graph
#[derive(Default)]
pub struct EntityGraphStore {
    inner: parking_lot::RwLock<GraphInner>,
}

impl EntityGraphStore {
    /// Create an empty graph store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or merge an entity
    ///
    /// Identity is (user, name, type), name compared case-insensitively.
    /// On conflict the new properties override same keys, confidence moves
    /// to `min(1, max(old, new))` and `mention_count` increments; both are
    /// monotonic.
    pub fn upsert_entity(
        &self,
        user_id: &str,
        name: &str,
        entity_type: EntityType,
        properties: HashMap<String, PropertyValue>,
        confidence: Option<f64>,
    ) -> GraphResult<GraphEntity> {
        if name.trim().is_empty() {
            return Err(GraphError::validation("name", "must not be empty"));
        }
        let confidence = confidence.unwrap_or(0.8);
        if !(0.0..=1.0).contains(&confidence) {
            return Err(GraphError::validation("confidence", "must be within [0, 1]"));
        }

        let key = (user_id.to_string(), name.to_lowercase(), entity_type);
        let mut inner = self.inner.write();

        if let Some(id) = inner.entity_index.get(&key).cloned() {
            let entity = inner
                .entities
                .get_mut(&id)
                .ok_or_else(|| GraphError::not_found("entity", &id))?;
            entity.properties.extend(properties);
            entity.confidence = entity.confidence.max(confidence).min(1.0);
            entity.mention_count += 1;
            entity.updated_at = chrono::Utc::now();
            tracing::trace!(user_id, name, ?entity_type, "merged entity mention");
            return Ok(entity.clone());
        }

        let mut entity = GraphEntity::new(user_id, name, entity_type);
        entity.properties = properties;
        entity.confidence = confidence.min(1.0);
        inner.entity_index.insert(key, entity.id.clone());
        inner.entities.insert(entity.id.clone(), entity.clone());
        tracing::debug!(user_id, name, ?entity_type, "created entity");
        Ok(entity)
    }

    /// Insert or merge a relation between two existing entities
    ///
    /// Identity is (user, source, target, type). On conflict weight and
    /// confidence move monotonically upward and properties merge like
    /// entity upserts.
    #[allow(clippy::too_many_arguments)]
    pub fn upsert_relation(
        &self,
        user_id: &str,
        source_id: &str,
        target_id: &str,
        relation_type: RelationType,
        label: Option<&str>,
        properties: HashMap<String, PropertyValue>,
        weight: Option<f64>,
        confidence: Option<f64>,
    ) -> GraphResult<GraphRelation> {
        let weight = weight.unwrap_or(0.5);
        let confidence = confidence.unwrap_or(0.8);
        if !(0.0..=1.0).contains(&weight) {
            return Err(GraphError::validation("weight", "must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(GraphError::validation("confidence", "must be within [0, 1]"));
        }

        let mut inner = self.inner.write();
        for id in [source_id, target_id] {
            match inner.entities.get(id) {
                Some(entity) if entity.user_id == user_id => {}
                _ => return Err(GraphError::not_found("entity", id)),
            }
        }

        let key = (
            user_id.to_string(),
            source_id.to_string(),
            target_id.to_string(),
            relation_type,
        );
        if let Some(id) = inner.relation_index.get(&key).cloned() {
            let relation = inner
                .relations
                .get_mut(&id)
                .ok_or_else(|| GraphError::not_found("relation", &id))?;
            relation.properties.extend(properties);
            relation.weight = relation.weight.max(weight).min(1.0);
            relation.confidence = relation.confidence.max(confidence).min(1.0);
            if let Some(label) = label {
                relation.label = label.to_string();
            }
            relation.updated_at = chrono::Utc::now();
            return Ok(relation.clone());
        }

        let mut relation = GraphRelation::new(user_id, source_id, target_id, relation_type);
        if let Some(label) = label {
            relation.label = label.to_string();
        }
        relation.properties = properties;
        relation.weight = weight;
        relation.confidence = confidence.min(1.0);
        inner.relation_index.insert(key, relation.id.clone());
        inner.relations.insert(relation.id.clone(), relation.clone());
        tracing::debug!(user_id, source_id, target_id, ?relation_type, "created relation");
        Ok(relation)
    }

    /// Fetch an entity by id
    pub fn get_entity(&self, entity_id: &str) -> Option<GraphEntity> {
        self.inner.read().entities.get(entity_id).cloned()
    }

    /// Look an entity up by its identity key
    pub fn find_entity(
        &self,
        user_id: &str,
        name: &str,
        entity_type: EntityType,
    ) -> Option<GraphEntity> {
        let inner = self.inner.read();
        let key = (user_id.to_string(), name.to_lowercase(), entity_type);
        inner
            .entity_index
            .get(&key)
            .and_then(|id| inner.entities.get(id))
            .cloned()
    }

    /// All entities of one type for a user
    pub fn entities_by_type(&self, user_id: &str, entity_type: EntityType) -> Vec<GraphEntity> {
        let mut entities: Vec<GraphEntity> = self
            .inner
            .read()
            .entities
            .values()
            .filter(|e| e.user_id == user_id && e.entity_type == entity_type)
            .cloned()
            .collect();
        entities.sort_by(|a, b| b.mention_count.cmp(&a.mention_count));
        entities
    }

    /// Entities whose name contains the query, case-insensitively
    pub fn search_entities(&self, user_id: &str, query: &str) -> Vec<GraphEntity> {
        let needle = query.to_lowercase();
        let mut entities: Vec<GraphEntity> = self
            .inner
            .read()
            .entities
            .values()
            .filter(|e| e.user_id == user_id && e.name.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        entities.sort_by(|a, b| b.mention_count.cmp(&a.mention_count));
        entities
    }

    /// Delete an entity and every relation touching it; `false` on miss
    pub fn delete_entity(&self, entity_id: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(entity) = inner.entities.remove(entity_id) else {
            return false;
        };
        inner.entity_index.remove(&(
            entity.user_id.clone(),
            entity.name.to_lowercase(),
            entity.entity_type,
        ));

        let doomed: Vec<GraphRelation> = inner
            .relations
            .values()
            .filter(|r| r.source_id == entity_id || r.target_id == entity_id)
            .cloned()
            .collect();
        for relation in doomed {
            inner.relations.remove(&relation.id);
            inner.relation_index.remove(&(
                relation.user_id.clone(),
                relation.source_id.clone(),
                relation.target_id.clone(),
                relation.relation_type,
            ));
        }
        true
    }

    /// Delete a relation; `false` on miss
    pub fn delete_relation(&self, relation_id: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(relation) = inner.relations.remove(relation_id) else {
            return false;
        };
        inner.relation_index.remove(&(
            relation.user_id,
            relation.source_id,
            relation.target_id,
            relation.relation_type,
        ));
        true
    }

    /// Every relation where the entity is source or target
    pub fn entity_relations(&self, entity_id: &str) -> Vec<GraphRelation> {
        self.inner
            .read()
            .relations
            .values()
            .filter(|r| r.source_id == entity_id || r.target_id == entity_id)
            .cloned()
            .collect()
    }

    /// Shortest path between two entities of one user
    ///
    /// Unweighted BFS over an undirected view of the user's relations,
    /// bounded by `max_depth` hops. `find_path(a, a)` is the single-node
    /// path; unknown or cross-user endpoints yield `None`, as does any
    /// pair not connected within the bound.
    pub fn find_path(
        &self,
        user_id: &str,
        from_id: &str,
        to_id: &str,
        max_depth: usize,
    ) -> Option<GraphPath> {
        let inner = self.inner.read();
        let from = inner.entities.get(from_id)?;
        let to = inner.entities.get(to_id)?;
        if from.user_id != user_id || to.user_id != user_id {
            return None;
        }
        if from_id == to_id {
            return Some(GraphPath {
                entities: vec![from.clone()],
                relations: Vec::new(),
            });
        }
        if max_depth == 0 {
            return None;
        }

        // Undirected adjacency: entity id -> (neighbor id, relation id)
        let mut adjacency: HashMap<&str, Vec<(&str, &str)>> = HashMap::new();
        for relation in inner.relations.values().filter(|r| r.user_id == user_id) {
            adjacency
                .entry(relation.source_id.as_str())
                .or_default()
                .push((relation.target_id.as_str(), relation.id.as_str()));
            adjacency
                .entry(relation.target_id.as_str())
                .or_default()
                .push((relation.source_id.as_str(), relation.id.as_str()));
        }

        // parent: node -> (previous node, relation walked)
        let mut parent: HashMap<&str, (&str, &str)> = HashMap::new();
        let mut visited: HashSet<&str> = HashSet::from([from_id]);
        let mut frontier: VecDeque<(&str, usize)> = VecDeque::from([(from_id, 0)]);

        while let Some((node, depth)) = frontier.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let Some(edges) = adjacency.get(node) else {
                continue;
            };
            for &(next, relation_id) in edges {
                if !visited.insert(next) {
                    continue;
                }
                parent.insert(next, (node, relation_id));
                if next == to_id {
                    // Walk the parent chain back to the start.
                    let mut entity_ids = vec![to_id];
                    let mut relation_ids = Vec::new();
                    let mut cursor = to_id;
                    while let Some(&(prev, rel)) = parent.get(cursor) {
                        relation_ids.push(rel);
                        entity_ids.push(prev);
                        cursor = prev;
                    }
                    entity_ids.reverse();
                    relation_ids.reverse();
                    return Some(GraphPath {
                        entities: entity_ids
                            .into_iter()
                            .filter_map(|id| inner.entities.get(id).cloned())
                            .collect(),
                        relations: relation_ids
                            .into_iter()
                            .filter_map(|id| inner.relations.get(id).cloned())
                            .collect(),
                    });
                }
                frontier.push_back((next, depth + 1));
            }
        }
        None
    }

    /// Everything reachable from an entity within `hops` BFS levels
    ///
    /// The start entity is excluded; entities and traversed relations are
    /// deduplicated. `None` if the start entity is unknown.
    pub fn neighbors(&self, entity_id: &str, hops: usize) -> Option<Neighborhood> {
        let inner = self.inner.read();
        let start = inner.entities.get(entity_id)?;
        let user_id = start.user_id.clone();

        let mut neighborhood = Neighborhood::default();
        let mut seen_relations: HashSet<&str> = HashSet::new();
        let mut visited: HashSet<&str> = HashSet::from([entity_id]);
        let mut frontier: VecDeque<(&str, usize)> = VecDeque::from([(entity_id, 0)]);

        while let Some((node, depth)) = frontier.pop_front() {
            if depth >= hops {
                continue;
            }
            for relation in inner
                .relations
                .values()
                .filter(|r| r.user_id == user_id)
                .filter(|r| r.source_id == node || r.target_id == node)
            {
                if seen_relations.insert(relation.id.as_str()) {
                    neighborhood.relations.push(relation.clone());
                }
                let next = if relation.source_id == node {
                    relation.target_id.as_str()
                } else {
                    relation.source_id.as_str()
                };
                if visited.insert(next) {
                    if let Some(entity) = inner.entities.get(next) {
                        neighborhood.entities.push(entity.clone());
                    }
                    frontier.push_back((next, depth + 1));
                }
            }
        }
        Some(neighborhood)
    }

    /// Render-ready dump of one user's graph
    ///
    /// Node sizes scale linearly between 10 and 50 against the user's
    /// largest mention count.
    pub fn visualization(&self, user_id: &str) -> GraphVisualization {
        let inner = self.inner.read();
        let entities: Vec<&GraphEntity> = inner
            .entities
            .values()
            .filter(|e| e.user_id == user_id)
            .collect();
        let max_mentions = entities
            .iter()
            .map(|e| e.mention_count)
            .max()
            .unwrap_or(1)
            .max(1) as f64;

        let mut vis = GraphVisualization::default();
        for entity in entities {
            let scale = entity.mention_count as f64 / max_mentions;
            vis.nodes.push(VisNode {
                id: entity.id.clone(),
                label: entity.name.clone(),
                entity_type: entity.entity_type.label().to_string(),
                size: MIN_NODE_SIZE + (MAX_NODE_SIZE - MIN_NODE_SIZE) * scale,
                mention_count: entity.mention_count,
            });
            *vis
                .entity_counts
                .entry(entity.entity_type.label().to_string())
                .or_insert(0) += 1;
        }
        for relation in inner.relations.values().filter(|r| r.user_id == user_id) {
            vis.edges.push(VisEdge {
                source: relation.source_id.clone(),
                target: relation.target_id.clone(),
                label: relation.label.clone(),
                weight: relation.weight,
            });
            *vis
                .relation_counts
                .entry(relation.relation_type.label().to_string())
                .or_insert(0) += 1;
        }
        vis
    }

    /// Serializable dump of one user's graph
    pub fn snapshot(&self, user_id: &str) -> GraphSnapshot {
        let inner = self.inner.read();
        GraphSnapshot {
            entities: inner
                .entities
                .values()
                .filter(|e| e.user_id == user_id)
                .cloned()
                .collect(),
            relations: inner
                .relations
                .values()
                .filter(|r| r.user_id == user_id)
                .cloned()
                .collect(),
        }
    }

    /// Load a snapshot, replacing ids already present
    ///
    /// Relations referencing entities absent from both the snapshot and
    /// the store are rejected.
    pub fn restore(&self, snapshot: GraphSnapshot) -> GraphResult<()> {
        let mut inner = self.inner.write();
        for relation in &snapshot.relations {
            for id in [&relation.source_id, &relation.target_id] {
                let known = inner.entities.contains_key(id)
                    || snapshot.entities.iter().any(|e| &e.id == id);
                if !known {
                    return Err(GraphError::not_found("entity", id));
                }
            }
        }
        for entity in snapshot.entities {
            let key = (
                entity.user_id.clone(),
                entity.name.to_lowercase(),
                entity.entity_type,
            );
            // A restored entity takes over its identity key; an entity
            // already holding it under a different id is evicted along
            // with its relations, never left unreachable.
            if let Some(displaced) = inner.entity_index.insert(key, entity.id.clone()) {
                if displaced != entity.id {
                    inner.entities.remove(&displaced);
                    let doomed: Vec<GraphRelation> = inner
                        .relations
                        .values()
                        .filter(|r| r.source_id == displaced || r.target_id == displaced)
                        .cloned()
                        .collect();
                    for relation in doomed {
                        inner.relations.remove(&relation.id);
                        inner.relation_index.remove(&(
                            relation.user_id.clone(),
                            relation.source_id.clone(),
                            relation.target_id.clone(),
                            relation.relation_type,
                        ));
                    }
                }
            }
            inner.entities.insert(entity.id.clone(), entity);
        }
        for relation in snapshot.relations {
            inner.relation_index.insert(
                (
                    relation.user_id.clone(),
                    relation.source_id.clone(),
                    relation.target_id.clone(),
                    relation.relation_type,
                ),
                relation.id.clone(),
            );
            inner.relations.insert(relation.id.clone(), relation);
        }
        Ok(())
    }
}
