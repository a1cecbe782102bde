//! Rule-based entity and relation extraction from free text
//!
//! A small bilingual (zh/en) pattern table turns raw utterances into
//! graph upserts: people, places, vehicles and stated preferences, with
//! relations anchored on a per-user self node. This is deliberately
//! shallow; anything smarter belongs in an external extraction service
//! feeding [`EntityGraphStore`] directly.

use crate::error::GraphResult;
use crate::model::{EntityType, GraphEntity, GraphRelation, RelationType};
use crate::store::EntityGraphStore;
use regex::Regex;
use std::collections::HashMap;

/// Name of the synthetic node representing the speaking user
pub const SELF_ENTITY_NAME: &str = "user";

/// What one extraction pass created or reinforced
#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    /// Entities upserted, self node excluded
    pub entities: Vec<GraphEntity>,
    /// Relations upserted
    pub relations: Vec<GraphRelation>,
}

/// Bilingual pattern-table extractor
pub struct GraphExtractor {
    family: Regex,
    friend: Regex,
    acquaintance: Regex,
    location: Vec<Regex>,
    movement: Regex,
    vehicle: Regex,
    owned_vehicle: Regex,
    like: Regex,
    dislike: Regex,
}

impl Default for GraphExtractor {
    fn default() -> Self {
        // Static tables; the patterns are compile-time constants.
        let re = |pattern: &str| Regex::new(pattern).expect("static extraction pattern");
        Self {
            family: re(
                r"(?i)(妈妈|爸爸|老婆|妻子|老公|丈夫|儿子|女儿|孩子|爷爷|奶奶)|\b(mom|dad|wife|husband|son|daughter|kids?)\b",
            ),
            friend: re(r"(?i)(朋友)|\bfriends?\b"),
            acquaintance: re(r"(?i)(老师|老板|同事)|\b(teacher|boss|colleagues?)\b"),
            location: vec![
                // The prefix class excludes verbs and particles so "去阳光学校"
                // captures "阳光学校", not the whole clause.
                re(r"([\p{Han}&&[^去到在回送带从和的了我你他她是有]]{0,4}(?:学校|公司|医院|超市|公园|餐厅|车站|机场|商场))"),
                re(r"(?i)\b(school|office|hospital|supermarket|park|restaurant|station|airport|mall|gym)\b"),
            ],
            movement: re(r"(?i)去|到|回|went to|going to|drove to|at the"),
            vehicle: re(r"(?i)(汽车|自行车|电动车|摩托车)|\b(car|bike|bicycle|motorcycle)\b"),
            owned_vehicle: re(r"(?i)我的(汽车|车|自行车|电动车|摩托车)|\bmy (car|bike|bicycle|motorcycle)\b"),
            like: re(r"(?:^|[^不])喜欢([\p{Han}A-Za-z0-9]{1,12})|(?i)\b(?:like|love)\s+(\w+)"),
            dislike: re(r"(?:讨厌|不喜欢)([\p{Han}A-Za-z0-9]{1,12})|(?i)\b(?:hate|dislike)\s+(\w+)"),
        }
    }
}

impl GraphExtractor {
    /// Create the extractor with the built-in pattern table
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract entities and relations from one utterance and upsert them
    ///
    /// Repeating a sentence only bumps mention counts; the graph shape
    /// stays stable.
    pub fn extract(
        &self,
        store: &EntityGraphStore,
        user_id: &str,
        text: &str,
    ) -> GraphResult<ExtractionReport> {
        let mut report = ExtractionReport::default();
        // Created lazily on the first relation that needs an anchor.
        let mut self_id: Option<String> = None;

        let mut anchor = |store: &EntityGraphStore| -> GraphResult<String> {
            if let Some(id) = &self_id {
                return Ok(id.clone());
            }
            let entity = store.upsert_entity(
                user_id,
                SELF_ENTITY_NAME,
                EntityType::Person,
                HashMap::new(),
                Some(1.0),
            )?;
            self_id = Some(entity.id.clone());
            Ok(entity.id)
        };

        for (pattern, relation_type) in [
            (&self.family, RelationType::Family),
            (&self.friend, RelationType::Friend),
            (&self.acquaintance, RelationType::RelatedTo),
        ] {
            for m in Self::matches(pattern, text) {
                let entity =
                    store.upsert_entity(user_id, &m, EntityType::Person, HashMap::new(), None)?;
                let from = anchor(store)?;
                report.relations.push(store.upsert_relation(
                    user_id,
                    &from,
                    &entity.id,
                    relation_type,
                    Some(&m),
                    HashMap::new(),
                    None,
                    None,
                )?);
                report.entities.push(entity);
            }
        }

        let moved = self.movement.is_match(text);
        for pattern in &self.location {
            for m in Self::matches(pattern, text) {
                let entity =
                    store.upsert_entity(user_id, &m, EntityType::Location, HashMap::new(), None)?;
                if moved {
                    let from = anchor(store)?;
                    report.relations.push(store.upsert_relation(
                        user_id,
                        &from,
                        &entity.id,
                        RelationType::Visited,
                        None,
                        HashMap::new(),
                        None,
                        None,
                    )?);
                }
                report.entities.push(entity);
            }
        }

        let owned = self.owned_vehicle.is_match(text);
        for m in Self::matches(&self.vehicle, text) {
            let entity =
                store.upsert_entity(user_id, &m, EntityType::Vehicle, HashMap::new(), None)?;
            if owned {
                let from = anchor(store)?;
                report.relations.push(store.upsert_relation(
                    user_id,
                    &from,
                    &entity.id,
                    RelationType::Owns,
                    None,
                    HashMap::new(),
                    None,
                    None,
                )?);
            }
            report.entities.push(entity);
        }

        for (pattern, relation_type) in [
            (&self.like, RelationType::Likes),
            (&self.dislike, RelationType::Dislikes),
        ] {
            for m in Self::matches(pattern, text) {
                let entity = store.upsert_entity(
                    user_id,
                    &m,
                    EntityType::Preference,
                    HashMap::new(),
                    None,
                )?;
                let from = anchor(store)?;
                report.relations.push(store.upsert_relation(
                    user_id,
                    &from,
                    &entity.id,
                    relation_type,
                    None,
                    HashMap::new(),
                    None,
                    None,
                )?);
                report.entities.push(entity);
            }
        }

        if !report.entities.is_empty() {
            tracing::debug!(
                user_id,
                entities = report.entities.len(),
                relations = report.relations.len(),
                "extracted graph updates from text"
            );
        }
        Ok(report)
    }

    /// Deduplicated capture-group (or whole-match) texts of a pattern
    fn matches(pattern: &Regex, text: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        for caps in pattern.captures_iter(text) {
            let m = caps
                .iter()
                .skip(1)
                .flatten()
                .next()
                .or_else(|| caps.get(0));
            if let Some(m) = m {
                let value = m.as_str().trim().to_string();
                if !value.is_empty() && !found.contains(&value) {
                    found.push(value);
                }
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chinese_sentence_builds_graph() {
        let store = EntityGraphStore::new();
        let extractor = GraphExtractor::new();

        let report = extractor
            .extract(&store, "alice", "我喜欢吃火锅，周末带孩子去阳光学校")
            .unwrap();

        let kid = store
            .find_entity("alice", "孩子", EntityType::Person)
            .unwrap();
        let school = store
            .find_entity("alice", "阳光学校", EntityType::Location)
            .unwrap();
        let hotpot = store
            .find_entity("alice", "吃火锅", EntityType::Preference)
            .unwrap();
        let me = store
            .find_entity("alice", SELF_ENTITY_NAME, EntityType::Person)
            .unwrap();

        let relation_types: Vec<RelationType> =
            report.relations.iter().map(|r| r.relation_type).collect();
        assert!(relation_types.contains(&RelationType::Family));
        assert!(relation_types.contains(&RelationType::Visited));
        assert!(relation_types.contains(&RelationType::Likes));

        assert!(report
            .relations
            .iter()
            .any(|r| r.source_id == me.id && r.target_id == kid.id));
        assert!(store.find_path("alice", &hotpot.id, &school.id, 4).is_some());
    }

    #[test]
    fn test_negated_preference_is_a_dislike() {
        let store = EntityGraphStore::new();
        let extractor = GraphExtractor::new();

        let report = extractor.extract(&store, "alice", "我不喜欢堵车").unwrap();
        assert_eq!(report.relations.len(), 1);
        assert_eq!(report.relations[0].relation_type, RelationType::Dislikes);
        assert!(store
            .find_entity("alice", "堵车", EntityType::Preference)
            .is_some());
    }

    #[test]
    fn test_english_ownership_and_preference() {
        let store = EntityGraphStore::new();
        let extractor = GraphExtractor::new();

        let report = extractor
            .extract(&store, "alice", "I love pizza and I drive my car to the office")
            .unwrap();

        let relation_types: Vec<RelationType> =
            report.relations.iter().map(|r| r.relation_type).collect();
        assert!(relation_types.contains(&RelationType::Likes));
        assert!(relation_types.contains(&RelationType::Owns));
        assert!(store
            .find_entity("alice", "car", EntityType::Vehicle)
            .is_some());
        assert!(store
            .find_entity("alice", "office", EntityType::Location)
            .is_some());
    }

    #[test]
    fn test_repeated_extraction_only_bumps_mentions() {
        let store = EntityGraphStore::new();
        let extractor = GraphExtractor::new();

        extractor.extract(&store, "alice", "送孩子去学校").unwrap();
        extractor.extract(&store, "alice", "送孩子去学校").unwrap();

        let kid = store
            .find_entity("alice", "孩子", EntityType::Person)
            .unwrap();
        assert_eq!(kid.mention_count, 2);
        assert_eq!(store.entities_by_type("alice", EntityType::Person).len(), 2);
    }
}
