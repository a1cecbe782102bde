//! Pattern-table-driven intent detection and entity extraction
//!
//! The tables are plain data so deployments can swap in their own rules;
//! [`IntentCatalog::default`] ships a bilingual (zh/en) starter table.

use crate::error::{MemoryError, MemoryResult};
use regex::Regex;

/// Label used when no rule matches a message
pub const GENERIC_INTENT: &str = "general";

/// One ordered intent rule: first matching rule yields the primary intent
#[derive(Debug, Clone)]
pub struct IntentRule {
    /// Pattern tested against the raw message text
    pub pattern: Regex,
    /// Intent label reported on match
    pub label: String,
}

impl IntentRule {
    /// Compile a rule from a pattern string
    pub fn new(pattern: &str, label: impl Into<String>) -> MemoryResult<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| MemoryError::validation("pattern", e.to_string()))?;
        Ok(Self {
            pattern,
            label: label.into(),
        })
    }
}

/// Kind of entity reference captured from raw text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// A place reference
    Location,
    /// A person reference
    Person,
}

/// An entity surface form captured from a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedEntity {
    /// The captured text
    pub text: String,
    /// What the pattern classified it as
    pub kind: EntityKind,
}

/// Ordered intent rules plus entity-capture patterns
#[derive(Debug, Clone)]
pub struct IntentCatalog {
    rules: Vec<IntentRule>,
    location_patterns: Vec<Regex>,
    person_patterns: Vec<Regex>,
}

impl IntentCatalog {
    /// Build a catalog from explicit tables
    pub fn new(
        rules: Vec<IntentRule>,
        location_patterns: Vec<Regex>,
        person_patterns: Vec<Regex>,
    ) -> Self {
        Self {
            rules,
            location_patterns,
            person_patterns,
        }
    }

    /// All intent labels matching the text, in rule order, deduplicated
    ///
    /// Empty result means the message carries no recognized intent; callers
    /// fall back to [`GENERIC_INTENT`].
    pub fn detect(&self, text: &str) -> Vec<String> {
        let mut labels = Vec::new();
        for rule in &self.rules {
            if rule.pattern.is_match(text) && !labels.contains(&rule.label) {
                labels.push(rule.label.clone());
            }
        }
        labels
    }

    /// The first matching label, or [`GENERIC_INTENT`]
    pub fn primary_intent(&self, text: &str) -> String {
        self.detect(text)
            .into_iter()
            .next()
            .unwrap_or_else(|| GENERIC_INTENT.to_string())
    }

    /// Whether a label is specific enough to count as a topic
    ///
    /// Greetings, thanks and the generic fallback never establish or switch
    /// a conversation topic.
    pub fn is_specific(label: &str) -> bool {
        !matches!(label, GENERIC_INTENT | "greeting" | "thanks")
    }

    /// Capture location/person references from raw text
    pub fn extract_entities(&self, text: &str) -> Vec<ExtractedEntity> {
        let mut entities = Vec::new();
        let mut push = |text: String, kind: EntityKind| {
            let candidate = ExtractedEntity { text, kind };
            if !entities.contains(&candidate) {
                entities.push(candidate);
            }
        };

        for pattern in &self.location_patterns {
            for caps in pattern.captures_iter(text) {
                if let Some(m) = caps.get(1).or_else(|| caps.get(0)) {
                    push(m.as_str().to_string(), EntityKind::Location);
                }
            }
        }
        for pattern in &self.person_patterns {
            for caps in pattern.captures_iter(text) {
                if let Some(m) = caps.get(1).or_else(|| caps.get(0)) {
                    push(m.as_str().to_string(), EntityKind::Person);
                }
            }
        }
        entities
    }
}

impl Default for IntentCatalog {
    fn default() -> Self {
        // Static tables; the patterns are compile-time constants.
        let rule = |pattern: &str, label: &str| IntentRule {
            pattern: Regex::new(pattern).expect("static intent pattern"),
            label: label.to_string(),
        };
        let rules = vec![
            rule(r"(?i)你好|您好|早上好|晚上好|\b(hi|hello|hey)\b", "greeting"),
            rule(r"(?i)谢谢|多谢|感谢|\bthanks?\b|thank you", "thanks"),
            rule(r"(?i)天气|下雨|气温|降温|\b(weather|rain|temperature)\b", "weather"),
            rule(
                r"(?i)提醒|记得|别忘|\bremind\b|remember to|don't forget",
                "reminder",
            ),
            rule(
                r"(?i)日程|安排|几点|什么时候|\b(schedule|appointment|agenda)\b",
                "schedule",
            ),
            rule(
                r"(?i)上学|放学|接孩子|送孩子|学校|作业|\b(school|homework|class)\b",
                "school",
            ),
            rule(
                r"(?i)开会|会议|加班|工作|\b(meeting|work|deadline)\b",
                "work",
            ),
            rule(
                r"(?i)医院|看病|吃药|不舒服|\b(doctor|hospital|medicine|sick)\b",
                "health",
            ),
            rule(
                r"(?i)买|购物|商场|超市|下单|\b(shopping|buy|order)\b",
                "shopping",
            ),
            rule(
                r"(?i)吃饭|晚饭|午饭|早饭|餐厅|饿|\b(dinner|lunch|breakfast|restaurant|hungry)\b",
                "food",
            ),
            rule(
                r"(?i)怎么去|路线|导航|堵车|\b(route|directions|traffic)\b",
                "navigation",
            ),
        ];

        let location_patterns = vec![
            // The prefix class excludes verbs and particles so "去实验学校"
            // captures "实验学校", not the whole clause.
            Regex::new(r"([\p{Han}&&[^去到在回送带从和的了我你他她是有]]{0,4}(?:学校|公司|医院|超市|公园|餐厅|车站|机场))")
                .expect("static location pattern"),
            Regex::new(r"(?i)\b(school|office|hospital|supermarket|park|restaurant|station|airport|gym|home)\b")
                .expect("static location pattern"),
        ];
        let person_patterns = vec![
            Regex::new(r"(妈妈|爸爸|老婆|妻子|老公|丈夫|儿子|女儿|孩子|爷爷|奶奶|老师|老板|同事|朋友)")
                .expect("static person pattern"),
            Regex::new(r"(?i)\b(mom|dad|wife|husband|son|daughter|kids?|teacher|boss|colleague|friend)\b")
                .expect("static person pattern"),
        ];

        Self::new(rules, location_patterns, person_patterns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_multiple_labels_in_rule_order() {
        let catalog = IntentCatalog::default();
        let labels = catalog.detect("提醒我明天送孩子去学校");
        assert_eq!(labels, vec!["reminder".to_string(), "school".to_string()]);
        assert_eq!(catalog.primary_intent("提醒我明天送孩子去学校"), "reminder");
    }

    #[test]
    fn test_no_match_falls_back_to_generic() {
        let catalog = IntentCatalog::default();
        assert!(catalog.detect("嗯嗯").is_empty());
        assert_eq!(catalog.primary_intent("嗯嗯"), GENERIC_INTENT);
    }

    #[test]
    fn test_specificity_classification() {
        assert!(!IntentCatalog::is_specific(GENERIC_INTENT));
        assert!(!IntentCatalog::is_specific("greeting"));
        assert!(!IntentCatalog::is_specific("thanks"));
        assert!(IntentCatalog::is_specific("weather"));
        assert!(IntentCatalog::is_specific("school"));
    }

    #[test]
    fn test_entity_extraction_bilingual() {
        let catalog = IntentCatalog::default();

        let entities = catalog.extract_entities("下午送孩子去实验学校");
        assert!(entities.contains(&ExtractedEntity {
            text: "实验学校".to_string(),
            kind: EntityKind::Location,
        }));
        assert!(entities.contains(&ExtractedEntity {
            text: "孩子".to_string(),
            kind: EntityKind::Person,
        }));

        let entities = catalog.extract_entities("meet my boss at the office");
        assert!(entities
            .iter()
            .any(|e| e.kind == EntityKind::Location && e.text == "office"));
        assert!(entities
            .iter()
            .any(|e| e.kind == EntityKind::Person && e.text == "boss"));
    }

    #[test]
    fn test_invalid_custom_pattern_is_rejected() {
        let err = IntentRule::new("([unclosed", "broken").unwrap_err();
        assert!(matches!(
            err,
            crate::error::MemoryError::Validation { field: "pattern", .. }
        ));
    }
}
