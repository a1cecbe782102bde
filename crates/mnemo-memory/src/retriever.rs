//! Hybrid retrieval over episodic records
//!
//! Two local passes score every candidate - a lexical keyword pass and a
//! symbolic rule pass - and Reciprocal Rank Fusion merges their rankings.
//! When the fused pool is larger than the requested top-k, an optional
//! external reranking service refines the cut; that call runs under a
//! timeout and degrades silently to the fused order on any failure, so
//! retrieval itself never hard-fails because of it.

use crate::error::{MemoryError, MemoryResult};
use crate::store::EpisodicMemoryItem;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// A retrieved record with its accumulated score and why it matched
#[derive(Debug, Clone)]
pub struct RetrievedMemory {
    /// The matched record
    pub item: EpisodicMemoryItem,
    /// Fused (and possibly rerank-boosted) score
    pub score: f64,
    /// Deduplicated human-readable match reasons
    pub match_reasons: Vec<String>,
}

/// One entry of a reranker response: an index into the submitted candidate
/// list plus the service's reason for keeping it
#[derive(Debug, Clone)]
pub struct RerankChoice {
    /// Index into the candidate summaries as submitted
    pub index: usize,
    /// Why the service ranked it
    pub reason: String,
}

/// External relevance-reranking service (LLM-backed)
///
/// Implementations receive the query and the candidate summaries and
/// return a ranked subset of indices, at most `top_k` long.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Rank the most relevant candidates for the query
    async fn rerank(
        &self,
        query: &str,
        summaries: &[String],
        top_k: usize,
    ) -> MemoryResult<Vec<RerankChoice>>;
}

/// A symbolic rule: if any trigger phrase occurs in the query, the rule's
/// target is compared against the candidate field it governs
#[derive(Debug, Clone)]
pub struct TriggerRule {
    /// Phrases looked up in the query (case-insensitive substring)
    pub triggers: Vec<String>,
    /// Event type, location token or participant id to match
    pub target: String,
}

impl TriggerRule {
    /// Build a rule from trigger phrases and a target
    pub fn new(triggers: &[&str], target: &str) -> Self {
        Self {
            triggers: triggers.iter().map(|t| t.to_lowercase()).collect(),
            target: target.to_string(),
        }
    }

    fn fires(&self, query_lower: &str) -> bool {
        self.triggers.iter().any(|t| query_lower.contains(t))
    }
}

/// Rule tables for the symbolic pass; injectable, with bilingual defaults
#[derive(Debug, Clone)]
pub struct SymbolicRules {
    /// Trigger phrase -> expected event type (weight 0.5)
    pub event_rules: Vec<TriggerRule>,
    /// Trigger phrase -> location token (weight 0.4)
    pub location_rules: Vec<TriggerRule>,
    /// Alias -> participant id (weight 0.3)
    pub participant_rules: Vec<TriggerRule>,
}

impl Default for SymbolicRules {
    fn default() -> Self {
        Self {
            event_rules: vec![
                TriggerRule::new(&["送孩子", "上学", "接孩子", "学校", "school"], "school_run"),
                TriggerRule::new(&["购物", "买", "商场", "shopping", "buy"], "shopping"),
                TriggerRule::new(&["开会", "工作", "会议", "meeting", "work"], "work"),
                TriggerRule::new(&["吃饭", "餐厅", "晚饭", "dinner", "lunch"], "meal"),
                TriggerRule::new(&["医院", "看病", "doctor", "hospital"], "medical"),
                TriggerRule::new(&["旅行", "出差", "trip", "travel"], "travel"),
            ],
            location_rules: vec![
                TriggerRule::new(&["学校", "school"], "学校"),
                TriggerRule::new(&["家", "home"], "家"),
                TriggerRule::new(&["公司", "office"], "公司"),
                TriggerRule::new(&["超市", "商场", "supermarket", "mall"], "超市"),
                TriggerRule::new(&["医院", "hospital"], "医院"),
            ],
            participant_rules: vec![
                TriggerRule::new(&["孩子", "儿子", "女儿", "kid", "son", "daughter"], "child"),
                TriggerRule::new(&["老婆", "妻子", "wife"], "spouse"),
                TriggerRule::new(&["老公", "丈夫", "husband"], "spouse"),
                TriggerRule::new(&["妈妈", "母亲", "mom"], "mother"),
                TriggerRule::new(&["爸爸", "父亲", "dad"], "father"),
            ],
        }
    }
}

/// Retrieval tuning
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// RRF smoothing constant
    pub rrf_k: f64,
    /// Minimum keyword length in characters
    pub min_keyword_len: usize,
    /// Budget for the external rerank call
    pub rerank_timeout: Duration,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            min_keyword_len: 2,
            rerank_timeout: Duration::from_secs(5),
        }
    }
}

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "to", "of", "in", "on", "at", "for",
    "and", "or", "do", "did", "does", "what", "when", "where", "how", "who", "i", "me", "my",
    "you", "your", "we", "it", "that", "this", "about",
];

const CJK_STOP_CHARS: &[char] = &[
    '的', '了', '吗', '呢', '吧', '啊', '哦', '嘛', '我', '你', '他', '她', '它', '们', '去',
    '在', '是', '有', '这', '那', '什', '么', '帮', '请', '给', '把', '让',
];

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

#[derive(Debug, Clone)]
struct PassHit {
    /// Index into the caller's candidate slice
    candidate: usize,
    score: f64,
    reasons: Vec<String>,
}

/// Three-stage hybrid retriever
pub struct Retriever {
    config: RetrievalConfig,
    rules: SymbolicRules,
    reranker: Option<Arc<dyn Reranker>>,
}

impl Retriever {
    /// Create a retriever with default rules and no reranker
    pub fn new(config: RetrievalConfig) -> Self {
        Self {
            config,
            rules: SymbolicRules::default(),
            reranker: None,
        }
    }

    /// Replace the symbolic rule tables
    pub fn with_rules(mut self, rules: SymbolicRules) -> Self {
        self.rules = rules;
        self
    }

    /// Attach an external reranking service
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Retrieve the `top_k` most relevant candidates for the query
    ///
    /// `allow_semantic_rerank` gates the external rerank stage; it is only
    /// attempted when the fused pool is larger than `top_k`.
    pub async fn retrieve(
        &self,
        query: &str,
        candidates: &[EpisodicMemoryItem],
        top_k: usize,
        allow_semantic_rerank: bool,
    ) -> MemoryResult<Vec<RetrievedMemory>> {
        if query.trim().is_empty() {
            return Err(MemoryError::validation("query", "must not be empty"));
        }
        if candidates.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let lexical = self.lexical_pass(query, candidates);
        let symbolic = self.symbolic_pass(query, candidates);
        let mut fused = self.rrf_fuse(candidates, [lexical, symbolic]);

        if allow_semantic_rerank && fused.len() > top_k {
            if let Some(reranker) = &self.reranker {
                match self.semantic_rerank(reranker.as_ref(), query, &fused, top_k).await {
                    Ok(reranked) => return Ok(reranked),
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "semantic rerank degraded, falling back to fused order"
                        );
                    }
                }
            }
        }

        fused.truncate(top_k);
        Ok(fused)
    }

    /// Query keywords: stop-words stripped, minimum length enforced, and
    /// CJK runs expanded into character bigrams so substring scoring works
    /// on unsegmented text.
    fn extract_keywords(&self, query: &str) -> Vec<String> {
        let mut keywords: Vec<String> = Vec::new();
        let mut push = |kw: String| {
            if !keywords.contains(&kw) {
                keywords.push(kw);
            }
        };

        for raw in query.split(|c: char| !(c.is_alphanumeric())) {
            if raw.is_empty() {
                continue;
            }
            let token = raw.to_lowercase();
            if STOP_WORDS.contains(&token.as_str()) {
                continue;
            }
            if token.chars().any(is_cjk) {
                for run in token.split(|c: char| CJK_STOP_CHARS.contains(&c)) {
                    let chars: Vec<char> = run.chars().collect();
                    for pair in chars.windows(2) {
                        push(pair.iter().collect());
                    }
                }
            } else if token.chars().count() >= self.config.min_keyword_len {
                push(token);
            }
        }
        keywords
    }

    /// Score candidates by the fraction of query keywords present in their
    /// text fields (case-insensitive substring match)
    fn lexical_pass(&self, query: &str, candidates: &[EpisodicMemoryItem]) -> Vec<PassHit> {
        let keywords = self.extract_keywords(query);
        if keywords.is_empty() {
            return Vec::new();
        }

        let mut hits = Vec::new();
        for (idx, item) in candidates.iter().enumerate() {
            let haystack = format!(
                "{} {} {} {}",
                item.summary,
                item.details,
                item.location.as_deref().unwrap_or(""),
                item.event_type
            )
            .to_lowercase();

            let matched: Vec<&String> =
                keywords.iter().filter(|kw| haystack.contains(kw.as_str())).collect();
            if matched.is_empty() {
                continue;
            }
            let score = matched.len() as f64 / keywords.len() as f64;
            let joined = matched
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            hits.push(PassHit {
                candidate: idx,
                score,
                reasons: vec![format!("keywords: {}", joined)],
            });
        }
        hits
    }

    /// Score candidates by rule-table matches plus recency and importance
    /// bonuses
    fn symbolic_pass(&self, query: &str, candidates: &[EpisodicMemoryItem]) -> Vec<PassHit> {
        let query_lower = query.to_lowercase();
        let now = chrono::Utc::now();

        let mut hits = Vec::new();
        for (idx, item) in candidates.iter().enumerate() {
            let mut score = 0.0;
            let mut reasons = Vec::new();

            if let Some(rule) = self
                .rules
                .event_rules
                .iter()
                .find(|r| r.fires(&query_lower) && item.event_type == r.target)
            {
                score += 0.5;
                reasons.push(format!("event type '{}'", rule.target));
            }

            if let Some(location) = &item.location {
                let location_lower = location.to_lowercase();
                if let Some(rule) = self
                    .rules
                    .location_rules
                    .iter()
                    .find(|r| r.fires(&query_lower) && location_lower.contains(&r.target.to_lowercase()))
                {
                    score += 0.4;
                    reasons.push(format!("location '{}'", rule.target));
                }
            }

            if let Some(rule) = self.rules.participant_rules.iter().find(|r| {
                r.fires(&query_lower)
                    && item
                        .participants
                        .iter()
                        .any(|p| p.eq_ignore_ascii_case(&r.target))
            }) {
                score += 0.3;
                reasons.push(format!("participant '{}'", rule.target));
            }

            // Raw wall-clock day delta; timezone handling is out of scope.
            let days = (now - item.date).num_milliseconds() as f64 / 86_400_000.0;
            let recency = if days <= 1.0 {
                0.2
            } else if days <= 3.0 {
                0.15
            } else if days <= 7.0 {
                0.1
            } else {
                0.0
            };
            if recency > 0.0 {
                score += recency;
                reasons.push(format!("recent ({:.0}d ago)", days.max(0.0)));
            }

            score += item.importance as f64 / 5.0 * 0.1;

            if score > 0.0 {
                hits.push(PassHit {
                    candidate: idx,
                    score,
                    reasons,
                });
            }
        }
        hits
    }

    /// Reciprocal Rank Fusion over the two pass rankings
    ///
    /// Each list is sorted by its own score descending and contributes
    /// `1/(k + rank + 1)` per item; items in both lists accumulate both
    /// contributions. Ties keep the stable first-insertion order of the
    /// aggregation.
    fn rrf_fuse(
        &self,
        candidates: &[EpisodicMemoryItem],
        mut passes: [Vec<PassHit>; 2],
    ) -> Vec<RetrievedMemory> {
        let k = self.config.rrf_k;
        let mut fused: Vec<(usize, RetrievedMemory)> = Vec::new();

        for pass in &mut passes {
            pass.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            for (rank, hit) in pass.iter().enumerate() {
                let contribution = 1.0 / (k + rank as f64 + 1.0);
                match fused.iter_mut().find(|(idx, _)| *idx == hit.candidate) {
                    Some((_, entry)) => {
                        entry.score += contribution;
                        for reason in &hit.reasons {
                            if !entry.match_reasons.contains(reason) {
                                entry.match_reasons.push(reason.clone());
                            }
                        }
                    }
                    None => fused.push((
                        hit.candidate,
                        RetrievedMemory {
                            item: candidates[hit.candidate].clone(),
                            score: contribution,
                            match_reasons: hit.reasons.clone(),
                        },
                    )),
                }
            }
        }

        let mut results: Vec<RetrievedMemory> = fused.into_iter().map(|(_, r)| r).collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results
    }

    /// Delegate the final cut to the external service; any failure,
    /// timeout or malformed response is surfaced as an error for the
    /// caller to absorb into the fused-order fallback.
    async fn semantic_rerank(
        &self,
        reranker: &dyn Reranker,
        query: &str,
        fused: &[RetrievedMemory],
        top_k: usize,
    ) -> MemoryResult<Vec<RetrievedMemory>> {
        let summaries: Vec<String> = fused.iter().map(|r| r.item.summary.clone()).collect();

        let choices = tokio::time::timeout(
            self.config.rerank_timeout,
            reranker.rerank(query, &summaries, top_k),
        )
        .await
        .map_err(|_| MemoryError::external("reranker", "timed out"))??;

        if choices.is_empty() || choices.len() > top_k {
            return Err(MemoryError::external(
                "reranker",
                format!("expected 1..={} choices, got {}", top_k, choices.len()),
            ));
        }
        let mut seen = HashSet::new();
        for choice in &choices {
            if choice.index >= fused.len() || !seen.insert(choice.index) {
                return Err(MemoryError::external(
                    "reranker",
                    format!("invalid candidate index {}", choice.index),
                ));
            }
        }

        let mut results = Vec::with_capacity(top_k);
        for (rank, choice) in choices.iter().enumerate() {
            let mut entry = fused[choice.index].clone();
            entry.score += (top_k - rank) as f64 * 0.1;
            if !choice.reason.is_empty() && !entry.match_reasons.contains(&choice.reason) {
                entry.match_reasons.push(choice.reason.clone());
            }
            results.push(entry);
        }
        // Fill the remaining slots from the fused order.
        for (idx, entry) in fused.iter().enumerate() {
            if results.len() >= top_k {
                break;
            }
            if !seen.contains(&idx) {
                results.push(entry.clone());
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, summary: &str, importance: u8, days_ago: i64) -> EpisodicMemoryItem {
        let mut item = EpisodicMemoryItem::new("alice", summary)
            .with_importance(importance)
            .with_date(chrono::Utc::now() - chrono::Duration::days(days_ago));
        item.id = id.to_string();
        item
    }

    #[tokio::test]
    async fn test_rrf_score_of_item_ranked_first_in_both_passes() {
        // A single candidate matched by both passes fuses to exactly
        // 1/(60+1) + 1/(60+1).
        let retriever = Retriever::new(RetrievalConfig::default());
        let candidates = vec![item("e1", "早上送孩子上学", 5, 20)];

        let results = retriever
            .retrieve("送孩子去学校", &candidates, 5, false)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!((results[0].score - 2.0 / 61.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_chinese_query_favors_school_run_memory() {
        let retriever = Retriever::new(RetrievalConfig::default());
        let candidates = vec![
            item("e1", "早上送孩子上学", 5, 0).with_event_type("school_run"),
            item("e2", "周末购物", 3, 14).with_event_type("shopping"),
        ];

        let results = retriever
            .retrieve("送孩子去学校", &candidates, 2, false)
            .await
            .unwrap();
        assert_eq!(results[0].item.summary, "早上送孩子上学");
        assert!(!results[0].match_reasons.is_empty());
    }

    #[tokio::test]
    async fn test_symbolic_rules_stack_weights() {
        let retriever = Retriever::new(RetrievalConfig::default());
        let mut target = item("e1", "和孩子一起去学校参加活动", 4, 0)
            .with_event_type("school_run")
            .with_location("实验学校");
        target.participants = vec!["child".to_string()];
        let candidates = vec![target, item("e2", "加班到很晚", 2, 30).with_event_type("work")];

        let results = retriever
            .retrieve("送孩子去学校的事", &candidates, 2, false)
            .await
            .unwrap();
        let reasons = &results[0].match_reasons;
        assert!(reasons.iter().any(|r| r.contains("event type")));
        assert!(reasons.iter().any(|r| r.contains("location")));
        assert!(reasons.iter().any(|r| r.contains("participant")));
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let retriever = Retriever::new(RetrievalConfig::default());
        let err = retriever.retrieve("  ", &[], 5, false).await.unwrap_err();
        assert!(matches!(err, MemoryError::Validation { field: "query", .. }));
    }

    struct ReversingReranker;

    #[async_trait]
    impl Reranker for ReversingReranker {
        async fn rerank(
            &self,
            _query: &str,
            summaries: &[String],
            top_k: usize,
        ) -> MemoryResult<Vec<RerankChoice>> {
            Ok((0..summaries.len().min(top_k))
                .rev()
                .map(|index| RerankChoice {
                    index,
                    reason: "service pick".to_string(),
                })
                .collect())
        }
    }

    struct FailingReranker;

    #[async_trait]
    impl Reranker for FailingReranker {
        async fn rerank(
            &self,
            _query: &str,
            _summaries: &[String],
            _top_k: usize,
        ) -> MemoryResult<Vec<RerankChoice>> {
            Err(MemoryError::external("reranker", "boom"))
        }
    }

    struct MalformedReranker;

    #[async_trait]
    impl Reranker for MalformedReranker {
        async fn rerank(
            &self,
            _query: &str,
            _summaries: &[String],
            _top_k: usize,
        ) -> MemoryResult<Vec<RerankChoice>> {
            Ok(vec![RerankChoice {
                index: 999,
                reason: String::new(),
            }])
        }
    }

    fn school_candidates() -> Vec<EpisodicMemoryItem> {
        vec![
            item("e1", "早上送孩子上学", 5, 0).with_event_type("school_run"),
            item("e2", "下午去学校开家长会", 4, 2).with_event_type("school_run"),
            item("e3", "孩子在学校参加比赛", 3, 5).with_event_type("school_run"),
        ]
    }

    #[tokio::test]
    async fn test_rerank_applies_boost_and_reason() {
        let retriever = Retriever::new(RetrievalConfig::default())
            .with_reranker(Arc::new(ReversingReranker));

        let results = retriever
            .retrieve("送孩子去学校", &school_candidates(), 2, true)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0]
            .match_reasons
            .iter()
            .any(|r| r == "service pick"));
    }

    #[tokio::test]
    async fn test_rerank_failure_falls_back_to_fused_order() {
        let plain = Retriever::new(RetrievalConfig::default());
        let failing = Retriever::new(RetrievalConfig::default())
            .with_reranker(Arc::new(FailingReranker));

        let candidates = school_candidates();
        let expected = plain.retrieve("送孩子去学校", &candidates, 2, true).await.unwrap();
        let degraded = failing
            .retrieve("送孩子去学校", &candidates, 2, true)
            .await
            .unwrap();

        let ids = |rs: &[RetrievedMemory]| rs.iter().map(|r| r.item.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&expected), ids(&degraded));
    }

    #[tokio::test]
    async fn test_malformed_rerank_response_falls_back() {
        let retriever = Retriever::new(RetrievalConfig::default())
            .with_reranker(Arc::new(MalformedReranker));

        let results = retriever
            .retrieve("送孩子去学校", &school_candidates(), 2, true)
            .await
            .unwrap();
        assert_eq!(results.len(), 2, "fallback still yields the fused top-k");
    }

    #[tokio::test]
    async fn test_rerank_skipped_when_pool_fits_top_k() {
        // With the pool no larger than top_k the reranker must not run;
        // a failing one proves it was never called.
        let retriever = Retriever::new(RetrievalConfig::default())
            .with_reranker(Arc::new(FailingReranker));
        let candidates = vec![item("e1", "早上送孩子上学", 5, 0)];

        let results = retriever
            .retrieve("送孩子去学校", &candidates, 5, true)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }
}
