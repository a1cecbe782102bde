//! Working memory - short-lived per-session conversational context
//!
//! Each (user, session) pair owns a sliding window of recent turns plus a
//! cumulative compressed digest of everything older, along with active
//! intents, entity mention counts and the current topic. Sessions are
//! created lazily on first access and expire after a TTL of inactivity;
//! expired sessions are collected lazily on the next access or by an
//! explicit [`WorkingMemoryStore::evict_expired`] sweep.
//!
//! The whole table is ephemeral and rebuilt from empty on process restart.

use crate::intent::IntentCatalog;
use crate::message::{ChatMessage, MessageRole};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Tuning knobs for the working-memory store
#[derive(Debug, Clone)]
pub struct WorkingMemoryConfig {
    /// Maximum number of uncompressed turns kept per session
    pub window_size: usize,

    /// Live window length beyond which a compression pass fires
    pub compress_threshold: usize,

    /// Idle time after which a session expires
    pub session_ttl: Duration,

    /// Active intents older than this are pruned
    pub intent_ttl: Duration,
}

impl Default for WorkingMemoryConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            compress_threshold: 20,
            session_ttl: Duration::from_secs(30 * 60),
            intent_ttl: Duration::from_secs(10 * 60),
        }
    }
}

impl WorkingMemoryConfig {
    /// Set the sliding-window size
    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    /// Set the compression trigger threshold
    pub fn with_compress_threshold(mut self, threshold: usize) -> Self {
        self.compress_threshold = threshold;
        self
    }

    /// Set the session TTL
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Set the intent TTL
    pub fn with_intent_ttl(mut self, ttl: Duration) -> Self {
        self.intent_ttl = ttl;
        self
    }
}

/// An intent observed in the current session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRecord {
    /// Intent label
    pub label: String,
    /// First time the intent was seen
    pub first_seen: chrono::DateTime<chrono::Utc>,
    /// Most recent time the intent was seen
    pub last_seen: chrono::DateTime<chrono::Utc>,
    /// How many messages carried it
    pub count: u32,
}

/// Short-term state of one conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemorySession {
    /// Session identifier
    pub session_id: String,

    /// Owning user
    pub user_id: String,

    /// Live sliding window of recent turns
    pub messages: Vec<ChatMessage>,

    /// Cumulative digest of compressed-away turns
    pub compressed_summary: Option<String>,

    /// How many turns have been folded into the digest
    pub compressed_count: usize,

    /// Active intents keyed by label
    pub active_intents: HashMap<String, IntentRecord>,

    /// Entity surface form -> mention count
    pub entity_mentions: HashMap<String, u32>,

    /// Current conversation topic, if one has been established
    pub current_topic: Option<String>,

    /// When the session was created
    pub created_at: chrono::DateTime<chrono::Utc>,

    /// Last append or access that refreshed the session
    pub last_active_at: chrono::DateTime<chrono::Utc>,

    /// Idle expiry in milliseconds
    pub ttl_ms: i64,

    /// Free-form per-session annotations
    pub metadata: HashMap<String, serde_json::Value>,
}

impl WorkingMemorySession {
    fn new(user_id: &str, session_id: &str, ttl_ms: i64) -> Self {
        let now = chrono::Utc::now();
        Self {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            messages: Vec::new(),
            compressed_summary: None,
            compressed_count: 0,
            active_intents: HashMap::new(),
            entity_mentions: HashMap::new(),
            current_topic: None,
            created_at: now,
            last_active_at: now,
            ttl_ms,
            metadata: HashMap::new(),
        }
    }

    fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        (now - self.last_active_at).num_milliseconds() > self.ttl_ms
    }

    /// Total turns ever appended to this session
    pub fn total_messages(&self) -> usize {
        self.compressed_count + self.messages.len()
    }
}

/// A detected change of conversation topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSwitch {
    /// Topic the conversation moves away from
    pub from: String,
    /// Topic the new message establishes
    pub to: String,
}

/// Read-only view of a session handed to the prompt-building layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// Session identifier
    pub session_id: String,
    /// Owning user
    pub user_id: String,
    /// Digest of compressed-away turns
    pub compressed_summary: Option<String>,
    /// Turns folded into the digest
    pub compressed_count: usize,
    /// Live window, oldest first
    pub messages: Vec<ChatMessage>,
    /// Active intents, most recent first
    pub active_intents: Vec<IntentRecord>,
    /// Entity mention counts
    pub entity_mentions: HashMap<String, u32>,
    /// Current topic
    pub current_topic: Option<String>,
}

/// Aggregate counters over all live sessions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkingMemoryStats {
    /// Number of non-expired sessions
    pub active_sessions: usize,
    /// Turns currently held in live windows
    pub live_messages: usize,
    /// Turns folded into digests across all sessions
    pub compressed_messages: usize,
    /// Distinct active intents across all sessions
    pub tracked_intents: usize,
}

/// Per-session short-term context store
///
/// Constructed once at process start and injected wherever messages are
/// handled; there is no hidden global instance.
pub struct WorkingMemoryStore {
    sessions: DashMap<String, WorkingMemorySession>,
    catalog: IntentCatalog,
    config: WorkingMemoryConfig,
}

impl WorkingMemoryStore {
    /// Create a store with the default intent catalog
    pub fn new(config: WorkingMemoryConfig) -> Self {
        Self::with_catalog(config, IntentCatalog::default())
    }

    /// Create a store with a custom intent catalog
    pub fn with_catalog(config: WorkingMemoryConfig, catalog: IntentCatalog) -> Self {
        Self {
            sessions: DashMap::new(),
            catalog,
            config,
        }
    }

    fn session_key(user_id: &str, session_id: &str) -> String {
        format!("{}::{}", user_id, session_id)
    }

    /// Run `f` against the live session, transparently creating a fresh one
    /// if the key is unknown or the existing session has idled out.
    fn with_session_mut<T>(
        &self,
        user_id: &str,
        session_id: &str,
        f: impl FnOnce(&mut WorkingMemorySession) -> T,
    ) -> T {
        let key = Self::session_key(user_id, session_id);
        let now = chrono::Utc::now();
        let ttl_ms = self.config.session_ttl.as_millis() as i64;

        let mut entry = self
            .sessions
            .entry(key)
            .or_insert_with(|| WorkingMemorySession::new(user_id, session_id, ttl_ms));
        if entry.is_expired(now) {
            tracing::debug!(
                user_id = user_id,
                session_id = session_id,
                "expired session evicted lazily"
            );
            *entry.value_mut() = WorkingMemorySession::new(user_id, session_id, ttl_ms);
        }
        f(entry.value_mut())
    }

    /// Snapshot of the session, creating it if absent
    pub fn get_or_create_session(&self, user_id: &str, session_id: &str) -> WorkingMemorySession {
        self.with_session_mut(user_id, session_id, |s| s.clone())
    }

    /// Append a turn, updating intents, entities, topic and the window
    ///
    /// Returns the enriched message as stored. Never fails; unknown session
    /// keys are transparently created.
    pub fn add_message(
        &self,
        user_id: &str,
        session_id: &str,
        role: MessageRole,
        content: impl Into<String>,
    ) -> ChatMessage {
        let content = content.into();
        let catalog = &self.catalog;
        let window_size = self.config.window_size;
        let compress_threshold = self.config.compress_threshold;
        let intent_ttl = chrono::Duration::from_std(self.config.intent_ttl)
            .unwrap_or_else(|_| chrono::Duration::minutes(10));

        self.with_session_mut(user_id, session_id, |session| {
            let now = chrono::Utc::now();
            let mut message = ChatMessage::new(role, content.clone());

            if role == MessageRole::User {
                let labels = catalog.detect(&content);
                let primary = labels
                    .first()
                    .cloned()
                    .unwrap_or_else(|| crate::intent::GENERIC_INTENT.to_string());

                for label in &labels {
                    let record = session
                        .active_intents
                        .entry(label.clone())
                        .or_insert_with(|| IntentRecord {
                            label: label.clone(),
                            first_seen: now,
                            last_seen: now,
                            count: 0,
                        });
                    record.last_seen = now;
                    record.count += 1;
                }
                session
                    .active_intents
                    .retain(|_, r| now - r.last_seen <= intent_ttl);

                for entity in catalog.extract_entities(&content) {
                    *session.entity_mentions.entry(entity.text.clone()).or_insert(0) += 1;
                    message.entities.push(entity.text);
                }

                if IntentCatalog::is_specific(&primary) {
                    session.current_topic = Some(primary.clone());
                }
                message.intent = Some(primary);
            }

            session.messages.push(message.clone());
            session.last_active_at = now;

            if session.messages.len() > compress_threshold {
                Self::compress(session, window_size);
            }
            message
        })
    }

    /// Fold the oldest turns beyond the window into the cumulative digest
    ///
    /// Messages are grouped by detected intent and turned into a short
    /// textual summary; the live window shrinks back to `window_size`.
    fn compress(session: &mut WorkingMemorySession, window_size: usize) {
        if session.messages.len() <= window_size {
            return;
        }
        let excess = session.messages.len() - window_size;
        let old: Vec<ChatMessage> = session.messages.drain(..excess).collect();

        let mut groups: Vec<(String, u32)> = Vec::new();
        for msg in &old {
            let label = msg
                .intent
                .clone()
                .unwrap_or_else(|| crate::intent::GENERIC_INTENT.to_string());
            match groups.iter_mut().find(|(l, _)| *l == label) {
                Some((_, n)) => *n += 1,
                None => groups.push((label, 1)),
            }
        }

        let digest = groups
            .iter()
            .map(|(label, n)| format!("user asked about {} {} times", label, n))
            .collect::<Vec<_>>()
            .join("; ");

        session.compressed_summary = Some(match session.compressed_summary.take() {
            Some(existing) => format!("{}; {}", existing, digest),
            None => digest,
        });
        session.compressed_count += excess;

        tracing::debug!(
            session_id = %session.session_id,
            compressed = excess,
            total_compressed = session.compressed_count,
            "compressed working-memory window"
        );
    }

    /// Read-only view of the session state
    pub fn get_context_snapshot(&self, user_id: &str, session_id: &str) -> ContextSnapshot {
        self.with_session_mut(user_id, session_id, |session| {
            let mut intents: Vec<IntentRecord> = session.active_intents.values().cloned().collect();
            intents.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
            ContextSnapshot {
                session_id: session.session_id.clone(),
                user_id: session.user_id.clone(),
                compressed_summary: session.compressed_summary.clone(),
                compressed_count: session.compressed_count,
                messages: session.messages.clone(),
                active_intents: intents,
                entity_mentions: session.entity_mentions.clone(),
                current_topic: session.current_topic.clone(),
            }
        })
    }

    /// Assemble the message list for the next model call: system prompt
    /// (with the compressed digest folded in), the live window, then the
    /// current user message.
    pub fn build_context_messages(
        &self,
        user_id: &str,
        session_id: &str,
        system_prompt: &str,
        current_message: &str,
    ) -> Vec<ChatMessage> {
        self.with_session_mut(user_id, session_id, |session| {
            let system = match &session.compressed_summary {
                Some(summary) => format!(
                    "{}\n\nEarlier in this conversation: {}",
                    system_prompt, summary
                ),
                None => system_prompt.to_string(),
            };

            let mut messages = Vec::with_capacity(session.messages.len() + 2);
            messages.push(ChatMessage::system(system));
            messages.extend(session.messages.iter().cloned());
            messages.push(ChatMessage::user(current_message));
            messages
        })
    }

    /// Report a topic switch if the new message establishes a specific
    /// topic different from the current one
    ///
    /// Does not mutate the session; greetings, thanks and generic chatter
    /// never count as a switch.
    pub fn detect_topic_switch(
        &self,
        user_id: &str,
        session_id: &str,
        new_message: &str,
    ) -> Option<TopicSwitch> {
        let incoming = self.catalog.primary_intent(new_message);
        if !IntentCatalog::is_specific(&incoming) {
            return None;
        }
        self.with_session_mut(user_id, session_id, |session| {
            match &session.current_topic {
                Some(current) if IntentCatalog::is_specific(current) && *current != incoming => {
                    Some(TopicSwitch {
                        from: current.clone(),
                        to: incoming.clone(),
                    })
                }
                _ => None,
            }
        })
    }

    /// Explicitly destroy a session; `false` if it did not exist
    pub fn destroy_session(&self, user_id: &str, session_id: &str) -> bool {
        self.sessions
            .remove(&Self::session_key(user_id, session_id))
            .is_some()
    }

    /// Grant a session extra idle time
    pub fn extend_ttl(&self, user_id: &str, session_id: &str, extra: Duration) -> bool {
        let key = Self::session_key(user_id, session_id);
        match self.sessions.get_mut(&key) {
            Some(mut session) => {
                session.ttl_ms += extra.as_millis() as i64;
                true
            }
            None => false,
        }
    }

    /// Drop every session that has idled past its TTL; returns how many
    pub fn evict_expired(&self) -> usize {
        let now = chrono::Utc::now();
        let mut evicted = 0;
        self.sessions.retain(|_, session| {
            if session.is_expired(now) {
                evicted += 1;
                false
            } else {
                true
            }
        });
        if evicted > 0 {
            tracing::debug!(evicted = evicted, "evicted expired working-memory sessions");
        }
        evicted
    }

    /// Aggregate counters over all live sessions
    pub fn stats(&self) -> WorkingMemoryStats {
        let now = chrono::Utc::now();
        let mut stats = WorkingMemoryStats::default();
        for session in self.sessions.iter() {
            if session.is_expired(now) {
                continue;
            }
            stats.active_sessions += 1;
            stats.live_messages += session.messages.len();
            stats.compressed_messages += session.compressed_count;
            stats.tracked_intents += session.active_intents.len();
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_store() -> WorkingMemoryStore {
        WorkingMemoryStore::new(
            WorkingMemoryConfig::default()
                .with_window_size(5)
                .with_compress_threshold(8),
        )
    }

    #[test]
    fn test_compression_invariant_holds() {
        let store = small_store();

        for i in 0..20 {
            store.add_message("alice", "s1", MessageRole::User, format!("今天天气怎么样 {i}"));
        }

        let session = store.get_or_create_session("alice", "s1");
        assert!(session.messages.len() <= 8, "live window bounded by the threshold");
        assert_eq!(
            session.compressed_count + session.messages.len(),
            20,
            "no message is lost or double-counted"
        );
        let summary = session.compressed_summary.unwrap();
        assert!(summary.contains("user asked about weather"));
    }

    #[test]
    fn test_compression_does_not_retrigger_per_message() {
        let store = small_store();

        // Nine turns push the live window past the threshold exactly once.
        for i in 0..9 {
            store.add_message("alice", "s1", MessageRole::User, format!("今天天气怎么样 {i}"));
        }
        let session = store.get_or_create_session("alice", "s1");
        assert_eq!(session.compressed_count, 4);
        assert_eq!(session.messages.len(), 5);

        // The next turn fits in the window again; no new digest fragment.
        store.add_message("alice", "s1", MessageRole::User, "明天会下雨吗");
        let session = store.get_or_create_session("alice", "s1");
        assert_eq!(session.compressed_count, 4);
        assert_eq!(session.messages.len(), 6);
        let summary = session.compressed_summary.unwrap();
        assert_eq!(summary, "user asked about weather 4 times");
        assert!(!summary.contains("1 times"), "digests stay multi-message groups");
    }

    #[test]
    fn test_intent_and_entity_tracking() {
        let store = small_store();
        store.add_message("alice", "s1", MessageRole::User, "提醒我送孩子去学校");
        store.add_message("alice", "s1", MessageRole::User, "学校几点放学");

        let snapshot = store.get_context_snapshot("alice", "s1");
        // "几点" moves the topic to scheduling on the second turn.
        assert_eq!(snapshot.current_topic.as_deref(), Some("schedule"));
        assert!(snapshot.active_intents.iter().any(|i| i.label == "school"));
        assert_eq!(snapshot.entity_mentions.get("孩子"), Some(&1));
        assert_eq!(snapshot.entity_mentions.get("学校"), Some(&2));
    }

    #[test]
    fn test_assistant_messages_do_not_move_topic() {
        let store = small_store();
        store.add_message("alice", "s1", MessageRole::User, "明天天气如何");
        store.add_message("alice", "s1", MessageRole::Assistant, "我们开会讨论一下工作安排");

        let snapshot = store.get_context_snapshot("alice", "s1");
        assert_eq!(snapshot.current_topic.as_deref(), Some("weather"));
    }

    #[test]
    fn test_topic_switch_requires_two_specific_topics() {
        let store = small_store();
        store.add_message("alice", "s1", MessageRole::User, "今天天气不错");

        assert_eq!(
            store.detect_topic_switch("alice", "s1", "帮我看看怎么去公司的路线"),
            Some(TopicSwitch {
                from: "weather".to_string(),
                to: "navigation".to_string(),
            })
        );
        assert!(store.detect_topic_switch("alice", "s1", "你好").is_none());
        assert!(store.detect_topic_switch("alice", "s1", "谢谢").is_none());
        assert!(store
            .detect_topic_switch("alice", "s1", "明天还会下雨吗")
            .is_none());
    }

    #[test]
    fn test_build_context_messages_layout() {
        let store = small_store();
        for i in 0..10 {
            store.add_message("alice", "s1", MessageRole::User, format!("买点东西 {i}"));
        }

        let messages = store.build_context_messages("alice", "s1", "You are helpful.", "再买一份");
        assert_eq!(messages.first().unwrap().role, MessageRole::System);
        assert!(messages[0].content.contains("You are helpful."));
        assert!(
            messages[0].content.contains("Earlier in this conversation"),
            "digest folded into system prompt"
        );
        assert_eq!(messages.last().unwrap().content, "再买一份");
        assert_eq!(messages.last().unwrap().role, MessageRole::User);
        // system + live window + current message
        assert_eq!(messages.len(), 1 + 6 + 1);
    }

    #[test]
    fn test_session_expiry_and_eviction() {
        let store = WorkingMemoryStore::new(
            WorkingMemoryConfig::default().with_session_ttl(Duration::from_millis(5)),
        );
        store.add_message("alice", "s1", MessageRole::User, "hello there");
        assert_eq!(store.stats().active_sessions, 1);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(store.stats().active_sessions, 0);
        assert_eq!(store.evict_expired(), 1);

        // Lazy recreation on next access
        let session = store.get_or_create_session("alice", "s1");
        assert!(session.messages.is_empty());
    }

    #[test]
    fn test_destroy_and_extend_ttl() {
        let store = small_store();
        store.add_message("alice", "s1", MessageRole::User, "hi");

        assert!(store.extend_ttl("alice", "s1", Duration::from_secs(60)));
        let session = store.get_or_create_session("alice", "s1");
        assert!(session.ttl_ms > 30 * 60 * 1000);

        assert!(store.destroy_session("alice", "s1"));
        assert!(!store.destroy_session("alice", "s1"));
    }

    #[test]
    fn test_stale_intents_are_pruned() {
        let store = WorkingMemoryStore::new(
            WorkingMemoryConfig::default().with_intent_ttl(Duration::from_millis(5)),
        );
        store.add_message("alice", "s1", MessageRole::User, "明天的天气");
        std::thread::sleep(Duration::from_millis(20));
        store.add_message("alice", "s1", MessageRole::User, "帮我买杯咖啡");

        let snapshot = store.get_context_snapshot("alice", "s1");
        assert!(!snapshot.active_intents.iter().any(|i| i.label == "weather"));
        assert!(snapshot.active_intents.iter().any(|i| i.label == "shopping"));
    }
}
