//! Episodic records, retention metadata and the durable-storage seam
//!
//! Long-term memories are owned by an external ingestion pipeline; this
//! module defines the record shapes, the [`MemoryStore`] trait the rest of
//! the crate talks to, and an in-memory reference implementation used in
//! tests and single-process deployments.

use crate::error::{MemoryError, MemoryResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A long-term episodic memory record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicMemoryItem {
    /// Unique identifier
    pub id: String,

    /// Owning user
    pub user_id: String,

    /// When the remembered event happened
    pub date: chrono::DateTime<chrono::Utc>,

    /// Coarse event category (school_run, shopping, work, ...)
    pub event_type: String,

    /// One-line summary of the event
    pub summary: String,

    /// Participant ids involved in the event
    pub participants: Vec<String>,

    /// Where the event happened, if known
    pub location: Option<String>,

    /// Free-form detail text
    pub details: String,

    /// Importance on a 1..=5 scale
    pub importance: u8,
}

impl EpisodicMemoryItem {
    /// Create a new record for a user
    pub fn new(user_id: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            date: chrono::Utc::now(),
            event_type: "general".to_string(),
            summary: summary.into(),
            participants: Vec::new(),
            location: None,
            details: String::new(),
            importance: 3,
        }
    }

    /// Set the event date
    pub fn with_date(mut self, date: chrono::DateTime<chrono::Utc>) -> Self {
        self.date = date;
        self
    }

    /// Set the event type
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    /// Set participants
    pub fn with_participants(mut self, participants: Vec<String>) -> Self {
        self.participants = participants;
        self
    }

    /// Set the location
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set the detail text
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    /// Set importance, clamped to 1..=5
    pub fn with_importance(mut self, importance: u8) -> Self {
        self.importance = importance.clamp(1, 5);
        self
    }
}

/// Partial update applied to an episodic record
#[derive(Debug, Clone, Default)]
pub struct ItemPatch {
    /// New summary, if changed
    pub summary: Option<String>,
    /// New detail text, if changed
    pub details: Option<String>,
    /// New location, if changed
    pub location: Option<String>,
    /// New importance, if changed (clamped to 1..=5)
    pub importance: Option<u8>,
}

/// Retention bookkeeping, one-to-one with an episodic record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMetadata {
    /// Id of the episodic record this row tracks
    pub memory_id: String,

    /// Owning user
    pub user_id: String,

    /// Current survival estimate in [0, 1]
    pub retention_score: f64,

    /// How many times the memory was retrieved
    pub access_count: u32,

    /// Last retrieval time; `None` until first access
    pub last_accessed_at: Option<chrono::DateTime<chrono::Utc>>,

    /// When the metadata row was created
    pub created_at: chrono::DateTime<chrono::Utc>,

    /// Per-memory decay parameter (lambda)
    pub decay_rate: f64,

    /// Whether the memory was merged into a consolidated record
    pub is_consolidated: bool,

    /// Id of the consolidated record that superseded this one
    pub consolidated_into: Option<String>,
}

/// What a forgetting-log entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForgetAction {
    /// The record fell below the retention threshold and was deleted
    Forgotten,
    /// The record was merged into a consolidated replacement
    Consolidated,
}

/// Audit-log entry appended whenever a memory is forgotten or merged
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgetAuditEntry {
    /// Entry id
    pub id: String,

    /// The affected episodic record
    pub memory_id: String,

    /// Owning user
    pub user_id: String,

    /// What happened
    pub action: ForgetAction,

    /// Retention score before the decisive decay pass
    pub retention_score: f64,

    /// Human-readable reason
    pub reason: String,

    /// When the action happened
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ForgetAuditEntry {
    /// Create an audit entry for a memory
    pub fn new(
        memory_id: impl Into<String>,
        user_id: impl Into<String>,
        action: ForgetAction,
        retention_score: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            memory_id: memory_id.into(),
            user_id: user_id.into(),
            action,
            retention_score,
            reason: reason.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// All mutations of one per-user forgetting sweep
///
/// Implementations must apply the whole batch or none of it: a crash
/// mid-sweep may not leave a partially-forgotten state.
#[derive(Debug, Clone, Default)]
pub struct SweepBatch {
    /// Metadata rows whose recomputed retention moved enough to persist
    pub retention_updates: Vec<MemoryMetadata>,

    /// Records to delete, with the audit entry explaining each deletion
    pub forget: Vec<ForgetAuditEntry>,
}

/// All mutations of one consolidation call
///
/// Same all-or-nothing contract as [`SweepBatch`].
#[derive(Debug, Clone)]
pub struct ConsolidationBatch {
    /// The synthetic merged record
    pub merged_item: EpisodicMemoryItem,

    /// Fresh metadata for the merged record
    pub merged_metadata: MemoryMetadata,

    /// Original metadata rows, already marked consolidated; their episodic
    /// records are deleted
    pub originals: Vec<MemoryMetadata>,

    /// One audit entry per merged original
    pub logs: Vec<ForgetAuditEntry>,
}

/// Durable store for episodic records, retention metadata and the audit log
///
/// The concrete engine is an external collaborator; this trait is the
/// subsystem's whole view of it. Plain lookups that miss return
/// `Option`/`bool`, never an error. Callers re-read before mutating and
/// no lock is held across a call; two writers racing on the same row
/// resolve last-writer-wins.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Most recent records for a user, newest first
    async fn recent(&self, user_id: &str, limit: usize) -> MemoryResult<Vec<EpisodicMemoryItem>>;

    /// Fetch a record by id
    async fn get_item(&self, memory_id: &str) -> MemoryResult<Option<EpisodicMemoryItem>>;

    /// Insert a record, returning its id
    async fn add_item(&self, item: EpisodicMemoryItem) -> MemoryResult<String>;

    /// Patch a record; `false` if it does not exist
    async fn update_item(&self, memory_id: &str, patch: ItemPatch) -> MemoryResult<bool>;

    /// Delete a record; `false` if it did not exist
    async fn delete_item(&self, memory_id: &str) -> MemoryResult<bool>;

    /// Every user id known to the store
    async fn user_ids(&self) -> MemoryResult<Vec<String>>;

    /// Fetch the retention metadata for a record
    async fn metadata(&self, memory_id: &str) -> MemoryResult<Option<MemoryMetadata>>;

    /// Insert or replace a metadata row
    async fn put_metadata(&self, metadata: MemoryMetadata) -> MemoryResult<()>;

    /// All metadata rows of a user
    async fn metadata_for_user(&self, user_id: &str) -> MemoryResult<Vec<MemoryMetadata>>;

    /// Remove a metadata row; `false` if it did not exist
    async fn remove_metadata(&self, memory_id: &str) -> MemoryResult<bool>;

    /// Append an audit-log entry
    async fn append_audit(&self, entry: ForgetAuditEntry) -> MemoryResult<()>;

    /// Most recent audit entries for a user, newest first
    async fn recent_audit(&self, user_id: &str, limit: usize)
        -> MemoryResult<Vec<ForgetAuditEntry>>;

    /// Apply a sweep batch atomically: persist retention updates, delete
    /// each forgotten record together with its metadata, append the logs
    async fn commit_sweep(&self, batch: SweepBatch) -> MemoryResult<()>;

    /// Apply a consolidation batch atomically: insert the merged record and
    /// its metadata, mark the originals, delete their records, append logs
    async fn commit_consolidation(&self, batch: ConsolidationBatch) -> MemoryResult<()>;
}

#[derive(Default)]
struct StoreInner {
    items: HashMap<String, EpisodicMemoryItem>,
    metadata: HashMap<String, MemoryMetadata>,
    audit: Vec<ForgetAuditEntry>,
}

/// In-memory [`MemoryStore`] for tests and single-process deployments
///
/// One write lock per batch commit makes the sweep/consolidation contracts
/// trivially atomic.
#[derive(Default)]
pub struct InMemoryMemoryStore {
    inner: parking_lot::RwLock<StoreInner>,
}

impl InMemoryMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn recent(&self, user_id: &str, limit: usize) -> MemoryResult<Vec<EpisodicMemoryItem>> {
        let inner = self.inner.read();
        let mut items: Vec<EpisodicMemoryItem> = inner
            .items
            .values()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.date.cmp(&a.date));
        items.truncate(limit);
        Ok(items)
    }

    async fn get_item(&self, memory_id: &str) -> MemoryResult<Option<EpisodicMemoryItem>> {
        Ok(self.inner.read().items.get(memory_id).cloned())
    }

    async fn add_item(&self, item: EpisodicMemoryItem) -> MemoryResult<String> {
        if item.summary.trim().is_empty() {
            return Err(MemoryError::validation("summary", "must not be empty"));
        }
        let id = item.id.clone();
        self.inner.write().items.insert(id.clone(), item);
        Ok(id)
    }

    async fn update_item(&self, memory_id: &str, patch: ItemPatch) -> MemoryResult<bool> {
        let mut inner = self.inner.write();
        let Some(item) = inner.items.get_mut(memory_id) else {
            return Ok(false);
        };
        if let Some(summary) = patch.summary {
            item.summary = summary;
        }
        if let Some(details) = patch.details {
            item.details = details;
        }
        if let Some(location) = patch.location {
            item.location = Some(location);
        }
        if let Some(importance) = patch.importance {
            item.importance = importance.clamp(1, 5);
        }
        Ok(true)
    }

    async fn delete_item(&self, memory_id: &str) -> MemoryResult<bool> {
        Ok(self.inner.write().items.remove(memory_id).is_some())
    }

    async fn user_ids(&self) -> MemoryResult<Vec<String>> {
        let inner = self.inner.read();
        let mut ids: Vec<String> = inner
            .items
            .values()
            .map(|i| i.user_id.clone())
            .chain(inner.metadata.values().map(|m| m.user_id.clone()))
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn metadata(&self, memory_id: &str) -> MemoryResult<Option<MemoryMetadata>> {
        Ok(self.inner.read().metadata.get(memory_id).cloned())
    }

    async fn put_metadata(&self, metadata: MemoryMetadata) -> MemoryResult<()> {
        self.inner
            .write()
            .metadata
            .insert(metadata.memory_id.clone(), metadata);
        Ok(())
    }

    async fn metadata_for_user(&self, user_id: &str) -> MemoryResult<Vec<MemoryMetadata>> {
        let inner = self.inner.read();
        let mut rows: Vec<MemoryMetadata> = inner
            .metadata
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    async fn remove_metadata(&self, memory_id: &str) -> MemoryResult<bool> {
        Ok(self.inner.write().metadata.remove(memory_id).is_some())
    }

    async fn append_audit(&self, entry: ForgetAuditEntry) -> MemoryResult<()> {
        self.inner.write().audit.push(entry);
        Ok(())
    }

    async fn recent_audit(
        &self,
        user_id: &str,
        limit: usize,
    ) -> MemoryResult<Vec<ForgetAuditEntry>> {
        let inner = self.inner.read();
        let mut entries: Vec<ForgetAuditEntry> = inner
            .audit
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn commit_sweep(&self, batch: SweepBatch) -> MemoryResult<()> {
        let mut inner = self.inner.write();
        for row in batch.retention_updates {
            inner.metadata.insert(row.memory_id.clone(), row);
        }
        for entry in batch.forget {
            inner.items.remove(&entry.memory_id);
            inner.metadata.remove(&entry.memory_id);
            inner.audit.push(entry);
        }
        Ok(())
    }

    async fn commit_consolidation(&self, batch: ConsolidationBatch) -> MemoryResult<()> {
        let mut inner = self.inner.write();
        inner
            .items
            .insert(batch.merged_item.id.clone(), batch.merged_item);
        inner.metadata.insert(
            batch.merged_metadata.memory_id.clone(),
            batch.merged_metadata,
        );
        for row in batch.originals {
            inner.items.remove(&row.memory_id);
            inner.metadata.insert(row.memory_id.clone(), row);
        }
        for entry in batch.logs {
            inner.audit.push(entry);
        }
        Ok(())
    }
}
