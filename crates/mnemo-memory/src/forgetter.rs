//! Retention decay, reinforcement and the forgetting sweep
//!
//! Every episodic record carries a retention score that decays
//! exponentially from its last access; retrieval reinforces it. A sweep
//! recomputes the score for every record of a user and deletes what fell
//! below the forget threshold, committing all of its effects as one
//! atomic batch. Related weak memories can be consolidated into a single
//! merged record instead of being lost outright.

use crate::error::{MemoryError, MemoryResult};
use crate::store::{
    ConsolidationBatch, EpisodicMemoryItem, ForgetAction, ForgetAuditEntry, MemoryMetadata,
    MemoryStore, SweepBatch,
};
use std::sync::Arc;
use std::time::Duration;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Forgetting tuning
#[derive(Debug, Clone)]
pub struct ForgetterConfig {
    /// Records whose decayed retention falls below this are forgotten
    pub forget_threshold: f64,
    /// Retention gained per retrieval, capped at 1.0
    pub reinforcement: f64,
    /// Minimum retention change worth persisting during a sweep
    pub retention_epsilon: f64,
    /// Interval of the background sweeper
    pub sweep_interval: Duration,
}

impl Default for ForgetterConfig {
    fn default() -> Self {
        Self {
            forget_threshold: 0.15,
            reinforcement: 0.15,
            retention_epsilon: 1e-3,
            sweep_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl ForgetterConfig {
    /// Set the forget threshold
    pub fn with_forget_threshold(mut self, threshold: f64) -> Self {
        self.forget_threshold = threshold;
        self
    }

    /// Set the background sweep interval
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

/// Outcome of one per-user sweep
#[derive(Debug, Clone)]
pub struct SweepReport {
    /// The swept user
    pub user_id: String,
    /// Metadata rows examined
    pub scanned: usize,
    /// Ids of records forgotten (or that would be, in a dry run)
    pub forgotten: Vec<String>,
    /// Retention updates persisted (or that would be)
    pub retention_updates: usize,
    /// Whether the sweep was a dry run
    pub dry_run: bool,
}

/// Retention health of one user's memory set
#[derive(Debug, Clone, Default)]
pub struct RetentionStats {
    /// Tracked metadata rows
    pub total: usize,
    /// Rows not yet consolidated away
    pub active: usize,
    /// Rows merged into a consolidated record
    pub consolidated: usize,
    /// Mean decayed retention over active rows
    pub average_retention: f64,
    /// Active rows currently below the forget threshold
    pub at_risk: usize,
}

/// Handle to the background sweeper task
pub struct SweeperHandle {
    task: tokio::task::JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the background sweeper
    pub fn stop(self) {
        self.task.abort();
    }
}

/// Drives decay, reinforcement and forgetting over a [`MemoryStore`]
pub struct Forgetter {
    store: Arc<dyn MemoryStore>,
    config: ForgetterConfig,
}

impl Forgetter {
    /// Create a forgetter over a store
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self {
            store,
            config: ForgetterConfig::default(),
        }
    }

    /// Replace the tuning
    pub fn with_config(mut self, config: ForgetterConfig) -> Self {
        self.config = config;
        self
    }

    /// Current tuning
    pub fn config(&self) -> &ForgetterConfig {
        &self.config
    }

    /// Create and persist retention metadata for a new record
    ///
    /// Important memories start with higher retention and decay slower:
    /// `decay_rate = max(0.01, 0.08 - importance/5 * 0.06)` and
    /// `retention = min(1, 0.5 + importance/5 * 0.5)`.
    pub async fn create_metadata(&self, item: &EpisodicMemoryItem) -> MemoryResult<MemoryMetadata> {
        let importance = item.importance as f64 / 5.0;
        let metadata = MemoryMetadata {
            memory_id: item.id.clone(),
            user_id: item.user_id.clone(),
            retention_score: (0.5 + importance * 0.5).min(1.0),
            access_count: 0,
            last_accessed_at: None,
            created_at: chrono::Utc::now(),
            decay_rate: (0.08 - importance * 0.06).max(0.01),
            is_consolidated: false,
            consolidated_into: None,
        };
        self.store.put_metadata(metadata.clone()).await?;
        Ok(metadata)
    }

    /// Reinforce one record after retrieval; `false` if it is untracked
    pub async fn record_access(&self, memory_id: &str) -> MemoryResult<bool> {
        let Some(mut metadata) = self.store.metadata(memory_id).await? else {
            return Ok(false);
        };
        metadata.retention_score = (metadata.retention_score + self.config.reinforcement).min(1.0);
        metadata.access_count += 1;
        metadata.last_accessed_at = Some(chrono::Utc::now());
        self.store.put_metadata(metadata).await?;
        Ok(true)
    }

    /// Reinforce every retrieved record, returning how many were tracked
    pub async fn record_accesses(&self, memory_ids: &[String]) -> MemoryResult<usize> {
        let mut reinforced = 0;
        for id in memory_ids {
            if self.record_access(id).await? {
                reinforced += 1;
            }
        }
        Ok(reinforced)
    }

    /// Retention of a row as of `now`
    ///
    /// `retention(t) = R0 * exp(-lambda_eff * days)` where
    /// `lambda_eff = decay_rate / (1 + access_count * 0.3)` and days count
    /// from the last access (creation if never accessed). Frequently
    /// accessed memories decay slower.
    pub fn decayed_retention(
        &self,
        metadata: &MemoryMetadata,
        now: chrono::DateTime<chrono::Utc>,
    ) -> f64 {
        let reference = metadata.last_accessed_at.unwrap_or(metadata.created_at);
        let days = ((now - reference).num_milliseconds() as f64 / MS_PER_DAY).max(0.0);
        let lambda = metadata.decay_rate / (1.0 + metadata.access_count as f64 * 0.3);
        metadata.retention_score * (-lambda * days).exp()
    }

    /// Sweep one user: recompute every retention score, forget what fell
    /// below the threshold (configured default when `None`)
    ///
    /// A dry run makes exactly the same decisions but commits nothing.
    /// Consolidated rows are skipped; their records are already gone.
    pub async fn scan_and_forget(
        &self,
        user_id: &str,
        threshold: Option<f64>,
        dry_run: bool,
    ) -> MemoryResult<SweepReport> {
        let threshold = threshold.unwrap_or(self.config.forget_threshold);
        let now = chrono::Utc::now();
        let rows = self.store.metadata_for_user(user_id).await?;

        let mut batch = SweepBatch::default();
        let mut scanned = 0;
        for mut row in rows {
            if row.is_consolidated {
                continue;
            }
            scanned += 1;

            let decayed = self.decayed_retention(&row, now);
            if decayed < threshold {
                batch.forget.push(ForgetAuditEntry::new(
                    row.memory_id.clone(),
                    user_id,
                    ForgetAction::Forgotten,
                    row.retention_score,
                    format!("retention {:.3} below threshold {:.2}", decayed, threshold),
                ));
            } else if (decayed - row.retention_score).abs() > self.config.retention_epsilon {
                row.retention_score = decayed;
                row.last_accessed_at = Some(now);
                batch.retention_updates.push(row);
            }
        }

        let report = SweepReport {
            user_id: user_id.to_string(),
            scanned,
            forgotten: batch.forget.iter().map(|e| e.memory_id.clone()).collect(),
            retention_updates: batch.retention_updates.len(),
            dry_run,
        };

        if !dry_run && (!batch.forget.is_empty() || !batch.retention_updates.is_empty()) {
            self.store.commit_sweep(batch).await?;
        }

        tracing::debug!(
            user_id,
            scanned = report.scanned,
            forgotten = report.forgotten.len(),
            updated = report.retention_updates,
            dry_run,
            "forgetting sweep finished"
        );
        Ok(report)
    }

    /// Sweep every known user; a failing user is logged and skipped
    pub async fn sweep_all(&self) -> MemoryResult<Vec<SweepReport>> {
        let mut reports = Vec::new();
        for user_id in self.store.user_ids().await? {
            match self.scan_and_forget(&user_id, None, false).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "sweep failed for user");
                }
            }
        }
        Ok(reports)
    }

    /// Merge related records into one synthetic memory
    ///
    /// The merged record gets medium importance and fresh metadata; the
    /// originals' records are deleted while their metadata survives,
    /// marked consolidated with a back-reference. The whole merge commits
    /// atomically.
    pub async fn consolidate(
        &self,
        user_id: &str,
        memory_ids: &[String],
        summary: &str,
    ) -> MemoryResult<EpisodicMemoryItem> {
        if memory_ids.len() < 2 {
            return Err(MemoryError::validation(
                "memory_ids",
                "consolidation needs at least two memories",
            ));
        }
        if summary.trim().is_empty() {
            return Err(MemoryError::validation("summary", "must not be empty"));
        }

        let mut originals = Vec::with_capacity(memory_ids.len());
        for id in memory_ids {
            let item = self
                .store
                .get_item(id)
                .await?
                .ok_or_else(|| MemoryError::not_found("memory", id))?;
            if item.user_id != user_id {
                return Err(MemoryError::validation(
                    "memory_ids",
                    format!("memory {} belongs to another user", id),
                ));
            }
            let metadata = self
                .store
                .metadata(id)
                .await?
                .ok_or_else(|| MemoryError::not_found("metadata", id))?;
            originals.push((item, metadata));
        }

        let mut participants: Vec<String> = Vec::new();
        for (item, _) in &originals {
            for p in &item.participants {
                if !participants.contains(p) {
                    participants.push(p.clone());
                }
            }
        }
        let latest_date = originals
            .iter()
            .map(|(item, _)| item.date)
            .max()
            .unwrap_or_else(chrono::Utc::now);
        let details = originals
            .iter()
            .map(|(item, _)| item.summary.as_str())
            .collect::<Vec<_>>()
            .join("; ");

        let merged = EpisodicMemoryItem::new(user_id, summary)
            .with_event_type("consolidated")
            .with_date(latest_date)
            .with_participants(participants)
            .with_details(details)
            .with_importance(3);

        let importance = merged.importance as f64 / 5.0;
        let merged_metadata = MemoryMetadata {
            memory_id: merged.id.clone(),
            user_id: user_id.to_string(),
            retention_score: (0.5 + importance * 0.5).min(1.0),
            access_count: 0,
            last_accessed_at: None,
            created_at: chrono::Utc::now(),
            decay_rate: (0.08 - importance * 0.06).max(0.01),
            is_consolidated: false,
            consolidated_into: None,
        };

        let mut marked = Vec::with_capacity(originals.len());
        let mut logs = Vec::with_capacity(originals.len());
        for (item, mut metadata) in originals {
            logs.push(ForgetAuditEntry::new(
                item.id.clone(),
                user_id,
                ForgetAction::Consolidated,
                metadata.retention_score,
                format!("merged into {}", merged.id),
            ));
            metadata.is_consolidated = true;
            metadata.consolidated_into = Some(merged.id.clone());
            marked.push(metadata);
        }

        let merged_id = merged.id.clone();
        self.store
            .commit_consolidation(ConsolidationBatch {
                merged_item: merged.clone(),
                merged_metadata,
                originals: marked,
                logs,
            })
            .await?;

        tracing::info!(
            user_id,
            merged_id = %merged_id,
            merged_count = memory_ids.len(),
            "consolidated memories"
        );
        Ok(merged)
    }

    /// Retention health of one user's memory set
    pub async fn stats(&self, user_id: &str) -> MemoryResult<RetentionStats> {
        let now = chrono::Utc::now();
        let rows = self.store.metadata_for_user(user_id).await?;

        let mut stats = RetentionStats {
            total: rows.len(),
            ..Default::default()
        };
        let mut retention_sum = 0.0;
        for row in &rows {
            if row.is_consolidated {
                stats.consolidated += 1;
                continue;
            }
            stats.active += 1;
            let decayed = self.decayed_retention(row, now);
            retention_sum += decayed;
            if decayed < self.config.forget_threshold {
                stats.at_risk += 1;
            }
        }
        if stats.active > 0 {
            stats.average_retention = retention_sum / stats.active as f64;
        }
        Ok(stats)
    }

    /// Active rows ranked by current retention, strongest first
    pub async fn retention_ranking(
        &self,
        user_id: &str,
        limit: usize,
    ) -> MemoryResult<Vec<(MemoryMetadata, f64)>> {
        let now = chrono::Utc::now();
        let mut ranked: Vec<(MemoryMetadata, f64)> = self
            .store
            .metadata_for_user(user_id)
            .await?
            .into_iter()
            .filter(|row| !row.is_consolidated)
            .map(|row| {
                let decayed = self.decayed_retention(&row, now);
                (row, decayed)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(limit);
        Ok(ranked)
    }

    /// Most recent forgetting-log entries for a user
    pub async fn recent_logs(
        &self,
        user_id: &str,
        limit: usize,
    ) -> MemoryResult<Vec<ForgetAuditEntry>> {
        self.store.recent_audit(user_id, limit).await
    }

    /// Start a background task sweeping every user on the configured
    /// interval; the first tick fires after one full interval
    pub fn spawn_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let forgetter = Arc::clone(self);
        let interval = forgetter.config.sweep_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match forgetter.sweep_all().await {
                    Ok(reports) => {
                        let forgotten: usize = reports.iter().map(|r| r.forgotten.len()).sum();
                        tracing::info!(
                            users = reports.len(),
                            forgotten,
                            "scheduled forgetting sweep finished"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "scheduled forgetting sweep failed");
                    }
                }
            }
        });
        SweeperHandle { task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryMemoryStore;

    fn forgetter() -> (Arc<InMemoryMemoryStore>, Forgetter) {
        let store = Arc::new(InMemoryMemoryStore::new());
        let forgetter = Forgetter::new(store.clone() as Arc<dyn MemoryStore>);
        (store, forgetter)
    }

    async fn seeded_memory(
        store: &InMemoryMemoryStore,
        forgetter: &Forgetter,
        summary: &str,
        importance: u8,
    ) -> EpisodicMemoryItem {
        let item = EpisodicMemoryItem::new("alice", summary).with_importance(importance);
        store.add_item(item.clone()).await.unwrap();
        forgetter.create_metadata(&item).await.unwrap();
        item
    }

    #[tokio::test]
    async fn test_create_metadata_scales_with_importance() {
        let (store, forgetter) = forgetter();

        let vital = seeded_memory(&store, &forgetter, "wedding day", 5).await;
        let trivial = seeded_memory(&store, &forgetter, "bought milk", 1).await;

        let vital_md = store.metadata(&vital.id).await.unwrap().unwrap();
        assert!((vital_md.retention_score - 1.0).abs() < 1e-9);
        assert!((vital_md.decay_rate - 0.02).abs() < 1e-9);

        let trivial_md = store.metadata(&trivial.id).await.unwrap().unwrap();
        assert!((trivial_md.retention_score - 0.6).abs() < 1e-9);
        assert!((trivial_md.decay_rate - 0.068).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_decay_matches_exponential_curve() {
        let (_, forgetter) = forgetter();
        let now = chrono::Utc::now();

        // 0.9 * exp(-0.05 * 10) = 0.9 * e^-0.5
        let metadata = MemoryMetadata {
            memory_id: "m1".to_string(),
            user_id: "alice".to_string(),
            retention_score: 0.9,
            access_count: 0,
            last_accessed_at: Some(now - chrono::Duration::days(10)),
            created_at: now - chrono::Duration::days(30),
            decay_rate: 0.05,
            is_consolidated: false,
            consolidated_into: None,
        };
        let decayed = forgetter.decayed_retention(&metadata, now);
        assert!((decayed - 0.9 * (-0.5f64).exp()).abs() < 1e-6);

        // Accesses slow the effective decay down.
        let accessed = MemoryMetadata {
            access_count: 5,
            ..metadata
        };
        assert!(forgetter.decayed_retention(&accessed, now) > decayed);
    }

    #[tokio::test]
    async fn test_record_access_reinforces_and_caps() {
        let (store, forgetter) = forgetter();
        let item = seeded_memory(&store, &forgetter, "met an old friend", 2).await;

        assert!(forgetter.record_access(&item.id).await.unwrap());
        let md = store.metadata(&item.id).await.unwrap().unwrap();
        assert!((md.retention_score - 0.85).abs() < 1e-9);
        assert_eq!(md.access_count, 1);
        assert!(md.last_accessed_at.is_some());

        assert!(forgetter.record_access(&item.id).await.unwrap());
        let md = store.metadata(&item.id).await.unwrap().unwrap();
        assert!((md.retention_score - 1.0).abs() < 1e-9, "capped at 1.0");

        assert!(!forgetter.record_access("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_sweep_forgets_below_threshold() {
        let (store, forgetter) = forgetter();

        let doomed = seeded_memory(&store, &forgetter, "forgettable errand", 1).await;
        let mut md = store.metadata(&doomed.id).await.unwrap().unwrap();
        md.retention_score = 0.2;
        md.last_accessed_at = Some(chrono::Utc::now() - chrono::Duration::days(120));
        store.put_metadata(md).await.unwrap();

        let safe = seeded_memory(&store, &forgetter, "daughter's birthday", 5).await;

        let report = forgetter.scan_and_forget("alice", None, false).await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.forgotten, vec![doomed.id.clone()]);

        assert!(store.get_item(&doomed.id).await.unwrap().is_none());
        assert!(store.metadata(&doomed.id).await.unwrap().is_none());
        assert!(store.get_item(&safe.id).await.unwrap().is_some());

        let audit = store.recent_audit("alice", 10).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, ForgetAction::Forgotten);
        assert_eq!(audit[0].memory_id, doomed.id);
    }

    #[tokio::test]
    async fn test_dry_run_decides_without_mutating() {
        let (store, forgetter) = forgetter();

        let doomed = seeded_memory(&store, &forgetter, "forgettable errand", 1).await;
        let mut md = store.metadata(&doomed.id).await.unwrap().unwrap();
        md.retention_score = 0.2;
        md.last_accessed_at = Some(chrono::Utc::now() - chrono::Duration::days(120));
        store.put_metadata(md).await.unwrap();

        let dry = forgetter.scan_and_forget("alice", None, true).await.unwrap();
        assert!(dry.dry_run);
        assert_eq!(dry.forgotten, vec![doomed.id.clone()]);
        assert!(store.get_item(&doomed.id).await.unwrap().is_some());
        assert!(store.recent_audit("alice", 10).await.unwrap().is_empty());

        let wet = forgetter.scan_and_forget("alice", None, false).await.unwrap();
        assert_eq!(wet.forgotten, dry.forgotten);
        assert!(store.get_item(&doomed.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_consolidate_merges_and_marks_originals() {
        let (store, forgetter) = forgetter();

        let a = seeded_memory(&store, &forgetter, "dropped kid at school Monday", 2).await;
        let b = seeded_memory(&store, &forgetter, "dropped kid at school Tuesday", 2).await;

        let merged = forgetter
            .consolidate(
                "alice",
                &[a.id.clone(), b.id.clone()],
                "regular school drop-offs",
            )
            .await
            .unwrap();
        assert_eq!(merged.importance, 3);
        assert_eq!(merged.event_type, "consolidated");
        assert!(merged.details.contains("Monday") && merged.details.contains("Tuesday"));

        assert!(store.get_item(&a.id).await.unwrap().is_none());
        assert!(store.get_item(&merged.id).await.unwrap().is_some());

        let a_md = store.metadata(&a.id).await.unwrap().unwrap();
        assert!(a_md.is_consolidated);
        assert_eq!(a_md.consolidated_into.as_deref(), Some(merged.id.as_str()));

        let audit = store.recent_audit("alice", 10).await.unwrap();
        assert_eq!(audit.len(), 2);
        assert!(audit.iter().all(|e| e.action == ForgetAction::Consolidated));

        // Consolidated rows are invisible to later sweeps.
        let report = forgetter.scan_and_forget("alice", None, true).await.unwrap();
        assert_eq!(report.scanned, 1);
    }

    #[tokio::test]
    async fn test_consolidate_requires_two_memories() {
        let (store, forgetter) = forgetter();
        let only = seeded_memory(&store, &forgetter, "lonely memory", 3).await;

        let err = forgetter
            .consolidate("alice", &[only.id], "merge of one")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MemoryError::Validation { field: "memory_ids", .. }
        ));
    }

    #[tokio::test]
    async fn test_stats_and_ranking() {
        let (store, forgetter) = forgetter();

        let strong = seeded_memory(&store, &forgetter, "wedding day", 5).await;
        let weak = seeded_memory(&store, &forgetter, "bought milk", 1).await;
        let mut md = store.metadata(&weak.id).await.unwrap().unwrap();
        md.retention_score = 0.2;
        md.last_accessed_at = Some(chrono::Utc::now() - chrono::Duration::days(120));
        store.put_metadata(md).await.unwrap();

        let stats = forgetter.stats("alice").await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.at_risk, 1);

        let ranking = forgetter.retention_ranking("alice", 10).await.unwrap();
        assert_eq!(ranking[0].0.memory_id, strong.id);
        assert!(ranking[0].1 > ranking[1].1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper_runs_on_interval() {
        let (store, forgetter) = forgetter();
        let forgetter = Arc::new(forgetter.with_config(
            ForgetterConfig::default().with_sweep_interval(Duration::from_millis(50)),
        ));

        let doomed = seeded_memory(&store, &forgetter, "forgettable errand", 1).await;
        let mut md = store.metadata(&doomed.id).await.unwrap().unwrap();
        md.retention_score = 0.2;
        md.last_accessed_at = Some(chrono::Utc::now() - chrono::Duration::days(120));
        store.put_metadata(md).await.unwrap();

        let handle = forgetter.spawn_sweeper();
        tokio::time::sleep(Duration::from_millis(120)).await;
        tokio::task::yield_now().await;
        handle.stop();

        assert!(store.get_item(&doomed.id).await.unwrap().is_none());
    }
}
