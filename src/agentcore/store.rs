//! Durable run-record projection (spec §4.6, §6 "state store contract").
//!
//! The teacher's closest analogue is `thought_chain`'s append-only,
//! hash-chained `.jsonl` log — but that module is a concrete on-disk
//! format, and the core here must stay storage-agnostic (concrete
//! persistence backends are explicitly out of scope, see spec §1). What
//! survives from `thought_chain` is the posture: a plain serializable
//! record (`RunRecord` takes the place of `Thought`), written through a
//! trait an implementor can back with a file, a database, or nothing at
//! all. `SaveRun` is overwrite-by-id, matching the spec's idempotence
//! requirement (P8), rather than `thought_chain`'s append-only log.

use crate::agentcore::message::{Message, Usage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error as StdError;

/// Status of one [`RunRecord`] (invariant I4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// Durable projection of one run, overwritten by `run_id` at every
/// significant transition (start, progress, completion, failure).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub session_id: String,
    pub provider: String,
    pub status: RunStatus,
    pub input: String,
    pub output: String,
    pub messages: Vec<Message>,
    pub usage: Usage,
    pub metadata: HashMap<String, String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    /// A fresh `status = running` record, written once at the start of a
    /// run. `output` is intentionally empty until completion (I4).
    pub fn starting(
        run_id: impl Into<String>,
        session_id: impl Into<String>,
        provider: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            session_id: session_id.into(),
            provider: provider.into(),
            status: RunStatus::Running,
            input: input.into(),
            output: String::new(),
            messages: Vec::new(),
            usage: Usage::default(),
            metadata: HashMap::new(),
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Update the progress snapshot in place: messages and usage refreshed,
    /// status stays `running`, `completed_at` stays unset (I4).
    pub fn mark_progress(&mut self, messages: &[Message], usage: Usage) {
        self.status = RunStatus::Running;
        self.messages = messages.to_vec();
        self.usage = usage;
        self.updated_at = Utc::now();
    }

    /// Transition to `status = completed` with non-empty output (I4).
    pub fn mark_completed(&mut self, output: impl Into<String>, messages: &[Message], usage: Usage) {
        let now = Utc::now();
        self.status = RunStatus::Completed;
        self.output = output.into();
        self.messages = messages.to_vec();
        self.usage = usage;
        self.error = None;
        self.updated_at = now;
        self.completed_at = Some(now);
    }

    /// Transition to `status = failed` with a non-empty error (I4).
    pub fn mark_failed(&mut self, error: impl Into<String>, messages: &[Message], usage: Usage) {
        let now = Utc::now();
        self.status = RunStatus::Failed;
        self.error = Some(error.into());
        self.messages = messages.to_vec();
        self.usage = usage;
        self.updated_at = now;
        self.completed_at = Some(now);
    }
}

/// Pluggable persistence backend for [`RunRecord`]s (spec §6).
///
/// `save_run` must be idempotent: saving twice with the same `run_id`
/// overwrites the prior snapshot (P8). `load_run`/`list_runs` are part of
/// the contract but are not exercised by the core loop itself — they
/// exist for callers that want to inspect history out-of-band.
#[async_trait]
pub trait Store: Send + Sync {
    async fn save_run(&self, record: &RunRecord) -> Result<(), Box<dyn StdError + Send + Sync>>;

    async fn load_run(
        &self,
        _run_id: &str,
    ) -> Result<Option<RunRecord>, Box<dyn StdError + Send + Sync>> {
        Ok(None)
    }

    async fn list_runs(&self) -> Result<Vec<RunRecord>, Box<dyn StdError + Send + Sync>> {
        Ok(Vec::new())
    }
}

/// The absence of a configured store is not an error (spec §4.6): every
/// write through this store is a no-op.
pub struct NullStore;

#[async_trait]
impl Store for NullStore {
    async fn save_run(&self, _record: &RunRecord) -> Result<(), Box<dyn StdError + Send + Sync>> {
        Ok(())
    }
}

/// Writes a [`RunRecord`] snapshot to a [`Store`] at every significant
/// transition, logging failures at the operational (non-structured)
/// level the way the teacher logs `thought_chain` I/O errors.
pub struct RunRecorder<'a> {
    store: &'a dyn Store,
}

impl<'a> RunRecorder<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Best-effort-sequential write; the caller decides whether a failure
    /// here is fatal (it is, for the failure-persistence contract in §4.1;
    /// it is not for ordinary progress checkpoints per the open question
    /// in spec §9, resolved in DESIGN.md: progress writes are
    /// observational and a failure is logged, not propagated).
    pub async fn save(&self, record: &RunRecord) -> Result<(), String> {
        self.store
            .save_run(record)
            .await
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct InMemoryStore {
        runs: Mutex<HashMap<String, RunRecord>>,
    }

    #[async_trait]
    impl Store for InMemoryStore {
        async fn save_run(&self, record: &RunRecord) -> Result<(), Box<dyn StdError + Send + Sync>> {
            self.runs
                .lock()
                .unwrap()
                .insert(record.run_id.clone(), record.clone());
            Ok(())
        }

        async fn load_run(
            &self,
            run_id: &str,
        ) -> Result<Option<RunRecord>, Box<dyn StdError + Send + Sync>> {
            Ok(self.runs.lock().unwrap().get(run_id).cloned())
        }
    }

    #[tokio::test]
    async fn null_store_writes_are_noops() {
        let store = NullStore;
        let record = RunRecord::starting("r1", "s1", "test", "hello");
        assert!(store.save_run(&record).await.is_ok());
    }

    #[tokio::test]
    async fn save_run_overwrites_by_run_id() {
        let store = InMemoryStore::default();
        let recorder = RunRecorder::new(&store);

        let mut record = RunRecord::starting("r1", "s1", "test", "hello");
        recorder.save(&record).await.unwrap();

        record.mark_completed("done", &[], Usage::default());
        recorder.save(&record).await.unwrap();

        let loaded = store.load_run("r1").await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Completed);
        assert_eq!(loaded.output, "done");
    }

    #[test]
    fn starting_record_has_empty_output_and_running_status() {
        let record = RunRecord::starting("r1", "s1", "test", "hi");
        assert_eq!(record.status, RunStatus::Running);
        assert!(record.output.is_empty());
        assert!(record.completed_at.is_none());
    }

    #[test]
    fn mark_failed_sets_error_and_completed_at() {
        let mut record = RunRecord::starting("r1", "s1", "test", "hi");
        record.mark_failed("boom", &[], Usage::default());
        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("boom"));
        assert!(record.completed_at.is_some());
    }
}
