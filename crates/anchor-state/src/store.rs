//! StateStore — redb-backed persistence for Anchor.
//!
//! Provides typed CRUD over workloads, nodes and scheduling jobs, plus the
//! atomic read-modify-write operations the scheduler commits with. All
//! values are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(|source| StateError::Decode { key: key.to_string(), source })
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(WORKLOADS).map_err(map_err!(Table))?;
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.open_table(JOBS).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic JSON helpers ───────────────────────────────────────

    fn put_json<T: Serialize>(&self, def: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(StateError::Encode)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                Ok(Some(decode(key, guard.value())?))
            }
            None => Ok(None),
        }
    }

    fn list_json<T: DeserializeOwned>(&self, def: JsonTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(key.value(), value.value())?);
        }
        Ok(results)
    }

    fn delete_key(&self, def: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Load, mutate and store one value inside a single write transaction.
    ///
    /// Returns `None` (and writes nothing) when the key does not exist.
    fn update_json<T, R>(
        &self,
        def: JsonTable,
        key: &str,
        f: impl FnOnce(&mut T) -> R,
    ) -> StateResult<Option<(T, R)>>
    where
        T: Serialize + DeserializeOwned,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            let current = table
                .get(key)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            outcome = match current {
                Some(bytes) => {
                    let mut value: T = decode(key, &bytes)?;
                    let result = f(&mut value);
                    let bytes = serde_json::to_vec(&value).map_err(StateError::Encode)?;
                    table
                        .insert(key, bytes.as_slice())
                        .map_err(map_err!(Write))?;
                    Some((value, result))
                }
                None => None,
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(outcome)
    }

    // ── Workloads ──────────────────────────────────────────────────

    /// Insert or update a workload record.
    pub fn put_workload(&self, record: &WorkloadRecord) -> StateResult<()> {
        self.put_json(WORKLOADS, &record.id, record)?;
        debug!(workload_id = %record.id, status = ?record.status, "workload stored");
        Ok(())
    }

    /// Get a workload record by ID.
    pub fn get_workload(&self, id: &str) -> StateResult<Option<WorkloadRecord>> {
        self.get_json(WORKLOADS, id)
    }

    /// List all workload records, newest first.
    pub fn list_workloads(&self) -> StateResult<Vec<WorkloadRecord>> {
        let mut records: Vec<WorkloadRecord> = self.list_json(WORKLOADS)?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Apply `f` to a workload record atomically and return the updated record.
    ///
    /// Returns `None` if no record with this ID exists.
    pub fn update_workload(
        &self,
        id: &str,
        f: impl FnOnce(&mut WorkloadRecord),
    ) -> StateResult<Option<WorkloadRecord>> {
        Ok(self.update_json(WORKLOADS, id, f)?.map(|(record, ())| record))
    }

    /// Delete a workload record. Returns true if it existed.
    pub fn delete_workload(&self, id: &str) -> StateResult<bool> {
        let existed = self.delete_key(WORKLOADS, id)?;
        debug!(workload_id = %id, existed, "workload deleted");
        Ok(existed)
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Insert or update a node record.
    pub fn put_node(&self, node: &NodeRecord) -> StateResult<()> {
        self.put_json(NODES, &node.id, node)
    }

    /// Get a node record by ID.
    pub fn get_node(&self, node_id: &str) -> StateResult<Option<NodeRecord>> {
        self.get_json(NODES, node_id)
    }

    /// List all node records.
    pub fn list_nodes(&self) -> StateResult<Vec<NodeRecord>> {
        self.list_json(NODES)
    }

    /// List node records whose status is not `Offline`.
    pub fn list_active_nodes(&self) -> StateResult<Vec<NodeRecord>> {
        let mut nodes = self.list_nodes()?;
        nodes.retain(|n| n.status != NodeStatus::Offline);
        Ok(nodes)
    }

    /// Record a binding on a node: increment its pod count and stamp
    /// `last_scheduled_at`. Returns false if the node record is missing.
    pub fn record_node_binding(&self, node_id: &str, at: u64) -> StateResult<bool> {
        let updated = self.update_json(NODES, node_id, |node: &mut NodeRecord| {
            node.pod_count = node.pod_count.saturating_add(1);
            node.last_scheduled_at = Some(at);
        })?;
        Ok(updated.is_some())
    }

    // ── Jobs ───────────────────────────────────────────────────────

    /// Persist a new job, stamping it with the next enqueue sequence number.
    pub fn insert_job(&self, mut job: SchedulingJob) -> StateResult<SchedulingJob> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
            let last = meta
                .get(JOB_SEQ_KEY)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0);
            job.seq = last + 1;
            meta.insert(JOB_SEQ_KEY, job.seq).map_err(map_err!(Write))?;

            let bytes = serde_json::to_vec(&job).map_err(StateError::Encode)?;
            let mut jobs = txn.open_table(JOBS).map_err(map_err!(Table))?;
            jobs.insert(job.id.as_str(), bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(job_id = %job.id, seq = job.seq, "job stored");
        Ok(job)
    }

    /// Get a job by ID.
    pub fn get_job(&self, job_id: &str) -> StateResult<Option<SchedulingJob>> {
        self.get_json(JOBS, job_id)
    }

    /// List all jobs in enqueue order.
    pub fn list_jobs(&self) -> StateResult<Vec<SchedulingJob>> {
        let mut jobs: Vec<SchedulingJob> = self.list_json(JOBS)?;
        jobs.sort_by_key(|j| j.seq);
        Ok(jobs)
    }

    /// Apply `f` to a job atomically, returning the updated job and `f`'s result.
    pub fn update_job<R>(
        &self,
        job_id: &str,
        f: impl FnOnce(&mut SchedulingJob) -> R,
    ) -> StateResult<Option<(SchedulingJob, R)>> {
        self.update_json(JOBS, job_id, f)
    }

    /// Delete a job. Returns true if it existed.
    pub fn delete_job(&self, job_id: &str) -> StateResult<bool> {
        self.delete_key(JOBS, job_id)
    }

    /// Atomically claim the most urgent runnable job.
    ///
    /// Runnable means `Waiting` with `run_at_ms <= now_ms`, or `Active` with an
    /// expired lease. Lower priority numbers win, then lower sequence
    /// numbers. The claimed job becomes `Active` under a lease with `token`
    /// that expires `lease_ms` from now, and its attempt counter is bumped.
    /// Expired leases on jobs with no attempts left are abandoned instead.
    pub fn claim_next_job(
        &self,
        now_ms: u64,
        lease_ms: u64,
        token: &str,
    ) -> StateResult<Option<SchedulingJob>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let claimed;
        {
            let mut table = txn.open_table(JOBS).map_err(map_err!(Table))?;

            let mut runnable: Vec<SchedulingJob> = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let job: SchedulingJob = decode(key.value(), value.value())?;
                if job.is_runnable(now_ms) {
                    runnable.push(job);
                }
            }

            let mut best: Option<SchedulingJob> = None;
            for mut job in runnable {
                if job.state == JobState::Active && job.attempts_made >= job.max_attempts {
                    job.state = JobState::Abandoned;
                    job.lease = None;
                    job.last_error
                        .get_or_insert_with(|| "lease expired on final attempt".to_string());
                    job.updated_at_ms = now_ms;
                    let bytes = serde_json::to_vec(&job).map_err(StateError::Encode)?;
                    table
                        .insert(job.id.as_str(), bytes.as_slice())
                        .map_err(map_err!(Write))?;
                    debug!(job_id = %job.id, "stalled job abandoned");
                    continue;
                }
                let better = best
                    .as_ref()
                    .is_none_or(|b| (job.priority, job.seq) < (b.priority, b.seq));
                if better {
                    best = Some(job);
                }
            }

            claimed = match best {
                Some(mut job) => {
                    job.state = JobState::Active;
                    job.attempts_made += 1;
                    job.lease = Some(Lease {
                        token: token.to_string(),
                        expires_at_ms: now_ms.saturating_add(lease_ms),
                    });
                    job.updated_at_ms = now_ms;
                    let bytes = serde_json::to_vec(&job).map_err(StateError::Encode)?;
                    table
                        .insert(job.id.as_str(), bytes.as_slice())
                        .map_err(map_err!(Write))?;
                    Some(job)
                }
                None => None,
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(claimed)
    }
}
