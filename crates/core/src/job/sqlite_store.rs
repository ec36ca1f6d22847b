//! SQLite-backed job store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;

use super::store::{EnqueueOutcome, JobError, JobFilter, JobStore, RunEnqueue};
use super::types::{
    ClaimRequest, EffectRecord, FailureReason, JobRecord, JobState, NewJob, QueueCounts,
    QueueName,
};

const JOB_COLUMNS: &str = "id, queue, correlation_id, payload, state, attempt, max_attempts, \
     priority, progress, result, failure_reason, lane, owner, run_at, heartbeat_at, created_at, \
     updated_at";

const EFFECT_COLUMNS: &str =
    "effect_key, correlation_id, queue, job_id, receipt, created_at, confirmed_at";

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Create a new SQLite job store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, JobError> {
        let conn = Connection::open(path)?;
        // Readers and the claim transaction share one file; WAL keeps them from blocking.
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite job store (useful for testing).
    pub fn in_memory() -> Result<Self, JobError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), JobError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                queue TEXT NOT NULL,
                correlation_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                state TEXT NOT NULL,
                attempt INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                progress INTEGER NOT NULL DEFAULT 0,
                result TEXT,
                failure_reason TEXT,
                lane TEXT,
                owner TEXT,
                run_at TEXT NOT NULL,
                heartbeat_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs(queue, state, priority, created_at);
            CREATE INDEX IF NOT EXISTS idx_jobs_correlation ON jobs(correlation_id, queue);
            CREATE INDEX IF NOT EXISTS idx_jobs_lane ON jobs(queue, lane, state);
            CREATE INDEX IF NOT EXISTS idx_jobs_updated_at ON jobs(updated_at);

            CREATE TABLE IF NOT EXISTS effects (
                effect_key TEXT PRIMARY KEY,
                correlation_id TEXT NOT NULL,
                queue TEXT NOT NULL,
                job_id TEXT NOT NULL,
                receipt TEXT,
                created_at TEXT NOT NULL,
                confirmed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_effects_correlation ON effects(correlation_id);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, JobError> {
        self.conn
            .lock()
            .map_err(|_| JobError::Database("connection mutex poisoned".to_string()))
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<JobRecord> {
        let queue: String = row.get(1)?;
        let payload: String = row.get(3)?;
        let state: String = row.get(4)?;
        let result: Option<String> = row.get(9)?;
        let failure_reason: Option<String> = row.get(10)?;
        let run_at: String = row.get(13)?;
        let heartbeat_at: Option<String> = row.get(14)?;
        let created_at: String = row.get(15)?;
        let updated_at: String = row.get(16)?;

        Ok(JobRecord {
            id: row.get(0)?,
            queue: queue.parse().map_err(|e: String| conversion_error(1, e))?,
            correlation_id: row.get(2)?,
            payload: parse_json(3, &payload)?,
            state: state.parse().map_err(|e: String| conversion_error(4, e))?,
            attempt: row.get(5)?,
            max_attempts: row.get(6)?,
            priority: row.get(7)?,
            progress: row.get(8)?,
            result: result.map(|r| parse_json(9, &r)).transpose()?,
            failure_reason: failure_reason
                .map(|r| {
                    serde_json::from_str::<FailureReason>(&r)
                        .map_err(|e| conversion_error(10, e.to_string()))
                })
                .transpose()?,
            lane: row.get(11)?,
            owner: row.get(12)?,
            run_at: parse_ts(13, &run_at)?,
            heartbeat_at: heartbeat_at.map(|t| parse_ts(14, &t)).transpose()?,
            created_at: parse_ts(15, &created_at)?,
            updated_at: parse_ts(16, &updated_at)?,
        })
    }

    fn row_to_effect(row: &rusqlite::Row) -> rusqlite::Result<EffectRecord> {
        let queue: String = row.get(2)?;
        let receipt: Option<String> = row.get(4)?;
        let created_at: String = row.get(5)?;
        let confirmed_at: Option<String> = row.get(6)?;

        Ok(EffectRecord {
            effect_key: row.get(0)?,
            correlation_id: row.get(1)?,
            queue: queue.parse().map_err(|e: String| conversion_error(2, e))?,
            job_id: row.get(3)?,
            receipt: receipt.map(|r| parse_json(4, &r)).transpose()?,
            created_at: parse_ts(5, &created_at)?,
            confirmed_at: confirmed_at.map(|t| parse_ts(6, &t)).transpose()?,
        })
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Option<JobRecord>, JobError> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
        Ok(conn
            .query_row(&sql, params![id], Self::row_to_job)
            .optional()?)
    }

    fn fetch_effect(conn: &Connection, effect_key: &str) -> Result<Option<EffectRecord>, JobError> {
        let sql = format!("SELECT {} FROM effects WHERE effect_key = ?1", EFFECT_COLUMNS);
        Ok(conn
            .query_row(&sql, params![effect_key], Self::row_to_effect)
            .optional()?)
    }

    fn query_jobs(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<JobRecord>, JobError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, Self::row_to_job)?;

        let mut jobs = Vec::new();
        for row_result in rows {
            jobs.push(row_result?);
        }
        Ok(jobs)
    }

    /// Fetch a job after a lease-conditioned update touched no rows.
    fn lease_error(conn: &Connection, id: &str) -> JobError {
        match Self::fetch(conn, id) {
            Ok(Some(_)) => JobError::LeaseLost(id.to_string()),
            Ok(None) => JobError::NotFound(id.to_string()),
            Err(e) => e,
        }
    }

    fn insert(conn: &Connection, job: NewJob, now: DateTime<Utc>) -> Result<JobRecord, JobError> {
        let id = uuid::Uuid::new_v4().to_string();
        let run_at = match job.options.delay {
            Some(delay) => now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero()),
            None => now,
        };
        let payload_json = serde_json::to_string(&job.payload)?;

        conn.execute(
            "INSERT INTO jobs (id, queue, correlation_id, payload, state, attempt, max_attempts, priority, progress, lane, run_at, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, 0, ?8, ?9, ?10, ?10)",
            params![
                id,
                job.queue.as_str(),
                job.correlation_id,
                payload_json,
                JobState::Waiting.as_str(),
                job.options.max_attempts,
                job.options.priority,
                job.options.lane,
                fmt_ts(run_at),
                fmt_ts(now),
            ],
        )?;

        Ok(JobRecord {
            id,
            queue: job.queue,
            correlation_id: job.correlation_id,
            payload: job.payload,
            state: JobState::Waiting,
            attempt: 0,
            max_attempts: job.options.max_attempts,
            priority: job.options.priority,
            progress: 0,
            result: None,
            failure_reason: None,
            lane: job.options.lane,
            owner: None,
            run_at,
            heartbeat_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn build_where_clause(filter: &JobFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(queue) = filter.queue {
            conditions.push("queue = ?");
            params.push(Box::new(queue.as_str()));
        }

        if let Some(state) = filter.state {
            conditions.push("state = ?");
            params.push(Box::new(state.as_str()));
        }

        if let Some(ref correlation_id) = filter.correlation_id {
            conditions.push("correlation_id = ?");
            params.push(Box::new(correlation_id.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }
}

impl JobStore for SqliteJobStore {
    fn enqueue(&self, job: NewJob) -> Result<JobRecord, JobError> {
        let conn = self.conn()?;
        Self::insert(&conn, job, now())
    }

    fn enqueue_unique(&self, job: NewJob) -> Result<EnqueueOutcome, JobError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Jobs of an earlier, failed attempt of the run never block the current one
        let sql = format!(
            "SELECT {} FROM jobs WHERE correlation_id = ?1 AND queue = ?2 AND state NOT IN ('failed', 'cancelled') AND created_at >= {} ORDER BY created_at ASC LIMIT 1",
            JOB_COLUMNS,
            attempt_start("?1")
        );
        let existing = tx
            .query_row(
                &sql,
                params![job.correlation_id, job.queue.as_str()],
                Self::row_to_job,
            )
            .optional()?;

        if let Some(existing) = existing {
            return Ok(EnqueueOutcome::Existing(existing));
        }

        let created = Self::insert(&tx, job, now())?;
        tx.commit()?;
        Ok(EnqueueOutcome::Created(created))
    }

    fn enqueue_run(
        &self,
        job: NewJob,
        admit: &dyn Fn(&[JobRecord]) -> bool,
    ) -> Result<RunEnqueue, JobError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let sql = format!(
            "SELECT {} FROM jobs WHERE correlation_id = ?1 ORDER BY created_at ASC, rowid ASC",
            JOB_COLUMNS
        );
        let jobs = Self::query_jobs(&tx, &sql, &[&job.correlation_id])?;
        if !admit(&jobs) {
            return Ok(RunEnqueue::Declined(jobs));
        }

        // Strictly after every existing job, so the new attempt sorts last
        let created_at = jobs
            .iter()
            .map(|j| j.created_at + chrono::Duration::microseconds(1))
            .fold(now(), |a, b| a.max(b));
        let created = Self::insert(&tx, job, created_at)?;
        tx.commit()?;
        Ok(RunEnqueue::Created(created))
    }

    fn claim(&self, request: &ClaimRequest) -> Result<Option<JobRecord>, JobError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now();
        let now_str = fmt_ts(now);

        let active: i64 = tx.query_row(
            "SELECT COUNT(*) FROM jobs WHERE queue = ?1 AND state = 'active'",
            params![request.queue.as_str()],
            |row| row.get(0),
        )?;
        if active as usize >= request.max_active {
            return Ok(None);
        }

        let sql = format!(
            r#"SELECT {} FROM jobs j
            WHERE j.queue = ?1
              AND j.state IN ('waiting', 'delayed_retry')
              AND j.run_at <= ?2
              AND j.attempt < j.max_attempts
              AND NOT EXISTS (
                  SELECT 1 FROM jobs a
                  WHERE a.queue = j.queue AND a.correlation_id = j.correlation_id AND a.state = 'active'
              )
              AND (?3 = 0 OR j.lane IS NULL OR NOT EXISTS (
                  SELECT 1 FROM jobs b
                  WHERE b.queue = j.queue AND b.lane = j.lane AND b.state = 'active'
              ))
            ORDER BY j.priority ASC, j.created_at ASC, j.rowid ASC
            LIMIT 1"#,
            JOB_COLUMNS
        );

        let candidate = tx
            .query_row(
                &sql,
                params![request.queue.as_str(), now_str, request.serialize_lanes],
                Self::row_to_job,
            )
            .optional()?;

        let Some(mut job) = candidate else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE jobs SET state = 'active', attempt = attempt + 1, owner = ?1, heartbeat_at = ?2, updated_at = ?2 WHERE id = ?3",
            params![request.owner, now_str, job.id],
        )?;
        tx.commit()?;

        job.state = JobState::Active;
        job.attempt += 1;
        job.owner = Some(request.owner.clone());
        job.heartbeat_at = Some(now);
        job.updated_at = now;
        Ok(Some(job))
    }

    fn complete(&self, id: &str, owner: &str, result: Value) -> Result<JobRecord, JobError> {
        let conn = self.conn()?;
        let result_json = serde_json::to_string(&result)?;

        let changed = conn.execute(
            "UPDATE jobs SET state = 'completed', result = ?1, progress = 100, failure_reason = NULL, owner = NULL, updated_at = ?2 WHERE id = ?3 AND state = 'active' AND owner = ?4",
            params![result_json, fmt_ts(now()), id, owner],
        )?;

        if changed == 0 {
            return Err(Self::lease_error(&conn, id));
        }

        Self::fetch(&conn, id)?.ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    fn fail(
        &self,
        id: &str,
        owner: &str,
        reason: FailureReason,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<JobRecord, JobError> {
        let conn = self.conn()?;
        let reason_json = serde_json::to_string(&reason)?;
        let now_str = fmt_ts(now());

        // A retry is only honoured while attempts remain.
        let changed = match retry_at {
            Some(retry_at) => conn.execute(
                "UPDATE jobs SET state = CASE WHEN attempt < max_attempts THEN 'delayed_retry' ELSE 'failed' END, run_at = ?1, failure_reason = ?2, owner = NULL, heartbeat_at = NULL, updated_at = ?3 WHERE id = ?4 AND state = 'active' AND owner = ?5",
                params![fmt_ts(retry_at), reason_json, now_str, id, owner],
            )?,
            None => conn.execute(
                "UPDATE jobs SET state = 'failed', failure_reason = ?1, owner = NULL, heartbeat_at = NULL, updated_at = ?2 WHERE id = ?3 AND state = 'active' AND owner = ?4",
                params![reason_json, now_str, id, owner],
            )?,
        };

        if changed == 0 {
            return Err(Self::lease_error(&conn, id));
        }

        Self::fetch(&conn, id)?.ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    fn heartbeat(&self, id: &str, owner: &str) -> Result<bool, JobError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE jobs SET heartbeat_at = ?1 WHERE id = ?2 AND state = 'active' AND owner = ?3",
            params![fmt_ts(now()), id, owner],
        )?;
        Ok(changed > 0)
    }

    fn report_progress(&self, id: &str, owner: &str, percent: u8) -> Result<bool, JobError> {
        let conn = self.conn()?;
        let now_str = fmt_ts(now());
        let changed = conn.execute(
            "UPDATE jobs SET progress = ?1, heartbeat_at = ?2, updated_at = ?2 WHERE id = ?3 AND state = 'active' AND owner = ?4 AND progress < ?1",
            params![percent.min(100), now_str, id, owner],
        )?;

        if changed == 0 {
            // Still counts as a liveness signal when the value did not move.
            conn.execute(
                "UPDATE jobs SET heartbeat_at = ?1 WHERE id = ?2 AND state = 'active' AND owner = ?3",
                params![now_str, id, owner],
            )?;
        }

        Ok(changed > 0)
    }

    fn cancel(&self, id: &str) -> Result<JobRecord, JobError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE jobs SET state = 'cancelled', owner = NULL, updated_at = ?1 WHERE id = ?2 AND state IN ('waiting', 'delayed_retry')",
            params![fmt_ts(now()), id],
        )?;

        let job = Self::fetch(&conn, id)?.ok_or_else(|| JobError::NotFound(id.to_string()))?;
        if changed == 0 {
            return Err(JobError::InvalidState {
                job_id: id.to_string(),
                current_state: job.state,
                operation: "cancel".to_string(),
            });
        }
        Ok(job)
    }

    fn cancel_correlation(&self, correlation_id: &str) -> Result<Vec<JobRecord>, JobError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let sql = format!(
            "SELECT {} FROM jobs WHERE correlation_id = ?1 AND state IN ('waiting', 'delayed_retry') ORDER BY created_at ASC",
            JOB_COLUMNS
        );
        let mut jobs = Self::query_jobs(&tx, &sql, &[&correlation_id])?;

        let now = now();
        tx.execute(
            "UPDATE jobs SET state = 'cancelled', owner = NULL, updated_at = ?1 WHERE correlation_id = ?2 AND state IN ('waiting', 'delayed_retry')",
            params![fmt_ts(now), correlation_id],
        )?;
        tx.commit()?;

        for job in &mut jobs {
            job.state = JobState::Cancelled;
            job.updated_at = now;
        }
        Ok(jobs)
    }

    fn get(&self, id: &str) -> Result<Option<JobRecord>, JobError> {
        let conn = self.conn()?;
        Self::fetch(&conn, id)
    }

    fn list_by_correlation(&self, correlation_id: &str) -> Result<Vec<JobRecord>, JobError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM jobs WHERE correlation_id = ?1 ORDER BY created_at ASC, rowid ASC",
            JOB_COLUMNS
        );
        Self::query_jobs(&conn, &sql, &[&correlation_id])
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, JobError> {
        let conn = self.conn()?;
        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT {} FROM jobs {} ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
            JOB_COLUMNS, where_clause
        );

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();
        Self::query_jobs(&conn, &sql, param_refs.as_slice())
    }

    fn counts(&self, queue: QueueName) -> Result<QueueCounts, JobError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT state, COUNT(*) FROM jobs WHERE queue = ?1 GROUP BY state")?;
        let rows = stmt.query_map(params![queue.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = QueueCounts::default();
        for row_result in rows {
            let (state, count) = row_result?;
            let state: JobState = state.parse().map_err(JobError::Database)?;
            counts.add(state, count as u64);
        }
        Ok(counts)
    }

    fn abandoned(
        &self,
        queue: QueueName,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<JobRecord>, JobError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM jobs WHERE queue = ?1 AND state = 'active' AND (heartbeat_at IS NULL OR heartbeat_at < ?2) ORDER BY heartbeat_at ASC",
            JOB_COLUMNS
        );
        Self::query_jobs(&conn, &sql, &[&queue.as_str(), &fmt_ts(stale_before)])
    }

    fn take_over(
        &self,
        id: &str,
        stale_owner: &str,
        new_owner: &str,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, JobError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE jobs SET owner = ?1, heartbeat_at = ?2 WHERE id = ?3 AND state = 'active' AND owner = ?4 AND (heartbeat_at IS NULL OR heartbeat_at < ?5)",
            params![new_owner, fmt_ts(now()), id, stale_owner, fmt_ts(stale_before)],
        )?;

        if changed == 0 {
            return Ok(None);
        }
        Self::fetch(&conn, id)
    }

    fn release(
        &self,
        id: &str,
        owner: &str,
        reason: FailureReason,
    ) -> Result<JobRecord, JobError> {
        let conn = self.conn()?;
        let reason_json = serde_json::to_string(&reason)?;
        let now_str = fmt_ts(now());

        let changed = conn.execute(
            "UPDATE jobs SET state = CASE WHEN attempt < max_attempts THEN 'waiting' ELSE 'failed' END, failure_reason = ?1, owner = NULL, heartbeat_at = NULL, run_at = ?2, updated_at = ?2 WHERE id = ?3 AND state = 'active' AND owner = ?4",
            params![reason_json, now_str, id, owner],
        )?;

        if changed == 0 {
            return Err(Self::lease_error(&conn, id));
        }

        Self::fetch(&conn, id)?.ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    fn unchained(&self, queue: QueueName, limit: i64) -> Result<Vec<JobRecord>, JobError> {
        let Some(next) = queue.next() else {
            return Ok(Vec::new());
        };

        let conn = self.conn()?;
        let sql = format!(
            r#"SELECT {} FROM jobs j
            WHERE j.queue = ?1 AND j.state = 'completed'
              AND j.created_at >= {start}
              AND NOT EXISTS (
                  SELECT 1 FROM jobs n
                  WHERE n.correlation_id = j.correlation_id AND n.queue = ?2 AND n.created_at >= {start}
              )
              AND NOT EXISTS (
                  SELECT 1 FROM jobs c WHERE c.correlation_id = j.correlation_id AND c.state = 'cancelled'
              )
            ORDER BY j.updated_at ASC
            LIMIT ?3"#,
            JOB_COLUMNS,
            start = attempt_start("j.correlation_id")
        );
        Self::query_jobs(&conn, &sql, &[&queue.as_str(), &next.as_str(), &limit])
    }

    fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<usize, JobError> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM jobs WHERE state IN ('completed', 'failed', 'cancelled') AND updated_at < ?1",
            params![fmt_ts(cutoff)],
        )?;
        Ok(deleted)
    }

    fn record_intent(
        &self,
        effect_key: &str,
        correlation_id: &str,
        queue: QueueName,
        job_id: &str,
    ) -> Result<EffectRecord, JobError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO effects (effect_key, correlation_id, queue, job_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![effect_key, correlation_id, queue.as_str(), job_id, fmt_ts(now())],
        )?;

        Self::fetch_effect(&conn, effect_key)?
            .ok_or_else(|| JobError::EffectNotFound(effect_key.to_string()))
    }

    fn confirm_effect(&self, effect_key: &str, receipt: Value) -> Result<EffectRecord, JobError> {
        let conn = self.conn()?;
        let receipt_json = serde_json::to_string(&receipt)?;
        let changed = conn.execute(
            "UPDATE effects SET receipt = ?1, confirmed_at = ?2 WHERE effect_key = ?3",
            params![receipt_json, fmt_ts(now()), effect_key],
        )?;

        if changed == 0 {
            return Err(JobError::EffectNotFound(effect_key.to_string()));
        }

        Self::fetch_effect(&conn, effect_key)?
            .ok_or_else(|| JobError::EffectNotFound(effect_key.to_string()))
    }

    fn get_effect(&self, effect_key: &str) -> Result<Option<EffectRecord>, JobError> {
        let conn = self.conn()?;
        Self::fetch_effect(&conn, effect_key)
    }
}

/// Current time at the precision stored in the database.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 so stored timestamps compare lexicographically.
/// SQL for the creation time of a run's latest transcode job, which opens
/// its current attempt. Empty string (sorts first) when there is none.
fn attempt_start(correlation_id: &str) -> String {
    format!(
        "COALESCE((SELECT MAX(s.created_at) FROM jobs s WHERE s.correlation_id = {} AND s.queue = 'transcode'), '')",
        correlation_id
    )
}

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e.to_string()))
}

fn parse_json(idx: usize, value: &str) -> rusqlite::Result<Value> {
    serde_json::from_str(value).map_err(|e| conversion_error(idx, e.to_string()))
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, message.into())
}
