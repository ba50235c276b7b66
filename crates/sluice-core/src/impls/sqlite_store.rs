//! SqliteStore - リレーショナル DB 上の Task Store / Document Store
//!
//! # アトミック性
//! - claim: `UPDATE … WHERE id = (SELECT … ORDER BY created_at, id LIMIT 1)
//!   AND status = 'pending' RETURNING *` の 1 文
//! - complete / fail: 所有者と状態を条件にした UPDATE。0 行なら読み直して
//!   NotFound / AlreadyTerminal / ClaimMismatch を判定する
//! - reap: 1 文の UPDATE
//!
//! タイムスタンプは epoch ミリ秒（INTEGER）、ID は ULID 文字列（TEXT）で保存します。
//! ULID 文字列の辞書順は生成順と一致するので、`ORDER BY created_at, id` が
//! インメモリ実装と同じ順序になります。

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::domain::{
    Document, DocumentId, Enqueued, Stage, StoreError, Task, TaskCounts, TaskFailure, TaskId,
    TaskPayload, TaskResult, TaskStatus, WorkerIdentity,
};
use crate::domain::task::duration_ms;
use crate::ports::{Clock, DocumentStore, IdGenerator, SystemClock, TaskStore, UlidGenerator};

use super::{reap_cutoff, retry_key};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS tasks (
        id            TEXT PRIMARY KEY,
        stage         TEXT NOT NULL,
        document_id   TEXT NOT NULL,
        params        TEXT,
        status        TEXT NOT NULL,
        owner         TEXT,
        claimed_at    INTEGER,
        attempt       INTEGER NOT NULL,
        claims        INTEGER NOT NULL DEFAULT 0,
        result        TEXT,
        error         TEXT,
        processing_ms INTEGER,
        dedup_key     TEXT UNIQUE,
        retry_of      TEXT,
        created_at    INTEGER NOT NULL,
        updated_at    INTEGER NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS tasks_claim_idx ON tasks (stage, status, created_at, id)",
    "CREATE INDEX IF NOT EXISTS tasks_claimed_at_idx ON tasks (status, claimed_at)",
    r#"CREATE TABLE IF NOT EXISTS documents (
        id             TEXT PRIMARY KEY,
        raw_ref        TEXT NOT NULL UNIQUE,
        extracted_text TEXT,
        classification TEXT,
        created_at     INTEGER NOT NULL
    )"#,
];

const INSERT_TASK: &str = r#"INSERT INTO tasks
    (id, stage, document_id, params, status, owner, claimed_at, attempt, claims,
     result, error, processing_ms, dedup_key, retry_of, created_at, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?5, NULL, NULL, ?6, 0, NULL, NULL, NULL, ?7, ?8, ?9, ?9)
    ON CONFLICT(dedup_key) DO NOTHING"#;

pub struct SqliteStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl SqliteStore {
    /// Connect and create the schema if needed.
    ///
    /// `sqlite::memory:` gets a single pinned connection, otherwise every
    /// pooled connection would see its own empty database.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(map_sqlx)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory {
            1
        } else {
            max_connections.max(1)
        });
        if in_memory {
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(map_sqlx)?;

        let store = Self::from_pool(pool, Arc::new(SystemClock));
        store.migrate().await?;
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        let ids = Arc::new(UlidGenerator::new(clock.clone()));
        Self { pool, clock, ids }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ids = Arc::new(UlidGenerator::new(clock.clone()));
        self.clock = clock;
        self
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx)?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn insert(&self, task: &Task) -> Result<bool, StoreError> {
        let params = encode_params(&task.payload.params)?;
        let result = sqlx::query(INSERT_TASK)
            .bind(task.id.to_key())
            .bind(task.stage.as_str())
            .bind(task.payload.document_id.to_key())
            .bind(params)
            .bind(task.status.as_str())
            .bind(i64::from(task.attempt))
            .bind(task.dedup_key.as_deref())
            .bind(task.retry_of.map(|id| id.to_key()))
            .bind(task.created_at.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn task_by_dedup_key(&self, key: &str) -> Result<Option<TaskId>, StoreError> {
        let row = sqlx::query("SELECT id FROM tasks WHERE dedup_key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.map(|r| parse_id::<TaskId>(&r, "id")).transpose()
    }

    /// Explain why a conditional update touched no row.
    async fn diagnose(&self, task_id: TaskId, worker: &WorkerIdentity) -> StoreError {
        match self.get(task_id).await {
            Ok(None) => StoreError::NotFound(task_id),
            Ok(Some(task)) => match task.verify_claim(worker) {
                Err(e) => e,
                Ok(()) => StoreError::Backend(format!(
                    "conditional update on {task_id} matched no row"
                )),
            },
            Err(e) => e,
        }
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn enqueue(&self, stage: &Stage, payload: TaskPayload) -> Result<TaskId, StoreError> {
        let task = Task::new(
            self.ids.generate_task_id(),
            stage.clone(),
            payload,
            self.clock.now(),
        );
        self.insert(&task).await?;
        Ok(task.id)
    }

    async fn enqueue_unique(
        &self,
        stage: &Stage,
        payload: TaskPayload,
        dedup_key: &str,
    ) -> Result<Enqueued, StoreError> {
        let task = Task::new(
            self.ids.generate_task_id(),
            stage.clone(),
            payload,
            self.clock.now(),
        )
        .with_dedup_key(dedup_key);

        if self.insert(&task).await? {
            return Ok(Enqueued::Created(task.id));
        }
        let existing = self
            .task_by_dedup_key(dedup_key)
            .await?
            .ok_or_else(|| StoreError::Backend(format!("dedup key '{dedup_key}' vanished")))?;
        Ok(Enqueued::Existing(existing))
    }

    async fn claim(
        &self,
        stage: &Stage,
        worker: &WorkerIdentity,
    ) -> Result<Option<Task>, StoreError> {
        let now = self.clock.now().timestamp_millis();
        let row = sqlx::query(
            r#"UPDATE tasks
               SET status = 'claimed', owner = ?1, claimed_at = ?2,
                   claims = claims + 1, updated_at = ?2
               WHERE id = (
                   SELECT id FROM tasks
                   WHERE stage = ?3 AND status = 'pending'
                   ORDER BY created_at, id
                   LIMIT 1
               )
               AND status = 'pending'
               RETURNING *"#,
        )
        .bind(worker.to_string())
        .bind(now)
        .bind(stage.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.as_ref().map(task_from_row).transpose()
    }

    async fn complete(
        &self,
        task_id: TaskId,
        worker: &WorkerIdentity,
        result: TaskResult,
    ) -> Result<(), StoreError> {
        let output = serde_json::to_string(&result.output)
            .map_err(|e| StoreError::Backend(format!("encode result: {e}")))?;
        let updated = sqlx::query(
            r#"UPDATE tasks
               SET status = 'done', result = ?1, error = NULL, processing_ms = ?2, updated_at = ?3
               WHERE id = ?4 AND status = 'claimed' AND owner = ?5"#,
        )
        .bind(output)
        .bind(result.elapsed.map(|d| duration_ms(d) as i64))
        .bind(self.clock.now().timestamp_millis())
        .bind(task_id.to_key())
        .bind(worker.to_string())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if updated.rows_affected() == 0 {
            return Err(self.diagnose(task_id, worker).await);
        }
        Ok(())
    }

    async fn fail(
        &self,
        task_id: TaskId,
        worker: &WorkerIdentity,
        failure: TaskFailure,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"UPDATE tasks
               SET status = 'failed', error = ?1, processing_ms = ?2, updated_at = ?3
               WHERE id = ?4 AND status = 'claimed' AND owner = ?5"#,
        )
        .bind(failure.reason)
        .bind(failure.elapsed.map(|d| duration_ms(d) as i64))
        .bind(self.clock.now().timestamp_millis())
        .bind(task_id.to_key())
        .bind(worker.to_string())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if updated.rows_affected() == 0 {
            return Err(self.diagnose(task_id, worker).await);
        }
        Ok(())
    }

    async fn reap(&self, stale_after: Duration) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let Some(cutoff) = reap_cutoff(now, stale_after) else {
            return Ok(0);
        };
        let updated = sqlx::query(
            r#"UPDATE tasks
               SET status = 'pending', owner = NULL, claimed_at = NULL, updated_at = ?1
               WHERE status = 'claimed' AND claimed_at < ?2"#,
        )
        .bind(now.timestamp_millis())
        .bind(cutoff.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(updated.rows_affected())
    }

    async fn requeue_failed(&self, task_id: TaskId) -> Result<TaskId, StoreError> {
        let failed = self
            .get(task_id)
            .await?
            .ok_or(StoreError::NotFound(task_id))?;
        if failed.status != TaskStatus::Failed {
            return Err(StoreError::NotRetryable {
                task_id,
                status: failed.status,
            });
        }
        let key = retry_key(task_id);
        let next = failed
            .retry(self.ids.generate_task_id(), self.clock.now())
            .with_dedup_key(key.clone());
        if self.insert(&next).await? {
            return Ok(next.id);
        }
        self.task_by_dedup_key(&key)
            .await?
            .ok_or_else(|| StoreError::Backend(format!("dedup key '{key}' vanished")))
    }

    async fn get(&self, task_id: TaskId) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?1")
            .bind(task_id.to_key())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn counts(&self, stage: Option<&Stage>) -> Result<TaskCounts, StoreError> {
        let rows = match stage {
            Some(stage) => {
                sqlx::query(
                    "SELECT status, COUNT(*) AS n FROM tasks WHERE stage = ?1 GROUP BY status",
                )
                .bind(stage.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT status, COUNT(*) AS n FROM tasks GROUP BY status")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(map_sqlx)?;

        let mut counts = TaskCounts::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(map_sqlx)?;
            let n: i64 = row.try_get("n").map_err(map_sqlx)?;
            let status = TaskStatus::from_str(&status).map_err(StoreError::Backend)?;
            counts.add(status, n.max(0) as u64);
        }
        Ok(counts)
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn register(&self, raw_ref: &str) -> Result<DocumentId, StoreError> {
        sqlx::query(
            r#"INSERT INTO documents (id, raw_ref, created_at) VALUES (?1, ?2, ?3)
               ON CONFLICT(raw_ref) DO NOTHING"#,
        )
        .bind(self.ids.generate_document_id().to_key())
        .bind(raw_ref)
        .bind(self.clock.now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let row = sqlx::query("SELECT id FROM documents WHERE raw_ref = ?1")
            .bind(raw_ref)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)?;
        parse_id(&row, "id")
    }

    async fn document(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?1")
            .bind(id.to_key())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn set_extracted_text(&self, id: DocumentId, text: &str) -> Result<(), StoreError> {
        let updated = sqlx::query("UPDATE documents SET extracted_text = ?1 WHERE id = ?2")
            .bind(text)
            .bind(id.to_key())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::DocumentNotFound(id));
        }
        Ok(())
    }

    async fn set_classification(
        &self,
        id: DocumentId,
        classification: serde_json::Value,
    ) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(&classification)
            .map_err(|e| StoreError::Backend(format!("encode classification: {e}")))?;
        let updated = sqlx::query("UPDATE documents SET classification = ?1 WHERE id = ?2")
            .bind(encoded)
            .bind(id.to_key())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::DocumentNotFound(id));
        }
        Ok(())
    }
}

/// Connection-level failures are transient; everything else is a backend error.
fn map_sqlx(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::StoreUnavailable(e.to_string()),
        // SQLITE_BUSY / SQLITE_LOCKED
        sqlx::Error::Database(db) if matches!(db.code().as_deref(), Some("5") | Some("6")) => {
            StoreError::StoreUnavailable(e.to_string())
        }
        _ => StoreError::Backend(e.to_string()),
    }
}

fn encode_params(params: &serde_json::Value) -> Result<Option<String>, StoreError> {
    if params.is_null() {
        return Ok(None);
    }
    serde_json::to_string(params)
        .map(Some)
        .map_err(|e| StoreError::Backend(format!("encode params: {e}")))
}

fn decode_json(raw: Option<String>, column: &str) -> Result<Option<serde_json::Value>, StoreError> {
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| StoreError::Backend(format!("decode {column}: {e}")))
    })
    .transpose()
}

fn parse_id<I>(row: &SqliteRow, column: &str) -> Result<I, StoreError>
where
    I: FromStr,
    I::Err: std::fmt::Display,
{
    let raw: String = row.try_get(column).map_err(map_sqlx)?;
    raw.parse()
        .map_err(|e: I::Err| StoreError::Backend(format!("decode {column}: {e}")))
}

fn parse_opt_id<I>(row: &SqliteRow, column: &str) -> Result<Option<I>, StoreError>
where
    I: FromStr,
    I::Err: std::fmt::Display,
{
    let raw: Option<String> = row.try_get(column).map_err(map_sqlx)?;
    raw.map(|s| {
        s.parse()
            .map_err(|e: I::Err| StoreError::Backend(format!("decode {column}: {e}")))
    })
    .transpose()
}

fn millis(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
    let raw: Option<i64> = row.try_get(column).map_err(map_sqlx)?;
    raw.map(|ms| {
        DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| StoreError::Backend(format!("decode {column}: {ms} out of range")))
    })
    .transpose()
}

fn required_millis(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, StoreError> {
    millis(row, column)?.ok_or_else(|| StoreError::Backend(format!("{column} is null")))
}

fn count(row: &SqliteRow, column: &str) -> Result<u32, StoreError> {
    let raw: i64 = row.try_get(column).map_err(map_sqlx)?;
    u32::try_from(raw).map_err(|e| StoreError::Backend(format!("decode {column}: {e}")))
}

fn task_from_row(row: &SqliteRow) -> Result<Task, StoreError> {
    let status: String = row.try_get("status").map_err(map_sqlx)?;
    let stage: String = row.try_get("stage").map_err(map_sqlx)?;
    let processing_ms: Option<i64> = row.try_get("processing_ms").map_err(map_sqlx)?;

    Ok(Task {
        id: parse_id(row, "id")?,
        stage: Stage::new(stage),
        payload: TaskPayload {
            document_id: parse_id(row, "document_id")?,
            params: decode_json(row.try_get("params").map_err(map_sqlx)?, "params")?
                .unwrap_or(serde_json::Value::Null),
        },
        status: TaskStatus::from_str(&status).map_err(StoreError::Backend)?,
        owner: parse_opt_id(row, "owner")?,
        claimed_at: millis(row, "claimed_at")?,
        attempt: count(row, "attempt")?,
        claims: count(row, "claims")?,
        result: decode_json(row.try_get("result").map_err(map_sqlx)?, "result")?,
        error: row.try_get("error").map_err(map_sqlx)?,
        processing_ms: processing_ms.map(|ms| ms.max(0) as u64),
        dedup_key: row.try_get("dedup_key").map_err(map_sqlx)?,
        retry_of: parse_opt_id(row, "retry_of")?,
        created_at: required_millis(row, "created_at")?,
        updated_at: required_millis(row, "updated_at")?,
    })
}

fn document_from_row(row: &SqliteRow) -> Result<Document, StoreError> {
    Ok(Document {
        id: parse_id(row, "id")?,
        raw_ref: row.try_get("raw_ref").map_err(map_sqlx)?,
        extracted_text: row.try_get("extracted_text").map_err(map_sqlx)?,
        classification: decode_json(
            row.try_get("classification").map_err(map_sqlx)?,
            "classification",
        )?,
        created_at: required_millis(row, "created_at")?,
    })
}
