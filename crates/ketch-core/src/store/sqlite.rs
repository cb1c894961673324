//! SQLite-backed task store (sqlx).

use super::{TaskRecord, TaskState, TaskStore};
use crate::error::ErrorInfo;
use crate::model::DownloadRequest;
use crate::segment::Segment;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Handle to the SQLite task database.
///
/// One row per task. Structured fields (request, segments, error) are JSON
/// columns so the schema survives request-shape evolution; unknown JSON
/// fields are ignored on read. Saves run inside a transaction and are
/// serialized through a mutex so concurrent writers keep last-writer-wins
/// by wall clock.
pub struct SqliteTaskStore {
    pool: Pool<Sqlite>,
    write_lock: tokio::sync::Mutex<()>,
}

impl SqliteTaskStore {
    /// Open (or create) the default database under the XDG state directory
    /// (`~/.local/state/ketch/tasks.db`).
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("ketch")?;
        let state_dir = xdg_dirs.get_state_home();
        tokio::fs::create_dir_all(&state_dir)
            .await
            .with_context(|| format!("create state dir {}", state_dir.display()))?;
        Self::open_at(&state_dir.join("tasks.db")).await
    }

    /// Open (or create) a database at an explicit path.
    pub async fn open_at(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .with_context(|| format!("invalid database path {}", path.display()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("open task db {}", path.display()))?;
        let store = SqliteTaskStore {
            pool,
            write_lock: tokio::sync::Mutex::new(()),
        };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory database for tests.
    pub async fn open_memory() -> Result<Self> {
        // Single connection so the pool cannot hand back a different empty DB.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = SqliteTaskStore {
            pool,
            write_lock: tokio::sync::Mutex::new(()),
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                task_id TEXT PRIMARY KEY,
                request_json TEXT NOT NULL,
                output_path TEXT,
                state TEXT NOT NULL,
                total_bytes INTEGER NOT NULL DEFAULT -1,
                downloaded_bytes INTEGER NOT NULL DEFAULT 0,
                accept_ranges INTEGER,
                etag TEXT,
                last_modified TEXT,
                segments_json TEXT,
                source_type TEXT NOT NULL,
                source_resume_state BLOB,
                error_json TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<TaskRecord> {
        let request_json: String = row.get("request_json");
        let request: DownloadRequest =
            serde_json::from_str(&request_json).context("decode request_json")?;

        let segments_json: Option<String> = row.get("segments_json");
        let segments: Option<Vec<Segment>> = segments_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .context("decode segments_json")?;

        let error_json: Option<String> = row.get("error_json");
        let error: Option<ErrorInfo> = error_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .context("decode error_json")?;

        let state_str: String = row.get("state");
        let state = TaskState::from_str(&state_str)
            .with_context(|| format!("unknown task state {state_str:?}"))?;

        let output_path: Option<String> = row.get("output_path");
        let downloaded: i64 = row.get("downloaded_bytes");

        Ok(TaskRecord {
            task_id: row.get("task_id"),
            request,
            output_path: output_path.map(PathBuf::from),
            state,
            total_bytes: row.get("total_bytes"),
            downloaded_bytes: downloaded.max(0) as u64,
            accept_ranges: row.get("accept_ranges"),
            etag: row.get("etag"),
            last_modified: row.get("last_modified"),
            segments,
            source_type: row.get("source_type"),
            source_resume_state: row.get("source_resume_state"),
            error,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn save(&self, record: &TaskRecord) -> Result<()> {
        let request_json = serde_json::to_string(&record.request)?;
        let segments_json = record
            .segments
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let error_json = record.error.as_ref().map(serde_json::to_string).transpose()?;
        let output_path = record
            .output_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO tasks (
                task_id, request_json, output_path, state,
                total_bytes, downloaded_bytes, accept_ranges,
                etag, last_modified, segments_json,
                source_type, source_resume_state, error_json,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(task_id) DO UPDATE SET
                request_json = excluded.request_json,
                output_path = excluded.output_path,
                state = excluded.state,
                total_bytes = excluded.total_bytes,
                downloaded_bytes = excluded.downloaded_bytes,
                accept_ranges = excluded.accept_ranges,
                etag = excluded.etag,
                last_modified = excluded.last_modified,
                segments_json = excluded.segments_json,
                source_type = excluded.source_type,
                source_resume_state = excluded.source_resume_state,
                error_json = excluded.error_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.task_id)
        .bind(&request_json)
        .bind(&output_path)
        .bind(record.state.as_str())
        .bind(record.total_bytes)
        .bind(record.downloaded_bytes as i64)
        .bind(record.accept_ranges)
        .bind(&record.etag)
        .bind(&record.last_modified)
        .bind(&segments_json)
        .bind(&record.source_type)
        .bind(&record.source_resume_state)
        .bind(&error_json)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn load(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE task_id = ?1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn load_all(&self) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query("SELECT * FROM tasks ORDER BY created_at ASC, task_id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn remove(&self, task_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("DELETE FROM tasks WHERE task_id = ?1")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
