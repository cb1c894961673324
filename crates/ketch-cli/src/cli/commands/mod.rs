//! One file per CLI command.

mod add;
mod checksum;
mod engine;
mod remove;
mod status;
mod toggle;

pub use add::run_add;
pub use checksum::run_checksum;
pub use engine::run_engine;
pub use remove::run_remove;
pub use status::run_status;
pub use toggle::{run_pause, run_resume};

use anyhow::Result;
use ketch_core::store::{TaskRecord, TaskStore};

/// Find a record by full id or unique prefix.
pub(super) async fn find_record(store: &dyn TaskStore, id: &str) -> Result<TaskRecord> {
    let all = store.load_all().await?;
    let mut matches: Vec<TaskRecord> = all
        .into_iter()
        .filter(|r| r.task_id == id || r.task_id.starts_with(id))
        .collect();
    match matches.len() {
        0 => anyhow::bail!("no task matches {id:?}"),
        1 => Ok(matches.remove(0)),
        n => anyhow::bail!("{n} tasks match {id:?}; use a longer prefix"),
    }
}
