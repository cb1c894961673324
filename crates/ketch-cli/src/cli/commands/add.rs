use anyhow::{Context, Result};
use ketch_core::config::KetchConfig;
use ketch_core::model::{Destination, DownloadRequest, Priority};
use ketch_core::store::{new_task_id, TaskRecord, TaskStore};
use std::path::PathBuf;

/// Persist a new queued task; `ketch run` picks it up.
pub async fn run_add(
    store: &dyn TaskStore,
    cfg: &KetchConfig,
    url: &str,
    dir: Option<PathBuf>,
    connections: Option<u32>,
    priority: Priority,
) -> Result<()> {
    url::Url::parse(url).with_context(|| format!("invalid url {url:?}"))?;

    let destination = Destination::Directory(dir.unwrap_or_else(|| cfg.default_download_dir.clone()));
    let request = DownloadRequest::new(url, destination)
        .connections(connections.unwrap_or(cfg.default_connections))
        .priority(priority);

    let record = TaskRecord::new(new_task_id(), request, "http");
    store.save(&record).await?;
    println!("added task {}", record.task_id);
    Ok(())
}
