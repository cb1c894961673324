use super::find_record;
use anyhow::Result;
use ketch_core::storage;
use ketch_core::store::TaskStore;

/// Drop a task's record; optionally delete its files too.
pub async fn run_remove(store: &dyn TaskStore, id: &str, delete_files: bool) -> Result<()> {
    let record = find_record(store, id).await?;
    if delete_files {
        if let Some(path) = &record.output_path {
            let part = storage::part_path(path);
            if part.exists() {
                std::fs::remove_file(&part)?;
                println!("deleted {}", part.display());
            }
            if path.exists() {
                std::fs::remove_file(path)?;
                println!("deleted {}", path.display());
            }
        }
    }
    store.remove(&record.task_id).await?;
    println!("removed {}", record.task_id);
    Ok(())
}
