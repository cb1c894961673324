use anyhow::Result;
use ketch_core::store::TaskStore;

/// Print every persisted task, oldest first.
pub async fn run_status(store: &dyn TaskStore) -> Result<()> {
    let records = store.load_all().await?;
    if records.is_empty() {
        println!("no tasks");
        return Ok(());
    }
    for r in records {
        let short = &r.task_id[..r.task_id.len().min(8)];
        let total = if r.total_bytes >= 0 {
            format!("{}", r.total_bytes)
        } else {
            "?".to_string()
        };
        println!(
            "{short}  {:<12} {:>12}/{:<12} {}",
            r.state.as_str(),
            r.downloaded_bytes,
            total,
            r.request.url
        );
    }
    Ok(())
}
