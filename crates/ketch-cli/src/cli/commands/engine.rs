use anyhow::Result;
use ketch_core::config::KetchConfig;
use ketch_core::model::DownloadState;
use ketch_core::registry::TaskRegistry;
use ketch_core::store::SqliteTaskStore;
use std::sync::Arc;
use std::time::Duration;

/// Restore persisted tasks and drive them to terminal states, printing
/// progress. Ctrl-C pauses everything and exits cleanly.
pub async fn run_engine(cfg: KetchConfig, store: Arc<SqliteTaskStore>) -> Result<()> {
    let registry = TaskRegistry::new(cfg, store);
    let restored = registry.restore().await?;
    if restored == 0 {
        println!("nothing to do (no restorable tasks; `ketch add <url>` first)");
        return Ok(());
    }
    println!("running {restored} task(s)");

    let mut tick = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\npausing tasks...");
                for handle in registry.handles() {
                    handle.pause().await;
                }
                // Give coordinators a moment to snapshot and persist.
                tokio::time::sleep(Duration::from_millis(500)).await;
                return Ok(());
            }
            _ = tick.tick() => {
                let handles = registry.handles();
                let mut all_settled = true;
                for handle in &handles {
                    let state = handle.current_state();
                    // Paused tasks rest until an explicit `ketch resume`;
                    // don't wait on them.
                    if !state.is_terminal() && !matches!(state, DownloadState::Paused(_)) {
                        all_settled = false;
                    }
                    print_line(handle.id(), &state);
                }
                if all_settled {
                    println!("all tasks finished");
                    return Ok(());
                }
            }
        }
    }
}

fn print_line(id: &str, state: &DownloadState) {
    let short = &id[..id.len().min(8)];
    match state {
        DownloadState::Downloading(p) => {
            let pct = p
                .fraction()
                .map(|f| format!("{:5.1}%", f * 100.0))
                .unwrap_or_else(|| "    ?".to_string());
            println!(
                "{short}  downloading {pct}  {:>10} B  {:>8.0} B/s",
                p.downloaded, p.bytes_per_sec
            );
        }
        DownloadState::Paused(p) => println!("{short}  paused at {} B", p.downloaded),
        DownloadState::Completed(path) => println!("{short}  completed -> {}", path.display()),
        DownloadState::Failed(e) => println!("{short}  failed: {e}"),
        other => println!("{short}  {other:?}"),
    }
}
