use super::find_record;
use anyhow::Result;
use ketch_core::store::{TaskState, TaskStore};

/// Store-level pause: the next `run` leaves the task alone.
pub async fn run_pause(store: &dyn TaskStore, id: &str) -> Result<()> {
    let mut record = find_record(store, id).await?;
    match record.state {
        TaskState::Pending | TaskState::Queued | TaskState::Downloading => {
            record.state = TaskState::Paused;
            record.touch();
            store.save(&record).await?;
            println!("paused {}", record.task_id);
        }
        other => println!("task is {}, nothing to pause", other.as_str()),
    }
    Ok(())
}

/// Store-level resume: re-queue a paused task for the next `run`.
pub async fn run_resume(store: &dyn TaskStore, id: &str) -> Result<()> {
    let mut record = find_record(store, id).await?;
    match record.state {
        TaskState::Paused => {
            record.state = TaskState::Queued;
            record.touch();
            store.save(&record).await?;
            println!("queued {}", record.task_id);
        }
        other => println!("task is {}, nothing to resume", other.as_str()),
    }
    Ok(())
}
