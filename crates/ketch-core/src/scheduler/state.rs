//! Scheduler actor: the only mutator of admission state.

use super::{AdmissionRequest, Permit, SchedMsg, SchedulerConfig};
use crate::model::Priority;
use tokio::sync::mpsc;

struct Running {
    task_id: String,
    host: String,
    priority: Priority,
    created_at: i64,
    preempt_tx: mpsc::Sender<()>,
    /// Already asked to pause; don't signal twice.
    preempted: bool,
}

pub(super) async fn run_actor(
    config: SchedulerConfig,
    mut rx: mpsc::UnboundedReceiver<SchedMsg>,
    permit_tx: mpsc::UnboundedSender<SchedMsg>,
) {
    let mut waiting: Vec<AdmissionRequest> = Vec::new();
    let mut running: Vec<Running> = Vec::new();

    while let Some(msg) = rx.recv().await {
        match msg {
            SchedMsg::Request(req) => {
                tracing::debug!(task_id = %req.task_id, priority = ?req.priority, "admission requested");
                waiting.push(req);
            }
            SchedMsg::Withdraw { task_id } => {
                waiting.retain(|w| w.task_id != task_id);
            }
            SchedMsg::Release { task_id } => {
                running.retain(|r| r.task_id != task_id);
            }
            SchedMsg::SetPriority { task_id, priority } => {
                if let Some(w) = waiting.iter_mut().find(|w| w.task_id == task_id) {
                    w.priority = priority;
                }
                if let Some(r) = running.iter_mut().find(|r| r.task_id == task_id) {
                    r.priority = priority;
                }
            }
        }
        admit(&config, &mut waiting, &mut running, &permit_tx);
    }
}

/// Admit as many waiting tasks as the caps allow; when full, consider
/// preemption for a waiting URGENT task.
fn admit(
    config: &SchedulerConfig,
    waiting: &mut Vec<AdmissionRequest>,
    running: &mut Vec<Running>,
    permit_tx: &mpsc::UnboundedSender<SchedMsg>,
) {
    loop {
        // Best candidate whose host still has room: highest priority first,
        // FIFO by created_at among equals.
        let candidate = waiting
            .iter()
            .enumerate()
            .filter(|(_, w)| host_count(running, &w.host) < config.max_connections_per_host)
            .min_by_key(|(_, w)| (std::cmp::Reverse(w.priority), w.created_at))
            .map(|(i, _)| i);

        let Some(index) = candidate else {
            return;
        };

        if running.len() >= config.max_concurrent_downloads {
            // URGENT may push out the lowest strictly-lower-priority task;
            // the slot frees once the preempted task pauses and releases.
            let urgent = waiting[index].priority == Priority::Urgent;
            if urgent {
                if let Some(victim) = running
                    .iter_mut()
                    .filter(|r| r.priority < Priority::Urgent && !r.preempted)
                    .min_by_key(|r| (r.priority, std::cmp::Reverse(r.created_at)))
                {
                    tracing::debug!(task_id = %victim.task_id, "preempting for urgent task");
                    victim.preempted = true;
                    let _ = victim.preempt_tx.try_send(());
                }
            }
            return;
        }

        let req = waiting.remove(index);
        let permit = Permit {
            task_id: req.task_id.clone(),
            tx: permit_tx.clone(),
        };
        if req.permit_tx.send(permit).is_err() {
            // Requester is gone; the permit just dropped and queued a
            // release for a slot we never recorded, which is harmless.
            continue;
        }
        tracing::debug!(task_id = %req.task_id, "admitted");
        running.push(Running {
            task_id: req.task_id,
            host: req.host,
            priority: req.priority,
            created_at: req.created_at,
            preempt_tx: req.preempt_tx,
            preempted: false,
        });
    }
}

fn host_count(running: &[Running], host: &str) -> usize {
    running.iter().filter(|r| r.host == host).count()
}
