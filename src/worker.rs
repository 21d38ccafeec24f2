use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::scheduler::{PassSummary, PassTrigger, Scheduler, SchedulerError};

struct PassRequest {
    respond: oneshot::Sender<Result<PassSummary, SchedulerError>>,
}

/// Talks to the background scheduler task.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<PassRequest>,
}

impl SchedulerHandle {
    /// Ask the worker for an immediate pass and wait for its summary. Queued
    /// behind a pass already in progress.
    pub async fn trigger_manual_pass(&self) -> Result<PassSummary, SchedulerError> {
        let (respond, rx) = oneshot::channel();
        self.tx
            .send(PassRequest { respond })
            .await
            .map_err(|_| SchedulerError::Unavailable)?;
        rx.await.map_err(|_| SchedulerError::Unavailable)?
    }
}

/// Start the scheduler task: startup recovery, then a pass every tick and on
/// every manual request until `shutdown` flips.
pub fn spawn(
    scheduler: Arc<Scheduler>,
    shutdown: watch::Receiver<bool>,
) -> (SchedulerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(16);
    let handle = tokio::spawn(run(scheduler, rx, shutdown));
    (SchedulerHandle { tx }, handle)
}

async fn run(
    scheduler: Arc<Scheduler>,
    mut requests: mpsc::Receiver<PassRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut started = match scheduler.start().await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("Scheduler startup failed, retrying before the next pass: {e}");
            false
        }
    };

    let period = scheduler.config().tick_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        "Scheduler started (tick every {}s, {} uploads/day)",
        period.as_secs(),
        scheduler.config().max_uploads_per_day
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {
                let result = pass(&scheduler, &mut started, PassTrigger::Tick, &shutdown).await;
                if let Err(e) = result {
                    tracing::error!("Scheduled pass failed: {e}");
                }
            }
            request = requests.recv() => {
                let Some(request) = request else { break };
                let result = pass(&scheduler, &mut started, PassTrigger::Manual, &shutdown).await;
                if let Err(ref e) = result {
                    tracing::error!("Manual pass failed: {e}");
                }
                let _ = request.respond.send(result);
            }
            changed = shutdown.changed() => {
                // Sender gone: nobody can stop us cleanly any more
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    tracing::info!("Scheduler stopped");
}

/// No pass runs until startup recovery has gone through once.
async fn pass(
    scheduler: &Scheduler,
    started: &mut bool,
    trigger: PassTrigger,
    shutdown: &watch::Receiver<bool>,
) -> Result<PassSummary, SchedulerError> {
    if !*started {
        scheduler.start().await?;
        *started = true;
        tracing::info!("Scheduler startup completed");
    }
    scheduler.run_pass(trigger, Some(shutdown)).await
}
