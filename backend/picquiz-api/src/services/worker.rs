//! Background job queue for question supply and image migration.
//!
//! Requests enqueue jobs and never observe their outcome. A single worker
//! drains the queue sequentially; tests use [`JobQueue::wait_idle`] or
//! [`JobQueue::submit`] to observe completion.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics::{WORKER_JOBS_IN_FLIGHT, WORKER_JOBS_TOTAL};
use crate::services::image_migrator::{ImageMigrator, MigrationReport};
use crate::services::supply_controller::{SupplyController, SupplyReport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    EnsureSupply { user_id: String },
    MigrateImages { ids: Vec<String> },
}

impl Job {
    fn name(&self) -> &'static str {
        match self {
            Job::EnsureSupply { .. } => "ensure_supply",
            Job::MigrateImages { .. } => "migrate_images",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobReport {
    /// `None` when the user still had enough questions.
    Supply(Option<SupplyReport>),
    Migration(MigrationReport),
}

struct Envelope {
    job: Job,
    ack: Option<oneshot::Sender<JobReport>>,
}

#[derive(Default)]
struct QueueState {
    in_flight: AtomicUsize,
    idle: Notify,
    pending_supply: Mutex<HashSet<String>>,
}

impl QueueState {
    fn pending_supply(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.pending_supply
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn finish(&self, job: &Job) {
        if let Job::EnsureSupply { user_id } = job {
            self.pending_supply().remove(user_id);
        }
        WORKER_JOBS_IN_FLIGHT.dec();
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<Envelope>,
    state: Arc<QueueState>,
}

pub struct JobReceiver {
    rx: mpsc::UnboundedReceiver<Envelope>,
    state: Arc<QueueState>,
}

impl JobQueue {
    pub fn new() -> (JobQueue, JobReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(QueueState::default());
        (
            JobQueue {
                tx,
                state: state.clone(),
            },
            JobReceiver { rx, state },
        )
    }

    /// Fire-and-forget. Returns `false` when the job was coalesced with a
    /// pending supply job for the same user or the worker is gone.
    pub fn enqueue(&self, job: Job) -> bool {
        if let Job::EnsureSupply { user_id } = &job {
            if !self.state.pending_supply().insert(user_id.clone()) {
                debug!(user_id = %user_id, "Supply job already pending, skipping");
                return false;
            }
        }
        self.send(Envelope { job, ack: None })
    }

    /// Enqueues without coalescing and waits for the worker's report.
    pub async fn submit(&self, job: Job) -> Option<JobReport> {
        if let Job::EnsureSupply { user_id } = &job {
            self.state.pending_supply().insert(user_id.clone());
        }
        let (ack, report) = oneshot::channel();
        if !self.send(Envelope {
            job,
            ack: Some(ack),
        }) {
            return None;
        }
        report.await.ok()
    }

    fn send(&self, envelope: Envelope) -> bool {
        self.state.in_flight.fetch_add(1, Ordering::AcqRel);
        WORKER_JOBS_IN_FLIGHT.inc();
        match self.tx.send(envelope) {
            Ok(()) => true,
            Err(mpsc::error::SendError(envelope)) => {
                warn!(job = envelope.job.name(), "Job queue is closed, dropping job");
                self.state.finish(&envelope.job);
                false
            }
        }
    }

    /// Resolves once every queued job, including jobs enqueued by jobs, has
    /// finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.state.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.state.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::Acquire)
    }
}

pub struct SupplyWorker {
    receiver: JobReceiver,
    supply: Arc<SupplyController>,
    migrator: Arc<ImageMigrator>,
}

impl SupplyWorker {
    pub fn new(
        receiver: JobReceiver,
        supply: Arc<SupplyController>,
        migrator: Arc<ImageMigrator>,
    ) -> Self {
        Self {
            receiver,
            supply,
            migrator,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!("Starting supply worker loop");

        while let Some(Envelope { job, ack }) = self.receiver.rx.recv().await {
            let report = self.process(&job).await;
            let status = match &report {
                JobReport::Supply(None) => "skipped",
                _ => "success",
            };
            WORKER_JOBS_TOTAL
                .with_label_values(&[job.name(), status])
                .inc();

            self.receiver.state.finish(&job);
            if let Some(ack) = ack {
                let _ = ack.send(report);
            }
        }

        info!("Supply worker stopped: job queue closed");
    }

    async fn process(&self, job: &Job) -> JobReport {
        match job {
            Job::EnsureSupply { user_id } => {
                JobReport::Supply(self.supply.ensure_supply(user_id).await)
            }
            Job::MigrateImages { ids } => {
                JobReport::Migration(self.migrator.migrate_pending(Some(ids)).await)
            }
        }
    }
}
