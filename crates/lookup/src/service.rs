use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bitcoin::OutPoint;
use eyre::{Context, Result};
use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use hue_marshal::{Hashable, ObjectHash};
use hue_scanner::{ColorScanner, ScannerError};
use hue_track::ColorProof;

use crate::{LookupConfig, ProofFetcher};

/// Lookup of the color of one output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LookupTask {
    outpoint: OutPoint,
    /// Number of failed fetches so far.
    attempt: u32,
}

impl LookupTask {
    fn new(outpoint: OutPoint) -> Self {
        Self {
            outpoint,
            attempt: 0,
        }
    }

    fn retry(self) -> Self {
        Self {
            attempt: self.attempt.saturating_add(1),
            ..self
        }
    }
}

/// State shared by the service and its workers.
struct LookupContext<F> {
    config: LookupConfig,
    scanner: Arc<ColorScanner>,
    fetcher: Arc<F>,
    sender: flume::Sender<LookupTask>,
    /// Outputs queued, being fetched or waiting for a retry.
    scheduled: Mutex<HashSet<OutPoint>>,
}

impl<F> LookupContext<F> {
    fn schedule(&self, outpoint: OutPoint) -> bool {
        if !self.scheduled.lock().insert(outpoint) {
            return false;
        }

        tracing::debug!(outpoint = %outpoint, "Scheduled color lookup");

        // The service holds a receiver for as long as the context lives.
        let _ = self.sender.send(LookupTask::new(outpoint));

        true
    }

    fn schedule_pending(&self) -> Result<usize, ScannerError> {
        let mut scheduled = 0;

        for txid in self.scanner.resolve_pending()? {
            for outpoint in self.scanner.unknown_outputs(&txid) {
                if self.schedule(outpoint) {
                    scheduled += 1;
                }
            }
        }

        Ok(scheduled)
    }

    fn finish(&self, outpoint: &OutPoint) {
        self.scheduled.lock().remove(outpoint);
    }
}

/// Outcome of one lookup attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Done,
    /// The lookup stays scheduled until the retry runs.
    Retrying,
}

/// Resolves colors of pending transactions the scanner can't derive locally
/// by fetching color proofs from the network.
///
/// Transactions becoming pending while the service runs are picked up every
/// [`LookupConfig::pending_interval`]. Failed fetches are retried with
/// exponential backoff and random jitter. Cancelling the service stops the
/// scanner.
pub struct LookupService<F> {
    context: Arc<LookupContext<F>>,
    receiver: flume::Receiver<LookupTask>,
}

impl<F: ProofFetcher> LookupService<F> {
    pub fn new(config: LookupConfig, scanner: Arc<ColorScanner>, fetcher: Arc<F>) -> Self {
        let (sender, receiver) = flume::unbounded();

        Self {
            context: Arc::new(LookupContext {
                config,
                scanner,
                fetcher,
                sender,
                scheduled: Mutex::new(HashSet::new()),
            }),
            receiver,
        }
    }

    pub fn scanner(&self) -> &Arc<ColorScanner> {
        &self.context.scanner
    }

    /// Resolve what the scanner can derive locally and schedule lookups of
    /// the outputs of pending transactions that are still unknown. Returns
    /// the number of newly scheduled lookups.
    pub fn schedule_pending(&self) -> Result<usize, ScannerError> {
        self.context.schedule_pending()
    }

    /// Schedule the lookup of one output. Returns `false` if it is already
    /// scheduled.
    pub fn schedule(&self, outpoint: OutPoint) -> bool {
        self.context.schedule(outpoint)
    }

    pub async fn run(self, cancellation: CancellationToken) {
        let task_tracker = TaskTracker::new();

        for index in 0..self.context.config.workers.max(1) {
            let worker = LookupWorker {
                index,
                context: self.context.clone(),
                receiver: self.receiver.clone(),
                task_tracker: task_tracker.clone(),
            };

            task_tracker.spawn(worker.run(cancellation.child_token()));
        }

        task_tracker.spawn(check_pending(self.context.clone(), cancellation.child_token()));

        task_tracker.close();
        task_tracker.wait().await;

        tracing::info!("Lookup service stopped, stopping scanner");
        self.context.scanner.stop();
    }
}

/// Schedule lookups for pending transactions until cancelled.
async fn check_pending<F: ProofFetcher>(
    context: Arc<LookupContext<F>>,
    cancellation: CancellationToken,
) {
    // Zero periods are rejected by tokio.
    let period = context.config.pending_interval.max(Duration::from_millis(1));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match context.schedule_pending() {
                    Ok(0) => {}
                    Ok(scheduled) => {
                        tracing::debug!(scheduled, "Scheduled lookups of pending transactions");
                    }
                    Err(err) => tracing::error!("Failed to schedule pending lookups: {}", err),
                }
            }
            _ = cancellation.cancelled() => {
                tracing::trace!("Cancellation received, stopping pending check");
                return;
            }
        }
    }
}

struct LookupWorker<F> {
    /// Index of the worker in the pool.
    index: usize,
    context: Arc<LookupContext<F>>,
    receiver: flume::Receiver<LookupTask>,
    /// Tracks delayed retries, so that the service waits for them.
    task_tracker: TaskTracker,
}

impl<F: ProofFetcher> LookupWorker<F> {
    async fn run(self, cancellation: CancellationToken) {
        loop {
            tokio::select! {
                task_received = self.receiver.recv_async() => {
                    let Ok(task) = task_received else {
                        tracing::trace!(index = self.index, "All lookup task senders are dropped");
                        return;
                    };

                    if let Err(err) = self.handle_task(task, &cancellation).await {
                        tracing::error!(index = self.index, "Failed to handle a lookup: {:?}", err);
                    }
                }
                _ = cancellation.cancelled() => {
                    tracing::trace!(index = self.index, "Cancellation received, stopping LookupWorker");
                    return;
                }
            }
        }
    }

    /// Run one lookup attempt. The output stays scheduled only while a
    /// retry is waiting.
    async fn handle_task(&self, task: LookupTask, cancellation: &CancellationToken) -> Result<()> {
        let attempt = self.attempt(task, cancellation).await;

        if !matches!(attempt, Ok(Attempt::Retrying)) {
            self.context.finish(&task.outpoint);
        }

        attempt.map(|_| ())
    }

    async fn attempt(&self, task: LookupTask, cancellation: &CancellationToken) -> Result<Attempt> {
        let scanner = &self.context.scanner;

        scanner
            .resolve_pending()
            .wrap_err("failed to resolve pending transactions")?;

        if !scanner
            .unknown_outputs(&task.outpoint.txid)
            .contains(&task.outpoint)
        {
            tracing::trace!(
                index = self.index,
                outpoint = %task.outpoint,
                "Color resolved without lookup"
            );
            return Ok(Attempt::Done);
        }

        let fetched = tokio::select! {
            fetched = self.context.fetcher.fetch(task.outpoint) => fetched,
            _ = cancellation.cancelled() => return Ok(Attempt::Done),
        };

        let proofs = match fetched {
            Ok(proofs) => proofs,
            Err(err) => {
                tracing::warn!(
                    index = self.index,
                    outpoint = %task.outpoint,
                    attempt = task.attempt,
                    "Failed to fetch color proofs: {}",
                    err
                );
                self.schedule_retry(task, cancellation);
                return Ok(Attempt::Retrying);
            }
        };

        if !scanner.is_started() {
            tracing::debug!(
                index = self.index,
                outpoint = %task.outpoint,
                "Scanner is stopped, dropping fetched proofs"
            );
            return Ok(Attempt::Done);
        }

        for (hash, proof) in proofs {
            self.merge(task.outpoint, hash, &proof);
        }

        let unresolved = scanner
            .resolve_pending()
            .wrap_err("failed to resolve pending transactions")?;

        tracing::debug!(
            index = self.index,
            outpoint = %task.outpoint,
            unresolved = unresolved.len(),
            "Finished color lookup"
        );

        Ok(Attempt::Done)
    }

    /// Merge a fetched proof into the track of its definition. Proofs of
    /// definitions the scanner doesn't follow are dropped.
    fn merge(&self, outpoint: OutPoint, hash: ObjectHash, proof: &ColorProof) {
        let scanner = &self.context.scanner;

        if proof.definition().hash() != hash {
            tracing::warn!(
                outpoint = %outpoint,
                definition = %hash,
                "Dropping proof filed under another definition"
            );
            return;
        }

        if scanner.definition(&hash).is_none() {
            tracing::info!(
                outpoint = %outpoint,
                definition = %hash,
                "Dropping proof of a definition that is not followed"
            );
            return;
        }

        match scanner.merge_proof(proof) {
            Ok(applied) => tracing::debug!(
                outpoint = %outpoint,
                definition = %hash,
                applied,
                "Merged fetched color proof"
            ),
            Err(err) => tracing::warn!(
                outpoint = %outpoint,
                definition = %hash,
                "Rejected fetched color proof: {}",
                err
            ),
        }
    }

    /// Re-enqueue the task after the backoff delay without blocking the
    /// worker.
    fn schedule_retry(&self, task: LookupTask, cancellation: &CancellationToken) {
        let config = &self.context.config;
        let delay = config.retry_delay(task.attempt, config.random_jitter());
        let context = self.context.clone();
        let cancellation = cancellation.clone();

        tracing::debug!(
            outpoint = %task.outpoint,
            attempt = task.attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduled lookup retry"
        );

        self.task_tracker.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let _ = context.sender.send_async(task.retry()).await;
                }
                _ = cancellation.cancelled() => context.finish(&task.outpoint),
            }
        });
    }
}
