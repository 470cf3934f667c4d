// src/batch.rs
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::error::{BatchError, CheckpointError, ServiceError};
use crate::model::{BatchOperation, OperationState};
use crate::retry::{with_deadline, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSettings {
    pub concurrency_limit: usize,
    pub retry: RetryPolicy,
    /// Deadline for one `apply_fn` call; overrunning it is a transient failure.
    pub call_timeout: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            concurrency_limit: 4,
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// How an operation's final state came about in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Applied during this run.
    Executed,
    /// Already terminal in the checkpoint; not applied again.
    Resumed,
    /// Left Pending because the run was cancelled first.
    NotDispatched,
    /// Same operation id appeared earlier in the list.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub operation: BatchOperation,
    pub disposition: Disposition,
    /// Calls to `apply_fn` made for this operation in this run.
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Complete,
    PartialSuccess,
    AllFailed,
    Cancelled,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Complete => 0,
            RunOutcome::PartialSuccess => 2,
            RunOutcome::AllFailed => 3,
            RunOutcome::Cancelled => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: String,
    /// One entry per input operation, in input order.
    pub results: Vec<OperationResult>,
    pub outcome: RunOutcome,
}

impl BatchReport {
    pub fn final_states(&self) -> Vec<OperationState> {
        self.results.iter().map(|r| r.operation.state.clone()).collect()
    }

    pub fn executed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.disposition == Disposition::Executed)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.operation.state, OperationState::Failed(_)))
            .count()
    }
}

fn classify_outcome(results: &[OperationResult]) -> RunOutcome {
    if results.iter().any(|r| !r.operation.state.is_terminal()) {
        return RunOutcome::Cancelled;
    }
    let succeeded = results
        .iter()
        .filter(|r| r.operation.state == OperationState::Succeeded)
        .count();
    let failed = results
        .iter()
        .filter(|r| matches!(r.operation.state, OperationState::Failed(_)))
        .count();
    match (succeeded, failed) {
        (_, 0) => RunOutcome::Complete,
        (0, _) => RunOutcome::AllFailed,
        _ => RunOutcome::PartialSuccess,
    }
}

enum AttemptOutcome {
    Terminal(OperationState),
    /// Cancelled while waiting to retry; never applied successfully.
    Interrupted,
}

struct TaskOutcome {
    index: usize,
    operation: BatchOperation,
    attempts: u32,
    checkpoint_error: Option<CheckpointError>,
}

/// Runs mutating operations with bounded concurrency, per-item retry and a
/// checkpoint that lets a later run with the same batch id skip finished work.
pub struct BatchExecutor {
    store: Arc<dyn CheckpointStore>,
    settings: BatchSettings,
}

impl BatchExecutor {
    pub fn new(store: Arc<dyn CheckpointStore>, settings: BatchSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    /// Attempts every non-terminal operation and reports each final state.
    ///
    /// A failing item never stops the run. Only infrastructure problems
    /// (unreadable or unwritable checkpoint, a panicked worker) return `Err`;
    /// on a checkpoint write failure no new operations are dispatched, but
    /// in-flight ones are awaited first.
    pub async fn run<F, Fut>(
        &self,
        batch_id: &str,
        operations: Vec<BatchOperation>,
        apply_fn: F,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, BatchError>
    where
        F: Fn(BatchOperation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ServiceError>> + Send + 'static,
    {
        if self.settings.concurrency_limit == 0 {
            return Err(BatchError::InvalidConcurrency);
        }

        let checkpointed: HashMap<String, BatchOperation> = self
            .store
            .load(batch_id)
            .await
            .map_err(|source| BatchError::CheckpointLoad {
                batch_id: batch_id.to_string(),
                source,
            })?
            .into_iter()
            .map(|op| (op.operation_id.clone(), op))
            .collect();

        let total = operations.len();
        let mut results: Vec<Option<OperationResult>> = vec![None; total];
        let mut pending: Vec<(usize, BatchOperation)> = Vec::new();
        let mut seen_ids = HashSet::new();

        for (index, mut operation) in operations.into_iter().enumerate() {
            if !seen_ids.insert(operation.operation_id.clone()) {
                warn!(
                    "Operation id {} appears more than once in batch {}; skipping repeat",
                    operation.operation_id, batch_id
                );
                operation.transition(OperationState::Skipped("duplicate operation id".to_string()));
                results[index] = Some(OperationResult {
                    operation,
                    disposition: Disposition::Duplicate,
                    attempts: 0,
                });
            } else if let Some(done) = checkpointed.get(&operation.operation_id) {
                debug!(
                    "Operation {} already {:?} in checkpoint; not re-applying",
                    done.operation_id, done.state
                );
                results[index] = Some(OperationResult {
                    operation: done.clone(),
                    disposition: Disposition::Resumed,
                    attempts: 0,
                });
            } else if operation.state.is_terminal() {
                results[index] = Some(OperationResult {
                    operation,
                    disposition: Disposition::Resumed,
                    attempts: 0,
                });
            } else {
                pending.push((index, operation));
            }
        }

        info!(
            "Starting batch {}: {} operations, {} resumed from checkpoint, {} to run (concurrency {})",
            batch_id,
            total,
            total - pending.len(),
            pending.len(),
            self.settings.concurrency_limit
        );

        // Child token: fires on caller cancellation or on our own checkpoint failure
        let stop = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency_limit));
        let apply_fn = Arc::new(apply_fn);
        let batch_id_owned: Arc<str> = Arc::from(batch_id);
        let mut workers = JoinSet::new();
        let mut pending = pending.into_iter();

        for (index, operation) in pending.by_ref() {
            let permit = tokio::select! {
                biased;
                _ = stop.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => Some(
                    permit.map_err(|e| BatchError::Worker(format!("semaphore closed: {}", e)))?,
                ),
            };
            let Some(permit) = permit else {
                results[index] = Some(OperationResult {
                    operation,
                    disposition: Disposition::NotDispatched,
                    attempts: 0,
                });
                break;
            };

            let store = self.store.clone();
            let apply_fn = apply_fn.clone();
            let retry = self.settings.retry.clone();
            let call_timeout = self.settings.call_timeout;
            let stop = stop.clone();
            let batch_id = batch_id_owned.clone();

            workers.spawn(async move {
                // Held until the checkpoint write is done, so the next dispatch waits for it
                let _permit = permit;
                let mut operation = operation;
                operation.transition(OperationState::InFlight);

                let (outcome, attempts) =
                    apply_with_retry(&*apply_fn, &operation, &retry, call_timeout, &stop).await;

                let mut checkpoint_error = None;
                match outcome {
                    AttemptOutcome::Terminal(state) => {
                        operation.transition(state);
                        if let Err(e) = store.append(&batch_id, &operation).await {
                            error!(
                                "Failed to checkpoint operation {} in batch {}: {}. Stopping dispatch.",
                                operation.operation_id, batch_id, e
                            );
                            stop.cancel();
                            checkpoint_error = Some(e);
                        }
                    }
                    AttemptOutcome::Interrupted => {
                        info!(
                            "Operation {} interrupted during backoff; left pending",
                            operation.operation_id
                        );
                        operation.state = OperationState::Pending;
                    }
                }

                TaskOutcome {
                    index,
                    operation,
                    attempts,
                    checkpoint_error,
                }
            });
        }

        for (index, operation) in pending {
            results[index] = Some(OperationResult {
                operation,
                disposition: Disposition::NotDispatched,
                attempts: 0,
            });
        }

        let mut first_checkpoint_error: Option<(String, CheckpointError)> = None;
        let mut worker_failure: Option<String> = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(task) => {
                    if let Some(e) = task.checkpoint_error {
                        if first_checkpoint_error.is_none() {
                            first_checkpoint_error = Some((task.operation.operation_id.clone(), e));
                        }
                    }
                    results[task.index] = Some(OperationResult {
                        operation: task.operation,
                        disposition: Disposition::Executed,
                        attempts: task.attempts,
                    });
                }
                Err(join_error) => {
                    error!("Batch {} worker failed: {}", batch_id, join_error);
                    worker_failure.get_or_insert_with(|| join_error.to_string());
                }
            }
        }

        if let Some((operation_id, source)) = first_checkpoint_error {
            return Err(BatchError::CheckpointWrite {
                batch_id: batch_id.to_string(),
                operation_id,
                source,
            });
        }
        if let Some(message) = worker_failure {
            return Err(BatchError::Worker(message));
        }

        let results: Vec<OperationResult> = results
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| BatchError::Worker("operation result missing".to_string()))?;
        let outcome = classify_outcome(&results);

        let report = BatchReport {
            batch_id: batch_id.to_string(),
            results,
            outcome,
        };
        info!(
            "Batch {} finished: {:?} ({} executed, {} failed, {} total)",
            batch_id,
            report.outcome,
            report.executed(),
            report.failed(),
            total
        );
        Ok(report)
    }
}

/// Applies one operation through the shared retry policy. Cancellation
/// during backoff leaves the operation unapplied.
async fn apply_with_retry<F, Fut>(
    apply_fn: &F,
    operation: &BatchOperation,
    retry: &RetryPolicy,
    call_timeout: Duration,
    stop: &CancellationToken,
) -> (AttemptOutcome, u32)
where
    F: Fn(BatchOperation) -> Fut,
    Fut: Future<Output = Result<(), ServiceError>>,
{
    let mut attempts = 0u32;
    let context = operation.operation_id.as_str();
    let result = retry
        .run(context, stop, || {
            attempts += 1;
            with_deadline(call_timeout, context, apply_fn(operation.clone()))
        })
        .await;

    match result {
        Ok(()) => {
            debug!("Operation {} succeeded after {} attempt(s)", context, attempts);
            (AttemptOutcome::Terminal(OperationState::Succeeded), attempts)
        }
        Err(e) if e.is_cancelled() => (AttemptOutcome::Interrupted, attempts),
        Err(e) => {
            error!(
                "Operation {} failed ({}) after {} attempt(s): {}",
                context,
                e.class(),
                attempts,
                e
            );
            (AttemptOutcome::Terminal(OperationState::Failed(e.reason())), attempts)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{JsonlCheckpointStore, MemoryCheckpointStore};
    use crate::model::{OperationKind, OperationTarget};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn op(id: &str) -> BatchOperation {
        BatchOperation::new(
            id,
            OperationTarget {
                user_id: id.into(),
                issue_id: None,
                period_start: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            },
            OperationKind::Approve,
        )
    }

    fn ops(n: usize) -> Vec<BatchOperation> {
        (1..=n).map(|i| op(&format!("op{}", i))).collect()
    }

    fn settings(limit: usize, max_retries: u32) -> BatchSettings {
        BatchSettings {
            concurrency_limit: limit,
            retry: RetryPolicy {
                max_retries,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
                jitter: false,
            },
            call_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn permanent_failure_on_one_item_is_partial_success() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let executor = BatchExecutor::new(store.clone(), settings(2, 3));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let report = executor
            .run(
                "june",
                ops(5),
                move |op: BatchOperation| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        if op.operation_id == "op3" {
                            Err(ServiceError::NotFound("not found".into()))
                        } else {
                            Ok(())
                        }
                    }
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            report.final_states(),
            vec![
                OperationState::Succeeded,
                OperationState::Succeeded,
                OperationState::Failed("not found".into()),
                OperationState::Succeeded,
                OperationState::Succeeded,
            ]
        );
        assert_eq!(report.outcome, RunOutcome::PartialSuccess);
        assert_eq!(report.outcome.exit_code(), 2);
        // No retries for a permanent failure
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(report.results[2].attempts, 1);
        assert_eq!(store.record_count("june").await, 5);
    }

    #[tokio::test]
    async fn resume_executes_only_unfinished_operations() {
        let store = Arc::new(MemoryCheckpointStore::new());
        for id in ["op1", "op2", "op4"] {
            let mut done = op(id);
            done.state = OperationState::Succeeded;
            store.append("june", &done).await.unwrap();
        }
        let executor = BatchExecutor::new(store.clone(), settings(3, 0));
        let applied = Arc::new(Mutex::new(Vec::new()));
        let log = applied.clone();

        let report = executor
            .run(
                "june",
                ops(5),
                move |op: BatchOperation| {
                    let log = log.clone();
                    async move {
                        log.lock().unwrap().push(op.operation_id.clone());
                        Ok(())
                    }
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let mut applied = applied.lock().unwrap().clone();
        applied.sort();
        assert_eq!(applied, vec!["op3", "op5"]);
        assert_eq!(report.results.len(), 5);
        assert_eq!(report.executed(), 2);
        assert_eq!(report.results[0].disposition, Disposition::Resumed);
        assert_eq!(report.results[2].disposition, Disposition::Executed);
        assert_eq!(report.outcome, RunOutcome::Complete);
    }

    #[tokio::test]
    async fn resumed_failures_keep_their_checkpointed_state() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let mut failed = op("op1");
        failed.state = OperationState::Failed("not found".into());
        store.append("b", &failed).await.unwrap();

        let executor = BatchExecutor::new(store, settings(1, 0));
        let report = executor
            .run("b", ops(1), |_op| async { Ok(()) }, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.final_states(), vec![OperationState::Failed("not found".into())]);
        assert_eq!(report.outcome, RunOutcome::AllFailed);
        assert_eq!(report.outcome.exit_code(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_exceeds_concurrency_limit() {
        let executor = BatchExecutor::new(Arc::new(MemoryCheckpointStore::new()), settings(3, 0));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (current, max_seen) = (in_flight.clone(), peak.clone());

        let report = executor
            .run(
                "wide",
                ops(12),
                move |_op| {
                    let current = current.clone();
                    let max_seen = max_seen.clone();
                    async move {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        current.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::Complete);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_then_succeed_or_give_up() {
        let executor = BatchExecutor::new(Arc::new(MemoryCheckpointStore::new()), settings(2, 2));
        let attempts: Arc<Mutex<HashMap<String, u32>>> = Arc::default();
        let seen = attempts.clone();

        let report = executor
            .run(
                "flaky",
                vec![op("recovers"), op("stays_down")],
                move |op: BatchOperation| {
                    let seen = seen.clone();
                    async move {
                        let n = {
                            let mut map = seen.lock().unwrap();
                            let n = map.entry(op.operation_id.clone()).or_insert(0);
                            *n += 1;
                            *n
                        };
                        if op.operation_id == "recovers" && n >= 3 {
                            Ok(())
                        } else {
                            Err(ServiceError::Api {
                                status: 503,
                                message: "unavailable".into(),
                            })
                        }
                    }
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.results[0].operation.state, OperationState::Succeeded);
        assert_eq!(report.results[0].attempts, 3);
        assert!(matches!(report.results[1].operation.state, OperationState::Failed(_)));
        assert_eq!(report.results[1].attempts, 3);
        assert_eq!(report.outcome, RunOutcome::PartialSuccess);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_overrun_counts_as_transient() {
        let mut settings = settings(1, 1);
        settings.call_timeout = Duration::from_secs(2);
        let executor = BatchExecutor::new(Arc::new(MemoryCheckpointStore::new()), settings);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let report = executor
            .run(
                "slow",
                ops(1),
                move |_op| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(())
                    }
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match &report.results[0].operation.state {
            OperationState::Failed(reason) => assert!(reason.contains("timed out")),
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[tokio::test]
    async fn cancellation_stops_dispatch_and_a_rerun_finishes_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonlCheckpointStore::new(dir.path()).unwrap());
        let executor = BatchExecutor::new(store.clone(), settings(1, 0));
        let cancel = CancellationToken::new();
        let applied = Arc::new(AtomicUsize::new(0));

        let trigger = cancel.clone();
        let counter = applied.clone();
        let report = executor
            .run(
                "approve-june",
                ops(5),
                move |_op| {
                    let trigger = trigger.clone();
                    let counter = counter.clone();
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) + 1 == 2 {
                            trigger.cancel();
                        }
                        Ok(())
                    }
                },
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::Cancelled);
        assert_eq!(report.outcome.exit_code(), 4);
        assert_eq!(applied.load(Ordering::SeqCst), 2);
        // The in-flight operation finished and was recorded
        assert_eq!(report.results[1].operation.state, OperationState::Succeeded);
        for result in &report.results[2..] {
            assert_eq!(result.operation.state, OperationState::Pending);
            assert_eq!(result.disposition, Disposition::NotDispatched);
        }
        assert_eq!(store.load("approve-june").await.unwrap().len(), 2);

        // Fresh executor, same batch id
        let executor = BatchExecutor::new(store.clone(), settings(1, 0));
        let counter = applied.clone();
        let report = executor
            .run(
                "approve-june",
                ops(5),
                move |_op| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(report.outcome, RunOutcome::Complete);
        assert_eq!(report.executed(), 3);
        assert_eq!(applied.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_leaves_operation_pending() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let mut settings = settings(1, 5);
        settings.retry.base_delay = Duration::from_secs(10);
        let executor = BatchExecutor::new(store.clone(), settings);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let report = executor
            .run(
                "b",
                ops(1),
                |_op| async { Err(ServiceError::RateLimitExceeded) },
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(report.results[0].operation.state, OperationState::Pending);
        assert_eq!(report.results[0].attempts, 1);
        assert_eq!(report.outcome, RunOutcome::Cancelled);
        assert_eq!(store.record_count("b").await, 0);
    }

    #[tokio::test]
    async fn duplicate_operation_ids_are_applied_once() {
        let executor = BatchExecutor::new(Arc::new(MemoryCheckpointStore::new()), settings(2, 0));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let report = executor
            .run(
                "dup",
                vec![op("a"), op("b"), op("a")],
                move |_op| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.results[2].disposition, Disposition::Duplicate);
        assert!(matches!(report.results[2].operation.state, OperationState::Skipped(_)));
        assert_eq!(report.outcome, RunOutcome::Complete);
    }

    struct BrokenStore;

    #[async_trait]
    impl CheckpointStore for BrokenStore {
        async fn load(&self, _batch_id: &str) -> Result<Vec<BatchOperation>, CheckpointError> {
            Ok(Vec::new())
        }

        async fn append(&self, _batch_id: &str, _operation: &BatchOperation) -> Result<(), CheckpointError> {
            Err(crate::error::io_context(
                std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
                "append",
            ))
        }
    }

    #[tokio::test]
    async fn checkpoint_write_failure_stops_new_dispatches() {
        let executor = BatchExecutor::new(Arc::new(BrokenStore), settings(1, 0));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result = executor
            .run(
                "b",
                ops(4),
                move |_op| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(result, Err(BatchError::CheckpointWrite { ref operation_id, .. }) if operation_id == "op1"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_concurrency_is_rejected() {
        let executor = BatchExecutor::new(Arc::new(MemoryCheckpointStore::new()), settings(0, 0));
        let result = executor
            .run("b", ops(1), |_op| async { Ok(()) }, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(BatchError::InvalidConcurrency)));
    }

    #[test]
    fn empty_batch_is_complete() {
        assert_eq!(classify_outcome(&[]), RunOutcome::Complete);
    }
}
