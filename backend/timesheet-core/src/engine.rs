// src/engine.rs
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::approval::{plan_approvals, ApprovalPlan, HeldBack, TimesheetApproval};
use crate::batch::{BatchExecutor, BatchReport, BatchSettings};
use crate::checkpoint::{CheckpointStore, JsonlCheckpointStore};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::evaluator::ComplianceEvaluator;
use crate::fetcher::WorkLogFetcher;
use crate::model::{BatchOperation, ComplianceVerdict, ExceptionEntry, Roster, UserId};
use crate::period::Period;
use crate::policy::CompliancePolicy;
use crate::response_cache::ResponseCache;
use crate::retry::RetryPolicy;
use crate::service::TimesheetService;
use crate::trends::{TrendAggregator, TrendStats};

/// Result of an approval run: who was held back and what happened to the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRun {
    pub held_back: Vec<HeldBack>,
    pub report: BatchReport,
}

/// Entry point for evaluation, trend and batch requests.
///
/// Every call takes team, period and exceptions explicitly; the engine
/// keeps no per-session state beyond the response cache and checkpoint store.
pub struct ComplianceEngine {
    service: Arc<dyn TimesheetService>,
    fetcher: WorkLogFetcher,
    evaluator: ComplianceEvaluator,
    aggregator: TrendAggregator,
    policy: CompliancePolicy,
    executor: BatchExecutor,
}

impl ComplianceEngine {
    pub fn new(
        service: Arc<dyn TimesheetService>,
        cache: Arc<ResponseCache>,
        store: Arc<dyn CheckpointStore>,
        policy: CompliancePolicy,
        cache_ttl: Duration,
        retry: RetryPolicy,
        batch: BatchSettings,
    ) -> Self {
        let fetcher = WorkLogFetcher::new(
            service.clone(),
            cache,
            cache_ttl,
            retry,
            batch.call_timeout,
        );
        Self {
            service,
            fetcher,
            evaluator: ComplianceEvaluator::new(),
            aggregator: TrendAggregator::new(),
            policy,
            executor: BatchExecutor::new(store, batch),
        }
    }

    /// Wires the engine from configuration with a JSON-lines checkpoint store.
    pub fn from_config(
        config: &EngineConfig,
        service: Arc<dyn TimesheetService>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        let mut cache = ResponseCache::new(clock);
        if let Some(dir) = &config.cache_dir {
            cache = cache.with_disk_mirror(dir);
        }
        let store = JsonlCheckpointStore::new(&config.checkpoint_dir)?;
        info!(
            "Engine configured: checkpoints in {:?}, cache TTL {}s, concurrency {}",
            store.dir(),
            config.cache_ttl_secs,
            config.concurrency_limit
        );
        Ok(Self::new(
            service,
            Arc::new(cache),
            Arc::new(store),
            config.policy(),
            config.cache_ttl(),
            config.retry_policy(),
            config.batch_settings(),
        ))
    }

    pub fn policy(&self) -> &CompliancePolicy {
        &self.policy
    }

    pub fn fetcher(&self) -> &WorkLogFetcher {
        &self.fetcher
    }

    fn active_workers(roster: &Roster) -> Vec<UserId> {
        roster.active_members().map(|m| m.user_id.clone()).collect()
    }

    /// One verdict per active roster member, in roster order.
    pub async fn evaluate_team(
        &self,
        team_id: &str,
        period: &Period,
        exceptions: &[ExceptionEntry],
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<ComplianceVerdict>, EngineError> {
        let roster = self
            .fetcher
            .fetch_roster(team_id, force_refresh, cancel)
            .await?;
        let workers = Self::active_workers(&roster);
        let entries = self
            .fetcher
            .fetch_entries(team_id, period, &workers, force_refresh, cancel)
            .await?;

        let verdicts = roster
            .active_members()
            .map(|member| {
                self.evaluator
                    .evaluate(&member.user_id, period, &entries, exceptions, &self.policy)
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            "Evaluated {} members of team {} for {}",
            verdicts.len(),
            team_id,
            period
        );
        Ok(verdicts)
    }

    /// Completion statistics for one user across `periods`.
    pub async fn trends(
        &self,
        team_id: &str,
        user_id: &str,
        periods: &[Period],
        exceptions: &[ExceptionEntry],
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<TrendStats, EngineError> {
        let roster = self
            .fetcher
            .fetch_roster(team_id, force_refresh, cancel)
            .await?;
        let mut workers = Self::active_workers(&roster);
        if !workers.iter().any(|w| w == user_id) {
            workers.push(user_id.to_string());
        }

        let mut verdicts = Vec::with_capacity(periods.len());
        for period in periods {
            let entries = self
                .fetcher
                .fetch_entries(team_id, period, &workers, force_refresh, cancel)
                .await?;
            verdicts.push(
                self.evaluator
                    .evaluate(user_id, period, &entries, exceptions, &self.policy)?,
            );
        }
        Ok(self.aggregator.aggregate(&verdicts, user_id)?)
    }

    /// Applies `operations` through the service. Mutations bypass the response cache.
    pub async fn run_batch(
        &self,
        batch_id: &str,
        operations: Vec<BatchOperation>,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, EngineError> {
        let service = self.service.clone();
        let report = self
            .executor
            .run(
                batch_id,
                operations,
                move |operation: BatchOperation| {
                    let service = service.clone();
                    async move { service.apply_operation(&operation).await }
                },
                cancel,
            )
            .await?;
        Ok(report)
    }

    pub async fn approval_status(
        &self,
        team_id: &str,
        period: &Period,
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<TimesheetApproval>, EngineError> {
        Ok(self
            .fetcher
            .fetch_approvals(team_id, period, force_refresh, cancel)
            .await?)
    }

    pub async fn plan_team_approval(
        &self,
        team_id: &str,
        period: &Period,
        exceptions: &[ExceptionEntry],
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<ApprovalPlan, EngineError> {
        let verdicts = self
            .evaluate_team(team_id, period, exceptions, force_refresh, cancel)
            .await?;
        // Approval state must be current before mutating it
        let approvals = self.approval_status(team_id, period, true, cancel).await?;
        Ok(plan_approvals(team_id, period, &approvals, &verdicts))
    }

    /// Evaluates the team, approves compliant timesheets waiting for approval,
    /// and drops the team's cached responses once something was applied.
    /// `force_refresh` re-fetches roster and worklogs before planning.
    pub async fn approve_team(
        &self,
        batch_id: &str,
        team_id: &str,
        period: &Period,
        exceptions: &[ExceptionEntry],
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<ApprovalRun, EngineError> {
        let plan = self
            .plan_team_approval(team_id, period, exceptions, force_refresh, cancel)
            .await?;
        for held in &plan.held_back {
            warn!("Not approving {}: {}", held.user_id, held.reason);
        }

        let report = self.run_batch(batch_id, plan.operations, cancel).await?;
        if report.executed() > 0 {
            self.invalidate_team(team_id).await;
        }
        Ok(ApprovalRun {
            held_back: plan.held_back,
            report,
        })
    }

    /// Drops every cached response of the team.
    pub async fn invalidate_team(&self, team_id: &str) -> usize {
        let removed = self.fetcher.invalidate_team(team_id).await;
        info!("Invalidated {} cached responses for team {}", removed, team_id);
        removed
    }
}
