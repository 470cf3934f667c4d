// src/fetcher.rs
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::approval::TimesheetApproval;
use crate::error::ServiceError;
use crate::model::{Roster, UserId, WorkLogEntry};
use crate::period::Period;
use crate::response_cache::{short_digest, Fingerprint, ResponseCache};
use crate::retry::{with_deadline, RetryPolicy};
use crate::service::TimesheetService;

/// Cached, retried and deadline-bounded access to the timesheet service.
///
/// Retries happen inside the cache's single-flight section, so callers
/// queued on the same fingerprint share one retry sequence. Every read
/// takes the run's cancellation token; waiting on another caller's fetch,
/// the fetch itself and retry backoff all end when it fires.
#[derive(Clone)]
pub struct WorkLogFetcher {
    service: Arc<dyn TimesheetService>,
    cache: Arc<ResponseCache>,
    ttl: Duration,
    retry: RetryPolicy,
    call_timeout: Duration,
}

/// Fingerprint prefix shared by every cached response of a team.
/// The team id is hashed so one team's prefix never matches another's.
pub fn team_prefix(team_id: &str) -> String {
    format!("team_{}_", short_digest(team_id))
}

impl WorkLogFetcher {
    pub fn new(
        service: Arc<dyn TimesheetService>,
        cache: Arc<ResponseCache>,
        ttl: Duration,
        retry: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            service,
            cache,
            ttl,
            retry,
            call_timeout,
        }
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    fn fingerprint(team_id: &str, resource: &str, params: &[(&str, &str)]) -> Fingerprint {
        Fingerprint::new(&format!("{}{}", team_prefix(team_id), resource), params)
    }

    async fn cached<T, C, Fut>(
        &self,
        fingerprint: &Fingerprint,
        context: &str,
        force_refresh: bool,
        cancel: &CancellationToken,
        call: C,
    ) -> Result<T, ServiceError>
    where
        T: Serialize + DeserializeOwned,
        C: Fn() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let read = self.cache.get_or_fetch(
            fingerprint,
            || {
                self.retry.run(context, cancel, || {
                    with_deadline(self.call_timeout, context, call())
                })
            },
            self.ttl,
            force_refresh,
        );
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ServiceError::Cancelled {
                context: context.to_string(),
            }),
            result = read => result,
        };
        result.map_err(|e| {
            if !e.is_cancelled() {
                error!("Failed to fetch {} ({}): {}", context, e.class(), e);
            }
            e
        })
    }

    /// Work log entries of `workers` in `period`. `workers` normally comes from
    /// the team's cached roster, so the service doesn't look the roster up again.
    pub async fn fetch_entries(
        &self,
        team_id: &str,
        period: &Period,
        workers: &[UserId],
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<WorkLogEntry>, ServiceError> {
        info!(
            "Fetching worklogs for team {} {} ({} workers, force_refresh={})",
            team_id,
            period,
            workers.len(),
            force_refresh
        );
        let mut sorted: Vec<&str> = workers.iter().map(|w| w.as_str()).collect();
        sorted.sort_unstable();
        let workers_key = short_digest(&sorted.join(","));
        let fingerprint = Self::fingerprint(
            team_id,
            "worklogs",
            &[
                ("period", &period.fingerprint_component()),
                ("workers", &workers_key),
            ],
        );
        let context = format!("worklogs team {} {}", team_id, period);
        self.cached(&fingerprint, &context, force_refresh, cancel, || {
            self.service.fetch_worklogs(team_id, period, workers)
        })
        .await
    }

    pub async fn fetch_roster(
        &self,
        team_id: &str,
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<Roster, ServiceError> {
        info!("Fetching roster for team {} (force_refresh={})", team_id, force_refresh);
        let fingerprint = Self::fingerprint(team_id, "roster", &[]);
        let context = format!("roster team {}", team_id);
        self.cached(&fingerprint, &context, force_refresh, cancel, || {
            self.service.fetch_roster(team_id)
        })
        .await
    }

    pub async fn fetch_approvals(
        &self,
        team_id: &str,
        period: &Period,
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<TimesheetApproval>, ServiceError> {
        info!("Fetching approvals for team {} {} (force_refresh={})", team_id, period, force_refresh);
        let fingerprint = Self::fingerprint(
            team_id,
            "approvals",
            &[("period", &period.fingerprint_component())],
        );
        let context = format!("approvals team {} {}", team_id, period);
        self.cached(&fingerprint, &context, force_refresh, cancel, || {
            self.service.fetch_approvals(team_id, period)
        })
        .await
    }

    /// Drops every cached response of the team. Returns how many entries were removed.
    pub async fn invalidate_team(&self, team_id: &str) -> usize {
        self.cache.invalidate_prefix(&team_prefix(team_id)).await
    }
}
