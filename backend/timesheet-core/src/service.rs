// src/service.rs
use async_trait::async_trait;

use crate::approval::TimesheetApproval;
use crate::error::ServiceError;
use crate::model::{BatchOperation, Roster, UserId, WorkLogEntry};
use crate::period::Period;

/// The external timesheet service. Every call may fail with a classified
/// `ServiceError`; implementations never retry on their own.
#[async_trait]
pub trait TimesheetService: Send + Sync {
    /// Work log entries of `workers` whose work date lies in `period`. The caller
    /// resolves the workers from the team roster; an empty slice yields no entries.
    async fn fetch_worklogs(
        &self,
        team_id: &str,
        period: &Period,
        workers: &[UserId],
    ) -> Result<Vec<WorkLogEntry>, ServiceError>;

    async fn fetch_roster(&self, team_id: &str) -> Result<Roster, ServiceError>;

    async fn fetch_approvals(
        &self,
        team_id: &str,
        period: &Period,
    ) -> Result<Vec<TimesheetApproval>, ServiceError>;

    /// Applies one batch operation. Must be idempotent per `operation_id` on the
    /// service side or tolerate re-application after a crash before checkpointing.
    async fn apply_operation(&self, operation: &BatchOperation) -> Result<(), ServiceError>;
}
