// src/model.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::period::Period;

pub type UserId = String;
pub type TeamId = String;
pub type IssueId = String;

// --- Work log data ---

/// One recorded unit of time. Never mutated after it has been fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkLogEntry {
    pub user_id: UserId,
    pub date: NaiveDate,
    pub hours_logged: Decimal,
    pub issue_id: IssueId,
    /// Day the entry was recorded in the service, when known.
    #[serde(default)]
    pub logged_at: Option<NaiveDate>,
}

impl WorkLogEntry {
    /// Falls back to the work date when the service did not report a creation date.
    pub fn submitted_on(&self) -> NaiveDate {
        self.logged_at.unwrap_or(self.date)
    }
}

/// Caller-supplied exemption. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionEntry {
    pub user_id: UserId,
    pub period: Period,
    pub reason: String,
}

impl ExceptionEntry {
    pub fn new(user_id: impl Into<UserId>, period: Period, reason: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            period,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterMember {
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    pub team_id: TeamId,
    pub members: Vec<RosterMember>,
}

impl Roster {
    pub fn active_members(&self) -> impl Iterator<Item = &RosterMember> {
        self.members.iter().filter(|m| m.active)
    }
}

// --- Compliance results ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComplianceStatus {
    Complete,
    Incomplete,
    Exempt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnomalyKind {
    Gap,
    ExcessiveHours,
    LateSubmission,
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyKind::Gap => write!(f, "gap"),
            AnomalyKind::ExcessiveHours => write!(f, "excessive_hours"),
            AnomalyKind::LateSubmission => write!(f, "late_submission"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DateSpan {
    Day { date: NaiveDate },
    Range { start: NaiveDate, end: NaiveDate },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub span: DateSpan,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceVerdict {
    pub user_id: UserId,
    pub period: Period,
    pub status: ComplianceStatus,
    pub anomalies: Vec<Anomaly>,
}

impl ComplianceVerdict {
    pub fn has_anomaly(&self, kind: AnomalyKind) -> bool {
        self.anomalies.iter().any(|a| a.kind == kind)
    }

    pub fn count(&self, kind: AnomalyKind) -> usize {
        self.anomalies.iter().filter(|a| a.kind == kind).count()
    }
}

// --- Batch operations ---

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Approve,
    Reject,
    Reopen,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Approve => write!(f, "approve"),
            OperationKind::Reject => write!(f, "reject"),
            OperationKind::Reopen => write!(f, "reopen"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationTarget {
    pub user_id: UserId,
    pub issue_id: Option<IssueId>,
    /// First day of the timesheet period the operation acts on.
    pub period_start: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum OperationState {
    Pending,
    InFlight,
    Succeeded,
    Failed(String),
    Skipped(String),
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Succeeded | OperationState::Failed(_) | OperationState::Skipped(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOperation {
    pub operation_id: String,
    pub target: OperationTarget,
    pub kind: OperationKind,
    pub comment: Option<String>,
    pub state: OperationState,
}

impl BatchOperation {
    pub fn new(operation_id: impl Into<String>, target: OperationTarget, kind: OperationKind) -> Self {
        Self {
            operation_id: operation_id.into(),
            target,
            kind,
            comment: None,
            state: OperationState::Pending,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Moves to `next` unless the operation is already terminal.
    /// Returns false when the transition was refused.
    pub(crate) fn transition(&mut self, next: OperationState) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = next;
        true
    }
}
