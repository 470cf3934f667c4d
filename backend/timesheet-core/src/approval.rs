// src/approval.rs
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

use crate::model::{
    BatchOperation, ComplianceStatus, ComplianceVerdict, OperationKind, OperationTarget, UserId,
};
use crate::period::Period;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ApprovalStatus {
    Open,
    WaitingForApproval,
    Approved,
    Rejected,
    Other(String),
}

impl From<String> for ApprovalStatus {
    fn from(raw: String) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "open" => ApprovalStatus::Open,
            "waiting_for_approval" => ApprovalStatus::WaitingForApproval,
            "approved" => ApprovalStatus::Approved,
            "rejected" => ApprovalStatus::Rejected,
            _ => ApprovalStatus::Other(raw),
        }
    }
}

impl From<ApprovalStatus> for String {
    fn from(status: ApprovalStatus) -> Self {
        status.to_string()
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalStatus::Open => write!(f, "open"),
            ApprovalStatus::WaitingForApproval => write!(f, "waiting_for_approval"),
            ApprovalStatus::Approved => write!(f, "approved"),
            ApprovalStatus::Rejected => write!(f, "rejected"),
            ApprovalStatus::Other(raw) => write!(f, "{}", raw),
        }
    }
}

/// One user's timesheet approval record for a period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimesheetApproval {
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub status: ApprovalStatus,
    pub worked_seconds: u64,
    pub submitted_seconds: u64,
    pub required_seconds: u64,
}

impl TimesheetApproval {
    /// Worked time as a percentage of required time; 0 when nothing is required.
    pub fn completion_percent(&self) -> f64 {
        if self.required_seconds == 0 {
            return 0.0;
        }
        self.worked_seconds as f64 / self.required_seconds as f64 * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeldBack {
    pub user_id: UserId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalPlan {
    pub operations: Vec<BatchOperation>,
    pub held_back: Vec<HeldBack>,
}

pub fn approval_operation_id(team_id: &str, period: &Period, user_id: &str) -> String {
    format!("approve:{}:{}:{}", team_id, period, user_id)
}

/// Approves every timesheet waiting for approval whose owner is Complete or Exempt.
///
/// Operation ids depend only on team, period and user, so planning the same
/// inputs again yields the same ids and a resumed batch skips what already ran.
pub fn plan_approvals(
    team_id: &str,
    period: &Period,
    approvals: &[TimesheetApproval],
    verdicts: &[ComplianceVerdict],
) -> ApprovalPlan {
    let by_user: HashMap<&str, &ComplianceVerdict> = verdicts
        .iter()
        .filter(|v| v.period == *period)
        .map(|v| (v.user_id.as_str(), v))
        .collect();

    let mut plan = ApprovalPlan {
        operations: Vec::new(),
        held_back: Vec::new(),
    };

    for approval in approvals {
        if approval.status != ApprovalStatus::WaitingForApproval {
            debug!(
                "Skipping {} for approval: status is {}",
                approval.user_id, approval.status
            );
            continue;
        }
        let hold = |reason: String| HeldBack {
            user_id: approval.user_id.clone(),
            reason,
        };
        match by_user.get(approval.user_id.as_str()) {
            Some(verdict) => match verdict.status {
                ComplianceStatus::Complete | ComplianceStatus::Exempt => {
                    let operation = BatchOperation::new(
                        approval_operation_id(team_id, period, &approval.user_id),
                        OperationTarget {
                            user_id: approval.user_id.clone(),
                            issue_id: None,
                            period_start: period.start,
                        },
                        OperationKind::Approve,
                    )
                    .with_comment(format!("Timesheet compliant for {}", period));
                    plan.operations.push(operation);
                }
                ComplianceStatus::Incomplete => {
                    let kinds: Vec<String> = verdict
                        .anomalies
                        .iter()
                        .map(|a| a.kind.to_string())
                        .collect::<std::collections::BTreeSet<_>>()
                        .into_iter()
                        .collect();
                    plan.held_back
                        .push(hold(format!("incomplete ({})", kinds.join(", "))));
                }
            },
            None => plan.held_back.push(hold("no compliance verdict".to_string())),
        }
    }

    info!(
        "Approval plan for team {} {}: {} to approve, {} held back",
        team_id,
        period,
        plan.operations.len(),
        plan.held_back.len()
    );
    plan
}
