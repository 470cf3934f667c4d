// src/tempo_client.rs
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    Client, Method, RequestBuilder,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::approval::{ApprovalStatus, TimesheetApproval};
use crate::error::ServiceError;
use crate::model::{BatchOperation, OperationKind, Roster, RosterMember, UserId, WorkLogEntry};
use crate::period::Period;
use crate::service::TimesheetService;

const MYSELF_ENDPOINT: &str = "rest/api/2/myself";
const TEAMS_ENDPOINT: &str = "rest/tempo-teams/2/team/";
const TEAM_MEMBERS_ENDPOINT: &str = "rest/tempo-teams/2/team";
const WORKLOG_SEARCH_ENDPOINT: &str = "rest/tempo-timesheets/4/worklogs/search";
const APPROVAL_ENDPOINT: &str = "rest/tempo-timesheets/4/timesheet-approval";

// --- Public types ---

/// The account the API token belongs to.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct TeamSummary {
    pub id: u64,
    pub name: String,
    pub lead_key: Option<String>,
    pub lead_name: Option<String>,
    /// True when the current user leads this team.
    pub led_by_me: bool,
}

// --- Wire types ---

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
struct TeamRecord {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    lead: Option<String>,
    #[serde(default)]
    lead_user: Option<LeadUser>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
struct LeadUser {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    displayname: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
struct TeamMemberRecord {
    #[serde(default)]
    member: MemberInfo,
    #[serde(default)]
    membership: Option<MembershipInfo>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
struct MemberInfo {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    displayname: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
struct MembershipInfo {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
struct WorklogRecord {
    worker: String,
    /// "YYYY-MM-DD HH:MM:SS.fff"; only the date part matters.
    started: String,
    time_spent_seconds: i64,
    #[serde(default)]
    issue: Option<IssueRef>,
    #[serde(default)]
    date_created: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
struct IssueRef {
    key: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
struct ApprovalResponse {
    #[serde(default)]
    approvals: Vec<ApprovalRecord>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
struct ApprovalRecord {
    user: ApprovalUser,
    status: String,
    #[serde(default)]
    worked_seconds: u64,
    #[serde(default)]
    submitted_seconds: u64,
    #[serde(default)]
    required_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
struct ApprovalUser {
    key: String,
    #[serde(default)]
    display_name: Option<String>,
}

// --- Conversions ---

fn parse_wire_date(raw: &str) -> Option<NaiveDate> {
    let date_part = raw.get(..10)?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

fn roster_from_records(team_id: &str, records: Vec<TeamMemberRecord>) -> Roster {
    let members = records
        .into_iter()
        .filter_map(|record| {
            let user_id = record.member.key.or(record.member.name.clone())?;
            let active = record
                .membership
                .and_then(|m| m.status)
                .map(|s| s.eq_ignore_ascii_case("active"))
                .unwrap_or(true);
            Some(RosterMember {
                user_id,
                display_name: record.member.displayname.or(record.member.name),
                active,
            })
        })
        .collect();
    Roster {
        team_id: team_id.to_string(),
        members,
    }
}

fn teams_from_records(records: Vec<TeamRecord>, current_key: &str) -> Vec<TeamSummary> {
    records
        .into_iter()
        .map(|record| {
            let lead_key = record.lead_user.as_ref().and_then(|u| u.key.clone());
            let lead_name = record
                .lead_user
                .and_then(|u| u.displayname.or(u.name))
                .or(record.lead);
            TeamSummary {
                id: record.id,
                name: record.name,
                led_by_me: !current_key.is_empty() && lead_key.as_deref() == Some(current_key),
                lead_key,
                lead_name,
            }
        })
        .collect()
}

fn entry_from_record(record: WorklogRecord) -> Result<WorkLogEntry, ServiceError> {
    let date = parse_wire_date(&record.started).ok_or_else(|| {
        ServiceError::Malformed(format!("worklog start '{}' is not a date", record.started))
    })?;
    Ok(WorkLogEntry {
        user_id: record.worker,
        date,
        hours_logged: (Decimal::from(record.time_spent_seconds) / dec!(3600)).round_dp(4),
        issue_id: record.issue.map(|i| i.key).unwrap_or_default(),
        logged_at: record.date_created.as_deref().and_then(parse_wire_date),
    })
}

fn approval_from_record(record: ApprovalRecord) -> TimesheetApproval {
    TimesheetApproval {
        user_id: record.user.key,
        display_name: record.user.display_name,
        status: ApprovalStatus::from(record.status),
        worked_seconds: record.worked_seconds,
        submitted_seconds: record.submitted_seconds,
        required_seconds: record.required_seconds,
    }
}

fn action_name(kind: &OperationKind) -> &'static str {
    match kind {
        OperationKind::Approve => "approve",
        OperationKind::Reject => "reject",
        OperationKind::Reopen => "reopen",
    }
}

/// Empty bodies decode as `T::default()`; Tempo answers some calls with nothing.
fn decode_body<T: DeserializeOwned + Default>(bytes: &[u8], context_msg: &str) -> Result<T, ServiceError> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        debug!("Empty response body for '{}'", context_msg);
        return Ok(T::default());
    }
    serde_json::from_slice::<T>(bytes).map_err(|e| {
        error!("JSON deserialization failed for '{}': {}", context_msg, e);
        ServiceError::Malformed(format!("{}: {}", context_msg, e))
    })
}

// --- Client ---

/// Tempo Server REST client authenticated with a pre-issued bearer token.
pub struct TempoClient {
    base_url: String,
    api_token: String,
    timeout: Duration,
    http_client: Client,
}

impl TempoClient {
    pub fn new(base_url: &str, api_token: &str, timeout: Duration) -> Result<Self, ServiceError> {
        if api_token.trim().is_empty() {
            return Err(ServiceError::Config("API token is empty".to_string()));
        }
        // Validate early so every endpoint join below is infallible in practice
        Url::parse(base_url)?;
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            timeout,
            http_client,
        })
    }

    fn build_request(&self, method: Method, endpoint: &str) -> Result<RequestBuilder, ServiceError> {
        let url = format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'));
        Url::parse(&url)?;
        Ok(self
            .http_client
            .request(method, &url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_token))
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json"))
    }

    async fn send_and_deserialize<T: DeserializeOwned + Default>(
        &self,
        request_builder: RequestBuilder,
        context_msg: &str,
    ) -> Result<T, ServiceError> {
        let request = request_builder.build().map_err(|e| {
            error!("Request build failed for '{}': {}", context_msg, e);
            ServiceError::Config(e.to_string())
        })?;
        let request_url = request.url().to_string();
        debug!("Sending request for '{}' to URL: {}", context_msg, request_url);

        let resp = self.http_client.execute(request).await.map_err(|e| {
            error!(
                "HTTP execution failed before receiving response for '{}' (URL: {}): {}",
                context_msg, request_url, e
            );
            if e.is_timeout() {
                ServiceError::Timeout {
                    context: context_msg.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                }
            } else {
                ServiceError::from(e)
            }
        })?;

        let status = resp.status();
        info!(
            "Received response for '{}' (URL: {}): Status={}",
            context_msg, request_url, status
        );

        if status.is_success() {
            let bytes = resp.bytes().await.map_err(|e| {
                error!("Failed to read response body bytes for '{}': {}", context_msg, e);
                ServiceError::from(e)
            })?;
            decode_body(&bytes, context_msg)
        } else {
            let error_body = resp
                .text()
                .await
                .unwrap_or_else(|e| format!("Failed to read error body: {}", e));
            error!(
                "API Error Response: Status={}, Body='{}' for URL: {}",
                status, error_body, request_url
            );
            let err = ServiceError::from_status(status.as_u16(), error_body);
            if matches!(err, ServiceError::RateLimitExceeded) {
                warn!("Rate limit exceeded for '{}' (URL: {})", context_msg, request_url);
            }
            Err(err)
        }
    }

    /// The user the API token authenticates as.
    pub async fn myself(&self) -> Result<CurrentUser, ServiceError> {
        let request = self.build_request(Method::GET, MYSELF_ENDPOINT)?;
        let user: CurrentUser = self.send_and_deserialize(request, "current user").await?;
        if user.key.is_empty() {
            return Err(ServiceError::Malformed("current user has no key".to_string()));
        }
        Ok(user)
    }

    /// Every team visible to the token, flagged where the current user is the lead.
    pub async fn teams(&self) -> Result<Vec<TeamSummary>, ServiceError> {
        let me = self.myself().await?;
        let request = self
            .build_request(Method::GET, TEAMS_ENDPOINT)?
            .query(&[("expand", "leaduser"), ("expand", "teamprogram")]);
        let records: Vec<TeamRecord> = self.send_and_deserialize(request, "teams").await?;
        info!("Found {} teams for {}", records.len(), me.name);
        Ok(teams_from_records(records, &me.key))
    }
}

#[async_trait]
impl TimesheetService for TempoClient {
    async fn fetch_worklogs(
        &self,
        team_id: &str,
        period: &Period,
        workers: &[UserId],
    ) -> Result<Vec<WorkLogEntry>, ServiceError> {
        if workers.is_empty() {
            info!("No workers given for team {}; no worklogs to fetch", team_id);
            return Ok(Vec::new());
        }

        let body = json!({
            "from": period.start.format("%Y-%m-%d").to_string(),
            "to": period.end.format("%Y-%m-%d").to_string(),
            "worker": workers,
        });
        let request = self
            .build_request(Method::POST, WORKLOG_SEARCH_ENDPOINT)?
            .json(&body);
        let records: Vec<WorklogRecord> = self
            .send_and_deserialize(request, &format!("worklogs team {} {}", team_id, period))
            .await?;
        records.into_iter().map(entry_from_record).collect()
    }

    async fn fetch_roster(&self, team_id: &str) -> Result<Roster, ServiceError> {
        let endpoint = format!("{}/{}/member", TEAM_MEMBERS_ENDPOINT, team_id);
        let request = self.build_request(Method::GET, &endpoint)?;
        let records: Vec<TeamMemberRecord> = self
            .send_and_deserialize(request, &format!("roster team {}", team_id))
            .await?;
        Ok(roster_from_records(team_id, records))
    }

    async fn fetch_approvals(
        &self,
        team_id: &str,
        period: &Period,
    ) -> Result<Vec<TimesheetApproval>, ServiceError> {
        let period_start = period.start.format("%Y-%m-%d").to_string();
        let request = self
            .build_request(Method::GET, APPROVAL_ENDPOINT)?
            .query(&[("teamId", team_id), ("periodStartDate", period_start.as_str())]);
        let response: ApprovalResponse = self
            .send_and_deserialize(request, &format!("approvals team {} {}", team_id, period))
            .await?;
        Ok(response.approvals.into_iter().map(approval_from_record).collect())
    }

    async fn apply_operation(&self, operation: &BatchOperation) -> Result<(), ServiceError> {
        let body = json!({
            "user": { "key": operation.target.user_id },
            "period": { "dateFrom": operation.target.period_start.format("%Y-%m-%d").to_string() },
            "action": {
                "name": action_name(&operation.kind),
                "comment": operation.comment.clone().unwrap_or_default(),
            },
        });
        let request = self.build_request(Method::POST, APPROVAL_ENDPOINT)?.json(&body);
        let _: serde_json::Value = self
            .send_and_deserialize(request, &format!("apply {}", operation.operation_id))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_token_and_bad_url() {
        assert!(matches!(
            TempoClient::new("https://jira.example.com", " ", Duration::from_secs(5)),
            Err(ServiceError::Config(_))
        ));
        assert!(matches!(
            TempoClient::new("not a url", "token", Duration::from_secs(5)),
            Err(ServiceError::Config(_))
        ));
    }

    #[test]
    fn empty_body_decodes_as_default() {
        let members: Vec<TeamMemberRecord> = decode_body(b"", "roster").unwrap();
        assert!(members.is_empty());
        let approvals: ApprovalResponse = decode_body(b"  \n", "approvals").unwrap();
        assert!(approvals.approvals.is_empty());
        assert!(matches!(
            decode_body::<Vec<TeamMemberRecord>>(b"{oops", "roster"),
            Err(ServiceError::Malformed(_))
        ));
    }

    #[test]
    fn roster_uses_member_key_and_membership_status() {
        let raw = r#"[
            {"id": 5699, "member": {"name": "arminas.b", "key": "JIRAUSER57951", "displayname": "Arminas B"},
             "membership": {"status": "active"}},
            {"id": 5700, "member": {"name": "gone.user", "key": "JIRAUSER1"},
             "membership": {"status": "inactive"}},
            {"id": 5701, "member": {}}
        ]"#;
        let records: Vec<TeamMemberRecord> = decode_body(raw.as_bytes(), "roster").unwrap();
        let roster = roster_from_records("591", records);
        assert_eq!(roster.members.len(), 2);
        assert_eq!(roster.members[0].user_id, "JIRAUSER57951");
        assert_eq!(roster.members[0].display_name.as_deref(), Some("Arminas B"));
        let active: Vec<&str> = roster.active_members().map(|m| m.user_id.as_str()).collect();
        assert_eq!(active, vec!["JIRAUSER57951"]);
    }

    #[test]
    fn worklog_seconds_become_hours() {
        let raw = r#"[{"worker": "JIRAUSER1", "started": "2024-06-03 00:00:00.000",
                       "timeSpentSeconds": 27000, "issue": {"key": "OPS-12"},
                       "dateCreated": "2024-07-02 09:15:00.000"}]"#;
        let records: Vec<WorklogRecord> = decode_body(raw.as_bytes(), "worklogs").unwrap();
        let entry = entry_from_record(records[0].clone()).unwrap();
        assert_eq!(entry.hours_logged, dec!(7.5));
        assert_eq!(entry.date, NaiveDate::from_ymd_opt(2024, 6, 3).unwrap());
        assert_eq!(entry.issue_id, "OPS-12");
        assert_eq!(entry.logged_at, NaiveDate::from_ymd_opt(2024, 7, 2));
    }

    #[test]
    fn worklog_with_bad_start_is_malformed() {
        let record = WorklogRecord {
            worker: "u".into(),
            started: "yesterday".into(),
            time_spent_seconds: 60,
            issue: None,
            date_created: None,
        };
        assert!(matches!(entry_from_record(record), Err(ServiceError::Malformed(_))));
    }

    #[test]
    fn approval_records_map_status() {
        let raw = r#"{"team": {"id": 591}, "period": {"dateFrom": "2024-06-01"},
            "approvals": [{"user": {"name": "marek", "key": "JIRAUSER55035", "displayName": "Marek"},
                           "status": "waiting_for_approval", "workedSeconds": 576000,
                           "submittedSeconds": 576000, "requiredSeconds": 576000}]}"#;
        let response: ApprovalResponse = decode_body(raw.as_bytes(), "approvals").unwrap();
        let approval = approval_from_record(response.approvals[0].clone());
        assert_eq!(approval.user_id, "JIRAUSER55035");
        assert_eq!(approval.status, ApprovalStatus::WaitingForApproval);
        assert_eq!(approval.completion_percent(), 100.0);
    }

    #[test]
    fn current_user_decodes_camel_case_fields() {
        let raw = r#"{"self": "https://jira.example.com/rest/api/2/user?username=marek",
            "key": "JIRAUSER55035", "name": "marek", "emailAddress": "marek@example.com",
            "displayName": "Marek K", "active": true}"#;
        let user: CurrentUser = decode_body(raw.as_bytes(), "current user").unwrap();
        assert_eq!(user.key, "JIRAUSER55035");
        assert_eq!(user.email_address.as_deref(), Some("marek@example.com"));
        assert_eq!(user.display_name.as_deref(), Some("Marek K"));
    }

    #[test]
    fn teams_flag_the_ones_led_by_current_user() {
        let raw = r#"[
            {"id": 591, "name": "Platform", "lead": "marek",
             "leadUser": {"name": "marek", "key": "JIRAUSER55035", "displayname": "Marek K"},
             "program": {"id": 3, "name": "Core"}},
            {"id": 602, "name": "Support", "lead": "anna",
             "leadUser": {"name": "anna", "key": "JIRAUSER1"}},
            {"id": 610, "name": "Orphans"}
        ]"#;
        let records: Vec<TeamRecord> = decode_body(raw.as_bytes(), "teams").unwrap();
        let teams = teams_from_records(records, "JIRAUSER55035");
        assert_eq!(teams.len(), 3);
        assert!(teams[0].led_by_me);
        assert_eq!(teams[0].lead_name.as_deref(), Some("Marek K"));
        assert!(!teams[1].led_by_me);
        assert_eq!(teams[1].lead_name.as_deref(), Some("anna"));
        assert_eq!(teams[2].lead_key, None);
        assert!(!teams[2].led_by_me);

        let empty: Vec<TeamRecord> = decode_body(b"", "teams").unwrap();
        assert!(teams_from_records(empty, "JIRAUSER55035").is_empty());
    }

    #[test]
    fn teams_request_repeats_the_expand_parameter() {
        let client = TempoClient::new("https://jira.example.com/", "token", Duration::from_secs(5)).unwrap();
        let request = client
            .build_request(Method::GET, TEAMS_ENDPOINT)
            .unwrap()
            .query(&[("expand", "leaduser"), ("expand", "teamprogram")])
            .build()
            .unwrap();
        assert_eq!(
            request.url().as_str(),
            "https://jira.example.com/rest/tempo-teams/2/team/?expand=leaduser&expand=teamprogram"
        );
    }
}
