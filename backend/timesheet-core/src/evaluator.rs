// src/evaluator.rs
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::EvaluationError;
use crate::model::{
    Anomaly, AnomalyKind, ComplianceStatus, ComplianceVerdict, DateSpan, ExceptionEntry, WorkLogEntry,
};
use crate::period::Period;
use crate::policy::CompliancePolicy;

/// Turns one user's entries for one period into a verdict.
///
/// Stateless: the verdict depends only on the arguments, so evaluating the
/// same inputs twice produces identical verdicts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComplianceEvaluator;

impl ComplianceEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(
        &self,
        user_id: &str,
        period: &Period,
        entries: &[WorkLogEntry],
        exceptions: &[ExceptionEntry],
        policy: &CompliancePolicy,
    ) -> Result<ComplianceVerdict, EvaluationError> {
        if period.start > period.end {
            return Err(EvaluationError::InvalidPeriod {
                start: period.start,
                end: period.end,
            });
        }

        if let Some(exception) = exceptions
            .iter()
            .find(|e| e.user_id == user_id && covers_same_days(&e.period, period))
        {
            debug!("User {} exempt for {}: {}", user_id, period, exception.reason);
            return Ok(verdict(user_id, period, ComplianceStatus::Exempt, Vec::new()));
        }

        let expected_days = policy.expected_working_days(period);
        if expected_days.is_empty() {
            return Ok(verdict(user_id, period, ComplianceStatus::Complete, Vec::new()));
        }

        // Only this user's entries inside the period count
        let in_period: Vec<&WorkLogEntry> = entries
            .iter()
            .filter(|e| e.user_id == user_id && period.contains(e.date))
            .collect();

        let mut hours_by_day: BTreeMap<NaiveDate, Decimal> = BTreeMap::new();
        for entry in &in_period {
            *hours_by_day.entry(entry.date).or_insert(Decimal::ZERO) += entry.hours_logged;
        }

        let mut anomalies = Vec::new();

        for day in &expected_days {
            if !hours_by_day.contains_key(day) {
                anomalies.push(Anomaly {
                    kind: AnomalyKind::Gap,
                    span: DateSpan::Day { date: *day },
                    detail: "no time logged on a working day".to_string(),
                });
            }
        }

        for (day, total) in &hours_by_day {
            if *total > policy.max_daily_hours {
                anomalies.push(Anomaly {
                    kind: AnomalyKind::ExcessiveHours,
                    span: DateSpan::Day { date: *day },
                    detail: format!(
                        "{}h logged, limit is {}h",
                        total.normalize(),
                        policy.max_daily_hours.normalize()
                    ),
                });
            }
        }

        if let Some(last_submitted) = in_period.iter().map(|e| e.submitted_on()).max() {
            let deadline = policy
                .submission_deadline(period)
                .ok_or(EvaluationError::DateOverflow)?;
            if last_submitted > deadline {
                anomalies.push(Anomaly {
                    kind: AnomalyKind::LateSubmission,
                    span: DateSpan::Day {
                        date: last_submitted,
                    },
                    detail: format!(
                        "last entry logged {}, deadline was {}",
                        last_submitted, deadline
                    ),
                });
            }
        }

        let status = if anomalies.iter().any(|a| a.kind == AnomalyKind::Gap) {
            ComplianceStatus::Incomplete
        } else {
            ComplianceStatus::Complete
        };

        debug!(
            "Evaluated {} for {}: {:?} with {} anomalies",
            user_id,
            period,
            status,
            anomalies.len()
        );
        Ok(verdict(user_id, period, status, anomalies))
    }
}

fn covers_same_days(a: &Period, b: &Period) -> bool {
    a.start == b.start && a.end == b.end
}

fn verdict(
    user_id: &str,
    period: &Period,
    status: ComplianceStatus,
    anomalies: Vec<Anomaly>,
) -> ComplianceVerdict {
    ComplianceVerdict {
        user_id: user_id.to_string(),
        period: *period,
        status,
        anomalies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::PeriodKind;
    use rust_decimal_macros::dec;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn entry(user: &str, date: &str, hours: Decimal) -> WorkLogEntry {
        WorkLogEntry {
            user_id: user.into(),
            date: d(date),
            hours_logged: hours,
            issue_id: "OPS-1".into(),
            logged_at: None,
        }
    }

    /// Eight hours on every working day of the period.
    fn full_period(user: &str, period: &Period, policy: &CompliancePolicy) -> Vec<WorkLogEntry> {
        policy
            .expected_working_days(period)
            .into_iter()
            .map(|day| WorkLogEntry {
                user_id: user.into(),
                date: day,
                hours_logged: dec!(8),
                issue_id: "OPS-1".into(),
                logged_at: Some(day),
            })
            .collect()
    }

    #[test]
    fn june_with_two_missing_days_and_late_entry() {
        let policy = CompliancePolicy::default();
        let june = Period::month(2024, 6).unwrap();
        let mut entries = full_period("U", &june, &policy);
        // Drop 2024-06-11 and 2024-06-20
        entries.retain(|e| e.date != d("2024-06-11") && e.date != d("2024-06-20"));
        assert_eq!(entries.len(), 18);
        // Last entry recorded three days after period end
        entries.last_mut().unwrap().logged_at = Some(d("2024-07-03"));

        let verdict = ComplianceEvaluator::new()
            .evaluate("U", &june, &entries, &[], &policy)
            .unwrap();

        assert_eq!(verdict.status, ComplianceStatus::Incomplete);
        let kinds: Vec<AnomalyKind> = verdict.anomalies.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![AnomalyKind::Gap, AnomalyKind::Gap, AnomalyKind::LateSubmission]
        );
        assert_eq!(verdict.anomalies[0].span, DateSpan::Day { date: d("2024-06-11") });
        assert_eq!(verdict.anomalies[1].span, DateSpan::Day { date: d("2024-06-20") });
    }

    #[test]
    fn exemption_short_circuits_everything() {
        let policy = CompliancePolicy::default();
        let june = Period::month(2024, 6).unwrap();
        let entries = vec![entry("U", "2024-06-03", dec!(16))];
        let exceptions = vec![ExceptionEntry::new("U", june, "parental leave")];

        let verdict = ComplianceEvaluator::new()
            .evaluate("U", &june, &entries, &exceptions, &policy)
            .unwrap();
        assert_eq!(verdict.status, ComplianceStatus::Exempt);
        assert!(verdict.anomalies.is_empty());
    }

    #[test]
    fn exemption_for_another_user_or_period_does_not_apply() {
        let policy = CompliancePolicy::default();
        let june = Period::month(2024, 6).unwrap();
        let may = Period::month(2024, 5).unwrap();
        let exceptions = vec![
            ExceptionEntry::new("V", june, "leave"),
            ExceptionEntry::new("U", may, "leave"),
        ];
        let verdict = ComplianceEvaluator::new()
            .evaluate("U", &june, &[], &exceptions, &policy)
            .unwrap();
        assert_eq!(verdict.status, ComplianceStatus::Incomplete);
        assert_eq!(verdict.count(AnomalyKind::Gap), 20);
    }

    #[test]
    fn exemption_matches_equivalent_custom_range() {
        let policy = CompliancePolicy::default();
        let june = Period::month(2024, 6).unwrap();
        let same_days = Period::range(d("2024-06-01"), d("2024-06-30")).unwrap();
        assert_eq!(same_days.kind, PeriodKind::Custom);
        let exceptions = vec![ExceptionEntry::new("U", same_days, "sabbatical")];
        let verdict = ComplianceEvaluator::new()
            .evaluate("U", &june, &[], &exceptions, &policy)
            .unwrap();
        assert_eq!(verdict.status, ComplianceStatus::Exempt);
    }

    #[test]
    fn nothing_expected_means_complete_without_anomalies() {
        let policy = CompliancePolicy::default();
        let weekend = Period::range(d("2024-06-01"), d("2024-06-02")).unwrap();
        // Even a huge late weekend entry is not flagged
        let mut late = entry("U", "2024-06-01", dec!(14));
        late.logged_at = Some(d("2024-08-01"));
        let verdict = ComplianceEvaluator::new()
            .evaluate("U", &weekend, &[late], &[], &policy)
            .unwrap();
        assert_eq!(verdict.status, ComplianceStatus::Complete);
        assert!(verdict.anomalies.is_empty());
    }

    #[test]
    fn excessive_hours_sum_across_entries_of_a_day() {
        let policy = CompliancePolicy::default();
        let week = Period::parse("2024-06-03..2024-06-07").unwrap();
        let mut entries = full_period("U", &week, &policy);
        entries.push(WorkLogEntry {
            issue_id: "OPS-2".into(),
            hours_logged: dec!(2.5),
            ..entries[1].clone()
        });
        // Exactly at the limit is fine
        entries.push(WorkLogEntry {
            issue_id: "OPS-3".into(),
            hours_logged: dec!(2),
            ..entries[3].clone()
        });

        let verdict = ComplianceEvaluator::new()
            .evaluate("U", &week, &entries, &[], &policy)
            .unwrap();
        assert_eq!(verdict.status, ComplianceStatus::Complete);
        assert_eq!(verdict.anomalies.len(), 1);
        let anomaly = &verdict.anomalies[0];
        assert_eq!(anomaly.kind, AnomalyKind::ExcessiveHours);
        assert_eq!(anomaly.span, DateSpan::Day { date: d("2024-06-04") });
        assert_eq!(anomaly.detail, "10.5h logged, limit is 10h");
    }

    #[test]
    fn entries_outside_period_and_other_users_are_ignored() {
        let policy = CompliancePolicy::default();
        let week = Period::parse("2024-06-03..2024-06-07").unwrap();
        let mut entries = full_period("U", &week, &policy);
        entries.push(entry("U", "2024-06-10", dec!(20)));
        entries.push(entry("U", "2024-05-31", dec!(20)));
        entries.push(entry("V", "2024-06-05", dec!(20)));

        let verdict = ComplianceEvaluator::new()
            .evaluate("U", &week, &entries, &[], &policy)
            .unwrap();
        assert_eq!(verdict.status, ComplianceStatus::Complete);
        assert!(verdict.anomalies.is_empty());
    }

    #[test]
    fn submission_on_deadline_is_not_late() {
        let policy = CompliancePolicy::default();
        let week = Period::parse("2024-06-03..2024-06-07").unwrap();
        let mut entries = full_period("U", &week, &policy);
        entries[4].logged_at = Some(d("2024-06-08"));
        let verdict = ComplianceEvaluator::new()
            .evaluate("U", &week, &entries, &[], &policy)
            .unwrap();
        assert!(!verdict.has_anomaly(AnomalyKind::LateSubmission));

        entries[4].logged_at = Some(d("2024-06-09"));
        let verdict = ComplianceEvaluator::new()
            .evaluate("U", &week, &entries, &[], &policy)
            .unwrap();
        assert!(verdict.has_anomaly(AnomalyKind::LateSubmission));
    }

    #[test]
    fn evaluation_is_idempotent() {
        let policy = CompliancePolicy::default().with_holidays([d("2024-06-21")]);
        let june = Period::month(2024, 6).unwrap();
        let mut entries = full_period("U", &june, &policy);
        entries.truncate(12);
        entries.push(entry("U", "2024-06-05", dec!(5)));

        let evaluator = ComplianceEvaluator::new();
        let first = evaluator.evaluate("U", &june, &entries, &[], &policy).unwrap();
        let second = evaluator.evaluate("U", &june, &entries, &[], &policy).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn reversed_period_is_rejected() {
        let broken = Period {
            start: d("2024-06-30"),
            end: d("2024-06-01"),
            kind: PeriodKind::Custom,
        };
        let result = ComplianceEvaluator::new().evaluate("U", &broken, &[], &[], &CompliancePolicy::default());
        assert!(matches!(result, Err(EvaluationError::InvalidPeriod { .. })));
    }
}
