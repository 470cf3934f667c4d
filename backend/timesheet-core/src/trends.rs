// src/trends.rs
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::EvaluationError;
use crate::model::{AnomalyKind, ComplianceStatus, ComplianceVerdict, UserId};

/// How much a period counts towards the completion rate.
pub trait PeriodWeighting: Send + Sync {
    /// `index` is 0 for the most recent period, 1 for the one before it, etc.
    fn weight(&self, index: usize) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UniformWeighting;

impl PeriodWeighting for UniformWeighting {
    fn weight(&self, _index: usize) -> f64 {
        1.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendStats {
    pub user_id: UserId,
    pub periods: usize,
    pub complete: usize,
    pub incomplete: usize,
    pub exempt: usize,
    /// Complete / (Complete + Incomplete). None when every period was exempt.
    pub completion_rate: Option<f64>,
    /// Consecutive most recent periods with a late submission.
    pub late_streak: usize,
    pub anomaly_counts_by_kind: BTreeMap<AnomalyKind, usize>,
}

/// Folds per-period verdicts into per-user statistics. Holds no state.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrendAggregator;

impl TrendAggregator {
    pub fn new() -> Self {
        Self
    }

    pub fn aggregate(
        &self,
        verdicts: &[ComplianceVerdict],
        user_id: &str,
    ) -> Result<TrendStats, EvaluationError> {
        self.aggregate_weighted(verdicts, user_id, &UniformWeighting)
    }

    /// Verdicts of other users are ignored; input order does not matter.
    pub fn aggregate_weighted(
        &self,
        verdicts: &[ComplianceVerdict],
        user_id: &str,
        weighting: &dyn PeriodWeighting,
    ) -> Result<TrendStats, EvaluationError> {
        let mut own: Vec<&ComplianceVerdict> =
            verdicts.iter().filter(|v| v.user_id == user_id).collect();

        let mut seen = HashSet::new();
        for verdict in &own {
            if !seen.insert((verdict.period.start, verdict.period.end)) {
                return Err(EvaluationError::DuplicatePeriod {
                    user_id: user_id.to_string(),
                    period: verdict.period.to_string(),
                });
            }
        }

        // Most recent first
        own.sort_by(|a, b| {
            b.period
                .end
                .cmp(&a.period.end)
                .then(b.period.start.cmp(&a.period.start))
        });

        let mut stats = TrendStats {
            user_id: user_id.to_string(),
            periods: own.len(),
            complete: 0,
            incomplete: 0,
            exempt: 0,
            completion_rate: None,
            late_streak: 0,
            anomaly_counts_by_kind: BTreeMap::new(),
        };

        let mut weighted_complete = 0.0;
        let mut weighted_total = 0.0;
        for (index, verdict) in own.iter().enumerate() {
            let weight = weighting.weight(index);
            match verdict.status {
                ComplianceStatus::Complete => {
                    stats.complete += 1;
                    weighted_complete += weight;
                    weighted_total += weight;
                }
                ComplianceStatus::Incomplete => {
                    stats.incomplete += 1;
                    weighted_total += weight;
                }
                ComplianceStatus::Exempt => stats.exempt += 1,
            }
            for anomaly in &verdict.anomalies {
                *stats.anomaly_counts_by_kind.entry(anomaly.kind).or_insert(0) += 1;
            }
        }

        if weighted_total > 0.0 {
            stats.completion_rate = Some((weighted_complete / weighted_total).clamp(0.0, 1.0));
        }

        stats.late_streak = own
            .iter()
            .take_while(|v| v.has_anomaly(AnomalyKind::LateSubmission))
            .count();

        Ok(stats)
    }
}
