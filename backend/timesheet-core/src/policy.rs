// src/policy.rs
use chrono::{Datelike, Days, NaiveDate, Weekday};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::period::Period;

/// Thresholds the evaluator applies. Passed explicitly on every evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompliancePolicy {
    pub max_daily_hours: Decimal,
    /// Days after period end by which every entry must have been logged.
    pub submission_deadline_offset_days: i64,
    pub working_days: HashSet<Weekday>,
    pub holidays: BTreeSet<NaiveDate>,
}

impl Default for CompliancePolicy {
    fn default() -> Self {
        Self {
            max_daily_hours: dec!(10),
            submission_deadline_offset_days: 1,
            working_days: weekdays(),
            holidays: BTreeSet::new(),
        }
    }
}

pub fn weekdays() -> HashSet<Weekday> {
    [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
    ]
    .into_iter()
    .collect()
}

impl CompliancePolicy {
    pub fn with_holidays<I: IntoIterator<Item = NaiveDate>>(mut self, holidays: I) -> Self {
        self.holidays.extend(holidays);
        self
    }

    /// Determines if a day is considered a working day requiring time entries.
    pub fn is_working_day(&self, date: NaiveDate) -> bool {
        self.working_days.contains(&date.weekday()) && !self.holidays.contains(&date)
    }

    pub fn expected_working_days(&self, period: &Period) -> Vec<NaiveDate> {
        period.days().filter(|d| self.is_working_day(*d)).collect()
    }

    /// Last day on which entries for `period` count as on time. None on date overflow.
    pub fn submission_deadline(&self, period: &Period) -> Option<NaiveDate> {
        let offset = self.submission_deadline_offset_days;
        if offset >= 0 {
            period.end.checked_add_days(Days::new(offset as u64))
        } else {
            period.end.checked_sub_days(Days::new(offset.unsigned_abs()))
        }
    }
}
