// src/period.rs
use chrono::{Datelike, Days, Months, NaiveDate, Weekday};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::error::EvaluationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PeriodKind {
    Month,
    IsoWeek,
    Custom,
}

/// Inclusive calendar range a timesheet is reported against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub kind: PeriodKind,
}

impl Period {
    pub fn range(start: NaiveDate, end: NaiveDate) -> Result<Self, EvaluationError> {
        if start > end {
            return Err(EvaluationError::InvalidPeriod { start, end });
        }
        Ok(Self {
            start,
            end,
            kind: PeriodKind::Custom,
        })
    }

    pub fn month(year: i32, month: u32) -> Result<Self, EvaluationError> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| EvaluationError::UnparseablePeriod(format!("{:04}-{:02}", year, month)))?;
        let end = start
            .checked_add_months(Months::new(1))
            .and_then(|d| d.pred_opt())
            .ok_or(EvaluationError::DateOverflow)?;
        Ok(Self {
            start,
            end,
            kind: PeriodKind::Month,
        })
    }

    pub fn iso_week(year: i32, week: u32) -> Result<Self, EvaluationError> {
        let start = NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)
            .ok_or_else(|| EvaluationError::UnparseablePeriod(format!("{:04}-W{:02}", year, week)))?;
        let end = start
            .checked_add_days(Days::new(6))
            .ok_or(EvaluationError::DateOverflow)?;
        Ok(Self {
            start,
            end,
            kind: PeriodKind::IsoWeek,
        })
    }

    /// The month containing `date`.
    pub fn month_of(date: NaiveDate) -> Result<Self, EvaluationError> {
        Self::month(date.year(), date.month())
    }

    /// Accepts `YYYY-MM`, `YYYY-Www` or `YYYY-MM-DD..YYYY-MM-DD`.
    pub fn parse(input: &str) -> Result<Self, EvaluationError> {
        static PATTERNS: OnceLock<(Regex, Regex, Regex)> = OnceLock::new();
        let (month_re, week_re, range_re) = PATTERNS.get_or_init(|| {
            (
                Regex::new(r"^(\d{4})-(\d{2})$").expect("static regex"),
                Regex::new(r"^(\d{4})-W(\d{2})$").expect("static regex"),
                Regex::new(r"^(\d{4}-\d{2}-\d{2})\.\.(\d{4}-\d{2}-\d{2})$").expect("static regex"),
            )
        });
        let unparseable = || EvaluationError::UnparseablePeriod(input.to_string());
        let trimmed = input.trim();

        if let Some(caps) = month_re.captures(trimmed) {
            let year = caps[1].parse().map_err(|_| unparseable())?;
            let month = caps[2].parse().map_err(|_| unparseable())?;
            return Self::month(year, month);
        }
        if let Some(caps) = week_re.captures(trimmed) {
            let year = caps[1].parse().map_err(|_| unparseable())?;
            let week = caps[2].parse().map_err(|_| unparseable())?;
            return Self::iso_week(year, week);
        }
        if let Some(caps) = range_re.captures(trimmed) {
            let start = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").map_err(|_| unparseable())?;
            let end = NaiveDate::parse_from_str(&caps[2], "%Y-%m-%d").map_err(|_| unparseable())?;
            return Self::range(start, end);
        }
        Err(unparseable())
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    pub fn len_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// The period of the same kind immediately before this one.
    pub fn previous(&self) -> Result<Self, EvaluationError> {
        match self.kind {
            PeriodKind::Month => {
                let prev = self
                    .start
                    .checked_sub_months(Months::new(1))
                    .ok_or(EvaluationError::DateOverflow)?;
                Self::month(prev.year(), prev.month())
            }
            PeriodKind::IsoWeek => {
                let prev = self
                    .start
                    .checked_sub_days(Days::new(7))
                    .ok_or(EvaluationError::DateOverflow)?;
                let iso = prev.iso_week();
                Self::iso_week(iso.year(), iso.week())
            }
            PeriodKind::Custom => {
                let len = self.len_days() as u64;
                let end = self.start.pred_opt().ok_or(EvaluationError::DateOverflow)?;
                let start = self
                    .start
                    .checked_sub_days(Days::new(len))
                    .ok_or(EvaluationError::DateOverflow)?;
                Self::range(start, end)
            }
        }
    }

    /// `count` consecutive periods ending with `self`, most recent first.
    pub fn trailing(&self, count: usize) -> Result<Vec<Self>, EvaluationError> {
        let mut periods = Vec::with_capacity(count);
        let mut current = *self;
        for i in 0..count {
            if i > 0 {
                current = current.previous()?;
            }
            periods.push(current);
        }
        Ok(periods)
    }

    /// Stable text used inside cache fingerprints and operation ids.
    pub fn fingerprint_component(&self) -> String {
        format!("{}..{}", self.start.format("%Y-%m-%d"), self.end.format("%Y-%m-%d"))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PeriodKind::Month => write!(f, "{}", self.start.format("%Y-%m")),
            PeriodKind::IsoWeek => {
                let iso = self.start.iso_week();
                write!(f, "{:04}-W{:02}", iso.year(), iso.week())
            }
            PeriodKind::Custom => write!(f, "{}", self.fingerprint_component()),
        }
    }
}
