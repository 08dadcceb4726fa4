//! Date range resolution for colloquial, bilingual date phrases.
//!
//! Maps a closed vocabulary of English and Chinese phrases onto canonical
//! [`DateIntent`]s and turns them into concrete `[start, end)` intervals
//! relative to an injected reference date. Nothing here reads the clock.

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LedgerError, Result};

/// A calendar interval with an inclusive start and an exclusive end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// Creates a range, rejecting `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(LedgerError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Creates a range covering exactly one day.
    pub fn single_day(day: NaiveDate) -> Result<Self> {
        let end = next_day(day)?;
        Ok(Self { start: day, end })
    }

    /// Creates a range from an inclusive first and last day.
    pub fn inclusive(first: NaiveDate, last: NaiveDate) -> Result<Self> {
        if first > last {
            return Err(LedgerError::InvalidRange {
                start: first,
                end: last,
            });
        }
        Ok(Self {
            start: first,
            end: next_day(last)?,
        })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Returns the last day inside the range, or `None` for an empty range.
    pub fn last_day(&self) -> Option<NaiveDate> {
        if self.is_empty() {
            None
        } else {
            self.end.pred_opt()
        }
    }

    /// Returns the number of days covered.
    pub fn day_count(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Returns true if `day` falls inside the range.
    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day < self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Canonical date intents recognized by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateIntent {
    Today,
    Yesterday,
    DayBeforeYesterday,
    ThisWeek,
    LastWeek,
    ThisMonth,
    LastMonth,
}

impl DateIntent {
    /// All supported intents.
    pub const ALL: [DateIntent; 7] = [
        Self::Today,
        Self::Yesterday,
        Self::DayBeforeYesterday,
        Self::ThisWeek,
        Self::LastWeek,
        Self::ThisMonth,
        Self::LastMonth,
    ];

    /// Surface strings that map onto this intent, in normalized form.
    pub fn surface_forms(&self) -> &'static [&'static str] {
        match self {
            Self::Today => &["today", "今天", "今日"],
            Self::Yesterday => &["yesterday", "昨天", "昨日"],
            Self::DayBeforeYesterday => &[
                "day before yesterday",
                "the day before yesterday",
                "前天",
            ],
            Self::ThisWeek => &["this week", "本周", "这周", "这个星期"],
            Self::LastWeek => &["last week", "上周", "上个星期", "上星期"],
            Self::ThisMonth => &["this month", "本月", "这个月"],
            Self::LastMonth => &["last month", "上月", "上个月"],
        }
    }

    /// Looks up the intent for a phrase. Matching is exact after trimming,
    /// lowercasing and collapsing whitespace.
    pub fn parse(phrase: &str) -> Option<Self> {
        let normalized = normalize(phrase);
        Self::ALL
            .into_iter()
            .find(|intent| intent.surface_forms().contains(&normalized.as_str()))
    }

    /// Resolves the intent against a reference date.
    pub fn resolve(self, today: NaiveDate) -> Result<DateRange> {
        match self {
            Self::Today => DateRange::single_day(today),
            Self::Yesterday => DateRange::single_day(shift_days_back(today, 1)?),
            Self::DayBeforeYesterday => DateRange::single_day(shift_days_back(today, 2)?),
            Self::ThisWeek => {
                let monday = week_start(today)?;
                DateRange::new(monday, shift_days_forward(monday, 7)?)
            }
            Self::LastWeek => {
                let monday = week_start(today)?;
                DateRange::new(shift_days_back(monday, 7)?, monday)
            }
            Self::ThisMonth => {
                let first = month_start(today)?;
                DateRange::new(first, shift_months_forward(first, 1)?)
            }
            Self::LastMonth => {
                let first = month_start(today)?;
                DateRange::new(shift_months_back(first, 1)?, first)
            }
        }
    }
}

impl fmt::Display for DateIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first surface form is the canonical English spelling.
        write!(f, "{}", self.surface_forms()[0])
    }
}

/// Resolves a date phrase against a reference date.
///
/// Accepts the bilingual vocabulary of [`DateIntent`] plus explicit ISO dates
/// (`2024-03-05`) and inclusive ISO spans (`2024-03-01..2024-03-10`,
/// `2024-03-01 to 2024-03-10`, `2024-03-01至2024-03-10`). Anything else is an
/// [`LedgerError::AmbiguousDate`]; the resolver never guesses.
pub fn resolve(phrase: &str, today: NaiveDate) -> Result<DateRange> {
    if let Some(intent) = DateIntent::parse(phrase) {
        return intent.resolve(today);
    }

    let normalized = normalize(phrase);
    if let Some(day) = parse_iso(&normalized) {
        return DateRange::single_day(day);
    }

    for separator in ["..", " to ", "至", "~"] {
        if let Some((first, last)) = normalized.split_once(separator) {
            if let (Some(first), Some(last)) = (parse_iso(first.trim()), parse_iso(last.trim())) {
                return DateRange::inclusive(first, last);
            }
        }
    }

    Err(LedgerError::ambiguous_date(phrase.trim()))
}

fn normalize(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn parse_iso(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

fn out_of_range(day: NaiveDate) -> LedgerError {
    LedgerError::internal(format!("date arithmetic out of range near {day}"))
}

fn next_day(day: NaiveDate) -> Result<NaiveDate> {
    day.succ_opt().ok_or_else(|| out_of_range(day))
}

fn shift_days_back(day: NaiveDate, days: u64) -> Result<NaiveDate> {
    day.checked_sub_days(Days::new(days))
        .ok_or_else(|| out_of_range(day))
}

fn shift_days_forward(day: NaiveDate, days: u64) -> Result<NaiveDate> {
    day.checked_add_days(Days::new(days))
        .ok_or_else(|| out_of_range(day))
}

fn shift_months_back(day: NaiveDate, months: u32) -> Result<NaiveDate> {
    day.checked_sub_months(Months::new(months))
        .ok_or_else(|| out_of_range(day))
}

fn shift_months_forward(day: NaiveDate, months: u32) -> Result<NaiveDate> {
    day.checked_add_months(Months::new(months))
        .ok_or_else(|| out_of_range(day))
}

/// Monday of the week containing `day`.
fn week_start(day: NaiveDate) -> Result<NaiveDate> {
    shift_days_back(day, u64::from(day.weekday().num_days_from_monday()))
}

/// First day of the month containing `day`.
fn month_start(day: NaiveDate) -> Result<NaiveDate> {
    shift_days_back(day, u64::from(day.day0()))
}
