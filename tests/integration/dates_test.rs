//! Date resolution integration tests.
//!
//! Exercises the bilingual vocabulary at week, month and year boundaries.

use chrono::NaiveDate;
use ledger_core::dates::{resolve, DateIntent, DateRange};
use ledger_core::error::LedgerError;
use pretty_assertions::assert_eq;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn range(start: NaiveDate, end: NaiveDate) -> DateRange {
    DateRange::new(start, end).unwrap()
}

#[test]
fn test_english_and_chinese_forms_agree() {
    let today = date(2024, 3, 13);
    for intent in DateIntent::ALL {
        let expected = intent.resolve(today).unwrap();
        for form in intent.surface_forms() {
            assert_eq!(resolve(form, today).unwrap(), expected, "phrase {form}");
        }
    }
}

#[test]
fn test_last_week_on_monday() {
    // 2024-03-11 is a Monday.
    let today = date(2024, 3, 11);
    assert_eq!(
        resolve("上周", today).unwrap(),
        range(date(2024, 3, 4), date(2024, 3, 11))
    );
    assert_eq!(
        resolve("this week", today).unwrap(),
        range(date(2024, 3, 11), date(2024, 3, 18))
    );
}

#[test]
fn test_this_week_on_sunday_stays_in_the_same_week() {
    let today = date(2024, 3, 17);
    let this_week = resolve("本周", today).unwrap();
    assert_eq!(this_week, range(date(2024, 3, 11), date(2024, 3, 18)));
    assert!(this_week.contains(today));
}

#[test]
fn test_last_month_rolls_over_the_year() {
    let today = date(2024, 1, 15);
    assert_eq!(
        resolve("上个月", today).unwrap(),
        range(date(2023, 12, 1), date(2024, 1, 1))
    );
}

#[test]
fn test_month_phrases_on_day_31() {
    let today = date(2024, 3, 31);
    assert_eq!(
        resolve("last month", today).unwrap(),
        range(date(2024, 2, 1), date(2024, 3, 1))
    );
    assert_eq!(
        resolve("这个月", today).unwrap(),
        range(date(2024, 3, 1), date(2024, 4, 1))
    );
}

#[test]
fn test_leap_day_month() {
    let this_month = resolve("this month", date(2024, 2, 29)).unwrap();
    assert_eq!(this_month.day_count(), 29);
    assert_eq!(this_month.last_day(), Some(date(2024, 2, 29)));
}

#[test]
fn test_day_before_yesterday_across_month_start() {
    assert_eq!(
        resolve("前天", date(2024, 3, 1)).unwrap(),
        DateRange::single_day(date(2024, 2, 28)).unwrap()
    );
}

#[test]
fn test_phrase_matching_ignores_case_and_spacing() {
    let today = date(2024, 3, 13);
    assert_eq!(
        resolve("  Day   Before YESTERDAY ", today).unwrap(),
        resolve("day before yesterday", today).unwrap()
    );
}

#[test]
fn test_unsupported_phrase_is_ambiguous() {
    let today = date(2024, 3, 13);
    for phrase in ["next week", "recently", "最近", "3 days ago", ""] {
        assert!(
            matches!(resolve(phrase, today), Err(LedgerError::AmbiguousDate(_))),
            "phrase {phrase:?}"
        );
    }
}

#[test]
fn test_explicit_iso_span() {
    let today = date(2024, 3, 13);
    assert_eq!(
        resolve("2024-02-01 至 2024-02-29", today).unwrap(),
        range(date(2024, 2, 1), date(2024, 3, 1))
    );
    assert!(matches!(
        resolve("2024-03-10..2024-03-01", today),
        Err(LedgerError::InvalidRange { .. })
    ));
}
