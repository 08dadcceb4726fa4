//! SQL hint extraction.
//!
//! The SQL hint is produced by a language model and often arrives wrapped in a
//! markdown code fence. The fence is stripped here; the SQL inside is passed
//! to the validator untouched.

use regex::Regex;
use std::sync::OnceLock;

/// Matches the first fenced block, with or without a language tag.
const FENCE_PATTERN: &str = r"(?s)```[A-Za-z]*[ \t]*\r?\n(.*?)```";

fn fence() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(FENCE_PATTERN).ok()).as_ref()
}

/// Returns the SQL carried by `hint`, or `None` if there is none.
///
/// A fenced block wins over surrounding prose; without a fence the whole hint
/// is taken as SQL.
pub fn extract_sql(hint: &str) -> Option<String> {
    let sql = fence()
        .and_then(|re| re.captures(hint))
        .and_then(|caps| caps.get(1))
        .map_or(hint, |m| m.as_str())
        .trim();

    if sql.is_empty() {
        None
    } else {
        Some(sql.to_string())
    }
}
