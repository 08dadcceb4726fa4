//! Placeholder slot mapping.
//!
//! Decides what each `?` in an UPDATE, DELETE or SELECT stands for by looking
//! at the column it is compared to or assigned to. INSERT placeholders are
//! mapped positionally by the parser instead.

use serde::Serialize;
use sqlparser::tokenizer::Token;
use std::fmt;

use super::ValidationRule;

/// What a `?` placeholder stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamSlot {
    /// First day of the resolved range (`transaction_date >= ?`).
    RangeStart,
    /// Exclusive end of the resolved range (`transaction_date < ?`).
    RangeEnd,
    /// Last day inside the resolved range (`<= ?`, second `BETWEEN` bound).
    RangeLastDay,
    /// The only day of a single-day range (`transaction_date = ?`).
    RangeDay,
    /// Date written by INSERT or `SET transaction_date = ?`.
    EntryDate,
    Amount,
    Remark,
    /// `%remark%` for `remark LIKE ?`.
    RemarkPattern,
    RecordId,
}

impl fmt::Display for ParamSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RangeStart => "range_start",
            Self::RangeEnd => "range_end",
            Self::RangeLastDay => "range_last_day",
            Self::RangeDay => "range_day",
            Self::EntryDate => "entry_date",
            Self::Amount => "amount",
            Self::Remark => "remark",
            Self::RemarkPattern => "remark_pattern",
            Self::RecordId => "record_id",
        };
        write!(f, "{name}")
    }
}

pub(crate) const DATE_COLUMN: &str = "transaction_date";
pub(crate) const AMOUNT_COLUMN: &str = "amount";
pub(crate) const REMARK_COLUMN: &str = "remark";
pub(crate) const ID_COLUMN: &str = "id";
pub(crate) const IMMUTABLE_COLUMNS: [&str; 3] = ["id", "created_at", "updated_at"];

/// Clause a placeholder appears in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clause {
    Other,
    Assignment,
    Filter,
}

/// Comparison preceding a placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Like,
    BetweenLow,
    BetweenHigh,
}

impl Comparison {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::Like => "LIKE",
            Self::BetweenLow | Self::BetweenHigh => "BETWEEN",
        }
    }
}

/// Returns true if `token` is the unquoted keyword `keyword`.
pub(crate) fn is_keyword(token: &Token, keyword: &str) -> bool {
    match token {
        Token::Word(word) => word.quote_style.is_none() && word.value.eq_ignore_ascii_case(keyword),
        _ => false,
    }
}

fn column_name(token: &Token) -> Option<String> {
    match token {
        Token::Word(word) => Some(word.value.to_lowercase()),
        _ => None,
    }
}

/// Rejects `SET` assignments to columns that may never change.
pub(crate) fn check_assignments(tokens: &[Token]) -> Result<(), ValidationRule> {
    let mut clause = Clause::Other;
    for (i, token) in tokens.iter().enumerate() {
        clause = next_clause(token, clause);
        if clause != Clause::Assignment || !matches!(token, Token::Eq) || i == 0 {
            continue;
        }
        if let Some(column) = column_name(&tokens[i - 1]) {
            if IMMUTABLE_COLUMNS.contains(&column.as_str()) {
                return Err(ValidationRule::ImmutableColumn(column));
            }
        }
    }
    Ok(())
}

/// Maps every placeholder in `tokens` to a slot, in order of appearance.
///
/// `tokens` must contain only significant tokens (no whitespace).
pub(crate) fn map_placeholders(tokens: &[Token]) -> Result<Vec<ParamSlot>, ValidationRule> {
    let mut slots = Vec::new();
    let mut clause = Clause::Other;

    for (i, token) in tokens.iter().enumerate() {
        clause = next_clause(token, clause);
        if !matches!(token, Token::Placeholder(_)) {
            continue;
        }
        let position = slots.len() + 1;
        let (column, comparison) = match comparison_before(tokens, i) {
            Some(found) => found,
            None => {
                return Err(ValidationRule::UnboundPlaceholder {
                    position,
                    context: "not compared to a column".to_string(),
                })
            }
        };
        match slot_for(clause, &column, comparison) {
            Some(slot) => slots.push(slot),
            None => {
                return Err(ValidationRule::UnboundPlaceholder {
                    position,
                    context: format!("{column} {} ?", comparison.as_str()),
                })
            }
        }
    }

    Ok(slots)
}

fn next_clause(token: &Token, current: Clause) -> Clause {
    let Token::Word(word) = token else {
        return current;
    };
    if word.quote_style.is_some() {
        return current;
    }
    match word.value.to_uppercase().as_str() {
        "SET" => Clause::Assignment,
        "WHERE" | "HAVING" | "ON" => Clause::Filter,
        "GROUP" | "ORDER" | "LIMIT" | "SELECT" | "FROM" | "VALUES" => Clause::Other,
        _ => current,
    }
}

/// Finds the `column <op>` pair directly in front of the placeholder at `index`.
fn comparison_before(tokens: &[Token], index: usize) -> Option<(String, Comparison)> {
    let prev = tokens.get(index.checked_sub(1)?)?;

    // Second bound of `column BETWEEN ? AND ?`.
    if is_keyword(prev, "AND") && index >= 4 {
        if matches!(tokens[index - 2], Token::Placeholder(_))
            && is_keyword(&tokens[index - 3], "BETWEEN")
        {
            return Some((column_name(&tokens[index - 4])?, Comparison::BetweenHigh));
        }
        return None;
    }

    let comparison = match prev {
        Token::Eq | Token::DoubleEq => Comparison::Eq,
        Token::Neq => Comparison::NotEq,
        Token::Lt => Comparison::Lt,
        Token::LtEq => Comparison::LtEq,
        Token::Gt => Comparison::Gt,
        Token::GtEq => Comparison::GtEq,
        t if is_keyword(t, "LIKE") => Comparison::Like,
        t if is_keyword(t, "BETWEEN") => Comparison::BetweenLow,
        _ => return None,
    };
    let column = column_name(tokens.get(index.checked_sub(2)?)?)?;
    Some((column, comparison))
}

fn slot_for(clause: Clause, column: &str, comparison: Comparison) -> Option<ParamSlot> {
    match clause {
        Clause::Assignment => match (column, comparison) {
            (DATE_COLUMN, Comparison::Eq) => Some(ParamSlot::EntryDate),
            (AMOUNT_COLUMN, Comparison::Eq) => Some(ParamSlot::Amount),
            (REMARK_COLUMN, Comparison::Eq) => Some(ParamSlot::Remark),
            _ => None,
        },
        Clause::Filter => match (column, comparison) {
            (DATE_COLUMN, Comparison::GtEq | Comparison::BetweenLow) => Some(ParamSlot::RangeStart),
            (DATE_COLUMN, Comparison::Lt) => Some(ParamSlot::RangeEnd),
            (DATE_COLUMN, Comparison::LtEq | Comparison::BetweenHigh) => {
                Some(ParamSlot::RangeLastDay)
            }
            (DATE_COLUMN, Comparison::Eq) => Some(ParamSlot::RangeDay),
            (
                AMOUNT_COLUMN,
                Comparison::Eq
                | Comparison::NotEq
                | Comparison::Lt
                | Comparison::LtEq
                | Comparison::Gt
                | Comparison::GtEq,
            ) => Some(ParamSlot::Amount),
            (REMARK_COLUMN, Comparison::Eq) => Some(ParamSlot::Remark),
            (REMARK_COLUMN, Comparison::Like) => Some(ParamSlot::RemarkPattern),
            (ID_COLUMN, Comparison::Eq) => Some(ParamSlot::RecordId),
            _ => None,
        },
        Clause::Other => None,
    }
}
