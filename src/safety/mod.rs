//! SQL validation module.
//!
//! Treats SQL text as untrusted input and decides, fail-closed, whether it may
//! be executed against the transaction store. An accepted verdict carries the
//! normalized SQL and the ordered values the executor must bind; only an
//! accepted verdict can become a [`ValidatedStatement`].

mod bindings;
mod parser;

pub use bindings::ParamSlot;
pub use parser::{validate_sql, SqlValidator};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::dates::DateRange;
use crate::db::{SUMMARY_VIEW, TRANSACTIONS_TABLE};
use crate::error::{LedgerError, Result};

/// Operation kind declared by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Insert,
    Update,
    Delete,
}

impl OperationKind {
    /// The SQL keyword a statement of this kind must start with.
    pub fn leading_keyword(&self) -> &'static str {
        match self {
            Self::Query => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    /// Returns true for operations that modify the store.
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Query)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "query" | "select" => Ok(Self::Query),
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            _ => Err(format!(
                "Invalid operation: {s}. Expected: query, insert, update, or delete"
            )),
        }
    }
}

/// Relations a statement may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// The `transactions` table.
    Transactions,
    /// The read-only `transaction_summary` view.
    TransactionSummary,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transactions => TRANSACTIONS_TABLE,
            Self::TransactionSummary => SUMMARY_VIEW,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        [Self::Transactions, Self::TransactionSummary]
            .into_iter()
            .find(|relation| relation.as_str().eq_ignore_ascii_case(name))
    }
}

/// The validation rule a rejected statement violated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "rule", content = "detail", rename_all = "snake_case")]
pub enum ValidationRule {
    EmptyStatement,
    Unparseable(String),
    InlineComment,
    StatementStacking,
    ForbiddenKeyword(String),
    ClockDependent(String),
    EmbeddedLiteral(String),
    OperationMismatch {
        declared: OperationKind,
        found: String,
    },
    UnknownRelation(String),
    MissingRelation,
    MixedRelations,
    ReadOnlyRelation(String),
    NestedMutation(String),
    IncompleteProjection(String),
    MissingWhereClause(OperationKind),
    UnrestrictedFilter(OperationKind),
    InvalidInsertShape(String),
    ImmutableColumn(String),
    UnboundPlaceholder { position: usize, context: String },
    MissingParameter(ParamSlot),
    AmountOutOfRange(String),
}

impl ValidationRule {
    /// Stable machine-readable code for the rule.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyStatement => "empty_statement",
            Self::Unparseable(_) => "unparseable",
            Self::InlineComment => "inline_comment",
            Self::StatementStacking => "statement_stacking",
            Self::ForbiddenKeyword(_) => "forbidden_keyword",
            Self::ClockDependent(_) => "clock_dependent",
            Self::EmbeddedLiteral(_) => "embedded_literal",
            Self::OperationMismatch { .. } => "operation_mismatch",
            Self::UnknownRelation(_) => "unknown_relation",
            Self::MissingRelation => "missing_relation",
            Self::MixedRelations => "mixed_relations",
            Self::ReadOnlyRelation(_) => "read_only_relation",
            Self::NestedMutation(_) => "nested_mutation",
            Self::IncompleteProjection(_) => "incomplete_projection",
            Self::MissingWhereClause(_) => "missing_where_clause",
            Self::UnrestrictedFilter(_) => "unrestricted_filter",
            Self::InvalidInsertShape(_) => "invalid_insert_shape",
            Self::ImmutableColumn(_) => "immutable_column",
            Self::UnboundPlaceholder { .. } => "unbound_placeholder",
            Self::MissingParameter(_) => "missing_parameter",
            Self::AmountOutOfRange(_) => "amount_out_of_range",
        }
    }
}

impl fmt::Display for ValidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyStatement => write!(f, "empty SQL statement"),
            Self::Unparseable(detail) => write!(f, "could not parse SQL: {detail}"),
            Self::InlineComment => write!(f, "comments are not allowed in SQL text"),
            Self::StatementStacking => {
                write!(f, "statement separator ';' inside the statement body")
            }
            Self::ForbiddenKeyword(keyword) => write!(f, "forbidden keyword '{keyword}'"),
            Self::ClockDependent(function) => write!(
                f,
                "clock function '{function}' is not allowed; dates must be bound parameters"
            ),
            Self::EmbeddedLiteral(literal) => write!(
                f,
                "literal value {literal} must be passed as a bound parameter"
            ),
            Self::OperationMismatch { declared, found } => write!(
                f,
                "declared operation '{declared}' requires {} but statement starts with {found}",
                declared.leading_keyword()
            ),
            Self::UnknownRelation(name) => write!(f, "relation '{name}' is not allowed"),
            Self::MissingRelation => write!(f, "statement does not reference the transactions table"),
            Self::MixedRelations => write!(
                f,
                "statement may not combine transactions with transaction_summary"
            ),
            Self::ReadOnlyRelation(name) => write!(f, "relation '{name}' is read-only"),
            Self::NestedMutation(kind) => {
                write!(f, "query contains a nested {kind} statement")
            }
            Self::IncompleteProjection(column) => {
                write!(f, "query does not return required column '{column}'")
            }
            Self::MissingWhereClause(kind) => write!(
                f,
                "{} without a WHERE clause is not allowed",
                kind.leading_keyword()
            ),
            Self::UnrestrictedFilter(kind) => write!(
                f,
                "{} filter must compare a column to a bound parameter in every OR branch",
                kind.leading_keyword()
            ),
            Self::InvalidInsertShape(detail) => write!(f, "invalid INSERT: {detail}"),
            Self::ImmutableColumn(column) => write!(f, "column '{column}' cannot be written"),
            Self::UnboundPlaceholder { position, context } => write!(
                f,
                "placeholder #{position} ({context}) does not map to a known parameter"
            ),
            Self::MissingParameter(slot) => {
                write!(f, "no value available for parameter '{slot}'")
            }
            Self::AmountOutOfRange(amount) => {
                write!(f, "amount {amount} does not fit DECIMAL(15,2)")
            }
        }
    }
}

/// A typed value bound to a statement placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum BoundValue {
    Date(NaiveDate),
    Decimal(Decimal),
    Text(String),
    Id(u64),
}

impl fmt::Display for BoundValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Date(d) => write!(f, "{d}"),
            Self::Decimal(a) => write!(f, "{a}"),
            Self::Text(s) => write!(f, "'{s}'"),
            Self::Id(id) => write!(f, "{id}"),
        }
    }
}

/// Values an instruction makes available for binding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterValues {
    pub range: Option<DateRange>,
    pub entry_date: Option<NaiveDate>,
    pub amount: Option<Decimal>,
    pub remark: Option<String>,
    pub record_id: Option<u64>,
}

impl ParameterValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_range(mut self, range: DateRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_entry_date(mut self, day: NaiveDate) -> Self {
        self.entry_date = Some(day);
        self
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = Some(remark.into());
        self
    }

    pub fn with_record_id(mut self, id: u64) -> Self {
        self.record_id = Some(id);
        self
    }

    /// The date written by inserts and `SET transaction_date = ?`. Falls back
    /// to the start of the resolved range.
    pub fn effective_entry_date(&self) -> Option<NaiveDate> {
        self.entry_date.or_else(|| self.range.map(|r| r.start()))
    }

    /// Returns the value for a placeholder slot, if the instruction supplied one.
    pub fn value_for(&self, slot: ParamSlot) -> Option<BoundValue> {
        match slot {
            ParamSlot::RangeStart => self.range.map(|r| BoundValue::Date(r.start())),
            ParamSlot::RangeEnd => self.range.map(|r| BoundValue::Date(r.end())),
            ParamSlot::RangeLastDay => self
                .range
                .and_then(|r| r.last_day())
                .map(BoundValue::Date),
            ParamSlot::RangeDay => self
                .range
                .filter(|r| r.day_count() == 1)
                .map(|r| BoundValue::Date(r.start())),
            ParamSlot::EntryDate => self.effective_entry_date().map(BoundValue::Date),
            ParamSlot::Amount => self.amount.map(BoundValue::Decimal),
            ParamSlot::Remark => self.remark.clone().map(BoundValue::Text),
            ParamSlot::RemarkPattern => self
                .remark
                .as_deref()
                .map(|r| BoundValue::Text(format!("%{}%", escape_like(r)))),
            ParamSlot::RecordId => self.record_id.map(BoundValue::Id),
        }
    }
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Result of validating a SQL statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationVerdict {
    /// Whether the statement may be executed.
    pub accepted: bool,
    /// The rule that rejected the statement.
    pub reason: Option<ValidationRule>,
    /// Canonical rendering of the accepted statement.
    pub normalized_sql: Option<String>,
    /// Values to bind, in placeholder order.
    pub bound_parameters: Vec<BoundValue>,
    #[serde(skip)]
    slots: Vec<ParamSlot>,
    #[serde(skip)]
    operation: OperationKind,
    #[serde(skip)]
    relation: Option<Relation>,
}

impl ValidationVerdict {
    pub(crate) fn accept(
        operation: OperationKind,
        relation: Relation,
        normalized_sql: String,
        bindings: Vec<(ParamSlot, BoundValue)>,
    ) -> Self {
        let (slots, bound_parameters): (Vec<ParamSlot>, Vec<BoundValue>) =
            bindings.into_iter().unzip();
        Self {
            accepted: true,
            reason: None,
            normalized_sql: Some(normalized_sql),
            bound_parameters,
            slots,
            operation,
            relation: Some(relation),
        }
    }

    pub(crate) fn reject(operation: OperationKind, rule: ValidationRule) -> Self {
        Self {
            accepted: false,
            reason: Some(rule),
            normalized_sql: None,
            bound_parameters: Vec::new(),
            slots: Vec::new(),
            operation,
            relation: None,
        }
    }

    /// The operation kind the statement was validated against.
    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    /// Converts the verdict into an executable statement.
    ///
    /// A rejected verdict yields the typed error naming the violated rule; an
    /// operation mismatch surfaces as [`LedgerError::SchemaMismatch`].
    pub fn into_statement(self) -> Result<ValidatedStatement> {
        match (self.accepted, self.reason, self.normalized_sql, self.relation) {
            (true, None, Some(sql), Some(relation)) => Ok(ValidatedStatement {
                operation: self.operation,
                relation,
                sql,
                slots: self.slots,
                params: self.bound_parameters,
            }),
            (_, Some(rule @ ValidationRule::OperationMismatch { .. }), _, _) => {
                Err(LedgerError::SchemaMismatch(rule.to_string()))
            }
            (_, Some(rule), _, _) => Err(LedgerError::Validation(rule)),
            _ => Err(LedgerError::internal("inconsistent validation verdict")),
        }
    }
}

/// A statement that passed validation. Only constructible from an accepted
/// [`ValidationVerdict`], so the executor can never run rejected SQL.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedStatement {
    operation: OperationKind,
    relation: Relation,
    sql: String,
    slots: Vec<ParamSlot>,
    params: Vec<BoundValue>,
}

impl ValidatedStatement {
    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    pub fn relation(&self) -> Relation {
        self.relation
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[BoundValue] {
        &self.params
    }

    /// The first value bound to `slot`, if the statement binds it.
    pub fn bound(&self, slot: ParamSlot) -> Option<&BoundValue> {
        self.slots
            .iter()
            .position(|s| *s == slot)
            .and_then(|i| self.params.get(i))
    }
}
