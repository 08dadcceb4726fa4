//! SQL parsing and validation logic.
//!
//! Uses sqlparser-rs with the MySQL dialect. Lexical rules (comments, stacking,
//! keywords, literals) run on the token stream so quoted identifiers and string
//! contents are never mistaken for keywords; structural rules run on the AST.

use rust_decimal::Decimal;
use sqlparser::ast::{
    visit_relations, BinaryOperator, Expr, Ident, Insert, ObjectName, Query, Select, SelectItem,
    SetExpr, Statement, TableFactor, TableWithJoins, Value,
};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer, Whitespace};
use std::collections::HashSet;
use std::ops::ControlFlow;
use tracing::debug;

use super::bindings::{
    check_assignments, is_keyword, map_placeholders, AMOUNT_COLUMN, DATE_COLUMN, ID_COLUMN,
    IMMUTABLE_COLUMNS, REMARK_COLUMN,
};
use super::{
    BoundValue, OperationKind, ParamSlot, ParameterValues, Relation, ValidationRule,
    ValidationVerdict,
};

/// Keywords that change schema or privileges.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "DROP", "ALTER", "TRUNCATE", "GRANT", "REVOKE", "CREATE", "RENAME",
];

/// Functions with side effects outside the statement.
const FORBIDDEN_FUNCTIONS: &[&str] = &["SLEEP", "BENCHMARK", "LOAD_FILE"];

/// Functions that read the server clock.
const CLOCK_FUNCTIONS: &[&str] = &[
    "NOW",
    "CURDATE",
    "CURRENT_DATE",
    "CURRENT_TIMESTAMP",
    "CURTIME",
    "CURRENT_TIME",
    "SYSDATE",
    "UTC_DATE",
    "UTC_TIMESTAMP",
    "LOCALTIME",
    "LOCALTIMESTAMP",
];

/// Columns a query over `transactions` must return.
const RECORD_COLUMNS: &[&str] = &[ID_COLUMN, DATE_COLUMN, AMOUNT_COLUMN];

/// Columns a query over `transaction_summary` must return.
const SUMMARY_COLUMNS: &[&str] = &[DATE_COLUMN, "record_count", "total_amount", "avg_amount"];

/// Largest magnitude a `DECIMAL(15,2)` column holds, exclusive.
const AMOUNT_LIMIT: i64 = 10_000_000_000_000;

/// SQL validator that checks statements against the ledger's rules.
#[derive(Debug)]
pub struct SqlValidator {
    dialect: MySqlDialect,
}

impl Default for SqlValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlValidator {
    /// Creates a new SQL validator.
    pub fn new() -> Self {
        Self {
            dialect: MySqlDialect {},
        }
    }

    /// Validates `sql` as an `operation` and binds its placeholders from `values`.
    ///
    /// Never panics and never touches the store; anything that cannot be
    /// proven safe is rejected.
    pub fn validate(
        &self,
        sql: &str,
        operation: OperationKind,
        values: &ParameterValues,
    ) -> ValidationVerdict {
        match self.check(sql, operation, values) {
            Ok((relation, normalized, params)) => {
                debug!(
                    "Accepted {} on {} with {} bound parameter(s)",
                    operation,
                    relation.as_str(),
                    params.len()
                );
                ValidationVerdict::accept(operation, relation, normalized, params)
            }
            Err(rule) => ValidationVerdict::reject(operation, rule),
        }
    }

    fn check(
        &self,
        sql: &str,
        operation: OperationKind,
        values: &ParameterValues,
    ) -> Result<(Relation, String, Vec<(ParamSlot, BoundValue)>), ValidationRule> {
        if sql.trim().is_empty() {
            return Err(ValidationRule::EmptyStatement);
        }

        let tokens = Tokenizer::new(&self.dialect, sql)
            .tokenize()
            .map_err(|e| ValidationRule::Unparseable(e.to_string()))?;

        if tokens.iter().any(is_comment) {
            return Err(ValidationRule::InlineComment);
        }

        let significant: Vec<Token> = tokens
            .into_iter()
            .filter(|t| !matches!(t, Token::Whitespace(_) | Token::EOF))
            .collect();

        check_stacking(&significant)?;
        check_keywords(&significant, operation)?;
        check_literals(&significant)?;

        let statement = self.parse_single(sql)?;

        let found = statement_kind(&statement, &significant);
        if found != operation.leading_keyword() {
            return Err(ValidationRule::OperationMismatch {
                declared: operation,
                found,
            });
        }

        let relation = check_relations(&statement, operation)?;

        let slots = match &statement {
            Statement::Query(query) => {
                if let Some(kind) = find_nested_mutation(query) {
                    return Err(ValidationRule::NestedMutation(kind));
                }
                check_projection(&query.body, relation)?;
                map_placeholders(&significant)?
            }
            Statement::Update { selection, .. } => {
                check_filter(selection.as_ref(), OperationKind::Update)?;
                check_assignments(&significant)?;
                map_placeholders(&significant)?
            }
            Statement::Delete(delete) => {
                check_filter(delete.selection.as_ref(), OperationKind::Delete)?;
                map_placeholders(&significant)?
            }
            Statement::Insert(insert) => insert_slots(insert)?,
            _ => return Err(ValidationRule::Unparseable("unsupported statement".to_string())),
        };

        let params = bind(&slots, values)?;
        Ok((relation, statement.to_string(), params))
    }

    fn parse_single(&self, sql: &str) -> Result<Statement, ValidationRule> {
        let mut statements = Parser::parse_sql(&self.dialect, sql)
            .map_err(|e| ValidationRule::Unparseable(e.to_string()))?;

        match statements.len() {
            0 => Err(ValidationRule::EmptyStatement),
            1 => Ok(statements.remove(0)),
            _ => Err(ValidationRule::StatementStacking),
        }
    }
}

/// Convenience function to validate SQL without creating a validator instance.
pub fn validate_sql(
    sql: &str,
    operation: OperationKind,
    values: &ParameterValues,
) -> ValidationVerdict {
    SqlValidator::new().validate(sql, operation, values)
}

fn is_comment(token: &Token) -> bool {
    matches!(
        token,
        Token::Whitespace(Whitespace::SingleLineComment { .. })
            | Token::Whitespace(Whitespace::MultiLineComment(_))
    )
}

/// A `;` may only be followed by more `;`.
fn check_stacking(tokens: &[Token]) -> Result<(), ValidationRule> {
    if let Some(first) = tokens.iter().position(|t| matches!(t, Token::SemiColon)) {
        if tokens[first..].iter().any(|t| !matches!(t, Token::SemiColon)) {
            return Err(ValidationRule::StatementStacking);
        }
    }
    Ok(())
}

fn check_keywords(tokens: &[Token], operation: OperationKind) -> Result<(), ValidationRule> {
    for token in tokens {
        let Token::Word(word) = token else {
            continue;
        };
        if word.quote_style.is_some() {
            continue;
        }
        let upper = word.value.to_uppercase();
        if FORBIDDEN_KEYWORDS.contains(&upper.as_str())
            || FORBIDDEN_FUNCTIONS.contains(&upper.as_str())
            || (operation == OperationKind::Query && upper == "INTO")
        {
            return Err(ValidationRule::ForbiddenKeyword(upper));
        }
        if CLOCK_FUNCTIONS.contains(&upper.as_str()) {
            return Err(ValidationRule::ClockDependent(upper));
        }
    }
    Ok(())
}

/// Values must arrive as bound parameters. Row limits and a zero compared
/// against `amount` (sign tests) are the only literals allowed in the text.
fn check_literals(tokens: &[Token]) -> Result<(), ValidationRule> {
    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::SingleQuotedString(_)
            | Token::DoubleQuotedString(_)
            | Token::TripleSingleQuotedString(_)
            | Token::TripleDoubleQuotedString(_)
            | Token::DollarQuotedString(_)
            | Token::SingleQuotedByteStringLiteral(_)
            | Token::DoubleQuotedByteStringLiteral(_)
            | Token::TripleSingleQuotedByteStringLiteral(_)
            | Token::TripleDoubleQuotedByteStringLiteral(_)
            | Token::SingleQuotedRawStringLiteral(_)
            | Token::DoubleQuotedRawStringLiteral(_)
            | Token::TripleSingleQuotedRawStringLiteral(_)
            | Token::TripleDoubleQuotedRawStringLiteral(_)
            | Token::NationalStringLiteral(_)
            | Token::EscapedStringLiteral(_)
            | Token::UnicodeStringLiteral(_)
            | Token::HexStringLiteral(_) => {
                return Err(ValidationRule::EmbeddedLiteral(token.to_string()));
            }
            Token::Number(text, _) => {
                if !is_row_limit(tokens, i) && !is_amount_sign_test(tokens, i, text) {
                    return Err(ValidationRule::EmbeddedLiteral(text.clone()));
                }
            }
            t if is_keyword(t, "TRUE") || is_keyword(t, "FALSE") => {
                return Err(ValidationRule::EmbeddedLiteral(t.to_string().to_uppercase()));
            }
            _ => {}
        }
    }
    Ok(())
}

/// True for the `0` in `amount <op> 0`.
fn is_amount_sign_test(tokens: &[Token], index: usize, text: &str) -> bool {
    if !text.parse::<Decimal>().is_ok_and(|d| d.is_zero()) || index < 2 {
        return false;
    }
    let is_comparison = matches!(
        tokens[index - 1],
        Token::Eq | Token::DoubleEq | Token::Neq | Token::Lt | Token::LtEq | Token::Gt | Token::GtEq
    );
    is_comparison
        && matches!(&tokens[index - 2], Token::Word(word) if word.value.eq_ignore_ascii_case(AMOUNT_COLUMN))
}

/// True for `LIMIT n`, `OFFSET n` and the second number of `LIMIT m, n`.
fn is_row_limit(tokens: &[Token], index: usize) -> bool {
    let Some(prev) = index.checked_sub(1).and_then(|i| tokens.get(i)) else {
        return false;
    };
    if is_keyword(prev, "LIMIT") || is_keyword(prev, "OFFSET") {
        return true;
    }
    matches!(prev, Token::Comma)
        && index >= 3
        && matches!(tokens[index - 2], Token::Number(..))
        && is_keyword(&tokens[index - 3], "LIMIT")
}

fn statement_kind(statement: &Statement, tokens: &[Token]) -> String {
    match statement {
        Statement::Query(_) => "SELECT".to_string(),
        // REPLACE INTO parses as an insert.
        Statement::Insert(_) if tokens.first().is_some_and(|t| is_keyword(t, "INSERT")) => {
            "INSERT".to_string()
        }
        Statement::Insert(_) => "REPLACE".to_string(),
        Statement::Update { .. } => "UPDATE".to_string(),
        Statement::Delete(_) => "DELETE".to_string(),
        other => leading_word(&other.to_string()),
    }
}

fn leading_word(rendered: &str) -> String {
    rendered
        .split_whitespace()
        .next()
        .unwrap_or("UNKNOWN")
        .to_uppercase()
}

/// Collects referenced relations and checks them against the allow-list.
fn check_relations(
    statement: &Statement,
    operation: OperationKind,
) -> Result<Relation, ValidationRule> {
    let mut found = HashSet::new();
    let mut record = |name: &ObjectName| {
        let relation = match name.0.as_slice() {
            [ident] => Relation::parse(&ident.value),
            _ => None,
        };
        match relation {
            Some(relation) => {
                found.insert(relation);
                ControlFlow::Continue(())
            }
            None => ControlFlow::Break(ValidationRule::UnknownRelation(name.to_string())),
        }
    };

    if let Statement::Insert(insert) = statement {
        if let ControlFlow::Break(rule) = record(&insert.table_name) {
            return Err(rule);
        }
    }
    if let ControlFlow::Break(rule) = visit_relations(statement, &mut record) {
        return Err(rule);
    }

    match (
        found.contains(&Relation::Transactions),
        found.contains(&Relation::TransactionSummary),
    ) {
        (false, false) => Err(ValidationRule::MissingRelation),
        (true, true) => Err(ValidationRule::MixedRelations),
        (false, true) if operation.is_write() => Err(ValidationRule::ReadOnlyRelation(
            Relation::TransactionSummary.as_str().to_string(),
        )),
        (false, true) => Ok(Relation::TransactionSummary),
        (true, false) => Ok(Relation::Transactions),
    }
}

/// Every result set must carry the columns its rows decode from.
fn check_projection(body: &SetExpr, relation: Relation) -> Result<(), ValidationRule> {
    let required = match relation {
        Relation::Transactions => RECORD_COLUMNS,
        Relation::TransactionSummary => SUMMARY_COLUMNS,
    };
    match body {
        SetExpr::Select(select) => {
            if select.projection.iter().any(|item| {
                matches!(
                    item,
                    SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..)
                )
            }) {
                return Ok(());
            }
            let names: HashSet<String> = select.projection.iter().filter_map(output_name).collect();
            match required.iter().find(|column| !names.contains(**column)) {
                Some(column) => Err(ValidationRule::IncompleteProjection(column.to_string())),
                None => Ok(()),
            }
        }
        SetExpr::Query(query) => check_projection(&query.body, relation),
        SetExpr::SetOperation { left, right, .. } => {
            check_projection(left, relation)?;
            check_projection(right, relation)
        }
        SetExpr::Table(_) => Ok(()),
        SetExpr::Values(_) | SetExpr::Insert(_) | SetExpr::Update(_) => Err(
            ValidationRule::IncompleteProjection(required[0].to_string()),
        ),
    }
}

fn output_name(item: &SelectItem) -> Option<String> {
    let ident: &Ident = match item {
        SelectItem::ExprWithAlias { alias, .. } => alias,
        SelectItem::UnnamedExpr(Expr::Identifier(ident)) => ident,
        SelectItem::UnnamedExpr(Expr::CompoundIdentifier(parts)) => parts.last()?,
        _ => return None,
    };
    Some(ident.value.to_lowercase())
}

/// An UPDATE or DELETE filter must narrow the rows through a bound
/// parameter; every `OR` branch has to do so on its own.
fn check_filter(selection: Option<&Expr>, operation: OperationKind) -> Result<(), ValidationRule> {
    match selection {
        None => Err(ValidationRule::MissingWhereClause(operation)),
        Some(expr) if is_restrictive(expr) => Ok(()),
        Some(_) => Err(ValidationRule::UnrestrictedFilter(operation)),
    }
}

fn is_restrictive(expr: &Expr) -> bool {
    match expr {
        Expr::Nested(inner) => is_restrictive(inner),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => is_restrictive(left) || is_restrictive(right),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Or,
            right,
        } => is_restrictive(left) && is_restrictive(right),
        Expr::BinaryOp {
            left,
            op:
                BinaryOperator::Eq
                | BinaryOperator::NotEq
                | BinaryOperator::Lt
                | BinaryOperator::LtEq
                | BinaryOperator::Gt
                | BinaryOperator::GtEq,
            right,
        } => is_column(left) && is_placeholder(right),
        Expr::Like {
            negated: false,
            expr,
            pattern,
            ..
        } => is_column(expr) && is_placeholder(pattern),
        Expr::Between {
            expr,
            negated: false,
            low,
            high,
        } => is_column(expr) && is_placeholder(low) && is_placeholder(high),
        _ => false,
    }
}

fn is_column(expr: &Expr) -> bool {
    matches!(expr, Expr::Identifier(_) | Expr::CompoundIdentifier(_))
}

fn is_placeholder(expr: &Expr) -> bool {
    matches!(expr, Expr::Value(Value::Placeholder(_)))
}

/// Maps INSERT placeholders positionally onto the listed columns.
fn insert_slots(insert: &Insert) -> Result<Vec<ParamSlot>, ValidationRule> {
    if insert.on.is_some() {
        return Err(ValidationRule::InvalidInsertShape(
            "ON DUPLICATE KEY is not allowed".to_string(),
        ));
    }
    if insert.columns.is_empty() {
        return Err(ValidationRule::InvalidInsertShape(
            "columns must be listed explicitly".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    let mut column_slots = Vec::with_capacity(insert.columns.len());
    for ident in &insert.columns {
        let column = ident.value.to_lowercase();
        if IMMUTABLE_COLUMNS.contains(&column.as_str()) {
            return Err(ValidationRule::ImmutableColumn(column));
        }
        let slot = match column.as_str() {
            DATE_COLUMN => ParamSlot::EntryDate,
            AMOUNT_COLUMN => ParamSlot::Amount,
            REMARK_COLUMN => ParamSlot::Remark,
            _ => {
                return Err(ValidationRule::InvalidInsertShape(format!(
                    "unknown column '{column}'"
                )))
            }
        };
        if !seen.insert(slot) {
            return Err(ValidationRule::InvalidInsertShape(format!(
                "column '{column}' listed twice"
            )));
        }
        column_slots.push(slot);
    }
    for required in [ParamSlot::EntryDate, ParamSlot::Amount] {
        if !seen.contains(&required) {
            let column = if required == ParamSlot::EntryDate {
                DATE_COLUMN
            } else {
                AMOUNT_COLUMN
            };
            return Err(ValidationRule::InvalidInsertShape(format!(
                "column '{column}' is required"
            )));
        }
    }

    let row = match insert.source.as_deref().map(|q| q.body.as_ref()) {
        Some(SetExpr::Values(values)) if values.rows.len() == 1 => &values.rows[0],
        Some(SetExpr::Values(_)) => {
            return Err(ValidationRule::InvalidInsertShape(
                "exactly one VALUES row is allowed".to_string(),
            ))
        }
        _ => {
            return Err(ValidationRule::InvalidInsertShape(
                "source must be a VALUES row".to_string(),
            ))
        }
    };
    if row.len() != column_slots.len() {
        return Err(ValidationRule::InvalidInsertShape(format!(
            "{} column(s) but {} value(s)",
            column_slots.len(),
            row.len()
        )));
    }

    let mut slots = Vec::new();
    for (slot, expr) in column_slots.into_iter().zip(row) {
        match expr {
            Expr::Value(Value::Placeholder(_)) => slots.push(slot),
            Expr::Value(Value::Null) if slot == ParamSlot::Remark => {}
            other => {
                return Err(ValidationRule::InvalidInsertShape(format!(
                    "value {other} must be a placeholder"
                )))
            }
        }
    }
    Ok(slots)
}

/// Resolves slot values and checks amounts fit the column.
fn bind(
    slots: &[ParamSlot],
    values: &ParameterValues,
) -> Result<Vec<(ParamSlot, BoundValue)>, ValidationRule> {
    slots
        .iter()
        .map(|slot| {
            let value = values
                .value_for(*slot)
                .ok_or(ValidationRule::MissingParameter(*slot))?;
            if let BoundValue::Decimal(amount) = &value {
                check_amount(*amount)?;
            }
            Ok((*slot, value))
        })
        .collect()
}

fn check_amount(amount: Decimal) -> Result<(), ValidationRule> {
    if amount.normalize().scale() > 2 || amount.abs() >= Decimal::from(AMOUNT_LIMIT) {
        return Err(ValidationRule::AmountOutOfRange(amount.to_string()));
    }
    Ok(())
}

/// Finds a data-modifying statement nested anywhere in a query.
fn find_nested_mutation(query: &Query) -> Option<String> {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            if let Some(kind) = find_nested_mutation(&cte.query) {
                return Some(kind);
            }
        }
    }
    nested_in_set_expr(&query.body)
}

fn nested_in_set_expr(set_expr: &SetExpr) -> Option<String> {
    match set_expr {
        SetExpr::Select(select) => nested_in_select(select),
        SetExpr::Query(query) => find_nested_mutation(query),
        SetExpr::SetOperation { left, right, .. } => {
            nested_in_set_expr(left).or_else(|| nested_in_set_expr(right))
        }
        SetExpr::Values(_) | SetExpr::Table(_) => None,
        SetExpr::Insert(_) => Some("INSERT".to_string()),
        SetExpr::Update(_) => Some("UPDATE".to_string()),
    }
}

fn nested_in_select(select: &Select) -> Option<String> {
    select.from.iter().find_map(nested_in_table_with_joins)
}

fn nested_in_table_with_joins(twj: &TableWithJoins) -> Option<String> {
    nested_in_table_factor(&twj.relation).or_else(|| {
        twj.joins
            .iter()
            .find_map(|join| nested_in_table_factor(&join.relation))
    })
}

fn nested_in_table_factor(factor: &TableFactor) -> Option<String> {
    match factor {
        TableFactor::Derived { subquery, .. } => find_nested_mutation(subquery),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => nested_in_table_with_joins(table_with_joins),
        _ => None,
    }
}
