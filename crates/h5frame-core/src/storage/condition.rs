//! Row conditions evaluated against a table leaf.
//!
//! Conditions use the numexpr-style syntax of table query strings:
//!
//! ```text
//! (aqi > 100) & ~safe | (city == "Buenos Aires")
//! ```
//!
//! Text is tokenized and parsed with `sqlparser`, so the precedence is the
//! SQL one extended with a tight prefix `~`: `~` binds tightest, then `&`,
//! then `|`, and all of them bind tighter than comparisons. Parenthesize
//! comparisons that are combined. SQL `AND`, `OR` and `NOT` are accepted
//! too. A double-quoted token is a string literal, not a quoted column name.
//! A bare boolean column (or `True`/`False`) is a condition on its own.
//!
//! The parsed tree is lowered into a small expression type and evaluated on
//! the decoded physical columns using Arrow's comparison kernels. Literals
//! are wrapped as [`Scalar`]s and broadcast, and mixed numeric operands are
//! widened to `Int64` or `Float64` first.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int64Array, RecordBatch, Scalar, StringArray,
};
use arrow::compute::cast;
use arrow::compute::kernels::{boolean as boolean_kernels, cmp as cmp_kernels};
use arrow::datatypes::DataType;
use sqlparser::ast::{BinaryOperator, Expr as SqlExpr, UnaryOperator, Value as SqlValue};
use sqlparser::dialect::{Dialect, GenericDialect, Precedence};
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::{Token, Tokenizer};

use crate::storage::error::{StorageError, StorageResult};

/// Nesting depth the parser accepts before giving up.
const PARSER_RECURSION_LIMIT: usize = 50;

/// Maximum depth of a lowered condition tree.
const MAX_CONDITION_DEPTH: usize = 256;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Column(String),
    Literal(Literal),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        op: CmpOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

/// A parsed row condition, ready to be evaluated against record batches.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    text: String,
    expr: Expr,
}

impl Condition {
    /// Parse `text` into a condition.
    pub fn parse(text: &str) -> StorageResult<Self> {
        let expr = parse_expr(text).map_err(|reason| invalid(text, reason))?;
        Ok(Condition {
            text: text.to_string(),
            expr,
        })
    }

    /// The condition as originally written.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Evaluate into a row mask with one entry per row of `batch`.
    pub fn evaluate(&self, batch: &RecordBatch) -> StorageResult<BooleanArray> {
        let mask = eval_bool(&self.expr, batch).map_err(|reason| invalid(&self.text, reason))?;
        Ok(mask)
    }
}

fn invalid(condition: &str, reason: String) -> StorageError {
    StorageError::InvalidCondition {
        condition: condition.to_string(),
        reason,
    }
}

/// Parser dialect for conditions: generic SQL plus a prefix `~` that binds
/// like unary minus.
#[derive(Debug)]
struct ConditionDialect;

impl Dialect for ConditionDialect {
    fn is_identifier_start(&self, ch: char) -> bool {
        ch.is_alphabetic() || ch == '_'
    }

    fn is_identifier_part(&self, ch: char) -> bool {
        ch.is_alphanumeric() || ch == '_'
    }

    fn parse_prefix(&self, parser: &mut Parser) -> Option<Result<SqlExpr, ParserError>> {
        if parser.peek_token().token != Token::Tilde {
            return None;
        }
        parser.next_token();
        let operand = parser.parse_subexpr(self.prec_value(Precedence::MulDivModOp));
        Some(operand.map(|expr| SqlExpr::UnaryOp {
            op: UnaryOperator::Not,
            expr: Box::new(expr),
        }))
    }
}

fn parse_expr(text: &str) -> Result<Expr, String> {
    // Byte-string literals (`b'...'`) are only tokenized for known dialects.
    let tokens = Tokenizer::new(&GenericDialect {}, text)
        .tokenize()
        .map_err(|e| e.to_string())?;

    let dialect = ConditionDialect;
    let mut parser = Parser::new(&dialect)
        .with_recursion_limit(PARSER_RECURSION_LIMIT)
        .with_tokens(tokens);
    let ast = parser.parse_expr().map_err(|e| e.to_string())?;
    let trailing = parser.peek_token().token;
    if trailing != Token::EOF {
        return Err(format!("unexpected trailing token {trailing}"));
    }
    lower(ast, 0)
}

fn literal(value: SqlValue) -> Result<Literal, String> {
    match value {
        SqlValue::Boolean(b) => Ok(Literal::Bool(b)),
        SqlValue::Number(n, _) => {
            if let Ok(v) = n.parse::<i64>() {
                Ok(Literal::Int(v))
            } else if let Ok(v) = n.parse::<f64>() {
                Ok(Literal::Float(v))
            } else {
                Err(format!("invalid number {n:?}"))
            }
        }
        SqlValue::SingleQuotedString(s)
        | SqlValue::DoubleQuotedString(s)
        | SqlValue::SingleQuotedByteStringLiteral(s)
        | SqlValue::DoubleQuotedByteStringLiteral(s) => Ok(Literal::Str(s)),
        other => Err(format!("unsupported literal {other}")),
    }
}

fn negate(expr: Expr) -> Result<Expr, String> {
    match expr {
        Expr::Literal(Literal::Int(v)) => v
            .checked_neg()
            .map(|v| Expr::Literal(Literal::Int(v)))
            .ok_or_else(|| format!("integer literal -{v} out of range")),
        Expr::Literal(Literal::Float(v)) => Ok(Expr::Literal(Literal::Float(-v))),
        other => Err(format!("cannot negate {other:?}")),
    }
}

/// Lower a parsed SQL expression into the evaluable subset.
fn lower(expr: SqlExpr, depth: usize) -> Result<Expr, String> {
    if depth > MAX_CONDITION_DEPTH {
        return Err(format!("condition nested deeper than {MAX_CONDITION_DEPTH} levels"));
    }
    let next = depth + 1;
    let lowered = match expr {
        SqlExpr::Identifier(ident) => match ident.quote_style {
            Some('"') => Expr::Literal(Literal::Str(ident.value)),
            _ => Expr::Column(ident.value),
        },
        SqlExpr::Value(v) => Expr::Literal(literal(v.value)?),
        SqlExpr::Nested(inner) => lower(*inner, next)?,
        SqlExpr::UnaryOp { op, expr } => {
            let operand = lower(*expr, next)?;
            match op {
                UnaryOperator::Not => Expr::Not(Box::new(operand)),
                UnaryOperator::Minus => negate(operand)?,
                UnaryOperator::Plus => operand,
                other => return Err(format!("unsupported operator {other}")),
            }
        }
        SqlExpr::BinaryOp { left, op, right } => {
            let lhs = Box::new(lower(*left, next)?);
            let rhs = Box::new(lower(*right, next)?);
            let cmp = match op {
                BinaryOperator::And | BinaryOperator::BitwiseAnd => {
                    return Ok(Expr::And(lhs, rhs));
                }
                BinaryOperator::Or | BinaryOperator::BitwiseOr => {
                    return Ok(Expr::Or(lhs, rhs));
                }
                BinaryOperator::Eq => CmpOp::Eq,
                BinaryOperator::NotEq => CmpOp::Ne,
                BinaryOperator::Lt => CmpOp::Lt,
                BinaryOperator::LtEq => CmpOp::Le,
                BinaryOperator::Gt => CmpOp::Gt,
                BinaryOperator::GtEq => CmpOp::Ge,
                other => return Err(format!("unsupported operator {other}")),
            };
            Expr::Compare { op: cmp, lhs, rhs }
        }
        other => return Err(format!("unsupported expression {other}")),
    };
    Ok(lowered)
}

/// An evaluated comparison operand: a full column or a broadcast literal.
enum Operand {
    Column(ArrayRef),
    Scalar(ArrayRef),
}

impl Operand {
    fn array(&self) -> &ArrayRef {
        match self {
            Operand::Column(a) | Operand::Scalar(a) => a,
        }
    }
}

fn literal_array(lit: &Literal) -> ArrayRef {
    match lit {
        Literal::Bool(b) => Arc::new(BooleanArray::from(vec![*b])),
        Literal::Int(v) => Arc::new(Int64Array::from(vec![*v])),
        Literal::Float(v) => Arc::new(Float64Array::from(vec![*v])),
        Literal::Str(s) => Arc::new(StringArray::from(vec![s.as_str()])),
    }
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef, String> {
    batch
        .column_by_name(name)
        .ok_or_else(|| format!("unknown column {name:?}"))
}

fn eval_operand(expr: &Expr, batch: &RecordBatch) -> Result<Operand, String> {
    match expr {
        Expr::Column(name) => Ok(Operand::Column(Arc::clone(column(batch, name)?))),
        Expr::Literal(lit) => Ok(Operand::Scalar(literal_array(lit))),
        _ => Ok(Operand::Column(Arc::new(eval_bool(expr, batch)?))),
    }
}

fn is_integer(dt: &DataType) -> bool {
    matches!(
        dt,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    )
}

fn is_numeric(dt: &DataType) -> bool {
    is_integer(dt) || matches!(dt, DataType::Float32 | DataType::Float64)
}

/// Type both sides of a comparison are cast to before the kernel runs.
fn common_type(lhs: &DataType, rhs: &DataType) -> Option<DataType> {
    if lhs == rhs {
        return Some(lhs.clone());
    }
    if is_numeric(lhs) && is_numeric(rhs) {
        let wide_int = is_integer(lhs)
            && is_integer(rhs)
            && !matches!(lhs, DataType::UInt64)
            && !matches!(rhs, DataType::UInt64);
        return Some(if wide_int {
            DataType::Int64
        } else {
            DataType::Float64
        });
    }
    None
}

fn compare(op: CmpOp, lhs: Operand, rhs: Operand) -> Result<BooleanArray, String> {
    let (lt, rt) = (lhs.array().data_type(), rhs.array().data_type());
    let target = common_type(lt, rt).ok_or_else(|| format!("cannot compare {lt} with {rt}"))?;

    let coerce = |operand: Operand| -> Result<Operand, String> {
        if operand.array().data_type() == &target {
            return Ok(operand);
        }
        let cast_array = cast(operand.array(), &target).map_err(|e| e.to_string())?;
        Ok(match operand {
            Operand::Column(_) => Operand::Column(cast_array),
            Operand::Scalar(_) => Operand::Scalar(cast_array),
        })
    };
    let lhs = coerce(lhs)?;
    let rhs = coerce(rhs)?;

    let kernel = match op {
        CmpOp::Eq => cmp_kernels::eq,
        CmpOp::Ne => cmp_kernels::neq,
        CmpOp::Lt => cmp_kernels::lt,
        CmpOp::Le => cmp_kernels::lt_eq,
        CmpOp::Gt => cmp_kernels::gt,
        CmpOp::Ge => cmp_kernels::gt_eq,
    };

    let result = match (&lhs, &rhs) {
        (Operand::Column(l), Operand::Column(r)) => kernel(l, r),
        (Operand::Column(l), Operand::Scalar(r)) => kernel(l, &Scalar::new(Arc::clone(r))),
        (Operand::Scalar(l), Operand::Column(r)) => kernel(&Scalar::new(Arc::clone(l)), r),
        (Operand::Scalar(l), Operand::Scalar(r)) => kernel(l, r),
    };
    result.map_err(|e| e.to_string())
}

fn broadcast(mask: BooleanArray, len: usize) -> BooleanArray {
    if mask.len() == len {
        return mask;
    }
    let value = mask.len() == 1 && mask.is_valid(0) && mask.value(0);
    BooleanArray::from(vec![value; len])
}

fn eval_bool(expr: &Expr, batch: &RecordBatch) -> Result<BooleanArray, String> {
    let rows = batch.num_rows();
    let mask = match expr {
        Expr::Column(name) => {
            let col = column(batch, name)?;
            match col.as_any().downcast_ref::<BooleanArray>() {
                Some(b) => b.clone(),
                None => {
                    return Err(format!(
                        "column {name:?} of type {} is not a boolean condition",
                        col.data_type()
                    ));
                }
            }
        }
        Expr::Literal(Literal::Bool(b)) => BooleanArray::from(vec![*b; rows]),
        Expr::Literal(other) => return Err(format!("literal {other:?} is not a condition")),
        Expr::Not(inner) => {
            boolean_kernels::not(&eval_bool(inner, batch)?).map_err(|e| e.to_string())?
        }
        Expr::And(l, r) => {
            boolean_kernels::and(&eval_bool(l, batch)?, &eval_bool(r, batch)?)
                .map_err(|e| e.to_string())?
        }
        Expr::Or(l, r) => boolean_kernels::or(&eval_bool(l, batch)?, &eval_bool(r, batch)?)
            .map_err(|e| e.to_string())?,
        Expr::Compare { op, lhs, rhs } => {
            compare(*op, eval_operand(lhs, batch)?, eval_operand(rhs, batch)?)?
        }
    };
    Ok(broadcast(mask, rows))
}

#[cfg(test)]
mod tests {
    use arrow::array::{Int16Array, Int32Array};
    use arrow::datatypes::{Field, Schema};

    use super::*;

    fn air_quality() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("timestamp", DataType::Int32, false),
            Field::new("aqi", DataType::Int16, false),
            Field::new("city", DataType::Utf8, false),
            Field::new("safe", DataType::Boolean, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(vec![
                    1_714_003_200,
                    1_714_089_600,
                    1_714_003_200,
                    1_714_089_600,
                ])),
                Arc::new(Int16Array::from(vec![412, 413, 35, 36])),
                Arc::new(StringArray::from(vec![
                    "Denver",
                    "Denver",
                    "Buenos Aires",
                    "Buenos Aires",
                ])),
                Arc::new(BooleanArray::from(vec![false, false, true, true])),
            ],
        )
        .unwrap()
    }

    fn mask(text: &str) -> Vec<bool> {
        let cond = Condition::parse(text).unwrap();
        cond.evaluate(&air_quality())
            .unwrap()
            .iter()
            .map(|v| v.unwrap_or(false))
            .collect()
    }

    #[test]
    fn string_equality() {
        assert_eq!(mask(r#"city == "Buenos Aires""#), [false, false, true, true]);
        assert_eq!(mask("city == b'Denver'"), [true, true, false, false]);
    }

    #[test]
    fn numeric_comparisons_widen() {
        assert_eq!(mask("aqi > 100"), [true, true, false, false]);
        assert_eq!(mask("aqi <= 35.5"), [false, false, true, false]);
        assert_eq!(mask("100 < aqi"), [true, true, false, false]);
        assert_eq!(mask("timestamp == aqi"), [false; 4]);
    }

    #[test]
    fn boolean_combinators() {
        assert_eq!(mask("safe"), [false, false, true, true]);
        assert_eq!(mask("~safe"), [true, true, false, false]);
        assert_eq!(mask("(aqi > 400) & (aqi < 413)"), [true, false, false, false]);
        assert_eq!(mask("aqi > 400 AND NOT safe"), [true, true, false, false]);
        assert_eq!(
            mask("(aqi == 412) | (city != 'Denver')"),
            [true, false, true, true]
        );
        assert_eq!(mask("True"), [true; 4]);
        assert_eq!(mask("1 == 2"), [false; 4]);
    }

    #[test]
    fn tilde_binds_tighter_than_and() {
        assert_eq!(mask("~safe & (aqi == 412)"), [true, false, false, false]);
        assert_eq!(mask("~(safe | (aqi == 412))"), [false, true, false, false]);
        assert_eq!(mask("~(~safe)"), [false, false, true, true]);
    }

    #[test]
    fn quoted_tokens_and_signed_literals() {
        assert_eq!(mask(r#"city != "Denver""#), [false, false, true, true]);
        assert_eq!(mask("aqi > -1"), [true; 4]);
        assert_eq!(mask("aqi < +36.0"), [false, false, true, false]);
    }

    #[test]
    fn deep_nesting_is_an_error() {
        let text = format!("{}safe", "~ ".repeat(200_000));
        let err = Condition::parse(&text).unwrap_err();
        assert!(matches!(err, StorageError::InvalidCondition { .. }));

        let text = format!("{}safe{}", "(".repeat(10_000), ")".repeat(10_000));
        let err = Condition::parse(&text).unwrap_err();
        assert!(matches!(err, StorageError::InvalidCondition { .. }));

        let text = vec!["safe"; 1_000].join(" | ");
        let err = Condition::parse(&text).unwrap_err();
        assert!(matches!(err, StorageError::InvalidCondition { .. }));
    }

    #[test]
    fn rejects_bad_conditions() {
        for text in [
            "city ==",
            "(aqi > 1",
            "aqi >> 1",
            "\"unterminated",
            "aqi > 1 extra",
            "aqi + 1",
        ] {
            let err = Condition::parse(text).unwrap_err();
            assert!(matches!(err, StorageError::InvalidCondition { .. }), "{text}");
        }

        for text in ["missing == 1", "city > 3", "aqi"] {
            let cond = Condition::parse(text).unwrap();
            let err = cond.evaluate(&air_quality()).unwrap_err();
            assert!(matches!(err, StorageError::InvalidCondition { .. }), "{text}");
        }
    }
}
