use crate::error::{QuernError, Result};
use crate::types::{Document, FieldValue};
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::map,
    multi::many0,
    number::complete::double,
    sequence::{delimited, preceded, tuple},
    IResult,
};

/// Numeric comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

/// A parsed filter expression.
///
/// Evaluation runs against the forward-stored document. An attribute absent
/// from the document never matches (and `NOT` over it does match, since
/// negation is evaluated over the expression result).
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    /// `attr <op> number`
    Cmp {
        attr: String,
        op: CmpOp,
        value: f64,
    },
    /// `attr:low TO high` (inclusive both ends)
    Range {
        attr: String,
        low: f64,
        high: f64,
    },
    /// `attr:value`, case-insensitive on text
    FacetEq { attr: String, value: String },
    Not(Box<FilterExpr>),
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
}

impl FilterExpr {
    /// Parse an Algolia-style filter string.
    pub fn parse(input: &str) -> Result<FilterExpr> {
        match or_expr(input.trim()) {
            Ok((rest, expr)) if rest.trim().is_empty() => Ok(expr),
            Ok((rest, _)) => Err(QuernError::InvalidQuery(format!(
                "unexpected trailing input in filter: {rest:?}"
            ))),
            Err(e) => Err(QuernError::InvalidQuery(format!("bad filter syntax: {e}"))),
        }
    }

    /// Whether `doc` satisfies the filter.
    pub fn evaluate(&self, doc: &Document) -> bool {
        match self {
            FilterExpr::Cmp { attr, op, value } => {
                any_value(doc, attr, |v| match v.as_number() {
                    Some(n) => match op {
                        CmpOp::Lt => n < *value,
                        CmpOp::Le => n <= *value,
                        CmpOp::Gt => n > *value,
                        CmpOp::Ge => n >= *value,
                        CmpOp::Eq => n == *value,
                        CmpOp::Ne => n != *value,
                    },
                    None => false,
                })
            }
            FilterExpr::Range { attr, low, high } => any_value(doc, attr, |v| {
                v.as_number().is_some_and(|n| n >= *low && n <= *high)
            }),
            FilterExpr::FacetEq { attr, value } => any_value(doc, attr, |v| match v {
                FieldValue::Text(s) => s.eq_ignore_ascii_case(value),
                FieldValue::Bool(b) => value.eq_ignore_ascii_case(if *b { "true" } else { "false" }),
                FieldValue::Integer(_) | FieldValue::Float(_) => v
                    .as_number()
                    .zip(value.parse::<f64>().ok())
                    .is_some_and(|(a, b)| a == b),
                _ => false,
            }),
            FilterExpr::Not(inner) => !inner.evaluate(doc),
            FilterExpr::And(parts) => parts.iter().all(|p| p.evaluate(doc)),
            FilterExpr::Or(parts) => parts.iter().any(|p| p.evaluate(doc)),
        }
    }

    /// Canonical text used in facet cache keys.
    pub fn fingerprint(&self) -> String {
        match self {
            FilterExpr::Cmp { attr, op, value } => format!("{attr}{op:?}{value}"),
            FilterExpr::Range { attr, low, high } => format!("{attr}:[{low},{high}]"),
            FilterExpr::FacetEq { attr, value } => {
                format!("{attr}={}", value.to_lowercase())
            }
            FilterExpr::Not(inner) => format!("!({})", inner.fingerprint()),
            FilterExpr::And(parts) => {
                let inner: Vec<String> = parts.iter().map(FilterExpr::fingerprint).collect();
                format!("({})", inner.join("&"))
            }
            FilterExpr::Or(parts) => {
                let inner: Vec<String> = parts.iter().map(FilterExpr::fingerprint).collect();
                format!("({})", inner.join("|"))
            }
        }
    }
}

/// Apply `pred` to the attribute value; arrays match if any element does.
fn any_value(doc: &Document, attr: &str, pred: impl Fn(&FieldValue) -> bool) -> bool {
    match doc.get_path(attr) {
        Some(FieldValue::Array(items)) => items.iter().any(pred),
        Some(value) => pred(value),
        None => false,
    }
}

fn or_expr(input: &str) -> IResult<&str, FilterExpr> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(preceded(
        delimited(multispace1, tag_no_case("OR"), multispace1),
        and_expr,
    ))(input)?;
    if rest.is_empty() {
        Ok((input, first))
    } else {
        let mut parts = vec![first];
        parts.extend(rest);
        Ok((input, FilterExpr::Or(parts)))
    }
}

fn and_expr(input: &str) -> IResult<&str, FilterExpr> {
    let (input, first) = unary_expr(input)?;
    let (input, rest) = many0(preceded(
        delimited(multispace1, tag_no_case("AND"), multispace1),
        unary_expr,
    ))(input)?;
    if rest.is_empty() {
        Ok((input, first))
    } else {
        let mut parts = vec![first];
        parts.extend(rest);
        Ok((input, FilterExpr::And(parts)))
    }
}

fn unary_expr(input: &str) -> IResult<&str, FilterExpr> {
    alt((
        map(
            preceded(tuple((tag_no_case("NOT"), multispace1)), unary_expr),
            |inner| FilterExpr::Not(Box::new(inner)),
        ),
        primary_expr,
    ))(input)
}

fn primary_expr(input: &str) -> IResult<&str, FilterExpr> {
    alt((
        delimited(
            tuple((char('('), multispace0)),
            or_expr,
            tuple((multispace0, char(')'))),
        ),
        comparison,
        range,
        facet_eq,
    ))(input)
}

fn attribute(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '.' || c == '-')(input)
}

fn cmp_op(input: &str) -> IResult<&str, CmpOp> {
    alt((
        map(tag(">="), |_| CmpOp::Ge),
        map(tag("<="), |_| CmpOp::Le),
        map(tag("!="), |_| CmpOp::Ne),
        map(tag("="), |_| CmpOp::Eq),
        map(tag(">"), |_| CmpOp::Gt),
        map(tag("<"), |_| CmpOp::Lt),
    ))(input)
}

fn comparison(input: &str) -> IResult<&str, FilterExpr> {
    map(
        tuple((
            attribute,
            delimited(multispace0, cmp_op, multispace0),
            double,
        )),
        |(attr, op, value)| FilterExpr::Cmp {
            attr: attr.to_string(),
            op,
            value,
        },
    )(input)
}

fn range(input: &str) -> IResult<&str, FilterExpr> {
    map(
        tuple((
            attribute,
            char(':'),
            double,
            delimited(multispace1, tag_no_case("TO"), multispace1),
            double,
        )),
        |(attr, _, low, _, high)| FilterExpr::Range {
            attr: attr.to_string(),
            low,
            high,
        },
    )(input)
}

fn facet_eq(input: &str) -> IResult<&str, FilterExpr> {
    map(
        tuple((attribute, char(':'), facet_value)),
        |(attr, _, value)| FilterExpr::FacetEq {
            attr: attr.to_string(),
            value,
        },
    )(input)
}

fn facet_value(input: &str) -> IResult<&str, String> {
    alt((
        map(
            delimited(char('"'), take_while1(|c| c != '"'), char('"')),
            |s: &str| s.to_string(),
        ),
        map(
            delimited(char('\''), take_while1(|c| c != '\''), char('\'')),
            |s: &str| s.to_string(),
        ),
        map(
            take_while1(|c: char| !c.is_whitespace() && c != '(' && c != ')'),
            |s: &str| s.to_string(),
        ),
    ))(input)
}
