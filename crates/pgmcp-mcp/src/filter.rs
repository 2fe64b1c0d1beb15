//! Structured row filters and sort specifications.
//!
//! A filter is a JSON object keyed by column name:
//!
//! ```json
//! {"status": "open", "total": {"gte": 100}, "region": {"in": ["eu", "us"]}, "closed_at": {"is_null": true}}
//! ```
//!
//! A bare value means equality (`null` means `is_null`). Operator objects accept
//! `eq`, `ne`, `gt`, `gte`, `lt`, `lte`, `like`, `ilike`, `in` and `is_null`.
//! Conditions are AND-ed.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("unknown column {0:?}")]
    UnknownColumn(String),

    #[error("unknown filter operator {0:?}")]
    UnknownOperator(String),

    #[error("malformed filter: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    ILike,
    In,
    IsNull,
}

impl FilterOp {
    fn parse(name: &str) -> Result<Self, FilterError> {
        Ok(match name {
            "eq" => FilterOp::Eq,
            "ne" => FilterOp::Ne,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "like" => FilterOp::Like,
            "ilike" => FilterOp::ILike,
            "in" => FilterOp::In,
            "is_null" => FilterOp::IsNull,
            other => return Err(FilterError::UnknownOperator(other.to_string())),
        })
    }

    /// SQL comparison operator for the binary forms.
    pub fn sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "<>",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::Like => "LIKE",
            FilterOp::ILike => "ILIKE",
            FilterOp::In => "IN",
            FilterOp::IsNull => "IS NULL",
        }
    }
}

/// One `column op value` term with the column's native type resolved from the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub native_type: String,
    pub op: FilterOp,
    pub value: Value,
}

/// A conjunction of conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    /// Parse a caller-supplied filter string. Blank input is an empty filter.
    pub fn parse_str<'a, F>(input: &str, resolve: F) -> Result<Self, FilterError>
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        let value: Value = serde_json::from_str(input)
            .map_err(|e| FilterError::Malformed(format!("not a JSON object: {e}")))?;
        Self::from_value(&value, resolve)
    }

    /// Build from an already-parsed JSON object. `resolve` maps a column name to its native type.
    pub fn from_value<'a, F>(value: &Value, resolve: F) -> Result<Self, FilterError>
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let object = value
            .as_object()
            .ok_or_else(|| FilterError::Malformed("filter must be a JSON object".into()))?;

        let mut conditions = Vec::new();
        for (column, spec) in object {
            let native_type = resolve(column)
                .ok_or_else(|| FilterError::UnknownColumn(column.clone()))?
                .to_string();
            match spec {
                Value::Object(ops) => {
                    if ops.is_empty() {
                        return Err(FilterError::Malformed(format!(
                            "no operator given for {column:?}"
                        )));
                    }
                    for (op, operand) in ops {
                        let op = FilterOp::parse(op)?;
                        check_operand(column, op, operand)?;
                        conditions.push(Condition {
                            column: column.clone(),
                            native_type: native_type.clone(),
                            op,
                            value: operand.clone(),
                        });
                    }
                }
                Value::Null => conditions.push(Condition {
                    column: column.clone(),
                    native_type,
                    op: FilterOp::IsNull,
                    value: Value::Bool(true),
                }),
                other => conditions.push(Condition {
                    column: column.clone(),
                    native_type,
                    op: FilterOp::Eq,
                    value: other.clone(),
                }),
            }
        }
        Ok(Self { conditions })
    }

    /// Conjunction of `self` and `other`.
    pub fn and(&self, other: &Filter) -> Filter {
        let mut conditions = self.conditions.clone();
        conditions.extend(other.conditions.iter().cloned());
        Filter { conditions }
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

fn check_operand(column: &str, op: FilterOp, operand: &Value) -> Result<(), FilterError> {
    match (op, operand) {
        (FilterOp::In, Value::Array(_)) => Ok(()),
        (FilterOp::In, _) => Err(FilterError::Malformed(format!(
            "'in' on {column:?} needs an array"
        ))),
        (FilterOp::IsNull, Value::Bool(_)) => Ok(()),
        (FilterOp::IsNull, _) => Err(FilterError::Malformed(format!(
            "'is_null' on {column:?} needs a boolean"
        ))),
        (FilterOp::Like | FilterOp::ILike, Value::String(_)) => Ok(()),
        (FilterOp::Like | FilterOp::ILike, _) => Err(FilterError::Malformed(format!(
            "pattern for {column:?} must be a string"
        ))),
        (_, Value::Null) => Err(FilterError::Malformed(format!(
            "comparison on {column:?} with null; use is_null"
        ))),
        _ => Ok(()),
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// One `column [asc|desc]` sort term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerm {
    pub column: String,
    pub direction: Direction,
}

/// Parse `col [asc|desc], col2 ...`. Every column must satisfy `known`.
pub fn parse_order_by<F>(input: &str, known: F) -> Result<Vec<OrderTerm>, FilterError>
where
    F: Fn(&str) -> bool,
{
    let mut terms = Vec::new();
    for raw in input.split(',') {
        let parts: Vec<&str> = raw.split_whitespace().collect();
        let (column, direction) = match parts.as_slice() {
            [] => continue,
            [column] => (*column, Direction::Asc),
            [column, dir] => {
                let direction = match dir.to_ascii_lowercase().as_str() {
                    "asc" => Direction::Asc,
                    "desc" => Direction::Desc,
                    _ => {
                        return Err(FilterError::Malformed(format!(
                            "sort direction must be asc or desc, got {dir:?}"
                        )));
                    }
                };
                (*column, direction)
            }
            _ => {
                return Err(FilterError::Malformed(format!(
                    "cannot parse sort term {:?}",
                    raw.trim()
                )));
            }
        };
        if !known(column) {
            return Err(FilterError::UnknownColumn(column.to_string()));
        }
        terms.push(OrderTerm {
            column: column.to_string(),
            direction,
        });
    }
    Ok(terms)
}

/// Convenience for resolving names against a list of `(name, native_type)` pairs.
pub(crate) fn resolver<'a>(columns: &'a [(String, String)]) -> impl Fn(&str) -> Option<&'a str> {
    move |name: &str| {
        columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn columns() -> Vec<(String, String)> {
        vec![
            ("id".into(), "integer".into()),
            ("status".into(), "text".into()),
            ("total".into(), "numeric(10,2)".into()),
        ]
    }

    #[test]
    fn test_equality_and_operators() {
        let cols = columns();
        let f = Filter::parse_str(
            r#"{"status": "open", "total": {"gte": 10, "lt": 100}}"#,
            resolver(&cols),
        )
        .unwrap();
        assert_eq!(f.conditions().len(), 3);
        assert_eq!(f.conditions()[0].column, "status");
        assert_eq!(f.conditions()[0].op, FilterOp::Eq);
        assert_eq!(f.conditions()[1].native_type, "numeric(10,2)");
    }

    #[test]
    fn test_null_means_is_null() {
        let cols = columns();
        let f = Filter::from_value(&json!({"status": null}), resolver(&cols)).unwrap();
        assert_eq!(f.conditions()[0].op, FilterOp::IsNull);
        assert_eq!(f.conditions()[0].value, json!(true));
    }

    #[test]
    fn test_unknown_column() {
        let cols = columns();
        assert_eq!(
            Filter::parse_str(r#"{"secret": 1}"#, resolver(&cols)),
            Err(FilterError::UnknownColumn("secret".into()))
        );
    }

    #[test]
    fn test_malformed_filters() {
        let cols = columns();
        for bad in [
            "status = 'open'",
            "[1,2]",
            r#"{"id": {"in": 3}}"#,
            r#"{"id": {}}"#,
            r#"{"id": {"gt": null}}"#,
            r#"{"status": {"like": 5}}"#,
        ] {
            assert!(
                matches!(
                    Filter::parse_str(bad, resolver(&cols)),
                    Err(FilterError::Malformed(_))
                ),
                "{bad} should be malformed"
            );
        }
        assert_eq!(
            Filter::parse_str(r#"{"id": {"between": [1, 2]}}"#, resolver(&cols)),
            Err(FilterError::UnknownOperator("between".into()))
        );
    }

    #[test]
    fn test_blank_filter_is_empty() {
        let cols = columns();
        assert!(Filter::parse_str("  ", resolver(&cols)).unwrap().is_empty());
    }

    #[test]
    fn test_and_concatenates() {
        let cols = columns();
        let a = Filter::from_value(&json!({"id": 1}), resolver(&cols)).unwrap();
        let b = Filter::from_value(&json!({"status": "x"}), resolver(&cols)).unwrap();
        let both = a.and(&b);
        assert_eq!(both.conditions().len(), 2);
    }

    #[test]
    fn test_order_by() {
        let known = |c: &str| c == "id" || c == "total";
        assert_eq!(
            parse_order_by("total desc, id", known).unwrap(),
            vec![
                OrderTerm {
                    column: "total".into(),
                    direction: Direction::Desc
                },
                OrderTerm {
                    column: "id".into(),
                    direction: Direction::Asc
                },
            ]
        );
        assert_eq!(
            parse_order_by("password", known),
            Err(FilterError::UnknownColumn("password".into()))
        );
        assert!(matches!(
            parse_order_by("id; drop table users", known),
            Err(FilterError::Malformed(_))
        ));
        assert!(matches!(
            parse_order_by("id sideways", known),
            Err(FilterError::Malformed(_))
        ));
    }
}
