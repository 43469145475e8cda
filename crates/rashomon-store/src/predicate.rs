//! Predicate Compiler — translates a predicate tree into a parameterised
//! condition fragment plus positional parameters.
//!
//! Input is `{attr -> value | {op: arg}}`; operators are `eq` (default for
//! a bare scalar), `lt`, `le`, `gt`, `ge`, `ne`, and `between [lo, hi]`.

use serde_json::Value as JsonValue;

use crate::error::{Result, StoreError};
use crate::names::quote_identifier;

/// A single comparison operator accepted by the predicate language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Ne,
    Between,
}

impl Operator {
    fn cql(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Ne => "!=",
            Operator::Between => unreachable!("between is expanded specially"),
        }
    }

    fn from_key(key: &str) -> Result<Self> {
        match key {
            "eq" => Ok(Operator::Eq),
            "lt" => Ok(Operator::Lt),
            "le" => Ok(Operator::Le),
            "gt" => Ok(Operator::Gt),
            "ge" => Ok(Operator::Ge),
            "ne" => Ok(Operator::Ne),
            "between" => Ok(Operator::Between),
            other => Err(StoreError::InvalidQuery(format!(
                "unknown predicate operator: {other}"
            ))),
        }
    }
}

/// A predicate value: either a bare scalar (implicit `eq`) or an explicit
/// single-key `{op: arg}` object.
#[derive(Debug, Clone)]
pub enum PredicateValue {
    Scalar(JsonValue),
    Op { op: Operator, arg: JsonValue },
}

impl PredicateValue {
    /// Build a scalar (implicit equality) predicate value.
    pub fn eq(value: impl Into<JsonValue>) -> Self {
        PredicateValue::Scalar(value.into())
    }

    /// Build an explicit operator predicate value.
    pub fn op(op: Operator, arg: impl Into<JsonValue>) -> Self {
        PredicateValue::Op { op, arg: arg.into() }
    }

    /// Build a `between [lo, hi]` predicate value.
    pub fn between(lo: impl Into<JsonValue>, hi: impl Into<JsonValue>) -> Self {
        PredicateValue::Op {
            op: Operator::Between,
            arg: JsonValue::Array(vec![lo.into(), hi.into()]),
        }
    }

    /// Parse a raw JSON value into a `PredicateValue`: a scalar becomes an
    /// implicit `eq`; a single-key object `{op: arg}` becomes an explicit
    /// operator. Multiple keys or an unknown operator are invalid queries.
    pub fn from_json(value: JsonValue) -> Result<Self> {
        match value {
            JsonValue::Null => Err(StoreError::InvalidQuery(
                "predicate value must not be undefined/null".to_string(),
            )),
            JsonValue::Object(map) => {
                if map.len() != 1 {
                    return Err(StoreError::InvalidQuery(
                        "predicate object must have exactly one operator key".to_string(),
                    ));
                }
                let (key, arg) = map.into_iter().next().unwrap();
                let op = Operator::from_key(&key)?;
                Ok(PredicateValue::Op { op, arg })
            }
            scalar => Ok(PredicateValue::Scalar(scalar)),
        }
    }
}

/// A compiled predicate: the `AND`-joined CQL fragment and its positional
/// parameters, in the same order as they appear in the fragment.
#[derive(Debug, Clone, Default)]
pub struct CompiledPredicate {
    pub fragment: String,
    pub params: Vec<JsonValue>,
}

/// Compile an ordered list of `(attribute, value)` pairs into a single
/// `AND`-joined condition fragment with positional parameters.
///
/// Iteration order of `predicate` determines both the emitted clause order
/// and the parameter order.
pub fn compile(predicate: &[(String, PredicateValue)]) -> Result<CompiledPredicate> {
    let mut clauses = Vec::with_capacity(predicate.len());
    let mut params = Vec::with_capacity(predicate.len());

    for (attr, value) in predicate {
        let col = quote_identifier(attr);
        match value {
            PredicateValue::Scalar(v) => {
                clauses.push(format!("{col} = ?"));
                params.push(v.clone());
            }
            PredicateValue::Op {
                op: Operator::Between,
                arg,
            } => {
                let bounds = arg.as_array().ok_or_else(|| {
                    StoreError::InvalidQuery("between requires a [lo, hi] array".to_string())
                })?;
                if bounds.len() != 2 {
                    return Err(StoreError::InvalidQuery(
                        "between requires exactly two bounds".to_string(),
                    ));
                }
                clauses.push(format!("{col} >= ? AND {col} <= ?"));
                params.push(bounds[0].clone());
                params.push(bounds[1].clone());
            }
            PredicateValue::Op { op, arg } => {
                clauses.push(format!("{col} {} ?", op.cql()));
                params.push(arg.clone());
            }
        }
    }

    Ok(CompiledPredicate {
        fragment: clauses.join(" AND "),
        params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pair(attr: &str, value: PredicateValue) -> (String, PredicateValue) {
        (attr.to_string(), value)
    }

    #[test]
    fn scalar_value_compiles_to_eq() {
        let pred = vec![pair("key", PredicateValue::eq("testing"))];
        let compiled = compile(&pred).unwrap();
        assert_eq!(compiled.fragment, "\"key\" = ?");
        assert_eq!(compiled.params, vec![json!("testing")]);
    }

    #[test]
    fn between_emits_two_bounds_and_two_params() {
        let pred = vec![pair("tid", PredicateValue::between(1, 5))];
        let compiled = compile(&pred).unwrap();
        assert_eq!(compiled.fragment, "\"tid\" >= ? AND \"tid\" <= ?");
        assert_eq!(compiled.params, vec![json!(1), json!(5)]);
    }

    #[test]
    fn multiple_attributes_and_joined_in_order() {
        let pred = vec![
            pair("key", PredicateValue::eq("testing")),
            pair("tid", PredicateValue::op(Operator::Le, 42)),
        ];
        let compiled = compile(&pred).unwrap();
        assert_eq!(compiled.fragment, "\"key\" = ? AND \"tid\" <= ?");
        assert_eq!(compiled.params, vec![json!("testing"), json!(42)]);
    }

    #[test]
    fn param_count_matches_operator_arity() {
        let pred = vec![
            pair("a", PredicateValue::eq(1)),
            pair("b", PredicateValue::between(1, 2)),
            pair("c", PredicateValue::op(Operator::Ne, 3)),
        ];
        let compiled = compile(&pred).unwrap();
        // eq=1, between=2, ne=1 -> 4 total
        assert_eq!(compiled.params.len(), 4);
    }

    #[test]
    fn unknown_operator_is_invalid_query() {
        let err = PredicateValue::from_json(json!({"bogus": 1})).unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery(_)));
    }

    #[test]
    fn multiple_operator_keys_is_invalid_query() {
        let err = PredicateValue::from_json(json!({"lt": 1, "gt": 2})).unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery(_)));
    }

    #[test]
    fn undefined_value_is_invalid_query() {
        let err = PredicateValue::from_json(JsonValue::Null).unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery(_)));
    }
}
