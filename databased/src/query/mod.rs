use crate::error::{DatabasedError, Result};
use crate::index::IndexEntry;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Comparison operator of a `where` condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Le,
    Ge,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Ge => ">=",
        }
    }
}

impl FromStr for Operator {
    type Err = DatabasedError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "==" => Ok(Operator::Eq),
            "!=" => Ok(Operator::Ne),
            ">" => Ok(Operator::Gt),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Le),
            ">=" => Ok(Operator::Ge),
            other => Err(DatabasedError::Query(format!(
                "Unsupported operator '{other}' in where()"
            ))),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(property, operator, value)` filter evaluated against a property index.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub property: String,
    pub operator: Operator,
    pub value: Value,
}

impl Condition {
    pub fn new(property: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Condition {
            property: property.into(),
            operator,
            value: value.into(),
        }
    }

    /// Whether an index entry satisfies this condition. Entries recorded for a
    /// different property never match.
    pub fn matches(&self, entry: &IndexEntry) -> bool {
        if entry.property != self.property {
            return false;
        }

        let stored = &entry.value;
        match self.operator {
            Operator::Eq => values_equal(stored, &self.value),
            Operator::Ne => !values_equal(stored, &self.value),
            Operator::Gt => compare_values(stored, &self.value) == Some(Ordering::Greater),
            Operator::Lt => compare_values(stored, &self.value) == Some(Ordering::Less),
            Operator::Le => matches!(
                compare_values(stored, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::Ge => matches!(
                compare_values(stored, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.property, self.operator, self.value)
    }
}

/// Build a condition from an operator string. Fails with a query error for
/// anything other than `==`, `!=`, `>`, `<`, `<=`, `>=`.
pub fn where_(property: &str, operator: &str, value: impl Into<Value>) -> Result<Condition> {
    Ok(Condition::new(property, operator.parse()?, value))
}

/// Validate a result limit given as a dynamic value.
pub fn limit(value: &Value) -> Result<usize> {
    value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| {
            DatabasedError::Query(format!(
                "Invalid limit {value}: the argument must be a non-negative integer"
            ))
        })
}

/// Numbers compare numerically, so `1` equals `1.0`. Everything else
/// compares structurally and never equals a value of another type.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Ordering between two stored values. Only numbers, strings and booleans are
/// ordered, and only against a value of the same type.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(n1), Value::Number(n2)) => {
            if let (Some(i1), Some(i2)) = (n1.as_i64(), n2.as_i64()) {
                return Some(i1.cmp(&i2));
            }
            if let (Some(u1), Some(u2)) = (n1.as_u64(), n2.as_u64()) {
                return Some(u1.cmp(&u2));
            }
            let f1 = n1.as_f64()?;
            let f2 = n2.as_f64()?;
            f1.partial_cmp(&f2)
        }
        (Value::String(s1), Value::String(s2)) => Some(s1.cmp(s2)),
        (Value::Bool(b1), Value::Bool(b2)) => Some(b1.cmp(b2)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(property: &str, value: Value) -> IndexEntry {
        IndexEntry {
            property: property.to_string(),
            value,
            document_id: "doc".to_string(),
        }
    }

    #[test]
    fn test_operator_parse_and_display() {
        for op in ["==", "!=", ">", "<", "<=", ">="] {
            assert_eq!(op.parse::<Operator>().unwrap().to_string(), op);
        }
    }

    #[test]
    fn test_unsupported_operator() {
        let err = where_("age", "=~", 3).unwrap_err();
        assert!(matches!(err, DatabasedError::Query(_)));
        assert!(err.to_string().contains("=~"));
    }

    #[test]
    fn test_numeric_comparisons() {
        let gt = where_("a", ">", 1).unwrap();
        assert!(!gt.matches(&entry("a", json!(1))));
        assert!(gt.matches(&entry("a", json!(2))));
        assert!(gt.matches(&entry("a", json!(1.5))));

        let le = where_("a", "<=", 2).unwrap();
        assert!(le.matches(&entry("a", json!(2))));
        assert!(le.matches(&entry("a", json!(-7))));
        assert!(!le.matches(&entry("a", json!(3))));

        let ge = where_("a", ">=", 2.0).unwrap();
        assert!(ge.matches(&entry("a", json!(2))));
        assert!(!ge.matches(&entry("a", json!(1))));
    }

    #[test]
    fn test_equality_across_number_representations() {
        let eq = where_("a", "==", 1).unwrap();
        assert!(eq.matches(&entry("a", json!(1.0))));
        assert!(!eq.matches(&entry("a", json!("1"))));

        let ne = where_("a", "!=", 1).unwrap();
        assert!(ne.matches(&entry("a", json!("1"))));
        assert!(!ne.matches(&entry("a", json!(1))));
    }

    #[test]
    fn test_large_unsigned_ordering() {
        let gt = where_("a", ">", u64::MAX - 1).unwrap();
        assert!(gt.matches(&entry("a", json!(u64::MAX))));
    }

    #[test]
    fn test_string_and_bool_comparisons() {
        let lt = where_("name", "<", "m").unwrap();
        assert!(lt.matches(&entry("name", json!("alice"))));
        assert!(!lt.matches(&entry("name", json!("zed"))));

        let gt = where_("active", ">", false).unwrap();
        assert!(gt.matches(&entry("active", json!(true))));
    }

    #[test]
    fn test_mismatched_types_never_order() {
        let gt = where_("a", ">", 1).unwrap();
        assert!(!gt.matches(&entry("a", json!("5"))));
        assert!(!gt.matches(&entry("a", Value::Null)));
    }

    #[test]
    fn test_structural_equality_for_composites() {
        let eq = where_("tags", "==", json!(["a", "b"])).unwrap();
        assert!(eq.matches(&entry("tags", json!(["a", "b"]))));
        assert!(!eq.matches(&entry("tags", json!(["b", "a"]))));
    }

    #[test]
    fn test_entry_for_other_property_never_matches() {
        let eq = where_("a", "==", 1).unwrap();
        assert!(!eq.matches(&entry("b", json!(1))));
    }

    #[test]
    fn test_limit_validation() {
        assert_eq!(limit(&json!(3)).unwrap(), 3);
        assert_eq!(limit(&json!(0)).unwrap(), 0);
        assert!(matches!(limit(&json!("3")), Err(DatabasedError::Query(_))));
        assert!(matches!(limit(&json!(-1)), Err(DatabasedError::Query(_))));
        assert!(matches!(limit(&json!(1.5)), Err(DatabasedError::Query(_))));
    }
}
