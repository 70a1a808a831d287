//! Row filter conditions.

use serde::{Deserialize, Serialize};

/// Comparison operator of a [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

/// One `(column, op, value)` filter. On the wire it is a three-element
/// array such as `["status", "==", "open"]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, CompareOp, String)", into = "(String, CompareOp, String)")]
pub struct Condition {
    pub column: String,
    pub op: CompareOp,
    pub value: String,
}

impl Condition {
    pub fn new(column: impl Into<String>, op: CompareOp, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// Whether a cell value satisfies this condition.
    pub fn matches(&self, cell: &str) -> bool {
        match self.op {
            CompareOp::Eq => cell == self.value,
            CompareOp::Ne => cell != self.value,
        }
    }
}

impl From<(String, CompareOp, String)> for Condition {
    fn from((column, op, value): (String, CompareOp, String)) -> Self {
        Self { column, op, value }
    }
}

impl From<Condition> for (String, CompareOp, String) {
    fn from(c: Condition) -> Self {
        (c.column, c.op, c.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_from_wire_array() {
        let conds: Vec<Condition> =
            serde_json::from_str(r#"[["status","==","未処理"],["lock","!=",""]]"#).unwrap();
        assert_eq!(conds[0], Condition::new("status", CompareOp::Eq, "未処理"));
        assert_eq!(conds[1].op, CompareOp::Ne);
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let parsed: Result<Condition, _> = serde_json::from_str(r#"["a","<","1"]"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_matches() {
        let eq = Condition::new("s", CompareOp::Eq, "x");
        assert!(eq.matches("x"));
        assert!(!eq.matches("X"));
        let ne = Condition::new("s", CompareOp::Ne, "");
        assert!(ne.matches("taken"));
        assert!(!ne.matches(""));
    }
}
