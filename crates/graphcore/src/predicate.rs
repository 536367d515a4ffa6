//! Conditions evaluated against run state by conditional edges and loops.
//!
//! Predicates are a closed set of declarative kinds plus one escape hatch,
//! [`Predicate::Custom`], which wraps a pure function over the fields. Custom
//! predicates can only be built in code. They serialize as
//! `{"custom": name}` so definitions holding them can still be inspected,
//! but that form is not accepted back.

use crate::{Fields, Value};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Predicate {
    /// `{"field": "x", "operator": ">", "value": 1}`
    Condition(Condition),
    /// `{"all": [..]}`; true for an empty list.
    All { all: Vec<Predicate> },
    /// `{"any": [..]}`; false for an empty list.
    Any { any: Vec<Predicate> },
    /// `{"not": {..}}`
    Not { not: Box<Predicate> },
    /// `{"exists": "x"}`: field is present and not null.
    Exists { exists: String },
    /// `{"always": true}`
    Always { always: bool },
    #[serde(skip_deserializing)]
    Custom(CustomPredicate),
}

impl Predicate {
    pub fn evaluate(&self, fields: &Fields) -> bool {
        match self {
            Predicate::Condition(condition) => condition.evaluate(fields),
            Predicate::All { all } => all.iter().all(|p| p.evaluate(fields)),
            Predicate::Any { any } => any.iter().any(|p| p.evaluate(fields)),
            Predicate::Not { not } => !not.evaluate(fields),
            Predicate::Exists { exists } => fields.get(exists).map(|v| !v.is_null()).unwrap_or(false),
            Predicate::Always { always } => *always,
            Predicate::Custom(custom) => custom.evaluate(fields),
        }
    }

    pub fn field(field: impl Into<String>, operator: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Condition(Condition {
            field: field.into(),
            operator,
            value: value.into(),
        })
    }

    pub fn always() -> Self {
        Predicate::Always { always: true }
    }

    pub fn negate(self) -> Self {
        Predicate::Not { not: Box::new(self) }
    }

    pub fn custom<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Fields) -> bool + Send + Sync + 'static,
    {
        Predicate::Custom(CustomPredicate::new(name, f))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    /// Field value is a member of the condition value.
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not_in")]
    NotIn,
    /// Field value contains the condition value.
    #[serde(rename = "contains")]
    Contains,
}

/// Comparison of one state field against a constant.
///
/// A missing field reads as null. Ordering operators on incomparable values
/// evaluate to false, as do membership tests against a non-container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: CompareOp,
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn evaluate(&self, fields: &Fields) -> bool {
        let actual = fields.get(&self.field).unwrap_or(&Value::Null);
        let ordering = || actual.compare(&self.value);

        match self.operator {
            CompareOp::Eq => *actual == self.value,
            CompareOp::Ne => *actual != self.value,
            CompareOp::Gt => ordering() == Some(Ordering::Greater),
            CompareOp::Lt => ordering() == Some(Ordering::Less),
            CompareOp::Ge => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
            CompareOp::Le => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
            CompareOp::In => self.value.contains(actual).unwrap_or(false),
            CompareOp::NotIn => self.value.contains(actual).map(|found| !found).unwrap_or(false),
            CompareOp::Contains => actual.contains(&self.value).unwrap_or(false),
        }
    }
}

/// Named callback predicate injected from code.
#[derive(Clone)]
pub struct CustomPredicate {
    name: String,
    f: Arc<dyn Fn(&Fields) -> bool + Send + Sync>,
}

impl CustomPredicate {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Fields) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            f: Arc::new(f),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn evaluate(&self, fields: &Fields) -> bool {
        (self.f)(fields)
    }
}

impl Serialize for CustomPredicate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("custom", &self.name)?;
        map.end()
    }
}

impl fmt::Debug for CustomPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomPredicate")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
