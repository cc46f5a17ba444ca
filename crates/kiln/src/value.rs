//! Runtime values and the [`Model`] trait.
//!
//! A render reads its data through [`Model`]: the root model supplies the
//! template parameters by name, and record-typed values are themselves
//! models. Values borrow from the model wherever possible.
//!
//! # Example
//!
//! ```
//! use kiln::{Model, RenderError, Value};
//!
//! struct User {
//!     name: String,
//!     admin: bool,
//! }
//!
//! impl Model for User {
//!     fn field(&self, name: &str) -> Option<Value<'_>> {
//!         match name {
//!             "name" => Some(Value::from(self.name.as_str())),
//!             "admin" => Some(Value::Bool(self.admin)),
//!             _ => None,
//!         }
//!     }
//!
//!     fn call(&self, name: &str, _args: &[Value<'_>]) -> Result<Value<'_>, RenderError> {
//!         match name {
//!             "initial" => Ok(Value::from(self.name.chars().take(1).collect::<String>())),
//!             _ => Err(RenderError::UnknownMethod { name: name.to_string() }),
//!         }
//!     }
//! }
//! ```

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::RenderError;
use crate::types::TypeDesc;

/// Data source for a render.
///
/// Implementations are expected to be cheap to query; expression evaluation
/// calls [`field`](Model::field) every time an access is executed.
pub trait Model {
    /// Returns the field called `name`, or `None` if there is no such field.
    fn field(&self, name: &str) -> Option<Value<'_>>;

    /// Invokes the method called `name`.
    fn call(&self, name: &str, args: &[Value<'_>]) -> Result<Value<'_>, RenderError> {
        let _ = args;
        Err(RenderError::UnknownMethod {
            name: name.to_string(),
        })
    }
}

/// A runtime value, possibly borrowed from a [`Model`].
#[derive(Clone)]
pub enum Value<'a> {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Cow<'a, str>),
    List(Vec<Value<'a>>),
    Record(&'a dyn Model),
}

impl<'a> Value<'a> {
    /// Name of the value's kind, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Record(_) => "record",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric view, widening ints.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value<'a>]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Textual form used by interpolations.
    ///
    /// `null` prints as the empty string; lists and records are not
    /// renderable.
    pub fn to_text(&self) -> Result<Cow<'_, str>, RenderError> {
        match self {
            Value::Null => Ok(Cow::Borrowed("")),
            Value::Bool(b) => Ok(Cow::Borrowed(if *b { "true" } else { "false" })),
            Value::Int(n) => Ok(Cow::Owned(n.to_string())),
            Value::Float(n) => Ok(Cow::Owned(n.to_string())),
            Value::Str(s) => Ok(Cow::Borrowed(s)),
            Value::List(_) | Value::Record(_) => Err(RenderError::NotRenderable {
                found: self.type_name(),
            }),
        }
    }

    /// Shallow check of a runtime value against a declared type.
    ///
    /// List elements and record members are not inspected.
    pub fn conforms_to(&self, ty: &TypeDesc) -> bool {
        match (self, ty) {
            (Value::Null, _) => true,
            (Value::Bool(_), TypeDesc::Bool) => true,
            (Value::Int(_), TypeDesc::Int | TypeDesc::Float) => true,
            (Value::Float(_), TypeDesc::Float) => true,
            (Value::Str(_), TypeDesc::Str) => true,
            (Value::List(_), TypeDesc::List(_)) => true,
            (Value::Record(_), TypeDesc::Record(_)) => true,
            _ => false,
        }
    }

    /// Converts an `int` to `float` when the declared type asks for it.
    pub(crate) fn widen_to(self, ty: &TypeDesc) -> Value<'a> {
        match (self, ty) {
            (Value::Int(n), TypeDesc::Float) => Value::Float(n as f64),
            (value, _) => value,
        }
    }

    /// Equality used by `==`, `!=` and `contains`.
    ///
    /// Numbers compare by value across `int` and `float`; records compare by
    /// identity.
    pub fn loose_eq(&self, other: &Value<'_>) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.as_float() == other.as_float()
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Value::Record(a), Value::Record(b)) => std::ptr::eq(
                *a as *const dyn Model as *const u8,
                *b as *const dyn Model as *const u8,
            ),
            _ => false,
        }
    }
}

impl fmt::Debug for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Int(n) => f.debug_tuple("Int").field(n).finish(),
            Value::Float(n) => f.debug_tuple("Float").field(n).finish(),
            Value::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Value::List(items) => f.debug_tuple("List").field(items).finish(),
            Value::Record(_) => f.write_str("Record(..)"),
        }
    }
}

impl PartialEq for Value<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.loose_eq(other)
    }
}

impl From<bool> for Value<'_> {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value<'_> {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value<'_> {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<f64> for Value<'_> {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl<'a> From<&'a str> for Value<'a> {
    fn from(s: &'a str) -> Self {
        Value::Str(Cow::Borrowed(s))
    }
}

impl From<String> for Value<'_> {
    fn from(s: String) -> Self {
        Value::Str(Cow::Owned(s))
    }
}

impl<'a, T: Into<Value<'a>>> From<Vec<T>> for Value<'a> {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<'a> From<&'a dyn Model> for Value<'a> {
    fn from(model: &'a dyn Model) -> Self {
        Value::Record(model)
    }
}

/// A compile-time constant: a literal or a parameter default.
///
/// Owns its data so compiled templates stay `Send + Sync`.
#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Box<str>),
    List(Vec<Const>),
}

impl Const {
    pub fn to_value(&self) -> Value<'_> {
        match self {
            Const::Null => Value::Null,
            Const::Bool(b) => Value::Bool(*b),
            Const::Int(n) => Value::Int(*n),
            Const::Float(n) => Value::Float(*n),
            Const::Str(s) => Value::Str(Cow::Borrowed(s)),
            Const::List(items) => Value::List(items.iter().map(Const::to_value).collect()),
        }
    }
}

// ============================================================================
// Model implementations
// ============================================================================

fn json_value(value: &serde_json::Value) -> Value<'_> {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::Str(Cow::Borrowed(s)),
        serde_json::Value::Array(items) => Value::List(items.iter().map(json_value).collect()),
        serde_json::Value::Object(_) => Value::Record(value),
    }
}

/// JSON objects are records; any other JSON value has no fields.
impl Model for serde_json::Value {
    fn field(&self, name: &str) -> Option<Value<'_>> {
        self.as_object()?.get(name).map(json_value)
    }
}

impl<'v> Model for BTreeMap<String, Value<'v>> {
    fn field(&self, name: &str) -> Option<Value<'_>> {
        self.get(name).cloned()
    }
}

impl<'v> Model for HashMap<String, Value<'v>> {
    fn field(&self, name: &str) -> Option<Value<'_>> {
        self.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_model_fields() {
        let data = json!({
            "name": "Ann",
            "count": 3,
            "ratio": 0.5,
            "tags": ["a", "b"],
            "owner": {"id": 7},
            "none": null
        });
        assert_eq!(data.field("name"), Some(Value::from("Ann")));
        assert_eq!(data.field("count"), Some(Value::Int(3)));
        assert_eq!(data.field("ratio"), Some(Value::Float(0.5)));
        assert_eq!(data.field("tags"), Some(Value::from(vec!["a", "b"])));
        assert_eq!(data.field("none"), Some(Value::Null));
        assert!(data.field("missing").is_none());

        let Some(Value::Record(owner)) = data.field("owner") else {
            panic!("expected record");
        };
        assert_eq!(owner.field("id"), Some(Value::Int(7)));
    }

    #[test]
    fn test_json_scalars_have_no_fields() {
        assert!(json!(3).field("x").is_none());
    }

    #[test]
    fn test_map_model() {
        let mut map = BTreeMap::new();
        map.insert("n".to_string(), Value::Int(1));
        assert_eq!(map.field("n"), Some(Value::Int(1)));
        assert!(matches!(
            map.call("anything", &[]),
            Err(RenderError::UnknownMethod { .. })
        ));
    }

    #[test]
    fn test_text_forms() {
        assert_eq!(Value::Null.to_text().unwrap(), "");
        assert_eq!(Value::Bool(true).to_text().unwrap(), "true");
        assert_eq!(Value::Int(-4).to_text().unwrap(), "-4");
        assert_eq!(Value::Float(2.5).to_text().unwrap(), "2.5");
        assert_eq!(Value::Float(3.0).to_text().unwrap(), "3");
        assert!(matches!(
            Value::from(vec![1i64]).to_text(),
            Err(RenderError::NotRenderable { found: "list" })
        ));
    }

    #[test]
    fn test_loose_eq_numbers() {
        assert!(Value::Int(2).loose_eq(&Value::Float(2.0)));
        assert!(!Value::Int(2).loose_eq(&Value::from("2")));
    }

    #[test]
    fn test_conforms_to() {
        assert!(Value::Int(1).conforms_to(&TypeDesc::Float));
        assert!(Value::Null.conforms_to(&TypeDesc::Str));
        assert!(!Value::from("x").conforms_to(&TypeDesc::Int));
        assert_eq!(Value::Int(2).widen_to(&TypeDesc::Float), Value::Float(2.0));
    }
}
