//! Static types and parameter schemas.

use std::fmt;
use std::str::FromStr;

use crate::value::Const;

/// The static type of a template expression or parameter.
///
/// Headers and YAML declarations spell these `bool`, `int`, `float`,
/// `string`, `list<T>`, or the name of a record type known to the
/// [`TypeOracle`](crate::TypeOracle).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDesc {
    Bool,
    Int,
    Float,
    Str,
    /// The type of the `null` literal.
    Null,
    List(Box<TypeDesc>),
    /// A record type declared in the type oracle.
    Record(String),
}

impl TypeDesc {
    pub fn list(element: TypeDesc) -> Self {
        TypeDesc::List(Box::new(element))
    }

    pub fn record(name: impl Into<String>) -> Self {
        TypeDesc::Record(name.into())
    }

    /// Maps a primitive type name; `None` for anything else.
    pub fn primitive(name: &str) -> Option<TypeDesc> {
        match name {
            "bool" => Some(TypeDesc::Bool),
            "int" => Some(TypeDesc::Int),
            "float" => Some(TypeDesc::Float),
            "string" => Some(TypeDesc::Str),
            _ => None,
        }
    }

    /// Whether a value of type `other` may be used where `self` is expected.
    ///
    /// `null` is accepted everywhere, `int` widens to `float`, and lists
    /// follow their element types.
    ///
    /// ```
    /// use kiln::TypeDesc;
    ///
    /// assert!(TypeDesc::Float.accepts(&TypeDesc::Int));
    /// assert!(!TypeDesc::Int.accepts(&TypeDesc::Float));
    /// assert!(TypeDesc::list(TypeDesc::Str).accepts(&TypeDesc::list(TypeDesc::Null)));
    /// ```
    pub fn accepts(&self, other: &TypeDesc) -> bool {
        match (self, other) {
            (_, TypeDesc::Null) => true,
            (TypeDesc::Float, TypeDesc::Int) => true,
            (TypeDesc::List(a), TypeDesc::List(b)) => a.accepts(b),
            (a, b) => a == b,
        }
    }

    /// The narrowest type accepting both `self` and `other`, if any.
    pub fn unify(&self, other: &TypeDesc) -> Option<TypeDesc> {
        if self.accepts(other) {
            Some(self.clone())
        } else if other.accepts(self) {
            Some(other.clone())
        } else {
            None
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, TypeDesc::Int | TypeDesc::Float)
    }

    /// Types an interpolation can print.
    pub fn is_renderable(&self) -> bool {
        matches!(
            self,
            TypeDesc::Bool | TypeDesc::Int | TypeDesc::Float | TypeDesc::Str | TypeDesc::Null
        )
    }

    /// Record names referenced anywhere inside this type.
    pub(crate) fn record_name(&self) -> Option<&str> {
        match self {
            TypeDesc::Record(name) => Some(name),
            TypeDesc::List(inner) => inner.record_name(),
            _ => None,
        }
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::Bool => f.write_str("bool"),
            TypeDesc::Int => f.write_str("int"),
            TypeDesc::Float => f.write_str("float"),
            TypeDesc::Str => f.write_str("string"),
            TypeDesc::Null => f.write_str("null"),
            TypeDesc::List(inner) => write!(f, "list<{}>", inner),
            TypeDesc::Record(name) => f.write_str(name),
        }
    }
}

/// Error returned when a type string is malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTypeError(pub String);

impl fmt::Display for ParseTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid type '{}'", self.0)
    }
}

impl std::error::Error for ParseTypeError {}

impl FromStr for TypeDesc {
    type Err = ParseTypeError;

    /// Parses `bool`, `int`, `float`, `string`, `list<T>` or a record name.
    ///
    /// Record names are not checked against any oracle here.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if let Some(inner) = text
            .strip_prefix("list<")
            .and_then(|rest| rest.strip_suffix('>'))
        {
            return inner.parse().map(TypeDesc::list);
        }
        if let Some(ty) = TypeDesc::primitive(text) {
            return Ok(ty);
        }
        let is_ident = text
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && text.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if is_ident && text != "list" && text != "null" {
            Ok(TypeDesc::Record(text.to_string()))
        } else {
            Err(ParseTypeError(s.to_string()))
        }
    }
}

/// One declared template parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub ty: TypeDesc,
    pub default: Option<Const>,
}

/// Ordered parameter declarations of a template.
///
/// Order is significant: included templates receive their arguments in
/// schema order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParameterSchema {
    params: Vec<Parameter>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a required parameter. Replaces an existing parameter of the same
    /// name in place.
    pub fn with(mut self, name: impl Into<String>, ty: TypeDesc) -> Self {
        self.insert(Parameter {
            name: name.into(),
            ty,
            default: None,
        });
        self
    }

    /// Adds a parameter with a default value.
    pub fn with_default(mut self, name: impl Into<String>, ty: TypeDesc, default: Const) -> Self {
        self.insert(Parameter {
            name: name.into(),
            ty,
            default: Some(default),
        });
        self
    }

    pub(crate) fn insert(&mut self, param: Parameter) {
        match self.params.iter_mut().find(|p| p.name == param.name) {
            Some(existing) => *existing = param,
            None => self.params.push(param),
        }
    }

    /// Looks up a parameter and its position.
    pub fn get(&self, name: &str) -> Option<(usize, &Parameter)> {
        self.params.iter().enumerate().find(|(_, p)| p.name == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Parameter> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl<'a> IntoIterator for &'a ParameterSchema {
    type Item = &'a Parameter;
    type IntoIter = std::slice::Iter<'a, Parameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.params.iter()
    }
}
