//! Error types for loading, checking, compiling and rendering templates.
//!
//! Every stage has its own error enum; [`Error`] wraps them for the
//! [`Registry`](crate::Registry) entry points.

use std::fmt;
use std::io;

use kiln_syntax::{Location, ParseError};
use thiserror::Error;

use crate::output::OutputMode;
use crate::types::TypeDesc;

/// Failure to fetch a template's source text.
#[derive(Debug, Error)]
pub enum LoadError {
    /// No template with this name exists.
    #[error("template '{name}' not found")]
    NotFound { name: String },

    /// The name cannot be mapped to a template location.
    #[error("invalid template name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// Reading the template failed.
    #[error("failed to read template '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
}

impl LoadError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn invalid_name(name: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason,
        }
    }
}

/// What a type check rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TypeErrorKind {
    #[error("unknown type '{name}'")]
    UnknownType { name: String },

    #[error("parameter '{name}' is declared more than once")]
    DuplicateParameter { name: String },

    #[error("default value for parameter '{name}' must be a {expected} literal")]
    InvalidDefault { name: String, expected: TypeDesc },

    #[error("unresolved identifier '{name}'")]
    UnresolvedIdentifier { name: String },

    #[error("type {ty} has no member '{name}'")]
    UnknownMember { ty: TypeDesc, name: String },

    #[error("'{name}' on {ty} is a field, not a method")]
    NotAMethod { ty: TypeDesc, name: String },

    #[error("'{name}' on {ty} is a method and must be called")]
    NotAField { ty: TypeDesc, name: String },

    #[error("'{name}' takes {expected} argument(s), {found} given")]
    ArgumentCount {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("argument '{name}' expects {expected}, found {found}")]
    ArgumentType {
        name: String,
        expected: TypeDesc,
        found: TypeDesc,
    },

    #[error("condition must be bool, found {found}")]
    NonBooleanCondition { found: TypeDesc },

    #[error("cannot iterate over {found}, expected a list")]
    NotIterable { found: TypeDesc },

    #[error("cannot render a value of type {found}")]
    NotRenderable { found: TypeDesc },

    #[error("operator '{op}' cannot be applied to {operands}")]
    InvalidOperands { op: &'static str, operands: String },

    #[error("list elements must share a type, found {first} and {other}")]
    MixedList { first: TypeDesc, other: TypeDesc },

    #[error("unknown template '{name}'")]
    UnknownTemplate { name: String },

    #[error("template '{template}' has no parameter '{name}'")]
    UnknownArgument { template: String, name: String },

    #[error("argument '{name}' is given more than once")]
    DuplicateArgument { name: String },

    #[error("missing argument '{name}' for template '{template}'")]
    MissingArgument { template: String, name: String },

    #[error("template '{template}' takes {expected} argument(s), {found} given")]
    TooManyArguments {
        template: String,
        expected: usize,
        found: usize,
    },

    #[error("positional argument after a named argument")]
    PositionalAfterNamed,
}

/// One type error with the location of the offending construct.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} at line {}, column {}", .location.line, .location.column)]
pub struct TypeError {
    pub kind: TypeErrorKind,
    pub location: Location,
}

/// Every type error found in one template, in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeErrors(pub Vec<TypeError>);

impl TypeErrors {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TypeError> {
        self.0.iter()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &TypeErrorKind> {
        self.0.iter().map(|e| &e.kind)
    }
}

impl fmt::Display for TypeErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for TypeErrors {}

impl<'a> IntoIterator for &'a TypeErrors {
    type Item = &'a TypeError;
    type IntoIter = std::slice::Iter<'a, TypeError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Internal invariant violation while generating code for a bound template.
///
/// Unreachable for templates that passed binding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("expression {id} has no resolution")]
    Unresolved { id: u32 },

    #[error("include {id} has no argument plan")]
    MissingIncludePlan { id: u32 },
}

/// Failure while executing a compiled template.
///
/// A render that fails leaves its output in an unspecified state; discard it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    #[error("missing parameter '{name}'")]
    MissingParameter { name: String },

    #[error("missing field '{name}'")]
    MissingField { name: String },

    #[error("cannot access '{name}' on null")]
    NullDereference { name: String },

    #[error("unknown method '{name}'")]
    UnknownMethod { name: String },

    #[error("type mismatch for '{name}': expected {expected}, found {found}")]
    TypeMismatch {
        name: String,
        expected: String,
        found: &'static str,
    },

    #[error("template compiled for {expected} output cannot render into {found} output")]
    ModeMismatch {
        expected: OutputMode,
        found: OutputMode,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow in '{op}'")]
    Overflow { op: &'static str },

    #[error("cannot render a {found} value")]
    NotRenderable { found: &'static str },

    #[error("cannot iterate over a {found} value")]
    NotIterable { found: &'static str },

    #[error("cannot resolve included template '{template}': {reason}")]
    UnresolvedInclude { template: String, reason: String },

    #[error("include nesting exceeds {limit} levels at '{template}'")]
    RecursionLimit { template: String, limit: usize },

    #[error("in included template '{template}': {source}")]
    Include {
        template: String,
        #[source]
        source: Box<RenderError>,
    },

    /// An error reported by a [`Model`](crate::Model) implementation.
    #[error("{0}")]
    Model(String),
}

impl RenderError {
    pub fn model(message: impl Into<String>) -> Self {
        Self::Model(message.into())
    }

    pub(crate) fn mismatch(
        name: impl Into<String>,
        expected: impl fmt::Display,
        found: &'static str,
    ) -> Self {
        Self::TypeMismatch {
            name: name.into(),
            expected: expected.to_string(),
            found,
        }
    }
}

/// Failure to read configuration or type declarations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid type '{text}' for '{record}.{member}'")]
    InvalidType {
        record: String,
        member: String,
        text: String,
    },

    #[error("'{record}.{member}' refers to undeclared type '{name}'")]
    UndeclaredType {
        record: String,
        member: String,
        name: String,
    },
}

/// Any failure surfaced by the registry.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("syntax error in template '{template}': {source}")]
    Parse {
        template: String,
        #[source]
        source: ParseError,
    },

    #[error("type errors in template '{template}':\n{errors}")]
    Type { template: String, errors: TypeErrors },

    #[error("failed to compile template '{template}': {source}")]
    Compile {
        template: String,
        #[source]
        source: CompileError,
    },

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, Error>;
