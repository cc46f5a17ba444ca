//! # Kiln - Statically Typed Templates
//!
//! Kiln compiles text templates ahead of rendering. Every template declares
//! its parameters with types; every expression is checked against those
//! types before the template can run. Rendering then executes a
//! pre-resolved program: no name lookups, no type checks on the hot path.
//!
//! ## Core Concepts
//!
//! - [`Registry`]: loads, compiles and caches templates by name and
//!   [`OutputMode`], compiling each key at most once even under concurrency
//! - [`TemplateSource`]: where template text comes from ([`MemorySource`],
//!   [`DirSource`])
//! - [`TypeOracle`]: declares record types and their members
//!   ([`TypeRegistry`], in code or YAML)
//! - [`Model`]: runtime data, read by field name (`serde_json::Value`
//!   works out of the box)
//! - [`Output`]: the sink a render appends to, text ([`TextOutput`]) or
//!   bytes ([`ByteOutput`])
//!
//! ## Quick Start
//!
//! ```
//! use kiln::{MemorySource, Registry};
//! use serde_json::json;
//!
//! let source = MemorySource::new().with(
//!     "inbox",
//!     "@param string name\n@param int count\nHello ${name}, you have ${count} items.",
//! );
//! let registry = Registry::new(source);
//!
//! let text = registry
//!     .render_text("inbox", &json!({ "name": "Ada", "count": 3 }))
//!     .unwrap();
//! assert_eq!(text, "Hello Ada, you have 3 items.");
//! ```
//!
//! ## Record Types
//!
//! Record parameters are checked structurally against a [`TypeOracle`]:
//!
//! ```
//! use kiln::{MemorySource, Registry, TypeRegistry};
//! use serde_json::json;
//!
//! let types = TypeRegistry::from_yaml(r#"
//! Item:
//!   fields:
//!     title: string
//!     tags: list<string>
//! "#).unwrap();
//!
//! let source = MemorySource::new().with("item", "\
//! @param Item item
//! <h1>${item.title}</h1>
//! @for(tag, i in item.tags)
//! ${i}: ${tag.upper()}
//! @else
//! no tags
//! @end
//! ");
//! let registry = Registry::new(source).with_oracle(types);
//!
//! let html = registry
//!     .render_text("item", &json!({ "item": { "title": "Pot", "tags": ["clay", "blue"] } }))
//!     .unwrap();
//! assert_eq!(html, "<h1>Pot</h1>\n0: CLAY\n1: BLUE\n");
//! ```
//!
//! Mistakes are reported before anything renders, all at once, with
//! locations:
//!
//! ```
//! use kiln::{MemorySource, OutputMode, Registry, TemplateKey};
//!
//! let source = MemorySource::new().with("bad", "@param int n\n${n.title} ${m}");
//! let err = Registry::new(source)
//!     .get_or_compile(&TemplateKey::new("bad", OutputMode::Text))
//!     .unwrap_err();
//! assert_eq!(
//!     err.to_string(),
//!     "type errors in template 'bad':\n\
//!      type int has no member 'title' at line 2, column 3\n\
//!      unresolved identifier 'm' at line 2, column 14"
//! );
//! ```
//!
//! ## Template Syntax
//!
//! See [`kiln_syntax`] for the full grammar.

pub mod compile;
mod config;
mod error;
mod loader;
mod oracle;
mod output;
pub mod prelude;
mod registry;
mod types;
mod value;

pub use compile::{
    bind, compile, compile_str, generate, generate_linked, schema_of, BoundTemplate,
    CompiledTemplate, IncludeResolver, NoIncludes, SchemaLookup, Template,
};
pub use config::EngineConfig;
pub use error::{
    CompileError, ConfigError, Error, LoadError, RenderError, Result, TypeError, TypeErrorKind,
    TypeErrors,
};
pub use loader::{DirSource, MemorySource, TemplateSource};
pub use oracle::{Member, MemberKind, RecordType, TypeOracle, TypeRegistry};
pub use output::{
    escape_html, ByteOutput, ContentType, Literal, Output, OutputMode, RenderedOutput, TextOutput,
};
pub use registry::{Registry, TemplateKey};
pub use types::{Parameter, ParameterSchema, ParseTypeError, TypeDesc};
pub use value::{Const, Model, Value};

pub use kiln_syntax::{Location, ParseError, ParseErrorKind, ParseOptions, MAX_NESTING};
