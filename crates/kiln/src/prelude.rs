//! Common imports for rendering templates.
//!
//! ```
//! use kiln::prelude::*;
//!
//! let registry = Registry::new(MemorySource::new().with("hi", "hi"));
//! let out = registry.render("hi", OutputMode::Bytes, &serde_json::json!({})).unwrap();
//! assert_eq!(out.as_bytes(), b"hi");
//! ```

// Registry and sources
pub use crate::{DirSource, EngineConfig, MemorySource, Registry, TemplateKey, TemplateSource};

// Data
pub use crate::{Model, RecordType, TypeDesc, TypeOracle, TypeRegistry, Value};

// Output control
pub use crate::{ByteOutput, ContentType, Output, OutputMode, RenderedOutput, TextOutput};

// Errors
pub use crate::{Error, RenderError};
