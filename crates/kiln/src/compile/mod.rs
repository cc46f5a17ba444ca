//! Compilation pipeline: parse, bind, generate.
//!
//! ```text
//! source --parse--> Template --bind--> BoundTemplate --generate--> CompiledTemplate
//! ```
//!
//! [`Registry`](crate::Registry) drives these stages and caches the results.
//! They are public so a template can be compiled without a registry, or so a
//! tool can stop after binding to report type errors.

pub mod bind;
pub mod codegen;
mod eval;

use std::fmt;
use std::sync::{Arc, Weak};

use kiln_syntax::{Ast, ParseOptions};

use crate::error::{Error, Result};
use crate::oracle::{TypeOracle, TypeRegistry};
use crate::output::{Literal, OutputMode};
use crate::types::ParameterSchema;

pub use bind::{bind, schema_of, BoundTemplate, NoIncludes, SchemaLookup};
pub use codegen::{generate, generate_linked};

use codegen::Op;

/// A parsed template.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    source: Arc<str>,
    ast: Ast,
}

impl Template {
    /// Parses `source`. Syntax errors become [`Error::Parse`] naming the
    /// template.
    pub fn parse(
        name: impl Into<String>,
        source: impl Into<Arc<str>>,
        options: &ParseOptions,
    ) -> Result<Self> {
        let name = name.into();
        let source = source.into();
        match kiln_syntax::parse_with(&source, options) {
            Ok(ast) => Ok(Self { name, source, ast }),
            Err(err) => Err(Error::Parse {
                template: name,
                source: err,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Ast {
        &self.ast
    }
}

/// Resolves include targets while a template renders.
///
/// Implemented by the registry; a template compiled with
/// [`generate_linked`] holds a weak handle to its resolver.
pub trait IncludeResolver: Send + Sync {
    /// Returns the compiled form of `name` for `mode`, compiling it if needed.
    fn resolve(&self, name: &str, mode: OutputMode) -> Result<Arc<CompiledTemplate>>;
}

/// An executable template bound to one output mode.
///
/// Compiled templates are immutable and may be rendered from any number of
/// threads at once.
pub struct CompiledTemplate {
    pub(crate) name: String,
    pub(crate) mode: OutputMode,
    pub(crate) schema: ParameterSchema,
    pub(crate) frame_size: usize,
    pub(crate) ops: Vec<Op>,
    pub(crate) resolver: Option<Weak<dyn IncludeResolver>>,
}

impl CompiledTemplate {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    pub fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    /// Number of operations, counting those nested in branches and loops.
    pub fn op_count(&self) -> usize {
        Op::count(&self.ops)
    }

    /// Static text segments in the order they appear in the program.
    pub fn literals(&self) -> Vec<&Literal> {
        let mut out = Vec::new();
        Op::collect_literals(&self.ops, &mut out);
        out
    }
}

impl fmt::Debug for CompiledTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledTemplate")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("schema", &self.schema)
            .field("frame_size", &self.frame_size)
            .field("ops", &self.op_count())
            .finish()
    }
}

/// Binds and generates `template` for `mode`.
///
/// Includes are type-checked through `includes` but cannot be executed, as
/// the result has no resolver; use a [`Registry`](crate::Registry) for
/// templates that include others.
pub fn compile(
    template: &Template,
    oracle: &dyn TypeOracle,
    includes: &dyn SchemaLookup,
    mode: OutputMode,
) -> Result<CompiledTemplate> {
    let bound = bind(template, oracle, includes).map_err(|errors| Error::Type {
        template: template.name().to_string(),
        errors,
    })?;
    generate(&bound, mode).map_err(|source| Error::Compile {
        template: template.name().to_string(),
        source,
    })
}

/// Compiles a standalone template that uses only primitive types.
///
/// ```
/// use kiln::{compile_str, OutputMode, TextOutput, Value};
/// use std::collections::BTreeMap;
///
/// let tpl = compile_str("@param string who\nHi ${who}!", OutputMode::Text).unwrap();
/// let mut model = BTreeMap::new();
/// model.insert("who".to_string(), Value::from("<you>"));
///
/// let mut out = TextOutput::new();
/// tpl.render(&model, &mut out).unwrap();
/// assert_eq!(out.as_str(), "Hi &lt;you&gt;!");
/// ```
pub fn compile_str(source: &str, mode: OutputMode) -> Result<CompiledTemplate> {
    let template = Template::parse("<inline>", source, &ParseOptions::default())?;
    compile(&template, &TypeRegistry::new(), &NoIncludes, mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TypeErrorKind;
    use kiln_syntax::{ParseError, ParseErrorKind};

    #[test]
    fn test_parse_error_names_template() {
        let err = Template::parse("page", "${", &ParseOptions::default()).unwrap_err();
        assert!(matches!(&err, Error::Parse { template, .. } if template == "page"));
        assert!(err.to_string().starts_with("syntax error in template 'page': "));
    }

    #[test]
    fn test_excessive_nesting_is_a_parse_error() {
        let parens = format!("${{{}1{}}}", "(".repeat(10_000), ")".repeat(10_000));
        let blocks = format!("{}x{}", "@if(true)".repeat(10_000), "@end".repeat(10_000));
        for source in [parens, blocks] {
            let err = compile_str(&source, OutputMode::Text).unwrap_err();
            assert!(matches!(
                err,
                Error::Parse {
                    source: ParseError {
                        kind: ParseErrorKind::NestingTooDeep { .. },
                        ..
                    },
                    ..
                }
            ));
        }
    }

    #[test]
    fn test_compile_reports_type_errors() {
        let err = compile_str("${x}", OutputMode::Text).unwrap_err();
        let Error::Type { errors, .. } = err else {
            panic!("expected type errors");
        };
        assert_eq!(
            errors.kinds().collect::<Vec<_>>(),
            vec![&TypeErrorKind::UnresolvedIdentifier {
                name: "x".to_string()
            }]
        );
    }

    #[test]
    fn test_compiled_template_metadata() {
        let tpl = compile_str("@param int n\na${n}b", OutputMode::Bytes).unwrap();
        assert_eq!(tpl.mode(), OutputMode::Bytes);
        assert_eq!(tpl.schema().len(), 1);
        assert_eq!(tpl.op_count(), 3);
        assert!(tpl.literals().iter().all(|l| l.is_encoded()));
    }

    #[test]
    fn test_compiled_template_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CompiledTemplate>();
        assert_send_sync::<Arc<CompiledTemplate>>();
    }
}
