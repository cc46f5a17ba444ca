//! # kiln-syntax - template source to AST
//!
//! The front end of the kiln template compiler: a single-pass lexer and a
//! recursive-descent parser producing an immutable [`Ast`].
//!
//! ## Syntax
//!
//! ```text
//! @param string name
//! @param list<Item> items
//! Hello ${name.upper()}!
//! @for(item, i in items)
//!   ${i}: ${item.title} $unsafe{item.html}
//! @else
//!   nothing here
//! @end
//! @if(items.len() > 10) many @elseif(items.is_empty()) none @else some @end
//! @template.layout.footer(name, year = 2024)
//! <%-- comments are dropped --%>
//! @raw ${not interpolated} @endraw
//! ```
//!
//! Anything that is not a recognized tag is literal text and is kept byte for
//! byte. The first syntax error aborts parsing; no partial tree is returned.
//!
//! ## Example
//!
//! ```
//! use kiln_syntax::{parse, Node};
//!
//! let ast = parse("@param string name\nHello ${name}!").unwrap();
//! assert_eq!(ast.params[0].name, "name");
//! assert!(matches!(ast.body[1], Node::Interpolation(_)));
//! ```

pub mod ast;
mod error;
mod expr;
mod lexer;
mod parser;

pub use ast::{
    Ast, BinaryOp, Binding, CondArm, Expr, ExprId, ExprKind, ForBlock, IfBlock, Include,
    IncludeArg, Interpolation, Lit, Literal, Node, ParamDecl, Span, TypeExpr, UnaryOp,
};
pub use error::{Location, ParseError, ParseErrorKind, Result};

/// Deepest nesting accepted for blocks, expressions and `list<...>` types.
///
/// Deeper sources fail with [`ParseErrorKind::NestingTooDeep`].
pub const MAX_NESTING: usize = 64;

/// Options controlling how a template is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    /// Drop the indentation and line break around control tags that sit
    /// alone on their line.
    pub trim_control_lines: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            trim_control_lines: true,
        }
    }
}

/// Parses `source` with default options.
pub fn parse(source: &str) -> Result<Ast> {
    parse_with(source, &ParseOptions::default())
}

/// Parses `source`.
pub fn parse_with(source: &str, options: &ParseOptions) -> Result<Ast> {
    let tokens = lexer::tokenize(source, options.trim_control_lines)?;
    parser::Parser::new(source, tokens).parse()
}
