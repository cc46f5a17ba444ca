//! Abstract syntax tree for kiln templates.
//!
//! The tree produced by [`parse`](crate::parse) is immutable. Later passes
//! never rewrite it; they attach information through side tables keyed by
//! [`ExprId`], which the parser hands out to every expression node and every
//! loop binding.

use std::fmt;

/// Byte range into the template source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Returns a span covering both `self` and `other`.
    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Identifier assigned by the parser to each expression and loop binding.
///
/// Ids are unique within one parsed template and dense, starting at zero,
/// so side tables can be plain vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub u32);

impl ExprId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A parsed template: its header and its body.
#[derive(Debug, Clone, PartialEq)]
pub struct Ast {
    /// `@param` declarations in source order.
    pub params: Vec<ParamDecl>,
    /// Top-level nodes in source order.
    pub body: Vec<Node>,
    /// Number of ids handed out; every [`ExprId`] in the tree is below this.
    pub id_count: u32,
}

/// One `@param <type> <name> [= <default>]` header line.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDecl {
    pub name: String,
    pub ty: TypeExpr,
    pub default: Option<Expr>,
    pub span: Span,
}

/// Type as written in a header, before resolution against a type oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeExpr {
    /// A bare type name: `int`, `string`, `User`, ...
    Named(String),
    /// `list<T>`
    List(Box<TypeExpr>),
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeExpr::Named(name) => f.write_str(name),
            TypeExpr::List(inner) => write!(f, "list<{}>", inner),
        }
    }
}

/// A template body node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Verbatim text.
    Literal(Literal),
    /// `${expr}` or `$unsafe{expr}`.
    Interpolation(Interpolation),
    /// `@if(...) ... [@elseif(...) ...]* [@else ...] @end`
    If(IfBlock),
    /// `@for(x [, i] in expr) ... [@else ...] @end`
    For(ForBlock),
    /// `@template.name(args)`
    Include(Include),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Literal {
    pub text: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interpolation {
    pub expr: Expr,
    /// `true` for `$unsafe{...}`: the value is emitted without escaping.
    pub raw: bool,
    pub span: Span,
}

/// One `@if` / `@elseif` arm.
#[derive(Debug, Clone, PartialEq)]
pub struct CondArm {
    pub condition: Expr,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfBlock {
    /// The `@if` arm followed by every `@elseif` arm, in source order.
    pub arms: Vec<CondArm>,
    pub otherwise: Option<Vec<Node>>,
    pub span: Span,
}

/// A loop-local name introduced by `@for`.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub id: ExprId,
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForBlock {
    pub element: Binding,
    pub index: Option<Binding>,
    pub iterable: Expr,
    pub body: Vec<Node>,
    /// Body of `@else`, rendered when the sequence is empty.
    pub otherwise: Option<Vec<Node>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Include {
    pub id: ExprId,
    /// Target template name, `/`-separated (`layout/page`).
    pub target: String,
    pub args: Vec<IncludeArg>,
    pub span: Span,
}

/// One include argument, either positional or `name = expr`.
#[derive(Debug, Clone, PartialEq)]
pub struct IncludeArg {
    pub name: Option<String>,
    pub value: Expr,
}

/// Expression node.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub id: ExprId,
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Lit(Lit),
    Ident(String),
    /// `[a, b, c]`
    List(Vec<Expr>),
    /// `object.name`
    Member { object: Box<Expr>, name: String },
    /// `object.name(args)`
    Call {
        object: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Lit {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Not => f.write_str("!"),
            UnaryOp::Neg => f.write_str("-"),
        }
    }
}
