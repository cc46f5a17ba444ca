//! Expression tokenizer and recursive-descent parser.
//!
//! Expressions appear inside `${...}`, `$unsafe{...}`, `@if(...)`,
//! `@elseif(...)`, `@for(...)` headers, include argument lists and `@param`
//! defaults. The parser works on a slice of the template source and reports
//! errors at absolute offsets into the whole template.
//!
//! Precedence, lowest first:
//!
//! | Level | Operators |
//! |-------|-----------|
//! | 1 | `\|\|` |
//! | 2 | `&&` |
//! | 3 | `==` `!=` |
//! | 4 | `<` `<=` `>` `>=` |
//! | 5 | `+` `-` |
//! | 6 | `*` `/` `%` |
//! | 7 | unary `!` `-` |
//! | 8 | `.name`, `.name(args)` |

use std::collections::HashMap;

use crate::ast::{
    BinaryOp, Binding, Expr, ExprId, ExprKind, IncludeArg, Lit, ParamDecl, Span, TypeExpr,
    UnaryOp,
};
use crate::error::{ParseError, ParseErrorKind, Result};
use crate::MAX_NESTING;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    /// Magnitude only; the sign is a separate `-` token.
    Int(u64),
    Float(f64),
    Str(String),
    Sym(&'static str),
    Eof,
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Ident(name) => format!("'{}'", name),
            Tok::Int(n) => format!("'{}'", n),
            Tok::Float(n) => format!("'{}'", n),
            Tok::Str(_) => "string literal".to_string(),
            Tok::Sym(s) => format!("'{}'", s),
            Tok::Eof => "end of expression".to_string(),
        }
    }
}

// Longest symbols first so `==` is not read as `=` `=`.
const SYMBOLS: &[&str] = &[
    "==", "!=", "<=", ">=", "&&", "||", "(", ")", "[", "]", ",", ".", "!", "<", ">", "+", "-",
    "*", "/", "%", "=",
];

fn tokenize(src: &str, start: usize, end: usize) -> Result<Vec<(Tok, Span)>> {
    let text = &src[start..end];
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let from = i;

        if b.is_ascii_alphabetic() || b == b'_' {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            out.push((Tok::Ident(text[from..i].to_string()), Span::new(start + from, start + i)));
            continue;
        }

        if b.is_ascii_digit() {
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            let mut is_float = false;
            if i + 1 < bytes.len() && bytes[i] == b'.' && bytes[i + 1].is_ascii_digit() {
                is_float = true;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let literal = &text[from..i];
            let trailing_ident =
                i < bytes.len() && (bytes[i].is_ascii_alphabetic() || bytes[i] == b'_');
            let invalid = || {
                let mut end = i;
                while end < bytes.len() && bytes[end].is_ascii_alphanumeric() {
                    end += 1;
                }
                ParseError::new(
                    ParseErrorKind::InvalidNumber(text[from..end].to_string()),
                    src,
                    start + from,
                )
            };
            if trailing_ident {
                return Err(invalid());
            }
            let tok = if is_float {
                Tok::Float(literal.parse().map_err(|_| invalid())?)
            } else {
                Tok::Int(literal.parse().map_err(|_| invalid())?)
            };
            out.push((tok, Span::new(start + from, start + i)));
            continue;
        }

        if b == b'"' || b == b'\'' {
            let (value, next) = lex_string(src, start, text, i)?;
            out.push((Tok::Str(value), Span::new(start + from, start + next)));
            i = next;
            continue;
        }

        match SYMBOLS.iter().find(|s| text[i..].starts_with(**s)) {
            Some(sym) => {
                i += sym.len();
                out.push((Tok::Sym(sym), Span::new(start + from, start + i)));
            }
            None => {
                let c = text[i..].chars().next().unwrap_or('?');
                return Err(ParseError::new(
                    ParseErrorKind::UnexpectedCharacter(c),
                    src,
                    start + i,
                ));
            }
        }
    }

    out.push((Tok::Eof, Span::new(end, end)));
    Ok(out)
}

/// Lexes a quoted string starting at `text[at]`; returns the unescaped value
/// and the index just past the closing quote.
fn lex_string(src: &str, base: usize, text: &str, at: usize) -> Result<(String, usize)> {
    let quote = text.as_bytes()[at] as char;
    let mut value = String::new();
    let mut chars = text[at + 1..].char_indices();

    while let Some((offset, c)) = chars.next() {
        match c {
            c if c == quote => return Ok((value, at + 1 + offset + 1)),
            '\\' => {
                let escaped = match chars.next() {
                    Some((_, 'n')) => '\n',
                    Some((_, 't')) => '\t',
                    Some((_, 'r')) => '\r',
                    Some((_, '\\')) => '\\',
                    Some((_, '"')) => '"',
                    Some((_, '\'')) => '\'',
                    Some((_, other)) => {
                        return Err(ParseError::new(
                            ParseErrorKind::InvalidEscape(other),
                            src,
                            base + at + 1 + offset,
                        ))
                    }
                    None => break,
                };
                value.push(escaped);
            }
            c => value.push(c),
        }
    }

    Err(ParseError::new(
        ParseErrorKind::UnterminatedString,
        src,
        base + at,
    ))
}

/// Parser over one expression-bearing slice of the template.
pub(crate) struct ExprParser<'s, 'ids> {
    src: &'s str,
    tokens: Vec<(Tok, Span)>,
    pos: usize,
    next_id: &'ids mut u32,
    /// Current recursion depth of `parse_unary` and `parse_type`.
    depth: usize,
    /// Height of every expression built so far.
    heights: HashMap<ExprId, usize>,
}

impl<'s, 'ids> ExprParser<'s, 'ids> {
    /// Prepares a parser for `src[start..end]`.
    pub(crate) fn new(src: &'s str, start: usize, end: usize, next_id: &'ids mut u32) -> Result<Self> {
        Ok(Self {
            src,
            tokens: tokenize(src, start, end)?,
            pos: 0,
            next_id,
            depth: 0,
            heights: HashMap::new(),
        })
    }

    fn fresh_id(&mut self) -> ExprId {
        let id = ExprId(*self.next_id);
        *self.next_id += 1;
        id
    }

    fn expr(&mut self, kind: ExprKind, span: Span) -> Result<Expr> {
        let height = 1 + self.child_height(&kind);
        if height > MAX_NESTING {
            return Err(self.too_deep(span.start));
        }
        let id = self.fresh_id();
        self.heights.insert(id, height);
        Ok(Expr { id, kind, span })
    }

    fn child_height(&self, kind: &ExprKind) -> usize {
        let of = |e: &Expr| self.heights.get(&e.id).copied().unwrap_or(1);
        match kind {
            ExprKind::Lit(_) | ExprKind::Ident(_) => 0,
            ExprKind::List(items) => items.iter().map(of).max().unwrap_or(0),
            ExprKind::Member { object, .. } => of(&**object),
            ExprKind::Call { object, args, .. } => {
                args.iter().map(of).fold(of(&**object), usize::max)
            }
            ExprKind::Unary { operand, .. } => of(&**operand),
            ExprKind::Binary { lhs, rhs, .. } => of(&**lhs).max(of(&**rhs)),
        }
    }

    fn too_deep(&self, offset: usize) -> ParseError {
        ParseError::new(
            ParseErrorKind::NestingTooDeep { limit: MAX_NESTING },
            self.src,
            offset,
        )
    }

    /// Runs `f` one level deeper, failing once the nesting limit is passed.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.too_deep(self.span().start));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> &Tok {
        &self.tokens[self.pos].0
    }

    fn peek_at(&self, ahead: usize) -> &Tok {
        let idx = (self.pos + ahead).min(self.tokens.len() - 1);
        &self.tokens[idx].0
    }

    fn span(&self) -> Span {
        self.tokens[self.pos].1
    }

    fn advance(&mut self) -> (Tok, Span) {
        let item = self.tokens[self.pos].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        item
    }

    fn is_sym(&self, sym: &str) -> bool {
        matches!(self.peek(), Tok::Sym(s) if *s == sym)
    }

    fn eat_sym(&mut self, sym: &str) -> bool {
        if self.is_sym(sym) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        ParseError::new(
            ParseErrorKind::UnexpectedToken {
                expected: expected.to_string(),
                found: self.peek().describe(),
            },
            self.src,
            self.span().start,
        )
    }

    fn expect_sym(&mut self, sym: &str) -> Result<Span> {
        if self.is_sym(sym) {
            Ok(self.advance().1)
        } else {
            Err(self.unexpected(&format!("'{}'", sym)))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<(String, Span)> {
        match self.peek().clone() {
            Tok::Ident(name) => {
                let span = self.advance().1;
                Ok((name, span))
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn expect_end(&self) -> Result<()> {
        match self.peek() {
            Tok::Eof => Ok(()),
            _ => Err(self.unexpected("end of expression")),
        }
    }

    fn ensure_not_empty(&self) -> Result<()> {
        if matches!(self.peek(), Tok::Eof) {
            return Err(ParseError::new(
                ParseErrorKind::EmptyExpression,
                self.src,
                self.span().start,
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------------

    /// The whole slice is one expression.
    pub(crate) fn parse_complete(mut self) -> Result<Expr> {
        self.ensure_not_empty()?;
        let expr = self.parse_expr()?;
        self.expect_end()?;
        Ok(expr)
    }

    /// `element [, index] in iterable`
    pub(crate) fn parse_for_header(mut self) -> Result<(Binding, Option<Binding>, Expr)> {
        let header_error = |p: &Self| {
            ParseError::new(ParseErrorKind::InvalidForHeader, p.src, p.span().start)
        };

        let element = match self.peek().clone() {
            Tok::Ident(name) if name != "in" => {
                let span = self.advance().1;
                Binding {
                    id: self.fresh_id(),
                    name,
                    span,
                }
            }
            _ => return Err(header_error(&self)),
        };

        let index = if self.eat_sym(",") {
            match self.peek().clone() {
                Tok::Ident(name) if name != "in" => {
                    let span = self.advance().1;
                    Some(Binding {
                        id: self.fresh_id(),
                        name,
                        span,
                    })
                }
                _ => return Err(header_error(&self)),
            }
        } else {
            None
        };

        match self.peek() {
            Tok::Ident(word) if word == "in" => {
                self.advance();
            }
            _ => return Err(header_error(&self)),
        }

        self.ensure_not_empty()?;
        let iterable = self.parse_expr()?;
        self.expect_end()?;
        Ok((element, index, iterable))
    }

    /// `<type> <name> [= <expr>]`, `span` being the whole header line.
    pub(crate) fn parse_param(mut self, span: Span) -> Result<ParamDecl> {
        let param_error =
            |p: &Self| ParseError::new(ParseErrorKind::InvalidParam, p.src, p.span().start);

        if !matches!(self.peek(), Tok::Ident(_)) {
            return Err(param_error(&self));
        }
        let ty = self.parse_type()?;
        let name = match self.peek().clone() {
            Tok::Ident(name) => {
                self.advance();
                name
            }
            _ => return Err(param_error(&self)),
        };
        let default = if self.eat_sym("=") {
            self.ensure_not_empty()?;
            Some(self.parse_expr()?)
        } else {
            None
        };
        if !matches!(self.peek(), Tok::Eof) {
            return Err(param_error(&self));
        }
        Ok(ParamDecl {
            name,
            ty,
            default,
            span,
        })
    }

    /// Comma-separated include arguments, each positional or `name = expr`.
    pub(crate) fn parse_include_args(mut self) -> Result<Vec<IncludeArg>> {
        let mut args = Vec::new();
        if matches!(self.peek(), Tok::Eof) {
            return Ok(args);
        }
        loop {
            let named = matches!(self.peek(), Tok::Ident(_))
                && matches!(self.peek_at(1), Tok::Sym("="));
            let name = if named {
                let (name, _) = self.expect_ident("argument name")?;
                self.expect_sym("=")?;
                Some(name)
            } else {
                None
            };
            self.ensure_not_empty()?;
            let value = self.parse_expr()?;
            args.push(IncludeArg { name, value });
            if !self.eat_sym(",") {
                break;
            }
        }
        self.expect_end()?;
        Ok(args)
    }

    fn parse_type(&mut self) -> Result<TypeExpr> {
        let (name, _) = self.expect_ident("type name")?;
        if name == "list" && self.eat_sym("<") {
            let inner = self.nested(Self::parse_type)?;
            self.expect_sym(">")?;
            return Ok(TypeExpr::List(Box::new(inner)));
        }
        Ok(TypeExpr::Named(name))
    }

    // ------------------------------------------------------------------------
    // Expression grammar
    // ------------------------------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_binary(0)
    }

    fn binary_op(&self, level: usize) -> Option<BinaryOp> {
        let Tok::Sym(sym) = self.peek() else {
            return None;
        };
        let op = match (level, *sym) {
            (0, "||") => BinaryOp::Or,
            (1, "&&") => BinaryOp::And,
            (2, "==") => BinaryOp::Eq,
            (2, "!=") => BinaryOp::Ne,
            (3, "<") => BinaryOp::Lt,
            (3, "<=") => BinaryOp::Le,
            (3, ">") => BinaryOp::Gt,
            (3, ">=") => BinaryOp::Ge,
            (4, "+") => BinaryOp::Add,
            (4, "-") => BinaryOp::Sub,
            (5, "*") => BinaryOp::Mul,
            (5, "/") => BinaryOp::Div,
            (5, "%") => BinaryOp::Rem,
            _ => return None,
        };
        Some(op)
    }

    fn parse_binary(&mut self, level: usize) -> Result<Expr> {
        if level > 5 {
            return self.parse_unary();
        }
        let mut lhs = self.parse_binary(level + 1)?;
        while let Some(op) = self.binary_op(level) {
            self.advance();
            let rhs = self.parse_binary(level + 1)?;
            let span = lhs.span.to(rhs.span);
            lhs = self.expr(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            )?;
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        self.nested(Self::parse_unary_inner)
    }

    fn parse_unary_inner(&mut self) -> Result<Expr> {
        let op = if self.is_sym("!") {
            UnaryOp::Not
        } else if self.is_sym("-") {
            UnaryOp::Neg
        } else {
            return self.parse_postfix();
        };
        let start = self.advance().1;
        if op == UnaryOp::Neg {
            if let Some(min) = self.int_min_literal(start) {
                return min;
            }
        }
        let operand = self.parse_unary()?;
        let span = start.to(operand.span);
        self.expr(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        )
    }

    /// `-9223372036854775808` has no positive counterpart, so it is read as
    /// one literal. `minus` is the span of the `-` just consumed.
    fn int_min_literal(&mut self, minus: Span) -> Option<Result<Expr>> {
        let (Tok::Int(n), span) = self.tokens[self.pos].clone() else {
            return None;
        };
        if n != i64::MIN.unsigned_abs() || matches!(self.peek_at(1), Tok::Sym(".")) {
            return None;
        }
        self.advance();
        Some(self.expr(ExprKind::Lit(Lit::Int(i64::MIN)), minus.to(span)))
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        while self.eat_sym(".") {
            let (name, name_span) = self.expect_ident("member name after '.'")?;
            if self.eat_sym("(") {
                let args = self.parse_list_items(")")?;
                let end = self.expect_sym(")")?;
                let span = expr.span.to(end);
                expr = self.expr(
                    ExprKind::Call {
                        object: Box::new(expr),
                        name,
                        args,
                    },
                    span,
                )?;
            } else {
                let span = expr.span.to(name_span);
                expr = self.expr(
                    ExprKind::Member {
                        object: Box::new(expr),
                        name,
                    },
                    span,
                )?;
            }
        }
        Ok(expr)
    }

    fn parse_list_items(&mut self, close: &str) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        if self.is_sym(close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_expr()?);
            if !self.eat_sym(",") {
                break;
            }
        }
        Ok(items)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let (tok, span) = self.tokens[self.pos].clone();
        let kind = match tok {
            Tok::Int(n) => match i64::try_from(n) {
                Ok(n) => ExprKind::Lit(Lit::Int(n)),
                Err(_) => {
                    return Err(ParseError::new(
                        ParseErrorKind::InvalidNumber(self.src[span.start..span.end].to_string()),
                        self.src,
                        span.start,
                    ))
                }
            },
            Tok::Float(n) => ExprKind::Lit(Lit::Float(n)),
            Tok::Str(s) => ExprKind::Lit(Lit::Str(s)),
            Tok::Ident(name) => match name.as_str() {
                "true" => ExprKind::Lit(Lit::Bool(true)),
                "false" => ExprKind::Lit(Lit::Bool(false)),
                "null" => ExprKind::Lit(Lit::Null),
                _ => ExprKind::Ident(name),
            },
            Tok::Sym("(") => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect_sym(")")?;
                return Ok(inner);
            }
            Tok::Sym("[") => {
                self.advance();
                let items = self.parse_list_items("]")?;
                let end = self.expect_sym("]")?;
                return self.expr(ExprKind::List(items), span.to(end));
            }
            _ => return Err(self.unexpected("expression")),
        };
        self.advance();
        self.expr(kind, span)
    }
}
