//! Block parser: turns the token stream into an [`Ast`].

use crate::ast::{
    Ast, CondArm, ExprId, ForBlock, IfBlock, Include, Interpolation, Literal, Node, ParamDecl, Span,
};
use crate::error::{ParseError, ParseErrorKind, Result};
use crate::expr::ExprParser;
use crate::lexer::{TagKind, Token};
use crate::MAX_NESTING;

/// Why a block body stopped.
enum Stop<'a> {
    Eof,
    ElseIf { inner: &'a str, inner_start: usize },
    Else,
    End(Span),
}

pub(crate) struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token<'a>>,
    pos: usize,
    next_id: u32,
    /// Number of `@if`/`@for` blocks currently open.
    depth: usize,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(src: &'a str, tokens: Vec<Token<'a>>) -> Self {
        Self {
            src,
            tokens,
            pos: 0,
            next_id: 0,
            depth: 0,
        }
    }

    fn error(&self, kind: ParseErrorKind, offset: usize) -> ParseError {
        ParseError::new(kind, self.src, offset)
    }

    fn sub_parser(&mut self, inner: &str, inner_start: usize) -> Result<ExprParser<'a, '_>> {
        ExprParser::new(
            self.src,
            inner_start,
            inner_start + inner.len(),
            &mut self.next_id,
        )
    }

    pub(crate) fn parse(mut self) -> Result<Ast> {
        let params = self.header()?;
        let (body, stop) = self.block()?;
        match stop {
            Stop::Eof => Ok(Ast {
                params,
                body,
                id_count: self.next_id,
            }),
            // block() only returns other stops after consuming their tag,
            // so the offending tag is the previous token.
            Stop::ElseIf { inner_start, .. } => {
                Err(self.error(ParseErrorKind::UnexpectedTag("elseif"), self.tag_start(inner_start)))
            }
            Stop::Else => Err(self.error(ParseErrorKind::UnexpectedTag("else"), self.prev_start())),
            Stop::End(span) => Err(self.error(ParseErrorKind::UnexpectedTag("end"), span.start)),
        }
    }

    fn prev_start(&self) -> usize {
        match self.tokens.get(self.pos.wrapping_sub(1)) {
            Some(Token::Tag { span, .. }) | Some(Token::Interpolation { span, .. }) => span.start,
            Some(Token::Text { start, .. }) => *start,
            None => 0,
        }
    }

    /// Offset of the `@` of a tag whose expression starts at `inner_start`.
    fn tag_start(&self, inner_start: usize) -> usize {
        self.tokens
            .iter()
            .find_map(|t| match t {
                Token::Tag {
                    inner_start: s,
                    span,
                    ..
                } if *s == inner_start => Some(span.start),
                _ => None,
            })
            .unwrap_or(inner_start)
    }

    /// Leading `@param` lines, along with blank text and comments between them.
    fn header(&mut self) -> Result<Vec<ParamDecl>> {
        let header_end = self
            .tokens
            .iter()
            .enumerate()
            .take_while(|(_, t)| match t {
                Token::Tag { kind, .. } => matches!(kind, TagKind::Param | TagKind::Comment),
                Token::Text { text, .. } => text.trim().is_empty(),
                Token::Interpolation { .. } => false,
            })
            .filter(|(_, t)| matches!(t, Token::Tag { kind: TagKind::Param, .. }))
            .map(|(i, _)| i + 1)
            .last()
            .unwrap_or(0);

        let mut params = Vec::new();
        while self.pos < header_end {
            if let Token::Tag {
                kind: TagKind::Param,
                inner,
                inner_start,
                span,
                ..
            } = self.tokens[self.pos].clone()
            {
                let decl = self.sub_parser(inner, inner_start)?.parse_param(span)?;
                params.push(decl);
            }
            self.pos += 1;
        }
        Ok(params)
    }

    /// Parses nodes until a branch tag, `@end` or end of input.
    fn block(&mut self) -> Result<(Vec<Node>, Stop<'a>)> {
        let mut nodes = Vec::new();

        while let Some(token) = self.tokens.get(self.pos).cloned() {
            self.pos += 1;
            match token {
                Token::Text { text, start } => {
                    push_literal(&mut nodes, text, Span::new(start, start + text.len()));
                }
                Token::Interpolation {
                    raw,
                    inner,
                    inner_start,
                    span,
                } => {
                    let expr = self.sub_parser(inner, inner_start)?.parse_complete()?;
                    nodes.push(Node::Interpolation(Interpolation { expr, raw, span }));
                }
                Token::Tag {
                    kind,
                    name,
                    inner,
                    inner_start,
                    span,
                } => match kind {
                    TagKind::Comment => {}
                    TagKind::Param => {
                        return Err(self.error(ParseErrorKind::MisplacedParam, span.start));
                    }
                    TagKind::If => {
                        nodes.push(self.nested(span, |p| p.if_block(inner, inner_start, span))?)
                    }
                    TagKind::For => {
                        nodes.push(self.nested(span, |p| p.for_block(inner, inner_start, span))?)
                    }
                    TagKind::Include => {
                        let args = self.sub_parser(inner, inner_start)?.parse_include_args()?;
                        let id = self.fresh_id();
                        nodes.push(Node::Include(Include {
                            id,
                            target: name,
                            args,
                            span,
                        }));
                    }
                    TagKind::ElseIf => return Ok((nodes, Stop::ElseIf { inner, inner_start })),
                    TagKind::Else => return Ok((nodes, Stop::Else)),
                    TagKind::End => return Ok((nodes, Stop::End(span))),
                },
            }
        }

        Ok((nodes, Stop::Eof))
    }

    /// Parses a block opened by the tag at `open`, one level deeper.
    fn nested(&mut self, open: Span, f: impl FnOnce(&mut Self) -> Result<Node>) -> Result<Node> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(
                ParseErrorKind::NestingTooDeep { limit: MAX_NESTING },
                open.start,
            ));
        }
        self.depth += 1;
        let node = f(self);
        self.depth -= 1;
        node
    }

    fn fresh_id(&mut self) -> ExprId {
        let id = ExprId(self.next_id);
        self.next_id += 1;
        id
    }

    fn if_block(&mut self, inner: &'a str, inner_start: usize, open: Span) -> Result<Node> {
        let condition = self.sub_parser(inner, inner_start)?.parse_complete()?;
        let (body, mut stop) = self.block()?;
        let mut arms = vec![CondArm { condition, body }];
        let mut otherwise = None;

        loop {
            match stop {
                Stop::ElseIf { inner, inner_start } if otherwise.is_none() => {
                    let condition = self.sub_parser(inner, inner_start)?.parse_complete()?;
                    let (body, next) = self.block()?;
                    arms.push(CondArm { condition, body });
                    stop = next;
                }
                Stop::Else if otherwise.is_none() => {
                    let (body, next) = self.block()?;
                    otherwise = Some(body);
                    stop = next;
                }
                Stop::ElseIf { inner_start, .. } => {
                    let at = self.tag_start(inner_start);
                    return Err(self.error(ParseErrorKind::UnexpectedTag("elseif"), at));
                }
                Stop::Else => {
                    return Err(self.error(ParseErrorKind::UnexpectedTag("else"), self.prev_start()));
                }
                Stop::Eof => {
                    return Err(self.error(ParseErrorKind::UnclosedBlock("if"), open.start));
                }
                Stop::End(end) => {
                    return Ok(Node::If(IfBlock {
                        arms,
                        otherwise,
                        span: open.to(end),
                    }));
                }
            }
        }
    }

    fn for_block(&mut self, inner: &'a str, inner_start: usize, open: Span) -> Result<Node> {
        let (element, index, iterable) = self.sub_parser(inner, inner_start)?.parse_for_header()?;
        let (body, mut stop) = self.block()?;
        let mut otherwise = None;

        loop {
            match stop {
                Stop::Else if otherwise.is_none() => {
                    let (body, next) = self.block()?;
                    otherwise = Some(body);
                    stop = next;
                }
                Stop::ElseIf { inner_start, .. } => {
                    let at = self.tag_start(inner_start);
                    return Err(self.error(ParseErrorKind::UnexpectedTag("elseif"), at));
                }
                Stop::Else => {
                    return Err(self.error(ParseErrorKind::UnexpectedTag("else"), self.prev_start()));
                }
                Stop::Eof => {
                    return Err(self.error(ParseErrorKind::UnclosedBlock("for"), open.start));
                }
                Stop::End(end) => {
                    return Ok(Node::For(ForBlock {
                        element,
                        index,
                        iterable,
                        body,
                        otherwise,
                        span: open.to(end),
                    }));
                }
            }
        }
    }
}

/// Appends literal text, merging with a preceding literal (comments leave
/// adjacent runs behind).
fn push_literal(nodes: &mut Vec<Node>, text: &str, span: Span) {
    if let Some(Node::Literal(prev)) = nodes.last_mut() {
        prev.text.push_str(text);
        prev.span = prev.span.to(span);
        return;
    }
    nodes.push(Node::Literal(Literal {
        text: text.to_string(),
        span,
    }));
}

#[cfg(test)]
mod tests {
    use crate::ast::{ExprKind, Node};
    use crate::error::ParseErrorKind;
    use crate::{parse, MAX_NESTING};

    #[test]
    fn test_literal_only() {
        let ast = parse("just text\n").unwrap();
        assert!(ast.params.is_empty());
        assert_eq!(ast.body.len(), 1);
    }

    #[test]
    fn test_comment_merges_literals() {
        let ast = parse("a<%-- x --%>b").unwrap();
        match ast.body.as_slice() {
            [Node::Literal(lit)] => assert_eq!(lit.text, "ab"),
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_if_chain() {
        let ast = parse("@if(a)1@elseif(b)2@elseif(c)3@else 4@end").unwrap();
        let Node::If(block) = &ast.body[0] else {
            panic!("expected if");
        };
        assert_eq!(block.arms.len(), 3);
        assert!(block.otherwise.is_some());
    }

    #[test]
    fn test_for_else() {
        let ast = parse("@for(x, i in xs)${x}@else none@end").unwrap();
        let Node::For(block) = &ast.body[0] else {
            panic!("expected for");
        };
        assert_eq!(block.element.name, "x");
        assert_eq!(block.index.as_ref().map(|b| b.name.as_str()), Some("i"));
        assert!(matches!(block.iterable.kind, ExprKind::Ident(ref n) if n == "xs"));
        assert!(block.otherwise.is_some());
    }

    #[test]
    fn test_header_params() {
        let ast = parse("\n@param string name\n@param int count = 3\nHi").unwrap();
        assert_eq!(ast.params.len(), 2);
        assert_eq!(ast.params[1].name, "count");
        match ast.body.as_slice() {
            [Node::Literal(lit)] => assert_eq!(lit.text, "Hi"),
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_leading_whitespace_kept_without_header() {
        let ast = parse("  ${x}").unwrap();
        assert_eq!(ast.body.len(), 2);
    }

    #[test]
    fn test_param_after_content() {
        let err = parse("Hi\n@param string name\n").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MisplacedParam);
        assert_eq!(err.location.line, 2);
    }

    #[test]
    fn test_unclosed_if_points_at_opener() {
        let err = parse("x\n  @if(a) y").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnclosedBlock("if"));
        assert_eq!((err.location.line, err.location.column), (2, 3));
    }

    #[test]
    fn test_stray_end() {
        let err = parse("a @end").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedTag("end"));
        assert_eq!(err.location.column, 3);
    }

    #[test]
    fn test_stray_else() {
        let err = parse("a @else b").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedTag("else"));
    }

    #[test]
    fn test_elseif_in_for() {
        let err = parse("@for(x in xs)@elseif(a)@end").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedTag("elseif"));
        assert_eq!(err.location.column, 14);
    }

    #[test]
    fn test_elseif_after_else() {
        let err = parse("@if(a)@else@elseif(b)@end").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedTag("elseif"));
    }

    #[test]
    fn test_empty_interpolation() {
        let err = parse("${ }").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::EmptyExpression);
    }

    #[test]
    fn test_include_ids_distinct_from_exprs() {
        let ast = parse("@template.a.b(x, y = 1)").unwrap();
        let Node::Include(inc) = &ast.body[0] else {
            panic!("expected include");
        };
        assert_eq!(inc.target, "a/b");
        assert!(inc.args.iter().all(|a| a.value.id != inc.id));
        assert!(inc.id.0 < ast.id_count);
    }

    #[test]
    fn test_block_nesting_limit() {
        let nested = |depth: usize| {
            format!("{}x{}", "@if(true)".repeat(depth), "@end".repeat(depth))
        };
        assert!(parse(&nested(MAX_NESTING)).is_ok());

        let err = parse(&nested(MAX_NESTING + 1)).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::NestingTooDeep { limit: MAX_NESTING });
        assert_eq!(err.offset, MAX_NESTING * "@if(true)".len());

        let loops = format!("{}{}", "@for(x in xs)".repeat(10_000), "@end".repeat(10_000));
        assert_eq!(
            parse(&loops).unwrap_err().kind,
            ParseErrorKind::NestingTooDeep { limit: MAX_NESTING }
        );
    }
}
