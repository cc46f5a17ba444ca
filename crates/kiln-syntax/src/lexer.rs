//! Template-level tokenizer.
//!
//! Splits a template source into literal text runs, interpolations and tags.
//! Expression text inside `${...}` and `@tag(...)` is not tokenized here; the
//! lexer only finds its boundaries (tracking nested delimiters and string
//! literals) and hands the slice to [`crate::expr`].
//!
//! Anything that does not form a recognized tag is literal text. A lone `@`
//! (as in `user@example.com`) or `$` stays in the surrounding text run, so
//! text tokens are never split at non-tags.

use crate::ast::Span;
use crate::error::{ParseError, ParseErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TagKind {
    If,
    ElseIf,
    Else,
    End,
    For,
    Param,
    Include,
    Comment,
}

impl TagKind {
    /// Tags that only shape control flow and may be trimmed off their own line.
    fn is_control(self) -> bool {
        matches!(
            self,
            TagKind::If
                | TagKind::ElseIf
                | TagKind::Else
                | TagKind::End
                | TagKind::For
                | TagKind::Comment
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token<'a> {
    Text {
        text: &'a str,
        start: usize,
    },
    Interpolation {
        raw: bool,
        inner: &'a str,
        inner_start: usize,
        span: Span,
    },
    Tag {
        kind: TagKind,
        /// Include target name, `/`-separated. Empty for other tags.
        name: String,
        /// Text between the tag's parentheses, or the rest of a `@param` line.
        inner: &'a str,
        inner_start: usize,
        span: Span,
    },
}

/// Tokenizes `source`, optionally trimming lines that hold a lone control tag.
pub(crate) fn tokenize(source: &str, trim_control_lines: bool) -> Result<Vec<Token<'_>>> {
    let mut tokens = Lexer::new(source).run()?;
    if trim_control_lines {
        trim_lines(&mut tokens);
    }
    Ok(tokens)
}

struct Lexer<'a> {
    src: &'a str,
    tokens: Vec<Token<'a>>,
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            tokens: Vec::new(),
        }
    }

    fn error(&self, kind: ParseErrorKind, offset: usize) -> ParseError {
        ParseError::new(kind, self.src, offset)
    }

    fn run(mut self) -> Result<Vec<Token<'a>>> {
        let bytes = self.src.as_bytes();
        let mut pos = 0;
        let mut text_start = 0;

        while pos < bytes.len() {
            let next = match bytes[pos] {
                b'$' => self.interpolation(pos)?,
                b'@' => self.tag(pos)?,
                b'<' if self.src[pos..].starts_with("<%--") => Some(self.comment(pos)?),
                _ => None,
            };
            match next {
                Some((token, end)) => {
                    self.push_text(text_start, pos);
                    self.tokens.push(token);
                    pos = end;
                    text_start = end;
                }
                None => pos += 1,
            }
        }
        self.push_text(text_start, bytes.len());
        Ok(self.tokens)
    }

    fn push_text(&mut self, start: usize, end: usize) {
        if start < end {
            self.tokens.push(Token::Text {
                text: &self.src[start..end],
                start,
            });
        }
    }

    /// Finds the closing delimiter matching an already consumed opener.
    ///
    /// String literals are skipped so `${ "}" }` closes at the last brace.
    fn scan_balanced(
        &self,
        from: usize,
        open: u8,
        close: u8,
        unterminated: ParseErrorKind,
        tag_start: usize,
    ) -> Result<usize> {
        let bytes = self.src.as_bytes();
        let mut depth = 0usize;
        let mut i = from;
        while i < bytes.len() {
            let b = bytes[i];
            if b == b'"' || b == b'\'' {
                i += 1;
                while i < bytes.len() && bytes[i] != b {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                if i >= bytes.len() {
                    return Err(self.error(ParseErrorKind::UnterminatedString, tag_start));
                }
            } else if b == open {
                depth += 1;
            } else if b == close {
                if depth == 0 {
                    return Ok(i);
                }
                depth -= 1;
            }
            i += 1;
        }
        Err(self.error(unterminated, tag_start))
    }

    fn interpolation(&self, pos: usize) -> Result<Option<(Token<'a>, usize)>> {
        let rest = &self.src[pos..];
        let (raw, opener) = if rest.starts_with("${") {
            (false, 2)
        } else if rest.starts_with("$unsafe{") {
            (true, 8)
        } else {
            return Ok(None);
        };
        let inner_start = pos + opener;
        let close = self.scan_balanced(
            inner_start,
            b'{',
            b'}',
            ParseErrorKind::UnterminatedInterpolation,
            pos,
        )?;
        let token = Token::Interpolation {
            raw,
            inner: &self.src[inner_start..close],
            inner_start,
            span: Span::new(pos, close + 1),
        };
        Ok(Some((token, close + 1)))
    }

    /// Returns true if `keyword` follows the `@` at `pos` and is not the
    /// prefix of a longer identifier.
    fn keyword_at(&self, pos: usize, keyword: &str) -> bool {
        let rest = &self.src[pos + 1..];
        if !rest.starts_with(keyword) {
            return false;
        }
        rest.as_bytes()
            .get(keyword.len())
            .map_or(true, |&b| !is_ident_byte(b))
    }

    fn tag(&self, pos: usize) -> Result<Option<(Token<'a>, usize)>> {
        let rest = &self.src[pos + 1..];

        let paren_tags = [
            ("if(", TagKind::If),
            ("elseif(", TagKind::ElseIf),
            ("for(", TagKind::For),
        ];
        for (keyword, kind) in paren_tags {
            if rest.starts_with(keyword) {
                return self.paren_tag(pos, keyword.len(), kind, String::new()).map(Some);
            }
        }

        if self.keyword_at(pos, "else") {
            return Ok(Some((self.bare_tag(TagKind::Else, pos, 5), pos + 5)));
        }
        for keyword in ["endif", "endfor", "end"] {
            if self.keyword_at(pos, keyword) {
                let len = keyword.len() + 1;
                return Ok(Some((self.bare_tag(TagKind::End, pos, len), pos + len)));
            }
        }
        if self.keyword_at(pos, "endraw") {
            return Err(self.error(ParseErrorKind::UnexpectedTag("endraw"), pos));
        }
        if self.keyword_at(pos, "raw") {
            return self.raw_block(pos).map(Some);
        }
        if rest.starts_with("param") && rest[5..].starts_with(|c: char| c == ' ' || c == '\t') {
            return Ok(Some(self.param(pos)));
        }
        if let Some(after) = rest.strip_prefix("template.") {
            return self.include(pos, after).map(Some);
        }
        Ok(None)
    }

    fn bare_tag(&self, kind: TagKind, pos: usize, len: usize) -> Token<'a> {
        Token::Tag {
            kind,
            name: String::new(),
            inner: "",
            inner_start: pos + len,
            span: Span::new(pos, pos + len),
        }
    }

    /// `@keyword( ... )`; `keyword_len` includes the opening parenthesis.
    fn paren_tag(
        &self,
        pos: usize,
        keyword_len: usize,
        kind: TagKind,
        name: String,
    ) -> Result<(Token<'a>, usize)> {
        let inner_start = pos + 1 + keyword_len;
        let close = self.scan_balanced(
            inner_start,
            b'(',
            b')',
            ParseErrorKind::UnterminatedTag,
            pos,
        )?;
        let token = Token::Tag {
            kind,
            name,
            inner: &self.src[inner_start..close],
            inner_start,
            span: Span::new(pos, close + 1),
        };
        Ok((token, close + 1))
    }

    /// `@param ...` runs to the end of the line; the newline is consumed.
    fn param(&self, pos: usize) -> (Token<'a>, usize) {
        let inner_start = pos + "@param".len();
        let line_end = self.src[inner_start..]
            .find('\n')
            .map(|i| inner_start + i)
            .unwrap_or(self.src.len());
        let inner = self.src[inner_start..line_end].trim_end_matches('\r');
        let next = if line_end < self.src.len() {
            line_end + 1
        } else {
            line_end
        };
        let token = Token::Tag {
            kind: TagKind::Param,
            name: String::new(),
            inner,
            inner_start,
            span: Span::new(pos, line_end),
        };
        (token, next)
    }

    /// `@template.dotted.name(args)`
    fn include(&self, pos: usize, after: &str) -> Result<(Token<'a>, usize)> {
        let name_len = after
            .bytes()
            .take_while(|&b| is_ident_byte(b) || b == b'.')
            .count();
        let dotted = &after[..name_len];
        let valid = !dotted.is_empty()
            && !dotted.starts_with('.')
            && !dotted.ends_with('.')
            && !dotted.contains("..");
        let name_start = pos + "@template.".len();
        if !valid {
            return Err(self.error(ParseErrorKind::InvalidTemplateName, name_start));
        }
        if !after[name_len..].starts_with('(') {
            return Err(self.error(
                ParseErrorKind::UnexpectedToken {
                    expected: "'(' after template name".to_string(),
                    found: describe_next(&after[name_len..]),
                },
                name_start + name_len,
            ));
        }
        let keyword_len = "template.".len() + name_len + 1;
        self.paren_tag(pos, keyword_len, TagKind::Include, dotted.replace('.', "/"))
    }

    /// `@raw ... @endraw` becomes a single text token.
    fn raw_block(&self, pos: usize) -> Result<(Token<'a>, usize)> {
        let body_start = pos + "@raw".len();
        let end = self.src[body_start..]
            .find("@endraw")
            .map(|i| body_start + i)
            .ok_or_else(|| self.error(ParseErrorKind::UnterminatedRaw, pos))?;
        let token = Token::Text {
            text: &self.src[body_start..end],
            start: body_start,
        };
        Ok((token, end + "@endraw".len()))
    }

    fn comment(&self, pos: usize) -> Result<(Token<'a>, usize)> {
        let body_start = pos + "<%--".len();
        let end = self.src[body_start..]
            .find("--%>")
            .map(|i| body_start + i + "--%>".len())
            .ok_or_else(|| self.error(ParseErrorKind::UnterminatedComment, pos))?;
        let token = Token::Tag {
            kind: TagKind::Comment,
            name: String::new(),
            inner: "",
            inner_start: body_start,
            span: Span::new(pos, end),
        };
        Ok((token, end))
    }
}

fn describe_next(rest: &str) -> String {
    match rest.chars().next() {
        Some(c) => format!("'{}'", c),
        None => "end of input".to_string(),
    }
}

// ============================================================================
// Control-line trimming
// ============================================================================

fn is_blank(s: &str) -> bool {
    s.bytes().all(|b| b == b' ' || b == b'\t' || b == b'\r')
}

/// Removes the indentation and line break around control tags that sit alone
/// on their line.
///
/// Decisions are made against the untouched token list first and applied
/// afterwards, so a text run shared by two adjacent tag lines is judged by
/// its original content.
fn trim_lines(tokens: &mut Vec<Token<'_>>) {
    let last = tokens.len().saturating_sub(1);
    let mut cut_tail = vec![false; tokens.len()];
    let mut cut_head = vec![false; tokens.len()];

    for i in 0..tokens.len() {
        let Token::Tag { kind, .. } = &tokens[i] else {
            continue;
        };
        if !kind.is_control() {
            continue;
        }

        let starts_line = if i == 0 {
            true
        } else {
            match &tokens[i - 1] {
                Token::Text { text, .. } => match text.rfind('\n') {
                    Some(nl) => is_blank(&text[nl + 1..]),
                    None => i - 1 == 0 && is_blank(text),
                },
                _ => false,
            }
        };
        let ends_line = if i == last {
            true
        } else {
            match &tokens[i + 1] {
                Token::Text { text, .. } => match text.find('\n') {
                    Some(nl) => is_blank(&text[..nl]),
                    None => i + 1 == last && is_blank(text),
                },
                _ => false,
            }
        };

        if starts_line && ends_line {
            if i > 0 {
                cut_tail[i - 1] = true;
            }
            if i < last {
                cut_head[i + 1] = true;
            }
        }
    }

    for (i, token) in tokens.iter_mut().enumerate() {
        let Token::Text { text, start } = token else {
            continue;
        };
        let mut from = 0;
        let mut to = text.len();
        if cut_head[i] {
            from = text.find('\n').map(|nl| nl + 1).unwrap_or(text.len());
        }
        if cut_tail[i] {
            to = text.rfind('\n').map(|nl| nl + 1).unwrap_or(0);
        }
        let to = to.max(from);
        *start += from;
        *text = &text[from..to];
    }

    tokens.retain(|t| !matches!(t, Token::Text { text, .. } if text.is_empty()));
}
