//! Parse errors with source locations.

use std::fmt;

use thiserror::Error;

/// 1-based line and column of a byte offset in a template source.
///
/// Columns count characters, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl Location {
    /// Computes the location of `offset` within `source`.
    ///
    /// Offsets past the end of `source` are clamped to its end.
    ///
    /// ```
    /// use kiln_syntax::Location;
    ///
    /// let loc = Location::locate("ab\ncd", 4);
    /// assert_eq!((loc.line, loc.column), (2, 2));
    /// ```
    pub fn locate(source: &str, offset: usize) -> Location {
        let mut end = offset.min(source.len());
        while !source.is_char_boundary(end) {
            end -= 1;
        }
        let before = &source[..end];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let column = before[line_start..].chars().count() + 1;
        Location { line, column }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// What went wrong while parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    #[error("unterminated interpolation, expected '}}'")]
    UnterminatedInterpolation,

    #[error("unterminated tag, expected ')'")]
    UnterminatedTag,

    #[error("unterminated comment, expected '--%>'")]
    UnterminatedComment,

    #[error("unterminated @raw block, expected '@endraw'")]
    UnterminatedRaw,

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("invalid escape sequence '\\{0}'")]
    InvalidEscape(char),

    #[error("unexpected character '{0}'")]
    UnexpectedCharacter(char),

    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),

    #[error("expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },

    #[error("empty expression")]
    EmptyExpression,

    #[error("'@{0}' without a matching opening tag")]
    UnexpectedTag(&'static str),

    #[error("@{0} block is never closed, expected '@end'")]
    UnclosedBlock(&'static str),

    #[error("invalid @for header, expected '@for(item in items)' or '@for(item, index in items)'")]
    InvalidForHeader,

    #[error("invalid @param declaration, expected '@param <type> <name> [= <value>]'")]
    InvalidParam,

    #[error("@param must appear before any template content")]
    MisplacedParam,

    #[error("invalid template name in include")]
    InvalidTemplateName,

    #[error("nesting exceeds {limit} levels")]
    NestingTooDeep { limit: usize },
}

/// A syntax error, carrying the location where parsing stopped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at line {}, column {}", .location.line, .location.column)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub location: Location,
    /// Byte offset into the source.
    pub offset: usize,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, source: &str, offset: usize) -> Self {
        Self {
            kind,
            location: Location::locate(source, offset),
            offset,
        }
    }
}

/// Result type for parsing.
pub type Result<T> = std::result::Result<T, ParseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_first_line() {
        assert_eq!(Location::locate("hello", 0), Location { line: 1, column: 1 });
        assert_eq!(Location::locate("hello", 3), Location { line: 1, column: 4 });
    }

    #[test]
    fn test_locate_after_newlines() {
        let src = "a\nbb\nccc";
        assert_eq!(Location::locate(src, 2), Location { line: 2, column: 1 });
        assert_eq!(Location::locate(src, 7), Location { line: 3, column: 3 });
    }

    #[test]
    fn test_locate_counts_chars_not_bytes() {
        let src = "héllo";
        // 'l' after the two-byte 'é'
        assert_eq!(Location::locate(src, 3), Location { line: 1, column: 3 });
    }

    #[test]
    fn test_locate_clamps_past_end() {
        assert_eq!(Location::locate("ab", 99), Location { line: 1, column: 3 });
    }

    #[test]
    fn test_error_display() {
        let err = ParseError::new(ParseErrorKind::UnterminatedInterpolation, "x\n${a", 2);
        assert_eq!(
            err.to_string(),
            "unterminated interpolation, expected '}' at line 2, column 1"
        );
    }
}
