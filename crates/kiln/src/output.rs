//! Output sinks for rendering.
//!
//! A render appends to exactly one [`Output`]. Two sinks are provided:
//!
//! | Mode | Sink | Buffer | Literals |
//! |------|------|--------|----------|
//! | [`OutputMode::Text`] | [`TextOutput`] | `String` | appended as text |
//! | [`OutputMode::Bytes`] | [`ByteOutput`] | `Vec<u8>` | pre-encoded at compile time, copied as bytes |
//!
//! Both produce the same content: decoding a [`ByteOutput`] as UTF-8 yields
//! exactly what a [`TextOutput`] holds for the same render.
//!
//! Escaping follows the sink's [`ContentType`]. Under [`ContentType::Html`]
//! the characters `&`, `<`, `>`, `"` and `'` become `&amp;`, `&lt;`, `&gt;`,
//! `&quot;` and `&#39;`.

use std::io;

use serde::Deserialize;

use crate::error::RenderError;
use crate::value::Value;

/// Which sink a template is compiled for.
///
/// The two modes compile to distinct templates: byte-mode templates carry
/// their literal text pre-encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Buffered text, read back as a `String`.
    #[default]
    Text,
    /// Byte buffer with pre-encoded literals, flushed to an `io::Write`.
    Bytes,
}

impl OutputMode {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputMode::Text => "text",
            OutputMode::Bytes => "bytes",
        }
    }
}

impl std::fmt::Display for OutputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Escaping policy for `${...}` interpolations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// Markup-escape `& < > " '`.
    #[default]
    Html,
    /// No escaping.
    Plain,
}

/// A literal text run stored in a compiled template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    /// Text-mode literal.
    Text(Box<str>),
    /// Byte-mode literal, encoded once when the template was compiled.
    Encoded(Box<[u8]>),
}

impl Literal {
    pub fn len(&self) -> usize {
        match self {
            Literal::Text(s) => s.len(),
            Literal::Encoded(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_encoded(&self) -> bool {
        matches!(self, Literal::Encoded(_))
    }
}

/// Append-only sink written by one render.
pub trait Output {
    fn mode(&self) -> OutputMode;

    fn append_literal(&mut self, literal: &Literal);

    /// Appends the value's text form, escaped per the content type.
    fn append_escaped(&mut self, value: &Value<'_>) -> Result<(), RenderError>;

    /// Appends the value's text form verbatim.
    fn append_raw(&mut self, value: &Value<'_>) -> Result<(), RenderError>;

    /// Writes the accumulated content to `sink`.
    fn write_to(&mut self, sink: &mut dyn io::Write) -> io::Result<()>;
}

const ESCAPES: [(u8, &str); 5] = [
    (b'&', "&amp;"),
    (b'<', "&lt;"),
    (b'>', "&gt;"),
    (b'"', "&quot;"),
    (b'\'', "&#39;"),
];

fn replacement(b: u8) -> Option<&'static str> {
    ESCAPES.iter().find(|(c, _)| *c == b).map(|(_, r)| *r)
}

/// Calls `push` with unescaped runs and replacement sequences, in order.
fn escape_runs(text: &str, mut push: impl FnMut(&str)) {
    let mut run_start = 0;
    for (i, b) in text.bytes().enumerate() {
        if let Some(rep) = replacement(b) {
            if run_start < i {
                push(&text[run_start..i]);
            }
            push(rep);
            run_start = i + 1;
        }
    }
    if run_start < text.len() {
        push(&text[run_start..]);
    }
}

/// Returns `text` escaped for HTML.
///
/// ```
/// assert_eq!(kiln::escape_html("<a href='x'>&</a>"), "&lt;a href=&#39;x&#39;&gt;&amp;&lt;/a&gt;");
/// ```
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    escape_runs(text, |s| out.push_str(s));
    out
}

// ============================================================================
// TextOutput
// ============================================================================

/// Buffered text sink.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextOutput {
    buf: String,
    content_type: ContentType,
}

impl TextOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: String::with_capacity(capacity),
            content_type: ContentType::default(),
        }
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn into_string(self) -> String {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn push_text(&mut self, text: &str, escape: bool) {
        if escape && self.content_type == ContentType::Html {
            let buf = &mut self.buf;
            escape_runs(text, |s| buf.push_str(s));
        } else {
            self.buf.push_str(text);
        }
    }
}

impl Output for TextOutput {
    fn mode(&self) -> OutputMode {
        OutputMode::Text
    }

    fn append_literal(&mut self, literal: &Literal) {
        match literal {
            Literal::Text(s) => self.buf.push_str(s),
            Literal::Encoded(bytes) => self.buf.push_str(&String::from_utf8_lossy(bytes)),
        }
    }

    fn append_escaped(&mut self, value: &Value<'_>) -> Result<(), RenderError> {
        let text = value.to_text()?;
        self.push_text(&text, true);
        Ok(())
    }

    fn append_raw(&mut self, value: &Value<'_>) -> Result<(), RenderError> {
        let text = value.to_text()?;
        self.push_text(&text, false);
        Ok(())
    }

    /// Writes the text; the buffer stays readable through [`as_str`](Self::as_str).
    fn write_to(&mut self, sink: &mut dyn io::Write) -> io::Result<()> {
        sink.write_all(self.buf.as_bytes())
    }
}

// ============================================================================
// ByteOutput
// ============================================================================

/// Byte sink. Literals arrive pre-encoded and are copied as-is; only dynamic
/// values are encoded during the render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteOutput {
    buf: Vec<u8>,
    content_type: ContentType,
}

impl ByteOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            content_type: ContentType::default(),
        }
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn push_text(&mut self, text: &str, escape: bool) {
        if escape && self.content_type == ContentType::Html {
            let buf = &mut self.buf;
            escape_runs(text, |s| buf.extend_from_slice(s.as_bytes()));
        } else {
            self.buf.extend_from_slice(text.as_bytes());
        }
    }
}

impl Output for ByteOutput {
    fn mode(&self) -> OutputMode {
        OutputMode::Bytes
    }

    fn append_literal(&mut self, literal: &Literal) {
        match literal {
            Literal::Encoded(bytes) => self.buf.extend_from_slice(bytes),
            Literal::Text(s) => self.buf.extend_from_slice(s.as_bytes()),
        }
    }

    fn append_escaped(&mut self, value: &Value<'_>) -> Result<(), RenderError> {
        let text = value.to_text()?;
        self.push_text(&text, true);
        Ok(())
    }

    fn append_raw(&mut self, value: &Value<'_>) -> Result<(), RenderError> {
        let text = value.to_text()?;
        self.push_text(&text, false);
        Ok(())
    }

    /// Flushes the buffered bytes and empties the buffer, so content is
    /// written at most once.
    fn write_to(&mut self, sink: &mut dyn io::Write) -> io::Result<()> {
        sink.write_all(&self.buf)?;
        self.buf.clear();
        sink.flush()
    }
}

// ============================================================================
// RenderedOutput
// ============================================================================

/// The finished output of [`Registry::render`](crate::Registry::render).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderedOutput {
    Text(TextOutput),
    Bytes(ByteOutput),
}

impl RenderedOutput {
    /// An empty sink for `mode`.
    pub fn new(mode: OutputMode, content_type: ContentType, capacity: usize) -> Self {
        match mode {
            OutputMode::Text => RenderedOutput::Text(
                TextOutput::with_capacity(capacity).with_content_type(content_type),
            ),
            OutputMode::Bytes => RenderedOutput::Bytes(
                ByteOutput::with_capacity(capacity).with_content_type(content_type),
            ),
        }
    }

    fn inner(&mut self) -> &mut dyn Output {
        match self {
            RenderedOutput::Text(out) => out,
            RenderedOutput::Bytes(out) => out,
        }
    }

    /// The content as a string; byte output is decoded as UTF-8.
    pub fn into_string(self) -> String {
        match self {
            RenderedOutput::Text(out) => out.into_string(),
            RenderedOutput::Bytes(out) => match String::from_utf8(out.into_bytes()) {
                Ok(s) => s,
                Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
            },
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            RenderedOutput::Text(out) => out.into_string().into_bytes(),
            RenderedOutput::Bytes(out) => out.into_bytes(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            RenderedOutput::Text(out) => out.as_str().as_bytes(),
            RenderedOutput::Bytes(out) => out.as_bytes(),
        }
    }
}

impl Output for RenderedOutput {
    fn mode(&self) -> OutputMode {
        match self {
            RenderedOutput::Text(_) => OutputMode::Text,
            RenderedOutput::Bytes(_) => OutputMode::Bytes,
        }
    }

    fn append_literal(&mut self, literal: &Literal) {
        self.inner().append_literal(literal)
    }

    fn append_escaped(&mut self, value: &Value<'_>) -> Result<(), RenderError> {
        self.inner().append_escaped(value)
    }

    fn append_raw(&mut self, value: &Value<'_>) -> Result<(), RenderError> {
        self.inner().append_raw(value)
    }

    fn write_to(&mut self, sink: &mut dyn io::Write) -> io::Result<()> {
        self.inner().write_to(sink)
    }
}
