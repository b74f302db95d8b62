//! Rich error reporting with source spans.
//!
//! Three error kinds, one per pipeline stage, each carrying a location and
//! a human-readable message. Lex errors point at a byte offset; parse and
//! build errors carry the index of the offending token and resolve it to a
//! byte span and a line/column pair through the tokenizer. All three
//! render through miette with the source text and an underline.

use crate::lexer::Tokenizer;
use crate::token::SourceLoc;
use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

/// Error from the tokenizer, number lexer, or operator matcher.
#[derive(Error, Debug, Diagnostic)]
#[error("{message}")]
pub struct LexError {
    pub message: String,

    /// Byte offset of the offending character.
    pub pos: usize,

    #[source_code]
    pub src: String,

    #[label("{message}")]
    pub span: SourceSpan,
}

impl LexError {
    /// Create an error before the source text is available; the tokenizer
    /// attaches it with [`LexError::with_source`] on the way out.
    pub fn new(message: impl Into<String>, pos: usize) -> Self {
        Self {
            message: message.into(),
            pos,
            src: String::new(),
            span: (pos, 1).into(),
        }
    }

    pub fn with_source(mut self, src: &str) -> Self {
        let len = if self.pos < src.len() { 1 } else { 0 };
        self.span = (self.pos.min(src.len()), len).into();
        self.src = src.to_string();
        self
    }
}

/// Error from the parser.
#[derive(Error, Debug, Diagnostic)]
#[error("line {line} col {col}: {message}")]
pub struct ParseError {
    pub message: String,

    /// Index of the offending token.
    pub loc: SourceLoc,

    /// 1-based line and column of the offending token.
    pub line: usize,
    pub col: usize,

    #[source_code]
    pub src: String,

    #[label("{message}")]
    pub span: SourceSpan,
}

impl ParseError {
    pub fn new(message: impl Into<String>, loc: SourceLoc, tokenizer: &Tokenizer) -> Self {
        let (line, col, span) = locate(loc, tokenizer);
        Self {
            message: message.into(),
            loc,
            line,
            col,
            src: tokenizer.text.clone(),
            span,
        }
    }
}

/// Error from the tape builder.
#[derive(Error, Debug, Diagnostic)]
#[error("line {line} col {col}: {message}")]
pub struct BuildError {
    pub message: String,

    /// Index of the token where the offending AST node begins.
    pub loc: SourceLoc,

    /// 1-based line and column of the offending token.
    pub line: usize,
    pub col: usize,

    #[source_code]
    pub src: String,

    #[label("{message}")]
    pub span: SourceSpan,
}

impl BuildError {
    pub fn new(message: impl Into<String>, loc: SourceLoc, tokenizer: &Tokenizer) -> Self {
        let (line, col, span) = locate(loc, tokenizer);
        Self {
            message: message.into(),
            loc,
            line,
            col,
            src: tokenizer.text.clone(),
            span,
        }
    }
}

fn locate(loc: SourceLoc, tokenizer: &Tokenizer) -> (usize, usize, SourceSpan) {
    let offset = tokenizer.token_offset(loc);
    let (line, col) = tokenizer.linecol_at(offset);
    let span = match tokenizer.tokens.get(loc.token_index as usize) {
        Some(token) => (token.span.start, token.span.end - token.span.start),
        // Past the last token (e.g. unexpected end of input).
        None => (offset, 0),
    };
    (line + 1, col + 1, span.into())
}

/// Any failure from `parse_expression` or `make_autodiff`.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Build(#[from] BuildError),
}
