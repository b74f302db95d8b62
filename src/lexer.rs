//! Tokenizer — turns the source string into a token vector plus side
//! tables.
//!
//! The scanner walks the byte stream, producing a [`Token`] per lexeme.
//! Key design decisions:
//!
//! - **Side tables**: tokens are 16 bytes and `Copy`; literal payloads live
//!   in the tokenizer's string/int/float tables, indexed by the token's
//!   `store` field. Identifiers are interned, so identical text yields an
//!   identical `store`.
//!
//! - **Selection order**: at each position the scanner tries a literal
//!   (number, then char, then string), then an identifier, then an
//!   operator. The first that matches wins.
//!
//! - **Line offsets**: a sorted table of `\n` positions is built in one
//!   pass. Line/column resolution binary-searches it, then counts
//!   codepoints (not bytes) from the line start, so columns are correct
//!   for multibyte text.

use crate::errors::LexError;
use crate::number::{self, NumberValue};
use crate::operators;
use crate::token::{SourceLoc, Span, Token, TokenKind};

/// Token stream plus the side tables the tokens index into.
#[derive(Debug, Clone, Default)]
pub struct Tokenizer {
    /// Original text that was tokenized.
    pub text: String,

    /// The text divided into tokens.
    pub tokens: Vec<Token>,

    /// Interned identifier and string-literal payloads.
    pub strings: Vec<String>,

    /// Integer literal values.
    pub ints: Vec<u64>,

    /// Floating-point literal values.
    pub floats: Vec<f64>,

    /// Byte offset of each `\n` in the text.
    line_offsets: Vec<usize>,
}

impl Tokenizer {
    /// Tokenize the whole input up front. Fails on the first lexical
    /// error: unterminated comment, malformed number, bad escape, or a
    /// byte no token can start with.
    pub fn tokenize(text: &str) -> Result<Tokenizer, LexError> {
        let mut tk = Tokenizer {
            text: text.to_string(),
            ..Tokenizer::default()
        };
        tk.line_offsets = text
            .bytes()
            .enumerate()
            .filter_map(|(i, b)| (b == b'\n').then_some(i))
            .collect();

        tk.scan_all().map_err(|e| e.with_source(text))?;
        Ok(tk)
    }

    fn scan_all(&mut self) -> Result<(), LexError> {
        let text = self.text.clone();
        let mut pos = 0;
        loop {
            pos = skip_trivia(&text, pos)?;
            if pos >= text.len() {
                return Ok(());
            }
            pos = self.scan_token(&text, pos)?;
        }
    }

    /// Scan one token starting at `pos` and push it. Returns the offset
    /// one past its end.
    fn scan_token(&mut self, text: &str, pos: usize) -> Result<usize, LexError> {
        // Literal: number first, then char, then string.
        if let Some((value, end)) = number::scan_number(text, pos)? {
            let token = match value {
                NumberValue::Int(x) => {
                    let store = self.ints.len() as u32;
                    self.ints.push(x);
                    Token::new(TokenKind::Int, store, Span::new(pos, end))
                }
                NumberValue::Float(x) => {
                    let store = self.floats.len() as u32;
                    self.floats.push(x);
                    Token::new(TokenKind::Float, store, Span::new(pos, end))
                }
            };
            self.tokens.push(token);
            return Ok(end);
        }

        if let Some((c, end)) = char_literal(text, pos)? {
            self.tokens
                .push(Token::new(TokenKind::Char, c as u32, Span::new(pos, end)));
            return Ok(end);
        }

        if let Some((s, end)) = string_literal(text, pos)? {
            let store = self.strings.len() as u32;
            self.strings.push(s);
            self.tokens
                .push(Token::new(TokenKind::Str, store, Span::new(pos, end)));
            return Ok(end);
        }

        // Identifier, with the boolean keywords peeled off.
        if let Some(end) = identifier(text, pos) {
            let name = &text[pos..end];
            let token = match name {
                "true" => Token::new(TokenKind::True, 0, Span::new(pos, end)),
                "false" => Token::new(TokenKind::False, 0, Span::new(pos, end)),
                _ => {
                    let store = self.reg_string(name);
                    Token::new(TokenKind::Ident, store, Span::new(pos, end))
                }
            };
            self.tokens.push(token);
            return Ok(end);
        }

        // Operator.
        if let Some((kind, len)) = operators::match_operator(&text.as_bytes()[pos..]) {
            self.tokens
                .push(Token::new(kind, 0, Span::new(pos, pos + len)));
            return Ok(pos + len);
        }

        Err(LexError::new("unrecognized character", pos))
    }

    /// Intern a string, returning the index of an existing identical entry
    /// if there is one.
    fn reg_string(&mut self, s: &str) -> u32 {
        match self.strings.iter().position(|t| t == s) {
            Some(i) => i as u32,
            None => {
                self.strings.push(s.to_string());
                (self.strings.len() - 1) as u32
            }
        }
    }

    // ── Location resolution ──────────────────────────────────────────

    /// Byte offset of the start of the token at `loc` (the end of the
    /// text when `loc` is past the last token).
    pub fn token_offset(&self, loc: SourceLoc) -> usize {
        match self.tokens.get(loc.token_index as usize) {
            Some(token) => token.span.start,
            None => self.text.len(),
        }
    }

    /// 0-indexed line and column for a byte offset. Columns count
    /// codepoints from the line start.
    pub fn linecol_at(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.text.len());
        let line = self.line_offsets.partition_point(|&nl| nl < offset);
        let line_start = if line == 0 {
            0
        } else {
            self.line_offsets[line - 1] + 1
        };
        let col = self.text[line_start..offset].chars().count();
        (line, col)
    }

    /// 0-indexed line and column of the token at `loc`.
    pub fn token_linecol(&self, loc: SourceLoc) -> (usize, usize) {
        self.linecol_at(self.token_offset(loc))
    }
}

// ── Character-level scanners ─────────────────────────────────────────

/// Skip runs of whitespace, `// line comments`, and `/* block comments */`.
/// Returns the offset of the next token start (or the end of the text).
fn skip_trivia(text: &str, mut pos: usize) -> Result<usize, LexError> {
    let bytes = text.as_bytes();
    loop {
        while pos < bytes.len() && matches!(bytes[pos], b' ' | b'\t' | b'\r' | b'\n') {
            pos += 1;
        }

        if text[pos..].starts_with("//") {
            // To, but not past, the newline.
            match text[pos..].find('\n') {
                Some(i) => pos += i,
                None => pos = text.len(),
            }
        } else if text[pos..].starts_with("/*") {
            let start = pos;
            match text[pos + 2..].find("*/") {
                Some(i) => pos += 2 + i + 2,
                None => {
                    return Err(LexError::new(
                        "unterminated block comment: expected */",
                        start,
                    ))
                }
            }
        } else {
            return Ok(pos);
        }
    }
}

/// Match an identifier: ASCII letter, `_`, or any codepoint >= U+0080 to
/// start; continuation characters add ASCII digits. Returns the end offset.
fn identifier(text: &str, pos: usize) -> Option<usize> {
    let mut chars = text[pos..].char_indices();
    let (_, first) = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_' || (first as u32) >= 0x80) {
        return None;
    }
    let mut end = pos + first.len_utf8();
    for (i, c) in chars {
        if c.is_ascii_alphanumeric() || c == '_' || (c as u32) >= 0x80 {
            end = pos + i + c.len_utf8();
        } else {
            break;
        }
    }
    Some(end)
}

fn escape(text: &str, pos: usize) -> Result<(char, usize), LexError> {
    let c = text[pos..]
        .chars()
        .next()
        .ok_or_else(|| LexError::new("unterminated escape sequence", pos))?;
    let decoded = match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        '\\' => '\\',
        '\'' => '\'',
        '"' => '"',
        other => {
            return Err(LexError::new(
                format!("unknown escape sequence '\\{}'", other),
                pos,
            ))
        }
    };
    Ok((decoded, pos + c.len_utf8()))
}

/// Match a character literal `'c'`. Returns the codepoint and end offset.
fn char_literal(text: &str, pos: usize) -> Result<Option<(char, usize)>, LexError> {
    if !text[pos..].starts_with('\'') {
        return Ok(None);
    }
    let mut p = pos + 1;
    let c = text[p..]
        .chars()
        .next()
        .ok_or_else(|| LexError::new("expected character in literal", p))?;
    let decoded = if c == '\\' {
        let (d, next) = escape(text, p + 1)?;
        p = next;
        d
    } else if c == '\'' {
        return Err(LexError::new("expected character in literal", p));
    } else {
        p += c.len_utf8();
        c
    };
    if !text[p..].starts_with('\'') {
        return Err(LexError::new("expected \"'\" to end character literal", p));
    }
    Ok(Some((decoded, p + 1)))
}

/// Match a string literal `"..."`. Returns the decoded payload and end
/// offset.
fn string_literal(text: &str, pos: usize) -> Result<Option<(String, usize)>, LexError> {
    if !text[pos..].starts_with('"') {
        return Ok(None);
    }
    let mut value = String::new();
    let mut p = pos + 1;
    loop {
        let c = text[p..]
            .chars()
            .next()
            .ok_or_else(|| LexError::new("unterminated string literal", pos))?;
        match c {
            '"' => return Ok(Some((value, p + 1))),
            '\\' => {
                let (d, next) = escape(text, p + 1)?;
                value.push(d);
                p = next;
            }
            _ => {
                value.push(c);
                p += c.len_utf8();
            }
        }
    }
}
