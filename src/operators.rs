//! Longest-match recognition of multi-character punctuator symbols.
//!
//! A sorted table of every punctuator is built once per process. A
//! 257-entry first-byte index gives the `[begin, end)` range of table
//! entries starting with each byte; after the first byte the candidate
//! range is narrowed one byte at a time. When the range can no longer be
//! extended, the entry whose symbol ends exactly at the current depth wins
//! (the table is sorted, so that entry — if present — is the first in the
//! range). If no entry ends there, nothing matches: the matcher does not
//! backtrack to a shorter symbol.

use crate::token::TokenKind;
use std::sync::OnceLock;

const SYMBOLS: &[(&str, TokenKind)] = &[
    ("&", TokenKind::Amp),
    ("&&", TokenKind::AmpAmp),
    ("&=", TokenKind::AmpEq),
    ("->", TokenKind::Arrow),
    ("->*", TokenKind::ArrowStar),
    ("[[", TokenKind::AttribL),
    ("!", TokenKind::Bang),
    ("!=", TokenKind::BangEq),
    ("{", TokenKind::LBrace),
    ("}", TokenKind::RBrace),
    ("[", TokenKind::LBracket),
    ("]", TokenKind::RBracket),
    ("^", TokenKind::Caret),
    ("^=", TokenKind::CaretEq),
    (":", TokenKind::Colon),
    ("::", TokenKind::ColonColon),
    (",", TokenKind::Comma),
    (".", TokenKind::Dot),
    (".*", TokenKind::DotStar),
    ("...", TokenKind::Ellipsis),
    ("=", TokenKind::Eq),
    ("==", TokenKind::EqEq),
    (">", TokenKind::Gt),
    (">=", TokenKind::GtEq),
    (">>", TokenKind::GtGt),
    (">>=", TokenKind::GtGtEq),
    ("<", TokenKind::Lt),
    ("<=", TokenKind::LtEq),
    ("<<", TokenKind::LtLt),
    ("<<=", TokenKind::LtLtEq),
    ("-", TokenKind::Minus),
    ("-=", TokenKind::MinusEq),
    ("--", TokenKind::MinusMinus),
    ("(", TokenKind::LParen),
    (")", TokenKind::RParen),
    ("%", TokenKind::Percent),
    ("%=", TokenKind::PercentEq),
    ("|", TokenKind::Pipe),
    ("|=", TokenKind::PipeEq),
    ("||", TokenKind::PipePipe),
    ("+", TokenKind::Plus),
    ("+=", TokenKind::PlusEq),
    ("++", TokenKind::PlusPlus),
    ("?", TokenKind::Question),
    (";", TokenKind::Semicolon),
    ("/", TokenKind::Slash),
    ("/=", TokenKind::SlashEq),
    ("*", TokenKind::Star),
    ("*=", TokenKind::StarEq),
    ("~", TokenKind::Tilde),
];

struct OpTable {
    /// Symbols sorted by byte order; a prefix always sorts before its
    /// extensions.
    symbols: Vec<(&'static str, TokenKind)>,
    /// `first_byte[b]..first_byte[b + 1]` is the range of entries whose
    /// symbol starts with byte `b`.
    first_byte: [usize; 257],
}

fn table() -> &'static OpTable {
    static TABLE: OnceLock<OpTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut symbols = SYMBOLS.to_vec();
        symbols.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

        let mut first_byte = [0usize; 257];
        for b in 0..256usize {
            first_byte[b] = symbols.partition_point(|s| (s.0.as_bytes()[0] as usize) < b);
        }
        first_byte[256] = symbols.len();

        OpTable { symbols, first_byte }
    })
}

/// Match the longest punctuator that is a prefix of `bytes`. Returns the
/// token kind and the number of bytes consumed.
pub(crate) fn match_operator(bytes: &[u8]) -> Option<(TokenKind, usize)> {
    let table = table();
    let first = *bytes.first()?;

    let mut begin = table.first_byte[first as usize];
    let mut end = table.first_byte[first as usize + 1];
    if begin == end {
        return None;
    }

    // Entries in [begin, end) agree with the input on the first `pos` bytes.
    let mut pos = 1;
    while let Some(&c) = bytes.get(pos) {
        // Narrow to entries whose byte at `pos` equals `c`. The ranges per
        // byte are tiny, so a linear scan is adequate.
        let begin2 = (begin..end)
            .find(|&i| table.symbols[i].0.as_bytes().get(pos) == Some(&c))
            .unwrap_or(end);
        let end2 = (begin2..end)
            .find(|&i| table.symbols[i].0.as_bytes().get(pos) != Some(&c))
            .unwrap_or(end);
        if begin2 == end2 {
            break;
        }
        begin = begin2;
        end = end2;
        pos += 1;
    }

    if table.symbols[begin].0.len() == pos {
        Some((table.symbols[begin].1, pos))
    } else {
        None
    }
}
