//! Numeric literal recognition.
//!
//! Numbers are captured in two stages, following the C++ lexical model:
//! first the `pp-number` grammar greedily claims a span (it accepts far
//! more than any valid literal — identifier characters, `'` digit
//! separators, `e`/`p` exponents with signs), then the span is resolved as
//! either an integer literal or a floating-point literal. Anything the
//! resolution leaves unconsumed is an error, which is how malformed
//! literals like `1..2` or `0x1A` (no hex support) are rejected.

use crate::errors::LexError;

/// A resolved numeric literal and the byte offset one past its end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum NumberValue {
    Int(u64),
    Float(f64),
}

fn is_ident_continue(text: &str, pos: usize) -> Option<usize> {
    let c = text[pos..].chars().next()?;
    if c.is_ascii_alphanumeric() || c == '_' || (c as u32) >= 0x80 {
        Some(pos + c.len_utf8())
    } else {
        None
    }
}

/// Match a `pp-number` starting at `pos`. Returns the end offset of the
/// span, or `None` if no pp-number starts here.
///
/// [lex.ppnumber]:
///   pp-number: digit | . digit | pp-number continue
fn pp_number(text: &str, pos: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut p = pos;

    if bytes.get(p) == Some(&b'.') {
        p += 1;
    }
    if !bytes.get(p)?.is_ascii_digit() {
        return None;
    }
    p += 1;

    while let Some(&c0) = bytes.get(p) {
        let c1 = bytes.get(p + 1).copied();

        // pp-number e sign / E sign / p sign / P sign
        if matches!(c0.to_ascii_uppercase(), b'E' | b'P')
            && matches!(c1, Some(b'+') | Some(b'-'))
        {
            p += 2;
            continue;
        }

        // pp-number ' digit / ' non-digit
        if c0 == b'\''
            && c1.is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
        {
            p += 2;
            continue;
        }

        // pp-number .
        if c0 == b'.' {
            p += 1;
            continue;
        }

        // pp-number digit / identifier-nondigit
        if let Some(next) = is_ident_continue(text, p) {
            p = next;
            continue;
        }

        break;
    }

    Some(p)
}

/// Consume a run of decimal digits. Returns the end offset.
fn decimal_sequence(bytes: &[u8], mut p: usize, end: usize) -> usize {
    while p < end && bytes[p].is_ascii_digit() {
        p += 1;
    }
    p
}

/// Parse a run of decimal digits into a u64 with overflow checking.
fn decimal_number(bytes: &[u8], p: usize, end: usize) -> Result<Option<(u64, usize)>, LexError> {
    let stop = decimal_sequence(bytes, p, end);
    if stop == p {
        return Ok(None);
    }
    let mut x: u64 = 0;
    for (i, &b) in bytes[p..stop].iter().enumerate() {
        let digit = (b - b'0') as u64;
        x = x
            .checked_mul(10)
            .and_then(|x| x.checked_add(digit))
            .ok_or_else(|| {
                LexError::new("integer overflow in decimal literal", p + i)
            })?;
    }
    Ok(Some((x, stop)))
}

/// Match an exponent-part: `e`/`E`, optional sign, digit-sequence.
/// Returns the end offset; the exponent value itself is never needed, only
/// its bounds check.
fn exponent_part(bytes: &[u8], p: usize, end: usize) -> Result<Option<usize>, LexError> {
    if p >= end || !matches!(bytes[p], b'e' | b'E') {
        return Ok(None);
    }
    let mut q = p + 1;
    if q < end && matches!(bytes[q], b'+' | b'-') {
        q += 1;
    }
    match decimal_number(bytes, q, end)? {
        Some((exp, stop)) => {
            if exp > i32::MAX as u64 {
                return Err(LexError::new("exponent is too large", q));
            }
            Ok(Some(stop))
        }
        None => Err(LexError::new(
            "expected digit-sequence in exponent-part",
            q,
        )),
    }
}

/// Match a floating-point literal within `[p, end)`. Returns the value and
/// end offset, or `None` if the span is not a float (no `.` and no
/// exponent — i.e. an integer).
fn floating_point_literal(
    text: &str,
    p: usize,
    end: usize,
) -> Result<Option<(f64, usize)>, LexError> {
    let bytes = text.as_bytes();
    let start = p;
    let mut q = p;

    let leading = decimal_sequence(bytes, q, end);
    if leading > q {
        q = leading;
        if q < end && bytes[q] == b'.' {
            // fractional-constant: trailing digits and exponent optional.
            q += 1;
            q = decimal_sequence(bytes, q, end);
            if let Some(stop) = exponent_part(bytes, q, end)? {
                q = stop;
            }
        } else if let Some(stop) = exponent_part(bytes, q, end)? {
            q = stop;
        } else {
            // A plain digit-sequence is an integer, not a float.
            return Ok(None);
        }
    } else if q < end && bytes[q] == b'.' {
        q += 1;
        let frac = decimal_sequence(bytes, q, end);
        if frac == q {
            return Ok(None);
        }
        q = frac;
        if let Some(stop) = exponent_part(bytes, q, end)? {
            q = stop;
        }
    } else {
        return Ok(None);
    }

    let value: f64 = text[start..q]
        .parse()
        .map_err(|_| LexError::new("malformed floating-point literal", start))?;
    Ok(Some((value, q)))
}

/// Recognize a numeric literal at `pos`. Returns the resolved value and the
/// end offset, or `None` if no pp-number starts here.
pub(crate) fn scan_number(
    text: &str,
    pos: usize,
) -> Result<Option<(NumberValue, usize)>, LexError> {
    let Some(pp_end) = pp_number(text, pos) else {
        return Ok(None);
    };

    // The pp-number must resolve as a floating-point-literal or an
    // integer-literal, consuming the whole span.
    let bytes = text.as_bytes();
    let (value, end) = match floating_point_literal(text, pos, pp_end)? {
        Some((x, end)) => (NumberValue::Float(x), end),
        None => match decimal_number(bytes, pos, pp_end)? {
            Some((x, end)) => (NumberValue::Int(x), end),
            None => {
                return Err(LexError::new(
                    "unexpected character in numeric literal",
                    pos,
                ))
            }
        },
    };

    if end < pp_end {
        return Err(LexError::new(
            "unexpected character in numeric literal",
            end,
        ));
    }
    Ok(Some((value, end)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(s: &str) -> Result<Option<(NumberValue, usize)>, LexError> {
        scan_number(s, 0)
    }

    #[test]
    fn test_integers() {
        assert_eq!(scan("42").unwrap(), Some((NumberValue::Int(42), 2)));
        assert_eq!(scan("0").unwrap(), Some((NumberValue::Int(0), 1)));
        assert_eq!(
            scan("18446744073709551615").unwrap(),
            Some((NumberValue::Int(u64::MAX), 20))
        );
    }

    #[test]
    fn test_integer_overflow() {
        assert!(scan("18446744073709551616").is_err());
        assert!(scan("99999999999999999999999").is_err());
    }

    #[test]
    fn test_floats() {
        assert_eq!(scan("3.14").unwrap(), Some((NumberValue::Float(3.14), 4)));
        assert_eq!(scan("1e10").unwrap(), Some((NumberValue::Float(1e10), 4)));
        assert_eq!(scan("1E-3").unwrap(), Some((NumberValue::Float(1e-3), 4)));
        assert_eq!(scan(".5").unwrap(), Some((NumberValue::Float(0.5), 2)));
        assert_eq!(scan("2.").unwrap(), Some((NumberValue::Float(2.0), 2)));
        assert_eq!(
            scan("6.02e+23").unwrap(),
            Some((NumberValue::Float(6.02e23), 8))
        );
    }

    #[test]
    fn test_exponent_too_large() {
        assert!(scan("1e99999999999").is_err());
    }

    #[test]
    fn test_not_a_number() {
        assert_eq!(scan("x").unwrap(), None);
        assert_eq!(scan(".x").unwrap(), None);
        assert_eq!(scan("+1").unwrap(), None);
    }

    #[test]
    fn test_trailing_junk_rejected() {
        // pp-number greedily claims these; resolution then rejects them.
        assert!(scan("1..2").is_err());
        assert!(scan("0x1A").is_err());
        assert!(scan("1'000").is_err());
        assert!(scan("3.14q").is_err());
    }

    #[test]
    fn test_stops_at_operator() {
        // Only the literal is claimed; the rest of the text is untouched.
        assert_eq!(scan("42+x").unwrap(), Some((NumberValue::Int(42), 2)));
        assert_eq!(scan("1.5*2").unwrap(), Some((NumberValue::Float(1.5), 3)));
    }
}
