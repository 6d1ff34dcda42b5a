//! Quoting and escaping of text for embedding in SQL.
//!
//! Every scan walks whole glyphs of the client encoding, so a quote or
//! backslash byte that is the tail of a multibyte character is never
//! mistaken for the ASCII character.

use crate::encoding::EncodingGroup;
use crate::error::{Error, Result};

fn reject_nul(glyph: &[u8]) -> Result<()> {
    if glyph == [0] {
        return Err(Error::Argument(
            "Cannot embed a NUL byte in SQL text.".into(),
        ));
    }
    Ok(())
}

/// Escape `text` for use inside a single-quoted string literal.
///
/// Single quotes are doubled. With `standard_conforming_strings` off,
/// backslashes are doubled as well.
pub fn esc(text: &[u8], group: EncodingGroup, standard_conforming: bool) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len() + 2);
    for glyph in group.glyphs(text) {
        let glyph = glyph?;
        reject_nul(glyph)?;
        match glyph {
            b"'" => out.extend_from_slice(b"''"),
            b"\\" if !standard_conforming => out.extend_from_slice(b"\\\\"),
            _ => out.extend_from_slice(glyph),
        }
    }
    Ok(out)
}

/// `text` as a complete string literal, quotes included.
pub fn quote(text: &[u8], group: EncodingGroup, standard_conforming: bool) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len() + 2);
    out.push(b'\'');
    out.extend(esc(text, group, standard_conforming)?);
    out.push(b'\'');
    Ok(out)
}

/// Parse a string literal produced by [`quote`] back into its bytes.
///
/// An `E` prefix selects backslash escapes regardless of
/// `standard_conforming`.
pub fn unesc_literal(
    literal: &[u8],
    group: EncodingGroup,
    standard_conforming: bool,
) -> Result<Vec<u8>> {
    let malformed = || Error::Argument("Malformed string literal.".into());

    let (body, backslashes) = match literal {
        [b'E' | b'e', rest @ ..] => (rest, true),
        _ => (literal, !standard_conforming),
    };
    let body = body
        .strip_prefix(b"'")
        .and_then(|b| b.strip_suffix(b"'"))
        .ok_or_else(malformed)?;

    let mut out = Vec::with_capacity(body.len());
    let mut glyphs = group.glyphs(body);
    while let Some(glyph) = glyphs.next() {
        match glyph? {
            b"'" => match glyphs.next().transpose()? {
                Some(b"'") => out.push(b'\''),
                _ => return Err(malformed()),
            },
            b"\\" if backslashes => match glyphs.next().transpose()? {
                Some(b"n") => out.push(b'\n'),
                Some(b"t") => out.push(b'\t'),
                Some(b"r") => out.push(b'\r'),
                Some(b"b") => out.push(0x08),
                Some(b"f") => out.push(0x0c),
                Some(escaped) => out.extend_from_slice(escaped),
                None => return Err(malformed()),
            },
            glyph => out.extend_from_slice(glyph),
        }
    }
    Ok(out)
}

/// Quote an identifier: wrap in double quotes, doubling embedded ones.
pub fn quote_name(name: &[u8], group: EncodingGroup) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(name.len() + 2);
    out.push(b'"');
    for glyph in group.glyphs(name) {
        let glyph = glyph?;
        reject_nul(glyph)?;
        if glyph == b"\"" {
            out.push(b'"');
        }
        out.extend_from_slice(glyph);
    }
    out.push(b'"');
    Ok(out)
}

/// Escape binary data in `bytea` hex format: `\x` followed by hex digits.
pub fn esc_raw(data: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(2 + data.len() * 2);
    out.push_str("\\x");
    for &byte in data {
        out.push(char::from(HEX[usize::from(byte >> 4)]));
        out.push(char::from(HEX[usize::from(byte & 0x0f)]));
    }
    out
}

/// Binary data as a complete `bytea` literal.
pub fn quote_raw(data: &[u8]) -> String {
    format!("'{}'::bytea", esc_raw(data))
}

fn hex_digit(b: u8) -> Result<u8> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        _ => Err(Error::Argument(format!(
            "Invalid hex digit in escaped binary data: {:?}.",
            char::from(b)
        ))),
    }
}

/// Decode `bytea` text output, either hex (`\x...`) or the older escape
/// format (`\\` and `\ooo` octal sequences).
pub fn unesc_raw(text: &[u8]) -> Result<Vec<u8>> {
    if let Some(hex) = text.strip_prefix(b"\\x") {
        let pairs = hex.chunks_exact(2);
        if !pairs.remainder().is_empty() {
            return Err(Error::Argument(
                "Escaped binary data has an odd number of hex digits.".into(),
            ));
        }
        return pairs
            .map(|pair| match *pair {
                [high, low] => Ok((hex_digit(high)? << 4) | hex_digit(low)?),
                _ => Err(Error::Internal("hex pair of wrong length".into())),
            })
            .collect();
    }

    let mut out = Vec::with_capacity(text.len());
    let mut i = 0;
    while let Some(&byte) = text.get(i) {
        if byte != b'\\' {
            out.push(byte);
            i += 1;
            continue;
        }
        match text.get(i + 1..i + 4) {
            Some(&[b'\\', ..]) => {
                out.push(b'\\');
                i += 2;
            }
            Some(&[a @ b'0'..=b'3', b @ b'0'..=b'7', c @ b'0'..=b'7']) => {
                out.push(((a - b'0') << 6) | ((b - b'0') << 3) | (c - b'0'));
                i += 4;
            }
            _ if text.get(i + 1) == Some(&b'\\') => {
                out.push(b'\\');
                i += 2;
            }
            _ => {
                return Err(Error::Argument(format!(
                    "Invalid escape sequence in binary data at byte {i}."
                )));
            }
        }
    }
    Ok(out)
}

/// Escape the LIKE wildcards `%` and `_` with `escape_char`.
///
/// The escape character itself is left alone.
pub fn esc_like(text: &[u8], escape_char: u8, group: EncodingGroup) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len());
    for glyph in group.glyphs(text) {
        let glyph = glyph?;
        if glyph == b"_" || glyph == b"%" {
            out.push(escape_char);
        }
        out.extend_from_slice(glyph);
    }
    Ok(out)
}
