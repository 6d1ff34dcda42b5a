//! Client encodings: server encoding ids, canonical names and glyph scanning.
//!
//! Escaping must never split a multibyte character, since several legacy
//! encodings (SJIS, BIG5, GBK, UHC, JOHAB, GB18030) allow ASCII-valued
//! bytes such as `\` or `'` as trailing bytes. Each encoding family gets a
//! scanner that finds where the current glyph ends.

use crate::error::{Error, Result};

/// Canonical server encoding names, indexed by encoding id.
const ENCODING_NAMES: [&str; 42] = [
    "SQL_ASCII",
    "EUC_JP",
    "EUC_CN",
    "EUC_KR",
    "EUC_TW",
    "EUC_JIS_2004",
    "UTF8",
    "MULE_INTERNAL",
    "LATIN1",
    "LATIN2",
    "LATIN3",
    "LATIN4",
    "LATIN5",
    "LATIN6",
    "LATIN7",
    "LATIN8",
    "LATIN9",
    "LATIN10",
    "WIN1256",
    "WIN1258",
    "WIN866",
    "WIN874",
    "KOI8R",
    "WIN1251",
    "WIN1252",
    "ISO_8859_5",
    "ISO_8859_6",
    "ISO_8859_7",
    "ISO_8859_8",
    "WIN1250",
    "WIN1253",
    "WIN1254",
    "WIN1255",
    "WIN1257",
    "KOI8U",
    "SJIS",
    "BIG5",
    "GBK",
    "UHC",
    "GB18030",
    "JOHAB",
    "SHIFT_JIS_2004",
];

/// Canonical name of a server encoding id.
pub fn name_of(id: i32) -> Option<&'static str> {
    usize::try_from(id)
        .ok()
        .and_then(|i| ENCODING_NAMES.get(i).copied())
}

/// Server encoding id for a name. Matching ignores ASCII case and the
/// `-`/`_` separators, so `utf-8` finds `UTF8`.
pub fn id_of(name: &str) -> Option<i32> {
    let wanted = normalize(name);
    ENCODING_NAMES
        .iter()
        .position(|n| normalize(n) == wanted)
        .and_then(|i| i32::try_from(i).ok())
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Families of encodings that share a glyph layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncodingGroup {
    /// Every single-byte encoding (SQL_ASCII, LATINx, WINxxx, KOI8x, ISO_8859_x)
    Monobyte,
    Big5,
    EucCn,
    /// EUC_JP and EUC_JIS_2004
    EucJp,
    EucKr,
    EucTw,
    Gb18030,
    Gbk,
    Johab,
    MuleInternal,
    /// SJIS and SHIFT_JIS_2004
    Sjis,
    Uhc,
    Utf8,
}

impl EncodingGroup {
    /// Look up the group for a canonical encoding name.
    pub fn from_name(name: &str) -> Result<Self> {
        let group = match name {
            "BIG5" => Some(Self::Big5),
            "EUC_CN" => Some(Self::EucCn),
            "EUC_JP" | "EUC_JIS_2004" => Some(Self::EucJp),
            "EUC_KR" => Some(Self::EucKr),
            "EUC_TW" => Some(Self::EucTw),
            "GB18030" => Some(Self::Gb18030),
            "GBK" => Some(Self::Gbk),
            "JOHAB" => Some(Self::Johab),
            "MULE_INTERNAL" => Some(Self::MuleInternal),
            "SJIS" | "SHIFT_JIS_2004" => Some(Self::Sjis),
            "UHC" => Some(Self::Uhc),
            "UTF8" => Some(Self::Utf8),
            "SQL_ASCII" | "KOI8R" | "KOI8U" => Some(Self::Monobyte),
            _ => monobyte_family(name).then_some(Self::Monobyte),
        };
        group.ok_or_else(|| Error::Argument(format!("Unrecognized encoding: '{name}'.")))
    }

    /// Look up the group for a server encoding id.
    pub fn from_id(id: i32) -> Result<Self> {
        let name =
            name_of(id).ok_or_else(|| Error::Argument(format!("Unrecognized encoding id: {id}.")))?;
        Self::from_name(name)
    }

    /// Offset one past the end of the glyph starting at `start`.
    pub fn glyph_end(self, text: &[u8], start: usize) -> Result<usize> {
        let Some(&b1) = text.get(start) else {
            return Ok(start);
        };
        if b1 < 0x80 {
            return Ok(start + 1);
        }

        let byte = |n: usize| text.get(start + n).copied();
        let within = |n: usize, lo: u8, hi: u8| byte(n).is_some_and(|b| (lo..=hi).contains(&b));
        let high = |n: usize| within(n, 0xa1, 0xfe);

        let len = match self {
            Self::Monobyte => Some(1),
            Self::Utf8 => utf8_len(&text[start..]),
            Self::Big5 => ((0x81..=0xfe).contains(&b1)
                && (within(1, 0x40, 0x7e) || within(1, 0xa1, 0xfe)))
            .then_some(2),
            Self::EucCn => ((0xa1..=0xf7).contains(&b1) && high(1)).then_some(2),
            Self::EucKr => ((0xa1..=0xfe).contains(&b1) && high(1)).then_some(2),
            Self::EucJp => match b1 {
                0x8e => high(1).then_some(2),
                0x8f => (high(1) && high(2)).then_some(3),
                0xa1..=0xfe => high(1).then_some(2),
                _ => None,
            },
            Self::EucTw => match b1 {
                0x8e => (within(1, 0xa1, 0xb0) && high(2) && high(3)).then_some(4),
                0xa1..=0xfe => high(1).then_some(2),
                _ => None,
            },
            Self::Gb18030 => match b1 {
                0x81..=0xfe if within(1, 0x30, 0x39) => {
                    (within(2, 0x81, 0xfe) && within(3, 0x30, 0x39)).then_some(4)
                }
                0x81..=0xfe => (within(1, 0x40, 0x7e) || within(1, 0x80, 0xfe)).then_some(2),
                _ => None,
            },
            Self::Gbk => match b1 {
                0x80 => Some(1),
                0x81..=0xfe => (within(1, 0x40, 0x7e) || within(1, 0x80, 0xfe)).then_some(2),
                _ => None,
            },
            Self::Johab => (matches!(b1, 0x84..=0xd3 | 0xd8..=0xde | 0xe0..=0xf9)
                && (within(1, 0x31, 0x7e) || within(1, 0x81, 0xfe)))
            .then_some(2),
            Self::MuleInternal => match b1 {
                0x81..=0x8d => within(1, 0xa0, 0xff).then_some(2),
                0x90..=0x99 => (within(1, 0xa0, 0xff) && within(2, 0xa0, 0xff)).then_some(3),
                0x9a..=0x9b => (within(1, 0xa0, 0xdf) && within(2, 0xa0, 0xff)).then_some(3),
                0x9c..=0x9d => (within(1, 0xf0, 0xf4)
                    && within(2, 0xa0, 0xff)
                    && within(3, 0xa0, 0xff))
                .then_some(4),
                _ => None,
            },
            Self::Sjis => match b1 {
                0xa1..=0xdf => Some(1),
                0x81..=0x9f | 0xe0..=0xfc => {
                    (within(1, 0x40, 0x7e) || within(1, 0x80, 0xfc)).then_some(2)
                }
                _ => None,
            },
            Self::Uhc => match b1 {
                0x80..=0xc6
                    if within(1, 0x41, 0x5a) || within(1, 0x61, 0x7a) || within(1, 0x80, 0xfe) =>
                {
                    Some(2)
                }
                0xa1..=0xfe => high(1).then_some(2),
                _ => None,
            },
        };

        len.map(|len| start + len).ok_or_else(|| {
            Error::Argument(format!(
                "Invalid byte sequence for encoding group {self:?} at byte {start}: 0x{b1:02x}."
            ))
        })
    }

    /// Iterate over the glyphs of `text`.
    pub fn glyphs(self, text: &[u8]) -> Glyphs<'_> {
        Glyphs {
            group: self,
            text,
            pos: 0,
        }
    }
}

fn monobyte_family(name: &str) -> bool {
    if let Some(n) = name.strip_prefix("LATIN") {
        return matches!(n, "1" | "2" | "3" | "4" | "5" | "6" | "7" | "8" | "9" | "10");
    }
    if let Some(n) = name.strip_prefix("ISO_8859_") {
        return matches!(n, "5" | "6" | "7" | "8");
    }
    if let Some(n) = name.strip_prefix("WIN") {
        return matches!(
            n,
            "866" | "874" | "1250" | "1251" | "1252" | "1253" | "1254" | "1255" | "1256" | "1257"
                | "1258"
        );
    }
    false
}

fn utf8_len(bytes: &[u8]) -> Option<usize> {
    let len = match bytes.first()? {
        0xc2..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf4 => 4,
        _ => return None,
    };
    let glyph = bytes.get(..len)?;
    simdutf8::basic::from_utf8(glyph).ok().map(|_| len)
}

/// Iterator over glyphs, produced by [`EncodingGroup::glyphs`].
#[derive(Debug, Clone)]
pub struct Glyphs<'a> {
    group: EncodingGroup,
    text: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for Glyphs<'a> {
    type Item = Result<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.text.len() {
            return None;
        }
        match self.group.glyph_end(self.text, self.pos) {
            Ok(end) => {
                let glyph = &self.text[self.pos..end];
                self.pos = end;
                Some(Ok(glyph))
            }
            Err(err) => {
                self.pos = self.text.len();
                Some(Err(err))
            }
        }
    }
}
