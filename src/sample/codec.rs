//! Textual encoding of sample values.
//!
//! Two layers live here: the JSON escape/unescape primitives with bounded,
//! NUL-terminated destination buffers, and the type-directed conversions
//! used by the snapshot formatter and by push-handler coercion.
//!
//! The escape contract: only `"`, `\` and control characters at or below
//! U+001F are escaped; every other UTF-8 code point passes through as its
//! byte sequence. Unescaping resolves the short escapes and `\u00xx`, and
//! emits the escaped character literally for any other `\x` sequence,
//! tolerating the kind of loosely formed input producers actually send. A
//! lone trailing backslash is dropped.

use std::str::Chars;

use crate::error::{HubError, Result};
use crate::sample::{DataType, Sample, SamplePools, Timestamp};

/// Escapes one character, returning the encoded piece.
fn escape_char(c: char, tmp: &mut [u8; 6]) -> &[u8] {
    match c {
        '"' => b"\\\"",
        '\\' => b"\\\\",
        '\u{0008}' => b"\\b",
        '\u{000c}' => b"\\f",
        '\n' => b"\\n",
        '\r' => b"\\r",
        '\t' => b"\\t",
        c if c <= '\u{001f}' => {
            const HEX: &[u8; 16] = b"0123456789abcdef";
            let code = c as u32;
            tmp[..4].copy_from_slice(b"\\u00");
            tmp[4] = HEX[(code >> 4) as usize];
            tmp[5] = HEX[(code & 0xf) as usize];
            &tmp[..6]
        }
        c => c.encode_utf8(&mut tmp[..4]).as_bytes(),
    }
}

/// Escapes `src` into a fresh string (no surrounding quotes).
pub fn escape_json(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut tmp = [0u8; 6];
    for c in src.chars() {
        let piece = escape_char(c, &mut tmp);
        // Escape pieces are always valid UTF-8.
        if let Ok(s) = std::str::from_utf8(piece) {
            out.push_str(s);
        }
    }
    out
}

/// Escapes `src` into `dest`, NUL-terminated.
///
/// Truncates at the last whole escaped character that fits and returns
/// `Overflow` when the full source did not fit. An empty destination is an
/// immediate `Overflow` with nothing written.
pub fn string_to_json(dest: &mut [u8], src: &str) -> Result<usize> {
    if dest.is_empty() {
        return Err(HubError::Overflow);
    }
    let usable = dest.len() - 1;
    let mut written = 0;
    let mut tmp = [0u8; 6];
    for c in src.chars() {
        let piece = escape_char(c, &mut tmp);
        if written + piece.len() > usable {
            dest[written] = 0;
            return Err(HubError::Overflow);
        }
        dest[written..written + piece.len()].copy_from_slice(piece);
        written += piece.len();
    }
    dest[written] = 0;
    Ok(written)
}

/// Iterator resolving escape sequences in a JSON string body.
struct Unescaped<'a> {
    chars: Chars<'a>,
}

impl Iterator for Unescaped<'_> {
    type Item = Result<char>;

    fn next(&mut self) -> Option<Self::Item> {
        let c = self.chars.next()?;
        if c != '\\' {
            return Some(Ok(c));
        }
        // A trailing backslash with nothing after it is dropped.
        let escape = self.chars.next()?;
        Some(match escape {
            'b' => Ok('\u{0008}'),
            'f' => Ok('\u{000c}'),
            'n' => Ok('\n'),
            'r' => Ok('\r'),
            't' => Ok('\t'),
            'u' => self.unescape_unicode(),
            other => Ok(other),
        })
    }
}

impl Unescaped<'_> {
    fn unescape_unicode(&mut self) -> Result<char> {
        let mut code = 0u32;
        for _ in 0..4 {
            let digit = self
                .chars
                .next()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| {
                    HubError::FormatError("\\u escape needs four hex digits".into())
                })?;
            code = (code << 4) | digit;
        }
        char::from_u32(code)
            .ok_or_else(|| HubError::FormatError(format!("\\u{code:04x} is not a character")))
    }
}

/// Strips the outer double quotes when present on both ends.
fn strip_quotes(src: &str) -> &str {
    let bytes = src.as_bytes();
    if bytes.len() >= 2 && bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"' {
        &src[1..src.len() - 1]
    } else {
        src
    }
}

/// Unescapes a JSON string value into a fresh string, stripping outer quotes
/// when present on both ends.
pub fn unescape_json(src: &str) -> Result<String> {
    let inner = strip_quotes(src);
    let mut out = String::with_capacity(inner.len());
    for c in (Unescaped { chars: inner.chars() }) {
        out.push(c?);
    }
    Ok(out)
}

/// Unescapes `src` into `dest`, NUL-terminated, stripping outer quotes when
/// present on both ends.
///
/// Same truncation and `Overflow` contract as [`string_to_json`].
pub fn json_to_string(dest: &mut [u8], src: &str) -> Result<usize> {
    if dest.is_empty() {
        return Err(HubError::Overflow);
    }
    let usable = dest.len() - 1;
    let mut written = 0;
    let inner = strip_quotes(src);
    for c in (Unescaped { chars: inner.chars() }) {
        let c = match c {
            Ok(c) => c,
            Err(err) => {
                dest[written] = 0;
                return Err(err);
            }
        };
        let mut tmp = [0u8; 4];
        let piece = c.encode_utf8(&mut tmp).as_bytes();
        if written + piece.len() > usable {
            dest[written] = 0;
            return Err(HubError::Overflow);
        }
        dest[written..written + piece.len()].copy_from_slice(piece);
        written += piece.len();
    }
    dest[written] = 0;
    Ok(written)
}

/// Renders a sample as a plain UTF-8 string, directed by the owning
/// resource's data type.
pub fn convert_to_string(sample: &Sample, data_type: DataType) -> Result<String> {
    match data_type {
        DataType::Trigger => Ok(String::new()),
        DataType::Boolean => {
            let v = sample
                .as_bool()
                .ok_or(HubError::BadParameter("sample is not boolean"))?;
            Ok(if v { "true" } else { "false" }.to_string())
        }
        DataType::Numeric => {
            let v = sample
                .as_num()
                .ok_or(HubError::BadParameter("sample is not numeric"))?;
            Ok(format!("{v:.6}"))
        }
        DataType::String => {
            let v = sample
                .as_text()
                .ok_or(HubError::BadParameter("sample is not textual"))?;
            Ok(v.to_string())
        }
        DataType::Json => {
            let v = sample
                .as_text()
                .ok_or(HubError::BadParameter("sample is not textual"))?;
            unescape_json(v)
        }
    }
}

/// Renders a sample as a JSON value, directed by the owning resource's data
/// type. Triggers render as the empty string.
pub fn convert_to_json(sample: &Sample, data_type: DataType) -> Result<String> {
    match data_type {
        DataType::String => {
            let v = sample
                .as_text()
                .ok_or(HubError::BadParameter("sample is not textual"))?;
            Ok(format!("\"{}\"", escape_json(v)))
        }
        DataType::Json => {
            let v = sample
                .as_text()
                .ok_or(HubError::BadParameter("sample is not textual"))?;
            Ok(v.to_string())
        }
        other => convert_to_string(sample, other),
    }
}

/// Extracts an object member or array element from a JSON sample using a
/// specifier like `"x"`, `"x.y"`, `"[3]"` or `"x[3].y"`, returning the
/// extracted value as a new sample of the narrowest fitting type.
pub fn extract_json(
    sample: &Sample,
    extraction_spec: &str,
    pools: &SamplePools,
) -> Result<(DataType, Sample)> {
    let text = sample
        .as_text()
        .ok_or(HubError::BadParameter("sample is not textual"))?;
    let parsed: serde_json::Value = serde_json::from_str(text)
        .map_err(|err| HubError::FormatError(err.to_string()))?;

    let mut current = &parsed;
    for step in SpecSteps::new(extraction_spec) {
        current = match step? {
            SpecStep::Member(name) => current.get(name).ok_or(HubError::NotFound)?,
            SpecStep::Element(index) => current.get(index).ok_or(HubError::NotFound)?,
        };
    }

    let ts = sample.timestamp();
    sample_from_json(current, ts, pools)
}

fn sample_from_json(
    value: &serde_json::Value,
    ts: Timestamp,
    pools: &SamplePools,
) -> Result<(DataType, Sample)> {
    use serde_json::Value as Json;
    match value {
        Json::Null => Ok((DataType::Trigger, Sample::trigger(pools, ts))),
        Json::Bool(v) => Ok((DataType::Boolean, Sample::boolean(pools, ts, *v))),
        Json::Number(n) => {
            let v = n.as_f64().ok_or(HubError::OutOfRange)?;
            Ok((DataType::Numeric, Sample::numeric(pools, ts, v)))
        }
        Json::String(s) => Ok((DataType::String, Sample::string(pools, ts, s)?)),
        other => {
            let rendered = serde_json::to_string(other)
                .map_err(|err| HubError::FormatError(err.to_string()))?;
            Ok((DataType::Json, Sample::json(pools, ts, &rendered)?))
        }
    }
}

enum SpecStep<'a> {
    Member(&'a str),
    Element(usize),
}

struct SpecSteps<'a> {
    rest: &'a str,
}

impl<'a> SpecSteps<'a> {
    fn new(spec: &'a str) -> Self {
        Self { rest: spec }
    }
}

impl<'a> Iterator for SpecSteps<'a> {
    type Item = Result<SpecStep<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rest = self.rest.strip_prefix('.').unwrap_or(self.rest);
        if self.rest.is_empty() {
            return None;
        }
        if let Some(after) = self.rest.strip_prefix('[') {
            let Some(close) = after.find(']') else {
                self.rest = "";
                return Some(Err(HubError::BadParameter("unterminated [ in specifier")));
            };
            let index = after[..close].parse::<usize>();
            self.rest = &after[close + 1..];
            return Some(match index {
                Ok(index) => Ok(SpecStep::Element(index)),
                Err(_) => Err(HubError::BadParameter("bad array index in specifier")),
            });
        }
        let end = self
            .rest
            .find(['.', '['])
            .unwrap_or(self.rest.len());
        if end == 0 {
            self.rest = "";
            return Some(Err(HubError::BadParameter("empty member name in specifier")));
        }
        let (name, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(Ok(SpecStep::Member(name)))
    }
}
