//! RFC 5322 header parsing: folding, encoded-words (RFC 2047), and date normalization.

use chrono::{DateTime, NaiveDateTime};
use tracing::{debug, warn};

use crate::error::{IntakeError, Result};
use crate::parser::charset::{decode_bytes, CharsetDetector};
use crate::parser::transfer::{base64_decode, decode_q_encoding};

/// Output format of normalized dates.
pub const DATE_OUTPUT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Accepted `Date:` layouts, tried in order; the first that parses wins.
///
/// Each entry truncates the header to the given number of characters first
/// (`None` = whole header). The truncation drops a trailing `(UTC)`-style
/// zone comment. Order and lengths are tunable, not load-bearing.
pub const DATE_FORMATS: &[(Option<usize>, &str)] = &[
    (None, "%d %b %Y %H:%M:%S %z"),
    (Some(25), "%a, %d %b %Y %H:%M:%S"),
    (Some(30), "%a, %d %b %Y %H:%M:%S %z"),
    (Some(31), "%a, %d %b %Y %H:%M:%S %z"),
];

/// Find the byte offset where headers end (position of the first blank line).
pub fn find_header_end(data: &[u8]) -> Option<usize> {
    for i in 0..data.len().saturating_sub(1) {
        if data[i] == b'\n' && data[i + 1] == b'\n' {
            return Some(i);
        }
        if i + 3 < data.len()
            && data[i] == b'\r'
            && data[i + 1] == b'\n'
            && data[i + 2] == b'\r'
            && data[i + 3] == b'\n'
        {
            return Some(i);
        }
    }
    None
}

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
pub fn decode_header_bytes(bytes: &[u8]) -> String {
    let bytes = if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        &bytes[3..]
    } else {
        bytes
    };

    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Unfold headers: join continuation lines (starting with space or tab) with the previous header.
///
/// Returns a list of `(lowercase_name, raw_value)` pairs.
pub fn unfold_headers(text: &str) -> Vec<(String, String)> {
    let mut result: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = result.last_mut() {
                last.1.push(' ');
                last.1.push_str(line.trim());
            }
        } else if let Some(colon_pos) = line.find(':') {
            let name = line[..colon_pos].trim().to_lowercase();
            let value = line[colon_pos + 1..].trim().to_string();
            result.push((name, value));
        }
    }

    result
}

/// Split a raw message into its unfolded header list.
pub fn parse_header_block(raw: &[u8]) -> Vec<(String, String)> {
    let end = find_header_end(raw).unwrap_or(raw.len());
    unfold_headers(&decode_header_bytes(&raw[..end]))
}

/// Get the first value for a header name (case-insensitive).
pub fn get_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

/// Normalize a `Date:` header using [`DATE_FORMATS`].
///
/// The result keeps the wall-clock time written in the header.
pub fn normalize_date(raw: &str) -> Result<String> {
    for (len, fmt) in DATE_FORMATS {
        let candidate = match len {
            Some(n) => truncate_chars(raw, *n),
            None => raw,
        };
        if let Some(normalized) = try_date_format(candidate, fmt) {
            debug!(date = %normalized, format = fmt, "Parsed date header");
            return Ok(normalized);
        }
    }
    warn!(date = raw, "Date matches none of the accepted formats");
    Err(IntakeError::UnparsableDate(raw.to_string()))
}

const WEEKDAYS: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

/// Parse `candidate` with `fmt`. A leading `%a, ` must name some weekday but
/// is not checked against the date.
fn try_date_format(candidate: &str, fmt: &str) -> Option<String> {
    let (candidate, fmt) = match fmt.strip_prefix("%a, ") {
        Some(rest_fmt) => {
            let (day, rest) = candidate.split_once(", ")?;
            if !WEEKDAYS.iter().any(|d| day.trim().eq_ignore_ascii_case(d)) {
                return None;
            }
            (rest, rest_fmt)
        }
        None => (candidate, fmt),
    };

    if fmt.contains("%z") {
        DateTime::parse_from_str(candidate, fmt)
            .ok()
            .map(|dt| dt.format(DATE_OUTPUT_FORMAT).to_string())
    } else {
        NaiveDateTime::parse_from_str(candidate, fmt)
            .ok()
            .map(|dt| dt.format(DATE_OUTPUT_FORMAT).to_string())
    }
}

/// First `n` characters of `s` (all of it when shorter).
fn truncate_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Decode a header value, running every run of encoded-words through charset detection.
///
/// Adjacent encoded-words are joined at the byte level before decoding, so a
/// multi-byte character split across two words survives. Plain segments pass
/// through unchanged.
pub fn decode_header_detected(input: &str, detector: &dyn CharsetDetector) -> Result<String> {
    let mut result = String::with_capacity(input.len());
    let mut pending: Vec<u8> = Vec::new();
    let mut remaining = input;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        let after_start = &remaining[start + 2..];

        match try_decode_word_bytes(after_start) {
            Some(word) => {
                // Whitespace between two encoded words is not part of the text (RFC 2047 §6.2)
                if !(before.trim().is_empty() && !pending.is_empty()) {
                    flush_pending(&mut result, &mut pending, detector)?;
                    result.push_str(before);
                }
                pending.extend_from_slice(&word.bytes);
                remaining = &remaining[start + 2 + word.consumed..];
            }
            None => {
                flush_pending(&mut result, &mut pending, detector)?;
                result.push_str(before);
                result.push_str("=?");
                remaining = after_start;
            }
        }
    }

    flush_pending(&mut result, &mut pending, detector)?;
    result.push_str(remaining);
    Ok(result)
}

fn flush_pending(
    out: &mut String,
    pending: &mut Vec<u8>,
    detector: &dyn CharsetDetector,
) -> Result<()> {
    if !pending.is_empty() {
        out.push_str(&decode_bytes(pending, detector)?);
        pending.clear();
    }
    Ok(())
}

/// Decode RFC 2047 encoded-words using their declared charsets.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
///
/// If decoding fails for any token, the original text is preserved.
pub fn decode_encoded_words(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut remaining = input;
    let mut last_was_encoded = false;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        if !last_was_encoded || !before.trim().is_empty() {
            result.push_str(before);
        }

        let after_start = &remaining[start + 2..];

        if let Some(word) = try_decode_word_bytes(after_start) {
            result.push_str(&decode_charset(&word.charset, &word.bytes));
            remaining = &remaining[start + 2 + word.consumed..];
            last_was_encoded = true;
        } else {
            result.push_str("=?");
            remaining = after_start;
            last_was_encoded = false;
        }
    }

    result.push_str(remaining);
    result
}

struct EncodedWord {
    charset: String,
    bytes: Vec<u8>,
    consumed: usize, // bytes consumed from the string *after* the initial "=?"
}

fn try_decode_word_bytes(s: &str) -> Option<EncodedWord> {
    // Format: charset?encoding?encoded_text?=
    let first_q = s.find('?')?;
    let charset = &s[..first_q];
    if charset.is_empty() || charset.contains(char::is_whitespace) {
        return None;
    }

    let rest = &s[first_q + 1..];
    let second_q = rest.find('?')?;
    let encoding = &rest[..second_q];

    let rest2 = &rest[second_q + 1..];
    let end = rest2.find("?=")?;
    let encoded_text = &rest2[..end];

    let consumed = first_q + 1 + second_q + 1 + end + 2;

    let bytes = match encoding.to_uppercase().as_str() {
        "B" => base64_decode(encoded_text.as_bytes()),
        "Q" => decode_q_encoding(encoded_text),
        _ => return None,
    };

    Some(EncodedWord {
        charset: charset.to_string(),
        bytes,
        consumed,
    })
}

/// Decode bytes using a named charset.
fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    // RFC 2231 language suffix: "utf-8*en"
    let charset = charset.split('*').next().unwrap_or(charset);
    match charset.to_lowercase().as_str() {
        "utf-8" | "utf8" => String::from_utf8_lossy(bytes).into_owned(),
        _ => {
            if let Some(encoding) = encoding_rs::Encoding::for_label(charset.as_bytes()) {
                let (decoded, _, _) = encoding.decode(bytes);
                decoded.into_owned()
            } else {
                warn!(charset, "Unknown charset, falling back to UTF-8 lossy");
                String::from_utf8_lossy(bytes).into_owned()
            }
        }
    }
}
