//! Charset detection and strict byte-to-text decoding.

use encoding_rs::Encoding;
use tracing::{debug, warn};

use crate::error::{IntakeError, Result};

/// Below this detector confidence, bytes are assumed to be UTF-8.
///
/// Tunable.
pub const MIN_DETECTION_CONFIDENCE: f32 = 0.5;

/// Outcome of statistical charset detection.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Charset label (WHATWG or IANA name). Empty when nothing was detected.
    pub encoding: String,
    /// Detector confidence in `0.0..=1.0`.
    pub confidence: f32,
}

/// Pluggable charset detection.
pub trait CharsetDetector: Send + Sync {
    fn detect(&self, bytes: &[u8]) -> Detection;
}

/// Statistical detection backed by the `chardet` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChardetDetector;

impl CharsetDetector for ChardetDetector {
    fn detect(&self, bytes: &[u8]) -> Detection {
        let (charset, confidence, _language) = chardet::detect(&bytes.to_vec());
        Detection {
            encoding: chardet::charset2encoding(&charset).to_string(),
            confidence,
        }
    }
}

/// Decode `bytes` to text using the detector's verdict.
///
/// Low-confidence detections fall back to UTF-8. Decoding is strict: any
/// malformed sequence is a [`IntakeError::Decode`]. Text that still carries
/// literal `\u` escapes is unescaped once more (double-encoded payloads).
pub fn decode_bytes(bytes: &[u8], detector: &dyn CharsetDetector) -> Result<String> {
    let detection = detector.detect(bytes);
    let encoding = if detection.confidence < MIN_DETECTION_CONFIDENCE {
        encoding_rs::UTF_8
    } else {
        Encoding::for_label(detection.encoding.as_bytes()).ok_or_else(|| {
            IntakeError::Decode(format!("unsupported charset '{}'", detection.encoding))
        })?
    };
    debug!(
        charset = encoding.name(),
        confidence = detection.confidence,
        "Decoding payload"
    );

    let text = encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .ok_or_else(|| {
            warn!(
                charset = encoding.name(),
                confidence = detection.confidence,
                "Payload is not valid in the detected charset"
            );
            IntakeError::Decode(format!("malformed {} payload", encoding.name()))
        })?
        .into_owned();

    if text.contains("\\u") {
        return unescape_unicode(&text);
    }
    Ok(text)
}

/// Interpret backslash escapes (`\uXXXX`, `\UXXXXXXXX`, `\xHH`, `\n`, `\t`, …).
///
/// Unknown escapes are kept verbatim. Surrogate pairs written as two `\u`
/// escapes are combined. A truncated or invalid code point is a decode error.
pub fn unescape_unicode(text: &str) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(kind) = chars.next() else {
            out.push('\\');
            break;
        };
        match kind {
            'u' => {
                let high = read_hex(&mut chars, 4)?;
                let code = if (0xD800..0xDC00).contains(&high) {
                    let mut lookahead = chars.clone();
                    if lookahead.next() == Some('\\') && lookahead.next() == Some('u') {
                        let low = read_hex(&mut lookahead, 4)?;
                        if (0xDC00..0xE000).contains(&low) {
                            chars = lookahead;
                            0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00)
                        } else {
                            high
                        }
                    } else {
                        high
                    }
                } else {
                    high
                };
                out.push(code_point(code)?);
            }
            'U' => out.push(code_point(read_hex(&mut chars, 8)?)?),
            'x' => out.push(code_point(read_hex(&mut chars, 2)?)?),
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

fn read_hex<I: Iterator<Item = char>>(chars: &mut I, digits: usize) -> Result<u32> {
    let hex: String = chars.take(digits).collect();
    if hex.len() != digits {
        return Err(IntakeError::Decode(format!("truncated escape '\\{hex}'")));
    }
    u32::from_str_radix(&hex, 16)
        .map_err(|_| IntakeError::Decode(format!("invalid escape digits '{hex}'")))
}

fn code_point(code: u32) -> Result<char> {
    char::from_u32(code)
        .ok_or_else(|| IntakeError::Decode(format!("invalid code point U+{code:04X}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str, f32);

    impl CharsetDetector for Fixed {
        fn detect(&self, _bytes: &[u8]) -> Detection {
            Detection {
                encoding: self.0.to_string(),
                confidence: self.1,
            }
        }
    }

    #[test]
    fn test_decode_detected_charset() {
        // "Привет" in windows-1251
        let bytes: [u8; 6] = [0xCF, 0xF0, 0xE8, 0xE2, 0xE5, 0xF2];
        assert_eq!(
            decode_bytes(&bytes, &Fixed("windows-1251", 0.9)).unwrap(),
            "Привет"
        );
    }

    #[test]
    fn test_low_confidence_falls_back_to_utf8() {
        let bytes = "café".as_bytes();
        assert_eq!(decode_bytes(bytes, &Fixed("koi8-r", 0.2)).unwrap(), "café");
    }

    #[test]
    fn test_malformed_utf8_is_decode_error() {
        let err = decode_bytes(&[0x66, 0xFF, 0x6F], &Fixed("utf-8", 0.1)).unwrap_err();
        assert!(matches!(err, IntakeError::Decode(_)));
    }

    #[test]
    fn test_unknown_label_is_decode_error() {
        let err = decode_bytes(b"abc", &Fixed("x-made-up", 0.99)).unwrap_err();
        assert!(matches!(err, IntakeError::Decode(_)));
    }

    #[test]
    fn test_double_encoded_payload() {
        let bytes = br"\u041f\u0440\u0438\u0432\u0435\u0442, world";
        assert_eq!(
            decode_bytes(bytes, &Fixed("ascii", 0.99)).unwrap(),
            "Привет, world"
        );
    }

    #[test]
    fn test_unescape_surrogate_pair() {
        assert_eq!(unescape_unicode(r"smile \ud83d\ude00").unwrap(), "smile 😀");
    }

    #[test]
    fn test_unescape_keeps_unknown_and_non_ascii() {
        assert_eq!(unescape_unicode(r"C:\path é \u0041").unwrap(), r"C:\path é A");
    }

    #[test]
    fn test_unescape_truncated_is_error() {
        assert!(unescape_unicode(r"bad \u12").is_err());
    }

    #[test]
    fn test_chardet_detects_utf8() {
        let text = "Здравствуйте, это письмо написано в кодировке UTF-8 целиком.";
        let detection = ChardetDetector.detect(text.as_bytes());
        let decoded = decode_bytes(text.as_bytes(), &ChardetDetector).unwrap();
        assert_eq!(decoded, text, "detected {detection:?}");
    }
}
