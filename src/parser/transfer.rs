//! Content-Transfer-Encoding decoders for bodies and encoded-words.

use std::io::Read;

/// Undo a part's `Content-Transfer-Encoding`, yielding the payload bytes.
///
/// Unknown encodings (`7bit`, `8bit`, `binary`, …) pass through unchanged.
pub fn decode_transfer(body: &[u8], encoding: Option<&str>) -> Vec<u8> {
    match encoding.map(|e| e.trim().to_ascii_lowercase()).as_deref() {
        Some("base64") => base64_decode(body),
        Some("quoted-printable") => decode_quoted_printable(body),
        _ => body.to_vec(),
    }
}

/// Lenient base64 decode: whitespace is skipped and missing padding is assumed.
pub fn base64_decode(input: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(input.len() / 4 * 3);
    // The reader never produces an I/O error
    let _ = Base64Reader::new(input).read_to_end(&mut buf);
    buf
}

struct Base64Reader<'a> {
    input: &'a [u8],
    pos: usize,
    buf: [u8; 3],
    buf_len: usize,
    buf_pos: usize,
}

impl<'a> Base64Reader<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            buf: [0; 3],
            buf_len: 0,
            buf_pos: 0,
        }
    }
}

impl Read for Base64Reader<'_> {
    fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
        let mut written = 0;
        while written < out.len() {
            if self.buf_pos < self.buf_len {
                out[written] = self.buf[self.buf_pos];
                self.buf_pos += 1;
                written += 1;
                continue;
            }
            // Decode next 4-char block
            let mut quad = [0u8; 4];
            let mut qi = 0;
            while qi < 4 {
                if self.pos >= self.input.len() {
                    if qi == 0 {
                        return Ok(written);
                    }
                    while qi < 4 {
                        quad[qi] = b'=';
                        qi += 1;
                    }
                    break;
                }
                let b = self.input[self.pos];
                self.pos += 1;
                if b.is_ascii_whitespace() {
                    continue;
                }
                quad[qi] = b;
                qi += 1;
            }
            let vals: [u8; 4] = quad.map(b64val);
            self.buf[0] = (vals[0] << 2) | (vals[1] >> 4);
            self.buf[1] = (vals[1] << 4) | (vals[2] >> 2);
            self.buf[2] = (vals[2] << 6) | vals[3];
            self.buf_len = if quad[3] == b'=' {
                if quad[2] == b'=' {
                    1
                } else {
                    2
                }
            } else {
                3
            };
            self.buf_pos = 0;
        }
        Ok(written)
    }
}

fn b64val(c: u8) -> u8 {
    match c {
        b'A'..=b'Z' => c - b'A',
        b'a'..=b'z' => c - b'a' + 26,
        b'0'..=b'9' => c - b'0' + 52,
        b'+' => 62,
        b'/' => 63,
        _ => 0,
    }
}

/// Decode Q-encoding (RFC 2047): underscores → spaces, `=XX` → byte.
pub fn decode_q_encoding(input: &str) -> Vec<u8> {
    let mut result = Vec::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' => {
                match hex_pair(bytes.get(i + 1..i + 3)) {
                    Some(byte) => {
                        result.push(byte);
                        i += 3;
                    }
                    None => {
                        result.push(b'=');
                        i += 1;
                    }
                }
            }
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    result
}

/// Decode a quoted-printable body (RFC 2045 §6.7), honoring soft line breaks.
pub fn decode_quoted_printable(input: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] != b'=' {
            result.push(input[i]);
            i += 1;
            continue;
        }
        // Soft line break: "=\r\n" or "=\n"
        if input.get(i + 1) == Some(&b'\r') && input.get(i + 2) == Some(&b'\n') {
            i += 3;
        } else if input.get(i + 1) == Some(&b'\n') {
            i += 2;
        } else if let Some(byte) = hex_pair(input.get(i + 1..i + 3)) {
            result.push(byte);
            i += 3;
        } else {
            result.push(b'=');
            i += 1;
        }
    }
    result
}

fn hex_pair(pair: Option<&[u8]>) -> Option<u8> {
    let pair = pair?;
    let text = std::str::from_utf8(pair).ok()?;
    u8::from_str_radix(text, 16).ok()
}
