//! MIME tree navigation: body part selection and part walking.

use mail_parser::{Message, MessagePart, MimeHeaders, PartType};
use tracing::warn;

use crate::parser::header::{decode_header_bytes, unfold_headers};
use crate::parser::transfer::decode_transfer;

/// Maximum nesting depth followed when descending multipart trees.
const MAX_DEPTH: usize = 32;

/// Picks the leaf part whose payload becomes the message body.
///
/// Returns the leaf together with the (possibly nested) message that owns it,
/// since part offsets are relative to that message's raw bytes.
pub trait BodyPartSelector: Send + Sync {
    fn select<'a>(&self, msg: &'a Message<'a>) -> Option<(&'a Message<'a>, &'a MessagePart<'a>)>;
}

/// Descends multipart containers by position, ignoring content types.
///
/// Mail clients usually order `text/plain` first and `text/html` second, so
/// position 0 yields plain text and position 1 rich content. When a container
/// has fewer children than the position, descent continues with the first
/// child from there on (single-part messages).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionalSelector {
    pub position: usize,
}

impl PositionalSelector {
    /// Always the first sub-part.
    pub const PLAIN_TEXT: Self = Self { position: 0 };
    /// The second sub-part, falling back to the first.
    pub const RICH_CONTENT: Self = Self { position: 1 };

    /// The selector a profile asks for.
    pub fn for_mode(force_to_image: bool) -> Self {
        if force_to_image {
            Self::RICH_CONTENT
        } else {
            Self::PLAIN_TEXT
        }
    }
}

impl BodyPartSelector for PositionalSelector {
    fn select<'a>(&self, msg: &'a Message<'a>) -> Option<(&'a Message<'a>, &'a MessagePart<'a>)> {
        let mut position = self.position;
        let mut owner = msg;
        let mut part = msg.parts.first()?;

        for _ in 0..MAX_DEPTH {
            match &part.body {
                PartType::Multipart(children) => {
                    if children.is_empty() {
                        return Some((owner, part));
                    }
                    if position >= children.len() {
                        warn!(
                            position,
                            children = children.len(),
                            "Sub-part missing, falling back to the first one"
                        );
                        position = 0;
                    }
                    part = owner.parts.get(children[position])?;
                }
                PartType::Message(inner) => {
                    // A wrapped message has exactly one sub-part: itself
                    position = 0;
                    let inner: &'a Message<'a> = inner;
                    owner = inner;
                    part = inner.parts.first()?;
                }
                _ => return Some((owner, part)),
            }
        }

        warn!(depth = MAX_DEPTH, "MIME tree too deep, giving up on body");
        None
    }
}

/// Transfer-decoded payload bytes of a leaf part, charset untouched.
pub fn leaf_payload(owner: &Message<'_>, part: &MessagePart<'_>) -> Vec<u8> {
    let raw: &[u8] = owner.raw_message.as_ref();
    let start = (part.offset_body as usize).min(raw.len());
    let end = (part.offset_end as usize).clamp(start, raw.len());
    decode_transfer(&raw[start..end], part.content_transfer_encoding())
}

/// Unfolded raw headers of a single part, as written on the wire.
pub fn part_headers(owner: &Message<'_>, part: &MessagePart<'_>) -> Vec<(String, String)> {
    let raw: &[u8] = owner.raw_message.as_ref();
    let start = (part.offset_header as usize).min(raw.len());
    let end = (part.offset_body as usize).clamp(start, raw.len());
    unfold_headers(&decode_header_bytes(&raw[start..end]))
}

/// Every part of the message tree in document order, descending into wrapped messages.
pub fn walk_parts<'a>(msg: &'a Message<'a>) -> Vec<(&'a Message<'a>, &'a MessagePart<'a>)> {
    let mut out = Vec::new();
    collect_parts(msg, &mut out, 0);
    out
}

fn collect_parts<'a>(
    msg: &'a Message<'a>,
    out: &mut Vec<(&'a Message<'a>, &'a MessagePart<'a>)>,
    depth: usize,
) {
    if depth > MAX_DEPTH {
        return;
    }
    for part in &msg.parts {
        out.push((msg, part));
        if let PartType::Message(inner) = &part.body {
            let inner: &'a Message<'a> = inner;
            collect_parts(inner, out, depth + 1);
        }
    }
}

/// Strip a leading mbox `From ` separator line and UTF-8 BOM, if present.
pub fn skip_from_line(data: &[u8]) -> &[u8] {
    let data = if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
        &data[3..]
    } else {
        data
    };

    if data.starts_with(b"From ") {
        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            return &data[pos + 1..];
        }
    }
    data
}
