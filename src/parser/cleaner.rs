//! Body cleanup: inline-image tokens, quoted-reply tails, blank lines, substitutions.

use std::sync::LazyLock;

use regex::Regex;

use crate::profile::SourceProfile;

/// Literal markers that start a quoted original message.
const QUOTE_MARKERS: &[&str] = &["*From:*", "From: "];

static CID_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[cid:[^\]]*\]").expect("static regex"));

/// Clean a decoded body according to the profile.
pub fn clean_body(body: &str, profile: &SourceProfile) -> String {
    let normalized = normalize_line_endings(body);
    let mut attachment_no = 0usize;
    let mut lines: Vec<String> = Vec::new();

    for line in normalized.split('\n') {
        let line = CID_TOKEN.replace_all(line, |_: &regex::Captures<'_>| {
            attachment_no += 1;
            format!("[Attachment {attachment_no}]")
        });

        if profile
            .reply_marker
            .as_ref()
            .is_some_and(|marker| marker.is_match(&line))
            || QUOTE_MARKERS.iter().any(|m| line.contains(m))
        {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }
        lines.push(line.into_owned());
    }

    let mut text = lines.join("\n");
    for (pattern, substr) in &profile.replacements {
        text = pattern.replace_all(&text, substr.as_str()).into_owned();
    }
    text
}

/// `\r\n` and lone `\r` become `\n`.
fn normalize_line_endings(body: &str) -> String {
    body.replace("\r\n", "\n").replace('\r', "\n")
}
