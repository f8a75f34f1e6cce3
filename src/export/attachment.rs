//! Materialize named MIME parts into the attachment directory.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use mail_parser::{MessageParser, MimeHeaders, PartType};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, warn};

use crate::model::attachment::Attachment;
use crate::model::record::MailRecord;
use crate::parser::header::get_header;
use crate::parser::mime::{leaf_payload, part_headers, skip_from_line, walk_parts};

/// Filenames still carrying this marker were not decodable; such parts are skipped.
const ENCODED_WORD_MARKER: &str = "=?utf-8?";

/// Length of the random prefix added on filename collisions.
const COLLISION_TOKEN_LEN: usize = 10;

/// Longest sanitized filename written to disk, in characters.
const MAX_FILENAME_LEN: usize = 150;

/// Write every named part of `raw` into `dir` and list the paths in `record.attachments`.
///
/// Multipart containers, parts without `Content-Disposition`, parts without a
/// filename and filenames still holding an encoded-word are skipped. Write
/// failures drop that single attachment.
pub fn extract_attachments(raw: &[u8], record: &mut MailRecord, dir: &Path) -> Vec<Attachment> {
    let Some(message) = MessageParser::default().parse(skip_from_line(raw)) else {
        return Vec::new();
    };
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!(path = %dir.display(), error = %e, "Cannot create attachment directory");
        return Vec::new();
    }

    let mut extracted = Vec::new();
    for (owner, part) in walk_parts(&message) {
        if matches!(part.body, PartType::Multipart(_)) {
            continue;
        }
        let headers = part_headers(owner, part);
        let Some(disposition) = get_header(&headers, "content-disposition") else {
            continue;
        };
        let raw_name = header_param(disposition, "filename")
            .or_else(|| get_header(&headers, "content-type").and_then(|ct| header_param(ct, "name")));
        if raw_name
            .as_deref()
            .is_some_and(|n| n.to_lowercase().contains(ENCODED_WORD_MARKER))
        {
            debug!(id = %record.id, "Skipping attachment with undecoded filename");
            continue;
        }
        let Some(name) = part.attachment_name().map(str::to_string).or(raw_name) else {
            continue;
        };

        let data = leaf_payload(owner, part);
        match write_unique(dir, &name, &data) {
            Ok(path) => {
                debug!(path = %path.display(), size = data.len(), "Saved attachment");
                extracted.push(Attachment {
                    path,
                    original_name: Some(name),
                    message_id: record.id.clone(),
                });
            }
            Err(e) => {
                warn!(filename = %name, error = %e, "Failed to save attachment");
            }
        }
    }

    record.attachments = extracted
        .iter()
        .map(|a| a.path.to_string_lossy().into_owned())
        .collect();
    extracted
}

/// Write `data` under a sanitized `name`, prefixing a random token when the name is taken.
fn write_unique(dir: &Path, name: &str, data: &[u8]) -> std::io::Result<PathBuf> {
    let filename = sanitize_filename_part(name, MAX_FILENAME_LEN);
    let path = dir.join(&filename);
    match create_new(&path, data) {
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let renamed = dir.join(format!("{}_{filename}", random_token(COLLISION_TOKEN_LEN)));
            debug!(from = %path.display(), to = %renamed.display(), "Attachment name taken");
            create_new(&renamed, data).map(|()| renamed)
        }
        other => other.map(|()| path),
    }
}

fn create_new(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(data)
}

pub(crate) fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// Value of a `; name=value` parameter in a structured header, unquoted.
fn header_param(value: &str, name: &str) -> Option<String> {
    value.split(';').skip(1).find_map(|param| {
        let (key, val) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case(name) {
            return None;
        }
        let val = val.trim().trim_matches('"');
        (!val.is_empty()).then(|| val.to_string())
    })
}

/// Sanitize a string for use as a single filename component.
///
/// Replaces any character that is not alphanumeric, `-`, `.`, `_`, or `@` with `_`.
/// Truncates to `max_len` characters. Leading dots are replaced too.
pub fn sanitize_filename_part(s: &str, max_len: usize) -> String {
    let sanitized: String = s
        .chars()
        .enumerate()
        .map(|(i, c)| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '@' || (c == '.' && i > 0) {
                c
            } else {
                '_'
            }
        })
        .take(max_len)
        .collect();

    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record() -> MailRecord {
        MailRecord {
            id: "INBOX1".into(),
            date: "2023-01-02 10:00:00".into(),
            body: String::new(),
            subject: "s".into(),
            sender: String::new(),
            receiver: String::new(),
            folder: "INBOX".into(),
            is_sent: false,
            converted_to_image: false,
            attachments: Vec::new(),
        }
    }

    const WITH_PARTS: &[u8] = b"Date: 02 Jan 2023 10:00:00 +0000\r\n\
Subject: files\r\n\
Content-Type: multipart/mixed; boundary=\"m\"\r\n\
\r\n\
--m\r\n\
Content-Type: text/plain\r\n\
\r\n\
see attached\r\n\
--m\r\n\
Content-Type: application/pdf; name=\"report.pdf\"\r\n\
Content-Disposition: attachment; filename=\"report.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQ=\r\n\
--m\r\n\
Content-Type: application/octet-stream\r\n\
Content-Disposition: attachment; filename=\"=?utf-8?B?0YTQsNC50Ls=?=\"\r\n\
\r\n\
skipped\r\n\
--m\r\n\
Content-Type: image/png; name=\"inline.png\"\r\n\
\r\n\
no disposition\r\n\
--m--\r\n";

    #[test]
    fn test_extracts_named_parts_only() {
        let dir = TempDir::new().unwrap();
        let mut rec = record();
        let saved = extract_attachments(WITH_PARTS, &mut rec, dir.path());

        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].path, dir.path().join("report.pdf"));
        assert_eq!(saved[0].message_id, "INBOX1");
        assert_eq!(std::fs::read(&saved[0].path).unwrap(), b"%PDF-1.4");
        assert_eq!(rec.attachments, vec![saved[0].path.to_string_lossy().to_string()]);
    }

    #[test]
    fn test_collision_keeps_both_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("report.pdf"), b"earlier").unwrap();

        let mut rec = record();
        let saved = extract_attachments(WITH_PARTS, &mut rec, dir.path());
        assert_eq!(saved.len(), 1);

        let renamed = &saved[0].path;
        let name = renamed.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with("_report.pdf"), "{name}");
        assert_eq!(name.len(), COLLISION_TOKEN_LEN + "_report.pdf".len());
        assert_eq!(std::fs::read(dir.path().join("report.pdf")).unwrap(), b"earlier");
        assert_eq!(std::fs::read(renamed).unwrap(), b"%PDF-1.4");
    }

    #[test]
    fn test_unwritable_dir_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let mut rec = record();
        let saved = extract_attachments(WITH_PARTS, &mut rec, &blocker.join("sub"));
        assert!(saved.is_empty());
        assert!(rec.attachments.is_empty());
    }

    #[test]
    fn test_header_param() {
        let cd = "attachment; filename=\"a b.txt\"; size=3";
        assert_eq!(header_param(cd, "filename").as_deref(), Some("a b.txt"));
        assert_eq!(header_param(cd, "name"), None);
        assert_eq!(header_param("inline", "filename"), None);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename_part("hello world.txt", 40), "hello_world.txt");
        assert_eq!(sanitize_filename_part("../../etc/passwd", 40), "_._.._etc_passwd");
        assert_eq!(sanitize_filename_part("", 10), "unknown");
        assert_eq!(sanitize_filename_part("abcdefghij", 5), "abcde");
    }

    #[test]
    fn test_random_token_shape() {
        let token = random_token(10);
        assert_eq!(token.len(), 10);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }
}
