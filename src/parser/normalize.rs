//! The message normalizer: raw MIME bytes to [`MailRecord`].

use mail_parser::MessageParser;
use tracing::{debug, warn};

use crate::error::{IntakeError, Result};
use crate::model::record::MailRecord;
use crate::parser::charset::{decode_bytes, ChardetDetector, CharsetDetector};
use crate::parser::cleaner::clean_body;
use crate::parser::header::{
    decode_encoded_words, decode_header_detected, get_header, normalize_date, parse_header_block,
};
use crate::parser::mime::{leaf_payload, skip_from_line, BodyPartSelector, PositionalSelector};
use crate::profile::SourceProfile;

/// Turns raw message bytes into records, using pluggable charset detection
/// and body-part selection.
pub struct Normalizer {
    detector: Box<dyn CharsetDetector>,
    selector: Box<dyn BodyPartSelector>,
}

impl Normalizer {
    pub fn new(detector: Box<dyn CharsetDetector>, selector: Box<dyn BodyPartSelector>) -> Self {
        Self { detector, selector }
    }

    /// Statistical detection plus the positional selector the profile asks for.
    pub fn for_profile(profile: &SourceProfile) -> Self {
        Self::new(
            Box::new(ChardetDetector),
            Box::new(PositionalSelector::for_mode(profile.force_to_image)),
        )
    }

    /// Normalize one message.
    ///
    /// Fails with [`IntakeError::UnparsableDate`] when the `Date:` header is
    /// missing or matches no accepted format, and with [`IntakeError::Decode`]
    /// when the body cannot be decoded. A subject that cannot be decoded
    /// becomes empty instead.
    pub fn normalize(
        &self,
        raw: &[u8],
        folder: &str,
        sequence_id: u32,
        profile: &SourceProfile,
    ) -> Result<MailRecord> {
        let raw = skip_from_line(raw);
        let headers = parse_header_block(raw);

        let date = match get_header(&headers, "date") {
            Some(value) => normalize_date(value)?,
            None => return Err(IntakeError::UnparsableDate(String::new())),
        };

        let subject = match decode_header_detected(
            get_header(&headers, "subject").unwrap_or_default(),
            self.detector.as_ref(),
        ) {
            Ok(subject) => subject.trim().to_string(),
            Err(e) => {
                debug!(sequence_id, error = %e, "Subject could not be decoded, leaving it empty");
                String::new()
            }
        };

        let sender = decode_encoded_words(get_header(&headers, "from").unwrap_or_default());
        let receiver =
            decode_encoded_words(get_header(&headers, "to").unwrap_or_default()).to_lowercase();
        debug!(sequence_id, %sender, %receiver, "Parsed addresses");

        let body = self.extract_body(raw, sequence_id)?;

        Ok(MailRecord {
            id: MailRecord::compose_id(folder, sequence_id),
            date,
            body: clean_body(&body, profile),
            subject,
            sender,
            receiver,
            folder: folder.to_string(),
            is_sent: false,
            converted_to_image: false,
            attachments: Vec::new(),
        })
    }

    fn extract_body(&self, raw: &[u8], sequence_id: u32) -> Result<String> {
        let message = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| IntakeError::Decode(format!("message {sequence_id} is not MIME")))?;

        let Some((owner, part)) = self.selector.select(&message) else {
            warn!(sequence_id, "No body part found");
            return Ok(String::new());
        };

        let payload = leaf_payload(owner, part);
        if payload.is_empty() {
            return Ok(String::new());
        }
        decode_bytes(&payload, self.detector.as_ref()).inspect_err(|e| {
            warn!(sequence_id, error = %e, "Body could not be decoded");
        })
    }
}
