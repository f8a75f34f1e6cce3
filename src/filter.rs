//! Acceptance rules applied to every normalized record before it is stored.

use std::fmt;

use tracing::debug;

use crate::error::Result;
use crate::model::record::MailRecord;
use crate::profile::SourceProfile;
use crate::store::{field_filter, DocumentStore, MAIL_COLLECTION};

/// Why a record was left out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RejectReason {
    /// The receiver does not match the profile's receiver pattern.
    Receiver,
    /// The subject is empty.
    MissingSubject,
    /// The subject matches a restricted pattern.
    RestrictedSubject,
    /// A reply or forward while only first mails are wanted.
    Reply,
    /// Already persisted.
    Duplicate,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Receiver => "receiver",
            Self::MissingSubject => "missing_subject",
            Self::RestrictedSubject => "restricted_subject",
            Self::Reply => "reply",
            Self::Duplicate => "duplicate",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the filter chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(RejectReason),
}

/// Run the rules in order, stopping at the first that fails.
///
/// The store is consulted only by the last rule, so rejected records never
/// cost a lookup.
pub fn check(
    record: &MailRecord,
    profile: &SourceProfile,
    store: &dyn DocumentStore,
) -> Result<Verdict> {
    if let Some(reason) = check_content(record, profile) {
        debug!(id = %record.id, %reason, "Rejected");
        return Ok(Verdict::Reject(reason));
    }

    if store.count(MAIL_COLLECTION, &field_filter("id", record.id.as_str()))? > 0 {
        debug!(id = %record.id, "Rejected, already stored");
        return Ok(Verdict::Reject(RejectReason::Duplicate));
    }
    Ok(Verdict::Accept)
}

/// The rules that need nothing but the record itself.
pub fn check_content(record: &MailRecord, profile: &SourceProfile) -> Option<RejectReason> {
    if !profile.receiver_regex.is_match(&record.receiver) {
        return Some(RejectReason::Receiver);
    }
    if record.subject.trim().is_empty() {
        return Some(RejectReason::MissingSubject);
    }

    let subject = record.subject.to_lowercase();
    if profile.restricted_subjects.iter().any(|r| r.is_match(&subject)) {
        return Some(RejectReason::RestrictedSubject);
    }
    if profile.first_mail_only && profile.reply_markers.iter().any(|m| subject.contains(m.as_str())) {
        return Some(RejectReason::Reply);
    }
    None
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use regex::Regex;

    use super::*;
    use crate::profile::tests::test_profile;
    use crate::store::tests::CountingStore;
    use crate::store::Document;

    fn record(subject: &str, receiver: &str) -> MailRecord {
        MailRecord {
            id: "INBOX5".into(),
            date: "2023-01-02 10:00:00".into(),
            body: "b".into(),
            subject: subject.into(),
            sender: "a@example.com".into(),
            receiver: receiver.into(),
            folder: "INBOX".into(),
            is_sent: false,
            converted_to_image: false,
            attachments: Vec::new(),
        }
    }

    #[test]
    fn test_empty_subject_rejected_before_lookup() {
        let store = CountingStore::default();
        let verdict = check(&record("", "x@example.com"), &test_profile(), &store).unwrap();
        assert_eq!(verdict, Verdict::Reject(RejectReason::MissingSubject));
        assert_eq!(store.counts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_receiver_checked_first() {
        let mut p = test_profile();
        p.receiver_regex = Regex::new("support@").unwrap();
        let store = CountingStore::default();
        let verdict = check(&record("", "sales@example.com"), &p, &store).unwrap();
        assert_eq!(verdict, Verdict::Reject(RejectReason::Receiver));
    }

    #[test]
    fn test_restricted_subject_is_case_folded() {
        let mut p = test_profile();
        p.restricted_subjects = vec![Regex::new("^undeliverable").unwrap()];
        assert_eq!(
            check_content(&record("UNDELIVERABLE: hello", ""), &p),
            Some(RejectReason::RestrictedSubject)
        );
        assert_eq!(check_content(&record("Deliverable", ""), &p), None);
    }

    #[test]
    fn test_first_mail_only() {
        let mut p = test_profile();
        assert_eq!(check_content(&record("Re: invoice", ""), &p), None);
        p.first_mail_only = true;
        assert_eq!(
            check_content(&record("Re: invoice", ""), &p),
            Some(RejectReason::Reply)
        );
        assert_eq!(
            check_content(&record("FWD: invoice", ""), &p),
            Some(RejectReason::Reply)
        );
        assert_eq!(check_content(&record("Invoice", ""), &p), None);
    }

    #[test]
    fn test_duplicate_detected_by_id() {
        let store = CountingStore::default();
        let rec = record("Hello", "x@example.com");
        assert_eq!(check(&rec, &test_profile(), &store).unwrap(), Verdict::Accept);

        let doc: Document = rec.to_document(&Document::new()).unwrap();
        store.insert_one(MAIL_COLLECTION, &doc).unwrap();
        assert_eq!(
            check(&rec, &test_profile(), &store).unwrap(),
            Verdict::Reject(RejectReason::Duplicate)
        );
        assert_eq!(store.counts.load(Ordering::SeqCst), 2);
    }
}
