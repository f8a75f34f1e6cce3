//! Mailbox access: the operations the pipeline needs from a mail source.

pub mod imap;

use crate::error::Result;

pub use self::imap::ImapTransport;

/// An authenticated session to one mailbox.
pub trait MailTransport {
    /// Highest sequence id currently in `folder`.
    ///
    /// Fails with [`Protocol`](crate::error::IntakeError::Protocol) when the
    /// folder cannot be selected.
    fn highest_sequence_id(&mut self, folder: &str) -> Result<u32>;

    /// Raw RFC 822 bytes of one message.
    ///
    /// Fails with [`NotFound`](crate::error::IntakeError::NotFound) when the
    /// id no longer exists.
    fn fetch_raw(&mut self, folder: &str, sequence_id: u32) -> Result<Vec<u8>>;

    /// End the session. Further calls fail.
    fn close(&mut self) -> Result<()>;
}
