//! IMAP over TLS.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use native_tls::{TlsConnector, TlsStream};
use tracing::{debug, info, warn};

use super::MailTransport;
use crate::error::{IntakeError, Result};
use crate::profile::SourceProfile;

type TlsSession = imap::Session<TlsStream<TcpStream>>;

/// Connect timeout used when the profile sets no socket timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A logged-in IMAP session.
pub struct ImapTransport {
    session: Option<TlsSession>,
    /// Folder currently selected and its message count.
    selected: Option<(String, u32)>,
    host: String,
}

impl ImapTransport {
    /// Connect, negotiate TLS and log in with the profile's credentials.
    ///
    /// Bad credentials are [`IntakeError::Auth`]; anything else that goes
    /// wrong before login is [`IntakeError::Connection`].
    pub fn open(profile: &SourceProfile) -> Result<Self> {
        let host = profile.imap_host.as_str();
        let tcp = connect_tcp(host, profile.imap_port, profile.io_timeout)?;

        let tls = TlsConnector::builder()
            .build()
            .map_err(|e| IntakeError::Connection(format!("TLS connector build failed: {e}")))?;
        let stream = tls
            .connect(host, tcp)
            .map_err(|e| IntakeError::Connection(format!("TLS handshake with {host} failed: {e}")))?;

        let mut client = imap::Client::new(stream);
        client
            .read_greeting()
            .map_err(|e| IntakeError::Connection(format!("no greeting from {host}: {e}")))?;

        let session = client
            .login(&profile.login, &profile.password)
            .map_err(|(e, _client)| match e {
                imap::error::Error::No(_) | imap::error::Error::Bad(_) => IntakeError::Auth {
                    login: profile.login.clone(),
                    reason: e.to_string(),
                },
                other => IntakeError::Connection(format!("login to {host} failed: {other}")),
            })?;

        info!(host, login = %profile.login, "IMAP session opened");
        Ok(Self {
            session: Some(session),
            selected: None,
            host: host.to_string(),
        })
    }

    fn session(&mut self) -> Result<&mut TlsSession> {
        self.session
            .as_mut()
            .ok_or_else(|| IntakeError::Connection("session already closed".into()))
    }

    /// Select `folder`, reusing the current selection.
    fn select(&mut self, folder: &str) -> Result<u32> {
        if let Some((name, exists)) = &self.selected {
            if name == folder {
                return Ok(*exists);
            }
        }
        let mailbox = self.session()?.select(folder).map_err(|e| match e {
            imap::error::Error::No(_) | imap::error::Error::Bad(_) => {
                IntakeError::Protocol(format!("SELECT {folder} refused: {e}"))
            }
            other => IntakeError::from(other),
        })?;
        debug!(folder, exists = mailbox.exists, "Folder selected");
        self.selected = Some((folder.to_string(), mailbox.exists));
        Ok(mailbox.exists)
    }
}

fn connect_tcp(host: &str, port: u16, timeout: Option<Duration>) -> Result<TcpStream> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| IntakeError::Connection(format!("cannot resolve {host}:{port}: {e}")))?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT)) {
            Ok(stream) => {
                stream
                    .set_read_timeout(timeout)
                    .and_then(|()| stream.set_write_timeout(timeout))
                    .map_err(|e| IntakeError::Connection(format!("socket setup failed: {e}")))?;
                return Ok(stream);
            }
            Err(e) => {
                debug!(%addr, error = %e, "Connect attempt failed");
                last_err = Some(e);
            }
        }
    }
    Err(IntakeError::Connection(match last_err {
        Some(e) => format!("cannot connect to {host}:{port}: {e}"),
        None => format!("{host}:{port} resolved to no address"),
    }))
}

impl MailTransport for ImapTransport {
    fn highest_sequence_id(&mut self, folder: &str) -> Result<u32> {
        // Re-select so the count reflects mail that arrived since the last call
        self.selected = None;
        self.select(folder)
    }

    fn fetch_raw(&mut self, folder: &str, sequence_id: u32) -> Result<Vec<u8>> {
        let exists = self.select(folder)?;
        let not_found = || IntakeError::NotFound {
            folder: folder.to_string(),
            sequence_id,
        };
        if sequence_id == 0 || sequence_id > exists {
            return Err(not_found());
        }

        let fetches = self
            .session()?
            .fetch(sequence_id.to_string(), "RFC822")
            .map_err(|e| match e {
                imap::error::Error::No(_) | imap::error::Error::Bad(_) => {
                    IntakeError::Protocol(format!("FETCH {sequence_id} refused: {e}"))
                }
                other => IntakeError::from(other),
            })?;

        let body = fetches
            .iter()
            .find_map(|f| f.body())
            .filter(|b| !b.is_empty())
            .map(<[u8]>::to_vec);
        body.ok_or_else(not_found)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.logout() {
                warn!(host = %self.host, error = %e, "IMAP logout failed");
            }
        }
        self.selected = None;
        Ok(())
    }
}

impl Drop for ImapTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
