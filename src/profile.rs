//! Validated, ready-to-run view of one configured mailbox source.

use std::time::Duration;

use regex::Regex;
use serde_json::{Map, Value};

use crate::config::ProfileConfig;
use crate::error::{IntakeError, Result};
use crate::model::record::MailRecord;

/// A profile with every pattern compiled once at startup.
///
/// Read-only for the pipeline; shared by reference with the worker that owns the source.
#[derive(Debug, Clone)]
pub struct SourceProfile {
    pub name: String,
    pub login: String,
    pub password: String,
    pub imap_host: String,
    pub imap_port: u16,
    pub folder: String,
    /// Mailbox socket timeout; `None` blocks indefinitely.
    pub io_timeout: Option<Duration>,
    pub force_to_image: bool,
    pub max_width_px: u32,
    pub max_height_px: u32,
    /// Quoted-reply marker; `None` when the configured mask is empty.
    pub reply_marker: Option<Regex>,
    pub replacements: Vec<(Regex, String)>,
    pub extra_fields: Map<String, Value>,
    pub receiver_regex: Regex,
    pub restricted_subjects: Vec<Regex>,
    pub first_mail_only: bool,
    /// Lower-cased subject markers that identify replies and forwards.
    pub reply_markers: Vec<String>,
}

impl SourceProfile {
    /// Compile a [`ProfileConfig`], resolving its password.
    pub fn from_config(cfg: &ProfileConfig) -> Result<Self> {
        let name = if cfg.name.is_empty() {
            cfg.source.folder.clone()
        } else {
            cfg.name.clone()
        };
        let password = cfg.source.resolve_password(&name)?;
        Self::build(cfg, name, password)
    }

    /// Compile a [`ProfileConfig`] without credentials, for offline parsing.
    pub fn offline(cfg: &ProfileConfig) -> Result<Self> {
        let name = if cfg.name.is_empty() {
            cfg.source.folder.clone()
        } else {
            cfg.name.clone()
        };
        Self::build(cfg, name, String::new())
    }

    fn build(cfg: &ProfileConfig, name: String, password: String) -> Result<Self> {
        if cfg.image.max_height_px == 0 || cfg.image.max_width_px == 0 {
            return Err(IntakeError::Config(format!(
                "profile '{name}': image dimensions must be positive"
            )));
        }

        if let Some(key) = cfg
            .extra_fields
            .keys()
            .find(|k| MailRecord::FIELDS.contains(&k.as_str()))
        {
            return Err(IntakeError::Config(format!(
                "profile '{name}': extra field '{key}' would overwrite a record field"
            )));
        }

        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|source| IntakeError::InvalidPattern {
                profile: name.clone(),
                pattern: pattern.to_string(),
                source,
            })
        };

        let reply_marker = if cfg.regex_last_string_mask.is_empty() {
            None
        } else {
            Some(compile(cfg.regex_last_string_mask.as_str())?)
        };

        let replacements = cfg
            .replacements
            .iter()
            .map(|r| Ok((compile(r.pattern.as_str())?, r.substr.clone())))
            .collect::<Result<Vec<_>>>()?;

        let restricted_subjects = cfg
            .filters
            .restricted_subjects_regex
            .iter()
            .map(|p| compile(p.as_str()))
            .collect::<Result<Vec<_>>>()?;

        let receiver_regex = compile(cfg.filters.receiver_regex_mask.as_str())?;

        Ok(Self {
            login: cfg.source.login.clone(),
            password,
            imap_host: cfg.source.imap_host.clone(),
            imap_port: cfg.source.imap_port,
            folder: cfg.source.folder.clone(),
            io_timeout: (cfg.source.timeout_secs > 0)
                .then(|| Duration::from_secs(cfg.source.timeout_secs)),
            force_to_image: cfg.image.force_to_image,
            max_width_px: cfg.image.max_width_px,
            max_height_px: cfg.image.max_height_px,
            reply_marker,
            replacements,
            extra_fields: cfg.extra_fields.clone().into_iter().collect(),
            receiver_regex,
            restricted_subjects,
            first_mail_only: cfg.filters.first_mail_only,
            reply_markers: cfg
                .filters
                .reply_markers
                .iter()
                .map(|m| m.to_lowercase())
                .collect(),
            name,
        })
    }
}

/// Fail when two profiles read the same folder.
///
/// Cursors and record ids are keyed by folder name, so such profiles would
/// share one offset and collide on every id.
pub fn ensure_distinct_folders(profiles: &[SourceProfile]) -> Result<()> {
    for (i, a) in profiles.iter().enumerate() {
        if let Some(b) = profiles[i + 1..].iter().find(|b| b.folder == a.folder) {
            return Err(IntakeError::Config(format!(
                "profiles '{}' and '{}' both read folder '{}'",
                a.name, b.name, a.folder
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::Replacement;

    /// A profile with no credentials, usable in unit tests across the crate.
    pub(crate) fn test_profile() -> SourceProfile {
        let mut cfg = ProfileConfig::default();
        cfg.name = "test".into();
        SourceProfile::offline(&cfg).expect("default profile compiles")
    }

    #[test]
    fn test_defaults_compile() {
        let p = test_profile();
        assert_eq!(p.folder, "INBOX");
        assert!(p.reply_marker.is_none());
        assert!(p.receiver_regex.is_match("anyone@example.com"));
        assert!(p.receiver_regex.is_match(""));
    }

    #[test]
    fn test_invalid_pattern_names_profile() {
        let mut cfg = ProfileConfig::default();
        cfg.name = "broken".into();
        cfg.replacements.push(Replacement {
            pattern: "(unclosed".into(),
            substr: String::new(),
        });
        let err = SourceProfile::offline(&cfg).unwrap_err();
        match err {
            IntakeError::InvalidPattern {
                profile, pattern, ..
            } => {
                assert_eq!(profile, "broken");
                assert_eq!(pattern, "(unclosed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_name_falls_back_to_folder() {
        let mut cfg = ProfileConfig::default();
        cfg.source.folder = "Support".into();
        let p = SourceProfile::offline(&cfg).unwrap();
        assert_eq!(p.name, "Support");
    }

    #[test]
    fn test_zero_height_rejected() {
        let mut cfg = ProfileConfig::default();
        cfg.image.max_height_px = 0;
        assert!(matches!(
            SourceProfile::offline(&cfg),
            Err(IntakeError::Config(_))
        ));
    }

    #[test]
    fn test_reserved_extra_field_rejected() {
        let mut cfg = ProfileConfig::default();
        cfg.name = "support".into();
        cfg.extra_fields.insert("queue".into(), "support".into());
        assert!(SourceProfile::offline(&cfg).is_ok());

        cfg.extra_fields.insert("id".into(), "fixed".into());
        match SourceProfile::offline(&cfg) {
            Err(IntakeError::Config(msg)) => {
                assert!(msg.contains("support"));
                assert!(msg.contains("'id'"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_shared_folder_names_both_profiles() {
        let mut alice = test_profile();
        alice.name = "alice".into();
        let mut bob = test_profile();
        bob.name = "bob".into();
        let mut sales = test_profile();
        sales.name = "sales".into();
        sales.folder = "Sales".into();

        assert!(ensure_distinct_folders(&[alice.clone(), sales.clone()]).is_ok());
        match ensure_distinct_folders(&[alice, sales, bob]) {
            Err(IntakeError::Config(msg)) => {
                assert!(msg.contains("'alice'"));
                assert!(msg.contains("'bob'"));
                assert!(msg.contains("'INBOX'"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
