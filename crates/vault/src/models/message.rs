//! Message metadata as archived and as reported by the remote service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::StableId;
use crate::error::VaultError;

/// Label added to every archived chat so chats stay distinguishable once restored
pub const CHAT_LABEL: &str = "vault-chats";

/// The two message classes the vault backs up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Email,
    Chat,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Email => "email",
            MessageKind::Chat => "chat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(MessageKind::Email),
            "chat" => Some(MessageKind::Chat),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata snapshot of one message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Never changes for a given logical message
    pub stable_id: StableId,
    /// Protocol flags (e.g. "\\Seen", "\\Flagged")
    pub flags: BTreeSet<String>,
    /// Remote labels
    pub labels: BTreeSet<String>,
    /// Server-side arrival time
    pub internal_date: DateTime<Utc>,
    /// Subject line, empty when the message has none
    pub subject: String,
}

impl MessageMetadata {
    /// Create metadata with no flags or labels
    pub fn new(stable_id: StableId, internal_date: DateTime<Utc>) -> Self {
        Self {
            stable_id,
            flags: BTreeSet::new(),
            labels: BTreeSet::new(),
            internal_date,
            subject: String::new(),
        }
    }

    pub fn with_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Normalize metadata for the archive of the given kind
    ///
    /// Chats carry [`CHAT_LABEL`] in addition to their remote labels.
    pub fn archived_as(mut self, kind: MessageKind) -> Self {
        if kind == MessageKind::Chat {
            self.labels.insert(CHAT_LABEL.to_string());
        }
        self
    }
}

/// Decide whether the archived snapshot must be rewritten
///
/// Returns `true` as soon as the flag sets or the label sets differ in either
/// direction. For chats the incoming labels are compared with the synthetic
/// chat label added, matching how chats are archived.
///
/// # Errors
/// `StableIdChanged` if the two snapshots disagree on the stable id.
pub fn needs_update(
    stored: &MessageMetadata,
    incoming: &MessageMetadata,
    kind: MessageKind,
) -> Result<bool, VaultError> {
    if stored.stable_id != incoming.stable_id {
        return Err(VaultError::StableIdChanged {
            stored: stored.stable_id,
            fetched: incoming.stable_id,
        });
    }

    if stored.flags != incoming.flags {
        return Ok(true);
    }

    if kind == MessageKind::Chat && !incoming.labels.contains(CHAT_LABEL) {
        let mut labels = incoming.labels.clone();
        labels.insert(CHAT_LABEL.to_string());
        return Ok(stored.labels != labels);
    }

    Ok(stored.labels != incoming.labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn meta(flags: &[&str], labels: &[&str]) -> MessageMetadata {
        let date = Utc.with_ymd_and_hms(2021, 3, 4, 10, 0, 0).unwrap();
        MessageMetadata::new(StableId::new(1), date)
            .with_flags(flags.iter().copied())
            .with_labels(labels.iter().copied())
    }

    #[test]
    fn test_identical_metadata_needs_no_update() {
        let a = meta(&["\\Seen"], &["Work", "Travel"]);
        let b = meta(&["\\Seen"], &["Travel", "Work"]);
        assert!(!needs_update(&a, &b, MessageKind::Email).unwrap());
    }

    #[test]
    fn test_extra_flag_on_either_side_needs_update() {
        let stored = meta(&["\\Seen"], &[]);
        let incoming = meta(&["\\Seen", "\\Flagged"], &[]);
        assert!(needs_update(&stored, &incoming, MessageKind::Email).unwrap());
        assert!(needs_update(&incoming, &stored, MessageKind::Email).unwrap());
    }

    #[test]
    fn test_label_difference_needs_update() {
        let stored = meta(&[], &["Work"]);
        let incoming = meta(&[], &["Work", "Later"]);
        assert!(needs_update(&stored, &incoming, MessageKind::Email).unwrap());
        assert!(needs_update(&incoming, &stored, MessageKind::Email).unwrap());
    }

    #[test]
    fn test_chat_label_is_implicit_for_chats() {
        let stored = meta(&[], &["Friends"]).archived_as(MessageKind::Chat);
        let incoming = meta(&[], &["Friends"]);

        assert!(!needs_update(&stored, &incoming, MessageKind::Chat).unwrap());
        // the same pair compared as emails shows the synthetic label as a difference
        assert!(needs_update(&stored, &incoming, MessageKind::Email).unwrap());
    }

    #[test]
    fn test_chat_without_stored_label_needs_update() {
        let stored = meta(&[], &["Friends"]);
        let incoming = meta(&[], &["Friends"]);
        assert!(needs_update(&stored, &incoming, MessageKind::Chat).unwrap());
    }

    #[test]
    fn test_changed_stable_id_is_fatal() {
        let stored = meta(&[], &[]);
        let mut incoming = meta(&[], &[]);
        incoming.stable_id = StableId::new(2);

        let err = needs_update(&stored, &incoming, MessageKind::Email).unwrap_err();
        assert!(matches!(err, VaultError::StableIdChanged { .. }));
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!(MessageKind::parse("chat"), Some(MessageKind::Chat));
        assert_eq!(MessageKind::parse("email"), Some(MessageKind::Email));
        assert_eq!(MessageKind::parse("other"), None);
    }
}
