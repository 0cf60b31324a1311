//! Mail client seam
//!
//! The vault talks to the remote mailbox only through [`MailClient`]. A
//! client is one protocol connection: it has a selected folder, and the
//! [`TransientId`]s it hands out are only valid inside that folder on that
//! connection. A connection must never be shared between concurrent callers;
//! use [`MailClient::spawn_connection`] to get another one.

mod error;
pub mod memory;

pub use error::{ProtocolError, ProtocolErrorKind};
pub use memory::{Call, InMemoryMailClient, RemoteMailbox};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::models::{MessageMetadata, StableId, TransientId};

/// Well-known and named folders
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Folder {
    /// Canonical view holding every message; labels can only be applied here
    AllMail,
    /// Chat transcripts, not visible on every account
    Chats,
    /// Low-traffic folder used as the restore scratch location
    Drafts,
    Named(String),
}

impl Folder {
    /// Name of the folder on the remote service
    pub fn default_name(&self) -> &str {
        match self {
            Folder::AllMail => "[Gmail]/All Mail",
            Folder::Chats => "[Gmail]/Chats",
            Folder::Drafts => "[Gmail]/Drafts",
            Folder::Named(name) => name,
        }
    }
}

impl fmt::Display for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_name())
    }
}

/// Search request sent to the remote service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    /// Every message in the selected folder
    All,
    /// Messages that arrived on or after `since` and strictly before `before`
    Between { since: NaiveDate, before: NaiveDate },
    /// The message with this stable id, if present in the selected folder
    StableId(StableId),
}

impl SearchQuery {
    pub fn between(since: NaiveDate, before: NaiveDate) -> Self {
        SearchQuery::Between { since, before }
    }

    /// Protocol rendering of the query
    pub fn to_protocol(&self) -> String {
        match self {
            SearchQuery::All => "ALL".to_string(),
            SearchQuery::Between { since, before } => format!(
                "SINCE {} BEFORE {}",
                since.format("%d-%b-%Y"),
                before.format("%d-%b-%Y")
            ),
            SearchQuery::StableId(id) => format!("X-GM-MSGID {}", id),
        }
    }
}

impl Default for SearchQuery {
    fn default() -> Self {
        SearchQuery::All
    }
}

/// Field selection for a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchRequest {
    /// Metadata and body
    AllInfo,
    /// Metadata only
    AllButBody,
    /// Body only
    BodyOnly,
    /// Just the stable id
    StableIdOnly,
}

impl FetchRequest {
    pub fn wants_metadata(&self) -> bool {
        matches!(self, FetchRequest::AllInfo | FetchRequest::AllButBody)
    }

    pub fn wants_body(&self) -> bool {
        matches!(self, FetchRequest::AllInfo | FetchRequest::BodyOnly)
    }
}

/// Field bag returned for one message
///
/// The stable id is always present; the rest depends on the [`FetchRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFields {
    pub stable_id: StableId,
    pub metadata: Option<MessageMetadata>,
    pub body: Option<Vec<u8>>,
}

/// Result of a fetch, keyed by transient id
///
/// Ids the server answered for without any data are absent from the map.
pub type FetchResponse = BTreeMap<TransientId, FetchedFields>;

/// One connection to the remote mailbox
pub trait MailClient: Send {
    /// Open the connection and log in
    fn connect(&mut self) -> Result<(), ProtocolError>;

    /// Close the connection; never fails
    fn disconnect(&mut self);

    /// Drop and re-open the connection, counting it as a reconnection
    ///
    /// The previously selected folder is selected again.
    fn reconnect(&mut self) -> Result<(), ProtocolError>;

    /// Whether the folder exists and is visible to this account
    fn is_visible(&mut self, folder: &Folder) -> Result<bool, ProtocolError>;

    /// Select a folder; transient ids refer to it afterwards
    fn select_folder(&mut self, folder: &Folder) -> Result<(), ProtocolError>;

    /// Remote name of a logical folder
    fn folder_name(&self, folder: &Folder) -> String {
        folder.default_name().to_string()
    }

    /// Ordered transient ids matching the query in the selected folder
    fn search(&mut self, query: &SearchQuery) -> Result<Vec<TransientId>, ProtocolError>;

    /// Fetch fields for a set of ids in one command
    fn fetch(
        &mut self,
        ids: &[TransientId],
        request: FetchRequest,
    ) -> Result<FetchResponse, ProtocolError>;

    /// Append a raw message to a folder
    ///
    /// Returns the transient id of the created message, scoped to `folder`.
    fn push_data(
        &mut self,
        folder: &Folder,
        body: &[u8],
        flags: &BTreeSet<String>,
        internal_date: DateTime<Utc>,
    ) -> Result<TransientId, ProtocolError>;

    /// Create the labels not yet in `existing`
    ///
    /// Returns `existing` extended with every label now known to exist.
    fn create_labels(
        &mut self,
        labels: &BTreeSet<String>,
        existing: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, ProtocolError>;

    /// Add labels to messages of the selected folder in one command
    fn apply_labels_to(
        &mut self,
        ids: &[TransientId],
        labels: &[String],
    ) -> Result<(), ProtocolError>;

    /// Total reconnections performed on this connection
    fn reconnection_count(&self) -> usize;

    /// Open an independent connection to the same account
    fn spawn_connection(&self) -> Result<Box<dyn MailClient>, ProtocolError>;

    /// Fetch a single id
    fn fetch_one(
        &mut self,
        id: TransientId,
        request: FetchRequest,
    ) -> Result<Option<FetchedFields>, ProtocolError> {
        Ok(self.fetch(&[id], request)?.remove(&id))
    }
}
