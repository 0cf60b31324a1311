//! In-memory mail client
//!
//! Simulates a remote mailbox so engines can be driven without a server.
//! Every [`InMemoryMailClient`] is one connection with its own selected
//! folder; connections spawned from it share the same [`RemoteMailbox`].
//! Faults can be injected per message to exercise the recovery paths.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    FetchRequest, FetchResponse, FetchedFields, Folder, MailClient, ProtocolError,
    ProtocolErrorKind, SearchQuery,
};
use crate::models::{MessageKind, MessageMetadata, StableId, TransientId};

/// First stable id handed to appended messages
const FIRST_PUSHED_STABLE_ID: u64 = 9_000_000_000;

/// A message stored on the simulated server
#[derive(Debug, Clone)]
pub struct RemoteMessage {
    pub uid: u32,
    pub kind: MessageKind,
    pub metadata: MessageMetadata,
    pub body: Vec<u8>,
    /// Extra folder the message was appended to, besides its canonical view
    pub folder: Option<Folder>,
}

impl RemoteMessage {
    fn is_in(&self, folder: &Folder) -> bool {
        match folder {
            Folder::AllMail => self.kind == MessageKind::Email,
            Folder::Chats => self.kind == MessageKind::Chat,
            other => self.folder.as_ref() == Some(other),
        }
    }
}

/// Commands received by the server, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Select(Folder),
    Search(String),
    Fetch {
        ids: Vec<TransientId>,
        request: FetchRequest,
    },
    Push(Folder),
    CreateLabel(String),
    ApplyLabels {
        ids: Vec<TransientId>,
        labels: Vec<String>,
    },
    Reconnect,
}

/// Shared server state
#[derive(Debug)]
pub struct RemoteMailbox {
    messages: BTreeMap<u32, RemoteMessage>,
    next_uid: u32,
    next_stable_id: u64,
    labels: BTreeSet<String>,
    chats_visible: bool,
    bulk_fetch_faults: BTreeMap<u32, ProtocolErrorKind>,
    fetch_faults: BTreeMap<u32, ProtocolErrorKind>,
    empty: BTreeSet<u32>,
    push_faults: VecDeque<ProtocolErrorKind>,
    label_faults: BTreeMap<String, ProtocolErrorKind>,
    reconnect_faults: usize,
    search_faults: VecDeque<ProtocolErrorKind>,
    calls: Vec<Call>,
}

impl RemoteMailbox {
    fn new() -> Self {
        Self {
            messages: BTreeMap::new(),
            next_uid: 1,
            next_stable_id: FIRST_PUSHED_STABLE_ID,
            labels: BTreeSet::new(),
            chats_visible: true,
            bulk_fetch_faults: BTreeMap::new(),
            fetch_faults: BTreeMap::new(),
            empty: BTreeSet::new(),
            push_faults: VecDeque::new(),
            label_faults: BTreeMap::new(),
            reconnect_faults: 0,
            search_faults: VecDeque::new(),
            calls: Vec::new(),
        }
    }

    fn insert(
        &mut self,
        kind: MessageKind,
        metadata: MessageMetadata,
        body: Vec<u8>,
        folder: Option<Folder>,
    ) -> TransientId {
        let uid = self.next_uid;
        self.next_uid += 1;
        self.messages.insert(
            uid,
            RemoteMessage {
                uid,
                kind,
                metadata,
                body,
                folder,
            },
        );
        TransientId::new(uid)
    }

    fn by_stable_id(&self, id: StableId) -> Option<&RemoteMessage> {
        self.messages.values().find(|m| m.metadata.stable_id == id)
    }

    fn check_fetch_faults(
        &self,
        ids: &[TransientId],
        request: FetchRequest,
    ) -> Result<(), ProtocolError> {
        if request == FetchRequest::StableIdOnly {
            return Ok(());
        }
        for id in ids {
            if let Some(kind) = self.fetch_faults.get(&id.as_u32()) {
                return Err(ProtocolError::new(*kind, format!("cannot fetch {}", id)));
            }
            if ids.len() > 1
                && let Some(kind) = self.bulk_fetch_faults.get(&id.as_u32())
            {
                return Err(ProtocolError::new(
                    *kind,
                    format!("bulk fetch failed on {}", id),
                ));
            }
        }
        Ok(())
    }
}

/// One simulated connection
pub struct InMemoryMailClient {
    remote: Arc<Mutex<RemoteMailbox>>,
    selected: Option<Folder>,
    connected: bool,
    reconnections: usize,
}

impl InMemoryMailClient {
    /// Create a connected client on an empty mailbox
    pub fn new() -> Self {
        Self::on(Arc::new(Mutex::new(RemoteMailbox::new())))
    }

    fn on(remote: Arc<Mutex<RemoteMailbox>>) -> Self {
        Self {
            remote,
            selected: None,
            connected: true,
            reconnections: 0,
        }
    }

    /// Another connection to the same mailbox, sharing nothing else
    pub fn handle(&self) -> Self {
        Self::on(Arc::clone(&self.remote))
    }

    fn remote(&self) -> MutexGuard<'_, RemoteMailbox> {
        self.remote.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an email to All Mail
    pub fn add_email(&self, metadata: MessageMetadata, body: impl Into<Vec<u8>>) -> TransientId {
        self.remote()
            .insert(MessageKind::Email, metadata, body.into(), None)
    }

    /// Add a chat transcript to the chats folder
    pub fn add_chat(&self, metadata: MessageMetadata, body: impl Into<Vec<u8>>) -> TransientId {
        self.remote()
            .insert(MessageKind::Chat, metadata, body.into(), None)
    }

    /// Delete a message on the server
    pub fn remove(&self, id: StableId) {
        self.remote()
            .messages
            .retain(|_, m| m.metadata.stable_id != id);
    }

    /// Replace the flags of a message on the server
    pub fn set_flags<I, S>(&self, id: StableId, flags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let flags: BTreeSet<String> = flags.into_iter().map(Into::into).collect();
        let mut remote = self.remote();
        for message in remote.messages.values_mut() {
            if message.metadata.stable_id == id {
                message.metadata.flags = flags.clone();
            }
        }
    }

    pub fn set_chats_visible(&self, visible: bool) {
        self.remote().chats_visible = visible;
    }

    /// Fail every multi-id fetch that includes `id`
    pub fn fail_bulk_fetch(&self, id: TransientId, kind: ProtocolErrorKind) {
        self.remote().bulk_fetch_faults.insert(id.as_u32(), kind);
    }

    /// Fail every fetch of `id` except stable-id-only ones
    pub fn fail_fetch(&self, id: TransientId, kind: ProtocolErrorKind) {
        self.remote().fetch_faults.insert(id.as_u32(), kind);
    }

    /// Answer fetches of `id` without any data
    pub fn return_empty(&self, id: TransientId) {
        self.remote().empty.insert(id.as_u32());
    }

    /// Queue a failure for the next append
    pub fn fail_next_push(&self, kind: ProtocolErrorKind) {
        self.remote().push_faults.push_back(kind);
    }

    /// Fail every attempt to apply `label`
    pub fn fail_label(&self, label: impl Into<String>, kind: ProtocolErrorKind) {
        self.remote().label_faults.insert(label.into(), kind);
    }

    /// Queue a failure for the next search
    pub fn fail_next_search(&self, kind: ProtocolErrorKind) {
        self.remote().search_faults.push_back(kind);
    }

    /// Fail the next `count` reconnection attempts
    pub fn fail_reconnects(&self, count: usize) {
        self.remote().reconnect_faults = count;
    }

    /// Drop every injected fault
    pub fn clear_faults(&self) {
        let mut remote = self.remote();
        remote.bulk_fetch_faults.clear();
        remote.fetch_faults.clear();
        remote.empty.clear();
        remote.push_faults.clear();
        remote.label_faults.clear();
        remote.reconnect_faults = 0;
        remote.search_faults.clear();
    }

    /// Snapshot of the messages on the server
    pub fn messages(&self) -> Vec<RemoteMessage> {
        self.remote().messages.values().cloned().collect()
    }

    /// Look up a stored message by stable id
    pub fn find(&self, id: StableId) -> Option<RemoteMessage> {
        self.remote().by_stable_id(id).cloned()
    }

    /// Labels known to the server
    pub fn labels(&self) -> BTreeSet<String> {
        self.remote().labels.clone()
    }

    /// Commands received so far by every connection
    pub fn calls(&self) -> Vec<Call> {
        self.remote().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.remote().calls.clear();
    }

    fn selected(&self) -> Result<&Folder, ProtocolError> {
        self.ensure_connected()?;
        self.selected
            .as_ref()
            .ok_or_else(|| ProtocolError::other("no folder selected"))
    }

    fn ensure_connected(&self) -> Result<(), ProtocolError> {
        if self.connected {
            Ok(())
        } else {
            Err(ProtocolError::abort("connection closed"))
        }
    }

    /// Register a failure, dropping the connection on aborts
    fn failed(&mut self, err: ProtocolError) -> ProtocolError {
        if err.kind == ProtocolErrorKind::Abort {
            self.connected = false;
        }
        err
    }
}

impl Default for InMemoryMailClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MailClient for InMemoryMailClient {
    fn connect(&mut self) -> Result<(), ProtocolError> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn reconnect(&mut self) -> Result<(), ProtocolError> {
        self.reconnections += 1;
        {
            let mut remote = self.remote();
            remote.calls.push(Call::Reconnect);
            if remote.reconnect_faults > 0 {
                remote.reconnect_faults -= 1;
                return Err(ProtocolError::abort("reconnection refused"));
            }
        }
        self.connected = true;
        Ok(())
    }

    fn is_visible(&mut self, folder: &Folder) -> Result<bool, ProtocolError> {
        self.ensure_connected()?;
        Ok(match folder {
            Folder::Chats => self.remote().chats_visible,
            _ => true,
        })
    }

    fn select_folder(&mut self, folder: &Folder) -> Result<(), ProtocolError> {
        if !self.is_visible(folder)? {
            return Err(ProtocolError::other(format!("no such folder: {}", folder)));
        }
        self.remote().calls.push(Call::Select(folder.clone()));
        self.selected = Some(folder.clone());
        Ok(())
    }

    fn search(&mut self, query: &SearchQuery) -> Result<Vec<TransientId>, ProtocolError> {
        let folder = self.selected()?.clone();
        let fault = {
            let mut remote = self.remote();
            remote.calls.push(Call::Search(query.to_protocol()));
            remote.search_faults.pop_front()
        };
        if let Some(kind) = fault {
            return Err(self.failed(ProtocolError::new(kind, "search failed")));
        }

        let remote = self.remote();
        let ids = remote
            .messages
            .values()
            .filter(|m| m.is_in(&folder))
            .filter(|m| match query {
                SearchQuery::All => true,
                SearchQuery::Between { since, before } => {
                    let day = m.metadata.internal_date.date_naive();
                    day >= *since && day < *before
                }
                SearchQuery::StableId(id) => m.metadata.stable_id == *id,
            })
            .map(|m| TransientId::new(m.uid))
            .collect();
        Ok(ids)
    }

    fn fetch(
        &mut self,
        ids: &[TransientId],
        request: FetchRequest,
    ) -> Result<FetchResponse, ProtocolError> {
        let folder = self.selected()?.clone();
        let checked = {
            let mut remote = self.remote();
            remote.calls.push(Call::Fetch {
                ids: ids.to_vec(),
                request,
            });
            remote.check_fetch_faults(ids, request)
        };
        if let Err(err) = checked {
            return Err(self.failed(err));
        }

        let remote = self.remote();
        let mut response = FetchResponse::new();
        for id in ids {
            if remote.empty.contains(&id.as_u32()) {
                continue;
            }
            let Some(message) = remote.messages.get(&id.as_u32()) else {
                continue;
            };
            if !message.is_in(&folder) {
                continue;
            }
            response.insert(
                *id,
                FetchedFields {
                    stable_id: message.metadata.stable_id,
                    metadata: request
                        .wants_metadata()
                        .then(|| message.metadata.clone()),
                    body: request.wants_body().then(|| message.body.clone()),
                },
            );
        }
        Ok(response)
    }

    fn push_data(
        &mut self,
        folder: &Folder,
        body: &[u8],
        flags: &BTreeSet<String>,
        internal_date: DateTime<Utc>,
    ) -> Result<TransientId, ProtocolError> {
        self.ensure_connected()?;
        let fault = {
            let mut remote = self.remote();
            remote.calls.push(Call::Push(folder.clone()));
            remote.push_faults.pop_front()
        };
        if let Some(kind) = fault {
            return Err(self.failed(ProtocolError::new(kind, "append refused")));
        }

        let mut remote = self.remote();
        let stable_id = StableId::new(remote.next_stable_id);
        remote.next_stable_id += 1;
        let metadata = MessageMetadata::new(stable_id, internal_date).with_flags(flags.iter().cloned());
        let extra = match folder {
            Folder::AllMail => None,
            other => Some(other.clone()),
        };
        Ok(remote.insert(MessageKind::Email, metadata, body.to_vec(), extra))
    }

    fn create_labels(
        &mut self,
        labels: &BTreeSet<String>,
        existing: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, ProtocolError> {
        self.ensure_connected()?;
        let mut known = existing.clone();
        let mut remote = self.remote();
        for label in labels {
            // system labels are built in
            if label.starts_with('\\') || known.contains(label) {
                continue;
            }
            if remote.labels.insert(label.clone()) {
                remote.calls.push(Call::CreateLabel(label.clone()));
            }
            known.insert(label.clone());
        }
        Ok(known)
    }

    fn apply_labels_to(
        &mut self,
        ids: &[TransientId],
        labels: &[String],
    ) -> Result<(), ProtocolError> {
        let folder = self.selected()?.clone();
        let fault = {
            let mut remote = self.remote();
            remote.calls.push(Call::ApplyLabels {
                ids: ids.to_vec(),
                labels: labels.to_vec(),
            });
            labels
                .iter()
                .find_map(|label| remote.label_faults.get(label).copied())
        };
        if let Some(kind) = fault {
            return Err(self.failed(ProtocolError::new(kind, "cannot apply labels")));
        }
        if folder != Folder::AllMail {
            return Err(ProtocolError::other(format!(
                "labels cannot be applied in {}",
                folder
            )));
        }

        let mut remote = self.remote();
        for id in ids {
            if let Some(message) = remote.messages.get_mut(&id.as_u32()) {
                message.metadata.labels.extend(labels.iter().cloned());
            }
        }
        Ok(())
    }

    fn reconnection_count(&self) -> usize {
        self.reconnections
    }

    fn spawn_connection(&self) -> Result<Box<dyn MailClient>, ProtocolError> {
        Ok(Box::new(self.handle()))
    }
}
