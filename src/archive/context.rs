//! # Pass Contexts
//!
//! Cross-frame state for one export or one import pass.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           PASS CONTEXTS                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ArchivingContext                    RestoringContext                   │
//! │  ────────────────                    ────────────────                   │
//! │  local row ──► RecipientId           RecipientId ──► restored row       │
//! │  thread row ──► ChatId               ChatId ──► thread row              │
//! │  purpose + content filter            deferred actions (deduplicated)    │
//! │  frame sink, bencher, progress       identity, config                   │
//! │                                                                         │
//! │  Both are owned by the manager and lent to one archiver at a time.     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use super::bench::Bencher;
use super::progress::ExportProgress;
use crate::config::BackupConfig;
use crate::error::{Error, Result};
use crate::proto::{ChatId, Frame, RecipientId, RecordFamily};
use crate::storage::{AvatarTarget, Store, ThreadPeer};
use crate::stream::FrameSink;

// ============================================================================
// SHARED
// ============================================================================

/// Why the backup is being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackupPurpose {
    /// Uploaded and restored later
    RemoteBackup,
    /// Moved straight to a new device
    DeviceTransfer,
}

/// The local user's identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentifiers {
    /// Service id
    pub aci: Uuid,
    /// Phone number
    pub e164: Option<u64>,
}

/// Cooperative cancellation, checked between frames only.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// A token that has not been cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// ARCHIVING
// ============================================================================

/// A local row that can be referenced as a recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecipientAddress {
    /// The local user
    LocalUser,
    /// A contact row
    Contact(i64),
    /// A group row
    Group(i64),
}

impl From<ThreadPeer> for RecipientAddress {
    fn from(peer: ThreadPeer) -> Self {
        match peer {
            ThreadPeer::Contact(id) => RecipientAddress::Contact(id),
            ThreadPeer::Group(id) => RecipientAddress::Group(id),
            ThreadPeer::NoteToSelf => RecipientAddress::LocalUser,
        }
    }
}

/// State for one export pass.
pub struct ArchivingContext<'a> {
    /// Source of records
    pub store: Store<'a>,
    /// Per-family timing
    pub bencher: &'a mut Bencher,
    /// Why the backup is being made
    pub purpose: BackupPurpose,
    /// The local user
    pub identity: &'a LocalIdentifiers,
    /// Pass start, Unix millis; "now" for the content filter
    pub started_at_ms: i64,
    sink: &'a mut dyn FrameSink,
    progress: &'a mut ExportProgress,
    cancel: &'a CancellationToken,
    remote_expiry_window_ms: i64,
    recipients: HashMap<RecipientAddress, RecipientId>,
    chats: HashMap<i64, ChatId>,
    next_recipient_id: u64,
    next_chat_id: u64,
}

impl<'a> ArchivingContext<'a> {
    /// A context writing into `sink`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store<'a>,
        sink: &'a mut dyn FrameSink,
        bencher: &'a mut Bencher,
        progress: &'a mut ExportProgress,
        purpose: BackupPurpose,
        identity: &'a LocalIdentifiers,
        config: &BackupConfig,
        started_at_ms: i64,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            store,
            bencher,
            purpose,
            identity,
            started_at_ms,
            sink,
            progress,
            cancel,
            remote_expiry_window_ms: i64::try_from(config.remote_expiry_window_ms)
                .unwrap_or(i64::MAX),
            recipients: HashMap::new(),
            chats: HashMap::new(),
            next_recipient_id: 1,
            next_chat_id: 1,
        }
    }

    /// Fail with `Cancelled` if cancellation was requested
    pub fn check_cancelled(&self) -> Result<()> {
        self.cancel.check()
    }

    /// Write one frame and count it as progress
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.sink.write_frame(frame)?;
        self.progress.did_process_unit();
        Ok(())
    }

    /// Count a record that produced no frame
    pub fn did_skip_unit(&mut self) {
        self.progress.did_process_unit();
    }

    /// Mint the pass-scoped id for a local recipient row
    pub fn mint_recipient_id(&mut self, address: RecipientAddress) -> RecipientId {
        let id = RecipientId(self.next_recipient_id);
        self.next_recipient_id += 1;
        self.recipients.insert(address, id);
        id
    }

    /// The id minted for a local recipient row, if it was exported
    pub fn recipient_id(&self, address: RecipientAddress) -> Option<RecipientId> {
        self.recipients.get(&address).copied()
    }

    /// Mint the pass-scoped id for a thread row
    pub fn mint_chat_id(&mut self, thread_row: i64) -> ChatId {
        let id = ChatId(self.next_chat_id);
        self.next_chat_id += 1;
        self.chats.insert(thread_row, id);
        id
    }

    /// The id minted for a thread row, if it was exported
    pub fn chat_id(&self, thread_row: i64) -> Option<ChatId> {
        self.chats.get(&thread_row).copied()
    }

    /// Whether a disappearing message is excluded for this purpose.
    ///
    /// An unstarted timer counts from now.
    pub fn should_skip_expiring(&self, expire_started_at_ms: i64, expires_in_ms: i64) -> bool {
        if expires_in_ms <= 0 {
            return false;
        }
        let start = if expire_started_at_ms > 0 {
            expire_started_at_ms
        } else {
            self.started_at_ms
        };
        let expires_at = start.saturating_add(expires_in_ms);
        match self.purpose {
            BackupPurpose::DeviceTransfer => expires_at <= self.started_at_ms,
            BackupPurpose::RemoteBackup => {
                expires_at <= self.started_at_ms.saturating_add(self.remote_expiry_window_ms)
            }
        }
    }
}

// ============================================================================
// RESTORING
// ============================================================================

/// What a restored recipient id points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RestoredRecipient {
    /// The local user
    Local,
    /// A contact row
    Contact(i64),
    /// A group row
    Group(i64),
}

impl RestoredRecipient {
    /// The thread peer for a chat with this recipient
    pub fn thread_peer(self) -> ThreadPeer {
        match self {
            RestoredRecipient::Local => ThreadPeer::NoteToSelf,
            RestoredRecipient::Contact(id) => ThreadPeer::Contact(id),
            RestoredRecipient::Group(id) => ThreadPeer::Group(id),
        }
    }
}

/// A chat restored in this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoredChat {
    /// Thread row
    pub thread_row: i64,
    /// Who the chat is with
    pub recipient: RestoredRecipient,
}

/// A side effect that runs once after all frames.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeferredAction {
    /// Recompute last interaction and unread count
    RecomputeThreadMetadata {
        /// Thread row
        thread_id: i64,
    },
    /// Download an avatar
    EnqueueAvatarFetch {
        /// Whose avatar
        target: AvatarTarget,
    },
    /// Download a sticker pack
    EnqueueStickerPackDownload {
        /// 16-byte pack id
        pack_id: Vec<u8>,
        /// 32-byte pack key
        pack_key: Vec<u8>,
    },
}

impl DeferredAction {
    /// Name used for timing and error grouping
    pub fn name(&self) -> &'static str {
        match self {
            DeferredAction::RecomputeThreadMetadata { .. } => "recompute_thread_metadata",
            DeferredAction::EnqueueAvatarFetch { .. } => "enqueue_avatar_fetch",
            DeferredAction::EnqueueStickerPackDownload { .. } => "enqueue_sticker_pack_download",
        }
    }

    /// Family whose frames queued this action
    pub fn family(&self) -> RecordFamily {
        match self {
            DeferredAction::RecomputeThreadMetadata { .. } => RecordFamily::Chat,
            DeferredAction::EnqueueAvatarFetch { target } => match target {
                AvatarTarget::Local => RecordFamily::AccountData,
                AvatarTarget::Contact(_) => RecordFamily::ContactRecipient,
                AvatarTarget::Group(_) => RecordFamily::GroupRecipient,
            },
            DeferredAction::EnqueueStickerPackDownload { .. } => RecordFamily::StickerPack,
        }
    }

    /// Short id for log lines
    pub fn id_log_string(&self) -> String {
        match self {
            DeferredAction::RecomputeThreadMetadata { thread_id } => {
                format!("thread:{}", thread_id)
            }
            DeferredAction::EnqueueAvatarFetch { target } => format!("{:?}", target),
            DeferredAction::EnqueueStickerPackDownload { pack_id, .. } => {
                format!("sticker_pack:{}", hex::encode(pack_id))
            }
        }
    }

    /// Run the action
    pub fn run(&self, store: &Store<'_>, now_ms: i64) -> Result<()> {
        match self {
            DeferredAction::RecomputeThreadMetadata { thread_id } => {
                store.recompute_thread_metadata(*thread_id)
            }
            DeferredAction::EnqueueAvatarFetch { target } => {
                store.enqueue_avatar_fetch(*target, now_ms)
            }
            DeferredAction::EnqueueStickerPackDownload { pack_id, pack_key } => {
                store.enqueue_sticker_download(pack_id, pack_key, now_ms)
            }
        }
    }
}

/// Queue of deferred actions; each distinct action is kept once, in
/// first-queued order.
#[derive(Debug, Default)]
pub struct DeferredActions {
    queue: Vec<DeferredAction>,
    seen: HashSet<DeferredAction>,
}

impl DeferredActions {
    /// Queue an action unless an equal one is already queued
    pub fn push(&mut self, action: DeferredAction) {
        if self.seen.insert(action.clone()) {
            self.queue.push(action);
        }
    }

    /// Queued actions
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Take every queued action
    pub fn drain(&mut self) -> Vec<DeferredAction> {
        self.seen.clear();
        std::mem::take(&mut self.queue)
    }
}

/// State for one import pass.
pub struct RestoringContext<'a> {
    /// Restore target
    pub store: Store<'a>,
    /// The local user
    pub identity: &'a LocalIdentifiers,
    /// Pass start, Unix millis
    pub started_at_ms: i64,
    /// Post-pass work
    pub deferred: DeferredActions,
    /// Whether an account frame was restored
    pub account_restored: bool,
    recipients: HashMap<RecipientId, RestoredRecipient>,
    chats: HashMap<ChatId, RestoredChat>,
    local_recipient_id: Option<RecipientId>,
}

impl<'a> RestoringContext<'a> {
    /// A context restoring into `store`
    pub fn new(store: Store<'a>, identity: &'a LocalIdentifiers, started_at_ms: i64) -> Self {
        Self {
            store,
            identity,
            started_at_ms,
            deferred: DeferredActions::default(),
            account_restored: false,
            recipients: HashMap::new(),
            chats: HashMap::new(),
            local_recipient_id: None,
        }
    }

    /// Map a recipient id. Returns false if the id was already mapped.
    pub fn map_recipient(&mut self, id: RecipientId, recipient: RestoredRecipient) -> bool {
        if self.recipients.contains_key(&id) {
            return false;
        }
        if recipient == RestoredRecipient::Local {
            self.local_recipient_id = Some(id);
        }
        self.recipients.insert(id, recipient);
        true
    }

    /// Whether a recipient id is already mapped
    pub fn has_recipient(&self, id: RecipientId) -> bool {
        self.recipients.contains_key(&id)
    }

    /// Look up a recipient restored earlier in the pass
    pub fn recipient(&self, id: RecipientId) -> Option<RestoredRecipient> {
        self.recipients.get(&id).copied()
    }

    /// The id of the local user's recipient frame, once seen
    pub fn local_recipient_id(&self) -> Option<RecipientId> {
        self.local_recipient_id
    }

    /// Map a chat id. Returns false if the id was already mapped.
    pub fn map_chat(&mut self, id: ChatId, chat: RestoredChat) -> bool {
        if self.chats.contains_key(&id) {
            return false;
        }
        self.chats.insert(id, chat);
        true
    }

    /// Whether a chat id is already mapped
    pub fn has_chat(&self, id: ChatId) -> bool {
        self.chats.contains_key(&id)
    }

    /// Look up a chat restored earlier in the pass
    pub fn chat(&self, id: ChatId) -> Option<RestoredChat> {
        self.chats.get(&id).copied()
    }
}
