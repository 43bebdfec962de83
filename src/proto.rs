//! # Backup Frame Model
//!
//! Typed payloads carried in the backup stream.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              FRAME UNIT                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌──────────────┬────────────┬──────────────────────────────────────┐  │
//! │  │ length (u32) │ tag (u8)   │ bincode(record)                      │  │
//! │  └──────────────┴────────────┴──────────────────────────────────────┘  │
//! │                                                                         │
//! │  tag 1 account │ 2 recipient │ 3 chat │ 4 chat item │ 5 sticker pack   │
//! │  tag 6 ad-hoc call │ anything else → Frame { item: None }              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Fields that select between alternatives ("oneof" fields) are an explicit
//! `u32` case code plus optional payloads, never a serde enum: bincode has
//! no representation for an enum variant it does not know, and a newer
//! writer must not make an older reader fail the whole frame.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pass-scoped handle for a recipient, minted by the exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecipientId(pub u64);

/// Pass-scoped handle for a chat, minted by the exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChatId(pub u64);

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "recipient:{}", self.0)
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chat:{}", self.0)
    }
}

// ============================================================================
// RECORD FAMILIES
// ============================================================================

/// A category of archived data, each with its own archiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFamily {
    /// The stream header
    Header,
    /// The local account's profile and settings
    AccountData,
    /// The local user as a recipient
    LocalRecipient,
    /// A contact
    ContactRecipient,
    /// A group
    GroupRecipient,
    /// A conversation thread
    Chat,
    /// A message or update in a chat
    ChatItem,
    /// An installed sticker pack
    StickerPack,
    /// A call record not tied to a 1:1 chat
    AdHocCall,
    /// A frame whose family could not be determined
    Unknown,
}

impl RecordFamily {
    /// Families in export order. `Header` and `Unknown` are not archivers.
    pub const EXPORT_ORDER: [RecordFamily; 8] = [
        RecordFamily::AccountData,
        RecordFamily::LocalRecipient,
        RecordFamily::ContactRecipient,
        RecordFamily::GroupRecipient,
        RecordFamily::Chat,
        RecordFamily::ChatItem,
        RecordFamily::StickerPack,
        RecordFamily::AdHocCall,
    ];

    /// A failure in this family aborts the whole pass.
    pub fn is_always_fatal(self) -> bool {
        matches!(self, RecordFamily::Header | RecordFamily::AccountData)
    }

    /// Families whose ids this family's frames reference.
    pub fn dependencies(self) -> &'static [RecordFamily] {
        use RecordFamily::*;
        match self {
            Chat => &[LocalRecipient, ContactRecipient, GroupRecipient],
            ChatItem => &[LocalRecipient, ContactRecipient, GroupRecipient, Chat],
            AdHocCall => &[GroupRecipient],
            _ => &[],
        }
    }

    /// Stable snake_case name used in logs and persisted summaries.
    pub fn as_str(self) -> &'static str {
        match self {
            RecordFamily::Header => "header",
            RecordFamily::AccountData => "account_data",
            RecordFamily::LocalRecipient => "local_recipient",
            RecordFamily::ContactRecipient => "contact_recipient",
            RecordFamily::GroupRecipient => "group_recipient",
            RecordFamily::Chat => "chat",
            RecordFamily::ChatItem => "chat_item",
            RecordFamily::StickerPack => "sticker_pack",
            RecordFamily::AdHocCall => "ad_hoc_call",
            RecordFamily::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RecordFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// HEADER
// ============================================================================

/// First unit of every backup stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupHeader {
    /// Format version
    pub version: u64,
    /// Export time, Unix millis
    pub created_at_ms: u64,
    /// Version of the app that wrote the backup
    pub writer_app_version: String,
    /// First version of the app ever installed by the writer
    pub first_ever_app_version: String,
    /// Root key for attachment encryption
    pub media_root_key: Vec<u8>,
}

// ============================================================================
// FRAMES
// ============================================================================

/// Frame family tags on the wire.
pub mod tag {
    /// Account data frame
    pub const ACCOUNT: u8 = 1;
    /// Recipient frame (self, contact or group)
    pub const RECIPIENT: u8 = 2;
    /// Chat frame
    pub const CHAT: u8 = 3;
    /// Chat item frame
    pub const CHAT_ITEM: u8 = 4;
    /// Sticker pack frame
    pub const STICKER_PACK: u8 = 5;
    /// Ad-hoc call frame
    pub const AD_HOC_CALL: u8 = 6;
}

/// One record in the backup stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// `None` when the frame's tag is unknown to this reader
    pub item: Option<FrameItem>,
}

impl Frame {
    /// Wrap a known item.
    pub fn new(item: FrameItem) -> Self {
        Self { item: Some(item) }
    }

    /// A frame from a newer writer.
    pub fn unrecognized() -> Self {
        Self { item: None }
    }

    /// Family this frame restores into.
    pub fn family(&self) -> RecordFamily {
        self.item
            .as_ref()
            .map(FrameItem::family)
            .unwrap_or(RecordFamily::Unknown)
    }
}

/// The typed payload of a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FrameItem {
    /// Account data
    Account(AccountDataProto),
    /// Recipient
    Recipient(RecipientProto),
    /// Chat
    Chat(ChatProto),
    /// Chat item
    ChatItem(ChatItemProto),
    /// Sticker pack
    StickerPack(StickerPackProto),
    /// Ad-hoc call
    AdHocCall(AdHocCallProto),
}

impl FrameItem {
    /// Wire tag for this item.
    pub fn tag(&self) -> u8 {
        match self {
            FrameItem::Account(_) => tag::ACCOUNT,
            FrameItem::Recipient(_) => tag::RECIPIENT,
            FrameItem::Chat(_) => tag::CHAT,
            FrameItem::ChatItem(_) => tag::CHAT_ITEM,
            FrameItem::StickerPack(_) => tag::STICKER_PACK,
            FrameItem::AdHocCall(_) => tag::AD_HOC_CALL,
        }
    }

    /// Family for dispatch. Recipients split by destination.
    pub fn family(&self) -> RecordFamily {
        match self {
            FrameItem::Account(_) => RecordFamily::AccountData,
            FrameItem::Recipient(r) => match RecipientDestination::from_code(r.destination) {
                Some(RecipientDestination::SelfRecipient) => RecordFamily::LocalRecipient,
                Some(RecipientDestination::Contact) => RecordFamily::ContactRecipient,
                Some(RecipientDestination::Group) => RecordFamily::GroupRecipient,
                None => RecordFamily::Unknown,
            },
            FrameItem::Chat(_) => RecordFamily::Chat,
            FrameItem::ChatItem(_) => RecordFamily::ChatItem,
            FrameItem::StickerPack(_) => RecordFamily::StickerPack,
            FrameItem::AdHocCall(_) => RecordFamily::AdHocCall,
        }
    }

    /// Short id for log lines. Never includes content.
    pub fn id_log_string(&self) -> String {
        match self {
            FrameItem::Account(_) => "account".to_string(),
            FrameItem::Recipient(r) => RecipientId(r.id).to_string(),
            FrameItem::Chat(c) => ChatId(c.id).to_string(),
            FrameItem::ChatItem(i) => format!("{}/{}", ChatId(i.chat_id), i.date_sent_ms),
            FrameItem::StickerPack(p) => format!("sticker_pack:{}", hex::encode(&p.pack_id)),
            FrameItem::AdHocCall(c) => format!("call:{}", c.call_id),
        }
    }
}

// ============================================================================
// ACCOUNT
// ============================================================================

/// The local account.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountDataProto {
    /// 32-byte profile key
    pub profile_key: Vec<u8>,
    /// Profile given name
    pub given_name: String,
    /// Profile family name
    pub family_name: Option<String>,
    /// Username, if one is set
    pub username: Option<String>,
    /// Remote avatar path
    pub avatar_url_path: Option<String>,
    /// Send read receipts
    pub read_receipts: bool,
    /// Send typing indicators
    pub typing_indicators: bool,
    /// Default disappearing-message timer for new chats
    pub universal_expire_timer_secs: u32,
}

// ============================================================================
// RECIPIENTS
// ============================================================================

/// Case codes of [`RecipientProto::destination`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientDestination {
    /// The local user
    SelfRecipient,
    /// A contact
    Contact,
    /// A group
    Group,
}

impl RecipientDestination {
    /// Decode a case code; `None` for codes from a newer writer.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::SelfRecipient),
            2 => Some(Self::Contact),
            3 => Some(Self::Group),
            _ => None,
        }
    }

    /// Wire code
    pub fn code(self) -> u32 {
        match self {
            Self::SelfRecipient => 1,
            Self::Contact => 2,
            Self::Group => 3,
        }
    }
}

/// A recipient, referenced from later frames by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecipientProto {
    /// Pass-scoped id
    pub id: u64,
    /// [`RecipientDestination`] code
    pub destination: u32,
    /// Set when `destination` is a contact
    pub contact: Option<ContactProto>,
    /// Set when `destination` is a group
    pub group: Option<GroupProto>,
}

/// Contact payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContactProto {
    /// 16-byte service id
    pub aci: Option<Vec<u8>>,
    /// Phone number, E164 digits
    pub e164: Option<u64>,
    /// 32-byte profile key
    pub profile_key: Option<Vec<u8>>,
    /// Profile given name
    pub given_name: Option<String>,
    /// Profile family name
    pub family_name: Option<String>,
    /// Blocked by the local user
    pub blocked: bool,
    /// Hidden from the contact list
    pub hidden: bool,
    /// Local profile is shared with this contact
    pub profile_sharing: bool,
    /// Remote avatar path
    pub avatar_url_path: Option<String>,
}

/// Group payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupProto {
    /// 32-byte group master key
    pub master_key: Vec<u8>,
    /// Group title
    pub title: String,
    /// Local user accepted the group
    pub whitelisted: bool,
    /// Blocked by the local user
    pub blocked: bool,
    /// Remote avatar path
    pub avatar_url_path: Option<String>,
}

// ============================================================================
// CHATS
// ============================================================================

/// A conversation with one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChatProto {
    /// Pass-scoped id
    pub id: u64,
    /// Recipient the chat is with
    pub recipient_id: u64,
    /// Archived by the user
    pub archived: bool,
    /// Pin position; 0 is unpinned
    pub pinned_order: u32,
    /// Muted until, Unix millis; 0 is not muted
    pub mute_until_ms: u64,
    /// Disappearing-message timer
    pub expire_timer_ms: u64,
    /// Manually marked unread
    pub marked_unread: bool,
}

// ============================================================================
// CHAT ITEMS
// ============================================================================

/// Case codes of [`ChatItemProto::direction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatItemDirection {
    /// Received from a contact
    Incoming,
    /// Sent by the local user
    Outgoing,
    /// Neither (updates)
    Directionless,
}

impl ChatItemDirection {
    /// Decode a case code; `None` for codes from a newer writer.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Incoming),
            2 => Some(Self::Outgoing),
            3 => Some(Self::Directionless),
            _ => None,
        }
    }

    /// Wire code, also the `interactions.direction` column value
    pub fn code(self) -> u32 {
        match self {
            Self::Incoming => 1,
            Self::Outgoing => 2,
            Self::Directionless => 3,
        }
    }
}

/// Case codes of [`ChatItemProto::item`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatItemKind {
    /// Text message with optional quote and reactions
    Standard,
    /// Simple chat update
    Update,
}

impl ChatItemKind {
    /// Decode a case code; `None` for codes from a newer writer.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Standard),
            2 => Some(Self::Update),
            _ => None,
        }
    }

    /// Wire code
    pub fn code(self) -> u32 {
        match self {
            Self::Standard => 1,
            Self::Update => 2,
        }
    }
}

/// Known codes of [`SimpleUpdateProto::kind`].
pub mod update_kind {
    /// The chat was joined
    pub const JOINED: u32 = 1;
    /// Safety number changed
    pub const IDENTITY_CHANGED: u32 = 2;
    /// Disappearing-message timer changed
    pub const EXPIRE_TIMER_CHANGED: u32 = 3;
    /// Missed call
    pub const MISSED_CALL: u32 = 4;

    /// Whether this reader knows `kind`.
    pub fn is_known(kind: u32) -> bool {
        (JOINED..=MISSED_CALL).contains(&kind)
    }
}

/// One message or update.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChatItemProto {
    /// Chat the item belongs to
    pub chat_id: u64,
    /// Recipient who authored the item
    pub author_id: u64,
    /// Sent time, Unix millis
    pub date_sent_ms: u64,
    /// Disappearing timer start, Unix millis
    pub expire_start_ms: Option<u64>,
    /// Disappearing timer duration
    pub expires_in_ms: Option<u64>,
    /// [`ChatItemDirection`] code
    pub direction: u32,
    /// Set when incoming
    pub incoming: Option<IncomingDetails>,
    /// [`ChatItemKind`] code
    pub item: u32,
    /// Set for standard messages
    pub standard: Option<StandardMessageProto>,
    /// Set for updates
    pub update: Option<SimpleUpdateProto>,
}

/// Details only incoming items carry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IncomingDetails {
    /// Received time, Unix millis
    pub date_received_ms: u64,
    /// Read by the local user
    pub read: bool,
}

/// A regular text message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StandardMessageProto {
    /// Message text
    pub body: Option<String>,
    /// Quoted message
    pub quote: Option<QuoteProto>,
    /// Emoji reactions
    pub reactions: Vec<ReactionProto>,
}

/// Reference to an earlier message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuoteProto {
    /// Sent time of the quoted message
    pub target_sent_ms: Option<u64>,
    /// Author of the quoted message, if it was known to the writer
    pub author_id: Option<u64>,
    /// Quoted text
    pub text: Option<String>,
}

/// One reaction on a message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReactionProto {
    /// Recipient who reacted
    pub author_id: u64,
    /// Emoji
    pub emoji: String,
    /// Reaction time, Unix millis
    pub sent_ms: u64,
}

/// A simple chat update.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SimpleUpdateProto {
    /// Code from [`update_kind`]
    pub kind: u32,
}

// ============================================================================
// STICKERS & CALLS
// ============================================================================

/// An installed sticker pack.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StickerPackProto {
    /// 16-byte pack id
    pub pack_id: Vec<u8>,
    /// 32-byte pack key
    pub pack_key: Vec<u8>,
}

/// Known codes of [`AdHocCallProto::state`].
pub mod call_state {
    /// Call happened, local user did not join
    pub const GENERIC: u32 = 1;
    /// Local user joined the call
    pub const JOINED: u32 = 2;

    /// Whether this reader knows `state`.
    pub fn is_known(state: u32) -> bool {
        matches!(state, GENERIC | JOINED)
    }
}

/// A group call record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AdHocCallProto {
    /// Call id
    pub call_id: u64,
    /// Group the call belongs to
    pub recipient_id: u64,
    /// Code from [`call_state`]
    pub state: u32,
    /// Call time, Unix millis
    pub call_timestamp_ms: u64,
}
