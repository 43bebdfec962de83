//! Typed queries over one connection or transaction.
//!
//! Enumeration is row-by-row through a callback, so a family with a
//! million rows never materializes more than one record at a time.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Error, Result};
use crate::storage::schema::ENUMERABLE_TABLES;

// ============================================================================
// RECORDS
// ============================================================================

/// The local account row
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccountRecord {
    /// 32-byte profile key
    pub profile_key: Vec<u8>,
    /// Profile given name
    pub given_name: String,
    /// Profile family name
    pub family_name: Option<String>,
    /// Username
    pub username: Option<String>,
    /// Remote avatar path
    pub avatar_url_path: Option<String>,
    /// Send read receipts
    pub read_receipts: bool,
    /// Send typing indicators
    pub typing_indicators: bool,
    /// Default disappearing-message timer
    pub universal_expire_timer_secs: u32,
    /// Attachment root key
    pub media_root_key: Option<Vec<u8>>,
}

/// A contact row
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContactRecord {
    /// Row id (ignored on insert)
    pub id: i64,
    /// 16-byte service id
    pub aci: Option<Vec<u8>>,
    /// Phone number
    pub e164: Option<i64>,
    /// 32-byte profile key
    pub profile_key: Option<Vec<u8>>,
    /// Profile given name
    pub given_name: Option<String>,
    /// Profile family name
    pub family_name: Option<String>,
    /// Blocked
    pub blocked: bool,
    /// Hidden
    pub hidden: bool,
    /// Profile shared
    pub profile_sharing: bool,
    /// Remote avatar path
    pub avatar_url_path: Option<String>,
}

/// A group row
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupRecord {
    /// Row id (ignored on insert)
    pub id: i64,
    /// 32-byte master key
    pub master_key: Vec<u8>,
    /// Title
    pub title: String,
    /// Accepted by the local user
    pub whitelisted: bool,
    /// Blocked
    pub blocked: bool,
    /// Remote avatar path
    pub avatar_url_path: Option<String>,
}

/// Who a thread is with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadPeer {
    /// A contact row
    Contact(i64),
    /// A group row
    Group(i64),
    /// The local user
    NoteToSelf,
}

/// A thread row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRecord {
    /// Row id (ignored on insert)
    pub id: i64,
    /// Peer
    pub peer: ThreadPeer,
    /// Archived
    pub archived: bool,
    /// Pin position
    pub pinned_order: Option<u32>,
    /// Muted until, Unix millis
    pub muted_until_ms: i64,
    /// Disappearing-message timer
    pub expire_timer_ms: i64,
    /// Manually marked unread
    pub marked_unread: bool,
    /// Newest interaction (derived)
    pub last_interaction_id: Option<i64>,
    /// Unread incoming interactions (derived)
    pub unread_count: i64,
}

impl ThreadRecord {
    /// A fresh thread with default settings
    pub fn new(peer: ThreadPeer) -> Self {
        Self {
            id: 0,
            peer,
            archived: false,
            pinned_order: None,
            muted_until_ms: 0,
            expire_timer_ms: 0,
            marked_unread: false,
            last_interaction_id: None,
            unread_count: 0,
        }
    }
}

/// Author of an interaction, quote or reaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthorRef {
    /// The local user
    Local,
    /// A contact row
    Contact(i64),
}

impl AuthorRef {
    fn from_column(contact_id: Option<i64>) -> Self {
        contact_id.map(AuthorRef::Contact).unwrap_or(AuthorRef::Local)
    }

    fn contact_id(self) -> Option<i64> {
        match self {
            AuthorRef::Local => None,
            AuthorRef::Contact(id) => Some(id),
        }
    }
}

/// A quote attached to an interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRecord {
    /// Sent time of the quoted message
    pub sent_at_ms: Option<i64>,
    /// Quoted author, if known
    pub author: Option<AuthorRef>,
    /// Quoted text
    pub text: Option<String>,
}

/// An interaction row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionRecord {
    /// Row id (ignored on insert)
    pub id: i64,
    /// Owning thread
    pub thread_id: i64,
    /// Author
    pub author: AuthorRef,
    /// Direction code
    pub direction: u32,
    /// Sent time, Unix millis
    pub sent_at_ms: i64,
    /// Received time, Unix millis
    pub received_at_ms: Option<i64>,
    /// Read by the local user
    pub read: bool,
    /// Text
    pub body: Option<String>,
    /// Quote
    pub quote: Option<QuoteRecord>,
    /// Update kind for update items
    pub update_kind: Option<u32>,
    /// Disappearing timer duration
    pub expires_in_ms: i64,
    /// Disappearing timer start
    pub expire_started_at_ms: i64,
}

/// A reaction row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionRecord {
    /// Row id (ignored on insert)
    pub id: i64,
    /// Reacted-to interaction
    pub interaction_id: i64,
    /// Who reacted
    pub author: AuthorRef,
    /// Emoji
    pub emoji: String,
    /// Reaction time
    pub sent_at_ms: i64,
}

/// A sticker pack row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StickerPackRecord {
    /// 16-byte pack id
    pub pack_id: Vec<u8>,
    /// 32-byte pack key
    pub pack_key: Vec<u8>,
    /// Install time
    pub installed_at_ms: i64,
}

/// A call record row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    /// Row id (ignored on insert)
    pub id: i64,
    /// Call id
    pub call_id: i64,
    /// Group row
    pub group_id: i64,
    /// State code
    pub state: u32,
    /// Call time
    pub call_timestamp_ms: i64,
}

/// Whose avatar to fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AvatarTarget {
    /// The local account
    Local,
    /// A contact row
    Contact(i64),
    /// A group row
    Group(i64),
}

// ============================================================================
// ROW MAPPERS
// ============================================================================

fn contact_from_row(row: &Row<'_>) -> rusqlite::Result<ContactRecord> {
    Ok(ContactRecord {
        id: row.get(0)?,
        aci: row.get(1)?,
        e164: row.get(2)?,
        profile_key: row.get(3)?,
        given_name: row.get(4)?,
        family_name: row.get(5)?,
        blocked: row.get(6)?,
        hidden: row.get(7)?,
        profile_sharing: row.get(8)?,
        avatar_url_path: row.get(9)?,
    })
}

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<GroupRecord> {
    Ok(GroupRecord {
        id: row.get(0)?,
        master_key: row.get(1)?,
        title: row.get(2)?,
        whitelisted: row.get(3)?,
        blocked: row.get(4)?,
        avatar_url_path: row.get(5)?,
    })
}

fn thread_from_row(row: &Row<'_>) -> rusqlite::Result<ThreadRecord> {
    let contact_id: Option<i64> = row.get(1)?;
    let group_id: Option<i64> = row.get(2)?;
    let note_to_self: bool = row.get(3)?;
    let peer = match (contact_id, group_id, note_to_self) {
        (Some(id), None, false) => ThreadPeer::Contact(id),
        (None, Some(id), false) => ThreadPeer::Group(id),
        (None, None, true) => ThreadPeer::NoteToSelf,
        _ => {
            return Err(rusqlite::Error::IntegralValueOutOfRange(1, contact_id.unwrap_or(-1)));
        }
    };
    Ok(ThreadRecord {
        id: row.get(0)?,
        peer,
        archived: row.get(4)?,
        pinned_order: row.get(5)?,
        muted_until_ms: row.get(6)?,
        expire_timer_ms: row.get(7)?,
        marked_unread: row.get(8)?,
        last_interaction_id: row.get(9)?,
        unread_count: row.get(10)?,
    })
}

fn interaction_from_row(row: &Row<'_>) -> rusqlite::Result<InteractionRecord> {
    let quote_sent_at_ms: Option<i64> = row.get(8)?;
    let quote_author_contact_id: Option<i64> = row.get(9)?;
    let quote_author_is_local: bool = row.get(10)?;
    let quote_text: Option<String> = row.get(11)?;
    let has_quote =
        quote_sent_at_ms.is_some() || quote_author_contact_id.is_some() || quote_author_is_local
            || quote_text.is_some();
    let quote = has_quote.then(|| QuoteRecord {
        sent_at_ms: quote_sent_at_ms,
        author: match (quote_author_contact_id, quote_author_is_local) {
            (Some(id), _) => Some(AuthorRef::Contact(id)),
            (None, true) => Some(AuthorRef::Local),
            (None, false) => None,
        },
        text: quote_text,
    });

    Ok(InteractionRecord {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        author: AuthorRef::from_column(row.get(2)?),
        direction: row.get(3)?,
        sent_at_ms: row.get(4)?,
        received_at_ms: row.get(5)?,
        read: row.get(6)?,
        body: row.get(7)?,
        quote,
        update_kind: row.get(12)?,
        expires_in_ms: row.get(13)?,
        expire_started_at_ms: row.get(14)?,
    })
}

fn reaction_from_row(row: &Row<'_>) -> rusqlite::Result<ReactionRecord> {
    let contact_id: Option<i64> = row.get(2)?;
    let is_local: bool = row.get(3)?;
    Ok(ReactionRecord {
        id: row.get(0)?,
        interaction_id: row.get(1)?,
        author: if is_local {
            AuthorRef::Local
        } else {
            AuthorRef::from_column(contact_id)
        },
        emoji: row.get(4)?,
        sent_at_ms: row.get(5)?,
    })
}

const CONTACT_COLUMNS: &str = "id, aci, e164, profile_key, given_name, family_name, blocked, \
    hidden, profile_sharing, avatar_url_path";
const GROUP_COLUMNS: &str = "id, master_key, title, whitelisted, blocked, avatar_url_path";
const THREAD_COLUMNS: &str = "id, contact_id, group_id, is_note_to_self, archived, pinned_order, \
    muted_until_ms, expire_timer_ms, marked_unread, last_interaction_id, unread_count";
const INTERACTION_COLUMNS: &str = "id, thread_id, author_contact_id, direction, sent_at_ms, \
    received_at_ms, read, body, quote_sent_at_ms, quote_author_contact_id, quote_author_is_local, \
    quote_text, update_kind, expires_in_ms, expire_started_at_ms";

// ============================================================================
// STORE
// ============================================================================

/// Typed access to the conversation tables.
#[derive(Clone, Copy)]
pub struct Store<'c> {
    conn: &'c Connection,
}

impl<'c> Store<'c> {
    /// Wrap a connection or transaction
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// The underlying connection
    pub fn connection(&self) -> &'c Connection {
        self.conn
    }

    fn for_each<T>(
        &self,
        sql: &str,
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
        mut f: impl FnMut(T) -> Result<()>,
    ) -> Result<()> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            f(map(row)?)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Account
    // ------------------------------------------------------------------------

    /// The account row, if the account is registered
    pub fn account(&self) -> Result<Option<AccountRecord>> {
        self.conn
            .query_row(
                "SELECT profile_key, given_name, family_name, username, avatar_url_path,
                        read_receipts, typing_indicators, universal_expire_timer_secs,
                        media_root_key
                 FROM account_data WHERE id = 1",
                [],
                |row| {
                    Ok(AccountRecord {
                        profile_key: row.get(0)?,
                        given_name: row.get(1)?,
                        family_name: row.get(2)?,
                        username: row.get(3)?,
                        avatar_url_path: row.get(4)?,
                        read_receipts: row.get(5)?,
                        typing_indicators: row.get(6)?,
                        universal_expire_timer_secs: row.get(7)?,
                        media_root_key: row.get(8)?,
                    })
                },
            )
            .optional()
            .map_err(|e| Error::DatabaseError(format!("Failed to read account: {}", e)))
    }

    /// Insert or replace the account row
    pub fn upsert_account(&self, account: &AccountRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO account_data
                    (id, profile_key, given_name, family_name, username, avatar_url_path,
                     read_receipts, typing_indicators, universal_expire_timer_secs, media_root_key)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    account.profile_key,
                    account.given_name,
                    account.family_name,
                    account.username,
                    account.avatar_url_path,
                    account.read_receipts,
                    account.typing_indicators,
                    account.universal_expire_timer_secs,
                    account.media_root_key,
                ],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to store account: {}", e)))?;
        Ok(())
    }

    /// Set the account's media root key
    pub fn set_media_root_key(&self, key: &[u8]) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE account_data SET media_root_key = ?1 WHERE id = 1",
            params![key],
        )?;
        if updated == 0 {
            return Err(Error::AccountDataNotFound);
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Recipients
    // ------------------------------------------------------------------------

    /// Insert a contact; returns its row id
    pub fn insert_contact(&self, contact: &ContactRecord) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO contacts
                    (aci, e164, profile_key, given_name, family_name, blocked, hidden,
                     profile_sharing, avatar_url_path)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    contact.aci,
                    contact.e164,
                    contact.profile_key,
                    contact.given_name,
                    contact.family_name,
                    contact.blocked,
                    contact.hidden,
                    contact.profile_sharing,
                    contact.avatar_url_path,
                ],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to insert contact: {}", e)))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Visit every contact in row order
    pub fn for_each_contact(&self, f: impl FnMut(ContactRecord) -> Result<()>) -> Result<()> {
        let sql = format!("SELECT {} FROM contacts ORDER BY id", CONTACT_COLUMNS);
        self.for_each(&sql, contact_from_row, f)
    }

    /// Look up a contact by row id
    pub fn contact(&self, id: i64) -> Result<Option<ContactRecord>> {
        let sql = format!("SELECT {} FROM contacts WHERE id = ?1", CONTACT_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![id], contact_from_row)
            .optional()?)
    }

    /// Insert a group; returns its row id
    pub fn insert_group(&self, group: &GroupRecord) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO chat_groups (master_key, title, whitelisted, blocked, avatar_url_path)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    group.master_key,
                    group.title,
                    group.whitelisted,
                    group.blocked,
                    group.avatar_url_path,
                ],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to insert group: {}", e)))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Visit every group in row order
    pub fn for_each_group(&self, f: impl FnMut(GroupRecord) -> Result<()>) -> Result<()> {
        let sql = format!("SELECT {} FROM chat_groups ORDER BY id", GROUP_COLUMNS);
        self.for_each(&sql, group_from_row, f)
    }

    // ------------------------------------------------------------------------
    // Threads & interactions
    // ------------------------------------------------------------------------

    /// Insert a thread; returns its row id
    pub fn insert_thread(&self, thread: &ThreadRecord) -> Result<i64> {
        let (contact_id, group_id, note_to_self) = match thread.peer {
            ThreadPeer::Contact(id) => (Some(id), None, false),
            ThreadPeer::Group(id) => (None, Some(id), false),
            ThreadPeer::NoteToSelf => (None, None, true),
        };
        self.conn
            .execute(
                "INSERT INTO threads
                    (contact_id, group_id, is_note_to_self, archived, pinned_order,
                     muted_until_ms, expire_timer_ms, marked_unread, last_interaction_id,
                     unread_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    contact_id,
                    group_id,
                    note_to_self,
                    thread.archived,
                    thread.pinned_order,
                    thread.muted_until_ms,
                    thread.expire_timer_ms,
                    thread.marked_unread,
                    thread.last_interaction_id,
                    thread.unread_count,
                ],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to insert thread: {}", e)))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Visit every thread in row order
    pub fn for_each_thread(&self, f: impl FnMut(ThreadRecord) -> Result<()>) -> Result<()> {
        let sql = format!("SELECT {} FROM threads ORDER BY id", THREAD_COLUMNS);
        self.for_each(&sql, thread_from_row, f)
    }

    /// Look up a thread by row id
    pub fn thread(&self, id: i64) -> Result<Option<ThreadRecord>> {
        let sql = format!("SELECT {} FROM threads WHERE id = ?1", THREAD_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![id], thread_from_row)
            .optional()?)
    }

    /// Insert an interaction; returns its row id
    pub fn insert_interaction(&self, interaction: &InteractionRecord) -> Result<i64> {
        let quote = interaction.quote.as_ref();
        let quote_author = quote.and_then(|q| q.author);
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO interactions
                (thread_id, author_contact_id, direction, sent_at_ms, received_at_ms, read, body,
                 quote_sent_at_ms, quote_author_contact_id, quote_author_is_local, quote_text,
                 update_kind, expires_in_ms, expire_started_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        )?;
        stmt.execute(params![
            interaction.thread_id,
            interaction.author.contact_id(),
            interaction.direction,
            interaction.sent_at_ms,
            interaction.received_at_ms,
            interaction.read,
            interaction.body,
            quote.and_then(|q| q.sent_at_ms),
            quote_author.and_then(AuthorRef::contact_id),
            quote_author == Some(AuthorRef::Local),
            quote.and_then(|q| q.text.clone()),
            interaction.update_kind,
            interaction.expires_in_ms,
            interaction.expire_started_at_ms,
        ])
        .map_err(|e| Error::DatabaseError(format!("Failed to insert interaction: {}", e)))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Visit every interaction in row order
    pub fn for_each_interaction(
        &self,
        f: impl FnMut(InteractionRecord) -> Result<()>,
    ) -> Result<()> {
        let sql = format!("SELECT {} FROM interactions ORDER BY id", INTERACTION_COLUMNS);
        self.for_each(&sql, interaction_from_row, f)
    }

    /// Reactions on one interaction, oldest first
    pub fn reactions_for(&self, interaction_id: i64) -> Result<Vec<ReactionRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, interaction_id, author_contact_id, author_is_local, emoji, sent_at_ms
             FROM reactions WHERE interaction_id = ?1 ORDER BY sent_at_ms, id",
        )?;
        let rows = stmt.query_map(params![interaction_id], reaction_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Insert a reaction; returns its row id
    pub fn insert_reaction(&self, reaction: &ReactionRecord) -> Result<i64> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO reactions
                 (interaction_id, author_contact_id, author_is_local, emoji, sent_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        stmt.execute(params![
            reaction.interaction_id,
            reaction.author.contact_id(),
            reaction.author == AuthorRef::Local,
            reaction.emoji,
            reaction.sent_at_ms,
        ])
        .map_err(|e| Error::DatabaseError(format!("Failed to insert reaction: {}", e)))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Recompute the derived columns of one thread from its interactions
    pub fn recompute_thread_metadata(&self, thread_id: i64) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE threads SET
                last_interaction_id = (SELECT MAX(id) FROM interactions WHERE thread_id = ?1),
                unread_count = (SELECT COUNT(*) FROM interactions
                                WHERE thread_id = ?1 AND read = 0 AND direction = 1)
             WHERE id = ?1",
            params![thread_id],
        )?;
        if updated == 0 {
            return Err(Error::DatabaseError(format!("Thread {} not found", thread_id)));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Stickers & calls
    // ------------------------------------------------------------------------

    /// Insert a sticker pack
    pub fn insert_sticker_pack(&self, pack: &StickerPackRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sticker_packs (pack_id, pack_key, installed_at_ms) \
                 VALUES (?1, ?2, ?3)",
                params![pack.pack_id, pack.pack_key, pack.installed_at_ms],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to insert sticker pack: {}", e)))?;
        Ok(())
    }

    /// Visit every sticker pack in install order
    pub fn for_each_sticker_pack(
        &self,
        f: impl FnMut(StickerPackRecord) -> Result<()>,
    ) -> Result<()> {
        self.for_each(
            "SELECT pack_id, pack_key, installed_at_ms FROM sticker_packs \
             ORDER BY installed_at_ms, pack_id",
            |row| {
                Ok(StickerPackRecord {
                    pack_id: row.get(0)?,
                    pack_key: row.get(1)?,
                    installed_at_ms: row.get(2)?,
                })
            },
            f,
        )
    }

    /// Insert a call record; returns its row id
    pub fn insert_call_record(&self, call: &CallRecord) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO call_records (call_id, group_id, state, call_timestamp_ms)
                 VALUES (?1, ?2, ?3, ?4)",
                params![call.call_id, call.group_id, call.state, call.call_timestamp_ms],
            )
            .map_err(|e| Error::DatabaseError(format!("Failed to insert call record: {}", e)))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Visit every call record in row order
    pub fn for_each_call_record(&self, f: impl FnMut(CallRecord) -> Result<()>) -> Result<()> {
        self.for_each(
            "SELECT id, call_id, group_id, state, call_timestamp_ms FROM call_records ORDER BY id",
            |row| {
                Ok(CallRecord {
                    id: row.get(0)?,
                    call_id: row.get(1)?,
                    group_id: row.get(2)?,
                    state: row.get(3)?,
                    call_timestamp_ms: row.get(4)?,
                })
            },
            f,
        )
    }

    // ------------------------------------------------------------------------
    // Post-restore queues
    // ------------------------------------------------------------------------

    /// Queue an avatar download
    pub fn enqueue_avatar_fetch(&self, target: AvatarTarget, now_ms: i64) -> Result<()> {
        let (contact_id, group_id, is_local) = match target {
            AvatarTarget::Local => (None, None, true),
            AvatarTarget::Contact(id) => (Some(id), None, false),
            AvatarTarget::Group(id) => (None, Some(id), false),
        };
        self.conn.execute(
            "INSERT INTO avatar_fetch_queue (contact_id, group_id, is_local, enqueued_at_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![contact_id, group_id, is_local, now_ms],
        )?;
        Ok(())
    }

    /// Queue a sticker pack download; re-queuing a pack is a no-op
    pub fn enqueue_sticker_download(
        &self,
        pack_id: &[u8],
        pack_key: &[u8],
        now_ms: i64,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO sticker_download_queue (pack_id, pack_key, enqueued_at_ms)
             VALUES (?1, ?2, ?3)",
            params![pack_id, pack_key, now_ms],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Key-value & counts
    // ------------------------------------------------------------------------

    /// Read a namespaced value
    pub fn kv_get(&self, collection: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM key_value WHERE collection = ?1 AND key = ?2",
                params![collection, key],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Write a namespaced value
    pub fn kv_set(&self, collection: &str, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO key_value (collection, key, value) VALUES (?1, ?2, ?3)",
            params![collection, key, value],
        )?;
        Ok(())
    }

    /// Row count of a table; works for any table in the schema
    pub fn count_rows(&self, table: &str) -> Result<u64> {
        let known = ENUMERABLE_TABLES.contains(&table)
            || matches!(
                table,
                "reactions" | "avatar_fetch_queue" | "sticker_download_queue" | "key_value"
            );
        if !known {
            return Err(Error::Internal(format!("Unknown table {}", table)));
        }
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::CREATE_TABLES;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(CREATE_TABLES).unwrap();
        conn
    }

    #[test]
    fn test_account_upsert_and_media_root_key() {
        let conn = conn();
        let store = Store::new(&conn);
        assert!(store.account().unwrap().is_none());
        assert_eq!(store.set_media_root_key(&[1; 32]), Err(Error::AccountDataNotFound));

        store
            .upsert_account(&AccountRecord {
                profile_key: vec![2; 32],
                given_name: "Ada".into(),
                ..Default::default()
            })
            .unwrap();
        store.set_media_root_key(&[1; 32]).unwrap();
        let account = store.account().unwrap().unwrap();
        assert_eq!(account.given_name, "Ada");
        assert_eq!(account.media_root_key, Some(vec![1; 32]));
    }

    #[test]
    fn test_interaction_quote_columns() {
        let conn = conn();
        let store = Store::new(&conn);
        let contact = store
            .insert_contact(&ContactRecord {
                e164: Some(15550100),
                ..Default::default()
            })
            .unwrap();
        let thread = store.insert_thread(&ThreadRecord::new(ThreadPeer::Contact(contact))).unwrap();
        let record = InteractionRecord {
            id: 0,
            thread_id: thread,
            author: AuthorRef::Local,
            direction: 2,
            sent_at_ms: 100,
            received_at_ms: None,
            read: true,
            body: Some("hi".into()),
            quote: Some(QuoteRecord {
                sent_at_ms: Some(50),
                author: Some(AuthorRef::Local),
                text: Some("earlier".into()),
            }),
            update_kind: None,
            expires_in_ms: 0,
            expire_started_at_ms: 0,
        };
        let id = store.insert_interaction(&record).unwrap();

        let mut seen = Vec::new();
        store
            .for_each_interaction(|i| {
                seen.push(i);
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![InteractionRecord { id, ..record }]);
    }

    #[test]
    fn test_recompute_thread_metadata() {
        let conn = conn();
        let store = Store::new(&conn);
        let contact = store.insert_contact(&ContactRecord::default()).unwrap();
        let thread = store.insert_thread(&ThreadRecord::new(ThreadPeer::Contact(contact))).unwrap();
        let mut last = 0;
        for (sent, read) in [(1, false), (2, true), (3, false)] {
            last = store
                .insert_interaction(&InteractionRecord {
                    id: 0,
                    thread_id: thread,
                    author: AuthorRef::Contact(contact),
                    direction: 1,
                    sent_at_ms: sent,
                    received_at_ms: Some(sent),
                    read,
                    body: Some("x".into()),
                    quote: None,
                    update_kind: None,
                    expires_in_ms: 0,
                    expire_started_at_ms: 0,
                })
                .unwrap();
        }
        store.recompute_thread_metadata(thread).unwrap();
        let record = store.thread(thread).unwrap().unwrap();
        assert_eq!(record.last_interaction_id, Some(last));
        assert_eq!(record.unread_count, 2);
        assert!(store.recompute_thread_metadata(999).is_err());
    }

    #[test]
    fn test_callback_error_stops_enumeration() {
        let conn = conn();
        let store = Store::new(&conn);
        for _ in 0..3 {
            store.insert_contact(&ContactRecord::default()).unwrap();
        }
        let mut visited = 0;
        let result = store.for_each_contact(|_| {
            visited += 1;
            Err(Error::Cancelled)
        });
        assert_eq!(result, Err(Error::Cancelled));
        assert_eq!(visited, 1);
    }

    #[test]
    fn test_count_rows_and_kv() {
        let conn = conn();
        let store = Store::new(&conn);
        store.insert_contact(&ContactRecord::default()).unwrap();
        assert_eq!(store.count_rows("contacts").unwrap(), 1);
        assert!(store.count_rows("sqlite_master; DROP TABLE contacts").is_err());

        assert_eq!(store.kv_get("c", "k").unwrap(), None);
        store.kv_set("c", "k", "v").unwrap();
        store.kv_set("c", "k", "w").unwrap();
        assert_eq!(store.kv_get("c", "k").unwrap(), Some("w".into()));
    }

    #[test]
    fn test_sticker_download_queue_dedups() {
        let conn = conn();
        let store = Store::new(&conn);
        store.enqueue_sticker_download(&[1; 16], &[2; 32], 5).unwrap();
        store.enqueue_sticker_download(&[1; 16], &[2; 32], 6).unwrap();
        assert_eq!(store.count_rows("sticker_download_queue").unwrap(), 1);
    }
}
