//! # Database Schema
//!
//! SQL schema for the conversation database the backup engine reads from
//! and restores into.
//!
//! ## Schema Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         DATABASE SCHEMA                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐    ┌─────────────────┐      ┌─────────────────┐    │
//! │  │  account_data   │    │    contacts     │      │   chat_groups   │    │
//! │  ├─────────────────┤    ├─────────────────┤      ├─────────────────┤    │
//! │  │ profile_key     │    │ id              │◄─┐   │ id              │◄─┐ │
//! │  │ given_name      │    │ aci / e164      │  │   │ master_key      │  │ │
//! │  │ media_root_key  │    │ profile_key     │  │   │ title           │  │ │
//! │  └─────────────────┘    └─────────────────┘  │   └─────────────────┘  │ │
//! │                                              │                        │ │
//! │  ┌─────────────────┐    ┌─────────────────┐  │   ┌─────────────────┐  │ │
//! │  │  interactions   │───►│    threads      │──┴───│  call_records   │──┘ │
//! │  ├─────────────────┤    ├─────────────────┤      └─────────────────┘    │
//! │  │ thread_id       │    │ contact_id      │                             │
//! │  │ author_contact  │    │ group_id        │      ┌─────────────────┐    │
//! │  │ sent_at_ms      │    │ is_note_to_self │      │ sticker_packs   │    │
//! │  │ body / quote    │    │ last_interaction│      └─────────────────┘    │
//! │  └───────┬─────────┘    └─────────────────┘                             │
//! │          │              ┌─────────────────┐      ┌─────────────────┐    │
//! │          └─────────────►│   reactions     │      │   key_value     │    │
//! │                         └─────────────────┘      └─────────────────┘    │
//! │                                                                         │
//! │  Queues: avatar_fetch_queue, sticker_download_queue                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The secondary indexes on `interactions` and `reactions` are the ones a
//! restore drops and rebuilds.

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL to create all tables
pub const CREATE_TABLES: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- The local account (single row)
CREATE TABLE IF NOT EXISTS account_data (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    profile_key BLOB NOT NULL,
    given_name TEXT NOT NULL,
    family_name TEXT,
    username TEXT,
    avatar_url_path TEXT,
    read_receipts INTEGER NOT NULL DEFAULT 1,
    typing_indicators INTEGER NOT NULL DEFAULT 1,
    universal_expire_timer_secs INTEGER NOT NULL DEFAULT 0,
    media_root_key BLOB
);

-- Contacts
CREATE TABLE IF NOT EXISTS contacts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    aci BLOB UNIQUE,
    e164 INTEGER UNIQUE,
    profile_key BLOB,
    given_name TEXT,
    family_name TEXT,
    blocked INTEGER NOT NULL DEFAULT 0,
    hidden INTEGER NOT NULL DEFAULT 0,
    profile_sharing INTEGER NOT NULL DEFAULT 0,
    avatar_url_path TEXT
);

-- Groups
CREATE TABLE IF NOT EXISTS chat_groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    master_key BLOB NOT NULL UNIQUE,
    title TEXT NOT NULL,
    whitelisted INTEGER NOT NULL DEFAULT 0,
    blocked INTEGER NOT NULL DEFAULT 0,
    avatar_url_path TEXT
);

-- Conversation threads; exactly one of contact_id, group_id, is_note_to_self
CREATE TABLE IF NOT EXISTS threads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    contact_id INTEGER REFERENCES contacts(id),
    group_id INTEGER REFERENCES chat_groups(id),
    is_note_to_self INTEGER NOT NULL DEFAULT 0,
    archived INTEGER NOT NULL DEFAULT 0,
    pinned_order INTEGER,
    muted_until_ms INTEGER NOT NULL DEFAULT 0,
    expire_timer_ms INTEGER NOT NULL DEFAULT 0,
    marked_unread INTEGER NOT NULL DEFAULT 0,
    last_interaction_id INTEGER,
    unread_count INTEGER NOT NULL DEFAULT 0
);

-- Messages and updates; author_contact_id is NULL for the local user
CREATE TABLE IF NOT EXISTS interactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    thread_id INTEGER NOT NULL REFERENCES threads(id),
    author_contact_id INTEGER,
    direction INTEGER NOT NULL,
    sent_at_ms INTEGER NOT NULL,
    received_at_ms INTEGER,
    read INTEGER NOT NULL DEFAULT 0,
    body TEXT,
    quote_sent_at_ms INTEGER,
    quote_author_contact_id INTEGER,
    quote_author_is_local INTEGER NOT NULL DEFAULT 0,
    quote_text TEXT,
    update_kind INTEGER,
    expires_in_ms INTEGER NOT NULL DEFAULT 0,
    expire_started_at_ms INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_interactions_thread_sent
    ON interactions(thread_id, sent_at_ms);
CREATE INDEX IF NOT EXISTS idx_interactions_author
    ON interactions(author_contact_id);
CREATE INDEX IF NOT EXISTS idx_interactions_unread
    ON interactions(thread_id) WHERE read = 0;
CREATE INDEX IF NOT EXISTS idx_interactions_expiring
    ON interactions(expire_started_at_ms + expires_in_ms) WHERE expires_in_ms > 0;

-- Reactions on interactions; author_contact_id is NULL for the local user
CREATE TABLE IF NOT EXISTS reactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    interaction_id INTEGER NOT NULL REFERENCES interactions(id),
    author_contact_id INTEGER,
    author_is_local INTEGER NOT NULL DEFAULT 0,
    emoji TEXT NOT NULL,
    sent_at_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reactions_interaction
    ON reactions(interaction_id);

-- Installed sticker packs
CREATE TABLE IF NOT EXISTS sticker_packs (
    pack_id BLOB PRIMARY KEY,
    pack_key BLOB NOT NULL,
    installed_at_ms INTEGER NOT NULL
);

-- Group call records
CREATE TABLE IF NOT EXISTS call_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    call_id INTEGER NOT NULL,
    group_id INTEGER NOT NULL REFERENCES chat_groups(id),
    state INTEGER NOT NULL,
    call_timestamp_ms INTEGER NOT NULL,
    UNIQUE (call_id, group_id)
);

-- Avatars to download after a restore
CREATE TABLE IF NOT EXISTS avatar_fetch_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    contact_id INTEGER,
    group_id INTEGER,
    is_local INTEGER NOT NULL DEFAULT 0,
    enqueued_at_ms INTEGER NOT NULL
);

-- Sticker packs to download after a restore
CREATE TABLE IF NOT EXISTS sticker_download_queue (
    pack_id BLOB PRIMARY KEY,
    pack_key BLOB NOT NULL,
    enqueued_at_ms INTEGER NOT NULL
);

-- Namespaced settings and engine state
CREATE TABLE IF NOT EXISTS key_value (
    collection TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (collection, key)
);
"#;

/// Tables whose rows the export progress estimate counts
pub const ENUMERABLE_TABLES: &[&str] = &[
    "contacts",
    "chat_groups",
    "threads",
    "interactions",
    "sticker_packs",
    "call_records",
];

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_applies_cleanly_twice() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(CREATE_TABLES).unwrap();
        conn.execute_batch(CREATE_TABLES).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 12);
    }
}
