//! # Storage Module
//!
//! The conversation database the backup engine exports from and restores
//! into.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         STORAGE SYSTEM                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Database  ── Arc<Mutex<Connection>>, schema init, write passes         │
//! │     │                                                                   │
//! │     └──► Store<'c>  ── typed rows over a connection or transaction      │
//! │                                                                         │
//! │  Tables:                                                                │
//! │  • account_data - profile, settings, media root key                     │
//! │  • contacts / chat_groups - recipients                                  │
//! │  • threads / interactions / reactions - conversations                   │
//! │  • sticker_packs / call_records                                         │
//! │  • avatar_fetch_queue / sticker_download_queue - post-restore work      │
//! │  • key_value - restore state, stored error reports                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod database;
pub mod schema;
mod store;

pub use database::Database;
pub use store::{
    AccountRecord, AuthorRef, AvatarTarget, CallRecord, ContactRecord, GroupRecord,
    InteractionRecord, QuoteRecord, ReactionRecord, StickerPackRecord, Store, ThreadPeer,
    ThreadRecord,
};
