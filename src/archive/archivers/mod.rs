//! # Record Archivers
//!
//! One archiver per record family. Export pulls rows from the store and
//! writes frames; restore turns one frame into one outcome.
//!
//! ```text
//! ┌──────────────┬──────────────────────┬─────────────────────────────────┐
//! │ Family       │ Export source        │ Restore target                  │
//! ├──────────────┼──────────────────────┼─────────────────────────────────┤
//! │ account_data │ account_data         │ account_data (always fatal)     │
//! │ local_recip. │ identity             │ recipient table only            │
//! │ contact      │ contacts             │ contacts                        │
//! │ group        │ chat_groups          │ chat_groups                     │
//! │ chat         │ threads              │ threads                         │
//! │ chat_item    │ interactions (+rx)   │ interactions, reactions         │
//! │ sticker_pack │ sticker_packs        │ sticker_packs                   │
//! │ ad_hoc_call  │ call_records         │ call_records                    │
//! └──────────────┴──────────────────────┴─────────────────────────────────┘
//! ```

mod account;
mod ad_hoc_call;
mod chat;
mod chat_item;
mod contact;
mod group;
mod local_recipient;
mod registry;
mod sticker_pack;

pub use account::AccountDataArchiver;
pub use ad_hoc_call::AdHocCallArchiver;
pub use chat::ChatArchiver;
pub use chat_item::ChatItemArchiver;
pub use contact::ContactArchiver;
pub use group::GroupArchiver;
pub use local_recipient::LocalRecipientArchiver;
pub use registry::ArchiverRegistry;
pub use sticker_pack::StickerPackArchiver;

use super::context::{ArchivingContext, RestoringContext};
use super::errors::{RecordError, RecordErrorKind};
use super::results::{ArchiveResult, FamilyStats, RestoreFrameResult};
use crate::error::Result;
use crate::proto::{FrameItem, RecordFamily};

/// Converts one record family to frames and back.
pub trait RecordArchiver: Send + Sync {
    /// The family this archiver handles
    fn family(&self) -> RecordFamily;

    /// Write every record of the family.
    ///
    /// `Err` is reserved for stream, storage and cancellation failures,
    /// which end the pass. Record problems come back inside the result.
    fn archive_all(&self, ctx: &mut ArchivingContext<'_>) -> Result<ArchiveResult<FamilyStats>>;

    /// Restore one frame of this family
    fn restore(&self, item: &FrameItem, ctx: &mut RestoringContext<'_>) -> RestoreFrameResult<()>;

    /// Bench subtype for a frame of this family
    fn bench_subtype(&self, _item: &FrameItem) -> &'static str {
        "default"
    }
}

/// The frame does not carry this family's payload.
#[track_caller]
fn mismatched_item(family: RecordFamily, item: &FrameItem) -> RestoreFrameResult<()> {
    RestoreFrameResult::failure(RecordError::new(
        RecordErrorKind::MissingRequiredField(family.as_str()),
        family,
        item.id_log_string(),
    ))
}

/// Wire timestamps are u64; storage holds i64.
fn to_i64(field: &'static str, value: u64) -> std::result::Result<i64, RecordErrorKind> {
    i64::try_from(value).map_err(|_| RecordErrorKind::ValueOutOfRange {
        field,
        value: value as i128,
    })
}

/// Stored values below zero are written as zero.
fn to_u64(value: i64) -> u64 {
    value.max(0) as u64
}
