//! Installed sticker packs.

use super::{mismatched_item, RecordArchiver};
use crate::archive::bench::BenchBucket;
use crate::archive::context::{ArchivingContext, DeferredAction, RestoringContext};
use crate::archive::errors::{RecordError, RecordErrorKind};
use crate::archive::results::{ArchiveResult, FamilyStats, RestoreFrameResult};
use crate::error::Result;
use crate::proto::{Frame, FrameItem, RecordFamily, StickerPackProto};
use crate::storage::StickerPackRecord;

const PACK_ID_LEN: usize = 16;
const PACK_KEY_LEN: usize = 32;

/// Archives sticker packs. Pack contents are downloaded again after a
/// restore.
#[derive(Debug, Default)]
pub struct StickerPackArchiver;

impl RecordArchiver for StickerPackArchiver {
    fn family(&self) -> RecordFamily {
        RecordFamily::StickerPack
    }

    fn archive_all(&self, ctx: &mut ArchivingContext<'_>) -> Result<ArchiveResult<FamilyStats>> {
        let family = self.family();
        let store = ctx.store;
        let mut stats = FamilyStats::default();

        let mut fetch = ctx.bencher.start();
        store.for_each_sticker_pack(|pack| {
            ctx.bencher.record_enumeration(family, fetch);
            ctx.check_cancelled()?;

            let timer = ctx.bencher.start();
            ctx.write_frame(&Frame::new(FrameItem::StickerPack(StickerPackProto {
                pack_id: pack.pack_id,
                pack_key: pack.pack_key,
            })))?;
            ctx.bencher.record_frame(BenchBucket::family(family), timer);
            stats.written += 1;

            fetch = ctx.bencher.start();
            Ok(())
        })?;

        Ok(ArchiveResult::Success(stats))
    }

    fn restore(&self, item: &FrameItem, ctx: &mut RestoringContext<'_>) -> RestoreFrameResult<()> {
        let family = self.family();
        let FrameItem::StickerPack(pack) = item else {
            return mismatched_item(family, item);
        };
        let fail = |kind| {
            RestoreFrameResult::failure(RecordError::new(kind, family, item.id_log_string()))
        };

        if pack.pack_id.len() != PACK_ID_LEN {
            return fail(RecordErrorKind::InvalidFieldLength {
                field: "pack_id",
                len: pack.pack_id.len(),
            });
        }
        if pack.pack_key.len() != PACK_KEY_LEN {
            return fail(RecordErrorKind::InvalidFieldLength {
                field: "pack_key",
                len: pack.pack_key.len(),
            });
        }

        let record = StickerPackRecord {
            pack_id: pack.pack_id.clone(),
            pack_key: pack.pack_key.clone(),
            installed_at_ms: ctx.started_at_ms,
        };
        if let Err(e) = ctx.store.insert_sticker_pack(&record) {
            return fail(e.into());
        }
        ctx.deferred.push(DeferredAction::EnqueueStickerPackDownload {
            pack_id: record.pack_id,
            pack_key: record.pack_key,
        });
        RestoreFrameResult::Success(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{identity, restoring, MemoryDb};

    fn pack(id_len: usize, key_len: usize) -> FrameItem {
        FrameItem::StickerPack(StickerPackProto {
            pack_id: vec![1; id_len],
            pack_key: vec![2; key_len],
        })
    }

    #[test]
    fn test_restore_queues_download() {
        let db = MemoryDb::new();
        let identity = identity();
        let mut ctx = restoring(&db, &identity);
        assert!(StickerPackArchiver.restore(&pack(16, 32), &mut ctx).is_restored());
        assert_eq!(ctx.store.count_rows("sticker_packs").unwrap(), 1);
        assert_eq!(ctx.deferred.len(), 1);
    }

    #[test]
    fn test_bad_lengths_are_failures() {
        let db = MemoryDb::new();
        let identity = identity();
        let mut ctx = restoring(&db, &identity);
        assert!(!StickerPackArchiver.restore(&pack(15, 32), &mut ctx).is_restored());
        assert!(!StickerPackArchiver.restore(&pack(16, 31), &mut ctx).is_restored());
        assert!(ctx.deferred.is_empty());
    }

    #[test]
    fn test_duplicate_pack_is_failure() {
        let db = MemoryDb::new();
        let identity = identity();
        let mut ctx = restoring(&db, &identity);
        assert!(StickerPackArchiver.restore(&pack(16, 32), &mut ctx).is_restored());
        assert!(!StickerPackArchiver.restore(&pack(16, 32), &mut ctx).is_restored());
    }
}
