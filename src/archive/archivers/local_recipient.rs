//! The local user as a recipient.

use super::{mismatched_item, RecordArchiver};
use crate::archive::bench::BenchBucket;
use crate::archive::context::{
    ArchivingContext, RecipientAddress, RestoredRecipient, RestoringContext,
};
use crate::archive::errors::{RecordError, RecordErrorKind};
use crate::archive::results::{ArchiveResult, FamilyStats, RestoreFrameResult};
use crate::error::Result;
use crate::proto::{
    Frame, FrameItem, RecipientDestination, RecipientId, RecipientProto, RecordFamily,
};

/// Writes the single self-recipient frame other frames use to refer to the
/// local user.
#[derive(Debug, Default)]
pub struct LocalRecipientArchiver;

impl RecordArchiver for LocalRecipientArchiver {
    fn family(&self) -> RecordFamily {
        RecordFamily::LocalRecipient
    }

    fn archive_all(&self, ctx: &mut ArchivingContext<'_>) -> Result<ArchiveResult<FamilyStats>> {
        ctx.check_cancelled()?;

        let timer = ctx.bencher.start();
        let id = ctx.mint_recipient_id(RecipientAddress::LocalUser);
        ctx.write_frame(&Frame::new(FrameItem::Recipient(RecipientProto {
            id: id.0,
            destination: RecipientDestination::SelfRecipient.code(),
            contact: None,
            group: None,
        })))?;
        ctx.bencher.record_frame(BenchBucket::family(self.family()), timer);

        Ok(ArchiveResult::Success(FamilyStats {
            written: 1,
            ..FamilyStats::default()
        }))
    }

    fn restore(&self, item: &FrameItem, ctx: &mut RestoringContext<'_>) -> RestoreFrameResult<()> {
        let FrameItem::Recipient(recipient) = item else {
            return mismatched_item(self.family(), item);
        };
        let id = RecipientId(recipient.id);

        if let Some(existing) = ctx.local_recipient_id() {
            return RestoreFrameResult::failure(RecordError::new(
                RecordErrorKind::DuplicateId(existing.to_string()),
                self.family(),
                id.to_string(),
            ));
        }
        if !ctx.map_recipient(id, RestoredRecipient::Local) {
            return RestoreFrameResult::failure(RecordError::new(
                RecordErrorKind::DuplicateId(id.to_string()),
                self.family(),
                id.to_string(),
            ));
        }
        RestoreFrameResult::Success(())
    }
}
