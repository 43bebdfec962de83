//! Groups.

use super::{mismatched_item, RecordArchiver};
use crate::archive::bench::BenchBucket;
use crate::archive::context::{
    ArchivingContext, DeferredAction, RecipientAddress, RestoredRecipient, RestoringContext,
};
use crate::archive::errors::{RecordError, RecordErrorKind};
use crate::archive::results::{ArchiveResult, FamilyStats, RestoreFrameResult};
use crate::error::Result;
use crate::proto::{
    Frame, FrameItem, GroupProto, RecipientDestination, RecipientId, RecipientProto, RecordFamily,
};
use crate::storage::{AvatarTarget, GroupRecord};

const MASTER_KEY_LEN: usize = 32;

/// Archives groups.
#[derive(Debug, Default)]
pub struct GroupArchiver;

impl RecordArchiver for GroupArchiver {
    fn family(&self) -> RecordFamily {
        RecordFamily::GroupRecipient
    }

    fn archive_all(&self, ctx: &mut ArchivingContext<'_>) -> Result<ArchiveResult<FamilyStats>> {
        let family = self.family();
        let store = ctx.store;
        let mut stats = FamilyStats::default();

        let mut fetch = ctx.bencher.start();
        store.for_each_group(|group| {
            ctx.bencher.record_enumeration(family, fetch);
            ctx.check_cancelled()?;

            let timer = ctx.bencher.start();
            let id = ctx.mint_recipient_id(RecipientAddress::Group(group.id));
            ctx.write_frame(&Frame::new(FrameItem::Recipient(RecipientProto {
                id: id.0,
                destination: RecipientDestination::Group.code(),
                contact: None,
                group: Some(GroupProto {
                    master_key: group.master_key,
                    title: group.title,
                    whitelisted: group.whitelisted,
                    blocked: group.blocked,
                    avatar_url_path: group.avatar_url_path,
                }),
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
        let FrameItem::Recipient(recipient) = item else {
            return mismatched_item(family, item);
        };
        let id = RecipientId(recipient.id);
        let fail = |kind| {
            RestoreFrameResult::failure(RecordError::new(kind, family, id.to_string()))
        };

        let Some(group) = &recipient.group else {
            return fail(RecordErrorKind::MissingRequiredField("group"));
        };
        if ctx.has_recipient(id) {
            return fail(RecordErrorKind::DuplicateId(id.to_string()));
        }
        if group.master_key.len() != MASTER_KEY_LEN {
            return fail(RecordErrorKind::InvalidFieldLength {
                field: "master_key",
                len: group.master_key.len(),
            });
        }

        let record = GroupRecord {
            id: 0,
            master_key: group.master_key.clone(),
            title: group.title.clone(),
            whitelisted: group.whitelisted,
            blocked: group.blocked,
            avatar_url_path: group.avatar_url_path.clone(),
        };
        let row = match ctx.store.insert_group(&record) {
            Ok(row) => row,
            Err(e) => return fail(e.into()),
        };
        ctx.map_recipient(id, RestoredRecipient::Group(row));

        if record.avatar_url_path.is_some() {
            ctx.deferred.push(DeferredAction::EnqueueAvatarFetch {
                target: AvatarTarget::Group(row),
            });
        }
        RestoreFrameResult::Success(())
    }
}
