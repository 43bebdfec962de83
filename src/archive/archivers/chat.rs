//! Chats (conversation threads).

use super::{mismatched_item, to_i64, to_u64, RecordArchiver};
use crate::archive::bench::BenchBucket;
use crate::archive::context::{
    ArchivingContext, DeferredAction, RecipientAddress, RestoredChat, RestoringContext,
};
use crate::archive::errors::{LoggableErrorAndProto, RecordError, RecordErrorKind};
use crate::archive::results::{ArchiveResult, FamilyStats, RestoreFrameResult};
use crate::error::Result;
use crate::proto::{ChatId, ChatProto, Frame, FrameItem, RecipientId, RecordFamily};
use crate::storage::ThreadRecord;

/// Archives threads. A thread whose peer was not exported is dropped.
#[derive(Debug, Default)]
pub struct ChatArchiver;

impl RecordArchiver for ChatArchiver {
    fn family(&self) -> RecordFamily {
        RecordFamily::Chat
    }

    fn archive_all(&self, ctx: &mut ArchivingContext<'_>) -> Result<ArchiveResult<FamilyStats>> {
        let family = self.family();
        let store = ctx.store;
        let mut stats = FamilyStats::default();
        let mut errors = Vec::new();

        let mut fetch = ctx.bencher.start();
        store.for_each_thread(|thread| {
            ctx.bencher.record_enumeration(family, fetch);
            ctx.check_cancelled()?;

            match ctx.recipient_id(RecipientAddress::from(thread.peer)) {
                Some(recipient_id) => {
                    let timer = ctx.bencher.start();
                    let id = ctx.mint_chat_id(thread.id);
                    ctx.write_frame(&Frame::new(FrameItem::Chat(ChatProto {
                        id: id.0,
                        recipient_id: recipient_id.0,
                        archived: thread.archived,
                        pinned_order: thread.pinned_order.unwrap_or(0),
                        mute_until_ms: to_u64(thread.muted_until_ms),
                        expire_timer_ms: to_u64(thread.expire_timer_ms),
                        marked_unread: thread.marked_unread,
                    })))?;
                    ctx.bencher.record_frame(BenchBucket::family(family), timer);
                    stats.written += 1;
                }
                None => {
                    errors.push(LoggableErrorAndProto::dropped(
                        RecordError::new(
                            RecordErrorKind::DanglingReference {
                                table: "threads",
                                row: thread.id,
                            },
                            family,
                            format!("thread:{}", thread.id),
                        ),
                        None,
                    ));
                    stats.dropped += 1;
                    ctx.did_skip_unit();
                }
            }

            fetch = ctx.bencher.start();
            Ok(())
        })?;

        Ok(ArchiveResult::from_errors(stats, errors))
    }

    fn restore(&self, item: &FrameItem, ctx: &mut RestoringContext<'_>) -> RestoreFrameResult<()> {
        let family = self.family();
        let FrameItem::Chat(chat) = item else {
            return mismatched_item(family, item);
        };
        let id = ChatId(chat.id);
        let fail = |kind| {
            RestoreFrameResult::failure(RecordError::new(kind, family, id.to_string()))
        };

        let recipient_id = RecipientId(chat.recipient_id);
        let Some(recipient) = ctx.recipient(recipient_id) else {
            return fail(RecordErrorKind::UnknownRecipient(recipient_id));
        };
        if ctx.has_chat(id) {
            return fail(RecordErrorKind::DuplicateId(id.to_string()));
        }
        let muted_until_ms = match to_i64("mute_until_ms", chat.mute_until_ms) {
            Ok(v) => v,
            Err(kind) => return fail(kind),
        };
        let expire_timer_ms = match to_i64("expire_timer_ms", chat.expire_timer_ms) {
            Ok(v) => v,
            Err(kind) => return fail(kind),
        };

        let record = ThreadRecord {
            archived: chat.archived,
            pinned_order: (chat.pinned_order > 0).then_some(chat.pinned_order),
            muted_until_ms,
            expire_timer_ms,
            marked_unread: chat.marked_unread,
            ..ThreadRecord::new(recipient.thread_peer())
        };
        let thread_row = match ctx.store.insert_thread(&record) {
            Ok(row) => row,
            Err(e) => return fail(e.into()),
        };
        ctx.map_chat(
            id,
            RestoredChat {
                thread_row,
                recipient,
            },
        );
        ctx.deferred
            .push(DeferredAction::RecomputeThreadMetadata { thread_id: thread_row });
        RestoreFrameResult::Success(())
    }
}
