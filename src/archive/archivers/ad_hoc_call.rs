//! Ad-hoc (group) call records.

use super::{mismatched_item, to_i64, to_u64, RecordArchiver};
use crate::archive::bench::BenchBucket;
use crate::archive::context::{
    ArchivingContext, RecipientAddress, RestoredRecipient, RestoringContext,
};
use crate::archive::errors::{LoggableErrorAndProto, RecordError, RecordErrorKind};
use crate::archive::results::{ArchiveResult, FamilyStats, RestoreFrameResult};
use crate::error::Result;
use crate::proto::{call_state, AdHocCallProto, Frame, FrameItem, RecipientId, RecordFamily};
use crate::storage::CallRecord;

/// Archives call records attached to groups.
#[derive(Debug, Default)]
pub struct AdHocCallArchiver;

impl RecordArchiver for AdHocCallArchiver {
    fn family(&self) -> RecordFamily {
        RecordFamily::AdHocCall
    }

    fn archive_all(&self, ctx: &mut ArchivingContext<'_>) -> Result<ArchiveResult<FamilyStats>> {
        let family = self.family();
        let store = ctx.store;
        let mut stats = FamilyStats::default();
        let mut errors = Vec::new();

        let mut fetch = ctx.bencher.start();
        store.for_each_call_record(|call| {
            ctx.bencher.record_enumeration(family, fetch);
            ctx.check_cancelled()?;

            match ctx.recipient_id(RecipientAddress::Group(call.group_id)) {
                Some(recipient_id) => {
                    let timer = ctx.bencher.start();
                    ctx.write_frame(&Frame::new(FrameItem::AdHocCall(AdHocCallProto {
                        call_id: to_u64(call.call_id),
                        recipient_id: recipient_id.0,
                        state: call.state,
                        call_timestamp_ms: to_u64(call.call_timestamp_ms),
                    })))?;
                    ctx.bencher.record_frame(BenchBucket::family(family), timer);
                    stats.written += 1;
                }
                None => {
                    errors.push(LoggableErrorAndProto::dropped(
                        RecordError::new(
                            RecordErrorKind::DanglingReference {
                                table: "call_records",
                                row: call.id,
                            },
                            family,
                            format!("call:{}", call.call_id),
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
        let FrameItem::AdHocCall(call) = item else {
            return mismatched_item(family, item);
        };
        let error = |kind| RecordError::new(kind, family, item.id_log_string());
        let fail = |kind| RestoreFrameResult::failure(error(kind));

        let recipient_id = RecipientId(call.recipient_id);
        let group_id = match ctx.recipient(recipient_id) {
            Some(RestoredRecipient::Group(row)) => row,
            Some(_) => return fail(RecordErrorKind::RecipientNotGroup(recipient_id)),
            None => return fail(RecordErrorKind::UnknownRecipient(recipient_id)),
        };
        if !call_state::is_known(call.state) {
            return RestoreFrameResult::UnrecognizedEnum(error(RecordErrorKind::UnrecognizedEnum {
                field: "state",
                code: call.state,
            }));
        }
        let call_id = match to_i64("call_id", call.call_id) {
            Ok(v) => v,
            Err(kind) => return fail(kind),
        };
        let call_timestamp_ms = match to_i64("call_timestamp_ms", call.call_timestamp_ms) {
            Ok(v) => v,
            Err(kind) => return fail(kind),
        };

        let record = CallRecord {
            id: 0,
            call_id,
            group_id,
            state: call.state,
            call_timestamp_ms,
        };
        match ctx.store.insert_call_record(&record) {
            Ok(_) => RestoreFrameResult::Success(()),
            Err(e) => fail(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::GroupRecord;
    use crate::test_support::{identity, restoring, MemoryDb};

    fn call_frame(recipient_id: u64, state: u32) -> FrameItem {
        FrameItem::AdHocCall(AdHocCallProto {
            call_id: 55,
            recipient_id,
            state,
            call_timestamp_ms: 1_000,
        })
    }

    fn with_group(ctx: &mut RestoringContext<'_>) {
        let row = ctx
            .store
            .insert_group(&GroupRecord {
                master_key: vec![3; 32],
                title: "Team".into(),
                ..Default::default()
            })
            .unwrap();
        ctx.map_recipient(RecipientId(2), RestoredRecipient::Group(row));
        ctx.map_recipient(RecipientId(1), RestoredRecipient::Local);
    }

    #[test]
    fn test_restore_group_call() {
        let db = MemoryDb::new();
        let identity = identity();
        let mut ctx = restoring(&db, &identity);
        with_group(&mut ctx);
        assert!(AdHocCallArchiver
            .restore(&call_frame(2, call_state::GENERIC), &mut ctx)
            .is_restored());
        assert_eq!(ctx.store.count_rows("call_records").unwrap(), 1);
    }

    #[test]
    fn test_call_must_target_group() {
        let db = MemoryDb::new();
        let identity = identity();
        let mut ctx = restoring(&db, &identity);
        with_group(&mut ctx);
        let result = AdHocCallArchiver.restore(&call_frame(1, call_state::GENERIC), &mut ctx);
        assert!(matches!(
            result,
            RestoreFrameResult::Failure(ref errors)
                if errors[0].kind == RecordErrorKind::RecipientNotGroup(RecipientId(1))
        ));
    }

    #[test]
    fn test_unknown_state_is_unrecognized() {
        let db = MemoryDb::new();
        let identity = identity();
        let mut ctx = restoring(&db, &identity);
        with_group(&mut ctx);
        assert!(matches!(
            AdHocCallArchiver.restore(&call_frame(2, 77), &mut ctx),
            RestoreFrameResult::UnrecognizedEnum(_)
        ));
    }
}
