//! Account data: the single always-fatal record family.

use super::{mismatched_item, RecordArchiver};
use crate::archive::bench::BenchBucket;
use crate::archive::context::{ArchivingContext, DeferredAction, RestoringContext};
use crate::archive::errors::{LoggableErrorAndProto, RecordError, RecordErrorKind};
use crate::archive::results::{ArchiveResult, FamilyStats, RestoreFrameResult};
use crate::error::Result;
use crate::proto::{AccountDataProto, Frame, FrameItem, RecordFamily};
use crate::storage::{AccountRecord, AvatarTarget};

const PROFILE_KEY_LEN: usize = 32;
const ID: &str = "account";

/// Archives the local account's profile and settings.
#[derive(Debug, Default)]
pub struct AccountDataArchiver;

impl RecordArchiver for AccountDataArchiver {
    fn family(&self) -> RecordFamily {
        RecordFamily::AccountData
    }

    fn archive_all(&self, ctx: &mut ArchivingContext<'_>) -> Result<ArchiveResult<FamilyStats>> {
        ctx.check_cancelled()?;

        let timer = ctx.bencher.start();
        let account = ctx.store.account()?;
        ctx.bencher.record_enumeration(self.family(), timer);

        let Some(account) = account else {
            return Ok(ArchiveResult::CompleteFailure(LoggableErrorAndProto::dropped(
                RecordError::new(RecordErrorKind::MissingAccountData, self.family(), ID),
                None,
            )));
        };

        let timer = ctx.bencher.start();
        let frame = Frame::new(FrameItem::Account(AccountDataProto {
            profile_key: account.profile_key,
            given_name: account.given_name,
            family_name: account.family_name,
            username: account.username,
            avatar_url_path: account.avatar_url_path,
            read_receipts: account.read_receipts,
            typing_indicators: account.typing_indicators,
            universal_expire_timer_secs: account.universal_expire_timer_secs,
        }));
        ctx.write_frame(&frame)?;
        ctx.bencher.record_frame(BenchBucket::family(self.family()), timer);

        Ok(ArchiveResult::Success(FamilyStats {
            written: 1,
            ..FamilyStats::default()
        }))
    }

    fn restore(&self, item: &FrameItem, ctx: &mut RestoringContext<'_>) -> RestoreFrameResult<()> {
        let FrameItem::Account(account) = item else {
            return mismatched_item(self.family(), item);
        };
        let fail = |kind| {
            RestoreFrameResult::failure(RecordError::new(kind, RecordFamily::AccountData, ID))
        };

        if ctx.account_restored {
            return fail(RecordErrorKind::DuplicateId(ID.to_string()));
        }
        if account.profile_key.len() != PROFILE_KEY_LEN {
            return fail(RecordErrorKind::InvalidFieldLength {
                field: "profile_key",
                len: account.profile_key.len(),
            });
        }

        let record = AccountRecord {
            profile_key: account.profile_key.clone(),
            given_name: account.given_name.clone(),
            family_name: account.family_name.clone(),
            username: account.username.clone(),
            avatar_url_path: account.avatar_url_path.clone(),
            read_receipts: account.read_receipts,
            typing_indicators: account.typing_indicators,
            universal_expire_timer_secs: account.universal_expire_timer_secs,
            media_root_key: None,
        };
        if let Err(e) = ctx.store.upsert_account(&record) {
            return fail(e.into());
        }
        ctx.account_restored = true;

        if account.avatar_url_path.is_some() {
            ctx.deferred.push(DeferredAction::EnqueueAvatarFetch {
                target: AvatarTarget::Local,
            });
        }
        RestoreFrameResult::Success(())
    }
}
