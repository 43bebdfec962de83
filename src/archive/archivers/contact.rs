//! Contacts.

use super::{mismatched_item, to_i64, RecordArchiver};
use crate::archive::bench::BenchBucket;
use crate::archive::context::{
    ArchivingContext, DeferredAction, RecipientAddress, RestoredRecipient, RestoringContext,
};
use crate::archive::errors::{RecordError, RecordErrorKind};
use crate::archive::results::{ArchiveResult, FamilyStats, RestoreFrameResult};
use crate::error::Result;
use crate::proto::{
    ContactProto, Frame, FrameItem, RecipientDestination, RecipientId, RecipientProto,
    RecordFamily,
};
use crate::storage::{AvatarTarget, ContactRecord};

const ACI_LEN: usize = 16;
const PROFILE_KEY_LEN: usize = 32;

/// Archives contacts. The local user's own contact row, if any, is left to
/// the self recipient.
#[derive(Debug, Default)]
pub struct ContactArchiver;

impl RecordArchiver for ContactArchiver {
    fn family(&self) -> RecordFamily {
        RecordFamily::ContactRecipient
    }

    fn archive_all(&self, ctx: &mut ArchivingContext<'_>) -> Result<ArchiveResult<FamilyStats>> {
        let family = self.family();
        let store = ctx.store;
        let local_aci = ctx.identity.aci.as_bytes().to_vec();
        let mut stats = FamilyStats::default();

        let mut fetch = ctx.bencher.start();
        store.for_each_contact(|contact| {
            ctx.bencher.record_enumeration(family, fetch);
            ctx.check_cancelled()?;

            if contact.aci.as_deref() == Some(local_aci.as_slice()) {
                stats.skipped += 1;
                ctx.did_skip_unit();
            } else {
                let timer = ctx.bencher.start();
                let id = ctx.mint_recipient_id(RecipientAddress::Contact(contact.id));
                ctx.write_frame(&Frame::new(FrameItem::Recipient(RecipientProto {
                    id: id.0,
                    destination: RecipientDestination::Contact.code(),
                    contact: Some(ContactProto {
                        aci: contact.aci,
                        e164: contact.e164.and_then(|v| u64::try_from(v).ok()),
                        profile_key: contact.profile_key,
                        given_name: contact.given_name,
                        family_name: contact.family_name,
                        blocked: contact.blocked,
                        hidden: contact.hidden,
                        profile_sharing: contact.profile_sharing,
                        avatar_url_path: contact.avatar_url_path,
                    }),
                    group: None,
                })))?;
                ctx.bencher.record_frame(BenchBucket::family(family), timer);
                stats.written += 1;
            }

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
        let error = |kind| RecordError::new(kind, family, id.to_string());

        let Some(contact) = &recipient.contact else {
            return RestoreFrameResult::failure(error(RecordErrorKind::MissingRequiredField(
                "contact",
            )));
        };
        if ctx.has_recipient(id) {
            return RestoreFrameResult::failure(error(RecordErrorKind::DuplicateId(id.to_string())));
        }

        let mut partial = Vec::new();

        let aci = match &contact.aci {
            Some(aci) if aci.len() == ACI_LEN => Some(aci.clone()),
            Some(aci) => {
                partial.push(error(RecordErrorKind::InvalidFieldLength {
                    field: "aci",
                    len: aci.len(),
                }));
                None
            }
            None => None,
        };
        let e164 = match contact.e164.map(|v| to_i64("e164", v)) {
            Some(Ok(v)) if v > 0 => Some(v),
            Some(Ok(v)) => {
                partial.push(error(RecordErrorKind::ValueOutOfRange {
                    field: "e164",
                    value: v as i128,
                }));
                None
            }
            Some(Err(kind)) => {
                partial.push(error(kind));
                None
            }
            None => None,
        };

        if aci.is_none() && e164.is_none() {
            let mut errors = vec![error(RecordErrorKind::MissingRequiredField("aci_or_e164"))];
            errors.append(&mut partial);
            return RestoreFrameResult::Failure(errors);
        }
        if aci.as_deref() == Some(ctx.identity.aci.as_bytes().as_slice()) {
            return RestoreFrameResult::failure(error(RecordErrorKind::ContactIsLocalUser));
        }

        let profile_key = match &contact.profile_key {
            Some(key) if key.len() == PROFILE_KEY_LEN => Some(key.clone()),
            Some(key) => {
                partial.push(error(RecordErrorKind::InvalidFieldLength {
                    field: "profile_key",
                    len: key.len(),
                }));
                None
            }
            None => None,
        };

        let record = ContactRecord {
            id: 0,
            aci,
            e164,
            profile_key,
            given_name: contact.given_name.clone(),
            family_name: contact.family_name.clone(),
            blocked: contact.blocked,
            hidden: contact.hidden,
            profile_sharing: contact.profile_sharing,
            avatar_url_path: contact.avatar_url_path.clone(),
        };
        let row = match ctx.store.insert_contact(&record) {
            Ok(row) => row,
            Err(e) => return RestoreFrameResult::failure(error(e.into())),
        };
        ctx.map_recipient(id, RestoredRecipient::Contact(row));

        if record.avatar_url_path.is_some() {
            ctx.deferred.push(DeferredAction::EnqueueAvatarFetch {
                target: AvatarTarget::Contact(row),
            });
        }
        RestoreFrameResult::from_partial((), partial)
    }
}
