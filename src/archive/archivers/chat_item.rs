//! # Chat Items
//!
//! Messages and simple updates, with their quotes and reactions.
//!
//! ```text
//! restore checks, in order (first failure wins):
//!
//!   chat known ─► author known ─► date_sent in range ─► direction/kind known
//!        │                                                      │
//!        └─ Failure                                UnrecognizedEnum (skipped)
//!
//!   direction rules ─► body rules ─► quote/reactions (partial) ─► insert
//! ```
//!
//! Sub-field problems (an unknown quote author, a reaction from a group)
//! drop the sub-field and keep the message.

use super::{mismatched_item, to_i64, to_u64, RecordArchiver};
use crate::archive::bench::BenchBucket;
use crate::archive::context::{
    ArchivingContext, DeferredAction, RecipientAddress, RestoredRecipient, RestoringContext,
};
use crate::archive::errors::{LoggableErrorAndProto, RecordError, RecordErrorKind};
use crate::archive::results::{ArchiveResult, FamilyStats, RestoreFrameResult};
use crate::error::Result;
use crate::proto::{
    update_kind, ChatId, ChatItemDirection, ChatItemKind, ChatItemProto, Frame, FrameItem,
    IncomingDetails, QuoteProto, ReactionProto, RecipientId, RecordFamily, SimpleUpdateProto,
    StandardMessageProto,
};
use crate::storage::{AuthorRef, InteractionRecord, QuoteRecord, ReactionRecord};

/// Archives interactions and their reactions.
#[derive(Debug, Default)]
pub struct ChatItemArchiver;

/// What happened to one interaction on export
enum Exported {
    Written,
    Skipped,
    Dropped,
}

impl ChatItemArchiver {
    fn author_address(author: AuthorRef) -> RecipientAddress {
        match author {
            AuthorRef::Local => RecipientAddress::LocalUser,
            AuthorRef::Contact(row) => RecipientAddress::Contact(row),
        }
    }

    fn archive_one(
        &self,
        ctx: &mut ArchivingContext<'_>,
        interaction: InteractionRecord,
        errors: &mut Vec<LoggableErrorAndProto>,
    ) -> Result<Exported> {
        let family = self.family();
        let log_id = format!("interaction:{}", interaction.id);
        let error = |kind| RecordError::new(kind, family, log_id.clone());
        let dangling = RecordErrorKind::DanglingReference {
            table: "interactions",
            row: interaction.id,
        };

        let Some(chat_id) = ctx.chat_id(interaction.thread_id) else {
            errors.push(LoggableErrorAndProto::dropped(error(dangling), None));
            return Ok(Exported::Dropped);
        };
        let Some(author_id) = ctx.recipient_id(Self::author_address(interaction.author)) else {
            errors.push(LoggableErrorAndProto::dropped(error(dangling), None));
            return Ok(Exported::Dropped);
        };
        if interaction.sent_at_ms <= 0 {
            errors.push(LoggableErrorAndProto::dropped(
                error(RecordErrorKind::ValueOutOfRange {
                    field: "sent_at_ms",
                    value: interaction.sent_at_ms as i128,
                }),
                None,
            ));
            return Ok(Exported::Dropped);
        }
        if ctx.should_skip_expiring(interaction.expire_started_at_ms, interaction.expires_in_ms) {
            return Ok(Exported::Skipped);
        }

        let timer = ctx.bencher.start();
        let received_at_ms = interaction.received_at_ms.unwrap_or(interaction.sent_at_ms);
        let incoming = (interaction.direction == ChatItemDirection::Incoming.code()).then(|| {
            IncomingDetails {
                date_received_ms: to_u64(received_at_ms),
                read: interaction.read,
            }
        });

        let (item, standard, update) = match interaction.update_kind {
            Some(kind) => (ChatItemKind::Update, None, Some(SimpleUpdateProto { kind })),
            None => {
                let quote = interaction.quote.map(|quote| {
                    let author_id = match quote.author {
                        Some(author) => {
                            let id = ctx.recipient_id(Self::author_address(author));
                            if id.is_none() {
                                errors.push(LoggableErrorAndProto::partial(
                                    error(RecordErrorKind::DanglingReference {
                                        table: "interactions.quote",
                                        row: interaction.id,
                                    }),
                                    None,
                                ));
                            }
                            id
                        }
                        None => None,
                    };
                    QuoteProto {
                        target_sent_ms: quote.sent_at_ms.map(to_u64),
                        author_id: author_id.map(|id| id.0),
                        text: quote.text,
                    }
                });

                let mut reactions = Vec::new();
                for reaction in ctx.store.reactions_for(interaction.id)? {
                    match ctx.recipient_id(Self::author_address(reaction.author)) {
                        Some(author_id) => reactions.push(ReactionProto {
                            author_id: author_id.0,
                            emoji: reaction.emoji,
                            sent_ms: to_u64(reaction.sent_at_ms),
                        }),
                        None => errors.push(LoggableErrorAndProto::partial(
                            error(RecordErrorKind::DanglingReference {
                                table: "reactions",
                                row: reaction.id,
                            }),
                            None,
                        )),
                    }
                }

                let standard = StandardMessageProto {
                    body: interaction.body,
                    quote,
                    reactions,
                };
                (ChatItemKind::Standard, Some(standard), None)
            }
        };

        let proto = ChatItemProto {
            chat_id: chat_id.0,
            author_id: author_id.0,
            date_sent_ms: to_u64(interaction.sent_at_ms),
            expire_start_ms: (interaction.expire_started_at_ms > 0)
                .then(|| to_u64(interaction.expire_started_at_ms)),
            expires_in_ms: (interaction.expires_in_ms > 0)
                .then(|| to_u64(interaction.expires_in_ms)),
            direction: interaction.direction,
            incoming,
            item: item.code(),
            standard,
            update,
        };

        let item = FrameItem::ChatItem(proto);
        let bucket = BenchBucket {
            family,
            subtype: self.bench_subtype(&item),
        };
        ctx.write_frame(&Frame::new(item))?;
        ctx.bencher.record_frame(bucket, timer);
        Ok(Exported::Written)
    }

    /// Map a restored recipient to an interaction author. Groups never
    /// author anything.
    fn author_ref(recipient: RestoredRecipient) -> Option<AuthorRef> {
        match recipient {
            RestoredRecipient::Local => Some(AuthorRef::Local),
            RestoredRecipient::Contact(row) => Some(AuthorRef::Contact(row)),
            RestoredRecipient::Group(_) => None,
        }
    }
}

impl RecordArchiver for ChatItemArchiver {
    fn family(&self) -> RecordFamily {
        RecordFamily::ChatItem
    }

    fn archive_all(&self, ctx: &mut ArchivingContext<'_>) -> Result<ArchiveResult<FamilyStats>> {
        let family = self.family();
        let store = ctx.store;
        let mut stats = FamilyStats::default();
        let mut errors = Vec::new();

        let mut fetch = ctx.bencher.start();
        store.for_each_interaction(|interaction| {
            ctx.bencher.record_enumeration(family, fetch);
            ctx.check_cancelled()?;

            match self.archive_one(ctx, interaction, &mut errors)? {
                Exported::Written => stats.written += 1,
                Exported::Skipped => {
                    stats.skipped += 1;
                    ctx.did_skip_unit();
                }
                Exported::Dropped => {
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
        let FrameItem::ChatItem(proto) = item else {
            return mismatched_item(family, item);
        };
        let log_id = item.id_log_string();
        let error = |kind| RecordError::new(kind, family, log_id.clone());
        let fail = |kind| RestoreFrameResult::failure(error(kind));

        let chat_id = ChatId(proto.chat_id);
        let Some(chat) = ctx.chat(chat_id) else {
            return fail(RecordErrorKind::UnknownChat(chat_id));
        };
        let author_id = RecipientId(proto.author_id);
        let Some(author) = ctx.recipient(author_id) else {
            return fail(RecordErrorKind::UnknownRecipient(author_id));
        };
        let sent_at_ms = match to_i64("date_sent_ms", proto.date_sent_ms) {
            Ok(v) if v > 0 => v,
            Ok(v) => {
                return fail(RecordErrorKind::ValueOutOfRange {
                    field: "date_sent_ms",
                    value: v as i128,
                })
            }
            Err(kind) => return fail(kind),
        };

        let Some(direction) = ChatItemDirection::from_code(proto.direction) else {
            return RestoreFrameResult::UnrecognizedEnum(error(RecordErrorKind::UnrecognizedEnum {
                field: "direction",
                code: proto.direction,
            }));
        };
        let Some(kind) = ChatItemKind::from_code(proto.item) else {
            return RestoreFrameResult::UnrecognizedEnum(error(RecordErrorKind::UnrecognizedEnum {
                field: "item",
                code: proto.item,
            }));
        };

        let Some(author_ref) = Self::author_ref(author) else {
            return fail(RecordErrorKind::RecipientNotContact(author_id));
        };
        let mut received_at_ms = None;
        let mut read = true;
        match direction {
            ChatItemDirection::Incoming => {
                if author_ref == AuthorRef::Local {
                    return fail(RecordErrorKind::RecipientNotContact(author_id));
                }
                let Some(incoming) = &proto.incoming else {
                    return fail(RecordErrorKind::MissingRequiredField("incoming"));
                };
                received_at_ms = Some(match to_i64("date_received_ms", incoming.date_received_ms) {
                    Ok(v) => v,
                    Err(kind) => return fail(kind),
                });
                read = incoming.read;
            }
            ChatItemDirection::Outgoing => {
                if author_ref != AuthorRef::Local {
                    return fail(RecordErrorKind::AuthorNotLocal(author_id));
                }
            }
            ChatItemDirection::Directionless => {
                if kind != ChatItemKind::Update {
                    return fail(RecordErrorKind::DirectionlessNotUpdate);
                }
            }
        }

        let mut partial = Vec::new();
        let mut body = None;
        let mut quote = None;
        let mut reactions = Vec::new();
        let mut update = None;

        match kind {
            ChatItemKind::Standard => {
                let Some(standard) = &proto.standard else {
                    return fail(RecordErrorKind::MissingRequiredField("standard"));
                };
                body = standard.body.clone().filter(|b| !b.is_empty());
                if body.is_none() && standard.reactions.is_empty() {
                    return fail(RecordErrorKind::EmptyMessage);
                }

                quote = standard.quote.as_ref().map(|q| {
                    let author = q.author_id.and_then(|id| {
                        let id = RecipientId(id);
                        let author = ctx.recipient(id).and_then(Self::author_ref);
                        if author.is_none() {
                            partial.push(error(RecordErrorKind::UnknownRecipient(id)));
                        }
                        author
                    });
                    let sent_at_ms =
                        q.target_sent_ms.and_then(|v| match to_i64("quote.target_sent_ms", v) {
                            Ok(v) => Some(v),
                            Err(kind) => {
                                partial.push(error(kind));
                                None
                            }
                        });
                    QuoteRecord {
                        sent_at_ms,
                        author,
                        text: q.text.clone(),
                    }
                });

                for reaction in &standard.reactions {
                    let id = RecipientId(reaction.author_id);
                    let Some(author) = ctx.recipient(id).and_then(Self::author_ref) else {
                        partial.push(error(RecordErrorKind::UnknownRecipient(id)));
                        continue;
                    };
                    let sent_at_ms = match to_i64("reaction.sent_ms", reaction.sent_ms) {
                        Ok(v) => v,
                        Err(kind) => {
                            partial.push(error(kind));
                            continue;
                        }
                    };
                    reactions.push(ReactionRecord {
                        id: 0,
                        interaction_id: 0,
                        author,
                        emoji: reaction.emoji.clone(),
                        sent_at_ms,
                    });
                }
            }
            ChatItemKind::Update => {
                let Some(simple) = &proto.update else {
                    return fail(RecordErrorKind::MissingRequiredField("update"));
                };
                if !update_kind::is_known(simple.kind) {
                    return RestoreFrameResult::UnrecognizedEnum(error(
                        RecordErrorKind::UnrecognizedEnum {
                            field: "update.kind",
                            code: simple.kind,
                        },
                    ));
                }
                update = Some(simple.kind);
            }
        }

        let mut optional_millis =
            |field: &'static str, value: Option<u64>| match value.map(|v| to_i64(field, v)) {
                Some(Ok(v)) => v,
                Some(Err(kind)) => {
                    partial.push(error(kind));
                    0
                }
                None => 0,
            };
        let expires_in_ms = optional_millis("expires_in_ms", proto.expires_in_ms);
        let expire_started_at_ms = optional_millis("expire_start_ms", proto.expire_start_ms);

        let record = InteractionRecord {
            id: 0,
            thread_id: chat.thread_row,
            author: author_ref,
            direction: direction.code(),
            sent_at_ms,
            received_at_ms,
            read,
            body,
            quote,
            update_kind: update,
            expires_in_ms,
            expire_started_at_ms,
        };
        let interaction_id = match ctx.store.insert_interaction(&record) {
            Ok(row) => row,
            Err(e) => return fail(e.into()),
        };
        for reaction in reactions {
            let reaction = ReactionRecord {
                interaction_id,
                ..reaction
            };
            if let Err(e) = ctx.store.insert_reaction(&reaction) {
                partial.push(error(e.into()));
            }
        }

        ctx.deferred.push(DeferredAction::RecomputeThreadMetadata {
            thread_id: chat.thread_row,
        });
        RestoreFrameResult::from_partial((), partial)
    }

    fn bench_subtype(&self, item: &FrameItem) -> &'static str {
        let FrameItem::ChatItem(proto) = item else {
            return "default";
        };
        match (&proto.standard, &proto.update) {
            (_, Some(_)) => "update",
            (Some(standard), None) if standard.quote.is_some() => "standard_with_quote",
            (Some(standard), None) if !standard.reactions.is_empty() => "standard_with_reactions",
            _ => "standard",
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::archive::bench::Bencher;
    use crate::archive::context::{BackupPurpose, CancellationToken, RestoredChat};
    use crate::archive::progress::ExportProgress;
    use crate::config::BackupConfig;
    use crate::storage::{ThreadPeer, ThreadRecord};
    use crate::stream::FrameSink;
    use crate::test_support::{identity, message, restoring, MemoryDb};
    use crate::time::ManualClock;

    const LOCAL: u64 = 1;
    const ALICE: u64 = 2;
    const TEAM: u64 = 3;
    const CHAT: u64 = 10;

    /// Maps self, one contact and one group, plus a chat with the contact.
    fn seeded(ctx: &mut RestoringContext<'_>) -> i64 {
        ctx.map_recipient(RecipientId(LOCAL), RestoredRecipient::Local);
        let contact = ctx
            .store
            .insert_contact(&crate::storage::ContactRecord {
                e164: Some(15550001),
                ..Default::default()
            })
            .unwrap();
        ctx.map_recipient(RecipientId(ALICE), RestoredRecipient::Contact(contact));
        ctx.map_recipient(RecipientId(TEAM), RestoredRecipient::Group(99));
        let thread = ctx
            .store
            .insert_thread(&ThreadRecord::new(ThreadPeer::Contact(contact)))
            .unwrap();
        ctx.map_chat(
            ChatId(CHAT),
            RestoredChat {
                thread_row: thread,
                recipient: RestoredRecipient::Contact(contact),
            },
        );
        thread
    }

    fn outgoing(body: &str) -> ChatItemProto {
        ChatItemProto {
            chat_id: CHAT,
            author_id: LOCAL,
            date_sent_ms: 1_000,
            direction: ChatItemDirection::Outgoing.code(),
            item: ChatItemKind::Standard.code(),
            standard: Some(StandardMessageProto {
                body: Some(body.into()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn incoming(body: &str) -> ChatItemProto {
        ChatItemProto {
            author_id: ALICE,
            direction: ChatItemDirection::Incoming.code(),
            incoming: Some(IncomingDetails {
                date_received_ms: 1_100,
                read: false,
            }),
            ..outgoing(body)
        }
    }

    fn restore(ctx: &mut RestoringContext<'_>, proto: ChatItemProto) -> RestoreFrameResult<()> {
        ChatItemArchiver.restore(&FrameItem::ChatItem(proto), ctx)
    }

    fn first_kind(result: &RestoreFrameResult<()>) -> Option<&'static str> {
        match result {
            RestoreFrameResult::Success(()) => None,
            RestoreFrameResult::PartialRestore((), errors)
            | RestoreFrameResult::Failure(errors) => errors.first().map(|e| e.kind.name()),
            RestoreFrameResult::UnrecognizedEnum(e) => Some(e.kind.name()),
        }
    }

    #[test]
    fn test_restore_outgoing_and_incoming() {
        let db = MemoryDb::new();
        let identity = identity();
        let mut ctx = restoring(&db, &identity);
        seeded(&mut ctx);

        assert_eq!(restore(&mut ctx, outgoing("hi")), RestoreFrameResult::Success(()));
        assert_eq!(restore(&mut ctx, incoming("hello")), RestoreFrameResult::Success(()));
        assert_eq!(ctx.store.count_rows("interactions").unwrap(), 2);
        // Both frames queue the same recompute.
        assert_eq!(ctx.deferred.len(), 1);
    }

    #[test]
    fn test_unknown_author_is_failure() {
        let db = MemoryDb::new();
        let identity = identity();
        let mut ctx = restoring(&db, &identity);
        seeded(&mut ctx);

        let result = restore(&mut ctx, ChatItemProto { author_id: 999, ..outgoing("x") });
        assert_eq!(first_kind(&result), Some("unknown_recipient"));
        assert_eq!(ctx.store.count_rows("interactions").unwrap(), 0);
    }

    #[test]
    fn test_unknown_chat_is_failure() {
        let db = MemoryDb::new();
        let identity = identity();
        let mut ctx = restoring(&db, &identity);
        seeded(&mut ctx);

        let result = restore(&mut ctx, ChatItemProto { chat_id: 77, ..outgoing("x") });
        assert_eq!(first_kind(&result), Some("unknown_chat"));
    }

    #[test]
    fn test_zero_date_sent_is_failure() {
        let db = MemoryDb::new();
        let identity = identity();
        let mut ctx = restoring(&db, &identity);
        seeded(&mut ctx);

        let result = restore(&mut ctx, ChatItemProto { date_sent_ms: 0, ..outgoing("x") });
        assert_eq!(first_kind(&result), Some("value_out_of_range"));
    }

    #[test]
    fn test_direction_rules() {
        let db = MemoryDb::new();
        let identity = identity();
        let mut ctx = restoring(&db, &identity);
        seeded(&mut ctx);

        let from_self = ChatItemProto { author_id: LOCAL, ..incoming("x") };
        assert_eq!(first_kind(&restore(&mut ctx, from_self)), Some("recipient_not_contact"));

        let no_details = ChatItemProto { incoming: None, ..incoming("x") };
        assert_eq!(first_kind(&restore(&mut ctx, no_details)), Some("missing_required_field"));

        let by_alice = ChatItemProto { author_id: ALICE, ..outgoing("x") };
        assert_eq!(first_kind(&restore(&mut ctx, by_alice)), Some("author_not_local"));

        let directionless = ChatItemProto {
            direction: ChatItemDirection::Directionless.code(),
            ..outgoing("x")
        };
        assert_eq!(first_kind(&restore(&mut ctx, directionless)), Some("directionless_not_update"));

        let by_group = ChatItemProto { author_id: TEAM, ..outgoing("x") };
        assert_eq!(first_kind(&restore(&mut ctx, by_group)), Some("recipient_not_contact"));
    }

    #[test]
    fn test_empty_message_is_failure() {
        let db = MemoryDb::new();
        let identity = identity();
        let mut ctx = restoring(&db, &identity);
        seeded(&mut ctx);

        assert_eq!(first_kind(&restore(&mut ctx, outgoing(""))), Some("empty_message"));
    }

    #[test]
    fn test_unknown_cases_are_unrecognized() {
        let db = MemoryDb::new();
        let identity = identity();
        let mut ctx = restoring(&db, &identity);
        seeded(&mut ctx);

        let bad_direction = ChatItemProto { direction: 40, ..outgoing("x") };
        assert!(matches!(
            restore(&mut ctx, bad_direction),
            RestoreFrameResult::UnrecognizedEnum(_)
        ));

        let bad_update = ChatItemProto {
            direction: ChatItemDirection::Directionless.code(),
            item: ChatItemKind::Update.code(),
            standard: None,
            update: Some(SimpleUpdateProto { kind: 500 }),
            ..outgoing("x")
        };
        assert!(matches!(
            restore(&mut ctx, bad_update),
            RestoreFrameResult::UnrecognizedEnum(_)
        ));
        assert_eq!(ctx.store.count_rows("interactions").unwrap(), 0);
    }

    #[test]
    fn test_update_item_restores() {
        let db = MemoryDb::new();
        let identity = identity();
        let mut ctx = restoring(&db, &identity);
        seeded(&mut ctx);

        let update = ChatItemProto {
            direction: ChatItemDirection::Directionless.code(),
            item: ChatItemKind::Update.code(),
            standard: None,
            update: Some(SimpleUpdateProto {
                kind: update_kind::JOINED,
            }),
            ..outgoing("x")
        };
        assert!(restore(&mut ctx, update).is_restored());
    }

    #[test]
    fn test_bad_quote_author_and_group_reaction_are_partial() {
        let db = MemoryDb::new();
        let identity = identity();
        let mut ctx = restoring(&db, &identity);
        seeded(&mut ctx);

        let proto = ChatItemProto {
            standard: Some(StandardMessageProto {
                body: Some("reply".into()),
                quote: Some(QuoteProto {
                    target_sent_ms: Some(500),
                    author_id: Some(999),
                    text: Some("original".into()),
                }),
                reactions: vec![
                    ReactionProto {
                        author_id: ALICE,
                        emoji: "👍".into(),
                        sent_ms: 1_200,
                    },
                    ReactionProto {
                        author_id: TEAM,
                        emoji: "🎉".into(),
                        sent_ms: 1_300,
                    },
                ],
            }),
            ..outgoing("x")
        };
        let result = restore(&mut ctx, proto);
        assert!(matches!(
            result,
            RestoreFrameResult::PartialRestore((), ref errors) if errors.len() == 2
        ));
        assert_eq!(ctx.store.count_rows("interactions").unwrap(), 1);
        assert_eq!(ctx.store.count_rows("reactions").unwrap(), 1);
    }

    /// Each write takes 3ms on the shared clock.
    struct TimedSink {
        clock: ManualClock,
        written: usize,
    }

    impl FrameSink for TimedSink {
        fn write_frame(&mut self, _frame: &Frame) -> Result<()> {
            self.clock.advance(Duration::from_millis(3));
            self.written += 1;
            Ok(())
        }
    }

    #[test]
    fn test_export_times_each_written_frame() {
        let db = MemoryDb::new();
        let store = db.store();
        let thread = store
            .insert_thread(&ThreadRecord::new(ThreadPeer::Contact(5)))
            .unwrap();
        let reply = store
            .insert_interaction(&InteractionRecord {
                quote: Some(QuoteRecord {
                    sent_at_ms: Some(500),
                    author: Some(AuthorRef::Local),
                    text: Some("earlier".into()),
                }),
                ..message(thread, AuthorRef::Local, ChatItemDirection::Outgoing, 1_000, "reply")
            })
            .unwrap();
        store
            .insert_reaction(&ReactionRecord {
                id: 0,
                interaction_id: reply,
                author: AuthorRef::Local,
                emoji: "+1".into(),
                sent_at_ms: 1_100,
            })
            .unwrap();
        store
            .insert_interaction(&message(
                thread,
                AuthorRef::Local,
                ChatItemDirection::Outgoing,
                2_000,
                "plain",
            ))
            .unwrap();

        let clock = ManualClock::new();
        let mut bencher = Bencher::new(Box::new(clock.clone()), Duration::from_millis(25));
        let mut sink = TimedSink {
            clock: clock.clone(),
            written: 0,
        };
        let mut progress = ExportProgress::disabled();
        let identity = identity();
        let cancel = CancellationToken::new();
        let config = BackupConfig::default();
        let mut ctx = ArchivingContext::new(
            db.store(),
            &mut sink,
            &mut bencher,
            &mut progress,
            BackupPurpose::DeviceTransfer,
            &identity,
            &config,
            1_000_000,
            &cancel,
        );
        ctx.mint_recipient_id(RecipientAddress::LocalUser);
        ctx.mint_chat_id(thread);

        let result = ChatItemArchiver.archive_all(&mut ctx).unwrap();
        assert_eq!(result.value().map(|stats| stats.written), Some(2));
        assert_eq!(sink.written, 2);

        let family = RecordFamily::ChatItem;
        let quoted = bencher
            .frame_stats(BenchBucket {
                family,
                subtype: "standard_with_quote",
            })
            .unwrap();
        assert_eq!(quoted.count, 1);
        assert_eq!(quoted.total, Duration::from_millis(3));
        let plain = bencher
            .frame_stats(BenchBucket {
                family,
                subtype: "standard",
            })
            .unwrap();
        assert_eq!(plain.count, 1);
        assert_eq!(
            bencher.enumeration_stats(family).unwrap().total,
            Duration::ZERO
        );
    }

    #[test]
    fn test_bench_subtypes() {
        let archiver = ChatItemArchiver;
        let plain = FrameItem::ChatItem(outgoing("x"));
        assert_eq!(archiver.bench_subtype(&plain), "standard");

        let mut quoted = outgoing("x");
        quoted.standard.as_mut().unwrap().quote = Some(QuoteProto::default());
        assert_eq!(
            archiver.bench_subtype(&FrameItem::ChatItem(quoted)),
            "standard_with_quote"
        );

        let update = ChatItemProto {
            standard: None,
            update: Some(SimpleUpdateProto::default()),
            ..outgoing("x")
        };
        assert_eq!(archiver.bench_subtype(&FrameItem::ChatItem(update)), "update");
    }
}
