//! Record-level errors.
//!
//! These never travel through `?`. Archivers hand them back inside
//! [`ArchiveResult`](super::ArchiveResult) or
//! [`RestoreFrameResult`](super::RestoreFrameResult), and the manager folds
//! them into the [`ErrorCollapser`](super::ErrorCollapser).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::Location;
use thiserror::Error;

use crate::proto::{ChatId, Frame, RecipientId, RecordFamily};

/// What went wrong with one record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordErrorKind {
    /// A field the record cannot exist without is absent
    #[error("missing required field {0}")]
    MissingRequiredField(&'static str),

    /// A bytes field has the wrong length
    #[error("field {field} has invalid length {len}")]
    InvalidFieldLength {
        /// Field name
        field: &'static str,
        /// Observed length
        len: usize,
    },

    /// A numeric field is outside its representable range
    #[error("field {field} out of range: {value}")]
    ValueOutOfRange {
        /// Field name
        field: &'static str,
        /// Observed value
        value: i128,
    },

    /// A frame references a recipient no earlier frame defined
    #[error("unknown recipient {0}")]
    UnknownRecipient(RecipientId),

    /// A frame references a chat no earlier frame defined
    #[error("unknown chat {0}")]
    UnknownChat(ChatId),

    /// An id was defined by two frames
    #[error("duplicate id {0}")]
    DuplicateId(String),

    /// The recipient exists but is not a contact
    #[error("recipient {0} is not a contact")]
    RecipientNotContact(RecipientId),

    /// The recipient exists but is not a group
    #[error("recipient {0} is not a group")]
    RecipientNotGroup(RecipientId),

    /// An outgoing item not authored by the local user
    #[error("outgoing item author {0} is not the local user")]
    AuthorNotLocal(RecipientId),

    /// A contact carries the local user's own service id
    #[error("contact is the local user")]
    ContactIsLocalUser,

    /// A directionless item that is not an update
    #[error("directionless item is not an update")]
    DirectionlessNotUpdate,

    /// A standard message with neither body nor reactions
    #[error("message has no content")]
    EmptyMessage,

    /// Account data is absent from the database
    #[error("account data not found")]
    MissingAccountData,

    /// A local row points at a row that was not exported
    #[error("{table} row {row} references a row that was not exported")]
    DanglingReference {
        /// Table holding the reference
        table: &'static str,
        /// Row id of the referencing record
        row: i64,
    },

    /// A oneof case code this reader does not know
    #[error("unrecognized {field} case {code}")]
    UnrecognizedEnum {
        /// Oneof field
        field: &'static str,
        /// Case code
        code: u32,
    },

    /// A frame whose family tag this reader does not know
    #[error("unrecognized frame")]
    UnrecognizedFrame,

    /// A well-delimited unit whose body does not decode
    #[error("frame body could not be decoded: {0}")]
    UndecodableFrame(String),

    /// Writing the restored record failed
    #[error("database write failed: {0}")]
    DatabaseWrite(String),

    /// A post-pass action failed
    #[error("deferred action {action} failed: {reason}")]
    DeferredActionFailed {
        /// Action name
        action: &'static str,
        /// Underlying failure
        reason: String,
    },

    /// Secondary indexes could not be rebuilt
    #[error("integrity at risk: {0}")]
    IntegrityAtRisk(String),
}

impl RecordErrorKind {
    /// Stable name of the kind; the collapse key, independent of payload
    pub fn name(&self) -> &'static str {
        match self {
            RecordErrorKind::MissingRequiredField(_) => "missing_required_field",
            RecordErrorKind::InvalidFieldLength { .. } => "invalid_field_length",
            RecordErrorKind::ValueOutOfRange { .. } => "value_out_of_range",
            RecordErrorKind::UnknownRecipient(_) => "unknown_recipient",
            RecordErrorKind::UnknownChat(_) => "unknown_chat",
            RecordErrorKind::DuplicateId(_) => "duplicate_id",
            RecordErrorKind::RecipientNotContact(_) => "recipient_not_contact",
            RecordErrorKind::RecipientNotGroup(_) => "recipient_not_group",
            RecordErrorKind::AuthorNotLocal(_) => "author_not_local",
            RecordErrorKind::ContactIsLocalUser => "contact_is_local_user",
            RecordErrorKind::DirectionlessNotUpdate => "directionless_not_update",
            RecordErrorKind::EmptyMessage => "empty_message",
            RecordErrorKind::MissingAccountData => "missing_account_data",
            RecordErrorKind::DanglingReference { .. } => "dangling_reference",
            RecordErrorKind::UnrecognizedEnum { .. } => "unrecognized_enum",
            RecordErrorKind::UnrecognizedFrame => "unrecognized_frame",
            RecordErrorKind::UndecodableFrame(_) => "undecodable_frame",
            RecordErrorKind::DatabaseWrite(_) => "database_write",
            RecordErrorKind::DeferredActionFailed { .. } => "deferred_action_failed",
            RecordErrorKind::IntegrityAtRisk(_) => "integrity_at_risk",
        }
    }
}

impl From<crate::error::Error> for RecordErrorKind {
    fn from(err: crate::error::Error) -> Self {
        RecordErrorKind::DatabaseWrite(err.to_string())
    }
}

/// One record's error, with where it was raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordError {
    /// What went wrong
    pub kind: RecordErrorKind,
    /// Family of the offending record
    pub family: RecordFamily,
    /// Short id of the offending record
    pub id: String,
    /// Source location that raised it
    pub callsite: &'static Location<'static>,
}

impl RecordError {
    /// Raise an error at the caller's location
    #[track_caller]
    pub fn new(kind: RecordErrorKind, family: RecordFamily, id: impl Into<String>) -> Self {
        Self {
            kind,
            family,
            id: id.into(),
            callsite: Location::caller(),
        }
    }

    /// `file:line` of the raising call
    pub fn callsite_string(&self) -> String {
        format!("{}:{}", self.callsite.file(), self.callsite.line())
    }
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.family, self.id, self.kind)
    }
}

/// Severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Expected and harmless
    Info,
    /// Worth logging, not worth showing
    Warning,
    /// Data was lost
    Error,
    /// The pass failed or integrity is at risk
    Fault,
}

/// A record error as handed to the collapser.
///
/// `was_frame_dropped` is only ever true for failures and unrecognized
/// frames, never for partial results.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggableErrorAndProto {
    /// The error
    pub error: RecordError,
    /// Severity
    pub level: LogLevel,
    /// Whether the record was dropped entirely
    pub was_frame_dropped: bool,
    /// The frame being restored, if any
    pub offending_frame: Option<Frame>,
}

impl LoggableErrorAndProto {
    /// Record dropped. Always-fatal families escalate to `Fault`.
    pub fn dropped(error: RecordError, frame: Option<Frame>) -> Self {
        let level = if error.family.is_always_fatal() {
            LogLevel::Fault
        } else {
            LogLevel::Error
        };
        Self {
            error,
            level,
            was_frame_dropped: true,
            offending_frame: frame,
        }
    }

    /// Record kept with some fields dropped
    pub fn partial(error: RecordError, frame: Option<Frame>) -> Self {
        Self {
            error,
            level: LogLevel::Warning,
            was_frame_dropped: false,
            offending_frame: frame,
        }
    }

    /// Record skipped for forward compatibility
    pub fn unrecognized(error: RecordError, frame: Option<Frame>) -> Self {
        Self {
            error,
            level: LogLevel::Warning,
            was_frame_dropped: true,
            offending_frame: frame,
        }
    }

    /// A post-pass action failed; the restored data itself is intact
    pub fn deferred(error: RecordError) -> Self {
        Self {
            error,
            level: LogLevel::Error,
            was_frame_dropped: false,
            offending_frame: None,
        }
    }

    /// Indexes could not be rebuilt
    pub fn integrity_at_risk(error: RecordError) -> Self {
        Self {
            error,
            level: LogLevel::Fault,
            was_frame_dropped: false,
            offending_frame: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_name_ignores_payload() {
        let a = RecordErrorKind::UnknownRecipient(RecipientId(1));
        let b = RecordErrorKind::UnknownRecipient(RecipientId(2));
        assert_ne!(a, b);
        assert_eq!(a.name(), b.name());
    }

    #[test]
    fn test_callsite_is_caller() {
        let err = RecordError::new(RecordErrorKind::EmptyMessage, RecordFamily::ChatItem, "x");
        assert!(err.callsite.file().ends_with("errors.rs"));
        assert!(err.callsite_string().contains(':'));
    }

    #[test]
    fn test_display() {
        let err = RecordError::new(
            RecordErrorKind::UnknownChat(ChatId(3)),
            RecordFamily::ChatItem,
            "chat:3/10",
        );
        assert_eq!(err.to_string(), "chat_item chat:3/10: unknown chat chat:3");
    }

    #[test]
    fn test_levels() {
        assert!(LogLevel::Info < LogLevel::Warning);
        assert!(LogLevel::Error < LogLevel::Fault);

        let account = RecordError::new(
            RecordErrorKind::MissingAccountData,
            RecordFamily::AccountData,
            "account",
        );
        assert_eq!(LoggableErrorAndProto::dropped(account, None).level, LogLevel::Fault);

        let chat = RecordError::new(
            RecordErrorKind::UnknownRecipient(RecipientId(9)),
            RecordFamily::Chat,
            "chat:1",
        );
        let dropped = LoggableErrorAndProto::dropped(chat.clone(), None);
        assert_eq!(dropped.level, LogLevel::Error);
        assert!(dropped.was_frame_dropped);

        let partial = LoggableErrorAndProto::partial(chat, None);
        assert_eq!(partial.level, LogLevel::Warning);
        assert!(!partial.was_frame_dropped);
    }
}
