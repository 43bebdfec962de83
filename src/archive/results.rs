//! Outcome types for archiving and restoring.
//!
//! Two closed sums rather than `Result`: the difference between "kept with
//! some fields dropped" and "dropped" decides whether the pass keeps going.

use super::errors::{LoggableErrorAndProto, RecordError};

/// Outcome of archiving one unit of work.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum ArchiveResult<T> {
    /// Everything was written
    Success(T),
    /// Written, but some records or sub-fields were dropped
    PartialSuccess(T, Vec<LoggableErrorAndProto>),
    /// Nothing could be written; fatal for the export
    CompleteFailure(LoggableErrorAndProto),
}

impl<T> ArchiveResult<T> {
    /// Fold accumulated errors into a success value
    pub fn from_errors(value: T, errors: Vec<LoggableErrorAndProto>) -> Self {
        if errors.is_empty() {
            ArchiveResult::Success(value)
        } else {
            ArchiveResult::PartialSuccess(value, errors)
        }
    }

    /// The value, if anything was written
    pub fn value(&self) -> Option<&T> {
        match self {
            ArchiveResult::Success(v) | ArchiveResult::PartialSuccess(v, _) => Some(v),
            ArchiveResult::CompleteFailure(_) => None,
        }
    }
}

/// Outcome of restoring one frame.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum RestoreFrameResult<T> {
    /// Restored in full
    Success(T),
    /// Restored with some fields dropped
    PartialRestore(T, Vec<RecordError>),
    /// Dropped entirely
    Failure(Vec<RecordError>),
    /// A oneof held a case this reader does not know; skipped
    UnrecognizedEnum(RecordError),
}

impl<T> RestoreFrameResult<T> {
    /// A single-error failure
    pub fn failure(error: RecordError) -> Self {
        RestoreFrameResult::Failure(vec![error])
    }

    /// Fold field-level errors into a restored value
    pub fn from_partial(value: T, errors: Vec<RecordError>) -> Self {
        if errors.is_empty() {
            RestoreFrameResult::Success(value)
        } else {
            RestoreFrameResult::PartialRestore(value, errors)
        }
    }

    /// Whether the record made it into the database
    pub fn is_restored(&self) -> bool {
        matches!(
            self,
            RestoreFrameResult::Success(_) | RestoreFrameResult::PartialRestore(..)
        )
    }
}

/// Counts from one family's export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FamilyStats {
    /// Frames written
    pub written: u64,
    /// Records excluded by the purpose filter
    pub skipped: u64,
    /// Records dropped with an error
    pub dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::errors::RecordErrorKind;
    use crate::proto::RecordFamily;

    fn err() -> RecordError {
        RecordError::new(RecordErrorKind::EmptyMessage, RecordFamily::ChatItem, "x")
    }

    #[test]
    fn test_from_partial() {
        assert_eq!(
            RestoreFrameResult::from_partial((), vec![]),
            RestoreFrameResult::Success(())
        );
        let partial = RestoreFrameResult::from_partial((), vec![err()]);
        assert!(partial.is_restored());
        assert!(matches!(partial, RestoreFrameResult::PartialRestore((), ref e) if e.len() == 1));
        assert!(!RestoreFrameResult::<()>::failure(err()).is_restored());
    }

    #[test]
    fn test_archive_from_errors() {
        assert_eq!(ArchiveResult::from_errors(3, vec![]), ArchiveResult::Success(3));
        let partial =
            ArchiveResult::from_errors(3, vec![LoggableErrorAndProto::partial(err(), None)]);
        assert_eq!(partial.value(), Some(&3));
        let failed: ArchiveResult<u8> =
            ArchiveResult::CompleteFailure(LoggableErrorAndProto::dropped(err(), None));
        assert_eq!(failed.value(), None);
    }
}
