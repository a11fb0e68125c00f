use crate::{scheduler::SchedulerError, store::StoreError, Error};

/// Also returned when some builds failed.
pub const SUCCESS: u8 = 0;
pub const UNEXPECTED: u8 = 1;
pub const CONFIG: u8 = 2;
pub const INPUT: u8 = 3;
pub const CONSISTENCY: u8 = 4;
pub const CANCELLED: u8 = 130;

/// Process exit status for a run that ended with `error`.
pub fn for_error(error: &Error) -> u8 {
    match error {
        Error::Config(_) | Error::InvalidCommand { .. } | Error::NoBuildCommand => CONFIG,
        Error::NoCatalog | Error::Scheduler(SchedulerError::NoArchitectures) => CONFIG,
        Error::Input(_) => INPUT,
        Error::Resolve(_)
        | Error::Store(StoreError::DuplicateOutcome(_))
        | Error::Scheduler(
            SchedulerError::UnexpectedOutcome(_)
            | SchedulerError::MissingOutcomes(_)
            | SchedulerError::Store(StoreError::DuplicateOutcome(_)),
        ) => CONSISTENCY,
        Error::Store(StoreError::Cancelled) => CANCELLED,
        _ => UNEXPECTED,
    }
}
