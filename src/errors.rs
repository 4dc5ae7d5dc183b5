use std::path::PathBuf;
use thiserror::Error;

/// Error type for trace setup and recording operations.
///
/// Discovery and registration failures are configuration errors and
/// surface immediately. Failures during a traced call never do; they
/// abort the recorder instead, and the abort reason comes back out of
/// `flush` as [`TraceError::Aborted`].
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("unknown unit: {0} is not registered")]
    UnknownUnit(String),

    #[error("duplicate unit: {0} is already registered")]
    DuplicateUnit(String),

    #[error("location {0} does not yield a valid unit name")]
    BadLocation(PathBuf),

    #[error("no registered unit found on the call stack after {steps} lookups")]
    CallerUnresolved { steps: usize },

    #[error("caller walk exceeded {0} steps")]
    CallerWalkCeiling(usize),

    #[error("trace aborted: {0}")]
    Aborted(String),

    #[error("unknown member: {0} is not bound")]
    UnknownMember(String),

    #[error("member {0} is not callable")]
    NotCallable(String),

    #[error("member {0} is not a class")]
    NotAClass(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TraceError>;
