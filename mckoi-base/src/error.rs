// We want a few things here:
// 1. A way to create a new error with a backtrace
// 2. A way to centralize setting a breakpoint to trap any error in the system fairly soon
//    after it's created (or at least when it's propagated from a library we use back to us)
// 3. Same but for logging / emitting error messages into the tracing/logging system
// 4. A stable `kind` tag on every error, since callers (and tests) need to match on
//    error category (per spec §7, "All errors carry a stable kind tag") without
//    downcasting through the backtrace wrapper.

use std::borrow::Cow;
use std::fmt;

use backtrace_error::DynBacktraceError;
use serde::{Deserialize, Serialize};
use tracing::error;

#[cfg(test)]
use test_log::test;

/// Stable classification of an error, independent of its message or backtrace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed config, missing required key, invalid byte/time grammar. Fatal at startup.
    Config,
    /// Timeout, unreachable peer, authentication failure. Retryable.
    Network,
    /// Missing node id, missing path, missing key.
    NotFound,
    /// Two differing payloads under the same permanent node id.
    ImmutableConflict,
    /// A commit could not be reconciled with intervening commits.
    CommitFault(CommitFaultKind),
    /// Underlying filesystem-layer violation (invalid path, already exists, not empty).
    FileSystem,
    /// Operation attempted on a disposed/committed transaction or closed session.
    Invalidated,
    /// Unreachable state; a bug.
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommitFaultKind {
    BaseTooOld,
    ConcurrentConflict,
    MergeRequired,
    /// `rollback --to COMMIT_ID` named a commit older than the retained
    /// history ring (spec.md §4.3.5, SPEC_FULL.md §4.3.5).
    RollbackTooOld,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Config => write!(f, "config"),
            ErrorKind::Network => write!(f, "network"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::ImmutableConflict => write!(f, "immutable_conflict"),
            ErrorKind::CommitFault(CommitFaultKind::BaseTooOld) => {
                write!(f, "commit_fault(base_too_old)")
            }
            ErrorKind::CommitFault(CommitFaultKind::ConcurrentConflict) => {
                write!(f, "commit_fault(concurrent_conflict)")
            }
            ErrorKind::CommitFault(CommitFaultKind::MergeRequired) => {
                write!(f, "commit_fault(merge_required)")
            }
            ErrorKind::CommitFault(CommitFaultKind::RollbackTooOld) => {
                write!(f, "commit_fault(rollback_too_old)")
            }
            ErrorKind::FileSystem => write!(f, "filesystem"),
            ErrorKind::Invalidated => write!(f, "invalidated"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    inner: DynBacktraceError,
}
pub type Result<T> = std::result::Result<T, Error>;

struct SimpleErr(Cow<'static, str>);
impl fmt::Debug for SimpleErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl fmt::Display for SimpleErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for SimpleErr {
    fn description(&self) -> &str {
        &self.0
    }
}

impl<E: std::error::Error + Send + Sync + 'static> From<E> for Error {
    fn from(err: E) -> Error {
        Error::new(ErrorKind::Internal, err)
    }
}

impl Error {
    pub fn new<E: std::error::Error + Send + Sync + 'static>(kind: ErrorKind, err: E) -> Error {
        error!(target: "mckoi", kind = %kind, "{:?}", err);
        let dbe = DynBacktraceError::from(err);
        Error { kind, inner: dbe }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Per spec §7: network errors are retried locally up to a budget;
    /// consistency errors never are.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Network)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.inner)
    }
}

pub fn err(msg: impl Into<Cow<'static, str>>) -> Error {
    err_kind(ErrorKind::Internal, msg)
}

pub fn err_kind(kind: ErrorKind, msg: impl Into<Cow<'static, str>>) -> Error {
    Error::new(kind, SimpleErr(msg.into()))
}

#[test]
fn test_error() {
    let e = err_kind(ErrorKind::NotFound, "missing node");
    assert_eq!(e.kind(), ErrorKind::NotFound);
    assert!(format!("{e}").contains("missing node"));
}

#[test]
fn test_retryable() {
    let net = err_kind(ErrorKind::Network, "timeout");
    let cfg = err_kind(ErrorKind::Config, "bad key");
    assert!(net.is_retryable());
    assert!(!cfg.is_retryable());
}
