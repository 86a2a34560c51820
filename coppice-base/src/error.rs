// We want a few things here:
// 1. A way to create a new error with a backtrace
// 2. A way to centralize setting a breakpoint to trap any error in the system fairly soon
//    after it's created (or at least when it's propagated from a library we use back to us)
// 3. Same but for logging / emitting error messages into the tracing/logging system
// 4. A small taxonomy callers can match on, for the handful of error kinds the repository
//    protocol itself distinguishes (as opposed to generic I/O or parse failures).

use std::borrow::Cow;

use backtrace_error::DynBacktraceError;
use tracing::error;

#[cfg(test)]
use test_log::test;

/// The repository-protocol-level taxonomy a caller might want to branch on.
/// Anything that doesn't fit one of these is `Other` -- a wrapped I/O error,
/// a parse failure, etc. still carries a backtrace and still logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or out-of-sequence wire traffic.
    Protocol,
    /// A save failed optimistic-concurrency validation at prepare time.
    Conflict,
    /// A lookup by id or path found nothing.
    NotFound,
    /// A value didn't match the property's declared type or constraints.
    Value,
    /// A documented-but-unimplemented operation was invoked.
    NotImplemented,
    /// Anything else.
    Other,
}

#[derive(Debug)]
#[allow(dead_code)]
pub struct Error {
    kind: ErrorKind,
    inner: DynBacktraceError,
}
pub type Result<T> = std::result::Result<T, Error>;

struct SimpleErr(Cow<'static, str>);
impl std::fmt::Debug for SimpleErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::fmt::Display for SimpleErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for SimpleErr {
    fn description(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl<E: std::error::Error + Send + Sync + 'static> From<E> for Error {
    fn from(err: E) -> Error {
        Error::with_kind(ErrorKind::Other, err)
    }
}

impl Error {
    pub fn new<E: std::error::Error + Send + Sync + 'static>(err: E) -> Error {
        Error::with_kind(ErrorKind::Other, err)
    }

    pub fn with_kind<E: std::error::Error + Send + Sync + 'static>(
        kind: ErrorKind,
        err: E,
    ) -> Error {
        error!(target: "coppice", kind = ?kind, "{:?}", err);
        let inner = DynBacktraceError::from(err);
        Error { kind, inner }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub fn err(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::with_kind(ErrorKind::Other, SimpleErr(msg.into()))
}

/// Malformed or out-of-sequence wire traffic: a command letter we don't
/// recognize, a payload length that doesn't match what followed it, a state
/// block missing a required field.
pub fn protocol_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::with_kind(ErrorKind::Protocol, SimpleErr(msg.into()))
}

/// A prepare-phase validation failure: the object was modified by another
/// session since it was last read.
pub fn conflict_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::with_kind(ErrorKind::Conflict, SimpleErr(msg.into()))
}

/// A lookup by id, path, or name found nothing.
pub fn not_found(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::with_kind(ErrorKind::NotFound, SimpleErr(msg.into()))
}

/// A value didn't match its property's declared type, cardinality, or
/// constraints.
pub fn value_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::with_kind(ErrorKind::Value, SimpleErr(msg.into()))
}

/// An operation that exists in the interface contract but has no
/// implementation on either end of the wire.
pub fn not_implemented(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::with_kind(ErrorKind::NotImplemented, SimpleErr(msg.into()))
}

#[test]
fn test_error() {
    let err = err("test error");
    assert_eq!(err.kind(), ErrorKind::Other);
}

#[test]
fn test_error_kinds() {
    assert_eq!(protocol_error("bad command").kind(), ErrorKind::Protocol);
    assert_eq!(conflict_error("stale").kind(), ErrorKind::Conflict);
    assert_eq!(not_found("no such id").kind(), ErrorKind::NotFound);
    assert_eq!(value_error("wrong type").kind(), ErrorKind::Value);
    assert_eq!(
        not_implemented("get_pending_events").kind(),
        ErrorKind::NotImplemented
    );
}
