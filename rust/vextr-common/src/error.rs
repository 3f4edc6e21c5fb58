use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn out_of_memory(bytes: usize) -> Error {
        ErrorKind::OutOfMemory { bytes }.into()
    }

    pub fn index(index: isize, len: usize) -> Error {
        ErrorKind::Index { index, len }.into()
    }

    pub fn range(begin: isize, end: isize, len: usize) -> Error {
        ErrorKind::Range { begin, end, len }.into()
    }

    pub fn iterator_validity(position: usize, len: usize) -> Error {
        ErrorKind::IteratorValidity { position, len }.into()
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        ErrorKind::InvalidArgument {
            name: name.into(),
            message: message.into(),
        }
        .into()
    }

    pub fn invalid_operation(name: impl Into<String>) -> Error {
        ErrorKind::InvalidOperation { name: name.into() }.into()
    }

    pub fn os(context: impl Into<String>, source: std::io::Error) -> Error {
        ErrorKind::Os {
            context: context.into(),
            source,
        }
        .into()
    }

    /// Captures `errno` of the last failed libc call.
    pub fn last_os_error(context: impl Into<String>) -> Error {
        Error::os(context, std::io::Error::last_os_error())
    }

    pub fn interrupted(reason: InterruptionReason) -> Error {
        ErrorKind::Interrupted { reason }.into()
    }

    pub fn timeout(context: impl Into<String>) -> Error {
        ErrorKind::Timeout {
            context: context.into(),
        }
        .into()
    }

    /// Returns `true` if this error is a cooperative cancellation signal rather than
    /// a failure.
    pub fn is_interruption(&self) -> bool {
        matches!(self.kind(), ErrorKind::Interrupted { .. })
    }

    pub fn interruption_reason(&self) -> Option<InterruptionReason> {
        match self.kind() {
            ErrorKind::Interrupted { reason } => Some(*reason),
            _ => None,
        }
    }

    pub fn is_out_of_memory(&self) -> bool {
        matches!(self.kind(), ErrorKind::OutOfMemory { .. })
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("out of memory: failed to allocate {bytes} bytes")]
    OutOfMemory { bytes: usize },

    #[error("index {index} out of range for length {len}")]
    Index { index: isize, len: usize },

    #[error("range [{begin}, {end}) out of bounds for length {len}")]
    Range { begin: isize, end: isize, len: usize },

    #[error("position {position} is not a valid element position for length {len}")]
    IteratorValidity { position: usize, len: usize },

    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("invalid operation {name}")]
    InvalidOperation { name: String },

    #[error("OS error for '{context}': {source}")]
    Os {
        context: String,
        source: std::io::Error,
    },

    #[error("coroutine interrupted ({reason})")]
    Interrupted { reason: InterruptionReason },

    #[error("timed out: {context}")]
    Timeout { context: String },
}

/// Cause of a cooperative interruption delivered to a coroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InterruptionReason {
    /// `interrupt()` was called on the coroutine's handle.
    Execution = 1,
    /// Another coroutine on the same scheduler terminated with a fatal failure.
    SiblingFailure = 2,
    /// The scheduler's readiness facility failed.
    SchedulerFailure = 3,
    /// The application requested an orderly shutdown.
    ProcessExit = 4,
}

impl InterruptionReason {
    /// Packs the reason for an atomic slot; `0` is reserved for "none pending".
    pub fn to_raw(self) -> u8 {
        self as u8
    }

    pub fn from_raw(raw: u8) -> Option<InterruptionReason> {
        match raw {
            1 => Some(InterruptionReason::Execution),
            2 => Some(InterruptionReason::SiblingFailure),
            3 => Some(InterruptionReason::SchedulerFailure),
            4 => Some(InterruptionReason::ProcessExit),
            _ => None,
        }
    }
}

impl std::fmt::Display for InterruptionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InterruptionReason::Execution => "execution interruption",
            InterruptionReason::SiblingFailure => "sibling coroutine failure",
            InterruptionReason::SchedulerFailure => "scheduler failure",
            InterruptionReason::ProcessExit => "process exit",
        };
        f.write_str(s)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::os("", e)
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(_: std::convert::Infallible) -> Self {
        Error::invalid_operation("conversion")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interruption_reason_raw_roundtrip() {
        for reason in [
            InterruptionReason::Execution,
            InterruptionReason::SiblingFailure,
            InterruptionReason::SchedulerFailure,
            InterruptionReason::ProcessExit,
        ] {
            assert_eq!(InterruptionReason::from_raw(reason.to_raw()), Some(reason));
        }
        assert_eq!(InterruptionReason::from_raw(0), None);
    }

    #[test]
    fn test_error_classification() {
        let e = Error::interrupted(InterruptionReason::SiblingFailure);
        assert!(e.is_interruption());
        assert_eq!(
            e.interruption_reason(),
            Some(InterruptionReason::SiblingFailure)
        );
        assert!(!e.is_out_of_memory());

        let e = Error::out_of_memory(64);
        assert!(e.is_out_of_memory());
        assert_eq!(e.to_string(), "out of memory: failed to allocate 64 bytes");

        let e = Error::index(-4, 3);
        assert!(matches!(e.kind(), ErrorKind::Index { index: -4, len: 3 }));
    }

    #[test]
    fn test_io_conversion() {
        let e: Error = std::io::Error::other("epoll_wait").into();
        match e.into_kind() {
            ErrorKind::Os { context, source } => {
                assert!(context.is_empty());
                assert_eq!(source.kind(), std::io::ErrorKind::Other);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }
}
