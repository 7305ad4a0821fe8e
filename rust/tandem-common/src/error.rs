use thiserror::Error;

/// The error type shared by every tandem component.
///
/// Recoverable conditions (`TimedOut`, `Cancelled`, `Closed`, `QueueFull`, `HandlerFailure`)
/// are expected to be handled by the caller. Structural conditions (`CounterUnderflow`,
/// `HandlerPanic`) indicate a programming defect or a broken component and are reported
/// by [`Error::is_fatal`].
#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

pub type StdErrorBoxed = Box<dyn std::error::Error + Send + Sync + 'static>;

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn timed_out(operation: impl Into<String>) -> Error {
        ErrorKind::TimedOut {
            operation: operation.into(),
        }
        .into()
    }

    pub fn cancelled(operation: impl Into<String>) -> Error {
        ErrorKind::Cancelled {
            operation: operation.into(),
        }
        .into()
    }

    pub fn closed(resource: impl Into<String>) -> Error {
        ErrorKind::Closed {
            resource: resource.into(),
        }
        .into()
    }

    pub fn queue_full(resource: impl Into<String>) -> Error {
        ErrorKind::QueueFull {
            resource: resource.into(),
        }
        .into()
    }

    pub fn counter_underflow(counter: impl Into<String>) -> Error {
        ErrorKind::CounterUnderflow {
            counter: counter.into(),
        }
        .into()
    }

    pub fn handler_failure(job_id: u64, message: impl Into<String>) -> Error {
        ErrorKind::HandlerFailure {
            job_id,
            message: message.into(),
        }
        .into()
    }

    pub fn handler_panic(job_id: u64, worker: usize, message: impl Into<String>) -> Error {
        ErrorKind::HandlerPanic {
            job_id,
            worker,
            message: message.into(),
        }
        .into()
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

    pub fn config<E>(context: impl Into<String>, source: E) -> Error
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ErrorKind::Config {
            context: context.into(),
            source: Box::new(source),
        }
        .into()
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Error {
        ErrorKind::Io {
            context: context.into(),
            source,
        }
        .into()
    }

    /// Returns `true` for structural failures: the component that raised the error is
    /// broken (or misused) and retrying the operation cannot help.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::CounterUnderflow { .. } | ErrorKind::HandlerPanic { .. }
        )
    }

    /// Returns `true` when the same call may succeed if issued again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TimedOut { .. } | ErrorKind::QueueFull { .. }
        )
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self.kind(), ErrorKind::TimedOut { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind(), ErrorKind::Cancelled { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.kind(), ErrorKind::Closed { .. })
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("{operation} timed out")]
    TimedOut { operation: String },

    #[error("{operation} was cancelled")]
    Cancelled { operation: String },

    #[error("{resource} is closed")]
    Closed { resource: String },

    #[error("{resource} is full")]
    QueueFull { resource: String },

    #[error("counter underflow in {counter}: done() called more times than add()")]
    CounterUnderflow { counter: String },

    #[error("job {job_id} failed: {message}")]
    HandlerFailure { job_id: u64, message: String },

    #[error("handler panicked on worker {worker} while running job {job_id}: {message}")]
    HandlerPanic {
        job_id: u64,
        worker: usize,
        message: String,
    },

    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("invalid operation {name}")]
    InvalidOperation { name: String },

    #[error("invalid configuration '{context}': {source}")]
    Config {
        context: String,
        source: StdErrorBoxed,
    },

    #[error("IO error for '{context}': {source}'")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::io("", e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::config("json", e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::counter_underflow("tracker").is_fatal());
        assert!(Error::handler_panic(7, 1, "boom").is_fatal());
        assert!(!Error::handler_failure(7, "bad input").is_fatal());
        assert!(!Error::timed_out("acquire").is_fatal());
        assert!(!Error::closed("queue").is_fatal());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::timed_out("acquire").is_retryable());
        assert!(Error::queue_full("jobs").is_retryable());
        assert!(!Error::cancelled("acquire").is_retryable());
        assert!(!Error::closed("jobs").is_retryable());
    }

    #[test]
    fn test_display() {
        let err = Error::handler_failure(3, "division by zero");
        assert_eq!(err.to_string(), "job 3 failed: division by zero");
        let err = Error::closed("worker pool input");
        assert_eq!(err.to_string(), "worker pool input is closed");
        match err.into_kind() {
            ErrorKind::Closed { resource } => assert_eq!(resource, "worker pool input"),
            other => panic!("unexpected kind {other:?}"),
        }
    }
}
