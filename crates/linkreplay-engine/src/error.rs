use linkreplay_abstract::ConfigError;
use std::path::PathBuf;

/// What was wrong with a trace line.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TraceFormatErrorKind {
    #[error("expected 5 fields, found {0}")]
    FieldCount(usize),
    #[error("field {column} is not a number: {value:?}")]
    NotANumber { column: usize, value: String },
    #[error("field {column} must be finite and non-negative, got {value}")]
    OutOfRange { column: usize, value: f64 },
    #[error("loss {0} is outside 0-100 percent")]
    Loss(f64),
    #[error("timestamp {current} is earlier than previous {previous}")]
    TimeWentBackwards { previous: f64, current: f64 },
    #[error("unreadable line: {0}")]
    Read(String),
}

/// A malformed trace. The whole load is rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("trace line {line}: {kind}")]
pub struct TraceFormatError {
    /// 1-based line number.
    pub line: usize,
    pub kind: TraceFormatErrorKind,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error(transparent)]
    TraceFormat(#[from] TraceFormatError),
    #[error("failed to read trace {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unknown endpoint {0:?}")]
    UnknownEndpoint(String),
    #[error("endpoint {0:?} is already registered in this session")]
    DuplicateEndpoint(String),
    #[error("endpoint {0:?} is registered in another live session")]
    EndpointInUse(String),
    #[error("cannot start a session with no endpoints")]
    EmptySession,
    #[error("session is closed")]
    SessionClosed,
    #[error("session is already running")]
    AlreadyRunning,
    #[error("session is not running")]
    NotRunning,
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
    #[error("replay runtime: {0}")]
    Runtime(String),
}
