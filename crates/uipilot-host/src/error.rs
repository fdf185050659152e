use std::path::PathBuf;

use thiserror::Error;

use uipilot_model::CaptureFailed;
use uipilot_model::InputRejected;

/// Failures while resolving a tree query. Ambiguity and absence are kept
/// apart so callers can tell an over-broad query from a wrong one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("query parse error at byte {position}: {reason}")]
    Parse { position: usize, reason: String },

    #[error("no element matches query segment '{segment}'")]
    NotFound { segment: String },

    #[error("query segment '{segment}' is ambiguous: {count} candidates remain")]
    Ambiguous { segment: String, count: usize },

    #[error("element has no property named '{property}' to descend into")]
    NoSuchProperty { property: String },

    #[error("property '{property}' does not hold an element")]
    NotAnElement { property: String },
}

/// Failures raised while executing a control operation. Every variant's
/// message ends up in the `error_messages` list of the wire result.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("no live element with identity '{0}'")]
    UnknownElement(String),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("application has no main window")]
    NoMainWindow,

    #[error("element has no property named '{0}'")]
    UnknownProperty(String),

    #[error("property '{0}' rejected the write")]
    PropertyRejected(String),

    #[error("no serializer accepts type '{0}'")]
    SerializationUnavailable(String),

    #[error("cannot parse '{value}' as {type_name}")]
    MalformedValue { type_name: String, value: String },

    #[error("serializer catalog has no entry named '{0}'")]
    UnknownSerializer(String),

    #[error("event registration '{0}' already exists")]
    DuplicateRegistration(String),

    #[error("no event registration '{0}'")]
    UnknownRegistration(String),

    #[error("element has no event named '{0}'")]
    UnknownEvent(String),

    #[error("event '{event}' cannot be observed: {reason}")]
    UnsupportedEventShape { event: String, reason: String },

    #[error("failed to detach handler for registration '{0}'")]
    DetachFailed(String),

    #[error("element '{0}' cannot take keyboard focus")]
    NotFocusable(String),

    #[error("no ancestor paints a background")]
    NoBackground,

    #[error("input injection is not configured")]
    NoInputInjector,

    #[error("screen capture is not configured")]
    NoScreenshotSource,

    #[error(transparent)]
    Input(#[from] InputRejected),

    #[error(transparent)]
    Capture(#[from] CaptureFailed),

    #[error("ui dispatch failed: {0}")]
    Dispatch(String),
}

/// Failures while bringing the host itself up.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("failed to bind control socket at {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to start worker threads: {0}")]
    WorkerSpawn(std::io::Error),
}
