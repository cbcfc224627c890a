//! Error types for the edgequake-office2pdf library.
//!
//! Two error types reflect the two kinds of collaborator:
//!
//! * [`ConvertError`]: everything the conversion layer itself can fail with:
//!   bad request options, a worker that exited non-zero, a listener that
//!   would not start, a cancelled request. Returned from every public
//!   conversion entry point.
//!
//! * [`EngineError`]: failures reported by a [`crate::engine::PdfEngine`]
//!   during merge or reformat. The orchestrator folds these into
//!   [`ConvertError`], turning "format not available" into a client error.
//!
//! [`ConvertError::kind`] groups variants into the coarse taxonomy callers
//! route on (client input, worker failure, supervisor failure, cancellation).

use crate::cancel::CancelReason;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a [`ConvertError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// The request itself is wrong; retrying it unchanged will fail again.
    ClientInput,
    /// The worker (or a PDF engine) failed for reasons the client cannot fix.
    WorkerFailure,
    /// The long-running listener could not be started, stopped or reached.
    SupervisorFailure,
    /// The request context was cancelled or timed out.
    Cancelled,
    /// Local I/O or an invariant of this crate broke.
    Internal,
}

/// All errors returned by the conversion layer.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Client input errors ───────────────────────────────────────────────
    /// The request carried no input documents.
    #[error("No input documents were provided")]
    NoInputs,

    /// An input document has an extension the worker cannot open.
    #[error("Unsupported file extension '{extension}' for '{path}'")]
    UnsupportedExtension { path: PathBuf, extension: String },

    /// Two mutually exclusive request fields were both set.
    #[error("Both '{first}' and '{second}' form fields are provided")]
    ConflictingOptions {
        first: &'static str,
        second: &'static str,
    },

    /// A native PDF format the worker does not know.
    #[error("Invalid PDF format '{format}' ({field})")]
    InvalidPdfFormat { format: String, field: &'static str },

    /// The worker rejected the page selection (best-effort detection, see
    /// [`crate::pipeline::uno::classify_exit`]).
    #[error("Malformed page ranges '{ranges}' (nativePageRanges)")]
    MalformedPageRanges { ranges: String },

    /// No PDF engine could produce the requested post-merge format.
    #[error(
        "At least one PDF engine does not handle the PDF format '{format}' (pdfFormat), \
while other have failed to convert for other reasons"
    )]
    PdfFormatNotAvailable {
        format: String,
        #[source]
        source: EngineError,
    },

    // ── Worker errors ─────────────────────────────────────────────────────
    /// The program could not be spawned at all (missing binary, permissions).
    #[error("Failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The worker exited with a non-zero status that has no better mapping.
    #[error("'{program}' exited with code {exit_code}")]
    WorkerFailed { program: String, exit_code: i32 },

    // ── Supervisor errors ─────────────────────────────────────────────────
    /// The listener did not accept connections before the start timeout.
    #[error("LibreOffice listener did not accept connections on port {port} within {timeout_ms}ms")]
    ListenerStartTimeout { port: u16, timeout_ms: u64 },

    /// The listener process exited while we were waiting for it.
    #[error("LibreOffice listener on port {port} exited during start-up (exit code {exit_code:?})")]
    ListenerExited { port: u16, exit_code: Option<i32> },

    /// No local TCP port could be reserved for a new listener.
    #[error("No free TCP port available for the LibreOffice listener: {source}")]
    NoFreePort {
        #[source]
        source: std::io::Error,
    },

    /// The listener did not terminate cleanly.
    #[error("LibreOffice listener did not stop cleanly: {detail}")]
    ListenerStop { detail: String },

    /// [`crate::pipeline::listener::Listener::shutdown`] has been called.
    #[error("LibreOffice listener is shut down")]
    ListenerClosed,

    /// A supervisor operation failed on behalf of a conversion.
    #[error("{action} LibreOffice listener: {source}")]
    Supervisor {
        action: &'static str,
        #[source]
        source: Box<ConvertError>,
    },

    // ── PDF engine errors ─────────────────────────────────────────────────
    /// Merge or reformat failed for a reason other than an unsupported format.
    #[error("{stage} PDFs: {source}")]
    Engine {
        stage: &'static str,
        #[source]
        source: EngineError,
    },

    // ── Cancellation ──────────────────────────────────────────────────────
    /// The request context fired before the work completed.
    #[error("Conversion aborted: {reason}")]
    Cancelled { reason: CancelReason },

    // ── I/O errors ────────────────────────────────────────────────────────
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    /// Wrap a supervisor failure so the caller sees which operation failed.
    ///
    /// Cancellation is passed through untouched: a cancelled start is a
    /// cancelled request, not a broken listener.
    pub fn supervisor(action: &'static str, source: ConvertError) -> Self {
        match source {
            ConvertError::Cancelled { .. } => source,
            other => ConvertError::Supervisor {
                action,
                source: Box::new(other),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvertError::NoInputs
            | ConvertError::UnsupportedExtension { .. }
            | ConvertError::ConflictingOptions { .. }
            | ConvertError::InvalidPdfFormat { .. }
            | ConvertError::MalformedPageRanges { .. }
            | ConvertError::PdfFormatNotAvailable { .. } => ErrorKind::ClientInput,

            ConvertError::Launch { .. } | ConvertError::WorkerFailed { .. } => {
                ErrorKind::WorkerFailure
            }

            ConvertError::ListenerStartTimeout { .. }
            | ConvertError::ListenerExited { .. }
            | ConvertError::NoFreePort { .. }
            | ConvertError::ListenerStop { .. }
            | ConvertError::ListenerClosed
            | ConvertError::Supervisor { .. } => ErrorKind::SupervisorFailure,

            ConvertError::Engine { source, .. } if source.is_cancelled() => ErrorKind::Cancelled,
            ConvertError::Engine { .. } => ErrorKind::WorkerFailure,

            ConvertError::Cancelled { .. } => ErrorKind::Cancelled,

            ConvertError::Io { .. }
            | ConvertError::InvalidConfig(_)
            | ConvertError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.kind() == ErrorKind::ClientInput
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }

    /// The HTTP status an API layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::ClientInput => 400,
            ErrorKind::Cancelled => 503,
            ErrorKind::WorkerFailure | ErrorKind::SupervisorFailure | ErrorKind::Internal => 500,
        }
    }
}

/// Errors reported by a PDF engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine does not implement the requested output format.
    #[error("PDF format '{format}' is not available in {engine}")]
    FormatNotAvailable { engine: &'static str, format: String },

    /// The engine does not implement the operation at all (e.g. merge).
    #[error("{method} is not available in {engine}")]
    MethodNotAvailable {
        engine: &'static str,
        method: &'static str,
    },

    /// The engine tried and failed.
    #[error("{engine} failed: {detail}")]
    Failed { engine: &'static str, detail: String },

    /// The request context fired while the engine was running.
    #[error("{engine} aborted: {reason}")]
    Cancelled {
        engine: &'static str,
        reason: CancelReason,
    },

    /// Every engine of a [`crate::engine::MultiPdfEngine`] failed.
    #[error("all PDF engines failed: [{}]", join_errors(.0))]
    All(Vec<EngineError>),
}

impl EngineError {
    /// True if this error, or any error it aggregates, reports an unsupported format.
    pub fn is_format_not_available(&self) -> bool {
        match self {
            EngineError::FormatNotAvailable { .. } => true,
            EngineError::All(errors) => errors.iter().any(EngineError::is_format_not_available),
            _ => false,
        }
    }

    /// True if the engine declined the work instead of failing at it.
    pub fn is_unavailable(&self) -> bool {
        match self {
            EngineError::FormatNotAvailable { .. } | EngineError::MethodNotAvailable { .. } => true,
            EngineError::All(errors) => !errors.is_empty() && errors.iter().all(EngineError::is_unavailable),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            EngineError::Cancelled { .. } => true,
            EngineError::All(errors) => errors.iter().any(EngineError::is_cancelled),
            _ => false,
        }
    }
}

fn join_errors(errors: &[EngineError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
