//! Progress-callback trait for per-document conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ServiceConfigBuilder::progress_callback`] to receive
//! events as the orchestrator works through a request.
//!
//! # Example
//!
//! ```rust
//! use edgequake_office2pdf::{ConversionProgressCallback, ServiceConfig};
//! use std::path::Path;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_document_complete(&self, index: usize, total: usize, input: &Path) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}/{} {}", index, total, input.display());
//!     }
//! }
//!
//! let config = ServiceConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { completed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Called by the orchestrator as it processes a request.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Document indices are 1-based.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once after validation, before the first document is converted.
    fn on_conversion_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    fn on_document_start(&self, index: usize, total: usize, input: &Path) {
        let _ = (index, total, input);
    }

    fn on_document_complete(&self, index: usize, total: usize, input: &Path) {
        let _ = (index, total, input);
    }

    /// Called when a document fails. The request stops after this event.
    fn on_document_error(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called before `documents` PDFs are merged into one.
    fn on_merge(&self, documents: usize) {
        let _ = documents;
    }

    /// Called before `files` PDFs are converted to `format`.
    fn on_reformat(&self, format: &str, files: usize) {
        let _ = (format, files);
    }

    /// Called once when the request succeeded.
    fn on_conversion_complete(&self, total_documents: usize, outputs: &[PathBuf]) {
        let _ = (total_documents, outputs);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ServiceConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
