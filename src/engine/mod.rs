//! PDF engines: merge and reformat already-produced PDFs.
//!
//! The orchestrator only sequences calls; what a merge or a PDF/A
//! conversion does is up to the engine. [`MultiPdfEngine`] chains several
//! engines so each operation goes to the first one that can do it.

mod qpdf;
mod uno;

pub use qpdf::QpdfEngine;
pub use uno::UnoPdfEngine;

use crate::cancel::Cancellation;
use crate::error::EngineError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// A backend able to merge PDFs and/or convert them to another PDF flavour.
///
/// Engines that do not implement an operation return
/// [`EngineError::MethodNotAvailable`]; engines that do not know a format
/// return [`EngineError::FormatNotAvailable`].
#[async_trait]
pub trait PdfEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Merge `inputs`, in order, into `output`.
    async fn merge(
        &self,
        ctx: &Cancellation,
        inputs: &[PathBuf],
        output: &Path,
    ) -> Result<(), EngineError>;

    /// Convert `input` to the PDF flavour `format` (e.g. `PDF/A-1a`) into `output`.
    async fn convert(
        &self,
        ctx: &Cancellation,
        format: &str,
        input: &Path,
        output: &Path,
    ) -> Result<(), EngineError>;
}

/// Tries each engine in order; the first success wins.
#[derive(Clone)]
pub struct MultiPdfEngine {
    engines: Vec<Arc<dyn PdfEngine>>,
}

impl MultiPdfEngine {
    pub fn new(engines: Vec<Arc<dyn PdfEngine>>) -> Self {
        Self { engines }
    }

    pub fn engines(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.engines.iter().map(|e| e.name())
    }
}

#[async_trait]
impl PdfEngine for MultiPdfEngine {
    fn name(&self) -> &'static str {
        "multi"
    }

    async fn merge(
        &self,
        ctx: &Cancellation,
        inputs: &[PathBuf],
        output: &Path,
    ) -> Result<(), EngineError> {
        let mut errors = Vec::new();
        for engine in &self.engines {
            match engine.merge(ctx, inputs, output).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    debug!("{} could not merge: {}", engine.name(), e);
                    errors.push(e);
                }
            }
        }
        Err(EngineError::All(errors))
    }

    async fn convert(
        &self,
        ctx: &Cancellation,
        format: &str,
        input: &Path,
        output: &Path,
    ) -> Result<(), EngineError> {
        let mut errors = Vec::new();
        for engine in &self.engines {
            match engine.convert(ctx, format, input, output).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    debug!("{} could not convert to {}: {}", engine.name(), format, e);
                    errors.push(e);
                }
            }
        }
        Err(EngineError::All(errors))
    }
}
