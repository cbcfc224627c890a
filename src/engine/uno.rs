//! PDF/A conversion engine that re-exports a PDF through LibreOffice.

use super::PdfEngine;
use crate::cancel::Cancellation;
use crate::config::PdfFormat;
use crate::error::{ConvertError, EngineError};
use crate::pipeline::uno::{Uno, UnoOptions};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

const ENGINE: &str = "uno";

/// Converts PDFs to PDF/A-1a, PDF/A-2b or PDF/A-3b with the same
/// [`Uno`] invoker (and therefore the same listener) used for documents.
#[derive(Debug, Clone)]
pub struct UnoPdfEngine {
    uno: Uno,
}

impl UnoPdfEngine {
    pub fn new(uno: Uno) -> Self {
        Self { uno }
    }
}

#[async_trait]
impl PdfEngine for UnoPdfEngine {
    fn name(&self) -> &'static str {
        ENGINE
    }

    async fn merge(
        &self,
        _ctx: &Cancellation,
        _inputs: &[PathBuf],
        _output: &Path,
    ) -> Result<(), EngineError> {
        Err(EngineError::MethodNotAvailable {
            engine: ENGINE,
            method: "merge",
        })
    }

    async fn convert(
        &self,
        ctx: &Cancellation,
        format: &str,
        input: &Path,
        output: &Path,
    ) -> Result<(), EngineError> {
        let pdf_format: PdfFormat = format.parse().map_err(|_| EngineError::FormatNotAvailable {
            engine: ENGINE,
            format: format.to_string(),
        })?;

        let options = UnoOptions {
            pdf_format: Some(pdf_format),
            ..UnoOptions::default()
        };

        self.uno
            .pdf(ctx, input, output, &options)
            .await
            .map_err(|e| match e {
                ConvertError::Cancelled { reason } => EngineError::Cancelled {
                    engine: ENGINE,
                    reason,
                },
                other => EngineError::Failed {
                    engine: ENGINE,
                    detail: other.to_string(),
                },
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::listener::SofficeLauncher;
    use crate::pipeline::uno::{EphemeralWorkers, WorkerMode};
    use std::sync::Arc;
    use std::time::Duration;

    fn engine() -> UnoPdfEngine {
        let workers = EphemeralWorkers::new(
            Arc::new(SofficeLauncher::new("/definitely/not/here/soffice")),
            Duration::from_secs(1),
            Duration::from_millis(100),
        );
        UnoPdfEngine::new(Uno::new("unoconv", WorkerMode::Ephemeral(workers)))
    }

    #[tokio::test]
    async fn unknown_format_is_not_available() {
        let err = engine()
            .convert(
                &Cancellation::new(),
                "PDF/A-4u",
                Path::new("in.pdf"),
                Path::new("out.pdf"),
            )
            .await
            .unwrap_err();
        assert!(err.is_format_not_available());
    }

    #[tokio::test]
    async fn merge_is_not_available() {
        let err = engine()
            .merge(&Cancellation::new(), &[], Path::new("out.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MethodNotAvailable { .. }));
    }

    #[tokio::test]
    async fn worker_start_failure_is_an_engine_failure() {
        let err = engine()
            .convert(
                &Cancellation::new(),
                "pdf/a-1a",
                Path::new("in.pdf"),
                Path::new("out.pdf"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Failed { .. }), "got: {err:?}");
    }
}
