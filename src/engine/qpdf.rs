//! Merge engine backed by the `qpdf` command-line tool.

use super::PdfEngine;
use crate::cancel::Cancellation;
use crate::error::{ConvertError, EngineError};
use crate::pipeline::runner;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

const ENGINE: &str = "qpdf";

/// `qpdf` exits with 3 when it succeeded with warnings.
const EXIT_WARNINGS: i32 = 3;

#[derive(Debug, Clone)]
pub struct QpdfEngine {
    bin_path: PathBuf,
}

impl QpdfEngine {
    pub fn new(bin_path: impl Into<PathBuf>) -> Self {
        Self {
            bin_path: bin_path.into(),
        }
    }

    fn merge_args(inputs: &[PathBuf], output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--empty".into(), "--pages".into()];
        args.extend(inputs.iter().map(|p| p.as_os_str().to_owned()));
        args.push("--".into());
        args.push(output.as_os_str().to_owned());
        args
    }
}

#[async_trait]
impl PdfEngine for QpdfEngine {
    fn name(&self) -> &'static str {
        ENGINE
    }

    async fn merge(
        &self,
        ctx: &Cancellation,
        inputs: &[PathBuf],
        output: &Path,
    ) -> Result<(), EngineError> {
        let args = Self::merge_args(inputs, output);
        match runner::run(ctx, &self.bin_path, &args).await {
            Ok(0) | Ok(EXIT_WARNINGS) => Ok(()),
            Ok(code) => Err(EngineError::Failed {
                engine: ENGINE,
                detail: format!("exit code {code}"),
            }),
            Err(ConvertError::Cancelled { reason }) => Err(EngineError::Cancelled {
                engine: ENGINE,
                reason,
            }),
            Err(e) => Err(EngineError::Failed {
                engine: ENGINE,
                detail: e.to_string(),
            }),
        }
    }

    async fn convert(
        &self,
        _ctx: &Cancellation,
        _format: &str,
        _input: &Path,
        _output: &Path,
    ) -> Result<(), EngineError> {
        Err(EngineError::MethodNotAvailable {
            engine: ENGINE,
            method: "PDF format conversion",
        })
    }
}
