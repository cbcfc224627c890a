//! Conversion entry points: the request pipeline.
//!
//! A request runs in three steps, each optional after the first:
//!
//! ```text
//! validate ──▶ convert each document ──▶ merge (N > 1) ──▶ reformat
//!               (uno, fail-fast)         (PDF engine)      (PDF engine)
//! ```
//!
//! Every file a request produces lives in a path handed out by a
//! [`PathGenerator`]. Files that do not make it into the result are deleted
//! before the call returns, on success, on error and when the future is
//! dropped.

use crate::cancel::Cancellation;
use crate::config::ServiceConfig;
use crate::engine::{MultiPdfEngine, PdfEngine, QpdfEngine, UnoPdfEngine};
use crate::error::{ConvertError, EngineError};
use crate::output::{ConversionOutput, ConversionStats};
use crate::pipeline::uno::{OutputFormat, Uno};
use crate::progress::ProgressCallback;
use crate::request::{ConversionPlan, ConversionRequest, ThumbnailRequest};
use crate::workdir::{PathGenerator, WorkDir};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// File name of a merged result written by [`Converter::convert_into`].
pub const MERGED_FILE_NAME: &str = "merged.pdf";

/// Runs conversion requests against one [`Uno`] invoker and one PDF engine.
///
/// Cheap to clone; clones share the listener and the instance counter.
#[derive(Clone)]
pub struct Converter {
    uno: Uno,
    engine: Arc<dyn PdfEngine>,
    progress: Option<ProgressCallback>,
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter")
            .field("uno", &self.uno)
            .field("engine", &self.engine.name())
            .field("progress", &self.progress.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl Converter {
    pub fn new(uno: Uno, engine: Arc<dyn PdfEngine>) -> Self {
        Self {
            uno,
            engine,
            progress: None,
        }
    }

    /// Production wiring: `soffice` listener (or ephemeral workers), `qpdf`
    /// for merges when configured, LibreOffice for PDF/A conversion.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn from_config(config: &ServiceConfig) -> Self {
        let uno = Uno::from_config(config);
        let mut engines: Vec<Arc<dyn PdfEngine>> = Vec::new();
        if let Some(qpdf) = &config.qpdf_bin_path {
            engines.push(Arc::new(QpdfEngine::new(qpdf)));
        }
        engines.push(Arc::new(UnoPdfEngine::new(uno.clone())));

        Self {
            uno,
            engine: Arc::new(MultiPdfEngine::new(engines)),
            progress: config.progress_callback.clone(),
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn uno(&self) -> &Uno {
        &self.uno
    }

    /// Start the shared listener now instead of on the first request.
    /// A no-op in ephemeral mode.
    pub async fn start(&self, ctx: &Cancellation) -> Result<(), ConvertError> {
        match self.uno.listener() {
            Some(listener) => listener
                .start(ctx)
                .await
                .map(|port| debug!(port, "LibreOffice listener started"))
                .map_err(|e| ConvertError::supervisor("starting", e)),
            None => Ok(()),
        }
    }

    /// Stop the shared listener after the conversion in flight, if any.
    pub async fn shutdown(&self) -> Result<(), ConvertError> {
        match self.uno.listener() {
            Some(listener) => listener
                .shutdown()
                .await
                .map_err(|e| ConvertError::supervisor("stopping", e)),
            None => Ok(()),
        }
    }

    /// Conversions running right now.
    pub fn active_instances(&self) -> usize {
        self.uno.counter().active()
    }

    /// Convert the request's documents to PDF, then merge and reformat as
    /// requested.
    ///
    /// # Returns
    /// One output path if the documents were merged, otherwise one per input
    /// in input order. The files live wherever `paths` puts them.
    ///
    /// # Errors
    /// Client errors ([`ConvertError::is_client_error`]) are reported before
    /// any document is converted, except a malformed page range, which is
    /// only detected by the worker. The first failing document aborts the
    /// request.
    pub async fn convert(
        &self,
        ctx: &Cancellation,
        request: &ConversionRequest,
        paths: &dyn PathGenerator,
    ) -> Result<ConversionOutput, ConvertError> {
        let started = Instant::now();
        let plan = request.validate(self.uno.extensions())?;
        self.execute(ctx, &plan, OutputFormat::Pdf, paths, started)
            .await
    }

    /// Render the first page of each document to PNG.
    pub async fn generate_thumbnails(
        &self,
        ctx: &Cancellation,
        request: &ThumbnailRequest,
        paths: &dyn PathGenerator,
    ) -> Result<ConversionOutput, ConvertError> {
        let started = Instant::now();
        let plan = request.validate(self.uno.extensions())?;
        self.execute(ctx, &plan, OutputFormat::Png, paths, started)
            .await
    }

    /// Run [`convert`](Self::convert) in a private work directory and move
    /// the results into `output_dir`.
    ///
    /// Results are named after their input (`report.docx` → `report.pdf`),
    /// or [`MERGED_FILE_NAME`] when merged. Each file is copied to a `.tmp`
    /// sibling first and renamed into place.
    pub async fn convert_into(
        &self,
        ctx: &Cancellation,
        request: &ConversionRequest,
        output_dir: impl AsRef<Path>,
    ) -> Result<ConversionOutput, ConvertError> {
        let work = WorkDir::new()?;
        let output = self.convert(ctx, request, &work).await?;
        let names = final_names(&request.inputs, output.output_paths.len(), ".pdf");
        persist(output, &names, output_dir.as_ref()).await
    }

    /// [`generate_thumbnails`](Self::generate_thumbnails) into `output_dir`.
    pub async fn thumbnails_into(
        &self,
        ctx: &Cancellation,
        request: &ThumbnailRequest,
        output_dir: impl AsRef<Path>,
    ) -> Result<ConversionOutput, ConvertError> {
        let work = WorkDir::new()?;
        let output = self.generate_thumbnails(ctx, request, &work).await?;
        let names = final_names(&request.inputs, output.output_paths.len(), ".png");
        persist(output, &names, output_dir.as_ref()).await
    }

    async fn execute(
        &self,
        ctx: &Cancellation,
        plan: &ConversionPlan,
        format: OutputFormat,
        paths: &dyn PathGenerator,
        started: Instant,
    ) -> Result<ConversionOutput, ConvertError> {
        let total = plan.inputs.len();
        let mut scratch = Scratch::default();
        info!(
            "Converting {} document(s) to {}",
            total,
            format.as_unoconv()
        );
        if let Some(cb) = &self.progress {
            cb.on_conversion_start(total);
        }

        // ── Step 1: Convert each document ────────────────────────────────
        let convert_start = Instant::now();
        let mut outputs = Vec::with_capacity(total);
        for (i, input) in plan.inputs.iter().enumerate() {
            let index = i + 1;
            let output = paths.generate_path(format.extension());
            scratch.track(&output);

            if let Some(cb) = &self.progress {
                cb.on_document_start(index, total, input);
            }
            if let Err(e) = self
                .uno
                .convert(ctx, input, &output, &plan.options, format)
                .await
            {
                warn!("Document {}/{} ({}) failed: {}", index, total, input.display(), e);
                if let Some(cb) = &self.progress {
                    cb.on_document_error(index, total, &e.to_string());
                }
                return Err(e);
            }
            if let Some(cb) = &self.progress {
                cb.on_document_complete(index, total, input);
            }
            outputs.push(output);
        }
        let convert_duration_ms = elapsed_ms(convert_start);

        // ── Step 2: Merge ────────────────────────────────────────────────
        let post_start = Instant::now();
        let merged = plan.merge && outputs.len() > 1;
        if merged {
            let target = paths.generate_path(".pdf");
            scratch.track(&target);
            if let Some(cb) = &self.progress {
                cb.on_merge(outputs.len());
            }
            debug!("Merging {} PDFs with {}", outputs.len(), self.engine.name());
            self.engine
                .merge(ctx, &outputs, &target)
                .await
                .map_err(|source| ConvertError::Engine {
                    stage: "merge",
                    source,
                })?;
            outputs = vec![target];
        }

        // ── Step 3: Reformat ─────────────────────────────────────────────
        if let Some(pdf_format) = &plan.pdf_format {
            if let Some(cb) = &self.progress {
                cb.on_reformat(pdf_format, outputs.len());
            }
            let mut reformatted = Vec::with_capacity(outputs.len());
            for input in &outputs {
                let target = paths.generate_path(".pdf");
                scratch.track(&target);
                self.engine
                    .convert(ctx, pdf_format, input, &target)
                    .await
                    .map_err(|source| reformat_error(pdf_format, source))?;
                reformatted.push(target);
            }
            outputs = reformatted;
        }

        // ── Step 4: Keep the results, drop the intermediates ─────────────
        scratch.keep(&outputs);
        drop(scratch);

        let stats = ConversionStats {
            documents: total,
            merged,
            reformatted: plan.pdf_format.clone(),
            duration_ms: elapsed_ms(started),
            convert_duration_ms,
            post_process_duration_ms: elapsed_ms(post_start),
        };
        info!(
            "Conversion complete: {} document(s) → {} file(s), {}ms total",
            total,
            outputs.len(),
            stats.duration_ms
        );
        if let Some(cb) = &self.progress {
            cb.on_conversion_complete(total, &outputs);
        }

        Ok(ConversionOutput {
            output_paths: outputs,
            stats,
        })
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// An engine that declined the format (rather than failing at it) is the
/// client's problem; anything else is ours.
fn reformat_error(format: &str, source: EngineError) -> ConvertError {
    if !source.is_cancelled() && (source.is_format_not_available() || source.is_unavailable()) {
        ConvertError::PdfFormatNotAvailable {
            format: format.to_string(),
            source,
        }
    } else {
        ConvertError::Engine {
            stage: "convert",
            source,
        }
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Files produced by a request. Whatever has not been kept is deleted on drop.
#[derive(Default)]
struct Scratch {
    files: Vec<PathBuf>,
}

impl Scratch {
    fn track(&mut self, path: &Path) {
        self.files.push(path.to_path_buf());
    }

    fn keep(&mut self, results: &[PathBuf]) {
        self.files.retain(|f| !results.contains(f));
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        for file in self.files.drain(..) {
            match std::fs::remove_file(&file) {
                Ok(()) => debug!("Removed {}", file.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", file.display(), e),
            }
        }
    }
}

/// Output file names: the merged name for a single merged result, otherwise
/// the input stems with `extension`, de-duplicated with a numeric suffix.
fn final_names(inputs: &[PathBuf], outputs: usize, extension: &str) -> Vec<String> {
    if outputs == 1 && inputs.len() > 1 {
        return vec![MERGED_FILE_NAME.to_string()];
    }
    let mut seen = HashSet::new();
    inputs
        .iter()
        .enumerate()
        .map(|(i, input)| {
            let stem = input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("document-{}", i + 1));
            let mut name = format!("{stem}{extension}");
            let mut n = 1;
            while !seen.insert(name.clone()) {
                n += 1;
                name = format!("{stem}-{n}{extension}");
            }
            name
        })
        .collect()
}

async fn persist(
    mut output: ConversionOutput,
    names: &[String],
    dir: &Path,
) -> Result<ConversionOutput, ConvertError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| ConvertError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

    let mut persisted = Vec::with_capacity(output.output_paths.len());
    for (src, name) in output.output_paths.iter().zip(names) {
        let dest = dir.join(name);
        let tmp = dir.join(format!("{name}.tmp"));
        let io_err = |source| ConvertError::Io {
            path: dest.clone(),
            source,
        };
        tokio::fs::copy(src, &tmp).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &dest).await.map_err(io_err)?;
        persisted.push(dest);
    }

    output.output_paths = persisted;
    Ok(output)
}
