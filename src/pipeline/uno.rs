//! Conversion invoker: run `unoconv` against a LibreOffice listener.
//!
//! One call converts one document. The invoker obtains a port (from the
//! shared [`Listener`] or from a private worker it starts itself), builds the
//! `unoconv` command line, runs it through [`runner::run`] while the
//! [`InstanceCounter`] is raised, and turns the exit code into a result.

use crate::cancel::Cancellation;
use crate::config::{Orientation, PageSelection, PdfFormat, ServiceConfig};
use crate::error::ConvertError;
use crate::pipeline::counter::InstanceCounter;
use crate::pipeline::listener::{spawn_ready, Launcher, Listener, ListenerConfig, SofficeLauncher};
use crate::pipeline::runner;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, Level};

/// File extensions LibreOffice can open, lower-case with the leading dot.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    ".bib", ".doc", ".xml", ".docx", ".fodt", ".html", ".ltx", ".txt", ".odt", ".ott", ".pdb",
    ".pdf", ".psw", ".rtf", ".sdw", ".stw", ".sxw", ".uot", ".vor", ".wps", ".epub", ".png",
    ".bmp", ".emf", ".eps", ".fodg", ".gif", ".jpg", ".jpeg", ".met", ".odd", ".otg", ".pbm",
    ".pct", ".pgm", ".ppm", ".ras", ".std", ".svg", ".svm", ".swf", ".sxd", ".tif", ".tiff",
    ".xhtml", ".xpm", ".fodp", ".odp", ".potm", ".pot", ".pptx", ".pps", ".ppt", ".pwp", ".sda",
    ".sdd", ".sti", ".sxi", ".uop", ".wmf", ".csv", ".dbf", ".dif", ".fods", ".ods", ".ots",
    ".pxl", ".sdc", ".slk", ".stc", ".sxc", ".uos", ".xls", ".xlt", ".xlsx",
];

/// Lower-cased extension of `path` with its leading dot, e.g. `.docx`.
pub fn dotted_extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_ascii_lowercase()))
}

/// Case-insensitive extension check against a list like [`SUPPORTED_EXTENSIONS`].
pub fn is_supported(path: &Path, extensions: &[&str]) -> bool {
    dotted_extension(path).is_some_and(|ext| extensions.contains(&ext.as_str()))
}

/// What `unoconv` should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Pdf,
    Png,
}

impl OutputFormat {
    pub fn as_unoconv(self) -> &'static str {
        match self {
            OutputFormat::Pdf => "pdf",
            OutputFormat::Png => "png",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Pdf => ".pdf",
            OutputFormat::Png => ".png",
        }
    }
}

/// Per-document export options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnoOptions {
    pub orientation: Orientation,
    pub pages: PageSelection,
    /// Native PDF/A flavour produced by LibreOffice itself.
    pub pdf_format: Option<PdfFormat>,
}

/// Interpretation of an `unoconv` exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Success,
    MalformedPageRanges,
    Failure,
}

#[derive(Debug, Clone, Copy)]
enum ExitCondition {
    Always,
    PageSelectionPresent,
}

impl ExitCondition {
    fn holds(self, options: &UnoOptions) -> bool {
        match self {
            ExitCondition::Always => true,
            ExitCondition::PageSelectionPresent => !options.pages.is_all(),
        }
    }
}

const EXIT_CODES: &[(i32, ExitCondition, ExitKind)] = &[
    (0, ExitCondition::Always, ExitKind::Success),
    (5, ExitCondition::PageSelectionPresent, ExitKind::MalformedPageRanges),
];

/// Classify an exit code.
///
/// Best effort: `unoconv` prints no structured diagnostics, and exit code 5
/// is a generic export failure. It is reported as a malformed page range
/// only when a page selection was sent, which can misattribute an unrelated
/// export failure to the range.
pub fn classify_exit(code: i32, options: &UnoOptions) -> ExitKind {
    EXIT_CODES
        .iter()
        .find(|(c, condition, _)| *c == code && condition.holds(options))
        .map(|(_, _, kind)| *kind)
        .unwrap_or(ExitKind::Failure)
}

/// Command line for one `unoconv` run against the listener on `port`.
pub fn build_args(
    port: u16,
    input: &Path,
    output: &Path,
    options: &UnoOptions,
    format: OutputFormat,
    verbose: bool,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--no-launch".into(),
        "--format".into(),
        format.as_unoconv().into(),
        "--port".into(),
        port.to_string().into(),
    ];
    if verbose {
        args.push("-vvv".into());
    }
    if options.orientation == Orientation::Landscape {
        args.push("--printer".into());
        args.push("PaperOrientation=landscape".into());
    }
    if let Some(pages) = options.pages.export_value() {
        args.push("--export".into());
        args.push(format!("PageRange={pages}").into());
    }
    if let Some(pdf_format) = options.pdf_format {
        args.push("--export".into());
        args.push(format!("SelectPdfVersion={}", pdf_format.select_pdf_version()).into());
    }
    args.push("--output".into());
    args.push(output.as_os_str().to_owned());
    args.push(input.as_os_str().to_owned());
    args
}

/// Private workers started and stopped around each conversion.
#[derive(Clone)]
pub struct EphemeralWorkers {
    launcher: Arc<dyn Launcher>,
    start_timeout: Duration,
    stop_grace_period: Duration,
}

impl EphemeralWorkers {
    pub fn new(launcher: Arc<dyn Launcher>, start_timeout: Duration, stop_grace_period: Duration) -> Self {
        Self {
            launcher,
            start_timeout,
            stop_grace_period,
        }
    }
}

/// Where the invoker gets its LibreOffice listener from.
#[derive(Clone)]
pub enum WorkerMode {
    /// One supervised listener, used by one conversion at a time.
    Shared(Listener),
    /// A fresh listener per conversion; conversions run in parallel.
    Ephemeral(EphemeralWorkers),
}

/// Runs `unoconv` conversions.
#[derive(Clone)]
pub struct Uno {
    unoconv_bin: PathBuf,
    mode: WorkerMode,
    counter: InstanceCounter,
}

impl fmt::Debug for Uno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match &self.mode {
            WorkerMode::Shared(_) => "shared",
            WorkerMode::Ephemeral(_) => "ephemeral",
        };
        f.debug_struct("Uno")
            .field("unoconv_bin", &self.unoconv_bin)
            .field("mode", &mode)
            .field("counter", &self.counter)
            .finish()
    }
}

impl Uno {
    pub fn new(unoconv_bin: impl Into<PathBuf>, mode: WorkerMode) -> Self {
        Self {
            unoconv_bin: unoconv_bin.into(),
            mode,
            counter: InstanceCounter::new(),
        }
    }

    /// Wire up against a real `soffice`. A restart threshold of 0 selects
    /// ephemeral workers; anything else a shared [`Listener`].
    ///
    /// Must be called inside a Tokio runtime.
    pub fn from_config(config: &ServiceConfig) -> Self {
        let launcher: Arc<dyn Launcher> = Arc::new(SofficeLauncher::new(&config.soffice_bin_path));
        let mode = if config.is_ephemeral() {
            WorkerMode::Ephemeral(EphemeralWorkers::new(
                launcher,
                config.start_timeout,
                config.stop_grace_period,
            ))
        } else {
            WorkerMode::Shared(Listener::new(launcher, ListenerConfig::from(config)))
        };
        Self::new(&config.unoconv_bin_path, mode)
    }

    /// Share an existing counter instead of the private one.
    pub fn with_counter(mut self, counter: InstanceCounter) -> Self {
        self.counter = counter;
        self
    }

    pub fn counter(&self) -> &InstanceCounter {
        &self.counter
    }

    /// The shared listener, if not in ephemeral mode.
    pub fn listener(&self) -> Option<&Listener> {
        match &self.mode {
            WorkerMode::Shared(listener) => Some(listener),
            WorkerMode::Ephemeral(_) => None,
        }
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        SUPPORTED_EXTENSIONS
    }

    /// True if `path` has an extension LibreOffice can open.
    pub fn supports(&self, path: &Path) -> bool {
        is_supported(path, SUPPORTED_EXTENSIONS)
    }

    pub async fn pdf(
        &self,
        ctx: &Cancellation,
        input: &Path,
        output: &Path,
        options: &UnoOptions,
    ) -> Result<(), ConvertError> {
        self.convert(ctx, input, output, options, OutputFormat::Pdf).await
    }

    pub async fn png(
        &self,
        ctx: &Cancellation,
        input: &Path,
        output: &Path,
        options: &UnoOptions,
    ) -> Result<(), ConvertError> {
        self.convert(ctx, input, output, options, OutputFormat::Png).await
    }

    /// Convert `input` into `output`.
    ///
    /// # Errors
    /// - [`ConvertError::MalformedPageRanges`] on exit code 5 with a page selection
    /// - [`ConvertError::WorkerFailed`] on any other non-zero exit code
    /// - [`ConvertError::Cancelled`] if `ctx` fired, while queued or running
    /// - [`ConvertError::Supervisor`] if no listener could be started
    pub async fn convert(
        &self,
        ctx: &Cancellation,
        input: &Path,
        output: &Path,
        options: &UnoOptions,
        format: OutputFormat,
    ) -> Result<(), ConvertError> {
        match &self.mode {
            WorkerMode::Shared(listener) => {
                let lease = listener.lock(ctx).await?;
                let result = self
                    .invoke(ctx, lease.port(), input, output, options, format)
                    .await;
                lease.unlock();
                result
            }
            WorkerMode::Ephemeral(workers) => {
                let worker = spawn_ready(
                    workers.launcher.as_ref(),
                    ctx,
                    workers.start_timeout,
                    workers.stop_grace_period,
                    None,
                )
                .await
                .map_err(|e| ConvertError::supervisor("starting", e))?;
                let result = self
                    .invoke(ctx, worker.port(), input, output, options, format)
                    .await;
                if let Err(e) = worker.stop(workers.stop_grace_period).await {
                    error!("Stopping ephemeral LibreOffice listener: {}", e);
                }
                result
            }
        }
    }

    async fn invoke(
        &self,
        ctx: &Cancellation,
        port: u16,
        input: &Path,
        output: &Path,
        options: &UnoOptions,
        format: OutputFormat,
    ) -> Result<(), ConvertError> {
        let verbose = tracing::enabled!(Level::DEBUG);
        let args = build_args(port, input, output, options, format, verbose);

        let code = {
            let _instance = self.counter.enter();
            debug!(
                port,
                active = self.counter.active(),
                "Converting {} to {}",
                input.display(),
                format.as_unoconv()
            );
            runner::run(ctx, &self.unoconv_bin, &args).await?
        };

        match classify_exit(code, options) {
            ExitKind::Success => Ok(()),
            ExitKind::MalformedPageRanges => Err(ConvertError::MalformedPageRanges {
                ranges: options.pages.to_string(),
            }),
            ExitKind::Failure => Err(ConvertError::WorkerFailed {
                program: runner::program_name(&self.unoconv_bin),
                exit_code: code,
            }),
        }
    }
}
