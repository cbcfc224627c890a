//! CLI binary for edgequake-office2pdf.
//!
//! A thin shim over the library crate that maps CLI flags to a
//! `ServiceConfig` plus a `ConversionRequest` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_office2pdf::{
    Cancellation, ConversionOutput, ConversionProgressCallback, ConversionRequest, Converter,
    ProgressCallback, ServiceConfig, ThumbnailRequest,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a bar over documents plus one log line per
/// document and per post-processing step.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Waiting for LibreOffice…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed(&self, index: usize) -> String {
        let ms = self
            .start_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&index)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);
        dim(&format!("{:.1}s", ms as f64 / 1000.0))
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Converting");
    }

    fn on_document_start(&self, index: usize, _total: usize, input: &Path) {
        self.start_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(index, Instant::now());
        self.bar.set_message(input.display().to_string());
    }

    fn on_document_complete(&self, index: usize, total: usize, input: &Path) {
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            green("✓"),
            index,
            total,
            input.display(),
            self.elapsed(index),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, index: usize, total: usize, error: &str) {
        let msg = if error.chars().count() > 100 {
            format!("{}…", error.chars().take(99).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            red("✗"),
            index,
            total,
            red(&msg),
            self.elapsed(index),
        ));
        self.bar.abandon();
    }

    fn on_merge(&self, documents: usize) {
        self.bar.println(format!("  {} merging {} PDFs", cyan("◆"), documents));
    }

    fn on_reformat(&self, format: &str, files: usize) {
        self.bar
            .println(format!("  {} converting {} file(s) to {}", cyan("◆"), files, format));
    }

    fn on_conversion_complete(&self, total: usize, outputs: &[PathBuf]) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} document(s) converted into {} file(s)",
            green("✔"),
            bold(&total.to_string()),
            outputs.len()
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert one document next to the current directory
  office2pdf report.docx

  # Convert several documents and merge them into out/merged.pdf
  office2pdf --merge -o out intro.docx figures.xlsx slides.pptx

  # Landscape, pages 1-3, native PDF/A-2b
  office2pdf --landscape --native-page-ranges 1-3 --native-pdf-format PDF/A-2b report.odt

  # Merge, then convert the merged PDF to PDF/A-1a with a PDF engine
  office2pdf --merge --pdf-format PDF/A-1a a.docx b.docx

  # PNG thumbnail of the first page
  office2pdf --thumbnail slides.pptx -o thumbs

  # One private LibreOffice per document, all in parallel
  office2pdf --listener-restart-threshold 0 *.docx

ENVIRONMENT VARIABLES:
  OFFICE2PDF_SOFFICE_BIN                 soffice binary (default: soffice)
  OFFICE2PDF_UNOCONV_BIN                 unoconv binary (default: unoconv)
  OFFICE2PDF_QPDF_BIN                    qpdf binary (default: qpdf)
  OFFICE2PDF_LISTENER_START_TIMEOUT      seconds to wait for the listener (default: 10)
  OFFICE2PDF_LISTENER_RESTART_THRESHOLD  conversions before a restart; 0 = ephemeral (default: 10)
  RUST_LOG                               overrides the log filter

SETUP:
  LibreOffice, unoconv and qpdf must be installed:
    apt-get install libreoffice-core unoconv qpdf
"#;

/// Convert office documents to PDF with a headless LibreOffice.
#[derive(Parser, Debug)]
#[command(
    name = "office2pdf",
    version,
    about = "Convert office documents to PDF with a headless LibreOffice",
    long_about = "Convert Word, Excel, PowerPoint, OpenDocument and other office documents to \
PDF (or PNG thumbnails) through a supervised headless LibreOffice listener driven by unoconv. \
PDFs can be merged with qpdf and converted to PDF/A.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Documents to convert, in output order.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Directory the results are written to.
    #[arg(short, long, env = "OFFICE2PDF_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Merge all PDFs into one (merged.pdf).
    #[arg(long, env = "OFFICE2PDF_MERGE")]
    merge: bool,

    /// Landscape paper orientation.
    #[arg(long, env = "OFFICE2PDF_LANDSCAPE")]
    landscape: bool,

    /// Pages to export, e.g. 1-3,5. Forwarded to LibreOffice as-is.
    #[arg(long, env = "OFFICE2PDF_NATIVE_PAGE_RANGES", default_value = "")]
    native_page_ranges: String,

    /// PDF/A flavour produced by LibreOffice: PDF/A-1a, PDF/A-2b or PDF/A-3b.
    #[arg(long, env = "OFFICE2PDF_NATIVE_PDF_FORMAT")]
    native_pdf_format: Option<String>,

    /// Deprecated: same as --native-pdf-format PDF/A-1a.
    #[arg(long, env = "OFFICE2PDF_NATIVE_PDF_A1A_FORMAT")]
    native_pdf_a1a_format: bool,

    /// PDF flavour the final PDF(s) are converted to after merging.
    #[arg(long, env = "OFFICE2PDF_PDF_FORMAT")]
    pdf_format: Option<String>,

    /// Produce a PNG of the first page of each document instead of a PDF.
    #[arg(
        long,
        conflicts_with_all = ["merge", "native_page_ranges", "native_pdf_format", "native_pdf_a1a_format", "pdf_format"]
    )]
    thumbnail: bool,

    /// soffice binary.
    #[arg(long, env = "OFFICE2PDF_SOFFICE_BIN", default_value = "soffice")]
    soffice_bin: PathBuf,

    /// unoconv binary.
    #[arg(long, env = "OFFICE2PDF_UNOCONV_BIN", default_value = "unoconv")]
    unoconv_bin: PathBuf,

    /// qpdf binary used for merging.
    #[arg(long, env = "OFFICE2PDF_QPDF_BIN", default_value = "qpdf")]
    qpdf_bin: PathBuf,

    /// Seconds the listener gets to accept connections.
    #[arg(long, env = "OFFICE2PDF_LISTENER_START_TIMEOUT", default_value_t = 10)]
    listener_start_timeout: u64,

    /// Conversions before the listener is restarted; 0 runs a private
    /// LibreOffice per document.
    #[arg(long, env = "OFFICE2PDF_LISTENER_RESTART_THRESHOLD", default_value_t = 10)]
    listener_restart_threshold: u32,

    /// Abort the whole run after this many seconds.
    #[arg(long, env = "OFFICE2PDF_TIMEOUT")]
    timeout: Option<u64>,

    /// Print the ConversionOutput as JSON on stdout.
    #[arg(long, env = "OFFICE2PDF_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "OFFICE2PDF_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs (also makes unoconv verbose).
    #[arg(short, long, env = "OFFICE2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "OFFICE2PDF_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build converter ──────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;
    let converter = Converter::from_config(&config);

    // ── Cancellation: --timeout and Ctrl-C ───────────────────────────────
    let ctx = match cli.timeout {
        Some(secs) => Cancellation::with_timeout(Duration::from_secs(secs)),
        None => Cancellation::new(),
    };
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{} interrupted, stopping LibreOffice…", red("✘"));
            interrupt.cancel();
        }
    });

    // ── Run conversion ───────────────────────────────────────────────────
    let result = run(&cli, &converter, &ctx).await;

    if let Err(e) = converter.shutdown().await {
        tracing::warn!("Shutting down LibreOffice: {}", e);
    }

    let output = result?;
    report(&cli, &output, show_progress)?;
    Ok(())
}

async fn run(cli: &Cli, converter: &Converter, ctx: &Cancellation) -> Result<ConversionOutput> {
    if cli.thumbnail {
        let request = ThumbnailRequest::new(cli.inputs.iter().cloned()).landscape(cli.landscape);
        return converter
            .thumbnails_into(ctx, &request, &cli.output_dir)
            .await
            .context("Thumbnail generation failed");
    }

    let mut request = ConversionRequest::new(cli.inputs.iter().cloned())
        .landscape(cli.landscape)
        .native_page_ranges(cli.native_page_ranges.clone())
        .native_pdf_a1a_format(cli.native_pdf_a1a_format)
        .merge(cli.merge);
    if let Some(ref format) = cli.native_pdf_format {
        request = request.native_pdf_format(format.clone());
    }
    if let Some(ref format) = cli.pdf_format {
        request = request.pdf_format(format.clone());
    }

    converter
        .convert_into(ctx, &request, &cli.output_dir)
        .await
        .context("Conversion failed")
}

fn report(cli: &Cli, output: &ConversionOutput, show_progress: bool) -> Result<()> {
    if cli.json {
        let json = serde_json::to_string_pretty(output).context("Failed to serialise output")?;
        println!("{json}");
        return Ok(());
    }

    for path in &output.output_paths {
        println!("{}", path.display());
    }

    if !cli.quiet && !show_progress {
        eprintln!(
            "Converted {} document(s) in {}ms",
            output.stats.documents, output.stats.duration_ms
        );
    } else if !cli.quiet {
        eprintln!(
            "   {} convert  /  {} merge+reformat  |  {}ms total",
            dim(&format!("{}ms", output.stats.convert_duration_ms)),
            dim(&format!("{}ms", output.stats.post_process_duration_ms)),
            output.stats.duration_ms,
        );
    }
    Ok(())
}

/// Map CLI args to `ServiceConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ServiceConfig> {
    let mut builder = ServiceConfig::builder()
        .soffice_bin_path(&cli.soffice_bin)
        .unoconv_bin_path(&cli.unoconv_bin)
        .qpdf_bin_path(Some(cli.qpdf_bin.clone()))
        .start_timeout(Duration::from_secs(cli.listener_start_timeout))
        .restart_threshold(cli.listener_restart_threshold);

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
