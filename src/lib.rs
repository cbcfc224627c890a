//! # edgequake-office2pdf
//!
//! Convert office documents (Word, Excel, PowerPoint, OpenDocument, …) to
//! PDF or PNG thumbnails with a headless LibreOffice.
//!
//! ## Why a supervised listener?
//!
//! Launching LibreOffice costs seconds per document. This crate keeps one
//! `soffice` running in listener mode and drives it with `unoconv`, one
//! conversion at a time, restarting it every N uses before it accumulates
//! state. With a restart threshold of 0 each conversion gets its own
//! short-lived `soffice` instead, and conversions run in parallel.
//!
//! ## Pipeline Overview
//!
//! ```text
//! request
//!  │
//!  ├─ 1. Validate  inputs, extensions, mutually exclusive format options
//!  ├─ 2. Convert   each document via unoconv on the listener (fail-fast)
//!  ├─ 3. Merge     several PDFs into one (qpdf), if requested
//!  ├─ 4. Reformat  to PDF/A-1a/2b/3b through a PDF engine, if requested
//!  └─ 5. Output    one path per document, or one merged path
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_office2pdf::{Cancellation, ConversionRequest, Converter, ServiceConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let converter = Converter::from_config(&ServiceConfig::default());
//!     let request = ConversionRequest::new(["report.docx", "figures.xlsx"]).merge(true);
//!     let ctx = Cancellation::with_timeout(Duration::from_secs(60));
//!
//!     let output = converter.convert_into(&ctx, &request, "out").await?;
//!     println!("{}", output.output_paths[0].display());
//!
//!     converter.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `office2pdf` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-office2pdf = { version = "0.1", default-features = false }
//! ```
//!
//! ## External tools
//!
//! | Tool | Used for | Config |
//! |------|----------|--------|
//! | `soffice` | the listener | [`ServiceConfig::soffice_bin_path`] |
//! | `unoconv` | one conversion against the listener | [`ServiceConfig::unoconv_bin_path`] |
//! | `qpdf` | merging PDFs | [`ServiceConfig::qpdf_bin_path`] |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cancel;
pub mod config;
pub mod convert;
pub mod engine;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod request;
pub mod workdir;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cancel::{CancelReason, Cancellation};
pub use config::{Orientation, PageSelection, PdfFormat, ServiceConfig, ServiceConfigBuilder};
pub use convert::Converter;
pub use engine::{MultiPdfEngine, PdfEngine, QpdfEngine, UnoPdfEngine};
pub use error::{ConvertError, EngineError, ErrorKind};
pub use output::{ConversionOutput, ConversionStats};
pub use pipeline::counter::InstanceCounter;
pub use pipeline::listener::{Launcher, Listener, ListenerConfig, ListenerLease, WorkerHandle};
pub use pipeline::uno::{OutputFormat, Uno, UnoOptions, WorkerMode};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use request::{ConversionPlan, ConversionRequest, ThumbnailRequest};
pub use workdir::{PathGenerator, WorkDir};
