//! Configuration types for the conversion service.
//!
//! Everything the conversion layer consumes but does not own lives in
//! [`ServiceConfig`]: where the office suite and its wrapper are installed,
//! how long a listener may take to come up, and how many conversions a
//! listener serves before it is recycled. It is built through
//! [`ServiceConfigBuilder`] so callers only set what differs from the
//! defaults.
//!
//! Per-document options ([`Orientation`], [`PageSelection`], [`PdfFormat`])
//! are defined here too because both the request layer and the worker
//! invocation speak them.

use crate::error::ConvertError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default time a listener gets to accept connections after launch.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of conversions served before the listener is restarted.
pub const DEFAULT_RESTART_THRESHOLD: u32 = 10;

/// Default time a listener gets to exit after SIGTERM before it is killed.
pub const DEFAULT_STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Service-wide configuration.
///
/// Built via [`ServiceConfig::builder()`] or using [`ServiceConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_office2pdf::ServiceConfig;
/// use std::time::Duration;
///
/// let config = ServiceConfig::builder()
///     .soffice_bin_path("/usr/lib/libreoffice/program/soffice")
///     .start_timeout(Duration::from_secs(20))
///     .restart_threshold(0) // one private worker per conversion
///     .build()
///     .unwrap();
/// assert!(config.is_ephemeral());
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// Office suite binary launched as the listener. Default: `soffice`.
    pub soffice_bin_path: PathBuf,

    /// Wrapper that drives one conversion against a listener. Default: `unoconv`.
    pub unoconv_bin_path: PathBuf,

    /// `qpdf` binary used to merge PDFs. `None` disables the qpdf engine.
    pub qpdf_bin_path: Option<PathBuf>,

    /// Maximum wait for a freshly launched listener to accept connections. Default: 10 s.
    pub start_timeout: Duration,

    /// Conversions served before the shared listener is restarted. Default: 10.
    ///
    /// `0` disables the shared listener: every conversion launches and stops
    /// its own private worker, and conversions run fully in parallel.
    pub restart_threshold: u32,

    /// Grace period between SIGTERM and SIGKILL when stopping a listener. Default: 5 s.
    pub stop_grace_period: Duration,

    /// Per-document progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            soffice_bin_path: PathBuf::from("soffice"),
            unoconv_bin_path: PathBuf::from("unoconv"),
            qpdf_bin_path: Some(PathBuf::from("qpdf")),
            start_timeout: DEFAULT_START_TIMEOUT,
            restart_threshold: DEFAULT_RESTART_THRESHOLD,
            stop_grace_period: DEFAULT_STOP_GRACE_PERIOD,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("soffice_bin_path", &self.soffice_bin_path)
            .field("unoconv_bin_path", &self.unoconv_bin_path)
            .field("qpdf_bin_path", &self.qpdf_bin_path)
            .field("start_timeout", &self.start_timeout)
            .field("restart_threshold", &self.restart_threshold)
            .field("stop_grace_period", &self.stop_grace_period)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// True when no shared listener is kept alive between conversions.
    pub fn is_ephemeral(&self) -> bool {
        self.restart_threshold == 0
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn soffice_bin_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.soffice_bin_path = path.into();
        self
    }

    pub fn unoconv_bin_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.unoconv_bin_path = path.into();
        self
    }

    pub fn qpdf_bin_path(mut self, path: Option<PathBuf>) -> Self {
        self.config.qpdf_bin_path = path;
        self
    }

    pub fn start_timeout(mut self, timeout: Duration) -> Self {
        self.config.start_timeout = timeout;
        self
    }

    pub fn restart_threshold(mut self, threshold: u32) -> Self {
        self.config.restart_threshold = threshold;
        self
    }

    pub fn stop_grace_period(mut self, grace: Duration) -> Self {
        self.config.stop_grace_period = grace;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, ConvertError> {
        let c = &self.config;
        if c.soffice_bin_path.as_os_str().is_empty() {
            return Err(ConvertError::InvalidConfig(
                "soffice binary path must not be empty".into(),
            ));
        }
        if c.unoconv_bin_path.as_os_str().is_empty() {
            return Err(ConvertError::InvalidConfig(
                "unoconv binary path must not be empty".into(),
            ));
        }
        if c.start_timeout.is_zero() {
            return Err(ConvertError::InvalidConfig(
                "listener start timeout must be greater than zero".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Paper orientation requested from the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

impl Orientation {
    pub fn from_landscape(landscape: bool) -> Self {
        if landscape {
            Orientation::Landscape
        } else {
            Orientation::Portrait
        }
    }
}

/// Which pages of a document the worker should export.
///
/// Range syntax (`1-3,5`) is the worker's, not ours: it is forwarded
/// verbatim and a malformed range is only noticed from the worker's exit
/// code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Export every page (default).
    #[default]
    All,
    /// A textual range expression, forwarded as-is.
    Ranges(String),
    /// One explicit page (1-indexed).
    Single(u32),
}

impl PageSelection {
    /// Blank input selects all pages; anything else is kept as a range expression.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            PageSelection::All
        } else {
            PageSelection::Ranges(raw.to_string())
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, PageSelection::All)
    }

    /// Value for the worker's `PageRange` export filter option.
    pub fn export_value(&self) -> Option<String> {
        match self {
            PageSelection::All => None,
            PageSelection::Ranges(r) => Some(r.clone()),
            PageSelection::Single(p) => Some(p.to_string()),
        }
    }
}

impl fmt::Display for PageSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageSelection::All => Ok(()),
            PageSelection::Ranges(r) => write!(f, "{r}"),
            PageSelection::Single(p) => write!(f, "{p}"),
        }
    }
}

/// PDF/A flavours the worker can produce natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PdfFormat {
    #[serde(rename = "PDF/A-1a")]
    PdfA1a,
    #[serde(rename = "PDF/A-2b")]
    PdfA2b,
    #[serde(rename = "PDF/A-3b")]
    PdfA3b,
}

impl PdfFormat {
    pub const ALL: [PdfFormat; 3] = [PdfFormat::PdfA1a, PdfFormat::PdfA2b, PdfFormat::PdfA3b];

    pub fn as_str(self) -> &'static str {
        match self {
            PdfFormat::PdfA1a => "PDF/A-1a",
            PdfFormat::PdfA2b => "PDF/A-2b",
            PdfFormat::PdfA3b => "PDF/A-3b",
        }
    }

    /// The worker's `SelectPdfVersion` export filter value.
    pub fn select_pdf_version(self) -> u8 {
        match self {
            PdfFormat::PdfA1a => 1,
            PdfFormat::PdfA2b => 2,
            PdfFormat::PdfA3b => 3,
        }
    }
}

impl fmt::Display for PdfFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PdfFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        PdfFormat::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown PDF format '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ServiceConfig::default();
        assert_eq!(c.restart_threshold, 10);
        assert_eq!(c.start_timeout, Duration::from_secs(10));
        assert!(!c.is_ephemeral());
    }

    #[test]
    fn builder_rejects_zero_start_timeout() {
        let err = ServiceConfig::builder()
            .start_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("start timeout"), "got: {err}");
    }

    #[test]
    fn builder_rejects_empty_binaries() {
        assert!(ServiceConfig::builder().unoconv_bin_path("").build().is_err());
        assert!(ServiceConfig::builder().soffice_bin_path("").build().is_err());
    }

    #[test]
    fn page_selection_parse() {
        assert_eq!(PageSelection::parse("   "), PageSelection::All);
        assert_eq!(
            PageSelection::parse(" 1-3 "),
            PageSelection::Ranges("1-3".into())
        );
        assert_eq!(PageSelection::Single(1).export_value().as_deref(), Some("1"));
        assert_eq!(PageSelection::All.export_value(), None);
    }

    #[test]
    fn pdf_format_parse_is_case_insensitive() {
        assert_eq!("pdf/a-2B".parse::<PdfFormat>(), Ok(PdfFormat::PdfA2b));
        assert!("PDF/A-4".parse::<PdfFormat>().is_err());
        assert_eq!(PdfFormat::PdfA3b.select_pdf_version(), 3);
    }

    #[test]
    fn pdf_format_serde_uses_display_names() {
        let json = serde_json::to_string(&PdfFormat::PdfA1a).unwrap();
        assert_eq!(json, "\"PDF/A-1a\"");
    }
}
