//! Conversion requests and their validation.
//!
//! A request names its inputs and options the way clients send them: loose
//! strings and booleans, some of them mutually exclusive. [`validate`]
//! checks every combination before any work starts and produces a
//! [`ConversionPlan`] the orchestrator can execute without further checks.
//!
//! [`validate`]: ConversionRequest::validate

use crate::config::{Orientation, PageSelection, PdfFormat};
use crate::error::ConvertError;
use crate::pipeline::uno::{dotted_extension, is_supported, UnoOptions};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Fields that select an output PDF flavour. At most one may be set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormatField {
    /// Deprecated boolean shorthand for a native `PDF/A-1a`.
    NativePdfA1a,
    /// PDF/A flavour produced by LibreOffice during conversion.
    NativePdf,
    /// PDF flavour produced by a PDF engine after conversion and merge.
    Pdf,
}

impl FormatField {
    fn name(self) -> &'static str {
        match self {
            FormatField::NativePdfA1a => "nativePdfA1aFormat",
            FormatField::NativePdf => "nativePdfFormat",
            FormatField::Pdf => "pdfFormat",
        }
    }
}

/// Checked in order; the first pair with both fields set is reported.
const EXCLUSIVE_FIELDS: &[(FormatField, FormatField)] = &[
    (FormatField::NativePdf, FormatField::NativePdfA1a),
    (FormatField::Pdf, FormatField::NativePdfA1a),
    (FormatField::Pdf, FormatField::NativePdf),
];

/// A request to convert office documents to PDF.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversionRequest {
    /// Documents to convert, in output order.
    pub inputs: Vec<PathBuf>,
    pub landscape: bool,
    /// Page selection forwarded to LibreOffice, e.g. `1-3,5`. Blank selects every page.
    pub native_page_ranges: String,
    /// Deprecated: use `native_pdf_format = Some("PDF/A-1a")`.
    pub native_pdf_a1a_format: bool,
    pub native_pdf_format: Option<String>,
    /// Format a PDF engine converts the final PDF(s) to.
    pub pdf_format: Option<String>,
    /// Merge all converted documents into one PDF.
    pub merge: bool,
}

/// A validated [`ConversionRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionPlan {
    pub inputs: Vec<PathBuf>,
    pub options: UnoOptions,
    pub merge: bool,
    pub pdf_format: Option<String>,
}

impl ConversionRequest {
    pub fn new(inputs: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            inputs: inputs.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn landscape(mut self, landscape: bool) -> Self {
        self.landscape = landscape;
        self
    }

    pub fn native_page_ranges(mut self, ranges: impl Into<String>) -> Self {
        self.native_page_ranges = ranges.into();
        self
    }

    pub fn native_pdf_a1a_format(mut self, enabled: bool) -> Self {
        self.native_pdf_a1a_format = enabled;
        self
    }

    pub fn native_pdf_format(mut self, format: impl Into<String>) -> Self {
        self.native_pdf_format = Some(format.into());
        self
    }

    pub fn pdf_format(mut self, format: impl Into<String>) -> Self {
        self.pdf_format = Some(format.into());
        self
    }

    pub fn merge(mut self, merge: bool) -> Self {
        self.merge = merge;
        self
    }

    fn is_set(&self, field: FormatField) -> bool {
        match field {
            FormatField::NativePdfA1a => self.native_pdf_a1a_format,
            FormatField::NativePdf => non_blank(&self.native_pdf_format).is_some(),
            FormatField::Pdf => non_blank(&self.pdf_format).is_some(),
        }
    }

    /// Check the request against `extensions` and the option rules.
    ///
    /// # Errors
    /// - [`ConvertError::NoInputs`] for an empty input list
    /// - [`ConvertError::UnsupportedExtension`] for an input LibreOffice cannot open
    /// - [`ConvertError::ConflictingOptions`] when two format fields are set
    /// - [`ConvertError::InvalidPdfFormat`] for an unknown native format
    pub fn validate(&self, extensions: &[&str]) -> Result<ConversionPlan, ConvertError> {
        check_inputs(&self.inputs, extensions)?;

        if self.native_pdf_a1a_format {
            warn!(
                "'nativePdfA1aFormat' is deprecated; prefer 'nativePdfFormat' or 'pdfFormat' form fields instead"
            );
        }

        if let Some((first, second)) = EXCLUSIVE_FIELDS
            .iter()
            .find(|(a, b)| self.is_set(*a) && self.is_set(*b))
        {
            return Err(ConvertError::ConflictingOptions {
                first: first.name(),
                second: second.name(),
            });
        }

        let native_format = if self.native_pdf_a1a_format {
            Some(PdfFormat::PdfA1a)
        } else {
            non_blank(&self.native_pdf_format)
                .map(|raw| {
                    raw.parse::<PdfFormat>().map_err(|_| ConvertError::InvalidPdfFormat {
                        format: raw.to_string(),
                        field: FormatField::NativePdf.name(),
                    })
                })
                .transpose()?
        };

        Ok(ConversionPlan {
            inputs: self.inputs.clone(),
            options: UnoOptions {
                orientation: Orientation::from_landscape(self.landscape),
                pages: PageSelection::parse(&self.native_page_ranges),
                pdf_format: native_format,
            },
            merge: self.merge,
            pdf_format: non_blank(&self.pdf_format).map(str::to_string),
        })
    }
}

/// A request for a PNG preview of the first page of each document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThumbnailRequest {
    pub inputs: Vec<PathBuf>,
    pub landscape: bool,
}

impl ThumbnailRequest {
    pub fn new(inputs: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            inputs: inputs.into_iter().map(Into::into).collect(),
            landscape: false,
        }
    }

    pub fn landscape(mut self, landscape: bool) -> Self {
        self.landscape = landscape;
        self
    }

    /// Validate inputs; the page selection is always the first page and
    /// nothing is merged or reformatted.
    pub fn validate(&self, extensions: &[&str]) -> Result<ConversionPlan, ConvertError> {
        check_inputs(&self.inputs, extensions)?;
        Ok(ConversionPlan {
            inputs: self.inputs.clone(),
            options: UnoOptions {
                orientation: Orientation::from_landscape(self.landscape),
                pages: PageSelection::Single(1),
                pdf_format: None,
            },
            merge: false,
            pdf_format: None,
        })
    }
}

fn check_inputs(inputs: &[PathBuf], extensions: &[&str]) -> Result<(), ConvertError> {
    if inputs.is_empty() {
        return Err(ConvertError::NoInputs);
    }
    match inputs.iter().find(|p| !is_supported(p, extensions)) {
        Some(path) => Err(ConvertError::UnsupportedExtension {
            path: path.clone(),
            extension: dotted_extension(path).unwrap_or_default(),
        }),
        None => Ok(()),
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::uno::SUPPORTED_EXTENSIONS;

    fn validate(request: &ConversionRequest) -> Result<ConversionPlan, ConvertError> {
        request.validate(SUPPORTED_EXTENSIONS)
    }

    fn conflict(request: &ConversionRequest) -> (&'static str, &'static str) {
        match validate(request) {
            Err(ConvertError::ConflictingOptions { first, second }) => (first, second),
            other => panic!("expected a conflict, got {other:?}"),
        }
    }

    #[test]
    fn defaults_produce_a_plain_plan() {
        let plan = validate(&ConversionRequest::new(["a.docx", "b.xlsx"])).unwrap();
        assert_eq!(plan.inputs.len(), 2);
        assert_eq!(plan.options, UnoOptions::default());
        assert!(!plan.merge);
        assert_eq!(plan.pdf_format, None);
    }

    #[test]
    fn empty_inputs_are_rejected() {
        let err = validate(&ConversionRequest::default()).unwrap_err();
        assert!(matches!(err, ConvertError::NoInputs));
        assert!(err.is_client_error());
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let err = validate(&ConversionRequest::new(["a.docx", "b.zip"])).unwrap_err();
        match err {
            ConvertError::UnsupportedExtension { path, extension } => {
                assert_eq!(path, PathBuf::from("b.zip"));
                assert_eq!(extension, ".zip");
            }
            other => panic!("got {other:?}"),
        }
    }

    #[test]
    fn each_pair_of_format_fields_conflicts() {
        let base = ConversionRequest::new(["a.docx"]);
        assert_eq!(
            conflict(&base.clone().native_pdf_a1a_format(true).native_pdf_format("PDF/A-2b")),
            ("nativePdfFormat", "nativePdfA1aFormat")
        );
        assert_eq!(
            conflict(&base.clone().native_pdf_a1a_format(true).pdf_format("PDF/A-2b")),
            ("pdfFormat", "nativePdfA1aFormat")
        );
        assert_eq!(
            conflict(&base.clone().native_pdf_format("PDF/A-1a").pdf_format("PDF/A-2b")),
            ("pdfFormat", "nativePdfFormat")
        );
    }

    #[test]
    fn first_conflict_wins_when_all_three_are_set() {
        let request = ConversionRequest::new(["a.docx"])
            .native_pdf_a1a_format(true)
            .native_pdf_format("PDF/A-1a")
            .pdf_format("PDF/A-1a");
        assert_eq!(conflict(&request), ("nativePdfFormat", "nativePdfA1aFormat"));
    }

    #[test]
    fn blank_format_strings_count_as_unset() {
        let plan = validate(
            &ConversionRequest::new(["a.docx"])
                .native_pdf_a1a_format(true)
                .native_pdf_format("  ")
                .pdf_format(""),
        )
        .unwrap();
        assert_eq!(plan.options.pdf_format, Some(PdfFormat::PdfA1a));
        assert_eq!(plan.pdf_format, None);
    }

    #[test]
    fn deprecated_flag_alone_selects_pdf_a1a() {
        let plan = validate(&ConversionRequest::new(["a.odt"]).native_pdf_a1a_format(true)).unwrap();
        assert_eq!(plan.options.pdf_format, Some(PdfFormat::PdfA1a));
    }

    #[test]
    fn unknown_native_format_is_rejected() {
        let err = validate(&ConversionRequest::new(["a.odt"]).native_pdf_format("PDF/A-9z")).unwrap_err();
        match err {
            ConvertError::InvalidPdfFormat { format, field } => {
                assert_eq!(format, "PDF/A-9z");
                assert_eq!(field, "nativePdfFormat");
            }
            other => panic!("got {other:?}"),
        }
    }

    #[test]
    fn post_merge_format_is_passed_through_unparsed() {
        let plan = validate(&ConversionRequest::new(["a.odt"]).pdf_format("PDF/A-9z")).unwrap();
        assert_eq!(plan.pdf_format.as_deref(), Some("PDF/A-9z"));
        assert_eq!(plan.options.pdf_format, None);
    }

    #[test]
    fn options_are_carried_over() {
        let plan = validate(
            &ConversionRequest::new(["a.pptx"])
                .landscape(true)
                .native_page_ranges(" 2-4 ")
                .native_pdf_format("pdf/a-3b")
                .merge(true),
        )
        .unwrap();
        assert_eq!(plan.options.orientation, Orientation::Landscape);
        assert_eq!(plan.options.pages, PageSelection::Ranges("2-4".into()));
        assert_eq!(plan.options.pdf_format, Some(PdfFormat::PdfA3b));
        assert!(plan.merge);
    }

    #[test]
    fn thumbnail_forces_first_page() {
        let plan = ThumbnailRequest::new(["deck.pptx"])
            .landscape(true)
            .validate(SUPPORTED_EXTENSIONS)
            .unwrap();
        assert_eq!(plan.options.pages, PageSelection::Single(1));
        assert_eq!(plan.options.orientation, Orientation::Landscape);
        assert!(!plan.merge);
        assert_eq!(plan.pdf_format, None);
    }

    #[test]
    fn request_deserializes_from_form_field_names() {
        let request: ConversionRequest = serde_json::from_str(
            r#"{"inputs":["a.docx"],"nativePageRanges":"1","nativePdfA1aFormat":true,"merge":true}"#,
        )
        .unwrap();
        assert!(request.native_pdf_a1a_format);
        assert_eq!(request.native_page_ranges, "1");
        assert!(request.merge);
    }
}
