//! End-to-end tests against a real LibreOffice, unoconv and qpdf.
//!
//! They are gated behind the `E2E_ENABLED` environment variable so they do
//! not run in CI unless explicitly requested. Binaries are taken from
//! `OFFICE2PDF_SOFFICE_BIN`, `OFFICE2PDF_UNOCONV_BIN` and
//! `OFFICE2PDF_QPDF_BIN`, falling back to `PATH`.
//!
//! Run with:
//!   E2E_ENABLED=1 cargo test --test e2e -- --nocapture --test-threads=1
//!
//! To restrict to a specific test:
//!   E2E_ENABLED=1 cargo test --test e2e test_merge -- --nocapture

use edgequake_office2pdf::{
    Cancellation, ConversionRequest, ConvertError, Converter, ServiceConfig, ThumbnailRequest,
};
use futures::future::join_all;
use regex::bytes::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Skip this test unless E2E_ENABLED is set and the tools are on hand.
macro_rules! e2e_skip_unless_ready {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        for tool in [soffice_bin(), unoconv_bin(), qpdf_bin()] {
            if which(&tool).is_none() {
                println!("SKIP: {} not found", tool.display());
                return;
            }
        }
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    }};
}

fn tool(var: &str, default: &str) -> PathBuf {
    std::env::var_os(var)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

fn soffice_bin() -> PathBuf {
    tool("OFFICE2PDF_SOFFICE_BIN", "soffice")
}

fn unoconv_bin() -> PathBuf {
    tool("OFFICE2PDF_UNOCONV_BIN", "unoconv")
}

fn qpdf_bin() -> PathBuf {
    tool("OFFICE2PDF_QPDF_BIN", "qpdf")
}

fn which(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return program.exists().then(|| program.to_path_buf());
    }
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(program))
            .find(|candidate| candidate.is_file())
    })
}

fn converter(restart_threshold: u32) -> Converter {
    let config = ServiceConfig::builder()
        .soffice_bin_path(soffice_bin())
        .unoconv_bin_path(unoconv_bin())
        .qpdf_bin_path(Some(qpdf_bin()))
        .start_timeout(Duration::from_secs(30))
        .restart_threshold(restart_threshold)
        .build()
        .unwrap();
    Converter::from_config(&config)
}

fn ctx() -> Cancellation {
    Cancellation::with_timeout(Duration::from_secs(120))
}

/// An HTML document with `pages` pages separated by CSS page breaks.
fn paged_document(dir: &Path, name: &str, pages: usize) -> PathBuf {
    let body: String = (1..=pages)
        .map(|p| {
            let style = if p > 1 { " style=\"page-break-before: always\"" } else { "" };
            format!("<h1{style}>{name}, page {p}</h1><p>Lorem ipsum dolor sit amet.</p>")
        })
        .collect();
    let path = dir.join(name);
    std::fs::write(&path, format!("<html><body>{body}</body></html>")).unwrap();
    path
}

fn html_document(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(
        &path,
        "<html><body><h1>Quarterly report</h1><p>Revenue went up.</p></body></html>",
    )
    .unwrap();
    path
}

/// Page objects in a PDF (`/Type /Page`, not `/Type /Pages`).
fn page_count(pdf: &Path) -> usize {
    let bytes = std::fs::read(pdf).unwrap();
    Regex::new(r"/Type\s*/Page[^s]")
        .unwrap()
        .find_iter(&bytes)
        .count()
}

fn assert_pdf(path: &Path, context: &str) {
    let bytes = std::fs::read(path).unwrap();
    assert!(
        bytes.starts_with(b"%PDF-"),
        "[{context}] {} is not a PDF",
        path.display()
    );
    println!("[{context}] ✓  {} ({} bytes)", path.display(), bytes.len());
}

// ── Conversion ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_convert_single_document() {
    e2e_skip_unless_ready!();
    let dir = TempDir::new().unwrap();
    let input = html_document(dir.path(), "report.html");

    let converter = converter(10);
    let output = converter
        .convert_into(&ctx(), &ConversionRequest::new([input]), dir.path().join("out"))
        .await
        .unwrap();

    assert_eq!(output.output_paths, [dir.path().join("out/report.pdf")]);
    assert_pdf(&output.output_paths[0], "single");
    assert_eq!(page_count(&output.output_paths[0]), 1);
    converter.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_merge_preserves_page_counts() {
    e2e_skip_unless_ready!();
    let dir = TempDir::new().unwrap();
    let a = paged_document(dir.path(), "a.html", 2);
    let b = paged_document(dir.path(), "b.html", 3);

    let converter = converter(10);
    let output = converter
        .convert_into(
            &ctx(),
            &ConversionRequest::new([a, b]).merge(true),
            dir.path().join("out"),
        )
        .await
        .unwrap();

    assert_eq!(output.output_paths.len(), 1);
    assert_pdf(&output.output_paths[0], "merge");
    assert_eq!(page_count(&output.output_paths[0]), 5);
    converter.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_native_page_ranges() {
    e2e_skip_unless_ready!();
    let dir = TempDir::new().unwrap();
    let input = paged_document(dir.path(), "long.html", 4);

    let converter = converter(10);
    let output = converter
        .convert_into(
            &ctx(),
            &ConversionRequest::new([input]).native_page_ranges("2-3"),
            dir.path().join("out"),
        )
        .await
        .unwrap();

    assert_eq!(page_count(&output.output_paths[0]), 2);
    converter.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_page_ranges() {
    e2e_skip_unless_ready!();
    let dir = TempDir::new().unwrap();
    let input = paged_document(dir.path(), "short.html", 1);

    let converter = converter(10);
    let err = converter
        .convert_into(
            &ctx(),
            &ConversionRequest::new([input]).native_page_ranges("foo"),
            dir.path().join("out"),
        )
        .await
        .unwrap_err();

    println!("[malformed] {err}");
    assert!(
        matches!(err, ConvertError::MalformedPageRanges { .. }),
        "got: {err:?}"
    );
    converter.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_native_pdf_a1a() {
    e2e_skip_unless_ready!();
    let dir = TempDir::new().unwrap();
    let input = html_document(dir.path(), "archive.html");

    let converter = converter(10);
    let output = converter
        .convert_into(
            &ctx(),
            &ConversionRequest::new([input]).native_pdf_format("PDF/A-1a"),
            dir.path().join("out"),
        )
        .await
        .unwrap();

    let bytes = std::fs::read(&output.output_paths[0]).unwrap();
    assert!(
        Regex::new(r"pdfaid:part").unwrap().is_match(&bytes),
        "no PDF/A identification in the XMP metadata"
    );
    converter.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_thumbnail() {
    e2e_skip_unless_ready!();
    let dir = TempDir::new().unwrap();
    let input = paged_document(dir.path(), "preview.html", 3);

    let converter = converter(10);
    let output = converter
        .thumbnails_into(&ctx(), &ThumbnailRequest::new([input]), dir.path().join("out"))
        .await
        .unwrap();

    let png = std::fs::read(&output.output_paths[0]).unwrap();
    assert!(png.starts_with(b"\x89PNG"), "not a PNG");
    converter.shutdown().await.unwrap();
}

// ── Listener lifecycle ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_restart_threshold_recycles_the_listener() {
    e2e_skip_unless_ready!();
    let dir = TempDir::new().unwrap();
    let converter = converter(2);
    let listener = converter.uno().listener().unwrap().clone();

    let mut ports = Vec::new();
    for i in 0..3 {
        let input = paged_document(dir.path(), &format!("doc{i}.html"), 1);
        converter
            .convert_into(&ctx(), &ConversionRequest::new([input]), dir.path().join("out"))
            .await
            .unwrap();
        ports.push(listener.port());
    }

    println!("[restart] ports: {ports:?}");
    assert!(ports[0].is_some());
    assert!(ports[2].is_some());
    assert_ne!(ports[0], ports[2], "the third conversion ran on a new listener");
    converter.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reconversion_on_a_restarted_listener_keeps_the_page_count() {
    e2e_skip_unless_ready!();
    let dir = TempDir::new().unwrap();
    let input = paged_document(dir.path(), "again.html", 3);
    let converter = converter(1);
    let listener = converter.uno().listener().unwrap().clone();

    let mut runs = Vec::new();
    for i in 0..2 {
        // Waits out the restart triggered by the previous conversion.
        let port = listener.start(&ctx()).await.unwrap();
        let output = converter
            .convert_into(
                &ctx(),
                &ConversionRequest::new([input.clone()]),
                dir.path().join(format!("out{i}")),
            )
            .await
            .unwrap();
        runs.push((port, page_count(&output.output_paths[0])));
    }

    println!("[idempotent] runs: {runs:?}");
    assert_ne!(runs[0].0, runs[1].0, "the second conversion ran on a new listener");
    assert_eq!(runs[0].1, 3);
    assert_eq!(runs[1].1, runs[0].1);
    converter.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_requests_share_one_listener() {
    e2e_skip_unless_ready!();
    let dir = TempDir::new().unwrap();
    let converter = converter(100);

    let requests: Vec<_> = (0..4)
        .map(|i| {
            let input = paged_document(dir.path(), &format!("c{i}.html"), 1);
            let converter = converter.clone();
            let out = dir.path().join(format!("out{i}"));
            async move {
                converter
                    .convert_into(&ctx(), &ConversionRequest::new([input]), out)
                    .await
            }
        })
        .collect();

    for result in join_all(requests).await {
        assert_pdf(&result.unwrap().output_paths[0], "concurrent");
    }
    assert_eq!(converter.uno().counter().peak(), 1);
    converter.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_ephemeral_workers() {
    e2e_skip_unless_ready!();
    let dir = TempDir::new().unwrap();
    let converter = converter(0);
    assert!(converter.uno().listener().is_none());

    let input = paged_document(dir.path(), "solo.html", 1);
    let output = converter
        .convert_into(&ctx(), &ConversionRequest::new([input]), dir.path().join("out"))
        .await
        .unwrap();
    assert_pdf(&output.output_paths[0], "ephemeral");
}
