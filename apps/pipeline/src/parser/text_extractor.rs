//! Text extraction for pdf / docx / doc resumes.
//!
//! PDF chain: `pdftotext -layout`, then the in-process `pdf-extract` reader,
//! then OCR (`pdftoppm` + `tesseract`, first [`OCR_MAX_PAGES`] pages) only
//! when every text extractor produced fewer than [`MIN_TEXT_CHARS`]
//! characters. A failing extractor is logged and skipped; the caller only
//! sees an error when the whole chain comes up short.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::models::resume::MediaKind;

pub const MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;
pub const MIN_TEXT_CHARS: usize = 100;
pub const OCR_MAX_PAGES: u32 = 10;
const CMD_TIMEOUT_SECS: u64 = 60;
const OCR_DPI: u32 = 300;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Unsupported file format '{0}'; expected .pdf, .docx or .doc")]
    UnsupportedFormat(String),

    #[error("File is {size} bytes; the limit is {max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    #[error("File is empty")]
    EmptyFile,

    #[error("Cannot read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Extracted {chars} characters; at least {min} are required")]
    InsufficientText { chars: usize, min: usize },

    #[error("{source_name} failed: {message}")]
    Source {
        source_name: &'static str,
        message: String,
    },
}

impl ExtractionError {
    /// Stable code surfaced in parse results and on failed records.
    pub fn code(&self) -> &'static str {
        match self {
            ExtractionError::UnsupportedFormat(_) => "UnsupportedFormat",
            ExtractionError::FileTooLarge { .. } => "FileTooLarge",
            ExtractionError::EmptyFile => "EmptyFile",
            ExtractionError::Io(_) => "FileNotReadable",
            ExtractionError::InsufficientText { .. } => "InsufficientText",
            ExtractionError::Source { .. } => "ExtractionFailed",
        }
    }

    /// Problems with the file itself, as opposed to problems reading text out of it.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ExtractionError::UnsupportedFormat(_)
                | ExtractionError::FileTooLarge { .. }
                | ExtractionError::EmptyFile
                | ExtractionError::Io(_)
        )
    }
}

/// Checks extension and size before any extractor runs.
pub fn validate_file(path: &Path) -> Result<(MediaKind, u64), ExtractionError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let kind =
        MediaKind::from_extension(&ext).ok_or_else(|| ExtractionError::UnsupportedFormat(ext))?;

    let size = fs::metadata(path)?.len();
    if size == 0 {
        return Err(ExtractionError::EmptyFile);
    }
    if size > MAX_FILE_BYTES {
        return Err(ExtractionError::FileTooLarge {
            size,
            max: MAX_FILE_BYTES,
        });
    }
    Ok((kind, size))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedText {
    pub text: String,
    pub is_scanned: bool,
    /// Name of the extractor that produced `text`.
    pub method: String,
}

/// One way of turning a file into text.
#[async_trait]
pub trait TextSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract(&self, path: &Path) -> Result<String, ExtractionError>;
}

pub struct TextExtractor {
    pdf_sources: Vec<Arc<dyn TextSource>>,
    ocr: Option<Arc<dyn TextSource>>,
    docx: Arc<dyn TextSource>,
    doc: Arc<dyn TextSource>,
}

impl TextExtractor {
    pub fn new(
        pdf_sources: Vec<Arc<dyn TextSource>>,
        ocr: Option<Arc<dyn TextSource>>,
        docx: Arc<dyn TextSource>,
        doc: Arc<dyn TextSource>,
    ) -> Self {
        Self {
            pdf_sources,
            ocr,
            docx,
            doc,
        }
    }

    /// The production chain backed by poppler, pdf-extract, tesseract,
    /// pandoc and antiword.
    pub fn with_system_tools() -> Self {
        Self::new(
            vec![Arc::new(PdftotextLayout), Arc::new(PdfExtractSource)],
            Some(Arc::new(TesseractOcr::default())),
            Arc::new(PandocDocx),
            Arc::new(AntiwordDoc),
        )
    }

    pub async fn extract(&self, path: &Path) -> Result<ExtractedText, ExtractionError> {
        let (kind, size) = validate_file(path)?;
        debug!(path = %path.display(), kind = kind.as_str(), size, "Extracting text");

        match kind {
            MediaKind::Pdf => self.extract_pdf(path).await,
            MediaKind::Docx => single_source(self.docx.as_ref(), path).await,
            MediaKind::Doc => single_source(self.doc.as_ref(), path).await,
        }
    }

    async fn extract_pdf(&self, path: &Path) -> Result<ExtractedText, ExtractionError> {
        let mut best = String::new();

        for source in &self.pdf_sources {
            match source.extract(path).await {
                Ok(raw) => {
                    let text = normalize_text(&raw);
                    if char_len(&text) >= MIN_TEXT_CHARS {
                        return Ok(ExtractedText {
                            text,
                            is_scanned: false,
                            method: source.name().to_string(),
                        });
                    }
                    debug!(
                        source = source.name(),
                        chars = char_len(&text),
                        "Extractor produced too little text"
                    );
                    if char_len(&text) > char_len(&best) {
                        best = text;
                    }
                }
                Err(e) => warn!(source = source.name(), "PDF text extractor failed: {e}"),
            }
        }

        let Some(ocr) = &self.ocr else {
            return Err(ExtractionError::InsufficientText {
                chars: char_len(&best),
                min: MIN_TEXT_CHARS,
            });
        };

        info!(path = %path.display(), "Little embedded text; falling back to OCR");
        match ocr.extract(path).await {
            Ok(raw) => {
                let text = normalize_text(&raw);
                if char_len(&text) >= MIN_TEXT_CHARS {
                    return Ok(ExtractedText {
                        text,
                        is_scanned: true,
                        method: ocr.name().to_string(),
                    });
                }
                best = if char_len(&text) > char_len(&best) {
                    text
                } else {
                    best
                };
            }
            Err(e) => warn!(source = ocr.name(), "OCR failed: {e}"),
        }

        Err(ExtractionError::InsufficientText {
            chars: char_len(&best),
            min: MIN_TEXT_CHARS,
        })
    }
}

async fn single_source(
    source: &dyn TextSource,
    path: &Path,
) -> Result<ExtractedText, ExtractionError> {
    let text = normalize_text(&source.extract(path).await?);
    let chars = char_len(&text);
    if chars < MIN_TEXT_CHARS {
        return Err(ExtractionError::InsufficientText {
            chars,
            min: MIN_TEXT_CHARS,
        });
    }
    Ok(ExtractedText {
        text,
        is_scanned: false,
        method: source.name().to_string(),
    })
}

fn char_len(text: &str) -> usize {
    text.trim().chars().count()
}

/// Unifies line endings, strips trailing whitespace and form feeds, and
/// collapses runs of blank lines to one.
pub fn normalize_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut blank_run = 0usize;
    for line in raw.replace("\r\n", "\n").replace(&['\r', '\u{c}'][..], "\n").lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

// ────────────────────────────────────────────────────────────────────────────
// External command helpers
// ────────────────────────────────────────────────────────────────────────────

async fn run_cmd_with_timeout(
    source_name: &'static str,
    cmd: &mut Command,
    timeout_secs: u64,
) -> Result<String, ExtractionError> {
    let output = tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output())
        .await
        .map_err(|_| ExtractionError::Source {
            source_name,
            message: format!("timed out after {timeout_secs}s"),
        })?
        .map_err(|e| ExtractionError::Source {
            source_name,
            message: format!("failed to execute: {e}"),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ExtractionError::Source {
            source_name,
            message: format!("exit {}: {}", output.status, stderr.trim()),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

// ────────────────────────────────────────────────────────────────────────────
// Sources
// ────────────────────────────────────────────────────────────────────────────

/// Layout-aware extraction with poppler's `pdftotext -layout`.
pub struct PdftotextLayout;

#[async_trait]
impl TextSource for PdftotextLayout {
    fn name(&self) -> &'static str {
        "pdftotext"
    }

    async fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        run_cmd_with_timeout(
            self.name(),
            Command::new("pdftotext")
                .arg("-layout")
                .arg("-enc")
                .arg("UTF-8")
                .arg(path)
                .arg("-"),
            CMD_TIMEOUT_SECS,
        )
        .await
    }
}

/// In-process extraction with the `pdf-extract` crate.
pub struct PdfExtractSource;

#[async_trait]
impl TextSource for PdfExtractSource {
    fn name(&self) -> &'static str {
        "pdf-extract"
    }

    async fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        let path = path.to_path_buf();
        // pdf-extract can panic on malformed input; the join error catches it.
        tokio::task::spawn_blocking(move || pdf_extract::extract_text(&path))
            .await
            .map_err(|e| ExtractionError::Source {
                source_name: "pdf-extract",
                message: format!("worker panicked: {e}"),
            })?
            .map_err(|e| ExtractionError::Source {
                source_name: "pdf-extract",
                message: e.to_string(),
            })
    }
}

/// Rasterises the first pages with `pdftoppm` and reads them with `tesseract`.
pub struct TesseractOcr {
    pub max_pages: u32,
    pub dpi: u32,
    pub language: String,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self {
            max_pages: OCR_MAX_PAGES,
            dpi: OCR_DPI,
            language: "eng".to_string(),
        }
    }
}

#[async_trait]
impl TextSource for TesseractOcr {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    async fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        let img_dir = TempDir::new()?;
        let img_prefix = img_dir.path().join("page");

        run_cmd_with_timeout(
            "pdftoppm",
            Command::new("pdftoppm")
                .arg("-png")
                .arg("-r")
                .arg(self.dpi.to_string())
                .arg("-f")
                .arg("1")
                .arg("-l")
                .arg(self.max_pages.to_string())
                .arg(path)
                .arg(&img_prefix),
            CMD_TIMEOUT_SECS * 3,
        )
        .await?;

        let mut pages: Vec<_> = fs::read_dir(img_dir.path())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("png"))
            .collect();
        pages.sort();

        let mut texts = Vec::with_capacity(pages.len());
        for page in pages.iter().take(self.max_pages as usize) {
            match run_cmd_with_timeout(
                self.name(),
                Command::new("tesseract")
                    .arg(page)
                    .arg("stdout")
                    .arg("-l")
                    .arg(&self.language),
                CMD_TIMEOUT_SECS,
            )
            .await
            {
                Ok(text) => texts.push(text),
                Err(e) => warn!(page = %page.display(), "OCR of page failed: {e}"),
            }
        }
        debug!(pages = texts.len(), "OCR complete");
        Ok(texts.join("\n\n"))
    }
}

/// DOCX paragraphs and table cells, in document order, via `pandoc`.
pub struct PandocDocx;

#[async_trait]
impl TextSource for PandocDocx {
    fn name(&self) -> &'static str {
        "pandoc"
    }

    async fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        run_cmd_with_timeout(
            self.name(),
            Command::new("pandoc")
                .arg("-f")
                .arg("docx")
                .arg("-t")
                .arg("plain")
                .arg("--wrap=none")
                .arg(path),
            CMD_TIMEOUT_SECS,
        )
        .await
    }
}

/// Legacy Word documents via `antiword`.
pub struct AntiwordDoc;

#[async_trait]
impl TextSource for AntiwordDoc {
    fn name(&self) -> &'static str {
        "antiword"
    }

    async fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        run_cmd_with_timeout(
            self.name(),
            Command::new("antiword").arg("-w").arg("0").arg(path),
            CMD_TIMEOUT_SECS,
        )
        .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::NamedTempFile;

    /// Source returning canned text and counting calls.
    pub(crate) struct FixedSource {
        pub name: &'static str,
        pub result: Result<String, &'static str>,
        pub calls: AtomicUsize,
    }

    impl FixedSource {
        pub(crate) fn ok(name: &'static str, text: &str) -> Arc<Self> {
            Arc::new(Self {
                name,
                result: Ok(text.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                result: Err("boom"),
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextSource for FixedSource {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn extract(&self, _path: &Path) -> Result<String, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone().map_err(|message| ExtractionError::Source {
                source_name: self.name,
                message: message.to_string(),
            })
        }
    }

    pub(crate) fn fixture(suffix: &str, bytes: &[u8]) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    fn long_text() -> String {
        "Experienced engineer building distributed systems in Rust and Go. ".repeat(4)
    }

    fn extractor(
        layout: Arc<FixedSource>,
        second: Arc<FixedSource>,
        ocr: Arc<FixedSource>,
    ) -> TextExtractor {
        TextExtractor::new(
            vec![layout as Arc<dyn TextSource>, second],
            Some(ocr as Arc<dyn TextSource>),
            FixedSource::ok("pandoc", &long_text()),
            FixedSource::ok("antiword", "short"),
        )
    }

    #[test]
    fn test_validate_rejects_unsupported_extension() {
        let file = fixture(".txt", b"plain text resume");
        let err = validate_file(file.path()).unwrap_err();
        assert_eq!(err.code(), "UnsupportedFormat");
        assert!(err.is_validation());
    }

    #[test]
    fn test_validate_rejects_empty_file() {
        let file = fixture(".pdf", b"");
        assert!(matches!(
            validate_file(file.path()),
            Err(ExtractionError::EmptyFile)
        ));
    }

    #[test]
    fn test_validate_size_boundary() {
        let file = fixture(".pdf", b"%PDF");
        file.as_file().set_len(MAX_FILE_BYTES).unwrap();
        assert!(validate_file(file.path()).is_ok());

        file.as_file().set_len(MAX_FILE_BYTES + 1).unwrap();
        let err = validate_file(file.path()).unwrap_err();
        assert_eq!(err.code(), "FileTooLarge");
    }

    #[test]
    fn test_validate_accepts_uppercase_extension() {
        let file = fixture(".DOCX", b"PK");
        let (kind, size) = validate_file(file.path()).unwrap();
        assert_eq!(kind, MediaKind::Docx);
        assert_eq!(size, 2);
    }

    #[tokio::test]
    async fn test_layout_text_skips_fallbacks() {
        let layout = FixedSource::ok("pdftotext", &long_text());
        let second = FixedSource::ok("pdf-extract", "unused");
        let ocr = FixedSource::ok("tesseract", "unused");
        let ex = extractor(layout.clone(), second.clone(), ocr.clone());

        let file = fixture(".pdf", b"%PDF-1.7");
        let out = ex.extract(file.path()).await.unwrap();
        assert!(!out.is_scanned);
        assert_eq!(out.method, "pdftotext");
        assert_eq!(second.calls(), 0);
        assert_eq!(ocr.calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_layout_extractor_falls_back_to_second() {
        let layout = FixedSource::failing("pdftotext");
        let second = FixedSource::ok("pdf-extract", &long_text());
        let ocr = FixedSource::ok("tesseract", "unused");
        let ex = extractor(layout, second, ocr.clone());

        let file = fixture(".pdf", b"%PDF-1.7");
        let out = ex.extract(file.path()).await.unwrap();
        assert_eq!(out.method, "pdf-extract");
        assert_eq!(ocr.calls(), 0);
    }

    #[tokio::test]
    async fn test_scanned_pdf_engages_ocr() {
        let forty = "x".repeat(40);
        let layout = FixedSource::ok("pdftotext", &forty);
        let second = FixedSource::ok("pdf-extract", &forty);
        let ocr = FixedSource::ok("tesseract", &long_text());
        let ex = extractor(layout, second, ocr.clone());

        let file = fixture(".pdf", b"%PDF-1.7");
        let out = ex.extract(file.path()).await.unwrap();
        assert!(out.is_scanned);
        assert_eq!(out.method, "tesseract");
        assert_eq!(ocr.calls(), 1);
    }

    #[tokio::test]
    async fn test_short_ocr_output_is_insufficient_text() {
        let forty = "x".repeat(40);
        let ex = extractor(
            FixedSource::ok("pdftotext", &forty),
            FixedSource::ok("pdf-extract", ""),
            FixedSource::ok("tesseract", "blurry"),
        );

        let file = fixture(".pdf", b"%PDF-1.7");
        let err = ex.extract(file.path()).await.unwrap_err();
        assert_eq!(err.code(), "InsufficientText");
        assert!(!err.is_validation());
        assert!(matches!(err, ExtractionError::InsufficientText { chars: 40, .. }));
    }

    #[tokio::test]
    async fn test_short_doc_is_insufficient_text() {
        let ex = extractor(
            FixedSource::ok("pdftotext", ""),
            FixedSource::ok("pdf-extract", ""),
            FixedSource::ok("tesseract", ""),
        );
        let file = fixture(".doc", b"\xd0\xcf\x11\xe0");
        let err = ex.extract(file.path()).await.unwrap_err();
        assert_eq!(err.code(), "InsufficientText");
    }

    #[test]
    fn test_normalize_collapses_blank_runs() {
        let raw = "Jane Doe  \r\n\r\n\r\n\u{c}Engineer\n\n\nRust";
        assert_eq!(normalize_text(raw), "Jane Doe\n\nEngineer\n\nRust");
    }
}
