//! PDF text extraction with an OCR fallback for scanned documents.
//!
//! The text layer is read page by page with `pdf-extract`. When the result
//! is shorter than [`ExtractionConfig::min_text_chars`] the document is
//! treated as image-based: every page is rendered with `pdftoppm` and run
//! through `tesseract`, and that output replaces the text layer.
//!
//! Both stages sit behind small traits ([`TextLayer`], [`Ocr`]) so the
//! pipeline can be exercised without poppler or tesseract installed.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ExtractionConfig;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OCR failed: {0}")]
    Ocr(String),
}

/// Reads the embedded text layer of a PDF, one string per page.
pub trait TextLayer: Send + Sync {
    fn pages(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractError>;
}

/// Recognizes text from the rendered pages of a PDF on disk.
pub trait Ocr: Send + Sync {
    fn recognize(&self, pdf_path: &Path) -> Result<Vec<String>, ExtractError>;
}

pub struct PdfTextLayer;

impl TextLayer for PdfTextLayer {
    fn pages(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
            .map_err(|e| ExtractError::Pdf(e.to_string()))
    }
}

/// OCR through the poppler + tesseract command line tools.
pub struct TesseractOcr {
    pdftoppm_bin: String,
    tesseract_bin: String,
    dpi: u32,
    language: String,
}

impl TesseractOcr {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            pdftoppm_bin: config.pdftoppm_bin.clone(),
            tesseract_bin: config.tesseract_bin.clone(),
            dpi: config.ocr_dpi,
            language: config.ocr_language.clone(),
        }
    }

    fn render_pages(&self, pdf_path: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, ExtractError> {
        let output = Command::new(&self.pdftoppm_bin)
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg("-png")
            .arg(pdf_path)
            .arg(out_dir.join("page"))
            .output()
            .map_err(|e| {
                ExtractError::Ocr(format!("failed to run {}: {}", self.pdftoppm_bin, e))
            })?;
        if !output.status.success() {
            return Err(ExtractError::Ocr(format!(
                "{} exited with {}: {}",
                self.pdftoppm_bin,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let entries = std::fs::read_dir(out_dir).map_err(|e| ExtractError::Read {
            path: out_dir.to_path_buf(),
            source: e,
        })?;
        let mut images: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "png"))
            .collect();
        images.sort_by_key(|p| page_number(p));
        Ok(images)
    }

    fn recognize_image(&self, image: &Path) -> Result<String, ExtractError> {
        let output = Command::new(&self.tesseract_bin)
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .output()
            .map_err(|e| {
                ExtractError::Ocr(format!("failed to run {}: {}", self.tesseract_bin, e))
            })?;
        if !output.status.success() {
            return Err(ExtractError::Ocr(format!(
                "{} exited with {} on {}",
                self.tesseract_bin,
                output.status,
                image.display()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Ocr for TesseractOcr {
    fn recognize(&self, pdf_path: &Path) -> Result<Vec<String>, ExtractError> {
        let scratch = tempfile::tempdir().map_err(|e| ExtractError::Ocr(e.to_string()))?;
        let images = self.render_pages(pdf_path, scratch.path())?;
        debug!(pages = images.len(), "rendered pages for OCR");
        images
            .iter()
            .map(|image| self.recognize_image(image))
            .collect()
    }
}

/// pdftoppm names pages `page-1.png` or `page-01.png` depending on the page count.
fn page_number(path: &Path) -> u32 {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.rsplit('-').next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(u32::MAX)
}

/// Each non-empty page followed by a newline.
fn join_pages(pages: &[String]) -> String {
    let mut text = String::new();
    for page in pages.iter().filter(|p| !p.is_empty()) {
        text.push_str(page);
        text.push('\n');
    }
    text
}

pub struct TextExtractor {
    text_layer: Box<dyn TextLayer>,
    ocr: Option<Box<dyn Ocr>>,
    min_text_chars: usize,
}

impl TextExtractor {
    pub fn new(
        text_layer: Box<dyn TextLayer>,
        ocr: Option<Box<dyn Ocr>>,
        min_text_chars: usize,
    ) -> Self {
        Self {
            text_layer,
            ocr,
            min_text_chars,
        }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        let ocr: Option<Box<dyn Ocr>> = if config.ocr_enabled {
            Some(Box::new(TesseractOcr::new(config)))
        } else {
            None
        };
        Self::new(Box::new(PdfTextLayer), ocr, config.min_text_chars)
    }

    /// Extract the text of the PDF at `path`.
    ///
    /// Fails only when the file cannot be read or its text layer cannot be
    /// parsed. An OCR failure is logged and the (short) text layer returned.
    pub fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let bytes = std::fs::read(path).map_err(|e| ExtractError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let text = join_pages(&self.text_layer.pages(&bytes)?);

        let found = text.trim().chars().count();
        if found >= self.min_text_chars {
            return Ok(text);
        }
        let Some(ocr) = &self.ocr else {
            return Ok(text);
        };

        info!(
            path = %path.display(),
            chars = found,
            "text layer too short, attempting OCR"
        );
        match ocr.recognize(path) {
            Ok(pages) => {
                let recognized = join_pages(&pages);
                if recognized.trim().is_empty() {
                    Ok(text)
                } else {
                    Ok(recognized)
                }
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "OCR failed (are poppler and tesseract installed?)"
                );
                Ok(text)
            }
        }
    }
}
