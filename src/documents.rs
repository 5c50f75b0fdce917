//! Document text extraction
//!
//! Supports the two formats users send for study guides:
//! - PDF: page text via lopdf
//! - PPTX: `<a:t>` text runs from `ppt/slides/slideN.xml`, in slide order

use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use std::io::{Cursor, Read};
use tracing::{debug, warn};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

const SLIDE_PREFIX: &str = "ppt/slides/slide";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Pptx,
}

impl DocumentKind {
    /// Detect by extension, case-insensitive
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "pptx" => Some(Self::Pptx),
            _ => None,
        }
    }

    /// Upper-case name shown to users
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pdf => "PDF",
            Self::Pptx => "PPTX",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("failed to parse PDF: {0}")]
    Pdf(String),

    #[error("failed to open PPTX archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("failed to parse slide XML: {0}")]
    Xml(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Turns uploaded bytes into plain text.
///
/// Returning an empty string is not an error; callers decide what no text means.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, kind: DocumentKind, bytes: &[u8]) -> Result<String, ExtractError>;
}

/// Extractor for PDF and PPTX
#[derive(Debug, Default, Clone, Copy)]
pub struct OfficeExtractor;

impl TextExtractor for OfficeExtractor {
    fn extract(&self, kind: DocumentKind, bytes: &[u8]) -> Result<String, ExtractError> {
        let text = match kind {
            DocumentKind::Pdf => extract_pdf(bytes)?,
            DocumentKind::Pptx => extract_pptx(bytes)?,
        };
        debug!("Extracted {} chars from {}", text.chars().count(), kind.label());
        Ok(text)
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;

    let mut pages = Vec::new();
    for page_num in doc.get_pages().keys() {
        match doc.extract_text(&[*page_num]) {
            Ok(text) => pages.push(collapse_whitespace(&text)),
            Err(e) => warn!("Failed to extract text from page {}: {}", page_num, e),
        }
    }

    Ok(pages.into_iter().filter(|p| !p.is_empty()).collect::<Vec<_>>().join("\n"))
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;

    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| slide_number(name).map(|n| (n, name.to_string())))
        .collect();
    slides.sort_by_key(|(n, _)| *n);

    let mut out = String::new();
    for (number, name) in slides {
        let mut xml = String::new();
        archive.by_name(&name)?.read_to_string(&mut xml)?;

        let text = slide_text(&xml)?;
        if text.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("--- Slide {} ---\n{}", number, text));
    }
    Ok(out)
}

/// `ppt/slides/slide12.xml` → 12; layouts, rels and notes don't match
fn slide_number(name: &str) -> Option<u32> {
    name.strip_prefix(SLIDE_PREFIX)?
        .strip_suffix(".xml")?
        .parse()
        .ok()
}

/// Text runs of one slide joined by spaces
fn slide_text(xml: &str) -> Result<String, ExtractError> {
    let mut reader = Reader::from_str(xml);
    let mut runs: Vec<String> = Vec::new();
    let mut in_run = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_run = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == b"t" => in_run = false,
            Ok(Event::Text(t)) if in_run => {
                let text = t.unescape().map_err(|e| ExtractError::Xml(e.to_string()))?;
                if !text.is_empty() {
                    runs.push(text.into_owned());
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ExtractError::Xml(format!(
                    "at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }

    Ok(collapse_whitespace(&runs.join(" ")))
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}
