//! Text extraction for uploaded documents.
//!
//! The parse stage hands a document's bytes and MIME type to a
//! [`TextExtractor`] and stores the returned UTF-8 text. [`DefaultExtractor`]
//! covers plain-text formats, PDF (`pdf-extract`), and DOCX (`zip` +
//! `quick-xml`). Extraction never panics on bad input; it returns an error
//! and the document moves to `error`.

use std::io::Read;
use std::path::Path;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_CSV: &str = "text/csv";
pub const MIME_JSON: &str = "application/json";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("text extraction failed: {0}")]
    ExtractionFailed(String),
}

/// Turns document bytes into plain text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], mime_type: &str) -> Result<String, ExtractError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExtractor;

impl TextExtractor for DefaultExtractor {
    fn extract(&self, bytes: &[u8], mime_type: &str) -> Result<String, ExtractError> {
        match mime_type {
            MIME_TEXT | MIME_MARKDOWN | MIME_CSV | MIME_JSON => extract_utf8(bytes),
            MIME_PDF => extract_pdf(bytes),
            MIME_DOCX => extract_docx(bytes),
            other => Err(ExtractError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// MIME type for a file name, by extension.
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "txt" | "text" | "log" => Some(MIME_TEXT),
        "md" | "markdown" => Some(MIME_MARKDOWN),
        "csv" => Some(MIME_CSV),
        "json" => Some(MIME_JSON),
        "pdf" => Some(MIME_PDF),
        "docx" => Some(MIME_DOCX),
        _ => None,
    }
}

fn extract_utf8(bytes: &[u8]) -> Result<String, ExtractError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| ExtractError::ExtractionFailed(format!("not valid UTF-8: {}", e)))
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| ExtractError::ExtractionFailed(format!("PDF: {}", e)))
}

fn docx_error(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::ExtractionFailed(format!("DOCX: {}", e))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(docx_error)?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| docx_error("word/document.xml not found"))?;
    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(docx_error)?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(docx_error("word/document.xml exceeds size limit"));
    }
    paragraph_text(&xml)
}

/// Concatenate `<w:t>` runs, one line per `<w:p>` paragraph.
fn paragraph_text(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().map_err(docx_error)?.as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if !out.is_empty() && !out.ends_with('\n') {
                        out.push('\n');
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(docx_error(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}
