//! Plain-text extraction for fetched essay documents.
//!
//! The store hands back bytes plus whatever content type the caller knows;
//! [`extract`] settles the MIME type, pulls text out of word-processor
//! files, and always keeps the original bytes (base64) alongside. A failed
//! extraction yields empty text rather than an error so the comparison
//! pipeline can take its fallback path.

use std::io::Read;

use base64::Engine;
use serde::Serialize;
use tracing::debug;

pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_OCTET: &str = "application/octet-stream";

/// Maximum decompressed bytes to read from `word/document.xml` (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug)]
pub enum ExtractError {
    UnsupportedContentType(String),
    Ooxml(String),
    Encoding(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedContentType(ct) => {
                write!(f, "unsupported content-type: {}", ct)
            }
            ExtractError::Ooxml(e) => write!(f, "OOXML extraction failed: {}", e),
            ExtractError::Encoding(e) => write!(f, "text decoding failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extraction output. `extracted_text` is empty when nothing could be read.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedContent {
    pub mime_type: String,
    pub raw_base64: String,
    pub extracted_text: String,
    pub size_bytes: u64,
}

/// Extract text from `bytes`, trusting `declared_mime` unless it is missing or generic.
pub fn extract(bytes: &[u8], declared_mime: Option<&str>) -> ExtractedContent {
    let mime_type = resolve_mime(bytes, declared_mime);
    let extracted_text = match extract_text(bytes, &mime_type) {
        Ok(text) => text,
        Err(e) => {
            debug!(mime = %mime_type, error = %e, "extraction failed, using empty text");
            String::new()
        }
    };

    ExtractedContent {
        raw_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
        size_bytes: bytes.len() as u64,
        mime_type,
        extracted_text,
    }
}

/// Declared types too vague to trust; magic bytes decide instead.
const GENERIC_MIMES: &[&str] = &[
    MIME_OCTET,
    "binary/octet-stream",
    "application/zip",
    "application/x-zip-compressed",
];

/// Settle the content type: a specific declared type wins, then magic bytes.
pub fn resolve_mime(bytes: &[u8], declared_mime: Option<&str>) -> String {
    let declared = declared_mime
        .map(|m| m.split(';').next().unwrap_or(m).trim().to_ascii_lowercase())
        .filter(|m| !m.is_empty() && !GENERIC_MIMES.contains(&m.as_str()));
    if let Some(m) = declared {
        return m;
    }

    if bytes.starts_with(b"PK\x03\x04") {
        MIME_DOCX.to_string()
    } else if bytes.starts_with(b"%PDF") {
        MIME_PDF.to_string()
    } else if std::str::from_utf8(bytes).is_ok() {
        MIME_TEXT.to_string()
    } else {
        MIME_OCTET.to_string()
    }
}

/// Content type guessed from a storage key's extension.
pub fn mime_from_key(key: &str) -> Option<&'static str> {
    let ext = key.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "docx" => Some(MIME_DOCX),
        "pdf" => Some(MIME_PDF),
        "txt" | "md" => Some(MIME_TEXT),
        _ => None,
    }
}

pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_DOCX => extract_docx(bytes),
        t if t.starts_with("text/") => String::from_utf8(bytes.to_vec())
            .map(|s| s.trim_start_matches('\u{feff}').to_string())
            .map_err(|e| ExtractError::Encoding(e.to_string())),
        _ => Err(ExtractError::UnsupportedContentType(
            content_type.to_string(),
        )),
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Ooxml("word/document.xml not found".to_string()))?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    extract_paragraphs(&doc_xml)
}

/// Concatenate `<w:t>` runs, one line per `<w:p>` paragraph.
fn extract_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}
