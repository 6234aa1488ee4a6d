//! Text extraction for uploaded files.
//!
//! PDFs and Word documents are converted to plain text; everything else is
//! decoded as (lossy) UTF-8. A failure is returned as [`Error::Extract`]
//! and the index build skips the file.

use std::io::Read;
use std::panic::{catch_unwind, UnwindSafe};
use std::path::Path;

use crate::error::{Error, Result};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extract plain text from a file's bytes, choosing the decoder by extension.
pub fn extract_text(bytes: &[u8], filename: &str) -> Result<String> {
    let ext = Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => decode_guarded(filename, || {
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| e.to_string())
        }),
        "docx" => extract_docx(bytes).map_err(|e| Error::Extract(format!("{}: {}", filename, e))),
        _ => Ok(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// Run a decoder, turning both its error and any panic it raises into
/// [`Error::Extract`] for this one file.
fn decode_guarded<F>(filename: &str, decode: F) -> Result<String>
where
    F: FnOnce() -> std::result::Result<String, String> + UnwindSafe,
{
    match catch_unwind(decode) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(Error::Extract(format!("{}: {}", filename, e))),
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "decoder panicked".to_string());
            Err(Error::Extract(format!("{}: {}", filename, reason)))
        }
    }
}

fn extract_docx(bytes: &[u8]) -> std::result::Result<String, String> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| "word/document.xml not found".to_string())?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| e.to_string())?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err("word/document.xml exceeds size limit".to_string());
    }

    paragraphs_from_wordml(&xml)
}

/// Collect `<w:t>` runs, separating `<w:p>` paragraphs with blank lines so
/// the chunker sees the document's paragraph structure.
fn paragraphs_from_wordml(xml: &[u8]) -> std::result::Result<String, String> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if !out.is_empty() && !out.ends_with("\n\n") {
                        out.push_str("\n\n");
                    }
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }

    Ok(out.trim().to_string())
}
