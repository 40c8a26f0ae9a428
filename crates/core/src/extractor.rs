use crate::chunking::normalize_whitespace;
use crate::error::IngestError;
use crate::models::DocumentKind;
use lopdf::Document;
use std::io::{Cursor, Read};
use std::path::Path;

pub trait TextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String, IngestError>;
}

#[derive(Default)]
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String, IngestError> {
        let document =
            Document::load_mem(bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(format!("page {page_no}: {error}")))?;
            if !text.trim().is_empty() {
                pages.push(text);
            }
        }

        Ok(pages.join("\n"))
    }
}

#[derive(Default)]
pub struct DocxExtractor;

impl TextExtractor for DocxExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String, IngestError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|error| IngestError::DocxParse(format!("invalid archive: {error}")))?;
        let mut part = archive
            .by_name("word/document.xml")
            .map_err(|_| IngestError::DocxParse("no word/document.xml in archive".to_string()))?;

        let mut xml = String::new();
        part.read_to_string(&mut xml)?;
        Ok(plaintext_from_document_xml(&xml))
    }
}

#[derive(Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String, IngestError> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        match std::str::from_utf8(bytes) {
            Ok(text) => Ok(text.to_string()),
            // Latin-1: each byte is the code point of the same value
            Err(_) => Ok(bytes.iter().map(|&byte| byte as char).collect()),
        }
    }
}

/// Text runs of `word/document.xml`, one line per paragraph.
fn plaintext_from_document_xml(xml: &str) -> String {
    let mut result = String::new();
    let mut in_text = false;
    let mut chars = xml.chars();

    while let Some(c) = chars.next() {
        if c != '<' {
            if in_text {
                result.push(c);
            }
            continue;
        }

        let mut tag = String::new();
        for tc in chars.by_ref() {
            if tc == '>' {
                break;
            }
            tag.push(tc);
        }
        let self_closing = tag.ends_with('/');
        let name = tag
            .trim_end_matches('/')
            .split_whitespace()
            .next()
            .unwrap_or_default();

        match name {
            "w:t" if !self_closing => in_text = true,
            "/w:t" => in_text = false,
            "w:p" if !self_closing && !result.is_empty() && !result.ends_with('\n') => {
                result.push('\n');
            }
            "w:tab" => result.push(' '),
            "w:br" | "w:cr" => result.push('\n'),
            _ => {}
        }
    }

    result
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

pub fn extract_text(kind: DocumentKind, bytes: &[u8]) -> Result<String, IngestError> {
    let raw = match kind {
        DocumentKind::Pdf => PdfExtractor.extract(bytes)?,
        DocumentKind::Docx => DocxExtractor.extract(bytes)?,
        DocumentKind::Txt => PlainTextExtractor.extract(bytes)?,
    };
    Ok(normalize_whitespace(&raw))
}

/// Picks the extractor from the file extension and returns normalized text.
pub fn extract_document(
    file_name: &str,
    bytes: &[u8],
) -> Result<(DocumentKind, String), IngestError> {
    let kind = DocumentKind::from_file_name(file_name)
        .ok_or_else(|| IngestError::UnsupportedFileType(file_name.to_string()))?;
    let text = extract_text(kind, bytes)?;
    if text.is_empty() {
        return Err(IngestError::EmptyDocument(file_name.to_string()));
    }
    Ok((kind, text))
}

pub fn extract_file(path: &Path) -> Result<(DocumentKind, String), IngestError> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            IngestError::InvalidArgument(format!("path has no file name: {}", path.display()))
        })?;
    let bytes = std::fs::read(path)?;
    extract_document(name, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with(document_xml: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .expect("start docx part");
        writer
            .write_all(document_xml.as_bytes())
            .expect("write docx part");
        writer.finish().expect("finish docx").into_inner()
    }

    #[test]
    fn text_is_whitespace_normalized() -> Result<(), IngestError> {
        let (kind, text) = extract_document("notes.TXT", b"  First line\n\n\tsecond   line  ")?;
        assert_eq!(kind, DocumentKind::Txt);
        assert_eq!(text, "First line second line");
        Ok(())
    }

    #[test]
    fn invalid_utf8_falls_back_to_latin1() -> Result<(), IngestError> {
        let (_, text) = extract_document("legacy.txt", b"caf\xe9 cr\xe8me")?;
        assert_eq!(text, "café crème");
        Ok(())
    }

    #[test]
    fn docx_paragraphs_become_separate_words() -> Result<(), IngestError> {
        let xml = concat!(
            r#"<w:document><w:body>"#,
            r#"<w:p><w:r><w:t>Pump</w:t></w:r><w:r><w:t xml:space="preserve"> rating</w:t></w:r></w:p>"#,
            r#"<w:tbl><w:tr><w:tc><w:p><w:r><w:t>250 &lt;bar&gt; &amp;lt;</w:t></w:r></w:p></w:tc></w:tr></w:tbl>"#,
            r#"<w:p><w:r><w:t/><w:tab/><w:t>end</w:t></w:r></w:p>"#,
            r#"</w:body></w:document>"#
        );
        let (kind, text) = extract_document("pump.docx", &docx_with(xml))?;
        assert_eq!(kind, DocumentKind::Docx);
        assert_eq!(text, "Pump rating 250 <bar> &lt; end");
        Ok(())
    }

    #[test]
    fn docx_without_document_part_is_rejected() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("other.xml", zip::write::SimpleFileOptions::default())
            .expect("start part");
        let bytes = writer.finish().expect("finish").into_inner();

        assert!(matches!(
            extract_document("broken.docx", &bytes),
            Err(IngestError::DocxParse(_))
        ));
    }

    #[test]
    fn broken_pdf_is_a_parse_error() {
        assert!(matches!(
            extract_document("broken.pdf", b"%PDF-1.4\n%broken"),
            Err(IngestError::PdfParse(_))
        ));
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        assert!(matches!(
            extract_document("program.exe", b"MZ"),
            Err(IngestError::UnsupportedFileType(_))
        ));
        assert!(matches!(
            extract_document("no_extension", b"text"),
            Err(IngestError::UnsupportedFileType(_))
        ));
    }

    #[test]
    fn blank_document_is_empty() {
        assert!(matches!(
            extract_document("blank.txt", b" \n\t "),
            Err(IngestError::EmptyDocument(_))
        ));
    }

    #[test]
    fn files_are_read_from_disk() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("manual.txt");
        std::fs::write(&path, "Relief valve opens at 280 bar.")?;

        let (kind, text) = extract_file(&path)?;
        assert_eq!(kind, DocumentKind::Txt);
        assert_eq!(text, "Relief valve opens at 280 bar.");
        Ok(())
    }
}
