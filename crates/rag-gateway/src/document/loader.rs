use crate::utils::error::ApiError;
use tracing::debug;

/// Extension-derived file type tag. This is the `file_type` stored on the
/// document and used for chunker strategy selection.
pub fn detect_file_type(filename: &str) -> Result<String, ApiError> {
    let extension = std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ApiError::InvalidInput("no file extension found".to_string()))?
        .to_lowercase();

    match extension.as_str() {
        "pdf" => Ok("pdf".to_string()),
        "docx" | "doc" => Ok("docx".to_string()),
        "txt" | "text" | "log" => Ok("txt".to_string()),
        "md" | "markdown" => Ok("md".to_string()),
        "html" | "htm" => Ok("html".to_string()),
        _ => Err(ApiError::InvalidInput(format!(
            "unsupported file type: {}",
            extension
        ))),
    }
}

/// Decode raw upload bytes into plain text for chunking. CPU-bound; callers
/// on the async path run this under `spawn_blocking`.
pub fn decode(bytes: &[u8], file_type: &str) -> Result<String, ApiError> {
    let text = match file_type {
        "txt" => decode_text(bytes),
        "md" => markdown_to_text(&decode_text(bytes)),
        "html" => html_to_text(&decode_text(bytes)),
        "pdf" => pdf_to_text(bytes)?,
        "docx" => docx_to_text(bytes)?,
        other => {
            return Err(ApiError::InvalidInput(format!(
                "unsupported file type: {}",
                other
            )))
        }
    };

    debug!("Decoded {} bytes of {} into {} chars", bytes.len(), file_type, text.len());
    Ok(text)
}

fn decode_text(bytes: &[u8]) -> String {
    let (text, _, _) = encoding_rs::UTF_8.decode(bytes);
    text.into_owned()
}

fn markdown_to_text(markdown: &str) -> String {
    use pulldown_cmark::{Event, Parser, Tag, TagEnd};

    let mut out = String::with_capacity(markdown.len());
    for event in Parser::new(markdown) {
        match event {
            Event::Text(t) | Event::Code(t) => out.push_str(&t),
            Event::SoftBreak => out.push(' '),
            Event::HardBreak => out.push('\n'),
            Event::Start(Tag::Item) => out.push_str("\n- "),
            Event::End(TagEnd::Paragraph | TagEnd::Heading(_) | TagEnd::CodeBlock) => {
                out.push('\n');
            }
            _ => {}
        }
    }
    out
}

fn html_to_text(html: &str) -> String {
    let document = scraper::Html::parse_document(html);
    let mut out = String::with_capacity(html.len() / 2);
    for piece in document.root_element().text() {
        let trimmed = piece.trim();
        if trimmed.is_empty() {
            continue;
        }
        out.push_str(trimmed);
        out.push(' ');
    }
    out
}

fn pdf_to_text(bytes: &[u8]) -> Result<String, ApiError> {
    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| ApiError::InvalidInput(format!("failed to parse PDF: {}", e)))?;

    let page_count = doc.get_pages().len();
    let mut content = String::new();
    for page_num in 1..=page_count {
        if let Ok(text) = doc.extract_text(&[page_num as u32]) {
            content.push_str(&text);
            content.push('\n');
        }
    }
    Ok(content)
}

fn docx_to_text(bytes: &[u8]) -> Result<String, ApiError> {
    use docx_rs::{DocumentChild, ParagraphChild, RunChild};

    let docx = docx_rs::read_docx(bytes)
        .map_err(|e| ApiError::InvalidInput(format!("failed to parse DOCX: {}", e)))?;

    let mut content = String::new();
    for child in docx.document.children {
        if let DocumentChild::Paragraph(para) = child {
            for child in para.children {
                if let ParagraphChild::Run(run) = child {
                    for child in run.children {
                        if let RunChild::Text(text) = child {
                            content.push_str(&text.text);
                        }
                    }
                }
            }
            content.push('\n');
        }
    }
    Ok(content)
}

/// Magic-number validation: the declared extension must match the sniffed
/// content type. Text formats are exempt (no reliable magic).
pub fn validate_content(bytes: &[u8], file_type: &str) -> Result<(), ApiError> {
    if matches!(file_type, "txt" | "md" | "html") {
        return Ok(());
    }

    let kind = infer::get(bytes).ok_or_else(|| {
        ApiError::InvalidInput("could not determine file type from content".to_string())
    })?;

    let mime = kind.mime_type();
    debug!("Magic number detected MIME: {}", mime);

    let is_allowed = match file_type {
        "pdf" => mime == "application/pdf",
        "docx" => {
            mime == "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
                || mime == "application/zip"
        }
        _ => false,
    };

    if !is_allowed {
        return Err(ApiError::InvalidInput(format!(
            "declared type '{}' does not match detected content type '{}'",
            file_type, mime
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_supported_extensions() {
        assert_eq!(detect_file_type("notes.TXT").unwrap(), "txt");
        assert_eq!(detect_file_type("readme.md").unwrap(), "md");
        assert_eq!(detect_file_type("page.htm").unwrap(), "html");
        assert_eq!(detect_file_type("report.pdf").unwrap(), "pdf");
        assert_eq!(detect_file_type("letter.docx").unwrap(), "docx");
    }

    #[test]
    fn rejects_unknown_extensions() {
        assert!(detect_file_type("binary.exe").is_err());
        assert!(detect_file_type("noextension").is_err());
    }

    #[test]
    fn decodes_plain_text() {
        let text = decode(b"hello world", "txt").unwrap();
        assert_eq!(text, "hello world");
    }

    #[test]
    fn strips_markdown_syntax() {
        let md = "# Title\n\nSome *emphasis* and `code`.\n\n- item one\n- item two\n";
        let text = decode(md.as_bytes(), "md").unwrap();
        assert!(text.contains("Title"));
        assert!(text.contains("emphasis"));
        assert!(text.contains("item one"));
        assert!(!text.contains('#'));
        assert!(!text.contains('*'));
    }

    #[test]
    fn strips_html_tags() {
        let html = "<html><body><h1>Header</h1><p>Body text here.</p></body></html>";
        let text = decode(html.as_bytes(), "html").unwrap();
        assert!(text.contains("Header"));
        assert!(text.contains("Body text here."));
        assert!(!text.contains("<p>"));
    }

    #[test]
    fn invalid_pdf_is_invalid_input() {
        let err = decode(b"definitely not a pdf", "pdf").unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
    }

    #[test]
    fn text_formats_skip_magic_validation() {
        assert!(validate_content(b"anything at all", "txt").is_ok());
        assert!(validate_content(b"# markdown", "md").is_ok());
    }

    #[test]
    fn pdf_magic_is_enforced() {
        assert!(validate_content(b"plain text pretending", "pdf").is_err());
        assert!(validate_content(b"%PDF-1.7 rest of file", "pdf").is_ok());
    }
}
