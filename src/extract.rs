//! PDF validation and per-page text extraction.
//!
//! Extraction is a pipeline step: callers supply bytes, this module returns
//! plain UTF-8 text per page or an [`RagError::UnreadablePdf`].

use crate::error::{RagError, RagResult};

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Check that `filename` names a PDF and `bytes` look like one.
pub fn validate_upload(filename: &str, bytes: &[u8]) -> RagResult<()> {
    if filename.trim().is_empty() {
        return Err(RagError::InvalidUpload("Missing filename".to_string()));
    }
    if !filename.to_lowercase().ends_with(".pdf") {
        return Err(RagError::InvalidUpload(
            "Only PDF files are allowed".to_string(),
        ));
    }
    if bytes.is_empty() {
        return Err(RagError::InvalidUpload("Uploaded file is empty".to_string()));
    }
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(RagError::InvalidUpload(
            "File does not have a PDF header".to_string(),
        ));
    }
    Ok(())
}

/// Extract text per page, rejecting encrypted or text-less documents.
pub fn extract_pages(bytes: &[u8]) -> RagResult<Vec<String>> {
    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| RagError::UnreadablePdf(format!("failed to parse PDF: {}", e)))?;
    if doc.trailer.get(b"Encrypt").is_ok() || doc.is_encrypted() {
        return Err(RagError::UnreadablePdf(
            "PDF is encrypted and cannot be processed".to_string(),
        ));
    }

    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| RagError::UnreadablePdf(e.to_string()))?;

    if pages.iter().all(|p| p.trim().is_empty()) {
        return Err(RagError::UnreadablePdf(
            "No text could be extracted from the PDF".to_string(),
        ));
    }

    Ok(pages)
}

/// Join pages into one text, each prefixed with a `--- Page N ---` marker.
/// Pages without text are skipped but keep their number.
pub fn join_pages(pages: &[String]) -> String {
    let mut text = String::new();
    for (i, page) in pages.iter().enumerate() {
        if page.trim().is_empty() {
            continue;
        }
        text.push_str(&format!("\n--- Page {} ---\n", i + 1));
        text.push_str(page);
    }
    text
}

/// Small uncompressed PDFs built with lopdf, one text line per page.
#[cfg(test)]
pub(crate) mod fixtures {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    fn build(pages: &[&str], encrypt: bool) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for text in pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        if encrypt {
            let encrypt_id = doc.add_object(dictionary! {
                "Filter" => "Standard",
                "V" => 1,
                "R" => 2,
                "O" => Object::string_literal(vec![b'o'; 32]),
                "U" => Object::string_literal(vec![b'u'; 32]),
                "P" => -4,
            });
            doc.trailer.set("Encrypt", encrypt_id);
        }

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    pub(crate) fn pdf_with_pages(pages: &[&str]) -> Vec<u8> {
        build(pages, false)
    }

    /// A document whose trailer carries a Standard security handler entry.
    pub(crate) fn encrypted_pdf() -> Vec<u8> {
        build(&["Confidential figures"], true)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{encrypted_pdf, pdf_with_pages};
    use super::*;

    #[test]
    fn test_rejects_non_pdf_extension() {
        let err = validate_upload("notes.txt", b"%PDF-1.4").unwrap_err();
        assert!(matches!(err, RagError::InvalidUpload(_)));
        assert_eq!(err.to_string(), "Only PDF files are allowed");
    }

    #[test]
    fn test_extension_check_is_case_insensitive() {
        assert!(validate_upload("REPORT.PDF", b"%PDF-1.7\n").is_ok());
    }

    #[test]
    fn test_rejects_missing_header_and_empty() {
        assert!(matches!(
            validate_upload("a.pdf", b""),
            Err(RagError::InvalidUpload(_))
        ));
        assert!(matches!(
            validate_upload("a.pdf", b"PK\x03\x04zip"),
            Err(RagError::InvalidUpload(_))
        ));
    }

    #[test]
    fn test_encrypted_pdf_is_unreadable() {
        let err = extract_pages(&encrypted_pdf()).unwrap_err();
        assert!(matches!(err, RagError::UnreadablePdf(_)));
        assert!(err.to_string().contains("encrypted"));
    }

    #[test]
    fn test_encrypt_token_in_page_text_is_not_encryption() {
        let pdf = pdf_with_pages(&["The trailer key /Encrypt marks protected files"]);
        let pages = extract_pages(&pdf).unwrap();
        assert_eq!(pages.len(), 1);
        assert!(pages[0].contains("protected"));
    }

    #[test]
    fn test_extracts_each_page() {
        let pdf = pdf_with_pages(&["Alpha page text", "Beta page text"]);
        let pages = extract_pages(&pdf).unwrap();
        assert_eq!(pages.len(), 2);
        assert!(pages[0].contains("Alpha"));
        assert!(pages[1].contains("Beta"));
    }

    #[test]
    fn test_corrupted_pdf_is_unreadable() {
        let err = extract_pages(b"%PDF-1.4\nthis is not a pdf body").unwrap_err();
        assert!(matches!(err, RagError::UnreadablePdf(_)));
    }

    #[test]
    fn test_join_pages_numbers_non_empty_pages() {
        let pages = vec![
            "First page".to_string(),
            "   ".to_string(),
            "Third page".to_string(),
        ];
        let text = join_pages(&pages);
        assert!(text.contains("--- Page 1 ---\nFirst page"));
        assert!(!text.contains("--- Page 2 ---"));
        assert!(text.contains("--- Page 3 ---\nThird page"));
    }
}
