//! Native text extraction from uploaded documents.
//!
//! Documents are dispatched by file extension to a [`TextExtractor`]:
//!
//! - [`PdfExtractor`]: per-page text from PDF content streams (no OCR)
//! - [`PlainTextExtractor`]: UTF-8 text files, treated as a single page
//!
//! Unreadable pages are skipped. Extraction only fails when not a single
//! page of any document could be read.

use tracing::{debug, warn};

use crate::document::UploadedDocument;
use crate::error::{RagError, Result};

/// The outcome of extracting one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageText {
    /// The page was read; the text may legitimately be empty.
    Read(String),
    /// The page could not be read, with the reason.
    Unreadable(String),
}

/// A strategy for pulling text out of one document format.
pub trait TextExtractor: Send + Sync {
    /// Short format name used in logs.
    fn name(&self) -> &'static str;

    /// Extract the pages of a document in page order.
    ///
    /// A document that cannot be opened at all yields a single
    /// [`PageText::Unreadable`] entry.
    fn extract_pages(&self, bytes: &[u8]) -> Vec<PageText>;
}

/// Extracts the text layer of PDF documents page by page.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn extract_pages(&self, bytes: &[u8]) -> Vec<PageText> {
        let document = match lopdf::Document::load_mem(bytes) {
            Ok(document) => document,
            Err(e) => return vec![PageText::Unreadable(format!("failed to parse PDF: {e}"))],
        };

        let pages = document.get_pages();
        if pages.is_empty() {
            return vec![PageText::Unreadable("PDF has no pages".to_string())];
        }

        pages
            .keys()
            .map(|&number| match document.extract_text(&[number]) {
                Ok(text) => PageText::Read(text),
                Err(e) => PageText::Unreadable(format!("page {number}: {e}")),
            })
            .collect()
    }
}

/// Reads UTF-8 text files as a single page.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn name(&self) -> &'static str {
        "text"
    }

    fn extract_pages(&self, bytes: &[u8]) -> Vec<PageText> {
        match std::str::from_utf8(bytes) {
            Ok(text) => vec![PageText::Read(text.to_string())],
            Err(e) => vec![PageText::Unreadable(format!("not valid UTF-8: {e}"))],
        }
    }
}

/// Pick the extractor for a document based on its extension.
///
/// Files without a known extension are tried as plain text.
pub fn extractor_for(document: &UploadedDocument) -> &'static dyn TextExtractor {
    static PDF: PdfExtractor = PdfExtractor;
    static TEXT: PlainTextExtractor = PlainTextExtractor;

    match document.extension().as_deref() {
        Some("pdf") => &PDF,
        _ => &TEXT,
    }
}

/// Text extracted from one build's documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedText {
    /// Page texts joined in document order, then page order.
    pub text: String,
    /// Number of documents processed.
    pub documents: usize,
    /// Number of pages whose text was read.
    pub pages_read: usize,
    /// Number of pages skipped because they could not be read.
    pub pages_skipped: usize,
}

/// Separator placed between consecutive page texts.
const PAGE_SEPARATOR: &str = "\n";

/// Extract and concatenate the text of all documents, in order.
///
/// # Errors
///
/// Returns [`RagError::ExtractionFailed`] if `documents` is empty or if
/// every page of every document is unreadable.
pub fn extract_text(documents: &[UploadedDocument]) -> Result<ExtractedText> {
    let per_document: Vec<Vec<PageText>> =
        documents.iter().map(extract_document).collect();
    assemble(documents, per_document)
}

/// Like [`extract_text`], but each document is parsed on the blocking
/// thread pool. Results are reassembled in input order regardless of which
/// document finishes first.
///
/// # Errors
///
/// Same as [`extract_text`].
pub async fn extract_text_concurrently(documents: &[UploadedDocument]) -> Result<ExtractedText> {
    let tasks = documents.iter().cloned().map(|doc| {
        tokio::task::spawn_blocking(move || extract_document(&doc))
    });

    let joined = futures::future::join_all(tasks).await;
    let mut per_document = Vec::with_capacity(joined.len());
    for (doc, outcome) in documents.iter().zip(joined) {
        match outcome {
            Ok(pages) => per_document.push(pages),
            Err(e) => {
                warn!(file = %doc.file_name, error = %e, "extraction task failed");
                per_document.push(vec![PageText::Unreadable(format!("extraction task failed: {e}"))]);
            }
        }
    }
    assemble(documents, per_document)
}

fn extract_document(document: &UploadedDocument) -> Vec<PageText> {
    let extractor = extractor_for(document);
    let pages = extractor.extract_pages(&document.bytes);
    debug!(
        file = %document.file_name,
        format = extractor.name(),
        pages = pages.len(),
        "extracted document"
    );
    pages
}

fn assemble(
    documents: &[UploadedDocument],
    per_document: Vec<Vec<PageText>>,
) -> Result<ExtractedText> {
    if documents.is_empty() {
        return Err(RagError::ExtractionFailed("no documents were supplied".to_string()));
    }

    let mut extracted = ExtractedText { documents: documents.len(), ..Default::default() };
    let mut texts = Vec::new();

    for (document, pages) in documents.iter().zip(per_document) {
        for (page_number, page) in pages.into_iter().enumerate() {
            match page {
                PageText::Read(text) => {
                    extracted.pages_read += 1;
                    texts.push(text);
                }
                PageText::Unreadable(reason) => {
                    extracted.pages_skipped += 1;
                    warn!(
                        file = %document.file_name,
                        page = page_number + 1,
                        reason = %reason,
                        "skipping unreadable page"
                    );
                }
            }
        }
    }

    if extracted.pages_read == 0 {
        return Err(RagError::ExtractionFailed(format!(
            "none of the {} page(s) in {} document(s) could be read",
            extracted.pages_skipped, extracted.documents
        )));
    }

    extracted.text = texts.join(PAGE_SEPARATOR);
    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use lopdf::content::{Content, Operation};
    use lopdf::{Document, Object, Stream, dictionary};

    use super::*;

    /// Build a PDF with one page per `(encoding, text)` pair.
    fn pdf_with_pages(pages: &[(&str, &str)]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let kids: Vec<Object> = pages
            .iter()
            .map(|&(encoding, text)| {
                let font_id = doc.add_object(dictionary! {
                    "Type" => "Font",
                    "Subtype" => "Type1",
                    "BaseFont" => "Courier",
                    "Encoding" => encoding,
                });
                let content = Content {
                    operations: vec![
                        Operation::new("BT", vec![]),
                        Operation::new("Tf", vec!["F1".into(), 12.into()]),
                        Operation::new("Td", vec![72.into(), 720.into()]),
                        Operation::new("Tj", vec![Object::string_literal(text)]),
                        Operation::new("ET", vec![]),
                    ],
                };
                let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
                doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "Contents" => content_id,
                    "Resources" => dictionary! {
                        "Font" => dictionary! { "F1" => font_id },
                    },
                })
                .into()
            })
            .collect();

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Count" => kids.len() as i64,
                "Kids" => kids,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn plain_text_is_a_single_page() {
        let doc = UploadedDocument::new("notes.txt", "The rocket's fuel capacity is 500 liters.");
        let extracted = extract_text(&[doc]).unwrap();
        assert_eq!(extracted.text, "The rocket's fuel capacity is 500 liters.");
        assert_eq!(extracted.pages_read, 1);
        assert_eq!(extracted.pages_skipped, 0);
    }

    #[test]
    fn documents_are_concatenated_in_order() {
        let docs = [UploadedDocument::new("a.md", "first"), UploadedDocument::new("b.txt", "second")];
        let extracted = extract_text(&docs).unwrap();
        assert_eq!(extracted.text, "first\nsecond");
        assert_eq!(extracted.documents, 2);
    }

    #[test]
    fn unreadable_documents_are_skipped() {
        let docs = [
            UploadedDocument::new("broken.pdf", b"definitely not a pdf".to_vec()),
            UploadedDocument::new("ok.txt", "readable"),
        ];
        let extracted = extract_text(&docs).unwrap();
        assert_eq!(extracted.text, "readable");
        assert_eq!(extracted.pages_read, 1);
        assert_eq!(extracted.pages_skipped, 1);
    }

    #[test]
    fn pdf_pages_are_read_in_order() {
        let bytes = pdf_with_pages(&[
            ("WinAnsiEncoding", "The rocket's fuel capacity is 500 liters."),
            ("WinAnsiEncoding", "Crew members train for two years."),
        ]);
        let extracted = extract_text(&[UploadedDocument::new("manual.pdf", bytes)]).unwrap();

        assert_eq!(extracted.pages_read, 2);
        assert_eq!(extracted.pages_skipped, 0);
        let fuel = extracted.text.find("500 liters").unwrap();
        let crew = extracted.text.find("two years").unwrap();
        assert!(fuel < crew);
    }

    #[test]
    fn a_pdf_page_without_a_usable_font_is_skipped() {
        // Identity-H without a ToUnicode map cannot be decoded.
        let bytes = pdf_with_pages(&[
            ("WinAnsiEncoding", "The rocket's fuel capacity is 500 liters."),
            ("Identity-H", "Crew members train for two years."),
        ]);
        let extracted = extract_text(&[UploadedDocument::new("manual.pdf", bytes)]).unwrap();

        assert_eq!(extracted.pages_read, 1);
        assert_eq!(extracted.pages_skipped, 1);
        assert!(extracted.text.contains("500 liters"));
    }

    #[test]
    fn all_pages_failing_is_an_error() {
        let docs = [
            UploadedDocument::new("broken.pdf", b"%PDF-garbage".to_vec()),
            UploadedDocument::new("binary.txt", vec![0xff, 0xfe, 0xfd]),
        ];
        let err = extract_text(&docs).unwrap_err();
        assert!(matches!(err, RagError::ExtractionFailed(_)));
    }

    #[test]
    fn no_documents_is_an_error() {
        assert!(matches!(extract_text(&[]), Err(RagError::ExtractionFailed(_))));
    }

    #[test]
    fn extension_dispatch_is_case_insensitive() {
        let doc = UploadedDocument::new("REPORT.PDF", Vec::new());
        assert_eq!(extractor_for(&doc).name(), "pdf");
        let doc = UploadedDocument::new("README", Vec::new());
        assert_eq!(extractor_for(&doc).name(), "text");
    }

    #[tokio::test]
    async fn concurrent_extraction_preserves_document_order() {
        let docs: Vec<UploadedDocument> =
            (0..8).map(|i| UploadedDocument::new(format!("{i}.txt"), format!("doc {i}"))).collect();
        let extracted = extract_text_concurrently(&docs).await.unwrap();
        let expected: Vec<String> = (0..8).map(|i| format!("doc {i}")).collect();
        assert_eq!(extracted.text, expected.join("\n"));
    }
}
