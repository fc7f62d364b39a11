//! PDF text extraction for amount scanning.

use crate::error::ExtractError;

/// Extracts text from the first `max_pages` pages of a PDF.
///
/// Receipts put the total on page one; later pages are terms and footers,
/// so the page cap keeps large statements cheap to scan.
pub fn pdf_text_first_pages(pdf_bytes: &[u8], max_pages: usize) -> Result<String, ExtractError> {
    let doc = lopdf::Document::load_mem(pdf_bytes)
        .map_err(|e| ExtractError::PdfText(format!("Failed to load PDF: {}", e)))?;

    let mut text = String::new();
    for (page_num, _) in doc.get_pages().into_iter().take(max_pages) {
        if let Ok(page_text) = doc.extract_text(&[page_num]) {
            text.push_str(&page_text);
            text.push('\n');
        }
    }

    Ok(text)
}
