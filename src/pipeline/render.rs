//! PDF rasterisation for the chunked path.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and is not safe to drive from async code. Every call here moves
//! onto tokio's blocking pool so rendering a 300-page document does not
//! stall the worker threads that are waiting on generation calls.
//!
//! The pdfium shared library is looked up in the directory named by
//! `PDFIUM_LIB_PATH` first, then wherever the system loader finds it. A
//! missing library is an error for the chunked path only; whole-document
//! voters never load it.
//!
//! Pages are rendered at the configured DPI, but the longest edge is capped
//! at `max_rendered_pixels` regardless of physical page size; an A0 poster
//! would otherwise produce an image far beyond what a vision model can read.

use crate::error::Pdf2LatexError;
use crate::pipeline::input::SourceDocument;
use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::{debug, info, warn};

/// Bind to the pdfium shared library.
fn bind_pdfium() -> Result<Pdfium, Pdf2LatexError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(dir) if !dir.is_empty() => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir))
        }
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| Pdf2LatexError::Internal(format!(
        "pdfium library not available ({:?}); install libpdfium or set PDFIUM_LIB_PATH",
        e
    )))?;
    Ok(Pdfium::new(bindings))
}

/// Page count of a PDF held in memory.
pub async fn page_count(document: &SourceDocument, password: Option<&str>) -> Result<usize, Pdf2LatexError> {
    let document = document.clone();
    let password = password.map(str::to_string);
    tokio::task::spawn_blocking(move || -> Result<usize, Pdf2LatexError> {
        let pdfium = bind_pdfium()?;
        let pdf = open(&pdfium, document.bytes(), password.as_deref())?;
        let count = pdf.pages().len() as usize;
        Ok(count)
    })
    .await
    .map_err(|e| Pdf2LatexError::Internal(format!("Page-count task panicked: {}", e)))?
}

/// Pixel width for a page `width_pt` points wide at `dpi`, capped at `max_pixels`.
fn target_width(width_pt: f32, dpi: u32, max_pixels: u32) -> i32 {
    let px = (width_pt * dpi as f32 / 72.0).round() as i32;
    px.clamp(1, max_pixels as i32)
}

/// Rasterise the given 0-based pages.
///
/// Returns `(page_index, image)` pairs in the order requested; indices past
/// the last page are skipped with a warning.
pub async fn render_pages(
    document: &SourceDocument,
    dpi: u32,
    max_pixels: u32,
    password: Option<&str>,
    page_indices: &[usize],
) -> Result<Vec<(usize, DynamicImage)>, Pdf2LatexError> {
    let document = document.clone();
    let password = password.map(str::to_string);
    let indices = page_indices.to_vec();

    tokio::task::spawn_blocking(move || {
        render_pages_blocking(document.bytes(), dpi, max_pixels, password.as_deref(), &indices)
    })
    .await
    .map_err(|e| Pdf2LatexError::Internal(format!("Render task panicked: {}", e)))?
}

fn open<'a>(
    pdfium: &'a Pdfium,
    bytes: &'a [u8],
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, Pdf2LatexError> {
    pdfium
        .load_pdf_from_byte_slice(bytes, password)
        .map_err(|e| Pdf2LatexError::CorruptPdf {
            detail: format!("{:?}", e),
        })
}

fn render_pages_blocking(
    bytes: &[u8],
    dpi: u32,
    max_pixels: u32,
    password: Option<&str>,
    page_indices: &[usize],
) -> Result<Vec<(usize, DynamicImage)>, Pdf2LatexError> {
    let pdfium = bind_pdfium()?;
    let pdf = open(&pdfium, bytes, password)?;

    let pages = pdf.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded for rendering: {} pages", total_pages);

    let mut results = Vec::with_capacity(page_indices.len());
    for &idx in page_indices {
        if idx >= total_pages {
            warn!("Skipping page {} (out of range, total={})", idx + 1, total_pages);
            continue;
        }

        let page = pages
            .get(idx as u16)
            .map_err(|e| Pdf2LatexError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            })?;

        let render_config = PdfRenderConfig::new()
            .set_target_width(target_width(page.width().value, dpi, max_pixels))
            .set_maximum_height(max_pixels as i32);

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| Pdf2LatexError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            })?;

        let image = bitmap.as_image();
        debug!("Rendered page {} → {}x{} px", idx + 1, image.width(), image.height());
        results.push((idx, image));
    }

    Ok(results)
}
