//! Visual snapshot generation for stored receipts.
//!
//! HTML bodies are rendered through a chain of external renderers, tried in
//! order until one produces output. Attachment thumbnails come from the
//! attachment bytes themselves (first PDF page through pdftoppm, images
//! scaled down in-process). A process-wide semaphore caps how many heavy
//! renderer subprocesses run at once; the pipeline is cheap to clone and
//! every clone shares the same permits.

pub mod renderer;

use std::sync::Arc;

use async_trait::async_trait;
use log::warn;
use tokio::sync::Semaphore;

use crate::config::PreviewSettings;
use crate::error::PreviewError;
use crate::extract::{AttachmentKind, CollectedAttachment};
use crate::sanitize::truncate_error;

use renderer::{
    ChromiumPdfRenderer, ChromiumScreenshotRenderer, WkhtmltoimageRenderer, WkhtmltopdfRenderer,
};

/// A rendered visual snapshot of an HTML body.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
    /// Which renderer in the chain produced the output.
    pub renderer: &'static str,
}

/// One link in the renderer chain.
#[async_trait]
pub trait SnapshotRenderer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Browser-backed renderers are heavy enough to starve the scheduler.
    fn is_browser_backed(&self) -> bool {
        false
    }

    async fn render_snapshot(&self, html: &str) -> Result<Snapshot, PreviewError>;
}

#[derive(Clone)]
pub struct PreviewPipeline {
    renderers: Vec<Arc<dyn SnapshotRenderer>>,
    permits: Arc<Semaphore>,
    settings: PreviewSettings,
}

impl PreviewPipeline {
    /// Builds the default chain: browser PDF export, browser screenshot,
    /// wkhtmltopdf, wkhtmltoimage.
    pub fn new(settings: &PreviewSettings) -> Self {
        let renderers: Vec<Arc<dyn SnapshotRenderer>> = vec![
            Arc::new(ChromiumPdfRenderer::new(settings)),
            Arc::new(ChromiumScreenshotRenderer::new(settings)),
            Arc::new(WkhtmltopdfRenderer::new(settings)),
            Arc::new(WkhtmltoimageRenderer::new(settings)),
        ];
        Self::with_renderers(settings, renderers)
    }

    /// Builds a pipeline over a caller-supplied chain.
    pub fn with_renderers(
        settings: &PreviewSettings,
        renderers: Vec<Arc<dyn SnapshotRenderer>>,
    ) -> Self {
        Self {
            renderers,
            permits: Arc::new(Semaphore::new(settings.max_concurrent_renders.max(1))),
            settings: settings.clone(),
        }
    }

    /// Renders an HTML body, walking the chain until a renderer succeeds.
    pub async fn html_snapshot(&self, html: &str) -> Result<Snapshot, PreviewError> {
        let _permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| PreviewError::PermitUnavailable)?;

        let mut attempted = 0;
        let mut last_error = String::new();

        for renderer in &self.renderers {
            attempted += 1;
            match renderer.render_snapshot(html).await {
                Ok(snapshot) => {
                    if renderer.is_browser_backed() {
                        // Let the mailbox client's I/O breathe between heavy renders.
                        tokio::task::yield_now().await;
                    }
                    return Ok(snapshot);
                }
                Err(e) => {
                    warn!("Renderer {} failed: {}", renderer.name(), e);
                    last_error = e.to_string();
                }
            }
        }

        Err(PreviewError::AllRenderersFailed {
            attempted,
            last_error: truncate_error(&last_error),
        })
    }

    /// Produces a PNG thumbnail of an attachment.
    pub async fn attachment_thumbnail(
        &self,
        attachment: &CollectedAttachment,
    ) -> Result<Vec<u8>, PreviewError> {
        match attachment.kind {
            AttachmentKind::Pdf => {
                let _permit = Arc::clone(&self.permits)
                    .acquire_owned()
                    .await
                    .map_err(|_| PreviewError::PermitUnavailable)?;
                let page = renderer::pdf_first_page_png(&self.settings, &attachment.bytes).await?;
                shrink_to_thumbnail(&page, self.settings.thumbnail_max_dimension)
            }
            AttachmentKind::Image => {
                shrink_to_thumbnail(&attachment.bytes, self.settings.thumbnail_max_dimension)
            }
        }
    }
}

/// Scales an image to fit within `max_dimension` on its longest edge and
/// re-encodes it as PNG.
fn shrink_to_thumbnail(image_data: &[u8], max_dimension: u32) -> Result<Vec<u8>, PreviewError> {
    let img = image::load_from_memory(image_data)
        .map_err(|e| PreviewError::Thumbnail(format!("Failed to load image: {}", e)))?;

    let thumb = img.thumbnail(max_dimension, max_dimension);

    let mut bytes = Vec::new();
    thumb
        .write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .map_err(|e| PreviewError::Thumbnail(format!("Failed to encode thumbnail: {}", e)))?;
    Ok(bytes)
}
