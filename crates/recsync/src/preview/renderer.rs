//! Snapshot renderer implementations.
//!
//! Every renderer shells out to an external binary through temp files in
//! the system temp directory; inputs and outputs are removed best-effort
//! once the render completes.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use image::GenericImageView;
use lopdf::{dictionary, Document, Object, Stream};
use tokio::process::Command as TokioCommand;

use crate::config::PreviewSettings;
use crate::error::PreviewError;

use super::{Snapshot, SnapshotRenderer};

/// Headless-browser PDF export. First in the default chain.
pub struct ChromiumPdfRenderer {
    binary: String,
    timeout: Duration,
}

impl ChromiumPdfRenderer {
    pub fn new(settings: &PreviewSettings) -> Self {
        Self {
            binary: settings.chromium_binary.clone(),
            timeout: Duration::from_secs(settings.render_timeout_seconds),
        }
    }
}

#[async_trait]
impl SnapshotRenderer for ChromiumPdfRenderer {
    fn name(&self) -> &'static str {
        "chromium-pdf"
    }

    fn is_browser_backed(&self) -> bool {
        true
    }

    async fn render_snapshot(&self, html: &str) -> Result<Snapshot, PreviewError> {
        let html_path = temp_path("snapshot", "html");
        let pdf_path = temp_path("snapshot", "pdf");

        write_input(self.name(), &html_path, html).await?;

        let mut cmd = TokioCommand::new(&self.binary);
        cmd.args([
            "--headless".to_string(),
            "--disable-gpu".to_string(),
            format!("--print-to-pdf={}", pdf_path.display()),
            format!("file://{}", html_path.display()),
        ]);

        let result = run_render_command(self.name(), &mut cmd, self.timeout).await;
        let _ = tokio::fs::remove_file(&html_path).await;
        result?;

        let bytes = read_output(self.name(), &pdf_path).await?;
        Ok(Snapshot {
            bytes,
            mime: "application/pdf",
            renderer: self.name(),
        })
    }
}

/// Headless-browser full-page screenshot, wrapped into a one-page PDF.
/// Covers pages where print-to-pdf chokes on the stylesheet.
pub struct ChromiumScreenshotRenderer {
    binary: String,
    timeout: Duration,
}

impl ChromiumScreenshotRenderer {
    pub fn new(settings: &PreviewSettings) -> Self {
        Self {
            binary: settings.chromium_binary.clone(),
            timeout: Duration::from_secs(settings.render_timeout_seconds),
        }
    }
}

#[async_trait]
impl SnapshotRenderer for ChromiumScreenshotRenderer {
    fn name(&self) -> &'static str {
        "chromium-screenshot"
    }

    fn is_browser_backed(&self) -> bool {
        true
    }

    async fn render_snapshot(&self, html: &str) -> Result<Snapshot, PreviewError> {
        let html_path = temp_path("snapshot", "html");
        let png_path = temp_path("snapshot", "png");

        write_input(self.name(), &html_path, html).await?;

        let mut cmd = TokioCommand::new(&self.binary);
        cmd.args([
            "--headless".to_string(),
            "--disable-gpu".to_string(),
            "--window-size=1280,2000".to_string(),
            format!("--screenshot={}", png_path.display()),
            format!("file://{}", html_path.display()),
        ]);

        let result = run_render_command(self.name(), &mut cmd, self.timeout).await;
        let _ = tokio::fs::remove_file(&html_path).await;
        result?;

        let png = read_output(self.name(), &png_path).await?;
        let bytes = image_to_pdf(&png).map_err(|e| PreviewError::RendererFailed {
            renderer: self.name().to_string(),
            reason: format!("Failed to wrap screenshot into PDF: {}", e),
        })?;

        Ok(Snapshot {
            bytes,
            mime: "application/pdf",
            renderer: self.name(),
        })
    }
}

/// wkhtmltopdf fallback for hosts without a browser.
pub struct WkhtmltopdfRenderer {
    binary: String,
    timeout: Duration,
}

impl WkhtmltopdfRenderer {
    pub fn new(settings: &PreviewSettings) -> Self {
        Self {
            binary: settings.wkhtmltopdf_binary.clone(),
            timeout: Duration::from_secs(settings.render_timeout_seconds),
        }
    }
}

#[async_trait]
impl SnapshotRenderer for WkhtmltopdfRenderer {
    fn name(&self) -> &'static str {
        "wkhtmltopdf"
    }

    async fn render_snapshot(&self, html: &str) -> Result<Snapshot, PreviewError> {
        let html_path = temp_path("snapshot", "html");
        let pdf_path = temp_path("snapshot", "pdf");

        write_input(self.name(), &html_path, html).await?;

        let mut cmd = TokioCommand::new(&self.binary);
        cmd.args([
            "--quiet".to_string(),
            html_path.display().to_string(),
            pdf_path.display().to_string(),
        ]);

        let result = run_render_command(self.name(), &mut cmd, self.timeout).await;
        let _ = tokio::fs::remove_file(&html_path).await;
        result?;

        let bytes = read_output(self.name(), &pdf_path).await?;
        Ok(Snapshot {
            bytes,
            mime: "application/pdf",
            renderer: self.name(),
        })
    }
}

/// wkhtmltoimage, last in the chain. Produces a PNG snapshot rather than a
/// document; better than no visual record at all.
pub struct WkhtmltoimageRenderer {
    binary: String,
    timeout: Duration,
}

impl WkhtmltoimageRenderer {
    pub fn new(settings: &PreviewSettings) -> Self {
        Self {
            binary: settings.wkhtmltoimage_binary.clone(),
            timeout: Duration::from_secs(settings.render_timeout_seconds),
        }
    }
}

#[async_trait]
impl SnapshotRenderer for WkhtmltoimageRenderer {
    fn name(&self) -> &'static str {
        "wkhtmltoimage"
    }

    async fn render_snapshot(&self, html: &str) -> Result<Snapshot, PreviewError> {
        let html_path = temp_path("snapshot", "html");
        let png_path = temp_path("snapshot", "png");

        write_input(self.name(), &html_path, html).await?;

        let mut cmd = TokioCommand::new(&self.binary);
        cmd.args([
            "--quiet".to_string(),
            html_path.display().to_string(),
            png_path.display().to_string(),
        ]);

        let result = run_render_command(self.name(), &mut cmd, self.timeout).await;
        let _ = tokio::fs::remove_file(&html_path).await;
        result?;

        let bytes = read_output(self.name(), &png_path).await?;
        Ok(Snapshot {
            bytes,
            mime: "image/png",
            renderer: self.name(),
        })
    }
}

/// Renders page one of a PDF to PNG through pdftoppm.
pub(crate) async fn pdf_first_page_png(
    settings: &PreviewSettings,
    pdf_bytes: &[u8],
) -> Result<Vec<u8>, PreviewError> {
    let pdf_path = temp_path("thumb", "pdf");
    let output_base = pdf_path.with_extension("");
    let png_path = output_base.with_extension("png");

    tokio::fs::write(&pdf_path, pdf_bytes)
        .await
        .map_err(|e| PreviewError::Thumbnail(format!("Failed to write temp PDF: {}", e)))?;

    let mut cmd = TokioCommand::new(&settings.pdftoppm_binary);
    cmd.args([
        "-png".to_string(),
        "-f".to_string(),
        "1".to_string(),
        "-l".to_string(),
        "1".to_string(),
        "-singlefile".to_string(),
        pdf_path.display().to_string(),
        output_base.display().to_string(),
    ]);

    let result = run_render_command(
        "pdftoppm",
        &mut cmd,
        Duration::from_secs(settings.render_timeout_seconds),
    )
    .await;
    let _ = tokio::fs::remove_file(&pdf_path).await;
    result?;

    read_output("pdftoppm", &png_path).await
}

/// Wraps a raster image into a one-page PDF, scaled to fit US Letter with
/// a half-inch margin. JPEG data is embedded directly; everything else is
/// converted to raw RGB.
pub(crate) fn image_to_pdf(image_data: &[u8]) -> Result<Vec<u8>, String> {
    let format = image::guess_format(image_data).map_err(|e| e.to_string())?;
    let img = image::load_from_memory(image_data)
        .map_err(|e| format!("Failed to load image: {}", e))?;

    let (width, height) = img.dimensions();

    let mut doc = Document::with_version("1.5");

    let pages_id = doc.new_object_id();
    let resources_id = doc.new_object_id();
    let content_id = doc.new_object_id();
    let page_id = doc.new_object_id();
    let image_id = doc.new_object_id();

    let image_stream = if format == image::ImageFormat::Jpeg {
        Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            image_data.to_vec(),
        )
    } else {
        Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            img.to_rgb8().into_raw(),
        )
    };

    doc.objects.insert(image_id, Object::Stream(image_stream));

    doc.objects.insert(
        resources_id,
        Object::Dictionary(dictionary! {
            "XObject" => dictionary! {
                "Im1" => image_id,
            },
        }),
    );

    let page_width = 612.0_f64;
    let page_height = 792.0_f64;
    let margin = 36.0_f64;

    let scale_x = (page_width - 2.0 * margin) / width as f64;
    let scale_y = (page_height - 2.0 * margin) / height as f64;
    let scale = scale_x.min(scale_y);

    let img_width = (width as f64 * scale) as i64;
    let img_height = (height as f64 * scale) as i64;
    let x = ((page_width - img_width as f64) / 2.0) as i64;
    let y = ((page_height - img_height as f64) / 2.0) as i64;

    let content = format!(
        "q\n{} 0 0 {} {} {} cm\n/Im1 Do\nQ\n",
        img_width, img_height, x, y
    );
    let content_stream = Stream::new(dictionary! {}, content.into_bytes());
    doc.objects
        .insert(content_id, Object::Stream(content_stream));

    doc.objects.insert(
        page_id,
        Object::Dictionary(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        }),
    );

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).map_err(|e| e.to_string())?;

    Ok(buffer)
}

fn temp_path(prefix: &str, extension: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "recsync_{}_{}.{}",
        prefix,
        uuid::Uuid::new_v4(),
        extension
    ))
}

async fn write_input(renderer: &str, path: &Path, html: &str) -> Result<(), PreviewError> {
    tokio::fs::write(path, html)
        .await
        .map_err(|e| PreviewError::RendererFailed {
            renderer: renderer.to_string(),
            reason: format!("Failed to write input: {}", e),
        })
}

async fn read_output(renderer: &str, path: &Path) -> Result<Vec<u8>, PreviewError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| PreviewError::RendererFailed {
            renderer: renderer.to_string(),
            reason: format!("Produced no output: {}", e),
        })?;
    let _ = tokio::fs::remove_file(path).await;

    if bytes.is_empty() {
        return Err(PreviewError::RendererFailed {
            renderer: renderer.to_string(),
            reason: "Produced empty output".to_string(),
        });
    }
    Ok(bytes)
}

/// Runs a renderer subprocess under a timeout. The child is killed when
/// the timeout drops the future.
async fn run_render_command(
    renderer: &str,
    command: &mut TokioCommand,
    timeout: Duration,
) -> Result<(), PreviewError> {
    command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|e| PreviewError::RendererFailed {
        renderer: renderer.to_string(),
        reason: format!("Failed to spawn '{}': {}", renderer, e),
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| PreviewError::RendererFailed {
            renderer: renderer.to_string(),
            reason: e.to_string(),
        })?,
        Err(_) => {
            return Err(PreviewError::Timeout {
                renderer: renderer.to_string(),
                seconds: timeout.as_secs(),
            })
        }
    };

    if output.status.success() {
        Ok(())
    } else {
        Err(PreviewError::RendererFailed {
            renderer: renderer.to_string(),
            reason: format_process_error(&output),
        })
    }
}

/// Formats a failed subprocess's output, preferring stderr.
fn format_process_error(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "exit code {}",
            output.status.code().unwrap_or(-1)
        ),
        (true, false) => stdout,
        (false, true) => stderr,
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}
