//! Thumbnail generation.
//!
//! The storage core only talks to [`ThumbnailGenerator`]; any failure is
//! logged and the upload carries on without a thumbnail.

use std::io::{self, Write};
use std::path::Path;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use tracing::{debug, warn};

use super::storage::BlobStore;
use crate::config::ThumbnailConfig;
use crate::{Result, VaultError};

/// Extensions treated as images.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

/// Capability used by the upload paths to derive image metadata.
#[async_trait]
pub trait ThumbnailGenerator: Send + Sync {
    /// Whether the name has an image extension.
    fn is_image_extension(&self, name: &str) -> bool;

    /// Render a thumbnail of `src` into `dst`.
    async fn generate(&self, src: &Path, dst: &Path) -> Result<()>;

    /// Pixel dimensions of the image at `path`.
    async fn dimensions(&self, path: &Path) -> Result<(u32, u32)>;
}

fn image_error(e: image::ImageError) -> VaultError {
    VaultError::Validation(format!("image processing failed: {e}"))
}

fn join_error(e: tokio::task::JoinError) -> VaultError {
    VaultError::Io(io::Error::new(io::ErrorKind::Other, e))
}

/// Thumbnailer built on the `image` crate. Decoding and encoding run on the
/// blocking pool.
#[derive(Debug, Clone)]
pub struct ImageThumbnailer {
    width: u32,
    height: u32,
    quality: u8,
}

impl ImageThumbnailer {
    pub fn new(config: &ThumbnailConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            quality: config.quality,
        }
    }
}

#[async_trait]
impl ThumbnailGenerator for ImageThumbnailer {
    fn is_image_extension(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_lowercase();
                IMAGE_EXTENSIONS.contains(&e.as_str())
            })
            .unwrap_or(false)
    }

    async fn generate(&self, src: &Path, dst: &Path) -> Result<()> {
        let (src, dst) = (src.to_path_buf(), dst.to_path_buf());
        let (width, height, quality) = (self.width, self.height, self.quality);

        tokio::task::spawn_blocking(move || -> Result<()> {
            let img = image::open(&src).map_err(image_error)?;
            // fits inside width x height, keeping the aspect ratio
            let thumb = img.thumbnail(width, height).to_rgb8();

            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = io::BufWriter::new(std::fs::File::create(&dst)?);
            JpegEncoder::new_with_quality(&mut out, quality)
                .encode(thumb.as_raw(), thumb.width(), thumb.height(), ColorType::Rgb8)
                .map_err(image_error)?;
            out.flush()?;
            Ok(())
        })
        .await
        .map_err(join_error)?
    }

    async fn dimensions(&self, path: &Path) -> Result<(u32, u32)> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || image::image_dimensions(&path).map_err(image_error))
            .await
            .map_err(join_error)?
    }
}

/// Image metadata stored on a file object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageInfo {
    pub is_image: bool,
    pub thumbnail_path: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

/// Inspect a freshly written blob and render its thumbnail, best-effort.
///
/// Non-images yield `ImageInfo::default()`. A failed thumbnail leaves
/// `thumbnail_path` empty and removes any partial output.
pub async fn inspect_image(
    thumbnailer: &dyn ThumbnailGenerator,
    storage: &BlobStore,
    user_id: i64,
    original_name: &str,
    blob_path: &str,
) -> ImageInfo {
    if !thumbnailer.is_image_extension(original_name) {
        return ImageInfo::default();
    }

    let src = storage.full_path(blob_path);
    let mut info = ImageInfo {
        is_image: true,
        ..Default::default()
    };

    match thumbnailer.dimensions(&src).await {
        Ok((w, h)) => {
            info.width = Some(i64::from(w));
            info.height = Some(i64::from(h));
        }
        Err(e) => warn!(path = %blob_path, error = %e, "could not read image dimensions"),
    }

    let thumb = storage.allocate_thumbnail(user_id);
    match thumbnailer.generate(&src, &storage.full_path(&thumb)).await {
        Ok(()) => {
            debug!(path = %thumb, "thumbnail generated");
            info.thumbnail_path = Some(thumb);
        }
        Err(e) => {
            warn!(path = %blob_path, error = %e, "thumbnail generation failed");
            storage.delete_quietly(&thumb).await;
        }
    }

    info
}
