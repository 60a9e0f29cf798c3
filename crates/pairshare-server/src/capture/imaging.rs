use std::io::Cursor;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageDecoder, ImageReader};

use crate::error::{AppError, AppResult};

/// Bound on the larger side of the stored working image.
pub const WORKING_MAX_DIMENSION: u32 = 640;
/// Bound on the larger side of the thumbnail.
pub const THUMBNAIL_MAX_DIMENSION: u32 = 128;

/// Working image and thumbnail derived from the same capture.
///
/// The two buffers only ever exist together, so a draft holding an
/// `Option<PreparedImage>` cannot have one without the other.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    working: DynamicImage,
    thumbnail: DynamicImage,
}

impl PreparedImage {
    pub fn working(&self) -> &DynamicImage {
        &self.working
    }

    pub fn thumbnail(&self) -> &DynamicImage {
        &self.thumbnail
    }
}

/// Derive the working image and thumbnail from a raw capture.
pub fn prepare(raw: &DynamicImage) -> AppResult<PreparedImage> {
    let (width, height) = raw.dimensions();
    if width == 0 || height == 0 {
        return Err(AppError::InvalidImage(format!(
            "image has zero dimension ({width}x{height})"
        )));
    }

    Ok(PreparedImage {
        working: bounded_copy(raw, WORKING_MAX_DIMENSION),
        thumbnail: bounded_copy(raw, THUMBNAIL_MAX_DIMENSION),
    })
}

/// Dimensions after scaling by `min(1, max_dimension / max(width, height))`,
/// floored, never below one pixel.
pub fn scaled_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let larger = width.max(height);
    if larger <= max_dimension {
        return (width, height);
    }

    let scale = |side: u32| -> u32 {
        let scaled = u64::from(side) * u64::from(max_dimension) / u64::from(larger);
        (scaled as u32).max(1)
    };
    (scale(width), scale(height))
}

fn bounded_copy(raw: &DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = raw.dimensions();
    let (target_w, target_h) = scaled_dimensions(width, height, max_dimension);
    if (target_w, target_h) == (width, height) {
        return raw.clone();
    }
    raw.resize_exact(target_w, target_h, FilterType::Triangle)
}

/// Decode an encoded photo and rotate it upright according to its EXIF
/// orientation tag.
pub fn decode(bytes: &[u8]) -> AppResult<DynamicImage> {
    if bytes.is_empty() {
        return Err(AppError::InvalidImage("no image data".to_string()));
    }

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| AppError::InvalidImage(format!("unreadable image data: {e}")))?;
    let mut decoder = reader
        .into_decoder()
        .map_err(|e| AppError::InvalidImage(format!("unsupported image: {e}")))?;
    let orientation = decoder
        .orientation()
        .map_err(|e| AppError::InvalidImage(format!("unreadable orientation: {e}")))?;
    let mut image = DynamicImage::from_decoder(decoder)
        .map_err(|e| AppError::InvalidImage(format!("failed to decode image: {e}")))?;
    image.apply_orientation(orientation);

    tracing::debug!("Decoded {}x{} image", image.width(), image.height());
    Ok(image)
}

/// Read and decode the photo stored at a source image path.
pub fn load(path: impl AsRef<Path>) -> AppResult<DynamicImage> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| {
        AppError::InvalidImage(format!("cannot read {}: {e}", path.display()))
    })?;
    decode(&bytes)
}

/// Like [`load`], but only for files that resolve to a location below
/// `capture_dir`. Relative paths are taken relative to `capture_dir`.
pub fn load_within(capture_dir: &Path, path: impl AsRef<Path>) -> AppResult<DynamicImage> {
    let root = capture_dir.canonicalize()?;
    let path = path.as_ref();
    let candidate = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };

    match candidate.canonicalize() {
        Ok(resolved) if resolved.starts_with(&root) => load(resolved),
        _ => {
            tracing::warn!("Refused source image outside capture directory: {}", path.display());
            Err(AppError::BadRequest(
                "Source image is not a file in the capture directory".into(),
            ))
        }
    }
}

pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> AppResult<Vec<u8>> {
    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
    image
        .to_rgb8()
        .write_with_encoder(encoder)
        .map_err(|e| AppError::Internal(format!("JPEG encoding failed: {e}")))?;
    Ok(bytes)
}
