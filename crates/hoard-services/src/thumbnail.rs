//! Image probing and thumbnail rendering for merged uploads.
//!
//! Everything here is best effort: a file that fails to decode simply ends up
//! without dimensions or a thumbnail.

use std::io::Cursor;
use std::path::Path;

use bytes::Bytes;
use image::{GenericImageView, ImageFormat, ImageReader};

/// Decoded facts about an image upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub format: String,
}

#[derive(Debug, Clone)]
pub struct ImageAnalysis {
    pub info: ImageInfo,
    /// PNG thumbnail bounded by the configured dimension.
    pub thumbnail: Option<Bytes>,
}

/// Content types worth decoding.
pub fn is_probeable(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    matches!(
        essence.as_str(),
        "image/jpeg" | "image/jpg" | "image/png" | "image/webp" | "image/gif"
    )
}

fn format_name(format: ImageFormat) -> String {
    match format {
        ImageFormat::Jpeg => "jpeg".to_string(),
        ImageFormat::Png => "png".to_string(),
        ImageFormat::WebP => "webp".to_string(),
        ImageFormat::Gif => "gif".to_string(),
        other => other
            .extensions_str()
            .first()
            .map(|ext| ext.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    }
}

/// Decode `data`, returning its dimensions and a PNG thumbnail no larger than
/// `max_dimension` on either side.
pub fn analyze_bytes(data: &[u8], max_dimension: u32) -> Result<ImageAnalysis, anyhow::Error> {
    let reader = ImageReader::new(Cursor::new(data)).with_guessed_format()?;
    let format = reader
        .format()
        .map(format_name)
        .unwrap_or_else(|| "unknown".to_string());
    let img = reader.decode()?;
    let (width, height) = img.dimensions();

    let thumbnail = if max_dimension > 0 {
        let thumb = img.thumbnail(max_dimension, max_dimension);
        let mut buffer = Vec::new();
        thumb.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
        Some(Bytes::from(buffer))
    } else {
        None
    };

    Ok(ImageAnalysis {
        info: ImageInfo {
            width,
            height,
            format,
        },
        thumbnail,
    })
}

/// Probe a merged file on disk. Decoding runs on the blocking pool.
pub async fn analyze_file(
    path: &Path,
    content_type: &str,
    max_dimension: u32,
) -> Option<ImageAnalysis> {
    if !is_probeable(content_type) {
        return None;
    }

    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read file for image probe");
            return None;
        }
    };

    let result = tokio::task::spawn_blocking(move || analyze_bytes(&data, max_dimension)).await;
    match result {
        Ok(Ok(analysis)) => {
            tracing::debug!(
                width = analysis.info.width,
                height = analysis.info.height,
                format = %analysis.info.format,
                "Image probed"
            );
            Some(analysis)
        }
        Ok(Err(e)) => {
            tracing::warn!(content_type, error = %e, "Image probe failed; storing without dimensions");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "Image probe task aborted");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([0, 128, 255, 255]));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    #[test]
    fn probe_reports_dimensions_and_bounded_thumbnail() {
        let analysis = analyze_bytes(&png(400, 200), 100).unwrap();
        assert_eq!(analysis.info.width, 400);
        assert_eq!(analysis.info.height, 200);
        assert_eq!(analysis.info.format, "png");

        let thumb = analysis.thumbnail.unwrap();
        let decoded = image::load_from_memory(&thumb).unwrap();
        assert_eq!(decoded.dimensions(), (100, 50));
    }

    #[test]
    fn garbage_is_an_error_not_a_panic() {
        assert!(analyze_bytes(b"definitely not an image", 64).is_err());
    }

    #[test]
    fn only_raster_types_are_probed() {
        assert!(is_probeable("image/png"));
        assert!(is_probeable("IMAGE/JPEG; charset=binary"));
        assert!(!is_probeable("image/svg+xml"));
        assert!(!is_probeable("application/pdf"));
    }
}
