//! Pixel-level engines: compression, thumbnailing, video frame sampling.
//!
//! The pipeline only sees the two traits; the raster implementation runs
//! the `image` crate on the blocking pool, and frame sampling shells out
//! to ffmpeg/ffprobe through a scratch directory.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use image::{ImageFormat, codecs::jpeg::JpegEncoder};
use thiserror::Error;
use tokio::fs;
use tokio::process::Command;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("image engine: {0}")]
    Image(String),
    #[error("frame extraction: {0}")]
    Frames(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// A rendered thumbnail plus the source dimensions it was cut from.
#[derive(Debug, Clone)]
pub struct Thumb {
    pub data: Bytes,
    pub source_width: u32,
    pub source_height: u32,
}

#[async_trait]
pub trait ImageEngine: Send + Sync {
    /// Re-encode an image into a smaller payload. `None` means the format
    /// has no lossy re-encode here and the caller should treat the stage
    /// as a no-op.
    async fn compress(&self, data: Bytes) -> EngineResult<Option<Bytes>>;

    /// Resize into a `bound`×`bound` box, preserving aspect ratio.
    async fn thumbnail(&self, data: Bytes, bound: u32) -> EngineResult<Thumb>;
}

#[async_trait]
pub trait FrameExtractor: Send + Sync {
    /// Sample `count` evenly spaced frames as encoded images.
    async fn extract_frames(&self, video: Bytes, count: usize) -> EngineResult<Vec<Bytes>>;
}

const COMPRESS_JPEG_QUALITY: u8 = 60;
const THUMB_JPEG_QUALITY: u8 = 80;

/// `image`-crate implementation of [`ImageEngine`].
#[derive(Default, Clone)]
pub struct RasterEngine;

impl RasterEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ImageEngine for RasterEngine {
    async fn compress(&self, data: Bytes) -> EngineResult<Option<Bytes>> {
        tokio::task::spawn_blocking(move || {
            let format = image::guess_format(&data)
                .map_err(|err| EngineError::Image(err.to_string()))?;
            if format != ImageFormat::Jpeg {
                return Ok(None);
            }
            let img = image::load_from_memory_with_format(&data, format)
                .map_err(|err| EngineError::Image(err.to_string()))?;
            let mut out = Vec::new();
            let encoder = JpegEncoder::new_with_quality(&mut out, COMPRESS_JPEG_QUALITY);
            img.write_with_encoder(encoder)
                .map_err(|err| EngineError::Image(err.to_string()))?;
            Ok(Some(Bytes::from(out)))
        })
        .await
        .map_err(|err| EngineError::Image(err.to_string()))?
    }

    async fn thumbnail(&self, data: Bytes, bound: u32) -> EngineResult<Thumb> {
        tokio::task::spawn_blocking(move || {
            let img = image::load_from_memory(&data)
                .map_err(|err| EngineError::Image(err.to_string()))?;
            let (source_width, source_height) = (img.width(), img.height());
            // JPEG has no alpha channel; flatten before encoding.
            let small = image::DynamicImage::ImageRgb8(img.thumbnail(bound, bound).to_rgb8());
            let mut out = Vec::new();
            let encoder = JpegEncoder::new_with_quality(&mut out, THUMB_JPEG_QUALITY);
            small
                .write_with_encoder(encoder)
                .map_err(|err| EngineError::Image(err.to_string()))?;
            Ok(Thumb {
                data: Bytes::from(out),
                source_width,
                source_height,
            })
        })
        .await
        .map_err(|err| EngineError::Image(err.to_string()))?
    }
}

/// ffmpeg/ffprobe subprocess implementation of [`FrameExtractor`].
pub struct FfmpegExtractor {
    scratch_dir: PathBuf,
}

impl FfmpegExtractor {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
        }
    }

    async fn probe_duration(&self, path: &PathBuf) -> EngineResult<f64> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "csv=p=0",
            ])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            return Err(EngineError::Frames("ffprobe failed".into()));
        }
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<f64>()
            .map_err(|err| EngineError::Frames(format!("bad duration: {err}")))
    }
}

#[async_trait]
impl FrameExtractor for FfmpegExtractor {
    async fn extract_frames(&self, video: Bytes, count: usize) -> EngineResult<Vec<Bytes>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        fs::create_dir_all(&self.scratch_dir).await?;
        let token = Uuid::new_v4();
        let video_path = self.scratch_dir.join(format!("{token}.video"));
        fs::write(&video_path, &video).await?;

        let result = async {
            let duration = self.probe_duration(&video_path).await?;
            let mut frames = Vec::with_capacity(count);
            for i in 0..count {
                // Midpoint of each segment so frame 0 is not a black lead-in.
                let at = duration * (i as f64 + 0.5) / count as f64;
                let frame_path = self.scratch_dir.join(format!("{token}-{i}.jpg"));
                let status = Command::new("ffmpeg")
                    .args(["-v", "error", "-ss", &format!("{at:.3}"), "-i"])
                    .arg(&video_path)
                    .args(["-frames:v", "1", "-y"])
                    .arg(&frame_path)
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await?;
                if !status.success() {
                    return Err(EngineError::Frames(format!("ffmpeg failed at {at:.3}s")));
                }
                let data = fs::read(&frame_path).await?;
                let _ = fs::remove_file(&frame_path).await;
                frames.push(Bytes::from(data));
            }
            Ok(frames)
        }
        .await;

        let _ = fs::remove_file(&video_path).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_png() -> Bytes {
        let img = image::RgbImage::from_pixel(64, 48, image::Rgb([120, 30, 30]));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        Bytes::from(out)
    }

    fn tiny_jpeg() -> Bytes {
        let img = image::RgbImage::from_pixel(64, 48, image::Rgb([120, 30, 30]));
        let mut out = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut out), ImageFormat::Jpeg)
            .unwrap();
        Bytes::from(out)
    }

    #[tokio::test]
    async fn compress_reencodes_jpeg_only() {
        let engine = RasterEngine::new();
        assert!(engine.compress(tiny_jpeg()).await.unwrap().is_some());
        assert!(engine.compress(tiny_png()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn thumbnail_fits_bounding_box_and_reports_source_dims() {
        let engine = RasterEngine::new();
        let thumb = engine.thumbnail(tiny_png(), 32).await.unwrap();
        assert_eq!(thumb.source_width, 64);
        assert_eq!(thumb.source_height, 48);
        let rendered = image::load_from_memory(&thumb.data).unwrap();
        assert!(rendered.width() <= 32 && rendered.height() <= 32);
    }
}
