use std::fs::{self, File};
use std::io::{BufReader, Cursor};

use camino::{Utf8Path, Utf8PathBuf};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ImageFormat};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ImagesConfig, Layout};
use crate::hash::Hash32;
use crate::task::{Artifact, Artifacts, TaskContext};
use crate::transform::{Transform, expand, relative, report};

/// Errors that can occur when processing images.
#[derive(Debug, Error)]
pub enum ImageError {
    /// An I/O error occurred while reading or writing image files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An error occurred during image decoding or encoding.
    #[error("Image processing error in {path}: {source}")]
    Image {
        path: Utf8PathBuf,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct ImageMetadata {
    original: u64,
    optimized: u64,
}

/// Losslessly recompresses PNG files and re-encodes JPEG files, passing
/// every other file through untouched.
///
/// Results are kept in a content-addressed cache keyed by the source bytes
/// and the encoder settings, so unchanged images are never encoded twice.
#[derive(Debug, Clone)]
pub struct Images {
    base: Utf8PathBuf,
    dist: Utf8PathBuf,
    cache: Utf8PathBuf,
    jpeg_quality: u8,
}

impl Images {
    pub fn new(layout: &Layout, config: &ImagesConfig) -> Self {
        Self {
            base: layout.src.join("images"),
            dist: layout.dist.join("images"),
            cache: layout.cache.join("images"),
            jpeg_quality: config.jpeg_quality.clamp(1, 100),
        }
    }

    fn optimize(&self, path: &Utf8Path) -> Result<(Vec<u8>, ImageMetadata), ImageError> {
        let buffer = fs::read(path)?;

        let format = match image::guess_format(&buffer) {
            Ok(format @ (ImageFormat::Png | ImageFormat::Jpeg)) => format,
            _ => {
                let size = buffer.len() as u64;
                return Ok((buffer, ImageMetadata { original: size, optimized: size }));
            }
        };

        let config = match format {
            ImageFormat::Jpeg => format!("jpeg-q{}", self.jpeg_quality),
            _ => "png".to_string(),
        };
        let key = format!("{}.{}", Hash32::hash(&buffer).to_hex(), config);

        let path_cache = self.cache.join(&key);
        let path_meta = self.cache.join(format!("{key}.meta.cbor"));

        // cache hit
        if path_cache.exists()
            && path_meta.exists()
            && let Ok(meta) = ciborium::from_reader(BufReader::new(File::open(&path_meta)?))
        {
            return Ok((fs::read(&path_cache)?, meta));
        }

        let img = image::load_from_memory_with_format(&buffer, format).map_err(|source| {
            ImageError::Image {
                path: path.to_owned(),
                source,
            }
        })?;

        let encoded = self.encode(&img, format).map_err(|source| ImageError::Image {
            path: path.to_owned(),
            source,
        })?;

        // never ship something larger than the source
        let data = if encoded.len() < buffer.len() {
            encoded
        } else {
            buffer.clone()
        };

        let meta = ImageMetadata {
            original: buffer.len() as u64,
            optimized: data.len() as u64,
        };

        fs::create_dir_all(&self.cache)?;
        fs::write(&path_cache, &data)?;
        ciborium::into_writer(&meta, File::create(&path_meta)?).map_err(std::io::Error::other)?;

        Ok((data, meta))
    }

    fn encode(&self, img: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, image::ImageError> {
        let mut out = Cursor::new(Vec::new());

        match format {
            ImageFormat::Jpeg => {
                let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
                rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, self.jpeg_quality))?;
            }
            _ => {
                let encoder =
                    PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive);
                img.write_with_encoder(encoder)?;
            }
        }

        Ok(out.into_inner())
    }
}

impl Transform for Images {
    fn run(&self, _: &TaskContext) -> anyhow::Result<Artifacts> {
        let files = expand([self.base.join("**/*").as_str()])?;

        let results = files
            .par_iter()
            .map(|file| -> anyhow::Result<(Artifact, ImageMetadata)> {
                let (data, meta) = self.optimize(file)?;
                let rel = relative(file, &self.base)?;
                Ok((Artifact::new(self.dist.join(rel), data), meta))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let saved: u64 = results
            .iter()
            .map(|(_, meta)| meta.original.saturating_sub(meta.optimized))
            .sum();
        tracing::info!("images: saved {}", crate::utils::format_size(saved));

        let artifacts: Artifacts = results.into_iter().map(|(artifact, _)| artifact).collect();
        report("images", &artifacts, false);
        Ok(artifacts)
    }
}
