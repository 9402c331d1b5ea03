//! # Image Codec Module
//!
//! Questo modulo gestisce la ricompressione in-memory delle immagini di
//! catalogo, senza tool esterni: decodifica, resize proporzionale e re-encode
//! JPEG tramite la crate `image`.
//!
//! ## Responsabilità:
//! - Definisce il contratto `ImageCodec` consumato dai job
//! - Implementa `JpegCodec` con configurazione fissa per run
//! - Applica il limite di dimensione massima (lato più lungo)
//! - Scala la qualità verso il basso finché l'output rientra in `max_bytes`
//! - Conserva opzionalmente il segmento EXIF (APP1) dell'originale
//!
//! ## Pipeline di ricompressione:
//! 1. **Decode**: qualsiasi formato supportato (JPEG/PNG/WebP)
//! 2. **Resize**: proporzionale con Lanczos3 se il lato più lungo eccede
//! 3. **Encode**: JPEG alla qualità configurata
//! 4. **Fit**: step-down di qualità (-10) fino a `max_bytes` o al floor (40)
//! 5. **Metadata**: re-inserimento del segmento APP1 se richiesto
//!
//! L'output NON è garantito più piccolo dell'input: il size-reduction gate è
//! responsabilità del chiamante.
//!
//! ## Esempio:
//! ```rust,ignore
//! let codec = JpegCodec;
//! let settings = CodecSettings::from_config(&config);
//! let compressed = codec.compress(&original_bytes, &settings)?;
//! ```

use crate::{config::Config, error::CompressError};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;

/// Quality floor for the step-down loop
const MIN_QUALITY: u8 = 40;
/// Quality decrement per step when the output exceeds `max_bytes`
const QUALITY_STEP: u8 = 10;

/// Fixed per-run codec configuration
#[derive(Debug, Clone)]
pub struct CodecSettings {
    /// Starting JPEG quality (1-100)
    pub quality: u8,
    /// Maximum output dimension on the longest side
    pub max_dimension: u32,
    /// Maximum output size in bytes
    pub max_bytes: u64,
    /// Carry the original EXIF (APP1) segment into the output
    pub preserve_metadata: bool,
}

impl CodecSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            quality: config.jpeg_quality,
            max_dimension: config.max_dimension,
            max_bytes: config.max_bytes,
            preserve_metadata: config.preserve_metadata,
        }
    }
}

/// Re-encodes raw image bytes with a fixed configuration
pub trait ImageCodec: Send + Sync {
    fn compress(&self, bytes: &[u8], settings: &CodecSettings) -> Result<Vec<u8>, CompressError>;
}

/// Default codec: in-memory JPEG re-encoding via the `image` crate
pub struct JpegCodec;

impl ImageCodec for JpegCodec {
    fn compress(&self, bytes: &[u8], settings: &CodecSettings) -> Result<Vec<u8>, CompressError> {
        let img = image::load_from_memory(bytes)?;

        let img = if img.width() > settings.max_dimension || img.height() > settings.max_dimension
        {
            img.resize(
                settings.max_dimension,
                settings.max_dimension,
                FilterType::Lanczos3,
            )
        } else {
            img
        };

        let mut quality = settings.quality.clamp(1, 100);
        let mut encoded = encode_jpeg(&img, quality)?;

        // Step quality down until the output fits, or the floor is hit
        while encoded.len() as u64 > settings.max_bytes && quality > MIN_QUALITY {
            quality = quality.saturating_sub(QUALITY_STEP).max(MIN_QUALITY);
            encoded = encode_jpeg(&img, quality)?;
        }

        if settings.preserve_metadata {
            if let Some(app1) = extract_app1(bytes) {
                encoded = insert_app1(&encoded, app1);
            }
        }

        Ok(encoded)
    }
}

/// Encode a decoded image as baseline JPEG at the given quality
fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, CompressError> {
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ColorType::Rgb8)?;
    Ok(buf)
}

/// Extract the EXIF APP1 segment (marker + length + payload) from a JPEG
///
/// Returns `None` for non-JPEG input or when no EXIF segment is present
/// before the scan data.
fn extract_app1(bytes: &[u8]) -> Option<&[u8]> {
    // SOI
    if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] != 0xD8 {
        return None;
    }

    let mut pos = 2;
    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xFF {
            return None;
        }
        let marker = bytes[pos + 1];
        // SOS: metadata segments can't follow the entropy-coded data
        if marker == 0xDA {
            return None;
        }
        let len = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        if len < 2 || pos + 2 + len > bytes.len() {
            return None;
        }
        if marker == 0xE1 && bytes[pos + 4..pos + 2 + len].starts_with(b"Exif\0\0") {
            return Some(&bytes[pos..pos + 2 + len]);
        }
        pos += 2 + len;
    }

    None
}

/// Splice an APP1 segment into a JPEG right after the SOI marker
fn insert_app1(encoded: &[u8], app1: &[u8]) -> Vec<u8> {
    if encoded.len() < 2 || encoded[0] != 0xFF || encoded[1] != 0xD8 {
        return encoded.to_vec();
    }

    let mut out = Vec::with_capacity(encoded.len() + app1.len());
    out.extend_from_slice(&encoded[..2]);
    out.extend_from_slice(app1);
    out.extend_from_slice(&encoded[2..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::io::Cursor;

    fn gradient_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    fn settings() -> CodecSettings {
        CodecSettings {
            quality: 80,
            max_dimension: 2048,
            max_bytes: u64::MAX,
            preserve_metadata: false,
        }
    }

    #[test]
    fn test_compress_produces_decodable_jpeg() {
        let input = gradient_png(64, 48);
        let output = JpegCodec.compress(&input, &settings()).unwrap();

        let decoded = image::load_from_memory(&output).unwrap();
        assert_eq!(decoded.width(), 64);
        assert_eq!(decoded.height(), 48);
    }

    #[test]
    fn test_compress_respects_max_dimension() {
        let input = gradient_png(128, 64);
        let output = JpegCodec
            .compress(
                &input,
                &CodecSettings {
                    max_dimension: 32,
                    ..settings()
                },
            )
            .unwrap();

        let decoded = image::load_from_memory(&output).unwrap();
        assert!(decoded.width() <= 32);
        assert!(decoded.height() <= 32);
        // Aspect ratio preserved by the proportional resize
        assert_eq!(decoded.width(), 32);
        assert_eq!(decoded.height(), 16);
    }

    #[test]
    fn test_quality_step_down_shrinks_output() {
        let input = gradient_png(256, 256);
        let generous = JpegCodec.compress(&input, &settings()).unwrap();
        let tight = JpegCodec
            .compress(
                &input,
                &CodecSettings {
                    max_bytes: 1,
                    ..settings()
                },
            )
            .unwrap();

        // Floor quality output can't fit 1 byte, but it must not be larger
        // than the single-pass encode at the starting quality
        assert!(tight.len() <= generous.len());
    }

    #[test]
    fn test_compress_rejects_garbage() {
        let err = JpegCodec.compress(b"not an image", &settings());
        assert!(err.is_err());
    }

    #[test]
    fn test_app1_roundtrip() {
        let payload = b"Exif\0\0fake-exif-body";
        let mut segment = vec![0xFF, 0xE1];
        segment.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        segment.extend_from_slice(payload);

        let input = gradient_png(16, 16);
        let jpeg = JpegCodec.compress(&input, &settings()).unwrap();
        assert!(extract_app1(&jpeg).is_none());

        let with_exif = insert_app1(&jpeg, &segment);
        let recovered = extract_app1(&with_exif).unwrap();
        assert_eq!(recovered, segment.as_slice());

        // The spliced file still decodes
        assert!(image::load_from_memory(&with_exif).is_ok());
    }
}
