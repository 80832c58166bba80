use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;

/// Placeholders are computed from a small copy of the image; blurhash only
/// keeps a handful of frequency components so detail beyond this is wasted.
const PLACEHOLDER_SAMPLE: u32 = 64;

/// What a [`CoverProcessor`] derives from a cover image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessedCover {
    /// Dimensions of the original image.
    pub width: u32,
    pub height: u32,
    pub thumbnail: Vec<u8>,
    /// Compact string a client can render while the thumbnail loads.
    pub placeholder: String,
}

/// Turns raw cover bytes into a thumbnail and placeholder.
pub trait CoverProcessor: Send + Sync {
    fn process(&self, data: &[u8]) -> Result<ProcessedCover>;
}

/// [`CoverProcessor`] producing JPEG thumbnails and blurhash placeholders.
#[derive(Clone, Copy, Debug)]
pub struct ImageCoverProcessor {
    thumbnail_height: u32,
    jpeg_quality: u8,
    components: (u32, u32),
}
impl Default for ImageCoverProcessor {
    fn default() -> Self {
        Self::new(300, 70, (2, 3))
    }
}
impl ImageCoverProcessor {
    /// `components` are the blurhash x/y component counts, each in `1..=9`.
    pub fn new(thumbnail_height: u32, jpeg_quality: u8, components: (u32, u32)) -> Self {
        Self { thumbnail_height, jpeg_quality, components }
    }

    /// Scale to the thumbnail height, keeping the aspect ratio. Images that
    /// are already small enough are left at their own size.
    fn thumbnail(&self, image: &DynamicImage) -> DynamicImage {
        let (width, height) = (image.width(), image.height());
        if height <= self.thumbnail_height {
            return image.clone();
        }
        let scaled = u64::from(width) * u64::from(self.thumbnail_height) / u64::from(height);
        let scaled = u32::try_from(scaled).unwrap_or(u32::MAX).max(1);
        image.resize_exact(scaled, self.thumbnail_height, FilterType::Triangle)
    }

    fn encode_jpeg(&self, image: &DynamicImage) -> Result<Vec<u8>> {
        // JPEG has no alpha channel.
        let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
        let mut bytes = Vec::new();
        rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, self.jpeg_quality))
            .or_raise(|| ErrorKind::Thumbnail)?;
        Ok(bytes)
    }

    fn placeholder(&self, image: &DynamicImage) -> Result<String> {
        let sample = image.thumbnail(PLACEHOLDER_SAMPLE, PLACEHOLDER_SAMPLE).to_rgba8();
        let (x, y) = self.components;
        blurhash::encode(x, y, sample.width(), sample.height(), sample.as_raw())
            .map_err(|e| ErrorKind::Placeholder(e.to_string()).into())
    }
}
impl CoverProcessor for ImageCoverProcessor {
    #[tracing::instrument(level = "debug", skip_all, fields(bytes = data.len()))]
    fn process(&self, data: &[u8]) -> Result<ProcessedCover> {
        let decoded = image::load_from_memory(data).or_raise(|| ErrorKind::Image)?;
        if decoded.width() == 0 || decoded.height() == 0 {
            exn::bail!(ErrorKind::Image);
        }
        let thumbnail = self.thumbnail(&decoded);
        Ok(ProcessedCover {
            width: decoded.width(),
            height: decoded.height(),
            thumbnail: self.encode_jpeg(&thumbnail)?,
            placeholder: self.placeholder(&thumbnail)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use rstest::rstest;
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();
        bytes
    }

    #[rstest]
    #[case((400, 600), 300, (200, 300))]
    #[case((600, 400), 300, (450, 300))]
    #[case((40, 80), 300, (40, 80))]
    #[case((10, 2000), 300, (1, 300))]
    fn test_thumbnail_dimensions(#[case] source: (u32, u32), #[case] height: u32, #[case] expected: (u32, u32)) {
        let processor = ImageCoverProcessor::new(height, 70, (2, 3));
        let cover = processor.process(&png(source.0, source.1)).unwrap();
        assert_eq!((cover.width, cover.height), source);
        let thumbnail = image::load_from_memory_with_format(&cover.thumbnail, ImageFormat::Jpeg).unwrap();
        assert_eq!((thumbnail.width(), thumbnail.height()), expected);
        assert!(!cover.placeholder.is_empty());
    }

    #[test]
    fn test_placeholder_is_deterministic() {
        let processor = ImageCoverProcessor::default();
        let bytes = png(120, 180);
        assert_eq!(processor.process(&bytes).unwrap().placeholder, processor.process(&bytes).unwrap().placeholder);
    }

    #[test]
    fn test_garbage_is_rejected() {
        let err = ImageCoverProcessor::default().process(b"definitely not an image").unwrap_err();
        assert_eq!(*err, ErrorKind::Image);
    }
}
