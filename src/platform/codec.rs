//! # 解码与变换流水线
//!
//! ## 设计思路
//!
//! 将“字节 → RGBA → 缩放 → 编码”集中管理，并在完整解码前先读 header 尺寸，
//! 按像素上限快速拒绝，降低恶意输入触发高内存开销的风险。
//!
//! ## 实现思路
//!
//! 1. 猜测格式并读取 header 尺寸，校验像素上限
//! 2. 完整解码并转换为 RGBA
//! 3. 缩放优先走 `fast_image_resize`，失败回退 `image::imageops::resize`
//! 4. 编码：PNG 无损；JPEG 按质量有损（去除 alpha）

use std::io::Cursor;

use fast_image_resize as fr;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageBuffer, ImageEncoder, Rgba, RgbaImage};

use super::ImageCodec;
use crate::error::LoaderError;
use crate::settings::{CacheFormat, LoaderConfig};

/// 默认编解码实现。
#[derive(Debug, Clone)]
pub struct StandardCodec {
    max_decoded_pixels: u64,
    filter: FilterType,
}

impl Default for StandardCodec {
    fn default() -> Self {
        Self::from_config(&LoaderConfig::default())
    }
}

impl StandardCodec {
    pub fn from_config(config: &LoaderConfig) -> Self {
        Self {
            max_decoded_pixels: config.max_decoded_pixels,
            filter: config.resize_profile.filter(),
        }
    }

    /// 仅通过图片头信息读取宽高。
    fn inspect_dimensions(bytes: &[u8]) -> Result<(u32, u32), LoaderError> {
        image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| LoaderError::Decode(format!("无法识别图片格式：{}", e)))?
            .into_dimensions()
            .map_err(|e| LoaderError::Decode(format!("无法读取图片尺寸：{}", e)))
    }

    fn validate_pixel_limits(&self, width: u32, height: u32) -> Result<(), LoaderError> {
        let pixels = (width as u64)
            .checked_mul(height as u64)
            .ok_or_else(|| LoaderError::ResourceLimit("图片像素数溢出".to_string()))?;

        if pixels > self.max_decoded_pixels {
            return Err(LoaderError::ResourceLimit(format!(
                "图片像素过大：{} 像素（限制：{} 像素）",
                pixels, self.max_decoded_pixels
            )));
        }

        Ok(())
    }

    fn resize_with_fast_image_resize(
        image: &RgbaImage,
        target_width: u32,
        target_height: u32,
        filter: FilterType,
    ) -> Result<RgbaImage, LoaderError> {
        let (src_width, src_height) = image.dimensions();

        let src_image = fr::images::Image::from_vec_u8(
            src_width,
            src_height,
            image.as_raw().clone(),
            fr::PixelType::U8x4,
        )
        .map_err(|e| LoaderError::Decode(format!("构建源图像缓冲失败：{}", e)))?;

        let mut dst_image = fr::images::Image::new(target_width, target_height, fr::PixelType::U8x4);

        let mut resizer = fr::Resizer::new();
        let options = fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(to_fast_filter(filter)));

        resizer
            .resize(&src_image, &mut dst_image, Some(&options))
            .map_err(|e| LoaderError::Decode(format!("fast_image_resize 执行失败：{}", e)))?;

        ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(target_width, target_height, dst_image.into_vec())
            .ok_or_else(|| LoaderError::Decode("fast_image_resize 输出缓冲长度异常".to_string()))
    }
}

impl ImageCodec for StandardCodec {
    fn decode(&self, bytes: &[u8]) -> Result<RgbaImage, LoaderError> {
        let (header_width, header_height) = Self::inspect_dimensions(bytes)?;
        self.validate_pixel_limits(header_width, header_height)?;

        let decoded = image::load_from_memory(bytes)
            .map_err(|e| LoaderError::Decode(format!("图片解码失败：{}", e)))?;

        Ok(decoded.to_rgba8())
    }

    fn resize(&self, image: &RgbaImage, max_edge: u32) -> Result<RgbaImage, LoaderError> {
        let (width, height) = image.dimensions();
        let (target_width, target_height) = fit_within(width, height, max_edge);
        if (target_width, target_height) == (width, height) {
            return Ok(image.clone());
        }

        log::info!(
            "🧩 纹理缩放：{}x{} -> {}x{}（filter={:?}）",
            width,
            height,
            target_width,
            target_height,
            self.filter
        );

        match Self::resize_with_fast_image_resize(image, target_width, target_height, self.filter) {
            Ok(resized) => Ok(resized),
            Err(err) => {
                log::warn!("⚠️ fast_image_resize 缩放失败，回退 image::imageops::resize：{}", err);
                Ok(image::imageops::resize(image, target_width, target_height, self.filter))
            }
        }
    }

    fn encode(&self, image: &RgbaImage, format: CacheFormat, quality: u8) -> Result<Vec<u8>, LoaderError> {
        let (width, height) = image.dimensions();
        let mut cursor = Cursor::new(Vec::new());

        match format {
            CacheFormat::Png => image::codecs::png::PngEncoder::new(&mut cursor)
                .write_image(image.as_raw(), width, height, ExtendedColorType::Rgba8)
                .map_err(|e| LoaderError::CacheWrite(format!("PNG 编码失败：{}", e)))?,
            CacheFormat::Jpg => {
                let rgb = image::DynamicImage::ImageRgba8(image.clone()).to_rgb8();
                image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, quality.clamp(1, 100))
                    .write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
                    .map_err(|e| LoaderError::CacheWrite(format!("JPEG 编码失败：{}", e)))?
            }
        }

        Ok(cursor.into_inner())
    }
}

/// 等比缩放到最长边不超过 `max_edge`，未超出时原样返回。
pub fn fit_within(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    if width <= max_edge && height <= max_edge {
        return (width, height);
    }

    let ratio = (max_edge as f64 / width as f64).min(max_edge as f64 / height as f64);
    let target_width = ((width as f64 * ratio) as u32).clamp(1, max_edge.max(1));
    let target_height = ((height as f64 * ratio) as u32).clamp(1, max_edge.max(1));
    (target_width, target_height)
}

fn to_fast_filter(filter: FilterType) -> fr::FilterType {
    match filter {
        FilterType::Nearest => fr::FilterType::Box,
        FilterType::Triangle => fr::FilterType::Bilinear,
        FilterType::CatmullRom => fr::FilterType::CatmullRom,
        FilterType::Gaussian => fr::FilterType::Mitchell,
        FilterType::Lanczos3 => fr::FilterType::Lanczos3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat};
    use proptest::prelude::*;

    fn create_png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let r = (x % 255) as u8;
            let g = (y % 255) as u8;
            let b = ((x + y) % 255) as u8;
            Rgba([r, g, b, 255])
        });

        let dyn_img = DynamicImage::ImageRgba8(img);
        let mut cursor = Cursor::new(Vec::new());
        dyn_img
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("failed to encode test image");
        cursor.into_inner()
    }

    #[test]
    fn decode_then_resize_clamps_longest_edge() {
        let codec = StandardCodec::default();
        let decoded = codec.decode(&create_png_bytes(1200, 600)).expect("decode failed");
        assert_eq!(decoded.dimensions(), (1200, 600));

        let resized = codec.resize(&decoded, 512).expect("resize failed");
        assert_eq!(resized.dimensions(), (512, 256));
    }

    #[test]
    fn decode_rejects_too_many_pixels() {
        let mut config = LoaderConfig::default();
        config.max_decoded_pixels = 1_000;
        let codec = StandardCodec::from_config(&config);

        let result = codec.decode(&create_png_bytes(100, 100));
        assert!(matches!(result, Err(LoaderError::ResourceLimit(_))));
    }

    #[test]
    fn decode_rejects_garbage() {
        let codec = StandardCodec::default();
        assert!(matches!(codec.decode(b"definitely not an image"), Err(LoaderError::Decode(_))));
    }

    #[test]
    fn encode_produces_decodable_png_and_jpg() {
        let codec = StandardCodec::default();
        let image = codec.decode(&create_png_bytes(40, 20)).expect("decode failed");

        for format in [CacheFormat::Png, CacheFormat::Jpg] {
            let bytes = codec.encode(&image, format, 70).expect("encode failed");
            let back = codec.decode(&bytes).expect("re-decode failed");
            assert_eq!(back.dimensions(), (40, 20));
        }
    }

    proptest! {
        #[test]
        fn fit_within_never_exceeds_limit(width in 1u32..10_000, height in 1u32..10_000, max_edge in 1u32..4096) {
            let (w, h) = fit_within(width, height, max_edge);
            prop_assert!(w >= 1 && h >= 1);
            prop_assert!(w <= max_edge.max(width.min(max_edge)));
            prop_assert!(h <= max_edge.max(height.min(max_edge)));
            if width <= max_edge && height <= max_edge {
                prop_assert_eq!((w, h), (width, height));
            } else {
                prop_assert!(w.max(h) <= max_edge);
            }
        }
    }
}
