//! # 纹理句柄
//!
//! ## 设计思路
//!
//! `Texture` 是加载流水线的最终产物，也是内存注册表、渲染目标之间共享的句柄。
//! 句柄本身是 `Arc` 包装，克隆廉价；“销毁”由内存注册表在引用计数归零时显式触发，
//! 保证同一张纹理只会被销毁一次。
//!
//! ## 实现思路
//!
//! - 构建阶段按 `TextureSettings` 应用采样参数、压缩资格判定与 mip 链生成。
//! - `readable = false` 时 `read_pixels()` 返回 `None`，渲染路径仍可通过 `level()` 取像素。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use image::RgbaImage;
use image::imageops::FilterType;

use crate::settings::{FilterMode, TextureCompression, TextureSettings, WrapMode};

static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

/// 压缩所需的块尺寸。
pub const COMPRESSION_BLOCK_SIZE: u32 = 4;

/// 纹理存储格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    Rgba8,
    Compressed(TextureCompression),
}

struct TextureInner {
    id: u64,
    name: String,
    levels: Vec<RgbaImage>,
    wrap_mode: WrapMode,
    filter_mode: FilterMode,
    aniso_level: u8,
    format: TextureFormat,
    readable: bool,
    destroyed: AtomicBool,
}

/// 已加载的纹理。
#[derive(Clone)]
pub struct Texture {
    inner: Arc<TextureInner>,
}

impl Texture {
    /// 由解码（且已完成缩放）的像素构建纹理，应用全部后处理参数。
    pub fn build(name: impl Into<String>, image: RgbaImage, settings: &TextureSettings) -> Self {
        let (width, height) = image.dimensions();

        let format = if settings.compression != TextureCompression::None
            && is_compression_eligible(width, height)
        {
            TextureFormat::Compressed(settings.compression)
        } else {
            TextureFormat::Rgba8
        };

        let levels = if settings.mipmap_chain {
            build_mip_chain(image)
        } else {
            vec![image]
        };

        Self {
            inner: Arc::new(TextureInner {
                id: NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed),
                name: name.into(),
                levels,
                wrap_mode: settings.wrap_mode,
                filter_mode: settings.filter_mode,
                aniso_level: settings.aniso_level,
                format,
                readable: settings.readable,
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// 来源名（通常是 URL）。
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn width(&self) -> u32 {
        self.inner.levels[0].width()
    }

    pub fn height(&self) -> u32 {
        self.inner.levels[0].height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.inner.levels[0].dimensions()
    }

    pub fn mip_count(&self) -> usize {
        self.inner.levels.len()
    }

    /// 渲染路径取像素；0 为原始尺寸。
    pub fn level(&self, index: usize) -> Option<&RgbaImage> {
        self.inner.levels.get(index)
    }

    /// CPU 侧像素回读，仅在 `readable` 时可用。
    pub fn read_pixels(&self) -> Option<&RgbaImage> {
        if self.inner.readable {
            self.inner.levels.first()
        } else {
            None
        }
    }

    pub fn is_readable(&self) -> bool {
        self.inner.readable
    }

    pub fn wrap_mode(&self) -> WrapMode {
        self.inner.wrap_mode
    }

    pub fn filter_mode(&self) -> FilterMode {
        self.inner.filter_mode
    }

    pub fn aniso_level(&self) -> u8 {
        self.inner.aniso_level
    }

    pub fn format(&self) -> TextureFormat {
        self.inner.format
    }

    /// 全部 mip 层像素占用（字节）。
    pub fn byte_size(&self) -> u64 {
        self.inner
            .levels
            .iter()
            .map(|level| level.as_raw().len() as u64)
            .sum()
    }

    pub fn ptr_eq(&self, other: &Texture) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// 标记销毁；只有第一次调用返回 `true`。
    pub(crate) fn destroy(&self) -> bool {
        let first = !self.inner.destroyed.swap(true, Ordering::SeqCst);
        if first {
            log::debug!(
                "🗑️ 纹理已销毁 - id={} name={} size={}",
                self.inner.id,
                self.inner.name,
                format_bytes(self.byte_size())
            );
        }
        first
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("dimensions", &self.dimensions())
            .field("mips", &self.inner.levels.len())
            .field("format", &self.inner.format)
            .finish()
    }
}

/// 宽高均为块尺寸整数倍时才允许压缩。
pub fn is_compression_eligible(width: u32, height: u32) -> bool {
    width % COMPRESSION_BLOCK_SIZE == 0 && height % COMPRESSION_BLOCK_SIZE == 0
}

fn build_mip_chain(base: RgbaImage) -> Vec<RgbaImage> {
    let mut levels = vec![base];
    loop {
        let Some(last) = levels.last() else {
            break;
        };
        let (width, height) = last.dimensions();
        if width <= 1 && height <= 1 {
            break;
        }
        let next = image::imageops::resize(last, (width / 2).max(1), (height / 2).max(1), FilterType::Triangle);
        levels.push(next);
    }
    levels
}

/// 字节数的人类可读形式。
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    let value = bytes as f64;
    if value >= MB {
        format!("{:.2} MB", value / MB)
    } else if value >= KB {
        format!("{:.1} KB", value / KB)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};

    fn solid(width: u32, height: u32) -> RgbaImage {
        ImageBuffer::from_pixel(width, height, Rgba([10, 20, 30, 255]))
    }

    #[test]
    fn mip_chain_halves_until_one_pixel() {
        let texture = Texture::build("mips", solid(8, 2), &TextureSettings::default());
        let sizes: Vec<_> = (0..texture.mip_count())
            .filter_map(|i| texture.level(i).map(|l| l.dimensions()))
            .collect();
        assert_eq!(sizes, vec![(8, 2), (4, 1), (2, 1), (1, 1)]);
    }

    #[test]
    fn compression_requires_block_aligned_size() {
        let settings = TextureSettings::default();
        assert_eq!(
            Texture::build("a", solid(16, 8), &settings).format(),
            TextureFormat::Compressed(TextureCompression::NormalQuality)
        );
        assert_eq!(Texture::build("b", solid(15, 8), &settings).format(), TextureFormat::Rgba8);

        let off = settings.with_compression(TextureCompression::None);
        assert_eq!(Texture::build("c", solid(16, 8), &off).format(), TextureFormat::Rgba8);
    }

    #[test]
    fn readable_flag_gates_pixel_readback() {
        let hidden = Texture::build("h", solid(4, 4), &TextureSettings::default());
        assert!(hidden.read_pixels().is_none());
        assert!(hidden.level(0).is_some());

        let visible = Texture::build("v", solid(4, 4), &TextureSettings::default().with_readable(true));
        assert_eq!(visible.read_pixels().map(|p| p.dimensions()), Some((4, 4)));
    }

    #[test]
    fn destroy_reports_first_call_only() {
        let texture = Texture::build("d", solid(2, 2), &TextureSettings::default().with_mipmap_chain(false));
        assert!(texture.destroy());
        assert!(!texture.clone().destroy());
        assert!(texture.is_destroyed());
    }

    #[test]
    fn format_bytes_uses_binary_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MB");
    }
}
