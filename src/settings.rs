//! # 配置模块
//!
//! ## 设计思路
//!
//! 把“可调策略”集中到三层结构：
//! - `TextureSettings`：单个任务的解码/采样/压缩参数，参与加载身份（identity）计算；
//! - `CacheSettings`：单个任务的磁盘缓存策略；
//! - `LoaderConfig`：整个加载上下文共享的默认值、超时与缓存目录。
//!
//! ## 实现思路
//!
//! - 所有结构实现 `Default`，给出开箱可用的默认值。
//! - `LoaderConfig` 支持 serde JSON 读写，缺失字段回落到默认值（`#[serde(default)]`）。
//! - `ResizeProfile` 负责档位字符串解析与反向输出，并映射到具体缩放滤镜。
//! - 范围校验集中在 `validate()`，失败返回 `LoaderError::Config`。

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::error::LoaderError;

/// 纹理边长的硬上限。
pub const MAX_TEXTURE_SIZE: u32 = 8192;

/// 纹理寻址模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WrapMode {
    Repeat,
    #[default]
    Clamp,
    Mirror,
    MirrorOnce,
}

/// 纹理采样过滤模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    Point,
    #[default]
    Bilinear,
    Trilinear,
}

/// 纹理压缩档位。
///
/// 只有宽高都是 4 的倍数时才会真正压缩。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TextureCompression {
    None,
    #[default]
    NormalQuality,
    HighQuality,
}

/// 磁盘缓存编码格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheFormat {
    /// 有损，`.jpg`
    Jpg,
    /// 无损，`.png`
    #[default]
    Png,
}

impl CacheFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpg => ".jpg",
            Self::Png => ".png",
        }
    }
}

/// 缓存根目录类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryType {
    /// 应用数据目录（`dirs::data_dir()`）
    Persistent,
    /// 系统临时目录
    #[default]
    Temporary,
}

/// 缓存过期策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheExpiry {
    Never,
    After(Duration),
}

impl CacheExpiry {
    /// 以“天”构造，负数表示永不过期。
    pub fn from_days(days: i64) -> Self {
        if days < 0 {
            Self::Never
        } else {
            Self::After(Duration::from_secs((days as u64).saturating_mul(24 * 60 * 60)))
        }
    }
}

impl Default for CacheExpiry {
    fn default() -> Self {
        Self::from_days(7)
    }
}

impl fmt::Display for WrapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Repeat => "Repeat",
            Self::Clamp => "Clamp",
            Self::Mirror => "Mirror",
            Self::MirrorOnce => "MirrorOnce",
        };
        f.write_str(text)
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Point => "Point",
            Self::Bilinear => "Bilinear",
            Self::Trilinear => "Trilinear",
        };
        f.write_str(text)
    }
}

impl fmt::Display for TextureCompression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::None => "None",
            Self::NormalQuality => "NormalQuality",
            Self::HighQuality => "HighQuality",
        };
        f.write_str(text)
    }
}

/// 单个任务的纹理参数。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureSettings {
    /// 宽高都小于该值时视为错误（0 表示不限制）。
    pub min_size: u32,
    /// 最长边上限，超出时按比例缩小。
    pub max_size: u32,
    /// 是否生成 mip 链。
    pub mipmap_chain: bool,
    /// 是否保留 CPU 侧像素读取能力。
    pub readable: bool,
    pub wrap_mode: WrapMode,
    pub filter_mode: FilterMode,
    /// 各向异性等级（0~16），不参与 identity。
    pub aniso_level: u8,
    pub compression: TextureCompression,
}

impl Default for TextureSettings {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 2048,
            mipmap_chain: true,
            readable: false,
            wrap_mode: WrapMode::Clamp,
            filter_mode: FilterMode::Bilinear,
            aniso_level: 0,
            compression: TextureCompression::NormalQuality,
        }
    }
}

impl TextureSettings {
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_min_size(mut self, min_size: u32) -> Self {
        self.min_size = min_size;
        self
    }

    pub fn with_compression(mut self, compression: TextureCompression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_readable(mut self, readable: bool) -> Self {
        self.readable = readable;
        self
    }

    pub fn with_mipmap_chain(mut self, mipmap_chain: bool) -> Self {
        self.mipmap_chain = mipmap_chain;
        self
    }

    pub fn with_sampler(mut self, wrap_mode: WrapMode, filter_mode: FilterMode, aniso_level: u8) -> Self {
        self.wrap_mode = wrap_mode;
        self.filter_mode = filter_mode;
        self.aniso_level = aniso_level;
        self
    }

    /// 把尺寸与各向异性等级收敛到合法区间。
    pub fn validate(mut self) -> Self {
        self.max_size = self.max_size.clamp(self.min_size.max(1), MAX_TEXTURE_SIZE);
        self.min_size = self.min_size.min(self.max_size);
        self.aniso_level = self.aniso_level.min(16);
        self
    }
}

/// 单个任务的磁盘缓存策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub enabled: bool,
    pub format: CacheFormat,
    /// JPEG 质量（1~100），PNG 忽略。
    pub quality: u8,
    pub expiry: CacheExpiry,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            format: CacheFormat::Png,
            quality: 70,
            expiry: CacheExpiry::default(),
        }
    }
}

/// 缩放档位（面向使用者语义）。
///
/// - `Quality`：尽量保真
/// - `Balanced`：质量与性能平衡
/// - `Speed`：优先速度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResizeProfile {
    Quality,
    #[default]
    Balanced,
    Speed,
}

impl ResizeProfile {
    /// 从外部字符串解析档位。
    ///
    /// ```rust
    /// use texture_loader::settings::ResizeProfile;
    ///
    /// let p = ResizeProfile::from_str("balanced")?;
    /// assert_eq!(p.as_str(), "balanced");
    /// # Ok::<(), texture_loader::LoaderError>(())
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(profile: &str) -> Result<Self, LoaderError> {
        match profile.trim().to_lowercase().as_str() {
            "quality" => Ok(Self::Quality),
            "balanced" => Ok(Self::Balanced),
            "speed" => Ok(Self::Speed),
            other => Err(LoaderError::Config(format!(
                "未知缩放档位：{}（可选：quality / balanced / speed）",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quality => "quality",
            Self::Balanced => "balanced",
            Self::Speed => "speed",
        }
    }

    pub fn filter(self) -> FilterType {
        match self {
            Self::Quality => FilterType::CatmullRom,
            Self::Balanced => FilterType::Triangle,
            Self::Speed => FilterType::Nearest,
        }
    }
}

/// 磁盘缓存的默认策略（可序列化形式）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheDefaults {
    pub enabled: bool,
    pub format: CacheFormat,
    pub quality: u8,
    /// 过期天数，负数表示永不过期。
    pub duration_days: i64,
}

impl Default for CacheDefaults {
    fn default() -> Self {
        Self {
            enabled: true,
            format: CacheFormat::Png,
            quality: 70,
            duration_days: 7,
        }
    }
}

impl CacheDefaults {
    pub fn to_settings(&self) -> CacheSettings {
        CacheSettings {
            enabled: self.enabled,
            format: self.format,
            quality: self.quality.clamp(1, 100),
            expiry: CacheExpiry::from_days(self.duration_days),
        }
    }
}

/// 加载上下文的全局配置。
///
/// 字段覆盖默认纹理参数、缓存目录、网络超时与解码资源上限。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// 日志级别：off / error / warn / info / debug / trace。
    pub log_level: String,
    pub texture: TextureSettings,
    pub cache: CacheDefaults,
    pub cache_directory: DirectoryType,
    pub cache_subdirectory: String,
    /// 显式指定缓存根目录，优先于 `cache_directory`。
    pub cache_root: Option<PathBuf>,
    /// 单次请求总超时（秒）。
    pub request_timeout_secs: u64,
    /// 建立连接（TCP/TLS）超时（秒）。
    pub connect_timeout_secs: u64,
    /// 下载首包超时（毫秒）。
    pub stream_first_byte_timeout_ms: u64,
    /// 下载分块读取超时（毫秒）。
    pub stream_chunk_timeout_ms: u64,
    /// 下载/读取原始字节允许的最大体积（字节）。
    pub max_file_size: u64,
    /// 解码后的像素上限（`width * height`）。
    pub max_decoded_pixels: u64,
    pub resize_profile: ResizeProfile,
    /// 目标默认淡入淡出时长（毫秒）。
    pub fade_millis: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            texture: TextureSettings::default(),
            cache: CacheDefaults::default(),
            cache_directory: DirectoryType::Temporary,
            cache_subdirectory: "TextureLoader".to_string(),
            cache_root: None,
            request_timeout_secs: 30,
            connect_timeout_secs: 8,
            stream_first_byte_timeout_ms: 10_000,
            stream_chunk_timeout_ms: 15_000,
            max_file_size: 50 * 1024 * 1024,
            max_decoded_pixels: 40_000_000,
            resize_profile: ResizeProfile::Balanced,
            fade_millis: 250,
        }
    }
}

impl LoaderConfig {
    /// 从 JSON 文件读取配置；缺失字段使用默认值。
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, LoaderError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| LoaderError::Config(format!("读取配置文件 '{}' 失败: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| LoaderError::Config(format!("解析配置文件失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<(), LoaderError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| LoaderError::Config(format!("序列化配置失败: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 校验各项取值范围。
    pub fn validate(&self) -> Result<(), LoaderError> {
        if self.level_filter().is_none() {
            return Err(LoaderError::Config(format!(
                "未知日志级别：{}（可选：off / error / warn / info / debug / trace）",
                self.log_level
            )));
        }
        if !(1..=600).contains(&self.request_timeout_secs) {
            return Err(LoaderError::Config("request_timeout_secs 必须在 1~600 秒之间".to_string()));
        }
        if !(1..=120).contains(&self.connect_timeout_secs) {
            return Err(LoaderError::Config("connect_timeout_secs 必须在 1~120 秒之间".to_string()));
        }
        if !(500..=120_000).contains(&self.stream_first_byte_timeout_ms) {
            return Err(LoaderError::Config(
                "stream_first_byte_timeout_ms 必须在 500~120000 毫秒之间".to_string(),
            ));
        }
        if !(500..=120_000).contains(&self.stream_chunk_timeout_ms) {
            return Err(LoaderError::Config(
                "stream_chunk_timeout_ms 必须在 500~120000 毫秒之间".to_string(),
            ));
        }
        if !(1..=100).contains(&self.cache.quality) {
            return Err(LoaderError::Config("cache.quality 必须在 1~100 之间".to_string()));
        }
        if self.texture.max_size == 0 || self.texture.max_size > MAX_TEXTURE_SIZE {
            return Err(LoaderError::Config(format!(
                "texture.max_size 必须在 1~{} 之间",
                MAX_TEXTURE_SIZE
            )));
        }
        if self.cache_subdirectory.trim().is_empty() {
            return Err(LoaderError::Config("cache_subdirectory 不能为空".to_string()));
        }
        Ok(())
    }

    pub fn level_filter(&self) -> Option<log::LevelFilter> {
        match self.log_level.trim().to_ascii_lowercase().as_str() {
            "off" => Some(log::LevelFilter::Off),
            "error" => Some(log::LevelFilter::Error),
            "warn" | "warning" => Some(log::LevelFilter::Warn),
            "info" => Some(log::LevelFilter::Info),
            "debug" => Some(log::LevelFilter::Debug),
            "trace" | "all" => Some(log::LevelFilter::Trace),
            _ => None,
        }
    }

    /// 解析缓存目录：`{cacheRoot}/{subdirectory}`。
    pub fn resolve_cache_dir(&self) -> Result<PathBuf, LoaderError> {
        let root = match (&self.cache_root, self.cache_directory) {
            (Some(root), _) => root.clone(),
            (None, DirectoryType::Temporary) => std::env::temp_dir(),
            (None, DirectoryType::Persistent) => dirs::data_dir()
                .ok_or_else(|| LoaderError::Config("无法获取应用数据目录".to_string()))?,
        };
        Ok(root.join(&self.cache_subdirectory))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn fade_duration(&self) -> Duration {
        Duration::from_millis(self.fade_millis)
    }
}
