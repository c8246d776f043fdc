//! # 平台服务边界
//!
//! ## 设计思路
//!
//! 加载核心只通过两个 trait 调用外部能力：
//! - `Transport`：按 URL 取字节（带进度与取消）、读取本地缓存文件；
//! - `ImageCodec`：解码、等比缩放、编码（写回磁盘缓存用）。
//!
//! 默认实现分别是基于 `reqwest` 的 `HttpTransport` 与基于
//! `image` + `fast_image_resize` 的 `StandardCodec`；测试可注入计数用的替身。
//!
//! ## 实现思路
//!
//! - `Transport` 是异步 trait（`async_trait`），以 `Arc<dyn Transport>` 注入上下文。
//! - `ImageCodec` 是同步 CPU 计算，由调用方放到 `spawn_blocking` 执行。
//! - `data:` URL 在核心内直接解析，不经过传输层。

mod codec;
mod http;

use std::path::Path;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use image::RgbaImage;

use crate::error::LoaderError;
use crate::loader::CancelFlag;
use crate::settings::CacheFormat;

pub use codec::{StandardCodec, fit_within};
pub use http::HttpTransport;
pub(crate) use http::redact_url_for_log;

/// 下载进度回调：`(已下载字节, 总字节)`。
pub type ProgressCallback<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// 字节传输边界。
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// 下载 URL 对应的全部字节。
    ///
    /// 取消时应尽快返回 `LoaderError::Cancelled`。
    async fn fetch_bytes(
        &self,
        url: &str,
        timeout: Duration,
        on_progress: ProgressCallback<'_>,
        cancel: &CancelFlag,
    ) -> Result<Bytes, LoaderError>;

    /// 读取本地文件（磁盘缓存命中时使用）。
    async fn fetch_local_file(&self, path: &Path) -> Result<Bytes, LoaderError> {
        tokio::fs::read(path)
            .await
            .map(Bytes::from)
            .map_err(|e| LoaderError::FileSystem(format!("无法读取文件 '{}': {}", path.display(), e)))
    }
}

/// 图片编解码边界。
pub trait ImageCodec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<RgbaImage, LoaderError>;

    /// 等比缩放，使最长边不超过 `max_edge`。
    fn resize(&self, image: &RgbaImage, max_edge: u32) -> Result<RgbaImage, LoaderError>;

    fn encode(&self, image: &RgbaImage, format: CacheFormat, quality: u8) -> Result<Vec<u8>, LoaderError>;
}

/// 解析 `data:image/...;base64,` URL，解码前先按体积上限估算。
pub fn decode_data_url(data: &str, max_file_size: u64) -> Result<Bytes, LoaderError> {
    let normalized = data.trim();
    let base64_start = normalized
        .find(";base64,")
        .ok_or_else(|| LoaderError::InvalidInput("data URL 缺少 base64 标记".to_string()))?;
    let payload = &normalized[base64_start + 8..];

    let estimated_len = (payload.len() as u64).div_ceil(4).saturating_mul(3);
    if estimated_len > max_file_size {
        return Err(LoaderError::ResourceLimit(format!(
            "Base64 预计解码体积过大：{:.2} MB（限制：{:.2} MB）",
            estimated_len as f64 / 1024.0 / 1024.0,
            max_file_size as f64 / 1024.0 / 1024.0
        )));
    }

    general_purpose::STANDARD
        .decode(payload)
        .map(Bytes::from)
        .map_err(|e| LoaderError::Decode(format!("Base64 解码失败：{}", e)))
}

/// 通过文件签名（magic bytes）校验输入是否为图片。
pub(crate) fn validate_image_signature(bytes: &[u8]) -> Result<(), LoaderError> {
    if bytes.is_empty() {
        return Err(LoaderError::Decode("图片内容为空".to_string()));
    }

    let kind = infer::get(bytes).ok_or_else(|| LoaderError::Decode("无法识别图片类型".to_string()))?;

    if kind.matcher_type() != infer::MatcherType::Image {
        return Err(LoaderError::Decode(format!(
            "文件签名不是图片类型：{}",
            kind.mime_type()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_rejects_large_payload_before_decode() {
        let huge = format!("data:image/png;base64,{}", "A".repeat(1024 * 1024));
        assert!(matches!(decode_data_url(&huge, 32), Err(LoaderError::ResourceLimit(_))));
    }

    #[test]
    fn data_url_requires_base64_marker() {
        assert!(matches!(
            decode_data_url("data:image/png,abc", 1024),
            Err(LoaderError::InvalidInput(_))
        ));
    }

    #[test]
    fn signature_check_rejects_text() {
        assert!(matches!(
            validate_image_signature(b"<html>nope</html>"),
            Err(LoaderError::Decode(_))
        ));
        let png_signature = [137_u8, 80, 78, 71, 13, 10, 26, 10, 0, 0, 0, 13];
        assert!(validate_image_signature(&png_signature).is_ok());
    }
}
