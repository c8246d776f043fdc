//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 纹理加载链路中的所有失败（输入、传输、解码、尺寸校验、磁盘缓存）都收敛到
//! 单一的 `LoaderError` 枚举，调用侧可按分支匹配，回调侧只拿到规范化后的文案。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息，所有分支只携带 `String`，因此可 `Clone`，
//!   便于同一个错误分发给多个订阅同一请求的任务。
//! - `code()` / `stage()` 提供稳定的错误码与阶段名，供日志与全局事件使用。
//! - `normalize_error_message` 保证对外文案非空且以句号结尾。

/// 纹理加载统一错误类型。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoaderError {
    /// URL 缺失或参数非法（只记录日志，不改变占位图）
    #[error("参数错误：{0}")]
    InvalidInput(String),

    /// 网络传输失败（会触发一次回退地址重试）
    #[error("网络错误：{0}")]
    Transport(String),

    #[error("超时错误：{0}")]
    Timeout(String),

    /// 字节无法解码为图片（不重试）
    #[error("解码错误：{0}")]
    Decode(String),

    /// 解码后的宽高均小于最小尺寸
    #[error("Texture is smaller than minimum size specified")]
    SizeTooSmall(String),

    /// 磁盘缓存写入失败（仅记录日志）
    #[error("缓存写入失败：{0}")]
    CacheWrite(String),

    /// 磁盘缓存删除失败（仅记录日志）
    #[error("缓存删除失败：{0}")]
    CacheDelete(String),

    #[error("文件错误：{0}")]
    FileSystem(String),

    #[error("资源限制：{0}")]
    ResourceLimit(String),

    #[error("配置错误：{0}")]
    Config(String),

    #[error("已取消：{0}")]
    Cancelled(String),
}

impl LoaderError {
    /// 稳定错误码，便于日志检索与事件消费方分流。
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "E_INVALID_INPUT",
            Self::Transport(_) => "E_TRANSPORT",
            Self::Timeout(_) => "E_TIMEOUT",
            Self::Decode(_) => "E_DECODE",
            Self::SizeTooSmall(_) => "E_SIZE_TOO_SMALL",
            Self::CacheWrite(_) => "E_CACHE_WRITE",
            Self::CacheDelete(_) => "E_CACHE_DELETE",
            Self::FileSystem(_) => "E_FILE_SYSTEM",
            Self::ResourceLimit(_) => "E_RESOURCE_LIMIT",
            Self::Config(_) => "E_CONFIG",
            Self::Cancelled(_) => "E_CANCELLED",
        }
    }

    /// 错误发生的流水线阶段。
    pub fn stage(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "input",
            Self::Transport(_) | Self::Timeout(_) | Self::FileSystem(_) => "transport",
            Self::Decode(_) | Self::ResourceLimit(_) => "decode",
            Self::SizeTooSmall(_) => "validate",
            Self::CacheWrite(_) | Self::CacheDelete(_) => "cache",
            Self::Config(_) => "config",
            Self::Cancelled(_) => "cancel",
        }
    }

    /// 是否属于“取回字节本身失败”，此类错误允许切换到回退地址再试一次。
    pub fn is_retryable_with_fallback(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_) | Self::FileSystem(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// 在错误文案末尾追加来源地址：`{message} @ {url}`。
    pub fn at(self, url: &str) -> Self {
        let suffix = |message: String| format!("{} @ {}", message, url);
        match self {
            Self::InvalidInput(m) => Self::InvalidInput(suffix(m)),
            Self::Transport(m) => Self::Transport(suffix(m)),
            Self::Timeout(m) => Self::Timeout(suffix(m)),
            Self::Decode(m) => Self::Decode(suffix(m)),
            Self::SizeTooSmall(m) => Self::SizeTooSmall(m),
            Self::CacheWrite(m) => Self::CacheWrite(suffix(m)),
            Self::CacheDelete(m) => Self::CacheDelete(suffix(m)),
            Self::FileSystem(m) => Self::FileSystem(suffix(m)),
            Self::ResourceLimit(m) => Self::ResourceLimit(suffix(m)),
            Self::Config(m) => Self::Config(m),
            Self::Cancelled(m) => Self::Cancelled(m),
        }
    }
}

impl From<LoaderError> for String {
    fn from(error: LoaderError) -> Self {
        error.to_string()
    }
}

impl From<std::io::Error> for LoaderError {
    fn from(error: std::io::Error) -> Self {
        Self::FileSystem(error.to_string())
    }
}

/// 规范化对外错误文案：非空，且以句号结尾。
///
/// ```rust
/// use texture_loader::error::normalize_error_message;
///
/// assert_eq!(normalize_error_message(""), "N/A.");
/// assert_eq!(normalize_error_message("HTTP 404"), "HTTP 404.");
/// assert_eq!(normalize_error_message("done."), "done.");
/// ```
pub fn normalize_error_message(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return "N/A.".to_string();
    }

    if trimmed.ends_with('.') || trimmed.ends_with('。') {
        trimmed.to_string()
    } else {
        format!("{}.", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_appends_period_once() {
        assert_eq!(normalize_error_message("网络错误：连接失败"), "网络错误：连接失败.");
        assert_eq!(normalize_error_message("already done."), "already done.");
        assert_eq!(normalize_error_message("中文句号。"), "中文句号。");
    }

    #[test]
    fn normalize_replaces_blank_message() {
        assert_eq!(normalize_error_message("   "), "N/A.");
    }

    #[test]
    fn size_too_small_uses_fixed_message() {
        let err = LoaderError::SizeTooSmall("12x12 < 64".to_string());
        assert_eq!(
            normalize_error_message(&err.to_string()),
            "Texture is smaller than minimum size specified."
        );
        assert_eq!(err.stage(), "validate");
    }

    #[test]
    fn at_appends_source_url() {
        let err = LoaderError::Transport("HTTP 404: 未找到".into()).at("https://x/img.png");
        assert_eq!(err.to_string(), "网络错误：HTTP 404: 未找到 @ https://x/img.png");
        assert_eq!(err.code(), "E_TRANSPORT");
    }

    #[test]
    fn only_fetch_failures_allow_fallback() {
        assert!(LoaderError::Transport("x".into()).is_retryable_with_fallback());
        assert!(LoaderError::Timeout("x".into()).is_retryable_with_fallback());
        assert!(!LoaderError::Decode("x".into()).is_retryable_with_fallback());
        assert!(!LoaderError::Cancelled("x".into()).is_retryable_with_fallback());
    }
}
