//! # HTTP 传输实现
//!
//! ## 设计思路
//!
//! 把 http(s) 纹理地址下载成字节。状态码、内容类型、声明体积、流式签名
//! 依次在最早能判断的位置失败，不把明显不是图片的响应读完。
//!
//! ## 实现思路
//!
//! - 单个 `reqwest::Client` 复用连接池（连接超时 + 有限重定向）。
//! - `RetryPolicy`：408/429/5xx 与连接类错误按指数退避重试，`Retry-After` 优先。
//! - `BodyCollector`：累计分块、检查体积上限、在前若干字节内完成签名探测。
//! - 发送、退避等待、每次读块都与取消标志 `select!`。

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, RETRY_AFTER};
use reqwest::{StatusCode, Url};

use super::{ProgressCallback, Transport, validate_image_signature};
use crate::error::LoaderError;
use crate::loader::CancelFlag;
use crate::settings::LoaderConfig;

const ACCEPT_IMAGES: &str = "image/avif,image/webp,image/apng,image/*,*/*;q=0.8";
const MAX_REDIRECTS: usize = 5;
const SIGNATURE_PROBE_LIMIT: usize = 4096;
const DEFAULT_BODY_CAPACITY: usize = 16 * 1024;

fn cancelled() -> LoaderError {
    LoaderError::Cancelled("纹理下载已取消".to_string())
}

/// 有限次数的指数退避重试。
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_attempts: u8,
    base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 180,
        }
    }
}

impl RetryPolicy {
    fn retries_status(status: StatusCode) -> bool {
        matches!(status, StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS) || status.is_server_error()
    }

    fn retries_error(error: &reqwest::Error) -> bool {
        if error.is_timeout() || error.is_connect() {
            return true;
        }
        let text = error.to_string().to_lowercase();
        ["connection reset", "connection closed before message completed", "peer closed connection"]
            .iter()
            .any(|needle| text.contains(needle))
    }

    /// 第 `attempt` 次失败后的等待时长；服务端提示优先，叠加最多一半的抖动。
    fn delay(&self, attempt: u8, hint_ms: Option<u64>) -> Duration {
        let backoff = self
            .base_delay_ms
            .saturating_mul(1_u64 << u32::from(attempt.saturating_sub(1)).min(16));
        let base = hint_ms.unwrap_or(backoff);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::from(d.subsec_nanos()))
            .unwrap_or(0);
        let jitter = nanos % ((base / 2).max(1) + 1);
        Duration::from_millis(base.saturating_add(jitter))
    }
}

fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    let seconds: u64 = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()?;
    Some(seconds.saturating_mul(1000))
}

/// 流式响应体的累加器。
struct BodyCollector {
    buffer: Vec<u8>,
    limit: u64,
    signature_known: bool,
}

impl BodyCollector {
    fn new(declared: Option<u64>, limit: u64) -> Self {
        let capacity = declared
            .map(|len| len.min(limit).min(usize::MAX as u64) as usize)
            .filter(|len| *len > 0)
            .unwrap_or(DEFAULT_BODY_CAPACITY);
        Self {
            buffer: Vec::with_capacity(capacity),
            limit,
            signature_known: false,
        }
    }

    fn len(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn push(&mut self, chunk: &[u8]) -> Result<(), LoaderError> {
        if self.len().saturating_add(chunk.len() as u64) > self.limit {
            return Err(LoaderError::ResourceLimit(format!(
                "下载内容超过大小限制（{}）",
                crate::texture::format_bytes(self.limit)
            )));
        }
        self.buffer.extend_from_slice(chunk);
        if !self.signature_known {
            self.signature_known = probe_signature(&self.buffer, SIGNATURE_PROBE_LIMIT)?;
        }
        Ok(())
    }

    fn finish(self) -> Result<Bytes, LoaderError> {
        if !self.signature_known {
            validate_image_signature(&self.buffer)?;
        }
        Ok(Bytes::from(self.buffer))
    }
}

/// 基于 `reqwest` 的网络传输。
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    retry: RetryPolicy,
    max_file_size: u64,
    first_byte_timeout: Duration,
    chunk_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &LoaderConfig) -> Result<Self, LoaderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| LoaderError::Transport(format!("无法创建 HTTP 客户端：{}", e)))?;

        Ok(Self {
            client,
            retry: RetryPolicy::default(),
            max_file_size: config.max_file_size,
            first_byte_timeout: Duration::from_millis(config.stream_first_byte_timeout_ms),
            chunk_timeout: Duration::from_millis(config.stream_chunk_timeout_ms),
        })
    }

    async fn send(&self, url: &Url, timeout: Duration, cancel: &CancelFlag) -> Result<reqwest::Response, LoaderError> {
        let mut attempt: u8 = 1;
        loop {
            let request = self.client.get(url.clone()).timeout(timeout).header(ACCEPT, ACCEPT_IMAGES);
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(cancelled()),
                result = request.send() => result,
            };

            let exhausted = attempt >= self.retry.max_attempts;
            let delay = match result {
                Ok(response) if exhausted || !RetryPolicy::retries_status(response.status()) => return Ok(response),
                Ok(response) => {
                    let delay = self.retry.delay(attempt, retry_after_ms(response.headers()));
                    log::warn!(
                        "⚠️ HTTP {} 可重试（{}/{}），{}ms 后再试 - {}",
                        response.status().as_u16(),
                        attempt,
                        self.retry.max_attempts,
                        delay.as_millis(),
                        redact_url_for_log(url.as_str())
                    );
                    delay
                }
                Err(err) if exhausted || !RetryPolicy::retries_error(&err) => {
                    return Err(map_reqwest_error(&err, url.as_str(), timeout));
                }
                Err(err) => {
                    let delay = self.retry.delay(attempt, None);
                    log::warn!(
                        "⚠️ 网络请求失败（{}/{}），{}ms 后再试：{}",
                        attempt,
                        self.retry.max_attempts,
                        delay.as_millis(),
                        err.to_string().replace(url.as_str(), &redact_url_for_log(url.as_str()))
                    );
                    delay
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => return Err(cancelled()),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt = attempt.saturating_add(1);
        }
    }

    fn check_headers(&self, response: &reqwest::Response) -> Result<Option<u64>, LoaderError> {
        let status = response.status();
        if !status.is_success() {
            return Err(LoaderError::Transport(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("请求失败")
            )));
        }

        let content_type = response.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
        if let Some(content_type) = content_type
            && !is_image_content_type(content_type)
        {
            return Err(LoaderError::Decode(format!("响应不是图片类型：{}", content_type)));
        }

        let declared = response.content_length();
        if let Some(size) = declared
            && size > self.max_file_size
        {
            return Err(LoaderError::ResourceLimit(format!(
                "文件过大：{}（限制：{}）",
                crate::texture::format_bytes(size),
                crate::texture::format_bytes(self.max_file_size)
            )));
        }
        Ok(declared)
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn fetch_bytes(
        &self,
        url: &str,
        timeout: Duration,
        on_progress: ProgressCallback<'_>,
        cancel: &CancelFlag,
    ) -> Result<Bytes, LoaderError> {
        let parsed = Url::parse(url).map_err(|e| LoaderError::InvalidInput(format!("URL 格式错误：{}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(LoaderError::InvalidInput(format!("不支持的协议：{}", parsed.scheme())));
        }

        let mut response = self.send(&parsed, timeout, cancel).await?;
        let declared = self.check_headers(&response)?;
        on_progress(0, declared);

        let mut body = BodyCollector::new(declared, self.max_file_size);
        loop {
            let first = body.len() == 0;
            let wait = if first { self.first_byte_timeout } else { self.chunk_timeout };
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(cancelled()),
                next = tokio::time::timeout(wait, response.chunk()) => next,
            };

            let next = next.map_err(|_| {
                LoaderError::Timeout(if first { "等待首包超时" } else { "读取数据流超时" }.to_string())
            })?;
            let Some(chunk) = next.map_err(|e| map_reqwest_error(&e, url, timeout))? else {
                break;
            };

            body.push(&chunk)?;
            on_progress(body.len(), declared);
        }

        let received = body.len();
        on_progress(received, declared.or(Some(received)));
        log::debug!("🌐 下载完成 - {} {}", redact_url_for_log(url), crate::texture::format_bytes(received));
        body.finish()
    }
}

fn is_image_content_type(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    essence.starts_with("image/") || essence == "application/octet-stream"
}

/// 日志用地址：去掉查询串与片段；`data:` 只保留媒体类型与长度。
pub(crate) fn redact_url_for_log(url: &str) -> String {
    let trimmed = url.trim();
    if let Some(rest) = trimmed.strip_prefix("data:") {
        let media = rest.split([';', ',']).next().unwrap_or_default();
        return format!("data:{}（{} 字符）", media, trimmed.len());
    }

    let Ok(parsed) = Url::parse(trimmed) else {
        return "<invalid-url>".to_string();
    };
    match parsed.host_str() {
        Some(host) => {
            let port = parsed.port().map(|p| format!(":{}", p)).unwrap_or_default();
            format!("{}://{}{}{}", parsed.scheme(), host, port, parsed.path())
        }
        None => format!("{}://{}", parsed.scheme(), parsed.path()),
    }
}

fn map_reqwest_error(error: &reqwest::Error, url: &str, timeout: Duration) -> LoaderError {
    if error.is_timeout() {
        return LoaderError::Timeout(format!("下载超时（{}秒）", timeout.as_secs()));
    }
    let message = error.to_string().replace(url, &redact_url_for_log(url));
    if error.is_connect() {
        LoaderError::Transport(format!("无法连接：{}", message))
    } else {
        LoaderError::Transport(format!("请求失败：{}", message))
    }
}

/// 流式签名探测：`Ok(true)` 已确认是图片，`Ok(false)` 字节不足继续读，
/// 识别为非图片或超过探测上限仍无法识别时报错。
fn probe_signature(bytes: &[u8], limit: usize) -> Result<bool, LoaderError> {
    match infer::get(bytes) {
        Some(kind) if kind.matcher_type() == infer::MatcherType::Image => Ok(true),
        Some(kind) => Err(LoaderError::Decode(format!("下载内容不是图片：{}", kind.mime_type()))),
        None if bytes.len() >= limit => Err(LoaderError::Decode(format!("前 {} 字节内无法识别图片类型", limit))),
        None => Ok(false),
    }
}
