//! # 单次取回请求
//!
//! ## 设计思路
//!
//! 一个 `FetchRequest` 对应一个身份的一次在途取回：选源、下载/读盘、解码、
//! 尺寸校验与缩放、写回磁盘缓存、构建纹理。它从不直接触碰任务，
//! 所有结果都经上下文按 `(identity, seq)` 分发给订阅者；序号不匹配的结果被丢弃。
//!
//! ## 实现思路
//!
//! 1. 缓存开启且为网络源时解析缓存路径：过期文件先删除再走网络；
//!    有效文件作为主源，网络地址作为回退
//! 2. 主源取回失败且错误属于“取字节失败”时，回退地址重试一次
//! 3. 解码、缩放、纹理构建放到 `spawn_blocking`，并与取消标志 `select!`
//! 4. 每个挂起点之后检查取消，取消路径不产生错误回调

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use image::RgbaImage;

use super::cancel::CancelFlag;
use super::context::LoaderContext;
use super::identity::LoadIdentity;
use crate::error::LoaderError;
use crate::platform::{decode_data_url, redact_url_for_log};
use crate::settings::{CacheSettings, TextureSettings};
use crate::storage::CacheStore;
use crate::texture::{Texture, format_bytes};

const PROGRESS_MIN_INTERVAL: Duration = Duration::from_millis(50);
const PROGRESS_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(400);
const PROGRESS_MIN_DELTA: f32 = 0.01;
const PROGRESS_FORCE_DELTA: f32 = 0.05;

/// 发起取回所需的全部输入（任务启动时的快照）。
#[derive(Debug, Clone)]
pub(crate) struct FetchPlan {
    pub url: String,
    pub settings: TextureSettings,
    pub cache: CacheSettings,
}

/// 请求向订阅任务分发的事件。
#[derive(Debug, Clone)]
pub(crate) enum RequestEvent {
    Progress(f32),
    Complete(Texture),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    Network(String),
    LocalFile(PathBuf),
    Data(String),
}

impl Source {
    fn parse(url: &str) -> Result<Self, LoaderError> {
        let trimmed = url.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Ok(Self::Network(trimmed.to_string()))
        } else if lower.starts_with("data:") {
            Ok(Self::Data(trimmed.to_string()))
        } else if let Some(path) = trimmed.strip_prefix("file://") {
            Ok(Self::LocalFile(PathBuf::from(path)))
        } else {
            Err(LoaderError::InvalidInput(format!("不支持的地址：{}", redact_url_for_log(trimmed))))
        }
    }

    /// 错误文案里使用的来源描述。
    fn describe(&self) -> String {
        match self {
            Self::Network(url) => url.clone(),
            Self::LocalFile(path) => format!("file://{}", path.display()),
            Self::Data(_) => "data:".to_string(),
        }
    }

    fn for_log(&self) -> String {
        match self {
            Self::Network(url) => redact_url_for_log(url),
            other => other.describe(),
        }
    }
}

struct Sources {
    primary: Source,
    fallback: Option<Source>,
    cache_path: Option<PathBuf>,
}

/// 网络进度节流：最小间隔、最小增量与心跳。
#[derive(Debug, Default)]
pub(crate) struct ProgressThrottle {
    last_emit_at: Option<Instant>,
    last_progress: f32,
}

impl ProgressThrottle {
    pub(crate) fn should_emit(&mut self, progress: f32) -> bool {
        let emit = match self.last_emit_at {
            None => true,
            Some(last_emit_at) => {
                let elapsed = last_emit_at.elapsed();
                let delta = progress - self.last_progress;
                if delta <= 0.0 {
                    false
                } else if delta >= PROGRESS_FORCE_DELTA {
                    true
                } else if delta >= PROGRESS_MIN_DELTA && elapsed >= PROGRESS_MIN_INTERVAL {
                    true
                } else {
                    elapsed >= PROGRESS_HEARTBEAT_INTERVAL
                }
            }
        };

        if emit {
            self.last_emit_at = Some(Instant::now());
            self.last_progress = progress;
        }
        emit
    }
}

pub(crate) struct FetchRequest {
    pub identity: LoadIdentity,
    pub seq: u64,
    pub plan: FetchPlan,
    pub cancel: Arc<CancelFlag>,
    pub ctx: LoaderContext,
}

impl FetchRequest {
    /// 执行到底并分发结果。取消时只清理在途记录。
    pub(crate) async fn run(self) {
        let result = self.execute().await;

        match result {
            Ok(texture) => {
                if !self.ctx.dispatch(&self.identity, self.seq, RequestEvent::Complete(texture.clone())) {
                    log::debug!("🛑 请求结果无人订阅，丢弃纹理 - {}", self.identity);
                    texture.destroy();
                }
            }
            Err(err) if err.is_cancelled() || self.cancel.is_cancelled() => {
                log::info!("🛑 请求已取消 - {}", redact_url_for_log(&self.plan.url));
                self.ctx.finish_request(&self.identity, self.seq);
            }
            Err(err) => {
                log::error!(
                    "❌ 纹理请求失败 [{}:{}] - {}",
                    err.stage(),
                    err.code(),
                    err.to_string()
                        .replace(&self.plan.url, &redact_url_for_log(&self.plan.url))
                );
                self.ctx
                    .dispatch(&self.identity, self.seq, RequestEvent::Error(err.to_string()));
            }
        }
    }

    async fn execute(&self) -> Result<Texture, LoaderError> {
        let total_start = Instant::now();
        let sources = self.resolve_sources().await?;
        self.ensure_active()?;

        let load_start = Instant::now();
        let (bytes, used) = self.fetch_with_fallback(&sources).await?;
        let load_ms = load_start.elapsed().as_millis();
        self.ensure_active()?;
        self.report(1.0);

        let from_cache = matches!(used, Source::LocalFile(_)) && sources.cache_path.is_some();
        let raw_size = bytes.len() as u64;

        let decode_start = Instant::now();
        let image = match self.decode(bytes).await {
            Ok(image) => image,
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => {
                if let (true, Some(path)) = (from_cache, &sources.cache_path) {
                    log::warn!("⚠️ 缓存文件无法解码，删除后下次重新下载 - {}", path.display());
                    self.ctx.cache_store().delete(path).await;
                }
                return Err(err.at(&used.describe()));
            }
        };
        let decode_ms = decode_start.elapsed().as_millis();
        self.ensure_active()?;

        self.validate_min_size(&image)?;
        let image = self.clamp_to_max_size(image).await?;
        self.ensure_active()?;

        let image = match &sources.cache_path {
            Some(path) if !from_cache => self.save_to_cache(path, image).await?,
            _ => image,
        };
        self.ensure_active()?;

        let name = texture_name(&self.plan.url);
        let settings = self.plan.settings.clone();
        let texture = self
            .blocking("纹理构建", move || Ok(Texture::build(name, image, &settings)))
            .await?;
        if self.cancel.is_cancelled() {
            texture.destroy();
            return Err(LoaderError::Cancelled("纹理构建后已取消".to_string()));
        }

        log::info!(
            "✅ 纹理就绪 - {} {}x{} mips={} 原始={} load={}ms decode={}ms total={}ms{}",
            used.for_log(),
            texture.width(),
            texture.height(),
            texture.mip_count(),
            format_bytes(raw_size),
            load_ms,
            decode_ms,
            total_start.elapsed().as_millis(),
            if from_cache { "（磁盘缓存）" } else { "" }
        );

        Ok(texture)
    }

    async fn resolve_sources(&self) -> Result<Sources, LoaderError> {
        let source = Source::parse(&self.plan.url)?;

        let cache_path = match (&source, self.plan.cache.enabled) {
            (Source::Network(_), true) => Some(self.ctx.cache_store().resolve(
                self.identity.hash(),
                self.plan.settings.max_size,
                self.plan.cache.format,
            )),
            _ => None,
        };

        if let Some(path) = &cache_path
            && CacheStore::exists(path)
        {
            if CacheStore::is_expired(path, self.plan.cache.expiry) {
                log::info!("💾 缓存已过期，删除后重新下载 - {}", path.display());
                self.ctx.cache_store().delete(path).await;
            } else {
                log::debug!("💾 命中磁盘缓存 - {}", path.display());
                return Ok(Sources {
                    primary: Source::LocalFile(path.clone()),
                    fallback: Some(source),
                    cache_path,
                });
            }
        }

        Ok(Sources {
            primary: source,
            fallback: None,
            cache_path,
        })
    }

    async fn fetch_with_fallback(&self, sources: &Sources) -> Result<(Bytes, Source), LoaderError> {
        let err = match self.fetch(&sources.primary).await {
            Ok(bytes) => return Ok((bytes, sources.primary.clone())),
            Err(err) => err,
        };

        if err.is_cancelled() {
            return Err(err);
        }

        match &sources.fallback {
            Some(fallback) if err.is_retryable_with_fallback() && *fallback != sources.primary => {
                log::warn!(
                    "⚠️ 主源取回失败，改用回退地址 - {} -> {}: {}",
                    sources.primary.for_log(),
                    fallback.for_log(),
                    err
                );
                self.fetch(fallback)
                    .await
                    .map(|bytes| (bytes, fallback.clone()))
                    .map_err(|e| e.at(&fallback.describe()))
            }
            _ => Err(err.at(&sources.primary.describe())),
        }
    }

    async fn fetch(&self, source: &Source) -> Result<Bytes, LoaderError> {
        let transport = self.ctx.transport();
        let fetch = async {
            match source {
                Source::Network(url) => {
                    log::info!("🌐 开始下载纹理 - {}", redact_url_for_log(url));
                    let throttle = Mutex::new(ProgressThrottle::default());
                    let on_progress = |downloaded: u64, total: Option<u64>| {
                        let Some(total) = total.filter(|t| *t > 0) else {
                            return;
                        };
                        let fraction = (downloaded as f64 / total as f64).clamp(0.0, 1.0) as f32;
                        let emit = match throttle.lock() {
                            Ok(mut guard) => guard.should_emit(fraction),
                            Err(_) => false,
                        };
                        if emit {
                            self.report(fraction);
                        }
                    };
                    transport
                        .fetch_bytes(url, self.ctx.config().request_timeout(), &on_progress, &self.cancel)
                        .await
                }
                Source::LocalFile(path) => transport.fetch_local_file(path).await,
                Source::Data(data) => decode_data_url(data, self.ctx.config().max_file_size),
            }
        };

        tokio::select! {
            result = fetch => result,
            _ = self.cancel.cancelled() => Err(LoaderError::Cancelled("取回已取消".to_string())),
        }
    }

    async fn decode(&self, bytes: Bytes) -> Result<RgbaImage, LoaderError> {
        let codec = self.ctx.codec();
        self.blocking("解码", move || codec.decode(&bytes)).await
    }

    fn validate_min_size(&self, image: &RgbaImage) -> Result<(), LoaderError> {
        let min = self.plan.settings.min_size;
        let (width, height) = image.dimensions();
        if min > 0 && width < min && height < min {
            return Err(LoaderError::SizeTooSmall(format!("{}x{} < {}", width, height, min)));
        }
        Ok(())
    }

    /// 最长边超出上限时等比缩小；缩放失败保留原图继续。
    async fn clamp_to_max_size(&self, image: RgbaImage) -> Result<RgbaImage, LoaderError> {
        let max = self.plan.settings.max_size;
        let (width, height) = image.dimensions();
        if width <= max && height <= max {
            return Ok(image);
        }

        let codec = self.ctx.codec();
        let (original, resized) = self
            .blocking("缩放", move || {
                let resized = codec.resize(&image, max);
                Ok((image, resized))
            })
            .await?;

        match resized {
            Ok(resized) => Ok(resized),
            Err(err) => {
                log::warn!("⚠️ 纹理缩放失败，保留原尺寸 {}x{}：{}", width, height, err);
                Ok(original)
            }
        }
    }

    /// 写回磁盘缓存。失败只记日志，不影响本次加载。
    async fn save_to_cache(&self, path: &std::path::Path, image: RgbaImage) -> Result<RgbaImage, LoaderError> {
        if CacheStore::exists(path) {
            return Ok(image);
        }

        let codec = self.ctx.codec();
        let CacheSettings { format, quality, .. } = self.plan.cache;
        let (image, encoded) = self
            .blocking("缓存编码", move || {
                let encoded = codec.encode(&image, format, quality);
                Ok((image, encoded))
            })
            .await?;

        let result = match encoded {
            Ok(bytes) => {
                let size = bytes.len() as u64;
                self.ctx
                    .cache_store()
                    .write(path, bytes)
                    .await
                    .map(|()| size)
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(size) => log::info!("💾 已写入磁盘缓存 - {} ({})", path.display(), format_bytes(size)),
            Err(err) => log::error!("❌ 磁盘缓存写入失败（忽略）：{}", err),
        }
        Ok(image)
    }

    async fn blocking<T, F>(&self, stage: &'static str, work: F) -> Result<T, LoaderError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, LoaderError> + Send + 'static,
    {
        let handle = tokio::task::spawn_blocking(work);
        tokio::select! {
            joined = handle => joined
                .map_err(|e| LoaderError::ResourceLimit(format!("{}任务异常：{}", stage, e)))?,
            _ = self.cancel.cancelled() => Err(LoaderError::Cancelled(format!("{}已取消", stage))),
        }
    }

    fn report(&self, progress: f32) {
        self.ctx
            .dispatch(&self.identity, self.seq, RequestEvent::Progress(progress));
    }

    fn ensure_active(&self) -> Result<(), LoaderError> {
        if self.cancel.is_cancelled() {
            return Err(LoaderError::Cancelled("请求已取消".to_string()));
        }
        Ok(())
    }
}

fn texture_name(url: &str) -> String {
    if url.trim_start().to_ascii_lowercase().starts_with("data:") {
        return "data-url".to_string();
    }
    let redacted = redact_url_for_log(url);
    redacted
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(redacted.as_str())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_parse_recognizes_schemes() {
        assert_eq!(
            Source::parse("https://x/img.png").expect("https"),
            Source::Network("https://x/img.png".into())
        );
        assert_eq!(
            Source::parse("file:///tmp/a.png").expect("file"),
            Source::LocalFile(PathBuf::from("/tmp/a.png"))
        );
        assert!(matches!(Source::parse("data:image/png;base64,AAAA"), Ok(Source::Data(_))));
        assert!(matches!(Source::parse("ftp://x/a.png"), Err(LoaderError::InvalidInput(_))));
    }

    #[test]
    fn throttle_emits_first_and_large_steps() {
        let mut throttle = ProgressThrottle::default();
        assert!(throttle.should_emit(0.001));
        assert!(!throttle.should_emit(0.002));
        assert!(throttle.should_emit(0.2));
        assert!(!throttle.should_emit(0.1));
    }

    #[test]
    fn texture_name_uses_last_path_segment() {
        assert_eq!(texture_name("https://x/a/b/img.png?token=1"), "img.png");
        assert_eq!(texture_name("data:image/png;base64,AAAA"), "data-url");
    }
}
