#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};
use tempfile::TempDir;

use texture_loader::loader::{CancelFlag, url_hash};
use texture_loader::platform::{ProgressCallback, Transport};
use texture_loader::storage::CacheStore;
use texture_loader::target::{HeadlessSurface, Size};
use texture_loader::{
    CacheFormat, ImageTarget, LoadOutcome, LoaderConfig, LoaderContext, LoaderError, PlaceholderKind, ScaleMode,
    Texture, TextureLoader, TextureTarget,
};

pub fn create_png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        let r = (x % 255) as u8;
        let g = (y % 255) as u8;
        let b = ((x + y) % 255) as u8;
        Rgba([r, g, b, 255])
    });

    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut cursor, ImageFormat::Png)
        .expect("failed to encode test image");
    cursor.into_inner()
}

/// 计数用传输层替身：按 URL 返回预置响应，可注入延迟或让请求一直挂起。
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<HashMap<String, Result<Vec<u8>, LoaderError>>>,
    calls: AtomicUsize,
    local_calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    delay: Option<Duration>,
    hang: bool,
    fail_local: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 网络请求永不返回，只能被取消。
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// 读取本地缓存文件总是失败。
    pub fn failing_local_reads(mut self) -> Self {
        self.fail_local = true;
        self
    }

    pub fn respond(self, url: &str, response: Result<Vec<u8>, LoaderError>) -> Self {
        self.responses
            .lock()
            .expect("responses lock")
            .insert(url.to_string(), response);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn local_calls(&self) -> usize {
        self.local_calls.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn fetch_bytes(
        &self,
        url: &str,
        _timeout: Duration,
        on_progress: ProgressCallback<'_>,
        cancel: &CancelFlag,
    ) -> Result<Bytes, LoaderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if self.hang {
            cancel.cancelled().await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            return Err(LoaderError::Cancelled("mock cancelled".to_string()));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let response = self
            .responses
            .lock()
            .expect("responses lock")
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(LoaderError::Transport("HTTP 404: 未找到".to_string())));
        self.active.fetch_sub(1, Ordering::SeqCst);

        let bytes = response?;
        let total = bytes.len() as u64;
        on_progress(total / 2, Some(total));
        on_progress(total, Some(total));
        Ok(Bytes::from(bytes))
    }

    async fn fetch_local_file(&self, path: &Path) -> Result<Bytes, LoaderError> {
        self.local_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_local {
            return Err(LoaderError::FileSystem(format!("mock read failure: {}", path.display())));
        }
        tokio::fs::read(path)
            .await
            .map(Bytes::from)
            .map_err(|e| LoaderError::FileSystem(e.to_string()))
    }
}

pub fn test_config(root: &TempDir) -> LoaderConfig {
    let mut config = LoaderConfig::default();
    config.cache_root = Some(root.path().to_path_buf());
    config.log_level = "off".to_string();
    config.fade_millis = 0;
    config
}

pub fn context(root: &TempDir, transport: Arc<MockTransport>) -> LoaderContext {
    LoaderContext::builder(test_config(root))
        .transport(transport)
        .build()
        .expect("failed to build loader context")
}

pub fn cache_path(root: &TempDir, url: &str, size: u32) -> PathBuf {
    CacheStore::new(root.path().join("TextureLoader")).resolve(&url_hash(url), size, CacheFormat::Png)
}

pub fn headless_target() -> Arc<TextureTarget<HeadlessSurface>> {
    Arc::new(TextureTarget::new(HeadlessSurface::new(Some(Size::new(256.0, 256.0)))))
}

/// 记录收到的调用序列的渲染目标。
#[derive(Default)]
pub struct RecordingTarget {
    pub calls: Mutex<Vec<TargetCall>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TargetCall {
    Texture { id: Option<u64>, transition: bool },
    Placeholder(PlaceholderKind),
    Alpha(f32),
    Resize(ScaleMode),
    Dispose,
}

impl RecordingTarget {
    pub fn calls(&self) -> Vec<TargetCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn last_placeholder(&self) -> Option<PlaceholderKind> {
        self.calls().into_iter().rev().find_map(|call| match call {
            TargetCall::Placeholder(kind) => Some(kind),
            _ => None,
        })
    }

    pub fn textures(&self) -> Vec<Option<u64>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TargetCall::Texture { id, .. } => Some(id),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: TargetCall) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

impl ImageTarget for RecordingTarget {
    fn set_texture(&self, texture: Option<Texture>, transition: bool) {
        self.push(TargetCall::Texture {
            id: texture.map(|t| t.id()),
            transition,
        });
    }

    fn set_alpha(&self, alpha: f32) {
        self.push(TargetCall::Alpha(alpha));
    }

    fn display_placeholder(&self, kind: PlaceholderKind) {
        self.push(TargetCall::Placeholder(kind));
    }

    fn resize_to_fit(&self, mode: ScaleMode) {
        self.push(TargetCall::Resize(mode));
    }

    fn dispose(&self) {
        self.push(TargetCall::Dispose);
    }
}

pub async fn finish(loader: &TextureLoader) -> LoadOutcome {
    tokio::time::timeout(Duration::from_secs(10), loader.finished())
        .await
        .expect("loader did not reach a terminal state in time")
}

/// 记录回调序列。
#[derive(Default)]
pub struct Recorder {
    pub progress: Mutex<Vec<f32>>,
    pub starts: AtomicUsize,
    pub completes: AtomicUsize,
    pub errors: Mutex<Vec<String>>,
    pub cancels: AtomicUsize,
}

impl Recorder {
    pub fn attach(self: &Arc<Self>, loader: TextureLoader) -> TextureLoader {
        let on_start = Arc::clone(self);
        let on_progress = Arc::clone(self);
        let on_complete = Arc::clone(self);
        let on_error = Arc::clone(self);
        let on_cancel = Arc::clone(self);
        loader
            .on_start(move || {
                on_start.starts.fetch_add(1, Ordering::SeqCst);
            })
            .on_progress(move |p| on_progress.progress.lock().expect("progress lock").push(p))
            .on_complete(move |_| {
                on_complete.completes.fetch_add(1, Ordering::SeqCst);
            })
            .on_error(move |message| on_error.errors.lock().expect("errors lock").push(message.to_string()))
            .on_cancel(move || {
                on_cancel.cancels.fetch_add(1, Ordering::SeqCst);
            })
    }

    pub fn progress(&self) -> Vec<f32> {
        self.progress.lock().expect("progress lock").clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().expect("errors lock").clone()
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn completes(&self) -> usize {
        self.completes.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    /// 终态回调总数。
    pub fn terminal_count(&self) -> usize {
        self.completes() + self.errors().len() + self.cancels()
    }
}
