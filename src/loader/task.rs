//! # 纹理加载任务
//!
//! ## 设计思路
//!
//! `TextureLoader` 是面向调用方的工作单元：一个 URL、一组纹理参数、若干渲染目标。
//! 它组合内存注册表、磁盘缓存与取回请求，把最终纹理推送到每个目标，
//! 并通过回调、全局事件与 `finished().await` 三种方式通知结果。
//!
//! ## 实现思路
//!
//! 状态机：
//! ```text
//! Idle ──start(enqueue)──► Queued ──出队──► Loading ──► Done | Failed
//!   └────────start()──────────────────────►   │
//!                       Queued/Loading ──cancel()──► Canceled
//!                       任意状态 ──dispose()──► Disposed
//! ```
//! - `Failed` / `Canceled` 之后可以再次 `start()`；`Done` / `Disposed` 之后 `start()` 无效。
//! - 进度只增不减；完成前若未到 1，先补发一次 1。
//! - 所有请求回调都带身份，与当前身份不一致或状态不是 `Loading` 的回调被忽略。
//! - 回调、事件与目标调用均在释放任务锁之后执行。

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::watch;

use super::LoaderId;
use super::context::{BeginFetch, LoaderContext};
use super::events::LoadEvent;
use super::identity::LoadIdentity;
use super::request::FetchPlan;
use crate::error::normalize_error_message;
use crate::platform::redact_url_for_log;
use crate::settings::{CacheExpiry, CacheFormat, CacheSettings, TextureSettings};
use crate::target::{ImageTarget, PlaceholderKind};
use crate::texture::Texture;

type Callback = Arc<dyn Fn() + Send + Sync>;
type ProgressCallback = Arc<dyn Fn(f32) + Send + Sync>;
type CompleteCallback = Arc<dyn Fn(&Texture) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// 任务状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Idle,
    Queued,
    Loading,
    Done,
    Failed,
    Canceled,
    Disposed,
}

impl LoadPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Canceled | Self::Disposed)
    }
}

/// `finished().await` 的结果。
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    Completed(Texture),
    Failed(String),
    Canceled,
    Disposed,
}

#[derive(Default)]
struct Callbacks {
    on_start: Vec<Callback>,
    on_progress: Vec<ProgressCallback>,
    on_complete: Vec<CompleteCallback>,
    on_error: Vec<ErrorCallback>,
    on_cancel: Vec<Callback>,
}

struct AttachedTarget {
    target: Arc<dyn ImageTarget>,
    any: Arc<dyn Any + Send + Sync>,
}

impl AttachedTarget {
    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.any) as *const ()
    }
}

struct TaskState {
    phase: LoadPhase,
    identity: Option<LoadIdentity>,
    from_queue: bool,
    progress: f32,
    cache: CacheSettings,
    targets: Vec<AttachedTarget>,
    texture: Option<Texture>,
    holds_claim: bool,
    last_error: Option<String>,
    callbacks: Callbacks,
    started_at: Option<Instant>,
}

impl TaskState {
    fn target_handles(&self) -> Vec<Arc<dyn ImageTarget>> {
        self.targets.iter().map(|t| Arc::clone(&t.target)).collect()
    }
}

struct TaskInner {
    id: LoaderId,
    url: String,
    settings: TextureSettings,
    ctx: LoaderContext,
    state: Mutex<TaskState>,
    phase_tx: watch::Sender<LoadPhase>,
}

/// 一次纹理加载（克隆得到同一任务的另一个句柄）。
#[derive(Clone)]
pub struct TextureLoader {
    inner: Arc<TaskInner>,
}

impl fmt::Debug for TextureLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureLoader")
            .field("id", &self.inner.id)
            .field("url", &redact_url_for_log(&self.inner.url))
            .field("phase", &self.phase())
            .finish()
    }
}

impl TextureLoader {
    pub(crate) fn new(
        id: LoaderId,
        url: String,
        settings: TextureSettings,
        cache: CacheSettings,
        ctx: LoaderContext,
    ) -> Self {
        let (phase_tx, _) = watch::channel(LoadPhase::Idle);
        Self {
            inner: Arc::new(TaskInner {
                id,
                url,
                settings,
                ctx,
                state: Mutex::new(TaskState {
                    phase: LoadPhase::Idle,
                    identity: None,
                    from_queue: false,
                    progress: 0.0,
                    cache,
                    targets: Vec::new(),
                    texture: None,
                    holds_claim: false,
                    last_error: None,
                    callbacks: Callbacks::default(),
                    started_at: None,
                }),
                phase_tx,
            }),
        }
    }

    pub fn id(&self) -> LoaderId {
        self.inner.id
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn settings(&self) -> &TextureSettings {
        &self.inner.settings
    }

    pub fn phase(&self) -> LoadPhase {
        self.lock().phase
    }

    pub fn progress(&self) -> f32 {
        self.lock().progress
    }

    /// 启动后才有身份。
    pub fn identity(&self) -> Option<LoadIdentity> {
        self.lock().identity.clone()
    }

    pub fn texture(&self) -> Option<Texture> {
        self.lock().texture.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    pub fn cache_settings(&self) -> CacheSettings {
        self.lock().cache
    }

    pub fn targets(&self) -> Vec<Arc<dyn ImageTarget>> {
        self.lock().target_handles()
    }

    /// 取出指定具体类型的目标（例如需要在布局变化时重新适配尺寸的目标）。
    pub fn get_targets<T: ImageTarget + 'static>(&self) -> Vec<Arc<T>> {
        self.lock()
            .targets
            .iter()
            .filter_map(|t| Arc::clone(&t.any).downcast::<T>().ok())
            .collect()
    }

    /// 绑定渲染目标并立即显示其默认占位图；同一目标重复绑定只会重新显示。
    pub fn into<T: ImageTarget + 'static>(self, target: Arc<T>) -> Self {
        let any: Arc<dyn Any + Send + Sync> = target.clone();
        self.attach(target, any);
        self
    }

    /// 修改磁盘缓存策略。只影响之后发起的取回。
    pub fn use_cache(
        self,
        enabled: bool,
        format: Option<CacheFormat>,
        quality: Option<u8>,
        expiry: Option<CacheExpiry>,
    ) -> Self {
        {
            let mut state = self.lock();
            state.cache.enabled = enabled;
            if let Some(format) = format {
                state.cache.format = format;
            }
            if let Some(quality) = quality {
                state.cache.quality = quality.clamp(1, 100);
            }
            if let Some(expiry) = expiry {
                state.cache.expiry = expiry;
            }
        }
        self
    }

    pub fn on_start<F>(self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.lock().callbacks.on_start.push(Arc::new(callback));
        self
    }

    pub fn on_progress<F>(self, callback: F) -> Self
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        self.lock().callbacks.on_progress.push(Arc::new(callback));
        self
    }

    pub fn on_complete<F>(self, callback: F) -> Self
    where
        F: Fn(&Texture) + Send + Sync + 'static,
    {
        self.lock().callbacks.on_complete.push(Arc::new(callback));
        self
    }

    pub fn on_error<F>(self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.lock().callbacks.on_error.push(Arc::new(callback));
        self
    }

    pub fn on_cancel<F>(self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.lock().callbacks.on_cancel.push(Arc::new(callback));
        self
    }

    /// 开始加载；`enqueue` 为真时交给全局队列串行启动。
    ///
    /// 已排队、加载中、已完成或已释放时无效果。
    pub fn start(&self, enqueue: bool) {
        self.begin(enqueue, false);
    }

    /// 队列出队时调用；返回是否真正启动。
    pub(crate) fn start_from_queue(&self) -> bool {
        self.begin(false, true)
    }

    /// 取消排队或加载中的任务，目标回到默认占位图。
    pub fn cancel(&self) {
        let (identity, targets, callbacks) = {
            let mut state = self.lock();
            if !matches!(state.phase, LoadPhase::Loading | LoadPhase::Queued) {
                return;
            }
            self.set_phase(&mut state, LoadPhase::Canceled);
            state.started_at = None;
            (
                state.identity.clone(),
                state.target_handles(),
                state.callbacks.on_cancel.clone(),
            )
        };

        log::info!("🛑 取消纹理加载 - id={} {}", self.id(), redact_url_for_log(self.url()));

        if let Some(identity) = &identity {
            self.inner.ctx.unsubscribe_request(identity, self.id());
        }
        for target in &targets {
            target.display_placeholder(PlaceholderKind::Default);
        }
        for callback in &callbacks {
            callback();
        }
        self.inner.ctx.emit(&LoadEvent::Cancel { id: self.id() });
        self.inner.ctx.withdraw_from_queue(self.id());
    }

    /// 释放任务：先取消，再释放全部目标与内存纹理引用，最后移出实例列表。
    pub fn dispose(&self) {
        self.cancel();

        let (targets, claim) = {
            let mut state = self.lock();
            if state.phase == LoadPhase::Disposed {
                return;
            }
            self.set_phase(&mut state, LoadPhase::Disposed);
            let targets: Vec<AttachedTarget> = std::mem::take(&mut state.targets);
            let claim = if state.holds_claim { state.identity.clone() } else { None };
            state.holds_claim = false;
            state.texture = None;
            state.callbacks = Callbacks::default();
            (targets, claim)
        };

        for attached in &targets {
            attached.target.dispose();
        }
        if let Some(identity) = &claim {
            self.inner.ctx.release_texture(identity);
        }
        self.inner.ctx.unregister_instance(self.id());
        log::debug!("🧹 任务已释放 - id={}", self.id());
    }

    /// 等待任务进入终态。
    ///
    /// 任务从未启动时会一直等待；取消后再次启动的任务，在重新启动前读到的是上一次的结果。
    pub async fn finished(&self) -> LoadOutcome {
        let mut rx = self.inner.phase_tx.subscribe();
        let phase = match rx.wait_for(|phase| phase.is_terminal()).await {
            Ok(phase) => *phase,
            Err(_) => LoadPhase::Disposed,
        };

        let state = self.lock();
        match phase {
            LoadPhase::Done => state
                .texture
                .clone()
                .map(LoadOutcome::Completed)
                .unwrap_or(LoadOutcome::Disposed),
            LoadPhase::Failed => LoadOutcome::Failed(state.last_error.clone().unwrap_or_else(|| "N/A.".to_string())),
            LoadPhase::Canceled => LoadOutcome::Canceled,
            _ => LoadOutcome::Disposed,
        }
    }

    fn attach(&self, target: Arc<dyn ImageTarget>, any: Arc<dyn Any + Send + Sync>) {
        let done_texture = {
            let mut state = self.lock();
            if state.phase == LoadPhase::Disposed {
                log::warn!("⚠️ 任务已释放，忽略目标绑定 - id={}", self.id());
                return;
            }
            let attached = AttachedTarget {
                target: Arc::clone(&target),
                any,
            };
            if !state.targets.iter().any(|t| t.addr() == attached.addr()) {
                state.targets.push(attached);
            }
            if state.phase == LoadPhase::Done { state.texture.clone() } else { None }
        };

        target.display_placeholder(PlaceholderKind::Default);
        if let Some(texture) = done_texture {
            target.set_texture(Some(texture), false);
        }
    }

    fn begin(&self, enqueue: bool, from_queue: bool) -> bool {
        if self.inner.ctx.is_shut_down() {
            log::warn!("⚠️ 上下文已关闭，忽略启动 - id={}", self.id());
            return false;
        }

        let mut state = self.lock();
        let allowed = match state.phase {
            LoadPhase::Loading | LoadPhase::Done | LoadPhase::Disposed => false,
            LoadPhase::Queued => from_queue,
            LoadPhase::Idle | LoadPhase::Failed | LoadPhase::Canceled => !from_queue,
        };
        if !allowed {
            return false;
        }

        if self.inner.url.trim().is_empty() {
            drop(state);
            log::error!("❌ 缺少 URL，忽略启动 - id={}", self.id());
            return false;
        }

        let identity = LoadIdentity::new(&self.inner.url, &self.inner.settings);
        state.identity = Some(identity.clone());
        state.progress = 0.0;
        state.last_error = None;
        let targets = state.target_handles();

        if enqueue {
            self.set_phase(&mut state, LoadPhase::Queued);
            state.from_queue = false;
            drop(state);

            for target in &targets {
                target.display_placeholder(PlaceholderKind::Loading);
            }
            self.inner.ctx.enqueue(self.id());
            return true;
        }

        self.set_phase(&mut state, LoadPhase::Loading);
        state.from_queue = from_queue;
        state.started_at = Some(Instant::now());
        let plan = FetchPlan {
            url: self.inner.url.clone(),
            settings: self.inner.settings.clone(),
            cache: state.cache,
        };
        let on_start = state.callbacks.on_start.clone();
        let on_progress = state.callbacks.on_progress.clone();
        drop(state);

        for target in &targets {
            target.display_placeholder(PlaceholderKind::Loading);
        }
        for callback in &on_start {
            callback();
        }
        self.inner.ctx.emit(&LoadEvent::Start {
            id: self.id(),
            url: self.inner.url.clone(),
        });
        for callback in &on_progress {
            callback(0.0);
        }
        self.inner.ctx.emit(&LoadEvent::Progress {
            id: self.id(),
            progress: 0.0,
        });

        match self.inner.ctx.begin_fetch(&identity, self.id(), plan) {
            BeginFetch::MemoryHit(texture) => {
                log::debug!("♻️ 命中内存纹理 - {}", identity);
                self.handle_complete(&identity, texture, true);
            }
            BeginFetch::Subscribed => {
                log::info!("🌐 开始加载纹理 - id={} {}", self.id(), redact_url_for_log(self.url()));
                let still_active = {
                    let state = self.lock();
                    state.phase == LoadPhase::Loading && state.identity.as_ref() == Some(&identity)
                };
                if !still_active {
                    self.inner.ctx.unsubscribe_request(&identity, self.id());
                }
            }
            BeginFetch::Closed => {
                log::warn!("⚠️ 上下文在启动途中关闭，释放任务 - id={}", self.id());
                self.dispose();
            }
        }
        true
    }

    pub(crate) fn report_progress(&self, identity: &LoadIdentity, progress: f32) {
        let progress = progress.clamp(0.0, 1.0);
        let callbacks = {
            let mut state = self.lock();
            if state.phase != LoadPhase::Loading
                || state.identity.as_ref() != Some(identity)
                || progress <= state.progress
            {
                return;
            }
            state.progress = progress;
            state.callbacks.on_progress.clone()
        };

        for callback in &callbacks {
            callback(progress);
        }
        self.inner.ctx.emit(&LoadEvent::Progress { id: self.id(), progress });
    }

    /// 接收纹理。`claimed` 表示调用方已为本任务在注册表中占了一份计数。
    pub(crate) fn handle_complete(&self, identity: &LoadIdentity, texture: Texture, claimed: bool) -> bool {
        let mut state = self.lock();
        if state.phase != LoadPhase::Loading || state.identity.as_ref() != Some(identity) {
            drop(state);
            if claimed {
                self.inner.ctx.release_texture(identity);
            }
            return false;
        }

        let texture = if claimed {
            texture
        } else {
            self.inner.ctx.register_texture(identity, texture)
        };
        state.holds_claim = true;
        state.texture = Some(texture.clone());
        self.set_phase(&mut state, LoadPhase::Done);

        let force_progress = state.progress < 1.0;
        state.progress = 1.0;
        let from_queue = state.from_queue;
        let elapsed_ms = state.started_at.take().map(|t| t.elapsed().as_millis()).unwrap_or(0);
        let targets = state.target_handles();
        let on_progress = if force_progress { state.callbacks.on_progress.clone() } else { Vec::new() };
        let on_complete = state.callbacks.on_complete.clone();
        drop(state);

        for target in &targets {
            target.set_texture(Some(texture.clone()), true);
        }
        if force_progress {
            for callback in &on_progress {
                callback(1.0);
            }
            self.inner.ctx.emit(&LoadEvent::Progress {
                id: self.id(),
                progress: 1.0,
            });
        }
        for callback in &on_complete {
            callback(&texture);
        }
        self.inner.ctx.emit(&LoadEvent::Complete {
            id: self.id(),
            texture: texture.clone(),
        });

        log::info!(
            "✅ 纹理加载完成 - id={} {}x{} 目标={} 耗时={}ms",
            self.id(),
            texture.width(),
            texture.height(),
            targets.len(),
            elapsed_ms
        );

        if from_queue {
            self.inner.ctx.schedule_queue_advance(self.id());
        }
        true
    }

    pub(crate) fn handle_error(&self, identity: &LoadIdentity, message: &str) {
        let (message, targets, callbacks, from_queue) = {
            let mut state = self.lock();
            if state.phase != LoadPhase::Loading || state.identity.as_ref() != Some(identity) {
                return;
            }
            let message = normalize_error_message(message);
            state.last_error = Some(message.clone());
            state.started_at = None;
            self.set_phase(&mut state, LoadPhase::Failed);
            (
                message,
                state.target_handles(),
                state.callbacks.on_error.clone(),
                state.from_queue,
            )
        };

        for target in &targets {
            target.display_placeholder(PlaceholderKind::Error);
        }
        for callback in &callbacks {
            callback(&message);
        }
        self.inner.ctx.emit(&LoadEvent::Error {
            id: self.id(),
            message: message.clone(),
        });
        log::error!("❌ 纹理加载失败 - id={} {}", self.id(), message.replace(self.url(), &redact_url_for_log(self.url())));

        if from_queue {
            self.inner.ctx.schedule_queue_advance(self.id());
        }
    }

    fn set_phase(&self, state: &mut TaskState, phase: LoadPhase) {
        state.phase = phase;
        self.inner.phase_tx.send_replace(phase);
    }

    fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.inner.state.lock().unwrap_or_else(|poisoned| {
            log::error!("❌ 任务状态锁已中毒，继续使用内部数据 - id={}", self.inner.id);
            poisoned.into_inner()
        })
    }
}
