//! # 加载上下文（进程级共享状态）
//!
//! ## 设计思路
//!
//! 内存注册表、加载队列、实例列表与在途请求表都是进程级共享状态，
//! 集中放在可注入的 `LoaderContext` 里：应用启动时创建，`shutdown()` 统一拆除；
//! 测试各自创建实例并注入替身传输层。共享状态的修改都在同一把互斥锁内完成。
//!
//! ## 实现思路
//!
//! - 锁顺序固定：先任务锁，后上下文锁；持有上下文锁时绝不获取任务锁。
//! - 用户回调、全局事件、目标调用都在释放锁之后执行（先收集，后调用）。
//! - 在途请求按身份去重：同一身份最多一个 `FetchRequest`，多个任务以订阅者身份共享；
//!   每个请求带递增序号，过期序号的结果被丢弃。
//! - 队列推进：完成路径先让出一次调度再推进，取消路径立即推进。

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;

use super::LoaderId;
use super::cancel::CancelFlag;
use super::events::{EventBus, LoadEvent, SubscriptionId};
use super::identity::LoadIdentity;
use super::queue::LoadQueue;
use super::registry::{MemoryRegistry, ReleaseOutcome};
use super::request::{FetchPlan, FetchRequest, RequestEvent};
use super::task::TextureLoader;
use crate::error::LoaderError;
use crate::platform::{HttpTransport, ImageCodec, StandardCodec, Transport};
use crate::settings::{LoaderConfig, TextureSettings};
use crate::storage::{CacheInfo, CacheStore};
use crate::texture::Texture;

struct InFlight {
    seq: u64,
    cancel: Arc<CancelFlag>,
    subscribers: Vec<LoaderId>,
}

#[derive(Default)]
struct SharedState {
    registry: MemoryRegistry,
    queue: LoadQueue,
    instances: BTreeMap<LoaderId, TextureLoader>,
    requests: HashMap<LoadIdentity, InFlight>,
    shut_down: bool,
}

struct ContextInner {
    config: LoaderConfig,
    cache: CacheStore,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn ImageCodec>,
    runtime: Handle,
    events: EventBus,
    state: Mutex<SharedState>,
    next_loader_id: AtomicU64,
    next_request_seq: AtomicU64,
}

/// 任务发起取回时的结果。
pub(crate) enum BeginFetch {
    /// 内存命中，计数已 +1
    MemoryHit(Texture),
    /// 已发起新请求或加入同身份的在途请求
    Subscribed,
    /// 上下文已关闭，未发起请求
    Closed,
}

/// 进程级加载上下文，克隆开销为一次 `Arc` 计数。
///
/// ```rust,no_run
/// use texture_loader::{LoaderConfig, LoaderContext};
///
/// # async fn demo() -> Result<(), texture_loader::LoaderError> {
/// let ctx = LoaderContext::new(LoaderConfig::default())?;
/// let loader = ctx.load("https://example.com/cover.png").on_progress(|p| println!("{p:.2}"));
/// loader.start(false);
/// let outcome = loader.finished().await;
/// println!("{outcome:?}");
/// ctx.shutdown();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LoaderContext {
    inner: Arc<ContextInner>,
}

/// `LoaderContext` 构建器，可替换传输层、编解码器、缓存目录与运行时。
pub struct LoaderContextBuilder {
    config: LoaderConfig,
    transport: Option<Arc<dyn Transport>>,
    codec: Option<Arc<dyn ImageCodec>>,
    cache_store: Option<CacheStore>,
    runtime: Option<Handle>,
}

impl LoaderContextBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn codec(mut self, codec: Arc<dyn ImageCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn cache_store(mut self, cache_store: CacheStore) -> Self {
        self.cache_store = Some(cache_store);
        self
    }

    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<LoaderContext, LoaderError> {
        self.config.validate()?;

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()
                .map_err(|e| LoaderError::Config(format!("未检测到 tokio 运行时：{}", e)))?,
        };
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&self.config)?),
        };
        let codec = self
            .codec
            .unwrap_or_else(|| Arc::new(StandardCodec::from_config(&self.config)));
        let cache = match self.cache_store {
            Some(cache) => cache,
            None => CacheStore::from_config(&self.config)?,
        };

        log::info!("🚀 纹理加载上下文已创建 - 缓存目录: {}", cache.dir().display());

        Ok(LoaderContext {
            inner: Arc::new(ContextInner {
                config: self.config,
                cache,
                transport,
                codec,
                runtime,
                events: EventBus::new(),
                state: Mutex::new(SharedState::default()),
                next_loader_id: AtomicU64::new(0),
                next_request_seq: AtomicU64::new(0),
            }),
        })
    }
}

impl LoaderContext {
    /// 使用默认传输层与编解码器创建上下文（需在 tokio 运行时内调用）。
    pub fn new(config: LoaderConfig) -> Result<Self, LoaderError> {
        Self::builder(config).build()
    }

    pub fn builder(config: LoaderConfig) -> LoaderContextBuilder {
        LoaderContextBuilder {
            config,
            transport: None,
            codec: None,
            cache_store: None,
            runtime: None,
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    /// 以配置中的默认纹理参数创建任务（不会发起网络活动）。
    pub fn load(&self, url: impl Into<String>) -> TextureLoader {
        self.load_with(url, self.inner.config.texture.clone())
    }

    pub fn load_with(&self, url: impl Into<String>, settings: TextureSettings) -> TextureLoader {
        let id = self.inner.next_loader_id.fetch_add(1, Ordering::Relaxed) + 1;
        let loader = TextureLoader::new(
            id,
            url.into(),
            settings.validate(),
            self.inner.config.cache.to_settings(),
            self.clone(),
        );

        let mut state = self.lock();
        if state.shut_down {
            log::warn!("⚠️ 上下文已关闭，新任务不会被登记 - id={}", id);
        } else {
            state.instances.insert(id, loader.clone());
        }
        loader
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&LoadEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// 启动所有已登记任务。
    pub fn start_all(&self, enqueue: bool) {
        for loader in self.instances_snapshot() {
            loader.start(enqueue);
        }
    }

    pub fn cancel_all(&self) {
        for loader in self.instances_snapshot() {
            loader.cancel();
        }
    }

    pub fn dispose_all(&self) {
        for loader in self.instances_snapshot() {
            loader.dispose();
        }
    }

    /// 清理磁盘缓存；`older_than` 为空时删除全部。
    pub async fn clear_cache(&self, older_than: Option<Duration>) -> usize {
        self.inner.cache.clear_all(older_than).await
    }

    /// 删除某个 URL 的磁盘缓存；`size` 为空时删除全部尺寸变体。
    pub async fn clear_cache_for(&self, url: &str, size: Option<u32>) -> usize {
        self.inner.cache.clear_for(url, size).await
    }

    pub fn cache_info(&self) -> CacheInfo {
        self.inner.cache.info()
    }

    pub fn cache_dir(&self) -> &std::path::Path {
        self.inner.cache.dir()
    }

    /// 某个 URL + 参数组合在内存注册表中的引用计数（不存在为 0）。
    pub fn ref_count(&self, url: &str, settings: &TextureSettings) -> usize {
        let identity = LoadIdentity::new(url, &settings.clone().validate());
        self.lock().registry.ref_count(&identity)
    }

    pub fn memory_len(&self) -> usize {
        self.lock().registry.len()
    }

    pub fn queue_len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn instance_count(&self) -> usize {
        self.lock().instances.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }

    /// 释放全部任务、中止在途请求、销毁内存纹理并清空监听者。可重复调用。
    pub fn shutdown(&self) {
        if self.is_shut_down() {
            return;
        }

        self.dispose_all();

        let leftover = {
            let mut state = self.lock();
            state.shut_down = true;
            for (_, request) in state.requests.drain() {
                request.cancel.cancel();
            }
            state.queue.clear();
            state.registry.clear();
            std::mem::take(&mut state.instances)
        };
        drop(leftover);

        self.inner.events.clear();
        log::info!("🧹 纹理加载上下文已关闭");
    }

    pub(crate) fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.inner.transport)
    }

    pub(crate) fn codec(&self) -> Arc<dyn ImageCodec> {
        Arc::clone(&self.inner.codec)
    }

    pub(crate) fn cache_store(&self) -> &CacheStore {
        &self.inner.cache
    }

    pub(crate) fn emit(&self, event: &LoadEvent) {
        self.inner.events.emit(event);
    }

    pub(crate) fn unregister_instance(&self, id: LoaderId) {
        let removed = self.lock().instances.remove(&id);
        drop(removed);
    }

    /// 内存命中则直接返回；否则订阅同身份的在途请求，没有则发起新请求。
    pub(crate) fn begin_fetch(&self, identity: &LoadIdentity, loader: LoaderId, plan: FetchPlan) -> BeginFetch {
        let request = {
            let mut state = self.lock();
            if let Some(texture) = state.registry.try_get(identity) {
                return BeginFetch::MemoryHit(texture);
            }

            if let Some(in_flight) = state.requests.get_mut(identity) {
                if !in_flight.subscribers.contains(&loader) {
                    in_flight.subscribers.push(loader);
                }
                log::debug!("🔗 加入在途请求 - {} 订阅者={}", identity, in_flight.subscribers.len());
                return BeginFetch::Subscribed;
            }

            if state.shut_down {
                return BeginFetch::Closed;
            }

            let seq = self.inner.next_request_seq.fetch_add(1, Ordering::Relaxed) + 1;
            let cancel = Arc::new(CancelFlag::new());
            state.requests.insert(
                identity.clone(),
                InFlight {
                    seq,
                    cancel: Arc::clone(&cancel),
                    subscribers: vec![loader],
                },
            );

            FetchRequest {
                identity: identity.clone(),
                seq,
                plan,
                cancel,
                ctx: self.clone(),
            }
        };

        self.inner.runtime.spawn(request.run());
        BeginFetch::Subscribed
    }

    /// 任务退订在途请求；最后一个订阅者离开时中止请求。
    pub(crate) fn unsubscribe_request(&self, identity: &LoadIdentity, loader: LoaderId) {
        let mut state = self.lock();
        let Some(in_flight) = state.requests.get_mut(identity) else {
            return;
        };

        in_flight.subscribers.retain(|id| *id != loader);
        if in_flight.subscribers.is_empty() {
            in_flight.cancel.cancel();
            state.requests.remove(identity);
            log::debug!("🛑 在途请求已无订阅者，中止 - {}", identity);
        }
    }

    /// 把请求事件分发给当前订阅者。返回是否有任务接收了结果。
    pub(crate) fn dispatch(&self, identity: &LoadIdentity, seq: u64, event: RequestEvent) -> bool {
        let terminal = !matches!(event, RequestEvent::Progress(_));
        let subscribers: Vec<TextureLoader> = {
            let mut state = self.lock();
            let ids = match state.requests.get(identity) {
                Some(in_flight) if in_flight.seq == seq => in_flight.subscribers.clone(),
                _ => return false,
            };
            if terminal {
                state.requests.remove(identity);
            }
            ids.iter().filter_map(|id| state.instances.get(id).cloned()).collect()
        };

        match event {
            RequestEvent::Progress(progress) => {
                for loader in &subscribers {
                    loader.report_progress(identity, progress);
                }
                !subscribers.is_empty()
            }
            RequestEvent::Complete(texture) => {
                let mut delivered = false;
                for loader in &subscribers {
                    delivered |= loader.handle_complete(identity, texture.clone(), false);
                }
                delivered
            }
            RequestEvent::Error(message) => {
                for loader in &subscribers {
                    loader.handle_error(identity, &message);
                }
                !subscribers.is_empty()
            }
        }
    }

    /// 请求以取消结束：仅清理在途记录。
    pub(crate) fn finish_request(&self, identity: &LoadIdentity, seq: u64) {
        let mut state = self.lock();
        if state.requests.get(identity).is_some_and(|r| r.seq == seq) {
            state.requests.remove(identity);
        }
    }

    /// 登记新纹理（已存在则复用并 +1），返回注册表里的那一份。
    pub(crate) fn register_texture(&self, identity: &LoadIdentity, texture: Texture) -> Texture {
        self.lock().registry.insert(identity.clone(), texture)
    }

    pub(crate) fn release_texture(&self, identity: &LoadIdentity) {
        let outcome = self.lock().registry.release(identity);
        match outcome {
            ReleaseOutcome::Retained(count) => log::debug!("♻️ 释放纹理引用 - {} 剩余={}", identity, count),
            ReleaseOutcome::Destroyed => log::info!("🧹 纹理已销毁 - {}", identity),
            ReleaseOutcome::Missing => log::warn!("⚠️ 释放不存在的纹理引用 - {}", identity),
        }
    }

    pub(crate) fn enqueue(&self, loader: LoaderId) {
        let waiting = {
            let mut state = self.lock();
            if !state.queue.enqueue(loader) {
                return;
            }
            log::info!("📥 任务入队 - id={} 队列长度={}", loader, state.queue.len());
            state.queue.is_waiting()
        };

        if !waiting {
            self.start_next_in_queue();
        }
    }

    /// 取消时调用：仍在队列中则移除；若是最近出队的任务则立即推进队列。
    pub(crate) fn withdraw_from_queue(&self, loader: LoaderId) {
        let released = {
            let mut state = self.lock();
            if state.queue.remove(loader) {
                log::debug!("📥 任务移出队列 - id={}", loader);
                return;
            }
            state.queue.release(loader)
        };

        if released {
            self.start_next_in_queue();
        }
    }

    /// 完成/失败时调用：让出一次调度，再释放队列占位并启动下一个。
    pub(crate) fn schedule_queue_advance(&self, loader: LoaderId) {
        let ctx = self.clone();
        self.inner.runtime.spawn(async move {
            tokio::task::yield_now().await;
            let released = ctx.lock().queue.release(loader);
            if released {
                ctx.start_next_in_queue();
            }
        });
    }

    fn start_next_in_queue(&self) {
        loop {
            let (id, loader) = {
                let mut state = self.lock();
                let Some(id) = state.queue.dequeue() else {
                    return;
                };
                (id, state.instances.get(&id).cloned())
            };

            log::debug!("📥 任务出队 - id={}", id);
            if loader.is_some_and(|loader| loader.start_from_queue()) {
                return;
            }

            self.lock().queue.release(id);
        }
    }

    fn instances_snapshot(&self) -> Vec<TextureLoader> {
        self.lock().instances.values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.inner.state.lock().unwrap_or_else(|poisoned| {
            log::error!("❌ 加载上下文状态锁已中毒，继续使用内部数据");
            poisoned.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_after_shutdown_is_closed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = LoaderConfig::default();
        config.cache_root = Some(dir.path().to_path_buf());
        let ctx = LoaderContext::new(config).expect("context");
        ctx.shutdown();

        let url = "https://cdn.example.com/late.png";
        let settings = TextureSettings::default();
        let plan = FetchPlan {
            url: url.to_string(),
            settings: settings.clone(),
            cache: ctx.inner.config.cache.to_settings(),
        };
        let identity = LoadIdentity::new(url, &settings);

        assert!(matches!(ctx.begin_fetch(&identity, 1, plan), BeginFetch::Closed));
        assert!(ctx.lock().requests.is_empty());
    }
}
