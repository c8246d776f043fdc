//! 全局加载事件。
//!
//! 任意数量的外部观察者（统计、调试面板）可订阅；事件在释放内部锁之后同步回调，
//! 观察者在回调里再次调用加载器 API 不会死锁。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use super::LoaderId;
use crate::texture::Texture;

pub type SubscriptionId = u64;

type Listener = Arc<dyn Fn(&LoadEvent) + Send + Sync>;

#[derive(Debug, Clone)]
pub enum LoadEvent {
    Start { id: LoaderId, url: String },
    Progress { id: LoaderId, progress: f32 },
    Cancel { id: LoaderId },
    Complete { id: LoaderId, texture: Texture },
    Error { id: LoaderId, message: String },
}

impl LoadEvent {
    pub fn loader_id(&self) -> LoaderId {
        match self {
            Self::Start { id, .. }
            | Self::Progress { id, .. }
            | Self::Cancel { id }
            | Self::Complete { id, .. }
            | Self::Error { id, .. } => *id,
        }
    }

    /// 可序列化的事件摘要，供日志或外部上报使用。
    pub fn payload(&self) -> LoadEventPayload {
        let mut payload = LoadEventPayload {
            loader_id: self.loader_id(),
            kind: "start",
            url: None,
            progress: None,
            width: None,
            height: None,
            message: None,
        };
        match self {
            Self::Start { url, .. } => payload.url = Some(url.clone()),
            Self::Progress { progress, .. } => {
                payload.kind = "progress";
                payload.progress = Some(*progress);
            }
            Self::Cancel { .. } => payload.kind = "cancel",
            Self::Complete { texture, .. } => {
                payload.kind = "complete";
                payload.progress = Some(1.0);
                payload.width = Some(texture.width());
                payload.height = Some(texture.height());
            }
            Self::Error { message, .. } => {
                payload.kind = "error";
                payload.message = Some(message.clone());
            }
        }
        payload
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadEventPayload {
    pub loader_id: LoaderId,
    pub kind: &'static str,
    pub url: Option<String>,
    pub progress: Option<f32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub message: Option<String>,
}

#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&LoadEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut guard = self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut guard = self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = guard.len();
        guard.retain(|(sub, _)| *sub != id);
        before != guard.len()
    }

    pub fn emit(&self, event: &LoadEvent) {
        let listeners: Vec<Listener> = {
            let guard = self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in listeners {
            listener(event);
        }
    }

    pub fn clear(&self) {
        let mut guard = self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .map(|guard| guard.len())
            .unwrap_or(0)
    }
}
