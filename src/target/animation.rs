//! 0→1 线性插值动画。
//!
//! 启动前先让出一次调度，给紧随其后的同步取消/释放留出生效机会；
//! 之后按固定帧间隔推进，取消后不再回调。没有 tokio 运行时时直接跳到终态。

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::loader::CancelFlag;

/// 动画帧间隔（约 60 FPS）。
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// 运行中动画的句柄；丢弃句柄不会停止动画，需显式 `cancel()`。
#[derive(Debug, Clone)]
pub struct AnimationHandle {
    cancel: Arc<CancelFlag>,
}

impl AnimationHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// 在 `duration` 内把进度从 0 推进到 1，每帧回调 `on_update`，结束时回调 `on_complete`。
pub fn lerp01<U, C>(duration: Duration, on_update: U, on_complete: C) -> AnimationHandle
where
    U: Fn(f32) + Send + 'static,
    C: FnOnce() + Send + 'static,
{
    let cancel = Arc::new(CancelFlag::new());
    let handle = AnimationHandle {
        cancel: Arc::clone(&cancel),
    };

    let Ok(runtime) = Handle::try_current() else {
        on_update(1.0);
        on_complete();
        return handle;
    };

    runtime.spawn(async move {
        tokio::task::yield_now().await;
        if cancel.is_cancelled() {
            return;
        }

        let started = Instant::now();
        let mut ticker = tokio::time::interval(FRAME_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => return,
            }

            let value = if duration.is_zero() {
                1.0
            } else {
                (started.elapsed().as_secs_f32() / duration.as_secs_f32()).min(1.0)
            };
            on_update(value);
            if value >= 1.0 {
                break;
            }
        }

        if !cancel.is_cancelled() {
            on_complete();
        }
    });

    handle
}
