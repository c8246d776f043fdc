//! 全局 FIFO 加载队列。
//!
//! 只记录任务 id，不持有任务本身；“启动”由上下文在释放锁之后执行。
//! `waiting` 为真表示有一个出队任务在途，此时新入队的任务只排队不启动。

use std::collections::VecDeque;

use super::LoaderId;

#[derive(Debug, Default)]
pub struct LoadQueue {
    pending: VecDeque<LoaderId>,
    waiting: bool,
    last_dequeued: Option<LoaderId>,
}

impl LoadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: LoaderId) -> bool {
        self.pending.contains(&id)
    }

    /// 入队；已存在时忽略并返回 `false`。
    pub fn enqueue(&mut self, id: LoaderId) -> bool {
        if self.contains(id) {
            return false;
        }
        self.pending.push_back(id);
        true
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    /// 弹出队头并进入 waiting 状态。waiting 中或队列为空时返回 `None`。
    pub fn dequeue(&mut self) -> Option<LoaderId> {
        if self.waiting {
            return None;
        }
        let id = self.pending.pop_front()?;
        self.waiting = true;
        self.last_dequeued = Some(id);
        Some(id)
    }

    /// 从队列中移除尚未启动的任务。
    pub fn remove(&mut self, id: LoaderId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|pending| *pending != id);
        before != self.pending.len()
    }

    /// 最近出队的任务结束（完成/失败/取消）：清除标记并退出 waiting。
    pub fn release(&mut self, id: LoaderId) -> bool {
        if self.last_dequeued != Some(id) {
            return false;
        }
        self.last_dequeued = None;
        self.waiting = false;
        true
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.waiting = false;
        self.last_dequeued = None;
    }
}
