//! # 加载编排
//!
//! ## 模块结构
//!
//! ```text
//! loader/
//! ├── context.rs   // LoaderContext：注册表、队列、实例列表、在途请求
//! ├── task.rs      // TextureLoader：面向调用方的加载任务与状态机
//! ├── request.rs   // FetchRequest：一次取回（选源/回退/解码/缩放/写缓存）
//! ├── registry.rs  // MemoryRegistry：身份 → (纹理, 引用计数)
//! ├── queue.rs     // LoadQueue：全局 FIFO 串行启动
//! ├── identity.rs  // LoadIdentity：去重与内存缓存的键
//! ├── events.rs    // 全局加载事件
//! └── cancel.rs    // 协作式取消标志
//! ```
//!
//! ## 数据流
//!
//! 任务启动 → 内存注册表 → 在途请求（同身份共享） → 磁盘缓存 / 网络 →
//! 解码缩放 → 注册表登记 → 推送到全部目标 → 回调与全局事件 → 推进队列。

mod cancel;
mod context;
mod events;
pub mod identity;
mod queue;
mod registry;
mod request;
mod task;

/// 任务编号，在同一上下文内唯一且递增。
pub type LoaderId = u64;

pub use cancel::CancelFlag;
pub use context::{LoaderContext, LoaderContextBuilder};
pub use events::{EventBus, LoadEvent, LoadEventPayload, SubscriptionId};
pub use identity::{LoadIdentity, url_hash};
pub use queue::LoadQueue;
pub use registry::{MemoryRegistry, ReleaseOutcome};
pub use task::{LoadOutcome, LoadPhase, TextureLoader};
