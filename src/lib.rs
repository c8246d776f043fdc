//! # 纹理加载器：库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 调用方 (UI / 渲染层)                      │
//! │                                                          │
//! │  ctx.load(url).into(target).on_complete(..).start()      │
//! │       ↕ 回调 / 全局事件 / finished().await               │
//! └───────┼──────────────────────────────────────────────────┘
//!         ↕
//! ┌───────┼──────────────────────────────────────────────────┐
//! │       ↕            加载核心 (Rust)                        │
//! │                                                          │
//! │  ┌─ loader ───── LoaderContext (进程级共享状态)           │
//! │  │   ├─ task       TextureLoader 状态机                   │
//! │  │   ├─ request    FetchRequest 取回·回退·缩放·写缓存     │
//! │  │   ├─ registry   内存纹理 + 引用计数                    │
//! │  │   └─ queue      全局 FIFO 串行启动                     │
//! │  │                                                       │
//! │  ├─ storage ──── 磁盘缓存 (过期·清理·统计)                │
//! │  ├─ target ───── ImageTarget / 占位图 / 淡入淡出          │
//! │  ├─ texture ──── 纹理句柄 (mip·采样·压缩标记)             │
//! │  └─ platform ─── Transport (reqwest) · ImageCodec (image) │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 统一错误类型 `LoaderError` 与对外文案规范化 |
//! | [`settings`] | 纹理参数、缓存策略、可 JSON 加载的全局配置 |
//! | [`storage`] | 磁盘缓存目录：路径解析、过期判断、清理、统计 |
//! | [`texture`] | 加载结果 `Texture`：共享句柄、mip 链、销毁标记 |
//! | [`platform`] | 传输与编解码边界及默认实现 |
//! | [`loader`] | 加载上下文、任务、请求、注册表、队列、事件 |
//! | [`target`] | 渲染目标能力接口与通用实现 |

pub mod error;
pub mod loader;
pub mod platform;
pub mod settings;
pub mod storage;
pub mod target;
pub mod texture;

pub use error::LoaderError;
pub use loader::{LoadEvent, LoadOutcome, LoadPhase, LoaderContext, LoaderContextBuilder, TextureLoader};
pub use settings::{CacheExpiry, CacheFormat, CacheSettings, LoaderConfig, TextureSettings};
pub use target::{HeadlessSurface, ImageTarget, PlaceholderKind, ScaleMode, TextureTarget};
pub use texture::Texture;
