//! 绘制面：`TextureTarget` 写入像素与透明度的最底层接口。
//!
//! `HeadlessSurface` 只记录状态，供无界面渲染、离屏导出与测试使用。

use std::sync::Mutex;

use super::Size;
use crate::texture::Texture;

pub trait PaintSurface: Send + Sync {
    fn set_texture(&self, texture: Option<Texture>);

    fn texture(&self) -> Option<Texture>;

    fn set_alpha(&self, alpha: f32);

    /// 淡入淡出覆盖层（显示上一张纹理）。
    fn set_fader_texture(&self, texture: Option<Texture>);

    fn set_fader_alpha(&self, alpha: f32);

    fn set_size(&self, size: Size);

    /// 父容器尺寸；没有父容器时无法适配尺寸。
    fn parent_size(&self) -> Option<Size>;

    /// 拆除覆盖层等附属资源。
    fn dispose(&self);
}

/// `HeadlessSurface` 的状态快照。
#[derive(Debug, Clone, Default)]
pub struct SurfaceSnapshot {
    pub texture: Option<Texture>,
    pub alpha: f32,
    pub fader_texture: Option<Texture>,
    pub fader_alpha: f32,
    pub size: Option<Size>,
    pub parent: Option<Size>,
    pub texture_sets: usize,
    pub disposed: bool,
}

#[derive(Debug, Default)]
pub struct HeadlessSurface {
    state: Mutex<SurfaceSnapshot>,
}

impl HeadlessSurface {
    pub fn new(parent: Option<Size>) -> Self {
        Self {
            state: Mutex::new(SurfaceSnapshot {
                parent,
                alpha: 1.0,
                ..SurfaceSnapshot::default()
            }),
        }
    }

    pub fn snapshot(&self) -> SurfaceSnapshot {
        self.with_state(|s| s.clone())
    }

    pub fn set_parent_size(&self, parent: Option<Size>) {
        self.with_state(|s| s.parent = parent);
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SurfaceSnapshot) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

impl PaintSurface for HeadlessSurface {
    fn set_texture(&self, texture: Option<Texture>) {
        self.with_state(|s| {
            if texture.is_some() {
                s.texture_sets += 1;
            }
            s.texture = texture;
        });
    }

    fn texture(&self) -> Option<Texture> {
        self.with_state(|s| s.texture.clone())
    }

    fn set_alpha(&self, alpha: f32) {
        self.with_state(|s| s.alpha = alpha.clamp(0.0, 1.0));
    }

    fn set_fader_texture(&self, texture: Option<Texture>) {
        self.with_state(|s| s.fader_texture = texture);
    }

    fn set_fader_alpha(&self, alpha: f32) {
        self.with_state(|s| s.fader_alpha = alpha.clamp(0.0, 1.0));
    }

    fn set_size(&self, size: Size) {
        self.with_state(|s| s.size = Some(size));
    }

    fn parent_size(&self) -> Option<Size> {
        self.with_state(|s| s.parent)
    }

    fn dispose(&self) {
        self.with_state(|s| {
            s.fader_texture = None;
            s.fader_alpha = 0.0;
            s.disposed = true;
        });
    }
}
