//! 占位图：只需开关可见性与透明度。

use std::sync::Mutex;

use super::Size;
use crate::texture::Texture;

pub trait Placeholder: Send + Sync {
    fn is_active(&self) -> bool;

    fn set_active(&self, active: bool);

    fn set_alpha(&self, alpha: f32);

    /// 占位图自带的纹理（用于按缩放模式计算尺寸）。
    fn texture(&self) -> Option<Texture> {
        None
    }

    fn set_size(&self, _size: Size) {}

    fn dispose(&self);
}

#[derive(Debug, Default)]
struct LayerState {
    active: bool,
    alpha: f32,
    size: Option<Size>,
    disposed: bool,
}

/// 以一张可选纹理 + 透明度表示的占位图层。
#[derive(Debug, Default)]
pub struct LayerPlaceholder {
    texture: Option<Texture>,
    state: Mutex<LayerState>,
}

impl LayerPlaceholder {
    pub fn new(texture: Option<Texture>) -> Self {
        Self {
            texture,
            state: Mutex::new(LayerState::default()),
        }
    }

    pub fn alpha(&self) -> f32 {
        self.with_state(|s| s.alpha)
    }

    pub fn size(&self) -> Option<Size> {
        self.with_state(|s| s.size)
    }

    pub fn is_disposed(&self) -> bool {
        self.with_state(|s| s.disposed)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut LayerState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

impl Placeholder for LayerPlaceholder {
    fn is_active(&self) -> bool {
        self.with_state(|s| s.active && !s.disposed)
    }

    fn set_active(&self, active: bool) {
        self.with_state(|s| {
            if !s.disposed {
                s.active = active;
            }
        });
    }

    fn set_alpha(&self, alpha: f32) {
        self.with_state(|s| s.alpha = alpha.clamp(0.0, 1.0));
    }

    fn texture(&self) -> Option<Texture> {
        self.texture.clone()
    }

    fn set_size(&self, size: Size) {
        self.with_state(|s| s.size = Some(size));
    }

    fn dispose(&self) {
        self.with_state(|s| {
            s.active = false;
            s.disposed = true;
        });
    }
}
