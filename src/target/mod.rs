//! # 渲染目标
//!
//! ## 设计思路
//!
//! 加载核心只认识一个能力接口 `ImageTarget`：设置纹理（可带过渡）、设置透明度、
//! 显示某类占位图、按缩放模式适配尺寸、释放。具体渲染面（UI 控件、精灵、离屏缓冲）
//! 通过实现 `PaintSurface` 接入通用的 `TextureTarget`，不需要继承层级。
//!
//! ## 模块结构
//!
//! ```text
//! target/
//! ├── mod.rs             // ImageTarget / PlaceholderKind / ScaleMode / 尺寸计算
//! ├── placeholder.rs     // Placeholder 能力接口 + LayerPlaceholder
//! ├── surface.rs         // PaintSurface 能力接口 + HeadlessSurface
//! ├── texture_target.rs  // TextureTarget：占位图切换与淡入淡出
//! └── animation.rs       // 0→1 插值动画（可取消）
//! ```

mod animation;
mod placeholder;
mod surface;
mod texture_target;

use serde::{Deserialize, Serialize};

use crate::texture::Texture;

pub use animation::{AnimationHandle, FRAME_INTERVAL, lerp01};
pub use placeholder::{LayerPlaceholder, Placeholder};
pub use surface::{HeadlessSurface, PaintSurface, SurfaceSnapshot};
pub use texture_target::{TextureTarget, TextureTargetBuilder};

/// 占位图种类。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderKind {
    Default,
    Loading,
    Error,
}

/// 纹理相对父容器的缩放模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleMode {
    /// 原始尺寸
    #[default]
    None,
    /// 拉伸铺满父容器
    Stretch,
    /// 保持比例，完整放入父容器
    Fit,
    /// 保持比例，完全覆盖父容器（可能溢出）
    Cover,
    /// `None` 与 `Fit` 中面积较小者
    ScaleDown,
}

/// 二维尺寸（逻辑像素）。
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn of(texture: &Texture) -> Self {
        let (width, height) = texture.dimensions();
        Self::new(width as f32, height as f32)
    }

    pub fn area(self) -> f32 {
        self.width * self.height
    }
}

/// 可显示纹理、淡入淡出并切换占位图的渲染目标。
///
/// 所有方法都以 `&self` 调用，实现方自行处理内部可变性；
/// 加载任务总是在释放自身锁之后调用这些方法。
pub trait ImageTarget: Send + Sync {
    /// 设置纹理；`None` 回到默认占位图。`transition` 为真且配置了淡入时长时执行过渡。
    fn set_texture(&self, texture: Option<Texture>, transition: bool);

    fn set_alpha(&self, alpha: f32);

    /// 显示指定占位图；已是当前占位图时无操作。
    fn display_placeholder(&self, kind: PlaceholderKind);

    fn resize_to_fit(&self, mode: ScaleMode);

    fn dispose(&self);
}

/// 按缩放模式计算目标尺寸。`natural` 为空（没有纹理）时铺满父容器。
pub fn size_for_scale_mode(natural: Option<Size>, parent: Size, mode: ScaleMode) -> Size {
    let Some(natural) = natural.filter(|n| n.width > 0.0 && n.height > 0.0) else {
        return parent;
    };

    let width_ratio = parent.width / natural.width;
    let height_ratio = parent.height / natural.height;

    match mode {
        ScaleMode::Stretch => parent,
        ScaleMode::None => natural,
        ScaleMode::Fit => scaled(natural, width_ratio.min(height_ratio)),
        ScaleMode::Cover => scaled(natural, width_ratio.max(height_ratio)),
        ScaleMode::ScaleDown => {
            let fit = scaled(natural, width_ratio.min(height_ratio));
            if natural.area() <= fit.area() { natural } else { fit }
        }
    }
}

fn scaled(size: Size, factor: f32) -> Size {
    Size::new(size.width * factor, size.height * factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EPS: f32 = 1e-3;

    #[test]
    fn fit_and_cover_follow_aspect_ratio() {
        let natural = Some(Size::new(200.0, 100.0));
        let parent = Size::new(100.0, 100.0);

        assert_eq!(size_for_scale_mode(natural, parent, ScaleMode::Fit), Size::new(100.0, 50.0));
        assert_eq!(size_for_scale_mode(natural, parent, ScaleMode::Cover), Size::new(200.0, 100.0));
        assert_eq!(size_for_scale_mode(natural, parent, ScaleMode::Stretch), parent);
        assert_eq!(size_for_scale_mode(natural, parent, ScaleMode::None), Size::new(200.0, 100.0));
    }

    #[test]
    fn scale_down_never_enlarges() {
        let small = Some(Size::new(10.0, 20.0));
        let parent = Size::new(100.0, 100.0);
        assert_eq!(size_for_scale_mode(small, parent, ScaleMode::ScaleDown), Size::new(10.0, 20.0));

        let large = Some(Size::new(400.0, 200.0));
        assert_eq!(size_for_scale_mode(large, parent, ScaleMode::ScaleDown), Size::new(100.0, 50.0));
    }

    #[test]
    fn missing_texture_fills_parent() {
        let parent = Size::new(30.0, 40.0);
        assert_eq!(size_for_scale_mode(None, parent, ScaleMode::Fit), parent);
    }

    proptest! {
        #[test]
        fn fit_stays_inside_and_cover_covers(
            w in 1.0f32..4000.0,
            h in 1.0f32..4000.0,
            pw in 1.0f32..4000.0,
            ph in 1.0f32..4000.0,
        ) {
            let natural = Some(Size::new(w, h));
            let parent = Size::new(pw, ph);

            let fit = size_for_scale_mode(natural, parent, ScaleMode::Fit);
            prop_assert!(fit.width <= pw * (1.0 + EPS) && fit.height <= ph * (1.0 + EPS));
            prop_assert!((fit.width - pw).abs() <= pw * EPS || (fit.height - ph).abs() <= ph * EPS);

            let cover = size_for_scale_mode(natural, parent, ScaleMode::Cover);
            prop_assert!(cover.width >= pw * (1.0 - EPS) && cover.height >= ph * (1.0 - EPS));

            let down = size_for_scale_mode(natural, parent, ScaleMode::ScaleDown);
            prop_assert!(down.area() <= natural.map(Size::area).unwrap_or(0.0) * (1.0 + EPS));
            prop_assert!(down.area() <= fit.area() * (1.0 + EPS));
        }
    }
}
