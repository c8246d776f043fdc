//! # 通用纹理目标
//!
//! ## 设计思路
//!
//! 在任意 `PaintSurface` 之上实现占位图切换与淡入淡出，渲染面只负责“写像素与透明度”。
//!
//! ## 实现思路
//!
//! `set_texture(Some, transition = true)` 且淡入时长大于 0 时：
//! - 之前显示着纹理或占位图：交叉淡出。显示占位图时占位图透明度 1 → 0，
//!   否则旧纹理放到覆盖层，覆盖层透明度 1 → 0；结束后清空覆盖层并隐藏占位图。
//! - 之前什么都没有：新纹理透明度 0 → 1。
//!
//! 其余情况直接以不透明度 1 显示并隐藏占位图。每次设置纹理都会取消进行中的动画，
//! 动画回调通过代数（generation）校验，过期动画的回调不会生效。

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::animation::{AnimationHandle, lerp01};
use super::placeholder::{LayerPlaceholder, Placeholder};
use super::surface::PaintSurface;
use super::{ImageTarget, PlaceholderKind, ScaleMode, Size, size_for_scale_mode};
use crate::texture::Texture;

#[derive(Default)]
struct Placeholders {
    default: Option<Arc<dyn Placeholder>>,
    loading: Option<Arc<dyn Placeholder>>,
    error: Option<Arc<dyn Placeholder>>,
}

impl Placeholders {
    fn get(&self, kind: PlaceholderKind) -> Option<&Arc<dyn Placeholder>> {
        match kind {
            PlaceholderKind::Default => self.default.as_ref(),
            PlaceholderKind::Loading => self.loading.as_ref(),
            PlaceholderKind::Error => self.error.as_ref(),
        }
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<dyn Placeholder>> {
        [&self.default, &self.loading, &self.error].into_iter().flatten()
    }
}

struct TargetState {
    current: Option<PlaceholderKind>,
    scale_mode: ScaleMode,
    generation: u64,
    animation: Option<AnimationHandle>,
    disposed: bool,
}

struct TargetInner<S> {
    surface: S,
    fade: Duration,
    placeholders: Placeholders,
    owns_placeholders: bool,
    state: Mutex<TargetState>,
}

/// 构建 `TextureTarget`。
pub struct TextureTargetBuilder<S> {
    surface: S,
    fade: Duration,
    scale_mode: ScaleMode,
    placeholders: Placeholders,
    owns_placeholders: bool,
}

impl<S: PaintSurface + 'static> TextureTargetBuilder<S> {
    pub fn fade(mut self, fade: Duration) -> Self {
        self.fade = fade;
        self
    }

    pub fn scale_mode(mut self, scale_mode: ScaleMode) -> Self {
        self.scale_mode = scale_mode;
        self
    }

    /// 由纹理创建占位图层，目标释放时一并释放。
    pub fn placeholder_textures(
        mut self,
        default: Option<Texture>,
        loading: Option<Texture>,
        error: Option<Texture>,
    ) -> Self {
        let layer = |texture: Option<Texture>| {
            texture.map(|t| Arc::new(LayerPlaceholder::new(Some(t))) as Arc<dyn Placeholder>)
        };
        self.placeholders = Placeholders {
            default: layer(default),
            loading: layer(loading),
            error: layer(error),
        };
        self.owns_placeholders = true;
        self
    }

    /// 使用外部已有的占位图，目标释放时不释放它们。
    pub fn shared_placeholders(
        mut self,
        default: Option<Arc<dyn Placeholder>>,
        loading: Option<Arc<dyn Placeholder>>,
        error: Option<Arc<dyn Placeholder>>,
    ) -> Self {
        self.placeholders = Placeholders { default, loading, error };
        self.owns_placeholders = false;
        self
    }

    pub fn build(self) -> TextureTarget<S> {
        for placeholder in self.placeholders.iter() {
            placeholder.set_active(false);
        }

        TextureTarget {
            inner: Arc::new(TargetInner {
                surface: self.surface,
                fade: self.fade,
                placeholders: self.placeholders,
                owns_placeholders: self.owns_placeholders,
                state: Mutex::new(TargetState {
                    current: None,
                    scale_mode: self.scale_mode,
                    generation: 0,
                    animation: None,
                    disposed: false,
                }),
            }),
        }
    }
}

/// 建立在 `PaintSurface` 之上的渲染目标。
pub struct TextureTarget<S> {
    inner: Arc<TargetInner<S>>,
}

impl<S: PaintSurface + 'static> TextureTarget<S> {
    pub fn builder(surface: S) -> TextureTargetBuilder<S> {
        TextureTargetBuilder {
            surface,
            fade: Duration::ZERO,
            scale_mode: ScaleMode::None,
            placeholders: Placeholders::default(),
            owns_placeholders: false,
        }
    }

    /// 无占位图、无淡入的目标。
    pub fn new(surface: S) -> Self {
        Self::builder(surface).build()
    }

    pub fn surface(&self) -> &S {
        &self.inner.surface
    }

    pub fn fade(&self) -> Duration {
        self.inner.fade
    }

    pub fn scale_mode(&self) -> ScaleMode {
        self.inner.lock().scale_mode
    }

    pub fn current_placeholder(&self) -> Option<PlaceholderKind> {
        self.inner.lock().current
    }

    pub fn placeholder(&self, kind: PlaceholderKind) -> Option<Arc<dyn Placeholder>> {
        self.inner.placeholders.get(kind).cloned()
    }

    pub fn is_animating(&self) -> bool {
        self.inner.lock().animation.is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }
}

impl<S: PaintSurface + 'static> TargetInner<S> {
    fn lock(&self) -> MutexGuard<'_, TargetState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn show(&self, state: &mut TargetState, kind: Option<PlaceholderKind>) {
        if let Some(current) = state.current.and_then(|k| self.placeholders.get(k)) {
            current.set_active(false);
        }
        state.current = kind;
        if let Some(next) = kind.and_then(|k| self.placeholders.get(k)) {
            next.set_active(true);
            next.set_alpha(1.0);
        }
    }

    fn stop_animation(&self, state: &mut TargetState) -> u64 {
        if let Some(animation) = state.animation.take() {
            animation.cancel();
        }
        state.generation += 1;
        state.generation
    }

    fn apply_scale(&self, mode: ScaleMode) {
        let Some(parent) = self.surface.parent_size() else {
            return;
        };

        let natural = self.surface.texture().as_ref().map(Size::of);
        self.surface.set_size(size_for_scale_mode(natural, parent, mode));

        for placeholder in self.placeholders.iter() {
            if let Some(texture) = placeholder.texture() {
                placeholder.set_size(size_for_scale_mode(Some(Size::of(&texture)), parent, mode));
            }
        }
    }

    fn crossfade(self: &Arc<Self>, generation: u64) -> AnimationHandle {
        let on_update = {
            let inner = Arc::clone(self);
            move |value: f32| {
                let state = inner.lock();
                if state.generation != generation {
                    return;
                }
                let alpha = 1.0 - value;
                match state.current.and_then(|k| inner.placeholders.get(k)) {
                    Some(placeholder) => placeholder.set_alpha(alpha),
                    None => inner.surface.set_fader_alpha(alpha),
                }
            }
        };
        let on_complete = {
            let inner = Arc::clone(self);
            move || {
                let mut state = inner.lock();
                if state.generation != generation {
                    return;
                }
                inner.surface.set_fader_texture(None);
                inner.show(&mut state, None);
                state.animation = None;
            }
        };
        lerp01(self.fade, on_update, on_complete)
    }

    fn fade_in(self: &Arc<Self>, generation: u64) -> AnimationHandle {
        let on_update = {
            let inner = Arc::clone(self);
            move |value: f32| {
                if inner.lock().generation == generation {
                    inner.surface.set_alpha(value);
                }
            }
        };
        let on_complete = {
            let inner = Arc::clone(self);
            move || {
                let mut state = inner.lock();
                if state.generation == generation {
                    state.animation = None;
                }
            }
        };
        lerp01(self.fade, on_update, on_complete)
    }
}

impl<S: PaintSurface + 'static> ImageTarget for TextureTarget<S> {
    fn set_texture(&self, texture: Option<Texture>, transition: bool) {
        let inner = &self.inner;
        let mut state = inner.lock();
        if state.disposed {
            return;
        }
        let generation = inner.stop_animation(&mut state);

        let Some(texture) = texture else {
            inner.surface.set_texture(None);
            inner.surface.set_fader_texture(None);
            let fallback = inner
                .placeholders
                .get(PlaceholderKind::Default)
                .map(|_| PlaceholderKind::Default);
            inner.show(&mut state, fallback);
            return;
        };

        let previous = inner.surface.texture();
        inner.surface.set_texture(Some(texture));
        inner.apply_scale(state.scale_mode);

        if transition && !inner.fade.is_zero() {
            let showing_placeholder = state.current.and_then(|k| inner.placeholders.get(k)).is_some();
            if previous.is_some() || showing_placeholder {
                let fader = if showing_placeholder { None } else { previous };
                inner.surface.set_alpha(1.0);
                inner.surface.set_fader_texture(fader);
                inner.surface.set_fader_alpha(1.0);
                drop(state);
                let animation = inner.crossfade(generation);
                self.store_animation(generation, animation);
                return;
            }

            inner.surface.set_alpha(0.0);
            drop(state);
            let animation = inner.fade_in(generation);
            self.store_animation(generation, animation);
            return;
        }

        inner.surface.set_alpha(1.0);
        inner.show(&mut state, None);
    }

    fn set_alpha(&self, alpha: f32) {
        self.inner.surface.set_alpha(alpha);
    }

    fn display_placeholder(&self, kind: PlaceholderKind) {
        let inner = &self.inner;
        let mut state = inner.lock();
        if state.disposed {
            return;
        }
        if inner.placeholders.get(kind).is_none() {
            return;
        }
        // 旧淡变不得再改写或隐藏新占位图
        inner.stop_animation(&mut state);
        inner.surface.set_fader_texture(None);
        inner.show(&mut state, Some(kind));
    }

    fn resize_to_fit(&self, mode: ScaleMode) {
        let mut state = self.inner.lock();
        state.scale_mode = mode;
        drop(state);
        self.inner.apply_scale(mode);
    }

    fn dispose(&self) {
        let inner = &self.inner;
        let mut state = inner.lock();
        if state.disposed {
            return;
        }
        inner.stop_animation(&mut state);
        state.disposed = true;
        state.current = None;

        inner.surface.dispose();
        if inner.owns_placeholders {
            for placeholder in inner.placeholders.iter() {
                placeholder.dispose();
            }
        }
    }
}

impl<S: PaintSurface + 'static> TextureTarget<S> {
    /// 动画在锁外启动；若此间又有新的设置，则立即取消刚启动的动画。
    fn store_animation(&self, generation: u64, animation: AnimationHandle) {
        let mut state = self.inner.lock();
        if state.generation == generation && !state.disposed {
            state.animation = Some(animation);
        } else {
            animation.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::TextureSettings;
    use crate::target::HeadlessSurface;
    use image::{ImageBuffer, Rgba};

    fn texture(width: u32, height: u32) -> Texture {
        Texture::build(
            "t",
            ImageBuffer::from_pixel(width, height, Rgba([9, 9, 9, 255])),
            &TextureSettings::default().with_mipmap_chain(false),
        )
    }

    #[test]
    fn instant_swap_hides_placeholder() {
        let target = TextureTarget::builder(HeadlessSurface::new(None))
            .placeholder_textures(Some(texture(4, 4)), Some(texture(4, 4)), None)
            .build();

        target.display_placeholder(PlaceholderKind::Loading);
        assert_eq!(target.current_placeholder(), Some(PlaceholderKind::Loading));

        target.set_texture(Some(texture(8, 8)), true);
        let snapshot = target.surface().snapshot();
        assert_eq!(snapshot.alpha, 1.0);
        assert_eq!(snapshot.texture.map(|t| t.dimensions()), Some((8, 8)));
        assert_eq!(target.current_placeholder(), None);
    }

    #[test]
    fn missing_placeholder_kind_is_ignored() {
        let target = TextureTarget::builder(HeadlessSurface::new(None))
            .placeholder_textures(Some(texture(4, 4)), None, None)
            .build();

        target.display_placeholder(PlaceholderKind::Default);
        target.display_placeholder(PlaceholderKind::Error);
        assert_eq!(target.current_placeholder(), Some(PlaceholderKind::Default));
    }

    #[test]
    fn clearing_texture_returns_to_default_placeholder() {
        let target = TextureTarget::builder(HeadlessSurface::new(None))
            .placeholder_textures(Some(texture(4, 4)), None, None)
            .build();
        target.set_texture(Some(texture(8, 8)), false);
        target.set_texture(None, false);

        assert!(target.surface().snapshot().texture.is_none());
        assert_eq!(target.current_placeholder(), Some(PlaceholderKind::Default));
    }

    #[tokio::test(start_paused = true)]
    async fn fade_in_from_empty_surface() {
        let target = TextureTarget::builder(HeadlessSurface::new(None))
            .fade(Duration::from_millis(100))
            .build();

        target.set_texture(Some(texture(8, 8)), true);
        assert_eq!(target.surface().snapshot().alpha, 0.0);
        assert!(target.is_animating());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(target.surface().snapshot().alpha, 1.0);
        assert!(!target.is_animating());
    }

    #[tokio::test(start_paused = true)]
    async fn crossfade_from_previous_texture_uses_fader() {
        let target = TextureTarget::builder(HeadlessSurface::new(None))
            .fade(Duration::from_millis(100))
            .build();
        let first = texture(8, 8);
        target.set_texture(Some(first.clone()), false);
        target.set_texture(Some(texture(16, 16)), true);

        let during = target.surface().snapshot();
        assert!(during.fader_texture.is_some_and(|t| t.ptr_eq(&first)));
        assert_eq!(during.fader_alpha, 1.0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let after = target.surface().snapshot();
        assert!(after.fader_texture.is_none());
        assert_eq!(after.alpha, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn crossfade_from_placeholder_fades_placeholder_out() {
        let target = TextureTarget::builder(HeadlessSurface::new(None))
            .fade(Duration::from_millis(100))
            .placeholder_textures(None, Some(texture(4, 4)), None)
            .build();
        target.display_placeholder(PlaceholderKind::Loading);
        let loading = target.placeholder(PlaceholderKind::Loading).expect("loading placeholder");

        target.set_texture(Some(texture(8, 8)), true);
        assert!(target.surface().snapshot().fader_texture.is_none());
        assert!(loading.is_active());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!loading.is_active());
        assert_eq!(target.current_placeholder(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn placeholder_shown_mid_crossfade_stays_visible() {
        let loading = Arc::new(LayerPlaceholder::new(Some(texture(4, 4))));
        let target = TextureTarget::builder(HeadlessSurface::new(None))
            .fade(Duration::from_millis(100))
            .shared_placeholders(None, Some(loading.clone() as Arc<dyn Placeholder>), None)
            .build();
        target.set_texture(Some(texture(8, 8)), false);
        target.set_texture(Some(texture(16, 16)), true);
        assert!(target.is_animating());

        tokio::time::sleep(Duration::from_millis(30)).await;
        target.display_placeholder(PlaceholderKind::Loading);
        assert!(!target.is_animating());
        assert!(target.surface().snapshot().fader_texture.is_none());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(target.current_placeholder(), Some(PlaceholderKind::Loading));
        assert!(loading.is_active());
        assert_eq!(loading.alpha(), 1.0);
    }

    #[test]
    fn resize_to_fit_uses_parent_size() {
        let target = TextureTarget::builder(HeadlessSurface::new(Some(Size::new(100.0, 100.0))))
            .scale_mode(ScaleMode::Fit)
            .build();
        target.set_texture(Some(texture(200, 100)), false);
        assert_eq!(target.surface().snapshot().size, Some(Size::new(100.0, 50.0)));

        target.resize_to_fit(ScaleMode::Cover);
        assert_eq!(target.scale_mode(), ScaleMode::Cover);
        assert_eq!(target.surface().snapshot().size, Some(Size::new(200.0, 100.0)));
    }

    #[test]
    fn dispose_releases_owned_placeholders_only() {
        let shared: Arc<dyn Placeholder> = Arc::new(LayerPlaceholder::new(None));
        let shared_target = TextureTarget::builder(HeadlessSurface::new(None))
            .shared_placeholders(Some(Arc::clone(&shared)), None, None)
            .build();
        shared_target.dispose();
        shared.set_active(true);
        assert!(shared.is_active());
        assert!(shared_target.surface().snapshot().disposed);

        let owned_target = TextureTarget::builder(HeadlessSurface::new(None))
            .placeholder_textures(Some(texture(4, 4)), None, None)
            .build();
        let owned = owned_target.placeholder(PlaceholderKind::Default).expect("owned placeholder");
        owned_target.dispose();
        owned.set_active(true);
        assert!(!owned.is_active());
    }
}
