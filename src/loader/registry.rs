//! 内存纹理注册表。
//!
//! 身份 → (纹理, 引用计数)。计数始终 ≥ 1；归零的那一次释放同时移除条目并销毁纹理，
//! 由上下文的互斥锁保证该操作对其他调用方是原子的。

use std::collections::HashMap;

use super::identity::LoadIdentity;
use crate::texture::Texture;

struct Entry {
    texture: Texture,
    count: usize,
}

/// 释放结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// 仍有其他持有者，附剩余计数
    Retained(usize),
    /// 最后一个持有者释放，纹理已销毁
    Destroyed,
    Missing,
}

#[derive(Default)]
pub struct MemoryRegistry {
    entries: HashMap<LoadIdentity, Entry>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 命中时计数 +1 并返回纹理。
    pub fn try_get(&mut self, identity: &LoadIdentity) -> Option<Texture> {
        let entry = self.entries.get_mut(identity)?;
        entry.count += 1;
        Some(entry.texture.clone())
    }

    /// 插入新纹理（计数为 1）；已存在时等价于 `try_get`，返回注册表里的那一份。
    pub fn insert(&mut self, identity: LoadIdentity, texture: Texture) -> Texture {
        if let Some(existing) = self.try_get(&identity) {
            if !existing.ptr_eq(&texture) {
                texture.destroy();
            }
            return existing;
        }

        self.entries.insert(
            identity,
            Entry {
                texture: texture.clone(),
                count: 1,
            },
        );
        texture
    }

    /// 计数 -1；归零时移除条目并销毁纹理。
    pub fn release(&mut self, identity: &LoadIdentity) -> ReleaseOutcome {
        let Some(entry) = self.entries.get_mut(identity) else {
            return ReleaseOutcome::Missing;
        };

        entry.count -= 1;
        if entry.count > 0 {
            return ReleaseOutcome::Retained(entry.count);
        }

        if let Some(entry) = self.entries.remove(identity) {
            entry.texture.destroy();
        }
        ReleaseOutcome::Destroyed
    }

    pub fn ref_count(&self, identity: &LoadIdentity) -> usize {
        self.entries.get(identity).map(|e| e.count).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 清空并销毁全部纹理（上下文关闭时调用）。
    pub fn clear(&mut self) {
        for (_, entry) in self.entries.drain() {
            entry.texture.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::TextureSettings;
    use image::{ImageBuffer, Rgba};
    use proptest::prelude::*;

    fn texture() -> Texture {
        Texture::build(
            "t",
            ImageBuffer::from_pixel(2, 2, Rgba([1, 2, 3, 255])),
            &TextureSettings::default().with_mipmap_chain(false),
        )
    }

    #[test]
    fn insert_then_release_destroys_once() {
        let mut registry = MemoryRegistry::new();
        let id = LoadIdentity::new("u", &TextureSettings::default());
        let tex = registry.insert(id.clone(), texture());

        assert_eq!(registry.ref_count(&id), 1);
        assert_eq!(registry.release(&id), ReleaseOutcome::Destroyed);
        assert!(tex.is_destroyed());
        assert!(registry.is_empty());
        assert_eq!(registry.release(&id), ReleaseOutcome::Missing);
    }

    #[test]
    fn duplicate_insert_reuses_existing_texture() {
        let mut registry = MemoryRegistry::new();
        let id = LoadIdentity::new("u", &TextureSettings::default());
        let first = registry.insert(id.clone(), texture());
        let duplicate = texture();
        let second = registry.insert(id.clone(), duplicate.clone());

        assert!(first.ptr_eq(&second));
        assert!(duplicate.is_destroyed());
        assert_eq!(registry.ref_count(&id), 2);
    }

    proptest! {
        #[test]
        fn n_holders_release_exactly_once(holders in 1usize..32) {
            let mut registry = MemoryRegistry::new();
            let id = LoadIdentity::new("shared", &TextureSettings::default());
            let tex = registry.insert(id.clone(), texture());
            for _ in 1..holders {
                prop_assert!(registry.try_get(&id).is_some());
            }
            prop_assert_eq!(registry.ref_count(&id), holders);

            for remaining in (1..holders).rev() {
                prop_assert_eq!(registry.release(&id), ReleaseOutcome::Retained(remaining));
                prop_assert!(!tex.is_destroyed());
            }
            prop_assert_eq!(registry.release(&id), ReleaseOutcome::Destroyed);
            prop_assert!(tex.is_destroyed());
            prop_assert!(registry.is_empty());
        }
    }
}
