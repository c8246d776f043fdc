//! 加载身份（identity）。
//!
//! 身份 = URL 哈希 + 尺寸上限 + mip + 可读 + 寻址 + 过滤 + 压缩，
//! 是内存注册表与在途请求去重的键。

use std::fmt;

use sha2::{Digest, Sha256};

use crate::settings::TextureSettings;

/// URL 的 SHA-256 十六进制摘要（小写）。
pub fn url_hash(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(64);
    for &b in digest.iter() {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoadIdentity {
    hash: String,
    key: String,
}

impl LoadIdentity {
    pub fn new(url: &str, settings: &TextureSettings) -> Self {
        let hash = url_hash(url);
        let key = format!(
            "{}-{}-{}-{}-{}-{}-{}",
            hash,
            settings.max_size,
            u8::from(settings.mipmap_chain),
            u8::from(settings.readable),
            settings.wrap_mode,
            settings.filter_mode,
            settings.compression
        );
        Self { hash, key }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for LoadIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{TextureCompression, WrapMode, FilterMode};

    #[test]
    fn hash_is_stable_hex() {
        let hash = url_hash("https://x/img.png");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(hash, url_hash("https://x/img.png"));
        assert_ne!(hash, url_hash("https://x/img2.png"));
    }

    #[test]
    fn identity_encodes_processing_settings() {
        let settings = TextureSettings::default().with_max_size(512);
        let identity = LoadIdentity::new("https://x/img.png", &settings);
        assert_eq!(
            identity.as_str(),
            format!("{}-512-1-0-Clamp-Bilinear-NormalQuality", url_hash("https://x/img.png"))
        );
    }

    #[test]
    fn identity_differs_by_settings_but_ignores_aniso() {
        let base = TextureSettings::default();
        let a = LoadIdentity::new("u", &base);
        let b = LoadIdentity::new("u", &base.clone().with_compression(TextureCompression::None));
        let c = LoadIdentity::new("u", &base.clone().with_sampler(WrapMode::Clamp, FilterMode::Bilinear, 8));
        assert_ne!(a, b);
        assert_eq!(a, c);
    }
}
