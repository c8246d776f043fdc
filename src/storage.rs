//! 纹理磁盘缓存模块
//!
//! # 设计思路
//!
//! 统一管理纹理缓存目录：文件名由“URL 哈希 + 尺寸上限 + 扩展名”组成，
//! 同一 (hash, size, format) 组合最多一个文件。过期条目在下次访问时惰性删除，
//! 只有显式清理调用才会批量扫描目录。
//!
//! # 实现思路
//!
//! - 路径：`{root}/{subdirectory}/{hash}-{maxSize}{.jpg|.png}`。
//! - 过期时钟：缓存文件只写一次，以 mtime 作为创建时间。
//! - 删除为尽力而为：失败只记日志，`NotFound` 视为成功。
//! - 目录扫描与删除放到 `spawn_blocking`，避免阻塞调度线程。
//! - 所有可能失败的操作均返回 `Result`，不使用 `expect()` / `unwrap()`。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::LoaderError;
use crate::loader::identity::url_hash;
use crate::settings::{CacheExpiry, CacheFormat, LoaderConfig};

static CACHE_FILE_NAME: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^([0-9a-f]{64})-(\d+)\.(png|jpg)$").ok());

/// 单个缓存文件信息
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryInfo {
    pub file_name: String,
    pub hash: String,
    pub size_limit: u32,
    pub format: CacheFormat,
    pub bytes: u64,
    /// RFC 3339 本地时间
    pub created: String,
}

/// 缓存目录信息（路径 + 占用大小 + 文件数）
#[derive(Debug, Clone, Serialize)]
pub struct CacheInfo {
    pub path: String,
    pub total_size: u64,
    pub file_count: u64,
    pub entries: Vec<CacheEntryInfo>,
}

/// 磁盘缓存。
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// 按配置解析缓存目录（`{cacheRoot}/{subdirectory}`）。
    pub fn from_config(config: &LoaderConfig) -> Result<Self, LoaderError> {
        Ok(Self::new(config.resolve_cache_dir()?))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 计算缓存文件路径。
    pub fn resolve(&self, hash: &str, size_limit: u32, format: CacheFormat) -> PathBuf {
        self.dir
            .join(format!("{}-{}{}", hash, size_limit, format.extension()))
    }

    pub fn exists(path: &Path) -> bool {
        path.is_file()
    }

    /// 文件是否已过期；读取时间失败时按过期处理。
    pub fn is_expired(path: &Path, expiry: CacheExpiry) -> bool {
        let CacheExpiry::After(duration) = expiry else {
            return false;
        };

        match file_creation_time(path) {
            Ok(created) => match SystemTime::now().duration_since(created) {
                Ok(age) => age > duration,
                Err(_) => false,
            },
            Err(err) => {
                log::warn!("⚠️ 读取缓存文件时间失败，按过期处理 - {}: {}", path.display(), err);
                true
            }
        }
    }

    /// 尽力删除单个文件，失败只记录日志。
    pub async fn delete(&self, path: &Path) {
        let owned = path.to_path_buf();
        let result = tokio::task::spawn_blocking(move || remove_file_if_exists(&owned)).await;
        match result {
            Ok(Ok(())) => log::debug!("🧹 已删除缓存文件 - {}", path.display()),
            Ok(Err(err)) => log::error!("❌ {}", err),
            Err(err) => log::error!("❌ 缓存删除任务异常：{}", err),
        }
    }

    /// 写入缓存文件（目录不存在时自动创建）。
    pub async fn write(&self, path: &Path, bytes: Vec<u8>) -> Result<(), LoaderError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LoaderError::CacheWrite(format!("创建缓存目录 '{}' 失败: {}", parent.display(), e)))?;
        }

        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| LoaderError::CacheWrite(format!("写入缓存文件 '{}' 失败: {}", path.display(), e)))
    }

    /// 清理整个缓存目录；`older_than` 为空时删除全部文件。返回删除数量。
    pub async fn clear_all(&self, older_than: Option<Duration>) -> usize {
        let dir = self.dir.clone();
        let removed = tokio::task::spawn_blocking(move || {
            sweep(&dir, |path| match older_than {
                None => true,
                Some(limit) => file_creation_time(path)
                    .ok()
                    .and_then(|created| SystemTime::now().duration_since(created).ok())
                    .map(|age| age > limit)
                    .unwrap_or(false),
            })
        })
        .await
        .unwrap_or_else(|err| {
            log::error!("❌ 缓存清理任务异常：{}", err);
            0
        });

        log::info!("🧹 缓存清理完成 - 删除 {} 个文件（older_than={:?}）", removed, older_than);
        removed
    }

    /// 删除某个 URL 的缓存；`size` 为空时删除该 URL 的全部尺寸变体。
    pub async fn clear_for(&self, url: &str, size: Option<u32>) -> usize {
        let hash = url_hash(url);
        let prefix = match size {
            Some(size) => format!("{}-{}.", hash, size),
            None => format!("{}-", hash),
        };

        let dir = self.dir.clone();
        let removed = tokio::task::spawn_blocking(move || {
            sweep(&dir, |path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.starts_with(&prefix))
                    .unwrap_or(false)
            })
        })
        .await
        .unwrap_or_else(|err| {
            log::error!("❌ 缓存清理任务异常：{}", err);
            0
        });

        log::info!("🧹 已清理 URL 缓存 - 删除 {} 个文件", removed);
        removed
    }

    /// 目录统计与条目列表。
    pub fn info(&self) -> CacheInfo {
        let mut total_size: u64 = 0;
        let mut file_count: u64 = 0;
        let mut entries = Vec::new();

        if let Ok(read_dir) = fs::read_dir(&self.dir) {
            for entry in read_dir.flatten() {
                let Ok(metadata) = entry.metadata() else {
                    continue;
                };
                if !metadata.is_file() {
                    continue;
                }

                total_size += metadata.len();
                file_count += 1;

                let file_name = entry.file_name().to_string_lossy().to_string();
                if let Some(parsed) = parse_cache_file_name(&file_name) {
                    let created = metadata
                        .modified()
                        .map(|t| chrono::DateTime::<chrono::Local>::from(t).to_rfc3339())
                        .unwrap_or_default();
                    entries.push(CacheEntryInfo {
                        file_name,
                        hash: parsed.0,
                        size_limit: parsed.1,
                        format: parsed.2,
                        bytes: metadata.len(),
                        created,
                    });
                }
            }
        }

        entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));

        CacheInfo {
            path: self.dir.to_string_lossy().to_string(),
            total_size,
            file_count,
            entries,
        }
    }
}

/// 缓存文件的创建时间（以 mtime 计）。
pub fn file_creation_time(path: &Path) -> io::Result<SystemTime> {
    fs::metadata(path)?.modified()
}

fn parse_cache_file_name(name: &str) -> Option<(String, u32, CacheFormat)> {
    let regex = CACHE_FILE_NAME.as_ref()?;
    let caps = regex.captures(name)?;
    let hash = caps.get(1)?.as_str().to_string();
    let size = caps.get(2)?.as_str().parse::<u32>().ok()?;
    let format = match caps.get(3)?.as_str() {
        "jpg" => CacheFormat::Jpg,
        _ => CacheFormat::Png,
    };
    Some((hash, size, format))
}

fn remove_file_if_exists(path: &Path) -> Result<(), LoaderError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(LoaderError::CacheDelete(format!("{}: {}", path.display(), err))),
    }
}

fn sweep(dir: &Path, should_delete: impl Fn(&Path) -> bool) -> usize {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return 0,
        Err(err) => {
            log::error!("❌ 读取缓存目录 '{}' 失败: {}", dir.display(), err);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in read_dir.flatten() {
        let path = entry.path();
        if !path.is_file() || !should_delete(&path) {
            continue;
        }
        match remove_file_if_exists(&path) {
            Ok(()) => removed += 1,
            Err(err) => log::error!("❌ {}", err),
        }
    }
    removed
}
