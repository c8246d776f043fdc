//! # 纹理加载器：命令行演示
//!
//! 用法：`texture-loader [--config 配置.json] [--queue] URL...`（`--help` 查看说明）
//!
//! 每个 URL 加载到一个无界面绘制面，完成后把首层像素导出为 PNG（当前目录，
//! 文件名为任务编号），全局事件以 JSON 行打印到标准输出。

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use texture_loader::target::Size;
use texture_loader::{
    HeadlessSurface, LoadOutcome, LoaderConfig, LoaderContext, LoaderError, ScaleMode, TextureTarget,
};

#[derive(Debug, Parser)]
#[command(name = "texture-loader", version, about = "加载纹理并导出首层像素")]
struct Cli {
    /// JSON 配置文件路径
    #[arg(long)]
    config: Option<PathBuf>,

    /// 通过全局队列逐个加载
    #[arg(long)]
    queue: bool,

    /// 纹理地址（http(s) / file / data）
    #[arg(required = true)]
    urls: Vec<String>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), LoaderError> {
    let args = Cli::parse();
    let config = match &args.config {
        Some(path) => LoaderConfig::from_json_file(path)?,
        None => LoaderConfig::default(),
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_level.as_str())).init();

    let fade = config.fade_duration();
    let ctx = LoaderContext::new(config)?;
    ctx.subscribe(|event| match serde_json::to_string(&event.payload()) {
        Ok(line) => println!("{}", line),
        Err(err) => log::warn!("⚠️ 事件序列化失败：{}", err),
    });

    let mut jobs = Vec::new();
    for url in &args.urls {
        let target = Arc::new(
            TextureTarget::builder(HeadlessSurface::new(Some(Size::new(512.0, 512.0))))
                .fade(fade)
                .scale_mode(ScaleMode::Fit)
                .build(),
        );
        let loader = ctx.load(url.as_str()).into(Arc::clone(&target));
        loader.start(args.queue);
        jobs.push((loader, target));
    }

    for (loader, target) in &jobs {
        match loader.finished().await {
            LoadOutcome::Completed(texture) => {
                let file = PathBuf::from(format!("texture-{}.png", loader.id()));
                match texture.level(0) {
                    Some(pixels) => pixels
                        .save(&file)
                        .map_err(|e| LoaderError::FileSystem(format!("导出 {} 失败：{}", file.display(), e)))?,
                    None => log::warn!("⚠️ 纹理没有像素层 - id={}", loader.id()),
                }
                let size = target.surface().snapshot().size;
                log::info!("📦 已导出 {} 显示尺寸={:?}", file.display(), size);
            }
            LoadOutcome::Failed(message) => log::error!("❌ {}", message),
            LoadOutcome::Canceled | LoadOutcome::Disposed => log::warn!("⚠️ 任务未完成 - id={}", loader.id()),
        }
    }

    let info = ctx.cache_info();
    log::info!(
        "💾 缓存目录 {} - {} 个文件",
        info.path,
        info.file_count
    );
    ctx.shutdown();
    Ok(())
}
