//! Command handlers for screenmirror
//!
//! 日志初始化、授权密钥解析，以及各子命令的实现。

use anyhow::{anyhow, Result};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use screenmirror::capture::synthetic::{Pattern, SyntheticBackend};
use screenmirror::capture::DisplayMetrics;
use screenmirror::config::{self, LoggingConfig, SecurityConfig};
use screenmirror::security::grant::GRANT_SECRET_ENV;
use screenmirror::security::GrantAuthority;
use screenmirror::SessionController;

use crate::cli::PatternArg;

/// 合成平台的原始分辨率
const SYNTHETIC_METRICS: DisplayMetrics = DisplayMetrics {
    width: 1280,
    height: 720,
    density: 160,
};

/// 初始化日志
///
/// 优先级: `RUST_LOG` > `-v` 次数 > 配置文件中的级别
pub fn init_logging(verbose: u8, logging: &LoggingConfig) -> Result<()> {
    let level = match verbose {
        0 => logging.level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| anyhow!("无效的日志级别 {}: {}", level, e))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);

    match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| anyhow!("无法打开日志文件 {}: {}", path, e))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }

    Ok(())
}

/// 解析授权签发方
///
/// 优先级: 配置文件 > 环境变量 > 随机生成 (仅在本进程内有效)
pub fn grant_authority(security: &SecurityConfig) -> GrantAuthority {
    if let Some(secret) = &security.grant_secret {
        return GrantAuthority::new(secret.clone(), security.token_ttl);
    }

    match GrantAuthority::from_env(security.token_ttl) {
        Ok(authority) => authority,
        Err(e) => {
            debug!("{}, 使用随机密钥", e);
            GrantAuthority::generate(security.token_ttl)
        }
    }
}

/// 解析 RRGGBB 颜色
pub fn parse_color(value: &str) -> Result<[u8; 3]> {
    let hex = value.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(anyhow!("无效的颜色: {} (应为 RRGGBB)", value));
    }

    let mut rgb = [0u8; 3];
    for (i, channel) in rgb.iter_mut().enumerate() {
        *channel = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)?;
    }
    Ok(rgb)
}

/// 运行镜像会话直到收到 Ctrl+C
pub async fn handle_run(
    config: config::Config,
    token: Option<String>,
    pattern: PatternArg,
    color: &str,
) -> Result<()> {
    info!("screenmirror v{} 启动中...", env!("CARGO_PKG_VERSION"));

    let pattern = match pattern {
        PatternArg::Solid => Pattern::Solid(parse_color(color)?),
        PatternArg::Gradient => Pattern::Gradient,
    };

    let authority = grant_authority(&config.security);
    let token = token.unwrap_or_else(|| authority.issue());

    let backend = SyntheticBackend::new(SYNTHETIC_METRICS, authority)
        .with_fps(config.capture.fps)
        .with_pattern(pattern);
    let backend_stats = backend.stats();

    let mut session = SessionController::new(config, Box::new(backend));
    let url = session.start(&token).await?;

    println!();
    println!("========================================");
    println!("  屏幕镜像已启动");
    println!("  在浏览器中打开: {}", url);
    if let Some(display) = session.display() {
        println!(
            "  虚拟显示器: {}x{} @ {} dpi",
            display.width, display.height, display.density
        );
    }
    println!("  按 Ctrl+C 停止");
    println!("========================================");
    println!();

    if let Err(e) = signal::ctrl_c().await {
        error!("无法监听 Ctrl+C: {}", e);
    }
    info!("收到退出信号，正在关闭...");

    let stats = session.pipeline_stats();
    session.stop().await;

    info!(
        "共生成 {} 帧 (丢弃 {})，写入存储 {} 帧",
        backend_stats.produced(),
        backend_stats.dropped(),
        stats.published()
    );
    info!("screenmirror 已退出");
    Ok(())
}

/// 签发捕获授权 token
pub fn handle_token(security: &SecurityConfig) -> Result<()> {
    if security.grant_secret.is_none() && std::env::var(GRANT_SECRET_ENV).is_err() {
        warn!("未配置授权密钥，签发的 token 只能由本进程验证");
    }

    let authority = grant_authority(security);
    println!("{}", authority.issue());
    println!("有效期: {} 秒", authority.ttl());
    Ok(())
}

/// Handle generate config command
pub fn handle_generate_config(path: Option<String>) -> Result<()> {
    let config_path = match path {
        Some(p) => PathBuf::from(p),
        None => PathBuf::from(config::Config::get_config_path(None)),
    };

    println!("生成配置文件: {}", config_path.display());

    // 检查文件是否已存在
    if config_path.exists() {
        println!("⚠ 配置文件已存在");
        print!("是否覆盖? (y/N): ");
        use std::io::Write;
        std::io::stdout().flush().ok();

        let mut input = String::new();
        std::io::stdin().read_line(&mut input).ok();
        if !input.trim().to_lowercase().starts_with('y') {
            println!("已取消");
            return Ok(());
        }
    }

    let default_config = config::Config::default();
    default_config
        .save(&config_path)
        .map_err(|e| anyhow!("写入配置文件失败: {}", e))?;

    println!("✓ 配置文件已生成: {}", config_path.display());
    println!();
    println!("配置内容:");
    println!(
        "  监听地址: {}:{}",
        default_config.server.host, default_config.server.port
    );
    println!("  轮询间隔: {} ms", default_config.server.poll_interval_ms);
    println!("  JPEG 质量: {}", default_config.encoder.jpeg_quality);
    println!("  日志级别: {}", default_config.logging.level);

    Ok(())
}
