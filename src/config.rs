//! 配置管理模块
//!
//! 负责加载和管理应用程序配置

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::capture::pipeline::DEFAULT_BUFFER_DEPTH;
use crate::encoder::DEFAULT_JPEG_QUALITY;
use crate::security::DEFAULT_GRANT_TTL;

/// 应用程序配置
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 捕获授权配置
    #[serde(default)]
    pub security: SecurityConfig,
}

/// HTTP 服务器配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "default_host")]
    pub host: String,
    /// 监听端口 (0 = 由系统分配)
    #[serde(default = "default_port")]
    pub port: u16,
    /// 页面轮询间隔 (毫秒)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// 停止时等待连接关闭的最长时间 (毫秒)
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

/// 屏幕捕获配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureConfig {
    /// 捕获宽度 (None = 显示器原始宽度)
    #[serde(default)]
    pub width: Option<u32>,
    /// 捕获高度 (None = 显示器原始高度)
    #[serde(default)]
    pub height: Option<u32>,
    /// 像素密度 (None = 显示器原始密度)
    #[serde(default)]
    pub density: Option<u32>,
    /// 原始缓冲区池深度
    #[serde(default = "default_buffer_depth")]
    pub buffer_depth: usize,
    /// 合成平台的目标帧率
    #[serde(default = "default_fps")]
    pub fps: u32,
}

/// 编码配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EncoderConfig {
    /// JPEG 质量 (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

/// 日志配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 日志文件路径 (None = 仅控制台)
    #[serde(default)]
    pub file: Option<String>,
}

/// 捕获授权配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecurityConfig {
    /// 授权签名密钥 (推荐通过环境变量设置: SCREENMIRROR_GRANT_SECRET)
    #[serde(default)]
    pub grant_secret: Option<String>,
    /// 授权 token 有效期 (秒)
    #[serde(default = "default_token_ttl")]
    pub token_ttl: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: default_host(),
            port: default_port(),
            poll_interval_ms: default_poll_interval_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            width: None,
            height: None,
            density: None,
            buffer_depth: default_buffer_depth(),
            fps: default_fps(),
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        EncoderConfig {
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        SecurityConfig {
            grant_secret: None,
            token_ttl: default_token_ttl(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_shutdown_grace_ms() -> u64 {
    3000
}

fn default_buffer_depth() -> usize {
    DEFAULT_BUFFER_DEPTH
}

fn default_fps() -> u32 {
    30
}

fn default_jpeg_quality() -> u8 {
    DEFAULT_JPEG_QUALITY
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_token_ttl() -> u64 {
    DEFAULT_GRANT_TTL
}

/// 配置来源
///
/// 加载发生在日志初始化之前，由调用方在初始化后调用 [`ConfigSource::log`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// 从文件加载
    File(PathBuf),
    /// 文件不存在，使用默认配置
    Defaults(PathBuf),
}

impl ConfigSource {
    pub fn path(&self) -> &Path {
        match self {
            ConfigSource::File(path) | ConfigSource::Defaults(path) => path,
        }
    }

    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => tracing::info!("配置加载成功: {:?}", path),
            ConfigSource::Defaults(path) => {
                tracing::warn!("配置文件不存在: {:?}, 使用默认配置", path)
            }
        }
    }
}

impl Config {
    /// 从文件加载配置
    ///
    /// 文件不存在时返回默认配置，解析失败或取值非法时返回错误
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_with_source(path).map(|(config, _)| config)
    }

    /// 从文件加载配置，同时返回配置来源
    pub fn load_with_source<P: AsRef<Path>>(path: P) -> Result<(Self, ConfigSource)> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok((Config::default(), ConfigSource::Defaults(path.to_path_buf())));
        }

        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("配置文件解析失败: {}", e))?;
        config.validate()?;

        Ok((config, ConfigSource::File(path.to_path_buf())))
    }

    /// 保存配置到文件
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 检查取值范围
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.encoder.jpeg_quality) {
            return Err(anyhow!(
                "JPEG 质量必须在 1-100 之间: {}",
                self.encoder.jpeg_quality
            ));
        }
        if self.capture.buffer_depth == 0 {
            return Err(anyhow!("缓冲区池深度必须大于 0"));
        }
        if self.capture.fps == 0 {
            return Err(anyhow!("帧率必须大于 0"));
        }
        if self.server.poll_interval_ms == 0 {
            return Err(anyhow!("轮询间隔必须大于 0"));
        }
        if matches!(self.capture.width, Some(0)) || matches!(self.capture.height, Some(0)) {
            return Err(anyhow!("捕获尺寸必须大于 0"));
        }
        Ok(())
    }

    /// 获取配置文件路径
    ///
    /// 优先级: 命令行指定 > 当前目录 > 用户主目录
    pub fn get_config_path(cli_path: Option<&str>) -> String {
        if let Some(p) = cli_path {
            return p.to_string();
        }

        // 首先检查当前目录
        if Path::new("screenmirror.toml").exists() {
            return "screenmirror.toml".to_string();
        }

        // 然后检查用户配置目录
        if let Ok(home) = std::env::var("HOME") {
            let config_path = format!("{}/.config/screenmirror/config.toml", home);
            if Path::new(&config_path).exists() {
                return config_path;
            }
        }

        // 默认返回当前目录的配置文件路径
        "screenmirror.toml".to_string()
    }
}
