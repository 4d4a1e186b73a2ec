//! screenmirror - 局域网屏幕镜像
//!
//! 主入口程序

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

use cli::{Args, Commands, PatternArg};
use screenmirror::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        command,
        config,
        port,
        quality,
        verbose,
    } = Args::parse();

    // 生成配置文件不需要加载现有配置
    if let Some(Commands::Config { path }) = command {
        return commands::handle_generate_config(path);
    }

    let config_path = Config::get_config_path(config.as_deref());
    let (mut config, source) = Config::load_with_source(&config_path)?;

    // 命令行参数覆盖配置
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(quality) = quality {
        config.encoder.jpeg_quality = quality;
    }
    config.validate()?;

    commands::init_logging(verbose, &config.logging)?;
    // 日志初始化之后才能输出配置来源
    source.log();

    match command {
        Some(Commands::Token) => commands::handle_token(&config.security),
        Some(Commands::Run {
            token,
            pattern,
            color,
        }) => commands::handle_run(config, token, pattern, &color).await,
        Some(Commands::Config { .. }) | None => {
            commands::handle_run(config, None, PatternArg::Gradient, "ff0000").await
        }
    }
}
