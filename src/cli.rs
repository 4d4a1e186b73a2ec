//! CLI argument definitions for screenmirror

use clap::{Parser, Subcommand, ValueEnum};

/// screenmirror - 命令行参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// 配置文件路径
    #[arg(short, long)]
    pub config: Option<String>,

    /// HTTP 监听端口
    #[arg(short, long)]
    pub port: Option<u16>,

    /// JPEG 质量 (1-100)
    #[arg(short, long)]
    pub quality: Option<u8>,

    /// 日志详细程度 (-v=info, -vv=debug, -vvv=trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// 子命令
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 启动镜像会话 (默认)
    Run {
        /// 捕获授权 token (省略时自动签发)
        #[arg(long, env = "SCREENMIRROR_TOKEN")]
        token: Option<String>,

        /// 合成画面图案
        #[arg(long, value_enum, default_value = "gradient")]
        pattern: PatternArg,

        /// 纯色图案的颜色 (RRGGBB)
        #[arg(long, default_value = "ff0000")]
        color: String,
    },

    /// 签发捕获授权 token
    Token,

    /// 生成配置文件
    Config {
        /// 配置文件路径
        #[arg(short, long)]
        path: Option<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatternArg {
    Solid,
    Gradient,
}
