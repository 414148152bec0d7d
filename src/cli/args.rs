//! 命令行参数定义
//!
//! 使用clap定义应用程序的命令行接口

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Pulse Monitor - HTTP 端点健康监控引擎
#[derive(Parser, Debug, Clone)]
#[command(
    name = "pulse-monitor",
    version = crate::VERSION,
    about = crate::APP_DESCRIPTION,
    long_about = None
)]
pub struct Args {
    /// 配置文件路径
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "配置文件路径",
        env = "PULSE_MONITOR_CONFIG",
        global = true
    )]
    pub config: Option<PathBuf>,

    /// 日志级别，未指定时使用配置文件中的 log_level
    #[arg(
        short,
        long,
        value_enum,
        help = "日志级别",
        env = "PULSE_MONITOR_LOG_LEVEL",
        global = true
    )]
    pub log_level: Option<LogLevel>,

    /// 子命令
    #[command(subcommand)]
    pub command: Commands,
}

/// 日志级别枚举
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    /// 调试级别
    Debug,
    /// 信息级别
    Info,
    /// 警告级别
    Warn,
    /// 错误级别
    Error,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// 子命令定义
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// 启动监控引擎，按 Ctrl-C 停止
    Run {
        /// 不监听配置文件变化
        #[arg(long, help = "禁用配置热重载")]
        no_watch: bool,
    },

    /// 对目标执行一次探测并输出结果
    Check {
        /// 只检测指定ID的目标
        #[arg(short, long, value_name = "ID", help = "目标ID")]
        target: Option<u64>,

        /// 输出格式
        #[arg(
            short,
            long,
            value_enum,
            default_value = "text",
            help = "输出格式"
        )]
        format: OutputFormat,
    },

    /// 加载并验证配置文件
    Validate,

    /// 写出示例配置文件
    Init {
        /// 覆盖已存在的文件
        #[arg(short, long, help = "覆盖已存在的配置文件")]
        force: bool,
    },
}

/// 输出格式枚举
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// 文本格式
    Text,
    /// JSON格式
    Json,
}

impl Args {
    /// 获取配置文件路径，未指定时使用默认路径
    pub fn get_config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(crate::config::get_default_config_path)
    }
}
