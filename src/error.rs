//! 错误处理模块
//!
//! 定义监控引擎的统一错误类型。探测失败不属于引擎错误，
//! 它以 `down`/`warning` 结果的形式出现在数据流中。

use crate::health::TargetId;
use thiserror::Error;

/// 监控引擎的主要错误类型
#[derive(Error, Debug)]
pub enum MonitorError {
    /// 配置相关错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 历史存储相关错误
    #[error("存储错误: {0}")]
    Storage(#[from] StorageError),

    /// 目标不存在
    #[error("目标不存在: {id}")]
    TargetNotFound { id: TargetId },

    /// 目标定义无效
    #[error("目标定义无效: {0}")]
    InvalidTarget(String),

    /// 调度队列已关闭（引擎已停止）
    #[error("调度队列已关闭")]
    QueueClosed,

    /// HTTP客户端错误
    #[error("HTTP客户端错误: {0}")]
    Http(#[from] reqwest::Error),

    /// IO错误
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON序列化/反序列化错误
    #[error("JSON错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 其他错误
    #[error("其他错误: {0}")]
    Other(#[from] anyhow::Error),
}

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 配置文件解析错误
    #[error("配置文件解析失败: {0}")]
    ParseError(String),

    /// 配置验证错误
    #[error("配置验证失败: {0}")]
    ValidationError(String),

    /// 配置文件不存在
    #[error("配置文件不存在: {path}")]
    FileNotFound { path: String },

    /// 环境变量替换错误
    #[error("环境变量替换失败: {var}")]
    EnvVarError { var: String },
}

/// 历史存储错误类型
#[derive(Error, Debug)]
pub enum StorageError {
    /// 后端不可用
    #[error("存储后端不可用: {0}")]
    Unavailable(String),

    /// 写入被拒绝
    #[error("写入被拒绝 (目标 {target_id}): {reason}")]
    Rejected { target_id: TargetId, reason: String },
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, MonitorError>;
