//! Pulse Monitor - HTTP 端点健康监控引擎
//!
//! 周期性探测用户定义的 HTTP 端点，支持：
//! - 按目标独立调度的健康探测
//! - healthy / warning / down 三态分类
//! - 有界的探测历史记录
//! - 面向观察者的实时状态推送
//! - 配置热重载与结构化日志

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod history;
pub mod hub;
pub mod logging;
pub mod targets;
pub mod web;


// 重新导出主要类型
pub use config::{Config, GlobalConfig, TargetConfig};
pub use engine::{Monitor, MonitorSettings};
pub use error::{MonitorError, Result};
pub use health::{HttpProber, ProbeResult, ProbeState, Prober, Scheduler, Target, TargetId};
pub use history::{HistoryStore, MemoryHistoryStore};
pub use hub::{BroadcastHub, Subscription, SubscriptionId, Topic};
pub use targets::{MemoryTargetStore, TargetStore};

/// 应用程序版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 应用程序名称
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// 应用程序描述
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
