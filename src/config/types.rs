//! 配置数据结构定义
//!
//! 定义应用程序的配置结构体和验证逻辑

use crate::health::target::{DEFAULT_EXPECTED_STATUS, DEFAULT_METHOD};
use crate::health::{Target, TargetId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// 主配置结构，包含全局配置和目标列表
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// 全局配置项
    #[serde(default)]
    pub global: GlobalConfig,
    /// 目标配置列表
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

impl Config {
    /// 把目标配置解析为完整的目标定义（填入全局默认值）
    pub fn resolved_targets(&self) -> Vec<Target> {
        self.targets
            .iter()
            .map(|target| target.to_target(&self.global))
            .collect()
    }
}

/// 全局配置结构
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 默认探测间隔（毫秒）
    #[serde(default = "default_interval_ms")]
    pub default_interval_ms: u64,
    /// 默认探测超时（毫秒）
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// 每个目标保留的历史条数
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// 历史查询默认条数
    #[serde(default = "default_history_limit")]
    pub default_history_limit: usize,
    /// 每个观察者的邮箱容量
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    /// 观察者连续溢出多少次后被移除
    #[serde(default = "default_subscriber_max_missed")]
    pub subscriber_max_missed: u32,
    /// 按需检测队列容量
    #[serde(default = "default_check_queue_capacity")]
    pub check_queue_capacity: usize,
    /// Web 服务器配置
    pub web: Option<WebConfig>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            default_interval_ms: default_interval_ms(),
            default_timeout_ms: default_timeout_ms(),
            history_capacity: default_history_capacity(),
            default_history_limit: default_history_limit(),
            subscriber_buffer: default_subscriber_buffer(),
            subscriber_max_missed: default_subscriber_max_missed(),
            check_queue_capacity: default_check_queue_capacity(),
            web: None,
        }
    }
}

/// 目标配置结构
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetConfig {
    /// 目标ID
    pub id: TargetId,
    /// 显示名称
    pub name: Option<String>,
    /// 探测URL
    pub url: String,
    /// HTTP方法
    #[serde(default = "default_method")]
    pub method: String,
    /// 期望的状态码
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
    /// 目标特定的超时（毫秒）
    pub timeout_ms: Option<u64>,
    /// 目标特定的探测间隔（毫秒）
    pub interval_ms: Option<u64>,
}

impl TargetConfig {
    /// 解析为目标定义，未指定的超时和间隔取全局默认值
    pub fn to_target(&self, global: &GlobalConfig) -> Target {
        Target {
            id: self.id,
            name: self.name.clone(),
            url: self.url.clone(),
            method: self.method.to_uppercase(),
            expected_status: self.expected_status,
            timeout_ms: self.timeout_ms.unwrap_or(global.default_timeout_ms),
            interval_ms: self.interval_ms.unwrap_or(global.default_interval_ms),
        }
    }
}

// 默认值函数
fn default_log_level() -> String {
    "info".to_string()
}
fn default_interval_ms() -> u64 {
    crate::health::target::DEFAULT_INTERVAL_MS
}
fn default_timeout_ms() -> u64 {
    crate::health::target::DEFAULT_TIMEOUT_MS
}
fn default_history_capacity() -> usize {
    crate::history::DEFAULT_HISTORY_CAPACITY
}
fn default_history_limit() -> usize {
    crate::history::DEFAULT_QUERY_LIMIT
}
fn default_subscriber_buffer() -> usize {
    crate::hub::DEFAULT_SUBSCRIBER_BUFFER
}
fn default_subscriber_max_missed() -> u32 {
    crate::hub::DEFAULT_MAX_MISSED
}
fn default_check_queue_capacity() -> usize {
    crate::health::scheduler::DEFAULT_CHECK_QUEUE_CAPACITY
}
fn default_method() -> String {
    DEFAULT_METHOD.to_string()
}
fn default_expected_status() -> u16 {
    DEFAULT_EXPECTED_STATUS
}

/// 配置验证函数
///
/// # 参数
/// * `config` - 要验证的配置
///
/// # 返回
/// * `Result<(), String>` - 验证结果，错误时返回错误信息
pub fn validate_config(config: &Config) -> Result<(), String> {
    let global = &config.global;

    if global.default_interval_ms == 0 {
        return Err("默认探测间隔不能为0".to_string());
    }

    if global.default_timeout_ms == 0 {
        return Err("默认超时时间不能为0".to_string());
    }

    if global.history_capacity == 0 {
        return Err("历史容量不能为0".to_string());
    }

    if global.default_history_limit == 0 {
        return Err("历史查询默认条数不能为0".to_string());
    }

    if global.subscriber_buffer == 0 {
        return Err("观察者邮箱容量不能为0".to_string());
    }

    if global.subscriber_max_missed == 0 {
        return Err("观察者最大溢出次数不能为0".to_string());
    }

    if global.check_queue_capacity == 0 {
        return Err("按需检测队列容量不能为0".to_string());
    }

    // 验证日志级别
    let valid_log_levels = ["debug", "info", "warn", "error"];
    if !valid_log_levels.contains(&global.log_level.as_str()) {
        return Err(format!(
            "无效的日志级别: {}，支持的级别: {:?}",
            global.log_level, valid_log_levels
        ));
    }

    // 验证Web配置（如果启用）
    if let Some(ref web_config) = global.web {
        if web_config.enabled {
            if web_config.port == 0 {
                return Err(format!(
                    "无效的Web服务器端口: {}，端口不能为0",
                    web_config.port
                ));
            }

            if web_config.bind_address.is_empty() {
                return Err("Web服务器绑定地址不能为空".to_string());
            }
        }
    }

    // 目标列表允许为空
    let mut seen = HashSet::new();
    for target in &config.targets {
        if !seen.insert(target.id) {
            return Err(format!("目标ID重复: {}", target.id));
        }

        target.to_target(global).validate()?;
    }

    Ok(())
}

/// Web 服务器配置结构
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebConfig {
    /// 是否启用 Web 功能
    #[serde(default = "default_web_enabled")]
    pub enabled: bool,
    /// 监听端口
    #[serde(default = "default_web_port")]
    pub port: u16,
    /// 绑定地址
    #[serde(default = "default_web_bind_address")]
    pub bind_address: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: default_web_enabled(),
            port: default_web_port(),
            bind_address: default_web_bind_address(),
        }
    }
}

fn default_web_enabled() -> bool {
    false
}

fn default_web_port() -> u16 {
    8080
}

fn default_web_bind_address() -> String {
    "127.0.0.1".to_string()
}
