//! 监控目标定义

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 目标ID
pub type TargetId = u64;

/// 默认HTTP方法
pub const DEFAULT_METHOD: &str = "GET";

/// 默认期望状态码
pub const DEFAULT_EXPECTED_STATUS: u16 = 200;

/// 默认探测超时（毫秒）
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// 默认探测间隔（毫秒）
pub const DEFAULT_INTERVAL_MS: u64 = 60_000;

/// 支持的HTTP方法
pub const VALID_METHODS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH"];

/// 被监控的HTTP端点
///
/// 探测进行中目标不可变；只能在两次探测之间由外部配置更新替换。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// 目标ID
    pub id: TargetId,
    /// 显示名称
    #[serde(default)]
    pub name: Option<String>,
    /// 探测URL
    pub url: String,
    /// HTTP方法
    pub method: String,
    /// 期望的状态码
    pub expected_status: u16,
    /// 探测超时（毫秒）
    pub timeout_ms: u64,
    /// 探测间隔（毫秒），从上一次探测完成开始计时
    pub interval_ms: u64,
}

impl Target {
    /// 以默认参数创建目标
    pub fn new(id: TargetId, url: impl Into<String>) -> Self {
        Self {
            id,
            name: None,
            url: url.into(),
            method: DEFAULT_METHOD.to_string(),
            expected_status: DEFAULT_EXPECTED_STATUS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            interval_ms: DEFAULT_INTERVAL_MS,
        }
    }

    /// 设置显示名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 设置HTTP方法
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// 设置期望状态码
    pub fn with_expected_status(mut self, expected_status: u16) -> Self {
        self.expected_status = expected_status;
        self
    }

    /// 设置超时（毫秒）
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// 设置探测间隔（毫秒）
    pub fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// 日志中使用的名称，未命名时退回到URL
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }

    /// 超时大于间隔时，定时探测与下一次可能重叠
    pub fn may_overlap(&self) -> bool {
        self.timeout_ms > self.interval_ms
    }

    /// 验证目标定义
    ///
    /// # 返回
    /// * `Result<(), String>` - 验证结果，错误时返回错误信息
    pub fn validate(&self) -> Result<(), String> {
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(format!("目标 {} 的URL格式无效: {}", self.id, self.url));
        }

        if !VALID_METHODS.contains(&self.method.as_str()) {
            return Err(format!(
                "目标 {} 的HTTP方法 {} 无效，支持的方法: {:?}",
                self.id, self.method, VALID_METHODS
            ));
        }

        if !(100..=599).contains(&self.expected_status) {
            return Err(format!(
                "目标 {} 的期望状态码 {} 无效",
                self.id, self.expected_status
            ));
        }

        if self.timeout_ms == 0 {
            return Err(format!("目标 {} 的超时时间不能为0", self.id));
        }

        if self.interval_ms == 0 {
            return Err(format!("目标 {} 的探测间隔不能为0", self.id));
        }

        Ok(())
    }
}
