//! 探测结果数据结构
//!
//! 定义探测结果、状态枚举以及状态分类规则

use crate::health::target::{Target, TargetId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 探测状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeState {
    /// 状态码符合预期且响应及时
    Healthy,
    /// 状态码符合预期但响应缓慢，或状态码不符但仍在2xx/3xx范围
    Warning,
    /// 其他情况，包括传输层失败
    Down,
}

impl std::fmt::Display for ProbeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeState::Healthy => write!(f, "healthy"),
            ProbeState::Warning => write!(f, "warning"),
            ProbeState::Down => write!(f, "down"),
        }
    }
}

impl ProbeState {
    /// 判断状态是否为健康
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeState::Healthy)
    }
}

/// 根据一次请求/响应对计算探测状态
///
/// `timeout_ms / 2` 为整数除法。
///
/// # 参数
/// * `is_up` - 状态码是否等于期望值
/// * `status_code` - 响应状态码（传输失败时为空）
/// * `latency_ms` - 响应耗时（传输失败时为空）
/// * `timeout_ms` - 目标超时
pub fn classify(
    is_up: bool,
    status_code: Option<u16>,
    latency_ms: Option<u64>,
    timeout_ms: u64,
) -> ProbeState {
    if is_up {
        match latency_ms {
            Some(latency) if latency > timeout_ms / 2 => ProbeState::Warning,
            _ => ProbeState::Healthy,
        }
    } else {
        match status_code {
            Some(code) if (200..400).contains(&code) => ProbeState::Warning,
            _ => ProbeState::Down,
        }
    }
}

/// 单次探测结果，创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// 目标ID
    pub target_id: TargetId,
    /// 状态码是否符合预期
    pub is_up: bool,
    /// HTTP状态码
    pub status_code: Option<u16>,
    /// 响应耗时（毫秒）
    pub latency_ms: Option<u64>,
    /// 错误描述
    pub error: Option<String>,
    /// 观测时间
    pub observed_at: DateTime<Utc>,
    /// 分类状态
    pub state: ProbeState,
}

impl ProbeResult {
    /// 由一次完成的HTTP响应创建结果
    pub fn from_response(target: &Target, status_code: u16, latency: Duration) -> Self {
        let latency_ms = latency.as_millis() as u64;
        let is_up = status_code == target.expected_status;

        Self {
            target_id: target.id,
            is_up,
            status_code: Some(status_code),
            latency_ms: Some(latency_ms),
            error: None,
            observed_at: Utc::now(),
            state: classify(is_up, Some(status_code), Some(latency_ms), target.timeout_ms),
        }
    }

    /// 由传输层失败创建结果（无状态码、无耗时）
    pub fn from_failure(target: &Target, error: impl Into<String>) -> Self {
        Self {
            target_id: target.id,
            is_up: false,
            status_code: None,
            latency_ms: None,
            error: Some(error.into()),
            observed_at: Utc::now(),
            state: ProbeState::Down,
        }
    }

    /// 设置观测时间
    pub fn with_observed_at(mut self, observed_at: DateTime<Utc>) -> Self {
        self.observed_at = observed_at;
        self
    }

    /// 转换为JSON字符串
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 从JSON字符串创建
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_target() -> Target {
        Target::new(1, "http://example.test")
            .with_expected_status(200)
            .with_timeout_ms(1000)
            .with_interval_ms(5000)
    }

    #[test]
    fn test_probe_state_display() {
        assert_eq!(ProbeState::Healthy.to_string(), "healthy");
        assert_eq!(ProbeState::Warning.to_string(), "warning");
        assert_eq!(ProbeState::Down.to_string(), "down");
    }

    #[test]
    fn test_classify_up() {
        assert_eq!(classify(true, Some(200), Some(0), 1000), ProbeState::Healthy);
        assert_eq!(classify(true, Some(200), Some(500), 1000), ProbeState::Healthy);
        assert_eq!(classify(true, Some(200), Some(501), 1000), ProbeState::Warning);
        assert_eq!(classify(true, Some(404), Some(10), 1000), ProbeState::Healthy);
    }

    #[test]
    fn test_classify_half_timeout_uses_integer_division() {
        // 1001 / 2 == 500
        assert_eq!(classify(true, Some(200), Some(500), 1001), ProbeState::Healthy);
        assert_eq!(classify(true, Some(200), Some(501), 1001), ProbeState::Warning);
    }

    #[test]
    fn test_classify_not_up() {
        assert_eq!(classify(false, Some(200), Some(10), 1000), ProbeState::Warning);
        assert_eq!(classify(false, Some(301), Some(10), 1000), ProbeState::Warning);
        assert_eq!(classify(false, Some(399), Some(10), 1000), ProbeState::Warning);
        assert_eq!(classify(false, Some(400), Some(10), 1000), ProbeState::Down);
        assert_eq!(classify(false, Some(503), Some(10), 1000), ProbeState::Down);
        assert_eq!(classify(false, Some(199), Some(10), 1000), ProbeState::Down);
        assert_eq!(classify(false, None, None, 1000), ProbeState::Down);
    }

    #[test]
    fn test_example_scenario() {
        let target = example_target();

        let fast = ProbeResult::from_response(&target, 200, Duration::from_millis(100));
        assert!(fast.is_up);
        assert_eq!(fast.state, ProbeState::Healthy);
        assert_eq!(fast.latency_ms, Some(100));
        assert!(fast.error.is_none());

        let timed_out = ProbeResult::from_failure(&target, "timeout");
        assert!(!timed_out.is_up);
        assert_eq!(timed_out.state, ProbeState::Down);
        assert_eq!(timed_out.error.as_deref(), Some("timeout"));
        assert!(timed_out.status_code.is_none());
        assert!(timed_out.latency_ms.is_none());
    }

    #[test]
    fn test_slow_and_mismatched_responses() {
        let target = example_target();

        let slow = ProbeResult::from_response(&target, 200, Duration::from_millis(750));
        assert!(slow.is_up);
        assert_eq!(slow.state, ProbeState::Warning);

        let redirected = ProbeResult::from_response(&target, 302, Duration::from_millis(20));
        assert!(!redirected.is_up);
        assert_eq!(redirected.state, ProbeState::Warning);

        let broken = ProbeResult::from_response(&target, 500, Duration::from_millis(20));
        assert!(!broken.is_up);
        assert_eq!(broken.state, ProbeState::Down);
    }

    #[test]
    fn test_probe_result_serialization() {
        let target = example_target();
        let result = ProbeResult::from_response(&target, 200, Duration::from_millis(42));

        let json = result.to_json().unwrap();
        assert!(json.contains("\"state\":\"healthy\""));
        assert!(json.contains("\"latency_ms\":42"));

        let deserialized = ProbeResult::from_json(&json).unwrap();
        assert_eq!(deserialized, result);
    }
}
