//! 历史统计汇总

use crate::health::{ProbeResult, ProbeState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 一段历史窗口内的统计信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryStats {
    /// 总探测次数
    pub total_checks: u64,
    /// 状态码符合预期的次数
    pub up_checks: u64,
    /// healthy 次数
    pub healthy: u64,
    /// warning 次数
    pub warning: u64,
    /// down 次数
    pub down: u64,
    /// 可用率（百分比）
    pub success_rate: f64,
    /// 平均响应时间（毫秒），只统计有响应的探测
    pub average_latency_ms: f64,
    /// 最大响应时间（毫秒）
    pub max_latency_ms: Option<u64>,
    /// 最小响应时间（毫秒）
    pub min_latency_ms: Option<u64>,
    /// 最后检测时间
    pub last_check_time: Option<DateTime<Utc>>,
    #[serde(skip)]
    latency_samples: u64,
}

impl Default for HistoryStats {
    fn default() -> Self {
        Self {
            total_checks: 0,
            up_checks: 0,
            healthy: 0,
            warning: 0,
            down: 0,
            success_rate: 0.0,
            average_latency_ms: 0.0,
            max_latency_ms: None,
            min_latency_ms: None,
            last_check_time: None,
            latency_samples: 0,
        }
    }
}

impl HistoryStats {
    /// 从一组结果计算统计
    pub fn from_results(results: &[ProbeResult]) -> Self {
        let mut stats = Self::default();
        for result in results {
            stats.update(result);
        }
        stats
    }

    /// 更新统计信息
    pub fn update(&mut self, result: &ProbeResult) {
        self.total_checks += 1;
        self.last_check_time = Some(match self.last_check_time {
            Some(last) => last.max(result.observed_at),
            None => result.observed_at,
        });

        if result.is_up {
            self.up_checks += 1;
        }

        match result.state {
            ProbeState::Healthy => self.healthy += 1,
            ProbeState::Warning => self.warning += 1,
            ProbeState::Down => self.down += 1,
        }

        if let Some(latency) = result.latency_ms {
            self.latency_samples += 1;
            self.max_latency_ms = Some(self.max_latency_ms.map_or(latency, |max| max.max(latency)));
            self.min_latency_ms = Some(self.min_latency_ms.map_or(latency, |min| min.min(latency)));

            let total = self.average_latency_ms * (self.latency_samples - 1) as f64 + latency as f64;
            self.average_latency_ms = total / self.latency_samples as f64;
        }

        self.success_rate = (self.up_checks as f64 / self.total_checks as f64) * 100.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::Target;
    use std::time::Duration;

    #[test]
    fn test_empty_stats() {
        let stats = HistoryStats::from_results(&[]);
        assert_eq!(stats.total_checks, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert!(stats.max_latency_ms.is_none());
        assert!(stats.last_check_time.is_none());
    }

    #[test]
    fn test_stats_update() {
        let target = Target::new(1, "http://example.test").with_timeout_ms(1000);
        let results = vec![
            ProbeResult::from_response(&target, 200, Duration::from_millis(100)),
            ProbeResult::from_response(&target, 200, Duration::from_millis(700)),
            ProbeResult::from_response(&target, 500, Duration::from_millis(300)),
            ProbeResult::from_failure(&target, "timeout"),
        ];

        let stats = HistoryStats::from_results(&results);
        assert_eq!(stats.total_checks, 4);
        assert_eq!(stats.up_checks, 2);
        assert_eq!(stats.healthy, 1);
        assert_eq!(stats.warning, 1);
        assert_eq!(stats.down, 2);
        assert_eq!(stats.success_rate, 50.0);
        // 超时的探测没有响应时间，不计入平均
        assert_eq!(stats.average_latency_ms, 1100.0 / 3.0);
        assert_eq!(stats.max_latency_ms, Some(700));
        assert_eq!(stats.min_latency_ms, Some(100));
        assert!(stats.last_check_time.is_some());
    }
}
