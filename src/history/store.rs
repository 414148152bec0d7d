//! 历史存储实现
//!
//! 每个目标一条只追加、有容量上限的日志，超出上限时淘汰最旧的条目。

use crate::error::StorageError;
use crate::health::{ProbeResult, TargetId};
use crate::history::{DEFAULT_HISTORY_CAPACITY, DEFAULT_QUERY_LIMIT};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// 历史存储trait
///
/// 持久化技术由外部决定，引擎只依赖这里的语义。
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// 追加一条结果，并淘汰超出容量的旧条目
    ///
    /// 同一目标的并发追加必须串行化
    async fn append(&self, target_id: TargetId, result: ProbeResult) -> Result<(), StorageError>;

    /// 查询最近的结果，按时间正序（最旧的在前）返回
    ///
    /// # 参数
    /// * `target_id` - 目标ID
    /// * `limit` - 返回条数，`None` 或 `Some(0)` 使用默认值
    ///
    /// # 返回
    /// * 目标没有历史时返回空列表而不是错误
    async fn query(
        &self,
        target_id: TargetId,
        limit: Option<usize>,
    ) -> Result<Vec<ProbeResult>, StorageError>;

    /// 目标最近一次的结果，从未探测过时返回 `None`
    async fn latest(&self, target_id: TargetId) -> Result<Option<ProbeResult>, StorageError>;

    /// 删除目标的全部历史
    async fn forget(&self, target_id: TargetId) -> Result<(), StorageError>;
}

/// 单个目标的有界日志
#[derive(Debug, Clone)]
pub struct HistoryLog {
    entries: VecDeque<ProbeResult>,
    capacity: usize,
}

impl HistoryLog {
    /// 创建指定容量的日志，容量至少为1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    /// 追加条目，返回被淘汰的条目数量
    pub fn push(&mut self, result: ProbeResult) -> usize {
        self.entries.push_back(result);

        let mut evicted = 0;
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// 最近 `limit` 条，最旧的在前
    pub fn recent(&self, limit: usize) -> Vec<ProbeResult> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn latest(&self) -> Option<&ProbeResult> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// 内存历史存储
///
/// 目标表由读写锁保护，每条日志各自持有互斥锁，
/// 不同目标的追加可以完全并行。
#[derive(Debug)]
pub struct MemoryHistoryStore {
    /// 目标ID到日志的映射
    logs: RwLock<HashMap<TargetId, Arc<Mutex<HistoryLog>>>>,
    /// 每个目标的容量
    capacity: usize,
    /// 默认查询条数
    default_limit: usize,
}

impl MemoryHistoryStore {
    /// 创建新的内存历史存储
    ///
    /// # 参数
    /// * `capacity` - 每个目标保留的最大条数
    /// * `default_limit` - 查询未指定数量时返回的条数
    pub fn new(capacity: usize, default_limit: usize) -> Self {
        Self {
            logs: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            default_limit: default_limit.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 获取或创建目标日志
    async fn log_for(&self, target_id: TargetId) -> Arc<Mutex<HistoryLog>> {
        if let Some(log) = self.logs.read().await.get(&target_id) {
            return Arc::clone(log);
        }

        let mut logs = self.logs.write().await;
        Arc::clone(
            logs.entry(target_id)
                .or_insert_with(|| Arc::new(Mutex::new(HistoryLog::new(self.capacity)))),
        )
    }

    async fn existing_log(&self, target_id: TargetId) -> Option<Arc<Mutex<HistoryLog>>> {
        self.logs.read().await.get(&target_id).cloned()
    }
}

impl Default for MemoryHistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY, DEFAULT_QUERY_LIMIT)
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, target_id: TargetId, result: ProbeResult) -> Result<(), StorageError> {
        if result.target_id != target_id {
            return Err(StorageError::Rejected {
                target_id,
                reason: format!("结果属于目标 {}", result.target_id),
            });
        }

        let log = self.log_for(target_id).await;
        let evicted = log.lock().await.push(result);

        if evicted > 0 {
            debug!(target_id, evicted, "历史记录超出容量，淘汰旧条目");
        }
        Ok(())
    }

    async fn query(
        &self,
        target_id: TargetId,
        limit: Option<usize>,
    ) -> Result<Vec<ProbeResult>, StorageError> {
        let limit = match limit {
            Some(limit) if limit > 0 => limit,
            _ => self.default_limit,
        };

        match self.existing_log(target_id).await {
            Some(log) => Ok(log.lock().await.recent(limit)),
            None => Ok(Vec::new()),
        }
    }

    async fn latest(&self, target_id: TargetId) -> Result<Option<ProbeResult>, StorageError> {
        match self.existing_log(target_id).await {
            Some(log) => Ok(log.lock().await.latest().cloned()),
            None => Ok(None),
        }
    }

    async fn forget(&self, target_id: TargetId) -> Result<(), StorageError> {
        self.logs.write().await.remove(&target_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{ProbeState, Target};
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;

    /// 用状态码区分条目，便于断言顺序
    fn result_with_status(target_id: TargetId, status: u16) -> ProbeResult {
        let target = Target::new(target_id, "http://example.test").with_timeout_ms(1000);
        ProbeResult::from_response(&target, status, Duration::from_millis(10))
    }

    fn statuses(results: &[ProbeResult]) -> Vec<u16> {
        results.iter().filter_map(|r| r.status_code).collect()
    }

    #[tokio::test]
    async fn test_query_unknown_target_is_empty() {
        let store = MemoryHistoryStore::default();
        assert!(store.query(42, Some(10)).await.unwrap().is_empty());
        assert!(store.latest(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_is_oldest_first() {
        let store = MemoryHistoryStore::new(10, 50);
        for status in [200, 201, 202, 203] {
            store.append(1, result_with_status(1, status)).await.unwrap();
        }

        let all = store.query(1, Some(10)).await.unwrap();
        assert_eq!(statuses(&all), vec![200, 201, 202, 203]);

        let last_two = store.query(1, Some(2)).await.unwrap();
        assert_eq!(statuses(&last_two), vec![202, 203]);
    }

    #[tokio::test]
    async fn test_cap_evicts_oldest() {
        let cap = 5;
        let store = MemoryHistoryStore::new(cap, 50);
        let total = 12u16;
        for i in 0..total {
            store.append(1, result_with_status(1, 200 + i)).await.unwrap();
        }

        let results = store.query(1, Some(total as usize)).await.unwrap();
        assert_eq!(results.len(), cap);
        assert_eq!(statuses(&results), vec![207, 208, 209, 210, 211]);
    }

    #[tokio::test]
    async fn test_default_limit_applies() {
        let store = MemoryHistoryStore::new(100, 3);
        for i in 0..10u16 {
            store.append(1, result_with_status(1, 200 + i)).await.unwrap();
        }

        assert_eq!(store.query(1, None).await.unwrap().len(), 3);
        assert_eq!(store.query(1, Some(0)).await.unwrap().len(), 3);
        assert_eq!(statuses(&store.query(1, None).await.unwrap()), vec![207, 208, 209]);
    }

    #[tokio::test]
    async fn test_latest_is_last_appended() {
        let store = MemoryHistoryStore::default();
        let now = Utc::now();

        // 后追加的结果观测时间更早、状态码更小，latest仍然返回它
        let first = result_with_status(1, 503).with_observed_at(now);
        let second = result_with_status(1, 200).with_observed_at(now - ChronoDuration::seconds(30));

        store.append(1, first).await.unwrap();
        store.append(1, second.clone()).await.unwrap();

        assert_eq!(store.latest(1).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_targets_are_isolated() {
        let store = MemoryHistoryStore::default();
        store.append(1, result_with_status(1, 200)).await.unwrap();
        store.append(2, result_with_status(2, 500)).await.unwrap();

        assert_eq!(store.query(1, None).await.unwrap().len(), 1);
        assert_eq!(
            store.latest(2).await.unwrap().map(|r| r.state),
            Some(ProbeState::Down)
        );

        store.forget(1).await.unwrap();
        assert!(store.latest(1).await.unwrap().is_none());
        assert!(store.latest(2).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_append_rejects_foreign_result() {
        let store = MemoryHistoryStore::default();

        let err = store.append(1, result_with_status(2, 200)).await.unwrap_err();
        assert!(matches!(err, StorageError::Rejected { target_id: 1, .. }));
        assert!(store.latest(1).await.unwrap().is_none());
        assert!(store.latest(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_appends_respect_cap() {
        let store = Arc::new(MemoryHistoryStore::new(100, 50));
        let mut handles = Vec::new();

        for worker in 0..8u64 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    store.append(1, result_with_status(1, 200)).await.unwrap();
                    store
                        .append(worker + 10, result_with_status(worker + 10, 200))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.query(1, Some(1000)).await.unwrap().len(), 100);
        for worker in 0..8u64 {
            assert_eq!(store.query(worker + 10, Some(1000)).await.unwrap().len(), 50);
        }
    }

    #[test]
    fn test_history_log_push_reports_evictions() {
        let mut log = HistoryLog::new(2);
        assert_eq!(log.push(result_with_status(1, 200)), 0);
        assert_eq!(log.push(result_with_status(1, 201)), 0);
        assert_eq!(log.push(result_with_status(1, 202)), 1);
        assert_eq!(log.len(), 2);
        assert_eq!(log.latest().and_then(|r| r.status_code), Some(202));
        assert_eq!(HistoryLog::new(0).capacity(), 1);
    }
}
