//! 集成测试共用的探测器和历史存储

#![allow(dead_code)]

use async_trait::async_trait;
use pulse_monitor::error::StorageError;
use pulse_monitor::{
    HistoryStore, MemoryHistoryStore, Monitor, MonitorSettings, ProbeResult, Prober, Target,
    TargetId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// 按目标预设耗时和状态码的探测器，记录每次探测的开始时间
#[derive(Default)]
pub struct ScriptedProber {
    delays: Mutex<HashMap<TargetId, Duration>>,
    statuses: Mutex<HashMap<TargetId, u16>>,
    starts: Mutex<Vec<(TargetId, Instant)>>,
}

impl ScriptedProber {
    pub fn with_delay(self, id: TargetId, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(id, delay);
        self
    }

    pub fn with_status(self, id: TargetId, status: u16) -> Self {
        self.statuses.lock().unwrap().insert(id, status);
        self
    }

    pub fn calls(&self, id: TargetId) -> usize {
        self.starts.lock().unwrap().iter().filter(|(t, _)| *t == id).count()
    }

    pub fn starts(&self, id: TargetId) -> Vec<Instant> {
        self.starts
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| *t == id)
            .map(|(_, at)| *at)
            .collect()
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, target: &Target) -> ProbeResult {
        self.starts.lock().unwrap().push((target.id, Instant::now()));
        let delay = self.delays.lock().unwrap().get(&target.id).copied();
        let status = self.statuses.lock().unwrap().get(&target.id).copied();

        let delay = delay.unwrap_or(Duration::from_millis(1));
        sleep(delay).await;
        ProbeResult::from_response(target, status.unwrap_or(200), delay)
    }
}

/// 统计追加次数的历史存储，可设置为失败、慢写或永不完成
#[derive(Default)]
pub struct CountingHistory {
    inner: MemoryHistoryStore,
    appends: AtomicUsize,
    failing: AtomicBool,
    append_delay: Option<Duration>,
    stalled: bool,
}

impl CountingHistory {
    /// 每次追加先等待 `delay` 再写入
    pub fn slow(delay: Duration) -> Self {
        Self {
            append_delay: Some(delay),
            ..Self::default()
        }
    }

    /// 追加永远不完成
    pub fn stalled() -> Self {
        Self {
            stalled: true,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        let history = Self::default();
        history.failing.store(true, Ordering::SeqCst);
        history
    }

    pub fn appends(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HistoryStore for CountingHistory {
    async fn append(&self, target_id: TargetId, result: ProbeResult) -> Result<(), StorageError> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        if self.stalled {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.append_delay {
            sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("disk full".to_string()));
        }
        self.inner.append(target_id, result).await
    }

    async fn query(
        &self,
        target_id: TargetId,
        limit: Option<usize>,
    ) -> Result<Vec<ProbeResult>, StorageError> {
        self.inner.query(target_id, limit).await
    }

    async fn latest(&self, target_id: TargetId) -> Result<Option<ProbeResult>, StorageError> {
        self.inner.latest(target_id).await
    }

    async fn forget(&self, target_id: TargetId) -> Result<(), StorageError> {
        self.inner.forget(target_id).await
    }
}

pub fn monitor_with(
    prober: Arc<ScriptedProber>,
    history: Arc<CountingHistory>,
    targets: Vec<Target>,
) -> Monitor {
    Monitor::new(MonitorSettings::default(), prober, history, targets)
}
