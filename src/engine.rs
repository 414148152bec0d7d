//! 监控引擎
//!
//! 把目标存储、探测器、历史存储、调度器和广播中心组装在一起，
//! 是命令行和 Web 层使用的唯一入口。

use crate::config::{Config, ConfigDiff, ConfigUpdateNotification, GlobalConfig};
use crate::error::{MonitorError, Result};
use crate::health::{HttpProber, ProbeResult, Prober, Scheduler, SchedulingState, Target, TargetId};
use crate::history::{HistoryStats, HistoryStore, MemoryHistoryStore};
use crate::hub::{BroadcastHub, Subscription, SubscriptionId, Topic};
use crate::targets::{MemoryTargetStore, TargetStore};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 引擎运行参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    /// 每个目标保留的历史条数
    pub history_capacity: usize,
    /// 历史查询默认条数
    pub default_history_limit: usize,
    /// 观察者邮箱容量
    pub subscriber_buffer: usize,
    /// 观察者最大连续溢出次数
    pub subscriber_max_missed: u32,
    /// 按需检测队列容量
    pub check_queue_capacity: usize,
}

impl From<&GlobalConfig> for MonitorSettings {
    fn from(global: &GlobalConfig) -> Self {
        Self {
            history_capacity: global.history_capacity,
            default_history_limit: global.default_history_limit,
            subscriber_buffer: global.subscriber_buffer,
            subscriber_max_missed: global.subscriber_max_missed,
            check_queue_capacity: global.check_queue_capacity,
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from(&GlobalConfig::default())
    }
}

/// 监控引擎
pub struct Monitor {
    settings: MonitorSettings,
    targets: Arc<MemoryTargetStore>,
    history: Arc<dyn HistoryStore>,
    hub: Arc<BroadcastHub>,
    scheduler: Scheduler,
}

impl Monitor {
    /// 创建新的监控引擎
    ///
    /// # 参数
    /// * `settings` - 运行参数
    /// * `prober` - 探测器
    /// * `history` - 历史存储
    /// * `targets` - 初始目标集合
    pub fn new(
        settings: MonitorSettings,
        prober: Arc<dyn Prober>,
        history: Arc<dyn HistoryStore>,
        targets: Vec<Target>,
    ) -> Self {
        let targets = Arc::new(MemoryTargetStore::from_targets(targets));
        let hub = Arc::new(BroadcastHub::new(
            settings.subscriber_buffer,
            settings.subscriber_max_missed,
        ));
        let scheduler = Scheduler::new(
            prober,
            Arc::clone(&history),
            Arc::clone(&hub),
            Arc::clone(&targets) as Arc<dyn TargetStore>,
            settings.check_queue_capacity,
        );

        Self {
            settings,
            targets,
            history,
            hub,
            scheduler,
        }
    }

    /// 按配置创建使用HTTP探测器和内存历史的引擎
    pub fn from_config(config: &Config) -> Result<Self> {
        let settings = MonitorSettings::from(&config.global);
        let prober = Arc::new(HttpProber::new()?);
        let history = Arc::new(MemoryHistoryStore::new(
            settings.history_capacity,
            settings.default_history_limit,
        ));

        Ok(Self::new(settings, prober, history, config.resolved_targets()))
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// 开始调度全部目标
    pub async fn start(&self) -> Result<()> {
        self.scheduler.start().await?;
        info!("监控引擎已启动");
        Ok(())
    }

    /// 停止调度，进行中的探测不等待
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        info!("监控引擎已停止");
    }

    pub async fn is_running(&self) -> bool {
        self.scheduler.is_running().await
    }

    /// 请求一次按需检测，结果经历史和广播送达
    pub async fn request_check(&self, id: TargetId) -> Result<()> {
        self.scheduler.request_check(id).await
    }

    /// 执行一次按需检测并返回结果
    pub async fn check_now(&self, id: TargetId) -> Result<ProbeResult> {
        self.scheduler.check_now(id).await
    }

    /// 订阅结果推送
    ///
    /// 订阅单个目标时目标必须存在
    pub async fn subscribe(&self, topic: Topic) -> Result<Subscription> {
        if let Topic::Target(id) = topic {
            self.targets.get_target(id).await?;
        }
        Ok(self.hub.subscribe(topic).await)
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.hub.unsubscribe(id).await
    }

    /// 目标最近的历史，最旧的在前
    pub async fn history(&self, id: TargetId, limit: Option<usize>) -> Result<Vec<ProbeResult>> {
        self.targets.get_target(id).await?;
        Ok(self.history.query(id, limit).await?)
    }

    /// 目标最近一次结果
    pub async fn latest(&self, id: TargetId) -> Result<Option<ProbeResult>> {
        self.targets.get_target(id).await?;
        Ok(self.history.latest(id).await?)
    }

    /// 最近 `limit` 条历史的统计
    pub async fn stats(&self, id: TargetId, limit: Option<usize>) -> Result<HistoryStats> {
        let results = self.history(id, limit).await?;
        Ok(HistoryStats::from_results(&results))
    }

    /// 全部目标，按ID升序
    pub async fn targets(&self) -> Result<Vec<Target>> {
        self.targets.list_targets().await
    }

    pub async fn target(&self, id: TargetId) -> Result<Target> {
        self.targets.get_target(id).await
    }

    /// 目标的调度状态，引擎未运行时为 `Idle`
    pub async fn scheduling_state(&self, id: TargetId) -> Result<SchedulingState> {
        self.targets.get_target(id).await?;
        Ok(self
            .scheduler
            .state(id)
            .await
            .unwrap_or(SchedulingState::Idle))
    }

    /// 添加目标，引擎运行中时立即开始调度
    pub async fn add_target(&self, target: Target) -> Result<()> {
        target.validate().map_err(MonitorError::InvalidTarget)?;
        if self.targets.contains(target.id).await {
            return Err(MonitorError::InvalidTarget(format!(
                "目标 {} 已存在",
                target.id
            )));
        }

        self.put_target(target).await;
        Ok(())
    }

    /// 替换目标定义
    ///
    /// 等待中的计时按新间隔重新开始，进行中的探测不受影响
    pub async fn update_target(&self, target: Target) -> Result<()> {
        target.validate().map_err(MonitorError::InvalidTarget)?;
        self.targets.get_target(target.id).await?;

        self.put_target(target).await;
        Ok(())
    }

    async fn put_target(&self, target: Target) {
        let id = target.id;
        self.targets.upsert(target.clone()).await;
        if self.scheduler.is_running().await {
            self.scheduler.register(target).await;
        }
        debug!(target_id = id, "目标定义已更新");
    }

    /// 移除目标
    ///
    /// 之后不会再有该目标的结果被记录或广播，历史一并删除，
    /// 只订阅该目标的观察者收到通道结束。
    pub async fn remove_target(&self, id: TargetId) -> Result<()> {
        {
            let _publishing = self.scheduler.publishing_guard().await;
            self.targets
                .remove(id)
                .await
                .ok_or(MonitorError::TargetNotFound { id })?;
        }
        self.scheduler.remove(id).await;

        {
            // 进行中的追加结束后再删除，避免日志被重新创建
            let _recording = self.scheduler.recording_guard().await;
            if let Err(e) = self.history.forget(id).await {
                warn!(target_id = id, "删除目标历史失败: {}", e);
            }
        }

        let closed = self.hub.close_topic(id).await;
        info!(target_id = id, closed, "目标已移除");
        Ok(())
    }

    /// 应用配置差异
    ///
    /// 单个差异失败只记录日志，不影响其余差异
    pub async fn apply_config_diffs(&self, diffs: &[ConfigDiff]) {
        for diff in diffs {
            let outcome = match diff {
                ConfigDiff::TargetAdded(target) => {
                    if self.targets.contains(target.id).await {
                        self.update_target(target.clone()).await
                    } else {
                        self.add_target(target.clone()).await
                    }
                }
                ConfigDiff::TargetRemoved(id) => self.remove_target(*id).await,
                ConfigDiff::TargetModified { new, .. } => {
                    if self.targets.contains(new.id).await {
                        self.update_target((**new).clone()).await
                    } else {
                        self.add_target((**new).clone()).await
                    }
                }
                ConfigDiff::GlobalModified => {
                    debug!("全局配置已修改");
                    Ok(())
                }
            };

            if let Err(e) = outcome {
                warn!("应用配置变更失败 {:?}: {}", diff, e);
            }
        }
    }

    /// 监听配置更新通知并应用
    pub fn spawn_config_listener(
        self: &Arc<Self>,
        mut receiver: broadcast::Receiver<ConfigUpdateNotification>,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(notification) => {
                        info!(
                            "应用配置更新，版本: {}，变更数: {}",
                            notification.version,
                            notification.diffs.len()
                        );
                        if notification.requires_restart {
                            warn!("部分全局配置需要重启后生效");
                        }
                        monitor.apply_config_diffs(&notification.diffs).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("配置更新通知积压，跳过 {} 个", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
