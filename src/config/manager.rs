//! 配置管理器模块
//!
//! 保存当前配置，计算新旧配置差异并广播更新通知

use crate::config::types::{Config, GlobalConfig};
use crate::config::watcher::{ConfigChangeEvent, ConfigWatcher};
use crate::health::{Target, TargetId};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 配置差异类型
///
/// 目标差异基于解析后的定义计算，全局默认值的变化会体现为目标修改
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigDiff {
    /// 目标添加
    TargetAdded(Target),
    /// 目标移除
    TargetRemoved(TargetId),
    /// 目标修改
    TargetModified { old: Box<Target>, new: Box<Target> },
    /// 全局配置修改
    GlobalModified,
}

/// 配置变更通知
#[derive(Debug, Clone)]
pub struct ConfigUpdateNotification {
    /// 配置版本号
    pub version: u64,
    /// 配置差异列表
    pub diffs: Vec<ConfigDiff>,
    /// 变更时间
    pub timestamp: Instant,
    /// 是否有需要重启才能生效的变更
    pub requires_restart: bool,
}

#[derive(Debug)]
struct ManagerState {
    config: Config,
    version: u64,
    last_update: Instant,
}

/// 配置管理器
pub struct ConfigManager {
    /// 当前配置、版本号和更新时间
    state: Arc<RwLock<ManagerState>>,
    /// 配置文件监控器
    watcher: Option<ConfigWatcher>,
    /// 变更处理任务
    handler: Option<JoinHandle<()>>,
    /// 配置更新通知发送器
    update_sender: broadcast::Sender<ConfigUpdateNotification>,
}

impl ConfigManager {
    /// 创建新的配置管理器
    ///
    /// # 参数
    /// * `initial_config` - 初始配置
    ///
    /// # 返回
    /// * `(Self, broadcast::Receiver<ConfigUpdateNotification>)` - 管理器和更新通知接收器
    pub fn new(initial_config: Config) -> (Self, broadcast::Receiver<ConfigUpdateNotification>) {
        let (update_sender, update_receiver) = broadcast::channel(32);

        let manager = Self {
            state: Arc::new(RwLock::new(ManagerState {
                config: initial_config,
                version: 1,
                last_update: Instant::now(),
            })),
            watcher: None,
            handler: None,
            update_sender,
        };

        (manager, update_receiver)
    }

    /// 启用配置文件监控
    ///
    /// # 参数
    /// * `config_path` - 配置文件路径
    /// * `debounce_delay` - 防抖动延迟
    pub fn enable_hot_reload<P: AsRef<Path>>(
        &mut self,
        config_path: P,
        debounce_delay: Duration,
    ) -> Result<()> {
        info!("启用配置热重载功能");

        let (mut watcher, mut change_receiver) =
            ConfigWatcher::new(config_path, debounce_delay).context("创建配置监控器失败")?;
        watcher.start().context("启动配置监控失败")?;

        let state = Arc::clone(&self.state);
        let update_sender = self.update_sender.clone();
        self.handler = Some(tokio::spawn(async move {
            loop {
                match change_receiver.recv().await {
                    Ok(change_event) => {
                        Self::handle_config_change(change_event, &state, &update_sender).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("配置变更事件积压，跳过 {} 个", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
        self.watcher = Some(watcher);

        info!("配置热重载功能已启用");
        Ok(())
    }

    async fn handle_config_change(
        change_event: ConfigChangeEvent,
        state: &Arc<RwLock<ManagerState>>,
        update_sender: &broadcast::Sender<ConfigUpdateNotification>,
    ) {
        debug!("处理配置变更: {}", change_event.config_path.display());
        Self::apply(
            state,
            update_sender,
            change_event.new_config,
            change_event.timestamp,
        )
        .await;
    }

    /// 替换当前配置并在有差异时发送通知，返回当前版本号
    async fn apply(
        state: &Arc<RwLock<ManagerState>>,
        update_sender: &broadcast::Sender<ConfigUpdateNotification>,
        new_config: Config,
        timestamp: Instant,
    ) -> u64 {
        let mut state = state.write().await;

        let diffs = calculate_config_diff(&state.config, &new_config);
        if diffs.is_empty() {
            debug!("配置无实质性变更，跳过更新");
            return state.version;
        }

        let requires_restart = global_requires_restart(&state.config.global, &new_config.global);
        state.config = new_config;
        state.version += 1;
        state.last_update = timestamp;

        let notification = ConfigUpdateNotification {
            version: state.version,
            diffs,
            timestamp,
            requires_restart,
        };

        if update_sender.send(notification).is_err() {
            warn!("配置更新通知没有接收者");
        }

        info!("配置更新完成，版本: {}", state.version);
        state.version
    }

    /// 获取当前配置
    pub async fn get_config(&self) -> Config {
        self.state.read().await.config.clone()
    }

    /// 获取当前版本号
    pub async fn get_version(&self) -> u64 {
        self.state.read().await.version
    }

    /// 获取最后更新时间
    pub async fn get_last_update(&self) -> Instant {
        self.state.read().await.last_update
    }

    /// 手动更新配置
    ///
    /// # 返回
    /// * `u64` - 更新后的版本号，无变更时不变
    pub async fn update_config(&self, new_config: Config) -> u64 {
        info!("手动更新配置");
        Self::apply(&self.state, &self.update_sender, new_config, Instant::now()).await
    }

    /// 订阅配置更新通知
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigUpdateNotification> {
        self.update_sender.subscribe()
    }
}

impl Drop for ConfigManager {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }
}

/// 计算配置差异
///
/// 目标按ID比较；结果顺序为：全局修改、按ID升序的新增与修改、按ID升序的移除
pub fn calculate_config_diff(old_config: &Config, new_config: &Config) -> Vec<ConfigDiff> {
    let mut diffs = Vec::new();

    if old_config.global != new_config.global {
        diffs.push(ConfigDiff::GlobalModified);
    }

    let old_targets: BTreeMap<TargetId, Target> = old_config
        .resolved_targets()
        .into_iter()
        .map(|t| (t.id, t))
        .collect();
    let new_targets: BTreeMap<TargetId, Target> = new_config
        .resolved_targets()
        .into_iter()
        .map(|t| (t.id, t))
        .collect();

    for (id, new_target) in &new_targets {
        match old_targets.get(id) {
            Some(old_target) if old_target != new_target => {
                diffs.push(ConfigDiff::TargetModified {
                    old: Box::new(old_target.clone()),
                    new: Box::new(new_target.clone()),
                });
            }
            Some(_) => {}
            None => diffs.push(ConfigDiff::TargetAdded(new_target.clone())),
        }
    }

    for id in old_targets.keys() {
        if !new_targets.contains_key(id) {
            diffs.push(ConfigDiff::TargetRemoved(*id));
        }
    }

    diffs
}

/// 全局配置中只有默认间隔和超时可以在运行时生效（通过目标差异）
fn global_requires_restart(old: &GlobalConfig, new: &GlobalConfig) -> bool {
    let neutral = |global: &GlobalConfig| GlobalConfig {
        default_interval_ms: 0,
        default_timeout_ms: 0,
        ..global.clone()
    };
    neutral(old) != neutral(new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::TargetConfig;

    fn target_config(id: TargetId) -> TargetConfig {
        TargetConfig {
            id,
            name: None,
            url: format!("http://example.test/{}", id),
            method: "GET".to_string(),
            expected_status: 200,
            timeout_ms: None,
            interval_ms: None,
        }
    }

    fn create_test_config() -> Config {
        Config {
            global: GlobalConfig::default(),
            targets: vec![target_config(1), target_config(2)],
        }
    }

    #[test]
    fn test_diff_added_removed_modified() {
        let old = create_test_config();
        let mut new = create_test_config();
        new.targets.remove(0);
        new.targets[0].expected_status = 204;
        new.targets.push(target_config(3));

        let diffs = calculate_config_diff(&old, &new);
        assert_eq!(diffs.len(), 3);
        assert!(matches!(
            &diffs[0],
            ConfigDiff::TargetModified { old, new } if old.id == 2 && new.expected_status == 204
        ));
        assert!(matches!(&diffs[1], ConfigDiff::TargetAdded(t) if t.id == 3));
        assert_eq!(diffs[2], ConfigDiff::TargetRemoved(1));
    }

    #[test]
    fn test_global_default_change_modifies_targets() {
        let old = create_test_config();
        let mut new = create_test_config();
        new.global.default_interval_ms = 10_000;
        new.targets[1].interval_ms = Some(60_000);

        let diffs = calculate_config_diff(&old, &new);
        assert_eq!(diffs[0], ConfigDiff::GlobalModified);
        // 目标2显式设置了与旧默认值相同的间隔，解析后无变化
        assert_eq!(diffs.len(), 2);
        assert!(matches!(
            &diffs[1],
            ConfigDiff::TargetModified { new, .. } if new.id == 1 && new.interval_ms == 10_000
        ));
        assert!(!global_requires_restart(&old.global, &new.global));
    }

    #[test]
    fn test_capacity_change_requires_restart() {
        let old = GlobalConfig::default();
        let new = GlobalConfig {
            history_capacity: 10,
            ..GlobalConfig::default()
        };
        assert!(global_requires_restart(&old, &new));
    }

    #[tokio::test]
    async fn test_config_manager_creation() {
        let (manager, _receiver) = ConfigManager::new(create_test_config());

        assert_eq!(manager.get_config().await.targets.len(), 2);
        assert_eq!(manager.get_version().await, 1);
    }

    #[tokio::test]
    async fn test_manual_config_update() {
        let (manager, mut receiver) = ConfigManager::new(create_test_config());

        let mut new_config = create_test_config();
        new_config.global.log_level = "debug".to_string();

        assert_eq!(manager.update_config(new_config.clone()).await, 2);
        assert_eq!(manager.get_config().await.global.log_level, "debug");

        let notification = receiver.recv().await.unwrap();
        assert_eq!(notification.version, 2);
        assert_eq!(notification.diffs, vec![ConfigDiff::GlobalModified]);
        assert!(notification.requires_restart);

        // 相同配置不产生新版本
        assert_eq!(manager.update_config(new_config).await, 2);
        assert!(receiver.try_recv().is_err());
    }
}
