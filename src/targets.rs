//! 目标存储模块
//!
//! 引擎通过 `TargetStore` 读取当前的目标定义，
//! 配置层通过 `MemoryTargetStore` 的写方法更新它。

use crate::error::{MonitorError, Result};
use crate::health::{Target, TargetId};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

/// 目标存储trait
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// 列出全部目标，按ID升序
    async fn list_targets(&self) -> Result<Vec<Target>>;

    /// 获取单个目标
    ///
    /// # 返回
    /// * 目标不存在时返回 `MonitorError::TargetNotFound`
    async fn get_target(&self, id: TargetId) -> Result<Target>;
}

/// 内存目标存储
#[derive(Debug, Default)]
pub struct MemoryTargetStore {
    targets: RwLock<BTreeMap<TargetId, Target>>,
}

impl MemoryTargetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从目标列表创建，ID重复时后者覆盖前者
    pub fn from_targets(targets: impl IntoIterator<Item = Target>) -> Self {
        Self {
            targets: RwLock::new(targets.into_iter().map(|t| (t.id, t)).collect()),
        }
    }

    /// 插入或替换目标
    ///
    /// # 返回
    /// * `Option<Target>` - 被替换的旧定义
    pub async fn upsert(&self, target: Target) -> Option<Target> {
        debug!(target_id = target.id, "更新目标定义");
        self.targets.write().await.insert(target.id, target)
    }

    /// 删除目标
    pub async fn remove(&self, id: TargetId) -> Option<Target> {
        self.targets.write().await.remove(&id)
    }

    pub async fn contains(&self, id: TargetId) -> bool {
        self.targets.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.targets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.targets.read().await.is_empty()
    }
}

#[async_trait]
impl TargetStore for MemoryTargetStore {
    async fn list_targets(&self) -> Result<Vec<Target>> {
        Ok(self.targets.read().await.values().cloned().collect())
    }

    async fn get_target(&self, id: TargetId) -> Result<Target> {
        self.targets
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(MonitorError::TargetNotFound { id })
    }
}
