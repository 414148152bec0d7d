//! 广播中心模块
//!
//! 把每条新结果扇出给订阅了该目标（或全部目标）的观察者。
//!
//! 投递是非阻塞、尽力而为的：每个观察者有一个小容量邮箱，
//! 满时丢弃最旧的条目、保留最新结果，因此观察者至少能收到最后一条。
//! 接收端已丢弃、或连续溢出达到上限而从未取走的观察者会被移除，
//! 慢观察者不会拖慢探测、存储或其他观察者。

mod mailbox;

use crate::health::{ProbeResult, TargetId};
use mailbox::{Mailbox, Offer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 默认邮箱容量
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 1;

/// 默认允许的连续溢出次数
pub const DEFAULT_MAX_MISSED: u32 = 100;

/// 订阅主题
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    /// 单个目标
    Target(TargetId),
    /// 所有目标
    All,
}

impl Topic {
    pub fn matches(&self, target_id: TargetId) -> bool {
        match self {
            Topic::Target(id) => *id == target_id,
            Topic::All => true,
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::Target(id) => write!(f, "target:{}", id),
            Topic::All => write!(f, "all"),
        }
    }
}

/// 观察者标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// 投递句柄，由订阅者持有
///
/// 句柄被丢弃后，下一次发布时中心会移除该观察者。
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    mailbox: Arc<Mailbox>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// 等待下一条结果
    ///
    /// 取消订阅（或被中心移除）且邮箱已取空后返回 `None`
    pub async fn recv(&mut self) -> Option<ProbeResult> {
        self.mailbox.recv().await
    }

    /// 非阻塞读取
    pub fn try_recv(&mut self) -> Option<ProbeResult> {
        self.mailbox.try_take()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.mailbox.detach();
    }
}

#[derive(Debug)]
struct Subscriber {
    topic: Topic,
    mailbox: Arc<Mailbox>,
}

/// 广播中心
#[derive(Debug)]
pub struct BroadcastHub {
    /// 订阅表：发布时并发读取，订阅/取消/移除时串行写入
    subscribers: RwLock<HashMap<SubscriptionId, Subscriber>>,
    /// 每个邮箱的容量
    buffer: usize,
    /// 连续溢出上限
    max_missed: u32,
}

impl BroadcastHub {
    /// 创建新的广播中心
    ///
    /// # 参数
    /// * `buffer` - 每个观察者的邮箱容量
    /// * `max_missed` - 连续溢出多少次后视为卡死
    pub fn new(buffer: usize, max_missed: u32) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
            max_missed: max_missed.max(1),
        }
    }

    /// 注册观察者
    pub async fn subscribe(&self, topic: Topic) -> Subscription {
        let id = SubscriptionId::new();
        let mailbox = Arc::new(Mailbox::new(self.buffer, self.max_missed));

        let mut subscribers = self.subscribers.write().await;
        // 长时间没有发布的主题上，已丢弃的句柄在这里清理
        subscribers.retain(|_, subscriber| !subscriber.mailbox.is_detached());
        subscribers.insert(
            id,
            Subscriber {
                topic,
                mailbox: Arc::clone(&mailbox),
            },
        );

        info!(subscription = %id, topic = %topic, "观察者已订阅");
        Subscription { id, topic, mailbox }
    }

    /// 移除观察者并关闭其投递通道
    ///
    /// # 返回
    /// * `bool` - 观察者是否存在
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self.subscribers.write().await.remove(&id) {
            Some(subscriber) => {
                subscriber.mailbox.close();
                info!(subscription = %id, "观察者已取消订阅");
                true
            }
            None => false,
        }
    }

    /// 移除订阅了该目标的全部观察者并关闭其投递通道
    ///
    /// 订阅全部目标的观察者不受影响
    ///
    /// # 返回
    /// * `usize` - 被移除的观察者数量
    pub async fn close_topic(&self, target_id: TargetId) -> usize {
        let topic = Topic::Target(target_id);
        let mut subscribers = self.subscribers.write().await;
        let before = subscribers.len();

        subscribers.retain(|id, subscriber| {
            if subscriber.topic != topic {
                return true;
            }
            subscriber.mailbox.close();
            debug!(subscription = %id, topic = %topic, "主题已关闭，移除观察者");
            false
        });

        before - subscribers.len()
    }

    /// 发布结果
    ///
    /// 不会阻塞；没有订阅者时什么也不做。
    ///
    /// # 返回
    /// * `usize` - 成功投递的观察者数量
    pub async fn publish(&self, result: &ProbeResult) -> usize {
        let mut delivered = 0;
        let mut evicted = Vec::new();

        {
            let subscribers = self.subscribers.read().await;
            for (id, subscriber) in subscribers.iter() {
                if !subscriber.topic.matches(result.target_id) {
                    continue;
                }

                match subscriber.mailbox.offer(result.clone()) {
                    Offer::Queued => delivered += 1,
                    Offer::Overwrote => {
                        delivered += 1;
                        debug!(subscription = %id, "观察者邮箱已满，覆盖旧结果");
                    }
                    Offer::Stuck => {
                        delivered += 1;
                        evicted.push((*id, "长时间未读取"));
                    }
                    Offer::Detached => evicted.push((*id, "连接已断开")),
                }
            }
        }

        if !evicted.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for (id, reason) in evicted {
                if let Some(subscriber) = subscribers.remove(&id) {
                    subscriber.mailbox.close();
                    warn!(subscription = %id, "移除观察者: {}", reason);
                }
            }
        }

        delivered
    }

    /// 当前观察者数量
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER, DEFAULT_MAX_MISSED)
    }
}
