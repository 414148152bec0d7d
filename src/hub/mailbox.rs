//! 订阅者投递邮箱
//!
//! 容量有界；满时丢弃最旧的条目，保留最新结果。

use crate::health::ProbeResult;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// 投递结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    /// 已放入邮箱
    Queued,
    /// 邮箱已满，最旧的条目被覆盖
    Overwrote,
    /// 连续覆盖次数达到上限，观察者视为卡死
    Stuck,
    /// 观察者已断开
    Detached,
}

#[derive(Debug, Default)]
struct MailboxState {
    queue: VecDeque<ProbeResult>,
    /// 自上次取走后连续被覆盖的次数
    missed: u32,
    /// 由中心关闭，剩余条目仍可读取
    closed: bool,
    /// 接收端已丢弃
    detached: bool,
}

#[derive(Debug)]
pub(crate) struct Mailbox {
    state: Mutex<MailboxState>,
    notify: Notify,
    capacity: usize,
    max_missed: u32,
}

impl Mailbox {
    pub(crate) fn new(capacity: usize, max_missed: u32) -> Self {
        Self {
            state: Mutex::new(MailboxState::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
            max_missed: max_missed.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 非阻塞投递
    pub(crate) fn offer(&self, result: ProbeResult) -> Offer {
        let outcome = {
            let mut state = self.lock();
            if state.detached || state.closed {
                return Offer::Detached;
            }

            if state.queue.len() >= self.capacity {
                state.queue.pop_front();
                state.queue.push_back(result);
                state.missed += 1;
                if state.missed >= self.max_missed {
                    Offer::Stuck
                } else {
                    Offer::Overwrote
                }
            } else {
                state.queue.push_back(result);
                Offer::Queued
            }
        };

        self.notify.notify_one();
        outcome
    }

    pub(crate) fn try_take(&self) -> Option<ProbeResult> {
        let mut state = self.lock();
        let result = state.queue.pop_front();
        if result.is_some() {
            state.missed = 0;
        }
        result
    }

    /// 等待下一条结果；邮箱关闭且已取空时返回 `None`
    pub(crate) async fn recv(&self) -> Option<ProbeResult> {
        loop {
            {
                let mut state = self.lock();
                if let Some(result) = state.queue.pop_front() {
                    state.missed = 0;
                    return Some(result);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub(crate) fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }

    pub(crate) fn detach(&self) {
        self.lock().detached = true;
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.lock().detached
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().queue.len()
    }
}
