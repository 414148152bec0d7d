//! 任务调度器模块
//!
//! 每个目标一个常驻任务：等待间隔 → 探测 → 记录并广播 → 再次等待。
//! 间隔从上一次探测完成开始计时，慢探测会推迟下一次探测。
//!
//! 所有完成的探测（定时或按需）都进入同一个记录队列，
//! 由唯一的消费者依次执行"追加历史 → 广播"，
//! 因此同一目标的结果按完成顺序落盘和推送。
//!
//! 移除目标与记录通过两把锁排序：追加历史期间持有记录锁，
//! 广播前持有发布锁并再次确认目标仍存在。

use crate::error::{MonitorError, Result};
use crate::health::prober::Prober;
use crate::health::result::ProbeResult;
use crate::health::target::{Target, TargetId};
use crate::history::HistoryStore;
use crate::hub::BroadcastHub;
use crate::targets::TargetStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch, Mutex, MutexGuard, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// 记录队列容量
const RECORDER_QUEUE_CAPACITY: usize = 1024;

/// 默认按需检测队列容量
pub const DEFAULT_CHECK_QUEUE_CAPACITY: usize = 100;

/// 单次历史追加的最长等待时间，超时后结果照常广播
pub const APPEND_TIMEOUT: Duration = Duration::from_secs(5);

/// 目标的调度状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingState {
    /// 未在调度
    Idle,
    /// 等待下一次探测
    Waiting,
    /// 探测进行中
    Probing,
}

/// 结果来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Scheduled,
    OnDemand,
}

/// 已完成、等待记录的探测
struct Completed {
    result: ProbeResult,
    origin: Origin,
    ack: Option<oneshot::Sender<Result<ProbeResult>>>,
}

/// 按需检测请求
struct CheckRequest {
    target_id: TargetId,
    ack: Option<oneshot::Sender<Result<ProbeResult>>>,
}

/// 单个目标的调度任务
struct TargetTask {
    /// 当前定义，`None` 表示目标已移除
    control: watch::Sender<Option<Target>>,
    state: watch::Receiver<SchedulingState>,
    handle: JoinHandle<()>,
}

/// 记录与移除之间的排序锁
#[derive(Debug, Default)]
struct RecordGates {
    /// 存在性检查和历史追加期间持有
    recording: Mutex<()>,
    /// 广播前的再次检查和广播期间持有
    publishing: Mutex<()>,
}

/// 在 `start` 之前保存的队列接收端
struct Receivers {
    completed: mpsc::Receiver<Completed>,
    checks: mpsc::Receiver<CheckRequest>,
}

/// 任务调度器
pub struct Scheduler {
    /// 探测器
    prober: Arc<dyn Prober>,
    /// 历史存储
    history: Arc<dyn HistoryStore>,
    /// 广播中心
    hub: Arc<BroadcastHub>,
    /// 目标存储
    targets: Arc<dyn TargetStore>,
    /// 运行中的目标任务
    tasks: RwLock<HashMap<TargetId, TargetTask>>,
    /// 记录队列发送端
    completed_tx: mpsc::Sender<Completed>,
    /// 按需检测队列发送端
    check_tx: mpsc::Sender<CheckRequest>,
    /// 记录与移除的排序锁
    gates: Arc<RecordGates>,
    /// 尚未启动的接收端
    receivers: Mutex<Option<Receivers>>,
    /// 记录和分发后台任务
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// 创建新的调度器
    ///
    /// # 参数
    /// * `prober` - 探测器
    /// * `history` - 历史存储
    /// * `hub` - 广播中心
    /// * `targets` - 目标存储，按需检测和记录前都以它为准
    /// * `check_queue_capacity` - 按需检测队列容量
    pub fn new(
        prober: Arc<dyn Prober>,
        history: Arc<dyn HistoryStore>,
        hub: Arc<BroadcastHub>,
        targets: Arc<dyn TargetStore>,
        check_queue_capacity: usize,
    ) -> Self {
        let (completed_tx, completed) = mpsc::channel(RECORDER_QUEUE_CAPACITY);
        let (check_tx, checks) = mpsc::channel(check_queue_capacity.max(1));

        Self {
            prober,
            history,
            hub,
            targets,
            tasks: RwLock::new(HashMap::new()),
            completed_tx,
            check_tx,
            gates: Arc::new(RecordGates::default()),
            receivers: Mutex::new(Some(Receivers { completed, checks })),
            background: Mutex::new(Vec::new()),
        }
    }

    /// 启动记录和分发任务，并为目标存储中的全部目标开始调度
    ///
    /// 重复调用不会产生副作用；停止后不能再次启动。
    pub async fn start(&self) -> Result<()> {
        let receivers = match self.receivers.lock().await.take() {
            Some(receivers) => receivers,
            None if self.is_running().await => {
                warn!("调度器已在运行");
                return Ok(());
            }
            None => return Err(MonitorError::QueueClosed),
        };

        let recorder = tokio::spawn(run_recorder(
            receivers.completed,
            Arc::clone(&self.history),
            Arc::clone(&self.hub),
            Arc::clone(&self.targets),
            Arc::clone(&self.gates),
        ));
        let dispatcher = tokio::spawn(run_dispatcher(
            receivers.checks,
            Arc::clone(&self.prober),
            Arc::clone(&self.targets),
            self.completed_tx.clone(),
        ));
        self.background.lock().await.extend([recorder, dispatcher]);

        let targets = self.targets.list_targets().await?;
        let count = targets.len();
        for target in targets {
            self.register(target).await;
        }

        info!("调度器已启动，共 {} 个目标", count);
        Ok(())
    }

    /// 调度器是否在运行
    pub async fn is_running(&self) -> bool {
        !self.background.lock().await.is_empty()
    }

    /// 停止所有调度
    ///
    /// 等待中的计时全部取消，进行中的探测不等待
    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.write().await;
        for (_, task) in tasks.drain() {
            task.handle.abort();
        }
        drop(tasks);

        let mut background = self.background.lock().await;
        let stopped = !background.is_empty();
        for handle in background.drain(..) {
            handle.abort();
        }

        if stopped {
            info!("调度器已停止");
        }
    }

    /// 开始调度目标；已在调度的目标按更新处理
    pub async fn register(&self, target: Target) {
        if target.may_overlap() {
            warn!(
                target_id = target.id,
                timeout_ms = target.timeout_ms,
                interval_ms = target.interval_ms,
                "探测超时大于探测间隔"
            );
        }

        let mut tasks = self.tasks.write().await;

        if let Some(task) = tasks.get(&target.id) {
            if !task.handle.is_finished() {
                debug!(target_id = target.id, "目标已在调度，按更新处理");
                task.control.send_replace(Some(target));
                return;
            }
        }

        let id = target.id;
        let interval_ms = target.interval_ms;
        let (control, control_rx) = watch::channel(Some(target));
        let (state_tx, state) = watch::channel(SchedulingState::Waiting);

        let handle = tokio::spawn(run_target(
            control_rx,
            state_tx,
            Arc::clone(&self.prober),
            self.completed_tx.clone(),
        ));

        tasks.insert(
            id,
            TargetTask {
                control,
                state,
                handle,
            },
        );
        info!(target_id = id, interval_ms, "目标开始调度");
    }

    /// 替换目标定义
    ///
    /// 等待中的计时被取消并按新间隔重新开始；进行中的探测不受影响。
    /// 未在调度的目标会被注册。
    pub async fn update(&self, target: Target) {
        self.register(target).await;
    }

    /// 停止调度目标
    ///
    /// 等待中的计时立即取消；进行中的探测完成后其结果被丢弃。
    ///
    /// # 返回
    /// * `bool` - 目标是否在调度
    pub async fn remove(&self, id: TargetId) -> bool {
        match self.tasks.write().await.remove(&id) {
            Some(task) => {
                task.control.send_replace(None);
                info!(target_id = id, "目标停止调度");
                true
            }
            None => false,
        }
    }

    /// 目标当前的调度状态，未注册时返回 `None`
    pub async fn state(&self, id: TargetId) -> Option<SchedulingState> {
        self.tasks
            .read()
            .await
            .get(&id)
            .map(|task| *task.state.borrow())
    }

    /// 订阅目标的调度状态变化
    pub async fn watch_state(&self, id: TargetId) -> Option<watch::Receiver<SchedulingState>> {
        self.tasks.read().await.get(&id).map(|task| task.state.clone())
    }

    /// 正在调度的目标ID，升序
    pub async fn scheduled_targets(&self) -> Vec<TargetId> {
        let mut ids: Vec<_> = self.tasks.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// 阻止新的广播，持有期间从目标存储删除的目标不会再有结果推送
    pub(crate) async fn publishing_guard(&self) -> MutexGuard<'_, ()> {
        self.gates.publishing.lock().await
    }

    /// 等待进行中的历史追加结束，持有期间不会有新的追加开始
    pub(crate) async fn recording_guard(&self) -> MutexGuard<'_, ()> {
        self.gates.recording.lock().await
    }

    /// 请求一次按需检测
    ///
    /// 立即返回；检测在后台基于当前定义执行，不影响目标自身的计时。
    /// 与定时探测重叠时两次结果都会被记录。队列满时等待空位。
    pub async fn request_check(&self, id: TargetId) -> Result<()> {
        self.enqueue_check(id, None).await
    }

    /// 执行一次按需检测并等待记录完成的结果
    pub async fn check_now(&self, id: TargetId) -> Result<ProbeResult> {
        let (ack, done) = oneshot::channel();
        self.enqueue_check(id, Some(ack)).await?;
        done.await.map_err(|_| MonitorError::QueueClosed)?
    }

    async fn enqueue_check(
        &self,
        id: TargetId,
        ack: Option<oneshot::Sender<Result<ProbeResult>>>,
    ) -> Result<()> {
        self.targets.get_target(id).await?;

        if !self.is_running().await {
            return Err(MonitorError::QueueClosed);
        }

        self.check_tx
            .send(CheckRequest { target_id: id, ack })
            .await
            .map_err(|_| MonitorError::QueueClosed)?;

        debug!(target_id = id, "按需检测已入队");
        Ok(())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().values() {
            task.handle.abort();
        }
        for handle in self.background.get_mut().iter() {
            handle.abort();
        }
    }
}

/// 单个目标的调度循环
async fn run_target(
    mut control: watch::Receiver<Option<Target>>,
    state: watch::Sender<SchedulingState>,
    prober: Arc<dyn Prober>,
    completed_tx: mpsc::Sender<Completed>,
) {
    loop {
        let target = match control.borrow_and_update().clone() {
            Some(target) => target,
            None => break,
        };

        state.send_replace(SchedulingState::Waiting);
        tokio::select! {
            _ = sleep(target.interval()) => {}
            changed = control.changed() => {
                // 定义被替换或目标被移除：放弃本次等待
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }

        state.send_replace(SchedulingState::Probing);
        let result = prober.probe(&target).await;

        if control.borrow().is_none() {
            debug!(target_id = target.id, "目标已移除，丢弃探测结果");
            break;
        }

        let completed = Completed {
            result,
            origin: Origin::Scheduled,
            ack: None,
        };
        // 记录积压时丢弃本次结果，调度本身不等待存储
        match completed_tx.try_send(completed) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(target_id = target.id, "记录队列已满，丢弃探测结果");
            }
            Err(TrySendError::Closed(_)) => break,
        }
    }

    state.send_replace(SchedulingState::Idle);
}

/// 按需检测分发循环
async fn run_dispatcher(
    mut checks: mpsc::Receiver<CheckRequest>,
    prober: Arc<dyn Prober>,
    targets: Arc<dyn TargetStore>,
    completed_tx: mpsc::Sender<Completed>,
) {
    let mut running = JoinSet::new();

    loop {
        tokio::select! {
            request = checks.recv() => {
                let Some(request) = request else { break };

                let target = match targets.get_target(request.target_id).await {
                    Ok(target) => target,
                    Err(e) => {
                        if let Some(ack) = request.ack {
                            let _ = ack.send(Err(e));
                        }
                        continue;
                    }
                };

                let prober = Arc::clone(&prober);
                let completed_tx = completed_tx.clone();
                running.spawn(async move {
                    let result = prober.probe(&target).await;
                    let completed = Completed {
                        result,
                        origin: Origin::OnDemand,
                        ack: request.ack,
                    };
                    let _ = completed_tx.send(completed).await;
                });
            }
            Some(joined) = running.join_next(), if !running.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("按需检测任务异常退出: {}", e);
                    }
                }
            }
        }
    }
}

/// 记录循环：追加历史后广播
async fn run_recorder(
    mut completed: mpsc::Receiver<Completed>,
    history: Arc<dyn HistoryStore>,
    hub: Arc<BroadcastHub>,
    targets: Arc<dyn TargetStore>,
    gates: Arc<RecordGates>,
) {
    while let Some(Completed {
        result,
        origin,
        ack,
    }) = completed.recv().await
    {
        let target_id = result.target_id;

        match record(&result, history.as_ref(), &hub, targets.as_ref(), &gates).await {
            Some(delivered) => {
                debug!(
                    target_id,
                    state = %result.state,
                    status_code = ?result.status_code,
                    latency_ms = ?result.latency_ms,
                    on_demand = origin == Origin::OnDemand,
                    delivered,
                    "探测完成"
                );
                if let Some(ack) = ack {
                    let _ = ack.send(Ok(result));
                }
            }
            None => {
                debug!(target_id, "目标已移除，丢弃探测结果");
                if let Some(ack) = ack {
                    let _ = ack.send(Err(MonitorError::TargetNotFound { id: target_id }));
                }
            }
        }
    }
}

/// 追加并广播一条结果
///
/// # 返回
/// * `Option<usize>` - 投递的观察者数量；目标已移除时为 `None`
async fn record(
    result: &ProbeResult,
    history: &dyn HistoryStore,
    hub: &BroadcastHub,
    targets: &dyn TargetStore,
    gates: &RecordGates,
) -> Option<usize> {
    let target_id = result.target_id;

    let _recording = gates.recording.lock().await;
    if !is_registered(targets, target_id).await {
        return None;
    }

    match timeout(APPEND_TIMEOUT, history.append(target_id, result.clone())).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(target_id, "写入探测历史失败: {}", e),
        Err(_) => warn!(target_id, "写入探测历史超时"),
    }

    let _publishing = gates.publishing.lock().await;
    // 追加期间目标可能已被移除
    if !is_registered(targets, target_id).await {
        return None;
    }

    Some(hub.publish(result).await)
}

async fn is_registered(targets: &dyn TargetStore, id: TargetId) -> bool {
    !matches!(
        targets.get_target(id).await,
        Err(MonitorError::TargetNotFound { .. })
    )
}
