//! 调度行为测试
//!
//! 使用暂停的时钟，所有时间点都是确定的

mod common;

use common::{monitor_with, CountingHistory, ScriptedProber};
use pulse_monitor::{HistoryStore, ProbeState, Target, Topic};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

fn target(id: u64, interval_ms: u64) -> Target {
    Target::new(id, format!("http://t{}.test", id)).with_interval_ms(interval_ms)
}

#[tokio::test(start_paused = true)]
async fn test_interval_measured_from_completion() {
    let prober = Arc::new(ScriptedProber::default().with_delay(1, Duration::from_millis(500)));
    let history = Arc::new(CountingHistory::default());
    let monitor = monitor_with(prober.clone(), history.clone(), vec![target(1, 1000)]);
    monitor.start().await.unwrap();

    // 第一次探测 1000ms 开始、1500ms 完成，第二次 2500ms 开始
    sleep(Duration::from_millis(2400)).await;
    assert_eq!(prober.calls(1), 1);
    assert_eq!(history.appends(), 1);

    sleep(Duration::from_millis(700)).await;
    let starts = prober.starts(1);
    assert_eq!(starts.len(), 2);
    assert!(starts[1] - starts[0] >= Duration::from_millis(1500));
    assert_eq!(history.appends(), 2);

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_targets_are_scheduled_independently() {
    let prober = Arc::new(ScriptedProber::default().with_delay(1, Duration::from_secs(10)));
    let history = Arc::new(CountingHistory::default());
    let monitor = monitor_with(
        prober.clone(),
        history.clone(),
        vec![target(1, 1000), target(2, 1000)],
    );
    monitor.start().await.unwrap();

    // 目标1的慢探测不拖慢目标2
    sleep(Duration::from_millis(5500)).await;
    assert_eq!(prober.calls(1), 1);
    assert_eq!(prober.calls(2), 5);
    assert_eq!(history.query(2, Some(10)).await.unwrap().len(), 5);

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_remove_discards_in_flight_probe() {
    let prober = Arc::new(ScriptedProber::default().with_delay(1, Duration::from_millis(500)));
    let history = Arc::new(CountingHistory::default());
    let monitor = monitor_with(prober.clone(), history.clone(), vec![target(1, 1000)]);
    monitor.start().await.unwrap();
    let mut all = monitor.subscribe(Topic::All).await.unwrap();

    // 1200ms 时探测正在进行
    sleep(Duration::from_millis(1200)).await;
    assert_eq!(prober.calls(1), 1);
    monitor.remove_target(1).await.unwrap();

    sleep(Duration::from_secs(5)).await;
    assert_eq!(prober.calls(1), 1);
    assert_eq!(history.appends(), 0);
    assert!(all.try_recv().is_none());
    assert!(monitor.scheduling_state(1).await.is_err());

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_remove_during_slow_append_leaves_no_trace() {
    let prober = Arc::new(ScriptedProber::default());
    let history = Arc::new(CountingHistory::slow(Duration::from_millis(200)));
    let monitor = monitor_with(prober.clone(), history.clone(), vec![target(1, 1000)]);
    monitor.start().await.unwrap();
    let mut all = monitor.subscribe(Topic::All).await.unwrap();

    // 1001ms 探测完成，追加持续到 1201ms
    sleep(Duration::from_millis(1050)).await;
    monitor.remove_target(1).await.unwrap();
    sleep(Duration::from_secs(1)).await;

    assert_eq!(history.appends(), 1);
    assert!(history.query(1, Some(10)).await.unwrap().is_empty());
    assert!(history.latest(1).await.unwrap().is_none());
    assert!(all.try_recv().is_none());

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stalled_storage_does_not_stop_monitoring() {
    let prober = Arc::new(ScriptedProber::default());
    let history = Arc::new(CountingHistory::stalled());
    let monitor = monitor_with(
        prober.clone(),
        history.clone(),
        vec![target(1, 1000), target(2, 1000)],
    );
    monitor.start().await.unwrap();
    let mut subscription = monitor.subscribe(Topic::Target(2)).await.unwrap();

    let first = timeout(Duration::from_secs(30), subscription.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.target_id, 2);

    sleep(Duration::from_secs(20)).await;
    assert!(prober.calls(1) >= 20);
    assert!(prober.calls(2) >= 20);
    assert!(history.appends() >= 4);

    // 记录仍在推进时移除不会永久阻塞
    timeout(Duration::from_secs(30), monitor.remove_target(1))
        .await
        .unwrap()
        .unwrap();

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_no_appends_after_removal() {
    let prober = Arc::new(ScriptedProber::default());
    let history = Arc::new(CountingHistory::default());
    let monitor = monitor_with(prober.clone(), history.clone(), vec![target(1, 1000)]);
    monitor.start().await.unwrap();

    sleep(Duration::from_millis(3500)).await;
    let before = history.appends();
    assert_eq!(before, 3);

    monitor.remove_target(1).await.unwrap();
    sleep(Duration::from_secs(10)).await;
    assert_eq!(history.appends(), before);
    assert!(history.query(1, None).await.unwrap().is_empty());

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_update_restarts_pending_wait() {
    let prober = Arc::new(ScriptedProber::default());
    let history = Arc::new(CountingHistory::default());
    let monitor = monitor_with(prober.clone(), history.clone(), vec![target(1, 1000)]);
    monitor.start().await.unwrap();

    sleep(Duration::from_millis(600)).await;
    monitor.update_target(target(1, 2000)).await.unwrap();

    // 新间隔从更新时刻起算：2600ms
    sleep(Duration::from_millis(1900)).await;
    assert_eq!(prober.calls(1), 0);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(prober.calls(1), 1);

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_on_demand_overlap_is_recorded_twice() {
    let prober = Arc::new(ScriptedProber::default().with_delay(1, Duration::from_millis(500)));
    let history = Arc::new(CountingHistory::default());
    let monitor = monitor_with(prober.clone(), history.clone(), vec![target(1, 1000)]);
    monitor.start().await.unwrap();

    // 定时探测进行中再触发按需检测
    sleep(Duration::from_millis(1100)).await;
    let on_demand = monitor.check_now(1).await.unwrap();

    assert_eq!(prober.calls(1), 2);
    assert_eq!(history.appends(), 2);
    let recorded = monitor.history(1, None).await.unwrap();
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[1], on_demand);

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_on_demand_does_not_shift_schedule() {
    let prober = Arc::new(ScriptedProber::default());
    let history = Arc::new(CountingHistory::default());
    let monitor = monitor_with(prober.clone(), history.clone(), vec![target(1, 1000)]);
    monitor.start().await.unwrap();

    sleep(Duration::from_millis(500)).await;
    monitor.request_check(1).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(prober.calls(1), 1);

    // 定时探测仍在 1000ms 左右发生
    sleep(Duration::from_millis(450)).await;
    assert_eq!(prober.calls(1), 2);

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_storage_failure_still_broadcasts_and_reschedules() {
    let prober = Arc::new(ScriptedProber::default().with_status(1, 503));
    let history = Arc::new(CountingHistory::failing());
    let monitor = monitor_with(prober.clone(), history.clone(), vec![target(1, 1000)]);
    monitor.start().await.unwrap();
    let mut subscription = monitor.subscribe(Topic::Target(1)).await.unwrap();

    for _ in 0..2 {
        let result = timeout(Duration::from_secs(2), subscription.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.state, ProbeState::Down);
        assert_eq!(result.status_code, Some(503));
    }

    assert_eq!(history.appends(), 2);
    assert_eq!(monitor.latest(1).await.unwrap(), None);
    assert!(monitor.is_running().await);

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_slow_observer_keeps_latest_result() {
    let prober = Arc::new(ScriptedProber::default());
    let history = Arc::new(CountingHistory::default());
    let monitor = monitor_with(prober.clone(), history.clone(), vec![target(1, 60_000)]);
    monitor.start().await.unwrap();
    let mut subscription = monitor.subscribe(Topic::Target(1)).await.unwrap();

    let _first = monitor.check_now(1).await.unwrap();
    let second = monitor.check_now(1).await.unwrap();

    assert_eq!(subscription.try_recv(), Some(second));
    assert!(subscription.try_recv().is_none());
    assert_eq!(monitor.hub().subscriber_count().await, 1);

    monitor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_all_probing() {
    let prober = Arc::new(ScriptedProber::default());
    let history = Arc::new(CountingHistory::default());
    let monitor = monitor_with(
        prober.clone(),
        history.clone(),
        vec![target(1, 1000), target(2, 1500)],
    );
    monitor.start().await.unwrap();

    sleep(Duration::from_millis(3100)).await;
    monitor.shutdown().await;
    let appends = history.appends();

    sleep(Duration::from_secs(10)).await;
    assert_eq!(history.appends(), appends);
    assert!(!monitor.is_running().await);
    assert!(monitor.request_check(1).await.is_err());
}
