//! 配置文件监控模块
//!
//! 监控配置文件变更，防抖后重新加载并广播新配置

use crate::config::loader::{ConfigLoader, TomlConfigLoader};
use crate::config::types::Config;
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 配置变更事件
#[derive(Debug, Clone)]
pub struct ConfigChangeEvent {
    /// 配置文件路径
    pub config_path: PathBuf,
    /// 新配置
    pub new_config: Config,
    /// 变更时间
    pub timestamp: Instant,
}

/// 配置文件监控器
pub struct ConfigWatcher {
    /// 配置文件路径
    config_path: PathBuf,
    /// 文件系统监控器
    watcher: Option<RecommendedWatcher>,
    /// 事件处理任务
    handler: Option<JoinHandle<()>>,
    /// 配置加载器
    loader: TomlConfigLoader,
    /// 事件发送器
    event_sender: broadcast::Sender<ConfigChangeEvent>,
    /// 防抖动延迟
    debounce_delay: Duration,
}

impl ConfigWatcher {
    /// 创建新的配置监控器
    ///
    /// # 参数
    /// * `config_path` - 配置文件路径
    /// * `debounce_delay` - 防抖动延迟时间
    ///
    /// # 返回
    /// * `Result<(Self, broadcast::Receiver<ConfigChangeEvent>)>` - 监控器和事件接收器
    pub fn new<P: AsRef<Path>>(
        config_path: P,
        debounce_delay: Duration,
    ) -> Result<(Self, broadcast::Receiver<ConfigChangeEvent>)> {
        let config_path = config_path.as_ref();
        Self::validate_config_path(config_path)?;

        // 文件系统事件使用规范化后的路径
        let config_path = config_path
            .canonicalize()
            .with_context(|| format!("解析配置文件路径失败: {}", config_path.display()))?;

        let (event_sender, event_receiver) = broadcast::channel(32);

        let watcher = Self {
            config_path,
            watcher: None,
            handler: None,
            loader: TomlConfigLoader::new(true),
            event_sender,
            debounce_delay,
        };

        Ok((watcher, event_receiver))
    }

    fn validate_config_path(path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(anyhow::anyhow!("配置文件不存在: {}", path.display()));
        }

        if !path.is_file() {
            return Err(anyhow::anyhow!("路径不是文件: {}", path.display()));
        }

        if path.extension().is_some_and(|extension| extension != "toml") {
            warn!("配置文件扩展名不是.toml: {}", path.display());
        }

        std::fs::File::open(path)
            .map(|_| ())
            .with_context(|| format!("无法读取配置文件: {}", path.display()))
    }

    /// 启动配置文件监控
    pub fn start(&mut self) -> Result<()> {
        info!("启动配置文件监控: {}", self.config_path.display());

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = tx.send(res);
            },
            notify::Config::default().with_poll_interval(Duration::from_secs(1)),
        )
        .context("创建文件监控器失败")?;

        // 监控配置文件所在目录，编辑器的原子替换也能被捕获
        let watch_path = self.config_path.parent().unwrap_or(&self.config_path);
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .with_context(|| format!("监控目录失败: {}", watch_path.display()))?;

        self.watcher = Some(watcher);
        self.handler = Some(tokio::spawn(Self::handle_file_events(
            rx,
            self.config_path.clone(),
            self.event_sender.clone(),
            self.loader.clone(),
            self.debounce_delay,
        )));

        info!("配置文件监控已启动");
        Ok(())
    }

    /// 处理文件系统事件
    ///
    /// 收到第一个相关事件后等待防抖时间，合并期间的所有事件只重载一次
    async fn handle_file_events(
        mut rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
        config_path: PathBuf,
        event_sender: broadcast::Sender<ConfigChangeEvent>,
        loader: TomlConfigLoader,
        debounce_delay: Duration,
    ) {
        while let Some(res) = rx.recv().await {
            match res {
                Ok(event) if Self::is_target_file_event(&event, &config_path) => {
                    debug!("检测到配置文件变更事件: {:?}", event.kind);
                }
                Ok(_) => continue,
                Err(e) => {
                    error!("文件监控事件错误: {}", e);
                    continue;
                }
            }

            tokio::time::sleep(debounce_delay).await;
            while rx.try_recv().is_ok() {}

            match loader.load_from_file(&config_path).await {
                Ok(new_config) => {
                    info!("配置文件已重新加载");
                    let change_event = ConfigChangeEvent {
                        config_path: config_path.clone(),
                        new_config,
                        timestamp: Instant::now(),
                    };
                    if event_sender.send(change_event).is_err() {
                        debug!("没有配置变更订阅者");
                    }
                }
                Err(e) => {
                    // 保留旧配置继续运行
                    error!("配置重载失败: {}", e);
                }
            }
        }
    }

    fn is_target_file_event(event: &Event, target_path: &Path) -> bool {
        match &event.kind {
            EventKind::Modify(_) | EventKind::Create(_) => {
                event.paths.iter().any(|path| path == target_path)
            }
            _ => false,
        }
    }

    /// 停止监控
    pub fn stop(&mut self) {
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
        if self.watcher.take().is_some() {
            info!("配置文件监控已停止");
        }
    }

    /// 订阅配置变更事件
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChangeEvent> {
        self.event_sender.subscribe()
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tokio::time::timeout;

    const CONFIG_V1: &str = r#"
[[targets]]
id = 1
url = "http://example.test"
"#;

    const CONFIG_V2: &str = r#"
[[targets]]
id = 1
url = "http://example.test"
interval_ms = 5000
"#;

    #[tokio::test]
    async fn test_config_file_validation() {
        let result = ConfigWatcher::validate_config_path(Path::new("/nonexistent/file.toml"));
        assert!(result.is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, CONFIG_V1).unwrap();
        assert!(ConfigWatcher::validate_config_path(&path).is_ok());
        assert!(ConfigWatcher::validate_config_path(dir.path()).is_err());
    }

    #[tokio::test]
    async fn test_reload_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, CONFIG_V1).unwrap();

        let (mut watcher, mut events) =
            ConfigWatcher::new(&path, Duration::from_millis(50)).unwrap();
        watcher.start().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        fs::write(&path, CONFIG_V2).unwrap();

        let event = timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("未收到配置变更事件")
            .unwrap();
        assert_eq!(event.new_config.targets[0].interval_ms, Some(5000));

        watcher.stop();
    }
}
