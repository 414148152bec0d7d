//! 命令处理实现
//!
//! 每个子命令对应一个实现 [`Command`] 的结构体

use crate::cli::args::{Args, Commands, OutputFormat};
use crate::config::{Config, ConfigLoader, ConfigManager, TomlConfigLoader, SAMPLE_CONFIG};
use crate::engine::Monitor;
use crate::health::{HttpProber, ProbeResult, Prober, Target};
use crate::logging::LoggingSystem;
use crate::web::WebServer;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// 配置文件变化的防抖动延迟
const CONFIG_DEBOUNCE: Duration = Duration::from_millis(500);

/// 命令trait
#[async_trait]
pub trait Command {
    /// 执行命令
    ///
    /// # 参数
    /// * `args` - 命令行参数
    async fn execute(&self, args: &Args) -> Result<()>;
}

/// 加载并验证配置文件
async fn load_config(path: &Path) -> Result<Config> {
    TomlConfigLoader::default()
        .load_from_file(path)
        .await
        .with_context(|| format!("加载配置文件失败: {}", path.display()))
}

/// 运行命令
pub struct RunCommand;

#[async_trait]
impl Command for RunCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let Commands::Run { no_watch } = &args.command else {
            return Ok(());
        };

        let config_path = args.get_config_path();
        let config = load_config(&config_path).await?;

        let monitor = Arc::new(Monitor::from_config(&config).context("创建监控引擎失败")?);
        monitor.start().await.context("启动监控引擎失败")?;
        info!(
            "监控引擎已启动，目标数: {}",
            config.targets.len()
        );

        // 管理器需要在整个运行期间存活
        let mut _config_manager = None;
        let mut config_listener = None;
        if !*no_watch {
            let (mut manager, receiver) = ConfigManager::new(config.clone());
            match manager.enable_hot_reload(&config_path, CONFIG_DEBOUNCE) {
                Ok(()) => {
                    config_listener = Some(monitor.spawn_config_listener(receiver));
                    _config_manager = Some(manager);
                }
                Err(e) => warn!("配置热重载不可用: {:#}", e),
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let web_handle = match config.global.web.clone().filter(|web| web.enabled) {
            Some(web_config) => {
                let server = WebServer::new(web_config, Arc::clone(&monitor));
                let mut shutdown_rx = shutdown_rx.clone();
                Some(tokio::spawn(async move {
                    let shutdown = async move {
                        let _ = shutdown_rx.wait_for(|stop| *stop).await;
                    };
                    if let Err(e) = server.run(shutdown).await {
                        error!("Web服务器异常退出: {:#}", e);
                    }
                }))
            }
            None => None,
        };

        tokio::signal::ctrl_c()
            .await
            .context("监听退出信号失败")?;
        info!("收到退出信号，开始关闭");

        let _ = shutdown_tx.send(true);
        if let Some(handle) = web_handle {
            if let Err(e) = handle.await {
                warn!("等待Web服务器退出失败: {}", e);
            }
        }
        if let Some(listener) = config_listener {
            listener.abort();
        }
        monitor.shutdown().await;

        info!("监控引擎已停止");
        Ok(())
    }
}

/// 单次检测命令
pub struct CheckCommand;

#[async_trait]
impl Command for CheckCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let Commands::Check { target, format } = &args.command else {
            return Ok(());
        };

        let config = load_config(&args.get_config_path()).await?;
        let targets: Vec<Target> = config
            .resolved_targets()
            .into_iter()
            .filter(|t| target.is_none_or(|id| t.id == id))
            .collect();

        if targets.is_empty() {
            match target {
                Some(id) => bail!("未找到ID为 {} 的目标", id),
                None => bail!("配置中没有任何目标"),
            }
        }

        let prober = HttpProber::new().context("创建HTTP探测器失败")?;
        let results =
            futures::future::join_all(targets.iter().map(|target| prober.probe(target))).await;

        if let Some(logging) = LoggingSystem::current() {
            for (target, result) in targets.iter().zip(&results) {
                logging.probe_log(target.display_name(), result);
            }
        }

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&results)?);
            }
            OutputFormat::Text => {
                for (target, result) in targets.iter().zip(&results) {
                    println!("{}", format_result(target, result));
                }
            }
        }

        Ok(())
    }
}

/// 格式化单条文本输出
fn format_result(target: &Target, result: &ProbeResult) -> String {
    let icon = if result.state.is_healthy() { "✓" } else { "✗" };
    let code = result
        .status_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "N/A".to_string());
    let latency = result
        .latency_ms
        .map(|ms| format!("{}ms", ms))
        .unwrap_or_else(|| "N/A".to_string());

    let mut line = format!(
        "{} [{}] {} ({}) - {} - {} - {}",
        icon,
        target.id,
        target.display_name(),
        target.url,
        result.state,
        code,
        latency
    );
    if let Some(error) = &result.error {
        line.push_str(&format!("\n  错误: {}", error));
    }
    line
}

/// 验证配置命令
pub struct ValidateCommand;

#[async_trait]
impl Command for ValidateCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let config_path = args.get_config_path();
        let config = load_config(&config_path).await?;

        println!("配置文件有效: {}", config_path.display());
        println!("  目标数: {}", config.targets.len());
        println!(
            "  Web接口: {}",
            match &config.global.web {
                Some(web) if web.enabled => format!("{}:{}", web.bind_address, web.port),
                _ => "未启用".to_string(),
            }
        );
        Ok(())
    }
}

/// 初始化配置命令
pub struct InitCommand;

#[async_trait]
impl Command for InitCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let Commands::Init { force } = &args.command else {
            return Ok(());
        };

        let config_path = args.get_config_path();
        if config_path.exists() && !*force {
            bail!(
                "配置文件已存在: {}（使用 --force 覆盖）",
                config_path.display()
            );
        }

        if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("创建目录失败: {}", parent.display()))?;
        }

        tokio::fs::write(&config_path, SAMPLE_CONFIG)
            .await
            .with_context(|| format!("写入配置文件失败: {}", config_path.display()))?;

        println!("已生成配置文件: {}", config_path.display());
        Ok(())
    }
}
