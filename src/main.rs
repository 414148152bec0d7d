//! Pulse Monitor 主程序入口

use anyhow::{Context, Result};
use clap::Parser;
use pulse_monitor::cli::{
    Args, CheckCommand, Command, Commands, InitCommand, RunCommand, ValidateCommand,
};
use pulse_monitor::config::{ConfigLoader, TomlConfigLoader};
use pulse_monitor::logging::{LogConfig, LoggingSystem};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_config = resolve_log_config(&args).await;
    let _logging_system = LoggingSystem::setup_logging(log_config).context("初始化日志系统失败")?;

    info!("Pulse Monitor v{} 启动", pulse_monitor::VERSION);

    if let Err(e) = execute_command(&args).await {
        error!("命令执行失败: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// 命令行级别优先，其次是配置文件中的 log_level
async fn resolve_log_config(args: &Args) -> LogConfig {
    if let Some(level) = args.log_level {
        return LogConfig {
            level: level.into(),
            ..LogConfig::default()
        };
    }

    if matches!(args.command, Commands::Init { .. }) {
        return LogConfig::default();
    }

    match TomlConfigLoader::default()
        .load_from_file(args.get_config_path())
        .await
    {
        Ok(config) => LogConfig::with_level_name(&config.global.log_level),
        Err(_) => LogConfig::default(),
    }
}

/// 执行CLI命令
async fn execute_command(args: &Args) -> Result<()> {
    match &args.command {
        Commands::Run { .. } => RunCommand.execute(args).await,
        Commands::Check { .. } => CheckCommand.execute(args).await,
        Commands::Validate => ValidateCommand.execute(args).await,
        Commands::Init { .. } => InitCommand.execute(args).await,
    }
}
