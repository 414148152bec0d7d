//! Web API 模块
//!
//! 在监控引擎之上提供只读查询、按需检测和实时事件流

pub mod api;

use crate::config::WebConfig;
use crate::engine::Monitor;
use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// 处理函数共享的状态
#[derive(Clone)]
pub struct AppState {
    /// 监控引擎
    pub monitor: Arc<Monitor>,
    /// 启动时间
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// 构建路由
pub fn build_router(monitor: Arc<Monitor>) -> Router {
    let state = AppState {
        monitor,
        started_at: chrono::Utc::now(),
    };
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

    Router::new()
        .route("/health", get(api::health))
        .route("/api/v1/targets", get(api::list_targets))
        .route("/api/v1/targets/{id}", get(api::get_target))
        .route("/api/v1/targets/{id}/history", get(api::get_history))
        .route("/api/v1/targets/{id}/stats", get(api::get_stats))
        .route("/api/v1/targets/{id}/check", post(api::trigger_check))
        .route("/api/v1/events", get(api::events))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Web服务器
pub struct WebServer {
    config: WebConfig,
    monitor: Arc<Monitor>,
}

impl WebServer {
    pub fn new(config: WebConfig, monitor: Arc<Monitor>) -> Self {
        Self { config, monitor }
    }

    /// 监听地址
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .with_context(|| {
                format!(
                    "无效的监听地址: {}:{}",
                    self.config.bind_address, self.config.port
                )
            })
    }

    /// 运行服务器直到 `shutdown` 完成
    pub async fn run<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.socket_addr()?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("绑定地址失败: {}", addr))?;

        info!("Web服务器已启动: http://{}", addr);
        axum::serve(listener, build_router(self.monitor))
            .with_graceful_shutdown(shutdown)
            .await
            .context("Web服务器运行失败")?;

        info!("Web服务器已关闭");
        Ok(())
    }
}
