//! HTTP探测器实现
//!
//! 对单个目标发起一次受超时约束的请求并给出分类后的结果。
//! 传输层失败同样产出结果（`down`），探测器本身不返回错误。

use crate::error::Result;
use crate::health::result::ProbeResult;
use crate::health::target::Target;
use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use std::time::Instant;
use tokio::time::timeout;
use tracing::debug;

/// 探测器trait，定义单次探测接口
#[async_trait]
pub trait Prober: Send + Sync {
    /// 对目标执行一次探测
    ///
    /// # 参数
    /// * `target` - 目标定义（探测期间不可变）
    ///
    /// # 返回
    /// * `ProbeResult` - 每次调用恰好产生一个结果
    async fn probe(&self, target: &Target) -> ProbeResult;
}

/// 基于reqwest的HTTP探测器
#[derive(Debug, Clone)]
pub struct HttpProber {
    /// HTTP客户端（连接池在所有目标间共享）
    client: Client,
}

impl HttpProber {
    /// 创建新的HTTP探测器
    ///
    /// # 返回
    /// * `Result<Self>` - 探测器实例
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("{}/{}", crate::APP_NAME, crate::VERSION))
            .build()?;

        Ok(Self { client })
    }

    /// 构建HTTP请求
    ///
    /// 方法或URL无法解析时返回错误描述
    fn build_request(&self, target: &Target) -> std::result::Result<reqwest::RequestBuilder, String> {
        let method = Method::from_bytes(target.method.to_uppercase().as_bytes())
            .map_err(|_| format!("invalid method: {}", target.method))?;

        let url = Url::parse(&target.url).map_err(|e| format!("invalid url: {}", e))?;

        Ok(self.client.request(method, url).timeout(target.timeout()))
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, target: &Target) -> ProbeResult {
        let request = match self.build_request(target) {
            Ok(request) => request,
            Err(message) => return ProbeResult::from_failure(target, message),
        };

        let start_time = Instant::now();
        let response = timeout(target.timeout(), request.send()).await;

        let result = match response {
            Ok(Ok(response)) => {
                ProbeResult::from_response(target, response.status().as_u16(), start_time.elapsed())
            }
            Ok(Err(e)) => ProbeResult::from_failure(target, describe_request_error(&e)),
            Err(_) => ProbeResult::from_failure(target, "timeout"),
        };

        debug!(
            target_id = target.id,
            state = %result.state,
            status_code = ?result.status_code,
            latency_ms = ?result.latency_ms,
            "探测完成: {}",
            target.display_name()
        );

        result
    }
}

/// 把reqwest错误整理成简短的描述
fn describe_request_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        return "timeout".to_string();
    }

    // hyper把底层原因放在source链里
    let chain = error_chain(error).to_lowercase();

    if chain.contains("dns") {
        "dns resolution failed".to_string()
    } else if error.is_connect() {
        if chain.contains("refused") {
            "connection refused".to_string()
        } else if chain.contains("certificate") || chain.contains("tls") || chain.contains("ssl") {
            "tls error".to_string()
        } else {
            "connection failed".to_string()
        }
    } else if chain.contains("certificate") || chain.contains("tls") {
        "tls error".to_string()
    } else if error.is_builder() || error.is_request() {
        "invalid request".to_string()
    } else {
        format!("request failed: {}", error)
    }
}

fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(cause) = source {
        parts.push(cause.to_string());
        source = cause.source();
    }
    parts.join(": ")
}
