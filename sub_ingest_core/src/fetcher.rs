//! 容错拉取
//!
//! 三个阶段依次尝试：
//! - A：经本地代理（代理在运行且端口有效时）
//! - B：直连
//! - C：固定 IP 回退，只针对控制面主机，且 A/B 的失败属于 DNS、代理未就绪或连接异常
//!
//! C 阶段把连接目标换成固定 IPv4，保留原 `Host`，并对改写后的地址签名。
//! 全部失败时 `fetch` 返回空内容。

use crate::config::FetcherConfig;
use crate::error::NetworkFailure;
use crate::importer::truncate;
use crate::signer::RequestSigner;
use crate::transport::{HttpRequest, HttpTransport};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

/// 本地代理（隧道引擎）的就绪信号
#[cfg_attr(test, mockall::automock)]
pub trait ProxyState: Send + Sync {
    /// 隧道是否在运行
    fn is_running(&self) -> bool;

    /// 本地 HTTP 代理端口，0 表示未知
    fn http_port(&self) -> u16;
}

/// 由外部更新的代理状态
#[derive(Debug, Default)]
pub struct SharedProxyState {
    running: AtomicBool,
    port: AtomicU16,
}

impl SharedProxyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, running: bool, port: u16) {
        self.port.store(port, Ordering::SeqCst);
        self.running.store(running, Ordering::SeqCst);
    }
}

impl ProxyState for SharedProxyState {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn http_port(&self) -> u16 {
        self.port.load(Ordering::SeqCst)
    }
}

/// 拉取结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fetched {
    pub body: String,
    /// `Subscription-UserInfo` 原始值
    pub user_info: Option<String>,
}

/// 容错拉取器
pub struct ResilientFetcher {
    transport: Arc<dyn HttpTransport>,
    proxy: Arc<dyn ProxyState>,
    signer: RequestSigner,
    config: FetcherConfig,
}

impl std::fmt::Debug for ResilientFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientFetcher")
            .field("control_host", &self.config.control_host)
            .field("fallback_ipv4", &self.config.fallback_ipv4)
            .finish_non_exhaustive()
    }
}

impl ResilientFetcher {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        proxy: Arc<dyn ProxyState>,
        signer: RequestSigner,
        config: FetcherConfig,
    ) -> Self {
        Self {
            transport,
            proxy,
            signer,
            config,
        }
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    pub fn signer(&self) -> &RequestSigner {
        &self.signer
    }

    pub fn transport(&self) -> &Arc<dyn HttpTransport> {
        &self.transport
    }

    /// 拉取内容，全部阶段失败时返回空内容
    pub async fn fetch(
        &self,
        url: &str,
        user_agent: Option<&str>,
        timeout: Duration,
        prefer_proxy_port: Option<u16>,
    ) -> Fetched {
        match self.try_fetch(url, user_agent, timeout, prefer_proxy_port).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(url = url, error = %e, "All fetch stages failed");
                Fetched::default()
            }
        }
    }

    /// 拉取内容，失败时返回最后一次的失败分类
    pub async fn try_fetch(
        &self,
        url: &str,
        user_agent: Option<&str>,
        timeout: Duration,
        prefer_proxy_port: Option<u16>,
    ) -> Result<Fetched, NetworkFailure> {
        let url = Url::parse(url.trim()).map_err(|e| NetworkFailure::Other(format!("invalid url: {}", e)))?;
        let user_agent = user_agent
            .map(str::trim)
            .filter(|ua| !ua.is_empty())
            .unwrap_or(&self.config.default_user_agent)
            .to_string();

        let mut failures = Vec::new();
        let mut empty = None;

        // Stage A
        let port = prefer_proxy_port.unwrap_or_else(|| self.proxy.http_port());
        if self.proxy.is_running() && port > 0 {
            match self.attempt(&url, None, &user_agent, timeout, Some(port)).await {
                Ok(fetched) if !fetched.body.is_empty() => return Ok(fetched),
                Ok(fetched) => empty = Some(fetched),
                Err(e) => {
                    match &e {
                        NetworkFailure::ProxyNotReady => {
                            warn!(port, "Local proxy not ready, retrying without proxy")
                        }
                        other => warn!(error = %other, "Fetch through proxy failed"),
                    }
                    failures.push(e);
                }
            }
        } else {
            debug!("Proxy not running, skipping proxied stage");
        }

        // Stage B
        match self.attempt(&url, None, &user_agent, timeout, None).await {
            Ok(fetched) if !fetched.body.is_empty() => return Ok(fetched),
            Ok(fetched) => empty = Some(fetched),
            Err(e) => {
                warn!(error = %e, "Direct fetch failed");
                failures.push(e);
            }
        }

        // Stage C
        if self.is_control_host(&url) && failures.iter().any(NetworkFailure::allows_ip_fallback) {
            match self.fetch_via_fallback_ip(&url, &user_agent, timeout).await {
                Ok(fetched) if !fetched.body.is_empty() => return Ok(fetched),
                Ok(fetched) => empty = Some(fetched),
                Err(e) => failures.push(e),
            }
        }

        match (empty, failures.pop()) {
            (Some(fetched), _) => Ok(fetched),
            (None, Some(failure)) => Err(failure),
            (None, None) => Ok(Fetched::default()),
        }
    }

    fn is_control_host(&self, url: &Url) -> bool {
        url.host_str() == Some(self.config.control_host.as_str())
    }

    async fn fetch_via_fallback_ip(
        &self,
        url: &Url,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Fetched, NetworkFailure> {
        let ip = self
            .config
            .fallback_ip()
            .map_err(|e| NetworkFailure::Other(e.to_string()))?;
        let host = url.host_str().unwrap_or_default().to_string();
        let host_header = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        };

        let mut ip_url = url.clone();
        ip_url
            .set_ip_host(IpAddr::V4(ip))
            .map_err(|_| NetworkFailure::Other(format!("cannot rewrite host of {}", url)))?;

        warn!(url = %ip_url, host = %host_header, "DNS/proxy failed; retrying via pinned IP");
        match self
            .attempt(&ip_url, Some(&host_header), user_agent, timeout, None)
            .await
        {
            Ok(fetched) => {
                info!(url = %ip_url, "Fetched via pinned IP");
                Ok(fetched)
            }
            Err(e) => {
                error!(url = %ip_url, error = %e, "Pinned IP fetch failed");
                Err(e)
            }
        }
    }

    /// 单次请求；控制面请求附带签名头，非 2xx 视为失败
    async fn attempt(
        &self,
        url: &Url,
        host_header: Option<&str>,
        user_agent: &str,
        timeout: Duration,
        proxy_port: Option<u16>,
    ) -> Result<Fetched, NetworkFailure> {
        let mut request = HttpRequest::new(url.clone(), timeout).header("User-Agent", user_agent);
        if let Some(port) = proxy_port {
            request = request.via_proxy(port);
        }

        let control = match host_header {
            Some(host) => {
                request = request.header("Host", host);
                true
            }
            None => self.is_control_host(url),
        };
        if control {
            let headers = self
                .signer
                .create_auth_headers("GET", url.as_str(), "")
                .map_err(|e| NetworkFailure::Other(e.to_string()))?;
            request = request.headers(headers);
        }

        let response = self.transport.get(request).await?;
        if !response.is_success() {
            warn!(
                url = %url,
                status = response.status,
                body = %truncate(&response.body, 200),
                "Unexpected HTTP status"
            );
            return Err(NetworkFailure::HttpStatus(response.status));
        }
        Ok(Fetched {
            body: response.body,
            user_info: response.user_info,
        })
    }
}
