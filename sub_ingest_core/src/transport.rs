//! HTTP 传输层
//!
//! `HttpTransport` 只做一次 GET，并把底层错误归类为 `NetworkFailure`，
//! 由调用方根据类别决定下一步重试路径。

use crate::error::{Error, NetworkFailure, Result};
use crate::quota::USER_INFO_HEADER;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// 一次 GET 请求
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
    /// 经本地 HTTP 代理（127.0.0.1:port）发出
    pub proxy_port: Option<u16>,
}

impl HttpRequest {
    pub fn new(url: Url, timeout: Duration) -> Self {
        Self {
            url,
            headers: Vec::new(),
            timeout,
            proxy_port: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn via_proxy(mut self, port: u16) -> Self {
        self.proxy_port = Some(port);
        self
    }
}

/// 响应
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// `Subscription-UserInfo` 响应头
    pub user_info: Option<String>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP 传输
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// 发送 GET，任何 HTTP 状态码都算成功返回
    async fn get(&self, request: HttpRequest) -> std::result::Result<HttpResponse, NetworkFailure>;
}

/// 基于 reqwest 的传输
pub struct ReqwestTransport {
    direct: Client,
    /// 最近一次使用的代理端口及其客户端
    proxied: Mutex<Option<(u16, Client)>>,
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport").finish_non_exhaustive()
    }
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let direct = Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            direct,
            proxied: Mutex::new(None),
        })
    }

    fn client_for(&self, proxy_port: Option<u16>) -> std::result::Result<Client, NetworkFailure> {
        let Some(port) = proxy_port else {
            return Ok(self.direct.clone());
        };

        let mut cached = self.proxied.lock();
        if let Some((cached_port, client)) = cached.as_ref() {
            if *cached_port == port {
                return Ok(client.clone());
            }
        }

        let proxy = reqwest::Proxy::all(format!("http://127.0.0.1:{}", port))
            .map_err(|e| NetworkFailure::Other(format!("invalid proxy: {}", e)))?;
        let client = Client::builder()
            .proxy(proxy)
            .build()
            .map_err(|e| NetworkFailure::Other(format!("failed to build proxied client: {}", e)))?;
        *cached = Some((port, client.clone()));
        Ok(client)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, request: HttpRequest) -> std::result::Result<HttpResponse, NetworkFailure> {
        let proxied = request.proxy_port.is_some();
        let client = self.client_for(request.proxy_port)?;

        let mut builder = client.get(request.url.clone()).timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        debug!(url = %request.url, proxied, "HTTP GET");
        let response = builder.send().await.map_err(|e| classify(&e, proxied))?;

        let status = response.status().as_u16();
        let user_info = response
            .headers()
            .get(USER_INFO_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(|e| classify(&e, proxied))?;

        Ok(HttpResponse {
            status,
            body,
            user_info,
        })
    }
}

/// 把 reqwest 错误归类
///
/// 类型信息只到 reqwest 这一层，更细的原因要沿 `source()` 链查看 hyper / io 的描述。
pub fn classify(err: &reqwest::Error, proxied: bool) -> NetworkFailure {
    if err.is_timeout() {
        return NetworkFailure::Timeout;
    }

    let chain = error_chain(err);
    let lower = chain.to_lowercase();

    if lower.contains("dns error") || lower.contains("failed to lookup address") {
        NetworkFailure::Dns
    } else if proxied && err.is_connect() {
        NetworkFailure::ProxyNotReady
    } else if err.is_body()
        || err.is_decode()
        || lower.contains("connection reset")
        || lower.contains("connection closed before message completed")
        || lower.contains("incomplete message")
        || lower.contains("unexpected eof")
        || lower.contains("broken pipe")
    {
        NetworkFailure::ConnectionIssue(chain)
    } else {
        NetworkFailure::Other(chain)
    }
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(url: &str) -> HttpRequest {
        HttpRequest::new(Url::parse(url).unwrap(), Duration::from_secs(5))
    }

    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_get_body_and_user_info() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sub"))
            .and(header("User-Agent", "unit-agent"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Subscription-Userinfo", "upload=1; download=2")
                    .set_body_string("vmess://abc"),
            )
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new().unwrap();
        let response = transport
            .get(request(&format!("{}/sub", server.uri())).header("User-Agent", "unit-agent"))
            .await
            .unwrap();
        assert!(response.is_success());
        assert_eq!(response.body, "vmess://abc");
        assert_eq!(response.user_info.as_deref(), Some("upload=1; download=2"));
    }

    #[tokio::test]
    async fn test_non_success_status_returned() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new().unwrap();
        let response = transport.get(request(&server.uri())).await.unwrap();
        assert_eq!(response.status, 503);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_proxy_refused_is_proxy_not_ready() {
        let transport = ReqwestTransport::new().unwrap();
        let port = closed_port();
        let err = transport
            .get(request("http://sub.example.net/sub").via_proxy(port))
            .await
            .unwrap_err();
        assert_eq!(err, NetworkFailure::ProxyNotReady);
    }

    #[tokio::test]
    async fn test_direct_refused_is_not_proxy_failure() {
        let transport = ReqwestTransport::new().unwrap();
        let port = closed_port();
        let err = transport
            .get(request(&format!("http://127.0.0.1:{}/sub", port)))
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkFailure::Other(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_dns() {
        let transport = ReqwestTransport::new().unwrap();
        let err = transport
            .get(request("http://does-not-exist.invalid/sub"))
            .await
            .unwrap_err();
        assert_eq!(err, NetworkFailure::Dns);
    }
}
