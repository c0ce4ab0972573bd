//! 错误类型定义

use thiserror::Error;

/// 单条配置解析失败的原因
///
/// 导入流程中从不致命，只计入失败数。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// 空输入
    #[error("none data")]
    NoneData,

    /// 无法识别的协议前缀
    #[error("incorrect_protocol")]
    IncorrectProtocol,

    /// 协议识别成功但内容损坏
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// 该类型没有可分享的 URI 形式（CUSTOM / HTTP）
    #[error("profile type has no shareable URI form")]
    Unshareable,
}

impl ParseError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        ParseError::Malformed(msg.into())
    }
}

/// 网络请求失败分类
///
/// 由传输层以值的形式返回，重试阶段根据分类选择下一步。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkFailure {
    /// 域名解析失败
    #[error("DNS resolution failed")]
    Dns,

    /// 本地代理端口拒绝连接（代理尚未就绪）
    #[error("local proxy not ready")]
    ProxyNotReady,

    /// 协议错误、连接被提前关闭或重置
    #[error("connection issue: {0}")]
    ConnectionIssue(String),

    /// 非 2xx 响应
    #[error("HTTP status {0}")]
    HttpStatus(u16),

    /// 请求超时
    #[error("request timed out")]
    Timeout,

    /// 其他网络错误
    #[error("network error: {0}")]
    Other(String),
}

impl NetworkFailure {
    /// 是否允许走固定 IP 回退
    pub fn allows_ip_fallback(&self) -> bool {
        matches!(
            self,
            NetworkFailure::Dns | NetworkFailure::ProxyNotReady | NetworkFailure::ConnectionIssue(_)
        )
    }
}

/// 错误类型
#[derive(Debug, Error)]
pub enum Error {
    /// 配置解析错误
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// 网络错误
    #[error("Network error: {0}")]
    Network(#[from] NetworkFailure),

    /// 设备或订阅身份缺失、注册响应无效
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// 签名生成或校验失败
    #[error("Signature error: {0}")]
    Signature(String),

    /// 存储错误
    #[error("Store error: {0}")]
    Store(String),

    /// 配置错误
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// 参数错误
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    /// JSON 编解码错误
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 结果类型
pub type Result<T> = std::result::Result<T, Error>;
