//! 配置
//!
//! 所有字段都有默认值，可从 JSON 文件加载后按需覆盖。

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

/// 编译期注入的签名密钥，未设置时使用开发密钥
pub const BUILTIN_API_SECRET: &str = match option_env!("SUB_INGEST_API_SECRET") {
    Some(secret) => secret,
    None => "dev-secret-change-me",
};

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Linux; Android 13) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Mobile Safari/537.36";

/// 总配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    pub signer: SignerConfig,
    pub fetcher: FetcherConfig,
    pub registration: RegistrationConfig,
    pub sync: SyncConfig,
}

impl IngestConfig {
    /// 从 JSON 文件加载
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: IngestConfig = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.signer.package_id.trim().is_empty() {
            return Err(Error::Config("signer.package_id is empty".to_string()));
        }
        if self.signer.secret.is_empty() {
            return Err(Error::Config("signer.secret is empty".to_string()));
        }
        if self.fetcher.control_host.trim().is_empty() {
            return Err(Error::Config("fetcher.control_host is empty".to_string()));
        }
        self.fetcher.fallback_ip()?;
        for (name, value) in [
            ("registration.registration_url", &self.registration.registration_url),
            (
                "registration.registration_fallback_url",
                &self.registration.registration_fallback_url,
            ),
            ("registration.subscription_base_url", &self.registration.subscription_base_url),
        ] {
            url::Url::parse(value).map_err(|e| Error::Config(format!("{} is invalid: {}", name, e)))?;
        }
        if self.sync.max_concurrent == 0 {
            return Err(Error::Config("sync.max_concurrent must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// 签名配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SignerConfig {
    /// 应用包名
    pub package_id: String,
    /// 应用版本
    pub app_version: String,
    /// 预共享密钥
    pub secret: String,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            package_id: "com.subingest.app".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            secret: BUILTIN_API_SECRET.to_string(),
        }
    }
}

/// 拉取配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetcherConfig {
    /// 控制面主机名，只有该主机允许固定 IP 回退并附带签名头
    pub control_host: String,
    /// 控制面固定 IPv4
    pub fallback_ipv4: String,
    /// 订阅未指定 User-Agent 时使用
    pub default_user_agent: String,
    /// 请求超时（毫秒）
    pub timeout_ms: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            control_host: "sub.example.net".to_string(),
            fallback_ipv4: "203.0.113.10".to_string(),
            default_user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_ms: 15_000,
        }
    }
}

impl FetcherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn fallback_ip(&self) -> Result<Ipv4Addr> {
        self.fallback_ipv4
            .parse()
            .map_err(|_| Error::Config(format!("fallback_ipv4 is not an IPv4 address: {}", self.fallback_ipv4)))
    }
}

/// 设备注册配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistrationConfig {
    /// 主注册地址
    pub registration_url: String,
    /// DNS 失败时使用的备用注册地址
    pub registration_fallback_url: String,
    /// 订阅地址前缀，完整地址为 `{base}/{subscriptionId}`
    pub subscription_base_url: String,
    /// 注册后创建的订阅备注
    pub subscription_remarks: String,
    pub user_agent: String,
    pub timeout_ms: u64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            registration_url: "http://sub.example.net:8001/register".to_string(),
            registration_fallback_url: "http://203.0.113.10:8001/register".to_string(),
            subscription_base_url: "http://sub.example.net:8001/sub".to_string(),
            subscription_remarks: "Default".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_ms: 15_000,
        }
    }
}

impl RegistrationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// 订阅同步配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// 单个订阅的请求超时（毫秒）
    pub timeout_ms: u64,
    /// 同时同步的订阅数，1 表示顺序执行
    pub max_concurrent: usize,
    /// 同步时替换该订阅下已有配置，而不是追加
    pub replace_on_sync: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            max_concurrent: 1,
            replace_on_sync: false,
        }
    }
}

impl SyncConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
