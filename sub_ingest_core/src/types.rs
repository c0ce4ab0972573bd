//! 数据类型定义

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 配置类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigType {
    Vmess,
    Shadowsocks,
    Socks,
    Http,
    Vless,
    Trojan,
    Wireguard,
    Hysteria2,
    Custom,
}

impl ConfigType {
    /// 规范协议前缀，CUSTOM 没有前缀
    pub fn protocol_scheme(&self) -> &'static str {
        match self {
            ConfigType::Vmess => "vmess://",
            ConfigType::Shadowsocks => "ss://",
            ConfigType::Socks => "socks://",
            ConfigType::Http => "http://",
            ConfigType::Vless => "vless://",
            ConfigType::Trojan => "trojan://",
            ConfigType::Wireguard => "wireguard://",
            ConfigType::Hysteria2 => "hysteria2://",
            ConfigType::Custom => "",
        }
    }
}

impl fmt::Display for ConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigType::Vmess => "VMESS",
            ConfigType::Shadowsocks => "SHADOWSOCKS",
            ConfigType::Socks => "SOCKS",
            ConfigType::Http => "HTTP",
            ConfigType::Vless => "VLESS",
            ConfigType::Trojan => "TROJAN",
            ConfigType::Wireguard => "WIREGUARD",
            ConfigType::Hysteria2 => "HYSTERIA2",
            ConfigType::Custom => "CUSTOM",
        };
        f.write_str(name)
    }
}

/// 代理配置
///
/// 公共字段由导入流程使用，其余可选字段归各协议编解码器所有。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(rename = "configType")]
    pub config_type: ConfigType,
    pub remarks: String,
    pub server: String,
    #[serde(rename = "serverPort")]
    pub server_port: u16,
    #[serde(rename = "subscriptionId", default)]
    pub subscription_id: String,

    /// UUID / 密码 / WireGuard 私钥
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    /// 加密方式（SS cipher、VMess security）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(rename = "headerType", default, skip_serializing_if = "Option::is_none")]
    pub header_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
    #[serde(rename = "publicKey", default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(rename = "localAddress", default, skip_serializing_if = "Option::is_none")]
    pub local_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    #[serde(rename = "alterId", default, skip_serializing_if = "Option::is_none")]
    pub alter_id: Option<u32>,
    #[serde(rename = "obfsPassword", default, skip_serializing_if = "Option::is_none")]
    pub obfs_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,
    /// 编解码器不认识的查询参数，原样保留
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
    /// CUSTOM 配置的原始 JSON
    #[serde(rename = "rawConfig", default, skip_serializing_if = "Option::is_none")]
    pub raw_config: Option<String>,
}

impl Profile {
    /// 创建只含公共字段的配置
    pub fn new(config_type: ConfigType, server: impl Into<String>, server_port: u16) -> Self {
        Self {
            config_type,
            remarks: String::new(),
            server: server.into(),
            server_port,
            subscription_id: String::new(),
            credential: None,
            method: None,
            username: None,
            network: None,
            header_type: None,
            security: None,
            sni: None,
            host: None,
            path: None,
            flow: None,
            public_key: None,
            local_address: None,
            mtu: None,
            alter_id: None,
            obfs_password: None,
            insecure: None,
            extra: BTreeMap::new(),
            raw_config: None,
        }
    }

    pub fn with_remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = remarks.into();
        self
    }

    /// 用于选中服务器继承的端点标识
    pub fn endpoint(&self) -> (&str, u16) {
        (&self.server, self.server_port)
    }
}

/// 订阅源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionItem {
    pub remarks: String,
    pub url: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(rename = "allowInsecureUrl", default)]
    pub allow_insecure_url: bool,
    #[serde(rename = "userAgent", default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub upload: Option<i64>,
    #[serde(default)]
    pub download: Option<i64>,
    #[serde(default)]
    pub total: Option<i64>,
    #[serde(default)]
    pub expire: Option<i64>,
}

impl Default for SubscriptionItem {
    fn default() -> Self {
        Self {
            remarks: String::new(),
            url: String::new(),
            enabled: true,
            filter: None,
            allow_insecure_url: false,
            user_agent: None,
            upload: None,
            download: None,
            total: None,
            expire: None,
        }
    }
}

impl SubscriptionItem {
    pub fn new(remarks: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            remarks: remarks.into(),
            url: url.into(),
            ..Default::default()
        }
    }
}

/// 批量导入结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    /// 导入的配置数
    pub profiles: usize,
    /// 新增的订阅数
    pub subscriptions: usize,
    /// 无法识别或解析失败的行数
    pub failures: usize,
    /// 被订阅过滤规则丢弃的行数
    pub filtered: usize,
}

impl ImportSummary {
    /// 整个级联都没有产生任何数据
    pub fn is_empty(&self) -> bool {
        self.profiles == 0 && self.subscriptions == 0
    }
}

/// 设备注册响应
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationResponse {
    #[serde(rename = "subscriptionId", default)]
    pub subscription_id: Option<String>,
}
