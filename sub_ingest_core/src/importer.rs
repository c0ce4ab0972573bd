//! 批量导入
//!
//! 把任意文本（粘贴内容、二维码、订阅响应体）转换成带订阅标记的配置记录。
//!
//! 解析级联，前一级没有结果才进入下一级：
//! 1. 整体宽松 Base64 解码后按行解析
//! 2. 原始文本按行解析
//! 3. 结构化回退：完整引擎 JSON（数组或单个对象），或 WireGuard 配置文件
//!
//! 订阅链接识别独立进行：先看原始文本，没有再看解码后的文本。

use crate::codec::custom::{looks_like_engine_config, parse_custom_config, parse_custom_value};
use crate::codec::wireguard::{looks_like_conf, parse_conf_file};
use crate::codec::{decode_base64, CodecRegistry};
use crate::error::Result;
use crate::store::ProfileStore;
use crate::types::{ImportSummary, Profile, SubscriptionItem};
use percent_encoding::percent_decode_str;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// 从链接导入订阅时的默认备注
pub const DEFAULT_IMPORTED_SUB_REMARKS: &str = "import sub";

/// 一轮解析的结果，尚未写入存储
#[derive(Debug, Default)]
struct ParseOutcome {
    profiles: Vec<Profile>,
    failures: usize,
    filtered: usize,
}

/// 批量导入器
#[derive(Clone)]
pub struct BatchImporter {
    store: Arc<dyn ProfileStore>,
    registry: Arc<CodecRegistry>,
}

impl std::fmt::Debug for BatchImporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchImporter").field("registry", &self.registry).finish_non_exhaustive()
    }
}

impl BatchImporter {
    pub fn new(store: Arc<dyn ProfileStore>, registry: CodecRegistry) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
        }
    }

    /// 使用内置编解码器
    pub fn with_builtin_codecs(store: Arc<dyn ProfileStore>) -> Self {
        Self::new(store, CodecRegistry::with_builtin_codecs())
    }

    pub fn store(&self) -> &Arc<dyn ProfileStore> {
        &self.store
    }

    pub fn registry(&self) -> &CodecRegistry {
        &self.registry
    }

    /// 导入一批文本：配置级联加订阅链接识别
    ///
    /// `append` 为 false 时，在至少解析出一条配置后才删除该订阅下的旧配置，
    /// 并把之前选中的服务器（按地址与端口）迁移到新记录上。
    pub fn import_batch(&self, raw: &str, subscription_id: &str, append: bool) -> Result<ImportSummary> {
        let mut summary = self.import_profiles(raw, subscription_id, append)?;

        summary.subscriptions = self.import_subscription_lines(raw)?;
        if summary.subscriptions == 0 {
            if let Some(text) = decode_base64(raw) {
                summary.subscriptions = self.import_subscription_lines(&text)?;
            }
        }

        info!(
            subscription_id = subscription_id,
            profiles = summary.profiles,
            subscriptions = summary.subscriptions,
            failures = summary.failures,
            filtered = summary.filtered,
            "Batch import finished"
        );
        Ok(summary)
    }

    /// 只执行配置解析级联，不识别订阅链接（订阅响应体使用）
    pub fn import_profiles(&self, raw: &str, subscription_id: &str, append: bool) -> Result<ImportSummary> {
        let filter = self.subscription_filter(subscription_id);

        let mut outcome = match decode_base64(raw) {
            Some(text) => self.parse_lines(&text, filter.as_ref()),
            None => ParseOutcome::default(),
        };
        if outcome.profiles.is_empty() {
            debug!("Decoded text produced no profiles, trying raw text");
            outcome = self.parse_lines(raw, filter.as_ref());
        }
        if outcome.profiles.is_empty() {
            if let Some(profiles) = Self::parse_structured(raw) {
                outcome = ParseOutcome {
                    profiles,
                    failures: 0,
                    filtered: 0,
                };
            }
        }
        if outcome.profiles.is_empty() {
            debug!(subscription_id = subscription_id, "All parse strategies produced nothing");
        }

        Ok(ImportSummary {
            profiles: self.commit(outcome.profiles, subscription_id, append)?,
            subscriptions: 0,
            failures: outcome.failures,
            filtered: outcome.filtered,
        })
    }

    /// 删除订阅以及属于它的全部配置，返回删除的配置数
    pub fn remove_subscription(&self, key: &str) -> Result<usize> {
        let removed = self.store.remove_profiles_by_subscription(key)?;
        self.store.remove_subscription(key)?;
        info!(subscription_id = key, removed, "Subscription removed");
        Ok(removed)
    }

    /// 生成分享文本，跳过没有链接形式的配置
    pub fn share_profiles(&self, keys: &[String]) -> String {
        keys.iter()
            .filter_map(|key| {
                let profile = self.store.get_profile(key)?;
                match self.registry.encode(&profile) {
                    Ok(uri) => Some(uri),
                    Err(e) => {
                        debug!(key = %key, error = %e, "Profile skipped when sharing");
                        None
                    }
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 把一个订阅链接登记为订阅源，已存在（地址完全相同）时返回 false
    pub fn import_url_as_subscription(&self, url: &str) -> Result<bool> {
        if self.store.subscriptions().iter().any(|(_, item)| item.url == url) {
            return Ok(false);
        }
        let remarks = Url::parse(url)
            .ok()
            .and_then(|u| u.fragment().map(|f| percent_decode_str(f).decode_utf8_lossy().into_owned()))
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_IMPORTED_SUB_REMARKS.to_string());
        let key = self.store.put_subscription("", SubscriptionItem::new(remarks, url))?;
        info!(key = %key, url = url, "Subscription imported");
        Ok(true)
    }

    fn subscription_filter(&self, subscription_id: &str) -> Option<Regex> {
        let pattern = self
            .store
            .get_subscription(subscription_id)?
            .filter
            .filter(|f| !f.is_empty())?;
        match Regex::new(&pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(subscription_id = subscription_id, error = %e, "Invalid filter regex ignored");
                None
            }
        }
    }

    /// 按行解析：去空白、去空行、保序去重
    fn parse_lines(&self, text: &str, filter: Option<&Regex>) -> ParseOutcome {
        let mut outcome = ParseOutcome::default();
        let mut seen = HashSet::new();

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if !seen.insert(line) {
                continue;
            }
            let Some(codec) = self.registry.identify(line) else {
                outcome.failures += 1;
                continue;
            };
            match codec.decode(line) {
                Ok(profile) => {
                    if let Some(re) = filter {
                        if !profile.remarks.is_empty() && !re.is_match(&profile.remarks) {
                            outcome.filtered += 1;
                            continue;
                        }
                    }
                    outcome.profiles.push(profile);
                }
                Err(e) => {
                    debug!(
                        config_type = %codec.config_type(),
                        error = %e,
                        line = %truncate(line, 50),
                        "Failed to decode line"
                    );
                    outcome.failures += 1;
                }
            }
        }
        outcome
    }

    /// 结构化回退
    fn parse_structured(raw: &str) -> Option<Vec<Profile>> {
        if looks_like_engine_config(raw) {
            if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(raw) {
                if !items.is_empty() {
                    let profiles: Vec<_> = items
                        .iter()
                        .filter_map(|item| match parse_custom_value(item) {
                            Ok(p) => Some(p),
                            Err(e) => {
                                warn!(error = %e, "Skipping engine config element");
                                None
                            }
                        })
                        .collect();
                    return (!profiles.is_empty()).then_some(profiles);
                }
            }
            return match parse_custom_config(raw) {
                Ok(p) => Some(vec![p]),
                Err(e) => {
                    warn!(error = %e, "Failed to parse engine config");
                    None
                }
            };
        }
        if looks_like_conf(raw) {
            return match parse_conf_file(raw) {
                Ok(p) => Some(vec![p]),
                Err(e) => {
                    warn!(error = %e, "Failed to parse WireGuard config file");
                    None
                }
            };
        }
        None
    }

    /// 写入解析结果并处理选中服务器迁移
    fn commit(&self, mut profiles: Vec<Profile>, subscription_id: &str, append: bool) -> Result<usize> {
        if profiles.is_empty() {
            return Ok(0);
        }

        let carried = if append || subscription_id.is_empty() {
            None
        } else {
            self.store
                .selected_profile()
                .and_then(|key| self.store.get_profile(&key))
                .filter(|p| p.subscription_id == subscription_id)
                .map(|p| (p.server, p.server_port))
        };

        if !append {
            let removed = self.store.remove_profiles_by_subscription(subscription_id)?;
            debug!(subscription_id = subscription_id, removed, "Replaced previous profiles");
        }

        for profile in &mut profiles {
            profile.subscription_id = subscription_id.to_string();
        }
        let target = carried.as_ref().and_then(|(server, port)| {
            profiles
                .iter()
                .position(|p| p.server == *server && p.server_port == *port)
        });

        let keys = self.store.insert_profiles(profiles)?;
        if let Some(key) = target.and_then(|i| keys.get(i)) {
            self.store.set_selected_profile(Some(key))?;
            debug!(key = %key, "Selected server carried over");
        }
        Ok(keys.len())
    }

    fn import_subscription_lines(&self, text: &str) -> Result<usize> {
        let mut seen = HashSet::new();
        let mut count = 0;
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if seen.insert(line) && is_valid_sub_url(line) && self.import_url_as_subscription(line)? {
                count += 1;
            }
        }
        Ok(count)
    }
}

/// http / https 且带主机名
pub fn is_valid_url(value: &str) -> bool {
    Url::parse(value.trim())
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().map_or(false, |h| !h.is_empty()))
        .unwrap_or(false)
}

/// 订阅链接：https，或指向本机回环地址的 http
pub fn is_valid_sub_url(value: &str) -> bool {
    let Ok(url) = Url::parse(value.trim()) else {
        return false;
    };
    match (url.scheme(), url.host()) {
        ("https", Some(_)) => true,
        ("http", Some(url::Host::Domain(domain))) => domain.eq_ignore_ascii_case("localhost"),
        ("http", Some(url::Host::Ipv4(ip))) => IpAddr::V4(ip).is_loopback(),
        ("http", Some(url::Host::Ipv6(ip))) => IpAddr::V6(ip).is_loopback(),
        _ => false,
    }
}

pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
