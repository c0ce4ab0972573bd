//! 订阅流量与到期信息
//!
//! 两个来源：响应头 `Subscription-UserInfo`，以及部分服务商写在配置备注里的波斯语注记。

use crate::types::SubscriptionItem;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// 响应头名称（匹配时不区分大小写）
pub const USER_INFO_HEADER: &str = "subscription-userinfo";

/// `Subscription-UserInfo` 解析结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuotaInfo {
    pub upload: Option<i64>,
    pub download: Option<i64>,
    pub total: Option<i64>,
    pub expire: Option<i64>,
}

impl QuotaInfo {
    /// 解析 `upload=1; download=2; total=3; expire=4`
    ///
    /// 键不区分大小写，未知键忽略，数值非法时只有该键为空。
    pub fn parse(header: &str) -> Self {
        let mut info = Self::default();
        for part in header.split(';') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            let value = value.trim().parse::<i64>().ok();
            match key.trim().to_ascii_lowercase().as_str() {
                "upload" => info.upload = value,
                "download" => info.download = value,
                "total" => info.total = value,
                "expire" => info.expire = value,
                _ => {}
            }
        }
        info
    }

    /// 覆盖订阅上的四个字段
    pub fn apply_to(&self, item: &mut SubscriptionItem) {
        item.upload = self.upload;
        item.download = self.download;
        item.total = self.total;
        item.expire = self.expire;
    }
}

static REMAINING_DAYS: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"روز های باقی مانده:\s*(\d+)").ok());
static REMAINING_GB: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"حجم باقی مانده:\s*([\d.]+)\s*گیگابایت").ok());
static TOTAL_GB: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"کل حجم:\s*([\d.]+)\s*گیگابایت").ok());

/// 备注中的流量注记
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RemarksQuota {
    pub remaining_days: Option<u32>,
    pub remaining_gb: Option<f64>,
    pub total_gb: Option<f64>,
}

impl RemarksQuota {
    /// 依次扫描备注，遇到第一条带剩余天数或剩余流量的备注即停止
    pub fn scan<'a, I>(remarks: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut quota = Self::default();
        for text in remarks {
            if let Some(days) = capture(&REMAINING_DAYS, text) {
                quota.remaining_days = days.parse().ok();
            }
            if let Some(gb) = capture(&REMAINING_GB, text) {
                quota.remaining_gb = gb.parse().ok();
            }
            if let Some(total) = capture(&TOTAL_GB, text) {
                quota.total_gb = total.parse().ok();
            }
            if quota.remaining_days.is_some() || quota.remaining_gb.is_some() {
                break;
            }
        }

        if quota.remaining_days.is_none() && quota.remaining_gb.is_none() {
            None
        } else {
            Some(quota)
        }
    }

    /// 已用流量（GB），需要总量与剩余量
    pub fn used_gb(&self) -> Option<f64> {
        match (self.total_gb, self.remaining_gb) {
            (Some(total), Some(remaining)) if total > 0.0 => Some(total - remaining),
            _ => None,
        }
    }

    /// 已用百分比，限制在 0..=100
    pub fn used_percent(&self) -> Option<f64> {
        let total = self.total_gb?;
        self.used_gb().map(|used| (used / total * 100.0).clamp(0.0, 100.0))
    }
}

fn capture<'t>(re: &Option<Regex>, text: &'t str) -> Option<&'t str> {
    re.as_ref()?.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str())
}
