//! URI 形式配置链接的公共拆分与拼装

use crate::error::ParseError;
use crate::types::Profile;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::BTreeMap;
use url::{form_urlencoded, Url};

/// userinfo / fragment 中保留 RFC 3986 非保留字符，其余全部转义
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// 拆分后的链接
#[derive(Debug, Default)]
pub(crate) struct Link {
    pub userinfo: String,
    pub host: String,
    pub port: u16,
    pub query: BTreeMap<String, String>,
    pub remarks: String,
}

impl Link {
    /// 取出并移除一个查询参数，空值视为缺失
    pub fn take(&mut self, key: &str) -> Option<String> {
        self.query.remove(key).filter(|v| !v.is_empty())
    }
}

pub(crate) fn decode_component(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// 解析 `scheme://userinfo@host:port?query#remarks`
pub(crate) fn parse_link(uri: &str) -> Result<Link, ParseError> {
    let url = Url::parse(uri.trim()).map_err(|e| ParseError::malformed(format!("invalid uri: {}", e)))?;

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ParseError::malformed("missing host"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
    let port = url.port().ok_or_else(|| ParseError::malformed("missing port"))?;

    let mut userinfo = decode_component(url.username());
    if let Some(password) = url.password() {
        userinfo.push(':');
        userinfo.push_str(&decode_component(password));
    }

    let query = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let remarks = url.fragment().map(decode_component).unwrap_or_default();

    Ok(Link {
        userinfo,
        host,
        port,
        query,
        remarks,
    })
}

/// 拼装链接，查询参数按键排序
pub(crate) fn build_link(
    scheme: &str,
    userinfo: Option<&str>,
    host: &str,
    port: u16,
    query: &BTreeMap<String, String>,
    remarks: &str,
) -> String {
    let mut out = String::from(scheme);
    if let Some(userinfo) = userinfo {
        out.push_str(&utf8_percent_encode(userinfo, COMPONENT).to_string());
        out.push('@');
    }
    if host.contains(':') {
        out.push_str(&format!("[{}]", host));
    } else {
        out.push_str(host);
    }
    out.push_str(&format!(":{}", port));
    if !query.is_empty() {
        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(query.iter())
            .finish();
        out.push('?');
        out.push_str(&encoded);
    }
    if !remarks.is_empty() {
        out.push('#');
        out.push_str(&utf8_percent_encode(remarks, COMPONENT).to_string());
    }
    out
}

/// 从查询参数读取传输层字段（VLESS / Trojan 共用）
pub(crate) fn take_transport(link: &mut Link, profile: &mut Profile) {
    profile.network = link.take("type");
    profile.header_type = link.take("headerType");
    profile.security = link.take("security");
    profile.sni = link.take("sni");
    profile.host = link.take("host");
    profile.path = link.take("path");
    profile.flow = link.take("flow");
    profile.public_key = link.take("pbk");
}

/// 把传输层字段写回查询参数
pub(crate) fn put_transport(profile: &Profile, query: &mut BTreeMap<String, String>) {
    let pairs = [
        ("type", &profile.network),
        ("headerType", &profile.header_type),
        ("security", &profile.security),
        ("sni", &profile.sni),
        ("host", &profile.host),
        ("path", &profile.path),
        ("flow", &profile.flow),
        ("pbk", &profile.public_key),
    ];
    for (key, value) in pairs {
        if let Some(value) = value {
            query.insert(key.to_string(), value.clone());
        }
    }
}
