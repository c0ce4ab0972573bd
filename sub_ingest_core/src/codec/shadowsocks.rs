//! Shadowsocks：SIP002 与旧式整体 Base64 两种链接

use super::link::{build_link, decode_component, parse_link};
use super::{decode_base64, ProfileCodec};
use crate::error::ParseError;
use crate::types::{ConfigType, Profile};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

#[derive(Debug, Clone, Copy, Default)]
pub struct ShadowsocksCodec;

/// `method:password`
fn split_credentials(s: &str) -> Result<(String, String), ParseError> {
    let (method, password) = s
        .split_once(':')
        .ok_or_else(|| ParseError::malformed("shadowsocks credentials missing ':'"))?;
    if method.is_empty() {
        return Err(ParseError::malformed("shadowsocks method is empty"));
    }
    Ok((method.to_string(), password.to_string()))
}

/// `host:port`，主机可能带 IPv6 方括号
fn split_endpoint(s: &str) -> Result<(String, u16), ParseError> {
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| ParseError::malformed("shadowsocks endpoint missing port"))?;
    let port = port
        .trim_end_matches('/')
        .parse()
        .map_err(|_| ParseError::malformed(format!("shadowsocks invalid port: {}", port)))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(ParseError::malformed("shadowsocks host is empty"));
    }
    Ok((host.to_string(), port))
}

impl ShadowsocksCodec {
    fn decode_sip002(uri: &str) -> Result<Profile, ParseError> {
        let mut link = parse_link(uri)?;
        let credentials = if link.userinfo.contains(':') {
            link.userinfo.clone()
        } else {
            decode_base64(&link.userinfo)
                .ok_or_else(|| ParseError::malformed("shadowsocks userinfo is not base64"))?
        };
        let (method, password) = split_credentials(&credentials)?;

        let mut profile = Profile::new(ConfigType::Shadowsocks, link.host.clone(), link.port)
            .with_remarks(std::mem::take(&mut link.remarks));
        profile.method = Some(method);
        profile.credential = Some(password);
        profile.extra = std::mem::take(&mut link.query);
        Ok(profile)
    }

    fn decode_legacy(body: &str) -> Result<Profile, ParseError> {
        let (payload, remarks) = match body.split_once('#') {
            Some((payload, fragment)) => (payload, decode_component(fragment)),
            None => (body, String::new()),
        };
        let plain = decode_base64(payload).ok_or_else(|| ParseError::malformed("shadowsocks payload is not base64"))?;
        let (credentials, endpoint) = plain
            .rsplit_once('@')
            .ok_or_else(|| ParseError::malformed("shadowsocks payload missing '@'"))?;
        let (method, password) = split_credentials(credentials)?;
        let (host, port) = split_endpoint(endpoint)?;

        let mut profile = Profile::new(ConfigType::Shadowsocks, host, port).with_remarks(remarks);
        profile.method = Some(method);
        profile.credential = Some(password);
        Ok(profile)
    }
}

impl ProfileCodec for ShadowsocksCodec {
    fn config_type(&self) -> ConfigType {
        ConfigType::Shadowsocks
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["ss://"]
    }

    fn decode(&self, uri: &str) -> Result<Profile, ParseError> {
        let uri = uri.trim();
        let body = uri.trim_start_matches("ss://");
        let before_fragment = body.split('#').next().unwrap_or_default();
        if before_fragment.contains('@') {
            Self::decode_sip002(uri)
        } else {
            Self::decode_legacy(body)
        }
    }

    fn encode(&self, profile: &Profile) -> Result<String, ParseError> {
        let method = profile.method.as_deref().ok_or_else(|| ParseError::malformed("shadowsocks missing method"))?;
        let password = profile.credential.as_deref().unwrap_or_default();
        let userinfo = URL_SAFE_NO_PAD.encode(format!("{}:{}", method, password));
        Ok(build_link(
            "ss://",
            Some(&userinfo),
            &profile.server,
            profile.server_port,
            &profile.extra,
            &profile.remarks,
        ))
    }
}
