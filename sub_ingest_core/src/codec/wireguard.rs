//! WireGuard：分享链接与 `[Interface]` / `[Peer]` 配置文件
//!
//! 链接格式：`wireguard://privateKey@host:port?publickey=..&address=..&mtu=..#remarks`

use super::link::{build_link, parse_link};
use super::ProfileCodec;
use crate::error::ParseError;
use crate::types::{ConfigType, Profile};
use std::collections::BTreeMap;

/// 未指定时使用的 MTU
pub const DEFAULT_MTU: u32 = 1420;

#[derive(Debug, Clone, Copy, Default)]
pub struct WireguardCodec;

impl ProfileCodec for WireguardCodec {
    fn config_type(&self) -> ConfigType {
        ConfigType::Wireguard
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["wireguard://"]
    }

    fn decode(&self, uri: &str) -> Result<Profile, ParseError> {
        let mut link = parse_link(uri)?;
        if link.userinfo.is_empty() {
            return Err(ParseError::malformed("wireguard missing private key"));
        }
        let mut profile = Profile::new(ConfigType::Wireguard, link.host.clone(), link.port)
            .with_remarks(std::mem::take(&mut link.remarks));
        profile.credential = Some(std::mem::take(&mut link.userinfo));
        profile.public_key = link.take("publickey");
        profile.local_address = link.take("address");
        profile.mtu = Some(link.take("mtu").and_then(|m| m.parse().ok()).unwrap_or(DEFAULT_MTU));
        profile.extra = link.query;
        Ok(profile)
    }

    fn encode(&self, profile: &Profile) -> Result<String, ParseError> {
        let private_key = profile
            .credential
            .as_deref()
            .ok_or_else(|| ParseError::malformed("wireguard missing private key"))?;
        let mut query = profile.extra.clone();
        if let Some(public_key) = &profile.public_key {
            query.insert("publickey".to_string(), public_key.clone());
        }
        if let Some(address) = &profile.local_address {
            query.insert("address".to_string(), address.clone());
        }
        query.insert("mtu".to_string(), profile.mtu.unwrap_or(DEFAULT_MTU).to_string());
        Ok(build_link(
            "wireguard://",
            Some(private_key),
            &profile.server,
            profile.server_port,
            &query,
            &profile.remarks,
        ))
    }
}

/// 以 `[Interface]` 开头且包含 `[Peer]`
pub fn looks_like_conf(text: &str) -> bool {
    text.trim_start().starts_with("[Interface]") && text.contains("[Peer]")
}

/// 解析 wg-quick 风格的配置文件，只取第一个 Peer
pub fn parse_conf_file(text: &str) -> Result<Profile, ParseError> {
    let mut interface = BTreeMap::new();
    let mut peer = BTreeMap::new();
    let mut section = "";
    let mut peers_seen = 0;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        match line {
            "[Interface]" => section = "interface",
            "[Peer]" => {
                peers_seen += 1;
                section = if peers_seen == 1 { "peer" } else { "" };
            }
            _ => {
                let Some((key, value)) = line.split_once('=') else {
                    continue;
                };
                let entry = (key.trim().to_ascii_lowercase(), value.trim().to_string());
                match section {
                    "interface" => {
                        interface.insert(entry.0, entry.1);
                    }
                    "peer" => {
                        peer.insert(entry.0, entry.1);
                    }
                    _ => {}
                }
            }
        }
    }

    let private_key = interface
        .remove("privatekey")
        .ok_or_else(|| ParseError::malformed("wireguard conf missing PrivateKey"))?;
    let endpoint = peer
        .remove("endpoint")
        .ok_or_else(|| ParseError::malformed("wireguard conf missing Endpoint"))?;
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| ParseError::malformed("wireguard endpoint missing port"))?;
    let port: u16 = port
        .parse()
        .map_err(|_| ParseError::malformed(format!("wireguard invalid port: {}", port)))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');

    let mut profile = Profile::new(ConfigType::Wireguard, host, port);
    profile.credential = Some(private_key);
    profile.public_key = peer.remove("publickey");
    profile.local_address = interface.remove("address");
    profile.mtu = Some(interface.remove("mtu").and_then(|m| m.parse().ok()).unwrap_or(DEFAULT_MTU));
    if let Some(psk) = peer.remove("presharedkey") {
        profile.extra.insert("presharedkey".to_string(), psk);
    }
    Ok(profile)
}
