//! 完整引擎配置（CUSTOM）
//!
//! 数组中的配置以美化格式保存在 `raw_config`，单个配置保存原文。只提取备注与首个出站的服务器地址用于展示。

use crate::error::ParseError;
use crate::types::{ConfigType, Profile};
use serde_json::Value;

/// 判定是否为完整引擎配置文本
pub fn looks_like_engine_config(text: &str) -> bool {
    text.contains("inbounds") && text.contains("outbounds") && text.contains("routing")
}

/// 解析单个引擎配置对象，`raw_config` 为美化后的 JSON
pub fn parse_custom_value(value: &Value) -> Result<Profile, ParseError> {
    let raw = serde_json::to_string_pretty(value).map_err(|e| ParseError::malformed(e.to_string()))?;
    build_profile(value, raw)
}

/// 解析单个引擎配置文本，`raw_config` 保存原文
pub fn parse_custom_config(text: &str) -> Result<Profile, ParseError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ParseError::malformed(format!("engine config json: {}", e)))?;
    build_profile(&value, text.to_string())
}

fn build_profile(value: &Value, raw: String) -> Result<Profile, ParseError> {
    let object = value
        .as_object()
        .ok_or_else(|| ParseError::malformed("engine config is not an object"))?;

    let (server, port) = object
        .get("outbounds")
        .and_then(Value::as_array)
        .and_then(|outbounds| outbounds.iter().find_map(outbound_endpoint))
        .unwrap_or_default();

    let remarks = object
        .get("remarks")
        .and_then(Value::as_str)
        .filter(|r| !r.is_empty())
        .unwrap_or("none");

    let mut profile = Profile::new(ConfigType::Custom, server, port).with_remarks(remarks);
    profile.raw_config = Some(raw);
    Ok(profile)
}

/// 出站的服务器地址，依次查看 vnext / servers / peers
fn outbound_endpoint(outbound: &Value) -> Option<(String, u16)> {
    let settings = outbound.get("settings")?;

    for key in ["vnext", "servers"] {
        if let Some(first) = settings.get(key).and_then(Value::as_array).and_then(|a| a.first()) {
            let address = first.get("address").and_then(Value::as_str)?;
            let port = first.get("port").and_then(Value::as_u64).and_then(|p| u16::try_from(p).ok())?;
            return Some((address.to_string(), port));
        }
    }

    let endpoint = settings
        .get("peers")
        .and_then(Value::as_array)
        .and_then(|a| a.first())
        .and_then(|peer| peer.get("endpoint"))
        .and_then(Value::as_str)?;
    let (host, port) = endpoint.rsplit_once(':')?;
    Some((
        host.trim_start_matches('[').trim_end_matches(']').to_string(),
        port.parse().ok()?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "remarks": "full config",
        "inbounds": [{"port": 10808, "protocol": "socks"}],
        "outbounds": [
            {"protocol": "freedom", "tag": "direct"},
            {"protocol": "vless", "settings": {"vnext": [{"address": "v.example.com", "port": 443}]}}
        ],
        "routing": {"rules": []}
    }"#;

    #[test]
    fn test_parse_custom_config() {
        assert!(looks_like_engine_config(CONFIG));
        let profile = parse_custom_config(CONFIG).unwrap();
        assert_eq!(profile.config_type, ConfigType::Custom);
        assert_eq!(profile.remarks, "full config");
        assert_eq!(profile.endpoint(), ("v.example.com", 443));
        let raw: Value = serde_json::from_str(profile.raw_config.as_deref().unwrap()).unwrap();
        assert_eq!(raw["routing"]["rules"], serde_json::json!([]));
    }

    #[test]
    fn test_single_config_keeps_original_text() {
        let compact = r#"{"remarks":"one","inbounds":[],"outbounds":[],"routing":{}}"#;
        let profile = parse_custom_config(compact).unwrap();
        assert_eq!(profile.raw_config.as_deref(), Some(compact));
        assert_eq!(parse_custom_config(CONFIG).unwrap().raw_config.as_deref(), Some(CONFIG));
    }

    #[test]
    fn test_array_element_is_pretty_printed() {
        let value: Value = serde_json::from_str(r#"{"remarks":"one","inbounds":[]}"#).unwrap();
        let raw = parse_custom_value(&value).unwrap().raw_config.unwrap();
        assert_eq!(raw, serde_json::to_string_pretty(&value).unwrap());
        assert!(raw.contains('\n'));
    }

    #[test]
    fn test_wireguard_peer_endpoint() {
        let config = r#"{"inbounds":[],"routing":{},"outbounds":[{"protocol":"wireguard","settings":{"peers":[{"endpoint":"wg.example.com:51820"}]}}]}"#;
        let profile = parse_custom_config(config).unwrap();
        assert_eq!(profile.endpoint(), ("wg.example.com", 51820));
        assert_eq!(profile.remarks, "none");
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(parse_custom_config("[1, 2]").is_err());
        assert!(parse_custom_config("inbounds outbounds routing").is_err());
    }
}
