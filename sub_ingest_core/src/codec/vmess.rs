//! VMess：`vmess://` + Base64(JSON)

use super::{decode_base64, non_empty, ProfileCodec};
use crate::error::ParseError;
use crate::types::{ConfigType, Profile};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// 分享链接里的 JSON 结构，端口与 aid 既可能是数字也可能是字符串
#[derive(Debug, Default, Serialize, Deserialize)]
struct VmessJson {
    #[serde(default = "default_version")]
    v: String,
    #[serde(default)]
    ps: String,
    #[serde(default)]
    add: String,
    #[serde(default, deserialize_with = "loose_string")]
    port: String,
    #[serde(default)]
    id: String,
    #[serde(default, deserialize_with = "loose_string", skip_serializing_if = "String::is_empty")]
    aid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    scy: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    net: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    header_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    host: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    tls: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    sni: String,
}

fn default_version() -> String {
    "2".to_string()
}

fn loose_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VmessCodec;

impl ProfileCodec for VmessCodec {
    fn config_type(&self) -> ConfigType {
        ConfigType::Vmess
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["vmess://"]
    }

    fn decode(&self, uri: &str) -> Result<Profile, ParseError> {
        let payload = uri.trim().trim_start_matches("vmess://");
        let json = decode_base64(payload).ok_or_else(|| ParseError::malformed("vmess payload is not base64"))?;
        let parsed: VmessJson =
            serde_json::from_str(&json).map_err(|e| ParseError::malformed(format!("vmess json: {}", e)))?;

        if parsed.add.is_empty() || parsed.id.is_empty() {
            return Err(ParseError::malformed("vmess missing address or id"));
        }
        let port: u16 = parsed
            .port
            .trim()
            .parse()
            .map_err(|_| ParseError::malformed(format!("vmess invalid port: {}", parsed.port)))?;

        let mut profile = Profile::new(ConfigType::Vmess, parsed.add, port).with_remarks(parsed.ps);
        profile.credential = Some(parsed.id);
        profile.alter_id = parsed.aid.trim().parse().ok();
        profile.method = non_empty(parsed.scy);
        profile.network = non_empty(parsed.net);
        profile.header_type = non_empty(parsed.header_type);
        profile.host = non_empty(parsed.host);
        profile.path = non_empty(parsed.path);
        profile.security = non_empty(parsed.tls);
        profile.sni = non_empty(parsed.sni);
        Ok(profile)
    }

    fn encode(&self, profile: &Profile) -> Result<String, ParseError> {
        let id = profile.credential.clone().ok_or_else(|| ParseError::malformed("vmess missing id"))?;
        let json = VmessJson {
            v: default_version(),
            ps: profile.remarks.clone(),
            add: profile.server.clone(),
            port: profile.server_port.to_string(),
            id,
            aid: profile.alter_id.map(|a| a.to_string()).unwrap_or_default(),
            scy: profile.method.clone().unwrap_or_default(),
            net: profile.network.clone().unwrap_or_default(),
            header_type: profile.header_type.clone().unwrap_or_default(),
            host: profile.host.clone().unwrap_or_default(),
            path: profile.path.clone().unwrap_or_default(),
            tls: profile.security.clone().unwrap_or_default(),
            sni: profile.sni.clone().unwrap_or_default(),
        };
        let text = serde_json::to_string(&json).map_err(|e| ParseError::malformed(e.to_string()))?;
        Ok(format!("vmess://{}", STANDARD.encode(text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn share(json: &str) -> String {
        format!("vmess://{}", STANDARD.encode(json))
    }

    #[test]
    fn test_decode_numeric_and_string_port() {
        let numeric = share(r#"{"ps":"HK 01","add":"hk.example.com","port":443,"id":"b831381d-6324-4d53-ad4f-8cda48b30811","aid":0,"net":"ws","path":"/ray","tls":"tls"}"#);
        let profile = VmessCodec.decode(&numeric).unwrap();
        assert_eq!(profile.remarks, "HK 01");
        assert_eq!(profile.endpoint(), ("hk.example.com", 443));
        assert_eq!(profile.alter_id, Some(0));
        assert_eq!(profile.network.as_deref(), Some("ws"));
        assert_eq!(profile.security.as_deref(), Some("tls"));
        assert!(profile.host.is_none());

        let string = share(r#"{"ps":"x","add":"h","port":"8080","id":"u"}"#);
        assert_eq!(VmessCodec.decode(&string).unwrap().server_port, 8080);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(VmessCodec.decode("vmess://!!!").is_err());
        assert!(VmessCodec.decode(&share(r#"{"ps":"x","add":"h","port":"abc","id":"u"}"#)).is_err());
        assert!(VmessCodec.decode(&share(r#"{"ps":"x","port":1,"id":"u"}"#)).is_err());
    }

    #[test]
    fn test_roundtrip() {
        let link = share(r#"{"ps":"US node","add":"us.example.com","port":"10086","id":"u-1","aid":"2","scy":"auto","net":"tcp","sni":"cdn.example.com"}"#);
        let profile = VmessCodec.decode(&link).unwrap();
        let again = VmessCodec.decode(&VmessCodec.encode(&profile).unwrap()).unwrap();
        assert_eq!(profile, again);
    }
}
