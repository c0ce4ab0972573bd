//! Hysteria2：`hysteria2://auth@host:port?sni=..&insecure=1&obfs-password=..#remarks`，`hy2://` 为别名

use super::link::{build_link, parse_link};
use super::{non_empty, ProfileCodec};
use crate::error::ParseError;
use crate::types::{ConfigType, Profile};

#[derive(Debug, Clone, Copy, Default)]
pub struct Hysteria2Codec;

impl ProfileCodec for Hysteria2Codec {
    fn config_type(&self) -> ConfigType {
        ConfigType::Hysteria2
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["hysteria2://", "hy2://"]
    }

    fn decode(&self, uri: &str) -> Result<Profile, ParseError> {
        let mut link = parse_link(uri)?;
        let mut profile = Profile::new(ConfigType::Hysteria2, link.host.clone(), link.port)
            .with_remarks(std::mem::take(&mut link.remarks));
        profile.credential = non_empty(std::mem::take(&mut link.userinfo));
        profile.sni = link.take("sni");
        profile.insecure = link.take("insecure").map(|v| v == "1" || v.eq_ignore_ascii_case("true"));
        profile.obfs_password = link.take("obfs-password");
        profile.extra = link.query;
        Ok(profile)
    }

    fn encode(&self, profile: &Profile) -> Result<String, ParseError> {
        let mut query = profile.extra.clone();
        if let Some(sni) = &profile.sni {
            query.insert("sni".to_string(), sni.clone());
        }
        if let Some(insecure) = profile.insecure {
            query.insert("insecure".to_string(), if insecure { "1" } else { "0" }.to_string());
        }
        if let Some(obfs_password) = &profile.obfs_password {
            query.insert("obfs-password".to_string(), obfs_password.clone());
        }
        Ok(build_link(
            "hysteria2://",
            profile.credential.as_deref(),
            &profile.server,
            profile.server_port,
            &query,
            &profile.remarks,
        ))
    }
}
