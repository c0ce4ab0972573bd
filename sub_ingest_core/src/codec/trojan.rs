//! Trojan：`trojan://password@host:port?params#remarks`

use super::link::{build_link, parse_link, put_transport, take_transport};
use super::ProfileCodec;
use crate::error::ParseError;
use crate::types::{ConfigType, Profile};

#[derive(Debug, Clone, Copy, Default)]
pub struct TrojanCodec;

impl ProfileCodec for TrojanCodec {
    fn config_type(&self) -> ConfigType {
        ConfigType::Trojan
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["trojan://"]
    }

    fn decode(&self, uri: &str) -> Result<Profile, ParseError> {
        let mut link = parse_link(uri)?;
        if link.userinfo.is_empty() {
            return Err(ParseError::malformed("trojan missing password"));
        }
        let mut profile = Profile::new(ConfigType::Trojan, link.host.clone(), link.port)
            .with_remarks(std::mem::take(&mut link.remarks));
        profile.credential = Some(std::mem::take(&mut link.userinfo));
        take_transport(&mut link, &mut profile);
        profile.extra = link.query;
        Ok(profile)
    }

    fn encode(&self, profile: &Profile) -> Result<String, ParseError> {
        let password = profile.credential.as_deref().ok_or_else(|| ParseError::malformed("trojan missing password"))?;
        let mut query = profile.extra.clone();
        put_transport(profile, &mut query);
        Ok(build_link(
            "trojan://",
            Some(password),
            &profile.server,
            profile.server_port,
            &query,
            &profile.remarks,
        ))
    }
}
