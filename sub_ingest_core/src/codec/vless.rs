//! VLESS：`vless://uuid@host:port?params#remarks`

use super::link::{build_link, parse_link, put_transport, take_transport};
use super::ProfileCodec;
use crate::error::ParseError;
use crate::types::{ConfigType, Profile};

#[derive(Debug, Clone, Copy, Default)]
pub struct VlessCodec;

impl ProfileCodec for VlessCodec {
    fn config_type(&self) -> ConfigType {
        ConfigType::Vless
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["vless://"]
    }

    fn decode(&self, uri: &str) -> Result<Profile, ParseError> {
        let mut link = parse_link(uri)?;
        if link.userinfo.is_empty() {
            return Err(ParseError::malformed("vless missing id"));
        }
        let mut profile = Profile::new(ConfigType::Vless, link.host.clone(), link.port)
            .with_remarks(std::mem::take(&mut link.remarks));
        profile.credential = Some(std::mem::take(&mut link.userinfo));
        profile.method = link.take("encryption");
        take_transport(&mut link, &mut profile);
        profile.extra = link.query;
        Ok(profile)
    }

    fn encode(&self, profile: &Profile) -> Result<String, ParseError> {
        let id = profile.credential.as_deref().ok_or_else(|| ParseError::malformed("vless missing id"))?;
        let mut query = profile.extra.clone();
        query.insert(
            "encryption".to_string(),
            profile.method.clone().unwrap_or_else(|| "none".to_string()),
        );
        put_transport(profile, &mut query);
        Ok(build_link(
            "vless://",
            Some(id),
            &profile.server,
            profile.server_port,
            &query,
            &profile.remarks,
        ))
    }
}
