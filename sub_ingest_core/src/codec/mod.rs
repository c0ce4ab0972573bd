//! 协议编解码与分发
//!
//! 每种配置类型一个编解码器，按规范协议前缀登记在表中。分发只做大小写敏感的前缀匹配，
//! 顺序固定为 VMESS、SHADOWSOCKS、SOCKS、TROJAN、VLESS、WIREGUARD、HYSTERIA2（含 `hy2://` 别名）。
//! 未匹配时返回 `None`，由调用方尝试其他解析策略。

pub mod custom;
mod hysteria2;
mod link;
mod shadowsocks;
mod socks;
mod trojan;
mod vless;
mod vmess;
pub mod wireguard;

pub use hysteria2::Hysteria2Codec;
pub use shadowsocks::ShadowsocksCodec;
pub use socks::SocksCodec;
pub use trojan::TrojanCodec;
pub use vless::VlessCodec;
pub use vmess::VmessCodec;
pub use wireguard::WireguardCodec;

use crate::error::ParseError;
use crate::types::{ConfigType, Profile};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use std::sync::Arc;

/// 单个协议的编解码器
pub trait ProfileCodec: Send + Sync {
    /// 该编解码器负责的配置类型
    fn config_type(&self) -> ConfigType;

    /// 接受的协议前缀，第一个为规范前缀
    fn schemes(&self) -> &'static [&'static str];

    /// URI → 配置
    fn decode(&self, uri: &str) -> Result<Profile, ParseError>;

    /// 配置 → URI
    fn encode(&self, profile: &Profile) -> Result<String, ParseError>;
}

/// 编解码器注册表
#[derive(Clone, Default)]
pub struct CodecRegistry {
    entries: Vec<(&'static str, Arc<dyn ProfileCodec>)>,
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let schemes: Vec<_> = self.entries.iter().map(|(s, _)| *s).collect();
        f.debug_struct("CodecRegistry").field("schemes", &schemes).finish()
    }
}

impl CodecRegistry {
    /// 空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置全部协议
    pub fn with_builtin_codecs() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(VmessCodec));
        registry.register(Arc::new(ShadowsocksCodec));
        registry.register(Arc::new(SocksCodec));
        registry.register(Arc::new(TrojanCodec));
        registry.register(Arc::new(VlessCodec));
        registry.register(Arc::new(WireguardCodec));
        registry.register(Arc::new(Hysteria2Codec));
        registry
    }

    /// 登记编解码器，匹配优先级按登记顺序
    pub fn register(&mut self, codec: Arc<dyn ProfileCodec>) {
        for scheme in codec.schemes() {
            self.entries.push((scheme, Arc::clone(&codec)));
        }
    }

    /// 根据前缀识别编解码器
    pub fn identify(&self, candidate: &str) -> Option<&dyn ProfileCodec> {
        let candidate = candidate.trim();
        self.entries
            .iter()
            .find(|(scheme, _)| candidate.starts_with(scheme))
            .map(|(_, codec)| codec.as_ref())
    }

    /// 按配置类型查找编解码器
    pub fn codec_for(&self, config_type: ConfigType) -> Option<&dyn ProfileCodec> {
        self.entries
            .iter()
            .find(|(_, codec)| codec.config_type() == config_type)
            .map(|(_, codec)| codec.as_ref())
    }

    /// 识别并解码一行
    pub fn decode(&self, line: &str) -> Result<Profile, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ParseError::NoneData);
        }
        let codec = self.identify(line).ok_or(ParseError::IncorrectProtocol)?;
        codec.decode(line)
    }

    /// 生成分享链接
    pub fn encode(&self, profile: &Profile) -> Result<String, ParseError> {
        match profile.config_type {
            ConfigType::Custom | ConfigType::Http => Err(ParseError::Unshareable),
            other => self
                .codec_for(other)
                .ok_or(ParseError::IncorrectProtocol)?
                .encode(profile),
        }
    }
}

/// 宽松 Base64 解码
///
/// 忽略空白，依次尝试标准 / URL 安全、有无填充四种字母表，结果必须是合法 UTF-8。
pub fn decode_base64(input: &str) -> Option<String> {
    let clean: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    if clean.is_empty() {
        return None;
    }
    let engines = [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD];
    engines
        .iter()
        .find_map(|engine| engine.decode(&clean).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

/// 空字符串视为缺失
pub(crate) fn non_empty(s: impl Into<String>) -> Option<String> {
    let s = s.into();
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
