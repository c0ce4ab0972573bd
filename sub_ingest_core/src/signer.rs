//! 控制面请求签名
//!
//! 签名串格式：
//! `METHOD|url|timestamp|nonce|packageId[|body]`
//!
//! 签名 = Base64(HMAC-SHA256(secret, 签名串))。时间戳与 nonce 每次请求重新生成。
//! 服务端校验规则（`verify`）：时间差不超过 5 分钟、包名一致、常量时间比较签名。

use crate::config::SignerConfig;
use crate::error::{Error, Result};
use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD};
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_APP_PACKAGE: &str = "X-App-Package";
pub const HEADER_APP_VERSION: &str = "X-App-Version";
pub const HEADER_TIMESTAMP: &str = "X-Request-Timestamp";
pub const HEADER_NONCE: &str = "X-Request-Nonce";
pub const HEADER_SIGNATURE: &str = "X-Request-Signature";

/// 时间戳允许的最大偏差（毫秒）
pub const MAX_TIMESTAMP_DIFF_MS: u64 = 5 * 60 * 1000;

/// 一次请求的签名结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub package_id: String,
    pub version: String,
    pub timestamp_ms: u64,
    pub nonce: String,
    pub signature: String,
}

impl SignedRequest {
    /// 转换为请求头
    pub fn headers(&self) -> Vec<(String, String)> {
        vec![
            (HEADER_APP_PACKAGE.to_string(), self.package_id.clone()),
            (HEADER_APP_VERSION.to_string(), self.version.clone()),
            (HEADER_TIMESTAMP.to_string(), self.timestamp_ms.to_string()),
            (HEADER_NONCE.to_string(), self.nonce.clone()),
            (HEADER_SIGNATURE.to_string(), self.signature.clone()),
        ]
    }
}

/// 请求签名器
#[derive(Clone)]
pub struct RequestSigner {
    config: SignerConfig,
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("package_id", &self.config.package_id)
            .field("app_version", &self.config.app_version)
            .finish_non_exhaustive()
    }
}

impl RequestSigner {
    pub fn new(config: SignerConfig) -> Self {
        Self { config }
    }

    pub fn package_id(&self) -> &str {
        &self.config.package_id
    }

    /// 构造签名串
    pub fn canonical_string(
        method: &str,
        url: &str,
        timestamp_ms: u64,
        nonce: &str,
        package_id: &str,
        body: &str,
    ) -> String {
        let mut s = format!(
            "{}|{}|{}|{}|{}",
            method.to_uppercase(),
            url,
            timestamp_ms,
            nonce,
            package_id
        );
        if !body.is_empty() {
            s.push('|');
            s.push_str(body);
        }
        s
    }

    /// 计算签名
    pub fn sign(
        &self,
        method: &str,
        url: &str,
        timestamp_ms: u64,
        nonce: &str,
        package_id: &str,
        body: &str,
    ) -> Result<String> {
        let message = Self::canonical_string(method, url, timestamp_ms, nonce, package_id, body);
        debug!(method = method, url = url, "Signing control-plane request");

        let mut mac = HmacSha256::new_from_slice(self.config.secret.as_bytes())
            .map_err(|e| Error::Signature(format!("failed to initialise HMAC: {}", e)))?;
        mac.update(message.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    /// 生成 16 字节随机 nonce（URL 安全 Base64，无填充）
    pub fn generate_nonce() -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// 当前毫秒时间戳
    pub fn current_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }

    /// 为一次请求生成签名
    pub fn sign_request(&self, method: &str, url: &str, body: &str) -> Result<SignedRequest> {
        let timestamp_ms = Self::current_timestamp();
        let nonce = Self::generate_nonce();
        let signature = self.sign(method, url, timestamp_ms, &nonce, &self.config.package_id, body)?;

        Ok(SignedRequest {
            package_id: self.config.package_id.clone(),
            version: self.config.app_version.clone(),
            timestamp_ms,
            nonce,
            signature,
        })
    }

    /// 生成五个认证请求头
    pub fn create_auth_headers(&self, method: &str, url: &str, body: &str) -> Result<Vec<(String, String)>> {
        Ok(self.sign_request(method, url, body)?.headers())
    }

    /// 服务端校验（客户端不调用）
    #[allow(clippy::too_many_arguments)]
    pub fn verify(
        &self,
        method: &str,
        url: &str,
        timestamp_ms: u64,
        nonce: &str,
        package_id: &str,
        body: &str,
        received_signature: &str,
    ) -> Result<()> {
        self.verify_at(
            Self::current_timestamp(),
            method,
            url,
            timestamp_ms,
            nonce,
            package_id,
            body,
            received_signature,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn verify_at(
        &self,
        now_ms: u64,
        method: &str,
        url: &str,
        timestamp_ms: u64,
        nonce: &str,
        package_id: &str,
        body: &str,
        received_signature: &str,
    ) -> Result<()> {
        if now_ms.abs_diff(timestamp_ms) > MAX_TIMESTAMP_DIFF_MS {
            warn!(timestamp_ms, "Request timestamp outside the accepted window");
            return Err(Error::Signature("timestamp outside 5-minute window".to_string()));
        }

        if package_id != self.config.package_id {
            warn!(
                expected = %self.config.package_id,
                got = package_id,
                "Package name mismatch"
            );
            return Err(Error::Signature("package mismatch".to_string()));
        }

        let expected = self.sign(method, url, timestamp_ms, nonce, package_id, body)?;
        if expected.as_bytes().ct_eq(received_signature.as_bytes()).into() {
            Ok(())
        } else {
            Err(Error::Signature("signature mismatch".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> RequestSigner {
        RequestSigner::new(SignerConfig {
            package_id: "com.test.app".to_string(),
            app_version: "1.2.3".to_string(),
            secret: "unit-test-secret".to_string(),
        })
    }

    const URL: &str = "http://sub.example.net:8001/sub/abc";

    #[test]
    fn test_canonical_string_body_segment() {
        let without = RequestSigner::canonical_string("get", URL, 1, "n", "pkg", "");
        assert_eq!(without, format!("GET|{}|1|n|pkg", URL));
        let with = RequestSigner::canonical_string("post", URL, 1, "n", "pkg", "{}");
        assert_eq!(with, format!("POST|{}|1|n|pkg|{{}}", URL));
    }

    #[test]
    fn test_sign_deterministic() {
        let s = signer();
        let a = s.sign("GET", URL, 1_700_000_000_000, "nonce", "com.test.app", "").unwrap();
        let b = s.sign("GET", URL, 1_700_000_000_000, "nonce", "com.test.app", "").unwrap();
        assert_eq!(a, b);
        // SHA-256 输出 32 字节，Base64 后 44 个字符
        assert_eq!(a.len(), 44);
    }

    #[test]
    fn test_sign_sensitive_to_every_input() {
        let s = signer();
        let base = s.sign("GET", URL, 1000, "nonce", "com.test.app", "body").unwrap();

        let variants = [
            s.sign("PUT", URL, 1000, "nonce", "com.test.app", "body").unwrap(),
            s.sign("GET", "http://sub.example.net:8001/sub/abd", 1000, "nonce", "com.test.app", "body")
                .unwrap(),
            s.sign("GET", URL, 1001, "nonce", "com.test.app", "body").unwrap(),
            s.sign("GET", URL, 1000, "noncf", "com.test.app", "body").unwrap(),
            s.sign("GET", URL, 1000, "nonce", "com.test.app", "bodz").unwrap(),
        ];
        for v in variants {
            assert_ne!(base, v);
        }
    }

    #[test]
    fn test_method_is_case_insensitive() {
        let s = signer();
        let lower = s.sign("get", URL, 5, "n", "com.test.app", "").unwrap();
        let upper = s.sign("GET", URL, 5, "n", "com.test.app", "").unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn test_nonce_format() {
        let a = RequestSigner::generate_nonce();
        let b = RequestSigner::generate_nonce();
        assert_ne!(a, b);
        // 16 字节无填充 Base64 为 22 个字符
        assert_eq!(a.len(), 22);
        assert!(!a.contains('=') && !a.contains('+') && !a.contains('/'));
    }

    #[test]
    fn test_auth_headers_fresh_per_call() {
        let s = signer();
        let first = s.create_auth_headers("GET", URL, "").unwrap();
        let second = s.create_auth_headers("GET", URL, "").unwrap();
        assert_eq!(first.len(), 5);
        let nonce = |h: &[(String, String)]| {
            h.iter().find(|(k, _)| k == HEADER_NONCE).map(|(_, v)| v.clone()).unwrap()
        };
        assert_ne!(nonce(&first), nonce(&second));
        assert!(first.iter().any(|(k, v)| k == HEADER_APP_PACKAGE && v == "com.test.app"));
        assert!(first.iter().any(|(k, v)| k == HEADER_APP_VERSION && v == "1.2.3"));
    }

    #[test]
    fn test_verify_roundtrip() {
        let s = signer();
        let req = s.sign_request("GET", URL, "").unwrap();
        assert!(s
            .verify("GET", URL, req.timestamp_ms, &req.nonce, &req.package_id, "", &req.signature)
            .is_ok());
    }

    #[test]
    fn test_verify_rejects_stale_timestamp() {
        let s = signer();
        let ts = 1_000_000;
        let sig = s.sign("GET", URL, ts, "n", "com.test.app", "").unwrap();
        let now = ts + MAX_TIMESTAMP_DIFF_MS + 1;
        assert!(s.verify_at(now, "GET", URL, ts, "n", "com.test.app", "", &sig).is_err());
        assert!(s.verify_at(ts + 1000, "GET", URL, ts, "n", "com.test.app", "", &sig).is_ok());
    }

    #[test]
    fn test_verify_rejects_package_and_signature_mismatch() {
        let s = signer();
        let ts = 1_000_000;
        let sig = s.sign("GET", URL, ts, "n", "com.other", "").unwrap();
        assert!(s.verify_at(ts, "GET", URL, ts, "n", "com.other", "", &sig).is_err());
        assert!(s.verify_at(ts, "GET", URL, ts, "n", "com.test.app", "", "AAAA").is_err());
    }
}
