//! 设备注册
//!
//! 用设备标识向控制面换取订阅标识，写入订阅源后触发一次全量同步。

use crate::config::RegistrationConfig;
use crate::error::{Error, NetworkFailure, Result};
use crate::identity::DeviceIdentity;
use crate::signer::RequestSigner;
use crate::store::ProfileStore;
use crate::sync::SubscriptionSync;
use crate::transport::{HttpRequest, HttpTransport};
use crate::types::RegistrationResponse;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info, warn};
use url::Url;

/// 注册状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Idle,
    Registering,
    Ready,
    Failed,
}

/// 设备注册客户端
pub struct DeviceRegistrationClient {
    transport: Arc<dyn HttpTransport>,
    signer: RequestSigner,
    identity: Arc<DeviceIdentity>,
    sync: SubscriptionSync,
    config: RegistrationConfig,
    state: Mutex<RegistrationState>,
}

impl std::fmt::Debug for DeviceRegistrationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistrationClient")
            .field("state", &*self.state.lock())
            .field("registration_url", &self.config.registration_url)
            .finish_non_exhaustive()
    }
}

impl DeviceRegistrationClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        signer: RequestSigner,
        identity: Arc<DeviceIdentity>,
        sync: SubscriptionSync,
        config: RegistrationConfig,
    ) -> Self {
        Self {
            transport,
            signer,
            identity,
            sync,
            config,
            state: Mutex::new(RegistrationState::Idle),
        }
    }

    pub fn state(&self) -> RegistrationState {
        *self.state.lock()
    }

    pub fn identity(&self) -> &Arc<DeviceIdentity> {
        &self.identity
    }

    fn store(&self) -> &Arc<dyn ProfileStore> {
        self.sync.importer().store()
    }

    /// 注册设备，返回订阅标识
    pub async fn register_device(&self, device_id: &str) -> Result<String> {
        if device_id.trim().is_empty() {
            return Err(Error::Auth("device id is blank".to_string()));
        }

        let primary = registration_url(&self.config.registration_url, device_id)?;
        let response = match self.request(primary).await {
            Err(Error::Network(NetworkFailure::Dns)) => {
                warn!("Registration host unresolvable, retrying fallback endpoint");
                let fallback = registration_url(&self.config.registration_fallback_url, device_id)?;
                self.request(fallback).await?
            }
            other => other?,
        };

        if response.trim().is_empty() {
            return Err(Error::Auth("empty registration response".to_string()));
        }
        let parsed: RegistrationResponse = serde_json::from_str(&response)
            .map_err(|e| Error::Auth(format!("invalid registration response: {}", e)))?;
        let subscription_id = parsed
            .subscription_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::Auth("registration response has no subscriptionId".to_string()))?;

        info!(subscription_id = %subscription_id, "Device registered");
        Ok(subscription_id)
    }

    async fn request(&self, url: Url) -> Result<String> {
        let headers = self.signer.create_auth_headers("GET", url.as_str(), "")?;
        let request = HttpRequest::new(url, self.config.timeout())
            .header("User-Agent", self.config.user_agent.as_str())
            .headers(headers);

        let response = self.transport.get(request).await?;
        if !response.is_success() {
            return Err(NetworkFailure::HttpStatus(response.status).into());
        }
        Ok(response.body)
    }

    /// 确保订阅可用
    ///
    /// 正在注册时再次调用直接返回 `Ok(None)`。调用方取消时状态回到 `Idle`。
    pub async fn ensure_subscription(&self, force: bool) -> Result<Option<String>> {
        let Some(guard) = RegisteringGuard::acquire(&self.state) else {
            info!("Registration already in progress");
            return Ok(None);
        };

        let result = self.prepare_subscription(force).await;
        let next = match &result {
            Ok(_) => RegistrationState::Ready,
            Err(e) => {
                error!(error = %e, "Subscription setup failed");
                RegistrationState::Failed
            }
        };
        guard.finish(next);
        result.map(Some)
    }

    async fn prepare_subscription(&self, force: bool) -> Result<String> {
        let store = self.store().clone();
        let subscription_id = match self.current_subscription() {
            Some(id) if !force => id,
            _ => {
                let device_id = self.identity.get_or_create()?;
                let id = self.register_device(&device_id).await?;
                store.set_active_subscription(Some(&id))?;
                id
            }
        };

        let mut item = store.get_subscription(&subscription_id).unwrap_or_default();
        item.remarks = self.config.subscription_remarks.clone();
        item.url = subscription_url(&self.config.subscription_base_url, &subscription_id);
        item.enabled = true;
        item.allow_insecure_url = true;
        item.user_agent = Some(self.config.user_agent.clone());
        store.put_subscription(&subscription_id, item)?;

        let imported = self.sync.sync_all().await;
        if store.profile_keys().is_empty() {
            warn!(subscription_id = %subscription_id, "No profiles available after sync");
        }
        info!(subscription_id = %subscription_id, imported, "Subscription ready");
        Ok(subscription_id)
    }

    /// 当前订阅标识存在且对应的订阅源仍在
    pub fn is_registered(&self) -> bool {
        self.current_subscription().is_some()
    }

    pub fn current_subscription(&self) -> Option<String> {
        let store = self.store();
        store
            .active_subscription()
            .filter(|id| !id.trim().is_empty() && store.get_subscription(id).is_some())
    }

    /// 注销：删除订阅及其配置，清空订阅标识。返回删除的配置数
    pub fn logout(&self) -> Result<usize> {
        let store = self.store();
        let removed = match store.active_subscription() {
            Some(id) if !id.trim().is_empty() => self.sync.importer().remove_subscription(&id)?,
            _ => 0,
        };
        store.set_active_subscription(None)?;
        *self.state.lock() = RegistrationState::Idle;
        info!(removed, "Logged out");
        Ok(removed)
    }
}

/// 持有 `Registering` 状态，未调用 `finish` 就被丢弃时退回 `Idle`
struct RegisteringGuard<'a> {
    state: &'a Mutex<RegistrationState>,
    finished: bool,
}

impl<'a> RegisteringGuard<'a> {
    fn acquire(state: &'a Mutex<RegistrationState>) -> Option<Self> {
        let mut current = state.lock();
        if *current == RegistrationState::Registering {
            return None;
        }
        *current = RegistrationState::Registering;
        Some(Self {
            state,
            finished: false,
        })
    }

    fn finish(mut self, next: RegistrationState) {
        *self.state.lock() = next;
        self.finished = true;
    }
}

impl Drop for RegisteringGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut current = self.state.lock();
        if *current == RegistrationState::Registering {
            warn!("Registration cancelled");
            *current = RegistrationState::Idle;
        }
    }
}

/// `{base}/{id}`，base 去掉首尾的 '/'
pub fn subscription_url(base: &str, subscription_id: &str) -> String {
    format!("{}/{}", base.trim_matches('/'), subscription_id)
}

fn registration_url(base: &str, device_id: &str) -> Result<Url> {
    let encoded: String = url::form_urlencoded::byte_serialize(device_id.as_bytes()).collect();
    let separator = if base.contains('?') { '&' } else { '?' };
    Url::parse(&format!("{}{}deviceId={}", base, separator, encoded))
        .map_err(|e| Error::Config(format!("invalid registration url {}: {}", base, e)))
}
