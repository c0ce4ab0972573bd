//! 订阅同步
//!
//! 拉取全部启用的订阅，把响应体交给导入器，汇总导入数量。
//! 单个订阅失败不影响其他订阅。

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::fetcher::ResilientFetcher;
use crate::importer::{is_valid_sub_url, is_valid_url, BatchImporter};
use crate::quota::QuotaInfo;
use crate::types::{ImportSummary, SubscriptionItem};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// 订阅同步协调器
#[derive(Debug, Clone)]
pub struct SubscriptionSync {
    importer: BatchImporter,
    fetcher: Arc<ResilientFetcher>,
    config: SyncConfig,
}

impl SubscriptionSync {
    pub fn new(importer: BatchImporter, fetcher: Arc<ResilientFetcher>, config: SyncConfig) -> Self {
        Self {
            importer,
            fetcher,
            config,
        }
    }

    pub fn importer(&self) -> &BatchImporter {
        &self.importer
    }

    pub fn fetcher(&self) -> &Arc<ResilientFetcher> {
        &self.fetcher
    }

    /// 同步全部订阅，返回导入的配置总数
    pub async fn sync_all(&self) -> usize {
        let subscriptions = self.importer.store().subscriptions();
        let total_subs = subscriptions.len();

        let total = stream::iter(subscriptions)
            .map(|(key, item)| async move {
                match self.sync_one(&key, &item).await {
                    Ok(count) => count,
                    Err(e) => {
                        warn!(subscription_id = %key, error = %e, "Subscription sync failed");
                        0
                    }
                }
            })
            .buffer_unordered(self.config.max_concurrent.max(1))
            .fold(0usize, |acc, count| async move { acc + count })
            .await;

        info!(subscriptions = total_subs, profiles = total, "Subscription sync finished");
        total
    }

    /// 同步单个订阅，不满足条件的订阅返回 0
    pub async fn sync_one(&self, key: &str, item: &SubscriptionItem) -> Result<usize> {
        if key.trim().is_empty() || item.remarks.trim().is_empty() || item.url.trim().is_empty() {
            debug!(subscription_id = key, "Skipping incomplete subscription");
            return Ok(0);
        }
        if !item.enabled {
            debug!(subscription_id = key, "Skipping disabled subscription");
            return Ok(0);
        }

        let url = normalize_url(&item.url)?;
        if !is_valid_url(&url) {
            warn!(subscription_id = key, url = %url, "Subscription url is not http(s)");
            return Ok(0);
        }
        if !item.allow_insecure_url && !is_valid_sub_url(&url) {
            warn!(subscription_id = key, url = %url, "Insecure subscription url rejected");
            return Ok(0);
        }

        info!(subscription_id = key, url = %url, "Syncing subscription");
        let fetched = self
            .fetcher
            .fetch(&url, item.user_agent.as_deref(), self.config.timeout(), None)
            .await;

        if let Some(user_info) = fetched.user_info.as_deref() {
            self.save_quota(key, user_info)?;
        }
        if fetched.body.trim().is_empty() {
            return Ok(0);
        }

        let append = !self.config.replace_on_sync;
        let summary = self.importer.import_profiles(&fetched.body, key, append)?;
        Ok(summary.profiles)
    }

    /// 导入文本，新增订阅时随即同步全部订阅
    pub async fn import_text(&self, raw: &str, subscription_id: &str, append: bool) -> Result<ImportSummary> {
        let summary = self.importer.import_batch(raw, subscription_id, append)?;
        if summary.subscriptions > 0 {
            let synced = self.sync_all().await;
            debug!(synced, "Synced after importing subscriptions");
        }
        Ok(summary)
    }

    fn save_quota(&self, key: &str, header: &str) -> Result<()> {
        let store = self.importer.store();
        let Some(mut item) = store.get_subscription(key) else {
            warn!(subscription_id = key, "Subscription not found when saving quota");
            return Ok(());
        };
        let quota = QuotaInfo::parse(header);
        quota.apply_to(&mut item);
        store.put_subscription(key, item)?;
        info!(
            subscription_id = key,
            upload = ?quota.upload,
            download = ?quota.download,
            total = ?quota.total,
            expire = ?quota.expire,
            "Saved subscription userinfo"
        );
        Ok(())
    }
}

/// 规范化地址（国际化域名转为 punycode）
fn normalize_url(raw: &str) -> Result<String> {
    Url::parse(raw.trim())
        .map(|u| u.to_string())
        .map_err(|e| Error::InvalidParam(format!("invalid subscription url {}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FetcherConfig, SignerConfig};
    use crate::error::NetworkFailure;
    use crate::fetcher::SharedProxyState;
    use crate::signer::RequestSigner;
    use crate::store::{MemoryStore, ProfileStore};
    use crate::transport::{HttpResponse, MockHttpTransport};

    fn coordinator(transport: MockHttpTransport, store: Arc<MemoryStore>, config: SyncConfig) -> SubscriptionSync {
        let fetcher = ResilientFetcher::new(
            Arc::new(transport),
            Arc::new(SharedProxyState::new()),
            RequestSigner::new(SignerConfig::default()),
            FetcherConfig::default(),
        );
        SubscriptionSync::new(BatchImporter::with_builtin_codecs(store), Arc::new(fetcher), config)
    }

    fn body(hosts: &[&str]) -> String {
        hosts
            .iter()
            .map(|h| format!("trojan://pw@{}:443#{}", h, h))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[tokio::test]
    async fn test_sync_all_isolates_failures_and_saves_quota() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_subscription("good", SubscriptionItem::new("good", "https://good.example.com/sub"))
            .unwrap();
        store
            .put_subscription("broken", SubscriptionItem::new("broken", "https://broken.example.com/sub"))
            .unwrap();
        let mut disabled = SubscriptionItem::new("off", "https://off.example.com/sub");
        disabled.enabled = false;
        store.put_subscription("off", disabled).unwrap();
        store
            .put_subscription("plain", SubscriptionItem::new("plain", "http://plain.example.com/sub"))
            .unwrap();

        let mut transport = MockHttpTransport::new();
        transport
            .expect_get()
            .withf(|req| req.url.host_str() == Some("good.example.com"))
            .times(1)
            .returning(|_| {
                Ok(HttpResponse {
                    status: 200,
                    body: body(&["a.example", "b.example"]),
                    user_info: Some("upload=1; download=2; total=3; expire=4".to_string()),
                })
            });
        transport
            .expect_get()
            .withf(|req| req.url.host_str() == Some("broken.example.com"))
            .times(1)
            .returning(|_| Err(NetworkFailure::Dns));

        let sync = coordinator(transport, store.clone(), SyncConfig::default());
        assert_eq!(sync.sync_all().await, 2);

        let good = store.get_subscription("good").unwrap();
        assert_eq!(good.total, Some(3));
        assert_eq!(good.expire, Some(4));
        assert!(store
            .profile_keys()
            .iter()
            .all(|k| store.get_profile(k).unwrap().subscription_id == "good"));
    }

    #[test]
    fn test_sync_without_subscriptions_is_zero() {
        let store = Arc::new(MemoryStore::new());
        let sync = coordinator(MockHttpTransport::new(), store, SyncConfig::default());
        assert_eq!(tokio_test::block_on(sync.sync_all()), 0);
    }

    #[tokio::test]
    async fn test_sync_appends_by_default_and_replaces_when_configured() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_subscription("s", SubscriptionItem::new("s", "https://s.example.com/sub"))
            .unwrap();

        let mut transport = MockHttpTransport::new();
        transport.expect_get().returning(|_| {
            Ok(HttpResponse {
                status: 200,
                body: body(&["a.example"]),
                user_info: None,
            })
        });
        let sync = coordinator(transport, store.clone(), SyncConfig::default());
        sync.sync_all().await;
        sync.sync_all().await;
        assert_eq!(store.profile_keys().len(), 2);

        let mut transport = MockHttpTransport::new();
        transport.expect_get().returning(|_| {
            Ok(HttpResponse {
                status: 200,
                body: body(&["c.example"]),
                user_info: None,
            })
        });
        let config = SyncConfig {
            replace_on_sync: true,
            ..SyncConfig::default()
        };
        coordinator(transport, store.clone(), config).sync_all().await;
        assert_eq!(store.profile_keys().len(), 1);
    }

    #[tokio::test]
    async fn test_bounded_concurrency_counts_everything() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..5 {
            store
                .put_subscription(
                    &format!("s{}", i),
                    SubscriptionItem::new(format!("s{}", i), format!("https://s{}.example.com/sub", i)),
                )
                .unwrap();
        }
        let mut transport = MockHttpTransport::new();
        transport.expect_get().times(5).returning(|req| {
            let host = req.url.host_str().unwrap_or_default().to_string();
            Ok(HttpResponse {
                status: 200,
                body: body(&[&format!("node.{}", host)]),
                user_info: None,
            })
        });
        let config = SyncConfig {
            max_concurrent: 3,
            ..SyncConfig::default()
        };
        assert_eq!(coordinator(transport, store, config).sync_all().await, 5);
    }

    #[tokio::test]
    async fn test_allow_insecure_url() {
        let store = Arc::new(MemoryStore::new());
        let mut item = SubscriptionItem::new("lan", "http://10.0.0.5:8001/sub");
        item.allow_insecure_url = true;
        item.user_agent = Some("custom-agent".to_string());

        let mut transport = MockHttpTransport::new();
        transport
            .expect_get()
            .withf(|req| req.headers.iter().any(|(k, v)| k == "User-Agent" && v == "custom-agent"))
            .times(1)
            .returning(|_| {
                Ok(HttpResponse {
                    status: 200,
                    body: body(&["a.example"]),
                    user_info: None,
                })
            });
        let sync = coordinator(transport, store, SyncConfig::default());
        assert_eq!(sync.sync_one("lan", &item).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_import_text_triggers_sync_for_new_subscriptions() {
        let store = Arc::new(MemoryStore::new());
        let mut transport = MockHttpTransport::new();
        transport
            .expect_get()
            .withf(|req| req.url.host_str() == Some("new.example.com"))
            .times(1)
            .returning(|_| {
                Ok(HttpResponse {
                    status: 200,
                    body: body(&["x.example", "y.example"]),
                    user_info: None,
                })
            });

        let sync = coordinator(transport, store.clone(), SyncConfig::default());
        let summary = sync
            .import_text("https://new.example.com/sub#New", "", true)
            .await
            .unwrap();
        assert_eq!(summary.subscriptions, 1);
        assert_eq!(summary.profiles, 0);
        assert_eq!(store.profile_keys().len(), 2);
    }
}
