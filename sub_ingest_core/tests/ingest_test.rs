//! 集成测试 - 导入、持久化与订阅同步

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::Arc;
use sub_ingest_core::{
    BatchImporter, ConfigType, FetcherConfig, JsonFileStore, MemoryStore, ProfileStore, ReqwestTransport,
    RequestSigner, ResilientFetcher, SharedProxyState, SignerConfig, SubscriptionItem, SubscriptionSync,
    SyncConfig,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn vmess(host: &str, remarks: &str) -> String {
    let json = serde_json::json!({
        "v": "2",
        "ps": remarks,
        "add": host,
        "port": "443",
        "id": "b831381d-6324-4d53-ad4f-8cda48b30811",
        "aid": "0",
        "net": "ws",
        "path": "/ray",
        "tls": "tls"
    });
    format!("vmess://{}", STANDARD.encode(json.to_string()))
}

fn remarks_in_order(store: &dyn ProfileStore) -> Vec<String> {
    store
        .profile_keys()
        .iter()
        .filter_map(|k| store.get_profile(k))
        .map(|p| p.remarks)
        .collect()
}

#[test]
fn test_mixed_batch_counts() {
    let store = Arc::new(MemoryStore::new());
    let importer = BatchImporter::with_builtin_codecs(store.clone());

    let raw = format!("{}\n{}\nthis is not a link\n", vmess("a.example", "A"), vmess("b.example", "B"));
    let summary = importer.import_batch(&raw, "", true).unwrap();
    assert_eq!(summary.profiles, 2);
    assert_eq!(summary.failures, 1);
    assert_eq!(summary.subscriptions, 0);
    assert_eq!(remarks_in_order(store.as_ref()), vec!["A", "B"]);
}

#[test]
fn test_profiles_and_subscriptions_in_one_batch() {
    let store = Arc::new(MemoryStore::new());
    let importer = BatchImporter::with_builtin_codecs(store.clone());

    let raw = [
        "trojan://pw@t.example:443#T".to_string(),
        "ss://YWVzLTI1Ni1nY206c2VjcmV0@s.example:8388#S".to_string(),
        "https://provider.example.com/sub?token=1#Provider".to_string(),
        "garbage://x".to_string(),
    ]
    .join("\n");
    let summary = importer.import_batch(&raw, "", true).unwrap();
    assert_eq!(summary.profiles, 2);
    assert_eq!(summary.subscriptions, 1);
    assert_eq!(summary.failures, 2);

    let subs = store.subscriptions();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].1.remarks, "Provider");
}

#[test]
fn test_base64_blob_with_filter() {
    let store = Arc::new(MemoryStore::new());
    let mut item = SubscriptionItem::new("filtered", "https://p.example.com/sub");
    item.filter = Some("US".to_string());
    let key = store.put_subscription("", item).unwrap();

    let plain = ["trojan://pw@1.example:443#US-1", "trojan://pw@2.example:443#JP-1", "trojan://pw@3.example:443#US-2"]
        .join("\n");
    let blob = STANDARD.encode(plain);

    let importer = BatchImporter::with_builtin_codecs(store.clone());
    let summary = importer.import_batch(&blob, &key, true).unwrap();
    assert_eq!(summary.profiles, 2);
    assert_eq!(summary.filtered, 1);
    assert_eq!(remarks_in_order(store.as_ref()), vec!["US-1", "US-2"]);
}

#[test]
fn test_replace_carries_selection_over() {
    let store = Arc::new(MemoryStore::new());
    let importer = BatchImporter::with_builtin_codecs(store.clone());

    importer
        .import_batch("trojan://pw@keep.example:443#old\ntrojan://pw@drop.example:443#gone", "sub", true)
        .unwrap();
    let selected = store.profile_keys()[0].clone();
    store.set_selected_profile(Some(&selected)).unwrap();

    importer
        .import_batch("trojan://pw@other.example:443#x\ntrojan://pw@keep.example:443#new", "sub", false)
        .unwrap();
    assert_eq!(store.profile_keys().len(), 2);
    let now = store.selected_profile().and_then(|k| store.get_profile(&k)).unwrap();
    assert_eq!(now.server, "keep.example");
    assert_eq!(now.remarks, "new");
}

#[test]
fn test_json_array_becomes_custom_profiles_in_order() {
    let store = Arc::new(MemoryStore::new());
    let importer = BatchImporter::with_builtin_codecs(store.clone());

    let configs: Vec<_> = ["first", "second", "third"]
        .iter()
        .map(|name| {
            serde_json::json!({
                "remarks": name,
                "inbounds": [],
                "outbounds": [{"protocol": "vless", "settings": {"vnext": [{"address": format!("{}.example", name), "port": 443}]}}],
                "routing": {}
            })
        })
        .collect();
    let raw = serde_json::to_string(&configs).unwrap();

    let summary = importer.import_batch(&raw, "", true).unwrap();
    assert_eq!(summary.profiles, 3);
    assert_eq!(summary.failures, 0);
    assert_eq!(remarks_in_order(store.as_ref()), vec!["first", "second", "third"]);
    for key in store.profile_keys() {
        let profile = store.get_profile(&key).unwrap();
        assert_eq!(profile.config_type, ConfigType::Custom);
        assert!(profile.raw_config.is_some());
    }
}

#[test]
fn test_json_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");

    {
        let store = Arc::new(JsonFileStore::open(&path).unwrap());
        let importer = BatchImporter::with_builtin_codecs(store.clone());
        let raw = format!("{}\n{}", vmess("a.example", "A"), vmess("b.example", "B"));
        importer.import_batch(&raw, "", true).unwrap();
        store.set_device_id("device-xyz").unwrap();
    }

    let reopened = JsonFileStore::open(&path).unwrap();
    assert_eq!(remarks_in_order(&reopened), vec!["A", "B"]);
    assert_eq!(reopened.device_id().as_deref(), Some("device-xyz"));
}

#[test]
fn test_share_round_trip_through_import() {
    let source = Arc::new(MemoryStore::new());
    let importer = BatchImporter::with_builtin_codecs(source.clone());
    importer
        .import_batch(&format!("{}\ntrojan://pw@t.example:443#T", vmess("v.example", "V")), "", true)
        .unwrap();
    let shared = importer.share_profiles(&source.profile_keys());

    let target = Arc::new(MemoryStore::new());
    let summary = BatchImporter::with_builtin_codecs(target.clone())
        .import_batch(&shared, "", true)
        .unwrap();
    assert_eq!(summary.profiles, 2);
    assert_eq!(remarks_in_order(target.as_ref()), vec!["V", "T"]);
}

#[tokio::test]
async fn test_sync_over_http() {
    let server = MockServer::start().await;
    let body = STANDARD.encode(format!("{}\n{}", vmess("x.example", "X"), vmess("y.example", "Y")));
    Mock::given(method("GET"))
        .and(path("/sub/ok"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Subscription-Userinfo", "upload=100; download=200; total=1000; expire=1900000000")
                .set_body_string(body),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sub/down"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let ok_key = store
        .put_subscription("", SubscriptionItem::new("ok", format!("{}/sub/ok", server.uri())))
        .unwrap();
    store
        .put_subscription("", SubscriptionItem::new("down", format!("{}/sub/down", server.uri())))
        .unwrap();

    let signer = RequestSigner::new(SignerConfig::default());
    let fetcher = ResilientFetcher::new(
        Arc::new(ReqwestTransport::new().unwrap()),
        Arc::new(SharedProxyState::new()),
        signer,
        FetcherConfig::default(),
    );
    let sync = SubscriptionSync::new(
        BatchImporter::with_builtin_codecs(store.clone()),
        Arc::new(fetcher),
        SyncConfig::default(),
    );

    assert_eq!(sync.sync_all().await, 2);
    let item = store.get_subscription(&ok_key).unwrap();
    assert_eq!(item.upload, Some(100));
    assert_eq!(item.total, Some(1000));
    assert_eq!(item.expire, Some(1_900_000_000));
    assert_eq!(remarks_in_order(store.as_ref()), vec!["X", "Y"]);
}
