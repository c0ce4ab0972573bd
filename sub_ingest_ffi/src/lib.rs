//! 订阅导入 FFI 绑定
//!
//! 提供 C ABI 兼容的接口，供宿主应用调用。返回的字符串统一由 `sub_ingest_string_free` 释放。

use std::ffi::{c_char, c_int, CStr, CString};
use std::path::Path;
use std::ptr;
use std::sync::Arc;

use sub_ingest_core::{
    BatchImporter, DeviceIdentity, DeviceRegistrationClient, Error, IngestConfig, JsonFileStore, MemoryStore,
    ProfileStore, ReqwestTransport, RequestSigner, ResilientFetcher, SharedProxyState, SubscriptionSync,
};
use tracing::{error, warn};

/// 错误码定义
pub const SUB_INGEST_OK: c_int = 0;
pub const SUB_INGEST_ERR_NULL_PTR: c_int = -1;
pub const SUB_INGEST_ERR_INVALID_PARAM: c_int = -2;
pub const SUB_INGEST_ERR_PARSE: c_int = -3;
pub const SUB_INGEST_ERR_NETWORK: c_int = -4;
pub const SUB_INGEST_ERR_ENCODING: c_int = -5;
pub const SUB_INGEST_ERR_AUTH: c_int = -6;
pub const SUB_INGEST_ERR_STORE: c_int = -7;
pub const SUB_INGEST_ERR_SIGNATURE: c_int = -8;

/// 注册正在进行，本次调用未执行
pub const SUB_INGEST_IN_PROGRESS: c_int = 1;

/// 批量导入结果
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct SubIngestSummary {
    pub profiles: u32,
    pub subscriptions: u32,
    pub failures: u32,
    pub filtered: u32,
}

/// 导入上下文
pub struct SubIngestContext {
    runtime: tokio::runtime::Runtime,
    proxy: Arc<SharedProxyState>,
    store: Arc<dyn ProfileStore>,
    signer: RequestSigner,
    sync: SubscriptionSync,
    registration: DeviceRegistrationClient,
}

impl SubIngestContext {
    fn build(data_path: Option<&str>, config: IngestConfig) -> sub_ingest_core::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;

        let store: Arc<dyn ProfileStore> = match data_path {
            Some(path) => Arc::new(JsonFileStore::open(Path::new(path))?),
            None => Arc::new(MemoryStore::new()),
        };
        let transport = Arc::new(ReqwestTransport::new()?);
        let proxy = Arc::new(SharedProxyState::new());
        let signer = RequestSigner::new(config.signer.clone());

        let fetcher = Arc::new(ResilientFetcher::new(
            transport.clone(),
            proxy.clone(),
            signer.clone(),
            config.fetcher.clone(),
        ));
        let sync = SubscriptionSync::new(
            BatchImporter::with_builtin_codecs(store.clone()),
            fetcher,
            config.sync.clone(),
        );
        let registration = DeviceRegistrationClient::new(
            transport,
            signer.clone(),
            Arc::new(DeviceIdentity::new(store.clone())),
            sync.clone(),
            config.registration,
        );

        Ok(Self {
            runtime,
            proxy,
            store,
            signer,
            sync,
            registration,
        })
    }
}

fn error_code(err: &Error) -> c_int {
    match err {
        Error::Parse(_) => SUB_INGEST_ERR_PARSE,
        Error::Network(_) => SUB_INGEST_ERR_NETWORK,
        Error::Auth(_) => SUB_INGEST_ERR_AUTH,
        Error::Signature(_) => SUB_INGEST_ERR_SIGNATURE,
        Error::Store(_) | Error::Io(_) | Error::Json(_) => SUB_INGEST_ERR_STORE,
        Error::Config(_) | Error::InvalidParam(_) => SUB_INGEST_ERR_INVALID_PARAM,
    }
}

/// 读取可空的 C 字符串；空指针为 `Ok(None)`
fn optional_str<'a>(s: *const c_char) -> Result<Option<&'a str>, c_int> {
    if s.is_null() {
        return Ok(None);
    }
    unsafe { CStr::from_ptr(s) }
        .to_str()
        .map(Some)
        .map_err(|_| SUB_INGEST_ERR_ENCODING)
}

fn required_str<'a>(s: *const c_char) -> Result<&'a str, c_int> {
    optional_str(s)?.ok_or(SUB_INGEST_ERR_NULL_PTR)
}

fn into_c_string(value: String) -> *mut c_char {
    match CString::new(value) {
        Ok(s) => s.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// 创建上下文
///
/// `data_path` 为空时使用内存存储；`config_json` 为空时使用默认配置。
#[no_mangle]
pub extern "C" fn sub_ingest_context_new(data_path: *const c_char, config_json: *const c_char) -> *mut SubIngestContext {
    let (data_path, config_json) = match (optional_str(data_path), optional_str(config_json)) {
        (Ok(d), Ok(c)) => (d, c),
        _ => return ptr::null_mut(),
    };

    let config = match config_json {
        Some(json) => match serde_json::from_str::<IngestConfig>(json) {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "Invalid config JSON");
                return ptr::null_mut();
            }
        },
        None => IngestConfig::default(),
    };
    if let Err(e) = config.validate() {
        error!(error = %e, "Config rejected");
        return ptr::null_mut();
    }

    match SubIngestContext::build(data_path, config) {
        Ok(ctx) => Box::into_raw(Box::new(ctx)),
        Err(e) => {
            error!(error = %e, "Failed to create context");
            ptr::null_mut()
        }
    }
}

/// 销毁上下文
#[no_mangle]
pub extern "C" fn sub_ingest_context_free(ctx: *mut SubIngestContext) {
    if !ctx.is_null() {
        unsafe {
            drop(Box::from_raw(ctx));
        }
    }
}

/// 释放本库返回的字符串
#[no_mangle]
pub extern "C" fn sub_ingest_string_free(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            drop(CString::from_raw(s));
        }
    }
}

/// 更新本地代理状态
#[no_mangle]
pub extern "C" fn sub_ingest_set_proxy_state(ctx: *const SubIngestContext, running: c_int, http_port: c_int) -> c_int {
    if ctx.is_null() {
        return SUB_INGEST_ERR_NULL_PTR;
    }
    let Ok(port) = u16::try_from(http_port) else {
        return SUB_INGEST_ERR_INVALID_PARAM;
    };
    let ctx = unsafe { &*ctx };
    ctx.proxy.set(running != 0, port);
    SUB_INGEST_OK
}

/// 批量导入文本
///
/// 新增订阅时会同步全部订阅，调用会阻塞到同步结束。
#[no_mangle]
pub extern "C" fn sub_ingest_import_batch(
    ctx: *const SubIngestContext,
    text: *const c_char,
    subscription_id: *const c_char,
    append: c_int,
    out_summary: *mut SubIngestSummary,
) -> c_int {
    if ctx.is_null() || out_summary.is_null() {
        return SUB_INGEST_ERR_NULL_PTR;
    }
    let text = match required_str(text) {
        Ok(t) => t,
        Err(code) => return code,
    };
    let subscription_id = match optional_str(subscription_id) {
        Ok(s) => s.unwrap_or_default(),
        Err(code) => return code,
    };

    let ctx = unsafe { &*ctx };
    match ctx
        .runtime
        .block_on(ctx.sync.import_text(text, subscription_id, append != 0))
    {
        Ok(summary) => {
            unsafe {
                *out_summary = SubIngestSummary {
                    profiles: summary.profiles as u32,
                    subscriptions: summary.subscriptions as u32,
                    failures: summary.failures as u32,
                    filtered: summary.filtered as u32,
                };
            }
            SUB_INGEST_OK
        }
        Err(e) => {
            warn!(error = %e, "Batch import failed");
            error_code(&e)
        }
    }
}

/// 同步全部订阅，返回导入的配置数
#[no_mangle]
pub extern "C" fn sub_ingest_sync_all(ctx: *const SubIngestContext) -> c_int {
    if ctx.is_null() {
        return SUB_INGEST_ERR_NULL_PTR;
    }
    let ctx = unsafe { &*ctx };
    let count = ctx.runtime.block_on(ctx.sync.sync_all());
    c_int::try_from(count).unwrap_or(c_int::MAX)
}

/// 确保设备已注册并同步订阅
///
/// 成功时通过 `out_subscription_id` 返回订阅标识；注册进行中返回 `SUB_INGEST_IN_PROGRESS`。
#[no_mangle]
pub extern "C" fn sub_ingest_ensure_subscription(
    ctx: *const SubIngestContext,
    force: c_int,
    out_subscription_id: *mut *mut c_char,
) -> c_int {
    if ctx.is_null() || out_subscription_id.is_null() {
        return SUB_INGEST_ERR_NULL_PTR;
    }
    let ctx = unsafe { &*ctx };
    match ctx.runtime.block_on(ctx.registration.ensure_subscription(force != 0)) {
        Ok(Some(id)) => {
            unsafe {
                *out_subscription_id = into_c_string(id);
            }
            SUB_INGEST_OK
        }
        Ok(None) => SUB_INGEST_IN_PROGRESS,
        Err(e) => error_code(&e),
    }
}

/// 注销当前设备订阅，返回删除的配置数
#[no_mangle]
pub extern "C" fn sub_ingest_logout(ctx: *const SubIngestContext) -> c_int {
    if ctx.is_null() {
        return SUB_INGEST_ERR_NULL_PTR;
    }
    let ctx = unsafe { &*ctx };
    match ctx.registration.logout() {
        Ok(removed) => c_int::try_from(removed).unwrap_or(c_int::MAX),
        Err(e) => error_code(&e),
    }
}

/// 设备标识，不存在时生成
#[no_mangle]
pub extern "C" fn sub_ingest_device_id(ctx: *const SubIngestContext) -> *mut c_char {
    if ctx.is_null() {
        return ptr::null_mut();
    }
    let ctx = unsafe { &*ctx };
    match ctx.registration.identity().get_or_create() {
        Ok(id) => into_c_string(id),
        Err(e) => {
            error!(error = %e, "Failed to get device id");
            ptr::null_mut()
        }
    }
}

/// 认证请求头，JSON 对象形式
#[no_mangle]
pub extern "C" fn sub_ingest_auth_headers(
    ctx: *const SubIngestContext,
    method: *const c_char,
    url: *const c_char,
    body: *const c_char,
) -> *mut c_char {
    if ctx.is_null() {
        return ptr::null_mut();
    }
    let (Ok(method), Ok(url), Ok(body)) = (required_str(method), required_str(url), optional_str(body)) else {
        return ptr::null_mut();
    };
    let ctx = unsafe { &*ctx };

    match ctx.signer.create_auth_headers(method, url, body.unwrap_or_default()) {
        Ok(headers) => {
            let map: serde_json::Map<String, serde_json::Value> = headers
                .into_iter()
                .map(|(k, v)| (k, serde_json::Value::String(v)))
                .collect();
            into_c_string(serde_json::Value::Object(map).to_string())
        }
        Err(e) => {
            error!(error = %e, "Failed to sign request");
            ptr::null_mut()
        }
    }
}

/// 全部配置的分享链接，每行一条
#[no_mangle]
pub extern "C" fn sub_ingest_share_all(ctx: *const SubIngestContext) -> *mut c_char {
    if ctx.is_null() {
        return ptr::null_mut();
    }
    let ctx = unsafe { &*ctx };
    let keys = ctx.store.profile_keys();
    into_c_string(ctx.sync.importer().share_profiles(&keys))
}

/// 当前配置数
#[no_mangle]
pub extern "C" fn sub_ingest_profile_count(ctx: *const SubIngestContext) -> c_int {
    if ctx.is_null() {
        return SUB_INGEST_ERR_NULL_PTR;
    }
    let ctx = unsafe { &*ctx };
    c_int::try_from(ctx.store.profile_keys().len()).unwrap_or(c_int::MAX)
}
