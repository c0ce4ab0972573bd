//! 订阅与配置导入核心库
//!
//! 提供订阅导入的完整流程，包括：
//! - 各协议分享链接的解析与生成
//! - 批量导入（base64 / 逐行 / 整体配置回退）
//! - 带签名与多级回退的订阅拉取
//! - 设备注册与订阅同步

pub mod codec;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod identity;
pub mod importer;
pub mod quota;
pub mod registration;
pub mod signer;
pub mod store;
pub mod sync;
pub mod transport;
pub mod types;

pub use codec::{CodecRegistry, ProfileCodec};
pub use config::{FetcherConfig, IngestConfig, RegistrationConfig, SignerConfig, SyncConfig};
pub use error::{Error, NetworkFailure, ParseError, Result};
pub use fetcher::{Fetched, ProxyState, ResilientFetcher, SharedProxyState};
pub use identity::DeviceIdentity;
pub use importer::BatchImporter;
pub use quota::{QuotaInfo, RemarksQuota};
pub use registration::{DeviceRegistrationClient, RegistrationState};
pub use signer::RequestSigner;
pub use store::{JsonFileStore, MemoryStore, ProfileStore};
pub use sync::SubscriptionSync;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
pub use types::*;
