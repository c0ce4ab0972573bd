//! 持久化
//!
//! `ProfileStore` 是导入、同步与注册流程依赖的键值存储接口。配置按插入顺序枚举。
//! 每个键的写入各自原子，不提供跨记录事务。

use crate::error::{Error, Result};
use crate::types::{Profile, SubscriptionItem};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 配置与订阅存储
pub trait ProfileStore: Send + Sync {
    /// 追加一条配置，返回新生成的键
    fn insert_profile(&self, profile: Profile) -> Result<String>;

    /// 按顺序追加多条配置
    fn insert_profiles(&self, profiles: Vec<Profile>) -> Result<Vec<String>> {
        profiles.into_iter().map(|p| self.insert_profile(p)).collect()
    }

    fn get_profile(&self, key: &str) -> Option<Profile>;

    /// 所有配置键，按插入顺序
    fn profile_keys(&self) -> Vec<String>;

    fn remove_profile(&self, key: &str) -> Result<()>;

    /// 删除属于某订阅的全部配置，返回删除数量
    fn remove_profiles_by_subscription(&self, subscription_id: &str) -> Result<usize>;

    fn selected_profile(&self) -> Option<String>;

    fn set_selected_profile(&self, key: Option<&str>) -> Result<()>;

    /// 所有订阅，按插入顺序
    fn subscriptions(&self) -> Vec<(String, SubscriptionItem)>;

    fn get_subscription(&self, key: &str) -> Option<SubscriptionItem>;

    /// 写入订阅，键为空时生成新键；返回实际使用的键
    fn put_subscription(&self, key: &str, item: SubscriptionItem) -> Result<String>;

    fn remove_subscription(&self, key: &str) -> Result<()>;

    fn device_id(&self) -> Option<String>;

    fn set_device_id(&self, device_id: &str) -> Result<()>;

    /// 读取设备标识，缺失或为空白时写入 `generate()` 的结果
    ///
    /// 检查与写入在同一把写锁内完成。返回标识以及是否新生成。
    fn get_or_init_device_id(&self, generate: &mut dyn FnMut() -> String) -> Result<(String, bool)>;

    /// 设备注册得到的当前订阅标识
    fn active_subscription(&self) -> Option<String>;

    fn set_active_subscription(&self, subscription_id: Option<&str>) -> Result<()>;
}

/// 生成存储键
pub fn new_key() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProfileEntry {
    key: String,
    profile: Profile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SubscriptionEntry {
    key: String,
    item: SubscriptionItem,
}

/// 两种存储共用的数据
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    #[serde(default)]
    profiles: Vec<ProfileEntry>,
    #[serde(default)]
    subscriptions: Vec<SubscriptionEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    selected: Option<String>,
    #[serde(rename = "deviceId", default, skip_serializing_if = "Option::is_none")]
    device_id: Option<String>,
    #[serde(rename = "activeSubscription", default, skip_serializing_if = "Option::is_none")]
    active_subscription: Option<String>,
}

impl StoreState {
    fn usable_device_id(&self) -> Option<String> {
        self.device_id.clone().filter(|id| !id.trim().is_empty())
    }

    fn insert_profile(&mut self, profile: Profile) -> String {
        let key = new_key();
        self.profiles.push(ProfileEntry {
            key: key.clone(),
            profile,
        });
        key
    }

    fn remove_profiles_where(&mut self, pred: impl Fn(&ProfileEntry) -> bool) -> usize {
        let before = self.profiles.len();
        self.profiles.retain(|e| !pred(e));
        if let Some(selected) = &self.selected {
            if !self.profiles.iter().any(|e| &e.key == selected) {
                self.selected = None;
            }
        }
        before - self.profiles.len()
    }

    fn put_subscription(&mut self, key: &str, item: SubscriptionItem) -> String {
        let key = if key.is_empty() { new_key() } else { key.to_string() };
        match self.subscriptions.iter_mut().find(|e| e.key == key) {
            Some(entry) => entry.item = item,
            None => self.subscriptions.push(SubscriptionEntry {
                key: key.clone(),
                item,
            }),
        }
        key
    }
}

/// 对共享状态的读写入口，写入后由实现决定是否落盘
trait StateBacked: Send + Sync {
    fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> R;
    fn write<R>(&self, f: impl FnOnce(&mut StoreState) -> R) -> Result<R>;
}

macro_rules! impl_profile_store {
    ($store:ty) => {
        impl ProfileStore for $store {
            fn insert_profile(&self, profile: Profile) -> Result<String> {
                self.write(|s| s.insert_profile(profile))
            }

            fn insert_profiles(&self, profiles: Vec<Profile>) -> Result<Vec<String>> {
                self.write(|s| profiles.into_iter().map(|p| s.insert_profile(p)).collect())
            }

            fn get_profile(&self, key: &str) -> Option<Profile> {
                self.read(|s| s.profiles.iter().find(|e| e.key == key).map(|e| e.profile.clone()))
            }

            fn profile_keys(&self) -> Vec<String> {
                self.read(|s| s.profiles.iter().map(|e| e.key.clone()).collect())
            }

            fn remove_profile(&self, key: &str) -> Result<()> {
                self.write(|s| {
                    s.remove_profiles_where(|e| e.key == key);
                })
            }

            fn remove_profiles_by_subscription(&self, subscription_id: &str) -> Result<usize> {
                self.write(|s| s.remove_profiles_where(|e| e.profile.subscription_id == subscription_id))
            }

            fn selected_profile(&self) -> Option<String> {
                self.read(|s| s.selected.clone())
            }

            fn set_selected_profile(&self, key: Option<&str>) -> Result<()> {
                self.write(|s| s.selected = key.map(str::to_string))
            }

            fn subscriptions(&self) -> Vec<(String, SubscriptionItem)> {
                self.read(|s| {
                    s.subscriptions
                        .iter()
                        .map(|e| (e.key.clone(), e.item.clone()))
                        .collect()
                })
            }

            fn get_subscription(&self, key: &str) -> Option<SubscriptionItem> {
                self.read(|s| s.subscriptions.iter().find(|e| e.key == key).map(|e| e.item.clone()))
            }

            fn put_subscription(&self, key: &str, item: SubscriptionItem) -> Result<String> {
                self.write(|s| s.put_subscription(key, item))
            }

            fn remove_subscription(&self, key: &str) -> Result<()> {
                self.write(|s| s.subscriptions.retain(|e| e.key != key))
            }

            fn device_id(&self) -> Option<String> {
                self.read(|s| s.device_id.clone())
            }

            fn set_device_id(&self, device_id: &str) -> Result<()> {
                self.write(|s| s.device_id = Some(device_id.to_string()))
            }

            fn get_or_init_device_id(&self, generate: &mut dyn FnMut() -> String) -> Result<(String, bool)> {
                if let Some(id) = self.read(StoreState::usable_device_id) {
                    return Ok((id, false));
                }
                self.write(|s| match s.usable_device_id() {
                    Some(id) => (id, false),
                    None => {
                        let id = generate();
                        s.device_id = Some(id.clone());
                        (id, true)
                    }
                })
            }

            fn active_subscription(&self) -> Option<String> {
                self.read(|s| s.active_subscription.clone())
            }

            fn set_active_subscription(&self, subscription_id: Option<&str>) -> Result<()> {
                self.write(|s| s.active_subscription = subscription_id.map(str::to_string))
            }
        }
    };
}

impl_profile_store!(MemoryStore);
impl_profile_store!(JsonFileStore);

/// 内存存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateBacked for MemoryStore {
    fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> R {
        f(&self.state.read())
    }

    fn write<R>(&self, f: impl FnOnce(&mut StoreState) -> R) -> Result<R> {
        Ok(f(&mut self.state.write()))
    }
}

/// JSON 文件存储
///
/// 每次写入先写临时文件再改名覆盖。
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: RwLock<StoreState>,
}

impl JsonFileStore {
    /// 打开存储文件，不存在时从空状态开始
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                StoreState::default()
            } else {
                serde_json::from_str(&content)
                    .map_err(|e| Error::Store(format!("failed to load {}: {}", path.display(), e)))?
            }
        } else {
            StoreState::default()
        };
        info!(
            path = %path.display(),
            profiles = state.profiles.len(),
            subscriptions = state.subscriptions.len(),
            "Opened profile store"
        );
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, state: &StoreState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "Profile store saved");
        Ok(())
    }
}

impl StateBacked for JsonFileStore {
    fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> R {
        f(&self.state.read())
    }

    fn write<R>(&self, f: impl FnOnce(&mut StoreState) -> R) -> Result<R> {
        let mut state = self.state.write();
        let mut next = state.clone();
        let out = f(&mut next);
        self.persist(&next)?;
        *state = next;
        Ok(out)
    }
}
