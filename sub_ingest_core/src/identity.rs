//! 设备标识
//!
//! 首次访问时生成 UUID v4 并持久化，之后保持不变。
//! 读取与生成在存储的写锁内完成，同一存储上的多个实例也只会生成一次。

use crate::error::Result;
use crate::store::ProfileStore;
use std::sync::Arc;
use tracing::info;

pub struct DeviceIdentity {
    store: Arc<dyn ProfileStore>,
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity").finish_non_exhaustive()
    }
}

impl DeviceIdentity {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self { store }
    }

    /// 读取设备标识，不存在时生成
    pub fn get_or_create(&self) -> Result<String> {
        let (id, created) = self
            .store
            .get_or_init_device_id(&mut || uuid::Uuid::new_v4().to_string())?;
        if created {
            info!(device_id = %id, "Generated new device id");
        }
        Ok(id)
    }

    pub fn has_device_id(&self) -> bool {
        self.existing().is_some()
    }

    fn existing(&self) -> Option<String> {
        self.store.device_id().filter(|id| !id.trim().is_empty())
    }
}
