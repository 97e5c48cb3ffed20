//! 对象缓存
//!
//! 缓存内容是一个不可变的 `Snapshot`，通过 `ArcSwap` 整体替换：
//!
//! - `refresh()` 在后台构建完整的新快照，成功后一次性 `store`
//! - 读取方 `load` 到的永远是某一次刷新的完整结果，不会看到新旧混合的状态
//! - 刷新失败时旧快照保持不变
//!
//! 查询按枚举顺序进行（D-Bus 后端按路径排序），因此 `find_one` 的结果是确定的。

use crate::error::DriverError;
use crate::object::RemoteObject;
use arc_swap::ArcSwap;
use ble_bus::{BusError, BusTransport};
use ble_types::{ObjectPath, ObjectRecord};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// 一次完整枚举的结果
#[derive(Debug, Default)]
pub struct Snapshot {
    objects: Vec<Arc<RemoteObject>>,
    index: HashMap<ObjectPath, usize>,
}

impl Snapshot {
    /// 由枚举结果构建快照
    ///
    /// # 错误
    /// - `BusError::MalformedReply`: 同一路径出现多次
    pub fn build(
        records: Vec<ObjectRecord>,
        transport: &Arc<dyn BusTransport>,
    ) -> Result<Self, BusError> {
        let mut objects = Vec::with_capacity(records.len());
        let mut index = HashMap::with_capacity(records.len());
        for record in records {
            if index.contains_key(&record.path) {
                return Err(BusError::MalformedReply(format!(
                    "duplicate object path {} in enumeration",
                    record.path
                )));
            }
            index.insert(record.path.clone(), objects.len());
            objects.push(Arc::new(RemoteObject::new(record, transport.clone())));
        }
        Ok(Self { objects, index })
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// 按枚举顺序遍历
    pub fn iter(&self) -> impl Iterator<Item = &Arc<RemoteObject>> {
        self.objects.iter()
    }

    pub fn get(&self, path: &str) -> Option<&Arc<RemoteObject>> {
        self.index.get(path).map(|&i| &self.objects[i])
    }

    /// 第一个实现 `interface` 且满足谓词的对象
    ///
    /// # 错误
    /// - `DriverError::NotFound`: 没有匹配
    pub fn find_one<P>(&self, interface: &str, predicate: P) -> Result<Arc<RemoteObject>, DriverError>
    where
        P: Fn(&RemoteObject) -> bool,
    {
        self.objects
            .iter()
            .find(|obj| obj.implements(interface) && predicate(obj))
            .cloned()
            .ok_or_else(|| DriverError::NotFound {
                interface: interface.to_string(),
            })
    }

    /// 所有实现 `interface` 且满足谓词的对象（按枚举顺序，可能为空）
    pub fn find_all<P>(&self, interface: &str, predicate: P) -> Vec<Arc<RemoteObject>>
    where
        P: Fn(&RemoteObject) -> bool,
    {
        self.objects
            .iter()
            .filter(|obj| obj.implements(interface) && predicate(obj))
            .cloned()
            .collect()
    }
}

/// 对象缓存
///
/// # 示例
///
/// ```rust,ignore
/// use ble_driver::ObjectCache;
///
/// let cache = ObjectCache::load(transport)?;
/// let adapters = cache.find_all(ble_types::ADAPTER_INTERFACE, |_| true);
/// ```
pub struct ObjectCache {
    transport: Arc<dyn BusTransport>,
    snapshot: ArcSwap<Snapshot>,
}

impl ObjectCache {
    /// 创建空缓存（不访问总线）
    pub fn new(transport: Arc<dyn BusTransport>) -> Self {
        Self {
            transport,
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
        }
    }

    /// 创建缓存并立即刷新一次
    pub fn load(transport: Arc<dyn BusTransport>) -> Result<Self, DriverError> {
        let cache = Self::new(transport);
        cache.refresh()?;
        Ok(cache)
    }

    /// 重新枚举远端对象并原子替换快照
    ///
    /// # 错误
    /// - `DriverError::Bus`: 枚举失败或数据格式错误（旧快照保留）
    pub fn refresh(&self) -> Result<(), DriverError> {
        let records = self.transport.managed_objects()?;
        let snapshot = Snapshot::build(records, &self.transport)?;
        debug!("Object cache refreshed: {} objects", snapshot.len());
        self.snapshot.store(Arc::new(snapshot));
        Ok(())
    }

    /// 当前快照（多步读取时使用同一个快照保证一致性）
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    pub fn get(&self, path: &str) -> Option<Arc<RemoteObject>> {
        self.snapshot.load().get(path).cloned()
    }

    pub fn find_one<P>(&self, interface: &str, predicate: P) -> Result<Arc<RemoteObject>, DriverError>
    where
        P: Fn(&RemoteObject) -> bool,
    {
        self.snapshot.load().find_one(interface, predicate)
    }

    pub fn find_all<P>(&self, interface: &str, predicate: P) -> Vec<Arc<RemoteObject>>
    where
        P: Fn(&RemoteObject) -> bool,
    {
        self.snapshot.load().find_all(interface, predicate)
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.load().is_empty()
    }

    pub fn transport(&self) -> &Arc<dyn BusTransport> {
        &self.transport
    }
}
