//! # BLE Types
//!
//! BlueZ 远端对象注册表的数据模型（无总线依赖）
//!
//! ## 模块
//!
//! - `names`: 接口名、属性名、方法名常量
//! - `path`: 对象路径（`ObjectPath`）
//! - `value`: 动态类型属性值（`PropertyValue`）
//! - `uuid`: UUID 校验、规范化与 `UuidFilter`
//! - `signal`: 总线通知（`Signal`）与匹配规则（`MatchRule`）
//!
//! ## 在架构中的位置
//!
//! ```text
//! Types Layer (ble-types)        ← 本 crate
//!     ↓ ObjectRecord / Signal
//! Bus Layer (ble-bus)            ← BusTransport trait（mock / zbus）
//!     ↓
//! Driver Layer (ble-driver)      ← ObjectCache + DiscoveryController
//!     ↓
//! Client Layer (ble-client)      ← Adapter / Device / GATT 视图
//! ```

pub mod names;
pub mod path;
pub mod signal;
pub mod uuid;
pub mod value;

// 重新导出常用类型
pub use names::*;
pub use path::ObjectPath;
pub use signal::{MatchRule, Signal, SignalPayload};
pub use uuid::{UuidFilter, is_valid_uuid, normalize_uuid};
pub use value::{InterfaceMap, PropertyMap, PropertyValue};

use thiserror::Error;

/// 数据模型层错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// 对象路径不符合总线路径规则
    #[error("Invalid object path: {path:?}")]
    InvalidObjectPath { path: String },

    /// UUID 格式错误（既不是 16/32 位短格式，也不是 128 位格式）
    #[error("Invalid UUID: {uuid:?}")]
    InvalidUuid { uuid: String },
}

/// 一次全量枚举中的单个对象记录
///
/// 对应 `GetManagedObjects` 返回的 (path, interface → properties) 三元组。
///
/// # 示例
///
/// ```rust
/// use ble_types::{ObjectPath, ObjectRecord, PropertyMap, PropertyValue, DEVICE_INTERFACE};
///
/// let mut props = PropertyMap::new();
/// props.insert("Name".to_string(), PropertyValue::from("sensor"));
///
/// let record = ObjectRecord::new(ObjectPath::new("/org/bluez/hci0/dev_00").unwrap())
///     .with_interface(DEVICE_INTERFACE, props);
/// assert!(record.implements(DEVICE_INTERFACE));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObjectRecord {
    /// 对象路径（唯一标识）
    pub path: ObjectPath,
    /// 接口名 → 属性表
    pub interfaces: InterfaceMap,
}

impl ObjectRecord {
    /// 创建不带任何接口的记录
    pub fn new(path: ObjectPath) -> Self {
        Self {
            path,
            interfaces: InterfaceMap::new(),
        }
    }

    /// 追加一个接口及其属性（链式调用）
    pub fn with_interface(mut self, interface: impl Into<String>, properties: PropertyMap) -> Self {
        self.interfaces.insert(interface.into(), properties);
        self
    }

    /// 是否实现了指定接口
    pub fn implements(&self, interface: &str) -> bool {
        self.interfaces.contains_key(interface)
    }
}
