//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use ble_sdk::prelude::*;
//! ```

// 客户端层（推荐使用）
pub use ble_client::{
    Adapter, Characteristic, Connection, ConnectionBuilder, Descriptor, Device, NotifyHandle,
    Service,
};
// 视图 trait（`path()` / `name()` / `uuid()` / `read_value()` 等方法需要）
pub use ble_client::{GattHandle, ReadWriteHandle, View};

// 数据模型
pub use ble_types::{ObjectPath, PropertyValue, UuidFilter};

// 错误类型
pub use ble_bus::BusError;
pub use ble_driver::DriverError;
pub use ble_types::ProtocolError;
