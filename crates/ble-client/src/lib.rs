//! 客户端接口模块
//!
//! 本模块提供 BlueZ 对象注册表的类型化接口，包括：
//! - 会话（`Connection`）：对象缓存 + 发现控制器 + 类型化查询
//! - 类型化视图：`Adapter` / `Device` / `Service` / `Characteristic` / `Descriptor`
//! - 特征值通知（`Characteristic::handle_notify`）
//!
//! # 使用场景
//!
//! 这是大多数用户应该使用的模块。
//! 如果需要直接按接口名和谓词查询对象，可以使用 `ble-driver`。
//!
//! # Example
//!
//! ```rust,no_run
//! use ble_client::{Connection, View};
//! use std::time::Duration;
//!
//! let conn = Connection::open()?;
//! let device = conn.discover(Duration::from_secs(10), ["180d"])?;
//! println!("found {}", device.name());
//! # Ok::<(), ble_client::DriverError>(())
//! ```

pub mod adapter;
pub mod builder;
pub mod connection;
pub mod device;
pub mod gatt;
pub mod notify;
pub mod view;

// 重新导出常用类型
pub use adapter::Adapter;
pub use builder::{BusKind, ConnectionBuilder, ConnectionConfig};
pub use connection::Connection;
pub use device::{Device, RSSI_UNAVAILABLE};
pub use gatt::{Characteristic, Descriptor, ReadWriteHandle, Service};
pub use notify::NotifyHandle;
pub use view::{GattHandle, View};

pub use ble_driver::{DiscoveryConfig, DiscoveryState, DriverError};

/// 客户端结果类型
pub type Result<T> = std::result::Result<T, DriverError>;
