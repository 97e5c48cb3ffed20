//! BLE SDK - BlueZ 对象注册表 Rust SDK
//!
//! 缓存远端对象树，提供类型化查询，并按 UUID 过滤条件等待设备出现。
//!
//! # 架构设计
//!
//! 本 SDK 采用分层架构，从底层到高层：
//!
//! - **数据模型层** (`types`): 属性值、对象路径、UUID 过滤条件、通知
//! - **总线层** (`bus`): `BusTransport` trait，zbus 后端与 mock 后端
//! - **驱动层** (`driver`): 对象缓存（ArcSwap 快照）与发现状态机
//! - **客户端层** (`client`): 类型化视图与会话 API
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use ble_sdk::prelude::*;
//! use std::time::Duration;
//!
//! ble_sdk::init_logging();
//! let conn = Connection::open()?;
//! let device = conn.discover(Duration::from_secs(10), ["180d"])?;
//! device.connect()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub use ble_bus as bus;
pub use ble_client as client;
pub use ble_driver as driver;
pub use ble_types as types;

mod logging;
pub mod prelude;

pub use logging::{init_logging, init_logging_with};

// --- 用户以此为界 ---

pub use ble_bus::{BusError, BusTransport};
pub use ble_client::{
    Adapter, BusKind, Characteristic, Connection, ConnectionBuilder, ConnectionConfig,
    Descriptor, Device, NotifyHandle, Service,
};
pub use ble_driver::{DiscoveryConfig, DiscoveryState, DriverError};
pub use ble_types::{ProtocolError, UuidFilter};
