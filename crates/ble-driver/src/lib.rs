//! 驱动层模块
//!
//! 本模块提供远端对象注册表的核心功能，包括：
//! - 对象缓存（ArcSwap 原子替换快照，无锁读取）
//! - 谓词查询（`find_one` / `find_all`）
//! - 发现流程状态机（crossbeam `select!` 等待通知 / 截止时间 / 取消）
//!
//! # 使用场景
//!
//! 适用于需要直接按接口名和谓词查询对象的场景。
//! 大多数用户应该使用 `ble-client` 提供的类型化视图。

mod cache;
pub mod discovery;
mod error;
mod object;
pub mod state;

pub use cache::{ObjectCache, Snapshot};
pub use discovery::{DiscoveryConfig, DiscoveryController, discovery_filter};
pub use error::DriverError;
pub use object::RemoteObject;
pub use state::{AtomicDiscoveryState, DiscoveryState};
