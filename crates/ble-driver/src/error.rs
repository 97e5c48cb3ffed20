//! 驱动层错误类型定义

use ble_bus::BusError;
use ble_types::ProtocolError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 总线传输错误（原样透传，不重试）
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// 过滤条件中的 UUID 格式错误
    ///
    /// 在扫描开始、缓存查询之前就返回，不会等到超时。
    #[error("Invalid filter UUID: {uuid:?}")]
    InvalidFilter { uuid: String },

    /// 单个查询没有找到匹配的对象
    #[error("No object implementing {interface} matched")]
    NotFound { interface: String },

    /// 扫描超时，携带未满足的过滤条件
    #[error("Discovery timed out waiting for UUIDs {uuids:?}")]
    DiscoveryTimeout { uuids: Vec<String> },

    /// 同一个控制器上已有正在进行的发现流程
    #[error("Discovery already in progress")]
    DiscoveryInProgress,

    /// 发现流程被外部取消
    #[error("Discovery cancelled")]
    Cancelled,
}

impl From<ProtocolError> for DriverError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidUuid { uuid } => DriverError::InvalidFilter { uuid },
            ProtocolError::InvalidObjectPath { path } => {
                DriverError::Bus(BusError::MalformedReply(format!("invalid object path {:?}", path)))
            },
        }
    }
}

impl DriverError {
    /// 是否为"没找到"类错误（调用方通常可以重试或扩大超时）
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DriverError::NotFound { .. } | DriverError::DiscoveryTimeout { .. }
        )
    }
}
