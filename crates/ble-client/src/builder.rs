//! Connection 构建器
//!
//! 提供链式 API 创建 `Connection` 实例。

use crate::connection::Connection;
use ble_bus::BusTransport;
use ble_driver::{DiscoveryConfig, DriverError};
use ble_types::{BLUEZ_SERVICE, OBJECT_MANAGER_PATH};
use std::sync::Arc;

/// 连接哪一条消息总线
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum BusKind {
    /// 系统总线（BlueZ 默认所在）
    #[default]
    System,
    Session,
    /// 显式地址，例如 `unix:path=/run/dbus/system_bus_socket`
    Address(String),
}

/// 连接配置
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ConnectionConfig {
    pub bus: BusKind,
    /// 远端服务名
    pub service: String,
    /// ObjectManager 所在路径
    pub manager_path: String,
    /// 指定适配器（对象路径的最后一段，例如 `hci1`），`None` 时使用第一个
    pub adapter: Option<String>,
    pub discovery: DiscoveryConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            bus: BusKind::default(),
            service: BLUEZ_SERVICE.to_string(),
            manager_path: OBJECT_MANAGER_PATH.to_string(),
            adapter: None,
            discovery: DiscoveryConfig::default(),
        }
    }
}

/// Connection 构建器
///
/// # Example
///
/// ```rust,no_run
/// use ble_client::ConnectionBuilder;
///
/// let conn = ConnectionBuilder::new()
///     .adapter("hci0")
///     .build()?;
/// # Ok::<(), ble_client::DriverError>(())
/// ```
#[derive(Debug, Default)]
pub struct ConnectionBuilder {
    config: ConnectionConfig,
}

impl ConnectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从完整配置开始
    pub fn with_config(config: ConnectionConfig) -> Self {
        Self { config }
    }

    pub fn bus(mut self, bus: BusKind) -> Self {
        self.config.bus = bus;
        self
    }

    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.config.service = service.into();
        self
    }

    pub fn manager_path(mut self, path: impl Into<String>) -> Self {
        self.config.manager_path = path.into();
        self
    }

    pub fn adapter(mut self, adapter: impl Into<String>) -> Self {
        self.config.adapter = Some(adapter.into());
        self
    }

    /// 发现流程关注的接口（默认 `org.bluez.Device1`）
    pub fn discovery_interface(mut self, interface: impl Into<String>) -> Self {
        self.config.discovery.interface = interface.into();
        self
    }

    /// `SetDiscoveryFilter` 的 `Transport` 字段（默认 `"le"`）
    pub fn discovery_transport(mut self, transport: impl Into<String>) -> Self {
        self.config.discovery.transport = transport.into();
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// 连接消息总线并加载对象缓存
    #[cfg(feature = "dbus")]
    pub fn build(self) -> Result<Connection, DriverError> {
        use ble_bus::{BusAddress, DbusTransport};
        use ble_types::ObjectPath;

        let address = match &self.config.bus {
            BusKind::System => BusAddress::System,
            BusKind::Session => BusAddress::Session,
            BusKind::Address(address) => BusAddress::Address(address.clone()),
        };
        let manager_path = ObjectPath::new(self.config.manager_path.clone())?;
        let transport = DbusTransport::connect(&address, &self.config.service, manager_path)?;
        self.build_with_transport(Arc::new(transport))
    }

    /// 使用给定的传输层（例如 `MockBus`）构建
    pub fn build_with_transport(
        self,
        transport: Arc<dyn BusTransport>,
    ) -> Result<Connection, DriverError> {
        Connection::with_transport(transport, self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ble_bus::MockBus;

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.bus, BusKind::System);
        assert_eq!(config.service, "org.bluez");
        assert_eq!(config.manager_path, "/");
        assert_eq!(config.adapter, None);
        assert_eq!(config.discovery, DiscoveryConfig::default());
    }

    #[test]
    fn test_builder_chain() {
        let builder = ConnectionBuilder::new()
            .bus(BusKind::Session)
            .service("org.example")
            .manager_path("/org/example")
            .adapter("hci1")
            .discovery_interface("org.example.Thing1")
            .discovery_transport("bredr");
        let config = builder.config();
        assert_eq!(config.bus, BusKind::Session);
        assert_eq!(config.service, "org.example");
        assert_eq!(config.manager_path, "/org/example");
        assert_eq!(config.adapter.as_deref(), Some("hci1"));
        assert_eq!(config.discovery.interface, "org.example.Thing1");
        assert_eq!(config.discovery.transport, "bredr");
    }

    #[test]
    fn test_build_with_mock_transport() {
        let conn = ConnectionBuilder::new()
            .build_with_transport(Arc::new(MockBus::new()))
            .unwrap();
        assert!(conn.cache().is_empty());
    }
}
