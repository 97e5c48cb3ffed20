//! 适配器视图（`org.bluez.Adapter1`）

use crate::device::Device;
use crate::view::{View, prop_bool, prop_str};
use ble_bus::BusError;
use ble_driver::{DiscoveryConfig, DiscoveryController, DriverError, RemoteObject, discovery_filter};
use ble_types::{ADAPTER_INTERFACE, PropertyValue, UuidFilter, method, property};
use crossbeam_channel::Receiver;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// 本地蓝牙适配器
///
/// 通过 [`Connection`](crate::Connection) 查询得到的适配器共享会话的发现控制器：
/// 同一会话上同时只有一个发现流程，并使用会话配置的接口和传输类型。
/// 直接用 [`View::from_object`] 构造的适配器持有独立的控制器（默认配置）。
#[derive(Clone)]
pub struct Adapter {
    object: Arc<RemoteObject>,
    controller: Arc<DiscoveryController>,
}

impl View for Adapter {
    const INTERFACE: &'static str = ADAPTER_INTERFACE;

    fn from_object(object: Arc<RemoteObject>) -> Option<Self> {
        if !object.implements(Self::INTERFACE) {
            return None;
        }
        let controller = DiscoveryController::new(
            Arc::clone(object.transport()),
            DiscoveryConfig::default(),
        );
        Some(Self {
            object,
            controller: Arc::new(controller),
        })
    }

    fn object(&self) -> &Arc<RemoteObject> {
        &self.object
    }

    fn attach(self, controller: &Arc<DiscoveryController>) -> Self {
        Self {
            controller: Arc::clone(controller),
            ..self
        }
    }
}

impl fmt::Display for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.object, f)
    }
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("object", &self.object)
            .field("discovery", &self.controller.state())
            .finish()
    }
}

impl Adapter {
    pub fn address(&self) -> &str {
        prop_str(self.object(), ADAPTER_INTERFACE, property::ADDRESS)
    }

    pub fn powered(&self) -> bool {
        prop_bool(self.object(), ADAPTER_INTERFACE, property::POWERED)
    }

    pub fn discovering(&self) -> bool {
        prop_bool(self.object(), ADAPTER_INTERFACE, property::DISCOVERING)
    }

    /// 开始扫描（不记录本地状态）
    pub fn start_discovery(&self) -> Result<(), BusError> {
        info!("{}: starting discovery", self.path().basename());
        self.call(method::START_DISCOVERY, &[])?;
        Ok(())
    }

    pub fn stop_discovery(&self) -> Result<(), BusError> {
        info!("{}: stopping discovery", self.path().basename());
        self.call(method::STOP_DISCOVERY, &[])?;
        Ok(())
    }

    /// 设置扫描过滤条件：`{Transport: <发现配置的传输类型>, UUIDs: [...]}`
    pub fn set_discovery_filter(&self, filter: &UuidFilter) -> Result<(), BusError> {
        let dict = discovery_filter(filter, &self.controller.config().transport);
        self.call(method::SET_DISCOVERY_FILTER, &[PropertyValue::Dict(dict)])?;
        Ok(())
    }

    /// 从适配器移除设备（同时删除配对信息）
    pub fn remove_device(&self, device: &Device) -> Result<(), BusError> {
        info!("{}: removing device {}", self.path().basename(), device.path());
        self.call(
            method::REMOVE_DEVICE,
            &[PropertyValue::Path(device.path().clone())],
        )?;
        Ok(())
    }

    /// 扫描直到出现满足 `filter` 的设备，`Duration::ZERO` 表示无限等待
    ///
    /// 只负责等待；调用方需要刷新缓存后再查询设备。
    ///
    /// # 错误
    /// - `DriverError::DiscoveryInProgress`: 共享同一控制器的发现流程正在进行
    pub fn discover(&self, timeout: Duration, filter: &UuidFilter) -> Result<(), DriverError> {
        self.run_discovery(timeout, filter, None)
    }

    /// 同 [`Adapter::discover`]，`cancel` 收到消息时返回 `DriverError::Cancelled`
    pub fn discover_until(
        &self,
        timeout: Duration,
        filter: &UuidFilter,
        cancel: &Receiver<()>,
    ) -> Result<(), DriverError> {
        self.run_discovery(timeout, filter, Some(cancel))
    }

    fn run_discovery(
        &self,
        timeout: Duration,
        filter: &UuidFilter,
        cancel: Option<&Receiver<()>>,
    ) -> Result<(), DriverError> {
        self.controller.discover(self.path(), filter, timeout, cancel)
    }
}
