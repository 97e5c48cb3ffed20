//! 远端设备视图（`org.bluez.Device1`）

use crate::view::{View, define_view, optional, prop_bool, prop_path, prop_str};
use ble_bus::BusError;
use ble_driver::RemoteObject;
use ble_types::{DEVICE_INTERFACE, ObjectPath, PropertyValue, method, property};
use std::sync::Arc;
use tracing::info;

/// `RSSI` 属性缺失时的返回值（HCI 规定的 "RSSI not available"，不在有效 dBm 范围内）
pub const RSSI_UNAVAILABLE: i16 = 127;

define_view!(
    /// 远端蓝牙设备
    Device,
    DEVICE_INTERFACE
);

impl Device {
    /// 广播的服务 UUID；属性缺失时为空
    pub fn uuids(&self) -> &[String] {
        optional(
            self.object(),
            DEVICE_INTERFACE,
            property::UUIDS,
            "string array",
            PropertyValue::as_str_list,
        )
        .unwrap_or(&[])
    }

    pub fn connected(&self) -> bool {
        prop_bool(self.object(), DEVICE_INTERFACE, property::CONNECTED)
    }

    pub fn paired(&self) -> bool {
        prop_bool(self.object(), DEVICE_INTERFACE, property::PAIRED)
    }

    pub fn address(&self) -> &str {
        prop_str(self.object(), DEVICE_INTERFACE, property::ADDRESS)
    }

    /// 信号强度（dBm），没有测量值时返回 [`RSSI_UNAVAILABLE`]
    pub fn rssi(&self) -> i16 {
        self.rssi_opt().unwrap_or(RSSI_UNAVAILABLE)
    }

    pub fn rssi_opt(&self) -> Option<i16> {
        optional(
            self.object(),
            DEVICE_INTERFACE,
            property::RSSI,
            "int16",
            PropertyValue::as_i16,
        )
    }

    /// 所属适配器的对象路径
    pub fn adapter(&self) -> &ObjectPath {
        prop_path(self.object(), DEVICE_INTERFACE, property::ADAPTER)
    }

    pub fn connect(&self) -> Result<(), BusError> {
        info!("{}: connecting", self.name());
        self.call(method::CONNECT, &[])?;
        Ok(())
    }

    pub fn disconnect(&self) -> Result<(), BusError> {
        info!("{}: disconnecting", self.name());
        self.call(method::DISCONNECT, &[])?;
        Ok(())
    }

    pub fn pair(&self) -> Result<(), BusError> {
        info!("{}: pairing", self.name());
        self.call(method::PAIR, &[])?;
        Ok(())
    }
}
