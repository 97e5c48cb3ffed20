//! GATT 视图：Service / Characteristic / Descriptor
//!
//! 读写操作都是同步调用：
//! - `ReadValue(a{sv}) -> ay`，选项字典为空
//! - `WriteValue(ay, a{sv})`，选项字典为空

use crate::notify::{self, NotifyHandle};
use crate::view::{GattHandle, View, define_view, prop_bool, prop_path, prop_path_list};
use ble_bus::BusError;
use ble_driver::RemoteObject;
use ble_types::{
    CHARACTERISTIC_INTERFACE, DESCRIPTOR_INTERFACE, GATT_MTU, ObjectPath, PropertyMap,
    PropertyValue, SERVICE_INTERFACE, method, property,
};
use std::sync::Arc;

define_view!(
    /// GATT 服务
    Service,
    SERVICE_INTERFACE
);

define_view!(
    /// GATT 特征值
    Characteristic,
    CHARACTERISTIC_INTERFACE
);

define_view!(
    /// GATT 描述符
    Descriptor,
    DESCRIPTOR_INTERFACE
);

impl GattHandle for Service {}
impl GattHandle for Characteristic {}
impl GattHandle for Descriptor {}

impl Service {
    pub fn primary(&self) -> bool {
        prop_bool(self.object(), SERVICE_INTERFACE, property::PRIMARY)
    }

    /// 所属设备的对象路径
    pub fn device(&self) -> &ObjectPath {
        prop_path(self.object(), SERVICE_INTERFACE, property::DEVICE)
    }

    pub fn includes(&self) -> &[ObjectPath] {
        prop_path_list(self.object(), SERVICE_INTERFACE, property::INCLUDES)
    }
}

/// 可读写的 GATT 句柄（特征值与描述符）
pub trait ReadWriteHandle: GattHandle {
    fn read_value(&self) -> Result<Vec<u8>, BusError> {
        let reply = self.object().call_with_reply(
            Self::INTERFACE,
            method::READ_VALUE,
            &[PropertyValue::Dict(PropertyMap::new())],
        )?;
        match reply {
            PropertyValue::Bytes(bytes) => Ok(bytes),
            other => Err(BusError::MalformedReply(format!(
                "{} returned {}, expected byte array",
                method::READ_VALUE,
                other.type_name()
            ))),
        }
    }

    fn write_value(&self, value: &[u8]) -> Result<(), BusError> {
        self.call(
            method::WRITE_VALUE,
            &[
                PropertyValue::Bytes(value.to_vec()),
                PropertyValue::Dict(PropertyMap::new()),
            ],
        )?;
        Ok(())
    }
}

impl ReadWriteHandle for Characteristic {}
impl ReadWriteHandle for Descriptor {}

impl Characteristic {
    pub fn notifying(&self) -> bool {
        prop_bool(self.object(), CHARACTERISTIC_INTERFACE, property::NOTIFYING)
    }

    pub fn start_notify(&self) -> Result<(), BusError> {
        self.call(method::START_NOTIFY, &[])?;
        Ok(())
    }

    pub fn stop_notify(&self) -> Result<(), BusError> {
        self.call(method::STOP_NOTIFY, &[])?;
        Ok(())
    }

    /// 订阅值变化通知，每个新值在工作线程上交给 `handler`
    ///
    /// 返回的 [`NotifyHandle`] 被 drop 时释放订阅；
    /// 调用 [`NotifyHandle::stop`] 时还会发送 `StopNotify`。
    pub fn handle_notify<F>(&self, handler: F) -> Result<NotifyHandle, BusError>
    where
        F: FnMut(Vec<u8>) + Send + 'static,
    {
        notify::spawn(Arc::clone(self.object()), handler)
    }

    /// 按 [`GATT_MTU`] 分片写入，返回写入的分片数
    pub fn write_chunked(&self, value: &[u8]) -> Result<usize, BusError> {
        let mut chunks = 0;
        for chunk in value.chunks(GATT_MTU) {
            self.write_value(chunk)?;
            chunks += 1;
        }
        Ok(chunks)
    }
}
