//! 远端对象快照
//!
//! `RemoteObject` 是一次枚举结果中的单个对象：路径 + 接口 → 属性表。
//! 快照创建后不再修改，刷新时整体替换。它同时持有传输层句柄，
//! 可以直接在所代表的对象上调用远端方法。

use ble_bus::{BusError, BusTransport};
use ble_types::{
    InterfaceMap, ObjectPath, ObjectRecord, PropertyMap, PropertyValue, property,
};
use std::fmt;
use std::sync::Arc;

/// 远端对象（不可变快照）
#[derive(Clone)]
pub struct RemoteObject {
    path: ObjectPath,
    interfaces: InterfaceMap,
    transport: Arc<dyn BusTransport>,
}

impl RemoteObject {
    pub fn new(record: ObjectRecord, transport: Arc<dyn BusTransport>) -> Self {
        Self {
            path: record.path,
            interfaces: record.interfaces,
            transport,
        }
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    /// 实现的接口名（有序）
    pub fn interface_names(&self) -> impl Iterator<Item = &str> {
        self.interfaces.keys().map(String::as_str)
    }

    /// 完整的 接口 → 属性表
    pub fn interfaces(&self) -> &InterfaceMap {
        &self.interfaces
    }

    pub fn implements(&self, interface: &str) -> bool {
        self.interfaces.contains_key(interface)
    }

    /// 指定接口的属性表
    pub fn properties(&self, interface: &str) -> Option<&PropertyMap> {
        self.interfaces.get(interface)
    }

    /// 按属性名查找（遍历所有接口，返回第一个命中）
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.interfaces.values().find_map(|props| props.get(name))
    }

    /// 在指定接口上查找属性
    pub fn interface_property(&self, interface: &str, name: &str) -> Option<&PropertyValue> {
        self.interfaces.get(interface).and_then(|props| props.get(name))
    }

    /// 显示名：`Name` 属性，缺失时使用对象路径
    pub fn name(&self) -> String {
        match self.property(property::NAME).and_then(PropertyValue::as_str) {
            Some(name) => name.to_string(),
            None => self.path.to_string(),
        }
    }

    /// 广播的 UUID 列表；属性缺失或类型不符时为空
    pub fn uuids(&self) -> &[String] {
        self.property(property::UUIDS)
            .and_then(PropertyValue::as_str_list)
            .unwrap_or(&[])
    }

    pub fn transport(&self) -> &Arc<dyn BusTransport> {
        &self.transport
    }

    /// 在本对象上调用远端方法
    pub fn call(
        &self,
        interface: &str,
        method: &str,
        args: &[PropertyValue],
    ) -> Result<Vec<PropertyValue>, BusError> {
        self.transport.call(&self.path, interface, method, args)
    }

    /// 在本对象上调用远端方法，并期望恰好一个返回值
    pub fn call_with_reply(
        &self,
        interface: &str,
        method: &str,
        args: &[PropertyValue],
    ) -> Result<PropertyValue, BusError> {
        self.transport.call_with_reply(&self.path, interface, method, args)
    }
}

impl fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteObject")
            .field("path", &self.path)
            .field("interfaces", &self.interfaces)
            .finish_non_exhaustive()
    }
}

/// 多行转储格式：
///
/// ```text
/// /org/bluez/hci0
///     org.bluez.Adapter1
///         Address = "00:11:22:33:44:55"
///         Powered = true
/// ```
impl fmt::Display for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.path)?;
        for (interface, props) in &self.interfaces {
            writeln!(f, "    {}", interface)?;
            for (name, value) in props {
                writeln!(f, "        {} = {}", name, value)?;
            }
        }
        Ok(())
    }
}
