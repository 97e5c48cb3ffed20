//! 类型化视图
//!
//! 每种视图包装一个 `Arc<RemoteObject>`，只在构造时检查一次接口。
//! 之后的访问器直接读取该接口上的属性：
//!
//! - 必需属性缺失或类型不符视为契约违反（缓存与视图对接口的认知不一致），直接 panic
//! - 可选属性由具体视图提供降级值（例如 `Device::rssi()`）

use ble_bus::BusError;
use ble_driver::{DiscoveryController, RemoteObject};
use ble_types::{ObjectPath, PropertyValue, property};
use std::sync::Arc;

/// 类型化视图
pub trait View: Sized {
    /// 视图对应的接口名
    const INTERFACE: &'static str;

    /// 包装对象；对象未实现 `INTERFACE` 时返回 `None`
    fn from_object(object: Arc<RemoteObject>) -> Option<Self>;

    fn object(&self) -> &Arc<RemoteObject>;

    /// 绑定到会话的发现控制器（只有适配器视图需要）
    fn attach(self, _controller: &Arc<DiscoveryController>) -> Self {
        self
    }

    fn path(&self) -> &ObjectPath {
        self.object().path()
    }

    /// 显示名：`Name` 属性，缺失时使用对象路径
    fn name(&self) -> String {
        self.object().name()
    }

    /// 在视图接口上调用远端方法（错误原样透传）
    fn call(&self, method: &str, args: &[PropertyValue]) -> Result<Vec<PropertyValue>, BusError> {
        self.object().call(Self::INTERFACE, method, args)
    }
}

/// GATT 句柄（Service / Characteristic / Descriptor 共有的 `UUID` 属性）
pub trait GattHandle: View {
    fn uuid(&self) -> &str {
        prop_str(self.object(), Self::INTERFACE, property::UUID)
    }
}

macro_rules! define_view {
    ($(#[$meta:meta])* $name:ident, $interface:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name {
            object: Arc<RemoteObject>,
        }

        impl View for $name {
            const INTERFACE: &'static str = $interface;

            fn from_object(object: Arc<RemoteObject>) -> Option<Self> {
                object
                    .implements(Self::INTERFACE)
                    .then_some(Self { object })
            }

            fn object(&self) -> &Arc<RemoteObject> {
                &self.object
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&*self.object, f)
            }
        }
    };
}

pub(crate) use define_view;

// ============================================================
// 必需属性访问（契约违反时 panic）
// ============================================================

fn required<'a>(object: &'a RemoteObject, interface: &str, name: &str) -> &'a PropertyValue {
    match object.interface_property(interface, name) {
        Some(value) => value,
        None => panic!(
            "{}: missing required property {}.{}",
            object.path(),
            interface,
            name
        ),
    }
}

fn mismatch(object: &RemoteObject, interface: &str, name: &str, expected: &str, actual: &PropertyValue) -> ! {
    panic!(
        "{}: property {}.{} has type {}, expected {}",
        object.path(),
        interface,
        name,
        actual.type_name(),
        expected
    )
}

pub(crate) fn prop_str<'a>(object: &'a RemoteObject, interface: &str, name: &str) -> &'a str {
    let value = required(object, interface, name);
    value
        .as_str()
        .unwrap_or_else(|| mismatch(object, interface, name, "string", value))
}

pub(crate) fn prop_bool(object: &RemoteObject, interface: &str, name: &str) -> bool {
    let value = required(object, interface, name);
    value
        .as_bool()
        .unwrap_or_else(|| mismatch(object, interface, name, "bool", value))
}

pub(crate) fn prop_path<'a>(object: &'a RemoteObject, interface: &str, name: &str) -> &'a ObjectPath {
    let value = required(object, interface, name);
    value
        .as_path()
        .unwrap_or_else(|| mismatch(object, interface, name, "object path", value))
}

pub(crate) fn prop_path_list<'a>(
    object: &'a RemoteObject,
    interface: &str,
    name: &str,
) -> &'a [ObjectPath] {
    let value = required(object, interface, name);
    value
        .as_path_list()
        .unwrap_or_else(|| mismatch(object, interface, name, "object path array", value))
}

/// 可选属性：缺失返回 `None`，存在但类型不符仍然 panic
pub(crate) fn optional<'a, T>(
    object: &'a RemoteObject,
    interface: &str,
    name: &str,
    expected: &str,
    accessor: impl FnOnce(&'a PropertyValue) -> Option<T>,
) -> Option<T> {
    let value = object.interface_property(interface, name)?;
    match accessor(value) {
        Some(converted) => Some(converted),
        None => mismatch(object, interface, name, expected, value),
    }
}
