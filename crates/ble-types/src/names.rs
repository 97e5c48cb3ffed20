//! 接口名 / 属性名 / 方法名常量定义
//!
//! 这些名字是 BlueZ 暴露的配置数据，集中在此处，避免在各层散落字符串字面量。

/// BlueZ 守护进程在总线上的服务名
pub const BLUEZ_SERVICE: &str = "org.bluez";

/// ObjectManager 所在的根路径
pub const OBJECT_MANAGER_PATH: &str = "/";

// ============================================================
// 标准接口
// ============================================================

/// 对象管理接口（InterfacesAdded / InterfacesRemoved 信号）
pub const OBJECT_MANAGER_INTERFACE: &str = "org.freedesktop.DBus.ObjectManager";
/// 属性接口（PropertiesChanged 信号）
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// 新对象出现
pub const INTERFACES_ADDED: &str = "InterfacesAdded";
/// 对象（部分接口）消失
pub const INTERFACES_REMOVED: &str = "InterfacesRemoved";
/// 属性变更
pub const PROPERTIES_CHANGED: &str = "PropertiesChanged";

// ============================================================
// BlueZ 接口（bluez/doc/*-api.txt）
// ============================================================

pub const ADAPTER_INTERFACE: &str = "org.bluez.Adapter1";
pub const DEVICE_INTERFACE: &str = "org.bluez.Device1";
pub const SERVICE_INTERFACE: &str = "org.bluez.GattService1";
pub const CHARACTERISTIC_INTERFACE: &str = "org.bluez.GattCharacteristic1";
pub const DESCRIPTOR_INTERFACE: &str = "org.bluez.GattDescriptor1";

/// 单次 GATT 特征值写入的最大字节数
pub const GATT_MTU: usize = 20;

/// 属性名
pub mod property {
    pub const NAME: &str = "Name";
    pub const ADDRESS: &str = "Address";
    pub const POWERED: &str = "Powered";
    pub const DISCOVERING: &str = "Discovering";
    pub const UUIDS: &str = "UUIDs";
    pub const UUID: &str = "UUID";
    pub const CONNECTED: &str = "Connected";
    pub const PAIRED: &str = "Paired";
    pub const RSSI: &str = "RSSI";
    pub const ADAPTER: &str = "Adapter";
    pub const PRIMARY: &str = "Primary";
    pub const DEVICE: &str = "Device";
    pub const INCLUDES: &str = "Includes";
    pub const NOTIFYING: &str = "Notifying";
    pub const VALUE: &str = "Value";
    /// SetDiscoveryFilter 字典键
    pub const TRANSPORT: &str = "Transport";
}

/// 方法名
pub mod method {
    pub const START_DISCOVERY: &str = "StartDiscovery";
    pub const STOP_DISCOVERY: &str = "StopDiscovery";
    pub const SET_DISCOVERY_FILTER: &str = "SetDiscoveryFilter";
    pub const REMOVE_DEVICE: &str = "RemoveDevice";
    pub const CONNECT: &str = "Connect";
    pub const DISCONNECT: &str = "Disconnect";
    pub const PAIR: &str = "Pair";
    pub const READ_VALUE: &str = "ReadValue";
    pub const WRITE_VALUE: &str = "WriteValue";
    pub const START_NOTIFY: &str = "StartNotify";
    pub const STOP_NOTIFY: &str = "StopNotify";
}
