//! 会话：对象缓存 + 发现控制器 + 类型化查询
//!
//! 所有查询都读取当前缓存快照，不访问总线；需要最新状态时先调用
//! [`Connection::update`]。

use crate::adapter::Adapter;
use crate::builder::ConnectionConfig;
use crate::device::Device;
use crate::gatt::{Characteristic, Descriptor, Service};
use crate::view::View;
use ble_bus::BusTransport;
use ble_driver::{DiscoveryController, DriverError, ObjectCache, RemoteObject};
use ble_types::{
    ADAPTER_INTERFACE, DEVICE_INTERFACE, PropertyValue, UuidFilter, normalize_uuid, property,
};
use crossbeam_channel::Receiver;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// BlueZ 会话
///
/// 持有对象缓存和发现控制器；可以在线程间共享（`&self` 方法）。
pub struct Connection {
    cache: ObjectCache,
    controller: Arc<DiscoveryController>,
    config: ConnectionConfig,
}

impl Connection {
    /// 使用默认配置连接系统总线
    #[cfg(feature = "dbus")]
    pub fn open() -> Result<Self, DriverError> {
        crate::ConnectionBuilder::new().build()
    }

    /// 使用给定的传输层创建会话，并加载一次对象缓存
    pub fn with_transport(
        transport: Arc<dyn BusTransport>,
        config: ConnectionConfig,
    ) -> Result<Self, DriverError> {
        let cache = ObjectCache::load(Arc::clone(&transport))?;
        let controller = Arc::new(DiscoveryController::new(transport, config.discovery.clone()));
        Ok(Self {
            cache,
            controller,
            config,
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    pub fn controller(&self) -> &DiscoveryController {
        &self.controller
    }

    /// 重新枚举远端对象（失败时保留旧缓存）
    pub fn update(&self) -> Result<(), DriverError> {
        self.cache.refresh()
    }

    // ============================================================
    // 通用查询
    // ============================================================

    /// 第一个满足谓词的 `V` 视图
    pub fn find<V, P>(&self, predicate: P) -> Result<V, DriverError>
    where
        V: View,
        P: Fn(&RemoteObject) -> bool,
    {
        let object = self.cache.find_one(V::INTERFACE, predicate)?;
        V::from_object(object)
            .map(|view| view.attach(&self.controller))
            .ok_or_else(|| DriverError::NotFound {
                interface: V::INTERFACE.to_string(),
            })
    }

    /// 所有满足谓词的 `V` 视图（按枚举顺序）
    pub fn find_all<V, P>(&self, predicate: P) -> Vec<V>
    where
        V: View,
        P: Fn(&RemoteObject) -> bool,
    {
        self.cache
            .find_all(V::INTERFACE, predicate)
            .into_iter()
            .filter_map(V::from_object)
            .map(|view| view.attach(&self.controller))
            .collect()
    }

    // ============================================================
    // 适配器与设备
    // ============================================================

    /// 配置中指定的适配器；未指定时为第一个适配器
    ///
    /// 返回的适配器共享本会话的发现控制器。
    pub fn get_adapter(&self) -> Result<Adapter, DriverError> {
        match self.config.adapter.as_deref() {
            Some(name) => self.find(|obj| obj.path().basename() == name),
            None => self.find(|_| true),
        }
    }

    pub fn get_adapters(&self) -> Vec<Adapter> {
        self.find_all(|_| true)
    }

    /// 第一个广播了全部 `uuids` 的设备（空列表匹配任何设备）
    ///
    /// # 错误
    /// - `DriverError::InvalidFilter`: UUID 格式错误（在查询之前返回）
    /// - `DriverError::NotFound`: 缓存中没有匹配的设备
    pub fn get_device<I, S>(&self, uuids: I) -> Result<Device, DriverError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let filter = UuidFilter::new(uuids)?;
        self.find_device(&filter)
    }

    pub fn get_devices<I, S>(&self, uuids: I) -> Result<Vec<Device>, DriverError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let filter = UuidFilter::new(uuids)?;
        Ok(self.find_all(|obj| filter.matches(device_uuids(obj))))
    }

    pub fn get_device_by_name(&self, name: &str) -> Result<Device, DriverError> {
        self.find(|obj| {
            obj.interface_property(DEVICE_INTERFACE, property::NAME)
                .and_then(PropertyValue::as_str)
                == Some(name)
        })
    }

    fn find_device(&self, filter: &UuidFilter) -> Result<Device, DriverError> {
        self.find(|obj| filter.matches(device_uuids(obj)))
    }

    // ============================================================
    // GATT
    // ============================================================

    pub fn get_service(&self, uuid: &str) -> Result<Service, DriverError> {
        self.find_gatt(uuid)
    }

    pub fn get_characteristic(&self, uuid: &str) -> Result<Characteristic, DriverError> {
        self.find_gatt(uuid)
    }

    pub fn get_descriptor(&self, uuid: &str) -> Result<Descriptor, DriverError> {
        self.find_gatt(uuid)
    }

    /// 按 `UUID` 属性查找 GATT 对象（短格式与 128 位格式等价）
    fn find_gatt<V: View>(&self, uuid: &str) -> Result<V, DriverError> {
        let wanted = normalize_uuid(uuid)?;
        self.find(|obj| {
            obj.interface_property(V::INTERFACE, property::UUID)
                .and_then(PropertyValue::as_str)
                .and_then(|value| normalize_uuid(value).ok())
                .is_some_and(|value| value == wanted)
        })
    }

    // ============================================================
    // 发现
    // ============================================================

    /// 返回广播了全部 `uuids` 的设备，必要时扫描
    ///
    /// 缓存中已有匹配设备时直接返回，不启动扫描。否则在适配器上扫描到第一个
    /// 匹配的对象，刷新缓存后重新查询。`Duration::ZERO` 表示无限等待。
    ///
    /// # 错误
    /// - `DriverError::InvalidFilter`: UUID 格式错误（不会启动扫描）
    /// - `DriverError::NotFound`: 没有适配器，或扫描匹配后刷新的缓存中仍没有该设备
    /// - `DriverError::DiscoveryTimeout`: 超时
    /// - `DriverError::DiscoveryInProgress`: 本会话已有发现流程在进行
    /// - `DriverError::Bus`: 总线错误
    pub fn discover<I, S>(&self, timeout: Duration, uuids: I) -> Result<Device, DriverError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let filter = UuidFilter::new(uuids)?;
        self.discover_filtered(timeout, &filter, None)
    }

    /// 同 [`Connection::discover`]，`cancel` 收到消息时返回 `DriverError::Cancelled`
    pub fn discover_until<I, S>(
        &self,
        timeout: Duration,
        uuids: I,
        cancel: &Receiver<()>,
    ) -> Result<Device, DriverError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let filter = UuidFilter::new(uuids)?;
        self.discover_filtered(timeout, &filter, Some(cancel))
    }

    fn discover_filtered(
        &self,
        timeout: Duration,
        filter: &UuidFilter,
        cancel: Option<&Receiver<()>>,
    ) -> Result<Device, DriverError> {
        if let Ok(device) = self.find_device(filter) {
            info!("{}: already discovered", device.name());
            return Ok(device);
        }
        let adapter = self.get_adapter()?;
        self.controller
            .discover(adapter.path(), filter, timeout, cancel)?;
        self.update()?;
        self.find_device(filter)
    }

    // ============================================================
    // 转储
    // ============================================================

    /// 按枚举顺序输出缓存中的所有对象
    pub fn print<W: io::Write>(&self, writer: &mut W) -> io::Result<()> {
        let snapshot = self.cache.snapshot();
        for object in snapshot.iter() {
            write!(writer, "{}", object)?;
        }
        Ok(())
    }

    /// 输出所有适配器
    pub fn print_adapters<W: io::Write>(&self, writer: &mut W) -> io::Result<()> {
        for object in self.cache.find_all(ADAPTER_INTERFACE, |_| true) {
            write!(writer, "{}", object)?;
        }
        Ok(())
    }
}

/// 设备接口上的 `UUIDs`（缺失时为空）
fn device_uuids(obj: &RemoteObject) -> &[String] {
    obj.interface_property(DEVICE_INTERFACE, property::UUIDS)
        .and_then(PropertyValue::as_str_list)
        .unwrap_or(&[])
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("config", &self.config)
            .field("objects", &self.cache.len())
            .field("discovery", &self.controller.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ConnectionBuilder;
    use crate::view::GattHandle;
    use ble_bus::mock::{ScanEvent, props};
    use ble_bus::{BusDeviceError, BusDeviceErrorKind, MockBus};
    use ble_types::{
        CHARACTERISTIC_INTERFACE, DESCRIPTOR_INTERFACE, ObjectPath, ObjectRecord,
        SERVICE_INTERFACE, method,
    };

    fn path(p: &str) -> ObjectPath {
        ObjectPath::new(p).unwrap()
    }

    fn adapter(name: &str) -> ObjectRecord {
        ObjectRecord::new(path(&format!("/org/bluez/{}", name))).with_interface(
            ADAPTER_INTERFACE,
            props([(property::ADDRESS, "00:11:22:33:44:55".into())]),
        )
    }

    fn device(id: &str, name: &str, uuids: &[&str]) -> ObjectRecord {
        let uuids = uuids.iter().map(|u| u.to_string()).collect();
        ObjectRecord::new(path(&format!("/org/bluez/hci0/dev_{}", id))).with_interface(
            DEVICE_INTERFACE,
            props([
                (property::NAME, name.into()),
                (property::UUIDS, PropertyValue::StrList(uuids)),
            ]),
        )
    }

    fn gatt(p: &str, interface: &str, uuid: &str) -> ObjectRecord {
        ObjectRecord::new(path(p)).with_interface(interface, props([(property::UUID, uuid.into())]))
    }

    fn registry() -> MockBus {
        MockBus::with_objects([
            adapter("hci0"),
            adapter("hci1"),
            device("01", "Thermometer", &["1809"]),
            device("02", "Heart Rate", &["180d", "180f"]),
            gatt(
                "/org/bluez/hci0/dev_02/service0010",
                SERVICE_INTERFACE,
                "0000180d-0000-1000-8000-00805f9b34fb",
            ),
            gatt(
                "/org/bluez/hci0/dev_02/service0010/char0011",
                CHARACTERISTIC_INTERFACE,
                "2a37",
            ),
            gatt(
                "/org/bluez/hci0/dev_02/service0010/char0011/desc0013",
                DESCRIPTOR_INTERFACE,
                "00002902-0000-1000-8000-00805f9b34fb",
            ),
        ])
    }

    fn connect(bus: &MockBus) -> Connection {
        ConnectionBuilder::new()
            .build_with_transport(Arc::new(bus.clone()))
            .unwrap()
    }

    #[test]
    fn test_initial_load() {
        let bus = registry();
        let conn = connect(&bus);
        assert_eq!(conn.cache().len(), 7);
    }

    #[test]
    fn test_load_failure_surfaced() {
        let bus = registry();
        bus.fail_enumeration(BusDeviceError::new(BusDeviceErrorKind::AccessDenied, "denied"));
        let err = ConnectionBuilder::new()
            .build_with_transport(Arc::new(bus))
            .unwrap_err();
        assert!(matches!(err, DriverError::Bus(_)));
    }

    #[test]
    fn test_get_adapter_default_and_configured() {
        let bus = registry();
        assert_eq!(connect(&bus).get_adapter().unwrap().path().as_str(), "/org/bluez/hci0");

        let conn = ConnectionBuilder::new()
            .adapter("hci1")
            .build_with_transport(Arc::new(bus.clone()))
            .unwrap();
        assert_eq!(conn.get_adapter().unwrap().path().as_str(), "/org/bluez/hci1");

        let conn = ConnectionBuilder::new()
            .adapter("hci9")
            .build_with_transport(Arc::new(bus))
            .unwrap();
        assert!(matches!(
            conn.get_adapter(),
            Err(DriverError::NotFound { interface }) if interface == ADAPTER_INTERFACE
        ));
    }

    #[test]
    fn test_no_adapter() {
        let conn = connect(&MockBus::new());
        assert!(conn.get_adapter().unwrap_err().is_not_found());
        assert!(conn.get_adapters().is_empty());
    }

    #[test]
    fn test_get_adapters_in_order() {
        let conn = connect(&registry());
        let paths: Vec<String> = conn.get_adapters().iter().map(|a| a.path().to_string()).collect();
        assert_eq!(paths, ["/org/bluez/hci0", "/org/bluez/hci1"]);
    }

    #[test]
    fn test_get_device_by_uuids() {
        let conn = connect(&registry());
        // 空列表匹配第一个设备
        assert_eq!(conn.get_device::<_, &str>([]).unwrap().name(), "Thermometer");
        // 短格式与长格式等价
        assert_eq!(
            conn.get_device(["0000180d-0000-1000-8000-00805f9b34fb"])
                .unwrap()
                .name(),
            "Heart Rate"
        );
        assert_eq!(conn.get_device(["180F", "180d"]).unwrap().name(), "Heart Rate");
        assert!(conn.get_device(["1800"]).unwrap_err().is_not_found());
    }

    #[test]
    fn test_get_devices() {
        let conn = connect(&registry());
        assert_eq!(conn.get_devices::<_, &str>([]).unwrap().len(), 2);
        assert_eq!(conn.get_devices(["180d"]).unwrap().len(), 1);
        // 空结果不是错误
        assert!(conn.get_devices(["1800"]).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_filter_reported_first() {
        let conn = connect(&registry());
        assert!(matches!(
            conn.get_device(["180d", "not-a-uuid"]),
            Err(DriverError::InvalidFilter { uuid }) if uuid == "not-a-uuid"
        ));
        assert!(matches!(
            conn.get_characteristic("zz"),
            Err(DriverError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_get_device_by_name() {
        let conn = connect(&registry());
        let dev = conn.get_device_by_name("Thermometer").unwrap();
        assert_eq!(dev.path().as_str(), "/org/bluez/hci0/dev_01");
        assert!(conn.get_device_by_name("Scale").is_err());
    }

    #[test]
    fn test_gatt_lookup() {
        let conn = connect(&registry());
        let service = conn.get_service("180d").unwrap();
        assert_eq!(service.path().as_str(), "/org/bluez/hci0/dev_02/service0010");
        let chr = conn
            .get_characteristic("00002a37-0000-1000-8000-00805f9b34fb")
            .unwrap();
        assert_eq!(chr.uuid(), "2a37");
        let desc = conn.get_descriptor("2902").unwrap();
        assert_eq!(desc.path().basename(), "desc0013");
        assert!(conn.get_service("2a37").is_err());
    }

    #[test]
    fn test_find_and_find_all_agree() {
        let conn = connect(&registry());
        let predicate = |obj: &RemoteObject| obj.uuids().iter().any(|u| u == "180f");
        let all: Vec<Device> = conn.find_all(predicate);
        let one: Device = conn.find(predicate).unwrap();
        assert_eq!(all[0].path(), one.path());

        let none: Vec<Device> = conn.find_all(|_| false);
        assert!(none.is_empty());
        assert!(conn.find::<Device, _>(|_| false).is_err());
    }

    #[test]
    fn test_update_sees_new_objects() {
        let bus = registry();
        let conn = connect(&bus);
        bus.insert_object(device("03", "Scale", &["181d"]));
        assert!(conn.get_device(["181d"]).is_err());
        conn.update().unwrap();
        assert_eq!(conn.get_device(["181d"]).unwrap().name(), "Scale");
    }

    #[test]
    fn test_discover_cached_short_circuit() {
        let bus = registry();
        let conn = connect(&bus);
        let dev = conn.discover(Duration::from_millis(50), ["1809"]).unwrap();
        assert_eq!(dev.name(), "Thermometer");
        // 没有扫描
        assert_eq!(bus.call_count(method::START_DISCOVERY), 0);
        assert_eq!(bus.subscribe_count(), 0);
    }

    #[test]
    fn test_discover_scans_and_requeries() {
        let bus = registry();
        bus.on_start_discovery(vec![ScanEvent::announce(
            Duration::from_millis(30),
            device("03", "Scale", &["181d"]),
        )]);
        let conn = connect(&bus);

        let dev = conn.discover(Duration::from_secs(2), ["181d"]).unwrap();
        assert_eq!(dev.name(), "Scale");
        assert_eq!(bus.call_count(method::START_DISCOVERY), 1);
        assert_eq!(bus.call_count(method::STOP_DISCOVERY), 1);
        assert_eq!(bus.active_subscriptions(), 0);
        assert_eq!(conn.controller().last_outcome(), ble_driver::DiscoveryState::Matched);
    }

    #[test]
    fn test_discover_matched_but_gone_is_not_found() {
        let bus = registry();
        // 只有通知，没有注册到对象树
        bus.on_start_discovery(vec![ScanEvent::transient(
            Duration::from_millis(30),
            device("03", "Scale", &["181d"]),
        )]);
        let conn = connect(&bus);

        let err = conn.discover(Duration::from_secs(2), ["181d"]).unwrap_err();
        assert!(matches!(err, DriverError::NotFound { .. }));
    }

    #[test]
    fn test_discover_timeout() {
        let bus = registry();
        let conn = connect(&bus);
        let err = conn.discover(Duration::from_millis(100), ["1800"]).unwrap_err();
        assert!(matches!(
            err,
            DriverError::DiscoveryTimeout { ref uuids } if uuids == &["1800".to_string()]
        ));
    }

    #[test]
    fn test_discover_without_adapter() {
        let conn = connect(&MockBus::new());
        let err = conn.discover(Duration::from_millis(100), ["1800"]).unwrap_err();
        assert!(matches!(err, DriverError::NotFound { interface } if interface == ADAPTER_INTERFACE));
    }

    #[test]
    fn test_discover_invalid_filter_does_not_scan() {
        let bus = registry();
        let conn = connect(&bus);
        let err = conn.discover(Duration::ZERO, ["bogus"]).unwrap_err();
        assert!(matches!(err, DriverError::InvalidFilter { .. }));
        assert_eq!(bus.subscribe_count(), 0);
    }

    #[test]
    fn test_discover_until_cancel() {
        let bus = registry();
        let conn = connect(&bus);
        let (tx, rx) = crossbeam_channel::bounded(1);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            let _ = tx.send(());
        });
        let err = conn.discover_until(Duration::ZERO, ["1800"], &rx).unwrap_err();
        assert!(matches!(err, DriverError::Cancelled));
        assert_eq!(bus.active_subscriptions(), 0);
    }

    #[test]
    fn test_adapter_uses_connection_discovery_config() {
        let bus = registry();
        bus.on_start_discovery(vec![ScanEvent::announce(
            Duration::from_millis(20),
            device("03", "Scale", &["181d"]),
        )]);
        let conn = ConnectionBuilder::new()
            .discovery_transport("auto")
            .build_with_transport(Arc::new(bus.clone()))
            .unwrap();

        let adapter = conn.get_adapter().unwrap();
        let filter = UuidFilter::new(["181d"]).unwrap();
        adapter.set_discovery_filter(&filter).unwrap();
        adapter.discover(Duration::from_secs(2), &filter).unwrap();

        // 两次 SetDiscoveryFilter 都使用会话配置的传输类型
        let filters: Vec<_> = bus
            .calls()
            .into_iter()
            .filter(|call| call.method == method::SET_DISCOVERY_FILTER)
            .collect();
        assert_eq!(filters.len(), 2);
        for call in &filters {
            let dict = call.args[0].as_dict().unwrap();
            assert_eq!(dict[property::TRANSPORT], PropertyValue::from("auto"));
        }
        // 适配器上的发现流程记录在会话控制器上
        assert_eq!(conn.controller().last_outcome(), ble_driver::DiscoveryState::Matched);
    }

    #[test]
    fn test_print_dump() {
        let conn = connect(&registry());
        let mut out = Vec::new();
        conn.print(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("/org/bluez/hci0\n    org.bluez.Adapter1\n"));
        assert!(text.contains("Name = \"Heart Rate\""));

        let mut out = Vec::new();
        conn.print_adapters(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("/org/bluez/hci1\n"));
        assert!(!text.contains("dev_01"));
    }
}
