//! 发现流程控制器
//!
//! 一次 `discover()` 的完整过程：
//!
//! 1. **Subscribing**: 订阅 ObjectManager 通知，注册 `InterfacesAdded` 匹配规则
//! 2. **Scanning**: `SetDiscoveryFilter` + `StartDiscovery`，然后在
//!    `select!` 上阻塞等待（通知 / 截止时间 / 取消）
//! 3. 第一个满足过滤条件的对象出现 → **Matched**；截止时间到 → **TimedOut**；
//!    其他错误 → **Failed**
//!
//! 订阅、匹配规则、扫描都由 RAII guard 持有，任何退出路径都会按
//! "停止扫描 → 撤销匹配规则 → 取消订阅" 的顺序释放。释放失败只记录日志。
//! 订阅中尚未处理的通知随订阅一起丢弃。

use crate::error::DriverError;
use crate::state::{AtomicDiscoveryState, DiscoveryState};
use ble_bus::{BusTransport, Subscription};
use ble_types::{
    ADAPTER_INTERFACE, DEVICE_INTERFACE, INTERFACES_ADDED, MatchRule, OBJECT_MANAGER_INTERFACE,
    ObjectPath, PropertyMap, PropertyValue, Signal, SignalPayload, UuidFilter, method, property,
};
use crossbeam_channel::{Receiver, select};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// 发现流程配置
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DiscoveryConfig {
    /// 关注的对象接口（`InterfacesAdded` 中只看这个接口的属性）
    pub interface: String,
    /// `SetDiscoveryFilter` 的 `Transport` 字段
    pub transport: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interface: DEVICE_INTERFACE.to_string(),
            transport: "le".to_string(),
        }
    }
}

/// 构造 `SetDiscoveryFilter` 的参数字典：`{Transport: <transport>, UUIDs: [...]}`
///
/// `UUIDs` 为去重后的 128 位小写格式。
pub fn discovery_filter(filter: &UuidFilter, transport: &str) -> PropertyMap {
    let mut dict = PropertyMap::new();
    dict.insert(property::TRANSPORT.to_string(), PropertyValue::from(transport));
    dict.insert(
        property::UUIDS.to_string(),
        PropertyValue::StrList(filter.normalized().to_vec()),
    );
    dict
}

/// 发现流程控制器
///
/// 同一个控制器上同时只允许一个发现流程；并发调用立即返回
/// `DriverError::DiscoveryInProgress`，不排队。
pub struct DiscoveryController {
    transport: Arc<dyn BusTransport>,
    config: DiscoveryConfig,
    state: AtomicDiscoveryState,
    last_outcome: AtomicDiscoveryState,
    session: Mutex<()>,
}

impl DiscoveryController {
    pub fn new(transport: Arc<dyn BusTransport>, config: DiscoveryConfig) -> Self {
        Self {
            transport,
            config,
            state: AtomicDiscoveryState::default(),
            last_outcome: AtomicDiscoveryState::default(),
            session: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// 当前状态
    pub fn state(&self) -> DiscoveryState {
        self.state.get(Ordering::Acquire)
    }

    /// 最近一次发现流程的终止状态（从未运行时为 Idle）
    pub fn last_outcome(&self) -> DiscoveryState {
        self.last_outcome.get(Ordering::Acquire)
    }

    /// 在 `adapter` 上扫描，直到出现满足 `filter` 的对象
    ///
    /// # 参数
    /// - `adapter`: 适配器对象路径
    /// - `filter`: UUID 过滤条件（空条件匹配任何对象）
    /// - `timeout`: 最长等待时间，`Duration::ZERO` 表示无限等待
    /// - `cancel`: 可选的取消通道，收到消息即放弃
    ///
    /// # 错误
    /// - `DriverError::DiscoveryInProgress`: 已有发现流程在进行
    /// - `DriverError::Bus`: 订阅/启动失败或连接断开
    /// - `DriverError::DiscoveryTimeout`: 超时
    /// - `DriverError::Cancelled`: 被取消
    pub fn discover(
        &self,
        adapter: &ObjectPath,
        filter: &UuidFilter,
        timeout: Duration,
        cancel: Option<&Receiver<()>>,
    ) -> Result<(), DriverError> {
        let _session = self
            .session
            .try_lock()
            .ok_or(DriverError::DiscoveryInProgress)?;

        let result = self.run(adapter, filter, timeout, cancel);
        let outcome = match &result {
            Ok(()) => DiscoveryState::Matched,
            Err(DriverError::DiscoveryTimeout { .. }) => DiscoveryState::TimedOut,
            Err(_) => DiscoveryState::Failed,
        };
        self.last_outcome.set(outcome, Ordering::Release);
        self.state.set(DiscoveryState::Idle, Ordering::Release);
        debug!("{}: discovery finished ({})", adapter.basename(), outcome);
        result
    }

    fn run(
        &self,
        adapter: &ObjectPath,
        filter: &UuidFilter,
        timeout: Duration,
        cancel: Option<&Receiver<()>>,
    ) -> Result<(), DriverError> {
        let transport = self.transport.as_ref();
        let label = adapter.basename();

        // Subscribing
        self.state.set(DiscoveryState::Subscribing, Ordering::Release);
        let channel = MatchRule::signal().interface(OBJECT_MANAGER_INTERFACE);
        let subscription = SubscriptionGuard {
            transport,
            subscription: transport.subscribe(&channel)?,
        };
        let rule = channel.member(INTERFACES_ADDED);
        transport.add_match(&rule)?;
        let _match_rule = MatchGuard {
            transport,
            rule: &rule,
        };

        // Scanning
        let args = [PropertyValue::Dict(discovery_filter(filter, &self.config.transport))];
        transport.call(adapter, ADAPTER_INTERFACE, method::SET_DISCOVERY_FILTER, &args)?;
        info!("{}: starting discovery", label);
        transport.call(adapter, ADAPTER_INTERFACE, method::START_DISCOVERY, &[])?;
        let _scan = ScanGuard { transport, adapter };
        self.state.set(DiscoveryState::Scanning, Ordering::Release);

        let deadline = if timeout.is_zero() {
            crossbeam_channel::never()
        } else {
            crossbeam_channel::at(Instant::now() + timeout)
        };
        let no_cancel = crossbeam_channel::never();
        let mut cancel_open = cancel.is_some();
        let signals = subscription.subscription.receiver();

        loop {
            let cancel_rx = match cancel {
                Some(rx) if cancel_open => rx,
                _ => &no_cancel,
            };
            select! {
                recv(signals) -> msg => match msg {
                    Ok(signal) => {
                        if self.accept(label, &signal, filter) {
                            self.state.set(DiscoveryState::Matched, Ordering::Release);
                            return Ok(());
                        }
                    },
                    Err(_) => {
                        self.state.set(DiscoveryState::Failed, Ordering::Release);
                        warn!("{}: signal channel closed during discovery", label);
                        return Err(ble_bus::BusError::Disconnected.into());
                    },
                },
                recv(deadline) -> _ => {
                    self.state.set(DiscoveryState::TimedOut, Ordering::Release);
                    info!("{}: discovery timed out after {:?}", label, timeout);
                    return Err(DriverError::DiscoveryTimeout {
                        uuids: filter.uuids().to_vec(),
                    });
                },
                recv(cancel_rx) -> msg => match msg {
                    Ok(()) => {
                        self.state.set(DiscoveryState::Failed, Ordering::Release);
                        info!("{}: discovery cancelled", label);
                        return Err(DriverError::Cancelled);
                    },
                    // 取消端已释放，之后不会再有取消请求
                    Err(_) => cancel_open = false,
                },
            }
        }
    }

    /// 判断通知是否宣告了满足过滤条件的对象
    fn accept(&self, label: &str, signal: &Signal, filter: &UuidFilter) -> bool {
        let (object, interfaces) = match &signal.payload {
            SignalPayload::InterfacesAdded { object, interfaces }
                if signal.member == INTERFACES_ADDED =>
            {
                (object, interfaces)
            },
            _ => {
                debug!("{}: unexpected signal {}", label, signal.name());
                return false;
            },
        };

        let Some(props) = interfaces.get(&self.config.interface) else {
            trace!("{}: skipping signal with no {} interface", label, self.config.interface);
            return false;
        };

        let name = props
            .get(property::NAME)
            .and_then(PropertyValue::as_str)
            .unwrap_or(object.as_str());
        let uuids = props
            .get(property::UUIDS)
            .and_then(PropertyValue::as_str_list)
            .unwrap_or(&[]);

        if filter.matches(uuids) {
            info!("{}: discovered {}", label, name);
            true
        } else {
            debug!("{}: {} does not advertise {}", label, name, filter);
            false
        }
    }
}

struct SubscriptionGuard<'a> {
    transport: &'a dyn BusTransport,
    subscription: Subscription,
}

impl Drop for SubscriptionGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.transport.unsubscribe(self.subscription.id()) {
            warn!("Failed to remove subscription {}: {}", self.subscription.id(), e);
        }
    }
}

struct MatchGuard<'a> {
    transport: &'a dyn BusTransport,
    rule: &'a MatchRule,
}

impl Drop for MatchGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.transport.remove_match(self.rule) {
            warn!("Failed to remove match rule {}: {}", self.rule, e);
        }
    }
}

struct ScanGuard<'a> {
    transport: &'a dyn BusTransport,
    adapter: &'a ObjectPath,
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        info!("{}: stopping discovery", self.adapter.basename());
        if let Err(e) = self.transport.call(
            self.adapter,
            ADAPTER_INTERFACE,
            method::STOP_DISCOVERY,
            &[],
        ) {
            warn!("{}: failed to stop discovery: {}", self.adapter.basename(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ble_bus::mock::props;
    use ble_bus::{BusDeviceError, BusDeviceErrorKind, BusError, MockBus, ScanEvent};
    use ble_types::ObjectRecord;
    use std::thread;

    fn adapter_path() -> ObjectPath {
        ObjectPath::new("/org/bluez/hci0").unwrap()
    }

    fn device(id: &str, uuids: &[&str]) -> ObjectRecord {
        let uuids: Vec<String> = uuids.iter().map(|u| u.to_string()).collect();
        ObjectRecord::new(ObjectPath::new(format!("/org/bluez/hci0/dev_{}", id)).unwrap())
            .with_interface(
                DEVICE_INTERFACE,
                props([
                    (property::NAME, PropertyValue::from(id)),
                    (property::UUIDS, PropertyValue::StrList(uuids)),
                ]),
            )
    }

    fn controller(bus: &MockBus) -> DiscoveryController {
        DiscoveryController::new(Arc::new(bus.clone()), DiscoveryConfig::default())
    }

    fn assert_cleaned_up(bus: &MockBus, scan_started: bool) {
        assert_eq!(bus.active_subscriptions(), 0, "subscription leaked");
        assert!(bus.active_match_rules().is_empty(), "match rule leaked");
        let expected = if scan_started { 1 } else { 0 };
        assert_eq!(bus.call_count(method::STOP_DISCOVERY), expected);
    }

    #[test]
    fn test_match_returns_ok_and_cleans_up() {
        let bus = MockBus::new();
        bus.on_start_discovery(vec![ScanEvent::announce(
            Duration::from_millis(20),
            device("a", &["1800", "1801"]),
        )]);
        let controller = controller(&bus);
        let filter = UuidFilter::new(["1800"]).unwrap();

        controller
            .discover(&adapter_path(), &filter, Duration::from_secs(2), None)
            .unwrap();

        assert_eq!(controller.last_outcome(), DiscoveryState::Matched);
        assert_eq!(controller.state(), DiscoveryState::Idle);
        assert_cleaned_up(&bus, true);
    }

    #[test]
    fn test_filter_is_sent_before_start() {
        let bus = MockBus::new();
        bus.on_start_discovery(vec![ScanEvent::announce(
            Duration::ZERO,
            device("a", &["180d"]),
        )]);
        let filter = UuidFilter::new(["180D"]).unwrap();
        controller(&bus)
            .discover(&adapter_path(), &filter, Duration::from_secs(1), None)
            .unwrap();

        let methods: Vec<String> = bus.calls().into_iter().map(|c| c.method).collect();
        assert_eq!(
            methods,
            [
                method::SET_DISCOVERY_FILTER,
                method::START_DISCOVERY,
                method::STOP_DISCOVERY
            ]
        );

        let calls = bus.calls();
        let PropertyValue::Dict(dict) = &calls[0].args[0] else {
            panic!("SetDiscoveryFilter expects a dict argument");
        };
        assert_eq!(dict[property::TRANSPORT], PropertyValue::from("le"));
        assert_eq!(
            dict[property::UUIDS],
            PropertyValue::StrList(vec!["0000180d-0000-1000-8000-00805f9b34fb".to_string()])
        );
    }

    #[test]
    fn test_timeout_fires_not_before_deadline() {
        let bus = MockBus::new();
        let controller = controller(&bus);
        let filter = UuidFilter::new(["1800"]).unwrap();

        let started = Instant::now();
        let err = controller
            .discover(&adapter_path(), &filter, Duration::from_millis(200), None)
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(
            matches!(err, DriverError::DiscoveryTimeout { ref uuids } if uuids == &["1800".to_string()])
        );
        assert!(elapsed >= Duration::from_millis(200), "fired early: {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "fired late: {:?}", elapsed);
        assert_eq!(controller.last_outcome(), DiscoveryState::TimedOut);
        assert_cleaned_up(&bus, true);
    }

    #[test]
    fn test_zero_timeout_has_no_deadline() {
        let bus = MockBus::new();
        let controller = Arc::new(controller(&bus));
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded(1);

        let worker = {
            let controller = controller.clone();
            thread::spawn(move || {
                controller.discover(
                    &adapter_path(),
                    &UuidFilter::new(["1800"]).unwrap(),
                    Duration::ZERO,
                    Some(&cancel_rx),
                )
            })
        };

        // 远超任何合理的截止时间后仍在扫描
        thread::sleep(Duration::from_millis(300));
        assert_eq!(controller.state(), DiscoveryState::Scanning);

        cancel_tx.send(()).unwrap();
        let result = worker.join().unwrap();
        assert!(matches!(result, Err(DriverError::Cancelled)));
        assert_eq!(controller.last_outcome(), DiscoveryState::Failed);
        assert_cleaned_up(&bus, true);
    }

    #[test]
    fn test_dropped_cancel_sender_does_not_cancel() {
        let bus = MockBus::new();
        bus.on_start_discovery(vec![ScanEvent::announce(
            Duration::from_millis(100),
            device("a", &["1800"]),
        )]);
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<()>(1);
        drop(cancel_tx);

        controller(&bus)
            .discover(
                &adapter_path(),
                &UuidFilter::any(),
                Duration::from_secs(2),
                Some(&cancel_rx),
            )
            .unwrap();
    }

    #[test]
    fn test_stops_at_first_match_and_leaves_rest_unconsumed() {
        let bus = MockBus::new();
        bus.on_start_discovery(vec![ScanEvent::burst(
            Duration::from_millis(20),
            vec![
                device("a", &["1801"]),
                device("b", &["1800"]),
                device("c", &["1800"]),
            ],
        )]);
        let controller = controller(&bus);
        let filter = UuidFilter::new(["1800"]).unwrap();

        controller
            .discover(&adapter_path(), &filter, Duration::from_secs(2), None)
            .unwrap();

        // A 和 B 被消费，C 随订阅一起丢弃
        assert_eq!(bus.emitted_signals(), 3);
        assert_eq!(bus.discarded_signals(), 1);
        assert_cleaned_up(&bus, true);
    }

    #[test]
    fn test_ignores_unrelated_signals() {
        let bus = MockBus::new();
        let unrelated = ObjectRecord::new(ObjectPath::new("/org/bluez/hci0/x").unwrap())
            .with_interface("org.bluez.GattService1", PropertyMap::new());
        bus.on_start_discovery(vec![
            ScanEvent::signal(
                Duration::from_millis(10),
                Signal::interfaces_removed(adapter_path(), vec![DEVICE_INTERFACE.to_string()]),
            ),
            ScanEvent::signal(
                Duration::from_millis(10),
                Signal {
                    path: ObjectPath::root(),
                    interface: OBJECT_MANAGER_INTERFACE.to_string(),
                    member: INTERFACES_ADDED.to_string(),
                    payload: SignalPayload::Other,
                },
            ),
            ScanEvent::transient(Duration::from_millis(10), unrelated),
            ScanEvent::transient(Duration::from_millis(30), device("z", &["1800"])),
        ]);

        controller(&bus)
            .discover(
                &adapter_path(),
                &UuidFilter::new(["1800"]).unwrap(),
                Duration::from_secs(2),
                None,
            )
            .unwrap();
        assert_cleaned_up(&bus, true);
    }

    #[test]
    fn test_subscribe_failure_releases_nothing_else() {
        let bus = MockBus::new();
        bus.fail_subscribe(BusDeviceError::new(BusDeviceErrorKind::Backend, "no bus"));
        let controller = controller(&bus);

        let err = controller
            .discover(&adapter_path(), &UuidFilter::any(), Duration::from_secs(1), None)
            .unwrap_err();
        assert!(matches!(err, DriverError::Bus(BusError::Device(_))));
        assert_eq!(controller.last_outcome(), DiscoveryState::Failed);
        assert_eq!(bus.call_count(method::START_DISCOVERY), 0);
        assert_cleaned_up(&bus, false);
    }

    #[test]
    fn test_add_match_failure_removes_subscription() {
        let bus = MockBus::new();
        bus.fail_add_match(BusDeviceError::new(BusDeviceErrorKind::AccessDenied, "denied"));

        let err = controller(&bus)
            .discover(&adapter_path(), &UuidFilter::any(), Duration::from_secs(1), None)
            .unwrap_err();
        assert!(matches!(err, DriverError::Bus(_)));
        assert_eq!(bus.subscribe_count(), 1);
        assert_cleaned_up(&bus, false);
    }

    #[test]
    fn test_set_filter_failure_tears_down_without_stop() {
        let bus = MockBus::new();
        bus.fail_method(method::SET_DISCOVERY_FILTER, "org.bluez.Error.InvalidArguments");

        let err = controller(&bus)
            .discover(&adapter_path(), &UuidFilter::any(), Duration::from_secs(1), None)
            .unwrap_err();
        assert!(matches!(err, DriverError::Bus(BusError::MethodFailed { .. })));
        assert_eq!(bus.call_count(method::START_DISCOVERY), 0);
        assert_cleaned_up(&bus, false);
    }

    #[test]
    fn test_start_failure_tears_down_without_stop() {
        let bus = MockBus::new();
        bus.fail_method(method::START_DISCOVERY, "org.bluez.Error.NotReady");

        let err = controller(&bus)
            .discover(&adapter_path(), &UuidFilter::any(), Duration::from_secs(1), None)
            .unwrap_err();
        assert!(matches!(err, DriverError::Bus(BusError::MethodFailed { .. })));
        assert_cleaned_up(&bus, false);
    }

    #[test]
    fn test_disconnect_during_scan_fails() {
        let bus = MockBus::new();
        let controller = Arc::new(controller(&bus));
        let worker = {
            let controller = controller.clone();
            thread::spawn(move || {
                controller.discover(&adapter_path(), &UuidFilter::any(), Duration::ZERO, None)
            })
        };

        while controller.state() != DiscoveryState::Scanning {
            thread::sleep(Duration::from_millis(5));
        }
        bus.disconnect();

        let result = worker.join().unwrap();
        assert!(matches!(result, Err(DriverError::Bus(BusError::Disconnected))));
        assert_eq!(bus.call_count(method::STOP_DISCOVERY), 1);
        assert!(bus.active_match_rules().is_empty());
    }

    #[test]
    fn test_concurrent_discover_is_rejected() {
        let bus = MockBus::new();
        let controller = Arc::new(controller(&bus));
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded(1);

        let worker = {
            let controller = controller.clone();
            thread::spawn(move || {
                controller.discover(
                    &adapter_path(),
                    &UuidFilter::any(),
                    Duration::ZERO,
                    Some(&cancel_rx),
                )
            })
        };
        while controller.state() != DiscoveryState::Scanning {
            thread::sleep(Duration::from_millis(5));
        }

        let second = controller.discover(
            &adapter_path(),
            &UuidFilter::any(),
            Duration::from_millis(10),
            None,
        );
        assert!(matches!(second, Err(DriverError::DiscoveryInProgress)));
        // 第二次调用没有触碰总线
        assert_eq!(bus.subscribe_count(), 1);

        cancel_tx.send(()).unwrap();
        assert!(matches!(worker.join().unwrap(), Err(DriverError::Cancelled)));
    }

    #[test]
    fn test_discovery_filter_dict() {
        // 重复和不同写法的同一 UUID 只发送一次
        let filter = UuidFilter::new(["1800", "1800", "00001800", "1801"]).unwrap();
        let dict = discovery_filter(&filter, "le");
        assert_eq!(dict.len(), 2);
        assert_eq!(
            dict[property::UUIDS].as_str_list().unwrap(),
            [
                "00001800-0000-1000-8000-00805f9b34fb".to_string(),
                "00001801-0000-1000-8000-00805f9b34fb".to_string(),
            ]
        );
    }
}
