//! 特征值通知
//!
//! 订阅特征值对象上的 `PropertiesChanged`，在工作线程中把新的 `Value`
//! 交给回调。[`NotifyHandle`] 持有订阅、匹配规则和工作线程：
//!
//! - drop：停止工作线程，移除匹配规则，取消订阅
//! - [`NotifyHandle::stop`]：另外向远端发送 `StopNotify`

use ble_bus::{BusError, BusTransport, SubscriptionId};
use ble_driver::RemoteObject;
use ble_types::{
    CHARACTERISTIC_INTERFACE, MatchRule, PROPERTIES_CHANGED, PROPERTIES_INTERFACE, Signal,
    SignalPayload, method, property,
};
use crossbeam_channel::{Receiver, Sender, select};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, warn};

/// 通知订阅句柄
pub struct NotifyHandle {
    object: Arc<RemoteObject>,
    rule: MatchRule,
    subscription: SubscriptionId,
    match_added: bool,
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

pub(crate) fn spawn<F>(object: Arc<RemoteObject>, mut handler: F) -> Result<NotifyHandle, BusError>
where
    F: FnMut(Vec<u8>) + Send + 'static,
{
    let transport = Arc::clone(object.transport());
    let rule = MatchRule::signal()
        .path(object.path().clone())
        .interface(PROPERTIES_INTERFACE)
        .member(PROPERTIES_CHANGED);

    let subscription = transport.subscribe(&rule)?;
    let signals = subscription.receiver().clone();
    let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);

    // 之后的任何失败都由 Drop 释放已获得的资源
    let mut handle = NotifyHandle {
        object,
        rule,
        subscription: subscription.id(),
        match_added: false,
        stop_tx: Some(stop_tx),
        worker: None,
    };

    transport.add_match(&handle.rule)?;
    handle.match_added = true;

    handle
        .object
        .call(CHARACTERISTIC_INTERFACE, method::START_NOTIFY, &[])?;

    let label = handle.object.path().to_string();
    let worker = thread::Builder::new()
        .name("ble-notify".into())
        .spawn(move || {
            run_worker(&label, &signals, &stop_rx, &mut handler);
        })?;
    handle.worker = Some(worker);
    debug!("{}: notifications enabled", handle.object.path());

    Ok(handle)
}

fn run_worker<F: FnMut(Vec<u8>)>(
    label: &str,
    signals: &Receiver<Signal>,
    stop_rx: &Receiver<()>,
    handler: &mut F,
) {
    loop {
        select! {
            recv(signals) -> msg => match msg {
                Ok(signal) => {
                    if let Some(value) = notified_value(&signal) {
                        handler(value);
                    } else {
                        trace!("{}: ignoring {}", label, signal.name());
                    }
                },
                Err(_) => {
                    debug!("{}: notification channel closed", label);
                    return;
                },
            },
            recv(stop_rx) -> _ => return,
        }
    }
}

/// 从 `PropertiesChanged` 中取出特征值的新 `Value`
fn notified_value(signal: &Signal) -> Option<Vec<u8>> {
    if let SignalPayload::PropertiesChanged {
        interface, changed, ..
    } = &signal.payload
    {
        if interface == CHARACTERISTIC_INTERFACE {
            return changed
                .get(property::VALUE)
                .and_then(|value| value.as_bytes())
                .map(<[u8]>::to_vec);
        }
    }
    None
}

impl NotifyHandle {
    /// 发送 `StopNotify` 并释放订阅
    pub fn stop(mut self) -> Result<(), BusError> {
        self.shutdown_worker();
        self.object
            .call(CHARACTERISTIC_INTERFACE, method::STOP_NOTIFY, &[])?;
        Ok(())
    }

    /// 工作线程是否仍在运行
    pub fn is_active(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    fn transport(&self) -> &Arc<dyn BusTransport> {
        self.object.transport()
    }

    fn shutdown_worker(&mut self) {
        // 关闭停止通道即通知工作线程退出
        self.stop_tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                warn!("{}: notification handler panicked", self.object.path());
            }
        }
    }
}

impl Drop for NotifyHandle {
    fn drop(&mut self) {
        self.shutdown_worker();
        if self.match_added {
            if let Err(e) = self.transport().remove_match(&self.rule) {
                warn!("Failed to remove match rule {}: {}", self.rule, e);
            }
        }
        if let Err(e) = self.transport().unsubscribe(self.subscription) {
            warn!("Failed to remove subscription {}: {}", self.subscription, e);
        }
    }
}

impl std::fmt::Debug for NotifyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyHandle")
            .field("path", self.object.path())
            .field("subscription", &self.subscription)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::gatt::Characteristic;
    use crate::view::View;
    use ble_bus::mock::props;
    use ble_bus::{BusDeviceError, BusDeviceErrorKind, MockBus};
    use ble_driver::RemoteObject;
    use ble_types::{
        CHARACTERISTIC_INTERFACE, DEVICE_INTERFACE, ObjectPath, ObjectRecord, PropertyValue,
        Signal, method, property,
    };
    use std::sync::Arc;
    use std::time::Duration;

    const CHAR_PATH: &str = "/org/bluez/hci0/dev_AA/service0010/char0011";

    fn characteristic(bus: &MockBus) -> Characteristic {
        let record = ObjectRecord::new(ObjectPath::new(CHAR_PATH).unwrap()).with_interface(
            CHARACTERISTIC_INTERFACE,
            props([(property::UUID, "2a37".into())]),
        );
        Characteristic::from_object(Arc::new(RemoteObject::new(record, Arc::new(bus.clone()))))
            .unwrap()
    }

    fn value_changed(bytes: &[u8]) -> Signal {
        Signal::properties_changed(
            ObjectPath::new(CHAR_PATH).unwrap(),
            CHARACTERISTIC_INTERFACE,
            props([(property::VALUE, PropertyValue::Bytes(bytes.to_vec()))]),
        )
    }

    #[test]
    fn test_values_delivered_in_order() {
        let bus = MockBus::new();
        let chr = characteristic(&bus);
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = chr
            .handle_notify(move |value| {
                let _ = tx.send(value);
            })
            .unwrap();

        assert_eq!(bus.call_count(method::START_NOTIFY), 1);
        assert_eq!(bus.active_subscriptions(), 1);
        assert_eq!(bus.active_match_rules().len(), 1);

        bus.emit(value_changed(&[1]));
        bus.emit(value_changed(&[2, 3]));
        let timeout = Duration::from_secs(1);
        assert_eq!(rx.recv_timeout(timeout).unwrap(), vec![1]);
        assert_eq!(rx.recv_timeout(timeout).unwrap(), vec![2, 3]);
        assert!(handle.is_active());

        drop(handle);
        assert_eq!(bus.active_subscriptions(), 0);
        assert!(bus.active_match_rules().is_empty());
        // drop 不发送 StopNotify
        assert_eq!(bus.call_count(method::STOP_NOTIFY), 0);
    }

    #[test]
    fn test_other_interfaces_and_paths_ignored() {
        let bus = MockBus::new();
        let chr = characteristic(&bus);
        let (tx, rx) = crossbeam_channel::unbounded();
        let _handle = chr
            .handle_notify(move |value| {
                let _ = tx.send(value);
            })
            .unwrap();

        // 其它接口上的 Value
        bus.emit(Signal::properties_changed(
            ObjectPath::new(CHAR_PATH).unwrap(),
            DEVICE_INTERFACE,
            props([(property::VALUE, PropertyValue::Bytes(vec![9]))]),
        ));
        // 其它对象（不满足匹配规则，不会投递）
        let delivered = bus.emit(Signal::properties_changed(
            ObjectPath::new("/org/bluez/hci0/dev_BB").unwrap(),
            CHARACTERISTIC_INTERFACE,
            props([(property::VALUE, PropertyValue::Bytes(vec![8]))]),
        ));
        assert_eq!(delivered, 0);
        // 没有 Value 的变化
        bus.emit(Signal::properties_changed(
            ObjectPath::new(CHAR_PATH).unwrap(),
            CHARACTERISTIC_INTERFACE,
            props([(property::NOTIFYING, true.into())]),
        ));
        bus.emit(value_changed(&[7]));

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), vec![7]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stop_sends_stop_notify() {
        let bus = MockBus::new();
        let chr = characteristic(&bus);
        let handle = chr.handle_notify(|_| {}).unwrap();
        handle.stop().unwrap();

        assert_eq!(bus.call_count(method::STOP_NOTIFY), 1);
        assert_eq!(bus.active_subscriptions(), 0);
        assert!(bus.active_match_rules().is_empty());
    }

    #[test]
    fn test_start_notify_failure_releases_subscription() {
        let bus = MockBus::new();
        bus.fail_method(method::START_NOTIFY, "org.bluez.Error.NotSupported");
        let chr = characteristic(&bus);

        assert!(chr.handle_notify(|_| {}).is_err());
        assert_eq!(bus.active_subscriptions(), 0);
        assert!(bus.active_match_rules().is_empty());
    }

    #[test]
    fn test_add_match_failure_releases_subscription() {
        let bus = MockBus::new();
        bus.fail_add_match(BusDeviceError::new(BusDeviceErrorKind::AccessDenied, "denied"));
        let chr = characteristic(&bus);

        assert!(chr.handle_notify(|_| {}).is_err());
        assert_eq!(bus.active_subscriptions(), 0);
        assert_eq!(bus.call_count(method::START_NOTIFY), 0);
    }

    #[test]
    fn test_worker_exits_on_disconnect() {
        let bus = MockBus::new();
        let chr = characteristic(&bus);
        let handle = chr.handle_notify(|_| {}).unwrap();
        bus.disconnect();

        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while handle.is_active() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!handle.is_active());
    }
}
