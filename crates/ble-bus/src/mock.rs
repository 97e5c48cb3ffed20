//! Mock 总线
//!
//! 内存中的远端对象注册表，用于在没有蓝牙守护进程的环境下测试上层逻辑：
//!
//! - 对象增删改：`insert_object` / `remove_object` / `set_property`
//! - 调用记录：`calls` / `call_count`
//! - 故障注入：`fail_method` / `fail_enumeration` / `fail_subscribe` / `fail_add_match`
//! - 扫描脚本：`on_start_discovery` 设置 `StartDiscovery` 之后按时间顺序发出的通知
//! - 订阅统计：`active_subscriptions` / `active_match_rules` / `discarded_signals`
//!
//! `MockBus` 是一个廉价可克隆的句柄，所有克隆共享同一份状态。

use crate::{BusDeviceError, BusError, BusTransport, Subscription, SubscriptionId};
use ble_types::{
    MatchRule, ObjectPath, ObjectRecord, PropertyMap, PropertyValue, Signal, method,
};
use crossbeam_channel::{Sender, unbounded};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::trace;

/// 一次被记录的方法调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub path: ObjectPath,
    pub interface: String,
    pub method: String,
    pub args: Vec<PropertyValue>,
}

/// 扫描脚本中的一个事件
///
/// `delay` 是相对于 `StartDiscovery` 调用时刻的偏移。
/// 同一个事件内的对象写入和通知投递在一次加锁内完成（用于模拟同时到达的通知）。
#[derive(Debug, Clone)]
pub struct ScanEvent {
    pub delay: Duration,
    objects: Vec<ObjectRecord>,
    signals: Vec<Signal>,
}

impl ScanEvent {
    /// 对象出现：写入注册表并发出 `InterfacesAdded`
    pub fn announce(delay: Duration, record: ObjectRecord) -> Self {
        Self::burst(delay, vec![record])
    }

    /// 只发出 `InterfacesAdded`，不写入注册表（对象随即消失）
    pub fn transient(delay: Duration, record: ObjectRecord) -> Self {
        Self {
            delay,
            signals: vec![Signal::interfaces_added(record.path, record.interfaces)],
            objects: Vec::new(),
        }
    }

    /// 多个对象同时出现
    pub fn burst(delay: Duration, records: Vec<ObjectRecord>) -> Self {
        let signals = records
            .iter()
            .map(|r| Signal::interfaces_added(r.path.clone(), r.interfaces.clone()))
            .collect();
        Self {
            delay,
            objects: records,
            signals,
        }
    }

    /// 发出任意通知
    pub fn signal(delay: Duration, signal: Signal) -> Self {
        Self {
            delay,
            objects: Vec::new(),
            signals: vec![signal],
        }
    }
}

struct MockSubscription {
    id: SubscriptionId,
    rule: MatchRule,
    sender: Sender<Signal>,
}

#[derive(Default)]
struct MockState {
    /// 按路径排序
    objects: Vec<ObjectRecord>,
    calls: Vec<MockCall>,
    replies: HashMap<String, Vec<PropertyValue>>,
    method_failures: HashMap<String, String>,
    enumeration_failure: Option<BusDeviceError>,
    subscribe_failure: Option<BusDeviceError>,
    add_match_failure: Option<BusDeviceError>,
    enumeration_delay: Duration,
    subscriptions: Vec<MockSubscription>,
    match_rules: Vec<MatchRule>,
    scan_script: Vec<ScanEvent>,
    /// 每次 `StopDiscovery` 递增，用于终止正在运行的扫描脚本
    scan_epoch: u64,
    subscribe_count: usize,
    discarded_signals: usize,
    emitted_signals: usize,
}

struct Inner {
    state: Mutex<MockState>,
    next_id: AtomicU64,
}

/// Mock 总线
#[derive(Clone)]
pub struct MockBus {
    inner: Arc<Inner>,
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(MockState::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// 使用初始对象创建
    pub fn with_objects(records: impl IntoIterator<Item = ObjectRecord>) -> Self {
        let bus = Self::new();
        for record in records {
            bus.insert_object(record);
        }
        bus
    }

    // ============================================================
    // 注册表
    // ============================================================

    /// 插入对象（同路径对象被替换）
    pub fn insert_object(&self, record: ObjectRecord) {
        let mut state = self.inner.state.lock();
        insert_sorted(&mut state.objects, record);
    }

    /// 删除对象，返回是否存在
    pub fn remove_object(&self, path: &ObjectPath) -> bool {
        let mut state = self.inner.state.lock();
        let before = state.objects.len();
        state.objects.retain(|r| &r.path != path);
        state.objects.len() != before
    }

    /// 修改（或新增）对象某接口上的属性，对象或接口不存在时返回 `false`
    pub fn set_property(
        &self,
        path: &ObjectPath,
        interface: &str,
        name: &str,
        value: PropertyValue,
    ) -> bool {
        let mut state = self.inner.state.lock();
        let Some(props) = state
            .objects
            .iter_mut()
            .find(|r| &r.path == path)
            .and_then(|r| r.interfaces.get_mut(interface))
        else {
            return false;
        };
        props.insert(name.to_string(), value);
        true
    }

    /// 当前注册表内容
    pub fn objects(&self) -> Vec<ObjectRecord> {
        self.inner.state.lock().objects.clone()
    }

    // ============================================================
    // 调用与故障注入
    // ============================================================

    /// 所有已记录的调用（包括失败的调用）
    pub fn calls(&self) -> Vec<MockCall> {
        self.inner.state.lock().calls.clone()
    }

    /// 指定方法的调用次数
    pub fn call_count(&self, method: &str) -> usize {
        self.inner
            .state
            .lock()
            .calls
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    /// 设置方法的返回值（默认返回空）
    pub fn set_reply(&self, method: &str, values: Vec<PropertyValue>) {
        self.inner.state.lock().replies.insert(method.to_string(), values);
    }

    /// 令方法调用返回远端错误
    pub fn fail_method(&self, method: &str, message: impl Into<String>) {
        self.inner
            .state
            .lock()
            .method_failures
            .insert(method.to_string(), message.into());
    }

    /// 令 `managed_objects` 失败
    pub fn fail_enumeration(&self, error: BusDeviceError) {
        self.inner.state.lock().enumeration_failure = Some(error);
    }

    /// 令 `subscribe` 失败
    pub fn fail_subscribe(&self, error: BusDeviceError) {
        self.inner.state.lock().subscribe_failure = Some(error);
    }

    /// 令 `add_match` 失败
    pub fn fail_add_match(&self, error: BusDeviceError) {
        self.inner.state.lock().add_match_failure = Some(error);
    }

    /// 清除所有故障注入
    pub fn clear_failures(&self) {
        let mut state = self.inner.state.lock();
        state.method_failures.clear();
        state.enumeration_failure = None;
        state.subscribe_failure = None;
        state.add_match_failure = None;
    }

    /// 设置 `managed_objects` 的耗时（在快照取出之后、返回之前等待）
    pub fn set_enumeration_delay(&self, delay: Duration) {
        self.inner.state.lock().enumeration_delay = delay;
    }

    // ============================================================
    // 通知
    // ============================================================

    /// 设置 `StartDiscovery` 成功后执行的扫描脚本
    pub fn on_start_discovery(&self, events: Vec<ScanEvent>) {
        self.inner.state.lock().scan_script = events;
    }

    /// 向所有规则匹配的订阅投递通知，返回投递数量
    pub fn emit(&self, signal: Signal) -> usize {
        let mut state = self.inner.state.lock();
        deliver(&mut state, &signal)
    }

    /// 模拟连接断开：关闭所有订阅通道
    pub fn disconnect(&self) {
        let mut state = self.inner.state.lock();
        for sub in state.subscriptions.drain(..) {
            trace!("MockBus: dropping subscription {} on disconnect", sub.id);
        }
    }

    /// 当前活跃订阅数
    pub fn active_subscriptions(&self) -> usize {
        self.inner.state.lock().subscriptions.len()
    }

    /// 当前已注册（未撤销）的匹配规则
    pub fn active_match_rules(&self) -> Vec<MatchRule> {
        self.inner.state.lock().match_rules.clone()
    }

    /// 累计订阅次数
    pub fn subscribe_count(&self) -> usize {
        self.inner.state.lock().subscribe_count
    }

    /// 订阅移除时仍留在队列中、未被消费的通知总数
    pub fn discarded_signals(&self) -> usize {
        self.inner.state.lock().discarded_signals
    }

    /// 累计投递的通知数
    pub fn emitted_signals(&self) -> usize {
        self.inner.state.lock().emitted_signals
    }

    fn spawn_scan(&self, epoch: u64, script: Vec<ScanEvent>) {
        let bus = self.clone();
        let started = Instant::now();
        let spawned = thread::Builder::new()
            .name("mock-scan".into())
            .spawn(move || {
                for event in script {
                    let due = started + event.delay;
                    let now = Instant::now();
                    if due > now {
                        thread::sleep(due - now);
                    }
                    let mut state = bus.inner.state.lock();
                    if state.scan_epoch != epoch {
                        trace!("MockBus: scan stopped, dropping remaining events");
                        return;
                    }
                    for record in event.objects {
                        insert_sorted(&mut state.objects, record);
                    }
                    for signal in &event.signals {
                        deliver(&mut state, signal);
                    }
                }
            });
        if let Err(e) = spawned {
            tracing::warn!("MockBus: failed to spawn scan thread: {}", e);
        }
    }
}

fn insert_sorted(objects: &mut Vec<ObjectRecord>, record: ObjectRecord) {
    match objects.binary_search_by(|r| r.path.cmp(&record.path)) {
        Ok(index) => objects[index] = record,
        Err(index) => objects.insert(index, record),
    }
}

fn deliver(state: &mut MockState, signal: &Signal) -> usize {
    let mut delivered = 0;
    for sub in &state.subscriptions {
        if sub.rule.matches(signal) && sub.sender.send(signal.clone()).is_ok() {
            delivered += 1;
        }
    }
    state.emitted_signals += delivered;
    delivered
}

impl BusTransport for MockBus {
    fn managed_objects(&self) -> Result<Vec<ObjectRecord>, BusError> {
        let (objects, delay) = {
            let state = self.inner.state.lock();
            if let Some(error) = &state.enumeration_failure {
                return Err(BusError::Device(error.clone()));
            }
            (state.objects.clone(), state.enumeration_delay)
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        Ok(objects)
    }

    fn call(
        &self,
        path: &ObjectPath,
        interface: &str,
        method: &str,
        args: &[PropertyValue],
    ) -> Result<Vec<PropertyValue>, BusError> {
        let mut state = self.inner.state.lock();
        state.calls.push(MockCall {
            path: path.clone(),
            interface: interface.to_string(),
            method: method.to_string(),
            args: args.to_vec(),
        });

        if let Some(message) = state.method_failures.get(method) {
            return Err(BusError::MethodFailed {
                method: method.to_string(),
                message: message.clone(),
            });
        }

        match method {
            method::START_DISCOVERY if !state.scan_script.is_empty() => {
                let epoch = state.scan_epoch;
                let script = state.scan_script.clone();
                drop(state);
                self.spawn_scan(epoch, script);
                return Ok(Vec::new());
            },
            method::STOP_DISCOVERY => {
                state.scan_epoch += 1;
            },
            _ => {},
        }

        Ok(state.replies.get(method).cloned().unwrap_or_default())
    }

    fn subscribe(&self, rule: &MatchRule) -> Result<Subscription, BusError> {
        let mut state = self.inner.state.lock();
        if let Some(error) = &state.subscribe_failure {
            return Err(BusError::Device(error.clone()));
        }
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = unbounded();
        state.subscriptions.push(MockSubscription {
            id,
            rule: rule.clone(),
            sender,
        });
        state.subscribe_count += 1;
        trace!("MockBus: subscribed {} with rule {}", id, rule);
        Ok(Subscription::new(id, rule.clone(), receiver))
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        let mut state = self.inner.state.lock();
        let Some(index) = state.subscriptions.iter().position(|s| s.id == id) else {
            return Err(BusError::Device(BusDeviceError::new(
                crate::BusDeviceErrorKind::NotFound,
                format!("no subscription {}", id),
            )));
        };
        let sub = state.subscriptions.remove(index);
        state.discarded_signals += sub.sender.len();
        trace!("MockBus: unsubscribed {}", id);
        Ok(())
    }

    fn add_match(&self, rule: &MatchRule) -> Result<(), BusError> {
        let mut state = self.inner.state.lock();
        if let Some(error) = &state.add_match_failure {
            return Err(BusError::Device(error.clone()));
        }
        state.match_rules.push(rule.clone());
        Ok(())
    }

    fn remove_match(&self, rule: &MatchRule) -> Result<(), BusError> {
        let mut state = self.inner.state.lock();
        match state.match_rules.iter().position(|r| r == rule) {
            Some(index) => {
                state.match_rules.remove(index);
                Ok(())
            },
            None => Err(BusError::Device(BusDeviceError::new(
                crate::BusDeviceErrorKind::NotFound,
                format!("match rule not registered: {}", rule),
            ))),
        }
    }
}

/// 便于测试构造属性表
pub fn props<const N: usize>(entries: [(&str, PropertyValue); N]) -> PropertyMap {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
