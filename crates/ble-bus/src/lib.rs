//! # BLE Bus Layer
//!
//! 总线传输抽象层：远端对象注册表（BlueZ）通过 `BusTransport` trait 访问，
//! 上层（ObjectCache / DiscoveryController）只依赖这个 trait。
//!
//! ## 后端
//!
//! - `dbus`（默认）：基于 zbus 阻塞 API 的真实 D-Bus 连接
//! - `mock`：内存中的模拟总线，可脚本化扫描过程，用于测试

use ble_types::{MatchRule, ObjectPath, ObjectRecord, PropertyValue, Signal};
use crossbeam_channel::Receiver;
use std::fmt;
use thiserror::Error;

#[cfg(feature = "dbus")]
pub mod dbus;

#[cfg(feature = "dbus")]
pub use dbus::{BusAddress, DbusTransport};

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockBus, MockCall, ScanEvent};

/// 总线层统一错误类型
#[derive(Error, Debug)]
pub enum BusError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] BusDeviceError),
    /// 远端方法返回了错误
    #[error("Method {method} failed: {message}")]
    MethodFailed { method: String, message: String },
    /// 返回数据的形状不符合预期
    #[error("Malformed reply: {0}")]
    MalformedReply(String),
    #[error("Operation timeout")]
    Timeout,
    #[error("Bus disconnected")]
    Disconnected,
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusDeviceErrorKind {
    Unknown,
    NotFound,
    AccessDenied,
    Busy,
    UnsupportedConfig,
    InvalidResponse,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct BusDeviceError {
    pub kind: BusDeviceErrorKind,
    pub message: String,
}

impl BusDeviceError {
    pub fn new(kind: BusDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            BusDeviceErrorKind::AccessDenied | BusDeviceErrorKind::NotFound
        )
    }
}

impl From<String> for BusDeviceError {
    fn from(message: String) -> Self {
        Self::new(BusDeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for BusDeviceError {
    fn from(message: &str) -> Self {
        Self::new(BusDeviceErrorKind::Unknown, message)
    }
}

/// 订阅句柄 ID（由传输层分配，进程内唯一）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 一次通知订阅
///
/// 满足订阅规则的通知按到达顺序进入 `receiver`。
/// 传输层断开或订阅被移除后，`receiver` 进入 disconnected 状态。
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    rule: MatchRule,
    receiver: Receiver<Signal>,
}

impl Subscription {
    pub fn new(id: SubscriptionId, rule: MatchRule, receiver: Receiver<Signal>) -> Self {
        Self { id, rule, receiver }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn rule(&self) -> &MatchRule {
        &self.rule
    }

    pub fn receiver(&self) -> &Receiver<Signal> {
        &self.receiver
    }
}

/// 总线传输 trait
///
/// 所有方法都是阻塞的，实现需要是 `Send + Sync`，以便多个视图和发现流程共享
/// 同一个 `Arc<dyn BusTransport>`。
///
/// # 通知投递
///
/// `subscribe` 注册的是**本地**过滤规则；远端是否把通知发送到本连接由
/// `add_match` / `remove_match` 控制。两者需要配对使用。
pub trait BusTransport: Send + Sync {
    /// 全量枚举远端对象（`GetManagedObjects`），按路径排序
    fn managed_objects(&self) -> Result<Vec<ObjectRecord>, BusError>;

    /// 调用远端方法
    ///
    /// # 参数
    /// - `path`: 目标对象路径
    /// - `interface`: 方法所属接口
    /// - `method`: 方法名
    /// - `args`: 按顺序排列的参数
    ///
    /// # 错误
    /// - `BusError::MethodFailed`: 远端返回错误
    /// - `BusError::MalformedReply`: 返回值无法解码
    fn call(
        &self,
        path: &ObjectPath,
        interface: &str,
        method: &str,
        args: &[PropertyValue],
    ) -> Result<Vec<PropertyValue>, BusError>;

    /// 注册本地通知订阅
    fn subscribe(&self, rule: &MatchRule) -> Result<Subscription, BusError>;

    /// 移除本地通知订阅（之后 `Subscription::receiver` 不再收到新通知）
    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError>;

    /// 请求远端投递满足规则的通知（`AddMatch`）
    fn add_match(&self, rule: &MatchRule) -> Result<(), BusError>;

    /// 撤销 `add_match`（`RemoveMatch`）
    fn remove_match(&self, rule: &MatchRule) -> Result<(), BusError>;

    /// 调用远端方法并期望恰好一个返回值
    fn call_with_reply(
        &self,
        path: &ObjectPath,
        interface: &str,
        method: &str,
        args: &[PropertyValue],
    ) -> Result<PropertyValue, BusError> {
        let mut reply = self.call(path, interface, method, args)?;
        if reply.len() != 1 {
            return Err(BusError::MalformedReply(format!(
                "{}.{} returned {} values, expected 1",
                interface,
                method,
                reply.len()
            )));
        }
        Ok(reply.remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_device_error_is_fatal() {
        assert!(BusDeviceError::new(BusDeviceErrorKind::AccessDenied, "denied").is_fatal());
        assert!(BusDeviceError::new(BusDeviceErrorKind::NotFound, "gone").is_fatal());
        assert!(!BusDeviceError::new(BusDeviceErrorKind::Busy, "busy").is_fatal());
        assert!(!BusDeviceError::from("boom").is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = BusError::MethodFailed {
            method: "StartDiscovery".to_string(),
            message: "org.bluez.Error.NotReady".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Method StartDiscovery failed: org.bluez.Error.NotReady"
        );

        let err: BusError = BusDeviceError::new(BusDeviceErrorKind::Backend, "no bus").into();
        assert_eq!(err.to_string(), "Device Error: Backend: no bus");
    }

    #[test]
    fn test_subscription_accessors() {
        let (_tx, rx) = unbounded();
        let rule = MatchRule::signal().member("InterfacesAdded");
        let sub = Subscription::new(SubscriptionId(7), rule.clone(), rx);
        assert_eq!(sub.id(), SubscriptionId(7));
        assert_eq!(sub.rule(), &rule);
        assert!(sub.receiver().is_empty());
        assert_eq!(SubscriptionId(7).to_string(), "#7");
    }

    struct FixedReply(Vec<PropertyValue>);

    impl BusTransport for FixedReply {
        fn managed_objects(&self) -> Result<Vec<ObjectRecord>, BusError> {
            Ok(Vec::new())
        }

        fn call(
            &self,
            _path: &ObjectPath,
            _interface: &str,
            _method: &str,
            _args: &[PropertyValue],
        ) -> Result<Vec<PropertyValue>, BusError> {
            Ok(self.0.clone())
        }

        fn subscribe(&self, _rule: &MatchRule) -> Result<Subscription, BusError> {
            Err(BusError::Disconnected)
        }

        fn unsubscribe(&self, _id: SubscriptionId) -> Result<(), BusError> {
            Ok(())
        }

        fn add_match(&self, _rule: &MatchRule) -> Result<(), BusError> {
            Ok(())
        }

        fn remove_match(&self, _rule: &MatchRule) -> Result<(), BusError> {
            Ok(())
        }
    }

    #[test]
    fn test_call_with_reply_requires_single_value() {
        let path = ObjectPath::root();

        let one = FixedReply(vec![PropertyValue::Bytes(vec![1, 2])]);
        assert_eq!(
            one.call_with_reply(&path, "x.y", "ReadValue", &[]).unwrap(),
            PropertyValue::Bytes(vec![1, 2])
        );

        let none = FixedReply(vec![]);
        assert!(matches!(
            none.call_with_reply(&path, "x.y", "ReadValue", &[]),
            Err(BusError::MalformedReply(_))
        ));
    }
}
