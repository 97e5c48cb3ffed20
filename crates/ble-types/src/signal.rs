//! 总线通知（Signal）与匹配规则（MatchRule）

use crate::names::{
    INTERFACES_ADDED, INTERFACES_REMOVED, OBJECT_MANAGER_INTERFACE, PROPERTIES_CHANGED,
    PROPERTIES_INTERFACE,
};
use crate::path::ObjectPath;
use crate::value::{InterfaceMap, PropertyMap};
use std::fmt;

/// 已解码的通知负载
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalPayload {
    /// `InterfacesAdded(o, a{sa{sv}})`
    InterfacesAdded {
        object: ObjectPath,
        interfaces: InterfaceMap,
    },
    /// `InterfacesRemoved(o, as)`
    InterfacesRemoved {
        object: ObjectPath,
        interfaces: Vec<String>,
    },
    /// `PropertiesChanged(s, a{sv}, as)`
    PropertiesChanged {
        interface: String,
        changed: PropertyMap,
        invalidated: Vec<String>,
    },
    /// 未识别或无法解码的负载
    Other,
}

/// 总线通知
///
/// `path`/`interface`/`member` 来自消息头，`payload` 是按 member 解码后的消息体。
/// 注意：`member` 与 `payload` 可能不一致（例如消息体格式错误时 payload 为 `Other`），
/// 消费方需要同时检查两者。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    /// 发出通知的对象路径
    pub path: ObjectPath,
    /// 通知所属接口
    pub interface: String,
    /// 通知名
    pub member: String,
    /// 消息体
    pub payload: SignalPayload,
}

impl Signal {
    /// 构造 ObjectManager 的 `InterfacesAdded` 通知（由根路径发出）
    pub fn interfaces_added(object: ObjectPath, interfaces: InterfaceMap) -> Self {
        Self {
            path: ObjectPath::root(),
            interface: OBJECT_MANAGER_INTERFACE.to_string(),
            member: INTERFACES_ADDED.to_string(),
            payload: SignalPayload::InterfacesAdded { object, interfaces },
        }
    }

    /// 构造 ObjectManager 的 `InterfacesRemoved` 通知
    pub fn interfaces_removed(object: ObjectPath, interfaces: Vec<String>) -> Self {
        Self {
            path: ObjectPath::root(),
            interface: OBJECT_MANAGER_INTERFACE.to_string(),
            member: INTERFACES_REMOVED.to_string(),
            payload: SignalPayload::InterfacesRemoved { object, interfaces },
        }
    }

    /// 构造 `PropertiesChanged` 通知（由属性所属对象发出）
    pub fn properties_changed(
        path: ObjectPath,
        interface: impl Into<String>,
        changed: PropertyMap,
    ) -> Self {
        Self {
            path,
            interface: PROPERTIES_INTERFACE.to_string(),
            member: PROPERTIES_CHANGED.to_string(),
            payload: SignalPayload::PropertiesChanged {
                interface: interface.into(),
                changed,
                invalidated: Vec::new(),
            },
        }
    }

    /// 完整通知名（`interface.member`）
    pub fn name(&self) -> String {
        format!("{}.{}", self.interface, self.member)
    }
}

/// 总线匹配规则
///
/// 只支持 signal 类型。`Display` 输出总线 `AddMatch` 使用的规则字符串：
///
/// ```rust
/// use ble_types::{MatchRule, OBJECT_MANAGER_INTERFACE, INTERFACES_ADDED};
///
/// let rule = MatchRule::signal()
///     .interface(OBJECT_MANAGER_INTERFACE)
///     .member(INTERFACES_ADDED);
/// assert_eq!(
///     rule.to_string(),
///     "type='signal',interface='org.freedesktop.DBus.ObjectManager',member='InterfacesAdded'"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct MatchRule {
    /// 发送方（由总线侧过滤，`matches()` 不检查）
    pub sender: Option<String>,
    pub path: Option<ObjectPath>,
    pub interface: Option<String>,
    pub member: Option<String>,
}

impl MatchRule {
    /// 匹配所有 signal 的空规则
    pub fn signal() -> Self {
        Self::default()
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn path(mut self, path: ObjectPath) -> Self {
        self.path = Some(path);
        self
    }

    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn member(mut self, member: impl Into<String>) -> Self {
        self.member = Some(member.into());
        self
    }

    /// 检查通知是否满足规则（忽略 sender）
    pub fn matches(&self, signal: &Signal) -> bool {
        self.path.as_ref().is_none_or(|p| *p == signal.path)
            && self.interface.as_deref().is_none_or(|i| i == signal.interface)
            && self.member.as_deref().is_none_or(|m| m == signal.member)
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("type='signal'")?;
        if let Some(sender) = &self.sender {
            write!(f, ",sender='{}'", sender)?;
        }
        if let Some(path) = &self.path {
            write!(f, ",path='{}'", path)?;
        }
        if let Some(interface) = &self.interface {
            write!(f, ",interface='{}'", interface)?;
        }
        if let Some(member) = &self.member {
            write!(f, ",member='{}'", member)?;
        }
        Ok(())
    }
}
