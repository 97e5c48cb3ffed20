//! D-Bus 后端（zbus 阻塞 API）
//!
//! - `managed_objects`: `org.freedesktop.DBus.ObjectManager.GetManagedObjects`
//! - `call`: 按参数形状构造消息体后调用 `Connection::call_method`
//! - `subscribe`: 每个连接一个分发线程，解码通知后按 `MatchRule` 分发给各订阅；
//!   `unsubscribe` 只移除路由，分发线程在连接关闭时退出
//! - `add_match` / `remove_match`: `org.freedesktop.DBus.AddMatch` / `RemoveMatch`
//!
//! 只支持 BlueZ 方法实际使用的参数形状：无参数、单个对象路径、单个字典、
//! 字节数组 + 字典。

use crate::{
    BusDeviceError, BusDeviceErrorKind, BusError, BusTransport, Subscription, SubscriptionId,
};
use ble_types::{
    INTERFACES_ADDED, INTERFACES_REMOVED, InterfaceMap, MatchRule, OBJECT_MANAGER_INTERFACE,
    ObjectPath, ObjectRecord, PROPERTIES_CHANGED, PROPERTIES_INTERFACE, PropertyMap,
    PropertyValue, Signal, SignalPayload,
};
use crossbeam_channel::{Sender, unbounded};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use tracing::{debug, trace, warn};
use zbus::blocking::fdo::{DBusProxy, ObjectManagerProxy};
use zbus::blocking::{Connection, MessageIterator};
use zbus::message::Type as MessageType;
use zbus::zvariant::{self, OwnedObjectPath, OwnedValue, Value};

/// 总线地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusAddress {
    /// 系统总线（BlueZ 默认所在）
    System,
    /// 会话总线
    Session,
    /// 显式地址，例如 `unix:path=/run/dbus/system_bus_socket`
    Address(String),
}

struct Route {
    rule: MatchRule,
    sender: Sender<Signal>,
}

/// 订阅路由表：订阅 ID → (匹配规则, 发送端)
#[derive(Default)]
struct SignalRoutes {
    routes: Mutex<HashMap<SubscriptionId, Route>>,
}

impl SignalRoutes {
    fn insert(&self, id: SubscriptionId, rule: MatchRule, sender: Sender<Signal>) {
        self.routes.lock().insert(id, Route { rule, sender });
    }

    /// 移除路由并释放发送端；订阅不存在时返回 `false`
    fn remove(&self, id: SubscriptionId) -> bool {
        self.routes.lock().remove(&id).is_some()
    }

    fn is_empty(&self) -> bool {
        self.routes.lock().is_empty()
    }

    /// 投递给所有匹配的订阅，接收端已释放的路由顺带清理
    fn deliver(&self, signal: &Signal) {
        self.routes.lock().retain(|id, route| {
            if !route.rule.matches(signal) {
                return true;
            }
            let alive = route.sender.send(signal.clone()).is_ok();
            if !alive {
                trace!("Dropping route {} with closed receiver", id);
            }
            alive
        });
    }
}

/// 基于 zbus 的总线传输
pub struct DbusTransport {
    conn: Connection,
    service: String,
    manager_path: ObjectPath,
    routes: Arc<SignalRoutes>,
    next_id: AtomicU64,
}

impl DbusTransport {
    /// 连接总线
    ///
    /// # 参数
    /// - `address`: 总线地址
    /// - `service`: 远端服务名（BlueZ 为 `org.bluez`）
    /// - `manager_path`: ObjectManager 所在路径（BlueZ 为 `/`）
    ///
    /// # 错误
    /// - `BusError::Device`: 无法建立连接
    pub fn connect(
        address: &BusAddress,
        service: impl Into<String>,
        manager_path: ObjectPath,
    ) -> Result<Self, BusError> {
        let conn = match address {
            BusAddress::System => Connection::system(),
            BusAddress::Session => Connection::session(),
            BusAddress::Address(addr) => zbus::blocking::connection::Builder::address(addr.as_str())
                .and_then(|builder| builder.build()),
        }
        .map_err(backend_error)?;

        let service = service.into();
        debug!("Connected to {:?} bus for service {}", address, service);

        // 迭代器在任何订阅之前创建，订阅返回后到达的消息不会丢失
        let routes = Arc::new(SignalRoutes::default());
        let messages = MessageIterator::from(&conn);
        {
            let conn = conn.clone();
            let routes = Arc::downgrade(&routes);
            thread::Builder::new()
                .name("ble-bus-signals".to_string())
                .spawn(move || dispatch(messages, &conn, routes))?;
        }

        Ok(Self {
            conn,
            service,
            manager_path,
            routes,
            next_id: AtomicU64::new(1),
        })
    }

    fn dbus_proxy(&self) -> Result<DBusProxy<'_>, BusError> {
        DBusProxy::new(&self.conn).map_err(backend_error)
    }
}

impl Drop for DbusTransport {
    fn drop(&mut self) {
        // 关闭连接使分发线程的消息迭代结束
        if let Err(e) = self.conn.clone().close() {
            warn!("Failed to close bus connection: {}", e);
        }
    }
}

/// 分发线程：解码连接上的每条通知并投递给匹配的订阅
///
/// 连接关闭或传输层释放后退出。
fn dispatch(messages: MessageIterator, conn: &Connection, routes: Weak<SignalRoutes>) {
    for message in messages {
        let Some(routes) = routes.upgrade() else {
            break;
        };
        let message = match message {
            Ok(message) => message,
            Err(e) if conn.is_closed() => {
                debug!("Signal dispatcher stopping: {}", e);
                break;
            },
            Err(e) => {
                warn!("Signal dispatcher: {}", e);
                continue;
            },
        };
        if routes.is_empty() {
            continue;
        }
        if let Some(signal) = decode_signal(&message) {
            routes.deliver(&signal);
        }
    }
    trace!("Signal dispatcher exited");
}

impl BusTransport for DbusTransport {
    fn managed_objects(&self) -> Result<Vec<ObjectRecord>, BusError> {
        let proxy = ObjectManagerProxy::new(
            &self.conn,
            self.service.as_str(),
            self.manager_path.as_str(),
        )
        .map_err(backend_error)?;
        let objects = proxy.get_managed_objects().map_err(fdo_error)?;

        let mut records = Vec::with_capacity(objects.len());
        for (path, interfaces) in objects {
            let path = ObjectPath::new(path.as_str())
                .map_err(|e| BusError::MalformedReply(e.to_string()))?;
            let mut map = InterfaceMap::new();
            for (interface, props) in interfaces {
                map.insert(interface.to_string(), convert_props(&props));
            }
            records.push(ObjectRecord {
                path,
                interfaces: map,
            });
        }
        records.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(records)
    }

    fn call(
        &self,
        path: &ObjectPath,
        interface: &str,
        method: &str,
        args: &[PropertyValue],
    ) -> Result<Vec<PropertyValue>, BusError> {
        trace!("call {} {}.{} ({} args)", path, interface, method, args.len());
        let destination = Some(self.service.as_str());
        let target = path.as_str();
        let reply = match args {
            [] => self
                .conn
                .call_method(destination, target, Some(interface), method, &()),
            [PropertyValue::Path(p)] => {
                let p = object_path(p)?;
                self.conn
                    .call_method(destination, target, Some(interface), method, &(p,))
            },
            [PropertyValue::Dict(dict)] => {
                let dict = to_dict(dict)?;
                self.conn
                    .call_method(destination, target, Some(interface), method, &(dict,))
            },
            [PropertyValue::Bytes(bytes), PropertyValue::Dict(options)] => {
                let options = to_dict(options)?;
                self.conn.call_method(
                    destination,
                    target,
                    Some(interface),
                    method,
                    &(bytes.clone(), options),
                )
            },
            _ => {
                return Err(BusError::Device(BusDeviceError::new(
                    BusDeviceErrorKind::UnsupportedConfig,
                    format!(
                        "unsupported argument shape for {}: [{}]",
                        method,
                        args.iter()
                            .map(PropertyValue::type_name)
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                )));
            },
        }
        .map_err(|e| method_error(method, e))?;

        let body = reply.body();
        if body.is_empty() {
            return Ok(Vec::new());
        }
        if *body.signature() == "ay" {
            let bytes: Vec<u8> = body
                .deserialize()
                .map_err(|e| BusError::MalformedReply(e.to_string()))?;
            return Ok(vec![PropertyValue::Bytes(bytes)]);
        }
        Err(BusError::MalformedReply(format!(
            "unsupported reply signature {} for {}",
            body.signature(),
            method
        )))
    }

    fn subscribe(&self, rule: &MatchRule) -> Result<Subscription, BusError> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = unbounded();
        self.routes.insert(id, rule.clone(), tx);
        trace!("Subscribed {} to {}", id, rule);
        Ok(Subscription::new(id, rule.clone(), rx))
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BusError> {
        if self.routes.remove(id) {
            trace!("Unsubscribed {}", id);
            Ok(())
        } else {
            Err(BusError::Device(BusDeviceError::new(
                BusDeviceErrorKind::NotFound,
                format!("no subscription {}", id),
            )))
        }
    }

    fn add_match(&self, rule: &MatchRule) -> Result<(), BusError> {
        let text = rule.to_string();
        let rule = zbus::MatchRule::try_from(text.as_str()).map_err(backend_error)?;
        self.dbus_proxy()?.add_match_rule(rule).map_err(fdo_error)
    }

    fn remove_match(&self, rule: &MatchRule) -> Result<(), BusError> {
        let text = rule.to_string();
        let rule = zbus::MatchRule::try_from(text.as_str()).map_err(backend_error)?;
        self.dbus_proxy()?.remove_match_rule(rule).map_err(fdo_error)
    }
}

// ============================================================
// 错误转换
// ============================================================

fn backend_error(e: zbus::Error) -> BusError {
    BusError::Device(BusDeviceError::new(BusDeviceErrorKind::Backend, e.to_string()))
}

fn fdo_error(e: zbus::fdo::Error) -> BusError {
    let kind = match &e {
        zbus::fdo::Error::AccessDenied(_) => BusDeviceErrorKind::AccessDenied,
        zbus::fdo::Error::ServiceUnknown(_)
        | zbus::fdo::Error::UnknownObject(_)
        | zbus::fdo::Error::UnknownInterface(_)
        | zbus::fdo::Error::UnknownMethod(_) => BusDeviceErrorKind::NotFound,
        zbus::fdo::Error::LimitsExceeded(_) => BusDeviceErrorKind::Busy,
        _ => BusDeviceErrorKind::Backend,
    };
    BusError::Device(BusDeviceError::new(kind, e.to_string()))
}

fn method_error(method: &str, e: zbus::Error) -> BusError {
    match e {
        zbus::Error::MethodError(name, detail, _) => BusError::MethodFailed {
            method: method.to_string(),
            message: match detail {
                Some(detail) => format!("{}: {}", name, detail),
                None => name.to_string(),
            },
        },
        other => backend_error(other),
    }
}

// ============================================================
// 值转换
// ============================================================

fn object_path(path: &ObjectPath) -> Result<zvariant::ObjectPath<'static>, BusError> {
    zvariant::ObjectPath::try_from(path.as_str().to_string())
        .map_err(|e| BusError::MalformedReply(e.to_string()))
}

fn to_dict(map: &PropertyMap) -> Result<HashMap<String, Value<'static>>, BusError> {
    map.iter()
        .map(|(k, v)| Ok((k.clone(), to_value(v)?)))
        .collect()
}

fn to_value(value: &PropertyValue) -> Result<Value<'static>, BusError> {
    Ok(match value {
        PropertyValue::Str(s) => Value::from(s.clone()),
        PropertyValue::Bool(b) => Value::from(*b),
        PropertyValue::Byte(v) => Value::from(*v),
        PropertyValue::Int16(v) => Value::from(*v),
        PropertyValue::UInt16(v) => Value::from(*v),
        PropertyValue::Int32(v) => Value::from(*v),
        PropertyValue::UInt32(v) => Value::from(*v),
        PropertyValue::Path(p) => Value::from(object_path(p)?),
        PropertyValue::StrList(list) => Value::from(list.clone()),
        PropertyValue::PathList(list) => Value::from(
            list.iter()
                .map(object_path)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        PropertyValue::Bytes(bytes) => Value::from(bytes.clone()),
        PropertyValue::Dict(dict) => Value::from(to_dict(dict)?),
    })
}

fn convert_props(props: &HashMap<String, OwnedValue>) -> PropertyMap {
    let mut map = PropertyMap::new();
    for (name, value) in props {
        match convert_value(value) {
            Some(converted) => {
                map.insert(name.clone(), converted);
            },
            None => trace!("Skipping property {} with unsupported type", name),
        }
    }
    map
}

fn convert_value(value: &Value<'_>) -> Option<PropertyValue> {
    Some(match value {
        Value::Str(s) => PropertyValue::Str(s.to_string()),
        Value::Bool(b) => PropertyValue::Bool(*b),
        Value::U8(v) => PropertyValue::Byte(*v),
        Value::I16(v) => PropertyValue::Int16(*v),
        Value::U16(v) => PropertyValue::UInt16(*v),
        Value::I32(v) => PropertyValue::Int32(*v),
        Value::U32(v) => PropertyValue::UInt32(*v),
        Value::ObjectPath(p) => PropertyValue::Path(ObjectPath::new(p.as_str()).ok()?),
        Value::Value(inner) => return convert_value(inner),
        Value::Array(array) => {
            let element = array.element_signature();
            if *element == "y" {
                let bytes = array
                    .iter()
                    .map(|v| match v {
                        Value::U8(b) => Some(*b),
                        _ => None,
                    })
                    .collect::<Option<Vec<_>>>()?;
                PropertyValue::Bytes(bytes)
            } else if *element == "s" {
                let strings = array
                    .iter()
                    .map(|v| match v {
                        Value::Str(s) => Some(s.to_string()),
                        _ => None,
                    })
                    .collect::<Option<Vec<_>>>()?;
                PropertyValue::StrList(strings)
            } else if *element == "o" {
                let paths = array
                    .iter()
                    .map(|v| match v {
                        Value::ObjectPath(p) => ObjectPath::new(p.as_str()).ok(),
                        _ => None,
                    })
                    .collect::<Option<Vec<_>>>()?;
                PropertyValue::PathList(paths)
            } else {
                return None;
            }
        },
        Value::Dict(dict) => {
            let mut map = PropertyMap::new();
            for (key, value) in dict.iter() {
                let Value::Str(key) = key else {
                    return None;
                };
                if let Some(value) = convert_value(value) {
                    map.insert(key.to_string(), value);
                }
            }
            PropertyValue::Dict(map)
        },
        _ => return None,
    })
}

// ============================================================
// 通知解码
// ============================================================

fn decode_signal(message: &zbus::Message) -> Option<Signal> {
    let header = message.header();
    if header.message_type() != MessageType::Signal {
        return None;
    }
    let path = ObjectPath::new(header.path()?.as_str()).ok()?;
    let interface = header.interface()?.to_string();
    let member = header.member()?.to_string();
    let payload = decode_payload(message, &interface, &member);
    Some(Signal {
        path,
        interface,
        member,
        payload,
    })
}

type InterfacesAddedBody = (
    OwnedObjectPath,
    HashMap<String, HashMap<String, OwnedValue>>,
);

fn decode_payload(message: &zbus::Message, interface: &str, member: &str) -> SignalPayload {
    let body = message.body();
    let decoded = match (interface, member) {
        (OBJECT_MANAGER_INTERFACE, INTERFACES_ADDED) => body
            .deserialize::<InterfacesAddedBody>()
            .map_err(|e| e.to_string())
            .and_then(|(object, interfaces)| {
                let object = ObjectPath::new(object.as_str()).map_err(|e| e.to_string())?;
                let interfaces = interfaces
                    .iter()
                    .map(|(name, props)| (name.clone(), convert_props(props)))
                    .collect();
                Ok(SignalPayload::InterfacesAdded { object, interfaces })
            }),
        (OBJECT_MANAGER_INTERFACE, INTERFACES_REMOVED) => body
            .deserialize::<(OwnedObjectPath, Vec<String>)>()
            .map_err(|e| e.to_string())
            .and_then(|(object, interfaces)| {
                let object = ObjectPath::new(object.as_str()).map_err(|e| e.to_string())?;
                Ok(SignalPayload::InterfacesRemoved { object, interfaces })
            }),
        (PROPERTIES_INTERFACE, PROPERTIES_CHANGED) => body
            .deserialize::<(String, HashMap<String, OwnedValue>, Vec<String>)>()
            .map_err(|e| e.to_string())
            .map(|(interface, changed, invalidated)| SignalPayload::PropertiesChanged {
                interface,
                changed: convert_props(&changed),
                invalidated,
            }),
        _ => Ok(SignalPayload::Other),
    };
    decoded.unwrap_or_else(|e| {
        warn!("Failed to decode {}.{} body: {}", interface, member, e);
        SignalPayload::Other
    })
}
