//! 动态类型属性值
//!
//! 远端属性包中的值是异构的，这里用 tagged union 表示，
//! 并提供 `as_*` 访问器：类型不符时返回 `None`，由上层决定是失败还是降级。

use crate::path::ObjectPath;
use std::collections::BTreeMap;
use std::fmt;

/// 属性名 → 属性值
///
/// 使用 `BTreeMap` 保证打印和比较时顺序稳定。
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// 接口名 → 属性表
pub type InterfaceMap = BTreeMap<String, PropertyMap>;

/// 属性值（tagged union）
///
/// 覆盖 BlueZ 属性实际用到的 D-Bus 类型：
///
/// | 变体 | D-Bus 签名 |
/// |------|-----------|
/// | `Str` | `s` |
/// | `Bool` | `b` |
/// | `Byte` | `y` |
/// | `Int16` / `UInt16` | `n` / `q` |
/// | `Int32` / `UInt32` | `i` / `u` |
/// | `Path` | `o` |
/// | `StrList` | `as` |
/// | `PathList` | `ao` |
/// | `Bytes` | `ay` |
/// | `Dict` | `a{sv}` |
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum PropertyValue {
    Str(String),
    Bool(bool),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Path(ObjectPath),
    StrList(Vec<String>),
    PathList(Vec<ObjectPath>),
    Bytes(Vec<u8>),
    Dict(PropertyMap),
}

impl PropertyValue {
    /// 类型名（用于诊断信息）
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::Str(_) => "string",
            PropertyValue::Bool(_) => "bool",
            PropertyValue::Byte(_) => "byte",
            PropertyValue::Int16(_) => "int16",
            PropertyValue::UInt16(_) => "uint16",
            PropertyValue::Int32(_) => "int32",
            PropertyValue::UInt32(_) => "uint32",
            PropertyValue::Path(_) => "object path",
            PropertyValue::StrList(_) => "string array",
            PropertyValue::PathList(_) => "object path array",
            PropertyValue::Bytes(_) => "byte array",
            PropertyValue::Dict(_) => "dict",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i16(&self) -> Option<i16> {
        match self {
            PropertyValue::Int16(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&ObjectPath> {
        match self {
            PropertyValue::Path(p) => Some(p),
            _ => None,
        }
    }

    /// 字符串数组
    ///
    /// 空数组在部分后端上无法区分元素类型，因此空的 `PathList` 也按空字符串数组处理。
    pub fn as_str_list(&self) -> Option<&[String]> {
        match self {
            PropertyValue::StrList(list) => Some(list),
            PropertyValue::PathList(list) if list.is_empty() => Some(&[]),
            _ => None,
        }
    }

    pub fn as_path_list(&self) -> Option<&[ObjectPath]> {
        match self {
            PropertyValue::PathList(list) => Some(list),
            PropertyValue::StrList(list) if list.is_empty() => Some(&[]),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PropertyValue::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&PropertyMap> {
        match self {
            PropertyValue::Dict(dict) => Some(dict),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Str(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Str(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i16> for PropertyValue {
    fn from(value: i16) -> Self {
        PropertyValue::Int16(value)
    }
}

impl From<ObjectPath> for PropertyValue {
    fn from(value: ObjectPath) -> Self {
        PropertyValue::Path(value)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(value: Vec<String>) -> Self {
        PropertyValue::StrList(value)
    }
}

impl From<Vec<ObjectPath>> for PropertyValue {
    fn from(value: Vec<ObjectPath>) -> Self {
        PropertyValue::PathList(value)
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(value: Vec<u8>) -> Self {
        PropertyValue::Bytes(value)
    }
}

impl From<PropertyMap> for PropertyValue {
    fn from(value: PropertyMap) -> Self {
        PropertyValue::Dict(value)
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Str(s) => write!(f, "{:?}", s),
            PropertyValue::Bool(b) => write!(f, "{}", b),
            PropertyValue::Byte(v) => write!(f, "0x{:02x}", v),
            PropertyValue::Int16(v) => write!(f, "{}", v),
            PropertyValue::UInt16(v) => write!(f, "{}", v),
            PropertyValue::Int32(v) => write!(f, "{}", v),
            PropertyValue::UInt32(v) => write!(f, "{}", v),
            PropertyValue::Path(p) => write!(f, "{}", p),
            PropertyValue::StrList(list) => write!(f, "{:?}", list),
            PropertyValue::PathList(list) => {
                let items: Vec<&str> = list.iter().map(ObjectPath::as_str).collect();
                write!(f, "[{}]", items.join(", "))
            },
            PropertyValue::Bytes(bytes) => {
                f.write_str("[")?;
                for (i, b) in bytes.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{:02x}", b)?;
                }
                f.write_str("]")
            },
            PropertyValue::Dict(dict) => {
                f.write_str("{")?;
                for (i, (k, v)) in dict.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            },
        }
    }
}
