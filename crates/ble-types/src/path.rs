//! 对象路径
//!
//! 总线对象路径规则：
//! - 以 `/` 开头
//! - 元素只包含 `[A-Za-z0-9_]`，不能为空（即不允许 `//`）
//! - 除根路径 `/` 外不能以 `/` 结尾

use crate::ProtocolError;
use std::borrow::Borrow;
use std::fmt;

/// 对象路径（远端对象的唯一、稳定标识）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "String", into = "String")
)]
pub struct ObjectPath(String);

impl ObjectPath {
    /// 校验并创建对象路径
    ///
    /// # 错误
    /// - `ProtocolError::InvalidObjectPath`: 不符合路径规则
    pub fn new(path: impl Into<String>) -> Result<Self, ProtocolError> {
        let path = path.into();
        if is_valid_path(&path) {
            Ok(Self(path))
        } else {
            Err(ProtocolError::InvalidObjectPath { path })
        }
    }

    /// 根路径 `/`
    pub fn root() -> Self {
        Self("/".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 最后一个路径元素（如 `/org/bluez/hci0` → `hci0`）
    pub fn basename(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }
}

fn is_valid_path(path: &str) -> bool {
    if path == "/" {
        return true;
    }
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    rest.split('/').all(|element| {
        !element.is_empty() && element.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
    })
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ObjectPath {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ObjectPath {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for ObjectPath {
    type Error = ProtocolError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ObjectPath> for String {
    fn from(path: ObjectPath) -> Self {
        path.0
    }
}
