//! UUID 校验与匹配
//!
//! 支持三种格式（十六进制，大小写不敏感）：
//! - 16 位短格式：`1800`
//! - 32 位短格式：`0000180d`
//! - 128 位完整格式：`0000180d-0000-1000-8000-00805f9b34fb`
//!
//! 短格式按 Bluetooth Base UUID（`0000xxxx-0000-1000-8000-00805f9b34fb`）展开后再比较，
//! 因此 `"1800"` 与设备广播的 `"00001800-0000-1000-8000-00805F9B34FB"` 视为相同。

use crate::ProtocolError;
use std::collections::HashSet;
use std::fmt;

/// Bluetooth Base UUID 的公共后缀
const BASE_UUID_SUFFIX: &str = "-0000-1000-8000-00805f9b34fb";

/// 128 位格式中 `-` 的位置
const DASH_POSITIONS: [usize; 4] = [8, 13, 18, 23];

/// 检查 UUID 格式是否合法
pub fn is_valid_uuid(uuid: &str) -> bool {
    match uuid.len() {
        4 | 8 => uuid.bytes().all(|b| b.is_ascii_hexdigit()),
        36 => uuid.bytes().enumerate().all(|(i, b)| {
            if DASH_POSITIONS.contains(&i) {
                b == b'-'
            } else {
                b.is_ascii_hexdigit()
            }
        }),
        _ => false,
    }
}

/// 规范化为小写 128 位格式
///
/// # 错误
/// - `ProtocolError::InvalidUuid`: 格式不合法
///
/// # 示例
///
/// ```rust
/// use ble_types::normalize_uuid;
///
/// assert_eq!(
///     normalize_uuid("180D").unwrap(),
///     "0000180d-0000-1000-8000-00805f9b34fb"
/// );
/// ```
pub fn normalize_uuid(uuid: &str) -> Result<String, ProtocolError> {
    if !is_valid_uuid(uuid) {
        return Err(ProtocolError::InvalidUuid {
            uuid: uuid.to_string(),
        });
    }
    let lower = uuid.to_ascii_lowercase();
    Ok(match lower.len() {
        4 => format!("0000{}{}", lower, BASE_UUID_SUFFIX),
        8 => format!("{}{}", lower, BASE_UUID_SUFFIX),
        _ => lower,
    })
}

/// UUID 过滤条件
///
/// 顺序无关、大小写不敏感的必需 UUID 集合。构造时即完成校验，
/// 非法 UUID 直接返回错误，不会进入匹配阶段。
///
/// # 匹配语义
///
/// - 每个必需 UUID 都出现在对象广播的 UUID 集合中 → 匹配
/// - 空过滤条件匹配任何对象
/// - 广播集合中格式非法的 UUID 被忽略
///
/// # 示例
///
/// ```rust
/// use ble_types::UuidFilter;
///
/// let filter = UuidFilter::new(["1800"]).unwrap();
/// assert!(filter.matches(&["1800", "1801"]));
/// assert!(!filter.matches(&["1801"]));
/// assert!(UuidFilter::new(["not-a-uuid"]).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UuidFilter {
    /// 调用方提供的原始字符串（用于诊断信息）
    required: Vec<String>,
    /// 规范化后的 UUID（去重）
    normalized: Vec<String>,
}

impl UuidFilter {
    /// 校验并创建过滤条件
    ///
    /// # 错误
    /// - `ProtocolError::InvalidUuid`: 第一个不合法的 UUID
    pub fn new<I, S>(uuids: I) -> Result<Self, ProtocolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut required = Vec::new();
        let mut normalized = Vec::new();
        for uuid in uuids {
            let uuid = uuid.as_ref();
            let long = normalize_uuid(uuid)?;
            if !normalized.contains(&long) {
                normalized.push(long);
            }
            required.push(uuid.to_string());
        }
        Ok(Self {
            required,
            normalized,
        })
    }

    /// 空过滤条件（匹配任何对象）
    pub fn any() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }

    /// 调用方提供的原始 UUID
    pub fn uuids(&self) -> &[String] {
        &self.required
    }

    /// 规范化后的 UUID（小写 128 位格式）
    pub fn normalized(&self) -> &[String] {
        &self.normalized
    }

    /// 检查广播的 UUID 集合是否满足过滤条件
    pub fn matches<S: AsRef<str>>(&self, advertised: &[S]) -> bool {
        if self.normalized.is_empty() {
            return true;
        }
        let advertised: HashSet<String> = advertised
            .iter()
            .filter_map(|uuid| normalize_uuid(uuid.as_ref()).ok())
            .collect();
        self.normalized.iter().all(|uuid| advertised.contains(uuid))
    }
}

impl fmt::Display for UuidFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.required.join(" "))
    }
}
