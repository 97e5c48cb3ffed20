//! 发现流程状态定义
//!
//! 状态机：`Idle → Subscribing → Scanning → (Matched | TimedOut | Failed) → Idle`

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// 发现流程状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DiscoveryState {
    /// 空闲（默认）
    #[default]
    Idle = 0,

    /// 正在建立通知订阅并注册匹配规则
    Subscribing = 1,

    /// 扫描已启动，阻塞等待通知
    Scanning = 2,

    /// 收到第一个匹配的对象
    Matched = 3,

    /// 超时，没有匹配的对象
    TimedOut = 4,

    /// 订阅/启动失败、连接断开或被取消
    Failed = 5,
}

impl DiscoveryState {
    /// 从 u8 转换
    ///
    /// 如果值无效，返回 Idle。
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Subscribing,
            2 => Self::Scanning,
            3 => Self::Matched,
            4 => Self::TimedOut,
            5 => Self::Failed,
            _ => Self::Idle,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// 是否为终止状态（Matched / TimedOut / Failed）
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Matched | Self::TimedOut | Self::Failed)
    }

    /// 是否有发现流程正在进行
    pub fn is_active(self) -> bool {
        matches!(self, Self::Subscribing | Self::Scanning)
    }
}

impl fmt::Display for DiscoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Subscribing => "subscribing",
            Self::Scanning => "scanning",
            Self::Matched => "matched",
            Self::TimedOut => "timed out",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// 发现流程状态（原子版本，用于线程间共享）
///
/// # 示例
///
/// ```rust
/// use ble_driver::state::{AtomicDiscoveryState, DiscoveryState};
/// use std::sync::atomic::Ordering;
///
/// let state = AtomicDiscoveryState::new(DiscoveryState::Idle);
/// state.set(DiscoveryState::Scanning, Ordering::Release);
/// assert_eq!(state.get(Ordering::Acquire), DiscoveryState::Scanning);
/// ```
#[derive(Debug)]
pub struct AtomicDiscoveryState {
    inner: AtomicU8,
}

impl AtomicDiscoveryState {
    pub fn new(state: DiscoveryState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self, ordering: Ordering) -> DiscoveryState {
        DiscoveryState::from_u8(self.inner.load(ordering))
    }

    pub fn set(&self, state: DiscoveryState, ordering: Ordering) {
        self.inner.store(state.as_u8(), ordering);
    }
}

impl Default for AtomicDiscoveryState {
    fn default() -> Self {
        Self::new(DiscoveryState::Idle)
    }
}
