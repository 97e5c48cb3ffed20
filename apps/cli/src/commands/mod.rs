//! 命令定义和实现

pub mod config;
pub mod device;
pub mod discover;
pub mod objects;

pub use config::ConfigCommand;
pub use device::DeviceCommand;
pub use discover::DiscoverCommand;
pub use objects::ObjectsCommand;
