//! One-shot 会话：按配置文件和命令行参数建立连接

use crate::commands::config::{CliConfig, parse_bus};
use anyhow::{Context, Result};
use ble_sdk::{Connection, ConnectionBuilder};
use clap::Args;
use tracing::debug;

/// 所有子命令共享的连接参数（覆盖配置文件）
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectArgs {
    /// 总线（system / session / D-Bus 地址）
    #[arg(long)]
    pub bus: Option<String>,

    /// 适配器（如 hci0）
    #[arg(long)]
    pub adapter: Option<String>,
}

impl ConnectArgs {
    /// 命令行参数优先，其次是配置文件
    pub fn builder(&self, config: &CliConfig) -> Result<ConnectionBuilder> {
        let bus = match &self.bus {
            Some(bus) => parse_bus(bus)?,
            None => config.bus_kind()?,
        };
        let mut builder = ConnectionBuilder::new().bus(bus);
        if let Some(adapter) = self.adapter.as_ref().or(config.adapter.as_ref()) {
            builder = builder.adapter(adapter.clone());
        }
        Ok(builder)
    }

    pub fn connect(&self, config: &CliConfig) -> Result<Connection> {
        let builder = self.builder(config)?;
        debug!("connecting with {:?}", builder.config());
        builder.build().context("failed to connect to the bus")
    }
}
