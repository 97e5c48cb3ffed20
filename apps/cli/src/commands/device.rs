//! 设备查询命令（只读缓存，不扫描）

use anyhow::{Result, bail};
use ble_sdk::prelude::*;
use clap::Args;
use std::io::Write;

/// 设备查询参数
#[derive(Args, Debug)]
pub struct DeviceCommand {
    /// 按名称查找
    #[arg(short, long, conflicts_with = "uuid")]
    pub name: Option<String>,

    /// 要求广播的服务 UUID（可重复）
    #[arg(short, long)]
    pub uuid: Vec<String>,

    /// 列出所有匹配的设备
    #[arg(short, long)]
    pub all: bool,
}

impl DeviceCommand {
    pub fn execute(&self, conn: &Connection, out: &mut impl Write) -> Result<()> {
        let devices = match (&self.name, self.all) {
            (Some(name), _) => vec![conn.get_device_by_name(name)?],
            (None, true) => conn.get_devices(&self.uuid)?,
            (None, false) => vec![conn.get_device(&self.uuid)?],
        };
        if devices.is_empty() {
            bail!("no device advertises {:?}", self.uuid);
        }
        for device in &devices {
            write_summary(device, out)?;
        }
        Ok(())
    }
}

/// 一行摘要：路径、名称、地址、RSSI、UUID
pub fn write_summary(device: &Device, out: &mut impl Write) -> Result<()> {
    let rssi = match device.rssi_opt() {
        Some(rssi) => format!("{} dBm", rssi),
        None => "n/a".to_string(),
    };
    writeln!(
        out,
        "{}  {}  rssi={}  uuids=[{}]",
        device.path(),
        device.name(),
        rssi,
        device.uuids().join(" ")
    )?;
    Ok(())
}
