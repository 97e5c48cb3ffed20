//! 发现命令
//!
//! 扫描直到出现广播了全部 UUID 的设备；Ctrl-C 取消扫描并清理订阅。

use crate::commands::device::write_summary;
use anyhow::{Context, Result};
use ble_sdk::Connection;
use clap::Args;
use crossbeam_channel::Receiver;
use std::io::Write;
use std::time::Duration;
use tracing::info;

/// 发现命令参数
#[derive(Args, Debug)]
pub struct DiscoverCommand {
    /// 超时（秒），0 表示无限等待；未指定时使用配置文件
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// 要求广播的服务 UUID（可重复）
    #[arg(short, long)]
    pub uuid: Vec<String>,
}

impl DiscoverCommand {
    /// 安装 Ctrl-C 处理并执行
    pub fn execute(&self, conn: &Connection, default_timeout: u64, out: &mut impl Write) -> Result<()> {
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded(1);
        ctrlc::set_handler(move || {
            let _ = cancel_tx.try_send(());
        })
        .context("failed to install Ctrl-C handler")?;

        self.run(conn, default_timeout, &cancel_rx, out)
    }

    fn run(
        &self,
        conn: &Connection,
        default_timeout: u64,
        cancel: &Receiver<()>,
        out: &mut impl Write,
    ) -> Result<()> {
        let timeout = Duration::from_secs(self.timeout.unwrap_or(default_timeout));
        info!("discovering {:?} (timeout {:?})", self.uuid, timeout);

        let device = conn
            .discover_until(timeout, &self.uuid, cancel)
            .with_context(|| format!("discovery of {:?} failed", self.uuid))?;
        write_summary(&device, out)
    }
}
