//! 对象转储命令（`objects` / `adapters`）

use anyhow::Result;
use ble_sdk::Connection;
use ble_sdk::driver::RemoteObject;
use clap::Args;
use std::io::Write;
use std::sync::Arc;

/// 转储命令参数
#[derive(Args, Debug)]
pub struct ObjectsCommand {
    /// 以 JSON 输出
    #[arg(long)]
    pub json: bool,
}

impl ObjectsCommand {
    pub fn execute(&self, conn: &Connection, out: &mut impl Write) -> Result<()> {
        if self.json {
            let objects: Vec<Arc<RemoteObject>> = conn.cache().snapshot().iter().cloned().collect();
            write_json(&objects, out)
        } else {
            conn.print(out)?;
            Ok(())
        }
    }
}

/// 只输出适配器
pub fn adapters(conn: &Connection, out: &mut impl Write) -> Result<()> {
    conn.print_adapters(out)?;
    Ok(())
}

fn write_json(objects: &[Arc<RemoteObject>], out: &mut impl Write) -> Result<()> {
    let value: Vec<serde_json::Value> = objects
        .iter()
        .map(|object| {
            serde_json::json!({
                "path": object.path(),
                "interfaces": object.interfaces(),
            })
        })
        .collect();
    serde_json::to_writer_pretty(&mut *out, &value)?;
    writeln!(out)?;
    Ok(())
}
