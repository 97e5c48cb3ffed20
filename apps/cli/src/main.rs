//! # BLE CLI
//!
//! Command-line interface for inspecting the BlueZ object registry.
//!
//! ```bash
//! # 配置默认适配器
//! ble-cli config set --adapter hci0
//!
//! # 转储所有对象 / 适配器
//! ble-cli objects
//! ble-cli adapters
//!
//! # 扫描心率设备，最多 30 秒（Ctrl-C 取消）
//! ble-cli discover --uuid 180d --timeout 30
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io;

mod commands;
mod session;

use commands::config::CliConfig;
use commands::{ConfigCommand, DeviceCommand, DiscoverCommand, ObjectsCommand};
use session::ConnectArgs;

/// BLE CLI - BlueZ 对象注册表命令行工具
#[derive(Parser, Debug)]
#[command(name = "ble-cli")]
#[command(about = "Command-line interface for inspecting and discovering BlueZ objects", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    connect: ConnectArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 转储缓存中的所有对象
    Objects {
        #[command(flatten)]
        args: ObjectsCommand,
    },

    /// 列出适配器
    Adapters,

    /// 在缓存中查找设备
    Device {
        #[command(flatten)]
        args: DeviceCommand,
    },

    /// 扫描直到出现匹配的设备
    Discover {
        #[command(flatten)]
        args: DiscoverCommand,
    },
}

fn main() -> Result<()> {
    // 初始化日志
    ble_sdk::init_logging_with("warn,ble_cli=info,ble_client=info,ble_driver=info");

    let cli = Cli::parse();
    let mut out = io::stdout().lock();

    match cli.command {
        Commands::Config(cmd) => cmd.execute(),

        Commands::Objects { args } => {
            let conn = cli.connect.connect(&CliConfig::load()?)?;
            args.execute(&conn, &mut out)
        },

        Commands::Adapters => {
            let conn = cli.connect.connect(&CliConfig::load()?)?;
            commands::objects::adapters(&conn, &mut out)
        },

        Commands::Device { args } => {
            let conn = cli.connect.connect(&CliConfig::load()?)?;
            args.execute(&conn, &mut out)
        },

        Commands::Discover { args } => {
            let config = CliConfig::load()?;
            let conn = cli.connect.connect(&config)?;
            args.execute(&conn, config.timeout_secs(), &mut out)
        },
    }
}
