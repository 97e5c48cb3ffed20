//! 配置管理命令
//!
//! 配置文件位于 `<config_dir>/ble/config.toml`：
//!
//! ```toml
//! bus = "system"          # system | session | <D-Bus 地址>
//! adapter = "hci0"
//! timeout_secs = 10
//! ```

use anyhow::{Context, Result, bail};
use ble_sdk::BusKind;
use clap::Subcommand;
use std::fs;
use std::path::{Path, PathBuf};

/// 未配置时的发现超时
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// 配置文件路径
fn config_dir() -> Result<PathBuf> {
    let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("cannot determine config directory"))?;

    path.push("ble");
    Ok(path)
}

pub fn config_file() -> Result<PathBuf> {
    let mut path = config_dir()?;
    path.push("config.toml");
    Ok(path)
}

/// CLI 配置
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CliConfig {
    /// 总线：`system`、`session` 或 D-Bus 地址
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bus: Option<String>,

    /// 默认适配器（例如 `hci0`）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapter: Option<String>,

    /// 发现超时（秒），0 表示无限等待
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl CliConfig {
    /// 从默认位置加载配置（文件不存在时为默认配置）
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("failed to create config directory")?;
        }
        let content = format!(
            "# BLE CLI Configuration\n\n{}",
            toml::to_string(self).context("failed to serialize config")?
        );
        fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;

        Ok(())
    }

    /// 解析 `bus` 配置项
    pub fn bus_kind(&self) -> Result<BusKind> {
        parse_bus(self.bus.as_deref().unwrap_or("system"))
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)
    }
}

/// `system` / `session` / D-Bus 地址（形如 `unix:path=...`）
pub fn parse_bus(value: &str) -> Result<BusKind> {
    match value {
        "system" => Ok(BusKind::System),
        "session" => Ok(BusKind::Session),
        address if address.contains(':') => Ok(BusKind::Address(address.to_string())),
        other => bail!("invalid bus {:?}: expected system, session or a D-Bus address", other),
    }
}

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 设置配置项
    Set {
        /// 总线（system / session / D-Bus 地址）
        #[arg(short, long)]
        bus: Option<String>,

        /// 默认适配器（如 hci0）
        #[arg(short, long)]
        adapter: Option<String>,

        /// 默认发现超时（秒）
        #[arg(short, long)]
        timeout_secs: Option<u64>,
    },

    /// 获取配置项
    Get {
        /// 配置项名称
        #[arg(default_value = "all")]
        key: String,
    },

    /// 检查配置
    Check,
}

impl ConfigCommand {
    pub fn execute(self) -> Result<()> {
        let path = config_file()?;
        self.execute_at(&path)
    }

    fn execute_at(self, path: &Path) -> Result<()> {
        match self {
            ConfigCommand::Set {
                bus,
                adapter,
                timeout_secs,
            } => Self::set_(path, bus, adapter, timeout_secs),

            ConfigCommand::Get { key } => Self::get_(path, &key),

            ConfigCommand::Check => Self::check_(path),
        }
    }

    fn set_(
        path: &Path,
        bus: Option<String>,
        adapter: Option<String>,
        timeout_secs: Option<u64>,
    ) -> Result<()> {
        let mut config = CliConfig::load_from(path)?;

        if let Some(bus) = bus {
            parse_bus(&bus)?;
            println!("✅ bus = {}", bus);
            config.bus = Some(bus);
        }

        if let Some(adapter) = adapter {
            println!("✅ adapter = {}", adapter);
            config.adapter = Some(adapter);
        }

        if let Some(secs) = timeout_secs {
            println!("✅ timeout_secs = {}", secs);
            config.timeout_secs = Some(secs);
        }

        config.save_to(path)?;
        Ok(())
    }

    fn get_(path: &Path, key: &str) -> Result<()> {
        let config = CliConfig::load_from(path)?;

        match key {
            "bus" => println!("{}", config.bus.as_deref().unwrap_or("(unset)")),

            "adapter" => println!("{}", config.adapter.as_deref().unwrap_or("(unset)")),

            "timeout_secs" => println!("{}", config.timeout_secs()),

            "all" => {
                println!("BLE CLI config:");
                println!("  bus: {:?}", config.bus);
                println!("  adapter: {:?}", config.adapter);
                println!("  timeout_secs: {:?}", config.timeout_secs);
            },

            other => bail!("unknown config key {:?}", other),
        }

        Ok(())
    }

    fn check_(path: &Path) -> Result<()> {
        let config = CliConfig::load_from(path)?;
        let bus = config.bus_kind()?;

        println!("Config file: {}", path.display());
        println!("  bus: {:?}", bus);
        println!("  adapter: {}", config.adapter.as_deref().unwrap_or("(first)"));
        println!("  timeout_secs: {}", config.timeout_secs());

        Ok(())
    }
}
