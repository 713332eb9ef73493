//! 服务端配置
//!
//! 先读取 `PUZZLE_SERVER_CONFIG` 指向的 JSON 文件（可选），再用环境变量覆盖。

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use protocol::{NetworkConfig, DEFAULT_GRID_SIZE, MAX_CONNECTIONS, MAX_GRID_SIZE, OUTBOUND_BUFFER};

/// 配置文件路径环境变量
pub const CONFIG_PATH_ENV: &str = "PUZZLE_SERVER_CONFIG";

/// 服务端配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub network: NetworkConfig,
    /// 拼图边长
    pub grid_size: u32,
    /// 最大同时连接数
    pub max_connections: usize,
    /// 每个连接的出站队列容量
    pub outbound_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            grid_size: DEFAULT_GRID_SIZE,
            max_connections: MAX_CONNECTIONS,
            outbound_buffer: OUTBOUND_BUFFER,
        }
    }
}

impl ServerConfig {
    /// 从环境加载配置
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// 从 JSON 文件读取，缺省字段使用默认值
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件: {:?}", path))?;
        serde_json::from_str(&content).with_context(|| format!("配置文件格式错误: {:?}", path))
    }

    /// 按 `lookup` 提供的值覆盖配置
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("PUZZLE_SERVER_HOST") {
            self.network.host = host;
        }
        if let Some(port) = lookup("PUZZLE_SERVER_PORT") {
            self.network.port = port
                .parse()
                .with_context(|| format!("PUZZLE_SERVER_PORT 无效: {}", port))?;
        }
        if let Some(size) = lookup("PUZZLE_GRID_SIZE") {
            self.grid_size = size
                .parse()
                .with_context(|| format!("PUZZLE_GRID_SIZE 无效: {}", size))?;
        }
        Ok(())
    }

    /// 检查配置取值
    pub fn validate(&self) -> Result<()> {
        if self.grid_size == 0 || self.grid_size > MAX_GRID_SIZE {
            bail!("grid_size 必须在 1..={} 之间，当前为 {}", MAX_GRID_SIZE, self.grid_size);
        }
        if self.max_connections == 0 {
            bail!("max_connections 不能为 0");
        }
        if self.outbound_buffer == 0 {
            bail!("outbound_buffer 不能为 0");
        }
        Ok(())
    }

    /// 监听地址
    pub fn bind_addr(&self) -> String {
        self.network.addr()
    }
}
