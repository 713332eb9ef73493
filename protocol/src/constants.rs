//! 协议常量定义

use std::time::Duration;

/// 协议版本号
pub const PROTOCOL_VERSION: u8 = 1;

/// 默认拼图边长（N×N）
pub const DEFAULT_GRID_SIZE: u32 = 4;

/// 拼图边长上限，保证完整快照能放进一帧
pub const MAX_GRID_SIZE: u32 = 50;

/// 显示名最大长度（字符数），超出部分截断
pub const MAX_DISPLAY_NAME_LEN: usize = 32;

/// 消息帧最大大小
pub const MAX_FRAME_SIZE: usize = 65536;

/// 服务端最大连接数
pub const MAX_CONNECTIONS: usize = 100;

/// 每个连接的出站消息队列容量
pub const OUTBOUND_BUFFER: usize = 64;

/// 默认监听端口
pub const DEFAULT_PORT: u16 = 9527;

/// 连接超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// 连接超时 Duration
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(CONNECT_TIMEOUT_SECS);
