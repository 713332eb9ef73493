//! 错误类型定义

use thiserror::Error;

use crate::message::ConnectionId;
use crate::piece::PieceId;

/// 拼图与会话操作错误
///
/// `PieceNotFound` / `CellEmpty` / `SessionNotFound` 说明客户端视图已过期，
/// 服务端静默忽略；`AlreadyJoined` 会回报给调用方，但不断开连接。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PuzzleError {
    /// 拼块不存在
    #[error("No piece with id {id}")]
    PieceNotFound { id: PieceId },

    /// 目标格子上没有拼块
    #[error("No piece at cell ({x}, {y})")]
    CellEmpty { x: u32, y: u32 },

    /// 同一连接重复加入
    #[error("Connection {connection_id} has already joined")]
    AlreadyJoined { connection_id: ConnectionId },

    /// 会话不存在
    #[error("No session for connection {connection_id}")]
    SessionNotFound { connection_id: ConnectionId },
}

impl PuzzleError {
    /// 是否属于"找不到"一类（可安全忽略）
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PuzzleError::PieceNotFound { .. }
                | PuzzleError::CellEmpty { .. }
                | PuzzleError::SessionNotFound { .. }
        )
    }
}

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化错误（bincode）
    #[error("Bincode serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// 协议版本不匹配
    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u8, actual: u8 },

    /// 帧大小超限
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// 连接超时
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,
}

/// 协议操作结果类型
pub type Result<T> = std::result::Result<T, ProtocolError>;
