//! 消息类型定义

use serde::{Deserialize, Serialize};

use crate::piece::PieceId;
use crate::snapshot::{PuzzleSnapshot, RosterEntry};

/// 连接句柄，由传输层为每个存活连接分配
pub type ConnectionId = u64;

/// 客户端发送给服务端的消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    // === 会话 ===
    /// 以显示名加入名单
    Join { display_name: String },

    // === 拼图操作 ===
    /// 把拼块拖到目标格子，与该格子上的拼块互换
    MovePiece {
        piece_id: PieceId,
        target_x: u32,
        target_y: u32,
    },
    /// 打乱
    Shuffle,
    /// 复原
    Reset,

    // === 其他 ===
    /// 查询服务器信息
    GetInfo,
    /// 心跳请求
    Ping,
}

/// 服务端发送给客户端的消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    /// 完整拼图状态（单播：连接建立或加入时）
    PuzzleState { snapshot: PuzzleSnapshot },
    /// 拼图已更新（广播，包括发起者本人）
    PuzzleUpdated { snapshot: PuzzleSnapshot },
    /// 成员名单变化（广播）
    Roster { members: Vec<RosterEntry> },
    /// 服务器信息
    ServerInfo {
        grid_size: u32,
        online: u32,
        named: u32,
        version: u64,
        solved: bool,
    },
    /// 心跳响应
    Pong,
    /// 错误消息
    Error { code: ErrorCode, message: String },
}

/// 错误码定义
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    /// 已加入
    AlreadyJoined = 300,
    /// 服务器已满
    ServerFull = 503,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_message_serialize() {
        let msg = ClientMessage::MovePiece {
            piece_id: 7,
            target_x: 2,
            target_y: 3,
        };
        let bytes = bincode::serialize(&msg).unwrap();
        let decoded: ClientMessage = bincode::deserialize(&bytes).unwrap();

        match decoded {
            ClientMessage::MovePiece {
                piece_id,
                target_x,
                target_y,
            } => assert_eq!((piece_id, target_x, target_y), (7, 2, 3)),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_roster_message_serialize() {
        let msg = ServerMessage::Roster {
            members: vec![RosterEntry {
                connection_id: 42,
                display_name: "alice".to_string(),
                joined_at: chrono::Utc::now(),
            }],
        };
        let bytes = bincode::serialize(&msg).unwrap();
        let decoded: ServerMessage = bincode::deserialize(&bytes).unwrap();

        match decoded {
            ServerMessage::Roster { members } => {
                assert_eq!(members.len(), 1);
                assert_eq!(members[0].connection_id, 42);
                assert_eq!(members[0].display_name, "alice");
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::AlreadyJoined.to_string(), "AlreadyJoined");
    }
}
