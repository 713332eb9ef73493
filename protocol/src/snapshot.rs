//! 拼图快照与成员名单
//!
//! 快照是某一时刻全部拼块的不可变副本，用于广播，不会与下一次修改竞争。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::ConnectionId;
use crate::piece::{Piece, PieceId, Position};

/// 快照中的单个拼块
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceState {
    pub id: PieceId,
    pub current_x: u32,
    pub current_y: u32,
    pub correct_x: u32,
    pub correct_y: u32,
    pub placed_correctly: bool,
}

impl PieceState {
    /// 当前位置
    pub fn current(&self) -> Position {
        Position::new(self.current_x, self.current_y)
    }

    /// 正确位置
    pub fn correct(&self) -> Position {
        Position::new(self.correct_x, self.correct_y)
    }
}

impl From<&Piece> for PieceState {
    fn from(piece: &Piece) -> Self {
        Self {
            id: piece.id,
            current_x: piece.current.x,
            current_y: piece.current.y,
            correct_x: piece.correct.x,
            correct_y: piece.correct.y,
            placed_correctly: piece.is_placed_correctly(),
        }
    }
}

/// 拼图快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PuzzleSnapshot {
    /// 状态版本，每次成功修改递增；客户端据此丢弃乱序到达的旧快照
    pub version: u64,
    pub grid_size: u32,
    /// 按 ID 排序
    pub pieces: Vec<PieceState>,
    /// 全部拼块都在正确位置
    pub solved: bool,
}

impl PuzzleSnapshot {
    /// 按 ID 查找拼块
    pub fn piece(&self, id: PieceId) -> Option<&PieceState> {
        self.pieces.get(id as usize).filter(|p| p.id == id)
    }

    /// 查找占据指定格子的拼块
    pub fn piece_at(&self, pos: Position) -> Option<&PieceState> {
        self.pieces.iter().find(|p| p.current() == pos)
    }

    /// 当前位置是否恰好是正确位置的一个排列
    pub fn is_permutation(&self) -> bool {
        let mut current: Vec<Position> = self.pieces.iter().map(PieceState::current).collect();
        let mut correct: Vec<Position> = self.pieces.iter().map(PieceState::correct).collect();
        current.sort_unstable();
        correct.sort_unstable();
        current == correct
    }
}

/// 名单中的一位成员（已命名的会话）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub connection_id: ConnectionId,
    pub display_name: String,
    /// 加入时间
    pub joined_at: DateTime<Utc>,
}
