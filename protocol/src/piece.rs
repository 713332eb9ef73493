//! 拼块定义

use serde::{Deserialize, Serialize};

/// 拼块 ID，范围 `[0, N*N)`
pub type PieceId = u32;

/// 网格位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    /// 列
    pub x: u32,
    /// 行
    pub y: u32,
}

impl Position {
    /// 创建新位置
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// 检查位置是否在 `grid_size × grid_size` 网格内
    pub fn is_within(&self, grid_size: u32) -> bool {
        self.x < grid_size && self.y < grid_size
    }

    /// 转换为行优先的格子索引（越界返回 None）
    pub fn to_index(&self, grid_size: u32) -> Option<usize> {
        if self.is_within(grid_size) {
            Some(self.y as usize * grid_size as usize + self.x as usize)
        } else {
            None
        }
    }

    /// 从行优先的格子索引还原位置
    pub fn from_index(index: usize, grid_size: u32) -> Self {
        let n = grid_size.max(1) as usize;
        Self {
            x: (index % n) as u32,
            y: (index / n) as u32,
        }
    }
}

/// 拼块
///
/// `correct` 构造后不再变化；`current` 只会在两个拼块之间互换。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Piece {
    pub id: PieceId,
    /// 正确位置
    pub correct: Position,
    /// 当前位置
    pub current: Position,
}

impl Piece {
    /// 创建位于正确位置的拼块
    pub fn new(id: PieceId, correct: Position) -> Self {
        Self {
            id,
            correct,
            current: correct,
        }
    }

    /// 是否已放在正确位置
    pub fn is_placed_correctly(&self) -> bool {
        self.current == self.correct
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_index() {
        let pos = Position::new(2, 1);
        assert_eq!(pos.to_index(4), Some(6));
        assert_eq!(Position::from_index(6, 4), pos);
    }

    #[test]
    fn test_position_out_of_grid() {
        assert!(!Position::new(4, 0).is_within(4));
        assert!(!Position::new(0, 4).is_within(4));
        assert_eq!(Position::new(4, 0).to_index(4), None);
    }

    #[test]
    fn test_placed_correctly_follows_current() {
        let mut piece = Piece::new(5, Position::new(1, 1));
        assert!(piece.is_placed_correctly());

        piece.current = Position::new(0, 1);
        assert!(!piece.is_placed_correctly());
    }
}
