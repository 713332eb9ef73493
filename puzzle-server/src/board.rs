//! 拼块注册表
//!
//! 持有全部拼块及其正确/当前位置，并维护"格子 -> 拼块"的直接索引。
//! 拼块 ID 与其在 `pieces` 中的下标相同，因此按 ID 查找也是直接索引。

use rand::seq::SliceRandom;
use rand::Rng;

use protocol::{Piece, PieceId, PieceState, Position, PuzzleSnapshot};

/// 拼块注册表
#[derive(Debug, Clone)]
pub struct PieceRegistry {
    grid_size: u32,
    /// 下标即拼块 ID
    pieces: Vec<Piece>,
    /// 格子索引 (y * grid_size + x) -> 占据该格的拼块 ID
    occupants: Vec<PieceId>,
}

impl PieceRegistry {
    /// 构建 `grid_size × grid_size` 个处于正确位置的拼块
    pub fn initialize(grid_size: u32) -> Self {
        let count = grid_size as usize * grid_size as usize;
        let pieces: Vec<Piece> = (0..count)
            .map(|index| Piece::new(index as PieceId, Position::from_index(index, grid_size)))
            .collect();
        let occupants = (0..count).map(|index| index as PieceId).collect();

        Self {
            grid_size,
            pieces,
            occupants,
        }
    }

    /// 网格边长
    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }

    /// 拼块数量
    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    /// 全部拼块（按 ID 排序）
    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }

    /// 按 ID 获取拼块
    pub fn get(&self, id: PieceId) -> Option<&Piece> {
        self.pieces.get(id as usize)
    }

    /// 获取占据指定格子的拼块 ID（越界返回 None）
    pub fn piece_at(&self, pos: Position) -> Option<PieceId> {
        pos.to_index(self.grid_size)
            .and_then(|index| self.occupants.get(index).copied())
    }

    /// 互换两个拼块的当前位置，任一 ID 不存在时返回 false 且不做修改
    pub fn swap(&mut self, a: PieceId, b: PieceId) -> bool {
        let (ia, ib) = (a as usize, b as usize);
        if ia >= self.pieces.len() || ib >= self.pieces.len() {
            return false;
        }

        let pos_a = self.pieces[ia].current;
        let pos_b = self.pieces[ib].current;
        self.pieces[ia].current = pos_b;
        self.pieces[ib].current = pos_a;

        let cell_a = self.cell_index(pos_a);
        let cell_b = self.cell_index(pos_b);
        self.occupants[cell_a] = b;
        self.occupants[cell_b] = a;
        true
    }

    /// 用线程本地随机数打乱
    pub fn shuffle(&mut self) {
        self.shuffle_with(&mut rand::thread_rng());
    }

    /// 打乱：对全部格子做均匀随机排列，再依次分配给拼块
    ///
    /// 可能碰巧得到已完成状态，不做特殊处理。
    pub fn shuffle_with<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let mut cells: Vec<Position> = (0..self.pieces.len())
            .map(|index| Position::from_index(index, self.grid_size))
            .collect();
        cells.shuffle(rng);

        for (piece, cell) in self.pieces.iter_mut().zip(cells) {
            piece.current = cell;
        }
        self.rebuild_occupants();
    }

    /// 复原：所有拼块回到正确位置
    pub fn reset(&mut self) {
        for piece in &mut self.pieces {
            piece.current = piece.correct;
        }
        self.rebuild_occupants();
    }

    /// 全部拼块都在正确位置
    pub fn is_solved(&self) -> bool {
        self.pieces.iter().all(Piece::is_placed_correctly)
    }

    /// 生成不可变快照
    pub fn snapshot(&self, version: u64) -> PuzzleSnapshot {
        PuzzleSnapshot {
            version,
            grid_size: self.grid_size,
            pieces: self.pieces.iter().map(PieceState::from).collect(),
            solved: self.is_solved(),
        }
    }

    /// 内部位置总在网格内
    fn cell_index(&self, pos: Position) -> usize {
        pos.y as usize * self.grid_size as usize + pos.x as usize
    }

    fn rebuild_occupants(&mut self) {
        for index in 0..self.pieces.len() {
            let cell = self.cell_index(self.pieces[index].current);
            self.occupants[cell] = self.pieces[index].id;
        }
    }
}
