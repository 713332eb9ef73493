//! 拼图状态机
//!
//! 拼块注册表的唯一修改者。所有修改都在同一把锁内完成，互相严格串行，
//! 返回的快照也在持锁期间生成，广播时不会看到修改到一半的状态。

use tokio::sync::Mutex;
use tracing::debug;

use protocol::{PieceId, Position, PuzzleError, PuzzleSnapshot};

use crate::board::PieceRegistry;

/// 一次成功移动的结果
#[derive(Debug, Clone)]
pub struct MoveOutcome {
    /// 移动后的完整快照
    pub snapshot: PuzzleSnapshot,
    /// 与被拖动拼块互换位置的拼块
    pub swapped_with: PieceId,
    pub solved: bool,
}

struct PuzzleBoard {
    registry: PieceRegistry,
    /// 已提交的修改次数
    version: u64,
}

impl PuzzleBoard {
    fn commit(&mut self) -> PuzzleSnapshot {
        self.version += 1;
        self.registry.snapshot(self.version)
    }
}

/// 拼图状态机
pub struct PuzzleStateMachine {
    grid_size: u32,
    board: Mutex<PuzzleBoard>,
}

impl PuzzleStateMachine {
    /// 用已构建好的注册表创建（版本号从 0 开始）
    pub fn new(registry: PieceRegistry) -> Self {
        Self {
            grid_size: registry.grid_size(),
            board: Mutex::new(PuzzleBoard {
                registry,
                version: 0,
            }),
        }
    }

    /// 构建并打乱一次，在任何客户端连接之前调用
    pub fn initialize(grid_size: u32) -> Self {
        let mut registry = PieceRegistry::initialize(grid_size);
        registry.shuffle();
        Self::new(registry)
    }

    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }

    /// 把拼块拖到目标格子，与该格上的拼块互换
    ///
    /// 被拖动的拼块不存在或目标格子没有拼块时返回 NotFound 类错误，状态不变。
    pub async fn move_piece(
        &self,
        dragged_id: PieceId,
        target_x: u32,
        target_y: u32,
    ) -> Result<MoveOutcome, PuzzleError> {
        let mut board = self.board.lock().await;

        if board.registry.get(dragged_id).is_none() {
            return Err(PuzzleError::PieceNotFound { id: dragged_id });
        }
        let target_id = board
            .registry
            .piece_at(Position::new(target_x, target_y))
            .ok_or(PuzzleError::CellEmpty {
                x: target_x,
                y: target_y,
            })?;

        board.registry.swap(dragged_id, target_id);
        let snapshot = board.commit();
        debug!(
            dragged_id,
            target_id,
            version = snapshot.version,
            "拼块已互换"
        );

        Ok(MoveOutcome {
            solved: snapshot.solved,
            swapped_with: target_id,
            snapshot,
        })
    }

    /// 打乱全部拼块
    pub async fn shuffle_puzzle(&self) -> PuzzleSnapshot {
        let mut board = self.board.lock().await;
        board.registry.shuffle();
        board.commit()
    }

    /// 复原全部拼块
    pub async fn reset_puzzle(&self) -> PuzzleSnapshot {
        let mut board = self.board.lock().await;
        board.registry.reset();
        board.commit()
    }

    /// 当前状态的快照（不修改版本号）
    pub async fn snapshot(&self) -> PuzzleSnapshot {
        let board = self.board.lock().await;
        board.registry.snapshot(board.version)
    }
}
