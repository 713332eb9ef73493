//! 广播网关
//!
//! 每个连接对应一个出站 mpsc 队列，由该连接的写任务负责编码发送。
//! 投递是尽力而为：某个连接的队列已满或已关闭只影响它自己。

use std::collections::HashMap;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use protocol::{ConnectionId, PuzzleSnapshot, RosterEntry, ServerMessage};

/// 广播网关
pub struct BroadcastGateway {
    /// 连接句柄 -> 出站队列
    connections: RwLock<HashMap<ConnectionId, mpsc::Sender<ServerMessage>>>,
}

impl BroadcastGateway {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// 登记连接的出站队列
    pub async fn register(&self, id: ConnectionId, tx: mpsc::Sender<ServerMessage>) {
        self.connections.write().await.insert(id, tx);
    }

    /// 注销连接，返回是否存在
    ///
    /// 丢弃发送端后，写任务读完剩余消息即退出。
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        self.connections.write().await.remove(&id).is_some()
    }

    /// 已登记的连接数
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// 单播
    pub async fn send_to(&self, id: ConnectionId, msg: ServerMessage) -> bool {
        let tx = self.connections.read().await.get(&id).cloned();
        match tx {
            Some(tx) => deliver(id, &tx, msg),
            None => {
                debug!(connection_id = id, "连接不存在，丢弃消息");
                false
            }
        }
    }

    /// 向单个连接发送完整拼图状态
    pub async fn send_snapshot_to(&self, id: ConnectionId, snapshot: PuzzleSnapshot) -> bool {
        self.send_to(id, ServerMessage::PuzzleState { snapshot }).await
    }

    /// 广播给所有连接（包括发起者），返回成功投递的数量
    pub async fn broadcast(&self, msg: ServerMessage) -> usize {
        // 先复制发送端再释放锁，慢连接不会阻塞注册/注销
        let recipients: Vec<(ConnectionId, mpsc::Sender<ServerMessage>)> = self
            .connections
            .read()
            .await
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        recipients
            .iter()
            .filter(|(id, tx)| deliver(*id, tx, msg.clone()))
            .count()
    }

    /// 广播拼图更新
    pub async fn broadcast_state(&self, snapshot: PuzzleSnapshot) -> usize {
        self.broadcast(ServerMessage::PuzzleUpdated { snapshot }).await
    }

    /// 广播成员名单
    pub async fn broadcast_roster(&self, members: Vec<RosterEntry>) -> usize {
        self.broadcast(ServerMessage::Roster { members }).await
    }
}

impl Default for BroadcastGateway {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver(id: ConnectionId, tx: &mpsc::Sender<ServerMessage>, msg: ServerMessage) -> bool {
    match tx.try_send(msg) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(connection_id = id, "出站队列已满，丢弃消息");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!(connection_id = id, "连接已关闭，丢弃消息");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_snapshot(version: u64) -> PuzzleSnapshot {
        PuzzleSnapshot {
            version,
            grid_size: 0,
            pieces: Vec::new(),
            solved: true,
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let gateway = BroadcastGateway::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        gateway.register(1, tx1).await;
        gateway.register(2, tx2).await;

        assert_eq!(gateway.broadcast_state(empty_snapshot(3)).await, 2);

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await {
                Some(ServerMessage::PuzzleUpdated { snapshot }) => assert_eq!(snapshot.version, 3),
                other => panic!("Unexpected message: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_closed_recipient_does_not_block_others() {
        let gateway = BroadcastGateway::new();
        let (tx1, rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        gateway.register(1, tx1).await;
        gateway.register(2, tx2).await;
        drop(rx1);

        assert_eq!(gateway.broadcast_roster(Vec::new()).await, 1);
        assert!(matches!(rx2.recv().await, Some(ServerMessage::Roster { .. })));
    }

    #[tokio::test]
    async fn test_full_queue_is_skipped() {
        let gateway = BroadcastGateway::new();
        let (tx1, mut rx1) = mpsc::channel(1);
        let (tx2, mut rx2) = mpsc::channel(4);
        gateway.register(1, tx1).await;
        gateway.register(2, tx2).await;

        assert_eq!(gateway.broadcast(ServerMessage::Pong).await, 2);
        assert_eq!(gateway.broadcast(ServerMessage::Pong).await, 1);

        assert!(rx1.recv().await.is_some());
        assert!(rx1.try_recv().is_err());
        assert!(rx2.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_unicast() {
        let gateway = BroadcastGateway::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        gateway.register(1, tx1).await;
        gateway.register(2, tx2).await;

        assert!(gateway.send_snapshot_to(2, empty_snapshot(0)).await);
        assert!(!gateway.send_to(3, ServerMessage::Pong).await);

        assert!(matches!(rx2.recv().await, Some(ServerMessage::PuzzleState { .. })));
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister() {
        let gateway = BroadcastGateway::new();
        let (tx, _rx) = mpsc::channel(4);
        gateway.register(1, tx).await;

        assert!(gateway.unregister(1).await);
        assert!(!gateway.unregister(1).await);
        assert!(gateway.is_empty().await);
    }
}
