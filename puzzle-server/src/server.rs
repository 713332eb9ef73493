//! 服务器主逻辑

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use protocol::{
    ClientMessage, Connection, ConnectionId, ErrorCode, Listener, PieceId, ProtocolError,
    RosterEntry, ServerMessage, TcpConnection, TcpListener,
};

use crate::config::ServerConfig;
use crate::gateway::BroadcastGateway;
use crate::puzzle::PuzzleStateMachine;
use crate::session::SessionRegistry;

/// 服务器状态
///
/// 在进程启动时显式构建一次，以 `Arc` 共享给所有连接任务。
pub struct ServerState {
    pub config: ServerConfig,
    pub puzzle: PuzzleStateMachine,
    pub sessions: SessionRegistry,
    pub gateway: BroadcastGateway,
    /// 连接句柄生成器
    next_connection_id: AtomicU64,
    /// 连接名额，接受连接时占用，断开后归还
    connection_slots: Arc<Semaphore>,
}

impl ServerState {
    /// 构建并打乱拼图
    pub fn new(config: ServerConfig) -> Self {
        let puzzle = PuzzleStateMachine::initialize(config.grid_size);
        Self::with_puzzle(config, puzzle)
    }

    /// 使用指定的拼图状态机
    pub fn with_puzzle(config: ServerConfig, puzzle: PuzzleStateMachine) -> Self {
        let connection_slots = Arc::new(Semaphore::new(config.max_connections));
        Self {
            config,
            puzzle,
            sessions: SessionRegistry::new(),
            gateway: BroadcastGateway::new(),
            next_connection_id: AtomicU64::new(1),
            connection_slots,
        }
    }

    /// 分配新的连接句柄
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_connection_id.fetch_add(1, Ordering::SeqCst)
    }

    /// 占用一个连接名额，已满时返回 None
    pub fn admit(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.connection_slots).try_acquire_owned().ok()
    }
}

/// 待发送的消息
///
/// 处理过程中先收集，处理结束后统一投递。
struct PendingMessages {
    messages: Vec<(ConnectionId, ServerMessage)>,
    broadcasts: Vec<ServerMessage>,
}

impl PendingMessages {
    fn new() -> Self {
        Self {
            messages: Vec::new(),
            broadcasts: Vec::new(),
        }
    }

    fn send(&mut self, connection_id: ConnectionId, msg: ServerMessage) {
        self.messages.push((connection_id, msg));
    }

    fn broadcast(&mut self, msg: ServerMessage) {
        self.broadcasts.push(msg);
    }

    fn broadcast_roster(&mut self, members: Vec<RosterEntry>) {
        self.broadcast(ServerMessage::Roster { members });
    }

    async fn flush(self, gateway: &BroadcastGateway) {
        for (connection_id, msg) in self.messages {
            gateway.send_to(connection_id, msg).await;
        }
        for msg in self.broadcasts {
            gateway.broadcast(msg).await;
        }
    }
}

/// 消息处理器
pub struct MessageHandler;

impl MessageHandler {
    /// 处理客户端消息，返回需要直接回复给发送者的消息
    pub async fn handle(
        state: &ServerState,
        connection_id: ConnectionId,
        msg: ClientMessage,
    ) -> Option<ServerMessage> {
        let mut pending = PendingMessages::new();

        let result = match msg {
            ClientMessage::Join { display_name } => {
                Self::handle_join(state, &mut pending, connection_id, display_name).await
            }
            ClientMessage::MovePiece {
                piece_id,
                target_x,
                target_y,
            } => {
                Self::handle_move(state, &mut pending, connection_id, piece_id, target_x, target_y)
                    .await
            }
            ClientMessage::Shuffle => Self::handle_shuffle(state, &mut pending, connection_id).await,
            ClientMessage::Reset => Self::handle_reset(state, &mut pending, connection_id).await,
            ClientMessage::GetInfo => Self::handle_info(state).await,
            ClientMessage::Ping => Some(ServerMessage::Pong),
        };

        pending.flush(&state.gateway).await;

        result
    }

    /// 连接建立：登记出站队列、创建未命名会话、单播当前状态
    pub async fn handle_connect(
        state: &ServerState,
        connection_id: ConnectionId,
        tx: mpsc::Sender<ServerMessage>,
    ) {
        state.gateway.register(connection_id, tx).await;
        state.sessions.connect(connection_id).await;

        let snapshot = state.puzzle.snapshot().await;
        state.gateway.send_snapshot_to(connection_id, snapshot).await;
    }

    /// 连接断开：可重复调用，未加入过也没关系
    pub async fn handle_disconnect(state: &ServerState, connection_id: ConnectionId) {
        let mut pending = PendingMessages::new();

        state.gateway.unregister(connection_id).await;

        match state.sessions.leave(connection_id).await {
            Ok(Some(roster)) => {
                info!(connection_id, "成员离开");
                pending.broadcast_roster(roster);
            }
            Ok(None) => {}
            Err(e) if e.is_not_found() => debug!(connection_id, error = %e, "会话已不存在"),
            Err(e) => warn!(connection_id, error = %e, "移除会话失败"),
        }

        pending.flush(&state.gateway).await;
    }

    /// 处理加入
    async fn handle_join(
        state: &ServerState,
        pending: &mut PendingMessages,
        connection_id: ConnectionId,
        display_name: String,
    ) -> Option<ServerMessage> {
        match state.sessions.join(connection_id, &display_name).await {
            Ok(roster) => {
                info!(connection_id, display_name = %display_name, "成员加入");
                let snapshot = state.puzzle.snapshot().await;
                pending.send(connection_id, ServerMessage::PuzzleState { snapshot });
                pending.broadcast_roster(roster);
                None
            }
            Err(e) => {
                warn!(connection_id, error = %e, "加入失败");
                Some(ServerMessage::Error {
                    code: ErrorCode::AlreadyJoined,
                    message: e.to_string(),
                })
            }
        }
    }

    /// 处理移动：拼块或目标格子找不到时静默忽略
    async fn handle_move(
        state: &ServerState,
        pending: &mut PendingMessages,
        connection_id: ConnectionId,
        piece_id: PieceId,
        target_x: u32,
        target_y: u32,
    ) -> Option<ServerMessage> {
        match state.puzzle.move_piece(piece_id, target_x, target_y).await {
            Ok(outcome) => {
                if outcome.solved {
                    info!(connection_id, version = outcome.snapshot.version, "拼图已完成");
                }
                pending.broadcast(ServerMessage::PuzzleUpdated {
                    snapshot: outcome.snapshot,
                });
            }
            Err(e) if e.is_not_found() => debug!(connection_id, error = %e, "忽略无效移动"),
            Err(e) => warn!(connection_id, error = %e, "移动失败"),
        }
        None
    }

    /// 处理打乱
    async fn handle_shuffle(
        state: &ServerState,
        pending: &mut PendingMessages,
        connection_id: ConnectionId,
    ) -> Option<ServerMessage> {
        let snapshot = state.puzzle.shuffle_puzzle().await;
        info!(connection_id, version = snapshot.version, "拼图已打乱");
        pending.broadcast(ServerMessage::PuzzleUpdated { snapshot });
        None
    }

    /// 处理复原
    async fn handle_reset(
        state: &ServerState,
        pending: &mut PendingMessages,
        connection_id: ConnectionId,
    ) -> Option<ServerMessage> {
        let snapshot = state.puzzle.reset_puzzle().await;
        info!(connection_id, version = snapshot.version, "拼图已复原");
        pending.broadcast(ServerMessage::PuzzleUpdated { snapshot });
        None
    }

    /// 处理服务器信息查询
    async fn handle_info(state: &ServerState) -> Option<ServerMessage> {
        let snapshot = state.puzzle.snapshot().await;
        Some(ServerMessage::ServerInfo {
            grid_size: state.puzzle.grid_size(),
            online: state.sessions.online_count().await as u32,
            named: state.sessions.named_count().await as u32,
            version: snapshot.version,
            solved: snapshot.solved,
        })
    }
}

/// 拼图服务器
pub struct PuzzleServer {
    state: Arc<ServerState>,
    listener: TcpListener,
}

impl PuzzleServer {
    /// 绑定监听地址
    pub async fn bind(state: Arc<ServerState>) -> Result<Self> {
        let addr = state.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("无法监听地址: {}", addr))?;
        Ok(Self { state, listener })
    }

    /// 实际监听地址（端口为 0 时由系统分配）
    pub fn local_addr(&self) -> Option<String> {
        self.listener.local_addr()
    }

    /// 持续接受连接，每个连接一个任务
    pub async fn run(mut self) -> Result<()> {
        info!(addr = ?self.local_addr(), grid_size = self.state.config.grid_size, "服务器已启动");

        loop {
            let mut conn = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(ProtocolError::Io(e)) => {
                    error!(error = %e, "接受连接失败");
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "连接初始化失败");
                    continue;
                }
            };

            // 名额在接受时当场占用，不等连接任务登记
            let Some(permit) = self.state.admit() else {
                warn!(peer = ?conn.peer_addr(), "连接数已达上限，拒绝连接");
                let _ = conn
                    .send(&ServerMessage::Error {
                        code: ErrorCode::ServerFull,
                        message: "服务器已满".to_string(),
                    })
                    .await;
                continue;
            };

            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                serve_connection(state, conn).await;
                drop(permit);
            });
        }
    }
}

/// 单个连接的生命周期：读任务在当前任务中运行，写任务单独运行
async fn serve_connection(state: Arc<ServerState>, conn: TcpConnection) {
    let connection_id = state.next_connection_id();
    let peer = conn.peer_addr();
    info!(connection_id, peer = ?peer, "客户端已连接");

    let (mut reader, mut writer) = conn.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.config.outbound_buffer);

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = writer.write_frame(&msg).await {
                debug!(connection_id, error = %e, "写入失败，停止发送");
                break;
            }
        }
    });

    MessageHandler::handle_connect(&state, connection_id, tx).await;

    loop {
        match reader.read_frame::<ClientMessage>().await {
            Ok(msg) => {
                if let Some(reply) = MessageHandler::handle(&state, connection_id, msg).await {
                    state.gateway.send_to(connection_id, reply).await;
                }
            }
            Err(ProtocolError::ConnectionClosed) => break,
            Err(e) => {
                warn!(connection_id, error = %e, "读取消息失败，断开连接");
                break;
            }
        }
    }

    MessageHandler::handle_disconnect(&state, connection_id).await;
    let _ = writer_task.await;
    info!(connection_id, "客户端已断开");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::PieceRegistry;

    fn solved_state() -> ServerState {
        let config = ServerConfig {
            grid_size: 2,
            ..ServerConfig::default()
        };
        ServerState::with_puzzle(config, PuzzleStateMachine::new(PieceRegistry::initialize(2)))
    }

    async fn connect(
        state: &ServerState,
    ) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let id = state.next_connection_id();
        let (tx, rx) = mpsc::channel(16);
        MessageHandler::handle_connect(state, id, tx).await;
        (id, rx)
    }

    #[tokio::test]
    async fn test_connect_sends_snapshot() {
        let state = solved_state();
        let (_id, mut rx) = connect(&state).await;

        match rx.try_recv() {
            Ok(ServerMessage::PuzzleState { snapshot }) => {
                assert_eq!(snapshot.grid_size, 2);
                assert_eq!(snapshot.pieces.len(), 4);
            }
            other => panic!("Unexpected message: {:?}", other),
        }
        assert_eq!(state.sessions.online_count().await, 1);
        assert_eq!(state.sessions.named_count().await, 0);
    }

    #[tokio::test]
    async fn test_join_broadcasts_roster() {
        let state = solved_state();
        let (a, mut rx_a) = connect(&state).await;
        let (_b, mut rx_b) = connect(&state).await;
        rx_a.try_recv().unwrap();
        rx_b.try_recv().unwrap();

        let reply = MessageHandler::handle(
            &state,
            a,
            ClientMessage::Join {
                display_name: "alice".to_string(),
            },
        )
        .await;
        assert!(reply.is_none());

        assert!(matches!(rx_a.try_recv(), Ok(ServerMessage::PuzzleState { .. })));
        match rx_a.try_recv() {
            Ok(ServerMessage::Roster { members }) => assert_eq!(members[0].display_name, "alice"),
            other => panic!("Unexpected message: {:?}", other),
        }
        assert!(matches!(rx_b.try_recv(), Ok(ServerMessage::Roster { .. })));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_duplicate_join_reported() {
        let state = solved_state();
        let (a, _rx) = connect(&state).await;
        let join = || ClientMessage::Join {
            display_name: "alice".to_string(),
        };

        assert!(MessageHandler::handle(&state, a, join()).await.is_none());
        let reply = MessageHandler::handle(&state, a, join()).await;
        assert!(matches!(
            reply,
            Some(ServerMessage::Error {
                code: ErrorCode::AlreadyJoined,
                ..
            })
        ));
        assert_eq!(state.sessions.roster().await.len(), 1);
    }

    #[tokio::test]
    async fn test_move_broadcasts_to_originator() {
        let state = solved_state();
        let (a, mut rx_a) = connect(&state).await;
        let (_b, mut rx_b) = connect(&state).await;
        rx_a.try_recv().unwrap();
        rx_b.try_recv().unwrap();

        let msg = ClientMessage::MovePiece {
            piece_id: 0,
            target_x: 1,
            target_y: 0,
        };
        assert!(MessageHandler::handle(&state, a, msg).await.is_none());

        for rx in [&mut rx_a, &mut rx_b] {
            match rx.try_recv() {
                Ok(ServerMessage::PuzzleUpdated { snapshot }) => {
                    assert_eq!(snapshot.piece(0).unwrap().current_x, 1);
                    assert_eq!(snapshot.piece(1).unwrap().current_x, 0);
                    assert!(!snapshot.solved);
                }
                other => panic!("Unexpected message: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_invalid_move_is_silent() {
        let state = solved_state();
        let (a, mut rx) = connect(&state).await;
        rx.try_recv().unwrap();

        let unknown = ClientMessage::MovePiece {
            piece_id: 999,
            target_x: 0,
            target_y: 0,
        };
        let off_grid = ClientMessage::MovePiece {
            piece_id: 0,
            target_x: 9,
            target_y: 9,
        };
        assert!(MessageHandler::handle(&state, a, unknown).await.is_none());
        assert!(MessageHandler::handle(&state, a, off_grid).await.is_none());

        assert!(rx.try_recv().is_err());
        assert_eq!(state.puzzle.snapshot().await.version, 0);
    }

    #[tokio::test]
    async fn test_reset_and_info() {
        let state = solved_state();
        let (a, mut rx) = connect(&state).await;
        rx.try_recv().unwrap();

        MessageHandler::handle(&state, a, ClientMessage::Shuffle).await;
        MessageHandler::handle(&state, a, ClientMessage::Reset).await;
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::PuzzleUpdated { .. })));
        match rx.try_recv() {
            Ok(ServerMessage::PuzzleUpdated { snapshot }) => assert!(snapshot.solved),
            other => panic!("Unexpected message: {:?}", other),
        }

        match MessageHandler::handle(&state, a, ClientMessage::GetInfo).await {
            Some(ServerMessage::ServerInfo {
                grid_size,
                online,
                version,
                solved,
                ..
            }) => {
                assert_eq!((grid_size, online, version), (2, 1, 2));
                assert!(solved);
            }
            other => panic!("Unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let state = solved_state();
        let (_a, mut rx_a) = connect(&state).await;
        let (b, _rx_b) = connect(&state).await;
        let (c, _rx_c) = connect(&state).await;
        rx_a.try_recv().unwrap();

        MessageHandler::handle(
            &state,
            b,
            ClientMessage::Join {
                display_name: "bob".to_string(),
            },
        )
        .await;
        rx_a.try_recv().unwrap();

        // 未命名的连接断开不广播名单
        MessageHandler::handle_disconnect(&state, c).await;
        assert!(rx_a.try_recv().is_err());

        MessageHandler::handle_disconnect(&state, b).await;
        match rx_a.try_recv() {
            Ok(ServerMessage::Roster { members }) => assert!(members.is_empty()),
            other => panic!("Unexpected message: {:?}", other),
        }

        MessageHandler::handle_disconnect(&state, b).await;
        assert!(rx_a.try_recv().is_err());
        assert_eq!(state.gateway.len().await, 1);
        assert_eq!(state.sessions.online_count().await, 1);
    }

    #[test]
    fn test_admit_respects_cap() {
        let config = ServerConfig {
            grid_size: 2,
            max_connections: 2,
            ..ServerConfig::default()
        };
        let state =
            ServerState::with_puzzle(config, PuzzleStateMachine::new(PieceRegistry::initialize(2)));

        let first = state.admit().unwrap();
        let _second = state.admit().unwrap();
        assert!(state.admit().is_none());

        drop(first);
        assert!(state.admit().is_some());
    }

    #[tokio::test]
    async fn test_ping() {
        let state = solved_state();
        let reply = MessageHandler::handle(&state, 1, ClientMessage::Ping).await;
        assert!(matches!(reply, Some(ServerMessage::Pong)));
    }
}
