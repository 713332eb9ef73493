//! 多人协作拼图同步服务端
//!
//! 包含:
//! - 拼块注册表
//! - 拼图状态机（移动、打乱、复原）
//! - 会话与成员名单
//! - 广播网关
//! - 连接处理

pub mod board;
pub mod config;
pub mod gateway;
pub mod puzzle;
pub mod server;
pub mod session;

pub use board::PieceRegistry;
pub use config::ServerConfig;
pub use gateway::BroadcastGateway;
pub use puzzle::{MoveOutcome, PuzzleStateMachine};
pub use server::{MessageHandler, PuzzleServer, ServerState};
pub use session::{Session, SessionRegistry};
