//! 协作拼图共享协议库
//!
//! 包含:
//! - 拼块、位置等核心数据结构
//! - 拼图快照与成员名单
//! - 消息类型定义 (ClientMessage, ServerMessage)
//! - 传输层抽象 (Connector, Connection, Listener traits)
//! - 帧编解码

mod constants;
mod error;
mod message;
mod piece;
mod snapshot;
mod transport;

pub use constants::*;
pub use error::{ProtocolError, PuzzleError, Result};
pub use message::{ClientMessage, ConnectionId, ErrorCode, ServerMessage};
pub use piece::{Piece, PieceId, Position};
pub use snapshot::{PieceState, PuzzleSnapshot, RosterEntry};
pub use transport::{
    Connection, Connector, FrameReader, FrameWriter, Listener, NetworkConfig, TcpConnection,
    TcpConnector, TcpListener,
};
