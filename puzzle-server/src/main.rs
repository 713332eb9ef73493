use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use puzzle_server::{PuzzleServer, ServerConfig, ServerState};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("puzzle_server=debug".parse()?))
        .init();

    info!("拼图服务端启动中...");

    let config = ServerConfig::load()?;
    // 拼图在任何客户端连接之前构建并打乱
    let state = Arc::new(ServerState::new(config));
    let server = PuzzleServer::bind(state).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("收到退出信号，服务端关闭"),
    }

    Ok(())
}
