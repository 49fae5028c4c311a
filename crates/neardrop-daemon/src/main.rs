//! NearDrop Daemon
//!
//! 后台守护进程，负责：
//! - mDNS 服务广播与设备浏览
//! - TCP 文件接收监听
//! - 通过 Unix Socket 与 CLI 通信

mod ipc;
mod service;

use anyhow::Result;
use neardrop_core::AppSettings;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 桥接 log crate（neardrop-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let settings = AppSettings::load();

    // 初始化日志，RUST_LOG 优先于配置文件
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.log_level.filter_directive())),
        )
        .try_init();

    tracing::info!("NearDrop Daemon starting...");

    let daemon = service::Daemon::start(settings).await?;

    // 启动 IPC 服务器
    let ipc_handle = tokio::spawn(ipc::run_ipc_server(daemon.clone()));

    tokio::select! {
        res = ipc_handle => {
            tracing::error!("IPC server exited: {:?}", res);
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl-C, shutting down");
        }
    }

    daemon.shutdown().await;
    let _ = std::fs::remove_file(neardrop_core::ipc::socket_path());
    Ok(())
}
