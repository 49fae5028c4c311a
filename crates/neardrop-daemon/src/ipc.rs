//! IPC Server - Unix Domain Socket 通信

use anyhow::Result;
use neardrop_core::ipc::{IpcRequest, IpcResponse, read_message, socket_path, write_message};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};

use crate::service::Daemon;

pub async fn run_ipc_server(daemon: Arc<Daemon>) -> Result<()> {
    let path = socket_path();

    // 删除旧的 socket 文件
    let _ = std::fs::remove_file(&path);

    let listener = UnixListener::bind(&path)?;
    tracing::info!("IPC 服务器已启动: {:?}", path);

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let daemon = Arc::clone(&daemon);
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, daemon).await {
                        tracing::debug!("IPC 连接结束: {}", e);
                    }
                });
            }
            Err(e) => {
                tracing::warn!("接受连接失败: {}", e);
            }
        }
    }
}

async fn handle_client(stream: UnixStream, daemon: Arc<Daemon>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        let request = match read_message::<_, IpcRequest>(&mut reader).await {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(e) => {
                let resp = IpcResponse::error(format!("Invalid request: {e}"));
                write_message(&mut writer, &resp).await?;
                continue;
            }
        };

        tracing::debug!("收到请求: {:?}", request);
        let response = dispatch(&daemon, request).await;
        write_message(&mut writer, &response).await?;
    }

    Ok(())
}

async fn dispatch(daemon: &Daemon, request: IpcRequest) -> IpcResponse {
    match request {
        IpcRequest::Status => IpcResponse::Status(daemon.status().await),
        IpcRequest::Scan => {
            tracing::info!("开始扫描设备...");
            match daemon.scan().await {
                Ok(devices) => IpcResponse::Devices { devices },
                Err(e) => IpcResponse::error(e.to_string()),
            }
        }
        IpcRequest::Send {
            file_path,
            device,
            port,
        } => match daemon.send(&file_path, &device, port).await {
            Ok(outcome) => IpcResponse::Sent {
                success: outcome.success,
                message: outcome.message,
            },
            Err(e) => IpcResponse::error(format!("{e:#}")),
        },
        IpcRequest::Pending => IpcResponse::Pending {
            requests: daemon.pending().await,
        },
        IpcRequest::Accept { id, save_path } => match daemon.accept(id, save_path).await {
            Ok(path) => IpcResponse::ok(format!("已接受，保存到 {}", path.display())),
            Err(e) => IpcResponse::error(e.to_string()),
        },
        IpcRequest::Reject { id } => match daemon.reject(id).await {
            Ok(()) => IpcResponse::ok(format!("已拒绝请求 #{id}")),
            Err(e) => IpcResponse::error(e.to_string()),
        },
        IpcRequest::Cancel { direction } => {
            if daemon.cancel(direction) {
                IpcResponse::ok("已请求取消")
            } else {
                IpcResponse::error("没有进行中的传输")
            }
        }
    }
}
