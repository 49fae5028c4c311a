//! 发送端
//!
//! 流程：校验 → 连接 → 发送请求 → 等待答复 → 推送文件内容 → 关闭写方向。
//! 连接、等待答复和写数据块都与取消令牌竞争，对端停止读取时也能立即取消。

use log::{debug, error, info, warn};
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::discovery::Device;
use crate::net::normalize_absolute_path;
use crate::transfer::TransferError;
use crate::transfer::engine::{EngineShared, SendOutcome, io_timeout};
use crate::transfer::progress::ProgressTracker;
use crate::transfer::protocol::{Decision, ResponseState, TransferRequest, check_response};
use crate::transfer::session::SessionGuard;

/// 答复最多读取的字节数，超过仍不完整视为未知答复
const MAX_RESPONSE_LEN: usize = 64;

pub(crate) async fn send_file(
    shared: &EngineShared,
    device: &Device,
    path: &Path,
) -> Result<SendOutcome, TransferError> {
    let path = normalize_absolute_path(path)?;
    let addr = device.socket_addr()?;
    let file_size = match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => return Err(TransferError::FileNotFound(path)),
    };

    let request = TransferRequest::for_file(&path, file_size, &shared.options.sender_name);
    info!(
        "Sending {} ({} bytes) to {} at {}",
        request.file_name, file_size, device.name, addr
    );

    let session = shared.send_slot.install();
    let result = run_send(shared, device, addr, &path, &request, &session).await;

    match &result {
        Ok(outcome) if outcome.success => {
            info!("File sent successfully: {}", request.file_name);
        }
        Ok(_) => info!("Transfer rejected by {}", device.name),
        Err(TransferError::Canceled) => info!("Send of {} canceled", request.file_name),
        Err(e) => error!("Failed to send {}: {}", request.file_name, e),
    }
    result
}

async fn run_send(
    shared: &EngineShared,
    device: &Device,
    addr: SocketAddr,
    path: &Path,
    request: &TransferRequest,
    session: &SessionGuard,
) -> Result<SendOutcome, TransferError> {
    let limit = shared.options.inactivity_timeout;
    let token = session.token();

    let mut stream = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(TransferError::Canceled),
        res = io_timeout(limit, TcpStream::connect(addr)) => res?,
    };
    debug!("Connected to {}", addr);

    let decision = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(TransferError::Canceled),
        res = negotiate(&mut stream, request, limit) => res?,
    };

    if decision == Decision::Reject {
        let _ = stream.shutdown().await;
        return Ok(SendOutcome::rejected());
    }
    debug!("Transfer accepted, streaming {} bytes", request.file_size);

    // 只发送声明的字节数，文件在此期间变大也不会越界
    let file = File::open(path).await.map_err(TransferError::FileIo)?;
    let mut file = file.take(request.file_size);
    let mut tracker = ProgressTracker::new(
        request.file_name.clone(),
        device.name.clone(),
        request.file_size,
        shared.options.progress_interval,
    );
    let mut buf = vec![0u8; shared.options.chunk_size];

    loop {
        let n = file.read(&mut buf).await.map_err(TransferError::FileIo)?;
        if n == 0 {
            break;
        }
        // 取消时直接断开，接收端会发现字节数不足
        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(TransferError::Canceled),
            res = io_timeout(limit, stream.write_all(&buf[..n])) => res?,
        }
        if let Some(event) = tracker.advance(n as u64) {
            shared.callbacks.on_send_progress(&event);
        }
    }

    if tracker.transferred() != request.file_size {
        warn!(
            "{} shrank while sending: {} of {} bytes",
            request.file_name,
            tracker.transferred(),
            request.file_size
        );
        return Err(TransferError::TruncatedTransfer {
            expected: request.file_size,
            received: tracker.transferred(),
        });
    }
    if let Some(event) = tracker.finish() {
        shared.callbacks.on_send_progress(&event);
    }

    io_timeout(limit, stream.shutdown()).await?;
    Ok(SendOutcome::sent())
}

/// 写出请求并读取答复
async fn negotiate(
    stream: &mut TcpStream,
    request: &TransferRequest,
    limit: Duration,
) -> Result<Decision, TransferError> {
    io_timeout(limit, stream.write_all(&request.encode())).await?;

    let mut received = Vec::with_capacity(16);
    let mut chunk = [0u8; MAX_RESPONSE_LEN];
    loop {
        let n = io_timeout(limit, stream.read(&mut chunk)).await?;
        if n == 0 {
            if received.is_empty() {
                return Err(TransferError::Connection(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before response",
                )));
            }
            return Err(unknown_response(&received));
        }
        received.extend_from_slice(&chunk[..n]);

        match check_response(&received) {
            ResponseState::Complete(decision) => return Ok(decision),
            ResponseState::Incomplete if received.len() < MAX_RESPONSE_LEN => {}
            _ => return Err(unknown_response(&received)),
        }
    }
}

fn unknown_response(bytes: &[u8]) -> TransferError {
    TransferError::UnknownResponse(String::from_utf8_lossy(bytes).trim().to_string())
}
