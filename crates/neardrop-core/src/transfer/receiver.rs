//! 接收端
//!
//! 每个入站连接在独立任务中处理：读请求头 → 等待审批 → 答复 → 写入文件。
//! 多个连接可以同时等待审批，但同一时刻只有一个能进入写文件阶段。

use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use crate::transfer::TransferError;
use crate::transfer::callback::{
    Approval, FailedTransfer, IncomingRequest, ReceivedFile, RejectedTransfer,
};
use crate::transfer::engine::{EngineShared, ReceiverHandle, io_timeout};
use crate::transfer::progress::ProgressTracker;
use crate::transfer::protocol::{Decision, MAX_HEADER_LEN, TransferRequest};
use crate::transfer::session::SessionGuard;

pub(crate) async fn start(
    shared: Arc<EngineShared>,
    host: &str,
    port: u16,
) -> Result<ReceiverHandle, TransferError> {
    let listener = TcpListener::bind((host, port)).await?;
    let local_addr = listener.local_addr()?;
    info!("File transfer server listening on {}", local_addr);

    let task = tokio::spawn(accept_loop(listener, shared));
    Ok(ReceiverHandle::new(local_addr, task))
}

async fn accept_loop(listener: TcpListener, shared: Arc<EngineShared>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("New connection from {}", peer);
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    handle_connection(stream, peer, shared).await;
                });
            }
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, shared: Arc<EngineShared>) {
    let limit = shared.options.inactivity_timeout;
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::with_capacity(shared.options.chunk_size, read_half);

    let request = match read_request(&mut reader, limit).await {
        Ok(Some(request)) => request,
        Ok(None) => {
            debug!("Connection from {} closed before sending a request", peer);
            return;
        }
        Err(e) => {
            warn!("Rejecting connection from {}: {}", peer, e);
            reject_and_close(&mut writer, limit).await;
            return;
        }
    };

    let incoming = IncomingRequest {
        file_name: request.file_name.clone(),
        file_size: request.file_size,
        file_type: request.file_type.clone(),
        sender_name: request.sender_name.clone(),
        sender_address: peer.ip().to_canonical().to_string(),
    };
    info!(
        "Transfer request from {} ({}): {} ({} bytes)",
        incoming.sender_name, incoming.sender_address, incoming.file_name, incoming.file_size
    );

    // 等待审批不设超时，但发送端断开后不再等待
    let approval: Approval = tokio::select! {
        approval = shared.callbacks.on_transfer_request(&incoming) => approval,
        () = sender_hung_up(&mut reader, incoming.file_size) => {
            info!(
                "{} disconnected before {} was approved",
                incoming.sender_address, incoming.file_name
            );
            shared
                .callbacks
                .on_transfer_rejected(&rejection(&incoming, "Sender disconnected"));
            return;
        }
    };
    let Some(save_path) = approval.accepted_path() else {
        info!("Transfer of {} declined", incoming.file_name);
        reject_and_close(&mut writer, limit).await;
        shared
            .callbacks
            .on_transfer_rejected(&rejection(&incoming, "User declined"));
        return;
    };

    let Some(session) = shared.receive_slot.try_claim() else {
        warn!(
            "Receiver busy, rejecting {} from {}",
            incoming.file_name, incoming.sender_name
        );
        reject_and_close(&mut writer, limit).await;
        shared
            .callbacks
            .on_transfer_rejected(&rejection(&incoming, "Receiver busy"));
        return;
    };

    let mut file = match create_target(&save_path).await {
        Ok(file) => file,
        Err(e) => {
            error!("Cannot create {}: {}", save_path.display(), e);
            drop(session);
            reject_and_close(&mut writer, limit).await;
            report_failure(&shared, &incoming, &save_path, &TransferError::FileIo(e));
            return;
        }
    };

    let result = match io_timeout(limit, writer.write_all(Decision::Accept.as_bytes())).await {
        Ok(()) => {
            info!(
                "Receiving {} into {}",
                incoming.file_name,
                save_path.display()
            );
            receive_body(&mut reader, &mut file, &incoming, &session, &shared).await
        }
        Err(e) => Err(e),
    };
    drop(file);
    drop(session);

    match result {
        Ok(()) => {
            let file_size = match tokio::fs::metadata(&save_path).await {
                Ok(meta) => meta.len(),
                Err(e) => {
                    report_failure(&shared, &incoming, &save_path, &TransferError::FileIo(e));
                    return;
                }
            };
            info!("File received: {} ({} bytes)", save_path.display(), file_size);
            shared.callbacks.on_file_received(&ReceivedFile {
                file_name: display_name(&save_path, &incoming.file_name),
                file_size,
                sender_address: incoming.sender_address.clone(),
                save_path,
            });
        }
        Err(e) => {
            match &e {
                TransferError::Canceled => info!("Receive of {} canceled", incoming.file_name),
                other => error!("Failed to receive {}: {}", incoming.file_name, other),
            }
            remove_partial(&save_path).await;
            report_failure(&shared, &incoming, &save_path, &e);
        }
    }
}

/// 读取一行请求头
///
/// 对端在发送任何数据前关闭连接时返回 `Ok(None)`。
async fn read_request<R>(
    reader: &mut R,
    limit: Duration,
) -> Result<Option<TransferRequest>, TransferError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let mut limited = (&mut *reader).take(MAX_HEADER_LEN as u64);
    let n = io_timeout(limit, limited.read_until(b'\n', &mut line)).await?;
    if n == 0 {
        return Ok(None);
    }
    if line.last() != Some(&b'\n') {
        let reason = if line.len() >= MAX_HEADER_LEN {
            "request header too long"
        } else {
            "connection closed before end of request"
        };
        return Err(TransferError::MalformedRequest(reason.to_string()));
    }
    TransferRequest::decode(&line).map(Some)
}

/// 等待审批期间监视连接
///
/// 对端关闭连接且已缓冲的数据不足 `file_size` 时返回，此时传输不可能完成。
/// 对端提前发送数据或仍保持连接时永不返回。
async fn sender_hung_up(reader: &mut BufReader<OwnedReadHalf>, file_size: u64) {
    let buffered = reader.buffer().len() as u64;
    let mut probe = [0u8; 1];
    match reader.get_mut().peek(&mut probe).await {
        Ok(0) if buffered < file_size => {}
        Err(e) => debug!("Connection error while awaiting approval: {}", e),
        _ => std::future::pending::<()>().await,
    }
}

async fn receive_body(
    reader: &mut BufReader<OwnedReadHalf>,
    file: &mut File,
    incoming: &IncomingRequest,
    session: &SessionGuard,
    shared: &EngineShared,
) -> Result<(), TransferError> {
    let limit = shared.options.inactivity_timeout;
    let mut tracker = ProgressTracker::new(
        incoming.file_name.clone(),
        incoming.sender_name.clone(),
        incoming.file_size,
        shared.options.progress_interval,
    );
    let mut buf = vec![0u8; shared.options.chunk_size];

    loop {
        let n = tokio::select! {
            biased;
            _ = session.token().cancelled() => return Err(TransferError::Canceled),
            res = io_timeout(limit, reader.read(&mut buf)) => res?,
        };
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).await.map_err(TransferError::FileIo)?;
        if let Some(event) = tracker.advance(n as u64) {
            shared.callbacks.on_receive_progress(&event);
        }
    }
    file.flush().await.map_err(TransferError::FileIo)?;

    if tracker.transferred() != incoming.file_size {
        return Err(TransferError::TruncatedTransfer {
            expected: incoming.file_size,
            received: tracker.transferred(),
        });
    }
    if let Some(event) = tracker.finish() {
        shared.callbacks.on_receive_progress(&event);
    }
    Ok(())
}

/// 创建目标文件，已存在的文件不会被覆盖
async fn create_target(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
}

async fn reject_and_close(writer: &mut OwnedWriteHalf, limit: Duration) {
    if let Err(e) = io_timeout(limit, writer.write_all(Decision::Reject.as_bytes())).await {
        debug!("Failed to send REJECT: {}", e);
    }
    let _ = writer.shutdown().await;
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!("Failed to remove partial file {}: {}", path.display(), e);
    }
}

fn rejection(incoming: &IncomingRequest, reason: &str) -> RejectedTransfer {
    RejectedTransfer {
        file_name: incoming.file_name.clone(),
        sender_name: incoming.sender_name.clone(),
        sender_address: incoming.sender_address.clone(),
        reason: reason.to_string(),
    }
}

fn report_failure(
    shared: &EngineShared,
    incoming: &IncomingRequest,
    save_path: &Path,
    error: &TransferError,
) {
    shared.callbacks.on_transfer_failed(&FailedTransfer {
        file_name: incoming.file_name.clone(),
        sender_name: incoming.sender_name.clone(),
        sender_address: incoming.sender_address.clone(),
        save_path: save_path.to_path_buf(),
        kind: error.kind(),
        message: error.to_string(),
    });
}

fn display_name(save_path: &Path, fallback: &str) -> String {
    save_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_request_keeps_trailing_data() {
        let mut data = TransferRequest {
            file_name: "a.txt".to_string(),
            file_size: 5,
            file_type: ".txt".to_string(),
            sender_name: "pc".to_string(),
        }
        .encode();
        data.extend_from_slice(b"hello");

        let mut reader = BufReader::new(&data[..]);
        let request = read_request(&mut reader, Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.file_name, "a.txt");

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"hello");
    }

    #[tokio::test]
    async fn test_read_request_eof_and_unterminated() {
        let mut empty = BufReader::new(&b""[..]);
        assert!(
            read_request(&mut empty, Duration::from_secs(1))
                .await
                .unwrap()
                .is_none()
        );

        let mut partial = BufReader::new(&b"{\"type\":"[..]);
        let err = read_request(&mut partial, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn test_read_request_header_limit() {
        let data = vec![b'x'; MAX_HEADER_LEN + 10];
        let mut reader = BufReader::new(&data[..]);
        let err = read_request(&mut reader, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::MalformedRequest(msg) if msg.contains("too long")));
    }

    #[tokio::test]
    async fn test_create_target_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keep.txt");
        std::fs::write(&path, b"original").unwrap();

        let err = create_target(&path).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(&path).unwrap(), b"original");

        let nested = dir.path().join("a/b/new.txt");
        create_target(&nested).await.unwrap();
        assert!(nested.exists());
    }

    #[test]
    fn test_display_name() {
        assert_eq!(
            display_name(Path::new("/tmp/a (1).txt"), "a.txt"),
            "a (1).txt"
        );
        assert_eq!(display_name(Path::new("/"), "a.txt"), "a.txt");
    }
}
