//! 传输错误类型

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 传输引擎错误
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Invalid file path: {} is not an absolute path", .0.display())]
    InvalidPath(PathBuf),

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Invalid device: {0}")]
    InvalidDevice(String),

    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Connection timed out after {}s of inactivity", .0.as_secs())]
    ConnectionTimeout(Duration),

    #[error("Unknown response from receiver: {0:?}")]
    UnknownResponse(String),

    #[error("Malformed transfer request: {0}")]
    MalformedRequest(String),

    #[error("Transfer canceled")]
    Canceled,

    #[error("Truncated transfer: expected {expected} bytes, received {received}")]
    TruncatedTransfer { expected: u64, received: u64 },

    #[error("File I/O error: {0}")]
    FileIo(#[source] std::io::Error),
}

/// 错误种类（可复制，便于回调与 IPC 传递）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferErrorKind {
    InvalidPath,
    FileNotFound,
    InvalidDevice,
    Connection,
    ConnectionTimeout,
    UnknownResponse,
    MalformedRequest,
    Canceled,
    TruncatedTransfer,
    FileIo,
}

impl TransferError {
    pub fn kind(&self) -> TransferErrorKind {
        match self {
            TransferError::InvalidPath(_) => TransferErrorKind::InvalidPath,
            TransferError::FileNotFound(_) => TransferErrorKind::FileNotFound,
            TransferError::InvalidDevice(_) => TransferErrorKind::InvalidDevice,
            TransferError::Connection(_) => TransferErrorKind::Connection,
            TransferError::ConnectionTimeout(_) => TransferErrorKind::ConnectionTimeout,
            TransferError::UnknownResponse(_) => TransferErrorKind::UnknownResponse,
            TransferError::MalformedRequest(_) => TransferErrorKind::MalformedRequest,
            TransferError::Canceled => TransferErrorKind::Canceled,
            TransferError::TruncatedTransfer { .. } => TransferErrorKind::TruncatedTransfer,
            TransferError::FileIo(_) => TransferErrorKind::FileIo,
        }
    }

    /// 是否为用户主动取消
    pub fn is_canceled(&self) -> bool {
        matches!(self, TransferError::Canceled)
    }
}
