//! 文件传输模块
//!
//! 包含:
//! - 基于 TCP 的请求/答复协议 (JSON 请求头 + 原始字节流)
//! - 发送端与接收端实现
//! - 进度节流、会话取消与回调接口

pub mod callback;
pub mod engine;
pub mod error;
pub mod progress;
pub mod protocol;
mod receiver;
mod sender;
pub mod session;

pub use callback::{
    Approval, ChannelCallbacks, FailedTransfer, IncomingRequest, ReceivedFile, RejectedTransfer,
    TransferCallbacks, TransferEvent,
};
pub use engine::{EngineOptions, ReceiverHandle, SendOutcome, TransferEngine};
pub use error::{TransferError, TransferErrorKind};
pub use progress::{ProgressEvent, ProgressTracker};
pub use protocol::{Decision, TransferRequest};
