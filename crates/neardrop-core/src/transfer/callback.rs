//! 传输回调接口
//!
//! 由外部 UI 实现。`on_transfer_request` 可能需要等待用户操作，
//! 引擎不会为它设置超时；其余回调都是同步通知。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};

use crate::transfer::TransferErrorKind;
use crate::transfer::progress::ProgressEvent;

/// 收到的传输请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingRequest {
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    pub sender_name: String,
    pub sender_address: String,
}

/// 用户对传输请求的答复
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Approval {
    pub approved: bool,
    pub save_path: Option<PathBuf>,
}

impl Approval {
    pub fn accept(save_path: impl Into<PathBuf>) -> Self {
        Self {
            approved: true,
            save_path: Some(save_path.into()),
        }
    }

    pub fn reject() -> Self {
        Self::default()
    }

    /// 同意且给出了保存路径时返回该路径
    pub fn accepted_path(self) -> Option<PathBuf> {
        if self.approved { self.save_path } else { None }
    }
}

/// 被拒绝的传输
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedTransfer {
    pub file_name: String,
    pub sender_name: String,
    pub sender_address: String,
    pub reason: String,
}

/// 接收完成的文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedFile {
    pub file_name: String,
    /// 磁盘上的实际大小
    pub file_size: u64,
    pub sender_address: String,
    pub save_path: PathBuf,
}

/// 接收失败（截断、取消、连接错误等）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedTransfer {
    pub file_name: String,
    pub sender_name: String,
    pub sender_address: String,
    pub save_path: PathBuf,
    pub kind: TransferErrorKind,
    pub message: String,
}

/// 传输事件回调
#[async_trait]
pub trait TransferCallbacks: Send + Sync {
    /// 收到传输请求，返回是否接受及保存路径
    async fn on_transfer_request(&self, request: &IncomingRequest) -> Approval;

    /// 请求被拒绝（用户拒绝或接收端忙）
    fn on_transfer_rejected(&self, _info: &RejectedTransfer) {}

    /// 文件接收完成
    fn on_file_received(&self, _info: &ReceivedFile) {}

    /// 接收失败，部分文件已删除
    fn on_transfer_failed(&self, _info: &FailedTransfer) {}

    /// 发送进度
    fn on_send_progress(&self, _progress: &ProgressEvent) {}

    /// 接收进度
    fn on_receive_progress(&self, _progress: &ProgressEvent) {}
}

/// 通过 channel 转发的传输事件
#[derive(Debug)]
pub enum TransferEvent {
    /// 等待答复的请求，通过 `responder` 回复
    Request {
        request: IncomingRequest,
        responder: oneshot::Sender<Approval>,
    },
    Rejected(RejectedTransfer),
    Received(ReceivedFile),
    Failed(FailedTransfer),
    SendProgress(ProgressEvent),
    ReceiveProgress(ProgressEvent),
}

/// 把所有回调转发到 channel 的实现
///
/// 请求事件的 `responder` 被丢弃时视为拒绝。
pub struct ChannelCallbacks {
    tx: mpsc::UnboundedSender<TransferEvent>,
}

impl ChannelCallbacks {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: TransferEvent) {
        let _ = self.tx.send(event);
    }
}

#[async_trait]
impl TransferCallbacks for ChannelCallbacks {
    async fn on_transfer_request(&self, request: &IncomingRequest) -> Approval {
        let (responder, answer) = oneshot::channel();
        self.send(TransferEvent::Request {
            request: request.clone(),
            responder,
        });
        answer.await.unwrap_or_default()
    }

    fn on_transfer_rejected(&self, info: &RejectedTransfer) {
        self.send(TransferEvent::Rejected(info.clone()));
    }

    fn on_file_received(&self, info: &ReceivedFile) {
        self.send(TransferEvent::Received(info.clone()));
    }

    fn on_transfer_failed(&self, info: &FailedTransfer) {
        self.send(TransferEvent::Failed(info.clone()));
    }

    fn on_send_progress(&self, progress: &ProgressEvent) {
        self.send(TransferEvent::SendProgress(progress.clone()));
    }

    fn on_receive_progress(&self, progress: &ProgressEvent) {
        self.send(TransferEvent::ReceiveProgress(progress.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> IncomingRequest {
        IncomingRequest {
            file_name: "photo.jpg".to_string(),
            file_size: 42,
            file_type: ".jpg".to_string(),
            sender_name: "phone".to_string(),
            sender_address: "192.168.1.9".to_string(),
        }
    }

    #[test]
    fn test_approval_helpers() {
        assert_eq!(
            Approval::accept("/tmp/x").accepted_path(),
            Some(PathBuf::from("/tmp/x"))
        );
        assert_eq!(Approval::reject().accepted_path(), None);

        let approved_without_path = Approval {
            approved: true,
            save_path: None,
        };
        assert_eq!(approved_without_path.accepted_path(), None);
    }

    #[tokio::test]
    async fn test_channel_request_roundtrip() {
        let (callbacks, mut rx) = ChannelCallbacks::new();
        let request = sample_request();

        let answer = tokio::spawn(async move { callbacks.on_transfer_request(&request).await });

        match rx.recv().await.unwrap() {
            TransferEvent::Request { request, responder } => {
                assert_eq!(request.file_name, "photo.jpg");
                responder.send(Approval::accept("/tmp/photo.jpg")).unwrap();
            }
            other => panic!("unexpected event: {other:?}"),
        }

        assert_eq!(answer.await.unwrap(), Approval::accept("/tmp/photo.jpg"));
    }

    #[tokio::test]
    async fn test_dropped_responder_rejects() {
        let (callbacks, mut rx) = ChannelCallbacks::new();
        let request = sample_request();

        let answer = tokio::spawn(async move { callbacks.on_transfer_request(&request).await });
        drop(rx.recv().await.unwrap());

        assert_eq!(answer.await.unwrap(), Approval::reject());
    }
}
