//! 传输引擎
//!
//! 对外暴露发送、接收监听与取消操作。每个方向同时只有一个活动会话：
//! - 发送：是否允许并发发送由调用方决定，引擎只提供 `is_sending()`
//! - 接收：多个连接可以同时协商，但只有一个能进入传输阶段

use log::info;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::{AppSettings, default_device_name};
use crate::discovery::Device;
use crate::transfer::callback::TransferCallbacks;
use crate::transfer::progress::DEFAULT_PROGRESS_INTERVAL;
use crate::transfer::session::SessionSlot;
use crate::transfer::{TransferError, receiver, sender};

/// 默认数据块大小
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// 引擎选项
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// 请求中携带的发送者名称
    pub sender_name: String,
    /// 连接、读写的无活动超时（不包括等待用户审批）
    pub inactivity_timeout: Duration,
    /// 进度事件最小间隔
    pub progress_interval: Duration,
    pub chunk_size: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            sender_name: default_device_name(),
            inactivity_timeout: Duration::from_secs(60),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl EngineOptions {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            sender_name: settings.device_name.clone(),
            inactivity_timeout: settings.inactivity_timeout(),
            ..Default::default()
        }
    }
}

/// 发送结果
///
/// 拒绝也是正常结果（`success == false`），不是错误。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutcome {
    pub success: bool,
    pub message: String,
}

impl SendOutcome {
    pub fn sent() -> Self {
        Self {
            success: true,
            message: "File sent successfully!".to_string(),
        }
    }

    pub fn rejected() -> Self {
        Self {
            success: false,
            message: "Transfer rejected by recipient".to_string(),
        }
    }

    pub fn canceled() -> Self {
        Self {
            success: false,
            message: "Transfer canceled".to_string(),
        }
    }

    /// 把引擎返回值转换成 UI 用的结果：取消视为正常结果，其他错误保持为错误
    pub fn from_result(result: Result<Self, TransferError>) -> Result<Self, TransferError> {
        match result {
            Err(TransferError::Canceled) => Ok(Self::canceled()),
            other => other,
        }
    }
}

/// 引擎内部共享状态
pub(crate) struct EngineShared {
    pub(crate) options: EngineOptions,
    pub(crate) callbacks: Arc<dyn TransferCallbacks>,
    pub(crate) send_slot: Arc<SessionSlot>,
    pub(crate) receive_slot: Arc<SessionSlot>,
}

/// 文件传输引擎
#[derive(Clone)]
pub struct TransferEngine {
    shared: Arc<EngineShared>,
}

impl TransferEngine {
    pub fn new(options: EngineOptions, callbacks: Arc<dyn TransferCallbacks>) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                options,
                callbacks,
                send_slot: SessionSlot::new(),
                receive_slot: SessionSlot::new(),
            }),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.shared.options
    }

    /// 发送文件到指定设备
    ///
    /// 路径、设备和文件校验都在建立连接之前完成。
    pub async fn send_file(
        &self,
        device: &Device,
        path: impl AsRef<Path>,
    ) -> Result<SendOutcome, TransferError> {
        sender::send_file(&self.shared, device, path.as_ref()).await
    }

    /// 在 `host:port` 上启动接收监听
    ///
    /// 端口为 0 时由系统分配，实际地址见 [`ReceiverHandle::local_addr`]。
    pub async fn start_receiver(
        &self,
        host: &str,
        port: u16,
    ) -> Result<ReceiverHandle, TransferError> {
        receiver::start(Arc::clone(&self.shared), host, port).await
    }

    /// 取消当前发送，返回是否存在活动发送
    pub fn cancel_send(&self) -> bool {
        info!("Canceling send operation...");
        self.shared.send_slot.cancel()
    }

    /// 取消当前接收，返回是否存在活动接收
    pub fn cancel_receive(&self) -> bool {
        info!("Canceling receive operation...");
        self.shared.receive_slot.cancel()
    }

    pub fn is_sending(&self) -> bool {
        self.shared.send_slot.is_active()
    }

    pub fn is_receiving(&self) -> bool {
        self.shared.receive_slot.is_active()
    }
}

/// 接收监听句柄
///
/// 关闭或 drop 后不再接受新连接，已建立的连接继续完成。
pub struct ReceiverHandle {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ReceiverHandle {
    pub(crate) fn new(local_addr: SocketAddr, task: JoinHandle<()>) -> Self {
        Self { local_addr, task }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// 停止监听
    pub fn shutdown(self) {
        info!("File transfer server on {} stopped", self.local_addr);
        // Drop 中 abort
    }
}

impl Drop for ReceiverHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// 为网络操作加上无活动超时
pub(crate) async fn io_timeout<T>(
    limit: Duration,
    fut: impl Future<Output = std::io::Result<T>>,
) -> Result<T, TransferError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(TransferError::Connection),
        Err(_) => Err(TransferError::ConnectionTimeout(limit)),
    }
}
