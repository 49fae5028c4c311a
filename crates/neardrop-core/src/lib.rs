//! NearDrop Core Library
//!
//! 局域网点对点文件传输的核心实现库
//!
//! # 模块
//!
//! - **net**: 本机地址枚举与过滤、路径规范化
//! - **discovery**: mDNS 服务广播与对端浏览
//! - **transfer**: TCP 请求/答复握手与文件流式传输
//! - **config**: 持久化设置
//! - **ipc**: 守护进程与 CLI 之间的消息格式
//!
//! # 使用示例
//!
//! ## 发送文件
//!
//! ```ignore
//! use neardrop_core::{DiscoveryService, EngineOptions, TransferEngine};
//!
//! // 1. 浏览局域网内的设备
//! let discovery = DiscoveryService::new()?;
//! let devices = discovery.browse().await?;
//!
//! // 2. 发送文件，等待对方确认
//! let engine = TransferEngine::new(EngineOptions::default(), callbacks);
//! let outcome = engine.send_file(&devices[0], "/home/me/report.pdf").await?;
//! ```
//!
//! ## 接收文件
//!
//! ```ignore
//! use neardrop_core::{ChannelCallbacks, TransferEngine, TransferEvent};
//!
//! // 1. 启动监听并广播
//! let (callbacks, mut events) = ChannelCallbacks::new();
//! let engine = TransferEngine::new(EngineOptions::default(), Arc::new(callbacks));
//! let handle = engine.start_receiver("0.0.0.0", 5001).await?;
//! discovery.advertise(handle.port(), "My Laptop")?;
//!
//! // 2. 处理请求
//! while let Some(TransferEvent::Request { request, responder }) = events.recv().await {
//!     let _ = responder.send(Approval::accept(download_dir.join(&request.file_name)));
//! }
//! ```

pub mod config;
pub mod discovery;
pub mod ipc;
pub mod logging;
pub mod net;
pub mod transfer;

// Discovery re-exports
pub use discovery::{Device, DiscoveryError, DiscoveryService, SERVICE_TYPE};

// Transfer re-exports
pub use transfer::{
    Approval, ChannelCallbacks, EngineOptions, FailedTransfer, IncomingRequest, ProgressEvent,
    ReceivedFile, ReceiverHandle, RejectedTransfer, SendOutcome, TransferCallbacks,
    TransferEngine, TransferError, TransferErrorKind, TransferEvent,
};

// Config re-exports
pub use config::AppSettings;
pub use logging::LogLevel;
