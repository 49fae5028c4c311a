//! 守护进程 IPC 协议
//!
//! Unix Domain Socket 上的行分隔 JSON，守护进程与 CLI 共用。

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::discovery::Device;
use crate::transfer::ProgressEvent;

pub fn socket_path() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join("neardrop.sock")
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CancelDirection {
    Send,
    Receive,
    All,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum IpcRequest {
    #[serde(rename = "status")]
    Status,
    #[serde(rename = "scan")]
    Scan,
    /// `device` 为 IP 地址或已发现设备的名称
    #[serde(rename = "send")]
    Send {
        file_path: String,
        device: String,
        port: Option<u16>,
    },
    #[serde(rename = "pending")]
    Pending,
    /// 接受待处理请求，`save_path` 为空时保存到下载目录
    #[serde(rename = "accept")]
    Accept { id: u64, save_path: Option<String> },
    #[serde(rename = "reject")]
    Reject { id: u64 },
    #[serde(rename = "cancel")]
    Cancel { direction: CancelDirection },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum IpcResponse {
    #[serde(rename = "ok")]
    Ok { message: String },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "devices")]
    Devices { devices: Vec<DeviceSummary> },
    #[serde(rename = "status")]
    Status(DaemonStatus),
    #[serde(rename = "pending")]
    Pending { requests: Vec<PendingSummary> },
    #[serde(rename = "sent")]
    Sent { success: bool, message: String },
}

impl IpcResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        IpcResponse::Ok {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        IpcResponse::Error {
            message: message.into(),
        }
    }
}

/// 守护进程状态
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct DaemonStatus {
    pub device_name: String,
    pub device_id: String,
    pub port: u16,
    pub sending: bool,
    pub receiving: bool,
    pub pending: usize,
    pub send_progress: Option<ProgressEvent>,
    pub receive_progress: Option<ProgressEvent>,
    /// 最近一次传输结果的描述
    pub last_event: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub platform: Option<String>,
}

impl From<&Device> for DeviceSummary {
    fn from(device: &Device) -> Self {
        Self {
            id: device.id.clone(),
            name: device.name.clone(),
            address: device.address.clone(),
            port: device.port,
            platform: device.platform().map(str::to_string),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PendingSummary {
    pub id: u64,
    pub file_name: String,
    pub file_size: u64,
    pub sender_name: String,
    pub sender_address: String,
}

/// 写出一条消息（JSON + 换行）
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// 读取一条消息，对端关闭时返回 `None`
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line.trim_end())?))
}
