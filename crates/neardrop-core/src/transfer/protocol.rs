//! NearDrop 传输协议帧格式
//!
//! 1. 发送端 → 接收端：一行 UTF-8 JSON，以 `\n` 结尾
//!    `{"type":"TRANSFER_REQUEST","fileName":…,"fileSize":…,"fileType":…,"senderName":…}`
//! 2. 接收端 → 发送端：`ACCEPT` 或 `REJECT`（无换行，比较前去除空白）
//! 3. ACCEPT 之后：发送端写入恰好 `fileSize` 字节的原始文件内容，无额外帧
//! 4. 发送端关闭写方向表示内容结束

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::transfer::TransferError;

/// 请求头最大长度（含换行）
pub const MAX_HEADER_LEN: usize = 64 * 1024;

/// 控制帧
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlFrame {
    #[serde(rename = "TRANSFER_REQUEST")]
    TransferRequest(TransferRequest),
}

/// 传输请求载荷
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// 文件名（仅 basename）
    pub file_name: String,
    /// 文件大小（字节）
    pub file_size: u64,
    /// 扩展名，含前导 `.`，无扩展名时为空
    #[serde(default)]
    pub file_type: String,
    pub sender_name: String,
}

impl TransferRequest {
    /// 根据本地文件路径构造请求
    pub fn for_file(path: &Path, file_size: u64, sender_name: &str) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let file_type = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        Self {
            file_name,
            file_size,
            file_type,
            sender_name: sender_name.to_string(),
        }
    }

    /// 编码为带换行的请求帧
    pub fn encode(&self) -> Vec<u8> {
        let frame = ControlFrame::TransferRequest(self.clone());
        // 仅含字符串和整数，序列化不会失败
        let mut bytes = serde_json::to_vec(&frame).unwrap_or_default();
        bytes.push(b'\n');
        bytes
    }

    /// 解析请求头（不含换行）
    ///
    /// JSON 无效、类型不对或文件名不安全时返回 `MalformedRequest`。
    pub fn decode(line: &[u8]) -> Result<Self, TransferError> {
        let line = trim_line_ending(line);
        let ControlFrame::TransferRequest(request) = serde_json::from_slice::<ControlFrame>(line)
            .map_err(|e| TransferError::MalformedRequest(e.to_string()))?;

        if !is_safe_file_name(&request.file_name) {
            return Err(TransferError::MalformedRequest(format!(
                "unsafe file name: {:?}",
                request.file_name
            )));
        }
        Ok(request)
    }
}

/// 文件名不得包含路径分隔符，也不能是 `.` / `..`
pub fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// 接收端的握手答复
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

impl Decision {
    pub const ACCEPT: &'static str = "ACCEPT";
    pub const REJECT: &'static str = "REJECT";

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Accept => Self::ACCEPT,
            Decision::Reject => Self::REJECT,
        }
    }

    pub fn as_bytes(&self) -> &'static [u8] {
        self.as_str().as_bytes()
    }

    /// 解析完整答复（去除首尾空白）
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            Self::ACCEPT => Some(Decision::Accept),
            Self::REJECT => Some(Decision::Reject),
            _ => None,
        }
    }
}

/// 增量解析答复时的状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseState {
    /// 已得到完整答复
    Complete(Decision),
    /// 目前仍是某个答复的前缀，需要更多数据
    Incomplete,
    /// 不可能是合法答复
    Invalid,
}

/// 检查已收到的答复字节
///
/// 允许答复被 TCP 拆分到多次读取中。
pub fn check_response(buf: &[u8]) -> ResponseState {
    let Ok(text) = std::str::from_utf8(buf) else {
        return ResponseState::Invalid;
    };
    let trimmed = text.trim_start();

    if let Some(decision) = Decision::parse(trimmed) {
        return ResponseState::Complete(decision);
    }
    if trimmed.is_empty()
        || Decision::ACCEPT.starts_with(trimmed)
        || Decision::REJECT.starts_with(trimmed)
    {
        ResponseState::Incomplete
    } else {
        ResponseState::Invalid
    }
}
