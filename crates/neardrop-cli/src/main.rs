//! NearDrop CLI
//!
//! 命令行客户端，通过 Unix Socket 与守护进程通信

mod client;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use neardrop_core::ProgressEvent;
use neardrop_core::ipc::{CancelDirection, IpcRequest, IpcResponse};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "neardrop", version, about = "NearDrop - 局域网文件传输工具")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 发送文件
    Send {
        /// 要发送的文件路径
        file: String,
        /// 目标设备 (IP 地址、设备名称或设备 ID)
        #[arg(short, long)]
        device: String,
        /// 目标端口 (默认: 设备广播的端口或 5001)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// 扫描附近设备
    Scan,
    /// 列出等待确认的传输请求
    Pending,
    /// 接受传输请求
    Accept {
        /// 请求编号
        id: u64,
        /// 保存路径 (默认: 下载目录)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// 拒绝传输请求
    Reject {
        /// 请求编号
        id: u64,
    },
    /// 取消当前传输
    Cancel {
        #[arg(value_enum, default_value = "all")]
        direction: Direction,
    },
    /// 查看当前状态
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum Direction {
    Send,
    Receive,
    All,
}

impl From<Direction> for CancelDirection {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Send => CancelDirection::Send,
            Direction::Receive => CancelDirection::Receive,
            Direction::All => CancelDirection::All,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_log::LogTracer::init();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Send { file, device, port } => {
            // 守护进程的工作目录不同，先转成绝对路径
            let path = std::path::absolute(&file)?;
            println!("📤 发送文件: {}", path.display());
            println!("   目标设备: {}", device);
            println!("   等待对方确认...");
            let resp = client::send_request(IpcRequest::Send {
                file_path: path.to_string_lossy().to_string(),
                device,
                port,
            })
            .await?;
            if let IpcResponse::Sent { success, message } = resp {
                if success {
                    println!("✅ {}", message);
                } else {
                    println!("⚠️  {}", message);
                }
            }
        }
        Commands::Scan => {
            println!("🔍 扫描设备...");
            let resp = client::send_request(IpcRequest::Scan).await?;
            if let IpcResponse::Devices { devices } = resp {
                if devices.is_empty() {
                    println!("   未发现设备");
                } else {
                    for (i, dev) in devices.iter().enumerate() {
                        println!(
                            "   [{}] {} ({}:{}) {}",
                            i,
                            dev.name,
                            dev.address,
                            dev.port,
                            dev.platform.as_deref().unwrap_or("")
                        );
                    }
                }
            }
        }
        Commands::Pending => {
            let resp = client::send_request(IpcRequest::Pending).await?;
            if let IpcResponse::Pending { requests } = resp {
                if requests.is_empty() {
                    println!("   没有待确认的请求");
                } else {
                    for req in requests {
                        println!(
                            "   #{} {} ({}) 来自 {} ({})",
                            req.id,
                            req.file_name,
                            format_size(req.file_size),
                            req.sender_name,
                            req.sender_address
                        );
                    }
                }
            }
        }
        Commands::Accept { id, output } => {
            let save_path = output
                .map(|o| std::path::absolute(o).map(|p| p.to_string_lossy().to_string()))
                .transpose()?;
            client::send_request(IpcRequest::Accept { id, save_path }).await?;
        }
        Commands::Reject { id } => {
            client::send_request(IpcRequest::Reject { id }).await?;
        }
        Commands::Cancel { direction } => {
            println!("⏹️  取消传输");
            client::send_request(IpcRequest::Cancel {
                direction: direction.into(),
            })
            .await?;
        }
        Commands::Status => {
            let resp = client::send_request(IpcRequest::Status).await?;
            if let IpcResponse::Status(status) = resp {
                println!("设备: {} ({})", status.device_name, status.device_id);
                println!("端口: {}", status.port);
                println!(
                    "状态: {}",
                    match (status.sending, status.receiving) {
                        (true, true) => "发送中 / 接收中",
                        (true, false) => "发送中",
                        (false, true) => "接收中",
                        (false, false) => "空闲",
                    }
                );
                if status.pending > 0 {
                    println!("待确认: {}", status.pending);
                }
                if let Some(p) = &status.send_progress {
                    println!("发送进度: {}", describe_progress(p));
                }
                if let Some(p) = &status.receive_progress {
                    println!("接收进度: {}", describe_progress(p));
                }
                if let Some(event) = &status.last_event {
                    println!("最近: {}", event);
                }
            }
        }
    }

    Ok(())
}

fn describe_progress(p: &ProgressEvent) -> String {
    format!(
        "{} {}% ({} / {}, {}/s)",
        p.file_name,
        p.percentage,
        format_size(p.bytes_transferred),
        format_size(p.total_bytes),
        format_size(p.speed as u64)
    )
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(2_000_000), "1.9 MB");
    }

    #[test]
    fn test_cli_parses_send() {
        let cli = Cli::try_parse_from([
            "neardrop",
            "send",
            "a.txt",
            "-d",
            "192.168.1.2",
            "-p",
            "6000",
        ])
        .unwrap();
        match cli.command {
            Commands::Send { file, device, port } => {
                assert_eq!(file, "a.txt");
                assert_eq!(device, "192.168.1.2");
                assert_eq!(port, Some(6000));
            }
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn test_cancel_defaults_to_all() {
        let cli = Cli::try_parse_from(["neardrop", "cancel"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Cancel {
                direction: Direction::All
            }
        ));
    }
}
