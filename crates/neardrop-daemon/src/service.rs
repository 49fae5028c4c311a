//! Core Service - 传输引擎、设备发现与待确认请求管理

use anyhow::{Context, Result, bail};
use neardrop_core::config::{DEFAULT_PORT, unique_save_path};
use neardrop_core::ipc::{CancelDirection, DaemonStatus, DeviceSummary, PendingSummary};
use neardrop_core::{
    AppSettings, Approval, ChannelCallbacks, Device, DiscoveryService, EngineOptions,
    IncomingRequest, ProgressEvent, ReceiverHandle, SendOutcome, TransferEngine, TransferEvent,
};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc, oneshot};

struct PendingTransfer {
    request: IncomingRequest,
    responder: oneshot::Sender<Approval>,
}

#[derive(Default)]
struct Activity {
    send_progress: Option<ProgressEvent>,
    receive_progress: Option<ProgressEvent>,
    last_event: Option<String>,
}

pub struct Daemon {
    settings: AppSettings,
    engine: TransferEngine,
    discovery: Option<DiscoveryService>,
    receiver: Mutex<Option<ReceiverHandle>>,
    port: u16,
    pending: Mutex<HashMap<u64, PendingTransfer>>,
    next_pending_id: AtomicU64,
    activity: Mutex<Activity>,
    known_devices: Mutex<Vec<Device>>,
    send_busy: AtomicBool,
}

impl Daemon {
    /// 启动接收监听、mDNS 广播和事件循环
    pub async fn start(settings: AppSettings) -> Result<Arc<Self>> {
        tracing::info!("核心服务初始化...");

        let (callbacks, events) = ChannelCallbacks::new();
        let engine = TransferEngine::new(
            EngineOptions::from_settings(&settings),
            Arc::new(callbacks),
        );

        let receiver = engine
            .start_receiver("0.0.0.0", settings.port)
            .await
            .with_context(|| format!("无法监听端口 {}", settings.port))?;
        let port = receiver.port();

        // mDNS 不可用时仍可通过 IP 直接收发
        let discovery = match DiscoveryService::new() {
            Ok(discovery) => {
                if let Err(e) = discovery.advertise(port, &settings.device_name) {
                    tracing::warn!("mDNS 广播失败: {}", e);
                }
                Some(discovery)
            }
            Err(e) => {
                tracing::warn!("mDNS 不可用: {}", e);
                None
            }
        };

        tracing::info!(
            "设备 '{}' 已就绪，端口 {}，下载目录 {}",
            settings.device_name,
            port,
            settings.download_dir.display()
        );

        let daemon = Arc::new(Self {
            settings,
            engine,
            discovery,
            receiver: Mutex::new(Some(receiver)),
            port,
            pending: Mutex::new(HashMap::new()),
            next_pending_id: AtomicU64::new(1),
            activity: Mutex::new(Activity::default()),
            known_devices: Mutex::new(Vec::new()),
            send_busy: AtomicBool::new(false),
        });

        tokio::spawn(Arc::clone(&daemon).run_events(events));
        Ok(daemon)
    }

    async fn run_events(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<TransferEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransferEvent::Request { request, responder } => {
                    self.on_request(request, responder).await;
                }
                TransferEvent::Rejected(info) => {
                    tracing::info!(
                        "已拒绝来自 {} 的 {}: {}",
                        info.sender_name,
                        info.file_name,
                        info.reason
                    );
                    // 发送端断开时对应的待确认请求已失效
                    prune_withdrawn(&mut *self.pending.lock().await);
                    self.record(format!("已拒绝 {} ({})", info.file_name, info.reason))
                        .await;
                }
                TransferEvent::Received(info) => {
                    tracing::info!(
                        "文件已保存: {} ({} 字节)",
                        info.save_path.display(),
                        info.file_size
                    );
                    self.record(format!("已接收 {}", info.save_path.display()))
                        .await;
                }
                TransferEvent::Failed(info) => {
                    tracing::warn!("接收 {} 失败: {}", info.file_name, info.message);
                    self.record(format!("接收 {} 失败: {}", info.file_name, info.message))
                        .await;
                }
                TransferEvent::SendProgress(progress) => {
                    self.activity.lock().await.send_progress = Some(progress);
                }
                TransferEvent::ReceiveProgress(progress) => {
                    self.activity.lock().await.receive_progress = Some(progress);
                }
            }
        }
    }

    async fn on_request(&self, request: IncomingRequest, responder: oneshot::Sender<Approval>) {
        if self.settings.auto_accept {
            let path = unique_save_path(&self.settings.download_dir, &request.file_name);
            tracing::info!("自动接受 {} -> {}", request.file_name, path.display());
            let _ = responder.send(Approval::accept(path));
            return;
        }

        let id = self.next_pending_id.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            "收到来自 {} ({}) 的传输请求 #{}: {} ({} 字节)，使用 `neardrop accept {}` 接受",
            request.sender_name,
            request.sender_address,
            id,
            request.file_name,
            request.file_size,
            id
        );
        self.pending
            .lock()
            .await
            .insert(id, PendingTransfer { request, responder });
    }

    async fn record(&self, event: String) {
        self.activity.lock().await.last_event = Some(event);
    }

    pub async fn status(&self) -> DaemonStatus {
        let activity = self.activity.lock().await;
        DaemonStatus {
            device_name: self.settings.device_name.clone(),
            device_id: self
                .discovery
                .as_ref()
                .map(|d| d.device_identity().to_string())
                .unwrap_or_default(),
            port: self.port,
            sending: self.engine.is_sending(),
            receiving: self.engine.is_receiving(),
            pending: {
                let mut pending = self.pending.lock().await;
                prune_withdrawn(&mut pending);
                pending.len()
            },
            send_progress: activity.send_progress.clone(),
            receive_progress: activity.receive_progress.clone(),
            last_event: activity.last_event.clone(),
        }
    }

    pub async fn scan(&self) -> Result<Vec<DeviceSummary>> {
        let Some(discovery) = &self.discovery else {
            bail!("mDNS 不可用，无法扫描设备");
        };
        let devices = discovery.browse().await?;
        let summaries = devices.iter().map(DeviceSummary::from).collect();
        *self.known_devices.lock().await = devices;
        Ok(summaries)
    }

    /// 发送文件，同一时间只允许一个发送任务
    pub async fn send(
        &self,
        file_path: &str,
        device: &str,
        port: Option<u16>,
    ) -> Result<SendOutcome> {
        if self
            .send_busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            bail!("已有发送任务进行中");
        }
        let result = self.send_inner(file_path, device, port).await;
        self.send_busy.store(false, Ordering::Release);
        result
    }

    async fn send_inner(
        &self,
        file_path: &str,
        device: &str,
        port: Option<u16>,
    ) -> Result<SendOutcome> {
        let target = match self.resolve_device(device, port).await {
            Some(target) => target,
            None => {
                // 未知名称时重新扫描一次
                if self.discovery.is_some() {
                    self.scan().await?;
                }
                self.resolve_device(device, port)
                    .await
                    .with_context(|| format!("未找到设备: {device}"))?
            }
        };

        tracing::info!(
            "发送文件: {} -> {} ({})",
            file_path,
            target.name,
            target.address
        );
        self.activity.lock().await.send_progress = None;
        let outcome = SendOutcome::from_result(self.engine.send_file(&target, file_path).await)?;
        self.record(format!("发送 {}: {}", file_path, outcome.message))
            .await;
        Ok(outcome)
    }

    async fn resolve_device(&self, device: &str, port: Option<u16>) -> Option<Device> {
        resolve_device(device, port, &self.known_devices.lock().await)
    }

    pub async fn pending(&self) -> Vec<PendingSummary> {
        let mut pending = self.pending.lock().await;
        prune_withdrawn(&mut pending);
        let mut list: Vec<PendingSummary> = pending
            .iter()
            .map(|(id, p)| PendingSummary {
                id: *id,
                file_name: p.request.file_name.clone(),
                file_size: p.request.file_size,
                sender_name: p.request.sender_name.clone(),
                sender_address: p.request.sender_address.clone(),
            })
            .collect();
        list.sort_by_key(|p| p.id);
        list
    }

    pub async fn accept(&self, id: u64, save_path: Option<String>) -> Result<PathBuf> {
        let pending = self
            .pending
            .lock()
            .await
            .remove(&id)
            .with_context(|| format!("没有编号为 {id} 的待确认请求"))?;

        let path = match save_path {
            Some(path) => PathBuf::from(path),
            None => unique_save_path(&self.settings.download_dir, &pending.request.file_name),
        };
        if pending.responder.send(Approval::accept(path.clone())).is_err() {
            bail!("请求 #{id} 已失效");
        }
        tracing::info!("已接受请求 #{}，保存到 {}", id, path.display());
        Ok(path)
    }

    pub async fn reject(&self, id: u64) -> Result<()> {
        let pending = self
            .pending
            .lock()
            .await
            .remove(&id)
            .with_context(|| format!("没有编号为 {id} 的待确认请求"))?;
        let _ = pending.responder.send(Approval::reject());
        Ok(())
    }

    pub fn cancel(&self, direction: CancelDirection) -> bool {
        match direction {
            CancelDirection::Send => self.engine.cancel_send(),
            CancelDirection::Receive => self.engine.cancel_receive(),
            CancelDirection::All => {
                let send = self.engine.cancel_send();
                let receive = self.engine.cancel_receive();
                send || receive
            }
        }
    }

    /// 停止广播和监听，拒绝所有待确认请求
    pub async fn shutdown(&self) {
        if let Some(discovery) = &self.discovery {
            discovery.stop();
        }
        if let Some(receiver) = self.receiver.lock().await.take() {
            receiver.shutdown();
        }
        for (_, pending) in self.pending.lock().await.drain() {
            let _ = pending.responder.send(Approval::reject());
        }
        tracing::info!("核心服务已停止");
    }
}

/// 移除发送端已断开的待确认请求
fn prune_withdrawn(pending: &mut HashMap<u64, PendingTransfer>) {
    pending.retain(|id, p| {
        let alive = !p.responder.is_closed();
        if !alive {
            tracing::info!("请求 #{} 已被发送端撤回: {}", id, p.request.file_name);
        }
        alive
    });
}

/// 把用户输入解析为目标设备
///
/// IP 地址直接使用；否则按名称（不区分大小写）或设备 ID 在已发现列表中查找。
fn resolve_device(device: &str, port: Option<u16>, known: &[Device]) -> Option<Device> {
    let device = device.trim();
    if device.parse::<IpAddr>().is_ok() {
        return Some(Device::new(device, device, port.unwrap_or(DEFAULT_PORT)));
    }

    known
        .iter()
        .find(|d| d.name.eq_ignore_ascii_case(device) || d.id == device)
        .map(|d| {
            let mut target = d.clone();
            if let Some(port) = port {
                target.port = port;
            }
            target
        })
}
