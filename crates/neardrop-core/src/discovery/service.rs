//! mDNS 广播与浏览
//!
//! 使用 mdns-sd 的守护线程。广播与浏览共用同一个守护实例。

use log::{debug, info, trace, warn};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use crate::config::default_device_name;
use crate::discovery::{
    BROWSE_WINDOW, Device, PROTOCOL_VERSION, PeerRecord, SERVICE_TYPE, TXT_DEVICE_ID, TXT_IPS,
    TXT_PLATFORM, TXT_VERSION, collect_devices, identity, instance_name,
};
use crate::net::local_addresses;

/// 发现服务错误
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("mDNS daemon error: {0}")]
    Daemon(#[from] mdns_sd::Error),

    #[error("Invalid host name: {0:?}")]
    Hostname(String),
}

/// 发现服务
pub struct DiscoveryService {
    daemon: ServiceDaemon,
    identity: OnceLock<String>,
    /// 当前已注册记录的完整服务名
    registered: Mutex<Option<String>>,
    browse_window: Duration,
}

impl DiscoveryService {
    pub fn new() -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new()?;
        Ok(Self {
            daemon,
            identity: OnceLock::new(),
            registered: Mutex::new(None),
            browse_window: BROWSE_WINDOW,
        })
    }

    pub fn with_browse_window(mut self, window: Duration) -> Self {
        self.browse_window = window;
        self
    }

    /// 本机设备标识，首次调用时计算
    pub fn device_identity(&self) -> &str {
        self.identity.get_or_init(identity::local_device_identity)
    }

    /// 广播本机服务，已有的广播会先注销
    pub fn advertise(&self, port: u16, display_name: &str) -> Result<(), DiscoveryError> {
        self.unregister();

        let local = local_addresses();
        let ips = local
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let addrs: Vec<IpAddr> = local.iter().copied().map(IpAddr::V4).collect();

        let mut properties = HashMap::new();
        properties.insert(TXT_VERSION.to_string(), PROTOCOL_VERSION.to_string());
        properties.insert(TXT_PLATFORM.to_string(), std::env::consts::OS.to_string());
        properties.insert(TXT_IPS.to_string(), ips.clone());
        properties.insert(TXT_DEVICE_ID.to_string(), self.device_identity().to_string());

        let host = host_label(&default_device_name())?;
        let info = ServiceInfo::new(
            SERVICE_TYPE,
            display_name,
            &format!("{host}.local."),
            &addrs[..],
            port,
            properties,
        )?
        .enable_addr_auto();

        let fullname = info.get_fullname().to_string();
        self.daemon.register(info)?;
        info!("Advertising '{}' on port {} (ips: {})", display_name, port, ips);
        *self.lock_registered() = Some(fullname);
        Ok(())
    }

    /// 在固定窗口内浏览对端，窗口结束后返回设备列表
    pub async fn browse(&self) -> Result<Vec<Device>, DiscoveryError> {
        let receiver = self.daemon.browse(SERVICE_TYPE)?;
        info!(
            "Browsing for peers for {} seconds",
            self.browse_window.as_secs_f32()
        );

        let window = tokio::time::sleep(self.browse_window);
        tokio::pin!(window);
        let mut records = Vec::new();

        loop {
            tokio::select! {
                _ = &mut window => break,
                event = receiver.recv_async() => match event {
                    Ok(ServiceEvent::ServiceResolved(info)) => {
                        debug!(
                            "Resolved {} at {:?}:{}",
                            info.get_fullname(),
                            info.get_addresses(),
                            info.get_port()
                        );
                        records.push(peer_record(&info));
                    }
                    Ok(other) => trace!("mDNS event: {:?}", other),
                    Err(_) => {
                        debug!("Browse channel closed early");
                        break;
                    }
                }
            }
        }

        if let Err(e) = self.daemon.stop_browse(SERVICE_TYPE) {
            debug!("stop_browse failed: {}", e);
        }

        let devices = collect_devices(records, self.device_identity(), &local_addresses());
        info!("Discovery complete: found {} device(s)", devices.len());
        Ok(devices)
    }

    /// 注销广播并停止浏览，可重复调用
    pub fn stop(&self) {
        self.unregister();
        if let Err(e) = self.daemon.stop_browse(SERVICE_TYPE) {
            trace!("stop_browse: {}", e);
        }
    }

    fn unregister(&self) {
        if let Some(fullname) = self.lock_registered().take() {
            match self.daemon.unregister(&fullname) {
                Ok(_) => info!("Unregistered {}", fullname),
                Err(e) => warn!("Failed to unregister {}: {}", fullname, e),
            }
        }
    }

    fn lock_registered(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.registered.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        self.stop();
        if let Err(e) = self.daemon.shutdown() {
            debug!("mDNS daemon shutdown: {}", e);
        }
    }
}

fn peer_record(info: &ServiceInfo) -> PeerRecord {
    let fullname = info.get_fullname().to_string();
    let mut addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
    addresses.sort();

    PeerRecord {
        instance_name: instance_name(&fullname),
        fullname,
        addresses,
        port: info.get_port(),
        txt: info
            .get_properties()
            .iter()
            .map(|p| (p.key().to_string(), p.val_str().to_string()))
            .collect(),
    }
}

/// 把主机名转成合法的 DNS 标签
fn host_label(hostname: &str) -> Result<String, DiscoveryError> {
    let label: String = hostname
        .split('.')
        .next()
        .unwrap_or_default()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let label = label.trim_matches('-').to_string();
    if label.is_empty() {
        return Err(DiscoveryError::Hostname(hostname.to_string()));
    }
    Ok(label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_label() {
        assert_eq!(host_label("my-laptop").unwrap(), "my-laptop");
        assert_eq!(host_label("Alice's Mac.home").unwrap(), "Alice-s-Mac");
        assert!(matches!(host_label("..."), Err(DiscoveryError::Hostname(_))));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let service = DiscoveryService::new().unwrap();
        service.stop();
        service.stop();

        service.advertise(5001, "NearDrop Test").unwrap();
        assert!(service.lock_registered().is_some());
        // 重复广播会替换旧记录
        service.advertise(5002, "NearDrop Test").unwrap();
        assert!(service.lock_registered().is_some());

        service.stop();
        assert!(service.lock_registered().is_none());
        service.stop();
        assert!(service.lock_registered().is_none());
    }

    #[tokio::test]
    async fn test_browse_ends_after_window() {
        let window = Duration::from_millis(300);
        let service = DiscoveryService::new().unwrap().with_browse_window(window);
        service.advertise(5001, "NearDrop Self").unwrap();

        let started = std::time::Instant::now();
        let devices = tokio::time::timeout(Duration::from_secs(5), service.browse())
            .await
            .unwrap()
            .unwrap();
        assert!(started.elapsed() >= window);
        assert!(devices.iter().all(|d| d.id != service.device_identity()));

        // 浏览结束后可以再次浏览
        tokio::time::timeout(Duration::from_secs(5), service.browse())
            .await
            .unwrap()
            .unwrap();
        service.stop();
    }
}
