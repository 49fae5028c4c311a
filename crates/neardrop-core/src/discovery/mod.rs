//! 设备发现
//!
//! 通过 mDNS 广播本机服务并浏览局域网内的其他节点。
//!
//! # 服务记录
//!
//! - 服务类型: `_neardrop._tcp.local.`
//! - 实例名: 设备显示名称
//! - TXT: `version`、`platform`、`ips`（逗号分隔的 IPv4 列表）、`deviceId`
//!
//! # 地址选择
//!
//! 优先使用记录解析出的地址，没有可用地址时退回到 TXT 中的 `ips`。
//! 两种来源都排除回环、链路本地以及本机自身的地址，并按升序取第一个。

mod identity;
mod service;

pub use identity::{compute_device_identity, local_device_identity};
pub use service::{DiscoveryError, DiscoveryService};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::config::DEFAULT_PORT;
use crate::net::usable_addresses;
use crate::transfer::TransferError;

/// mDNS 服务类型
pub const SERVICE_TYPE: &str = "_neardrop._tcp.local.";

/// 广播的协议版本
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// 单次浏览的时间窗口
pub const BROWSE_WINDOW: Duration = Duration::from_secs(3);

pub const TXT_VERSION: &str = "version";
pub const TXT_PLATFORM: &str = "platform";
pub const TXT_IPS: &str = "ips";
pub const TXT_DEVICE_ID: &str = "deviceId";

/// 发现的对端设备
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// 稳定标识（来自对端的 `deviceId`，与显示名称无关）
    pub id: String,
    pub name: String,
    /// IPv4 地址字面量
    pub address: String,
    pub port: u16,
    /// 对端广播的 TXT 元数据
    #[serde(default)]
    pub txt: HashMap<String, String>,
}

impl Device {
    /// 手动指定地址的设备（不经过发现）
    pub fn new(name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        let address = address.into();
        Self {
            id: address.clone(),
            name: name.into(),
            address,
            port,
            txt: HashMap::new(),
        }
    }

    /// 解析连接地址
    ///
    /// 地址必须是 IP 字面量，端口不能为 0。
    pub fn socket_addr(&self) -> Result<SocketAddr, TransferError> {
        let ip: IpAddr = self.address.trim().parse().map_err(|_| {
            TransferError::InvalidDevice(format!("missing or invalid address {:?}", self.address))
        })?;
        if self.port == 0 {
            return Err(TransferError::InvalidDevice(format!(
                "invalid port 0 for {}",
                self.name
            )));
        }
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn platform(&self) -> Option<&str> {
        self.txt.get(TXT_PLATFORM).map(String::as_str)
    }

    pub fn version(&self) -> Option<&str> {
        self.txt.get(TXT_VERSION).map(String::as_str)
    }
}

/// 一条解析完成的 mDNS 记录（与 mdns-sd 类型解耦）
#[derive(Debug, Clone, Default)]
pub struct PeerRecord {
    pub fullname: String,
    pub instance_name: String,
    pub addresses: Vec<IpAddr>,
    pub port: u16,
    pub txt: HashMap<String, String>,
}

impl PeerRecord {
    pub fn device_id(&self) -> Option<&str> {
        self.txt.get(TXT_DEVICE_ID).map(String::as_str)
    }
}

/// 从完整服务名中取出实例名
pub fn instance_name(fullname: &str) -> String {
    fullname
        .strip_suffix(SERVICE_TYPE)
        .and_then(|s| s.strip_suffix('.'))
        .unwrap_or(fullname)
        .to_string()
}

/// 解析 TXT `ips` 字段，忽略无法解析的项
pub fn parse_ip_list(value: &str) -> Vec<IpAddr> {
    value
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}

/// 为一条记录选择连接地址
pub fn select_address(record: &PeerRecord, local: &BTreeSet<Ipv4Addr>) -> Option<Ipv4Addr> {
    let pick = |candidates: BTreeSet<Ipv4Addr>| candidates.into_iter().find(|a| !local.contains(a));

    pick(usable_addresses(record.addresses.iter().copied())).or_else(|| {
        record
            .txt
            .get(TXT_IPS)
            .and_then(|ips| pick(usable_addresses(parse_ip_list(ips))))
    })
}

/// 把一次浏览得到的记录整理成设备列表
///
/// 跳过本机记录和没有可用地址的记录，按地址去重（先到先得），保持到达顺序。
pub fn collect_devices(
    records: impl IntoIterator<Item = PeerRecord>,
    self_id: &str,
    local: &BTreeSet<Ipv4Addr>,
) -> Vec<Device> {
    let mut seen = HashSet::new();
    let mut devices = Vec::new();

    for record in records {
        if record.device_id() == Some(self_id) {
            debug!("Skipping own record {}", record.fullname);
            continue;
        }
        let Some(address) = select_address(&record, local) else {
            warn!(
                "No usable address for {}, ignoring (addresses: {:?})",
                record.fullname, record.addresses
            );
            continue;
        };
        if !seen.insert(address) {
            continue;
        }

        let id = record
            .device_id()
            .map(str::to_string)
            .unwrap_or_else(|| record.fullname.clone());
        devices.push(Device {
            id,
            name: record.instance_name,
            address: address.to_string(),
            port: if record.port == 0 { DEFAULT_PORT } else { record.port },
            txt: record.txt,
        });
    }
    devices
}
