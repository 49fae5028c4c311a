//! 本机地址解析
//!
//! - 枚举本机网卡的可用 IPv4 地址（排除回环、链路本地）
//! - 校验并规范化待发送文件的绝对路径
//!
//! 发现模块与传输引擎共用这里的过滤规则。

use log::{trace, warn};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Component, Path, PathBuf};

use crate::transfer::TransferError;

/// 判断 IPv4 地址是否可用于局域网传输
///
/// 排除 0.0.0.0、127.0.0.0/8、169.254.0.0/16 以及组播/广播地址。
pub fn is_usable_ipv4(addr: Ipv4Addr) -> bool {
    !(addr.is_unspecified()
        || addr.is_loopback()
        || addr.is_link_local()
        || addr.is_multicast()
        || addr.is_broadcast())
}

/// 枚举本机当前可用的 IPv4 地址
///
/// 每次调用都重新读取网卡状态，不做缓存。枚举失败时记录警告并返回空集合。
pub fn local_addresses() -> BTreeSet<Ipv4Addr> {
    match local_ip_address::list_afinet_netifas() {
        Ok(interfaces) => usable_addresses(
            interfaces
                .into_iter()
                .inspect(|(name, ip)| trace!("Interface {}: {}", name, ip))
                .map(|(_, ip)| ip),
        ),
        Err(e) => {
            warn!("Failed to enumerate network interfaces: {}", e);
            BTreeSet::new()
        }
    }
}

/// 从任意地址集合中筛出可用的 IPv4 地址
pub fn usable_addresses(addrs: impl IntoIterator<Item = IpAddr>) -> BTreeSet<Ipv4Addr> {
    addrs
        .into_iter()
        .filter_map(|ip| match ip {
            IpAddr::V4(v4) if is_usable_ipv4(v4) => Some(v4),
            _ => None,
        })
        .collect()
}

/// 本机网卡名称列表（排除回环接口），按名称排序
pub fn interface_names() -> Vec<String> {
    let mut names: Vec<String> = local_ip_address::list_afinet_netifas()
        .map(|list| {
            list.into_iter()
                .filter(|(_, ip)| !ip.is_loopback())
                .map(|(name, _)| name)
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names.dedup();
    names
}

/// 校验路径为绝对路径，并按词法规则规范化
///
/// 折叠 `.`、`..` 和重复分隔符；`..` 不会越过根目录。
/// 不访问文件系统，也不解析符号链接。
pub fn normalize_absolute_path(path: impl AsRef<Path>) -> Result<PathBuf, TransferError> {
    let path = path.as_ref();
    if !path.is_absolute() {
        return Err(TransferError::InvalidPath(path.to_path_buf()));
    }

    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                // 根目录的 pop 无效果
                normalized.pop();
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    Ok(normalized)
}
