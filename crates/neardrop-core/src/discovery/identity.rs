//! 设备标识
//!
//! 由主机名、平台和首个物理网卡的 MAC 地址哈希得到，与显示名称无关，
//! 改名后其他节点仍能识别同一台设备。

use log::debug;
use sha2::{Digest, Sha256};

use crate::config::default_device_name;
use crate::net::interface_names;

/// 标识长度（十六进制字符）
pub const DEVICE_ID_LEN: usize = 12;

/// 计算设备标识：`sha256(hostname|platform|mac)` 的前 12 个十六进制字符
///
/// 取不到 MAC 时只哈希 `hostname|platform`。
pub fn compute_device_identity(hostname: &str, platform: &str, mac: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(hostname.as_bytes());
    hasher.update(b"|");
    hasher.update(platform.as_bytes());
    if let Some(mac) = mac {
        hasher.update(b"|");
        hasher.update(mac.as_bytes());
    }

    hasher
        .finalize()
        .iter()
        .take(DEVICE_ID_LEN / 2)
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// 计算本机的设备标识
pub fn local_device_identity() -> String {
    let mac = primary_mac_address();
    debug!("Computing device identity (mac available: {})", mac.is_some());
    compute_device_identity(
        &default_device_name(),
        std::env::consts::OS,
        mac.as_deref(),
    )
}

/// 第一个有非零 MAC 的非回环网卡
fn primary_mac_address() -> Option<String> {
    interface_names().into_iter().find_map(|name| {
        let raw = std::fs::read_to_string(format!("/sys/class/net/{name}/address")).ok()?;
        let mac = raw.trim().to_lowercase();
        is_real_mac(&mac).then_some(mac)
    })
}

fn is_real_mac(mac: &str) -> bool {
    !mac.is_empty() && mac.chars().any(|c| c.is_ascii_hexdigit() && c != '0')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_shape() {
        let id = compute_device_identity("laptop", "linux", Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(id.len(), DEVICE_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_identity_stable_and_input_sensitive() {
        let a = compute_device_identity("laptop", "linux", Some("aa:bb:cc:dd:ee:ff"));
        let b = compute_device_identity("laptop", "linux", Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(a, b);

        assert_ne!(a, compute_device_identity("desktop", "linux", Some("aa:bb:cc:dd:ee:ff")));
        assert_ne!(a, compute_device_identity("laptop", "linux", None));
    }

    #[test]
    fn test_identity_matches_sha256_prefix() {
        let expected: String = Sha256::digest(b"a|b")
            .iter()
            .take(6)
            .map(|b| format!("{b:02x}"))
            .collect();
        assert_eq!(compute_device_identity("a", "b", None), expected);
    }

    #[test]
    fn test_is_real_mac() {
        assert!(is_real_mac("aa:bb:cc:dd:ee:ff"));
        assert!(!is_real_mac("00:00:00:00:00:00"));
        assert!(!is_real_mac(""));
    }

    #[test]
    fn test_local_identity_shape() {
        assert_eq!(local_device_identity().len(), DEVICE_ID_LEN);
    }
}
