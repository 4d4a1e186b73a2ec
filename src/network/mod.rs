//! 网络工具
//!
//! 解析本机局域网地址，生成浏览器可访问的 URL

use std::net::{IpAddr, SocketAddr, UdpSocket};

/// 获取本机局域网 IPv4 地址
///
/// 优先使用默认路由的出口地址；没有默认路由 (如隔离局域网、手机热点)
/// 或出口地址属于 VPN 网段时，逐个检查本机网卡
pub fn get_local_ip() -> Option<IpAddr> {
    let mut candidates = Vec::new();

    if let Some(ip) = route_ip() {
        candidates.push(ip);
    }

    match if_addrs::get_if_addrs() {
        Ok(interfaces) => candidates.extend(
            interfaces
                .into_iter()
                .filter(|iface| !iface.is_loopback())
                .map(|iface| iface.ip()),
        ),
        Err(e) => tracing::debug!("无法枚举网卡: {}", e),
    }

    select_lan_ip(&candidates)
}

/// 通过 UDP "连接" 公网地址让系统选出出口网卡，不发送任何数据
fn route_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    Some(socket.local_addr().ok()?.ip())
}

/// 从候选地址中选出局域网地址
///
/// 先找 [`is_usable_ip`] 的地址；都不满足时退而选择第一个非回环、
/// 非链路本地的 IPv4 地址
pub fn select_lan_ip(candidates: &[IpAddr]) -> Option<IpAddr> {
    candidates
        .iter()
        .copied()
        .find(|ip| is_usable_ip(ip))
        .or_else(|| candidates.iter().copied().find(|ip| is_local_ipv4(ip)))
}

fn is_local_ipv4(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => !(ipv4.is_loopback() || ipv4.is_link_local() || ipv4.is_unspecified()),
        IpAddr::V6(_) => false,
    }
}

/// 检查地址是否可供局域网内其他设备访问
///
/// 排除回环、链路本地、未指定地址、IPv6 以及 VPN 常用网段
pub fn is_usable_ip(ip: &IpAddr) -> bool {
    if !is_local_ipv4(ip) {
        return false;
    }
    let IpAddr::V4(ipv4) = ip else {
        return false;
    };

    let octets = ipv4.octets();

    // Cloudflare WARP (198.18.0.0/15)
    if octets[0] == 198 && (octets[1] == 18 || octets[1] == 19) {
        return false;
    }

    // CGNAT (100.64.0.0/10)，部分 VPN 使用
    if octets[0] == 100 && (64..=127).contains(&octets[1]) {
        return false;
    }

    true
}

/// 生成服务器 URL
///
/// 无法解析本机地址时回退为 `http://localhost:<port>`，IPv6 地址加方括号
pub fn server_url(ip: Option<IpAddr>, port: u16) -> String {
    match ip {
        Some(ip) => format!("http://{}", SocketAddr::new(ip, port)),
        None => format!("http://localhost:{}", port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_usable_ips() {
        assert!(is_usable_ip(&ip("192.168.1.20")));
        assert!(is_usable_ip(&ip("10.0.0.5")));
        assert!(is_usable_ip(&ip("172.20.1.1")));
    }

    #[test]
    fn test_unusable_ips() {
        assert!(!is_usable_ip(&ip("127.0.0.1")));
        assert!(!is_usable_ip(&ip("169.254.3.4")));
        assert!(!is_usable_ip(&ip("0.0.0.0")));
        assert!(!is_usable_ip(&ip("198.18.0.1")));
        assert!(!is_usable_ip(&ip("100.100.1.1")));
        assert!(!is_usable_ip(&IpAddr::V6(Ipv6Addr::LOCALHOST)));
    }

    #[test]
    fn test_select_prefers_usable_address() {
        // 出口地址是 VPN 网段，网卡上有真实局域网地址
        let candidates = [ip("198.18.0.1"), ip("fe80::1"), ip("192.168.43.7")];
        assert_eq!(select_lan_ip(&candidates), Some(ip("192.168.43.7")));
    }

    #[test]
    fn test_select_without_route() {
        // 没有默认路由时只有网卡地址
        let candidates = [ip("169.254.10.1"), ip("10.42.0.1")];
        assert_eq!(select_lan_ip(&candidates), Some(ip("10.42.0.1")));
    }

    #[test]
    fn test_select_falls_back_to_any_local_ipv4() {
        let candidates = [ip("::1"), ip("100.72.3.4")];
        assert_eq!(select_lan_ip(&candidates), Some(ip("100.72.3.4")));
    }

    #[test]
    fn test_select_nothing_usable() {
        assert_eq!(select_lan_ip(&[]), None);
        assert_eq!(select_lan_ip(&[ip("169.254.1.1"), ip("2001:db8::1")]), None);
    }

    #[test]
    fn test_server_url() {
        assert_eq!(server_url(Some(ip("192.168.1.20")), 8080), "http://192.168.1.20:8080");
        assert_eq!(server_url(None, 9000), "http://localhost:9000");
    }

    #[test]
    fn test_server_url_brackets_ipv6() {
        assert_eq!(server_url(Some(ip("2001:db8::1")), 8080), "http://[2001:db8::1]:8080");
    }
}
