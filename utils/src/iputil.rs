//! Address parsing and localhost classification helpers.

use std::net::IpAddr;

/// Split an `"ip:port"` string into its parts.
///
/// IPv6 literals use the bracketed form `"[::1]:6677"`. The port must be
/// non-zero.
pub fn split_addr(addr: &str) -> Option<(String, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    if port == 0 {
        return None;
    }

    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() || host.parse::<IpAddr>().is_err() {
        return None;
    }
    Some((host.to_string(), port))
}

/// Whether the given IP string refers to the local host.
pub fn is_localhost(ip: &str) -> bool {
    match ip.parse::<IpAddr>() {
        Ok(parsed) => parsed.is_loopback(),
        Err(_) => ip == "localhost",
    }
}

/// The IP to bind when running localhost-only.
pub fn localhost_ip() -> String {
    "127.0.0.1".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_addr_v4() {
        assert_eq!(
            split_addr("10.0.0.2:7777"),
            Some(("10.0.0.2".to_string(), 7777))
        );
    }

    #[test]
    fn split_addr_v6_bracketed() {
        assert_eq!(split_addr("[::1]:6677"), Some(("::1".to_string(), 6677)));
    }

    #[test]
    fn split_addr_rejects_garbage() {
        assert_eq!(split_addr("not-an-addr"), None);
        assert_eq!(split_addr("10.0.0.2"), None);
        assert_eq!(split_addr("10.0.0.2:0"), None);
        assert_eq!(split_addr("10.0.0.2:notaport"), None);
        assert_eq!(split_addr(":6677"), None);
        assert_eq!(split_addr("example.com:6677"), None);
    }

    #[test]
    fn localhost_detection() {
        assert!(is_localhost("127.0.0.1"));
        assert!(is_localhost("127.8.8.8"));
        assert!(is_localhost("::1"));
        assert!(is_localhost("localhost"));
        assert!(!is_localhost("10.0.0.2"));
        assert!(!is_localhost("8.8.8.8"));
    }

    #[test]
    fn localhost_ip_is_loopback() {
        assert!(is_localhost(&localhost_ip()));
    }
}
