use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use shared::types::AddressFamily;
use crate::store::error::{StoreError, StoreResult};

/// 2000-01-01T00:00:00Z
pub const MIN_SANE_TIME: i64 = 946_684_800;
/// 2100-01-01T00:00:00Z
pub const MAX_SANE_TIME: i64 = 4_102_444_800;

pub fn is_sane_time(t: i64) -> bool {
    t == 0 || (MIN_SANE_TIME..MAX_SANE_TIME).contains(&t)
}

pub fn ensure_sane_time(t: i64) -> StoreResult<()> {
    if is_sane_time(t) {
        Ok(())
    } else {
        Err(StoreError::validation(format!("timestamp {} out of range", t)))
    }
}

pub fn validate_port(port: u16) -> StoreResult<()> {
    if port == 0 {
        return Err(StoreError::validation("port 0 is not a transport port"));
    }
    Ok(())
}

pub fn validate_fqn(fqn: &str) -> StoreResult<()> {
    let name = fqn.strip_suffix('.').unwrap_or(fqn);
    if name.is_empty() || name.len() > 253 {
        return Err(StoreError::validation(format!("bad fqn length: {:?}", fqn)));
    }

    let labels: Vec<&str> = name.split('.').collect();
    if labels.len() < 2 {
        return Err(StoreError::validation(format!("fqn needs a domain: {:?}", fqn)));
    }

    for label in labels {
        let ok = !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-');
        if !ok {
            return Err(StoreError::validation(format!("bad label {:?} in {:?}", label, fqn)));
        }
    }
    Ok(())
}

fn is_public_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    !(ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        || a == 0
        || a >= 240
        // 100.64.0.0/10 carrier-grade NAT
        || (a == 100 && (b & 0xc0) == 64))
}

fn is_public_v6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_public_v4(&v4);
    }
    let first = ip.segments()[0];
    !(ip.is_unspecified()
        || ip.is_loopback()
        || ip.is_multicast()
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
        || (first == 0x2001 && ip.segments()[1] == 0x0db8))
}

/// Whether `ip` is a globally routable unicast address.
pub fn is_public_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => is_public_v6(v6),
    }
}

pub fn ensure_ip_is_public(ip: &IpAddr) -> StoreResult<()> {
    if is_public_ip(ip) {
        Ok(())
    } else {
        Err(StoreError::validation(format!("{} is not a public address", ip)))
    }
}

pub fn ensure_family(ip: &IpAddr, af: AddressFamily) -> StoreResult<()> {
    if AddressFamily::of(ip) != af {
        return Err(StoreError::validation(format!("{} is not an {} address", ip, af.as_str())));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fqn_validation() {
        assert!(validate_fqn("stun.hot-chilli.net").is_ok());
        assert!(validate_fqn("x.example.").is_ok());

        assert!(validate_fqn("").is_err());
        assert!(validate_fqn("localhost").is_err());
        assert!(validate_fqn("bad..name").is_err());
        assert!(validate_fqn("-lead.example").is_err());
        assert!(validate_fqn("under_score.example").is_err());
        assert!(validate_fqn(&format!("{}.com", "a".repeat(64))).is_err());
    }

    #[test]
    fn test_public_ip() {
        for ip in ["49.12.125.53", "9.9.9.9", "2a01:4f8:c2c:1::1"] {
            assert!(is_public_ip(&ip.parse().unwrap()), "{} should be public", ip);
        }
        for ip in [
            "0.0.0.0",
            "127.0.0.1",
            "10.1.2.3",
            "192.168.1.1",
            "169.254.0.1",
            "100.64.0.1",
            "192.0.2.1",
            "255.255.255.255",
            "::1",
            "fd00::1",
            "fe80::1",
            "2001:db8::1",
            "::ffff:10.0.0.1",
        ] {
            assert!(!is_public_ip(&ip.parse().unwrap()), "{} should not be public", ip);
        }
    }

    #[test]
    fn test_sane_time_and_port() {
        assert!(is_sane_time(0));
        assert!(is_sane_time(1_700_000_000));
        assert!(!is_sane_time(-5));
        assert!(!is_sane_time(1000));
        assert!(validate_port(0).is_err());
        assert!(validate_port(3478).is_ok());
    }

    #[test]
    fn test_family_mismatch() {
        let ip: IpAddr = "9.9.9.9".parse().unwrap();
        assert!(ensure_family(&ip, AddressFamily::V4).is_ok());
        assert!(ensure_family(&ip, AddressFamily::V6).is_err());
    }
}
