//! IP anonymization applied before anything is written to disk.
//!
//! - IPv4: the last octet is zeroed (`203.0.113.42` → `203.0.113.0`)
//! - IPv6: the last 80 bits (five groups) are zeroed
//! - anything else becomes `"unknown"`

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Placeholder stored when the address cannot be parsed
pub const UNKNOWN_IP: &str = "unknown";

/// Anonymizes a textual address.
pub fn anonymize_ip(raw: &str) -> String {
    match raw.trim().parse::<IpAddr>() {
        Ok(ip) => anonymize_addr(ip).to_string(),
        Err(_) => UNKNOWN_IP.to_string(),
    }
}

/// Anonymizes a parsed address.
pub fn anonymize_addr(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, _] = v4.octets();
            IpAddr::V4(Ipv4Addr::new(a, b, c, 0))
        }
        IpAddr::V6(v6) => {
            // dual-stack listeners report IPv4 clients as ::ffff:a.b.c.d
            if let Some(v4) = v6.to_ipv4_mapped() {
                return anonymize_addr(IpAddr::V4(v4));
            }
            let mut segments = v6.segments();
            for segment in &mut segments[3..] {
                *segment = 0;
            }
            IpAddr::V6(Ipv6Addr::from(segments))
        }
    }
}
