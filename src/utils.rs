use crate::ScrapeError;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;
use url::{Host, Url};

pub fn sanitize_filename(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '&' | '=' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let millis = duration.subsec_millis();

    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else if seconds > 0 {
        format!("{}.{}s", seconds, millis / 100)
    } else {
        format!("{millis}ms")
    }
}

pub fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// Canonical form of a URL for fingerprinting: lower-cased scheme and host,
/// default port and fragment dropped.
pub fn normalize_url(url: &str) -> Result<String, ScrapeError> {
    let mut parsed = Url::parse(url.trim())
        .map_err(|e| ScrapeError::InvalidRequest(format!("Invalid URL '{url}': {e}")))?;
    parsed.set_fragment(None);
    // `Url` already lower-cases scheme/host and elides default ports
    Ok(parsed.to_string())
}

/// Validate scheme and destination of a URL before it is handed to a browser.
///
/// Unless `allow_private` is set, every address the host resolves to must be
/// publicly routable.
pub async fn check_url_safety(
    url: &str,
    allow_private: bool,
    allow_file: bool,
) -> Result<Url, ScrapeError> {
    let parsed = Url::parse(url.trim())
        .map_err(|e| ScrapeError::InvalidRequest(format!("Invalid URL '{url}': {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        "file" if allow_file => return Ok(parsed),
        scheme => {
            return Err(ScrapeError::UnsafeUrl(format!(
                "scheme '{scheme}' is not allowed"
            )))
        }
    }

    if allow_private {
        return Ok(parsed);
    }

    let port = parsed.port_or_known_default().unwrap_or(80);
    let addresses: Vec<IpAddr> = match parsed.host() {
        Some(Host::Ipv4(ip)) => vec![IpAddr::V4(ip)],
        Some(Host::Ipv6(ip)) => vec![IpAddr::V6(ip)],
        Some(Host::Domain(domain)) => tokio::net::lookup_host((domain, port))
            .await
            .map_err(|_| ScrapeError::UnsafeUrl(format!("cannot resolve domain {domain}")))?
            .map(|addr| addr.ip())
            .collect(),
        None => return Err(ScrapeError::UnsafeUrl("URL has no host".to_string())),
    };

    if addresses.is_empty() {
        return Err(ScrapeError::UnsafeUrl(format!(
            "no addresses for {}",
            parsed.host_str().unwrap_or_default()
        )));
    }

    if let Some(ip) = addresses.iter().find(|ip| is_restricted_ip(ip)) {
        return Err(ScrapeError::UnsafeUrl(format!(
            "IP {ip} for {} is private, loopback or reserved",
            parsed.host_str().unwrap_or_default()
        )));
    }

    Ok(parsed)
}

pub fn is_restricted_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_restricted_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_restricted_v4(&mapped);
            }
            is_restricted_v6(v6)
        }
    }
}

fn is_restricted_v4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_broadcast()
        || ip.is_unspecified()
        || ip.is_documentation()
        // 100.64.0.0/10 carrier-grade NAT
        || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
        // 240.0.0.0/4 reserved
        || octets[0] >= 240
        || octets[0] == 0
}

fn is_restricted_v6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_multicast()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}

/// Resident memory of this process in bytes, from /proc on Linux.
pub fn process_memory_usage() -> Option<usize> {
    let content = std::fs::read_to_string("/proc/self/status").ok()?;
    content
        .lines()
        .find(|line| line.starts_with("VmRSS:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<usize>().ok())
        .map(|kb| kb * 1024)
}
