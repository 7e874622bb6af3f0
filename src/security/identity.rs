use anyhow::{bail, Context, Result};
use axum::extract::Request;
use sha2::{Digest, Sha256};
use std::net::{IpAddr, SocketAddr};

/// Derives the anonymous per-request identity by hashing
/// IP + browser fingerprint + server secret.
#[derive(Clone)]
pub struct CompositeKeyGenerator {
    server_secret: String,
}

impl CompositeKeyGenerator {
    pub fn new(server_secret: String) -> Self {
        Self { server_secret }
    }

    /// Generate a composite key from IP address and browser fingerprint.
    ///
    /// Identical inputs always yield the identical key; distinct server
    /// secrets yield disjoint key spaces. The key is recomputed on every
    /// request and never stored.
    pub fn generate(&self, ip: &str, fingerprint: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(ip.as_bytes());
        hasher.update(b"|");
        hasher.update(fingerprint.as_bytes());
        hasher.update(b"|");
        hasher.update(self.server_secret.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// A network in CIDR notation ("10.0.0.0/8") or a bare address.
#[derive(Clone, Copy, Debug)]
pub struct IpNetwork {
    addr: IpAddr,
    prefix_len: u8,
}

impl std::str::FromStr for IpNetwork {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => {
                let addr: IpAddr = addr
                    .parse()
                    .with_context(|| format!("invalid network address '{}'", s))?;
                let prefix: u8 = prefix
                    .parse()
                    .with_context(|| format!("invalid prefix length '{}'", s))?;
                (addr, prefix)
            }
            None => {
                let addr: IpAddr = s
                    .parse()
                    .with_context(|| format!("invalid address '{}'", s))?;
                let full = if addr.is_ipv4() { 32 } else { 128 };
                (addr, full)
            }
        };

        let max = if addr.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            bail!("prefix length {} too long for '{}'", prefix, s);
        }

        Ok(Self {
            addr,
            prefix_len: prefix,
        })
    }
}

impl IpNetwork {
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                if self.prefix_len == 0 {
                    return true;
                }
                let shift = 32 - u32::from(self.prefix_len);
                (u32::from(net) >> shift) == (u32::from(ip) >> shift)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                if self.prefix_len == 0 {
                    return true;
                }
                let shift = 128 - u32::from(self.prefix_len);
                (u128::from(net) >> shift) == (u128::from(ip) >> shift)
            }
            _ => false,
        }
    }
}

/// The proxy addresses whose forwarded client-IP headers are honored.
///
/// Everything the abuse defenses key on (rate windows, IP blocks,
/// reputation) descends from the resolved IP, so the forwarded headers are
/// only believed when the actual socket peer is one of these networks.
/// Empty means no proxy is trusted and the peer address is always used.
#[derive(Clone, Debug, Default)]
pub struct TrustedProxies {
    networks: Vec<IpNetwork>,
}

impl TrustedProxies {
    /// Parse a comma-separated list of addresses and CIDR networks.
    pub fn parse(list: &str) -> Result<Self> {
        let networks = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<IpNetwork>>>()?;
        Ok(Self { networks })
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    pub fn is_trusted(&self, peer: IpAddr) -> bool {
        self.networks.iter().any(|network| network.contains(peer))
    }
}

/// Resolve the real client IP behind the trusted proxy chain.
/// Priority: Cf-Connecting-Ip > first X-Forwarded-For entry > peer address.
///
/// Both headers are client-controlled, so they are honored only when the
/// socket peer is a configured proxy; any other peer gets its own address.
pub fn extract_real_ip(
    req: &Request,
    addr: &SocketAddr,
    trusted_proxies: &TrustedProxies,
) -> String {
    if !trusted_proxies.is_trusted(addr.ip()) {
        return addr.ip().to_string();
    }

    if let Some(cf_ip) = req
        .headers()
        .get("Cf-Connecting-Ip")
        .and_then(|h| h.to_str().ok())
    {
        return cf_ip.trim().to_string();
    }

    if let Some(forwarded) = req
        .headers()
        .get("X-Forwarded-For")
        .and_then(|h| h.to_str().ok())
    {
        // Comma-separated chain; the first entry is the original client
        if let Some(first_ip) = forwarded.split(',').next() {
            let first_ip = first_ip.trim();
            if !first_ip.is_empty() {
                return first_ip.to_string();
            }
        }
    }

    addr.ip().to_string()
}

/// Fingerprint supplied by the client. Absence yields a weak identity that
/// is bucketed by IP alone and subject to stricter limits.
pub fn extract_fingerprint(req: &Request) -> Option<String> {
    req.headers()
        .get("X-Browser-Fingerprint")
        .and_then(|h| h.to_str().ok())
        .map(|fp| fp.trim().to_string())
        .filter(|fp| !fp.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_produce_same_key() {
        let generator = CompositeKeyGenerator::new("test_secret_test_secret_test_secr".into());
        let key1 = generator.generate("192.168.1.1", "fingerprint123");
        let key2 = generator.generate("192.168.1.1", "fingerprint123");
        assert_eq!(key1, key2);
        assert_eq!(key1.len(), 64);
        assert!(key1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_inputs_produce_different_keys() {
        let generator = CompositeKeyGenerator::new("test_secret_test_secret_test_secr".into());
        let base = generator.generate("192.168.1.1", "fingerprint123");
        assert_ne!(base, generator.generate("192.168.1.2", "fingerprint123"));
        assert_ne!(base, generator.generate("192.168.1.1", "fingerprint124"));
    }

    #[test]
    fn different_secrets_produce_disjoint_keys() {
        let a = CompositeKeyGenerator::new("secret-a-secret-a-secret-a-secret".into());
        let b = CompositeKeyGenerator::new("secret-b-secret-b-secret-b-secret".into());
        assert_ne!(
            a.generate("10.0.0.1", "fp"),
            b.generate("10.0.0.1", "fp")
        );
    }

    #[test]
    fn separator_prevents_boundary_collisions() {
        let generator = CompositeKeyGenerator::new("test_secret_test_secret_test_secr".into());
        // "ab" + "c" must not collide with "a" + "bc"
        assert_ne!(generator.generate("ab", "c"), generator.generate("a", "bc"));
    }

    #[test]
    fn network_parsing_and_matching() {
        let net: IpNetwork = "10.0.0.0/8".parse().unwrap();
        assert!(net.contains("10.200.1.2".parse().unwrap()));
        assert!(!net.contains("11.0.0.1".parse().unwrap()));

        // A bare address is an exact match
        let exact: IpNetwork = "203.0.113.7".parse().unwrap();
        assert!(exact.contains("203.0.113.7".parse().unwrap()));
        assert!(!exact.contains("203.0.113.8".parse().unwrap()));

        let v6: IpNetwork = "fd00::/8".parse().unwrap();
        assert!(v6.contains("fd00::1".parse().unwrap()));
        assert!(!v6.contains("10.0.0.1".parse().unwrap()));

        assert!("10.0.0.0/33".parse::<IpNetwork>().is_err());
        assert!("not-an-ip".parse::<IpNetwork>().is_err());
    }

    #[test]
    fn trusted_proxies_list() {
        let proxies = TrustedProxies::parse("127.0.0.0/8, ::1").unwrap();
        assert!(!proxies.is_empty());
        assert!(proxies.is_trusted("127.0.0.1".parse().unwrap()));
        assert!(proxies.is_trusted("::1".parse().unwrap()));
        assert!(!proxies.is_trusted("203.0.113.9".parse().unwrap()));

        assert!(TrustedProxies::parse("").unwrap().is_empty());
        assert!(TrustedProxies::parse("garbage").is_err());
    }

    fn forwarded_request() -> Request {
        axum::http::Request::builder()
            .uri("/messages")
            .header("Cf-Connecting-Ip", "198.51.100.4")
            .header("X-Forwarded-For", "192.0.2.10, 10.0.0.1")
            .body(axum::body::Body::empty())
            .unwrap()
    }

    #[test]
    fn forwarded_headers_are_ignored_from_untrusted_peers() {
        let addr: SocketAddr = "203.0.113.9:443".parse().unwrap();

        let ip = extract_real_ip(&forwarded_request(), &addr, &TrustedProxies::default());
        assert_eq!(ip, "203.0.113.9");
    }

    #[test]
    fn forwarded_headers_are_honored_from_trusted_peers() {
        let proxies = TrustedProxies::parse("127.0.0.0/8").unwrap();
        let addr: SocketAddr = "127.0.0.1:55123".parse().unwrap();

        // Cf-Connecting-Ip wins over X-Forwarded-For
        let ip = extract_real_ip(&forwarded_request(), &addr, &proxies);
        assert_eq!(ip, "198.51.100.4");

        let xff_only = axum::http::Request::builder()
            .uri("/messages")
            .header("X-Forwarded-For", "192.0.2.10, 10.0.0.1")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(extract_real_ip(&xff_only, &addr, &proxies), "192.0.2.10");

        let bare = axum::http::Request::builder()
            .uri("/messages")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(extract_real_ip(&bare, &addr, &proxies), "127.0.0.1");
    }
}
