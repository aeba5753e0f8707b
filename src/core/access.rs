//! Access filters evaluated per request after a route has been resolved.
//!
//! Both filters are fail-open: an unconfigured filter admits everything, and
//! an unknown (empty) source IP is never rejected.
use std::{collections::HashSet, net::IpAddr, str::FromStr};

/// CIDR network entry (e.g. `10.0.0.0/8`) in an IP restriction list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpNetwork {
    addr: IpAddr,
    prefix_len: u8,
}

impl IpNetwork {
    /// Parse `addr/prefix`. Plain addresses are not networks; they are
    /// matched textually by [`IpFilter`].
    pub fn parse(s: &str) -> Result<Self, String> {
        let (ip_str, prefix_str) = s
            .split_once('/')
            .ok_or_else(|| format!("'{s}' is not in CIDR notation"))?;
        let addr = IpAddr::from_str(ip_str).map_err(|e| format!("invalid IP address: {e}"))?;
        let prefix_len: u8 = prefix_str
            .parse()
            .map_err(|e| format!("invalid prefix length: {e}"))?;
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix_len > max {
            return Err(format!("prefix length {prefix_len} exceeds {max}"));
        }
        Ok(Self { addr, prefix_len })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX
                    .checked_shl(32 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                u32::from(net) & mask == u32::from(addr) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                u128::from(net) & mask == u128::from(addr) & mask
            }
            _ => false,
        }
    }
}

/// Allow-list of source IPs for a single route.
///
/// Plain entries are compared as canonical addresses, so `::ffff:10.0.0.1`
/// (an IPv4 peer on a dual-stack listener) matches `10.0.0.1`. CIDR entries
/// match any address inside the network. Entries that are not IPs at all
/// only match the identical string.
#[derive(Debug, Clone, Default)]
pub struct IpFilter {
    addrs: HashSet<IpAddr>,
    networks: Vec<IpNetwork>,
    literals: HashSet<String>,
}

impl IpFilter {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut filter = Self::default();
        for entry in entries {
            let entry = entry.into();
            if entry.contains('/') {
                match IpNetwork::parse(&entry) {
                    Ok(network) => filter.networks.push(network),
                    Err(e) => {
                        tracing::warn!(entry = %entry, error = %e, "ignoring ip restriction entry");
                        filter.literals.insert(entry);
                    }
                }
            } else {
                match IpAddr::from_str(&entry) {
                    Ok(addr) => {
                        filter.addrs.insert(addr.to_canonical());
                    }
                    Err(_) => {
                        filter.literals.insert(entry);
                    }
                }
            }
        }
        filter
    }

    fn is_unrestricted(&self) -> bool {
        self.addrs.is_empty() && self.networks.is_empty() && self.literals.is_empty()
    }

    pub fn allow(&self, ip: &str) -> bool {
        if ip.is_empty() || self.is_unrestricted() || self.literals.contains(ip) {
            return true;
        }
        match IpAddr::from_str(ip) {
            Ok(addr) => {
                let addr = addr.to_canonical();
                self.addrs.contains(&addr) || self.networks.iter().any(|n| n.contains(addr))
            }
            Err(_) => false,
        }
    }
}

/// gRPC method policy built from a route's allow and disallow lists.
///
/// An explicit allow entry always wins, even over a matching disallow entry.
#[derive(Debug, Clone, Default)]
pub struct MethodPolicy {
    allow: HashSet<String>,
    disallow: HashSet<String>,
}

impl MethodPolicy {
    pub fn new<I, J, S>(allow: I, disallow: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow: allow.into_iter().map(Into::into).collect(),
            disallow: disallow.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allow(&self, method: &str) -> bool {
        self.allow.contains(method) || self.disallow.is_empty() || !self.disallow.contains(method)
    }
}
