//! Static IP ban list checked before routing.

use ipnet::IpNet;
use std::net::IpAddr;
use tracing::warn;

/// Banned addresses and networks.
#[derive(Debug, Clone, Default)]
pub struct IpBanList {
    nets: Vec<IpNet>,
}

impl IpBanList {
    /// Build from `banned_ips` entries: bare addresses or CIDR networks.
    pub fn from_entries(entries: &[String]) -> Self {
        let nets = entries
            .iter()
            .filter_map(|entry| match parse_entry(entry) {
                Some(net) => Some(net),
                None => {
                    warn!(entry = %entry, "Ignoring invalid banned IP entry");
                    None
                }
            })
            .collect();
        Self { nets }
    }

    /// Check whether `ip` falls inside any banned network.
    pub fn is_banned(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        self.nets.iter().any(|net| net.contains(&ip))
    }

    pub fn len(&self) -> usize {
        self.nets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nets.is_empty()
    }
}

fn parse_entry(entry: &str) -> Option<IpNet> {
    let entry = entry.trim();
    entry
        .parse::<IpNet>()
        .ok()
        .or_else(|| entry.parse::<IpAddr>().ok().map(IpNet::from))
}
