//! Selection among equivalent services or sinks.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// How the exchange and the MQ manager pick one of N candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashPolicy {
    /// `edge_id mod n`
    #[default]
    EdgeId,
    /// `ipv4(addr) mod n`
    SrcIp,
    /// Uniform
    Random,
}

impl FromStr for HashPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "edgeid" | "" => Ok(Self::EdgeId),
            "srcip" => Ok(Self::SrcIp),
            "random" => Ok(Self::Random),
            other => Err(format!("unknown hash policy: {}", other)),
        }
    }
}

impl fmt::Display for HashPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EdgeId => "edgeid",
            Self::SrcIp => "srcip",
            Self::Random => "random",
        };
        f.write_str(name)
    }
}

/// Index in `0..n` for an envelope from `edge_id` at `addr`.
///
/// Callers check `n > 0` first; `0` is returned for an empty candidate set.
/// A source address that does not parse as an IP falls back to the edge id.
pub fn select_index(policy: HashPolicy, n: usize, edge_id: u64, addr: &str) -> usize {
    if n == 0 {
        return 0;
    }
    let n64 = n as u64;
    match policy {
        HashPolicy::EdgeId => (edge_id % n64) as usize,
        HashPolicy::SrcIp => match ip_value(addr) {
            Some(value) => (value % n64) as usize,
            None => (edge_id % n64) as usize,
        },
        HashPolicy::Random => rand::thread_rng().gen_range(0..n),
    }
}

fn ip_value(addr: &str) -> Option<u64> {
    let ip = match addr.parse::<SocketAddr>() {
        Ok(sock) => sock.ip(),
        Err(_) => addr.parse::<IpAddr>().ok()?,
    };
    match ip {
        IpAddr::V4(v4) => Some(u32::from(v4) as u64),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => Some(u32::from(v4) as u64),
            None => {
                let octets = v6.octets();
                Some(u32::from_be_bytes([octets[12], octets[13], octets[14], octets[15]]) as u64)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_srcip_uses_ipv4_value() {
        // 10.0.0.7 == 0x0A000007
        let index = select_index(HashPolicy::SrcIp, 3, 0, "10.0.0.7:5555");
        assert_eq!(index, (0x0A00_0007u64 % 3) as usize);
    }

    #[test]
    fn test_srcip_falls_back_to_edge_id() {
        assert_eq!(select_index(HashPolicy::SrcIp, 4, 6, "mem:3"), 2);
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("edgeid".parse::<HashPolicy>().unwrap(), HashPolicy::EdgeId);
        assert_eq!("SRCIP".parse::<HashPolicy>().unwrap(), HashPolicy::SrcIp);
        assert!("roundrobin".parse::<HashPolicy>().is_err());
    }

    proptest! {
        #[test]
        fn prop_edgeid_is_stable(edge_id in any::<u64>(), n in 1usize..64) {
            let first = select_index(HashPolicy::EdgeId, n, edge_id, "");
            prop_assert_eq!(first, (edge_id % n as u64) as usize);
            prop_assert_eq!(first, select_index(HashPolicy::EdgeId, n, edge_id, ""));
        }

        #[test]
        fn prop_random_in_range(n in 1usize..64) {
            prop_assert!(select_index(HashPolicy::Random, n, 0, "") < n);
        }
    }
}
