//! Redis key layout.
//!
//! ```text
//! frontlas:frontiers:{frontier_id}          hash  {advertised_sb_addr, advertised_eb_addr, edge_count, service_count}
//! frontlas:alive:frontiers:{frontier_id}    1, alive TTL
//! frontlas:edges:{edge_id}                  Residency JSON, edge meta TTL
//! frontlas:alive:edges:{edge_id}            1, alive TTL
//! frontlas:services:{service_id}            Residency JSON, service meta TTL
//! frontlas:alive:services:{service_id}      1, alive TTL
//! ```

pub const FRONTIERS_PREFIX: &str = "frontlas:frontiers:";
pub const ALIVE_FRONTIERS_PREFIX: &str = "frontlas:alive:frontiers:";

pub const FIELD_SB_ADDR: &str = "advertised_sb_addr";
pub const FIELD_EB_ADDR: &str = "advertised_eb_addr";
pub const FIELD_EDGE_COUNT: &str = "edge_count";
pub const FIELD_SERVICE_COUNT: &str = "service_count";

/// Which kind of resident a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Edge,
    Service,
}

impl Role {
    pub fn prefix(self) -> &'static str {
        match self {
            Role::Edge => "frontlas:edges:",
            Role::Service => "frontlas:services:",
        }
    }

    pub fn alive_prefix(self) -> &'static str {
        match self {
            Role::Edge => "frontlas:alive:edges:",
            Role::Service => "frontlas:alive:services:",
        }
    }

    /// Counter field on the owning frontier's hash
    pub fn counter(self) -> &'static str {
        match self {
            Role::Edge => FIELD_EDGE_COUNT,
            Role::Service => FIELD_SERVICE_COUNT,
        }
    }

    pub fn key(self, id: u64) -> String {
        format!("{}{}", self.prefix(), id)
    }

    pub fn alive_key(self, id: u64) -> String {
        format!("{}{}", self.alive_prefix(), id)
    }

    pub fn pattern(self) -> String {
        format!("{}*", self.prefix())
    }
}

pub fn frontier_key(frontier_id: &str) -> String {
    format!("{}{}", FRONTIERS_PREFIX, frontier_id)
}

pub fn alive_frontier_key(frontier_id: &str) -> String {
    format!("{}{}", ALIVE_FRONTIERS_PREFIX, frontier_id)
}

pub fn frontier_pattern() -> String {
    format!("{}*", FRONTIERS_PREFIX)
}

/// Id part of a resident key
pub fn resident_id(role: Role, key: &str) -> Option<u64> {
    key.strip_prefix(role.prefix())?.parse().ok()
}

/// What an expired `frontlas:alive:*` key stood for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expired {
    Frontier(String),
    Resident(Role, u64),
}

pub fn parse_expired(key: &str) -> Option<Expired> {
    if let Some(frontier_id) = key.strip_prefix(ALIVE_FRONTIERS_PREFIX) {
        return Some(Expired::Frontier(frontier_id.to_string()));
    }
    for role in [Role::Edge, Role::Service] {
        if let Some(id) = key.strip_prefix(role.alive_prefix()) {
            return id.parse().ok().map(|id| Expired::Resident(role, id));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resident_keys() {
        assert_eq!(Role::Edge.key(42), "frontlas:edges:42");
        assert_eq!(Role::Service.alive_key(7), "frontlas:alive:services:7");
        assert_eq!(resident_id(Role::Edge, "frontlas:edges:42"), Some(42));
        assert_eq!(resident_id(Role::Edge, "frontlas:services:42"), None);
    }

    #[test]
    fn test_parse_expired() {
        assert_eq!(
            parse_expired("frontlas:alive:frontiers:f1"),
            Some(Expired::Frontier("f1".to_string()))
        );
        assert_eq!(
            parse_expired("frontlas:alive:edges:9"),
            Some(Expired::Resident(Role::Edge, 9))
        );
        assert_eq!(parse_expired("frontlas:edges:9"), None);
        assert_eq!(parse_expired("frontlas:alive:services:x"), None);
    }
}
