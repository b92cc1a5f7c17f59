//! Composable list queries.
//!
//! Every query is a conjunction of optional filters followed by an ordering
//! and a page window. `None` means "do not filter on this".

use serde::{Deserialize, Serialize};

/// `[start, end)` window over `create_time` (unix ms)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl TimeRange {
    pub fn contains(&self, t: i64) -> bool {
        self.start.map_or(true, |start| t >= start) && self.end.map_or(true, |end| t < end)
    }
}

/// Offset/limit window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }

    pub(crate) fn apply<T>(&self, rows: Vec<T>) -> Vec<T> {
        let rows = rows.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => rows.take(limit).collect(),
            None => rows.collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeOrder {
    EdgeId,
    Addr,
    #[default]
    CreateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeQuery {
    pub edge_id: Option<u64>,
    /// Only edges that announced this RPC
    pub rpc: Option<String>,
    /// Substring of the handshake meta
    pub meta: Option<String>,
    /// Substring of the remote address
    pub addr: Option<String>,
    pub time: TimeRange,
    pub order: EdgeOrder,
    /// Ascending when set; newest first otherwise
    pub ascending: bool,
    pub page: Page,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceOrder {
    ServiceId,
    Service,
    Addr,
    #[default]
    CreateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceQuery {
    pub service_id: Option<u64>,
    pub rpc: Option<String>,
    pub topic: Option<String>,
    /// Substring of the service name
    pub service: Option<String>,
    pub addr: Option<String>,
    pub time: TimeRange,
    pub order: ServiceOrder,
    pub ascending: bool,
    pub page: Page,
}

/// Query over `EdgeRpc` or `ServiceRpc` rows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcQuery {
    /// Edge id or service id
    pub owner_id: Option<u64>,
    /// Substring of the RPC name
    pub rpc: Option<String>,
    pub time: TimeRange,
    pub ascending: bool,
    pub page: Page,
}

/// Query over `ServiceTopic` rows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicQuery {
    pub service_id: Option<u64>,
    /// Substring of the topic
    pub topic: Option<String>,
    pub time: TimeRange,
    pub ascending: bool,
    pub page: Page,
}

pub(crate) fn contains(filter: &Option<String>, value: &str) -> bool {
    filter.as_deref().map_or(true, |needle| value.contains(needle))
}

/// Sort newest first unless `ascending`
pub(crate) fn order_by<T, K: Ord>(rows: &mut [T], ascending: bool, key: impl Fn(&T) -> K) {
    if ascending {
        rows.sort_by(|a, b| key(a).cmp(&key(b)));
    } else {
        rows.sort_by(|a, b| key(b).cmp(&key(a)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range_is_half_open() {
        let range = TimeRange {
            start: Some(10),
            end: Some(20),
        };
        assert!(range.contains(10));
        assert!(range.contains(19));
        assert!(!range.contains(20));
        assert!(TimeRange::default().contains(i64::MIN));
    }

    #[test]
    fn test_page_window() {
        let rows: Vec<u32> = (0..10).collect();
        assert_eq!(Page::new(2, 3).apply(rows.clone()), vec![2, 3, 4]);
        assert_eq!(Page::new(8, 5).apply(rows.clone()), vec![8, 9]);
        assert_eq!(Page::default().apply(rows).len(), 10);
    }
}
