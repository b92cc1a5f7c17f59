//! Redis-backed [`ClusterStore`].
//!
//! Multi-key updates run as Lua scripts so that a record and its
//! frontier's counter never disagree for longer than one call. Residency
//! writes go through a `MULTI` pipeline.
//!
//! In cluster mode the scripts touch keys outside `KEYS`, and `SCAN` only
//! walks the node the command lands on. Both hold for single-shard
//! deployments, which is what cluster mode is used for here.

use super::connection::{self, RedisConnection};
use super::{ClusterStore, Resident, Ttls};
use crate::error::{FrontlasError, Result};
use crate::keys::{
    alive_frontier_key, frontier_key, frontier_pattern, resident_id, Role, FIELD_EB_ADDR,
    FIELD_EDGE_COUNT, FIELD_SB_ADDR, FIELD_SERVICE_COUNT, FRONTIERS_PREFIX,
};
use async_trait::async_trait;
use frontier_config::RedisConfig;
use once_cell::sync::Lazy;
use redis::{Client, Script};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use types::{Frontier, FrontierMeta, FrontierStats, Residency};

/// KEYS: frontier, alive. ARGV: sb addr, eb addr, meta ttl ms, alive ttl ms.
static CREATE_FRONTIER: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local created = redis.call('EXISTS', KEYS[1]) == 0
redis.call('HSET', KEYS[1], 'advertised_sb_addr', ARGV[1], 'advertised_eb_addr', ARGV[2])
if created then
    redis.call('HSET', KEYS[1], 'edge_count', 0, 'service_count', 0)
end
redis.call('PEXPIRE', KEYS[1], ARGV[3])
redis.call('SET', KEYS[2], 1, 'PX', ARGV[4])
if created then
    return 1
end
return 0
"#,
    )
});

/// KEYS: frontier. ARGV: edge count, service count.
static SET_FRONTIER_STATS: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
redis.call('HSET', KEYS[1], 'edge_count', ARGV[1], 'service_count', ARGV[2])
return 1
"#,
    )
});

/// KEYS: resident, alive. ARGV: owner ('' for any), frontier prefix,
/// counter field, '1' when called for an expired alive key.
static DELETE_RESIDENT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
if ARGV[4] == '1' and redis.call('EXISTS', KEYS[2]) == 1 then
    return 0
end
local meta = redis.call('GET', KEYS[1])
if not meta then
    redis.call('DEL', KEYS[2])
    return 0
end
local frontier_id = cjson.decode(meta)['frontier_id']
if ARGV[1] ~= '' and ARGV[1] ~= frontier_id then
    return 0
end
redis.call('DEL', KEYS[1], KEYS[2])
local frontier = ARGV[2] .. frontier_id
if redis.call('EXISTS', frontier) == 1 then
    if redis.call('HINCRBY', frontier, ARGV[3], -1) < 0 then
        redis.call('HSET', frontier, ARGV[3], 0)
    end
end
return 1
"#,
    )
});

/// Every hash in KEYS as a field/value array, empty for missing keys.
static MULTI_HGETALL: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local out = {}
for i, key in ipairs(KEYS) do
    out[i] = redis.call('HGETALL', key)
end
return out
"#,
    )
});

fn millis(ttl: Duration) -> u64 {
    ttl.as_millis() as u64
}

fn frontier_from_hash(frontier_id: &str, hash: &HashMap<String, String>) -> Option<Frontier> {
    if hash.is_empty() {
        return None;
    }
    let field = |name: &str| hash.get(name).cloned().unwrap_or_default();
    let count = |name: &str| hash.get(name).and_then(|v| v.parse().ok()).unwrap_or(0);
    Some(Frontier {
        frontier_id: frontier_id.to_string(),
        advertised_sb_addr: field(FIELD_SB_ADDR),
        advertised_eb_addr: field(FIELD_EB_ADDR),
        edge_count: count(FIELD_EDGE_COUNT),
        service_count: count(FIELD_SERVICE_COUNT),
    })
}

#[derive(Clone)]
pub struct RedisStore {
    conn: RedisConnection,
    client: Option<Client>,
    ttls: Ttls,
}

impl RedisStore {
    pub fn new(conn: RedisConnection, client: Option<Client>, ttls: Ttls) -> Self {
        Self { conn, client, ttls }
    }

    /// Connect according to `config` and wrap the connection
    pub async fn connect(config: &RedisConfig, ttls: Ttls) -> Result<Self> {
        let connected = connection::connect(config).await?;
        Ok(Self::new(connected.conn, connected.client, ttls))
    }

    /// Client for keyspace subscriptions; `None` in cluster mode
    pub fn client(&self) -> Option<&Client> {
        self.client.as_ref()
    }

    pub fn db(&self) -> i64 {
        redis::aio::ConnectionLike::get_db(&self.conn)
    }

    fn conn(&self) -> RedisConnection {
        self.conn.clone()
    }

    /// Ask Redis to publish expired-key events; harmless when already set
    pub async fn enable_expiry_events(&self) -> Result<()> {
        redis::cmd("CONFIG")
            .arg("SET")
            .arg("notify-keyspace-events")
            .arg("Ex")
            .query_async::<_, ()>(&mut self.conn())
            .await?;
        Ok(())
    }

    /// Zero the counters of a frontier whose alive key lapsed
    pub async fn reset_frontier_counts(&self, frontier_id: &str) -> Result<()> {
        self.set_frontier_stats(frontier_id, FrontierStats::default()).await
    }

    /// Remove a residency whose alive key lapsed, unless it was re-created
    pub async fn expire_resident(&self, role: Role, id: u64) -> Result<bool> {
        self.run_delete(role, id, "", true).await
    }

    async fn run_delete(&self, role: Role, id: u64, owner: &str, expired: bool) -> Result<bool> {
        let removed: i64 = DELETE_RESIDENT
            .key(role.key(id))
            .key(role.alive_key(id))
            .arg(owner)
            .arg(FRONTIERS_PREFIX)
            .arg(role.counter())
            .arg(if expired { "1" } else { "0" })
            .invoke_async(&mut self.conn())
            .await?;
        Ok(removed == 1)
    }

    async fn scan(&self, pattern: &str, cursor: u64, count: u64) -> Result<(Vec<String>, u64)> {
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count.max(1))
            .query_async(&mut self.conn())
            .await?;
        Ok((keys, next))
    }

    async fn scan_all(&self, pattern: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor = 0;
        loop {
            let (mut batch, next) = self.scan(pattern, cursor, 1000).await?;
            keys.append(&mut batch);
            if next == 0 {
                return Ok(keys);
            }
            cursor = next;
        }
    }

    async fn hgetall_many(&self, frontier_ids: &[String]) -> Result<Vec<Frontier>> {
        if frontier_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut invocation = MULTI_HGETALL.prepare_invoke();
        for frontier_id in frontier_ids {
            invocation.key(frontier_key(frontier_id));
        }
        let hashes: Vec<HashMap<String, String>> = invocation.invoke_async(&mut self.conn()).await?;
        Ok(frontier_ids
            .iter()
            .zip(hashes.iter())
            .filter_map(|(frontier_id, hash)| frontier_from_hash(frontier_id, hash))
            .collect())
    }

    async fn mget_residents(&self, role: Role, ids: &[u64]) -> Result<Vec<Resident>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids.iter().map(|id| role.key(*id)).collect();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut self.conn())
            .await?;
        let mut residents = Vec::with_capacity(ids.len());
        for (id, value) in ids.iter().zip(values) {
            if let Some(json) = value {
                residents.push((*id, serde_json::from_str(&json)?));
            }
        }
        Ok(residents)
    }
}

#[async_trait]
impl ClusterStore for RedisStore {
    async fn create_frontier(&self, meta: &FrontierMeta) -> Result<bool> {
        let created: i64 = CREATE_FRONTIER
            .key(frontier_key(&meta.frontier_id))
            .key(alive_frontier_key(&meta.frontier_id))
            .arg(&meta.advertised_sb_addr)
            .arg(&meta.advertised_eb_addr)
            .arg(millis(self.ttls.frontier_meta))
            .arg(millis(self.ttls.alive))
            .invoke_async(&mut self.conn())
            .await?;
        Ok(created == 1)
    }

    async fn refresh_frontier(&self, frontier_id: &str) -> Result<()> {
        let (row, alive): (bool, bool) = redis::pipe()
            .cmd("PEXPIRE")
            .arg(frontier_key(frontier_id))
            .arg(millis(self.ttls.frontier_meta))
            .cmd("PEXPIRE")
            .arg(alive_frontier_key(frontier_id))
            .arg(millis(self.ttls.alive))
            .query_async(&mut self.conn())
            .await?;
        if row && alive {
            Ok(())
        } else {
            Err(FrontlasError::ExpireFailed)
        }
    }

    async fn delete_frontier(&self, frontier_id: &str) -> Result<()> {
        redis::cmd("DEL")
            .arg(frontier_key(frontier_id))
            .arg(alive_frontier_key(frontier_id))
            .query_async::<_, ()>(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn set_frontier_stats(&self, frontier_id: &str, stats: FrontierStats) -> Result<()> {
        let updated: i64 = SET_FRONTIER_STATS
            .key(frontier_key(frontier_id))
            .arg(stats.edge_count.max(0))
            .arg(stats.service_count.max(0))
            .invoke_async(&mut self.conn())
            .await?;
        if updated == 0 {
            debug!(frontier_id, "stats for unknown frontier ignored");
        }
        Ok(())
    }

    async fn get_frontier(&self, frontier_id: &str) -> Result<Option<Frontier>> {
        let hash: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(frontier_key(frontier_id))
            .query_async(&mut self.conn())
            .await?;
        Ok(frontier_from_hash(frontier_id, &hash))
    }

    async fn get_frontiers(&self, ids: &[String]) -> Result<Vec<Frontier>> {
        self.hgetall_many(ids).await
    }

    async fn scan_frontiers(&self, cursor: u64, count: u64) -> Result<(Vec<Frontier>, u64)> {
        let (keys, next) = self.scan(&frontier_pattern(), cursor, count).await?;
        let ids: Vec<String> = keys
            .iter()
            .filter_map(|key| key.strip_prefix(FRONTIERS_PREFIX).map(str::to_string))
            .collect();
        Ok((self.hgetall_many(&ids).await?, next))
    }

    async fn count_frontiers(&self) -> Result<u64> {
        Ok(self.scan_all(&frontier_pattern()).await?.len() as u64)
    }

    async fn set_resident(&self, role: Role, id: u64, residency: &Residency) -> Result<()> {
        let json = serde_json::to_string(residency)?;
        redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(role.key(id))
            .arg(json)
            .arg("PX")
            .arg(millis(self.ttls.meta(role)))
            .ignore()
            .cmd("SET")
            .arg(role.alive_key(id))
            .arg(1)
            .arg("PX")
            .arg(millis(self.ttls.alive))
            .ignore()
            .cmd("HINCRBY")
            .arg(frontier_key(&residency.frontier_id))
            .arg(role.counter())
            .arg(1)
            .ignore()
            .query_async::<_, ()>(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn refresh_resident(&self, role: Role, id: u64) -> Result<()> {
        let (meta, alive): (bool, bool) = redis::pipe()
            .cmd("PEXPIRE")
            .arg(role.key(id))
            .arg(millis(self.ttls.meta(role)))
            .cmd("PEXPIRE")
            .arg(role.alive_key(id))
            .arg(millis(self.ttls.alive))
            .query_async(&mut self.conn())
            .await?;
        if meta && alive {
            Ok(())
        } else {
            Err(FrontlasError::ExpireFailed)
        }
    }

    async fn delete_resident(&self, role: Role, id: u64, owner: Option<&str>) -> Result<bool> {
        self.run_delete(role, id, owner.unwrap_or(""), false).await
    }

    async fn get_resident(&self, role: Role, id: u64) -> Result<Option<Residency>> {
        let json: Option<String> = redis::cmd("GET")
            .arg(role.key(id))
            .query_async(&mut self.conn())
            .await?;
        json.map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(FrontlasError::from)
    }

    async fn get_residents(&self, role: Role, ids: &[u64]) -> Result<Vec<Resident>> {
        self.mget_residents(role, ids).await
    }

    async fn scan_residents(&self, role: Role, cursor: u64, count: u64) -> Result<(Vec<Resident>, u64)> {
        let (keys, next) = self.scan(&role.pattern(), cursor, count).await?;
        let ids: Vec<u64> = keys.iter().filter_map(|key| resident_id(role, key)).collect();
        Ok((self.mget_residents(role, &ids).await?, next))
    }

    async fn count_residents(&self, role: Role) -> Result<u64> {
        let keys = self.scan_all(&frontier_pattern()).await?;
        let ids: Vec<String> = keys
            .iter()
            .filter_map(|key| key.strip_prefix(FRONTIERS_PREFIX).map(str::to_string))
            .collect();
        let frontiers = self.hgetall_many(&ids).await?;
        let total: i64 = frontiers
            .iter()
            .map(|f| match role {
                Role::Edge => f.edge_count,
                Role::Service => f.service_count,
            })
            .filter(|count| *count > 0)
            .sum();
        debug!(role = ?role, total, frontiers = frontiers.len(), "counted residents");
        Ok(total as u64)
    }
}
