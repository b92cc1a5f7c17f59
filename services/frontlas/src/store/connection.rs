//! Redis connections by deployment mode.
//!
//! | mode         | connection                                   | keyspace events |
//! |--------------|----------------------------------------------|-----------------|
//! | `standalone` | `ConnectionManager` to the first address     | yes             |
//! | `sentinel`   | `ConnectionManager` to the resolved master   | yes             |
//! | `cluster`    | `ClusterConnection` seeded with every address | no              |

use crate::error::{FrontlasError, Result};
use frontier_config::RedisConfig;
use redis::aio::{ConnectionLike, ConnectionManager};
use redis::cluster::ClusterClientBuilder;
use redis::cluster_async::ClusterConnection;
use redis::sentinel::{Sentinel, SentinelNodeConnectionInfo};
use redis::{Client, Cmd, ConnectionAddr, ConnectionInfo, Pipeline, RedisConnectionInfo, RedisFuture, Value};
use tracing::info;

const DEFAULT_PORT: u16 = 6379;

/// One logical connection whatever the deployment mode; clones share it
#[derive(Clone)]
pub enum RedisConnection {
    Single(ConnectionManager),
    Cluster(ClusterConnection),
}

impl ConnectionLike for RedisConnection {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        match self {
            RedisConnection::Single(conn) => conn.req_packed_command(cmd),
            RedisConnection::Cluster(conn) => conn.req_packed_command(cmd),
        }
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        match self {
            RedisConnection::Single(conn) => conn.req_packed_commands(cmd, offset, count),
            RedisConnection::Cluster(conn) => conn.req_packed_commands(cmd, offset, count),
        }
    }

    fn get_db(&self) -> i64 {
        match self {
            RedisConnection::Single(conn) => conn.get_db(),
            RedisConnection::Cluster(conn) => conn.get_db(),
        }
    }
}

/// A live connection plus, outside cluster mode, the client to subscribe with
pub struct Connected {
    pub conn: RedisConnection,
    pub client: Option<Client>,
}

/// Connect the way `config.mode` asks
pub async fn connect(config: &RedisConfig) -> Result<Connected> {
    let first = config
        .addrs
        .first()
        .ok_or_else(|| FrontlasError::Address(String::new()))?;

    match config.mode.as_str() {
        "standalone" => {
            let client = Client::open(connection_info(first, config)?)?;
            let conn = ConnectionManager::new(client.clone()).await?;
            info!(addr = %first, db = config.db, "redis connected");
            Ok(Connected {
                conn: RedisConnection::Single(conn),
                client: Some(client),
            })
        }
        "sentinel" => {
            let sentinels = config
                .addrs
                .iter()
                .map(|addr| connection_info(addr, config).map(|info| ConnectionInfo {
                    redis: RedisConnectionInfo::default(),
                    ..info
                }))
                .collect::<Result<Vec<_>>>()?;
            let mut sentinel = Sentinel::build(sentinels)?;
            let node = SentinelNodeConnectionInfo {
                tls_mode: None,
                redis_connection_info: Some(redis_info(config)),
            };
            let client = sentinel.async_master_for(&config.master_name, Some(&node)).await?;
            let conn = ConnectionManager::new(client.clone()).await?;
            info!(master = %config.master_name, sentinels = config.addrs.len(), "redis connected");
            Ok(Connected {
                conn: RedisConnection::Single(conn),
                client: Some(client),
            })
        }
        "cluster" => {
            let nodes = config
                .addrs
                .iter()
                .map(|addr| connection_info(addr, config))
                .collect::<Result<Vec<_>>>()?;
            let mut builder = ClusterClientBuilder::new(nodes);
            if !config.user.is_empty() {
                builder = builder.username(config.user.clone());
            }
            if !config.password.is_empty() {
                builder = builder.password(config.password.clone());
            }
            let conn = builder.build()?.get_async_connection().await?;
            info!(nodes = config.addrs.len(), "redis cluster connected");
            Ok(Connected {
                conn: RedisConnection::Cluster(conn),
                client: None,
            })
        }
        other => Err(FrontlasError::UnsupportedRedisMode(other.to_string())),
    }
}

fn redis_info(config: &RedisConfig) -> RedisConnectionInfo {
    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
    RedisConnectionInfo {
        db: config.db,
        username: non_empty(&config.user),
        password: non_empty(&config.password),
        ..Default::default()
    }
}

fn connection_info(addr: &str, config: &RedisConfig) -> Result<ConnectionInfo> {
    let (host, port) = split_host_port(addr)?;
    Ok(ConnectionInfo {
        addr: ConnectionAddr::Tcp(host, port),
        redis: redis_info(config),
    })
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(FrontlasError::Address(addr.to_string()));
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port
                .parse()
                .map_err(|_| FrontlasError::Address(addr.to_string()))?;
            Ok((host.trim_matches(|c| c == '[' || c == ']').to_string(), port))
        }
        Some(_) => Err(FrontlasError::Address(addr.to_string())),
        None => Ok((addr.to_string(), DEFAULT_PORT)),
    }
}
