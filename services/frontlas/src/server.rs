//! Composition root of the locator process.

use crate::api;
use crate::error::{FrontlasError, Result};
use crate::locator::Locator;
use crate::plane::FrontierPlane;
use crate::store::{ClusterStore, RedisStore, Ttls};
use crate::watcher;
use frontier_config::FrontlasConfig;
use health_check::HealthReporter;
use network::{Listener, TcpListener};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A running locator
pub struct Frontlas {
    plane: Arc<FrontierPlane>,
    locator: Locator,
    health: HealthReporter,
    api_addr: Option<SocketAddr>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Frontlas {
    /// Connect Redis, bind both planes named by `config`, and start
    pub async fn bind(config: &FrontlasConfig) -> Result<Self> {
        for (section, listen) in [
            ("control_plane", &config.control_plane.listen),
            ("frontier_plane", &config.frontier_plane.listen),
        ] {
            if listen.tls.enable {
                warn!(section, "tls is configured but not terminated by this process");
            }
        }

        let api_addr: SocketAddr = config
            .control_plane
            .listen
            .addr
            .parse()
            .map_err(|_| FrontlasError::Address(config.control_plane.listen.addr.clone()))?;

        let ttls = Ttls::from(&config.frontier_manager.expiration);
        let store = RedisStore::connect(&config.redis, ttls).await?;

        let plane_addr = &config.frontier_plane.listen.addr;
        let listener = TcpListener::bind(plane_addr)
            .await
            .map_err(|source| FrontlasError::Bind {
                section: "frontier_plane",
                addr: plane_addr.clone(),
                source,
            })?;

        let mut frontlas = Self::start(Arc::new(store.clone()), listener, Some(api_addr))?;
        match watcher::spawn(store, frontlas.shutdown.subscribe()) {
            Some(task) => frontlas.tasks.push(task),
            None => warn!(mode = %config.redis.mode, "expiry watcher unavailable, records lapse without counter updates"),
        }
        Ok(frontlas)
    }

    /// Start on `listener` over any store; `api_addr` of `None` leaves the API off
    pub fn start(
        store: Arc<dyn ClusterStore>,
        listener: impl Listener,
        api_addr: Option<SocketAddr>,
    ) -> Result<Self> {
        let plane = FrontierPlane::new(store.clone());
        let locator = Locator::new(store);
        let health = HealthReporter::new("frontlas");
        let (shutdown, _) = watch::channel(false);

        let mut tasks = Vec::new();
        let serving = plane.clone();
        tasks.push(tokio::spawn(async move { serving.serve(listener).await }));

        let mut bound_api = None;
        if let Some(addr) = api_addr {
            let mut closed = shutdown.subscribe();
            let stop = async move {
                let _ = closed.wait_for(|closed| *closed).await;
            };
            let (bound, running) = api::bind(addr, locator.clone(), health.clone(), stop)?;
            bound_api = Some(bound);
            tasks.push(tokio::spawn(running));
        }

        health.set_serving(true);
        info!("frontlas started");
        Ok(Self {
            plane,
            locator,
            health,
            api_addr: bound_api,
            shutdown,
            tasks,
        })
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn plane(&self) -> &Arc<FrontierPlane> {
        &self.plane
    }

    pub fn api_addr(&self) -> Option<SocketAddr> {
        self.api_addr
    }

    pub fn health(&self) -> &HealthReporter {
        &self.health
    }

    /// Stop accepting, disconnect frontiers, and stop the API and watcher
    pub async fn close(self) {
        self.health.set_serving(false);
        self.plane.close();
        self.plane.close_frontiers();
        self.shutdown.send_replace(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!("frontlas closed");
    }
}
