//! Composition root.
//!
//! Builds the repository, both bounds, the MQ manager, and the exchange,
//! wires the bounds to the exchange, and starts the accept loops. The
//! binary goes through [`Frontier::bind`]; tests and embedders hand their own
//! listeners to [`Frontier::start`].

use crate::apis::{Edgebound, Exchange, Informer, Servicebound};
use crate::bypass::BypassListener;
use crate::control::{self, ControlPlane};
use crate::edgebound::{EdgeManager, EdgeboundOptions};
use crate::error::{ServerError, ServerResult};
use crate::exchange::{Exchanger, DEFAULT_DEADLINE};
use crate::informer::{FrontlasInformer, FrontlasInformerOptions, NoopInformer};
use crate::mq::MqManager;
use crate::servicebound::ServiceManager;
use frontier_config::FrontierConfig;
use health_check::HealthReporter;
use network::{AcceptorOptions, Listener, TcpConnector, TcpListener};
use repository::{EdgeStore, MemoryEdgeStore, MemoryServiceStore, ServiceStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use types::{FrontierMeta, HashPolicy, IdSource, MonotonicIdSource};

/// Everything [`Frontier::start`] needs besides listeners
#[derive(Clone)]
pub struct FrontierOptions {
    pub edgebound: EdgeboundOptions,
    pub servicebound: AcceptorOptions,
    pub hash_by: HashPolicy,
    pub produce_timeout: Duration,
    /// Deadline of every cross-bound call and publish
    pub deadline: Duration,
    pub ids: Arc<dyn IdSource>,
    /// Control plane address; `None` leaves it off
    pub controlplane: Option<SocketAddr>,
}

impl Default for FrontierOptions {
    fn default() -> Self {
        Self {
            edgebound: EdgeboundOptions::default(),
            servicebound: AcceptorOptions::default(),
            hash_by: HashPolicy::default(),
            produce_timeout: DEFAULT_DEADLINE,
            deadline: DEFAULT_DEADLINE,
            ids: Arc::new(MonotonicIdSource::new()),
            controlplane: None,
        }
    }
}

impl FrontierOptions {
    pub fn from_config(config: &FrontierConfig) -> ServerResult<Self> {
        let controlplane = if config.controlplane.enable {
            let addr = &config.controlplane.listen.addr;
            Some(addr.parse().map_err(|_| ServerError::Address {
                section: "controlplane",
                addr: addr.clone(),
            })?)
        } else {
            None
        };
        Ok(Self {
            edgebound: EdgeboundOptions {
                edgeid_alloc_when_no_idservice_on: config.edgebound.edgeid_alloc_when_no_idservice_on,
                acceptor: AcceptorOptions::default(),
            },
            hash_by: config.exchange.hash_by,
            produce_timeout: Duration::from_secs(config.mqm.produce_timeout),
            controlplane,
            ..Self::default()
        })
    }
}

/// A running gateway
pub struct Frontier {
    edges: Arc<EdgeManager>,
    services: Arc<ServiceManager>,
    exchange: Exchanger,
    mqm: Arc<MqManager>,
    control: Arc<ControlPlane>,
    controlplane_addr: Option<SocketAddr>,
    health: HealthReporter,
    informer: Option<Arc<FrontlasInformer>>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Frontier {
    /// Bind the listeners named by `config` and start
    pub async fn bind(config: &FrontierConfig) -> ServerResult<Self> {
        for (section, listen) in [
            ("edgebound", &config.edgebound.listen),
            ("servicebound", &config.servicebound.listen),
            ("controlplane", &config.controlplane.listen),
        ] {
            if listen.tls.enable {
                warn!(section, "tls is configured but not terminated by this process");
            }
        }

        let edge_addr = &config.edgebound.listen.addr;
        let edge_listener: Box<dyn Listener> = if config.edgebound.bypass_enable {
            Box::new(
                BypassListener::bind(edge_addr, config.edgebound.bypass.addr.clone())
                    .await
                    .map_err(|source| ServerError::Bind {
                        section: "edgebound",
                        addr: edge_addr.clone(),
                        source,
                    })?,
            )
        } else {
            Box::new(TcpListener::bind(edge_addr).await.map_err(|source| ServerError::Bind {
                section: "edgebound",
                addr: edge_addr.clone(),
                source,
            })?)
        };

        let service_addr = &config.servicebound.listen.addr;
        let service_listener = TcpListener::bind(service_addr).await.map_err(|source| ServerError::Bind {
            section: "servicebound",
            addr: service_addr.clone(),
            source,
        })?;

        let informer = if config.frontlas.enable {
            let frontier_id = if config.daemon.frontier_id.is_empty() {
                format!("{:016x}", rand::random::<u64>())
            } else {
                config.daemon.frontier_id.clone()
            };
            let options = FrontlasInformerOptions {
                addrs: config.frontlas.dial.addrs.clone(),
                meta: FrontierMeta {
                    frontier_id,
                    advertised_sb_addr: config.servicebound.listen.advertised().to_string(),
                    advertised_eb_addr: config.edgebound.listen.advertised().to_string(),
                },
                heartbeat_interval: Duration::from_secs(config.frontlas.heartbeat_interval.max(1)),
            };
            info!(frontier_id = %options.meta.frontier_id, "frontlas reporting enabled");
            Some(Arc::new(FrontlasInformer::start(Arc::new(TcpConnector), options)))
        } else {
            None
        };

        let options = FrontierOptions::from_config(config)?;
        let reporting = informer.clone().map(|informer| informer as Arc<dyn Informer>);
        let mut frontier = Self::start(options, edge_listener, service_listener, reporting)?;
        frontier.informer = informer;
        Ok(frontier)
    }

    /// Start on the given listeners; `informer` defaults to a no-op
    pub fn start(
        options: FrontierOptions,
        edge_listener: impl Listener,
        service_listener: impl Listener,
        informer: Option<Arc<dyn Informer>>,
    ) -> ServerResult<Self> {
        let informer = informer.unwrap_or_else(|| Arc::new(NoopInformer));
        let edge_store: Arc<dyn EdgeStore> = Arc::new(MemoryEdgeStore::new());
        let service_store: Arc<dyn ServiceStore> = Arc::new(MemoryServiceStore::new());
        let mqm = Arc::new(MqManager::new(options.hash_by, options.produce_timeout));

        let edges = EdgeManager::new(
            options.edgebound.clone(),
            edge_store.clone(),
            informer.clone(),
            options.ids.clone(),
        );
        let services = ServiceManager::new(
            options.servicebound.clone(),
            service_store.clone(),
            mqm.clone(),
            informer,
            options.ids.clone(),
        );

        let exchange = Exchanger::new(
            edges.clone() as Arc<dyn Edgebound>,
            services.clone() as Arc<dyn Servicebound>,
            mqm.clone(),
            options.hash_by,
        )
        .with_deadline(options.deadline);
        edges.set_exchange(Arc::new(exchange.clone()) as Arc<dyn Exchange>);
        services.set_exchange(Arc::new(exchange.clone()) as Arc<dyn Exchange>);

        let control = Arc::new(ControlPlane::new(
            edges.clone(),
            services.clone(),
            edge_store,
            service_store,
        ));
        let health = HealthReporter::new("frontier");
        let (shutdown, _) = watch::channel(false);

        let mut tasks = Vec::new();
        let serving = edges.clone();
        tasks.push(tokio::spawn(async move {
            let _ = serving.serve(edge_listener).await;
        }));
        let serving = services.clone();
        tasks.push(tokio::spawn(async move {
            let _ = serving.serve(service_listener).await;
        }));

        let mut controlplane_addr = None;
        if let Some(addr) = options.controlplane {
            let mut closed = shutdown.subscribe();
            let stop = async move {
                let _ = closed.wait_for(|closed| *closed).await;
            };
            let (bound, running) = control::bind(addr, control.clone(), health.clone(), stop)?;
            controlplane_addr = Some(bound);
            tasks.push(tokio::spawn(running));
        }

        health.set_serving(true);
        info!("frontier started");
        Ok(Self {
            edges,
            services,
            exchange,
            mqm,
            control,
            controlplane_addr,
            health,
            informer: None,
            shutdown,
            tasks,
        })
    }

    pub fn edgebound(&self) -> Arc<dyn Edgebound> {
        self.edges.clone()
    }

    pub fn servicebound(&self) -> Arc<dyn Servicebound> {
        self.services.clone()
    }

    pub fn exchange(&self) -> &Exchanger {
        &self.exchange
    }

    pub fn mqm(&self) -> &Arc<MqManager> {
        &self.mqm
    }

    pub fn control(&self) -> &Arc<ControlPlane> {
        &self.control
    }

    pub fn controlplane_addr(&self) -> Option<SocketAddr> {
        self.controlplane_addr
    }

    pub fn health(&self) -> &HealthReporter {
        &self.health
    }

    /// Stop accepting, close every end, and stop reporting
    pub async fn close(self) {
        self.health.set_serving(false);
        self.edges.close();
        self.services.close();
        self.edges.close_edges();
        self.services.close_services();
        if let Some(informer) = &self.informer {
            informer.close();
        }
        self.shutdown.send_replace(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!("frontier closed");
    }
}
