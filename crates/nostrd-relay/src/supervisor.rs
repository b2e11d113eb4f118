// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Node supervisor
//!
//! Starts the store change-feed dispatcher, the processor worker pool, the
//! rate limiter janitor and the server, and coordinates the graceful drain
//! in reverse order.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use nostrd_protocol::{JsonUtil, Kind};
use nostrd_store::{Changefeed, EventStore, MemoryStore};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::Config;
use crate::connection::Services;
use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::limiter::RateLimiter;
use crate::processor::EventProcessor;
use crate::server;
use crate::validator::Validator;

const JANITOR_INTERVAL: Duration = Duration::from_secs(3_600);
const JANITOR_MAX_IDLE: Duration = Duration::from_secs(86_400);

/// Relay node lifecycle
#[derive(Debug)]
pub struct NodeSupervisor {
    config: Arc<Config>,
    processor: EventProcessor,
    shutdown: broadcast::Sender<()>,
    local_addr: SocketAddr,
    server_handle: JoinHandle<()>,
    dispatcher_handle: JoinHandle<()>,
    janitor_handle: JoinHandle<()>,
    worker_handles: Vec<JoinHandle<()>>,
}

impl NodeSupervisor {
    /// Start a node over the default in-memory store
    pub async fn start(config: Config) -> Result<Self, Error> {
        Self::with_store(config, Arc::new(MemoryStore::new())).await
    }

    /// Start a node over the given store
    pub async fn with_store(config: Config, store: Arc<dyn EventStore>) -> Result<Self, Error> {
        config.validate()?;
        let config: Arc<Config> = Arc::new(config);

        let (shutdown, ..) = broadcast::channel::<()>(1);

        // Dispatcher reads the change-feed
        let dispatcher: Dispatcher = Dispatcher::new(config.slow_consumer_threshold);
        let feed: Changefeed = store.changefeed();
        let dispatcher_handle: JoinHandle<()> =
            tokio::spawn(dispatcher.clone().run(feed, shutdown.subscribe()));

        // Processor worker pool
        let (processor, worker_handles) = EventProcessor::start(
            store.clone(),
            dispatcher.clone(),
            config.workers,
            config.queue_size,
            Kind::from_u16(config.gift_wrap_kind),
        );

        // Rate limiter and its janitor
        let limiter: Arc<RateLimiter> = Arc::new(RateLimiter::new(&config.rate_limit));
        let janitor_handle: JoinHandle<()> =
            tokio::spawn(janitor(limiter.clone(), shutdown.subscribe()));

        // Server
        let listener: TcpListener = TcpListener::bind(config.ws_addr).await?;
        let local_addr: SocketAddr = listener.local_addr()?;
        let services = Services {
            config: config.clone(),
            store,
            dispatcher,
            processor: processor.clone(),
            limiter,
            validator: Arc::new(Validator::new(&config)),
        };
        let info_json: Arc<String> = Arc::new(config.relay_information().as_json());
        let server_handle: JoinHandle<()> = tokio::spawn(server::accept_loop(
            listener,
            services,
            shutdown.clone(),
            Arc::new(Semaphore::new(config.max_connections)),
            info_json,
        ));

        tracing::info!(%local_addr, "Relay node started.");

        Ok(Self {
            config,
            processor,
            shutdown,
            local_addr,
            server_handle,
            dispatcher_handle,
            janitor_handle,
            worker_handles,
        })
    }

    /// Bound socket address
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// WebSocket url of the node
    #[inline]
    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Signal shutdown: stop accepting connections and new jobs
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
        self.processor.close();
    }

    /// Drain and stop, in reverse start order
    ///
    /// The accept loop stops at once; connections close; the processor
    /// finishes in-flight jobs; the dispatcher stops last. Every stage is
    /// bounded by the configured shutdown timeout.
    pub async fn join(self) {
        let Self {
            config,
            processor,
            shutdown,
            server_handle,
            dispatcher_handle,
            janitor_handle,
            worker_handles,
            ..
        } = self;

        let _ = shutdown.send(());
        processor.close();
        let drain: Duration = config.shutdown_timeout();

        if timeout(drain, server_handle).await.is_err() {
            tracing::warn!("Server drain timed out.");
        }

        // Workers exit once every queue sender is gone
        drop(processor);
        for handle in worker_handles.into_iter() {
            if timeout(drain, handle).await.is_err() {
                tracing::warn!("Processor drain timed out.");
            }
        }

        if timeout(drain, dispatcher_handle).await.is_err() {
            tracing::warn!("Dispatcher drain timed out.");
        }

        janitor_handle.abort();

        tracing::info!("Relay node stopped.");
    }
}

/// Sweep idle rate limiter keys until shutdown
async fn janitor(limiter: Arc<RateLimiter>, mut shutdown: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(JANITOR_INTERVAL);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let removed: usize = limiter.sweep_idle(JANITOR_MAX_IDLE);
                if removed > 0 {
                    tracing::debug!(removed, "Swept idle rate limiter keys.");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}
