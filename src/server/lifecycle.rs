//! Server lifecycle
//!
//! `MetaServer` sequences startup strictly: bind the RPC listener, load the
//! configuration, connect the store, verify (and if needed provision) the
//! catalog schema, then mark the server as serving. Binding first means
//! clients get connection errors instead of hangs while the store is being
//! prepared.
//!
//! ```text
//! INIT → LISTENING → STORE_READY → SERVING → STOPPING → STOPPED
//! ```
//!
//! `stop()` is idempotent and may race `start()`. A stop that lands during
//! startup marks the server STOPPING, stops the listener, then waits for the
//! in-flight startup stage to finish before closing the store, so schema
//! provisioning is never cut off between two table creations. Startup
//! re-checks the state after every stage and gives up once a stop has begun.

use crate::config::MetaConfig;
use crate::database::{ensure_catalog_schema, CatalogStatus, StoreHandle};
use crate::error::{BootstrapError, StoreError};
use crate::server::{create_axum_router, RpcContext, ServerConfig, ServerState, StatusSnapshot};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Handle to the running axum listener task
struct RunningListener {
    local_addr: SocketAddr,
    /// Cancelled by `stop()` to begin graceful shutdown
    shutdown: CancellationToken,
    /// Cancelled by the listener task when it exits for any reason
    terminated: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
}

/// The metaserver: RPC listener plus the single store handle
pub struct MetaServer {
    config_path: String,
    listen: ServerConfig,
    store: Arc<StoreHandle>,
    status: Arc<RwLock<StatusSnapshot>>,
    /// Serializes `start()` stages against `stop()`
    listener: Mutex<Option<RunningListener>>,
    /// Held for the whole of `start()`; `stop()` takes it before closing the store
    startup: Mutex<()>,
}

impl MetaServer {
    /// Create a server that will read its store settings from `config_path`
    pub fn new(config_path: impl Into<String>) -> Self {
        Self {
            config_path: config_path.into(),
            listen: ServerConfig::default(),
            store: Arc::new(StoreHandle::new()),
            status: Arc::new(RwLock::new(StatusSnapshot::default())),
            listener: Mutex::new(None),
            startup: Mutex::new(()),
        }
    }

    /// Set the address the RPC listener binds to
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.listen = self.listen.with_address(address);
        self
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServerState {
        self.snapshot().state
    }

    /// Current status, including the catalog schema status once known
    pub fn snapshot(&self) -> StatusSnapshot {
        self.status
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Shared store handle
    pub fn store(&self) -> Arc<StoreHandle> {
        Arc::clone(&self.store)
    }

    /// Address the RPC listener is bound to, while it is running
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.lock().await.as_ref().map(|l| l.local_addr)
    }

    fn update_status(&self, apply: impl FnOnce(&mut StatusSnapshot)) {
        match self.status.write() {
            Ok(mut status) => apply(&mut status),
            Err(poisoned) => apply(&mut poisoned.into_inner()),
        }
    }

    fn set_state(&self, state: ServerState) {
        self.update_status(|s| s.state = state);
    }

    /// Start the server on `port`
    ///
    /// Every error is fatal. The caller is expected to call `stop()` afterwards
    /// to release the listener and any open store connection.
    pub async fn start(&self, port: u16) -> Result<(), BootstrapError> {
        let _startup = self.startup.lock().await;

        let local_addr = self.bind(port).await?;
        info!("RPC server started at port {}", local_addr.port());

        let config = MetaConfig::new(&self.config_path)?;
        info!("loaded configuration: {}", config.summary());

        self.connect_store(&config).await?;
        self.ensure_stage(ServerState::Listening).await?;
        info!("store connected successfully");

        let status = match self.verify_schema().await {
            Ok(status) => status,
            Err(e) => {
                if let Some(status) = CatalogStatus::from_error(&e) {
                    self.update_status(|s| s.schema = Some(status));
                }
                return Err(e);
            }
        };

        {
            let _guard = self.listener.lock().await;
            check_not_stopped(self.state())?;
            self.update_status(|s| {
                s.state = ServerState::StoreReady;
                s.schema = Some(status);
            });
        }

        {
            let _guard = self.listener.lock().await;
            check_not_stopped(self.state())?;
            self.update_status(|s| {
                s.state = ServerState::Serving;
                s.started_at = Some(Utc::now());
            });
        }

        info!("====== MetaServer started successfully ======");
        Ok(())
    }

    /// INIT → LISTENING: bind the RPC listener and spawn the serve task
    async fn bind(&self, port: u16) -> Result<SocketAddr, BootstrapError> {
        let mut guard = self.listener.lock().await;
        let state = self.state();
        if state != ServerState::Init {
            return Err(BootstrapError::Runtime(format!(
                "server cannot be started from state {}",
                state
            )));
        }

        let address = self.listen.clone().with_port(port).bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| BootstrapError::Listen {
                address: address.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| BootstrapError::Listen { address, source })?;

        let app = create_axum_router(RpcContext {
            status: Arc::clone(&self.status),
            store: Arc::clone(&self.store),
        });

        let shutdown = CancellationToken::new();
        let terminated = CancellationToken::new();
        let task = {
            let shutdown = shutdown.clone();
            let terminated = terminated.clone();
            tokio::spawn(async move {
                let _terminated = terminated.drop_guard();
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move { shutdown.cancelled().await })
                    .await
            })
        };

        *guard = Some(RunningListener {
            local_addr,
            shutdown,
            terminated,
            task,
        });
        self.set_state(ServerState::Listening);
        Ok(local_addr)
    }

    /// Connect the store on the blocking pool, bounded by the store timeout
    async fn connect_store(&self, config: &MetaConfig) -> Result<(), BootstrapError> {
        let store = Arc::clone(&self.store);
        let status = Arc::clone(&self.status);
        let timeout = config.store_timeout();
        let (driver, host, user, password) = (
            config.db_driver.clone(),
            config.db_host.clone(),
            config.db_user.clone(),
            config.db_password.clone(),
        );

        // Outlives the timeout below if the connect hangs
        let connect = tokio::task::spawn_blocking(move || {
            connect_unless_stopped(&store, &status, &driver, &host, &user, &password, timeout)
        });

        match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(result)) => result.map_err(BootstrapError::from),
            Ok(Err(join)) => Err(BootstrapError::Runtime(format!(
                "store connect task failed: {}",
                join
            ))),
            Err(_) => Err(BootstrapError::Connection(StoreError::Connection {
                host: config.db_host.clone(),
                reason: format!("timed out after {}s", timeout.as_secs()),
            })),
        }
    }

    /// LISTENING → STORE_READY: check and, on a fresh store, provision
    async fn verify_schema(&self) -> Result<CatalogStatus, BootstrapError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || ensure_catalog_schema(&store))
            .await
            .map_err(|e| BootstrapError::Runtime(format!("schema check task failed: {}", e)))?
    }

    /// Fail if the server left `expected` because a stop began meanwhile
    async fn ensure_stage(&self, expected: ServerState) -> Result<(), BootstrapError> {
        let _guard = self.listener.lock().await;
        let state = self.state();
        if state != expected {
            return Err(BootstrapError::Runtime(format!(
                "startup interrupted in state {}",
                state
            )));
        }
        Ok(())
    }

    /// Close the store on the blocking pool
    async fn close_store(&self) {
        let store = Arc::clone(&self.store);
        if let Err(e) = tokio::task::spawn_blocking(move || store.close()).await {
            error!("store close task failed: {}", e);
        }
    }

    /// Stop the server
    ///
    /// No-op before the listener is bound and after a stop has begun.
    /// Otherwise stops accepting requests, lets in-flight requests drain,
    /// then closes the store.
    pub async fn stop(&self) {
        let running = {
            let mut guard = self.listener.lock().await;
            match self.state() {
                ServerState::Init | ServerState::Stopping | ServerState::Stopped => return,
                _ => {}
            }
            self.set_state(ServerState::Stopping);
            guard.take()
        };

        info!("****** MetaServer shutting down...");

        if let Some(running) = running {
            running.shutdown.cancel();
            match running.task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("RPC server exited with error: {}", e),
                Err(e) => error!("RPC server task failed: {}", e),
            }
        }

        // Let a startup in flight finish its current stage; it sees STOPPING
        // at the next check and returns without touching the store again
        drop(self.startup.lock().await);

        self.close_store().await;
        self.set_state(ServerState::Stopped);
        info!("====== MetaServer has shut down ======");
    }

    /// Wait until the listener terminates or `shutdown` is cancelled, then stop
    ///
    /// Returns immediately if the listener was never started or has already
    /// been stopped.
    pub async fn block_until_termination(&self, shutdown: CancellationToken) {
        let terminated = {
            let guard = self.listener.lock().await;
            match guard.as_ref() {
                Some(running) => running.terminated.clone(),
                None => return,
            }
        };

        tokio::select! {
            _ = terminated.cancelled() => {
                info!("RPC server terminated");
            }
            _ = shutdown.cancelled() => {
                info!("termination signal received");
            }
        }

        self.stop().await;
    }
}

fn check_not_stopped(state: ServerState) -> Result<(), BootstrapError> {
    match state {
        ServerState::Stopping | ServerState::Stopped => Err(BootstrapError::Runtime(
            "startup interrupted by shutdown".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Connect `store` unless a stop has already begun
///
/// Runs on the blocking pool, possibly after `start()` gave up waiting for
/// it. A connection that completes after the server reached STOPPING is
/// closed again before returning.
fn connect_unless_stopped(
    store: &StoreHandle,
    status: &RwLock<StatusSnapshot>,
    driver: &str,
    host: &str,
    user: &str,
    password: &str,
    timeout: Duration,
) -> Result<(), StoreError> {
    let stopping = || {
        let state = status
            .read()
            .map(|s| s.state)
            .unwrap_or_else(|poisoned| poisoned.into_inner().state);
        check_not_stopped(state).is_err()
    };

    if stopping() {
        warn!("skipping store connect, server is stopping");
        return Ok(());
    }

    store.connect_with_timeout(driver, host, user, password, timeout)?;

    if stopping() {
        warn!("closing store connected after shutdown began");
        store.close();
    }
    Ok(())
}
