//! The Agora node: wires the governance engine to its collaborators, serves
//! the RPC API and runs the deadline sweeper until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use agora_governance::{DelegationTable, GovernanceEngine, ParamsHandle, StandardPolicy};
use agora_nullables::{NullAccounts, NullLedger};
use agora_rpc::{AppState, GovernanceMetrics, RpcServer};
use agora_store::AccountStore;
use agora_types::{Amount, Clock, Identity, SystemClock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::{NodeConfig, NodeError, ShutdownController};

/// How long [`AgoraNode::stop`] waits for background tasks.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct AgoraNode {
    config: NodeConfig,
    pub engine: Arc<GovernanceEngine>,
    pub metrics: Arc<GovernanceMetrics>,
    /// In-memory ledger backing the engine.
    pub ledger: Arc<NullLedger>,
    /// In-memory balance service seeded from `initial_balances`.
    pub accounts: Arc<NullAccounts>,
    shutdown: Arc<ShutdownController>,
    rpc_addr: Option<SocketAddr>,
    /// Handles for spawned background tasks (joined during shutdown).
    task_handles: Vec<JoinHandle<()>>,
}

impl AgoraNode {
    /// Create a node on the system clock.
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a node with an explicit clock.
    pub fn with_clock(config: NodeConfig, clock: Arc<dyn Clock>) -> Result<Self, NodeError> {
        config.validate()?;

        let ledger = Arc::new(NullLedger::new());
        let accounts = Arc::new(NullAccounts::with_balances(
            config.initial_balances.iter().map(|(name, balance)| {
                (Identity::new(name.as_str()), Amount::new(u128::from(*balance)))
            }),
        ));
        let params = ParamsHandle::new(config.governance.clone());
        let policy = Arc::new(StandardPolicy::new(params.clone(), config.blacklist_ids()?));

        let mut builder = GovernanceEngine::builder();
        if !config.delegations.is_empty() {
            let table = DelegationTable::with_delegations(config.delegations.iter().map(
                |(name, weight)| (Identity::new(name.as_str()), Amount::new(u128::from(*weight))),
            ));
            tracing::info!(representatives = config.delegations.len(), "delegated voting weight enabled");
            builder = builder.delegation(Arc::new(table));
        }
        let engine = builder
            .ledger(ledger.clone())
            .accounts(accounts.clone())
            .clock(clock)
            .params(params)
            .policy(policy)
            .administrators(config.administrator_ids()?)
            .default_timeout(config.default_timeout())
            .build()?;

        if config.administrators.is_empty() {
            tracing::warn!("no administrators configured; revert and threshold changes are disabled");
        }

        Ok(Self {
            config,
            engine: Arc::new(engine),
            metrics: Arc::new(GovernanceMetrics::new()),
            ledger,
            accounts,
            shutdown: Arc::new(ShutdownController::new()),
            rpc_addr: None,
            task_handles: Vec::new(),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Address the RPC server is listening on, once started.
    pub fn rpc_addr(&self) -> Option<SocketAddr> {
        self.rpc_addr
    }

    pub fn balance(&self, account: &Identity) -> Result<Amount, NodeError> {
        self.accounts
            .balance(account)
            .map_err(|e| NodeError::Governance(e.into()))
    }

    /// Tally every proposal whose voting deadline has passed.
    pub async fn sweep_once(&self) -> Result<usize, NodeError> {
        Ok(sweep(&self.engine, &self.metrics).await?)
    }

    /// Start the sweeper and, if enabled, the RPC server. Returns once both
    /// are running.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        tracing::info!(
            rpc = self.config.enable_rpc,
            sweep_interval_secs = self.config.sweep_interval_secs,
            threshold_bps = self.engine.delegation_threshold().bps,
            "Agora node starting"
        );

        // ── Deadline sweeper ──────────────────────────────────────────────
        let engine = Arc::clone(&self.engine);
        let metrics = Arc::clone(&self.metrics);
        let mut shutdown_rx = self.shutdown.subscribe();
        let period = self.config.sweep_interval();
        let sweeper = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await; // skip the immediate first tick
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {
                        tracing::info!("sweeper shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = sweep(&engine, &metrics).await {
                            tracing::warn!(error = %e, "deadline sweep failed");
                        }
                    }
                }
            }
        });
        self.task_handles.push(sweeper);

        // ── RPC server (optional) ─────────────────────────────────────────
        if self.config.enable_rpc {
            let server = RpcServer::bind(self.config.rpc_addr()).await?;
            self.rpc_addr = Some(server.local_addr()?);
            let state = AppState::new(Arc::clone(&self.engine), Arc::clone(&self.metrics));
            let stop = self.shutdown.signalled();
            let rpc_handle = tokio::spawn(async move {
                if let Err(e) = server.serve(state, stop).await {
                    tracing::error!(error = %e, "RPC server error");
                }
            });
            self.task_handles.push(rpc_handle);
        }

        tracing::info!(rpc_addr = ?self.rpc_addr, "Agora node started");
        Ok(())
    }

    /// Start, wait for SIGINT/SIGTERM, then stop.
    pub async fn run(&mut self) -> Result<(), NodeError> {
        self.start().await?;
        let shutdown = Arc::clone(&self.shutdown);
        tokio::select! {
            _ = shutdown.wait_for_signal() => {}
            _ = shutdown.signalled() => {}
        }
        self.stop().await
    }

    /// Stop the node gracefully.
    ///
    /// Signals every task, then waits for them up to a timeout.
    pub async fn stop(&mut self) -> Result<(), NodeError> {
        tracing::info!("Agora node stopping");
        self.shutdown.shutdown();

        let handles: Vec<JoinHandle<()>> = self.task_handles.drain(..).collect();
        let wait_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, wait_all).await.is_err() {
            tracing::warn!(
                "shutdown timeout ({:?}); some tasks may still be running",
                SHUTDOWN_TIMEOUT
            );
        }

        tracing::info!("Agora node stopped");
        Ok(())
    }
}

async fn sweep(
    engine: &GovernanceEngine,
    metrics: &GovernanceMetrics,
) -> Result<usize, agora_governance::GovernanceError> {
    let closed = engine.sweep_expired().await?;
    for (id, result) in &closed {
        metrics.record_tally(result);
        tracing::info!(proposal = %id, approved = result.approved, "closed expired proposal");
    }
    Ok(closed.len())
}
