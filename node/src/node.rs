//! Process-level wiring: storage backend, engines, notifier and the
//! background rotation task.

use std::sync::Arc;
use std::time::Duration;

use baton_nullables::NullStore;
use baton_relay::RelayContext;
use baton_store::AttendanceStore;
use baton_store_lmdb::LmdbStore;
use baton_types::{Clock, OsRandom, RandomSource, SystemClock};
use tokio::task::JoinHandle;

use crate::config::NodeConfig;
use crate::metrics::NodeMetrics;
use crate::notifier::BroadcastNotifier;
use crate::scheduler::spawn_rotation_loop;
use crate::service::BatonService;
use crate::shutdown::ShutdownController;
use crate::NodeError;

/// How long [`BatonNode::stop`] waits for background tasks.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct BatonNode {
    config: NodeConfig,
    service: Arc<BatonService>,
    notifier: BroadcastNotifier,
    metrics: Arc<NodeMetrics>,
    shutdown: ShutdownController,
    task_handles: Vec<JoinHandle<()>>,
}

impl BatonNode {
    /// Open the configured store and build the engines on the system clock.
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let store: Arc<dyn AttendanceStore> = if config.memory {
            tracing::warn!("using in-memory store; state is lost on exit");
            Arc::new(NullStore::new())
        } else {
            std::fs::create_dir_all(&config.data_dir)?;
            tracing::info!(path = %config.data_dir.display(), "opening LMDB store");
            Arc::new(LmdbStore::open(&config.data_dir, config.lmdb_map_size)?)
        };
        Self::with_parts(config, store, Arc::new(SystemClock), Arc::new(OsRandom))
    }

    /// Build a node over explicit collaborators.
    pub fn with_parts(
        config: NodeConfig,
        store: Arc<dyn AttendanceStore>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        let challenge_key = match config.challenge_key()? {
            Some(key) => key,
            None => {
                tracing::warn!(
                    "no challenge_secret configured; generated an ephemeral key, \
                     pending challenges will not survive a restart"
                );
                random.seed()?.to_vec()
            }
        };

        let notifier = BroadcastNotifier::new(config.event_channel_capacity);
        let metrics = Arc::new(NodeMetrics::new());
        let ctx = RelayContext::new(
            store,
            clock,
            random,
            Arc::new(notifier.clone()),
            config.relay.clone(),
        );
        let service = Arc::new(BatonService::new(
            ctx,
            challenge_key,
            config.rotation.clone(),
            config.gatekeeper.clone(),
            metrics.clone(),
        ));

        Ok(Self {
            config,
            service,
            notifier,
            metrics,
            shutdown: ShutdownController::new(),
            task_handles: Vec::new(),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn service(&self) -> Arc<BatonService> {
        Arc::clone(&self.service)
    }

    pub fn notifier(&self) -> &BroadcastNotifier {
        &self.notifier
    }

    pub fn metrics(&self) -> Arc<NodeMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }

    /// Start background tasks. Must be called inside a tokio runtime.
    pub fn start(&mut self) {
        let handle = spawn_rotation_loop(
            self.service(),
            self.config.rotation.period(),
            self.shutdown.subscribe(),
        );
        self.task_handles.push(handle);
        tracing::info!("node started");
    }

    /// Signal shutdown and wait for background tasks to finish.
    pub async fn stop(&mut self) -> Result<(), NodeError> {
        self.shutdown.shutdown();
        let handles: Vec<JoinHandle<()>> = self.task_handles.drain(..).collect();
        let wait_all = async {
            for handle in handles {
                if let Err(e) = handle.await {
                    return Err(NodeError::TaskJoin(e.to_string()));
                }
            }
            Ok(())
        };
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, wait_all).await {
            Ok(result) => {
                tracing::info!("node stopped");
                result
            }
            Err(_) => Err(NodeError::ShutdownTimeout),
        }
    }
}
