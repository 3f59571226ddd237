//! One broker node: clock, devices, scheduler and state collector wired
//! together against a peer network.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::BrokerConfig;
use crate::device::{Adapter, DeviceFactory, GenericAdapter, PhysicalDeviceManager};
use crate::error::{BrokerError, Result};
use crate::peer::{InMemoryNetwork, NetworkEndpoint, PeerId, PeerMessage, PeerTransport};
use crate::scheduler::{PhaseScheduler, SchedulerHandle};
use crate::snapshot::message::request;
use crate::snapshot::{CollectedState, ScheduledResponseTimer, SnapshotAgent, SnapshotError};

/// Module that owns the state collector's timers
pub const SNAPSHOT_MODULE: &str = "sc";

/// Phase given to the state collector when the configuration omits it
const FALLBACK_SNAPSHOT_PHASE: Duration = Duration::from_millis(400);

/// Handler keys the state collector listens on
const AGENT_KEYS: [&str; 2] = ["sc", "any"];

pub struct BrokerNode {
    uuid: PeerId,
    network: InMemoryNetwork,
    endpoint: NetworkEndpoint,
    scheduler: SchedulerHandle,
    devices: Arc<PhysicalDeviceManager>,
    adapter: Arc<GenericAdapter>,
    shutdown: CancellationToken,
    scheduler_task: JoinHandle<()>,
    agent_task: JoinHandle<std::result::Result<(), SnapshotError>>,
}

impl BrokerNode {
    /// Start a node on the system clock (with the configured skew)
    pub async fn start(config: BrokerConfig, network: InMemoryNetwork) -> Result<Self> {
        let clock = Arc::new(SystemClock::with_skew_ms(config.scheduler.clock_skew_ms));
        Self::start_with_clock(config, network, clock).await
    }

    pub async fn start_with_clock(
        config: BrokerConfig,
        network: InMemoryNetwork,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let uuid = config.node_uuid();

        let adapter = Arc::new(GenericAdapter::new());
        let devices = Arc::new(PhysicalDeviceManager::new());
        let factory = DeviceFactory::with_builtin_classes(devices.clone(), adapter.clone());
        factory.create_devices(&config.devices.specs)?;
        for value in &config.devices.values {
            if !devices.device_exists(&value.device) {
                warn!(device = %value.device, "Initial value for an unknown device");
            }
            adapter.set(&value.device, &value.signal, value.value);
        }

        let (scheduler, scheduler_task) =
            PhaseScheduler::spawn(config.scheduler.scheduler_config(), clock);
        for module in &config.scheduler.modules {
            scheduler.register_module(module.id.clone(), module.phase());
        }
        if !config.scheduler.modules.iter().any(|m| m.id == SNAPSHOT_MODULE) {
            warn!(
                phase_ms = FALLBACK_SNAPSHOT_PHASE.as_millis() as u64,
                "State collector module not configured; appending it"
            );
            scheduler.register_module(SNAPSHOT_MODULE, FALLBACK_SNAPSHOT_PHASE);
        }

        let (endpoint, inbox) = network.join(uuid.clone(), &AGENT_KEYS);
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let timer = ScheduledResponseTimer::new(
            scheduler.clone(),
            scheduler.allocate_timer(SNAPSHOT_MODULE),
            timer_tx,
        );
        let agent = SnapshotAgent::new(
            Arc::new(endpoint.clone()),
            devices.clone(),
            Box::new(timer),
            config.snapshot.clone(),
        )
        .with_peers(config.peers.iter().cloned());

        let shutdown = CancellationToken::new();
        let agent_task = tokio::spawn(agent.run(inbox, timer_rx, shutdown.child_token()));

        let modules = scheduler.modules().await?;
        info!(
            uuid = %uuid,
            modules = modules.len(),
            devices = devices.device_count(),
            peers = config.peers.len(),
            "Broker node started"
        );

        Ok(Self {
            uuid,
            network,
            endpoint,
            scheduler,
            devices,
            adapter,
            shutdown,
            scheduler_task,
            agent_task,
        })
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    pub fn devices(&self) -> &Arc<PhysicalDeviceManager> {
        &self.devices
    }

    /// Update a device signal; later snapshots see the new value.
    pub fn set_signal(&self, device: &str, signal: &str, value: f64) {
        self.adapter.set(device, signal, value);
    }

    /// Send a message to a peer as this node
    pub fn send(&self, peer: &str, message: PeerMessage) -> bool {
        self.endpoint.send(peer, message)
    }

    /// Ask the local state collector for a global snapshot on behalf of
    /// `module`. The answer arrives on [`BrokerNode::subscribe_results`].
    pub fn request_snapshot(&self, module: &str) -> bool {
        self.endpoint.send(&self.uuid, request(&self.uuid, module))
    }

    /// Listen for collected states addressed to `module`
    pub fn subscribe_results(&self, module: &str) -> SnapshotResults {
        let (_, rx) = self.network.join(self.uuid.clone(), &[module]);
        SnapshotResults {
            module: module.to_string(),
            rx,
        }
    }

    /// Stop the state collector and the scheduler and leave the network.
    pub async fn shutdown(self) -> Result<()> {
        info!(uuid = %self.uuid, "Shutting down broker node");
        self.shutdown.cancel();
        self.scheduler.stop();
        self.network.leave(&self.uuid);

        let agent = self.agent_task.await.map_err(|e| BrokerError::TaskFailed {
            task: "state collector",
            message: e.to_string(),
        })?;
        self.scheduler_task
            .await
            .map_err(|e| BrokerError::TaskFailed {
                task: "scheduler",
                message: e.to_string(),
            })?;
        agent?;
        Ok(())
    }
}

impl std::fmt::Debug for BrokerNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerNode")
            .field("uuid", &self.uuid)
            .field("devices", &self.devices.device_count())
            .finish()
    }
}

/// Stream of collected states for one module
#[derive(Debug)]
pub struct SnapshotResults {
    module: String,
    rx: mpsc::UnboundedReceiver<PeerMessage>,
}

impl SnapshotResults {
    /// Next collected state, or `None` once the node has left the network
    pub async fn next(&mut self) -> Option<CollectedState> {
        while let Some(message) = self.rx.recv().await {
            if let Some(state) = CollectedState::from_message(&self.module, &message) {
                return Some(state);
            }
        }
        None
    }
}
