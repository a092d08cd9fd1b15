//! Main Orchestrator task implementation

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use eventstore::{Event, EventQueue, RetentionPolicy, RetentionReport};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::config::OrchestratorConfig;
use super::consumer::{BatchConsumer, deliver_guarded};
use super::gate::GateState;
use super::handle::OrchestratorHandle;
use super::messages::{OrchestratorEvent, OrchestratorMetrics, OrchestratorRequest, OrchestratorStatus};
use crate::config::Config;
use crate::pause::{PauseCoordinator, PauseRecord};
use crate::presence::PresenceRegistry;
use crate::watcher::{Collector, Debouncer, Trigger, TriggerSource, WatchTargets, WatcherConfig};

/// Clears the maintenance flag when the retention task ends, however it ends
struct MaintenanceGuard(Arc<AtomicBool>);

impl Drop for MaintenanceGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Wires store, watcher, pause and presence into the delivery gate
pub struct Orchestrator {
    config: OrchestratorConfig,
    watcher_config: WatcherConfig,
    retention: RetentionPolicy,
    queue: EventQueue,
    collector: Collector,
    debouncer: Debouncer,
    pause: PauseCoordinator,
    registry: PresenceRegistry,
    consumer: Arc<dyn BatchConsumer>,
    targets: WatchTargets,
    gate: GateState,
    paused_by: Option<PauseRecord>,
    buffer: Vec<Event>,
    metrics: OrchestratorMetrics,
    maintenance_in_flight: Arc<AtomicBool>,
    tx: mpsc::Sender<OrchestratorRequest>,
    rx: mpsc::Receiver<OrchestratorRequest>,
    trigger_tx: mpsc::Sender<Trigger>,
    trigger_rx: mpsc::Receiver<Trigger>,
    events_tx: broadcast::Sender<OrchestratorEvent>,
}

impl Orchestrator {
    /// Open the store and repositories described by `settings`
    ///
    /// Never fails: an unopenable store leaves the orchestrator running with
    /// an unavailable queue, delivering nothing.
    pub fn new(settings: &Config, consumer: Arc<dyn BatchConsumer>) -> Self {
        debug!(state_dir = ?settings.state_dir, "Orchestrator::new: called");
        if let Err(e) = fs::create_dir_all(&settings.state_dir) {
            warn!(state_dir = ?settings.state_dir, error = %e, "Failed to create state directory");
        }

        let queue = EventQueue::open(&settings.storage, &settings.state_dir);
        let pause = PauseCoordinator::from_config(&settings.pause, &settings.state_dir);
        let registry = PresenceRegistry::new(settings.presence_dir());

        let mut signal_dirs = vec![registry.dir().to_path_buf()];
        if let Some(parent) = pause.path().parent() {
            signal_dirs.push(parent.to_path_buf());
        }
        let targets = WatchTargets {
            events_dir: queue.watch_path(),
            signal_dirs,
        };

        let collector = Collector::new(
            queue.clone(),
            settings.watcher.staleness_horizon(),
            settings.watcher.deliver_lifecycle,
        );

        let (tx, rx) = mpsc::channel(settings.orchestrator.channel_buffer.max(1));
        let (trigger_tx, trigger_rx) = mpsc::channel(settings.orchestrator.channel_buffer.max(1));
        let (events_tx, _) = broadcast::channel(settings.orchestrator.event_buffer.max(1));

        Self {
            config: settings.orchestrator.clone(),
            watcher_config: settings.watcher.clone(),
            retention: settings.storage.retention.policy(),
            queue,
            collector,
            debouncer: Debouncer::new(settings.watcher.debounce()),
            pause,
            registry,
            consumer,
            targets,
            gate: GateState::Flowing,
            paused_by: None,
            buffer: Vec::new(),
            metrics: OrchestratorMetrics::default(),
            maintenance_in_flight: Arc::new(AtomicBool::new(false)),
            tx,
            rx,
            trigger_tx,
            trigger_rx,
            events_tx,
        }
    }

    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle::new(self.tx.clone(), self.events_tx.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events_tx.subscribe()
    }

    pub fn gate(&self) -> GateState {
        self.gate
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn metrics(&self) -> &OrchestratorMetrics {
        &self.metrics
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            gate: self.gate,
            buffered: self.buffer.len(),
            pause: self.paused_by.clone(),
            participants: self.registry.participants(),
            backend: self.queue.backend(),
            store_available: self.queue.is_available(),
            metrics: self.metrics.clone(),
        }
    }

    fn broadcast(&self, event: OrchestratorEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }

    /// Seed the gate from current state, then pick up whatever accumulated
    /// while no orchestrator was running
    pub async fn startup(&mut self) {
        debug!("Orchestrator::startup: called");
        let gate = self.refresh_gate().await;
        info!(%gate, "Initial gate state");
        let caught_up = self.collect_once().await;
        if caught_up > 0 {
            info!(count = caught_up, "Catch-up pass collected pending events");
        }
    }

    /// Re-read pause and presence state and move the gate accordingly
    ///
    /// Re-entering Flowing flushes the entire buffer as one batch.
    pub async fn refresh_gate(&mut self) -> GateState {
        self.paused_by = self.pause.read();
        for change in self.registry.scan() {
            debug!(?change, "Orchestrator::refresh_gate: presence change");
            self.broadcast(OrchestratorEvent::Presence(change));
        }

        let next = GateState::resolve(self.paused_by.is_some(), self.registry.is_busy());
        if next != self.gate {
            let from = std::mem::replace(&mut self.gate, next);
            info!(%from, to = %next, buffered = self.buffer.len(), "Gate changed");
            self.broadcast(OrchestratorEvent::GateChanged { from, to: next });
        }

        if self.gate.is_flowing() && !self.buffer.is_empty() {
            let buffered = std::mem::take(&mut self.buffer);
            info!(count = buffered.len(), "Flushing buffered events");
            self.deliver(buffered, true).await;
        }
        self.gate
    }

    /// Run one collection pass and route its batch through the gate
    ///
    /// Returns the number of deliverable events the pass produced.
    pub async fn collect_once(&mut self) -> usize {
        let collector = self.collector.clone();
        let collected = match tokio::task::spawn_blocking(move || collector.collect()).await {
            Ok(Some(collected)) => collected,
            Ok(None) => {
                self.metrics.skipped_passes += 1;
                return 0;
            }
            Err(e) => {
                warn!(error = %e, "Collection pass failed");
                return 0;
            }
        };

        self.metrics.passes += 1;
        self.metrics.stale_discarded += collected.stale as u64;
        let count = collected.events.len();
        self.metrics.events_collected += count as u64;

        // The gate is re-read before every dispatch rather than trusted
        self.refresh_gate().await;

        if count == 0 {
            return 0;
        }
        if self.gate.is_flowing() {
            self.deliver(collected.events, false).await;
        } else {
            debug!(count, gate = %self.gate, "Orchestrator::collect_once: buffering batch");
            self.buffer.extend(collected.events);
        }
        count
    }

    async fn deliver(&mut self, batch: Vec<Event>, from_buffer: bool) {
        let count = batch.len();
        let consumer = Arc::clone(&self.consumer);
        match deliver_guarded(consumer.as_ref(), batch).await {
            Ok(()) => {
                self.metrics.batches_delivered += 1;
                self.metrics.events_delivered += count as u64;
                debug!(count, from_buffer, "Orchestrator::deliver: batch delivered");
                self.broadcast(OrchestratorEvent::BatchDelivered { count, from_buffer });
            }
            Err(error) => {
                self.metrics.consumer_failures += 1;
                warn!(count, %error, "Consumer failed on batch");
                self.broadcast(OrchestratorEvent::ConsumerFailed { count, error });
            }
        }
    }

    /// Prune dead participants and start a retention pass in the background
    ///
    /// Returns None if the previous retention pass is still running.
    fn start_maintenance(&mut self) -> Option<JoinHandle<RetentionReport>> {
        if self
            .maintenance_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Orchestrator::start_maintenance: previous run still in flight, skipping");
            self.metrics.skipped_maintenance += 1;
            return None;
        }
        self.metrics.maintenance_runs += 1;

        let pruned = self.registry.prune_dead();
        if pruned > 0 {
            info!(pruned, "Maintenance pruned dead participants");
        }

        let guard = MaintenanceGuard(Arc::clone(&self.maintenance_in_flight));
        let queue = self.queue.clone();
        let policy = self.retention.clone();
        Some(tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let report = queue.retain(&policy);
            if !report.is_empty() {
                info!(?report, "Retention pass finished");
            }
            report
        }))
    }

    /// Run one maintenance sweep to completion
    pub async fn run_maintenance(&mut self) -> Option<RetentionReport> {
        let task = self.start_maintenance()?;
        let report = match task.await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "Retention task failed");
                None
            }
        };
        self.refresh_gate().await;
        report
    }

    async fn on_trigger(&mut self, trigger: Trigger) {
        self.metrics.triggers += 1;
        match trigger {
            Trigger::Events => {
                self.debouncer.trigger(Instant::now());
            }
            Trigger::Poll => {
                self.debouncer.arm(Instant::now());
            }
            Trigger::Signals => {
                self.refresh_gate().await;
            }
        }
    }

    async fn on_deadline(&mut self) {
        let Some(triggers) = self.debouncer.fire(Instant::now()) else {
            return;
        };
        debug!(triggers, "Orchestrator::on_deadline: debounce window closed");
        self.collect_once().await;
        self.debouncer.complete(Instant::now());
        self.metrics.coalesced_triggers = self.debouncer.coalesced();
    }

    /// Run the Orchestrator task
    ///
    /// This consumes the Orchestrator and runs until shutdown is requested
    /// or every handle is dropped.
    pub async fn run(mut self) {
        info!(backend = ?self.queue.backend(), "Orchestrator started");
        self.startup().await;

        let mut source = TriggerSource::spawn(&self.watcher_config, self.targets.clone(), self.trigger_tx.clone());

        let period = self.config.maintenance_interval();
        let mut maintenance = tokio::time::interval_at(Instant::now() + period, period);
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let deadline = self.debouncer.deadline();
            tokio::select! {
                req = self.rx.recv() => match req {
                    Some(OrchestratorRequest::Trigger(trigger)) => self.on_trigger(trigger).await,
                    Some(OrchestratorRequest::GetStatus { reply_tx }) => {
                        let _ = reply_tx.send(self.status());
                    }
                    Some(OrchestratorRequest::Shutdown) | None => {
                        debug!("Orchestrator::run: shutdown requested");
                        break;
                    }
                },
                Some(trigger) = self.trigger_rx.recv() => self.on_trigger(trigger).await,
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_deadline().await;
                }
                _ = maintenance.tick() => {
                    // Retention runs detached; the in-flight flag skips overlapping ticks
                    let _ = self.start_maintenance();
                    self.refresh_gate().await;
                }
            }
        }

        source.stop();
        if !self.buffer.is_empty() {
            warn!(buffered = self.buffer.len(), "Stopping with undelivered buffered events");
        }
        info!("Orchestrator stopped");
    }
}
