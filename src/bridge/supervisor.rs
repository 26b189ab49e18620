//! Route Supervisor
//!
//! Starts one forwarding engine per route, restarts terminated routes
//! according to the [`RestartPolicy`], and drains the shared feedback
//! channel for the lifetime of the process.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::engine::{EngineError, EngineSettings, ForwardingEngine};
use super::feedback::{
    delivery_policy, feedback_channel, DeliveryOutcome, DeliveryPolicy, FeedbackSender,
    FeedbackStats, IgnoreOutcomes,
};
use super::restart::RestartPolicy;
use super::state::{ForwardingState, StateCell};
use crate::client::ClientConnector;
use crate::config::Config;
use crate::identity::{IdentityGenerator, RandomIdentities};
use crate::route::{Route, RouteId};

/// A supervised route
pub struct RouteHandle {
    route: Route,
    state: StateCell,
    restarts: AtomicU32,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RouteHandle {
    fn new(route: Route) -> Self {
        Self {
            route,
            state: StateCell::new(),
            restarts: AtomicU32::new(0),
            task: Mutex::new(None),
        }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn id(&self) -> &RouteId {
        self.route.id()
    }

    pub fn state(&self) -> ForwardingState {
        self.state.get()
    }

    /// Number of times the engine was restarted over the process lifetime.
    ///
    /// The restart limit counts only consecutive failed attempts.
    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::Relaxed)
    }
}

/// Everything a route worker needs, cloned out of the supervisor
#[derive(Clone)]
struct Worker {
    connector: Arc<dyn ClientConnector>,
    identities: Arc<dyn IdentityGenerator>,
    settings: EngineSettings,
    restart: RestartPolicy,
    feedback: FeedbackSender,
}

impl Worker {
    async fn run(self, handle: Arc<RouteHandle>, mut shutdown: watch::Receiver<bool>) {
        let id = handle.id().clone();
        // Failed attempts since the engine last reached `Running`
        let mut failures: u32 = 0;

        loop {
            let engine = ForwardingEngine::new(
                handle.route.clone(),
                self.settings,
                self.connector.clone(),
                self.identities.clone(),
                self.feedback.clone(),
            )
            .with_state(handle.state.clone());

            let reason = match engine.run(shutdown.clone()).await {
                Ok(()) => return,
                Err(e) => {
                    // Only an engine that subscribed and ran can fail while consuming
                    if matches!(e, EngineError::Consume(_)) {
                        failures = 0;
                    }
                    e.reason()
                }
            };

            let Some(delay) = self.restart.next_delay(failures, &reason) else {
                warn!("Route '{}': Terminated ({})", id, reason);
                return;
            };
            warn!(
                "Route '{}': Terminated ({}), restarting in {:?}",
                id, reason, delay
            );

            tokio::select! {
                biased;

                _ = shutdown_requested(&mut shutdown) => {
                    debug!("Route '{}': Restart cancelled by shutdown", id);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            failures = failures.saturating_add(1);
            handle.state.reset();
            handle.restarts.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Resolves when shutdown is requested or the sender is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Owns every route's engine and the feedback channel
pub struct RouteSupervisor {
    routes: RwLock<Vec<Arc<RouteHandle>>>,
    worker: Worker,
    feedback_rx: tokio::sync::Mutex<mpsc::Receiver<DeliveryOutcome>>,
    policy: Arc<dyn DeliveryPolicy>,
    stats: Arc<FeedbackStats>,
    shutdown: watch::Sender<bool>,
}

impl RouteSupervisor {
    /// Create a supervisor with random client identities, no restarts and
    /// outcomes ignored
    pub fn new(
        connector: Arc<dyn ClientConnector>,
        settings: EngineSettings,
        feedback_capacity: usize,
    ) -> Self {
        let (feedback_tx, feedback_rx) = feedback_channel(feedback_capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        let stats = feedback_tx.stats();

        Self {
            routes: RwLock::new(Vec::new()),
            worker: Worker {
                connector,
                identities: Arc::new(RandomIdentities),
                settings,
                restart: RestartPolicy::Never,
                feedback: feedback_tx,
            },
            feedback_rx: tokio::sync::Mutex::new(feedback_rx),
            policy: Arc::new(IgnoreOutcomes),
            stats,
            shutdown,
        }
    }

    /// Create a supervisor from configuration
    pub fn from_config(config: &Config, connector: Arc<dyn ClientConnector>) -> Self {
        Self::new(
            connector,
            EngineSettings::from(&config.engine),
            config.engine.feedback_capacity,
        )
        .with_restart(RestartPolicy::from(&config.restart))
        .with_delivery_policy(delivery_policy(config.delivery.policy))
    }

    pub fn with_identities(mut self, identities: Arc<dyn IdentityGenerator>) -> Self {
        self.worker.identities = identities;
        self
    }

    pub fn with_restart(mut self, restart: RestartPolicy) -> Self {
        self.worker.restart = restart;
        self
    }

    pub fn with_delivery_policy(mut self, policy: Arc<dyn DeliveryPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Start forwarding one route
    pub fn spawn(&self, route: Route) -> Arc<RouteHandle> {
        let handle = Arc::new(RouteHandle::new(route));
        info!("Route supervisor: Added route '{}'", handle.id());

        let worker = self.worker.clone();
        let task = tokio::spawn(worker.run(handle.clone(), self.shutdown.subscribe()));
        *handle.task.lock() = Some(task);

        self.routes.write().push(handle.clone());
        handle
    }

    /// Start forwarding every route, in order
    pub fn spawn_all(&self, routes: impl IntoIterator<Item = Route>) {
        for route in routes {
            self.spawn(route);
        }
    }

    pub fn routes(&self) -> Vec<Arc<RouteHandle>> {
        self.routes.read().clone()
    }

    pub fn route_count(&self) -> usize {
        self.routes.read().len()
    }

    /// Number of routes currently forwarding
    pub fn running_count(&self) -> usize {
        self.routes
            .read()
            .iter()
            .filter(|r| r.state().is_running())
            .count()
    }

    /// State of every route
    pub fn status(&self) -> Vec<(RouteId, ForwardingState)> {
        self.routes
            .read()
            .iter()
            .map(|r| (r.id().clone(), r.state()))
            .collect()
    }

    pub fn stats(&self) -> Arc<FeedbackStats> {
        self.stats.clone()
    }

    /// Ask every engine to stop
    pub fn shutdown(&self) {
        info!("Route supervisor: Shutdown requested");
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Drain delivery feedback until shutdown, then wait for every route to
    /// release its clients.
    pub async fn run(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let mut feedback = self.feedback_rx.lock().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown_requested(&mut shutdown) => break,
                outcome = feedback.recv() => match outcome {
                    Some(outcome) => self.handle_outcome(&outcome),
                    None => break,
                }
            }
        }

        // Collect tasks first to avoid holding the lock across await
        let tasks: Vec<_> = self
            .routes
            .read()
            .iter()
            .filter_map(|r| r.task.lock().take())
            .collect();
        info!("Route supervisor: Waiting for {} route(s)", tasks.len());
        join_all(tasks).await;

        while let Ok(outcome) = feedback.try_recv() {
            self.handle_outcome(&outcome);
        }
        info!(
            "Route supervisor: Stopped ({} delivered, {} failed, {} dropped)",
            self.stats.delivered(),
            self.stats.failed(),
            self.stats.dropped()
        );
    }

    fn handle_outcome(&self, outcome: &DeliveryOutcome) {
        self.stats.record(outcome);
        self.policy.on_outcome(outcome);
    }
}
